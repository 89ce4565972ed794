//! search_files：在目录下按正则搜索文件内容
//!
//! 跳过隐藏目录、target、node_modules 与排除列表；可选 file_pattern（如 `*.rs`）按文件名过滤。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;

use crate::core::HiveError;
use crate::tools::filesystem::WorkspaceFs;
use crate::tools::registry::validate_params;
use crate::tools::{
    ActionCategory, ActionHandler, ActionRequest, ExecutionContext, ExecutionResult, ParamSpec,
    Params,
};

const MAX_RESULTS: usize = 300;
/// 超过该大小的文件不搜索
const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;

struct FileMatches {
    file_path: PathBuf,
    matches: Vec<(usize, String)>,
}

pub struct SearchFiles {
    fs: WorkspaceFs,
    max_results: usize,
}

impl SearchFiles {
    pub fn new(fs: WorkspaceFs) -> Self {
        Self {
            fs,
            max_results: MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

fn search_tree(
    fs: &WorkspaceFs,
    cwd: &Path,
    base: &Path,
    re: &Regex,
    include: Option<&glob::Pattern>,
    max_results: usize,
) -> (Vec<FileMatches>, bool) {
    let mut results = Vec::new();
    let mut total = 0;
    let walker = walkdir::WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            let skipped_dir = e.depth() > 0
                && e.file_type().is_dir()
                && (name.starts_with('.') || name == "target" || name == "node_modules");
            !skipped_dir && !fs.is_excluded(cwd, e.path())
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_SEARCH_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        if let Some(pattern) = include {
            let name = entry.file_name().to_string_lossy();
            if !pattern.matches(&name) {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let mut matches = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if re.is_match(line) {
                if total >= max_results {
                    if !matches.is_empty() {
                        results.push(FileMatches {
                            file_path: entry.path().to_path_buf(),
                            matches,
                        });
                    }
                    return (results, true);
                }
                matches.push((n + 1, line.trim_end().to_string()));
                total += 1;
            }
        }
        if !matches.is_empty() {
            results.push(FileMatches {
                file_path: entry.path().to_path_buf(),
                matches,
            });
        }
    }
    (results, false)
}

#[async_trait]
impl ActionHandler for SearchFiles {
    fn id(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Perform a regex search across files in a directory, listing each match with its line number. \
         file_pattern optionally restricts the search to file names matching a glob such as '*.rs'."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::path("path"),
            ParamSpec::text("regex"),
            ParamSpec::text("file_pattern").optional(),
        ];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Read
    }

    fn validate(&self, params: &Params) -> Result<(), HiveError> {
        validate_params(self.params(), params)?;
        if let Some(re) = params.get("regex") {
            Regex::new(re)
                .map_err(|e| HiveError::Structural(format!("Invalid regex pattern: {e}")))?;
        }
        if let Some(p) = params.get("file_pattern") {
            glob::Pattern::new(p)
                .map_err(|e| HiveError::Structural(format!("Invalid file_pattern: {e}")))?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let path = request.param("path").unwrap_or(".");
        let base = self.fs.guard(&ctx.cwd, path)?;
        let re = Regex::new(request.param("regex").unwrap_or(""))
            .map_err(|e| format!("Invalid regex pattern: {e}"))?;
        let include = request
            .param("file_pattern")
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| format!("Invalid file_pattern: {e}"))?;

        let fs = self.fs.clone();
        let cwd = ctx.cwd.clone();
        let max_results = self.max_results;
        let root = base.clone();
        let (results, truncated) = tokio::task::spawn_blocking(move || {
            search_tree(&fs, &cwd, &root, &re, include.as_ref(), max_results)
        })
        .await
        .map_err(|e| format!("Search failed: {e}"))?;

        let total: usize = results.iter().map(|r| r.matches.len()).sum();
        if total == 0 {
            return Ok(ExecutionResult::success("Found 0 results."));
        }
        let mut out = if truncated {
            format!("Showing first {total} results. Use a more specific search if necessary.\n")
        } else {
            format!("Found {total} result(s).\n")
        };
        for file in &results {
            let rel = file.file_path.strip_prefix(&ctx.cwd).unwrap_or(&file.file_path);
            out.push_str(&format!("\n{}\n", rel.display()));
            for (line, text) in &file.matches {
                out.push_str(&format!("{line:>5}: {text}\n"));
            }
        }
        Ok(ExecutionResult::success(out.trim_end().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{ctx, req};
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(dir.path().join("src/notes.md"), "fn in markdown\n").unwrap();
        std::fs::write(dir.path().join(".git/config"), "fn hidden\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_search_with_file_pattern() {
        let dir = tree();
        let handler = SearchFiles::new(WorkspaceFs::new(&[], 1024));
        let out = handler
            .execute(
                &ctx(dir.path()),
                &req("search_files", &[("path", "."), ("regex", r"fn \w+"), ("file_pattern", "*.rs")]),
            )
            .await
            .unwrap();
        let text = out.text();
        assert!(text.starts_with("Found 2 result(s)."));
        assert!(text.contains("src/lib.rs"));
        assert!(text.contains("    1: pub fn alpha() {}"));
        assert!(!text.contains("markdown"));
        assert!(!text.contains("hidden"));
    }

    #[tokio::test]
    async fn test_result_cap() {
        let dir = tree();
        let handler = SearchFiles::new(WorkspaceFs::new(&[], 1024)).with_max_results(1);
        let out = handler
            .execute(&ctx(dir.path()), &req("search_files", &[("path", "src"), ("regex", "fn")]))
            .await
            .unwrap();
        assert!(out.text().starts_with("Showing first 1 results."));
    }

    #[test]
    fn test_invalid_regex_is_structural() {
        let handler = SearchFiles::new(WorkspaceFs::new(&[], 1024));
        let params: Params = [("path", "."), ("regex", "fn (")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(matches!(handler.validate(&params), Err(HiveError::Structural(_))));
    }
}

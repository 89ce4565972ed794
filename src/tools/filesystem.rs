//! 文件系统 action：read_file / list_files / write_to_file
//!
//! 相对路径基于会话 cwd 解析；工作区内外由审批策略区分，这里只做 handler 自身的安全边界：
//! 排除列表（glob，如 `.git/**`）与文件大小上限，均在触碰存储之前检查。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::approval::locality;
use crate::parser::ActionInvocation;
use crate::tools::{
    ActionCategory, ActionHandler, ActionRequest, ExecutionContext, ExecutionResult, ParamSpec,
};

/// 单次列目录的条目上限
const MAX_LIST_ENTRIES: usize = 200;

/// 工作区文件访问边界：排除列表 + 大小上限
#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    excluded: Vec<glob::Pattern>,
    max_file_bytes: u64,
}

impl WorkspaceFs {
    pub fn new(excluded: &[String], max_file_bytes: u64) -> Self {
        let excluded = excluded
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pat) => Some(pat),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid exclusion pattern ignored");
                    None
                }
            })
            .collect();
        Self {
            excluded,
            max_file_bytes,
        }
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub fn resolve(&self, cwd: &Path, path: &str) -> PathBuf {
        locality::resolve(path, cwd)
    }

    /// 是否命中排除列表（相对 cwd 匹配，cwd 之外按绝对路径匹配）
    pub fn is_excluded(&self, cwd: &Path, abs: &Path) -> bool {
        let rel = abs.strip_prefix(cwd).unwrap_or(abs);
        let opts = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.excluded
            .iter()
            .any(|p| p.matches_path_with(rel, opts) || p.matches_path_with(abs, opts))
    }

    /// 解析并检查排除列表
    pub fn guard(&self, cwd: &Path, path: &str) -> Result<PathBuf, String> {
        let abs = self.resolve(cwd, path);
        if self.is_excluded(cwd, &abs) {
            return Err(format!("Access to '{path}' is blocked by the exclusion list."));
        }
        Ok(abs)
    }
}

pub struct ReadFile {
    fs: WorkspaceFs,
}

impl ReadFile {
    pub fn new(fs: WorkspaceFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl ActionHandler for ReadFile {
    fn id(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the specified path."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::path("path")];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Read
    }

    fn preview_partial(&self, invocation: &ActionInvocation) -> Option<String> {
        invocation
            .params
            .get("path")
            .map(|p| format!("Reading {p}..."))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let path = request.param("path").unwrap_or("");
        let abs = self.fs.guard(&ctx.cwd, path)?;
        tracing::info!(path = %abs.display(), "read_file");
        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|e| format!("Cannot read '{path}': {e}"))?;
        if meta.is_dir() {
            return Err(format!("'{path}' is a directory, use list_files instead."));
        }
        if meta.len() > self.fs.max_file_bytes() {
            return Err(format!(
                "File too large: {} bytes (max: {})",
                meta.len(),
                self.fs.max_file_bytes()
            ));
        }
        let bytes = tokio::fs::read(&abs)
            .await
            .map_err(|e| format!("Read failed: {e}"))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| format!("'{path}' is not a UTF-8 text file."))?;
        Ok(ExecutionResult::success(text))
    }
}

pub struct ListFiles {
    fs: WorkspaceFs,
}

impl ListFiles {
    pub fn new(fs: WorkspaceFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl ActionHandler for ListFiles {
    fn id(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories within the specified directory. Set recursive to true to list nested contents."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::path("path"), ParamSpec::text("recursive").optional()];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Read
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let path = request.param("path").unwrap_or(".");
        let recursive = request.param("recursive") == Some("true");
        let base = self.fs.guard(&ctx.cwd, path)?;
        let fs = self.fs.clone();
        let cwd = ctx.cwd.clone();

        let (entries, truncated) = tokio::task::spawn_blocking(move || {
            let depth = if recursive { usize::MAX } else { 1 };
            let mut entries = Vec::new();
            let mut truncated = false;
            let walker = walkdir::WalkDir::new(&base)
                .min_depth(1)
                .max_depth(depth)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    !(e.file_type().is_dir() && (name == ".git" || name == "node_modules" || name == "target"))
                        && !fs.is_excluded(&cwd, e.path())
                });
            for entry in walker.filter_map(|e| e.ok()) {
                if entries.len() >= MAX_LIST_ENTRIES {
                    truncated = true;
                    break;
                }
                let rel = entry.path().strip_prefix(&base).unwrap_or(entry.path());
                let suffix = if entry.file_type().is_dir() { "/" } else { "" };
                entries.push(format!("{}{suffix}", rel.display()));
            }
            (entries, truncated)
        })
        .await
        .map_err(|e| format!("List failed: {e}"))?;

        let mut text = if entries.is_empty() {
            "No files found.".to_string()
        } else {
            entries.join("\n")
        };
        if truncated {
            text.push_str(&format!(
                "\n\n(File list truncated at {MAX_LIST_ENTRIES} entries. Use list_files on specific subdirectories to explore further.)"
            ));
        }
        Ok(ExecutionResult::success(text))
    }
}

pub struct WriteToFile {
    fs: WorkspaceFs,
}

impl WriteToFile {
    pub fn new(fs: WorkspaceFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl ActionHandler for WriteToFile {
    fn id(&self) -> &str {
        "write_to_file"
    }

    fn description(&self) -> &str {
        "Write content to a file at the specified path. Overwrites the file if it exists and creates missing directories."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::path("path"), ParamSpec::raw("content")];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Write
    }

    fn preview_partial(&self, invocation: &ActionInvocation) -> Option<String> {
        let path = invocation.params.get("path")?;
        let len = invocation.params.get("content").map(|c| c.len()).unwrap_or(0);
        Some(format!("Writing {path} ({len} bytes so far)"))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let path = request.param("path").unwrap_or("");
        let content = request.param("content").unwrap_or("");
        let abs = self.fs.guard(&ctx.cwd, path)?;
        if content.len() as u64 > self.fs.max_file_bytes() {
            return Err(format!(
                "Content too large: {} bytes (max: {})",
                content.len(),
                self.fs.max_file_bytes()
            ));
        }
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create directory failed: {e}"))?;
        }
        let existed = tokio::fs::try_exists(&abs).await.unwrap_or(false);
        tokio::fs::write(&abs, content)
            .await
            .map_err(|e| format!("Write failed: {e}"))?;
        tracing::info!(path = %abs.display(), bytes = content.len(), "write_to_file");
        let verb = if existed { "updated" } else { "created" };
        Ok(ExecutionResult::success(format!("The file {path} was {verb} successfully."))
            .with_side_effect(abs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{ctx, req};
    use tempfile::TempDir;

    fn fs() -> WorkspaceFs {
        WorkspaceFs::new(&["secrets/**".to_string()], 1024)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(dir.path());
        let w = WriteToFile::new(fs())
            .execute(&ctx, &req("write_to_file", &[("path", "a/b.txt"), ("content", "hello")]))
            .await
            .unwrap();
        assert_eq!(w.side_effect_paths, vec![dir.path().join("a/b.txt")]);
        assert!(w.text().contains("created"));
        let r = ReadFile::new(fs())
            .execute(&ctx, &req("read_file", &[("path", "a/b.txt")]))
            .await
            .unwrap();
        assert_eq!(r.text(), "hello");
    }

    #[tokio::test]
    async fn test_exclusion_and_size_limits() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(dir.path());
        let blocked = WriteToFile::new(fs())
            .execute(&ctx, &req("write_to_file", &[("path", "secrets/key"), ("content", "x")]))
            .await;
        assert!(blocked.unwrap_err().contains("exclusion list"));
        assert!(!dir.path().join("secrets").exists());

        let big = "x".repeat(2048);
        let too_big = WriteToFile::new(fs())
            .execute(&ctx, &req("write_to_file", &[("path", "big.txt"), ("content", &big)]))
            .await;
        assert!(too_big.unwrap_err().contains("too large"));

        std::fs::write(dir.path().join("huge.txt"), &big).unwrap();
        let read = ReadFile::new(fs())
            .execute(&ctx, &req("read_file", &[("path", "huge.txt")]))
            .await;
        assert!(read.unwrap_err().contains("too large"));
    }

    #[tokio::test]
    async fn test_list_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/nested/x.rs"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("secrets")).unwrap();
        let ctx = ctx(dir.path());
        let flat = ListFiles::new(fs())
            .execute(&ctx, &req("list_files", &[("path", ".")]))
            .await
            .unwrap();
        assert_eq!(flat.text(), "src/");
        let deep = ListFiles::new(fs())
            .execute(&ctx, &req("list_files", &[("path", "src"), ("recursive", "true")]))
            .await
            .unwrap();
        assert_eq!(deep.text(), "main.rs\nnested/\nnested/x.rs");
    }
}

//! replace_in_file：按 SEARCH/REPLACE 块修改已有文件
//!
//! diff 格式：
//! ```text
//! ------- SEARCH
//! 原文
//! =======
//! 新内容
//! +++++++ REPLACE
//! ```
//! 先精确匹配，失败后尝试忽略行首缩进的逐行匹配。所有块都匹配成功才写回文件。

use async_trait::async_trait;

use crate::parser::ActionInvocation;
use crate::tools::filesystem::WorkspaceFs;
use crate::tools::{
    ActionCategory, ActionHandler, ActionRequest, ExecutionContext, ExecutionResult, ParamSpec,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct EditBlock {
    search: String,
    replace: String,
}

fn is_marker(line: &str, fill: &[char], word: &str) -> bool {
    let line = line.trim_end();
    let Some(head) = line.strip_suffix(word) else {
        return false;
    };
    let head = head.trim_end();
    head.len() >= 3 && head.chars().all(|c| fill.contains(&c))
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line.len() >= 3 && line.chars().all(|c| c == '=')
}

/// 解析 diff 中的全部编辑块
fn parse_blocks(diff: &str) -> Result<Vec<EditBlock>, String> {
    enum Stage {
        Idle,
        Search,
        Replace,
    }
    let mut blocks = Vec::new();
    let mut stage = Stage::Idle;
    let mut search: Vec<&str> = Vec::new();
    let mut replace: Vec<&str> = Vec::new();

    for line in diff.lines() {
        match stage {
            Stage::Idle => {
                if is_marker(line, &['-', '<'], "SEARCH") {
                    stage = Stage::Search;
                } else if !line.trim().is_empty() {
                    return Err(format!("Unexpected line outside a SEARCH block: {line}"));
                }
            }
            Stage::Search => {
                if is_separator(line) {
                    stage = Stage::Replace;
                } else {
                    search.push(line);
                }
            }
            Stage::Replace => {
                if is_marker(line, &['+', '>'], "REPLACE") {
                    blocks.push(EditBlock {
                        search: search.join("\n"),
                        replace: replace.join("\n"),
                    });
                    search.clear();
                    replace.clear();
                    stage = Stage::Idle;
                } else {
                    replace.push(line);
                }
            }
        }
    }
    if !matches!(stage, Stage::Idle) {
        return Err("Incomplete SEARCH/REPLACE block: missing REPLACE marker.".to_string());
    }
    if blocks.is_empty() {
        return Err("No SEARCH/REPLACE blocks found in diff.".to_string());
    }
    Ok(blocks)
}

/// 忽略行首缩进的逐行匹配，返回原文中匹配区间的字节范围（不含末行换行符）
fn find_with_indentation_tolerance(content: &str, search: &str) -> Option<(usize, usize)> {
    let wanted: Vec<&str> = search.lines().map(str::trim_start).collect();
    if wanted.is_empty() {
        return None;
    }
    let mut offsets = Vec::new();
    let mut lines = Vec::new();
    let mut pos = 0;
    for raw in content.split_inclusive('\n') {
        offsets.push(pos);
        lines.push(raw.trim_end_matches(['\n', '\r']));
        pos += raw.len();
    }
    if lines.len() < wanted.len() {
        return None;
    }
    (0..=lines.len() - wanted.len()).find_map(|i| {
        let hit = wanted
            .iter()
            .enumerate()
            .all(|(j, w)| lines[i + j].trim_start() == *w);
        hit.then(|| {
            let last = i + wanted.len() - 1;
            (offsets[i], offsets[last] + lines[last].len())
        })
    })
}

/// 依次应用编辑块，返回新内容与使用缩进容忍的块数
fn apply_blocks(content: &str, blocks: &[EditBlock]) -> Result<(String, usize), String> {
    let mut current = content.to_string();
    let mut tolerant = 0;
    for (i, block) in blocks.iter().enumerate() {
        if block.search.is_empty() {
            if !current.is_empty() {
                return Err(format!("Edit block {} has an empty SEARCH section but the file is not empty.", i + 1));
            }
            current = block.replace.clone();
            continue;
        }
        let (start, end) = match current.find(&block.search) {
            Some(pos) => (pos, pos + block.search.len()),
            None => {
                let range = find_with_indentation_tolerance(&current, &block.search).ok_or_else(|| {
                    format!(
                        "Edit block {} SEARCH content does not match anything in the file. \
                         The SEARCH section must match existing lines exactly (leading whitespace may differ).",
                        i + 1
                    )
                })?;
                tolerant += 1;
                range
            }
        };
        current.replace_range(start..end, &block.replace);
    }
    Ok((current, tolerant))
}

pub struct ReplaceInFile {
    fs: WorkspaceFs,
}

impl ReplaceInFile {
    pub fn new(fs: WorkspaceFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl ActionHandler for ReplaceInFile {
    fn id(&self) -> &str {
        "replace_in_file"
    }

    fn description(&self) -> &str {
        "Replace sections of an existing file using one or more SEARCH/REPLACE blocks. \
         Each block starts with '------- SEARCH', separates old and new content with '=======', \
         and ends with '+++++++ REPLACE'."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::path("path"), ParamSpec::raw("diff")];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Write
    }

    fn preview_partial(&self, invocation: &ActionInvocation) -> Option<String> {
        let path = invocation.params.get("path")?;
        let blocks = invocation
            .params
            .get("diff")
            .map(|d| d.lines().filter(|l| is_separator(l)).count())
            .unwrap_or(0);
        Some(format!("Editing {path} ({blocks} blocks so far)"))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let path = request.param("path").unwrap_or("");
        let diff = request.param("diff").unwrap_or("");
        let abs = self.fs.guard(&ctx.cwd, path)?;
        let blocks = parse_blocks(diff)?;

        let content = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|e| format!("Failed to read '{path}': {e}"))?;
        if content.len() as u64 > self.fs.max_file_bytes() {
            return Err(format!(
                "File too large: {} bytes (max: {})",
                content.len(),
                self.fs.max_file_bytes()
            ));
        }
        let (updated, tolerant) = apply_blocks(&content, &blocks)?;
        tokio::fs::write(&abs, &updated)
            .await
            .map_err(|e| format!("Failed to write '{path}': {e}"))?;
        tracing::info!(path = %abs.display(), blocks = blocks.len(), tolerant, "replace_in_file");

        let mut msg = format!("Applied {} edit block(s) to {path}.", blocks.len());
        if tolerant > 0 {
            msg.push_str(&format!(" {tolerant} block(s) matched with indentation tolerance."));
        }
        Ok(ExecutionResult::success(msg).with_side_effect(abs))
    }
}

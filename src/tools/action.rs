//! Action 请求与执行结果
//!
//! ActionRequest：一个完整的 action 块（参数、correlation id、所在轮次与块序号）；
//! ExecutionResult：handler 执行一次的产物，每个进入执行阶段的请求恰好产生一个。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// action 参数（参数名 -> 字符串值，按名排序以保证描述与日志稳定）
pub type Params = BTreeMap<String, String>;

/// action 类别（审批策略的类别闸门按此查表）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Read,
    Write,
    ExecuteShell,
    Browse,
    CallExternalTool,
}

impl ActionCategory {
    /// 是否修改文件（计划模式下一律拒绝）
    pub fn is_mutating(&self) -> bool {
        matches!(self, ActionCategory::Write)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Read => "read",
            ActionCategory::Write => "write",
            ActionCategory::ExecuteShell => "execute_shell",
            ActionCategory::Browse => "browse",
            ActionCategory::CallExternalTool => "call_external_tool",
        }
    }
}

/// 审批局部性闸门的判定对象：路径或 URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionTarget {
    Path(String),
    Url(String),
}

/// 可派发的 action 请求
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_id: String,
    pub params: Params,
    /// 结构化传输下用于把结果对应回请求
    pub correlation_id: Option<String>,
    pub turn_index: usize,
    pub block_index: usize,
}

impl ActionRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    /// 结果去重与配对使用的键：优先 correlation id，否则为 (轮次, 块序号)
    pub fn result_key(&self) -> String {
        match &self.correlation_id {
            Some(id) => id.clone(),
            None => format!("t{}-b{}", self.turn_index, self.block_index),
        }
    }
}

/// 结构化输出片段
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputPart {
    Text { text: String },
    Image { media_type: String, data: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// 执行是否已结束；长时间运行的命令可以返回「仍在运行，继续观察」
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Completed,
    StillRunning { process_id: u64 },
}

/// handler 执行结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: Vec<OutputPart>,
    #[serde(default)]
    pub side_effect_paths: Vec<PathBuf>,
    pub completion: Completion,
}

impl ExecutionResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: vec![OutputPart::Text { text: text.into() }],
            side_effect_paths: Vec::new(),
            completion: Completion::Completed,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            output: vec![OutputPart::Text { text: text.into() }],
            side_effect_paths: Vec::new(),
            completion: Completion::Completed,
        }
    }

    /// 进程仍在运行：已捕获的输出 + 进程登记号
    pub fn still_running(process_id: u64, text: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: vec![OutputPart::Text { text: text.into() }],
            side_effect_paths: Vec::new(),
            completion: Completion::StillRunning { process_id },
        }
    }

    pub fn with_side_effect(mut self, path: impl Into<PathBuf>) -> Self {
        self.side_effect_paths.push(path.into());
        self
    }

    /// 在输出末尾追加一段文本（如用户审批时附带的反馈）
    pub fn with_appended_text(mut self, text: impl Into<String>) -> Self {
        self.output.push(OutputPart::Text { text: text.into() });
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ExecutionStatus::Error
    }

    pub fn is_running(&self) -> bool {
        matches!(self.completion, Completion::StillRunning { .. })
    }

    /// 输出拼接为纯文本（图片以占位符表示）
    pub fn text(&self) -> String {
        self.output
            .iter()
            .map(|p| match p {
                OutputPart::Text { text } => text.clone(),
                OutputPart::Image { media_type, .. } => format!("[image: {media_type}]"),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_key_prefers_correlation() {
        let mut req = ActionRequest {
            action_id: "read_file".into(),
            params: Params::new(),
            correlation_id: Some("call_1".into()),
            turn_index: 2,
            block_index: 1,
        };
        assert_eq!(req.result_key(), "call_1");
        req.correlation_id = None;
        assert_eq!(req.result_key(), "t2-b1");
    }

    #[test]
    fn test_result_text_joins_parts() {
        let r = ExecutionResult::success("ok").with_appended_text("feedback");
        assert_eq!(r.text(), "ok\n\nfeedback");
        assert!(!r.is_error());
        assert!(!r.is_running());
        assert!(ExecutionResult::still_running(3, "...").is_running());
    }
}

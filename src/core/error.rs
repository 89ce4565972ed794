//! 编排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 HiveError 决定 RetryWithPrompt / Escalate / Abort。
//! 错误按来源归为四类（结构错误 / 策略拒绝 / 执行失败 / 传输失败），见 ErrorClass。

use thiserror::Error;

/// 运行过程中可能出现的错误（参数结构、审批、工具执行、传输、持久化等）
#[derive(Error, Debug)]
pub enum HiveError {
    /// 参数缺失 / 格式错误 / 未知 action：本地恢复，作为错误结果回传模型
    #[error("Structural error: {0}")]
    Structural(String),

    /// 审批未通过（拒绝、计划模式限制、超时）
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    /// handler 在 execute 中失败
    #[error("Action execution failed: {0}")]
    Execution(String),

    #[error("Action timeout: {0}")]
    ActionTimeout(String),

    /// 模型传输失败，原样向上传递
    #[error("Transport error: {0}")]
    Transport(String),

    /// 同一 correlation 重复提交结果
    #[error("Duplicate result for {0}")]
    DuplicateResult(String),

    /// 同一 ActionRequest 被第二次派发执行
    #[error("Duplicate execution of block {0}")]
    DuplicateExecution(usize),

    #[error("Missing correlation id for action '{0}'")]
    MissingCorrelation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// 错误分类（用于决定错误如何呈现给模型 / 是否向上传播）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Structural,
    PolicyDenial,
    ExecutionFailure,
    TransportFailure,
    Internal,
}

impl HiveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HiveError::Structural(_) | HiveError::MissingCorrelation(_) => ErrorClass::Structural,
            HiveError::PolicyDenied(_) => ErrorClass::PolicyDenial,
            HiveError::Execution(_) | HiveError::ActionTimeout(_) => ErrorClass::ExecutionFailure,
            HiveError::Transport(_) => ErrorClass::TransportFailure,
            _ => ErrorClass::Internal,
        }
    }

    /// 是否可在当前轮内恢复（以错误结果形式回传模型，不中断会话）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Structural | ErrorClass::PolicyDenial | ErrorClass::ExecutionFailure
        )
    }
}

impl From<std::io::Error> for HiveError {
    fn from(e: std::io::Error) -> Self {
        HiveError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for HiveError {
    fn from(e: serde_json::Error) -> Self {
        HiveError::Store(e.to_string())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重试（如参数缺失）
    RetryWithPrompt(String),
    /// 连续错误次数过多，需要用户介入
    Escalate(String),
    /// 终止当前任务
    Abort,
}

//! 结果封装
//!
//! Structured：结果带 correlation id，对应结构化 tool call；Inline：结果以 `[描述] Result:` 开头的文字段追加。
//! 同一个 key 重复提交结果视为 bug（DuplicateResult），不会覆盖。去重集合在恢复会话时从历史重建。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::HiveError;
use crate::marshal::responses;
use crate::memory::{HistoryPart, SessionState};
use crate::tools::{ActionRequest, ExecutionResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarshalMode {
    Structured,
    Inline,
}

/// 送回模型的结果消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub key: String,
    pub correlation_id: Option<String>,
    pub is_error: bool,
    pub content: String,
}

impl From<ToolResult> for HistoryPart {
    fn from(r: ToolResult) -> Self {
        HistoryPart::ActionResult {
            key: r.key,
            correlation_id: r.correlation_id,
            is_error: r.is_error,
            content: r.content,
        }
    }
}

#[derive(Debug)]
pub struct ResultMarshaler {
    mode: MarshalMode,
    recorded: HashSet<String>,
    pending: Vec<ToolResult>,
}

impl ResultMarshaler {
    pub fn new(mode: MarshalMode) -> Self {
        Self {
            mode,
            recorded: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// 以会话历史中已有的结果初始化去重集合
    pub fn for_session(mode: MarshalMode, state: &SessionState) -> Self {
        Self {
            mode,
            recorded: state.recorded_result_keys(),
            pending: Vec::new(),
        }
    }

    pub fn mode(&self) -> MarshalMode {
        self.mode
    }

    pub fn is_recorded(&self, key: &str) -> bool {
        self.recorded.contains(key)
    }

    pub fn record(
        &mut self,
        request: &ActionRequest,
        describe: &str,
        result: &ExecutionResult,
    ) -> Result<ToolResult, HiveError> {
        if self.mode == MarshalMode::Structured && request.correlation_id.is_none() {
            return Err(HiveError::MissingCorrelation(request.action_id.clone()));
        }
        self.push(request, describe, result, self.mode)
    }

    /// 结构化传输下模型仍用文字标签发出的请求没有 correlation id，结果按 inline 格式记录
    pub fn record_inline(
        &mut self,
        request: &ActionRequest,
        describe: &str,
        result: &ExecutionResult,
    ) -> Result<ToolResult, HiveError> {
        self.push(request, describe, result, MarshalMode::Inline)
    }

    fn push(
        &mut self,
        request: &ActionRequest,
        describe: &str,
        result: &ExecutionResult,
        mode: MarshalMode,
    ) -> Result<ToolResult, HiveError> {
        let key = request.result_key();
        if !self.recorded.insert(key.clone()) {
            return Err(HiveError::DuplicateResult(key));
        }
        let text = result.text();
        let content = match mode {
            MarshalMode::Structured => text,
            MarshalMode::Inline => format!("{}\n{}", responses::inline_header(describe), text),
        };
        let msg = ToolResult {
            key,
            correlation_id: request.correlation_id.clone(),
            is_error: result.is_error(),
            content,
        };
        self.pending.push(msg.clone());
        Ok(msg)
    }

    pub fn pending(&self) -> &[ToolResult] {
        &self.pending
    }

    pub fn take_pending(&mut self) -> Vec<ToolResult> {
        std::mem::take(&mut self.pending)
    }

    /// 把尚未落盘的结果写入会话副本，不清空待写列表；用于轮中检查点
    pub fn write_pending_into(&self, state: &mut SessionState) -> usize {
        let n = self.pending.len();
        if n > 0 {
            let entry = state.trailing_user_entry();
            entry.parts.extend(self.pending.iter().cloned().map(HistoryPart::from));
        }
        n
    }

    /// 把本轮结果写入会话末尾的 user 条目
    pub fn flush_into(&mut self, state: &mut SessionState) -> usize {
        let pending = self.take_pending();
        let n = pending.len();
        if n > 0 {
            let entry = state.trailing_user_entry();
            entry.parts.extend(pending.into_iter().map(HistoryPart::from));
        }
        n
    }
}

//! 模型传输抽象
//!
//! ModelTransport 把一次请求（system prompt + 有效历史）变成事件流：文字 token、结构化 tool call 增量、用量、结束。
//! 重试属于传输层自身的职责；返回的错误作为 Transport 错误原样上抛。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::core::HiveError;
use crate::memory::{HistoryEntry, TokenUsage};
use crate::parser::NativeCallDelta;

/// 一次模型请求
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub history: Vec<HistoryEntry>,
}

/// 传输事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    ToolCall(NativeCallDelta),
    Usage(TokenUsage),
    Done,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<TransportEvent, HiveError>> + Send>>;

#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// 是否使用结构化 tool call（结果需带 correlation id）
    fn supports_correlation(&self) -> bool {
        false
    }

    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, HiveError>;
}

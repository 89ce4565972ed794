//! 脚本化传输（用于测试与演示，无需 API）
//!
//! 每次请求按顺序取出一段预设回复，切成小块逐个发出以模拟流式输出；脚本用完后返回空回复。

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::Mutex;

use crate::core::HiveError;
use crate::llm::{EventStream, ModelRequest, ModelTransport, TransportEvent};
use crate::memory::TokenUsage;
use crate::parser::NativeCallDelta;

/// 一轮预设回复
#[derive(Clone, Debug)]
pub enum ScriptedTurn {
    Events(Vec<TransportEvent>),
    /// 传输失败
    Fail(String),
}

impl ScriptedTurn {
    /// 文字回复，按 chunk 个字符切块
    pub fn text(body: &str, chunk: usize) -> Self {
        let chars: Vec<char> = body.chars().collect();
        let mut events: Vec<TransportEvent> = chars
            .chunks(chunk.max(1))
            .map(|c| TransportEvent::Text(c.iter().collect()))
            .collect();
        events.push(TransportEvent::Usage(TokenUsage {
            input_tokens: 0,
            output_tokens: (chars.len() / 4) as u64,
            ..Default::default()
        }));
        events.push(TransportEvent::Done);
        ScriptedTurn::Events(events)
    }

    /// 单个结构化 tool call，参数 JSON 拆成两段增量
    pub fn native_call(id: &str, name: &str, arguments: &str) -> Self {
        let mid = arguments
            .char_indices()
            .nth(arguments.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(0);
        ScriptedTurn::Events(vec![
            TransportEvent::ToolCall(NativeCallDelta {
                index: 0,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: arguments[..mid].to_string(),
            }),
            TransportEvent::ToolCall(NativeCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: arguments[mid..].to_string(),
            }),
            TransportEvent::Done,
        ])
    }
}

/// 脚本化传输：按顺序回放，并记录收到的请求
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    turns: Arc<Mutex<VecDeque<ScriptedTurn>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    correlation: bool,
}

impl ScriptedTransport {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns.into_iter().collect())),
            requests: Arc::default(),
            correlation: false,
        }
    }

    /// 文字回复脚本（每段按 chunk 切块）
    pub fn from_texts<S: AsRef<str>>(texts: impl IntoIterator<Item = S>, chunk: usize) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedTurn::text(t.as_ref(), chunk)))
    }

    /// 对话脚本：各段回复之间以单独一行 `---` 分隔
    pub fn from_transcript(transcript: &str, chunk: usize) -> Self {
        let mut turns = Vec::new();
        let mut current = Vec::new();
        for line in transcript.lines() {
            if line.trim_end() == "---" {
                turns.push(current.join("\n"));
                current.clear();
            } else {
                current.push(line);
            }
        }
        turns.push(current.join("\n"));
        Self::from_texts(
            turns.iter().map(|t| t.trim()).filter(|t| !t.is_empty()),
            chunk,
        )
    }

    /// 以结构化 tool call 模式运行
    pub fn with_correlation(mut self, on: bool) -> Self {
        self.correlation = on;
        self
    }

    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.turns.lock().await.len()
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    fn supports_correlation(&self) -> bool {
        self.correlation
    }

    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, HiveError> {
        self.requests.lock().await.push(request.clone());
        let turn = self.turns.lock().await.pop_front();
        let events = match turn {
            Some(ScriptedTurn::Events(events)) => events,
            Some(ScriptedTurn::Fail(msg)) => return Err(HiveError::Transport(msg)),
            None => vec![TransportEvent::Done],
        };
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

//! 对话历史条目
//!
//! 一条 HistoryEntry 是一次发言（user / assistant），由若干片段组成：文字、action 请求、action 结果。
//! 请求与结果通过 result_key 配对（correlation id 或 `t{轮}-b{块}`）。

use serde::{Deserialize, Serialize};

use crate::tools::Params;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryPart {
    Text {
        text: String,
    },
    ActionRequest {
        key: String,
        action_id: String,
        params: Params,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    ActionResult {
        key: String,
        #[serde(default)]
        correlation_id: Option<String>,
        is_error: bool,
        content: String,
    },
}

/// 单条历史
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub parts: Vec<HistoryPart>,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![HistoryPart::Text { text: text.into() }],
        }
    }

    pub fn assistant(parts: Vec<HistoryPart>) -> Self {
        Self {
            role: Role::Assistant,
            parts,
        }
    }

    pub fn empty(role: Role) -> Self {
        Self {
            role,
            parts: Vec::new(),
        }
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.parts.push(HistoryPart::Text { text: text.into() });
    }

    pub fn request_keys(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            HistoryPart::ActionRequest { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }

    pub fn result_keys(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            HistoryPart::ActionResult { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }

    /// 纯文本视图（无结构化传输时送给模型）
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                HistoryPart::Text { text } => text.clone(),
                HistoryPart::ActionRequest {
                    action_id, params, ..
                } => {
                    let inner: String = params
                        .iter()
                        .map(|(k, v)| format!("<{k}>{v}</{k}>"))
                        .collect();
                    format!("<{action_id}>{inner}</{action_id}>")
                }
                HistoryPart::ActionResult { content, .. } => content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// token 计数（输入 / 输出 / 缓存）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_write_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_text() {
        let mut params = Params::new();
        params.insert("path".into(), "a.txt".into());
        let entry = HistoryEntry::assistant(vec![
            HistoryPart::Text {
                text: "reading".into(),
            },
            HistoryPart::ActionRequest {
                key: "t1-b1".into(),
                action_id: "read_file".into(),
                params,
                correlation_id: None,
            },
        ]);
        assert_eq!(entry.request_keys().collect::<Vec<_>>(), vec!["t1-b1"]);
        assert_eq!(entry.result_keys().count(), 0);
        assert_eq!(entry.text(), "reading\n\n<read_file><path>a.txt</path></read_file>");
    }

    #[test]
    fn test_usage_total() {
        let mut u = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            ..Default::default()
        };
        u.add(&TokenUsage {
            input_tokens: 1,
            output_tokens: 1,
            cache_read_tokens: 2,
            cache_write_tokens: 0,
        });
        assert_eq!(u.total(), 19);
    }
}

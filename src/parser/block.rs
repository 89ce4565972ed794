//! 内容块与标签词表
//!
//! ContentBlock 是模型输出的最小单元：一段文字，或一次 action 调用；流式阶段 partial=true，
//! 完成后不再变化。Vocabulary 来自 ActionRegistry，只有已注册的 action 名才会开启 action 块。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::tools::Params;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Prose,
    Action,
}

/// 一次 action 调用（可能仍在流式中）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub action_id: String,
    pub params: Params,
    pub correlation_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockPayload {
    Text { text: String },
    Action(ActionInvocation),
}

/// 模型输出的内容块
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub partial: bool,
    pub payload: BlockPayload,
}

impl ContentBlock {
    pub fn prose(text: impl Into<String>, partial: bool) -> Self {
        Self {
            partial,
            payload: BlockPayload::Text { text: text.into() },
        }
    }

    pub fn action(invocation: ActionInvocation, partial: bool) -> Self {
        Self {
            partial,
            payload: BlockPayload::Action(invocation),
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self.payload {
            BlockPayload::Text { .. } => BlockKind::Prose,
            BlockPayload::Action(_) => BlockKind::Action,
        }
    }

    pub fn as_action(&self) -> Option<&ActionInvocation> {
        match &self.payload {
            BlockPayload::Action(a) => Some(a),
            BlockPayload::Text { .. } => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            BlockPayload::Text { text } => Some(text),
            BlockPayload::Action(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct VocabEntry {
    params: Vec<String>,
    raw: BTreeSet<String>,
}

/// 解析器可识别的标签：action 名及其参数名；raw 参数保留内部空白
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    actions: BTreeMap<String, VocabEntry>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, id: &str, params: &[&str], raw: &[&str]) -> Self {
        self.insert(id, params.iter().copied(), raw.iter().copied());
        self
    }

    pub fn insert<'a>(
        &mut self,
        id: &str,
        params: impl IntoIterator<Item = &'a str>,
        raw: impl IntoIterator<Item = &'a str>,
    ) {
        self.actions.insert(
            id.to_string(),
            VocabEntry {
                params: params.into_iter().map(str::to_string).collect(),
                raw: raw.into_iter().map(str::to_string).collect(),
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    pub fn action_ids(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(|s| s.as_str())
    }

    pub fn params_of(&self, id: &str) -> &[String] {
        self.actions
            .get(id)
            .map(|e| e.params.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_raw(&self, id: &str, param: &str) -> bool {
        self.actions
            .get(id)
            .map(|e| e.raw.contains(param))
            .unwrap_or(false)
    }

    /// text 若以某个 action 的开标签开头（`<id>`），返回该 id
    pub(crate) fn match_open<'a>(&'a self, text: &str) -> Option<&'a str> {
        self.actions.keys().map(|s| s.as_str()).find(|id| {
            text.len() > id.len() + 1
                && text.starts_with('<')
                && text[1..].starts_with(id)
                && text[1 + id.len()..].starts_with('>')
        })
    }

    /// fragment（不含 `<`）是否可能是某个开标签的前缀
    pub(crate) fn is_open_prefix(&self, fragment: &str) -> bool {
        self.actions.keys().any(|id| {
            let tag = format!("{id}>");
            tag.starts_with(fragment)
        })
    }
}

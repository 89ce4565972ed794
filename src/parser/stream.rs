//! 流式块解析器
//!
//! feed 每次追加 token 后从头重新渲染整段输出，返回当前全部块（幂等：同一状态重复读取结果相同，
//! 未完成的块每次返回更长的前缀）。finalize 结束本轮：未闭合的 action 标签降级为尾部文字块，
//! 不让整轮失败。结构化传输的 tool call 增量经 feed_native 累积，在 finalize 时变为完成块。

use serde_json::Value;

use crate::parser::block::{ActionInvocation, ContentBlock, Vocabulary};
use crate::tools::Params;

/// 结构化 tool call 的一段增量（按 index 归并）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NativeCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Clone, Debug)]
struct NativeCall {
    index: usize,
    id: String,
    name: String,
    arguments: String,
}

/// 块解析器：持有本轮累积文本与结构化调用
#[derive(Clone, Debug)]
pub struct BlockParser {
    vocab: Vocabulary,
    buffer: String,
    native: Vec<NativeCall>,
    finalized: bool,
}

enum ActionScan {
    Complete { params: Params, consumed: usize },
    Incomplete { params: Params },
}

impl BlockParser {
    pub fn new(vocab: Vocabulary) -> Self {
        Self {
            vocab,
            buffer: String::new(),
            native: Vec::new(),
            finalized: false,
        }
    }

    /// 追加文本 token，返回当前全部块
    pub fn feed(&mut self, token: &str) -> Vec<ContentBlock> {
        if !self.finalized {
            self.buffer.push_str(token);
        }
        self.blocks()
    }

    /// 追加结构化 tool call 增量
    pub fn feed_native(&mut self, delta: NativeCallDelta) -> Vec<ContentBlock> {
        if self.finalized {
            return self.blocks();
        }
        match self.native.iter_mut().find(|c| c.index == delta.index) {
            Some(call) => {
                if let Some(name) = delta.name {
                    if call.name.is_empty() {
                        call.name = name;
                    }
                }
                if let Some(id) = delta.id {
                    call.id = id;
                }
                call.arguments.push_str(&delta.arguments);
            }
            None => {
                let id = delta
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                self.native.push(NativeCall {
                    index: delta.index,
                    id,
                    name: delta.name.unwrap_or_default(),
                    arguments: delta.arguments,
                });
                self.native.sort_by_key(|c| c.index);
            }
        }
        self.blocks()
    }

    /// 结束本轮，所有块变为完成态
    pub fn finalize(&mut self) -> Vec<ContentBlock> {
        self.finalized = true;
        self.blocks()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// 本轮原始文本（用于写入历史）
    pub fn raw_text(&self) -> &str {
        &self.buffer
    }

    /// 当前块序列（可重复读取）
    pub fn blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = self.render_text();
        for call in &self.native {
            blocks.push(ContentBlock::action(
                ActionInvocation {
                    action_id: call.name.clone(),
                    params: parse_native_arguments(&call.arguments),
                    correlation_id: Some(call.id.clone()),
                },
                !self.finalized,
            ));
        }
        blocks
    }

    fn render_text(&self) -> Vec<ContentBlock> {
        let text = self.buffer.as_str();
        let done = self.finalized;
        let mut blocks = Vec::new();
        let mut prose_start = 0;
        let mut pos = 0;

        while let Some(off) = text[pos..].find('<') {
            let tag_at = pos + off;
            let Some(id) = self.vocab.match_open(&text[tag_at..]) else {
                pos = tag_at + 1;
                continue;
            };
            push_prose(&mut blocks, &text[prose_start..tag_at], false);
            let body_at = tag_at + id.len() + 2;
            match self.scan_action(id, &text[body_at..]) {
                ActionScan::Complete { params, consumed } => {
                    blocks.push(ContentBlock::action(
                        ActionInvocation {
                            action_id: id.to_string(),
                            params,
                            correlation_id: None,
                        },
                        false,
                    ));
                    pos = body_at + consumed;
                    prose_start = pos;
                }
                ActionScan::Incomplete { params } => {
                    if done {
                        // 未闭合的 action 语法按普通文字处理
                        push_prose(&mut blocks, &text[tag_at..], false);
                    } else {
                        blocks.push(ContentBlock::action(
                            ActionInvocation {
                                action_id: id.to_string(),
                                params,
                                correlation_id: None,
                            },
                            true,
                        ));
                    }
                    return blocks;
                }
            }
        }

        let tail = &text[prose_start..];
        if done {
            push_prose(&mut blocks, tail, false);
        } else {
            push_prose(&mut blocks, self.strip_partial_open_tag(tail), true);
        }
        blocks
    }

    fn scan_action(&self, id: &str, body: &str) -> ActionScan {
        let close = format!("</{id}>");
        let names = self.vocab.params_of(id);
        let mut params = Params::new();
        let mut p = 0;

        loop {
            let rest = &body[p..];
            let close_at = rest.find(&close);
            let next_param = names
                .iter()
                .filter_map(|n| rest.find(&format!("<{n}>")).map(|at| (at, n.as_str())))
                .min_by_key(|(at, _)| *at);

            match (next_param, close_at) {
                (Some((at, name)), c) if c.map_or(true, |c| at < c) => {
                    let value_at = at + name.len() + 2;
                    let raw = self.vocab.is_raw(id, name);
                    let pclose = format!("</{name}>");
                    let value_rest = &rest[value_at..];
                    let end = if raw {
                        raw_value_end(value_rest, &pclose, &close, names)
                    } else {
                        value_rest.find(&pclose)
                    };
                    match end {
                        Some(e) => {
                            params.insert(name.to_string(), clean_value(&value_rest[..e], raw));
                            p += value_at + e + pclose.len();
                        }
                        None => {
                            let partial = if raw {
                                raw_partial_value(value_rest, &pclose, &close, names)
                            } else {
                                strip_partial_suffix(value_rest, &pclose)
                            };
                            params.insert(name.to_string(), clean_value(partial, raw));
                            return ActionScan::Incomplete { params };
                        }
                    }
                }
                (_, Some(c)) => {
                    return ActionScan::Complete {
                        params,
                        consumed: p + c + close.len(),
                    };
                }
                (_, None) => return ActionScan::Incomplete { params },
            }
        }
    }

    /// 流式中隐藏尾部可能是开标签前缀的片段（如 `<wri`）
    fn strip_partial_open_tag<'a>(&self, tail: &'a str) -> &'a str {
        if let Some(lt) = tail.rfind('<') {
            let fragment = &tail[lt + 1..];
            if !fragment.contains('>') && self.vocab.is_open_prefix(fragment) {
                return &tail[..lt];
            }
        }
        tail
    }
}

/// 原始参数的结束位置：第一个其后紧跟本 action 闭标签或下一个参数开标签的 `</param>`
///
/// 内容里出现的同名闭标签只要后面不是这两种标签就算内容；范围不会越过本 action 的闭标签，
/// 已完成的块不会因为后续输出而改变。
fn raw_value_end(value: &str, pclose: &str, close: &str, names: &[String]) -> Option<usize> {
    let mut from = 0;
    while let Some(off) = value[from..].find(pclose) {
        let end = from + off;
        let after = value[end + pclose.len()..].trim_start();
        if after.starts_with(close) || names.iter().any(|n| after.starts_with(&format!("<{n}>"))) {
            return Some(end);
        }
        from = end + pclose.len();
    }
    None
}

/// 流式中的原始参数：`</param>` 之后只剩下闭标签前缀时，先把它当作结尾隐藏
fn raw_partial_value<'a>(value: &'a str, pclose: &str, close: &str, names: &[String]) -> &'a str {
    let mut from = 0;
    while let Some(off) = value[from..].find(pclose) {
        let end = from + off;
        let after = value[end + pclose.len()..].trim_start();
        if close.starts_with(after) || names.iter().any(|n| format!("<{n}>").starts_with(after)) {
            return &value[..end];
        }
        from = end + pclose.len();
    }
    strip_partial_suffix(value, pclose)
}

fn push_prose(blocks: &mut Vec<ContentBlock>, text: &str, partial: bool) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        blocks.push(ContentBlock::prose(trimmed, partial));
    }
}

fn clean_value(value: &str, raw: bool) -> String {
    if raw {
        let v = value.strip_prefix('\n').unwrap_or(value);
        let v = v.strip_suffix('\n').unwrap_or(v);
        v.to_string()
    } else {
        value.trim().to_string()
    }
}

/// 去掉尾部的半截闭标签（如 `</pa`）
fn strip_partial_suffix<'a>(value: &'a str, close: &str) -> &'a str {
    for k in (1..close.len()).rev() {
        if value.ends_with(&close[..k]) {
            return &value[..value.len() - k];
        }
    }
    value
}

fn parse_native_arguments(arguments: &str) -> Params {
    let mut params = Params::new();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(arguments) {
        for (k, v) in map {
            let s = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            params.insert(k, s);
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::block::BlockKind;

    fn vocab() -> Vocabulary {
        Vocabulary::new()
            .with_action("read_file", &["path"], &[])
            .with_action("write_to_file", &["path", "content"], &["content"])
    }

    #[test]
    fn test_prose_action_prose() {
        let mut parser = BlockParser::new(vocab());
        parser.feed("Let me look.\n<read_file>\n<path>src/main.rs</path>\n</read_file>\nDone");
        let blocks = parser.finalize();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].as_text(), Some("Let me look."));
        let action = blocks[1].as_action().unwrap();
        assert_eq!(action.action_id, "read_file");
        assert_eq!(action.params.get("path").map(String::as_str), Some("src/main.rs"));
        assert!(blocks.iter().all(|b| !b.partial));
    }

    #[test]
    fn test_streaming_prefix_grows_until_complete() {
        let input = "<read_file><path>a/b.txt</path></read_file>";
        let mut parser = BlockParser::new(vocab());
        let mut last_path_len = 0;
        let mut completed_at = None;
        for (i, ch) in input.chars().enumerate() {
            let blocks = parser.feed(&ch.to_string());
            if let Some(b) = blocks.last() {
                if let Some(a) = b.as_action() {
                    let len = a.params.get("path").map(|p| p.len()).unwrap_or(0);
                    assert!(len >= last_path_len);
                    last_path_len = len;
                    if !b.partial && completed_at.is_none() {
                        completed_at = Some(i);
                    }
                }
            }
        }
        assert_eq!(completed_at, Some(input.len() - 1));
        assert_eq!(last_path_len, "a/b.txt".len());
    }

    #[test]
    fn test_feed_is_idempotent_rerender() {
        let mut parser = BlockParser::new(vocab());
        parser.feed("Hello <read_file><path>x</pa");
        let first = parser.blocks();
        let second = parser.blocks();
        assert_eq!(first, second);
        let action = first[1].as_action().unwrap();
        assert!(first[1].partial);
        assert_eq!(action.params.get("path").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_unterminated_action_becomes_trailing_prose() {
        let mut parser = BlockParser::new(vocab());
        parser.feed("Intro\n<read_file><path>src/lib.rs");
        let blocks = parser.finalize();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].kind(), BlockKind::Prose);
        assert!(blocks[1].as_text().unwrap().starts_with("<read_file>"));
        assert!(!blocks[1].partial);
    }

    #[test]
    fn test_partial_open_tag_hidden_while_streaming() {
        let mut parser = BlockParser::new(vocab());
        let blocks = parser.feed("Working on it <wri");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].as_text(), Some("Working on it"));
        assert!(blocks[0].partial);
        // 不是任何标签前缀时原样保留
        let mut parser = BlockParser::new(vocab());
        let blocks = parser.feed("if a <b");
        assert_eq!(blocks[0].as_text(), Some("if a <b"));
    }

    #[test]
    fn test_raw_content_keeps_indentation() {
        let mut parser = BlockParser::new(vocab());
        let blocks = parser.feed(
            "<write_to_file><path>a.rs</path><content>\nfn main() {\n    run();\n}\n</content></write_to_file>",
        );
        let action = blocks[0].as_action().unwrap();
        assert_eq!(
            action.params.get("content").map(String::as_str),
            Some("fn main() {\n    run();\n}")
        );
    }

    #[test]
    fn test_multiple_actions_keep_order() {
        let mut parser = BlockParser::new(vocab());
        parser.feed("<write_to_file><path>A</path><content>x</content></write_to_file>");
        parser.feed("<read_file><path>A</path></read_file>");
        let blocks = parser.finalize();
        let ids: Vec<_> = blocks
            .iter()
            .filter_map(|b| b.as_action().map(|a| a.action_id.clone()))
            .collect();
        assert_eq!(ids, vec!["write_to_file", "read_file"]);
    }

    const TWO_WRITES: &str = "<write_to_file><path>A</path><content>x</content></write_to_file>\n<write_to_file><path>B</path><content>y</content></write_to_file>";

    fn actions(blocks: &[ContentBlock]) -> Vec<(String, Params, bool)> {
        blocks
            .iter()
            .filter_map(|b| b.as_action().map(|a| (a.action_id.clone(), a.params.clone(), b.partial)))
            .collect()
    }

    #[test]
    fn test_two_raw_actions_stay_separate() {
        let mut parser = BlockParser::new(vocab());
        parser.feed(TWO_WRITES);
        let found = actions(&parser.finalize());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].1.get("path").map(String::as_str), Some("A"));
        assert_eq!(found[0].1.get("content").map(String::as_str), Some("x"));
        assert_eq!(found[1].1.get("path").map(String::as_str), Some("B"));
        assert_eq!(found[1].1.get("content").map(String::as_str), Some("y"));
    }

    #[test]
    fn test_completed_raw_action_unchanged_by_later_tokens() {
        let (first, second) = TWO_WRITES.split_at(TWO_WRITES.find('\n').unwrap());
        let mut parser = BlockParser::new(vocab());
        let after_first = actions(&parser.feed(first));
        assert_eq!(after_first.len(), 1);
        assert!(!after_first[0].2);

        let mut last = Vec::new();
        for ch in second.chars() {
            last = actions(&parser.feed(&ch.to_string()));
            assert_eq!(last[0], after_first[0]);
        }
        assert_eq!(last.len(), 2);
        assert!(!last[1].2);
        assert_eq!(last[1].1.get("content").map(String::as_str), Some("y"));
    }

    #[test]
    fn test_raw_content_may_contain_its_own_close_tag() {
        let mut parser = BlockParser::new(vocab());
        parser.feed("<write_to_file><path>doc.md</path><content>\nuse </content> here\n</content></write_to_file>");
        let found = actions(&parser.finalize());
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].1.get("content").map(String::as_str),
            Some("use </content> here")
        );
    }

    #[test]
    fn test_streamed_raw_value_hides_pending_close() {
        let mut parser = BlockParser::new(vocab());
        let found = actions(&parser.feed("<write_to_file><path>A</path><content>x</content></write_t"));
        assert!(found[0].2);
        assert_eq!(found[0].1.get("content").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_unknown_tag_is_prose() {
        let mut parser = BlockParser::new(vocab());
        parser.feed("<thinking>hmm</thinking>");
        let blocks = parser.finalize();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind(), BlockKind::Prose);
    }

    #[test]
    fn test_native_deltas_accumulate() {
        let mut parser = BlockParser::new(vocab());
        parser.feed_native(NativeCallDelta {
            index: 0,
            id: Some("call_a".into()),
            name: Some("read_file".into()),
            arguments: "{\"pa".into(),
        });
        let blocks = parser.feed_native(NativeCallDelta {
            index: 0,
            arguments: "th\": \"src/x.rs\"}".into(),
            ..Default::default()
        });
        assert!(blocks[0].partial);
        let blocks = parser.finalize();
        let action = blocks[0].as_action().unwrap();
        assert!(!blocks[0].partial);
        assert_eq!(action.correlation_id.as_deref(), Some("call_a"));
        assert_eq!(action.params.get("path").map(String::as_str), Some("src/x.rs"));
    }

    #[test]
    fn test_native_call_without_id_gets_one() {
        let mut parser = BlockParser::new(vocab());
        parser.feed_native(NativeCallDelta {
            index: 0,
            id: None,
            name: Some("read_file".into()),
            arguments: "{}".into(),
        });
        let blocks = parser.finalize();
        let id = blocks[0].as_action().unwrap().correlation_id.clone().unwrap();
        assert!(id.starts_with("call_"));
        // 重复读取返回同一个 id
        assert_eq!(
            parser.blocks()[0].as_action().unwrap().correlation_id.as_deref(),
            Some(id.as_str())
        );
    }
}

//! 会话状态
//!
//! SessionState 显式传入编排器的每次调用：历史、截断区间、本轮拒绝标记、token 计数、连续错误数与恢复标记。
//! 每轮结束后持久化，恢复时原样加载。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::conversation::{HistoryEntry, HistoryPart, Role, TokenUsage};

/// 截断后插入有效历史的提示
pub const TRUNCATION_NOTICE: &str = "[NOTE] Some previous conversation history with the user has been removed to maintain optimal context window length. The initial user task has been retained for continuity, while intermediate conversation history has been removed. Keep this in mind as you continue assisting the user.";

/// 恢复标记：进程在一轮中途退出时为 InTurn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResumeMarker {
    #[default]
    Idle,
    InTurn {
        turn: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub task: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    /// 已截断的历史区间（闭区间，索引 0 的任务条目永不删除）
    #[serde(default)]
    pub deleted_range: Option<(usize, usize)>,
    /// 本轮已有 action 被拒绝或失败
    #[serde(default)]
    pub last_turn_rejected: bool,
    #[serde(default)]
    pub usage: TokenUsage,
    /// 最近一次请求的 token 总量（截断判断依据）
    #[serde(default)]
    pub last_request_tokens: u64,
    /// 最近一次执行截断时所在轮次，同一轮不会重复截断
    #[serde(default)]
    pub last_truncation_turn: Option<usize>,
    #[serde(default)]
    pub consecutive_mistakes: u32,
    #[serde(default)]
    pub turn_count: usize,
    #[serde(default)]
    pub resume_marker: ResumeMarker,
}

impl SessionState {
    pub fn new(task: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), task)
    }

    pub fn with_id(id: impl Into<String>, task: impl Into<String>) -> Self {
        let task = task.into();
        let now = Utc::now();
        Self {
            id: id.into(),
            history: vec![HistoryEntry::user(format!("<task>\n{task}\n</task>"))],
            task,
            created_at: now,
            updated_at: now,
            deleted_range: None,
            last_turn_rejected: false,
            usage: TokenUsage::default(),
            last_request_tokens: 0,
            last_truncation_turn: None,
            consecutive_mistakes: 0,
            turn_count: 0,
            resume_marker: ResumeMarker::Idle,
        }
    }

    /// 开始新一轮：清除上一轮的拒绝标记并打上恢复标记
    pub fn begin_turn(&mut self) -> usize {
        self.turn_count += 1;
        self.last_turn_rejected = false;
        self.resume_marker = ResumeMarker::InTurn {
            turn: self.turn_count,
        };
        self.turn_count
    }

    pub fn end_turn(&mut self) {
        self.resume_marker = ResumeMarker::Idle;
    }

    pub fn record_usage(&mut self, usage: &TokenUsage) {
        self.usage.add(usage);
        self.last_request_tokens = usage.total();
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// 末尾的 user 条目，不存在则追加一个
    pub fn trailing_user_entry(&mut self) -> &mut HistoryEntry {
        if self.history.last().map(|e| e.role) != Some(Role::User) {
            self.history.push(HistoryEntry::empty(Role::User));
        }
        let last = self.history.len() - 1;
        &mut self.history[last]
    }

    /// 全部历史（含已截断部分）中已记录结果的 key
    pub fn recorded_result_keys(&self) -> HashSet<String> {
        self.history
            .iter()
            .flat_map(|e| e.result_keys().map(str::to_string))
            .collect()
    }

    /// 有请求但无结果的 key，按出现顺序
    pub fn dangling_requests(&self) -> Vec<(usize, HistoryPart)> {
        let recorded = self.recorded_result_keys();
        let mut out = Vec::new();
        for (i, entry) in self.history.iter().enumerate() {
            for part in &entry.parts {
                if let HistoryPart::ActionRequest { key, .. } = part {
                    if !recorded.contains(key) {
                        out.push((i, part.clone()));
                    }
                }
            }
        }
        out
    }

    /// 送给模型的有效历史：任务条目 + 截断提示 + 截断区间之后的条目
    pub fn effective_history(&self) -> Vec<HistoryEntry> {
        match self.deleted_range {
            None => self.history.clone(),
            Some((_, end)) => {
                let mut out = Vec::with_capacity(self.history.len());
                if let Some(first) = self.history.first() {
                    out.push(first.clone());
                }
                out.push(HistoryEntry::assistant(vec![HistoryPart::Text {
                    text: TRUNCATION_NOTICE.to_string(),
                }]));
                out.extend(self.history.iter().skip(end + 1).cloned());
                out
            }
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Params;

    #[test]
    fn test_new_session_has_task_entry() {
        let s = SessionState::new("fix the bug");
        assert_eq!(s.history.len(), 1);
        assert!(s.history[0].text().contains("fix the bug"));
        assert_eq!(s.resume_marker, ResumeMarker::Idle);
    }

    #[test]
    fn test_dangling_requests() {
        let mut s = SessionState::with_id("s1", "t");
        s.push(HistoryEntry::assistant(vec![
            HistoryPart::ActionRequest {
                key: "a".into(),
                action_id: "read_file".into(),
                params: Params::new(),
                correlation_id: None,
            },
            HistoryPart::ActionRequest {
                key: "b".into(),
                action_id: "read_file".into(),
                params: Params::new(),
                correlation_id: None,
            },
        ]));
        s.push(HistoryEntry {
            role: Role::User,
            parts: vec![HistoryPart::ActionResult {
                key: "a".into(),
                correlation_id: None,
                is_error: false,
                content: "ok".into(),
            }],
        });
        let dangling = s.dangling_requests();
        assert_eq!(dangling.len(), 1);
        assert!(matches!(&dangling[0].1, HistoryPart::ActionRequest { key, .. } if key == "b"));
    }

    #[test]
    fn test_effective_history_skips_deleted() {
        let mut s = SessionState::with_id("s1", "t");
        for i in 0..4 {
            s.push(HistoryEntry::user(format!("m{i}")));
        }
        s.deleted_range = Some((1, 2));
        let eff = s.effective_history();
        assert_eq!(eff.len(), 4);
        assert_eq!(eff[1].text(), TRUNCATION_NOTICE);
        assert_eq!(eff[2].text(), "m2");
    }
}

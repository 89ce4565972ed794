//! 上下文窗口管理
//!
//! 每轮结束后根据最近一次请求的 token 总量判断是否接近上下文上限；超过阈值时把最旧的一段历史标记为已删除。
//! 任务条目（索引 0）与最新条目永不删除，请求/结果对不拆开，删除区间以 user 条目结尾。

use crate::config::ContextSection;
use crate::memory::conversation::Role;
use crate::memory::session::SessionState;
use crate::memory::token_budget::TokenEstimator;

/// 按窗口大小推算可用阈值
pub fn usable_threshold(context_window: u64) -> u64 {
    match context_window {
        64_000 => 64_000 - 27_000,
        128_000 => 128_000 - 30_000,
        200_000 => 200_000 - 40_000,
        w => std::cmp::max(w.saturating_sub(40_000), w * 8 / 10),
    }
}

/// 截断比例
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepFraction {
    Half,
    Quarter,
}

#[derive(Clone, Debug)]
pub struct ContextManager {
    context_window: u64,
    max_allowed: Option<u64>,
}

impl ContextManager {
    pub fn new(context_window: u64, max_allowed: Option<u64>) -> Self {
        Self {
            context_window,
            max_allowed,
        }
    }

    pub fn from_settings(settings: &ContextSection) -> Self {
        Self::new(settings.context_window, settings.max_allowed_tokens)
    }

    pub fn threshold(&self) -> u64 {
        self.max_allowed
            .unwrap_or_else(|| usable_threshold(self.context_window))
    }

    pub fn needs_truncation(&self, state: &SessionState) -> bool {
        state.last_request_tokens >= self.threshold()
            && state.last_truncation_turn != Some(state.turn_count)
    }

    /// 计算新的删除区间（累计区间，起点恒为 1）；无合法区间时返回 None
    pub fn truncation_range(&self, state: &SessionState, keep: KeepFraction) -> Option<(usize, usize)> {
        let history = &state.history;
        let n = history.len();
        let start = state.deleted_range.map(|(_, end)| end + 1).unwrap_or(1);
        // 可删除 [start, n-2]，最后一条保留
        if n < 2 || start > n - 2 {
            return None;
        }
        let removable = n - 1 - start;
        let remove = match keep {
            KeepFraction::Half => removable / 2,
            KeepFraction::Quarter => removable * 3 / 4,
        };
        if remove == 0 {
            return None;
        }
        let mut end = start + remove - 1;
        while end <= n - 2 {
            if self.is_clean_boundary(state, start, end) {
                let first = state.deleted_range.map(|(s, _)| s).unwrap_or(1);
                return Some((first, end));
            }
            end += 1;
        }
        None
    }

    /// 区间以 user 条目结尾，且区间内的请求都在区间内有结果
    fn is_clean_boundary(&self, state: &SessionState, start: usize, end: usize) -> bool {
        let history = &state.history;
        if history[end].role != Role::User {
            return false;
        }
        let inside: std::collections::HashSet<&str> = history[start..=end]
            .iter()
            .flat_map(|e| e.result_keys())
            .collect();
        history[start..=end]
            .iter()
            .flat_map(|e| e.request_keys())
            .all(|k| inside.contains(k))
    }

    /// 超过阈值时执行截断，返回新的删除区间；同一轮重复调用不会再次截断
    pub fn apply(&self, state: &mut SessionState) -> Option<(usize, usize)> {
        if !self.needs_truncation(state) {
            return None;
        }
        let keep = if state.last_request_tokens > self.threshold() * 2 {
            KeepFraction::Quarter
        } else {
            KeepFraction::Half
        };
        let range = self.truncation_range(state, keep)?;
        tracing::info!(
            session = %state.id,
            start = range.0,
            end = range.1,
            tokens = state.last_request_tokens,
            "conversation history truncated"
        );
        state.deleted_range = Some(range);
        state.last_truncation_turn = Some(state.turn_count);
        Some(range)
    }

    /// 传输未报告用量时按有效历史估算
    pub fn estimate_tokens(state: &SessionState) -> u64 {
        state
            .effective_history()
            .iter()
            .map(|e| TokenEstimator::estimate(&e.text()) as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conversation::{HistoryEntry, HistoryPart};
    use crate::tools::Params;

    fn session_with_pairs(pairs: usize) -> SessionState {
        let mut s = SessionState::with_id("s", "task");
        for i in 0..pairs {
            s.push(HistoryEntry::assistant(vec![HistoryPart::ActionRequest {
                key: format!("k{i}"),
                action_id: "read_file".into(),
                params: Params::new(),
                correlation_id: None,
            }]));
            s.push(HistoryEntry {
                role: Role::User,
                parts: vec![HistoryPart::ActionResult {
                    key: format!("k{i}"),
                    correlation_id: None,
                    is_error: false,
                    content: "ok".into(),
                }],
            });
        }
        s
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(usable_threshold(64_000), 37_000);
        assert_eq!(usable_threshold(128_000), 98_000);
        assert_eq!(usable_threshold(200_000), 160_000);
        assert_eq!(usable_threshold(1_000_000), 960_000);
        assert_eq!(usable_threshold(32_000), 25_600);
        assert_eq!(ContextManager::new(128_000, Some(10)).threshold(), 10);
    }

    #[test]
    fn test_range_keeps_pairs_and_task() {
        let s = session_with_pairs(4); // 9 条
        let cm = ContextManager::new(128_000, None);
        let (start, end) = cm.truncation_range(&s, KeepFraction::Half).unwrap();
        assert_eq!(start, 1);
        assert_eq!(s.history[end].role, Role::User);
        assert!(end < s.history.len() - 1);
        // 删除 [1..=4]：两个完整的请求/结果对
        assert_eq!(end, 4);
    }

    #[test]
    fn test_quarter_removes_more() {
        let s = session_with_pairs(8); // 17 条
        let cm = ContextManager::new(128_000, None);
        let half = cm.truncation_range(&s, KeepFraction::Half).unwrap();
        let quarter = cm.truncation_range(&s, KeepFraction::Quarter).unwrap();
        assert!(quarter.1 > half.1);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let cm = ContextManager::new(128_000, Some(100));
        let mut s = session_with_pairs(6);
        s.turn_count = 3;
        s.last_request_tokens = 150;
        let first = cm.apply(&mut s);
        assert!(first.is_some());
        let snapshot = s.clone();
        assert_eq!(cm.apply(&mut s), None);
        assert_eq!(s, snapshot);
        // 低于阈值时也不变
        s.turn_count = 4;
        s.last_request_tokens = 50;
        assert_eq!(cm.apply(&mut s), None);
        assert_eq!(s.deleted_range, snapshot.deleted_range);
    }

    #[test]
    fn test_cumulative_range() {
        let cm = ContextManager::new(128_000, Some(100));
        let mut s = session_with_pairs(8);
        s.last_request_tokens = 150;
        s.turn_count = 1;
        let (a0, a1) = cm.apply(&mut s).unwrap();
        s.turn_count = 2;
        let (b0, b1) = cm.apply(&mut s).unwrap();
        assert_eq!(a0, 1);
        assert_eq!(b0, 1);
        assert!(b1 > a1);
    }

    #[test]
    fn test_too_short_history() {
        let cm = ContextManager::new(128_000, Some(1));
        let mut s = SessionState::with_id("s", "t");
        s.last_request_tokens = 10;
        assert_eq!(cm.apply(&mut s), None);
    }
}

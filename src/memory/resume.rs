//! 会话恢复
//!
//! 进程在一轮中途退出后，历史里可能留下没有结果的 action 请求。恢复时为每个悬空请求补一条
//! 「任务被中断」结果，并追加 [TASK RESUMPTION] 提示，使模型下一轮看到一致的历史。
//! 输出只依赖输入状态：对同一个 SessionState 重放两次得到相同的文本。

use crate::marshal::responses;
use crate::memory::conversation::{HistoryEntry, HistoryPart, Role};
use crate::memory::session::{ResumeMarker, SessionState};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeReport {
    /// 补写了中断结果的请求 key
    pub synthesized: Vec<String>,
    /// 恢复前是否停在一轮中途
    pub was_in_turn: bool,
}

/// 修复悬空请求并追加恢复提示，清除恢复标记
pub fn reconcile(state: &mut SessionState) -> ResumeReport {
    let was_in_turn = matches!(state.resume_marker, ResumeMarker::InTurn { .. });
    let dangling = state.dangling_requests();
    let mut synthesized = Vec::with_capacity(dangling.len());
    // 已插入 user 条目的原始 assistant 下标
    let mut created: Vec<usize> = Vec::new();

    for (idx, part) in dangling {
        let HistoryPart::ActionRequest {
            key,
            correlation_id,
            ..
        } = part
        else {
            continue;
        };
        let result = HistoryPart::ActionResult {
            key: key.clone(),
            correlation_id,
            is_error: true,
            content: responses::INTERRUPTED.to_string(),
        };
        // 结果放入请求之后紧邻的 user 条目，没有则插入一条；同一条目的多个请求共用它
        let shift = created.iter().filter(|&&c| c < idx).count();
        let next = idx + shift + 1;
        match state.history.get_mut(next) {
            Some(entry) if entry.role == Role::User => entry.parts.push(result),
            _ => {
                state.history.insert(
                    next,
                    HistoryEntry {
                        role: Role::User,
                        parts: vec![result],
                    },
                );
                created.push(idx);
            }
        }
        synthesized.push(key);
    }

    state.trailing_user_entry().push_text(responses::TASK_RESUMPTION);
    state.resume_marker = ResumeMarker::Idle;
    state.last_turn_rejected = false;

    if !synthesized.is_empty() {
        tracing::info!(
            session = %state.id,
            count = synthesized.len(),
            "synthesized interrupted results on resume"
        );
    }
    ResumeReport {
        synthesized,
        was_in_turn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Params;

    fn interrupted_session() -> SessionState {
        let mut s = SessionState::with_id("s", "task");
        s.begin_turn();
        s.push(HistoryEntry::assistant(vec![
            HistoryPart::Text {
                text: "writing".into(),
            },
            HistoryPart::ActionRequest {
                key: "t1-b1".into(),
                action_id: "write_to_file".into(),
                params: Params::new(),
                correlation_id: None,
            },
        ]));
        s
    }

    #[test]
    fn test_dangling_request_gets_result() {
        let mut s = interrupted_session();
        let report = reconcile(&mut s);
        assert_eq!(report.synthesized, vec!["t1-b1".to_string()]);
        assert!(report.was_in_turn);
        assert!(s.dangling_requests().is_empty());
        assert_eq!(s.resume_marker, ResumeMarker::Idle);
        let last = s.history.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.text().contains(responses::INTERRUPTED));
        assert!(last.text().ends_with(responses::TASK_RESUMPTION));
    }

    #[test]
    fn test_several_dangling_in_one_entry_share_a_user_entry() {
        let mut s = interrupted_session();
        s.history
            .last_mut()
            .unwrap()
            .parts
            .push(HistoryPart::ActionRequest {
                key: "t1-b2".into(),
                action_id: "read_file".into(),
                params: Params::new(),
                correlation_id: None,
            });
        let report = reconcile(&mut s);
        assert_eq!(report.synthesized, vec!["t1-b1".to_string(), "t1-b2".to_string()]);

        let roles: Vec<Role> = s.history.iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        let tail = &s.history[2];
        let results = tail
            .parts
            .iter()
            .filter(|p| matches!(p, HistoryPart::ActionResult { .. }))
            .count();
        assert_eq!(results, 2);
        assert!(tail.text().ends_with(responses::TASK_RESUMPTION));
    }

    #[test]
    fn test_dangling_in_separate_entries() {
        let mut s = SessionState::with_id("s", "task");
        s.begin_turn();
        for key in ["t1-b1", "t2-b1"] {
            s.push(HistoryEntry::assistant(vec![HistoryPart::ActionRequest {
                key: key.into(),
                action_id: "read_file".into(),
                params: Params::new(),
                correlation_id: None,
            }]));
        }
        reconcile(&mut s);
        let roles: Vec<Role> = s.history.iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User]
        );
        assert!(s.dangling_requests().is_empty());
    }

    #[test]
    fn test_replay_is_deterministic() {
        let base = interrupted_session();
        let mut a = base.clone();
        let mut b = base.clone();
        reconcile(&mut a);
        reconcile(&mut b);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn test_clean_session_only_gets_notice() {
        let mut s = SessionState::with_id("s", "task");
        let report = reconcile(&mut s);
        assert!(report.synthesized.is_empty());
        assert!(!report.was_in_turn);
        assert_eq!(s.history.len(), 1);
        assert!(s.history[0].text().ends_with(responses::TASK_RESUMPTION));
    }
}

//! 错误恢复引擎
//!
//! 根据 HiveError 返回 RecoveryAction，并维护连续错误计数：结构错误、执行失败累计到上限后升级为需要用户介入，
//! 一次成功的执行清零。传输失败与取消直接终止。

use crate::core::{ErrorClass, HiveError, RecoveryAction};
use crate::marshal::responses;
use crate::memory::SessionState;

#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_consecutive_mistakes: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RecoveryEngine {
    pub fn new(max_consecutive_mistakes: u32) -> Self {
        Self {
            max_consecutive_mistakes: max_consecutive_mistakes.max(1),
        }
    }

    pub fn max_consecutive_mistakes(&self) -> u32 {
        self.max_consecutive_mistakes
    }

    /// 根据错误类型与当前连续错误数给出建议动作
    pub fn handle(&self, err: &HiveError, consecutive_mistakes: u32) -> RecoveryAction {
        match err.class() {
            ErrorClass::Structural | ErrorClass::ExecutionFailure => {
                if consecutive_mistakes >= self.max_consecutive_mistakes {
                    RecoveryAction::Escalate(responses::too_many_mistakes(consecutive_mistakes))
                } else {
                    RecoveryAction::RetryWithPrompt(err.to_string())
                }
            }
            ErrorClass::PolicyDenial => RecoveryAction::RetryWithPrompt(err.to_string()),
            ErrorClass::TransportFailure | ErrorClass::Internal => RecoveryAction::Abort,
        }
    }

    /// 记一次错误；达到上限时返回 Escalate
    pub fn note_mistake(&self, state: &mut SessionState) -> Option<RecoveryAction> {
        state.consecutive_mistakes += 1;
        if state.consecutive_mistakes >= self.max_consecutive_mistakes {
            tracing::warn!(
                session = %state.id,
                mistakes = state.consecutive_mistakes,
                "consecutive mistake limit reached"
            );
            Some(RecoveryAction::Escalate(responses::too_many_mistakes(
                state.consecutive_mistakes,
            )))
        } else {
            None
        }
    }

    pub fn note_success(&self, state: &mut SessionState) {
        state.consecutive_mistakes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_retries_then_escalates() {
        let engine = RecoveryEngine::new(3);
        let err = HiveError::Structural("Missing value for required parameter 'path'.".into());
        match engine.handle(&err, 1) {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("path")),
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
        assert!(matches!(engine.handle(&err, 3), RecoveryAction::Escalate(_)));
    }

    #[test]
    fn test_transport_and_cancel_abort() {
        let engine = RecoveryEngine::default();
        assert_eq!(
            engine.handle(&HiveError::Transport("503".into()), 0),
            RecoveryAction::Abort
        );
        assert_eq!(engine.handle(&HiveError::Cancelled, 0), RecoveryAction::Abort);
    }

    #[test]
    fn test_mistake_counter() {
        let engine = RecoveryEngine::new(2);
        let mut state = SessionState::with_id("s", "t");
        assert!(engine.note_mistake(&mut state).is_none());
        assert!(matches!(
            engine.note_mistake(&mut state),
            Some(RecoveryAction::Escalate(_))
        ));
        engine.note_success(&mut state);
        assert_eq!(state.consecutive_mistakes, 0);
    }
}

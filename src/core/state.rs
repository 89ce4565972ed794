//! 状态定义：action 生命周期阶段与转换记录
//!
//! 每个 action 块按 Parsed → Complete → Validating → (RejectedPrior | Denied | AwaitingApproval | AutoApproved)
//! → Executing → (Succeeded | Failed) → ResultRecorded 前进；Denied / RejectedPrior 自身也是终态。

use serde::Serialize;

/// action 块所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPhase {
    Parsed,
    Complete,
    Validating,
    RejectedPrior,
    Denied,
    AwaitingApproval,
    AutoApproved,
    Executing,
    Succeeded,
    Failed,
    ResultRecorded,
}

impl ActionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionPhase::ResultRecorded | ActionPhase::Denied | ActionPhase::RejectedPrior
        )
    }
}

/// 一次阶段转换
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub turn: usize,
    pub block: usize,
    pub action_id: String,
    pub phase: ActionPhase,
}

/// 本轮的转换记录（审计与测试）
#[derive(Clone, Debug, Default, Serialize)]
pub struct TransitionLog {
    entries: Vec<Transition>,
}

impl TransitionLog {
    pub fn push(&mut self, turn: usize, block: usize, action_id: &str, phase: ActionPhase) {
        tracing::debug!(turn, block, action = %action_id, phase = ?phase, "transition");
        self.entries.push(Transition {
            turn,
            block,
            action_id: action_id.to_string(),
            phase,
        });
    }

    pub fn entries(&self) -> &[Transition] {
        &self.entries
    }

    /// 某个块经历的阶段序列
    pub fn phases_of(&self, block: usize) -> Vec<ActionPhase> {
        self.entries
            .iter()
            .filter(|t| t.block == block)
            .map(|t| t.phase)
            .collect()
    }

    pub fn count(&self, phase: ActionPhase) -> usize {
        self.entries.iter().filter(|t| t.phase == phase).count()
    }

    pub fn last_phase(&self, block: usize) -> Option<ActionPhase> {
        self.entries
            .iter()
            .rev()
            .find(|t| t.block == block)
            .map(|t| t.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_queries() {
        let mut log = TransitionLog::default();
        log.push(1, 0, "read_file", ActionPhase::Complete);
        log.push(1, 0, "read_file", ActionPhase::Executing);
        log.push(1, 1, "read_file", ActionPhase::RejectedPrior);
        assert_eq!(
            log.phases_of(0),
            vec![ActionPhase::Complete, ActionPhase::Executing]
        );
        assert_eq!(log.count(ActionPhase::Executing), 1);
        assert!(log.last_phase(1).unwrap().is_terminal());
    }
}

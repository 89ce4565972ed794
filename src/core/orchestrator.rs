//! 编排器：逐块推进的 action 状态机
//!
//! 每次解析器产出新的块快照就调用一次 advance：从游标处按顺序处理，遇到仍在流式中的块只更新预览并停下，
//! 已处理的块不会再次处理。完整的 action 块依次经过 校验 → 审批 → 执行 → 记录结果；
//! 本轮有 action 被拒绝或失败后，后续 action 一律记为 RejectedPrior，不执行。
//! 执行严格按块顺序、一次一个；EagerApproval 模式下审批判定可以先于执行完成。
//! 配置了会话存储时，每个请求写入历史后、每条结果产生后各保存一次检查点，进程中途退出也能恢复。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::approval::{
    ApprovalDecision, ApprovalOutcome, ApprovalPolicy, ApprovalPrompt, ApprovalResponse,
};
use crate::config::{AppConfig, DispatchMode};
use crate::core::presenter::{PresentationFrame, Presenter};
use crate::core::state::{ActionPhase, TransitionLog};
use crate::core::{HiveError, RecoveryAction, RecoveryEngine};
use crate::marshal::{responses, MarshalMode, ResultMarshaler};
use crate::memory::{HistoryEntry, HistoryPart, SessionState, SessionStore};
use crate::parser::{ActionInvocation, BlockPayload, ContentBlock};
use crate::tools::{
    ActionExecutor, ActionHandler, ActionRegistry, ActionRequest, ExecutionContext,
    ExecutionResult,
};

/// 单轮的推进状态
#[derive(Debug)]
pub struct TurnState {
    pub turn: usize,
    /// 本轮 assistant 条目在历史中的位置
    assistant_entry: usize,
    cursor: usize,
    executed: HashSet<usize>,
    recorded: HashSet<usize>,
    parsed_seen: HashSet<usize>,
    eager: HashMap<usize, ApprovalDecision>,
    pub log: TransitionLog,
    pub complete_actions: usize,
    pub results_recorded: usize,
    pub escalation: Option<String>,
}

impl TurnState {
    /// 开始一轮：在历史末尾放一个空的 assistant 条目，本轮的文字与请求依次写入
    pub fn begin(state: &mut SessionState) -> Self {
        let turn = state.begin_turn();
        state.push(HistoryEntry::assistant(Vec::new()));
        Self {
            turn,
            assistant_entry: state.history.len() - 1,
            cursor: 0,
            executed: HashSet::new(),
            recorded: HashSet::new(),
            parsed_seen: HashSet::new(),
            eager: HashMap::new(),
            log: TransitionLog::default(),
            complete_actions: 0,
            results_recorded: 0,
            escalation: None,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }

    fn assistant<'a>(&self, state: &'a mut SessionState) -> &'a mut HistoryEntry {
        &mut state.history[self.assistant_entry]
    }
}

/// 本轮结束后的汇总
#[derive(Debug)]
pub struct TurnSummary {
    pub turn: usize,
    pub complete_actions: usize,
    pub results_recorded: usize,
    pub executed: usize,
    pub rejected: bool,
    pub escalation: Option<String>,
    pub log: TransitionLog,
}

/// 编排器：持有注册表与执行器，审批策略与派发方式为每轮的设置快照
pub struct Orchestrator {
    registry: Arc<ActionRegistry>,
    executor: ActionExecutor,
    recovery: RecoveryEngine,
    policy: ApprovalPolicy,
    dispatch: DispatchMode,
    approval_timeout: Option<Duration>,
    presenter: Presenter,
    store: Option<Arc<dyn SessionStore>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ActionRegistry>, policy: ApprovalPolicy, settings: &AppConfig) -> Self {
        Self {
            registry,
            executor: ActionExecutor::new(settings.tools.action_timeout_secs),
            recovery: RecoveryEngine::new(settings.approval.max_consecutive_mistakes),
            policy,
            dispatch: settings.approval.dispatch,
            approval_timeout: settings.approval.approval_timeout_secs.map(Duration::from_secs),
            presenter: Presenter::default(),
            store: None,
        }
    }

    pub fn with_presenter(mut self, presenter: Presenter) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// 处理到当前快照能处理的位置为止
    ///
    /// 返回 Err(Cancelled) 时本轮剩余的完整 action 已记为 RejectedPrior；其他 Err 是内部不变式被破坏。
    pub async fn advance(
        &self,
        turn: &mut TurnState,
        blocks: &[ContentBlock],
        state: &mut SessionState,
        marshaler: &mut ResultMarshaler,
        ctx: &ExecutionContext,
    ) -> Result<(), HiveError> {
        self.present(turn, blocks);

        if self.dispatch == DispatchMode::EagerApproval {
            self.precompute_decisions(turn, blocks, state);
        }

        while turn.cursor < blocks.len() {
            let index = turn.cursor;
            let block = &blocks[index];
            if block.partial {
                if block.as_action().is_some() && turn.parsed_seen.insert(index) {
                    let id = block.as_action().map(|a| a.action_id.as_str()).unwrap_or("");
                    turn.log.push(turn.turn, index, id, ActionPhase::Parsed);
                }
                break;
            }
            match &block.payload {
                BlockPayload::Text { text } => {
                    turn.assistant(state).push_text(text.clone());
                }
                BlockPayload::Action(invocation) => {
                    if ctx.cancel.is_cancelled() {
                        self.reject_remaining(turn, blocks, index, state, marshaler)?;
                        return Err(HiveError::Cancelled);
                    }
                    self.process_action(turn, index, invocation, blocks, state, marshaler, ctx)
                        .await?;
                    self.checkpoint(state, marshaler).await;
                }
            }
            turn.cursor += 1;
        }
        Ok(())
    }

    /// 结束本轮：结果写入新的 user 条目，清除恢复标记
    pub fn finish(
        &self,
        turn: TurnState,
        state: &mut SessionState,
        marshaler: &mut ResultMarshaler,
    ) -> TurnSummary {
        marshaler.flush_into(state);
        state.end_turn();
        let summary = TurnSummary {
            turn: turn.turn,
            complete_actions: turn.complete_actions,
            results_recorded: turn.results_recorded,
            executed: turn.executed.len(),
            rejected: state.last_turn_rejected,
            escalation: turn.escalation,
            log: turn.log,
        };
        tracing::info!(
            session = %state.id,
            turn = summary.turn,
            actions = summary.complete_actions,
            executed = summary.executed,
            rejected = summary.rejected,
            "turn finished"
        );
        summary
    }

    /// 保存轮中快照：待写结果放进副本末尾的 user 条目，恢复标记保持 InTurn；失败只告警，轮末保存仍会报错
    async fn checkpoint(&self, state: &SessionState, marshaler: &ResultMarshaler) {
        let Some(store) = &self.store else {
            return;
        };
        let mut snapshot = state.clone();
        marshaler.write_pending_into(&mut snapshot);
        snapshot.touch();
        if let Err(e) = store.save(&snapshot).await {
            tracing::warn!(session = %state.id, error = %e, "checkpoint save failed");
        }
    }

    fn present(&self, turn: &TurnState, blocks: &[ContentBlock]) {
        let previews = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.partial)
            .filter_map(|(i, b)| {
                let inv = b.as_action()?;
                let handler = self.registry.get(&inv.action_id)?;
                handler.preview_partial(inv).map(|p| (i, p))
            })
            .collect();
        self.presenter.present(PresentationFrame {
            turn: turn.turn,
            blocks: blocks.to_vec(),
            previews,
        });
    }

    /// 审批判定先行：对游标之后所有完整且通过校验的 action 计算判定，执行仍按块顺序
    fn precompute_decisions(&self, turn: &mut TurnState, blocks: &[ContentBlock], state: &SessionState) {
        if state.last_turn_rejected {
            return;
        }
        for (index, block) in blocks.iter().enumerate().skip(turn.cursor) {
            if block.partial || turn.eager.contains_key(&index) {
                continue;
            }
            let Some(inv) = block.as_action() else {
                continue;
            };
            let request = self.request_for(turn, index, inv);
            if let Ok(handler) = self.registry.resolve(&request) {
                let decision = self.policy.decide_for(handler.as_ref(), &request);
                tracing::debug!(turn = turn.turn, block = index, reason = %decision.reason, "approval precomputed");
                turn.eager.insert(index, decision);
            }
        }
    }

    fn request_for(&self, turn: &TurnState, index: usize, inv: &ActionInvocation) -> ActionRequest {
        ActionRequest {
            action_id: inv.action_id.clone(),
            params: inv.params.clone(),
            correlation_id: inv.correlation_id.clone(),
            turn_index: turn.turn,
            block_index: index,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_action(
        &self,
        turn: &mut TurnState,
        index: usize,
        invocation: &ActionInvocation,
        blocks: &[ContentBlock],
        state: &mut SessionState,
        marshaler: &mut ResultMarshaler,
        ctx: &ExecutionContext,
    ) -> Result<(), HiveError> {
        if turn.recorded.contains(&index) {
            return Ok(());
        }
        let request = self.request_for(turn, index, invocation);
        let id = request.action_id.clone();
        turn.complete_actions += 1;
        turn.log.push(turn.turn, index, &id, ActionPhase::Complete);
        turn.assistant(state).parts.push(HistoryPart::ActionRequest {
            key: request.result_key(),
            action_id: id.clone(),
            params: request.params.clone(),
            correlation_id: request.correlation_id.clone(),
        });
        self.checkpoint(state, marshaler).await;

        if state.last_turn_rejected {
            let describe = self.describe(&request);
            turn.log.push(turn.turn, index, &id, ActionPhase::RejectedPrior);
            let skipped = ExecutionResult::error(responses::skipped(&describe));
            return self.record(turn, &request, &describe, &skipped, marshaler);
        }

        turn.log.push(turn.turn, index, &id, ActionPhase::Validating);

        let handler = match self.validate(&request, marshaler) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(turn = turn.turn, block = index, action = %id, error = %e, "validation failed");
                self.note_mistake(turn, state);
                let msg = match e {
                    HiveError::Structural(m) => m,
                    other => other.to_string(),
                };
                let result = ExecutionResult::error(msg);
                let describe = self.describe(&request);
                self.record(turn, &request, &describe, &result, marshaler)?;
                turn.log.push(turn.turn, index, &id, ActionPhase::ResultRecorded);
                return Ok(());
            }
        };
        let describe = handler.describe(&request);

        let decision = turn
            .eager
            .remove(&index)
            .unwrap_or_else(|| self.policy.decide_for(handler.as_ref(), &request));

        if decision.denied {
            turn.log.push(turn.turn, index, &id, ActionPhase::Denied);
            state.last_turn_rejected = true;
            let result = ExecutionResult::error(decision.reason.clone());
            return self.record(turn, &request, &describe, &result, marshaler);
        }

        let mut feedback = None;
        if decision.requires_confirmation {
            turn.log.push(turn.turn, index, &id, ActionPhase::AwaitingApproval);
            let prompt = ApprovalPrompt {
                action_id: id.clone(),
                description: describe.clone(),
                category: handler.category(),
                locality: decision.locality,
            };
            match ctx.approvals.ask(prompt, self.approval_timeout).await {
                ApprovalOutcome::Responded(ApprovalResponse::Approve) => {}
                ApprovalOutcome::Responded(ApprovalResponse::ApproveWithFeedback(text)) => {
                    feedback = Some(text);
                }
                ApprovalOutcome::Responded(ApprovalResponse::Deny) => {
                    return self.deny(turn, &request, &describe, responses::DENIED, state, marshaler);
                }
                ApprovalOutcome::TimedOut => {
                    return self.deny(
                        turn,
                        &request,
                        &describe,
                        responses::APPROVAL_TIMED_OUT,
                        state,
                        marshaler,
                    );
                }
                ApprovalOutcome::Cancelled => {
                    self.deny(turn, &request, &describe, responses::DENIED, state, marshaler)?;
                    self.reject_remaining(turn, blocks, index + 1, state, marshaler)?;
                    return Err(HiveError::Cancelled);
                }
            }
        } else {
            turn.log.push(turn.turn, index, &id, ActionPhase::AutoApproved);
        }

        if !turn.executed.insert(index) {
            return Err(HiveError::DuplicateExecution(index));
        }
        turn.log.push(turn.turn, index, &id, ActionPhase::Executing);
        let outcome = self.executor.execute(handler.as_ref(), ctx, &request).await;

        let mut result = match outcome {
            Ok(res) if !res.is_error() => {
                turn.log.push(turn.turn, index, &id, ActionPhase::Succeeded);
                self.recovery.note_success(state);
                res
            }
            Ok(res) => {
                turn.log.push(turn.turn, index, &id, ActionPhase::Failed);
                state.last_turn_rejected = true;
                self.note_mistake(turn, state);
                res
            }
            Err(HiveError::Cancelled) => {
                turn.log.push(turn.turn, index, &id, ActionPhase::Failed);
                state.last_turn_rejected = true;
                let result = ExecutionResult::error(responses::INTERRUPTED);
                self.record(turn, &request, &describe, &result, marshaler)?;
                turn.log.push(turn.turn, index, &id, ActionPhase::ResultRecorded);
                self.reject_remaining(turn, blocks, index + 1, state, marshaler)?;
                return Err(HiveError::Cancelled);
            }
            Err(e) => {
                tracing::warn!(turn = turn.turn, block = index, action = %id, error = %e, "action failed");
                turn.log.push(turn.turn, index, &id, ActionPhase::Failed);
                state.last_turn_rejected = true;
                self.note_mistake(turn, state);
                ExecutionResult::error(responses::execution_error(&describe, &e.to_string()))
            }
        };
        if let Some(text) = feedback {
            result = result.with_appended_text(responses::feedback(&text));
        }
        self.record(turn, &request, &describe, &result, marshaler)?;
        turn.log.push(turn.turn, index, &id, ActionPhase::ResultRecorded);
        Ok(())
    }

    /// 结构校验；结构化传输下缺少 correlation id 的请求也是结构错误
    fn validate(
        &self,
        request: &ActionRequest,
        marshaler: &ResultMarshaler,
    ) -> Result<Arc<dyn ActionHandler>, HiveError> {
        let handler = self.registry.resolve(request)?;
        if marshaler.mode() == MarshalMode::Structured && request.correlation_id.is_none() {
            return Err(HiveError::Structural(format!(
                "Action '{}' must be issued as a structured tool call.",
                request.action_id
            )));
        }
        Ok(handler)
    }

    fn describe(&self, request: &ActionRequest) -> String {
        match self.registry.get(&request.action_id) {
            Some(h) => h.describe(request),
            None => request.action_id.clone(),
        }
    }

    fn note_mistake(&self, turn: &mut TurnState, state: &mut SessionState) {
        if let Some(RecoveryAction::Escalate(msg)) = self.recovery.note_mistake(state) {
            turn.escalation = Some(msg);
        }
    }

    fn deny(
        &self,
        turn: &mut TurnState,
        request: &ActionRequest,
        describe: &str,
        text: &str,
        state: &mut SessionState,
        marshaler: &mut ResultMarshaler,
    ) -> Result<(), HiveError> {
        turn.log
            .push(turn.turn, request.block_index, &request.action_id, ActionPhase::Denied);
        state.last_turn_rejected = true;
        self.record(turn, request, describe, &ExecutionResult::error(text), marshaler)
    }

    /// 取消时把 from 起的全部完整 action 记为 RejectedPrior
    fn reject_remaining(
        &self,
        turn: &mut TurnState,
        blocks: &[ContentBlock],
        from: usize,
        state: &mut SessionState,
        marshaler: &mut ResultMarshaler,
    ) -> Result<(), HiveError> {
        state.last_turn_rejected = true;
        for (index, block) in blocks.iter().enumerate().skip(from) {
            if block.partial || turn.recorded.contains(&index) {
                continue;
            }
            match &block.payload {
                BlockPayload::Text { text } => turn.assistant(state).push_text(text.clone()),
                BlockPayload::Action(inv) => {
                    let request = self.request_for(turn, index, inv);
                    turn.complete_actions += 1;
                    turn.assistant(state).parts.push(HistoryPart::ActionRequest {
                        key: request.result_key(),
                        action_id: request.action_id.clone(),
                        params: request.params.clone(),
                        correlation_id: request.correlation_id.clone(),
                    });
                    turn.log
                        .push(turn.turn, index, &request.action_id, ActionPhase::RejectedPrior);
                    let describe = self.describe(&request);
                    let skipped = ExecutionResult::error(responses::skipped(&describe));
                    self.record(turn, &request, &describe, &skipped, marshaler)?;
                }
            }
        }
        turn.cursor = blocks.len();
        Ok(())
    }

    fn record(
        &self,
        turn: &mut TurnState,
        request: &ActionRequest,
        describe: &str,
        result: &ExecutionResult,
        marshaler: &mut ResultMarshaler,
    ) -> Result<(), HiveError> {
        if marshaler.mode() == MarshalMode::Structured && request.correlation_id.is_none() {
            marshaler.record_inline(request, describe, result)?;
        } else {
            marshaler.record(request, describe, result)?;
        }
        turn.recorded.insert(request.block_index);
        turn.results_recorded += 1;
        Ok(())
    }
}

//! 会话驱动
//!
//! Agent 把各部分串成一个任务循环：传输事件流 → 块解析 → 编排器逐块推进 → 结果写回历史 → 上下文截断 → 下一轮请求。
//! 每轮开始前读取一次设置快照，结束后保存会话。一轮没有任何完整 action 时任务结束。

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;

use crate::approval::{ApprovalCapability, ApprovalPolicy, ApprovalUi};
use crate::config::SettingsHandle;
use crate::core::orchestrator::{Orchestrator, TurnState, TurnSummary};
use crate::core::{HiveError, Presenter, SessionSupervisor};
use crate::llm::{ModelRequest, ModelTransport, TransportEvent};
use crate::marshal::{MarshalMode, ResultMarshaler};
use crate::memory::{
    reconcile, ContextManager, ResumeReport, SessionState, SessionStore, TokenUsage,
};
use crate::tools::{ActionRegistry, ExecutionContext};

/// 任务结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// 模型给出不含 action 的回复
    Completed,
    /// 连续错误达到上限，需要用户介入
    Escalated(String),
    TurnLimit,
    Cancelled,
}

#[derive(Debug)]
pub struct TaskReport {
    pub session_id: String,
    pub outcome: TaskOutcome,
    pub turns: Vec<TurnSummary>,
    /// 最后一轮 assistant 的文字
    pub final_text: String,
    pub resumed: Option<ResumeReport>,
}

/// 按注册表生成系统提示
pub fn default_system_prompt(registry: &ActionRegistry) -> String {
    format!(
        "You are Hive, a coding agent working inside the user's workspace.\n\
         Invoke the actions below by writing XML-style tags. \
         Actions run in order; if one is denied or fails, the rest of the turn is skipped.\n\
         When the task is complete, reply without any action.\n\n\
         # Available actions\n\n{}",
        registry.describe_all()
    )
}

pub struct Agent {
    transport: Arc<dyn ModelTransport>,
    registry: Arc<ActionRegistry>,
    store: Arc<dyn SessionStore>,
    settings: SettingsHandle,
    approvals: Arc<dyn ApprovalUi>,
    presenter: Presenter,
    supervisor: SessionSupervisor,
    cwd: PathBuf,
    system_prompt: String,
}

impl Agent {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        registry: Arc<ActionRegistry>,
        store: Arc<dyn SessionStore>,
        settings: SettingsHandle,
        approvals: Arc<dyn ApprovalUi>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        let system_prompt = default_system_prompt(&registry);
        Self {
            transport,
            registry,
            store,
            settings,
            approvals,
            presenter: Presenter::default(),
            supervisor: SessionSupervisor::new(),
            cwd: cwd.into(),
            system_prompt,
        }
    }

    pub fn with_presenter(mut self, presenter: Presenter) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// 可在其他任务中持有的取消句柄（与 Agent 共享 token 与进程表）
    pub fn supervisor(&self) -> SessionSupervisor {
        self.supervisor.clone()
    }

    /// 取消当前任务：挂起的审批视为拒绝，登记进程被终止
    pub async fn cancel(&self) -> usize {
        self.supervisor.cancel().await
    }

    /// 新任务
    pub async fn run_task(&mut self, task: impl Into<String>) -> Result<TaskReport, HiveError> {
        self.supervisor.reset();
        let mut state = SessionState::new(task);
        tracing::info!(session = %state.id, "task started");
        self.store.save(&state).await?;
        self.drive(&mut state, None).await
    }

    /// 恢复已保存的会话：补齐中断的结果后继续
    pub async fn resume(&mut self, session_id: &str) -> Result<TaskReport, HiveError> {
        self.supervisor.reset();
        let mut state = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| HiveError::Store(format!("session '{session_id}' not found")))?;
        let report = reconcile(&mut state);
        tracing::info!(
            session = %state.id,
            synthesized = report.synthesized.len(),
            was_in_turn = report.was_in_turn,
            "session resumed"
        );
        self.store.save(&state).await?;
        self.drive(&mut state, Some(report)).await
    }

    /// 显式关闭会话：终止遗留进程并删除存档
    pub async fn close(&self, session_id: &str) -> Result<(), HiveError> {
        let killed = self.supervisor.cancel().await;
        self.store.delete(session_id).await?;
        tracing::info!(session = %session_id, killed, "session closed");
        Ok(())
    }

    async fn drive(
        &self,
        state: &mut SessionState,
        resumed: Option<ResumeReport>,
    ) -> Result<TaskReport, HiveError> {
        let max_turns = self.settings.snapshot().await.app.max_turns;
        let mut turns = Vec::new();
        let mut outcome = TaskOutcome::TurnLimit;

        for _ in 0..max_turns {
            if self.supervisor.is_cancelled() {
                outcome = TaskOutcome::Cancelled;
                break;
            }
            let summary = self.run_turn(state).await?;
            let cancelled = self.supervisor.is_cancelled();
            let escalation = summary.escalation.clone();
            let done = summary.complete_actions == 0;
            turns.push(summary);
            if cancelled {
                outcome = TaskOutcome::Cancelled;
                break;
            }
            if let Some(msg) = escalation {
                outcome = TaskOutcome::Escalated(msg);
                break;
            }
            if done {
                outcome = TaskOutcome::Completed;
                break;
            }
        }

        let final_text = state
            .history
            .iter()
            .rev()
            .find(|e| e.role == crate::memory::Role::Assistant)
            .map(|e| e.text())
            .unwrap_or_default();
        tracing::info!(session = %state.id, turns = turns.len(), outcome = ?outcome, "task finished");
        Ok(TaskReport {
            session_id: state.id.clone(),
            outcome,
            turns,
            final_text,
            resumed,
        })
    }

    /// 跑一轮：请求模型、边流式边推进编排器、结束后写回结果并保存
    pub async fn run_turn(&self, state: &mut SessionState) -> Result<TurnSummary, HiveError> {
        let settings = self.settings.snapshot().await;

        let context = ContextManager::from_settings(&settings.context);
        context.apply(state);

        let policy = ApprovalPolicy::new(settings.approval.clone(), settings.app.roots(), &self.cwd);
        let orchestrator = Orchestrator::new(self.registry.clone(), policy, &settings)
            .with_presenter(self.presenter.clone())
            .with_store(self.store.clone());
        let mode = if self.transport.supports_correlation() {
            MarshalMode::Structured
        } else {
            MarshalMode::Inline
        };
        let mut marshaler = ResultMarshaler::for_session(mode, state);

        let request = ModelRequest {
            system_prompt: self.system_prompt.clone(),
            history: state.effective_history(),
        };
        let mut events = self.transport.stream(&request).await?;

        let mut turn = TurnState::begin(state);
        // 轮首即落盘 InTurn 标记，之后由编排器逐个 action 保存检查点
        state.touch();
        self.store.save(state).await?;
        let cancel = self.supervisor.child_token();
        let ctx = ExecutionContext {
            session_id: state.id.clone(),
            cwd: self.cwd.clone(),
            cancel: cancel.clone(),
            approvals: ApprovalCapability::new(self.approvals.clone(), cancel.clone()),
            processes: self.supervisor.processes(),
        };
        let mut parser = crate::parser::BlockParser::new(self.registry.vocabulary());
        let mut usage_reported = false;
        let mut transport_error = None;
        let mut cancelled = false;

        loop {
            let event = tokio::select! {
                ev = events.next() => ev,
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            };
            let blocks = match event {
                None | Some(Ok(TransportEvent::Done)) => break,
                Some(Ok(TransportEvent::Text(text))) => parser.feed(&text),
                Some(Ok(TransportEvent::ToolCall(delta))) => parser.feed_native(delta),
                Some(Ok(TransportEvent::Usage(usage))) => {
                    usage_reported = true;
                    state.record_usage(&usage);
                    continue;
                }
                Some(Err(e)) => {
                    transport_error = Some(e);
                    break;
                }
            };
            match orchestrator
                .advance(&mut turn, &blocks, state, &mut marshaler, &ctx)
                .await
            {
                Ok(()) => {}
                Err(HiveError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        // 流结束或被取消：收尾剩余的块；已取消时剩余 action 记为 RejectedPrior
        let blocks = parser.finalize();
        match orchestrator
            .advance(&mut turn, &blocks, state, &mut marshaler, &ctx)
            .await
        {
            Ok(()) | Err(HiveError::Cancelled) => {}
            Err(e) => return Err(e),
        }

        if !usage_reported {
            let estimated = ContextManager::estimate_tokens(state);
            state.record_usage(&TokenUsage {
                input_tokens: estimated,
                ..Default::default()
            });
        }

        let summary = orchestrator.finish(turn, state, &mut marshaler);
        state.touch();
        self.store.save(state).await?;

        if cancelled {
            tracing::info!(session = %state.id, turn = summary.turn, "turn cancelled");
        }
        if let Some(e) = transport_error {
            tracing::warn!(session = %state.id, error = %e, "transport failed mid-turn");
            return Err(e);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalResponse, StaticApprovalUi};
    use crate::config::AppConfig;
    use crate::llm::{ScriptedTransport, ScriptedTurn};
    use crate::memory::MemorySessionStore;
    use crate::tools::default_registry;
    use tempfile::TempDir;

    fn agent(dir: &TempDir, transport: ScriptedTransport, store: Arc<MemorySessionStore>) -> Agent {
        let mut cfg = AppConfig::default();
        cfg.app.workspace_roots = vec![dir.path().to_path_buf()];
        cfg.approval.actions.edit_files = true;
        let registry = Arc::new(default_registry(&cfg.tools, None).unwrap());
        Agent::new(
            Arc::new(transport),
            registry,
            store,
            SettingsHandle::new(cfg),
            Arc::new(StaticApprovalUi::new(ApprovalResponse::Deny)),
            dir.path(),
        )
    }

    #[tokio::test]
    async fn test_task_runs_until_plain_reply() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemorySessionStore::new());
        let transport = ScriptedTransport::from_texts(
            [
                "Creating it.\n<write_to_file><path>hello.txt</path><content>\nhi\n</content></write_to_file>",
                "Done, hello.txt now says hi.",
            ],
            7,
        );
        let mut agent = agent(&dir, transport.clone(), store.clone());
        let report = agent.run_task("create hello.txt").await.unwrap();

        assert_eq!(report.outcome, TaskOutcome::Completed);
        assert_eq!(report.turns.len(), 2);
        assert_eq!(report.turns[0].results_recorded, 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi");
        assert!(report.final_text.contains("now says hi"));

        let requests = transport.requests().await;
        assert_eq!(requests.len(), 2);
        let second = requests[1].history.last().unwrap().text();
        assert!(second.contains("Result:"));

        let saved = store.load(&report.session_id).await.unwrap().unwrap();
        assert_eq!(saved.turn_count, 2);
        assert!(saved.dangling_requests().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemorySessionStore::new());
        let transport = ScriptedTransport::new([ScriptedTurn::Fail("503".into())]);
        let mut agent = agent(&dir, transport, store);
        let err = agent.run_task("anything").await.unwrap_err();
        assert!(matches!(err, HiveError::Transport(m) if m == "503"));
    }

    #[tokio::test]
    async fn test_resume_unknown_session() {
        let dir = TempDir::new().unwrap();
        let mut agent = agent(&dir, ScriptedTransport::default(), Arc::new(MemorySessionStore::new()));
        assert!(matches!(agent.resume("missing").await, Err(HiveError::Store(_))));
    }
}

//! Action 执行器
//!
//! 对每次 handler.execute 施加全局超时（自行管理时限的 handler 除外），并与会话取消信号竞争；
//! 失败映射为 HiveError（Execution / ActionTimeout / Cancelled），每次调用输出一行 JSON 审计日志。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::HiveError;
use crate::tools::{ActionHandler, ActionRequest, ExecutionContext, ExecutionResult};

/// Action 执行器
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行一次请求；handler 返回 Err 转为 Execution，超时转为 ActionTimeout，取消转为 Cancelled
    pub async fn execute(
        &self,
        handler: &dyn ActionHandler,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, HiveError> {
        let start = Instant::now();
        let run = async {
            if handler.manages_own_deadline() {
                return handler.execute(ctx, request).await.map_err(HiveError::Execution);
            }
            match timeout(self.timeout, handler.execute(ctx, request)).await {
                Ok(r) => r.map_err(HiveError::Execution),
                Err(_) => Err(HiveError::ActionTimeout(request.action_id.clone())),
            }
        };
        let result = tokio::select! {
            r = run => r,
            _ = ctx.cancel.cancelled() => Err(HiveError::Cancelled),
        };

        let outcome = match &result {
            Ok(r) if r.is_error() => "error",
            Ok(r) if r.is_running() => "running",
            Ok(_) => "ok",
            Err(HiveError::ActionTimeout(_)) => "timeout",
            Err(HiveError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "session": ctx.session_id,
            "action": request.action_id,
            "turn": request.turn_index,
            "block": request.block_index,
            "ok": outcome == "ok" || outcome == "running",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(request),
        });
        tracing::info!(audit = %audit.to_string(), "action");
        result
    }
}

fn args_preview(request: &ActionRequest) -> String {
    let s = serde_json::to_string(&request.params).unwrap_or_default();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalCapability, ApprovalResponse, StaticApprovalUi};
    use crate::tools::{ActionCategory, ParamSpec, Params, ProcessRegistry};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Sleeper(u64);

    #[async_trait]
    impl ActionHandler for Sleeper {
        fn id(&self) -> &str {
            "sleeper"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn params(&self) -> &[ParamSpec] {
            &[]
        }
        fn category(&self) -> ActionCategory {
            ActionCategory::Read
        }
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _request: &ActionRequest,
        ) -> Result<ExecutionResult, String> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(ExecutionResult::success("done"))
        }
    }

    /// 自行管理时限的 handler（如等待人工确认的命令观察）
    struct Patient(u64);

    #[async_trait]
    impl ActionHandler for Patient {
        fn id(&self) -> &str {
            "patient"
        }
        fn description(&self) -> &str {
            "waits on a person"
        }
        fn params(&self) -> &[ParamSpec] {
            &[]
        }
        fn category(&self) -> ActionCategory {
            ActionCategory::ExecuteShell
        }
        fn manages_own_deadline(&self) -> bool {
            true
        }
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _request: &ActionRequest,
        ) -> Result<ExecutionResult, String> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(ExecutionResult::success("still here"))
        }
    }

    fn ctx() -> ExecutionContext {
        let cancel = CancellationToken::new();
        ExecutionContext {
            session_id: "s".into(),
            cwd: std::env::temp_dir(),
            cancel: cancel.clone(),
            approvals: ApprovalCapability::new(
                Arc::new(StaticApprovalUi::new(ApprovalResponse::Approve)),
                cancel,
            ),
            processes: ProcessRegistry::new(),
        }
    }

    fn req() -> ActionRequest {
        ActionRequest {
            action_id: "sleeper".into(),
            params: Params::new(),
            correlation_id: None,
            turn_index: 0,
            block_index: 0,
        }
    }

    #[tokio::test]
    async fn test_execute_ok_and_timeout() {
        let exec = ActionExecutor::new(1);
        let ok = exec.execute(&Sleeper(10), &ctx(), &req()).await.unwrap();
        assert_eq!(ok.text(), "done");
        let err = exec.execute(&Sleeper(3000), &ctx(), &req()).await;
        assert!(matches!(err, Err(HiveError::ActionTimeout(_))));
    }

    #[tokio::test]
    async fn test_execute_cancelled() {
        let exec = ActionExecutor::new(30);
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = exec.execute(&Sleeper(5000), &ctx, &req()).await;
        assert!(matches!(err, Err(HiveError::Cancelled)));
    }

    #[tokio::test]
    async fn test_self_timed_handler_outlives_global_timeout() {
        let exec = ActionExecutor::new(1);
        let out = exec.execute(&Patient(1_500), &ctx(), &req()).await.unwrap();
        assert_eq!(out.text(), "still here");
        let err = exec.execute(&Sleeper(1_500), &ctx(), &req()).await;
        assert!(matches!(err, Err(HiveError::ActionTimeout(_))));
    }

    #[tokio::test]
    async fn test_self_timed_handler_still_cancellable() {
        let exec = ActionExecutor::new(1);
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = exec.execute(&Patient(60_000), &ctx, &req()).await;
        assert!(matches!(err, Err(HiveError::Cancelled)));
    }
}

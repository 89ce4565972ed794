//! 会话监管：取消与外部进程
//!
//! 持有会话级 CancellationToken 与 ProcessRegistry。用户 Ctrl+C 时取消：挂起的审批变为拒绝，
//! 未结束的进程被强制终止。每轮使用子 token，单轮取消不影响会话本身。

use tokio_util::sync::CancellationToken;

use crate::tools::ProcessRegistry;

#[derive(Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    processes: ProcessRegistry,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn processes(&self) -> ProcessRegistry {
        self.processes.clone()
    }

    /// 子 token（用于单轮）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 触发取消并终止全部登记进程
    pub async fn cancel(&self) -> usize {
        self.cancel_token.cancel();
        self.processes.kill_all().await
    }

    /// 取消后开始新任务前换一个新的 token
    pub fn reset(&mut self) {
        if self.cancel_token.is_cancelled() {
            self.cancel_token = CancellationToken::new();
        }
    }
}

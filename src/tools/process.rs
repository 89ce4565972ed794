//! 长时间运行进程登记
//!
//! execute_command 超过观察时间仍未结束时，子进程移交给会话的 ProcessRegistry；
//! 会话取消或关闭时 kill_all 强制终止所有未结束进程。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    children: Mutex<HashMap<u64, (String, Child)>>,
}

/// 会话内的进程表（可廉价 clone，共享同一张表）
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Inner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记子进程，返回进程号（会话内自增，从 1 开始）
    pub async fn register(&self, command: impl Into<String>, child: Child) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .children
            .lock()
            .await
            .insert(id, (command.into(), child));
        tracing::info!(process_id = id, "process handed to registry");
        id
    }

    /// 仍在运行的进程（顺带清理已退出的）
    pub async fn running(&self) -> Vec<(u64, String)> {
        let mut children = self.inner.children.lock().await;
        children.retain(|_, (_, child)| matches!(child.try_wait(), Ok(None)));
        let mut out: Vec<_> = children
            .iter()
            .map(|(id, (cmd, _))| (*id, cmd.clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub async fn kill(&self, id: u64) -> bool {
        let entry = self.inner.children.lock().await.remove(&id);
        match entry {
            Some((_, mut child)) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(process_id = id, error = %e, "kill failed");
                }
                true
            }
            None => false,
        }
    }

    /// 终止全部登记进程，返回终止数量
    pub async fn kill_all(&self) -> usize {
        let drained: Vec<_> = self.inner.children.lock().await.drain().collect();
        let count = drained.len();
        for (id, (_, mut child)) in drained {
            if let Err(e) = child.kill().await {
                tracing::warn!(process_id = id, error = %e, "kill failed");
            }
        }
        if count > 0 {
            tracing::info!(count, "outstanding processes terminated");
        }
        count
    }
}

//! 审批 UI 接口与审批能力
//!
//! ApprovalUi 接收 (描述, 类别, 局部性)，返回 批准 / 拒绝 / 批准并附反馈。
//! ChannelApprovalUi 把请求作为 ApprovalTicket 发到 mpsc 通道，由外部通过 oneshot 回复；回复端被丢弃视为拒绝。
//! ApprovalCapability 是交给 handler 的窄接口：只能请求审批，且随会话取消而返回。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::approval::Locality;
use crate::tools::ActionCategory;

/// 审批请求内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPrompt {
    pub action_id: String,
    pub description: String,
    pub category: ActionCategory,
    pub locality: Option<Locality>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalResponse {
    Approve,
    Deny,
    ApproveWithFeedback(String),
}

impl ApprovalResponse {
    pub fn is_approved(&self) -> bool {
        !matches!(self, ApprovalResponse::Deny)
    }

    pub fn feedback(&self) -> Option<&str> {
        match self {
            ApprovalResponse::ApproveWithFeedback(f) => Some(f),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ApprovalUi: Send + Sync {
    async fn request_approval(&self, prompt: ApprovalPrompt) -> ApprovalResponse;
}

/// 固定回复（测试与无交互场景）
pub struct StaticApprovalUi {
    response: ApprovalResponse,
}

impl StaticApprovalUi {
    pub fn new(response: ApprovalResponse) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ApprovalUi for StaticApprovalUi {
    async fn request_approval(&self, _prompt: ApprovalPrompt) -> ApprovalResponse {
        self.response.clone()
    }
}

/// 待处理的审批请求
#[derive(Debug)]
pub struct ApprovalTicket {
    pub id: u64,
    pub prompt: ApprovalPrompt,
    responder: oneshot::Sender<ApprovalResponse>,
}

impl ApprovalTicket {
    pub fn respond(self, response: ApprovalResponse) {
        if self.responder.send(response).is_err() {
            tracing::debug!(ticket = self.id, "approval no longer awaited");
        }
    }
}

/// 基于通道的审批 UI
pub struct ChannelApprovalUi {
    tx: mpsc::Sender<ApprovalTicket>,
    next_id: AtomicU64,
}

impl ChannelApprovalUi {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ApprovalTicket>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                next_id: AtomicU64::new(1),
            },
            rx,
        )
    }
}

#[async_trait]
impl ApprovalUi for ChannelApprovalUi {
    async fn request_approval(&self, prompt: ApprovalPrompt) -> ApprovalResponse {
        let (responder, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let ticket = ApprovalTicket {
            id,
            prompt,
            responder,
        };
        if self.tx.send(ticket).await.is_err() {
            tracing::warn!(ticket = id, "approval channel closed, denying");
            return ApprovalResponse::Deny;
        }
        rx.await.unwrap_or(ApprovalResponse::Deny)
    }
}

/// 等待审批的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Responded(ApprovalResponse),
    TimedOut,
    Cancelled,
}

/// 审批能力：UI + 会话取消信号
#[derive(Clone)]
pub struct ApprovalCapability {
    ui: Arc<dyn ApprovalUi>,
    cancel: CancellationToken,
}

impl ApprovalCapability {
    pub fn new(ui: Arc<dyn ApprovalUi>, cancel: CancellationToken) -> Self {
        Self { ui, cancel }
    }

    /// 挂起直到回复、超时（若设置）或会话取消
    pub async fn ask(&self, prompt: ApprovalPrompt, timeout: Option<Duration>) -> ApprovalOutcome {
        let wait = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            r = self.ui.request_approval(prompt) => ApprovalOutcome::Responded(r),
            _ = wait => ApprovalOutcome::TimedOut,
            _ = self.cancel.cancelled() => ApprovalOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> ApprovalPrompt {
        ApprovalPrompt {
            action_id: "write_to_file".into(),
            description: "write_to_file for 'a.txt'".into(),
            category: ActionCategory::Write,
            locality: Some(Locality::Local),
        }
    }

    #[tokio::test]
    async fn test_channel_ui_roundtrip() {
        let (ui, mut rx) = ChannelApprovalUi::new(4);
        let cap = ApprovalCapability::new(Arc::new(ui), CancellationToken::new());
        let answer = tokio::spawn(async move {
            let ticket = rx.recv().await.unwrap();
            assert_eq!(ticket.prompt.action_id, "write_to_file");
            ticket.respond(ApprovalResponse::ApproveWithFeedback("use tabs".into()));
        });
        let out = cap.ask(prompt(), None).await;
        answer.await.unwrap();
        assert_eq!(
            out,
            ApprovalOutcome::Responded(ApprovalResponse::ApproveWithFeedback("use tabs".into()))
        );
    }

    #[tokio::test]
    async fn test_dropped_ticket_denies() {
        let (ui, mut rx) = ChannelApprovalUi::new(1);
        tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        let r = ui.request_approval(prompt()).await;
        assert_eq!(r, ApprovalResponse::Deny);
    }

    #[tokio::test]
    async fn test_cancel_and_timeout() {
        let (ui, _rx) = ChannelApprovalUi::new(4);
        let cancel = CancellationToken::new();
        let cap = ApprovalCapability::new(Arc::new(ui), cancel.clone());
        let out = cap.ask(prompt(), Some(Duration::from_millis(20))).await;
        assert_eq!(out, ApprovalOutcome::TimedOut);
        cancel.cancel();
        assert_eq!(cap.ask(prompt(), None).await, ApprovalOutcome::Cancelled);
    }
}

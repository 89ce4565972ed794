//! 流式呈现
//!
//! 解析器产出新快照的速度可能快于 UI 呈现速度。PresentationGate 持有「呈现中」标记：
//! 呈现期间到达的更新只留下最新一份并置 pending，当前呈现结束后补放一次，不做无界排队。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::parser::ContentBlock;

/// 一帧呈现内容：本轮全部块 + 流式中 action 的预览
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentationFrame {
    pub turn: usize,
    pub blocks: Vec<ContentBlock>,
    pub previews: Vec<(usize, String)>,
}

pub trait PresentationSink: Send + Sync {
    fn present(&self, frame: &PresentationFrame);
}

/// 只写 debug 日志的 sink
#[derive(Debug, Default)]
pub struct LogSink;

impl PresentationSink for LogSink {
    fn present(&self, frame: &PresentationFrame) {
        tracing::debug!(
            turn = frame.turn,
            blocks = frame.blocks.len(),
            partial = frame.blocks.iter().filter(|b| b.partial).count(),
            "present"
        );
    }
}

/// 合并呈现请求的非阻塞闸门
#[derive(Default)]
pub struct PresentationGate {
    in_progress: AtomicBool,
    pending: AtomicBool,
    latest: Mutex<Option<PresentationFrame>>,
    presented: AtomicUsize,
}

impl PresentationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交一帧；若已有呈现在进行，只更新最新帧并立即返回
    pub fn submit(&self, frame: PresentationFrame, sink: &dyn PresentationSink) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
        self.pending.store(true, Ordering::SeqCst);

        loop {
            if self
                .in_progress
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            while self.pending.swap(false, Ordering::SeqCst) {
                let next = self.latest.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(frame) = next {
                    sink.present(&frame);
                    self.presented.fetch_add(1, Ordering::SeqCst);
                }
            }
            self.in_progress.store(false, Ordering::SeqCst);
            // 释放标记与新提交之间的竞争窗口
            if !self.pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }
}

/// Presenter：闸门 + sink
#[derive(Clone)]
pub struct Presenter {
    gate: Arc<PresentationGate>,
    sink: Arc<dyn PresentationSink>,
}

impl Presenter {
    pub fn new(sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            gate: Arc::new(PresentationGate::new()),
            sink,
        }
    }

    pub fn present(&self, frame: PresentationFrame) {
        self.gate.submit(frame, self.sink.as_ref());
    }

    pub fn presented(&self) -> usize {
        self.gate.presented()
    }
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new(Arc::new(LogSink))
    }
}

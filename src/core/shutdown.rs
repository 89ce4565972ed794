//! 中断与退出
//!
//! 第一次 Ctrl+C / SIGTERM 只触发中断：当前任务被取消，挂起的审批按拒绝处理，会话照常保存，之后可恢复。
//! 中断后再按一次 Ctrl+C 视为强制退出。退出前由 Teardown 依次执行收尾步骤，每步有独立超时。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::HiveError;
use crate::tools::ProcessRegistry;

/// 中断来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    CtrlC,
    Terminate,
    /// 中断后再次 Ctrl+C
    Forced,
}

/// 进程级中断信号：token 在第一次中断时取消，来源可通过 watch 订阅
#[derive(Clone)]
pub struct InterruptSignal {
    token: CancellationToken,
    source: watch::Sender<Option<InterruptSource>>,
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSignal {
    pub fn new() -> Self {
        let (source, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            source,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 记录来源并取消 token；Forced 总会覆盖先前的来源
    pub fn trigger(&self, source: InterruptSource) {
        self.source.send_if_modified(|current| match current {
            None => {
                *current = Some(source);
                true
            }
            Some(_) if source == InterruptSource::Forced => {
                *current = Some(source);
                true
            }
            Some(_) => false,
        });
        self.token.cancel();
    }

    pub fn source(&self) -> Option<InterruptSource> {
        *self.source.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<InterruptSource>> {
        self.source.subscribe()
    }

    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C 与 SIGTERM
    pub fn listen(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if signal.token.is_cancelled() {
                    tracing::warn!("second interrupt, forcing exit");
                    signal.trigger(InterruptSource::Forced);
                    break;
                }
                tracing::info!("interrupt received, cancelling current task");
                signal.trigger(InterruptSource::CtrlC);
            }
        });

        #[cfg(unix)]
        {
            let signal = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal as unix_signal, SignalKind};
                if let Ok(mut term) = unix_signal(SignalKind::terminate()) {
                    if term.recv().await.is_some() {
                        tracing::info!("SIGTERM received, cancelling current task");
                        signal.trigger(InterruptSource::Terminate);
                    }
                }
            });
        }
    }
}

/// 退出前的收尾步骤，返回处理掉的对象数
#[async_trait]
pub trait TeardownStep: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<usize, HiveError>;
}

/// 单个收尾步骤的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done(usize),
    Failed(String),
    TimedOut,
}

/// 按注册顺序执行收尾步骤
pub struct Teardown {
    steps: Vec<Box<dyn TeardownStep>>,
    step_timeout: Duration,
}

impl Default for Teardown {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Teardown {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            step_timeout,
        }
    }

    pub fn with_step(mut self, step: impl TeardownStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// 一个步骤失败或超时不影响后续步骤
    pub async fn run(&self) -> Vec<(String, StepOutcome)> {
        let mut report = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let outcome = match tokio::time::timeout(self.step_timeout, step.run()).await {
                Ok(Ok(n)) => StepOutcome::Done(n),
                Ok(Err(e)) => StepOutcome::Failed(e.to_string()),
                Err(_) => StepOutcome::TimedOut,
            };
            match &outcome {
                StepOutcome::Done(n) => tracing::info!(step = step.name(), handled = n, "teardown step done"),
                other => tracing::warn!(step = step.name(), outcome = ?other, "teardown step incomplete"),
            }
            report.push((step.name().to_string(), outcome));
        }
        report
    }
}

/// 终止会话登记的后台进程
pub struct KillProcesses(pub ProcessRegistry);

#[async_trait]
impl TeardownStep for KillProcesses {
    fn name(&self) -> &str {
        "kill_processes"
    }

    async fn run(&self) -> Result<usize, HiveError> {
        Ok(self.0.kill_all().await)
    }
}

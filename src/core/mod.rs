//! 核心编排层：错误与恢复、状态迁移记录、展示、会话监管、关闭处理、编排状态机

pub mod error;
pub mod orchestrator;
pub mod presenter;
pub mod recovery;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use error::{ErrorClass, HiveError, RecoveryAction};
pub use orchestrator::{Orchestrator, TurnState, TurnSummary};
pub use presenter::{LogSink, PresentationFrame, PresentationGate, PresentationSink, Presenter};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{
    InterruptSignal, InterruptSource, KillProcesses, StepOutcome, Teardown, TeardownStep,
};
pub use state::{ActionPhase, Transition, TransitionLog};

//! 会话记忆：历史、会话状态、上下文窗口截断、恢复、持久化

pub mod context_window;
pub mod conversation;
pub mod persistence;
pub mod resume;
pub mod session;
pub mod token_budget;

pub use context_window::{usable_threshold, ContextManager, KeepFraction};
pub use conversation::{HistoryEntry, HistoryPart, Role, TokenUsage};
pub use persistence::{JsonFileSessionStore, MemorySessionStore, SessionStore};
pub use resume::{reconcile, ResumeReport};
pub use session::{ResumeMarker, SessionState, TRUNCATION_NOTICE};
pub use token_budget::TokenEstimator;

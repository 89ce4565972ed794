//! 块解析：模型输出流 → 有序的文字块 / action 块

pub mod block;
pub mod stream;

pub use block::{ActionInvocation, BlockKind, BlockPayload, ContentBlock, Vocabulary};
pub use stream::{BlockParser, NativeCallDelta};

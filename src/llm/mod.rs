//! 模型传输层：传输抽象与脚本化实现

pub mod mock;
pub mod traits;

pub use mock::{ScriptedTransport, ScriptedTurn};
pub use traits::{EventStream, ModelRequest, ModelTransport, TransportEvent};

//! 结果封装：执行结果 → 模型下一轮可见的结果消息

pub mod marshaler;
pub mod responses;

pub use marshaler::{MarshalMode, ResultMarshaler, ToolResult};

//! Hive - Rust 编码智能体运行时
//!
//! 模块划分：
//! - **agent**: 会话驱动（传输 → 解析 → 编排 → 结果 → 上下文）
//! - **approval**: 类别 / 局部性两级审批与审批 UI
//! - **config**: 应用配置加载（TOML + 环境变量），每轮读取快照
//! - **core**: 编排状态机、错误与恢复、展示合并、会话监管、关闭处理
//! - **llm**: 模型传输抽象与脚本化实现
//! - **marshal**: 执行结果 → 模型可见的结果消息
//! - **memory**: 会话状态、上下文截断、恢复与持久化
//! - **parser**: 流式块解析
//! - **tools**: action 注册表、执行器与内置 action

pub mod agent;
pub mod approval;
pub mod config;
pub mod core;
pub mod llm;
pub mod marshal;
pub mod memory;
pub mod observability;
pub mod parser;
pub mod tools;

pub use agent::{Agent, TaskOutcome, TaskReport};
pub use core::HiveError;

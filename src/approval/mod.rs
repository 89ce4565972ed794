//! 审批：类别 / 局部性两道闸门、审批 UI 与挂起等待

pub mod locality;
pub mod policy;
pub mod ui;

pub use locality::Locality;
pub use policy::{category_gate, ApprovalDecision, ApprovalPolicy};
pub use ui::{
    ApprovalCapability, ApprovalOutcome, ApprovalPrompt, ApprovalResponse, ApprovalTicket,
    ApprovalUi, ChannelApprovalUi, StaticApprovalUi,
};

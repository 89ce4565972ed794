//! Action 体系：请求/结果类型、handler 注册表、执行器与内置 action

pub mod action;
pub mod code_edit;
pub mod code_grep;
pub mod executor;
pub mod filesystem;
pub mod mcp;
pub mod process;
pub mod registry;
pub mod shell;
pub mod web_fetch;

use std::sync::Arc;

pub use action::{
    ActionCategory, ActionRequest, ActionTarget, Completion, ExecutionResult, ExecutionStatus,
    OutputPart, Params,
};
pub use code_edit::ReplaceInFile;
pub use code_grep::SearchFiles;
pub use executor::ActionExecutor;
pub use filesystem::{ListFiles, ReadFile, WorkspaceFs, WriteToFile};
pub use mcp::{CommandToolHost, ExternalToolHost, UseMcpTool};
pub use process::ProcessRegistry;
pub use registry::{ActionHandler, ActionRegistry, ExecutionContext, ParamKind, ParamSpec};
pub use shell::ExecuteCommand;
pub use web_fetch::WebFetch;

use crate::config::ToolsSection;
use crate::core::HiveError;

/// 按配置注册内置 action；提供外部工具宿主时一并注册 use_mcp_tool
pub fn default_registry(
    tools: &ToolsSection,
    host: Option<Arc<dyn ExternalToolHost>>,
) -> Result<ActionRegistry, HiveError> {
    let fs = WorkspaceFs::new(&tools.excluded_paths, tools.max_file_bytes);
    let mut registry = ActionRegistry::new();
    registry.register(ReadFile::new(fs.clone()))?;
    registry.register(ListFiles::new(fs.clone()))?;
    registry.register(SearchFiles::new(fs.clone()))?;
    registry.register(WriteToFile::new(fs.clone()))?;
    registry.register(ReplaceInFile::new(fs))?;
    registry.register(ExecuteCommand::new(tools.command_watch_secs))?;
    registry.register(WebFetch::new(tools.fetch_timeout_secs, tools.max_fetch_chars))?;
    if let Some(host) = host {
        registry.register(UseMcpTool::new(host))?;
    }
    Ok(registry)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::approval::{ApprovalCapability, ApprovalResponse, StaticApprovalUi};
    use crate::tools::{ActionRequest, ExecutionContext, ProcessRegistry};

    /// 审批一律通过的执行上下文
    pub fn ctx(dir: &Path) -> ExecutionContext {
        let cancel = CancellationToken::new();
        ExecutionContext {
            session_id: "test".into(),
            cwd: dir.to_path_buf(),
            cancel: cancel.clone(),
            approvals: ApprovalCapability::new(
                Arc::new(StaticApprovalUi::new(ApprovalResponse::Approve)),
                cancel,
            ),
            processes: ProcessRegistry::new(),
        }
    }

    pub fn req(id: &str, params: &[(&str, &str)]) -> ActionRequest {
        ActionRequest {
            action_id: id.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            correlation_id: None,
            turn_index: 0,
            block_index: 0,
        }
    }
}

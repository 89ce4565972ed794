//! use_mcp_tool：调用外部工具服务
//!
//! 外部服务抽象为 ExternalToolHost；默认实现 CommandToolHost 按配置 [[tools.external_servers]]
//! 直接 exec `program args.. <tool_name>`（不经 shell），arguments JSON 写入 stdin，stdout 作为结果，带超时。

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ExternalServerEntry;
use crate::core::HiveError;
use crate::tools::registry::validate_params;
use crate::tools::{
    ActionCategory, ActionHandler, ActionRequest, ExecutionContext, ExecutionResult, OutputPart,
    ParamSpec, Params,
};

/// 外部工具宿主
#[async_trait]
pub trait ExternalToolHost: Send + Sync {
    /// 已知的服务名
    fn servers(&self) -> Vec<String>;

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Vec<OutputPart>, String>;
}

/// 以子进程实现的外部工具宿主
pub struct CommandToolHost {
    servers: HashMap<String, ExternalServerEntry>,
    workspace: PathBuf,
}

impl CommandToolHost {
    pub fn new(entries: &[ExternalServerEntry], workspace: impl Into<PathBuf>) -> Self {
        Self {
            servers: entries.iter().map(|e| (e.name.clone(), e.clone())).collect(),
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl ExternalToolHost for CommandToolHost {
    fn servers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Vec<OutputPart>, String> {
        let entry = self
            .servers
            .get(server)
            .ok_or_else(|| format!("Unknown server '{server}'"))?;
        tracing::info!(server = %server, tool = %tool, program = %entry.program, "external tool invoke");
        let mut child = Command::new(&entry.program)
            .args(&entry.args)
            .arg(tool)
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("server '{server}' spawn failed: {e}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(arguments.to_string().as_bytes())
                .await
                .map_err(|e| format!("write arguments failed: {e}"))?;
        }
        let output = tokio::time::timeout(
            Duration::from_secs(entry.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| format!("server '{server}' timeout after {}s", entry.timeout_secs))?
        .map_err(|e| format!("server '{server}' wait failed: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "exit {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(vec![OutputPart::Text {
            text: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        }])
    }
}

pub struct UseMcpTool {
    host: Arc<dyn ExternalToolHost>,
}

impl UseMcpTool {
    pub fn new(host: Arc<dyn ExternalToolHost>) -> Self {
        Self { host }
    }
}

fn parse_arguments(raw: Option<&str>) -> Result<Value, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Value::Object(Default::default())),
        Some(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => Ok(v),
            Ok(_) => Err("arguments must be a JSON object".to_string()),
            Err(e) => Err(format!("arguments is not valid JSON: {e}")),
        },
    }
}

#[async_trait]
impl ActionHandler for UseMcpTool {
    fn id(&self) -> &str {
        "use_mcp_tool"
    }

    fn description(&self) -> &str {
        "Call a tool provided by a connected external tool server. arguments is a JSON object."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::text("server_name"),
            ParamSpec::text("tool_name"),
            ParamSpec::raw("arguments").optional(),
        ];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::CallExternalTool
    }

    fn validate(&self, params: &Params) -> Result<(), HiveError> {
        validate_params(self.params(), params)?;
        parse_arguments(params.get("arguments").map(String::as_str))
            .map_err(HiveError::Structural)?;
        Ok(())
    }

    fn describe(&self, request: &ActionRequest) -> String {
        format!(
            "use_mcp_tool '{}' on '{}'",
            request.param("tool_name").unwrap_or(""),
            request.param("server_name").unwrap_or("")
        )
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let server = request.param("server_name").unwrap_or("");
        let tool = request.param("tool_name").unwrap_or("");
        let arguments = parse_arguments(request.param("arguments"))?;
        let output = tokio::select! {
            r = self.host.call_tool(server, tool, arguments) => r?,
            _ = ctx.cancel.cancelled() => return Err("External tool call was cancelled.".to_string()),
        };
        let mut result = ExecutionResult::success(String::new());
        result.output = if output.is_empty() {
            vec![OutputPart::Text {
                text: "(No response)".to_string(),
            }]
        } else {
            output
        };
        Ok(result)
    }
}

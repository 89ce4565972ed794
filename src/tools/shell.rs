//! execute_command：在会话 cwd 下通过 sh -c / cmd /C 执行命令
//!
//! 输出持续收集；超过观察时间仍未退出时，通过 ApprovalCapability 询问是否继续等待。
//! 不再等待则把子进程移交给会话的 ProcessRegistry，结果标记为仍在运行。
//! 命中危险子串（rm -rf、mkfs 等）或请求自带 requires_approval=true 时视为高风险，需要人工确认。

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::approval::{ApprovalOutcome, ApprovalPrompt};
use crate::tools::{
    ActionCategory, ActionHandler, ActionRequest, ExecutionContext, ExecutionResult, ParamSpec,
    Params,
};

/// 高风险子串：即使 execute_safe_commands 开启也需要确认
const RISKY_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:",
];

/// 返回给模型的输出上限（保留尾部）
const MAX_OUTPUT_CHARS: usize = 20_000;

type OutputBuf = Arc<Mutex<String>>;

fn spawn_reader<R>(reader: R, buf: OutputBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut out = buf.lock().await;
            out.push_str(&line);
            out.push('\n');
        }
    })
}

async fn snapshot(buf: &OutputBuf) -> String {
    let out = buf.lock().await;
    let count = out.chars().count();
    if count > MAX_OUTPUT_CHARS {
        let tail: String = out.chars().skip(count - MAX_OUTPUT_CHARS).collect();
        format!("...[output truncated]\n{}", tail.trim_end())
    } else {
        out.trim_end().to_string()
    }
}

pub struct ExecuteCommand {
    watch: Duration,
}

impl ExecuteCommand {
    pub fn new(watch_secs: u64) -> Self {
        Self {
            watch: Duration::from_secs(watch_secs.max(1)),
        }
    }

    #[cfg(test)]
    fn with_watch(watch: Duration) -> Self {
        Self { watch }
    }

    fn build_command(command: &str) -> Command {
        if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        }
    }
}

pub fn is_risky_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    RISKY_SUBSTR.iter().any(|s| lower.contains(s))
}

#[async_trait]
impl ActionHandler for ExecuteCommand {
    fn id(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a CLI command in the current working directory. Set requires_approval to true for \
         commands with potentially destructive effects such as deleting files or installing packages."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::text("command"),
            ParamSpec::text("requires_approval").optional(),
        ];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::ExecuteShell
    }

    /// 观察时限到后询问是否继续，否则转入后台；不受执行器全局超时约束
    fn manages_own_deadline(&self) -> bool {
        true
    }

    fn flagged_risky(&self, params: &Params) -> bool {
        params
            .get("requires_approval")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
            || params.get("command").is_some_and(|c| is_risky_command(c))
    }

    fn describe(&self, request: &ActionRequest) -> String {
        format!("execute_command '{}'", request.param("command").unwrap_or(""))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let command = request.param("command").unwrap_or("").trim().to_string();
        tracing::info!(command = %command, cwd = %ctx.cwd.display(), "execute_command");

        let mut child = Self::build_command(&command)
            .current_dir(&ctx.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Execution failed: {e}"))?;

        let buf: OutputBuf = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, buf.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, buf.clone()));
        }

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| format!("Wait failed: {e}"))?;
                    for r in readers {
                        let _ = r.await;
                    }
                    let output = snapshot(&buf).await;
                    let code = status.code().map_or("signal".to_string(), |c| c.to_string());
                    let body = if output.is_empty() { "(no output)".to_string() } else { output };
                    return Ok(if status.success() {
                        ExecutionResult::success(format!("Command executed.\nOutput:\n{body}"))
                    } else {
                        ExecutionResult::success(format!("Command exited with code {code}.\nOutput:\n{body}"))
                    });
                }
                _ = ctx.cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err("Command was cancelled.".to_string());
                }
                _ = tokio::time::sleep(self.watch) => {
                    let prompt = ApprovalPrompt {
                        action_id: self.id().to_string(),
                        description: format!(
                            "'{command}' is still running after {}s. Keep waiting for it to finish?",
                            self.watch.as_secs()
                        ),
                        category: ActionCategory::ExecuteShell,
                        locality: None,
                    };
                    match ctx.approvals.ask(prompt, None).await {
                        ApprovalOutcome::Responded(r) if r.is_approved() => continue,
                        ApprovalOutcome::Cancelled => {
                            let _ = child.kill().await;
                            return Err("Command was cancelled.".to_string());
                        }
                        _ => {
                            let output = snapshot(&buf).await;
                            let id = ctx.processes.register(command.clone(), child).await;
                            return Ok(ExecutionResult::still_running(
                                id,
                                format!(
                                    "Command is still running (process {id}). Output so far:\n{}",
                                    if output.is_empty() { "(no output yet)" } else { &output }
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }
}

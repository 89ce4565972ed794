//! Hive - Rust 编码智能体运行时
//!
//! 入口：加载配置与日志，用脚本化对话（各段回复以 `---` 分隔）驱动一个任务，审批在终端中回答，Ctrl+C 取消。
//!
//! 用法：`hive --script <file> [--config <file>] [--resume <session>] [task...]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hive::approval::{ApprovalResponse, ApprovalTicket, ChannelApprovalUi};
use hive::config::{load_config, SettingsHandle};
use hive::core::{InterruptSignal, InterruptSource, KillProcesses, Teardown};
use hive::llm::ScriptedTransport;
use hive::memory::JsonFileSessionStore;
use hive::tools::{default_registry, CommandToolHost, ExternalToolHost};
use hive::{observability, Agent, TaskOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// 脚本回复的流式切块大小（字符）
const STREAM_CHUNK_CHARS: usize = 16;

/// 用脚本化对话驱动一个编码任务
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// 脚本化对话文件，各段回复以 `---` 分隔
    #[arg(long)]
    script: PathBuf,

    /// 配置文件（TOML）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 恢复已保存的会话
    #[arg(long)]
    resume: Option<String>,

    /// 任务描述；未给 --resume 时必填
    #[arg(num_args = 1.., required_unless_present = "resume")]
    task: Vec<String>,
}

/// 终端回答：y 批准，`y <反馈>` 批准并附带反馈，其他一律拒绝
fn parse_answer(line: &str) -> ApprovalResponse {
    let line = line.trim();
    match line.split_once(' ') {
        Some((head, rest)) if head.eq_ignore_ascii_case("y") && !rest.trim().is_empty() => {
            ApprovalResponse::ApproveWithFeedback(rest.trim().to_string())
        }
        _ if line.eq_ignore_ascii_case("y") || line.eq_ignore_ascii_case("yes") => {
            ApprovalResponse::Approve
        }
        _ => ApprovalResponse::Deny,
    }
}

async fn answer_from_stdin(mut tickets: mpsc::Receiver<ApprovalTicket>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(ticket) = tickets.recv().await {
        let locality = ticket
            .prompt
            .locality
            .map(|l| format!(" [{l:?}]"))
            .unwrap_or_default();
        eprintln!(
            "\nApprove {} ({}){locality}? [y / y <feedback> / n]",
            ticket.prompt.description,
            ticket.prompt.category.as_str()
        );
        let response = match lines.next_line().await {
            Ok(Some(line)) => parse_answer(&line),
            _ => ApprovalResponse::Deny,
        };
        ticket.respond(response);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = CliArgs::parse();

    let cfg = load_config(args.config.clone()).context("Failed to load config")?;
    let cwd = std::env::current_dir().context("Failed to read current directory")?;

    let script = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("Failed to read script {}", args.script.display()))?;
    let transport = ScriptedTransport::from_transcript(&script, STREAM_CHUNK_CHARS);

    let host: Option<Arc<dyn ExternalToolHost>> = if cfg.tools.external_servers.is_empty() {
        None
    } else {
        Some(Arc::new(CommandToolHost::new(&cfg.tools.external_servers, &cwd)))
    };
    let registry = Arc::new(default_registry(&cfg.tools, host).context("Failed to register actions")?);
    let store = Arc::new(JsonFileSessionStore::new(&cfg.app.session_dir));

    let (ui, tickets) = ChannelApprovalUi::new(4);
    tokio::spawn(answer_from_stdin(tickets));

    let settings = SettingsHandle::new(cfg).with_source(args.config.clone());
    let mut agent = Agent::new(
        Arc::new(transport),
        registry,
        store,
        settings,
        Arc::new(ui),
        cwd,
    );

    // 第一次 Ctrl+C / SIGTERM 取消当前任务，第二次直接退出
    let interrupt = InterruptSignal::new();
    interrupt.listen();
    let supervisor = agent.supervisor();
    let teardown = Teardown::default().with_step(KillProcesses(supervisor.processes()));
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            interrupt.interrupted().await;
            supervisor.cancel().await;
            let mut source = interrupt.subscribe();
            if source
                .wait_for(|s| *s == Some(InterruptSource::Forced))
                .await
                .is_ok()
            {
                supervisor.cancel().await;
                std::process::exit(130);
            }
        });
    }

    let report = match &args.resume {
        Some(id) => agent.resume(id).await,
        None => agent.run_task(args.task.join(" ")).await,
    }
    .context("Task failed")?;

    teardown.run().await;

    println!("{}", report.final_text);
    match &report.outcome {
        TaskOutcome::Completed => eprintln!("\n[session {}] completed in {} turn(s)", report.session_id, report.turns.len()),
        TaskOutcome::Escalated(msg) => eprintln!("\n[session {}] needs guidance: {msg}", report.session_id),
        TaskOutcome::TurnLimit => eprintln!("\n[session {}] stopped at the turn limit", report.session_id),
        TaskOutcome::Cancelled => eprintln!("\n[session {}] cancelled; resume with --resume {}", report.session_id, report.session_id),
    }
    Ok(())
}

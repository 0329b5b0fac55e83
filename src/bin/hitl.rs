//! 人工审批命令行：taskhive-hitl [list|approve|reject|sweep]
//!
//! list / approve / reject 前先做一次 TTL 清理；approve 会接着恢复该任务的编排。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use taskhive::config::load_or_default;
use taskhive::hitl::Decision;
use taskhive::{observability, AgentBuilder, Orchestrator, RunOutcome};

#[derive(Parser)]
#[command(name = "taskhive-hitl", version, about = "Review tasks waiting for human approval")]
struct Cli {
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show pending approvals, oldest first
    List,
    /// Approve the oldest pending task, or the given one
    Approve { task_id: Option<String> },
    /// Reject the oldest pending task, or the given one
    Reject { task_id: Option<String> },
    /// Remove snapshots older than the TTL
    Sweep,
}

async fn decide(orchestrator: &Orchestrator, task_id: Option<String>, decision: Decision) -> anyhow::Result<()> {
    let queue = orchestrator.hitl();
    let decided = match &task_id {
        Some(id) => queue.decide_task(id, decision).await,
        None => queue.decide(decision).await,
    }
    .context("Failed to record decision")?;

    let Some(decided) = decided else {
        match task_id {
            Some(id) => println!("No pending item for task {id}"),
            None => println!("No pending items"),
        }
        return Ok(());
    };
    let id = decided.record.task_id.clone();
    println!("Task {id} {decision}");

    if let Some(report) = orchestrator.conclude(decided).await.context("Failed to resume task")? {
        match report.outcome {
            RunOutcome::Responded { reply } => println!("{reply}"),
            RunOutcome::AwaitingApproval { task_id } => {
                println!("Task {task_id} needs another approval")
            }
            RunOutcome::Paused { task_id, error } => println!("Task {task_id} paused: {error}"),
            RunOutcome::Cancelled { task_id } => println!("Task {task_id} cancelled"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();
    let config = load_or_default(cli.config);
    let orchestrator = AgentBuilder::new(config)
        .build()
        .context("Failed to build agent")?;
    let queue = orchestrator.hitl();

    let command = cli.command.unwrap_or(Command::List);
    if !matches!(command, Command::Sweep) {
        orchestrator.sweep().await.context("TTL sweep failed")?;
    }

    match command {
        Command::List => {
            let items = queue.list().context("Failed to list queue")?;
            if items.is_empty() {
                println!("No pending items");
            }
            for item in items {
                let objective = if item.objective.is_empty() {
                    "no objective"
                } else {
                    item.objective.as_str()
                };
                println!("{}: {}", item.task_id, objective);
            }
        }
        Command::Approve { task_id } => decide(&orchestrator, task_id, Decision::Approved).await?,
        Command::Reject { task_id } => decide(&orchestrator, task_id, Decision::Rejected).await?,
        Command::Sweep => {
            let removed = orchestrator.sweep().await.context("TTL sweep failed")?;
            println!("Removed {removed} expired item(s)");
        }
    }
    Ok(())
}

//! Taskhive 命令行入口
//!
//! - `taskhive run <prompt>`：执行一次完整编排
//! - `taskhive tasks`：列出任务（含错误信息）
//! - `taskhive meta`：根据审批反思生成指导文本

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use taskhive::config::load_or_default;
use taskhive::meta::MetaAgent;
use taskhive::{observability, AgentBuilder, RunOutcome};

#[derive(Parser)]
#[command(name = "taskhive", version, about = "Personal task-automation agent")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, prioritise and execute a natural-language request
    Run {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// List stored tasks
    Tasks,
    /// Synthesise planner guidelines from recent approval decisions
    Meta,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();
    let config = load_or_default(cli.config);

    match cli.command {
        Command::Run { prompt } => {
            let prompt = prompt.join(" ");
            let orchestrator = AgentBuilder::new(config)
                .build()
                .context("Failed to build agent")?;
            let report = orchestrator.run(&prompt).await.context("Run failed")?;
            match report.outcome {
                RunOutcome::Responded { reply } => println!("{reply}"),
                RunOutcome::AwaitingApproval { task_id } => {
                    println!("Task {task_id} is waiting for approval (taskhive-hitl approve {task_id})")
                }
                RunOutcome::Paused { task_id, error } => println!("Task {task_id} paused: {error}"),
                RunOutcome::Cancelled { task_id } => println!("Task {task_id} cancelled"),
            }
        }
        Command::Tasks => {
            let components = AgentBuilder::new(config)
                .build_components()
                .context("Failed to open task store")?;
            let tasks = components.store.list().context("Failed to list tasks")?;
            if tasks.is_empty() {
                println!("No tasks");
            }
            for task in tasks {
                match &task.error {
                    Some(error) => println!(
                        "{} [{}|{}] {} (error: {error})",
                        task.task_id, task.status, task.priority, task.objective
                    ),
                    None => println!(
                        "{} [{}|{}] {}",
                        task.task_id, task.status, task.priority, task.objective
                    ),
                }
            }
        }
        Command::Meta => {
            let guidelines_path = config.app.guidelines_path.clone();
            let collection = config.hitl.reflections_collection.clone();
            let components = AgentBuilder::new(config)
                .build_components()
                .context("Failed to build agent")?;
            let agent = MetaAgent::new(components.llm, components.index, collection);
            let guidelines = taskhive::memory::Guidelines::new(guidelines_path);
            match agent
                .run(components.hitl.reflection_log(), &guidelines)
                .await
                .context("Meta-agent failed")?
            {
                Some(text) => println!("{text}"),
                None => println!("No reflections yet"),
            }
        }
    }
    Ok(())
}

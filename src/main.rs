//! taskforge 命令行
//!
//! 本地使用的薄封装：create / analyze / execute / get / list / history / chat，结果以 JSON 输出。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use taskforge::core::create_orchestrator_builder;
use taskforge::llm::{ComplexityClass, GenerationOptions, GenerationRequest, RoutingMode};
use taskforge::store::TaskFilter;
use taskforge::{AnalyzeOptions, TaskPriority, TaskSpec, TaskStatus};

#[derive(Parser)]
#[command(author, version, about = "Development task orchestration with complexity-based model routing")]
struct Cli {
    /// 额外的配置文件（叠加在 config/default.toml 之上）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a pending task
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        objective: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "requirement")]
        requirements: Vec<String>,
        #[arg(long = "constraint")]
        constraints: Vec<String>,
        #[arg(long = "accept")]
        acceptance_criteria: Vec<String>,
        #[arg(long, default_value = "medium")]
        priority: TaskPriority,
    },
    /// Generate a plan for a task
    Analyze {
        id: String,
        /// Re-plan a failed task
        #[arg(long)]
        replan: bool,
        #[arg(long)]
        allow_empty: bool,
        #[arg(long)]
        complexity: Option<ComplexityClass>,
    },
    /// Execute a planned (or failed) task
    Execute { id: String },
    /// Show one task
    Get { id: String },
    /// List tasks
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        priority: Option<TaskPriority>,
    },
    /// Show execution history of a task
    History { id: String },
    /// Send a prompt straight through the model router
    Chat {
        prompt: String,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        complexity: Option<ComplexityClass>,
        /// auto / prefer_local / prefer_hosted / only:<name>
        #[arg(long)]
        mode: Option<RoutingMode>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskforge::observability::init();
    let cli = Cli::parse();

    let orchestrator = create_orchestrator_builder(cli.config)?
        .build()
        .context("Failed to build orchestrator")?;

    match cli.command {
        Commands::Create {
            title,
            objective,
            description,
            requirements,
            constraints,
            acceptance_criteria,
            priority,
        } => {
            let spec = TaskSpec {
                title,
                description,
                objective,
                requirements,
                constraints,
                acceptance_criteria,
                priority,
            };
            print_json(&orchestrator.create_task(spec).await?)?;
        }
        Commands::Analyze {
            id,
            replan,
            allow_empty,
            complexity,
        } => {
            let options = AnalyzeOptions {
                replan,
                allow_empty_plan: allow_empty,
                complexity_hint: complexity,
                context: None,
            };
            print_json(&orchestrator.analyze_task_with(&id, options).await?)?;
        }
        Commands::Execute { id } => {
            let record = orchestrator.execute_task(&id).await?;
            print_json(&record)?;
            if !record.success {
                std::process::exit(1);
            }
        }
        Commands::Get { id } => print_json(&orchestrator.get_task(&id).await?)?,
        Commands::List { status, priority } => {
            let filter = TaskFilter { status, priority };
            print_json(&orchestrator.list_tasks(&filter).await?)?;
        }
        Commands::History { id } => print_json(&orchestrator.execution_history(&id).await?)?,
        Commands::Chat {
            prompt,
            system,
            complexity,
            mode,
        } => {
            let mut request = GenerationRequest::new(prompt);
            request.system = system;
            let options = GenerationOptions {
                complexity,
                mode,
                ..GenerationOptions::default()
            };
            print_json(&orchestrator.generate(&request, &options).await?)?;
        }
    }

    Ok(())
}

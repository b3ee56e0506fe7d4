//! Strand CLI - validate and run workflow files
//!
//! Runs with the in-process mock adapters: agents echo their input, and
//! a small built-in tool set (`echo`, `now`) is registered. Real agent
//! and tool back-ends plug in through the adapter traits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use strand::adapter::{MockAgentAdapter, MockToolAdapter};
use strand::config::RuntimeConfig;
use strand::error::{FixSuggestion, StrandError};
use strand::event::NoopEmitter;
use strand::graph::{validate, Severity, Workflow};
use strand::resilience::{BreakerRegistry, CircuitBreakerConfig};
use strand::runtime::{EngineDefaults, ExecutionEngine, InvokerRegistry};
use strand::sched::Scheduler;
use strand::store::{ExecutionStatus, MemoryExecutionRepo, MemoryWorkflowRepo};
use strand::WorkflowDoc;

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Strand - workflow execution core for AI agent pipelines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default ~/.config/strand/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file and print the issue report
    Validate {
        /// Path to the workflow YAML/JSON file
        file: PathBuf,
    },

    /// Run a DAG workflow with the mock adapters
    Run {
        /// Path to the workflow YAML/JSON file
        file: PathBuf,

        /// Execution input as inline JSON
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// Write the event log as JSON to this file
        #[arg(short, long)]
        events: Option<PathBuf>,
    },

    /// Print the optimizer's layers and parallel groups
    Graph {
        /// Path to the workflow YAML/JSON file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Validate { file } => validate_file(&file),
        Commands::Run {
            file,
            input,
            events,
        } => run_file(&file, &input, events.as_deref(), config).await,
        Commands::Graph { file } => graph_file(&file),
    };

    if let Err(e) = result {
        print_error(&e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<RuntimeConfig, StrandError> {
    match path {
        Some(path) => RuntimeConfig::load_from(path),
        None => RuntimeConfig::load(),
    }
}

fn print_error(error: &StrandError) {
    eprintln!("{} {}", "✗".red(), error);
    if let Some(suggestion) = error.fix_suggestion() {
        eprintln!("  {} {}", "hint:".yellow(), suggestion);
    }
}

fn load_doc(file: &std::path::Path) -> Result<WorkflowDoc, StrandError> {
    if !file.exists() {
        return Err(StrandError::WorkflowFileNotFound {
            path: file.display().to_string(),
        });
    }
    let text = std::fs::read_to_string(file)?;
    serde_yaml::from_str(&text).map_err(|e| StrandError::ParseError {
        details: e.to_string(),
    })
}

fn validate_file(file: &std::path::Path) -> Result<(), StrandError> {
    let doc = load_doc(file)?;
    let report = validate(&doc.workflow);

    println!(
        "{} {} ({} nodes, {} edges)",
        "→".cyan(),
        file.display(),
        report.node_count,
        report.edge_count
    );

    for issue in report.errors.iter().chain(report.warnings.iter()) {
        let marker = match issue.severity() {
            Severity::Error => "✗".red(),
            Severity::Warning => "⚠".yellow(),
        };
        println!("  {} {}", marker, issue);
    }

    if report.is_valid() {
        println!("{} Valid", "✓".green());
        Ok(())
    } else {
        Err(StrandError::Validation {
            reason: format!("{} error(s)", report.errors.len()),
        })
    }
}

fn build_engine(config: RuntimeConfig) -> ExecutionEngine {
    let agents = Arc::new(MockAgentAdapter::new());
    let tools = Arc::new(MockToolAdapter::new());
    tools.register("echo", |params| Ok(params));
    tools.register("now", |_| {
        Ok(serde_json::json!({ "now": chrono::Utc::now().to_rfc3339() }))
    });

    ExecutionEngine::new(
        Arc::new(MemoryWorkflowRepo::new()),
        Arc::new(MemoryExecutionRepo::new()),
        Scheduler::new(config.scheduler),
        Arc::new(InvokerRegistry::new(agents, tools.clone())),
        tools,
        Arc::new(NoopEmitter::new()),
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default())),
        EngineDefaults {
            node_timeout_ms: config.defaults.node_timeout_ms,
        },
    )
}

async fn run_file(
    file: &std::path::Path,
    input: &str,
    events_out: Option<&std::path::Path>,
    config: RuntimeConfig,
) -> Result<(), StrandError> {
    let doc = load_doc(file)?;
    let workflow = Workflow::compile(doc.workflow)?;
    let input: serde_json::Value = serde_json::from_str(input)?;

    println!(
        "{} Running '{}' with {} nodes...\n",
        "→".cyan(),
        workflow.name(),
        workflow.def.nodes.len()
    );

    let engine = build_engine(config);
    let report = engine.execute(workflow, input).await?;

    for event in &report.events {
        println!(
            "  {} {:>6}ms {}",
            "·".dimmed(),
            event.timestamp_ms,
            event.kind.topic()
        );
    }

    if let Some(path) = events_out {
        let json = serde_json::to_string_pretty(&report.events)?;
        std::fs::write(path, json)?;
        println!("\n  events written to {}", path.display());
    }

    match report.status {
        ExecutionStatus::Completed => {
            println!("\n{} Completed", "✓".green());
            if let Some(output) = &report.output {
                println!("{}", serde_json::to_string_pretty(output)?);
            }
            Ok(())
        }
        status => {
            let message = report
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| format!("execution ended {}", status));
            println!("\n{} {}", "✗".red(), message);
            Err(StrandError::Execution { reason: message })
        }
    }
}

fn graph_file(file: &std::path::Path) -> Result<(), StrandError> {
    let doc = load_doc(file)?;
    let workflow = Workflow::compile(doc.workflow)?;

    println!("{} {} layers:", "→".cyan(), workflow.layers.len());
    for (i, layer) in workflow.layers.iter().enumerate() {
        let ids: Vec<&str> = layer.iter().map(|id| id.as_ref()).collect();
        println!("  {} [{}]", format!("L{}", i).dimmed(), ids.join(", "));
    }

    println!("{} parallel groups:", "→".cyan());
    for group in &workflow.groups {
        if group.nodes.len() > 1 {
            let ids: Vec<&str> = group.nodes.iter().map(|id| id.as_ref()).collect();
            println!("  {} [{}]", format!("L{}", group.layer).dimmed(), ids.join(", "));
        }
    }
    Ok(())
}

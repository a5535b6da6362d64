use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use flowlens::session::{ExecutionSession, SessionPhase};
use flowlens::stream::ConnectionNotice;
use flowlens::{ApiClient, Config, ExecutionStatus};

#[derive(Parser)]
#[command(name = "flowlens", version, about = "Live execution viewer and replay client for multi-agent workflows")]
struct Cli {
    /// Backend base URL (overrides FLOWLENS_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List workflows
    Workflows,
    /// List executions
    Executions {
        /// Filter by workflow id
        #[arg(long)]
        workflow: Option<String>,
        /// Filter by status (running|success|failed|replaying)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a stored execution with its step history
    Show { execution_id: String },
    /// Start a workflow run and watch it live
    Execute {
        workflow_id: String,
        /// JSON input data for the run
        #[arg(long)]
        input: Option<String>,
    },
    /// Attach to an execution and stream its steps
    Watch { execution_id: String },
    /// Replay an execution with step-output overrides
    Replay {
        execution_id: String,
        /// Override a step's output, as step_id=new_output (repeatable)
        #[arg(long = "set", value_parser = parse_override)]
        set: Vec<(String, String)>,
        /// Keep watching the new execution after submission
        #[arg(long)]
        watch: bool,
    },
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((step_id, output)) if !step_id.is_empty() => {
            Ok((step_id.to_string(), output.to_string()))
        }
        _ => Err("expected step_id=new_output".to_string()),
    }
}

fn parse_status(raw: &str) -> Result<ExecutionStatus> {
    match raw {
        "running" => Ok(ExecutionStatus::Running),
        "success" => Ok(ExecutionStatus::Success),
        "failed" => Ok(ExecutionStatus::Failed),
        "replaying" => Ok(ExecutionStatus::Replaying),
        other => bail!("unknown status '{other}'"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.base_url {
        Some(base_url) => Config::with_base_url(base_url.clone()),
        None => Config::from_env(),
    };

    match cli.command {
        Command::Workflows => {
            let api = ApiClient::new(config);
            for workflow in api.list_workflows().await? {
                println!("{}  {} (v{})", workflow.id, workflow.name, workflow.version);
            }
        }
        Command::Executions { workflow, status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let api = ApiClient::new(config);
            for execution in api.list_executions(workflow.as_deref(), status).await? {
                println!(
                    "{}  {}  workflow={}",
                    execution.id, execution.status, execution.workflow_id
                );
            }
        }
        Command::Show { execution_id } => {
            let mut session = ExecutionSession::new(config);
            if let Err(err) = session.open(&execution_id).await {
                bail!("failed to open execution: {err}");
            }
            print_view(&session);
        }
        Command::Execute { workflow_id, input } => {
            let input_data = input
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?;
            let mut session = ExecutionSession::new(config);
            let execution_id = session.execute(&workflow_id, input_data.as_ref()).await?;
            println!("started execution {execution_id}");
            watch_loop(&mut session).await;
            print_view(&session);
        }
        Command::Watch { execution_id } => {
            let mut session = ExecutionSession::new(config);
            session.open(&execution_id).await?;
            if session.phase() == SessionPhase::Settled {
                println!("execution already settled");
            } else {
                watch_loop(&mut session).await;
            }
            print_view(&session);
        }
        Command::Replay {
            execution_id,
            set,
            watch,
        } => {
            let mut session = ExecutionSession::new(config);
            session.open(&execution_id).await?;
            session.enter_replay()?;
            for (step_id, new_output) in &set {
                session.edit_step(step_id, new_output);
            }
            let new_id = session.submit_replay().await?;
            println!("replaying as execution {new_id}");
            if watch {
                watch_loop(&mut session).await;
                print_view(&session);
            }
        }
    }

    Ok(())
}

/// Drain stream notices until the session settles or the stream gives up.
async fn watch_loop(session: &mut ExecutionSession) {
    while let Some(notice) = session.poll_notice().await {
        match notice {
            ConnectionNotice::Connectivity(connected) => {
                eprintln!("[stream] {}", if connected { "connected" } else { "disconnected" });
            }
            ConnectionNotice::StepAppended { node_id, step_id } => {
                let aggregate = session.aggregate(&node_id);
                println!(
                    "[{node_id}] step {step_id}  (tokens={} latency={}ms)",
                    aggregate.total_tokens, aggregate.total_latency_ms
                );
            }
            ConnectionNotice::NodeFinished { node_id, failed } => {
                let node = node_id.unwrap_or_else(|| "?".to_string());
                println!("[{node}] {}", if failed { "failed" } else { "complete" });
            }
            ConnectionNotice::ExecutionCompleted => {
                println!("execution complete");
                break;
            }
            ConnectionNotice::Exhausted => {
                eprintln!("[stream] gave up reconnecting; state below is the last seen");
                break;
            }
        }
    }
}

fn print_view(session: &ExecutionSession) {
    let view = session.view();
    if let Some(status) = view.status {
        println!(
            "execution {}  status={status}",
            view.execution_id.as_deref().unwrap_or("?")
        );
    }
    for node in &view.nodes {
        println!(
            "node {}  steps={} tokens={} latency={}ms",
            node.node_id,
            node.steps.len(),
            node.aggregate.total_tokens,
            node.aggregate.total_latency_ms
        );
        for step in &node.steps {
            let marker = if step.edited { "*" } else { " " };
            println!(
                "  {marker}{} [{}] {}",
                step.step.step_id,
                step.step.step_type.as_str(),
                step.output.as_deref().unwrap_or("")
            );
        }
    }
    if let Some(error) = &view.error {
        eprintln!("error: {error}");
    }
}

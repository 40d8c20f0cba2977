//! Command-line interface for runstream.
//!
//! Drives a run end to end: streams its events to stdout and answers
//! the approval request automatically or from stdin.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config;
use crate::core::{forward, Framing, Notification, Observer, Orchestrator, WriterObserver};
use crate::domain::{Event, RequestId, RunId, RunStatus, UiResponse};

/// runstream - Run orchestrator with streamed events and human approval
#[derive(Parser, Debug)]
#[command(name = "runstream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a run and stream its events to stdout
    Run {
        /// Input handed to the pipeline
        input: String,

        /// How to answer the approval request
        #[arg(short, long, value_enum, default_value = "prompt")]
        decision: DecisionMode,

        /// Output framing for the event stream
        #[arg(short, long, value_enum, default_value = "sse")]
        format: OutputFormat,

        /// Override the approval deadline (must be positive)
        #[arg(
            long,
            env = "RUNSTREAM_APPROVAL_TIMEOUT_MS",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        approval_timeout_ms: Option<u64>,

        /// Send a cancel request after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// How the CLI responds to `ui.request`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecisionMode {
    /// Click "approve" immediately
    Approve,

    /// Click "cancel" immediately
    Cancel,

    /// Ask on stdin
    Prompt,

    /// Never answer (lets the deadline elapse)
    Ignore,
}

/// Output format for CLI (maps to Framing)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Server-sent events frames
    Sse,

    /// One JSON envelope per line
    Json,
}

impl From<OutputFormat> for Framing {
    fn from(f: OutputFormat) -> Self {
        match f {
            OutputFormat::Sse => Framing::Sse,
            OutputFormat::Json => Framing::JsonLines,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                input,
                decision,
                format,
                approval_timeout_ms,
                cancel_after_ms,
            } => {
                run_pipeline(input, decision, format, approval_timeout_ms, cancel_after_ms).await
            }
            Commands::Config => show_config(),
        }
    }
}

/// Writes the stream and hands each `ui.request` to the responder
struct ConsoleObserver<W> {
    inner: WriterObserver<W>,
    prompts: mpsc::UnboundedSender<RequestId>,
}

#[async_trait]
impl<W> Observer for ConsoleObserver<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn notify(&mut self, notification: Notification) -> Result<()> {
        let request_id = match &notification {
            Notification::Event(envelope) => match &envelope.event {
                Event::UiRequest(request) => Some(request.request_id.clone()),
                _ => None,
            },
            _ => None,
        };

        self.inner.notify(notification).await?;

        if let Some(request_id) = request_id {
            let _ = self.prompts.send(request_id);
        }
        Ok(())
    }
}

/// Start a run and follow it to completion
async fn run_pipeline(
    input: String,
    decision: DecisionMode,
    format: OutputFormat,
    approval_timeout_ms: Option<u64>,
    cancel_after_ms: Option<u64>,
) -> Result<()> {
    if input.trim().is_empty() {
        anyhow::bail!("Input is empty");
    }

    let mut config = config::get()?.clone();
    if let Some(ms) = approval_timeout_ms {
        config.approval_timeout_ms = ms;
    }

    let orchestrator = Arc::new(Orchestrator::new(config));
    let run_id = orchestrator.start_run(input);
    let subscription = orchestrator.subscribe(&run_id)?;

    let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
    let responder = tokio::spawn(respond_to_prompts(
        Arc::clone(&orchestrator),
        run_id.clone(),
        decision,
        prompt_rx,
    ));

    if let Some(ms) = cancel_after_ms {
        let orchestrator = Arc::clone(&orchestrator);
        let run_id = run_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if let Err(e) = orchestrator.cancel(&run_id) {
                warn!(%run_id, error = %e, "Cancel failed");
            }
        });
    }

    let mut observer = ConsoleObserver {
        inner: WriterObserver::new(tokio::io::stdout(), format.into()),
        prompts: prompt_tx,
    };
    let summary = forward(subscription, &mut observer)
        .await
        .context("Event stream interrupted")?;
    drop(observer);
    // A prompt may still be waiting on stdin after a timeout
    responder.abort();

    let run = orchestrator.wait(&run_id).await?;
    orchestrator.close(&run_id)?;

    match &run.status {
        RunStatus::Completed => {
            eprintln!(
                "\n[Run {} completed: {} events]",
                run.id, summary.delivered
            );
        }
        RunStatus::Failed { error } => {
            eprintln!("\n[Run {} failed: {}]", run.id, error);
            std::process::exit(1);
        }
        RunStatus::Canceled { reason } => {
            eprintln!("\n[Run {} canceled: {}]", run.id, reason);
            std::process::exit(2);
        }
        RunStatus::Running => {
            eprintln!("\n[Run {} in state: {:?}]", run.id, run.status);
        }
    }

    Ok(())
}

/// Answer each `ui.request` according to `mode`
async fn respond_to_prompts(
    orchestrator: Arc<Orchestrator>,
    run_id: RunId,
    mode: DecisionMode,
    mut prompts: mpsc::UnboundedReceiver<RequestId>,
) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    while let Some(request_id) = prompts.recv().await {
        let response = match mode {
            DecisionMode::Approve => UiResponse::approve(request_id),
            DecisionMode::Cancel => UiResponse::cancel(request_id),
            DecisionMode::Ignore => continue,
            DecisionMode::Prompt => {
                eprint!("Proceed with execution? [approve/cancel]: ");
                match stdin.next_line().await {
                    Ok(Some(line)) => UiResponse::button(request_id, parse_answer(&line)),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read answer");
                        break;
                    }
                }
            }
        };

        if let Err(e) = orchestrator.respond(&run_id, response) {
            eprintln!("Response rejected: {}", e);
        }
    }
}

/// Map a typed answer to a button id
fn parse_answer(line: &str) -> String {
    match line.trim().to_lowercase().as_str() {
        "" | "a" | "y" | "yes" | "approve" => "approve".to_string(),
        "c" | "n" | "no" | "cancel" => "cancel".to_string(),
        other => other.to_string(),
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let config = config::get()?;
    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;

    match &config.config_file {
        Some(path) => println!("# Config file: {}", path.display()),
        None => println!("# Config file: (none, using defaults)"),
    }
    print!("{}", yaml);

    Ok(())
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtrack main entry point - submit, follow and inspect automation runs.

use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use runtrack::config::{self, CliOptions, ResolvedConfig};
use runtrack::debug::copy_to_clipboard;
use runtrack::telemetry::{init_telemetry, CorrelationId, TelemetryConfig, GLOBAL_METRICS};
use runtrack::{
    AutomationClient, AutomationRequest, IntentResult, RegistryEvent, RunError, RunOutcome,
    RunRecord, RunStatus,
};

/// Exit code for a run still in progress when the wait budget ran out.
const EXIT_TIMEOUT: u8 = 2;

/// Runtrack - submit and follow automation runs.
#[derive(Parser)]
#[command(name = "runtrack")]
#[command(author, version, about = "Submit and follow automation runs", long_about = None)]
struct Cli {
    /// Base URL of the automation backend
    #[arg(long, global = true, env = "RUNTRACK_BASE_URL")]
    base_url: Option<String>,

    /// Give up waiting after this many milliseconds
    #[arg(long, global = true, env = "RUNTRACK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Initial polling interval in milliseconds
    #[arg(long, global = true, env = "RUNTRACK_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Poll only, never open the event stream
    #[arg(long, global = true)]
    no_stream: bool,

    /// Output format
    #[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
    output_format: OutputFormat,

    /// Suppress spinners and warnings
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Print request and run metrics to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a run
    Submit {
        /// Intent name, e.g. research.validate_idea
        intent: String,
        /// JSON object payload
        #[arg(default_value = "{}")]
        payload: String,
        /// Idempotency key (generated when omitted)
        #[arg(short, long)]
        key: Option<String>,
        /// Link this run to an existing correlation id
        #[arg(long, conflicts_with = "chain")]
        correlation_id: Option<String>,
        /// Start a new correlation chain with this run
        #[arg(long)]
        chain: bool,
        /// Wait for the run to finish and print its result
        #[arg(short, long)]
        wait: bool,
    },

    /// Fetch a run once
    Get {
        run_id: String,
    },

    /// Poll a run until it finishes
    Poll {
        run_id: String,
    },

    /// Follow a run's event stream, falling back to polling
    Watch {
        run_id: String,
        /// Registry key to track the run under
        #[arg(long)]
        label: Option<String>,
    },

    /// List recent runs
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Print a curl command that reproduces a submission
    Curl {
        intent: String,
        #[arg(default_value = "{}")]
        payload: String,
        /// Copy the command to the clipboard
        #[arg(long)]
        copy: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,
    /// Write an example config file in the current directory
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // A second subscriber (e.g. in tests) is not fatal.
    let _guard = init_telemetry(&TelemetryConfig::for_cli(cli.debug, cli.quiet)).ok();
    let show_metrics = cli.metrics;

    let code = match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    };

    if show_metrics {
        eprintln!("{}", GLOBAL_METRICS.snapshot().format_report());
    }
    code
}

fn report_error(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<RunError>() {
        Some(run_error) if run_error.is_timeout() => {
            eprintln!("{} {}", "⏳".yellow(), run_error.user_message().yellow());
            ExitCode::from(EXIT_TIMEOUT)
        }
        Some(run_error) => {
            eprintln!("{} {}", "✗".red(), run_error.user_message().red());
            ExitCode::FAILURE
        }
        None => {
            eprintln!("{} {:#}", "✗".red(), error);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let workspace_root = std::env::current_dir()?;

    if let Commands::Config {
        action: Some(ConfigAction::Init),
    } = cli.command
    {
        let path = config::init_config(&workspace_root, None)?;
        println!("Created config file: {}", path.display());
        return Ok(());
    }

    let cli_options = CliOptions {
        base_url: cli.base_url,
        timeout_ms: cli.timeout_ms,
        interval_ms: cli.interval_ms,
        no_stream: cli.no_stream.then_some(true),
    };
    let root = config::find_workspace_root(&workspace_root).unwrap_or(workspace_root);
    let resolved = config::load_config(&root, cli_options)?;
    let client = AutomationClient::from_config(&resolved)?;
    let out = Output {
        format: cli.output_format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Submit {
            intent,
            payload,
            key,
            correlation_id,
            chain,
            wait,
        } => {
            let mut request = AutomationRequest::new(intent.clone(), parse_payload(&payload)?);
            if let Some(key) = key {
                request = request.with_idempotency_key(key);
            }
            if chain {
                request = request.with_correlation_id(CorrelationId::new());
            } else if let Some(id) = correlation_id {
                request = request.with_correlation_id(id);
            }

            let submitted = client.submit(request).await?;
            if !wait {
                out.value(&serde_json::to_value(&submitted)?, || {
                    format!("{} {} ({})", "✓".green(), submitted.run_id.bold(), submitted.status)
                });
                return Ok(());
            }

            out.note(format!("Submitted {}", submitted.run_id.bold()));
            let result = follow(&client, &out, &submitted.run_id, || {
                client.watch_run(&submitted.run_id, None)
            })
            .await?;
            out.result(&intent, result);
        }
        Commands::Get { run_id } => {
            let record = client.get_run(&run_id).await?;
            out.value(&serde_json::to_value(&record)?, || describe_record(&record));
        }
        Commands::Poll { run_id } => {
            let result = follow(&client, &out, &run_id, || client.poll_run(&run_id)).await?;
            let intent = tracked_intent(&client, &run_id);
            out.result(&intent, result);
        }
        Commands::Watch { run_id, label } => {
            let result = follow(&client, &out, &run_id, || {
                client.watch_run(&run_id, label.as_deref())
            })
            .await?;
            let intent = label
                .as_deref()
                .and_then(|l| client.registry().get(l))
                .and_then(|r| r.intent().map(str::to_string))
                .unwrap_or_else(|| tracked_intent(&client, &run_id));
            out.result(&intent, result);
        }
        Commands::Recent { limit } => {
            let runs = client.recent_runs(limit).await?;
            out.value(&serde_json::to_value(&runs)?, || {
                if runs.is_empty() {
                    return "No recent runs".dimmed().to_string();
                }
                runs.iter().map(describe_record).collect::<Vec<_>>().join("\n")
            });
        }
        Commands::Curl {
            intent,
            payload,
            copy,
        } => {
            let request = AutomationRequest::new(intent, parse_payload(&payload)?);
            let command = client.curl_command(&request)?;
            println!("{}", command);
            if copy {
                if copy_to_clipboard(&command) {
                    out.note("Copied to clipboard".to_string());
                } else {
                    out.note("Clipboard unavailable".yellow().to_string());
                }
            }
        }
        Commands::Config { .. } => show_config(&resolved),
    }

    Ok(())
}

/// Run `wait` under a spinner fed by registry updates. Ctrl-C cancels.
async fn follow<F, Fut>(
    client: &AutomationClient,
    out: &Output,
    run_id: &str,
    wait: F,
) -> Result<Value, RunError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, RunError>>,
{
    let spinner = out.spinner(format!("Waiting for {}", run_id));
    let mut events = client.registry().subscribe();
    let progress = spinner.clone();
    let ticker = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::Updated { record, .. }) => {
                    progress.set_message(format!("{} {}", record.run_id, record.status));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = tokio::select! {
        result = wait() => result,
        _ = tokio::signal::ctrl_c() => Err(RunError::Cancelled),
    };

    ticker.abort();
    spinner.finish_and_clear();
    result
}

fn tracked_intent(client: &AutomationClient, run_id: &str) -> String {
    client
        .registry()
        .get(run_id)
        .and_then(|r| r.intent().map(str::to_string))
        .unwrap_or_default()
}

fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("Payload is not valid JSON: {}", e))
}

fn describe_record(record: &RunRecord) -> String {
    let status = match record.status {
        RunStatus::Succeeded => record.status.label().green(),
        RunStatus::Failed => record.status.label().red(),
        _ => record.status.label().yellow(),
    };
    let mut line = format!("{}  {}", record.run_id.bold(), status);
    if let Some(intent) = record.intent() {
        line.push_str(&format!("  {}", intent.cyan()));
    }
    if let Some(ts) = record.created_at {
        line.push_str(&format!("  {}", ts.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()));
    }
    if let RunOutcome::Failed(message) = record.outcome() {
        line.push_str(&format!("\n    {}", message.red()));
    }
    line
}

fn show_config(config: &ResolvedConfig) {
    println!("{}", "Resolved configuration".bright_blue().bold());
    println!("Base URL:        {}", config.base_url);
    println!("Request timeout: {}ms", config.request_timeout.as_millis());
    println!(
        "Polling:         {}ms x{} up to {}ms, timeout {}ms",
        config.poll.interval.as_millis(),
        config.poll.backoff_factor,
        config.poll.max_interval.as_millis(),
        config.poll.timeout.as_millis()
    );
    println!(
        "Stream:          {} ({})",
        if config.stream.enabled { "enabled" } else { "disabled" },
        config.stream.path_template
    );
    println!(
        "Idempotency:     prefix {:?}, {:?}",
        config.key_prefix, config.key_strategy
    );
    if !config.headers.is_empty() {
        let mut names: Vec<_> = config.headers.keys().collect();
        names.sort();
        println!("Headers:         {}", names.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "));
    }
}

/// Renders command output in the selected format.
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn value(&self, json: &Value, text: impl FnOnce() -> String) {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(json).unwrap_or_default())
            }
            OutputFormat::Text => println!("{}", text()),
        }
    }

    fn result(&self, intent: &str, result: Value) {
        if self.format == OutputFormat::Json {
            self.value(&result, String::new);
            return;
        }
        match IntentResult::from_detail(intent, result) {
            IntentResult::ResearchValidation(v) => {
                let verdict = v.verdict.as_deref().unwrap_or("no verdict");
                println!("{} score {} ({})", "✓".green(), v.score.to_string().bold(), verdict);
            }
            IntentResult::IdeaGeneration(g) => {
                println!("{} {} ideas", "✓".green(), g.ideas.len().to_string().bold());
                for idea in &g.ideas {
                    let title = idea
                        .get("title")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| idea.to_string());
                    println!("  • {}", title);
                }
            }
            IntentResult::Other(value) => {
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default())
            }
        }
    }

    fn note(&self, message: String) {
        if !self.quiet {
            eprintln!("{} {}", "→".cyan(), message);
        }
    }

    fn spinner(&self, message: String) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} {elapsed:.dim}") {
            spinner.set_style(style);
        }
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

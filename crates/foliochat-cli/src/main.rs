use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use foliochat_agents::{OrchestrationContext, OrchestrationPipeline, StreamDelta, TurnInput};
use foliochat_common::{ConversationTurn, RedactingWriter, SessionId};
use foliochat_config::{AppConfig, ConfigLoader, FetcherKind, LoggingConfig};
use foliochat_db::{SessionStateStore, SqliteSessionStore};
use foliochat_facts::HttpQuoteFetcher;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "foliochat", version)]
#[command(about = "Ask portfolio questions through failover-aware LLM providers")]
struct Cli {
    /// Config file (YAML, or TOML by extension). Defaults to ~/.foliochat/config.yml.
    #[arg(long, global = true, env = "FOLIOCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question in a (new or existing) session.
    Ask {
        message: String,
        /// Session to continue; a new one is created when omitted.
        #[arg(long)]
        session: Option<String>,
        /// JSON array of prior turns: [{"role":"user","content":"..."}].
        #[arg(long)]
        history: Option<PathBuf>,
        #[arg(long)]
        portfolio: Option<String>,
        /// Print the answer once complete instead of streaming tokens.
        #[arg(long, default_value_t = false)]
        no_stream: bool,
    },
    /// List configured providers and their health.
    Providers {
        /// Run every provider's health check first.
        #[arg(long, default_value_t = false)]
        probe: bool,
    },
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Print a stored session's state as JSON.
    Show { id: String },
    /// Most recently updated sessions.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new()?,
    };
    let config = loader.load().context("failed to load configuration")?;
    init_tracing(&config.logging, cli.json_logs);

    let db_path = config
        .database
        .path
        .clone()
        .unwrap_or_else(|| loader.default_db_path());

    match cli.command {
        Commands::Ask {
            message,
            session,
            history,
            portfolio,
            no_stream,
        } => {
            let store = open_store(&db_path)?;
            let mut input = TurnInput::new(
                session.map(SessionId::from).unwrap_or_default(),
                message,
            );
            input.portfolio_id = portfolio;
            if let Some(path) = history {
                input.history = read_history(&path)?;
            }
            ask(&config, store, input, !no_stream).await
        }
        Commands::Providers { probe } => providers(&config, probe).await,
        Commands::Session { command } => {
            let store = open_store(&db_path)?;
            match command {
                SessionCommand::Show { id } => show_session(&store, &id).await,
                SessionCommand::List { limit } => {
                    for session in store.list_sessions(limit)? {
                        println!(
                            "{}  turns={}  updated={}",
                            session.session_id, session.turn_count, session.updated_at
                        );
                    }
                    Ok(())
                }
            }
        }
    }
}

fn init_tracing(logging: &LoggingConfig, json_override: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json || json_override {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(RedactingWriter::stderr()),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(RedactingWriter::stderr()),
            )
            .init();
    }
}

fn open_store(path: &Path) -> Result<Arc<SqliteSessionStore>> {
    let store = SqliteSessionStore::open(path)
        .with_context(|| format!("failed to open session store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn read_history(path: &Path) -> Result<Vec<ConversationTurn>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read history file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("history file {} is not a JSON array of turns", path.display()))
}

fn build_pipeline(
    config: &AppConfig,
    store: Arc<SqliteSessionStore>,
) -> Result<OrchestrationPipeline> {
    let context = Arc::new(
        OrchestrationContext::from_config(config).context("failed to set up providers")?,
    );
    let mut pipeline = OrchestrationPipeline::new(context, store);
    for fetcher in &config.fetchers {
        match fetcher.kind {
            FetcherKind::Quotes => {
                let quotes = match fetcher.timeout_secs {
                    Some(secs) => HttpQuoteFetcher::with_timeout(
                        &fetcher.name,
                        &fetcher.base_url,
                        fetcher.api_key.clone(),
                        Duration::from_secs(secs),
                    ),
                    None => HttpQuoteFetcher::new(
                        &fetcher.name,
                        &fetcher.base_url,
                        fetcher.api_key.clone(),
                    ),
                };
                pipeline = pipeline.with_fetcher(Box::new(quotes));
            }
        }
    }
    Ok(pipeline)
}

async fn ask(
    config: &AppConfig,
    store: Arc<SqliteSessionStore>,
    input: TurnInput,
    stream: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config, store)?;
    info!(session = %input.session_id, "starting turn");

    let outcome = if stream {
        let buffer = pipeline.context().settings.stream_buffer;
        let (tx, mut rx) = mpsc::channel(buffer);
        let printer = tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(delta) = rx.recv().await {
                match delta {
                    StreamDelta::Text { text } => {
                        let _ = write!(stdout, "{text}");
                        let _ = stdout.flush();
                    }
                    StreamDelta::Restart { provider } => {
                        let _ = writeln!(stdout);
                        eprintln!("[provider failed mid-answer, restarting with {provider}]");
                    }
                }
            }
            let _ = writeln!(stdout);
        });

        let result = tokio::select! {
            result = pipeline.run_turn(&input, Some(&tx)) => result,
            _ = tokio::signal::ctrl_c() => bail!("interrupted"),
        };
        drop(tx);
        let _ = printer.await;
        result?
    } else {
        let outcome = pipeline.run_turn(&input, None).await?;
        println!("{}", outcome.content);
        outcome
    };

    if let Some(clarification) = &outcome.clarification {
        for option in &clarification.options {
            eprintln!("  --portfolio {}  ({})", option.id, option.name);
        }
    } else {
        eprintln!(
            "[session {} | provider {} | tokens {} in / {} out]",
            input.session_id, outcome.provider_used, outcome.usage.input, outcome.usage.output
        );
    }
    Ok(())
}

async fn providers(config: &AppConfig, probe: bool) -> Result<()> {
    let context = OrchestrationContext::from_config(config).context("failed to set up providers")?;
    if context.registry.is_empty() {
        println!("no providers configured");
        return Ok(());
    }

    let probes = if probe {
        context.probe_all().await
    } else {
        Vec::new()
    };

    for registered in context.registry.iter() {
        let d = &registered.descriptor;
        let health = context.health.snapshot(&d.name).unwrap_or_default();
        let probe_status = probes
            .iter()
            .find(|p| p.provider == d.name)
            .map(|p| if p.healthy { " probe=ok" } else { " probe=failed" })
            .unwrap_or("");
        println!(
            "{:<16} {:<10} {:<28} state={:?} failures={}{} streaming={} tools={} ${}/${} per 1M",
            d.name,
            format!("{:?}", d.kind).to_lowercase(),
            d.model,
            health.state,
            health.consecutive_failures,
            probe_status,
            d.supports_streaming,
            d.supports_tools,
            d.pricing.input_per_million,
            d.pricing.output_per_million,
        );
    }
    Ok(())
}

async fn show_session(store: &SqliteSessionStore, id: &str) -> Result<()> {
    let Some(state) = store.load(&SessionId::from(id)).await? else {
        bail!("session '{id}' not found");
    };
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

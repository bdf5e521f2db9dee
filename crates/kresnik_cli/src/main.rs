use anyhow::{Context, Result};
use clap::Parser;
use kresnik_core::{KresnikConfig, LoggingNetwork, Network};
use kresnik_limbic::{accept_directions, DirectionsReply, HeartbeatScheduler, RandomDice};
use kresnik_memory::SqliteStore;
use kresnik_reasoning::providers::build_client;
use kresnik_reasoning::{Mind, Stimulus, TriadOutcome};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long a tick already in flight may take to finish after shutdown.
const HEARTBEAT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "kresnik", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "kresnik.toml")]
    config: PathBuf,

    /// Path to the state database (overrides the config)
    #[arg(short, long)]
    db: Option<String>,

    /// Generation provider: anthropic, openai or mock
    #[arg(short, long)]
    provider: Option<String>,

    /// Founding vision document (overrides the config)
    #[arg(long)]
    vision: Option<PathBuf>,

    /// Talk only; do not start the heartbeat
    #[arg(long)]
    no_heartbeat: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "KRESNIK_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = KresnikConfig::load_or_default(&args.config);
    if let Some(db) = args.db {
        config.organism.db_path = db;
    }
    if let Some(provider) = args.provider {
        config.llm.provider = provider;
    }
    if let Some(vision) = args.vision {
        config.organism.vision_path = Some(vision.display().to_string());
    }

    info!("Opening state at {}...", config.organism.db_path);
    let store = SqliteStore::open(&config.organism.db_path).await?;
    let llm = build_client(&config.llm)?;
    let network: Arc<dyn Network> = Arc::new(LoggingNetwork::new());
    let vision = match config.organism.vision_path.as_deref() {
        Some(path) => load_vision(Path::new(path)).await?,
        None => None,
    };
    let period = Duration::from_secs(config.organism.tick_interval_secs.max(1));
    let mind = Arc::new(Mind::new(store, llm, network, config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = if args.no_heartbeat {
        None
    } else {
        let mut scheduler = HeartbeatScheduler::new(Arc::clone(&mind), Box::new(RandomDice::new()));
        if let Some(vision) = vision {
            scheduler = scheduler.with_vision(vision);
        }
        Some(tokio::spawn(scheduler.run(period, shutdown_rx)))
    };

    let name = mind.entity_name().await?;
    println!("{name} is awake. Type to talk, /directions <text> to answer a request for directions, Ctrl-D to leave.");

    let lines = BufReader::new(tokio::io::stdin()).lines();
    converse(&mind, &name, lines, shutdown_signal()).await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = heartbeat {
        if tokio::time::timeout(HEARTBEAT_GRACE, handle).await.is_err() {
            warn!("Heartbeat did not stop in time");
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    // stdout belongs to the conversation
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// A missing vision file is not an error: the entity grows without one.
async fn load_vision(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Ok(None),
        Ok(text) => {
            info!("Loaded founding vision from {}", path.display());
            Ok(Some(text))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Vision file {} not found, growing without one", path.display());
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read vision file: {}", path.display())),
    }
}

/// Answer lines until EOF or `shutdown`. A failed line is logged and the
/// conversation goes on; only a broken input stream ends it early.
async fn converse<R>(mind: &Mind, name: &str, mut lines: Lines<R>, shutdown: impl Future<Output = ()>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if let Err(e) = handle_line(mind, name, line.trim()).await {
                            error!("Failed to handle input: {:#}", e);
                            println!("\n[{name} lost that thought]\n");
                        }
                    }
                    None => return Ok(()),
                }
            }
            _ = &mut shutdown => return Ok(()),
        }
    }
}

async fn handle_line(mind: &Mind, name: &str, line: &str) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }

    if let Some(text) = line.strip_prefix("/directions") {
        match accept_directions(mind, text).await? {
            DirectionsReply::Accepted => println!("[{name} has its directions]"),
            DirectionsReply::Ignored => println!("[{name} is not asking for directions]"),
            DirectionsReply::Busy => println!("[{name} is busy, try again in a moment]"),
        }
        return Ok(());
    }

    let stimulus = Stimulus::conversation("stdin", line).with_channel("stdin");
    match mind.run_triad(&stimulus).await? {
        TriadOutcome::Completed(report) => match report.outward_content() {
            Some(text) => println!("\n{name}: {text}\n"),
            None => println!("\n[{name} stays silent]\n"),
        },
        TriadOutcome::Aborted { phase } => {
            warn!(%phase, "Triad aborted");
            println!("\n[{name} stays silent]\n");
        }
        TriadOutcome::Busy => println!("\n[{name} is busy, try again in a moment]\n"),
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl-C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kresnik_core::MemoryNetwork;
    use kresnik_reasoning::providers::MockProvider;

    #[tokio::test]
    async fn test_failed_line_does_not_end_conversation() {
        let store = SqliteStore::open(":memory:").await.unwrap();
        let mind = Mind::new(
            store,
            Arc::new(MockProvider::new("mock")),
            Arc::new(MemoryNetwork::new()),
            KresnikConfig::default(),
        );
        // Every store call fails from here on
        mind.store().close().await;

        let input: &[u8] = b"/directions grow slowly\n/directions grow again\n";
        let result = converse(&mind, "Kresnik", input.lines(), std::future::pending()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_conversation_ends_on_shutdown() {
        let store = SqliteStore::open(":memory:").await.unwrap();
        let mind = Mind::new(
            store,
            Arc::new(MockProvider::new("mock")),
            Arc::new(MemoryNetwork::new()),
            KresnikConfig::default(),
        );
        let (_tx, rx) = tokio::io::duplex(64);
        let lines = BufReader::new(rx).lines();
        let result = tokio::time::timeout(Duration::from_secs(5), converse(&mind, "Kresnik", lines, async {})).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}

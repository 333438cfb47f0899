//! vigil - real-time alert server.
//!
//! Evaluates alert rules against sampled metrics and pushes alerts to
//! WebSocket subscribers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vigil_alerts::{ActionRequest, AlertEngine};
use vigil_server::{AlertServer, VigilConfig, configured_sources, register_rules};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Real-time alert engine with WebSocket delivery")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alert server
    Run {
        /// Path to config file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the bind address
        #[arg(long, env = "VIGIL_BIND")]
        bind: Option<SocketAddr>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "vigil.json")]
        output: PathBuf,
    },

    /// Validate a config file
    CheckConfig {
        /// Path to config file
        #[arg(short, long, default_value = "vigil.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let json = cli.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    match cli.command {
        Commands::Run { config, bind } => {
            run_server(config, bind).await?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }

        Commands::CheckConfig { config } => {
            check_config(&config)?;
        }
    }

    Ok(())
}

async fn run_server(config_path: Option<PathBuf>, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => {
            info!(config = %path.display(), "loading config");
            VigilConfig::load(path)?
        }
        None => VigilConfig::default(),
    };
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }

    let engine = Arc::new(AlertEngine::new(config.engine.clone()));
    register_rules(&engine, config.effective_rules());

    let (sources, ingest) = configured_sources(&config.probes, &engine);
    let handle = engine.start(sources)?;
    let request_logger = spawn_request_logger(engine.action_requests());

    let bind_addr = config.server.bind_addr;
    let mut server = AlertServer::new(config.server, Arc::clone(&engine));
    if let Some(ingest) = ingest {
        info!("accepting reportMetrics for every category");
        server = server.with_ingest(ingest);
    }
    let server = Arc::new(server);
    let serving = Arc::clone(&server);
    let mut serve_task = tokio::spawn(async move { serving.serve(bind_addr).await });
    info!(addr = %bind_addr, "WebSocket endpoint: ws://{}/", bind_addr);

    let served = tokio::select! {
        result = &mut serve_task => Some(result),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutting down");
            None
        }
    };

    let served = match served {
        Some(result) => result,
        None => {
            server.shutdown();
            serve_task.await
        }
    };

    handle.shutdown().await;
    request_logger.abort();

    served??;
    info!("stopped");
    Ok(())
}

/// Logs every custom action clients request.
fn spawn_request_logger(mut requests: broadcast::Receiver<ActionRequest>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match requests.recv().await {
                Ok(request) => info!(
                    action = %request.action,
                    alert_id = %request.alert.id,
                    alert_type = %request.alert.category,
                    client_id = ?request.client_id.map(|id| id.to_string()),
                    "action requested"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "action request log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    VigilConfig::sample().save(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the rules and bind address, then run:");
    println!("  vigil run --config {}", output.display());

    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = VigilConfig::load(path)?;
    let rules = config.effective_rules();

    println!("{} is valid", path.display());
    println!("  bind address:        {}", config.server.bind_addr);
    println!("  max connections:     {}", config.server.max_connections);
    println!("  evaluation interval: {}s", config.engine.evaluation_interval_secs);
    println!("  sweep interval:      {}s", config.engine.sweep_interval_secs);
    println!(
        "  metric reports:      {}",
        if config.probes.ingest { "accepted" } else { "off" }
    );
    println!(
        "  rules:               {}{}",
        rules.len(),
        if config.rules.is_none() { " (built-in)" } else { "" }
    );
    for rule in &rules {
        println!(
            "    {} [{}] {} {} {}",
            rule.id,
            rule.category,
            rule.metric,
            rule.operator.as_symbol(),
            rule.threshold
        );
    }

    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use tollgate::admission::RequestContext;
use tollgate::config::TollgateConfig;
use tollgate::ratelimit::{MemoryStore, SystemClock};

/// Drive the admission controller for a simulated client.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client IP address of the simulated requests
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Authenticated user id, used by the `auth_id` identity source
    #[arg(long)]
    user_id: Option<String>,

    /// Request attributes as NAME=VALUE, used by the `custom` identity source
    #[arg(long = "attribute", value_parser = parse_attribute)]
    attributes: Vec<(String, String)>,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 1)]
    requests: u32,

    /// Delay between requests in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays one JSON response per line.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(args.config.as_deref())?;
    let policy = config.window_policy()?;
    let renderer = config.response_renderer(&policy)?;
    info!(
        periods = policy.len(),
        failure_policy = ?config.limiter.failure_policy,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let sweeper = config
        .limiter
        .sweep_interval()
        .map(|interval| store.clone().spawn_sweeper(interval));

    let controller = config.build_controller(store, Arc::new(SystemClock::new()))?;

    let mut ctx = RequestContext::from_ip(args.ip);
    if let Some(user_id) = args.user_id {
        ctx = ctx.with_user_id(user_id);
    }
    for (name, value) in args.attributes {
        ctx = ctx.with_attribute(name, value);
    }
    let identity = config.identity_resolver().resolve(&ctx)?;
    info!(identity = %identity, requests = args.requests, "Sending requests");

    for i in 0..args.requests {
        if i > 0 && args.interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
        let decision = controller.admit(&identity).await;
        let response = renderer.render(&decision);
        println!("{}", serde_json::to_string(&response)?);
    }

    if let Some(handle) = sweeper {
        handle.abort();
    }

    info!("Tollgate stopped");
    Ok(())
}

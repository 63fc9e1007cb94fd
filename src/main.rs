use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cita_watch::chrome::ChromeBrowser;
use cita_watch::{FlowVariant, Monitor, MonitorConfig, MonitorResult, Notifier};

/// Check a consular appointment-booking site once and push an ntfy alert
/// if slots are open (or the check cannot complete).
#[derive(Debug, Parser)]
#[command(name = "cita-watch", version, about)]
struct Args {
    /// JSON config file; absent fields fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Flow variant to run.
    #[arg(long, value_enum)]
    variant: Option<FlowVariant>,

    /// Retry budget, overriding the variant's default.
    #[arg(long)]
    attempts: Option<u32>,

    /// ntfy topic to publish to.
    #[arg(long)]
    topic: Option<String>,

    /// Landing page URL.
    #[arg(long)]
    url: Option<String>,

    /// Show the browser window instead of running headless.
    #[arg(long)]
    no_headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cita_watch=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    config.apply_env();
    if let Some(variant) = args.variant {
        config.variant = variant;
    }
    if let Some(attempts) = args.attempts {
        config.max_attempts = Some(attempts);
    }
    if let Some(topic) = args.topic {
        config.ntfy_topic = topic;
    }
    if let Some(url) = args.url {
        config.start_url = url;
    }
    if args.no_headless {
        config.headless = false;
    }

    info!(variant = ?config.variant, attempts = config.attempts(), "starting monitoring run");

    let variant = config.variant;
    let notifier = Notifier::new(config.ntfy_endpoint.clone(), config.ntfy_topic.clone());

    // The whole browser flow is blocking; keep it off the async runtime.
    let monitor = Monitor::new(&config, ChromeBrowser::new(config.headless));
    let result = tokio::task::spawn_blocking(move || monitor.run_once()).await?;

    match &result {
        MonitorResult::SlotsFound(dates) => {
            info!(dates = %dates.join(", "), "appointment slots available")
        }
        MonitorResult::NoSlots => info!("no appointment slots right now"),
        MonitorResult::ExhaustedRetries { attempts, last } => {
            info!(attempts, %last, "monitoring run failed")
        }
    }

    notifier.announce(&result, variant).await;

    Ok(())
}

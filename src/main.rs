//! peak-watch - terminal status for the CoinGlass bull market peak indicators
//!
//! 1. Loads settings and the stored API key / refresh rate
//! 2. Refreshes on a fixed interval and whenever Enter is pressed
//! 3. Prints the hold/sell split and the triggered indicators

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use peak_watch::config::{refresh_interval, Settings, SettingsStore};
use peak_watch::{status, CoinGlassClient, RefreshOutcome, Refresher};

#[derive(Debug, Parser)]
#[command(name = "peak-watch", version, about = "Watch the CoinGlass bull market peak indicators")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh on the configured interval until interrupted (default)
    Run,
    /// Refresh once and print the result
    Once,
    /// Store the CoinGlass API key
    SetApiKey { key: String },
    /// Store the refresh interval in minutes
    SetRefreshRate { minutes: u64 },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(settings.tracing_level())
        .init();

    let store = settings.store();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&settings, store).await,
        Command::Once => once(&settings, &store).await,
        Command::SetApiKey { key } => {
            store.save_api_key(&key).await?;
            info!("API Key updated.");
            Ok(())
        }
        Command::SetRefreshRate { minutes } => {
            store.save_refresh_rate(minutes).await?;
            info!("Refresh rate updated to {} minutes.", minutes);
            Ok(())
        }
        Command::ShowConfig => {
            show_config(&settings, &store).await;
            Ok(())
        }
    }
}

async fn build_refresher(settings: &Settings, store: &SettingsStore) -> anyhow::Result<Refresher> {
    let client = CoinGlassClient::new(&settings.api_url)?
        .with_retry_policy(settings.retry_policy())
        .with_request_timeout(settings.request_timeout());

    Ok(Refresher::new(Arc::new(client), store.load_api_key().await))
}

async fn run(settings: &Settings, store: SettingsStore) -> anyhow::Result<()> {
    let refresher = Arc::new(build_refresher(settings, &store).await?);
    let minutes = store.load_refresh_rate().await;

    info!(
        "Starting peak-watch, refreshing every {} min. Press Enter to refresh now.",
        minutes
    );

    // First tick completes immediately, giving the initial refresh
    let mut ticker = interval(refresh_interval(minutes));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("Scheduled update triggered.");
                spawn_refresh(&refresher, &store);
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    info!("Manual refresh triggered by user.");
                    spawn_refresh(&refresher, &store);
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Stopped reading stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping peak-watch.");
                break;
            }
        }
    }

    Ok(())
}

/// Refresh in the background; overlapping requests are dropped by the guard
fn spawn_refresh(refresher: &Arc<Refresher>, store: &SettingsStore) {
    let refresher = Arc::clone(refresher);
    let store = store.clone();

    tokio::spawn(async move {
        // Pick up a key stored since startup
        refresher.set_api_key(store.load_api_key().await).await;

        if let RefreshOutcome::Completed(report) = refresher.refresh().await {
            println!("{}\n", status::render(&report));
        }
    });
}

async fn once(settings: &Settings, store: &SettingsStore) -> anyhow::Result<()> {
    let refresher = build_refresher(settings, store).await?;

    match refresher.refresh().await {
        RefreshOutcome::Completed(report) => {
            println!("{}", status::render(&report));
            report.result.map(|_| ()).map_err(anyhow::Error::from)
        }
        RefreshOutcome::Skipped => Ok(()),
    }
}

async fn show_config(settings: &Settings, store: &SettingsStore) {
    let key = match store.load_api_key().await {
        Some(key) => {
            let tail: String = key.chars().skip(key.chars().count().saturating_sub(4)).collect();
            format!("****{}", tail)
        }
        None => "(not set)".to_string(),
    };

    println!("API URL:          {}", settings.api_url);
    println!("API key:          {}", key);
    println!("API key file:     {}", settings.api_key_file.display());
    println!("Refresh rate:     {} min", store.load_refresh_rate().await);
    println!("Refresh file:     {}", settings.refresh_rate_file.display());
    println!("Request timeout:  {}s", settings.request_timeout_secs);
    println!(
        "Retries:          {} (base delay {}ms)",
        settings.max_retries, settings.base_delay_ms
    );
}

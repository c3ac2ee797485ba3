use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use kitebot::api::{KiteClient, KiteSession};
use kitebot::config::{load_credentials, load_trade_settings, AppConfig};
use kitebot::execution::{OrderJournal, PositionManager};
use kitebot::indicators::calculate_ema;
use kitebot::models::TradeSetting;
use kitebot::persistence::save_snapshot;
use kitebot::scheduler::{Scheduler, SchedulerSettings, SystemClock};
use kitebot::strategy::ThreeCandleStrategy;
use kitebot::Broker;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "kitebot")]
#[command(about = "Intraday three-candle EMA trading bot for Kite Connect", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = AppConfig::DEFAULT_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store today's session token
    Login,

    /// Refresh the instrument list and save it to CSV
    Instruments,

    /// Write candles and EMA for every watched symbol to {SYMBOL}_data.csv
    Snapshot {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Print the last traded price of a symbol
    Quote { symbol: String },

    /// Run the trading loop until Ctrl+C (default)
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Login => login(&config).await,
        Command::Instruments => instruments(&config).await,
        Command::Snapshot { out } => snapshot(&config, &out).await,
        Command::Quote { symbol } => quote(&config, &symbol).await,
        Command::Run => run(&config).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kitebot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ============================================================================
// Client setup
// ============================================================================

fn create_client(config: &AppConfig) -> anyhow::Result<KiteClient> {
    let credentials = load_credentials(&config.files.credentials)?;
    KiteClient::new(credentials, config.broker.clone())
}

/// Client with today's persisted session
fn create_session_client(config: &AppConfig) -> anyhow::Result<KiteClient> {
    let mut client = create_client(config)?;
    let session = KiteSession::load(&config.files.session)
        .context("No saved session, run `kitebot login` first")?;

    if !session.is_valid_on(Local::now().date_naive()) {
        anyhow::bail!(
            "Session from {} has expired, run `kitebot login` again",
            session.created_on
        );
    }

    tracing::info!(user_id = %session.user_id, "Using saved session");
    client.set_session(session);
    Ok(client)
}

/// Refresh instruments; a degraded refresh is reported but not fatal
async fn load_instruments(client: &KiteClient, config: &AppConfig) {
    let refresh = client.sync_instruments(&config.files.instruments).await;

    if refresh.is_degraded() {
        tracing::warn!(
            "⚠️  Instrument refresh degraded to fallback list ({:?}), historical data requests will likely fail",
            refresh
        );
    }
}

fn load_watch_list(client: &KiteClient, config: &AppConfig) -> anyhow::Result<Vec<TradeSetting>> {
    let settings = load_trade_settings(&config.files.trade_settings)?;
    let watch_list = client.instruments().watch_list(&settings);

    if watch_list.is_empty() {
        anyhow::bail!("No trade setting symbol matched an instrument");
    }
    Ok(watch_list)
}

// ============================================================================
// Commands
// ============================================================================

async fn login(config: &AppConfig) -> anyhow::Result<()> {
    let mut client = create_client(config)?;

    println!("Open this URL in a browser and sign in:\n\n  {}\n", client.login_url());
    println!("Paste the request_token from the redirect URL:");

    let mut request_token = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut request_token)
        .context("Failed to read request token")?;

    let session = client
        .generate_session(&request_token, Local::now().date_naive())
        .await?;
    session.save(&config.files.session)?;

    tracing::info!("✅ Logged in as {}", session.user_id);
    Ok(())
}

async fn instruments(config: &AppConfig) -> anyhow::Result<()> {
    let client = create_session_client(config)?;
    let refresh = client.sync_instruments(&config.files.instruments).await;

    if refresh.is_degraded() {
        anyhow::bail!("Instrument refresh failed and no saved instruments were found");
    }
    tracing::info!("Instrument refresh: {:?}", refresh);
    Ok(())
}

async fn snapshot(config: &AppConfig, out: &Path) -> anyhow::Result<()> {
    let client = create_session_client(config)?;
    load_instruments(&client, config).await;
    let watch_list = load_watch_list(&client, config)?;

    let to = Local::now().naive_local();
    let from = to - chrono::Duration::hours(config.polling.lookback_hours);
    let mut saved = 0;

    for (i, setting) in watch_list.iter().enumerate() {
        tracing::info!("[{}/{}] Processing {}", i + 1, watch_list.len(), setting.symbol);

        let candles = match client
            .fetch_candles(&setting.symbol, setting.timeframe, from, to)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!("  ✗ {}: {}", setting.symbol, e);
                continue;
            }
        };

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema = calculate_ema(&closes, setting.ema_period);

        match save_snapshot(out, &setting.symbol, &candles, &ema) {
            Ok(path) => {
                tracing::info!("  ✓ {} candles -> {}", candles.len(), path.display());
                saved += 1;
            }
            Err(e) => tracing::warn!("  ✗ {}: {}", setting.symbol, e),
        }
    }

    tracing::info!("Saved {}/{} snapshots", saved, watch_list.len());
    Ok(())
}

async fn quote(config: &AppConfig, symbol: &str) -> anyhow::Result<()> {
    let client = create_session_client(config)?;
    let price = client.get_ltp(symbol).await?;
    println!("{} {:.2}", symbol, price);
    Ok(())
}

async fn run(config: &AppConfig) -> anyhow::Result<()> {
    tracing::info!("🚀 kitebot starting");

    let client = create_session_client(config)?;
    load_instruments(&client, config).await;
    let watch_list = load_watch_list(&client, config)?;

    tracing::info!("📊 Watching {} symbols:", watch_list.len());
    for setting in &watch_list {
        tracing::info!(
            "    - {} qty={} {} EMA({})",
            setting.symbol,
            setting.quantity,
            setting.timeframe,
            setting.ema_period
        );
    }

    let settings = SchedulerSettings::from_config(config)?;
    let positions = PositionManager::new(OrderJournal::new(&config.files.order_log));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("⚠️  Received Ctrl+C, finishing current step...");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut scheduler = Scheduler::new(
        Arc::new(client),
        Box::new(ThreeCandleStrategy::new()),
        positions,
        watch_list,
        settings,
    )
    .with_shutdown(shutdown_rx);

    let cycles = scheduler.run(&SystemClock).await;

    let open = scheduler.positions().open_positions();
    if !open.is_empty() {
        tracing::warn!("{} positions still open at shutdown:", open.len());
        for p in open {
            tracing::warn!(
                "    - {} {} @ {:.2} (SL {:.2}, target {:.2})",
                p.direction,
                p.symbol,
                p.entry_price,
                p.stop_loss,
                p.target
            );
        }
    }

    tracing::info!("👋 kitebot stopped after {} cycles", cycles);
    Ok(())
}

use std::sync::Arc;

use clap::Parser;
use tokio::time::{interval, Duration};

use fxbot::config::AppConfig;
use fxbot::engine::{Engine, RiskLevel};
use fxbot::execution::{ExecutionClient, PaperBroker};
use fxbot::feed::{FeedScenario, MarketFeed, SyntheticFeed};
use fxbot::persistence::RedisStore;
use fxbot::Result;

#[derive(Parser, Debug)]
#[command(name = "fxbot", about = "Regime-driven automated trading engine")]
struct Cli {
    /// Configuration file (TOML), overridable via FXBOT_* env vars
    #[arg(long, default_value = "fxbot")]
    config: String,

    /// Restrict trading to these instruments
    #[arg(long, value_delimiter = ',')]
    instruments: Option<Vec<String>>,

    /// Override the configured starting balance
    #[arg(long)]
    balance: Option<f64>,

    /// Risk appetite: conservative, standard or aggressive
    #[arg(long)]
    risk_level: Option<String>,

    /// Seed for the synthetic paper-trading feed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(balance) = cli.balance {
        config.starting_balance = balance;
        config.validate()?;
    }

    tracing::info!("fxbot starting");
    tracing::info!("  balance: ${:.2}", config.starting_balance);
    tracing::info!("  instruments: {}", config.instruments.len());
    for instrument in &config.instruments {
        tracing::info!("    - {}", instrument.symbol);
    }
    tracing::info!(
        "  strategies: {}",
        config
            .strategies
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut store = connect_to_redis(config.redis_url.as_deref()).await;
    if let Some(store) = store.as_mut() {
        match store.load_snapshot().await {
            Ok(Some(snapshot)) => tracing::info!(
                equity = format!("{:.2}", snapshot.equity),
                daily_pnl = format!("{:.2}", snapshot.daily_realized_pnl),
                "previous ledger snapshot loaded"
            ),
            Ok(None) => tracing::info!("no previous ledger snapshot in archive"),
            Err(e) => tracing::warn!("failed to load ledger snapshot: {}", e),
        }

        // Recap of the trades archived since the last session
        for instrument in &config.instruments {
            match store.load_positions(&instrument.symbol, 24).await {
                Ok(closed) if !closed.is_empty() => {
                    let pnl: f64 = closed.iter().map(|p| p.realized_pnl).sum();
                    tracing::info!(
                        instrument = %instrument.symbol,
                        trades = closed.len(),
                        pnl = format!("{:.2}", pnl),
                        "archived trades from the last 24h"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    instrument = %instrument.symbol,
                    "failed to load archived positions: {}",
                    e
                ),
            }
        }
    }

    // Paper mode: synthetic feed and broker stand in for the platform
    // connector
    let feed = Arc::new(SyntheticFeed::new(cli.seed));
    let broker = Arc::new(PaperBroker::new(config.starting_balance));

    let scenarios = [
        FeedScenario::Uptrend,
        FeedScenario::Ranging,
        FeedScenario::Downtrend,
        FeedScenario::Volatile,
    ];
    for (i, instrument) in config.instruments.iter().enumerate() {
        let base_price = match instrument.pip_size {
            p if p >= 0.01 => 150.0,
            _ => 1.1000,
        };
        feed.register(
            instrument,
            scenarios[i % scenarios.len()],
            base_price,
            5,
        );
    }

    let engine = Arc::new(Engine::from_config(
        &config,
        feed.clone() as Arc<dyn MarketFeed>,
        broker.clone() as Arc<dyn ExecutionClient>,
        store,
    ));

    let risk_level = cli
        .risk_level
        .as_deref()
        .map(|level| match level {
            "conservative" => Ok(RiskLevel::Conservative),
            "standard" => Ok(RiskLevel::Standard),
            "aggressive" => Ok(RiskLevel::Aggressive),
            other => Err(format!("unknown risk level '{other}'")),
        })
        .transpose()?;

    let handle = engine.handle();
    handle.start_trading(cli.instruments.as_deref(), risk_level);

    // Market data loop: advance the synthetic series and mirror quotes into
    // the paper broker so fills track the feed
    let feed_task = {
        let feed = feed.clone();
        let broker = broker.clone();
        let instruments = config.instruments.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                feed.tick();
                for instrument in &instruments {
                    if let Ok(quote) = feed.quote(&instrument.symbol).await {
                        broker.set_price(&instrument.symbol, quote.mid());
                    }
                }
            }
        })
    };

    let engine_task = tokio::spawn(engine.run());

    tracing::info!("engine running, press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
            handle.stop_trading();
        }
        result = engine_task => {
            tracing::error!("engine loop exited: {:?}", result);
        }
        result = feed_task => {
            tracing::error!("feed loop exited: {:?}", result);
        }
    }

    tracing::info!("fxbot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fxbot=info".into()),
        )
        .init();
}

async fn connect_to_redis(redis_url: Option<&str>) -> Option<RedisStore> {
    let url = redis_url?;

    match RedisStore::new(url).await {
        Ok(store) => {
            tracing::info!("position archive enabled at {}", url);
            Some(store)
        }
        Err(e) => {
            tracing::warn!("failed to connect to Redis ({}), continuing without archive", e);
            None
        }
    }
}

//! BANWATCH: Steam ban and CS2 inventory reporter for Discord channels.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the Steam clients, caches and Discord transport, then runs the
//! periodic channel scan with graceful shutdown.
//!
//! Flags:
//!   --refresh-caches   re-query every cached price and inventory before
//!                      the first scan

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use banwatch::config::AppConfig;
use banwatch::dashboard::{spawn_dashboard, DashboardState};
use banwatch::discord::DiscordClient;
use banwatch::engine::Scanner;
use banwatch::steam::{
    BanResolver, HttpGet, InventoryFetcher, PriceCache, ReqwestHttp, RetryPolicy, SteamGates,
};
use banwatch::storage;

const BANNER: &str = r#"
 ___   _   _  ___      ___ _____ ___ _  _
| _ ) /_\ | \| \ \    / /_\_   _/ __| || |
| _ \/ _ \| .` |\ \/\/ / _ \| || (__| __ |
|___/_/ \_\_|\_| \_/\_/_/ \_\_| \___|_||_|

  Steam ban + CS2 inventory reporter
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("BANWATCH_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        channels = cfg.discord.channel_ids.len(),
        scan_interval_secs = cfg.bot.scan_interval_secs,
        refresh_interval_secs = cfg.bot.refresh_interval_secs,
        backend = ?cfg.cache.backend,
        "BANWATCH starting up"
    );

    let refresh_caches = std::env::args().any(|a| a == "--refresh-caches");

    // -- Secrets ---------------------------------------------------------

    let steam_key = AppConfig::resolve_secret(&cfg.steam.api_key_env)?;
    let discord_token = AppConfig::resolve_secret(&cfg.discord.token_env)?;

    if cfg.discord.channel_ids.is_empty() {
        warn!("No discord.channel_ids configured; scans will do nothing");
    }

    // -- Steam clients ---------------------------------------------------

    let http: Arc<dyn HttpGet> = Arc::new(ReqwestHttp::new()?);
    let gates = SteamGates::from_config(&cfg.steam);
    let policy = RetryPolicy::from_config(&cfg.steam);
    if policy.price_max_attempts == 0 {
        warn!("steam.price_max_attempts = 0: blocked price lookups retry forever");
    }

    let stores = storage::open_caches(&cfg.cache).await?;

    let prices = Arc::new(PriceCache::new(
        stores.prices,
        http.clone(),
        gates.market.clone(),
        &cfg.steam.community_base,
        cfg.steam.currency,
        cfg.steam.app_id,
        cfg.bot.price_ttl_secs(),
        policy.clone(),
    ));

    let inventory = Arc::new(InventoryFetcher::new(
        http.clone(),
        gates.inventory.clone(),
        prices.clone(),
        stores.inventory,
        &cfg.steam.community_base,
        cfg.bot.inventory_ttl_secs(),
        policy.clone(),
    ));

    let resolver = Arc::new(BanResolver::new(
        http,
        gates.web_api.clone(),
        &cfg.steam.api_base,
        steam_key,
        policy,
    ));

    if refresh_caches {
        let refreshed_prices = prices.refresh_all().await;
        let refreshed_inventories = inventory
            .refresh_all(cfg.steam.app_id, cfg.steam.context_id)
            .await;
        info!(
            prices = refreshed_prices,
            inventories = refreshed_inventories,
            "Cache refresh complete"
        );
    }

    // -- Discord + dashboard ---------------------------------------------

    let discord = DiscordClient::connect(&cfg.discord.api_base, &discord_token)
        .await
        .context("Failed to connect to Discord")?;

    let scanner = Scanner::new(
        resolver,
        inventory,
        cfg.steam.app_id,
        cfg.steam.context_id,
        cfg.bot.history_limit,
    );

    let dashboard = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new());
        spawn_dashboard(state.clone(), cfg.dashboard.port);
        Some(state)
    } else {
        None
    };

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.bot.scan_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.bot.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let reports = scanner.run(&discord, &cfg.discord.channel_ids).await;
                let found: usize = reports.iter().map(|r| r.total_found).sum();
                let failed: usize = reports.iter().map(|r| r.embeds_failed).sum();
                info!(channels = reports.len(), accounts = found, failed_embeds = failed, "Scan complete");

                if let Some(state) = &dashboard {
                    state.record(reports).await;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("BANWATCH shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `LOG_DEBUG=1` selects debug output
/// for this crate. `BANWATCH_LOG_JSON` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = match std::env::var("LOG_DEBUG").as_deref() {
        Ok("1") | Ok("true") => "banwatch=debug",
        _ => "banwatch=info",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json_logging = std::env::var("BANWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

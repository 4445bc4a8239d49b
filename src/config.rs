//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (Steam Web API key, Discord bot token) are referenced by
//! env-var name in the config and resolved at runtime into
//! `SecretString`s so they never end up in logs.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub steam: SteamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BotConfig {
    /// Period between channel scans.
    pub scan_interval_secs: u64,
    /// Base cache refresh interval. The inventory TTL equals this; the
    /// price TTL is `price_ttl_multiplier` times this.
    pub refresh_interval_secs: u64,
    pub price_ttl_multiplier: u64,
    /// How many recent messages to read (and clean up) per channel.
    pub history_limit: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 3600,
            refresh_interval_secs: 3600,
            price_ttl_multiplier: 6,
            history_limit: 100,
        }
    }
}

impl BotConfig {
    pub fn inventory_ttl_secs(&self) -> i64 {
        self.refresh_interval_secs as i64
    }

    pub fn price_ttl_secs(&self) -> i64 {
        (self.refresh_interval_secs * self.price_ttl_multiplier) as i64
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SteamConfig {
    /// Name of the env var holding the Steam Web API key.
    pub api_key_env: String,
    /// Web API host (`GetPlayerBans`, `ResolveVanityURL`).
    pub api_base: String,
    /// Community host (inventory, market price overview).
    pub community_base: String,
    pub currency: u32,
    pub app_id: u32,
    pub context_id: u32,
    /// Minimum spacing between two requests to the same endpoint family.
    pub min_request_interval_ms: u64,
    /// Cap on price-overview retries after non-200 responses.
    /// `0` retries forever.
    pub price_max_attempts: u32,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            api_key_env: "STEAM_API_KEY".to_string(),
            api_base: "http://api.steampowered.com".to_string(),
            community_base: "https://steamcommunity.com".to_string(),
            currency: 1,
            app_id: 730,
            context_id: 2,
            min_request_interval_ms: 1000,
            price_max_attempts: 20,
        }
    }
}

/// Which storage backend persists the price and inventory caches.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub price_path: String,
    pub inventory_path: String,
    pub sqlite_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Json,
            price_path: "cs_prices.json".to_string(),
            inventory_path: "inventory_cache.json".to_string(),
            sqlite_url: "sqlite://banwatch_cache.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiscordConfig {
    /// Name of the env var holding the bot token.
    pub token_env: String,
    pub api_base: String,
    pub channel_ids: Vec<u64>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token_env: "DISCORD_BOT_TOKEN".to_string(),
            api_base: "https://discord.com/api/v10".to_string(),
            channel_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bot.scan_interval_secs == 0 {
            anyhow::bail!("bot.scan_interval_secs must be greater than 0");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret by env-var name. Empty values count as missing.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        let value = Self::resolve_env(env_name)?;
        if value.trim().is_empty() {
            anyhow::bail!("Environment variable is empty: {env_name}");
        }
        Ok(SecretString::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.bot.scan_interval_secs, 3600);
        assert_eq!(cfg.bot.inventory_ttl_secs(), 3600);
        assert_eq!(cfg.bot.price_ttl_secs(), 6 * 3600);
        assert_eq!(cfg.steam.app_id, 730);
        assert_eq!(cfg.steam.context_id, 2);
        assert_eq!(cfg.cache.backend, CacheBackendKind::Json);
        assert_eq!(cfg.cache.price_path, "cs_prices.json");
        assert!(cfg.discord.channel_ids.is_empty());
        assert!(!cfg.dashboard.enabled);
    }

    #[test]
    fn test_parse_partial() {
        let cfg = AppConfig::parse(
            r#"
            [bot]
            refresh_interval_secs = 600

            [cache]
            backend = "sqlite"

            [discord]
            channel_ids = [123, 456]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bot.refresh_interval_secs, 600);
        assert_eq!(cfg.bot.price_ttl_secs(), 3600);
        assert_eq!(cfg.bot.history_limit, 100);
        assert_eq!(cfg.cache.backend, CacheBackendKind::Sqlite);
        assert_eq!(cfg.discord.channel_ids, vec![123, 456]);
        assert_eq!(cfg.steam.api_key_env, "STEAM_API_KEY");
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let cfg = AppConfig::parse(include_str!("../config.example.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(cfg.bot.price_ttl_secs(), defaults.bot.price_ttl_secs());
        assert_eq!(cfg.steam.api_base, defaults.steam.api_base);
        assert_eq!(cfg.steam.price_max_attempts, defaults.steam.price_max_attempts);
        assert_eq!(cfg.cache.sqlite_url, defaults.cache.sqlite_url);
        assert_eq!(cfg.discord.api_base, defaults.discord.api_base);
        assert_eq!(cfg.dashboard.port, defaults.dashboard.port);
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let result = AppConfig::parse("[cache]\nbackend = \"redis\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_zero_scan_interval() {
        let err = AppConfig::parse("[bot]\nscan_interval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("scan_interval_secs"), "{err}");
        assert!(AppConfig::parse("[bot]\nscan_interval_secs = 1\n").is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load("/nonexistent/banwatch/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_secret() {
        let name = format!("BANWATCH_TEST_SECRET_{}", uuid::Uuid::new_v4().simple());
        assert!(AppConfig::resolve_secret(&name).is_err());

        std::env::set_var(&name, "   ");
        assert!(AppConfig::resolve_secret(&name).is_err());

        std::env::set_var(&name, "abc123");
        let secret = AppConfig::resolve_secret(&name).unwrap();
        assert_eq!(secret.expose_secret(), "abc123");
        std::env::remove_var(&name);
    }
}

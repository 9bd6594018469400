//! Configuration loading from TOML.
//!
//! Reads `config.toml` (or the file named by `AVIATOR_CONFIG`) and
//! deserializes into strongly-typed structs. Every field except the
//! section headers has a default, so a minimal file is enough.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::round::RoundConfig;

/// Longest countdown or settle delay accepted, in seconds.
pub const MAX_PHASE_SECS: f64 = 3600.0;
/// Largest crash multiplier a policy may be configured to reach.
pub const MAX_MULTIPLIER_LIMIT: f64 = 1_000_000.0;
/// Largest single bet the engine accepts. Keeps `max_bet * MAX_MULTIPLIER_LIMIT`
/// well inside `Decimal` range.
pub const MAX_BET_LIMIT: Decimal = dec!(1000000000);

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub crash: CrashConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origin. `*` allows any.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: f64,
    /// Growth constant `k` in `exp(k * t)`, per second.
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
    /// Display delay between crash and settlement.
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_min_bet")]
    pub min_bet: Decimal,
    #[serde(default = "default_max_bet")]
    pub max_bet: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrashConfig {
    /// "uniform" | "house_edge" | "fixed"
    #[serde(default = "default_crash_policy")]
    pub policy: String,
    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: f64,
    #[serde(default = "default_house_edge")]
    pub house_edge: f64,
    #[serde(default)]
    pub fixed_multiplier: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// "memory" | "sqlite"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_storage_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_port() -> u16 {
    3000
}
fn default_cors_origin() -> String {
    "*".into()
}
fn default_countdown_secs() -> f64 {
    3.0
}
fn default_growth_rate() -> f64 {
    0.15
}
fn default_settle_delay_secs() -> f64 {
    1.0
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_min_bet() -> Decimal {
    dec!(10)
}
fn default_max_bet() -> Decimal {
    dec!(10000)
}
fn default_crash_policy() -> String {
    "uniform".into()
}
fn default_max_multiplier() -> f64 {
    100.0
}
fn default_house_edge() -> f64 {
    0.01
}
fn default_backend() -> String {
    "memory".into()
}
fn default_storage_url() -> String {
    "sqlite://aviator.db".into()
}
fn default_max_connections() -> u32 {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            countdown_secs: default_countdown_secs(),
            growth_rate: default_growth_rate(),
            settle_delay_secs: default_settle_delay_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            min_bet: default_min_bet(),
            max_bet: default_max_bet(),
        }
    }
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            policy: default_crash_policy(),
            max_multiplier: default_max_multiplier(),
            house_edge: default_house_edge(),
            fixed_multiplier: None,
            seed: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_storage_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl GameConfig {
    /// Engine parameters derived from this section.
    pub fn round_config(&self, max_multiplier: f64) -> RoundConfig {
        RoundConfig {
            countdown: Duration::from_secs_f64(self.countdown_secs.max(0.0)),
            growth_rate: self.growth_rate,
            settle_delay: Duration::from_secs_f64(self.settle_delay_secs.max(0.0)),
            min_bet: self.min_bet,
            max_bet: self.max_bet,
            max_multiplier,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.game.growth_rate.is_finite() && self.game.growth_rate > 0.0) {
            anyhow::bail!("game.growth_rate must be positive, got {}", self.game.growth_rate);
        }
        check_phase_secs("game.countdown_secs", self.game.countdown_secs)?;
        check_phase_secs("game.settle_delay_secs", self.game.settle_delay_secs)?;
        if self.game.min_bet <= Decimal::ZERO
            || self.game.max_bet < self.game.min_bet
            || self.game.max_bet > MAX_BET_LIMIT
        {
            anyhow::bail!(
                "invalid bet limits: min_bet={} max_bet={} (max_bet at most {MAX_BET_LIMIT})",
                self.game.min_bet,
                self.game.max_bet
            );
        }

        let max = self.crash.max_multiplier;
        if !(max.is_finite() && (1.0..=MAX_MULTIPLIER_LIMIT).contains(&max)) {
            anyhow::bail!("crash.max_multiplier must be in [1, {MAX_MULTIPLIER_LIMIT}], got {max}");
        }
        let edge = self.crash.house_edge;
        if !(edge.is_finite() && (0.0..1.0).contains(&edge)) {
            anyhow::bail!("crash.house_edge must be in [0, 1), got {edge}");
        }
        if let Some(fixed) = self.crash.fixed_multiplier {
            if !fixed.is_finite() {
                anyhow::bail!("crash.fixed_multiplier must be finite, got {fixed}");
            }
        }
        Ok(())
    }

    /// Config path, honouring the `AVIATOR_CONFIG` override.
    pub fn default_path() -> String {
        std::env::var("AVIATOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }
}

fn check_phase_secs(field: &str, secs: f64) -> Result<()> {
    if !(secs.is_finite() && (0.0..=MAX_PHASE_SECS).contains(&secs)) {
        anyhow::bail!("{field} must be in [0, {MAX_PHASE_SECS}], got {secs}");
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            game: GameConfig::default(),
            crash: CrashConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

//! Central configuration for the game server.
//!
//! Loads from `config.toml` at the project root.
//! Every game tunable is runtime-configurable; missing keys fall back to the
//! classic 5-player / 5-round rules.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::core::{Error, Result};
use crate::market::FixedIncomeTemplate;
use crate::room::RoundTiming;

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Rules of one game.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Seats per room; the room starts itself when the last seat fills
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Rounds per game
    #[serde(default = "default_total_rounds")]
    pub total_rounds: u8,
    /// Full round length in seconds (news + trading)
    #[serde(default = "default_round_secs")]
    pub round_secs: u32,
    /// Trading opens once this many seconds (or fewer) remain
    #[serde(default = "default_trading_window_secs")]
    pub trading_window_secs: u32,
    /// Pause between a round's settlement and the next round
    #[serde(default = "default_intermission_secs")]
    pub intermission_secs: u32,
    /// Countdown between the room filling and round 1
    #[serde(default = "default_start_countdown_secs")]
    pub start_countdown_secs: u32,
    /// How long a finished room lingers before deletion
    #[serde(default = "default_teardown_secs")]
    pub teardown_secs: u32,
    /// How long a dropped seat is held for its owner during a game
    #[serde(default = "default_reconnect_grace_secs")]
    pub reconnect_grace_secs: u64,
    /// Cash every player starts with
    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,
    /// Shares of each company floated per room
    #[serde(default = "default_shares_per_company")]
    pub shares_per_company: u64,
    /// Units issued per fixed-income offer in round 1
    #[serde(default = "default_offer_units")]
    pub offer_units: u64,
    /// Rebind a dropped seat by exact player name (no token needed)
    #[serde(default = "default_allow_name_rebind")]
    pub allow_name_rebind: bool,
    /// Fixed RNG seed for reproducible games
    #[serde(default)]
    pub seed: Option<u64>,
    /// Fixed-income catalog; empty means the built-in catalog
    #[serde(default)]
    pub fixed_income: Vec<FixedIncomeTemplate>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3001))
}
fn default_max_players() -> usize {
    5
}
fn default_total_rounds() -> u8 {
    5
}
fn default_round_secs() -> u32 {
    75
}
fn default_trading_window_secs() -> u32 {
    60
}
fn default_intermission_secs() -> u32 {
    5
}
fn default_start_countdown_secs() -> u32 {
    10
}
fn default_teardown_secs() -> u32 {
    30
}
fn default_reconnect_grace_secs() -> u64 {
    30
}
fn default_initial_cash() -> f64 {
    10_000.0
}
fn default_shares_per_company() -> u64 {
    1_000
}
fn default_offer_units() -> u64 {
    200
}
fn default_allow_name_rebind() -> bool {
    true
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players: default_max_players(),
            total_rounds: default_total_rounds(),
            round_secs: default_round_secs(),
            trading_window_secs: default_trading_window_secs(),
            intermission_secs: default_intermission_secs(),
            start_countdown_secs: default_start_countdown_secs(),
            teardown_secs: default_teardown_secs(),
            reconnect_grace_secs: default_reconnect_grace_secs(),
            initial_cash: default_initial_cash(),
            shares_per_company: default_shares_per_company(),
            offer_units: default_offer_units(),
            allow_name_rebind: default_allow_name_rebind(),
            seed: None,
            fixed_income: Vec::new(),
        }
    }
}

impl GameConfig {
    /// Round length and trading window as one value, shared by every phase check.
    pub fn timing(&self) -> RoundTiming {
        RoundTiming::new(self.round_secs, self.trading_window_secs)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    /// The configured catalog, or the built-in one when none is configured.
    pub fn fixed_income_catalog(&self) -> Vec<FixedIncomeTemplate> {
        if self.fixed_income.is_empty() {
            crate::market::catalog::fixed_income_templates()
        } else {
            self.fixed_income.clone()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_players == 0 {
            return Err(Error::Config("max_players must be at least 1".into()));
        }
        if self.total_rounds == 0 {
            return Err(Error::Config("total_rounds must be at least 1".into()));
        }
        if self.trading_window_secs > self.round_secs {
            return Err(Error::Config(format!(
                "trading_window_secs ({}) exceeds round_secs ({})",
                self.trading_window_secs, self.round_secs
            )));
        }
        if !self.initial_cash.is_finite() || self.initial_cash < 0.0 {
            return Err(Error::Config("initial_cash must be a non-negative number".into()));
        }
        Ok(())
    }
}

/// Company directory source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    /// REST endpoint listing companies; built-in list when absent
    pub url: Option<String>,
}

/// Transaction-history sink.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JournalConfig {
    /// REST endpoint receiving executed trades; log-only when absent
    pub url: Option<String>,
}

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.game.validate()?;
        Ok(config)
    }

    /// Load from the default location (project root config.toml).
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            match Self::load(Path::new(path)) {
                Ok(cfg) => {
                    tracing::info!("📋 Loaded config from {}", path);
                    return cfg;
                }
                Err(Error::Io(_)) => continue,
                Err(e) => tracing::warn!("⚠️ Ignoring {}: {}", path, e),
            }
        }

        tracing::warn!("⚠️ No config.toml found, using defaults");
        Self::default()
    }

    /// Apply `MARKET_ROUNDS_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(addr) = std::env::var("MARKET_ROUNDS_LISTEN")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.server.listen = addr;
        }
        if let Ok(url) = std::env::var("MARKET_ROUNDS_DIRECTORY_URL") {
            self.directory.url = Some(url);
        }
        if let Ok(url) = std::env::var("MARKET_ROUNDS_JOURNAL_URL") {
            self.journal.url = Some(url);
        }
        self
    }
}

// 7.0 config.rs: all settings in one place. rates, risk thresholds, server.
// 7.1 environment presets on top of the defaults, then env var overrides.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::instrument::{DEFAULT_COMMISSION_RATE, DEFAULT_MARGIN_RATE};
use crate::risk::RiskParams;
use crate::types::{InstrumentId, UserId};

// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // Socket address to listen on
    pub bind_addr: String,
    // Per-request budget for engine work, collaborator calls included
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 2_000,
        }
    }
}

// An instrument registered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSeed {
    pub id: InstrumentId,
    pub name: String,
    // Initial reference price for the in-memory price source
    pub reference_price: Decimal,
}

// Starting balance credited to the in-memory ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    pub user_id: UserId,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    // Fraction of entry notional locked as margin
    pub margin_rate: Decimal,
    // Charged to each side of every fill
    pub commission_rate: Decimal,
    pub risk: RiskParams,
    // Receives all commission
    pub house_account: UserId,
    // Levels per side in book snapshots
    pub book_depth: usize,
    // Events retained in memory
    pub max_events: usize,
    // Forced liquidation sweep period. 0 disables the sweep
    pub liquidation_interval_ms: u64,
    pub server: ServerConfig,
    pub instruments: Vec<InstrumentSeed>,
    pub demo_accounts: Vec<AccountSeed>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            margin_rate: DEFAULT_MARGIN_RATE,
            commission_rate: DEFAULT_COMMISSION_RATE,
            risk: RiskParams::default(),
            house_account: UserId(0),
            book_depth: 20,
            max_events: 10_000,
            liquidation_interval_ms: 5_000,
            server: ServerConfig::default(),
            instruments: Vec::new(),
            demo_accounts: Vec::new(),
        }
    }
}

fn demo_instruments() -> Vec<InstrumentSeed> {
    [
        (1, "AK-47 | Redline (Field-Tested)", dec!(85)),
        (2, "AWP | Asiimov (Field-Tested)", dec!(120)),
        (3, "M4A4 | Howl (Minimal Wear)", dec!(4500)),
    ]
    .into_iter()
    .map(|(id, name, price)| InstrumentSeed {
        id: InstrumentId(id),
        name: name.to_string(),
        reference_price: price,
    })
    .collect()
}

fn demo_accounts() -> Vec<AccountSeed> {
    (1..=3)
        .map(|id| AccountSeed {
            user_id: UserId(id),
            balance: dec!(100000),
        })
        .collect()
}

impl ExchangeConfig {
    // Local development: demo skins and funded demo users
    pub fn development() -> Self {
        Self {
            instruments: demo_instruments(),
            demo_accounts: demo_accounts(),
            ..Self::default()
        }
    }

    // Staging mirrors production limits but keeps demo funding for QA
    pub fn staging() -> Self {
        let mut config = Self::development();
        config.server.request_timeout_ms = 1_500;
        config.max_events = 50_000;
        config
    }

    // Production: no demo balances, tighter request budget
    pub fn production() -> Self {
        Self {
            instruments: demo_instruments(),
            max_events: 100_000,
            liquidation_interval_ms: 1_000,
            server: ServerConfig {
                request_timeout_ms: 1_000,
                ..ServerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Preset from `SKINS_ENV`, then individual overrides. Unset variables
    /// keep the preset value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("SKINS_ENV") {
            Some(value) => value.parse()?,
            None => Environment::Development,
        };
        let mut config = environment.config();

        if let Some(addr) = lookup("SKINS_BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        if let Some(value) = lookup("SKINS_REQUEST_TIMEOUT_MS") {
            config.server.request_timeout_ms = parse_var("SKINS_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("SKINS_BOOK_DEPTH") {
            config.book_depth = parse_var("SKINS_BOOK_DEPTH", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.margin_rate <= Decimal::ZERO || self.margin_rate > Decimal::ONE {
            return Err(ConfigError::InvalidRates {
                reason: "margin rate must be in (0, 1]".to_string(),
            });
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= dec!(0.01) {
            return Err(ConfigError::InvalidRates {
                reason: "commission rate must be in [0, 1%)".to_string(),
            });
        }

        // tiers must nest: liquidation < danger < warning < initial margin
        let risk = &self.risk;
        if risk.liquidation_threshold <= Decimal::ZERO
            || risk.liquidation_threshold >= risk.danger_threshold
            || risk.danger_threshold >= risk.warning_threshold
        {
            return Err(ConfigError::InvalidRisk {
                reason: "thresholds must satisfy 0 < liquidation < danger < warning".to_string(),
            });
        }
        if risk.warning_threshold >= self.margin_rate {
            return Err(ConfigError::InvalidRisk {
                reason: "a freshly opened position must start in the SAFE tier".to_string(),
            });
        }

        if self.book_depth == 0 {
            return Err(ConfigError::InvalidServer {
                reason: "book depth must be at least 1".to_string(),
            });
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidServer {
                reason: "request timeout must be positive".to_string(),
            });
        }

        for seed in &self.instruments {
            if seed.reference_price <= Decimal::ZERO {
                return Err(ConfigError::InvalidInstrument {
                    id: seed.id,
                    reason: "reference price must be positive".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        var,
        value: value.to_string(),
    })
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid rates: {reason}")]
    InvalidRates { reason: String },

    #[error("Invalid risk thresholds: {reason}")]
    InvalidRisk { reason: String },

    #[error("Invalid server settings: {reason}")]
    InvalidServer { reason: String },

    #[error("Invalid instrument {id}: {reason}")]
    InvalidInstrument { id: InstrumentId, reason: String },

    #[error("Invalid value {value:?} for {var}")]
    InvalidVar { var: &'static str, value: String },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn config(&self) -> ExchangeConfig {
        match self {
            Environment::Development => ExchangeConfig::development(),
            Environment::Staging => ExchangeConfig::staging(),
            Environment::Production => ExchangeConfig::production(),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidVar {
                var: "SKINS_ENV",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_valid() {
        let config = ExchangeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.margin_rate, dec!(0.20));
        assert_eq!(config.commission_rate, dec!(0.0002));
        assert_eq!(config.house_account, UserId(0));
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Staging.config().validate().is_ok());
        assert!(Environment::Production.config().validate().is_ok());
        assert!(Environment::Production.config().demo_accounts.is_empty());
        assert_eq!(Environment::Development.config().instruments.len(), 3);
    }

    #[test]
    fn test_env_overrides() {
        let config = ExchangeConfig::from_lookup(lookup(&[
            ("SKINS_ENV", "production"),
            ("SKINS_BIND_ADDR", "127.0.0.1:9000"),
            ("SKINS_BOOK_DEPTH", "5"),
        ]))
        .unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.book_depth, 5);
        assert_eq!(config.server.request_timeout_ms, 1_000);
    }

    #[test]
    fn test_bad_env_values() {
        let err = ExchangeConfig::from_lookup(lookup(&[("SKINS_REQUEST_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "SKINS_REQUEST_TIMEOUT_MS", .. }));

        let err = ExchangeConfig::from_lookup(lookup(&[("SKINS_ENV", "moon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "SKINS_ENV", .. }));

        let err = ExchangeConfig::from_lookup(lookup(&[("SKINS_BOOK_DEPTH", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServer { .. }));
    }

    #[test]
    fn test_invalid_risk_ordering() {
        let mut config = ExchangeConfig::default();
        config.risk.danger_threshold = dec!(0.09);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRisk { .. })));

        let mut config = ExchangeConfig::default();
        config.margin_rate = dec!(0.10);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRisk { .. })));
    }

    #[test]
    fn test_config_serialization() {
        let config = ExchangeConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let back: ExchangeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.instruments.len(), config.instruments.len());
        assert_eq!(back.margin_rate, config.margin_rate);
    }
}

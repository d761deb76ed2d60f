//! Engine configuration.
//!
//! Settings are read from an optional TOML file and then from `VAT_ENGINE_*`
//! environment variables (nested keys use `__`, e.g.
//! `VAT_ENGINE_ROUNDING__MODE=half_even`). Every key has a default, so an
//! empty environment yields [`EngineConfig::default`].

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::types::{EngineError, EngineResult};

pub const DEFAULT_CONFIG_PATH: &str = "config/vat_engine.toml";
const ENV_PREFIX: &str = "VAT_ENGINE";

/// How monetary figures are rounded when persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfDown,
    HalfEven,
    Up,
    Down,
    Ceiling,
    Floor,
}

impl From<RoundingMode> for bigdecimal::RoundingMode {
    fn from(value: RoundingMode) -> Self {
        match value {
            RoundingMode::HalfUp => bigdecimal::RoundingMode::HalfUp,
            RoundingMode::HalfDown => bigdecimal::RoundingMode::HalfDown,
            RoundingMode::HalfEven => bigdecimal::RoundingMode::HalfEven,
            RoundingMode::Up => bigdecimal::RoundingMode::Up,
            RoundingMode::Down => bigdecimal::RoundingMode::Down,
            RoundingMode::Ceiling => bigdecimal::RoundingMode::Ceiling,
            RoundingMode::Floor => bigdecimal::RoundingMode::Floor,
        }
    }
}

/// Decimal places and mode applied to persisted monetary figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundingPolicy {
    pub scale: i64,
    pub mode: RoundingMode,
}

impl Default for RoundingPolicy {
    fn default() -> Self {
        Self {
            scale: 2,
            mode: RoundingMode::HalfUp,
        }
    }
}

impl RoundingPolicy {
    /// Round a figure for persistence
    pub fn apply(&self, amount: &BigDecimal) -> BigDecimal {
        amount.with_scale_round(self.scale, self.mode.into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSettings {
    vat_rate: String,
    rounding: RoundingPolicy,
    lock_timeout_ms: u64,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            vat_rate: "0.15".to_string(),
            rounding: RoundingPolicy::default(),
            lock_timeout_ms: 5_000,
        }
    }
}

/// Typed engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// VAT rate as a fraction (0.15 for 15%)
    pub vat_rate: BigDecimal,
    /// Rounding applied to persisted monetary figures
    pub rounding: RoundingPolicy,
    /// Upper bound on any lock wait
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vat_rate: BigDecimal::from(15) / BigDecimal::from(100),
            rounding: RoundingPolicy::default(),
            lock_timeout: Duration::from_millis(5_000),
        }
    }
}

impl EngineConfig {
    /// Load settings from `path` (optional file) layered under the environment
    pub fn load(path: Option<&str>) -> EngineResult<Self> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let raw: RawSettings = settings.try_deserialize()?;
        Self::from_raw(raw)
    }

    /// Parse settings from a TOML document
    pub fn from_toml_str(contents: &str) -> EngineResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(contents, ::config::FileFormat::Toml))
            .build()?;

        let raw: RawSettings = settings.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> EngineResult<Self> {
        let vat_rate = BigDecimal::from_str(raw.vat_rate.trim()).map_err(|_| {
            EngineError::Config(format!("vat_rate '{}' is not a decimal number", raw.vat_rate))
        })?;

        let config = Self {
            vat_rate,
            rounding: raw.rounding,
            lock_timeout: Duration::from_millis(raw.lock_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the VAT rate
    pub fn with_vat_rate(mut self, vat_rate: BigDecimal) -> EngineResult<Self> {
        self.vat_rate = vat_rate;
        self.validate()?;
        Ok(self)
    }

    /// Override the lock timeout
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.vat_rate < BigDecimal::from(0) || self.vat_rate >= BigDecimal::from(1) {
            return Err(EngineError::Config(format!(
                "vat_rate must be a fraction in [0, 1), got {}",
                self.vat_rate
            )));
        }

        if !(0..=8).contains(&self.rounding.scale) {
            return Err(EngineError::Config(format!(
                "rounding scale must be between 0 and 8, got {}",
                self.rounding.scale
            )));
        }

        if self.lock_timeout.is_zero() {
            return Err(EngineError::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.vat_rate, BigDecimal::from_str("0.15").unwrap());
        assert_eq!(config.rounding.scale, 2);
        assert_eq!(config.rounding.mode, RoundingMode::HalfUp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            vat_rate = "0.075"
            lock_timeout_ms = 250

            [rounding]
            mode = "half_even"
            "#,
        )
        .unwrap();

        assert_eq!(config.vat_rate, BigDecimal::from_str("0.075").unwrap());
        assert_eq!(config.rounding.mode, RoundingMode::HalfEven);
        assert_eq!(config.rounding.scale, 2);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_environment_overrides_defaults() {
        std::env::set_var("VAT_ENGINE_VAT_RATE", "0.05");
        std::env::set_var("VAT_ENGINE_ROUNDING__MODE", "half_even");
        let loaded = EngineConfig::load(Some("/nonexistent/vat_engine.toml"));
        std::env::remove_var("VAT_ENGINE_VAT_RATE");
        std::env::remove_var("VAT_ENGINE_ROUNDING__MODE");

        let config = loaded.unwrap();
        assert_eq!(config.vat_rate, BigDecimal::from_str("0.05").unwrap());
        assert_eq!(config.rounding.mode, RoundingMode::HalfEven);
        assert_eq!(config.rounding.scale, 2);
    }

    #[test]
    fn test_rejects_out_of_range_rate() {
        let result = EngineConfig::from_toml_str(r#"vat_rate = "1.5""#);
        assert!(matches!(result, Err(EngineError::Config(_))));

        let result = EngineConfig::from_toml_str(r#"vat_rate = "fifteen""#);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_half_up_rounding() {
        let policy = RoundingPolicy::default();
        let half = BigDecimal::from_str("10.005").unwrap();
        assert_eq!(policy.apply(&half), BigDecimal::from_str("10.01").unwrap());

        let even = RoundingPolicy {
            scale: 2,
            mode: RoundingMode::HalfEven,
        };
        assert_eq!(even.apply(&half), BigDecimal::from_str("10.00").unwrap());
    }
}

//! Configuration loading and representation.
//!
//! Settings come from environment variables (`Settings::from_env`) or from any
//! key lookup (`Settings::from_lookup`), which keeps tests off the process
//! environment.

use std::time::Duration;

use thiserror::Error;

pub const STORE_VAR: &str = "STOCKROOM_STORE";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const DEFAULT_CURRENCY_VAR: &str = "STOCKROOM_DEFAULT_CURRENCY";
pub const FORECAST_TIMEOUT_VAR: &str = "STOCKROOM_FORECAST_TIMEOUT_MS";
pub const FORECAST_HORIZON_VAR: &str = "STOCKROOM_FORECAST_HORIZON_DAYS";
pub const DEMAND_HISTORY_VAR: &str = "STOCKROOM_DEMAND_HISTORY_DAYS";
pub const LOG_VAR: &str = "STOCKROOM_LOG";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}='{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store: StoreBackend,
    /// Currency for new purchase orders that do not name one.
    pub default_currency: String,
    /// Upper bound on a single forecast provider call.
    pub forecast_timeout: Duration,
    pub forecast_horizon_days: u32,
    /// How far back outbound movements feed the demand history.
    pub demand_history_days: u32,
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            default_currency: "USD".to_string(),
            forecast_timeout: Duration::from_millis(2000),
            forecast_horizon_days: 30,
            demand_history_days: 90,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match get(STORE_VAR).as_deref().map(str::trim) {
            None | Some("memory") => StoreBackend::Memory,
            Some("postgres") => StoreBackend::Postgres {
                database_url: get(DATABASE_URL_VAR).ok_or(ConfigError::Missing(DATABASE_URL_VAR))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: STORE_VAR,
                    value: other.to_string(),
                    reason: "expected 'memory' or 'postgres'".to_string(),
                });
            }
        };

        let default_currency = match get(DEFAULT_CURRENCY_VAR) {
            None => defaults.default_currency,
            Some(code) => {
                let code = code.trim().to_string();
                if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
                    return Err(ConfigError::Invalid {
                        key: DEFAULT_CURRENCY_VAR,
                        value: code,
                        reason: "expected a 3-letter uppercase currency code".to_string(),
                    });
                }
                code
            }
        };

        let forecast_timeout = match get(FORECAST_TIMEOUT_VAR) {
            None => defaults.forecast_timeout,
            Some(raw) => Duration::from_millis(parse_positive(FORECAST_TIMEOUT_VAR, &raw)?),
        };

        let forecast_horizon_days = match get(FORECAST_HORIZON_VAR) {
            None => defaults.forecast_horizon_days,
            Some(raw) => parse_days(FORECAST_HORIZON_VAR, &raw)?,
        };

        let demand_history_days = match get(DEMAND_HISTORY_VAR) {
            None => defaults.demand_history_days,
            Some(raw) => parse_days(DEMAND_HISTORY_VAR, &raw)?,
        };

        Ok(Self {
            store,
            default_currency,
            forecast_timeout,
            forecast_horizon_days,
            demand_history_days,
            log_filter: get(LOG_VAR).unwrap_or(defaults.log_filter),
        })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a positive integer".to_string(),
        }),
    }
}

fn parse_days(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    let value = parse_positive(key, raw)?;
    u32::try_from(value).map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: "too large".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_eq!(
            settings(&[(STORE_VAR, "postgres")]),
            Err(ConfigError::Missing(DATABASE_URL_VAR))
        );

        let s = settings(&[
            (STORE_VAR, "postgres"),
            (DATABASE_URL_VAR, "postgres://localhost/stockroom"),
        ])
        .unwrap();
        assert_eq!(
            s.store,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/stockroom".to_string()
            }
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            settings(&[(STORE_VAR, "redis")]),
            Err(ConfigError::Invalid { key: STORE_VAR, .. })
        ));
        assert!(matches!(
            settings(&[(DEFAULT_CURRENCY_VAR, "usd")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            settings(&[(FORECAST_TIMEOUT_VAR, "0")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            settings(&[(FORECAST_HORIZON_VAR, "soon")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn overrides_apply() {
        let s = settings(&[
            (DEFAULT_CURRENCY_VAR, "EUR"),
            (FORECAST_TIMEOUT_VAR, "250"),
            (LOG_VAR, "stockroom_infra=debug"),
        ])
        .unwrap();
        assert_eq!(s.default_currency, "EUR");
        assert_eq!(s.forecast_timeout, Duration::from_millis(250));
        assert_eq!(s.log_filter, "stockroom_infra=debug");
    }
}

// src/config.rs
use crate::models::Usd;
use chrono::Duration;
use std::net::SocketAddr;
use thiserror::Error;

pub const DEFAULT_QUOTE_BASE_URL: &str = "https://www.alphavantage.co";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://finance.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3030";
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
pub const DEFAULT_STARTING_CASH: Usd = Usd::from_cents(1_000_000);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub quote_base_url: String,
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub session_secret: Option<String>,
    pub session_ttl: Duration,
    pub starting_cash: Usd,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Config::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| var(name).filter(|value| !value.trim().is_empty());

        let api_key = set("API_KEY").ok_or(ConfigError::Missing("API_KEY"))?;

        let bind_addr: SocketAddr = match set("BIND_ADDR") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "BIND_ADDR",
                value,
            })?,
            None => DEFAULT_BIND_ADDR
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    name: "BIND_ADDR",
                    value: DEFAULT_BIND_ADDR.to_string(),
                })?,
        };

        let session_ttl = match set("SESSION_TTL_HOURS") {
            Some(value) => match value.parse::<i64>() {
                Ok(hours) if hours > 0 => Duration::hours(hours),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SESSION_TTL_HOURS",
                        value,
                    })
                }
            },
            None => Duration::hours(DEFAULT_SESSION_TTL_HOURS),
        };

        let starting_cash = match set("STARTING_CASH") {
            Some(value) => Usd::parse_dollars(&value)
                .filter(|cash| *cash >= Usd::ZERO)
                .ok_or(ConfigError::Invalid {
                    name: "STARTING_CASH",
                    value,
                })?,
            None => DEFAULT_STARTING_CASH,
        };

        Ok(Config {
            api_key,
            quote_base_url: set("QUOTE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_QUOTE_BASE_URL.to_string()),
            database_url: set("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind_addr,
            session_secret: set("SESSION_SECRET"),
            session_ttl,
            starting_cash,
        })
    }
}

// src/main.rs
mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod pages;
mod quote;

use crate::api::AppState;
use crate::auth::{Passwords, Sessions};
use crate::config::Config;
use crate::quote::AlphaVantage;
use env_logger::{Builder, Env};
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let pool = match db::init(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let quotes = match AlphaVantage::new(&config.quote_base_url, &config.api_key) {
        Ok(quotes) => quotes,
        Err(e) => {
            error!("Failed to build quote client: {}", e);
            return;
        }
    };

    let sessions = match &config.session_secret {
        Some(secret) => Sessions::new(secret.as_bytes().to_vec(), config.session_ttl),
        None => {
            warn!("SESSION_SECRET not set; sessions will not survive a restart");
            Sessions::ephemeral(config.session_ttl)
        }
    };

    let state = AppState {
        pool,
        quotes: Arc::new(quotes),
        sessions: Arc::new(sessions),
        passwords: Arc::new(Passwords::default()),
        starting_cash: config.starting_cash,
    };

    info!("Starting the stock trader application...");
    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api::app(state)).run(config.bind_addr).await;
}

pub mod catalog;
pub mod chat;
pub mod command;
pub mod config;
pub mod error;
pub mod live;
pub mod pipeline;
pub mod platform;
pub mod token;

use std::time::Duration;

/// Shared HTTP client for every provider call; reuses connections and TLS sessions.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("songreq/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .build()
}

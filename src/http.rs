//! HTTP.
//!
//! This module contains the shared HTTP client setup.

use reqwest::blocking::Client;
use std::time::Duration;

/// The user agent sent with every request.
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Builds a blocking HTTP client whose requests time out after the given duration.
pub(crate) fn client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder() //
        .user_agent(USER_AGENT)
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}

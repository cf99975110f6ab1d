// Scrobbler module
// Contains implementations for various scrobbling services

use anyhow::{Context, Result};
use std::time::Duration;

pub mod audioscrobbler;
pub mod listenbrainz;
pub mod service;
pub mod traits;

pub use service::Service;
pub use traits::{Scrobble, Scrobbler, Track};

const USER_AGENT: &str = concat!("mpd-scrobbler/", env!("CARGO_PKG_VERSION"));

/// Limit on a whole request, so a stalled service fails like an offline one
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .context("Failed to build HTTP client")
}

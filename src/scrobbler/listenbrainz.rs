// ListenBrainz scrobbler implementation
// API Documentation: https://listenbrainz.readthedocs.io/

use super::traits::{Scrobble, Scrobbler, Track};
use super::{http_client, REQUEST_TIMEOUT};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const LISTENBRAINZ_API_URL: &str = "https://api.listenbrainz.org";

#[derive(Debug, Deserialize)]
struct TokenValidation {
    valid: bool,
    user_name: Option<String>,
}

pub struct ListenBrainzScrobbler {
    name: String,
    token: String,
    api_url: String,
    validated: bool,
    client: Client,
}

impl ListenBrainzScrobbler {
    pub fn new(name: String, token: String, api_url: String) -> Result<Self> {
        Self::with_timeout(name, token, api_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        name: String,
        token: String,
        api_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name,
            token,
            api_url: api_url.trim_end_matches('/').to_string(),
            validated: false,
            client: http_client(timeout)?,
        })
    }

    /// Check the user token once, before the first submission
    async fn ensure_valid_token(&mut self) -> Result<()> {
        if self.validated {
            return Ok(());
        }

        let url = format!("{}/1/validate-token", self.api_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await
            .with_context(|| format!("Failed to validate token with {}", self.name))?;

        let validation: TokenValidation = response
            .json()
            .await
            .with_context(|| format!("Unexpected validate-token response from {}", self.name))?;

        if !validation.valid {
            anyhow::bail!("{} rejected the user token", self.name);
        }

        log::info!(
            "[{}] Connected as {}",
            self.name,
            validation.user_name.as_deref().unwrap_or("unknown user")
        );
        self.validated = true;
        Ok(())
    }

    /// Submit a listen to ListenBrainz
    async fn submit_listen(
        &mut self,
        listen_type: &str,
        track: &Track,
        timestamp: Option<i64>,
    ) -> Result<()> {
        self.ensure_valid_token().await?;

        let payload = listen_payload(listen_type, track, timestamp);
        let url = format!("{}/1/submit-listens", self.api_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.token))
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to ListenBrainz")?;

        if !response.status().is_success() {
            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.validated = false;
            }
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("ListenBrainz API error ({}): {}", status, body);
        }

        Ok(())
    }
}

fn listen_payload(listen_type: &str, track: &Track, timestamp: Option<i64>) -> Value {
    let mut track_metadata = json!({
        "artist_name": track.artist,
        "track_name": track.title,
        "additional_info": {
            "submission_client": env!("CARGO_PKG_NAME"),
            "submission_client_version": env!("CARGO_PKG_VERSION"),
        },
    });

    if !track.album.is_empty() {
        track_metadata["release_name"] = json!(track.album);
    }
    if let Some(number) = track.wire_track_number() {
        track_metadata["additional_info"]["tracknumber"] = json!(number);
    }
    if let Some(duration) = track.wire_duration() {
        track_metadata["additional_info"]["duration_ms"] = json!(u64::from(duration) * 1000);
    }

    match timestamp {
        // "playing_now" must not carry a timestamp
        None => json!({
            "listen_type": listen_type,
            "payload": [{
                "track_metadata": track_metadata,
            }]
        }),
        Some(ts) => json!({
            "listen_type": listen_type,
            "payload": [{
                "listened_at": ts,
                "track_metadata": track_metadata,
            }]
        }),
    }
}

impl Scrobbler for ListenBrainzScrobbler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn now_playing(&mut self, track: &Track) -> Result<()> {
        log::debug!(
            "Sending now playing to ListenBrainz ({}): {} - {}",
            self.name,
            track.artist,
            track.title
        );

        self.submit_listen("playing_now", track, None)
            .await
            .context("Failed to update now playing on ListenBrainz")?;

        log::info!("[{}] NowPlaying: {} by {}", self.name, track.title, track.artist);
        Ok(())
    }

    async fn scrobble(&mut self, scrobble: &Scrobble) -> Result<()> {
        let track = &scrobble.track;
        log::debug!(
            "Scrobbling to ListenBrainz ({}): {} - {}",
            self.name,
            track.artist,
            track.title
        );

        self.submit_listen("single", track, Some(scrobble.timestamp.timestamp()))
            .await
            .context("Failed to scrobble to ListenBrainz")?;

        log::info!("[{}] Submitted: {} by {}", self.name, track.title, track.artist);
        Ok(())
    }
}

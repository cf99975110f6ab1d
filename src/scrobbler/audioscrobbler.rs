// Audioscrobbler 2.0 scrobbler implementation
// Speaks the Last.fm web service API, also offered by Libre.fm and others
// API Documentation: https://www.last.fm/api

use super::traits::{Scrobble, Scrobbler, Track};
use super::{http_client, REQUEST_TIMEOUT};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const LASTFM_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// Error code returned when a session key is no longer valid
const INVALID_SESSION_KEY: u32 = 9;

type Params = BTreeMap<&'static str, String>;

#[derive(Debug, Deserialize)]
struct ApiError {
    error: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct Session {
    name: String,
    key: String,
}

pub struct AudioscrobblerScrobbler {
    name: String,
    api_key: String,
    api_secret: String,
    username: String,
    password: String,
    api_url: String,
    session_key: Option<String>,
    client: Client,
}

impl AudioscrobblerScrobbler {
    pub fn new(
        name: String,
        api_key: String,
        api_secret: String,
        username: String,
        password: String,
        api_url: String,
    ) -> Result<Self> {
        Ok(Self {
            name,
            api_key,
            api_secret,
            username,
            password,
            api_url,
            session_key: None,
            client: http_client(REQUEST_TIMEOUT)?,
        })
    }

    /// Log in with username and password, returning the session key
    pub async fn login(&mut self) -> Result<String> {
        let mut params = Params::new();
        params.insert("username", self.username.clone());
        params.insert("password", self.password.clone());

        let value = self.call("auth.getMobileSession", params).await?;
        let response: SessionResponse =
            serde_json::from_value(value).context("Unexpected auth.getMobileSession response")?;

        log::info!("[{}] Connected as {}", self.name, response.session.name);
        Ok(response.session.key)
    }

    async fn ensure_session(&mut self) -> Result<String> {
        if let Some(key) = &self.session_key {
            return Ok(key.clone());
        }

        let key = self
            .login()
            .await
            .with_context(|| format!("Failed to log in to {}", self.name))?;
        self.session_key = Some(key.clone());
        Ok(key)
    }

    /// Sign and send a write request
    async fn call(&mut self, method: &'static str, mut params: Params) -> Result<Value> {
        params.insert("method", method.to_string());
        params.insert("api_key", self.api_key.clone());
        let signature = sign(&params, &self.api_secret);
        params.insert("api_sig", signature);
        params.insert("format", "json".to_string());

        let response = self
            .client
            .post(&self.api_url)
            .form(&params)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, self.name))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response from {}", method, self.name))?;

        if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
            if error.error == INVALID_SESSION_KEY {
                self.session_key = None;
            }
            anyhow::bail!(
                "{} API error {} on {}: {}",
                self.name,
                error.error,
                method,
                error.message
            );
        }

        if !status.is_success() {
            anyhow::bail!("{} API error ({}) on {}: {}", self.name, status, method, body);
        }

        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse {} response from {}", method, self.name))
    }
}

/// Compute `api_sig`: md5 over the sorted `key` + `value` pairs followed by the secret
fn sign(params: &Params, secret: &str) -> String {
    let mut payload = String::new();
    for (key, value) in params {
        if *key == "format" || *key == "callback" {
            continue;
        }
        payload.push_str(key);
        payload.push_str(value);
    }
    payload.push_str(secret);

    format!("{:x}", md5::compute(payload))
}

/// Request parameters describing a track. Unknown optional fields are left out.
fn track_params(track: &Track) -> Params {
    let mut params = Params::new();
    params.insert("artist", track.artist.clone());
    params.insert("track", track.title.clone());

    if !track.album.is_empty() {
        params.insert("album", track.album.clone());
    }
    if !track.album_artist.is_empty() {
        params.insert("albumArtist", track.album_artist.clone());
    }
    if let Some(number) = track.wire_track_number() {
        params.insert("trackNumber", number.to_string());
    }
    if let Some(duration) = track.wire_duration() {
        params.insert("duration", duration.to_string());
    }

    params
}

/// Number of scrobbles the service ignored, as reported in `scrobbles/@attr/ignored`
fn ignored_count(response: &Value) -> u64 {
    match response.pointer("/scrobbles/@attr/ignored") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

impl Scrobbler for AudioscrobblerScrobbler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn now_playing(&mut self, track: &Track) -> Result<()> {
        let session_key = self.ensure_session().await?;

        let mut params = track_params(track);
        params.insert("sk", session_key);
        self.call("track.updateNowPlaying", params).await?;

        log::info!("[{}] NowPlaying: {} by {}", self.name, track.title, track.artist);
        Ok(())
    }

    async fn scrobble(&mut self, scrobble: &Scrobble) -> Result<()> {
        let session_key = self.ensure_session().await?;

        let track = &scrobble.track;
        let mut params = track_params(track);
        params.insert("timestamp", scrobble.timestamp.timestamp().to_string());
        params.insert("sk", session_key);
        let response = self.call("track.scrobble", params).await?;

        // Ignored scrobbles would be ignored again on retry, so they count as delivered
        if ignored_count(&response) > 0 {
            log::warn!(
                "[{}] Scrobble ignored by service: {} by {}",
                self.name,
                track.title,
                track.artist
            );
        } else {
            log::info!("[{}] Submitted: {} by {}", self.name, track.title, track.artist);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track() -> Track {
        Track {
            title: "Windowlicker".to_string(),
            artist: "Aphex Twin".to_string(),
            album: String::new(),
            album_artist: String::new(),
            track_number: Some(0),
            duration: 0,
        }
    }

    #[test]
    fn signature_sorts_params_and_skips_format() {
        let mut params = Params::new();
        params.insert("method", "auth.getMobileSession".to_string());
        params.insert("api_key", "key".to_string());
        params.insert("format", "json".to_string());

        let expected = format!("{:x}", md5::compute("api_keykeymethodauth.getMobileSessionsecret"));
        assert_eq!(sign(&params, "secret"), expected);
    }

    #[test]
    fn unknown_optional_fields_are_omitted() {
        let params = track_params(&track());

        assert_eq!(params.get("artist").map(String::as_str), Some("Aphex Twin"));
        assert_eq!(params.get("track").map(String::as_str), Some("Windowlicker"));
        assert!(!params.contains_key("album"));
        assert!(!params.contains_key("albumArtist"));
        assert!(!params.contains_key("trackNumber"));
        assert!(!params.contains_key("duration"));
    }

    #[test]
    fn known_optional_fields_are_sent() {
        let mut track = track();
        track.album = "Windowlicker EP".to_string();
        track.track_number = Some(1);
        track.duration = 367;

        let params = track_params(&track);
        assert_eq!(params.get("album").map(String::as_str), Some("Windowlicker EP"));
        assert_eq!(params.get("trackNumber").map(String::as_str), Some("1"));
        assert_eq!(params.get("duration").map(String::as_str), Some("367"));
    }

    #[test]
    fn ignored_count_accepts_numbers_and_strings() {
        assert_eq!(ignored_count(&json!({"scrobbles": {"@attr": {"ignored": 1}}})), 1);
        assert_eq!(ignored_count(&json!({"scrobbles": {"@attr": {"ignored": "0"}}})), 0);
        assert_eq!(ignored_count(&json!({})), 0);
    }
}

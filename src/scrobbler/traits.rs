// Common types and traits for scrobbling services

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Track information as reported to a scrobbling service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub track_number: Option<u32>,
    pub duration: u32, // Duration in seconds, 0 when unknown
}

impl Track {
    /// Track number to put on the wire, if there is a meaningful one
    pub fn wire_track_number(&self) -> Option<u32> {
        self.track_number.filter(|n| *n > 0)
    }

    /// Duration to put on the wire, if known
    pub fn wire_duration(&self) -> Option<u32> {
        (self.duration > 0).then_some(self.duration)
    }
}

/// A finished listen waiting to be submitted.
///
/// This is also the record persisted in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scrobble {
    pub track: Track,
    /// When the listening session started
    pub timestamp: DateTime<Utc>,
}

/// Common trait for all scrobbling services
pub trait Scrobbler: Send {
    /// Name used for logging and for the service's retry queue
    fn name(&self) -> &str;

    /// Update "now playing" status
    fn now_playing(&mut self, track: &Track) -> impl Future<Output = Result<()>> + Send;

    /// Submit a scrobble
    fn scrobble(&mut self, scrobble: &Scrobble) -> impl Future<Output = Result<()>> + Send;
}

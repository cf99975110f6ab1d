// Player connection module
// The capability the tracker polls, its MPD implementation, and the
// supervisor keeping the connection alive

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod mpd;
pub mod supervisor;

/// Connection handle shared by the tracker and the supervisor
pub type SharedConnection<C> = Arc<Mutex<C>>;

/// Position in the current track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub elapsed: u64, // Seconds listened so far
    pub length: u64,  // Total track length in seconds, 0 for streams
}

/// Player status at poll time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub playing: bool,
    pub position: Position,
}

/// Metadata of the current song as reported by the player
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Song {
    pub file: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub track_number: Option<u32>,
    pub duration: u32,
}

impl Song {
    /// Whether two songs are the same track. Numeric fields are ignored.
    pub fn same_track(&self, other: &Song) -> bool {
        self.file == other.file
            && self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.album_artist == other.album_artist
    }
}

/// Parse a track number such as `"7"` or `"7/12"`.
/// Anything unparsable or negative is unknown.
pub fn parse_track_number(raw: &str) -> Option<u32> {
    let number = raw.split('/').next().unwrap_or_default().trim();
    number.parse().ok()
}

/// Parse a duration given in (fractional) seconds, rounded to whole seconds.
/// Anything unparsable or negative is 0.
pub fn parse_duration(raw: &str) -> u32 {
    match raw.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => (seconds + 0.5) as u32,
        _ => 0,
    }
}

/// A live connection to the media player
pub trait PlayerConnection: Send {
    /// Playback state and position
    fn status(&mut self) -> impl Future<Output = Result<Status>> + Send;

    /// Player's lifetime play-time counter in seconds
    fn play_time(&mut self) -> impl Future<Output = Result<u64>> + Send;

    fn current_song(&mut self) -> impl Future<Output = Result<Song>> + Send;

    /// No-op request keeping the connection alive
    fn ping(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Whether the connection has been lost and must be replaced
    fn is_closed(&self) -> bool;
}

/// Knows how to open new connections to the player
pub trait Connector: Send + Sync {
    type Connection: PlayerConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_numbers_parse_leniently() {
        assert_eq!(parse_track_number("7"), Some(7));
        assert_eq!(parse_track_number("7/12"), Some(7));
        assert_eq!(parse_track_number(""), None);
        assert_eq!(parse_track_number("-3"), None);
        assert_eq!(parse_track_number("A1"), None);
    }

    #[test]
    fn durations_round_and_default_to_zero() {
        assert_eq!(parse_duration("215.4"), 215);
        assert_eq!(parse_duration("215.5"), 216);
        assert_eq!(parse_duration("-1"), 0);
        assert_eq!(parse_duration("NaN"), 0);
        assert_eq!(parse_duration(""), 0);
    }

    #[test]
    fn identity_ignores_numeric_fields() {
        let a = Song {
            file: "a.flac".to_string(),
            title: "Title".to_string(),
            track_number: Some(1),
            duration: 100,
            ..Default::default()
        };
        let mut b = a.clone();
        b.track_number = None;
        b.duration = 0;
        assert!(a.same_track(&b));

        b.file = "b.flac".to_string();
        assert!(!a.same_track(&b));
    }
}

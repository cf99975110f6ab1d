// mpd-scrobbler
// Watches what MPD plays and scrobbles it to Last.fm compatible services and ListenBrainz

pub mod config;
pub mod delivery;
pub mod player;
pub mod queue;
pub mod scrobbler;
pub mod tracker;

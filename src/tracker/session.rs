// Play session state machine
// Turns successive player observations into now playing and scrobble events

use crate::player::{Position, Song};
use crate::scrobbler::{Scrobble, Track};
use chrono::{DateTime, Utc};

pub const SUBMIT_TIME: u64 = 240; // 4 minutes in seconds
pub const SUBMIT_PERCENTAGE: u64 = 50;
pub const SUBMIT_MIN_DURATION: u64 = 30; // Minimum track length in seconds to scrobble

/// Events generated by the play session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    NowPlaying(Track),
    Submit(Scrobble),
}

/// When a listen counts as a scrobble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitPolicy {
    /// Seconds after which any track qualifies
    pub time: u64,
    /// Percentage of the track length after which it qualifies
    pub percentage: u64,
    /// Tracks shorter than this never qualify
    pub min_duration: u64,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            time: SUBMIT_TIME,
            percentage: SUBMIT_PERCENTAGE,
            min_duration: SUBMIT_MIN_DURATION,
        }
    }
}

impl SubmitPolicy {
    /// Whether `elapsed` seconds of a track `length` seconds long are enough.
    /// Time and percentage thresholds are OR'd; streams (length 0) only use time.
    pub fn reached(&self, elapsed: i64, length: u64) -> bool {
        if length < self.min_duration || elapsed < 0 {
            return false;
        }
        let elapsed = elapsed as u64;

        if length > 0 {
            elapsed >= self.time
                || elapsed.saturating_mul(100) >= length.saturating_mul(self.percentage)
        } else {
            elapsed >= self.time
        }
    }
}

/// One poll worth of player state
#[derive(Debug, Clone)]
pub struct Observation {
    pub position: Position,
    pub play_time: u64,
    pub song: Song,
}

/// Represents the current play session state
#[derive(Debug, Clone)]
pub struct PlaySession {
    policy: SubmitPolicy,
    song: Song,
    position: Position,
    /// Play-time counter value when the session started
    session_offset: i64,
    started_at: DateTime<Utc>,
    /// Last seen play-time counter
    play_time: i64,
    submitted: bool,
}

impl PlaySession {
    pub fn new(policy: SubmitPolicy) -> Self {
        Self {
            policy,
            song: Song::default(),
            position: Position::default(),
            session_offset: 0,
            started_at: Utc::now(),
            play_time: 0,
            submitted: false,
        }
    }

    pub fn submitted(&self) -> bool {
        self.submitted
    }

    /// Seconds listened in the current session
    pub fn elapsed(&self) -> i64 {
        self.play_time - self.session_offset
    }

    /// Check if the session should be scrobbled
    pub fn can_submit(&self) -> bool {
        if self.submitted || self.song.title.is_empty() || self.song.artist.is_empty() {
            return false;
        }

        self.policy.reached(self.elapsed(), self.position.length)
    }

    fn track(&self) -> Track {
        Track {
            title: self.song.title.clone(),
            artist: self.song.artist.clone(),
            album: self.song.album.clone(),
            album_artist: self.song.album_artist.clone(),
            track_number: self.song.track_number,
            duration: self.song.duration,
        }
    }

    fn scrobble(&self) -> Scrobble {
        Scrobble {
            track: self.track(),
            timestamp: self.started_at,
        }
    }

    /// Emit the scrobble for the current session if it has earned one
    pub fn flush(&mut self) -> Option<PlaybackEvent> {
        if !self.can_submit() {
            return None;
        }

        log::info!(
            "Scrobbling: {} - {} (played {}s / {}s)",
            self.song.artist,
            self.song.title,
            self.elapsed(),
            self.position.length
        );
        self.submitted = true;
        Some(PlaybackEvent::Submit(self.scrobble()))
    }

    /// Start a new session for the current song at `play_time`
    fn restart(&mut self, play_time: i64, now: DateTime<Utc>) {
        self.session_offset = play_time;
        self.started_at = now;
        self.submitted = false;
    }

    /// Feed one observation of a playing player
    pub fn observe(&mut self, observation: Observation, now: DateTime<Utc>) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        let Observation {
            position,
            play_time,
            song,
        } = observation;
        let play_time = play_time as i64;

        if !song.same_track(&self.song) {
            events.extend(self.flush());

            log::info!(
                "New track: {} - {} ({}s)",
                song.artist,
                song.title,
                position.length
            );
            self.song = song;
            self.position = position;
            self.restart(play_time, now);
            events.push(PlaybackEvent::NowPlaying(self.track()));
        } else if play_time < self.play_time {
            // The counter only goes back when the player restarted
            log::info!(
                "Play-time counter went back from {}s to {}s, shifting session start",
                self.play_time,
                play_time
            );
            self.session_offset -= self.play_time - play_time;
        }

        self.play_time = play_time;

        if position != self.position {
            if position.elapsed < self.position.elapsed {
                // Seeked back or repeating the track
                if self.submitted || self.can_submit() {
                    if !self.submitted {
                        events.push(PlaybackEvent::Submit(self.scrobble()));
                    }
                    log::info!("Relistening: {} - {}", self.song.artist, self.song.title);
                    self.restart(play_time, now);
                    events.push(PlaybackEvent::NowPlaying(self.track()));
                } else {
                    // Not earned yet: the replayed part counts once,
                    // never worse than a fresh listen
                    let rewound = (self.position.elapsed - position.elapsed) as i64;
                    self.session_offset =
                        self.session_offset.saturating_add(rewound).min(play_time);
                }
            }
            self.position = position;
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn song(title: &str) -> Song {
        Song {
            file: format!("{}.flac", title),
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_artist: "Artist".to_string(),
            track_number: Some(1),
            duration: 300,
        }
    }

    fn at(elapsed: u64, length: u64, play_time: u64, song: &Song) -> Observation {
        Observation {
            position: Position { elapsed, length },
            play_time,
            song: song.clone(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn submits(events: &[PlaybackEvent]) -> usize {
        events.iter().filter(|e| matches!(e, PlaybackEvent::Submit(_))).count()
    }

    fn now_playings(events: &[PlaybackEvent]) -> usize {
        events.iter().filter(|e| matches!(e, PlaybackEvent::NowPlaying(_))).count()
    }

    #[test]
    fn percentage_threshold_wins_for_long_tracks() {
        let policy = SubmitPolicy::default();
        assert!(!policy.reached(199, 400));
        assert!(policy.reached(200, 400));
        assert!(policy.reached(240, 1000));
        assert!(!policy.reached(239, 1000));
    }

    #[test]
    fn absurd_player_values_do_not_overflow() {
        let policy = SubmitPolicy::default();
        assert!(policy.reached(i64::MAX, 400));
        assert!(policy.reached(i64::MAX, u64::MAX));
        assert!(!policy.reached(100, u64::MAX));
    }

    #[test]
    fn streams_only_use_the_time_threshold() {
        let policy = SubmitPolicy {
            min_duration: 0,
            ..Default::default()
        };
        assert!(!policy.reached(239, 0));
        assert!(policy.reached(240, 0));
    }

    #[test]
    fn short_tracks_never_qualify() {
        let policy = SubmitPolicy::default();
        assert!(!policy.reached(1000, 20));

        let short = song("Jingle");
        let mut session = PlaySession::new(policy);
        session.observe(at(0, 20, 0, &short), t0());
        session.observe(at(20, 20, 1000, &short), t0());
        assert_eq!(session.flush(), None);
    }

    #[test]
    fn reaching_the_threshold_is_monotonic() {
        let policy = SubmitPolicy::default();
        for length in [0, 30, 45, 400, 3600] {
            let mut reached = false;
            for elapsed in 0..4000 {
                let now = policy.reached(elapsed, length);
                assert!(!reached || now, "length {} elapsed {}", length, elapsed);
                reached = now;
            }
        }
    }

    #[test]
    fn new_track_flushes_the_previous_session_once() {
        let a = song("A");
        let b = song("B");
        let mut session = PlaySession::new(SubmitPolicy::default());

        let events = session.observe(at(0, 300, 1000, &a), t0());
        assert_eq!(events, vec![PlaybackEvent::NowPlaying(session.track())]);

        assert!(session.observe(at(160, 300, 1160, &a), t0()).is_empty());

        let events = session.observe(at(0, 300, 1165, &b), t0() + Duration::seconds(165));
        assert_eq!(submits(&events), 1);
        assert_eq!(now_playings(&events), 1);
        match &events[0] {
            PlaybackEvent::Submit(scrobble) => {
                assert_eq!(scrobble.track.title, "A");
                assert_eq!(scrobble.timestamp, t0());
            }
            other => panic!("expected the scrobble first, got {:?}", other),
        }
        assert!(matches!(&events[1], PlaybackEvent::NowPlaying(track) if track.title == "B"));

        // B just started: nothing to flush
        assert_eq!(session.flush(), None);
    }

    #[test]
    fn pausing_flushes_at_most_once() {
        let a = song("A");
        let mut session = PlaySession::new(SubmitPolicy::default());
        session.observe(at(0, 300, 0, &a), t0());
        session.observe(at(200, 300, 200, &a), t0());

        assert!(session.flush().is_some());
        assert!(session.submitted());
        assert_eq!(session.flush(), None);

        // Resuming the same track does not produce another scrobble
        session.observe(at(290, 300, 290, &a), t0());
        assert_eq!(session.flush(), None);
    }

    #[test]
    fn untitled_or_artistless_songs_are_not_scrobbled() {
        let mut anonymous = song("A");
        anonymous.artist.clear();
        let mut session = PlaySession::new(SubmitPolicy::default());
        session.observe(at(0, 300, 0, &anonymous), t0());
        session.observe(at(299, 300, 299, &anonymous), t0());
        assert_eq!(session.flush(), None);
    }

    #[test]
    fn seeking_back_after_submit_starts_a_relisten() {
        let a = song("A");
        let mut session = PlaySession::new(SubmitPolicy::default());
        session.observe(at(0, 300, 0, &a), t0());
        session.observe(at(180, 300, 180, &a), t0());
        assert!(session.flush().is_some());

        let later = t0() + Duration::seconds(185);
        let events = session.observe(at(5, 300, 185, &a), later);
        assert_eq!(submits(&events), 0);
        assert_eq!(now_playings(&events), 1);
        assert!(!session.submitted());
        assert_eq!(session.elapsed(), 0);

        // The relisten can be scrobbled again, stamped with its own start
        session.observe(at(160, 300, 340, &a), later);
        match session.flush() {
            Some(PlaybackEvent::Submit(scrobble)) => assert_eq!(scrobble.timestamp, later),
            other => panic!("expected a scrobble, got {:?}", other),
        }
    }

    #[test]
    fn seeking_back_when_eligible_submits_then_relistens() {
        let a = song("A");
        let mut session = PlaySession::new(SubmitPolicy::default());
        session.observe(at(0, 300, 0, &a), t0());
        session.observe(at(200, 300, 200, &a), t0());

        let events = session.observe(at(0, 300, 205, &a), t0());
        assert_eq!(submits(&events), 1);
        assert_eq!(now_playings(&events), 1);
        assert!(matches!(events[0], PlaybackEvent::Submit(_)));
        assert!(!session.submitted());
    }

    #[test]
    fn seeking_back_early_absorbs_the_jump() {
        let a = song("A");
        let mut session = PlaySession::new(SubmitPolicy::default());
        session.observe(at(0, 300, 1000, &a), t0());
        session.observe(at(100, 300, 1100, &a), t0());

        let events = session.observe(at(40, 300, 1105, &a), t0());
        assert!(events.is_empty());
        // 105s counted, 60s replayed
        assert_eq!(session.elapsed(), 45);
    }

    #[test]
    fn absorbed_jump_never_goes_below_a_fresh_listen() {
        let a = song("A");
        let mut session = PlaySession::new(SubmitPolicy::default());
        session.observe(at(100, 300, 1000, &a), t0());
        session.observe(at(110, 300, 1010, &a), t0());

        session.observe(at(0, 300, 1015, &a), t0());
        assert_eq!(session.elapsed(), 0);
    }

    #[test]
    fn counter_regression_preserves_elapsed_time() {
        let a = song("A");
        let mut session = PlaySession::new(SubmitPolicy::default());
        session.observe(at(0, 300, 4800, &a), t0());
        session.observe(at(100, 300, 5000, &a), t0());
        assert_eq!(session.elapsed(), 200);

        let events = session.observe(at(100, 300, 100, &a), t0());
        assert!(events.is_empty());
        assert_eq!(session.elapsed(), 200);

        session.observe(at(140, 300, 140, &a), t0());
        assert_eq!(session.elapsed(), 240);
        assert!(session.can_submit());
    }
}

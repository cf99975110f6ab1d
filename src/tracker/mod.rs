// Playback tracker
// Polls the player on a fixed interval and feeds the play session state machine

use crate::config::TitleSplit;
use crate::player::{PlayerConnection, SharedConnection};
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub mod session;
pub mod title_split;

pub use session::{Observation, PlaySession, PlaybackEvent, SubmitPolicy};
use title_split::SongCleaner;

pub struct Tracker<C: PlayerConnection> {
    connection: SharedConnection<C>,
    session: PlaySession,
    cleaner: SongCleaner,
    interval: Duration,
    events: mpsc::Sender<PlaybackEvent>,
}

impl<C: PlayerConnection> Tracker<C> {
    pub fn new(
        connection: SharedConnection<C>,
        policy: SubmitPolicy,
        title_split: TitleSplit,
        interval: Duration,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            connection,
            session: PlaySession::new(policy),
            cleaner: SongCleaner::new(title_split),
            interval,
            events,
        }
    }

    /// Fetch player state. `None` means nothing is playing.
    async fn fetch(&self) -> Result<Option<Observation>> {
        let mut conn = self.connection.lock().await;

        let status = conn.status().await.context("Failed to get player status")?;
        if !status.playing {
            return Ok(None);
        }
        let play_time = conn.play_time().await.context("Failed to get play time")?;
        let song = conn.current_song().await.context("Failed to get current song")?;

        Ok(Some(Observation {
            position: status.position,
            play_time,
            song,
        }))
    }

    /// Run one poll cycle and return the resulting events
    pub async fn poll(&mut self) -> Vec<PlaybackEvent> {
        match self.fetch().await {
            Ok(Some(mut observation)) => {
                self.cleaner.clean(&mut observation.song);
                self.session.observe(observation, Utc::now())
            }
            Ok(None) => self.session.flush().into_iter().collect(),
            Err(e) => {
                log::warn!("Poll failed: {:#}", e);
                self.session.flush().into_iter().collect()
            }
        }
    }

    async fn emit(&self, events: Vec<PlaybackEvent>) -> Result<()> {
        for event in events {
            self.events
                .send(event)
                .await
                .context("Event channel closed")?;
        }
        Ok(())
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let events = self.poll().await;
            if let Err(e) = self.emit(events).await {
                log::error!("Stopping tracker: {:#}", e);
                return;
            }
        }

        // Don't lose a listen in progress
        let pending: Vec<_> = self.session.flush().into_iter().collect();
        if let Err(e) = self.emit(pending).await {
            log::error!("Failed to hand over the last scrobble: {:#}", e);
        }
        log::debug!("Tracker stopped");
    }
}

// Delivery pipeline
// Forwards events to one scrobbling service, keeping failed scrobbles in its
// retry queue until they go through, oldest first

use crate::queue::{Queue, QueueError};
use crate::scrobbler::{Scrobble, Scrobbler, Track};

pub struct DeliveryPipeline<S: Scrobbler> {
    scrobbler: S,
    queue: Queue,
}

impl<S: Scrobbler> DeliveryPipeline<S> {
    pub fn new(scrobbler: S, queue: Queue) -> Self {
        Self { scrobbler, queue }
    }

    pub fn name(&self) -> &str {
        self.scrobbler.name()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Replay the retry queue, oldest first.
    ///
    /// An entry leaves the queue only once the service accepted it. The first
    /// failure stops the drain with the failing entry still at the head.
    /// Records that can't be read back are dropped, they would block the queue for good.
    /// Returns whether the queue was emptied.
    pub async fn drain(&mut self) -> bool {
        loop {
            let entry = match self.queue.front() {
                Ok(Some(entry)) => entry,
                Ok(None) => return true,
                Err(QueueError::Corrupt { id, source }) => {
                    log::error!(
                        "[{}] Dropping unreadable queue record {}: {}",
                        self.name(),
                        id,
                        source
                    );
                    if let Err(e) = self.queue.remove(id) {
                        log::error!("[{}] Queue remove error: {}", self.name(), e);
                        return false;
                    }
                    continue;
                }
                Err(e) => {
                    log::error!("[{}] Queue read error: {}", self.name(), e);
                    return false;
                }
            };

            if let Err(e) = self.scrobbler.scrobble(&entry.scrobble).await {
                log::warn!("[{}] Scrobble error: {:#}", self.name(), e);
                return false;
            }

            if let Err(e) = self.queue.remove(entry.id) {
                log::error!("[{}] Queue remove error: {}", self.name(), e);
                return false;
            }
        }
    }

    /// Drain whatever a previous run left behind
    pub async fn start(&mut self) {
        match self.queue.len() {
            Ok(0) => return,
            Ok(pending) => log::info!("[{}] Emptying queue ({} pending)", self.name(), pending),
            Err(e) => log::error!("[{}] Queue read error, emptying anyway: {}", self.name(), e),
        }

        if self.drain().await {
            log::info!("[{}] Emptying done", self.name());
        } else {
            match self.queue.len() {
                Ok(left) => {
                    log::info!("[{}] Emptying stopped, {} left for later", self.name(), left)
                }
                Err(e) => log::error!("[{}] Emptying stopped: {}", self.name(), e),
            }
        }
    }

    /// Deliver a fresh scrobble, then whatever is still queued
    pub async fn submit(&mut self, scrobble: Scrobble) {
        match self.scrobbler.scrobble(&scrobble).await {
            Ok(()) => {
                self.drain().await;
            }
            Err(e) => {
                log::warn!("[{}] Scrobble error: {:#}", self.name(), e);
                match self.queue.enqueue(&scrobble) {
                    Ok(()) => log::info!(
                        "[{}] Queued: {} by {}",
                        self.name(),
                        scrobble.track.title,
                        scrobble.track.artist
                    ),
                    Err(e) => log::error!(
                        "[{}] Lost scrobble {} by {}: {}",
                        self.name(),
                        scrobble.track.title,
                        scrobble.track.artist,
                        e
                    ),
                }
            }
        }
    }

    /// Best effort, the next update supersedes a missed one
    pub async fn now_playing(&mut self, track: Track) {
        if let Err(e) = self.scrobbler.now_playing(&track).await {
            log::warn!("[{}] NowPlaying error: {:#}", self.name(), e);
        }
    }
}

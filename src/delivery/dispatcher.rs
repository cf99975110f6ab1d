// Event dispatcher
// Fans tracker events out to one worker task per scrobbling service

use super::pipeline::DeliveryPipeline;
use crate::queue::Queue;
use crate::scrobbler::{Scrobble, Scrobbler};
use crate::tracker::PlaybackEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Events buffered per service. Past that, now playing updates get dropped
/// and scrobbles go straight to the retry queue.
pub const SERVICE_BUFFER: usize = 32;

struct Worker {
    name: String,
    events: mpsc::Sender<PlaybackEvent>,
    queue: Queue,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Keep a scrobble the worker can't take right now for its next drain
    fn park(&self, scrobble: &Scrobble) {
        let track = &scrobble.track;
        match self.queue.enqueue(scrobble) {
            Ok(()) => log::warn!(
                "[{}] Busy, queued {} by {} for later",
                self.name,
                track.title,
                track.artist
            ),
            Err(e) => log::error!(
                "[{}] Lost scrobble {} by {}: {}",
                self.name,
                track.title,
                track.artist,
                e
            ),
        }
    }
}

pub struct Dispatcher {
    workers: Vec<Worker>,
    send_duration: bool,
}

impl Dispatcher {
    /// Start one worker per pipeline. Each drains its retry queue before taking live events.
    pub fn spawn<S>(pipelines: Vec<DeliveryPipeline<S>>, send_duration: bool) -> Self
    where
        S: Scrobbler + 'static,
    {
        let workers = pipelines
            .into_iter()
            .map(|pipeline| {
                let name = pipeline.name().to_string();
                let queue = pipeline.queue().clone();
                let (tx, rx) = mpsc::channel(SERVICE_BUFFER);
                let handle = tokio::spawn(deliver(pipeline, rx));
                Worker {
                    name,
                    events: tx,
                    queue,
                    handle,
                }
            })
            .collect();

        Self {
            workers,
            send_duration,
        }
    }

    /// Strip what the user chose not to report
    fn outbound(&self, mut event: PlaybackEvent) -> PlaybackEvent {
        if !self.send_duration {
            match &mut event {
                PlaybackEvent::NowPlaying(track) => track.duration = 0,
                PlaybackEvent::Submit(scrobble) => scrobble.track.duration = 0,
            }
        }
        event
    }

    /// Hand an event to every worker without waiting on any of them
    fn dispatch(&self, event: PlaybackEvent) {
        let event = self.outbound(event);

        for worker in &self.workers {
            let rejected = match worker.events.try_send(event.clone()) {
                Ok(()) => continue,
                Err(TrySendError::Full(event)) => event,
                Err(TrySendError::Closed(event)) => {
                    log::error!("[{}] Delivery worker is gone", worker.name);
                    event
                }
            };

            match rejected {
                PlaybackEvent::NowPlaying(track) => log::warn!(
                    "[{}] Busy, dropping now playing update for {} by {}",
                    worker.name,
                    track.title,
                    track.artist
                ),
                PlaybackEvent::Submit(scrobble) => worker.park(&scrobble),
            }
        }
    }

    /// Forward events until the tracker hangs up, then wait for every worker to finish
    pub async fn run(self, mut events: mpsc::Receiver<PlaybackEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }

        for worker in self.workers {
            drop(worker.events);
            if let Err(e) = worker.handle.await {
                log::error!("[{}] Delivery worker failed: {}", worker.name, e);
            }
        }
        log::debug!("Dispatcher stopped");
    }
}

async fn deliver<S: Scrobbler>(
    mut pipeline: DeliveryPipeline<S>,
    mut events: mpsc::Receiver<PlaybackEvent>,
) {
    pipeline.start().await;

    while let Some(event) = events.recv().await {
        match event {
            PlaybackEvent::NowPlaying(track) => pipeline.now_playing(track).await,
            PlaybackEvent::Submit(scrobble) => pipeline.submit(scrobble).await,
        }
    }
}

// Configured scrobbling services

use super::audioscrobbler::AudioscrobblerScrobbler;
use super::listenbrainz::ListenBrainzScrobbler;
use super::traits::{Scrobble, Scrobbler, Track};
use crate::config::Config;
use anyhow::Result;

/// Scrobbling service
pub enum Service {
    Audioscrobbler(AudioscrobblerScrobbler),
    ListenBrainz(ListenBrainzScrobbler),
}

impl Service {
    /// Create every enabled service from the configuration
    pub fn from_config(config: &Config) -> Result<Vec<Self>> {
        let audioscrobbler = config.lastfm.iter().filter(|c| c.enabled).map(|c| {
            AudioscrobblerScrobbler::new(
                c.name.clone(),
                c.api_key.clone(),
                c.api_secret.clone(),
                c.username.clone(),
                c.password.clone(),
                c.api_url.clone(),
            )
            .map(Self::Audioscrobbler)
        });

        let listenbrainz = config.listenbrainz.iter().filter(|c| c.enabled).map(|c| {
            ListenBrainzScrobbler::new(c.name.clone(), c.token.clone(), c.api_url.clone())
                .map(Self::ListenBrainz)
        });

        audioscrobbler.chain(listenbrainz).collect()
    }
}

impl Scrobbler for Service {
    fn name(&self) -> &str {
        match self {
            Self::Audioscrobbler(scrobbler) => scrobbler.name(),
            Self::ListenBrainz(scrobbler) => scrobbler.name(),
        }
    }

    async fn now_playing(&mut self, track: &Track) -> Result<()> {
        match self {
            Self::Audioscrobbler(scrobbler) => scrobbler.now_playing(track).await,
            Self::ListenBrainz(scrobbler) => scrobbler.now_playing(track).await,
        }
    }

    async fn scrobble(&mut self, scrobble: &Scrobble) -> Result<()> {
        match self {
            Self::Audioscrobbler(scrobbler) => scrobbler.scrobble(scrobble).await,
            Self::ListenBrainz(scrobbler) => scrobbler.scrobble(scrobble).await,
        }
    }
}

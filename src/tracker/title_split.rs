// Song metadata normalization
// Fills in a missing artist, optionally splitting "Artist - Title" titles

use crate::config::TitleSplit;
use crate::player::Song;
use regex::Regex;

const ARTIST_TITLE_PATTERN: &str = "(.+) - (.+)";

pub struct SongCleaner {
    mode: TitleSplit,
    pattern: Option<Regex>,
}

impl SongCleaner {
    /// Create a new cleaner for the configured split mode
    pub fn new(mode: TitleSplit) -> Self {
        let pattern = match mode {
            TitleSplit::Off => None,
            _ => match Regex::new(ARTIST_TITLE_PATTERN) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Invalid title pattern '{}': {}", ARTIST_TITLE_PATTERN, e);
                    None
                }
            },
        };

        Self { mode, pattern }
    }

    /// Normalize a song in place
    pub fn clean(&self, song: &mut Song) {
        if song.artist.is_empty() && !song.album_artist.is_empty() {
            song.artist = song.album_artist.clone();
        }

        let applies = match self.mode {
            TitleSplit::Off => false,
            TitleSplit::MissingArtist => song.artist.is_empty(),
            TitleSplit::MissingAlbum => song.album.is_empty(),
        };
        if !applies || song.title.is_empty() {
            return;
        }

        let Some(pattern) = &self.pattern else {
            return;
        };
        if let Some(captures) = pattern.captures(&song.title) {
            let artist = captures[1].to_string();
            let title = captures[2].to_string();
            song.artist = artist;
            song.title = title;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(title: &str, artist: &str, album: &str) -> Song {
        Song {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn artist_falls_back_to_album_artist() {
        let mut s = song("Title", "", "");
        s.album_artist = "Album Artist".to_string();
        SongCleaner::new(TitleSplit::Off).clean(&mut s);
        assert_eq!(s.artist, "Album Artist");
    }

    #[test]
    fn disabled_split_leaves_title_alone() {
        let mut s = song("Daft Punk - Aerodynamic", "", "");
        SongCleaner::new(TitleSplit::Off).clean(&mut s);
        assert_eq!(s.title, "Daft Punk - Aerodynamic");
        assert_eq!(s.artist, "");
    }

    #[test]
    fn splits_when_artist_is_missing() {
        let mut s = song("Daft Punk - Aerodynamic", "", "");
        SongCleaner::new(TitleSplit::MissingArtist).clean(&mut s);
        assert_eq!(s.artist, "Daft Punk");
        assert_eq!(s.title, "Aerodynamic");

        let mut tagged = song("Daft Punk - Aerodynamic", "Someone", "");
        SongCleaner::new(TitleSplit::MissingArtist).clean(&mut tagged);
        assert_eq!(tagged.artist, "Someone");
    }

    #[test]
    fn splits_when_album_is_missing() {
        let mut s = song("Radio Host - Morning Show", "Station FM", "");
        SongCleaner::new(TitleSplit::MissingAlbum).clean(&mut s);
        assert_eq!(s.artist, "Radio Host");
        assert_eq!(s.title, "Morning Show");
    }

    #[test]
    fn split_is_greedy_on_the_artist_side() {
        let mut s = song("A - B - C", "", "");
        SongCleaner::new(TitleSplit::MissingArtist).clean(&mut s);
        assert_eq!(s.artist, "A - B");
        assert_eq!(s.title, "C");
    }
}

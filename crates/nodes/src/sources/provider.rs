// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Content providers: where a streaming source gets its track URLs from.

use portkit_core::params::{PlaylistKind, Service, SessionConfig};
use portkit_core::{PortKitError, Result};
use rand::seq::SliceRandom;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Descriptive fields of the current track, as strings ready for the
/// metadata store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TrackInfo {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub year: String,
    pub duration: String,
    pub track_number: String,
    pub total_tracks: String,
}

/// A playlist/catalog collaborator behind a streaming source.
pub trait ContentProvider: Send {
    /// Opens a session with the service.
    ///
    /// # Errors
    ///
    /// Any error; the caller reports it as `InsufficientResources`.
    fn init(&mut self, session: &SessionConfig) -> Result<()>;

    fn set_playback_mode(&mut self, shuffle: bool);

    /// Queues the items named by `name` under `kind`.
    ///
    /// # Errors
    ///
    /// Any error; the caller reports it as `InsufficientResources`.
    fn enqueue(&mut self, kind: PlaylistKind, name: &str, unlimited_search: bool) -> Result<()>;

    /// Advances to the next track, wrapping around at the end of the queue.
    fn next_url(&mut self) -> Option<String>;

    /// Steps back to the previous track, wrapping around at the start.
    fn prev_url(&mut self) -> Option<String>;

    fn current_track(&self) -> Option<TrackInfo>;
}

/// A streaming service as seen by the source component: which parameter
/// indexes carry its session and playlist, and which playlist kinds it
/// understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFlavour {
    pub service: Service,
    pub role: &'static str,
    pub kinds: &'static [PlaylistKind],
}

impl ServiceFlavour {
    pub fn supports(&self, kind: PlaylistKind) -> bool {
        self.kinds.contains(&kind)
    }
}

pub const GMUSIC: ServiceFlavour = ServiceFlavour {
    service: Service::Gmusic,
    role: "audio_source.http.gmusic",
    kinds: &[
        PlaylistKind::User,
        PlaylistKind::Artist,
        PlaylistKind::Album,
        PlaylistKind::Station,
        PlaylistKind::Genre,
        PlaylistKind::Situation,
        PlaylistKind::PromotedTracks,
        PlaylistKind::Tracks,
        PlaylistKind::Podcast,
    ],
};

pub const DEEZER: ServiceFlavour = ServiceFlavour {
    service: Service::Deezer,
    role: "audio_source.http.deezer",
    kinds: &[
        PlaylistKind::Tracks,
        PlaylistKind::Artist,
        PlaylistKind::Album,
        PlaylistKind::Mixes,
        PlaylistKind::Playlist,
        PlaylistKind::TopPlaylist,
        PlaylistKind::Moods,
        PlaylistKind::Podcast,
        PlaylistKind::UserFlow,
    ],
};

pub const FLAVOURS: [ServiceFlavour; 2] = [GMUSIC, DEEZER];

pub fn flavour_for_role(role: &str) -> Option<&'static ServiceFlavour> {
    FLAVOURS.iter().find(|f| f.role == role)
}

/// A catalog entry: a stream URL and its descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CatalogTrack {
    pub url: String,
    #[serde(flatten)]
    pub info: TrackInfo,
}

/// Provider over a catalog supplied in the component configuration.
///
/// Artist, album and track playlists select catalog entries whose matching
/// field contains the playlist name (case-insensitive). Every other kind
/// queues the whole catalog.
#[derive(Debug, Default)]
pub struct CatalogProvider {
    catalog: Vec<CatalogTrack>,
    queue: Vec<CatalogTrack>,
    pos: Option<usize>,
    shuffle: bool,
    session_open: bool,
}

impl CatalogProvider {
    pub const fn new(catalog: Vec<CatalogTrack>) -> Self {
        Self { catalog, queue: Vec::new(), pos: None, shuffle: false, session_open: false }
    }

    fn matches(kind: PlaylistKind, name: &str, track: &CatalogTrack) -> bool {
        let needle = name.to_lowercase();
        let field = match kind {
            PlaylistKind::Artist => &track.info.artist,
            PlaylistKind::Album => &track.info.album,
            PlaylistKind::Tracks => &track.info.title,
            _ => return true,
        };
        field.to_lowercase().contains(&needle)
    }
}

impl ContentProvider for CatalogProvider {
    fn init(&mut self, session: &SessionConfig) -> Result<()> {
        if self.catalog.is_empty() {
            return Err(PortKitError::Configuration("catalog is empty".to_string()));
        }
        tracing::debug!(?session, tracks = self.catalog.len(), "Catalog session opened");
        self.session_open = true;
        Ok(())
    }

    fn set_playback_mode(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
    }

    fn enqueue(&mut self, kind: PlaylistKind, name: &str, unlimited_search: bool) -> Result<()> {
        if !self.session_open {
            return Err(PortKitError::Runtime("session not initialized".to_string()));
        }
        let mut queue: Vec<CatalogTrack> =
            self.catalog.iter().filter(|t| Self::matches(kind, name, t)).cloned().collect();
        if queue.is_empty() {
            return Err(PortKitError::BadParameter(format!("no tracks match {kind:?} '{name}'")));
        }
        if self.shuffle {
            queue.shuffle(&mut rand::rng());
        }
        tracing::info!(?kind, name, unlimited_search, tracks = queue.len(), "Playlist enqueued");
        self.queue = queue;
        self.pos = None;
        Ok(())
    }

    fn next_url(&mut self) -> Option<String> {
        if self.queue.is_empty() {
            return None;
        }
        let next = self.pos.map_or(0, |p| (p + 1) % self.queue.len());
        self.pos = Some(next);
        self.queue.get(next).map(|t| t.url.clone())
    }

    fn prev_url(&mut self) -> Option<String> {
        let len = self.queue.len();
        if len == 0 {
            return None;
        }
        let prev = self.pos.map_or(len - 1, |p| (p + len - 1) % len);
        self.pos = Some(prev);
        self.queue.get(prev).map(|t| t.url.clone())
    }

    fn current_track(&self) -> Option<TrackInfo> {
        self.pos.and_then(|p| self.queue.get(p)).map(|t| t.info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(url: &str, artist: &str, title: &str) -> CatalogTrack {
        CatalogTrack {
            url: url.to_string(),
            info: TrackInfo {
                artist: artist.to_string(),
                title: title.to_string(),
                ..Default::default()
            },
        }
    }

    fn catalog() -> CatalogProvider {
        CatalogProvider::new(vec![
            track("http://a/1.mp3", "Nina Simone", "Sinnerman"),
            track("http://a/2.mp3", "Miles Davis", "So What"),
            track("http://a/3.mp3", "Nina Simone", "Feeling Good"),
        ])
    }

    #[test]
    fn test_flavours_by_role() {
        assert_eq!(flavour_for_role("audio_source.http.deezer"), Some(&DEEZER));
        assert!(GMUSIC.supports(PlaylistKind::Station));
        assert!(!DEEZER.supports(PlaylistKind::Station));
        assert!(flavour_for_role("audio_source.http.spotify").is_none());
    }

    #[test]
    fn test_artist_playlist_wraps_both_ways() {
        let mut p = catalog();
        p.init(&SessionConfig::default()).unwrap();
        p.enqueue(PlaylistKind::Artist, "nina", false).unwrap();
        assert_eq!(p.next_url().as_deref(), Some("http://a/1.mp3"));
        assert_eq!(p.next_url().as_deref(), Some("http://a/3.mp3"));
        assert_eq!(p.next_url().as_deref(), Some("http://a/1.mp3"));
        assert_eq!(p.prev_url().as_deref(), Some("http://a/3.mp3"));
        assert_eq!(p.current_track().unwrap().title, "Feeling Good");
    }

    #[test]
    fn test_enqueue_requires_matches_and_session() {
        let mut p = catalog();
        assert!(p.enqueue(PlaylistKind::User, "me", false).is_err());
        p.init(&SessionConfig::default()).unwrap();
        assert!(matches!(
            p.enqueue(PlaylistKind::Artist, "coltrane", false),
            Err(PortKitError::BadParameter(_))
        ));
        assert!(CatalogProvider::default().init(&SessionConfig::default()).is_err());
    }

    #[test]
    fn test_catalog_entries_deserialize_flat() {
        let value = serde_json::json!({ "url": "http://a/x.mp3", "artist": "A", "year": "1961" });
        let t: CatalogTrack = serde_json::from_value(value).unwrap();
        assert_eq!(t.info.artist, "A");
        assert_eq!(t.info.year, "1961");
    }
}

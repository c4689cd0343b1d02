//! Track records, named playlists, and the playback session model.
//!
//! The playback session keeps the user-curated original order separate from
//! the order playback actually walks (identical, or a shuffled permutation),
//! and binds the audible track by identity so that reorders, shuffles and
//! removals never silently swap what is playing.

use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, RngExt, SeedableRng};
use uuid::Uuid;

use crate::protocol::{RepeatMode, TrackSummary};

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_GENRE: &str = "Unknown Genre";
pub const UNKNOWN_YEAR: &str = "Unknown Year";

/// Extensions accepted by the add-files path. Everything else is skipped.
pub const AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "wav", "ogg", "m4a", "flac", "aac"];

/// Returns true if the file name carries an allow-listed audio extension.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            let lowered = extension.to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

/// Splits a `"Artist - Title"` style filename into its parts. Anything that
/// does not match the pattern becomes a title with an unknown artist.
pub fn parse_track_name(filename: &str) -> (String, String) {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    if let Some((artist, title)) = stem.split_once(" - ") {
        let artist = artist.trim();
        let title = title.trim();
        if !artist.is_empty() && !title.is_empty() {
            return (artist.to_string(), title.to_string());
        }
    }
    let title = stem.trim();
    let title = if title.is_empty() { UNKNOWN_TITLE } else { title };
    (UNKNOWN_ARTIST.to_string(), title.to_string())
}

/// Descriptive fields known for a track. Every field is always present;
/// unknown values hold their documented sentinel so downstream code never
/// deals with missing fields.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TrackMetadata {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_artist")]
    pub artist: String,
    #[serde(default = "default_album")]
    pub album: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_year")]
    pub year: String,
    #[serde(default)]
    pub lyrics: Option<String>,
}

fn default_title() -> String {
    UNKNOWN_TITLE.to_string()
}
fn default_artist() -> String {
    UNKNOWN_ARTIST.to_string()
}
fn default_album() -> String {
    UNKNOWN_ALBUM.to_string()
}
fn default_genre() -> String {
    UNKNOWN_GENRE.to_string()
}
fn default_year() -> String {
    UNKNOWN_YEAR.to_string()
}

impl Default for TrackMetadata {
    fn default() -> Self {
        Self {
            title: default_title(),
            artist: default_artist(),
            album: default_album(),
            genre: default_genre(),
            year: default_year(),
            lyrics: None,
        }
    }
}

impl TrackMetadata {
    /// Seeds title and artist from the filename, everything else unknown.
    pub fn from_filename(filename: &str) -> Self {
        let (artist, title) = parse_track_name(filename);
        Self {
            title,
            artist,
            ..Self::default()
        }
    }

    /// Monotonic merge: a field already holding a real value is never
    /// regressed to a sentinel, and incoming real values always win.
    pub fn merge_from(&mut self, fetched: &TrackMetadata) {
        merge_field(&mut self.title, &fetched.title, UNKNOWN_TITLE);
        merge_field(&mut self.artist, &fetched.artist, UNKNOWN_ARTIST);
        merge_field(&mut self.album, &fetched.album, UNKNOWN_ALBUM);
        merge_field(&mut self.genre, &fetched.genre, UNKNOWN_GENRE);
        merge_field(&mut self.year, &fetched.year, UNKNOWN_YEAR);
        if let Some(lyrics) = fetched.lyrics.as_ref() {
            if !lyrics.trim().is_empty() {
                self.lyrics = Some(lyrics.clone());
            }
        }
    }

    /// True when at least one descriptive field still holds its sentinel,
    /// meaning a tag fetch could learn something new.
    pub fn is_incomplete(&self) -> bool {
        self.title == UNKNOWN_TITLE
            || self.artist == UNKNOWN_ARTIST
            || self.album == UNKNOWN_ALBUM
            || self.genre == UNKNOWN_GENRE
            || self.year == UNKNOWN_YEAR
            || self.lyrics.is_none()
    }
}

fn merge_field(current: &mut String, incoming: &str, sentinel: &str) {
    let incoming = incoming.trim();
    if !incoming.is_empty() && incoming != sentinel {
        *current = incoming.to_string();
    }
}

/// One entry in a playlist.
#[derive(Debug, Clone)]
pub struct Track {
    /// Synthetic stable id assigned at ingestion. Paths are not unique.
    pub id: String,
    pub path: PathBuf,
    /// Original filename.
    pub name: String,
    /// Position in the unshuffled order, reassigned on every mutation.
    pub original_index: usize,
    pub metadata: TrackMetadata,
}

impl Track {
    /// Creates a record for a newly selected file with a fresh id and
    /// filename-derived metadata.
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());
        let metadata = TrackMetadata::from_filename(&name);
        Self {
            id: Uuid::new_v4().to_string(),
            path,
            name,
            original_index: 0,
            metadata,
        }
    }

    /// Whether the underlying file is still present. A restored record whose
    /// file is gone is the "needs re-selection" condition.
    pub fn is_file_present(&self) -> bool {
        self.path.is_file()
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
            title: self.metadata.title.clone(),
            artist: self.metadata.artist.clone(),
            album: self.metadata.album.clone(),
            genre: self.metadata.genre.clone(),
            year: self.metadata.year.clone(),
        }
    }
}

/// Reassigns `original_index` for the whole list after a structural change.
pub fn reindex(tracks: &mut [Track]) {
    for (index, track) in tracks.iter_mut().enumerate() {
        track.original_index = index;
    }
}

/// A named, ordered track list. Names are unique and case-sensitive.
#[derive(Debug, Clone)]
pub struct NamedPlaylist {
    pub name: String,
    pub tracks: Vec<Track>,
}

impl NamedPlaylist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
        }
    }

    pub fn track_by_id(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.tracks.iter().position(|track| track.id == id)
    }
}

/// Playback-order state for the active playlist.
///
/// `order` holds track ids: identical to the original order, or a uniform
/// random permutation while shuffle is on. The audible track is bound by id,
/// and every structural change relocates the position by identity lookup.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    order: Vec<String>,
    position: Option<usize>,
    playing_track_id: Option<String>,
    shuffled: bool,
    // StdRng seed kept inline so shuffling stays thread safe.
    rng_seed: [u8; 32],
}

impl PlaybackSession {
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        if let Err(error) = getrandom::fill(&mut seed) {
            log::warn!("PlaybackSession: falling back to fixed shuffle seed: {}", error);
        }
        Self {
            order: Vec::new(),
            position: None,
            playing_track_id: None,
            shuffled: false,
            rng_seed: seed,
        }
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn playing_track_id(&self) -> Option<&str> {
        self.playing_track_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Track ids in playback order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn track_id_at(&self, position: usize) -> Option<&str> {
        self.order.get(position).map(String::as_str)
    }

    /// Rebuilds the playback order from the current tracks, reshuffling when
    /// shuffle is on, and relocates the audible track by identity.
    pub fn rebuild(&mut self, tracks: &[Track]) {
        self.order = tracks.iter().map(|track| track.id.clone()).collect();
        if self.shuffled {
            self.shuffle_order();
        }
        self.relocate();
    }

    /// Turns shuffle on or off and rebuilds the order either way.
    pub fn set_shuffled(&mut self, shuffled: bool, tracks: &[Track]) {
        self.shuffled = shuffled;
        self.rebuild(tracks);
    }

    /// Binds the audible track and points the position at it.
    pub fn bind(&mut self, id: &str) {
        self.playing_track_id = Some(id.to_string());
        self.relocate();
    }

    pub fn clear_binding(&mut self) {
        self.playing_track_id = None;
        self.position = None;
    }

    /// Re-derives the position from the bound identity (O(n) lookup by id,
    /// never by stale index).
    pub fn relocate(&mut self) {
        self.position = self
            .playing_track_id
            .as_ref()
            .and_then(|id| self.order.iter().position(|entry| entry == id));
    }

    /// Removes one id from the playback order, keeping the relative order of
    /// the remaining entries and the binding of any other audible track.
    pub fn remove(&mut self, id: &str) {
        self.order.retain(|entry| entry != id);
        if self.playing_track_id.as_deref() == Some(id) {
            self.playing_track_id = None;
        }
        self.relocate();
    }

    /// Position the next track would play from, honoring repeat-all wrap.
    /// `None` means playback should stop.
    pub fn next_position(&self, repeat_mode: RepeatMode) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        match self.position {
            None => Some(0),
            Some(position) => {
                let next = position + 1;
                if next < self.order.len() {
                    Some(next)
                } else if repeat_mode == RepeatMode::All {
                    Some(0)
                } else {
                    None
                }
            }
        }
    }

    /// Position the previous-track action lands on. `None` means the
    /// boundary no-op: restart the current track instead of wrapping.
    pub fn previous_position(&self, repeat_mode: RepeatMode) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        match self.position {
            None => None,
            Some(0) => {
                if repeat_mode == RepeatMode::All {
                    Some(self.order.len() - 1)
                } else {
                    None
                }
            }
            Some(position) => Some(position - 1),
        }
    }

    // Fisher-Yates over the id list, advancing the seed afterwards so
    // successive shuffles differ.
    fn shuffle_order(&mut self) {
        let mut rng = StdRng::from_seed(self.rng_seed);
        for i in (1..self.order.len()).rev() {
            let j = rng.random_range(0..=i);
            self.order.swap(i, j);
        }
        for value in self.rng_seed.iter_mut() {
            *value = value.wrapping_add(1);
        }
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn make_tracks(count: usize) -> Vec<Track> {
        let mut tracks: Vec<Track> = (0..count)
            .map(|index| Track::from_path(PathBuf::from(format!("/tmp/track_{index}.mp3"))))
            .collect();
        reindex(&mut tracks);
        tracks
    }

    #[test]
    fn test_is_audio_file_accepts_allow_listed_extensions_case_insensitively() {
        assert!(is_audio_file(Path::new("/music/song.mp3")));
        assert!(is_audio_file(Path::new("/music/song.FLAC")));
        assert!(!is_audio_file(Path::new("/music/cover.jpg")));
        assert!(!is_audio_file(Path::new("/music/no_extension")));
    }

    #[test]
    fn test_parse_track_name_splits_artist_and_title() {
        let (artist, title) = parse_track_name("Miles Davis - So What.flac");
        assert_eq!(artist, "Miles Davis");
        assert_eq!(title, "So What");
    }

    #[test]
    fn test_parse_track_name_falls_back_to_stem_title() {
        let (artist, title) = parse_track_name("ambient_loop.wav");
        assert_eq!(artist, UNKNOWN_ARTIST);
        assert_eq!(title, "ambient_loop");
    }

    #[test]
    fn test_metadata_merge_never_regresses_known_fields() {
        let mut current = TrackMetadata {
            genre: "Jazz".to_string(),
            ..TrackMetadata::from_filename("Miles Davis - So What.flac")
        };
        let fetched = TrackMetadata {
            album: "Kind of Blue".to_string(),
            ..TrackMetadata::default()
        };
        current.merge_from(&fetched);
        assert_eq!(current.title, "So What");
        assert_eq!(current.artist, "Miles Davis");
        assert_eq!(current.album, "Kind of Blue");
        assert_eq!(current.genre, "Jazz");
        assert_eq!(current.year, UNKNOWN_YEAR);
    }

    #[test]
    fn test_metadata_merge_prefers_incoming_real_values() {
        let mut current = TrackMetadata::from_filename("song.mp3");
        let fetched = TrackMetadata {
            title: "Real Title".to_string(),
            artist: "Real Artist".to_string(),
            lyrics: Some("la la la".to_string()),
            ..TrackMetadata::default()
        };
        current.merge_from(&fetched);
        assert_eq!(current.title, "Real Title");
        assert_eq!(current.artist, "Real Artist");
        assert_eq!(current.lyrics.as_deref(), Some("la la la"));
    }

    #[test]
    fn test_rebuild_without_shuffle_preserves_original_order() {
        let tracks = make_tracks(4);
        let mut session = PlaybackSession::new();
        session.rebuild(&tracks);
        let expected: Vec<String> = tracks.iter().map(|track| track.id.clone()).collect();
        assert_eq!(session.order(), expected.as_slice());
    }

    #[test]
    fn test_shuffle_is_a_permutation_and_preserves_playing_identity() {
        let tracks = make_tracks(16);
        let mut session = PlaybackSession::new();
        session.rebuild(&tracks);
        let playing_id = tracks[5].id.clone();
        session.bind(&playing_id);

        session.set_shuffled(true, &tracks);
        let shuffled: HashSet<&String> = session.order().iter().collect();
        assert_eq!(shuffled.len(), tracks.len());
        assert_eq!(session.playing_track_id(), Some(playing_id.as_str()));
        let position = session.position().expect("playing track should be located");
        assert_eq!(session.track_id_at(position), Some(playing_id.as_str()));

        session.set_shuffled(false, &tracks);
        assert_eq!(session.position(), Some(5));
        assert_eq!(session.playing_track_id(), Some(playing_id.as_str()));
    }

    #[test]
    fn test_removal_of_other_tracks_keeps_identity_bound() {
        let tracks = make_tracks(5);
        let mut session = PlaybackSession::new();
        session.rebuild(&tracks);
        session.bind(&tracks[3].id);

        session.remove(&tracks[0].id);
        session.remove(&tracks[4].id);
        assert_eq!(session.playing_track_id(), Some(tracks[3].id.as_str()));
        assert_eq!(session.position(), Some(1));
    }

    #[test]
    fn test_removing_the_bound_track_clears_the_binding() {
        let tracks = make_tracks(3);
        let mut session = PlaybackSession::new();
        session.rebuild(&tracks);
        session.bind(&tracks[1].id);
        session.remove(&tracks[1].id);
        assert_eq!(session.playing_track_id(), None);
        assert_eq!(session.position(), None);
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_next_position_wraps_only_with_repeat_all() {
        let tracks = make_tracks(3);
        let mut session = PlaybackSession::new();
        session.rebuild(&tracks);
        session.bind(&tracks[2].id);

        assert_eq!(session.next_position(RepeatMode::All), Some(0));
        assert_eq!(session.next_position(RepeatMode::None), None);
        assert_eq!(session.next_position(RepeatMode::One), None);
    }

    #[test]
    fn test_previous_position_at_start_is_a_boundary_noop() {
        let tracks = make_tracks(3);
        let mut session = PlaybackSession::new();
        session.rebuild(&tracks);
        session.bind(&tracks[0].id);

        assert_eq!(session.previous_position(RepeatMode::None), None);
        assert_eq!(session.previous_position(RepeatMode::All), Some(2));
    }

    #[test]
    fn test_next_position_from_idle_starts_at_zero() {
        let tracks = make_tracks(2);
        let mut session = PlaybackSession::new();
        session.rebuild(&tracks);
        assert_eq!(session.next_position(RepeatMode::None), Some(0));
    }
}

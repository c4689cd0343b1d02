//! Snapshot/restore of player state against the key-value store.
//!
//! Every document is independent and read defensively: a malformed document
//! is logged and treated as absent, falling open to defaults. Track records
//! are stored without file availability or cover art, and every metadata
//! field that fails to round-trip is backfilled with its sentinel so the
//! rest of the player can assume all fields are always present.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use log::warn;
use uuid::Uuid;

use crate::equalizer::EqSettings;
use crate::kv_store::KvStore;
use crate::playlist::{reindex, NamedPlaylist, Track, TrackMetadata};
use crate::protocol::RepeatMode;

pub const PLAYLISTS_KEY: &str = "playlists";
/// Pre-multi-playlist document, migrated once into "Default".
pub const LEGACY_PLAYLIST_KEY: &str = "playlist";
pub const SHUFFLE_STATE_KEY: &str = "shuffle_state";
pub const REPEAT_MODE_KEY: &str = "repeat_mode";
pub const EQ_SETTINGS_KEY: &str = "eq_settings";
pub const VOLUME_SETTINGS_KEY: &str = "volume_settings";
pub const RECENTLY_PLAYED_KEY: &str = "recently_played";
pub const MOST_PLAYED_KEY: &str = "most_played";
pub const LAST_ACTIVE_PLAYLIST_KEY: &str = "last_active_playlist";

pub const DEFAULT_PLAYLIST_NAME: &str = "Default";

/// Serializable form of one track record. File handles and art never make
/// it into this shape; absent fields deserialize to their defaults.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct StoredTrack {
    #[serde(default)]
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub original_index: usize,
    #[serde(default)]
    pub metadata: Option<TrackMetadata>,
}

/// Persisted volume state.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VolumeSettings {
    #[serde(default = "default_level")]
    pub level: f32,
    #[serde(default = "default_level")]
    pub level_before_mute: f32,
}

fn default_level() -> f32 {
    1.0
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            level: 1.0,
            level_before_mute: 1.0,
        }
    }
}

fn stored_track(track: &Track) -> StoredTrack {
    StoredTrack {
        id: track.id.clone(),
        path: track.path.clone(),
        name: track.name.clone(),
        original_index: track.original_index,
        metadata: Some(track.metadata.clone()),
    }
}

fn restore_track(stored: StoredTrack) -> Track {
    let name = if stored.name.is_empty() {
        stored
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| stored.path.display().to_string())
    } else {
        stored.name
    };
    let metadata = stored
        .metadata
        .unwrap_or_else(|| TrackMetadata::from_filename(&name));
    let id = if stored.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        stored.id
    };
    Track {
        id,
        path: stored.path,
        name,
        original_index: stored.original_index,
        metadata,
    }
}

fn parse_document<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(parse_error) => {
            warn!(
                "Persistence: discarding malformed '{}' document: {}",
                key, parse_error
            );
            None
        }
    }
}

fn load_or_default<T>(store: &KvStore, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    store
        .get(key)
        .and_then(|raw| parse_document(key, &raw))
        .unwrap_or_default()
}

fn save_document<T: serde::Serialize>(store: &KvStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(serialized) => store.set(key, &serialized),
        Err(serialize_error) => {
            warn!(
                "Persistence: failed to serialize '{}' document: {}",
                key, serialize_error
            );
        }
    }
}

/// Writes the whole playlist map and the last-active name.
pub fn save_playlists(store: &KvStore, playlists: &[NamedPlaylist], active_name: &str) {
    let document: BTreeMap<String, Vec<StoredTrack>> = playlists
        .iter()
        .map(|playlist| {
            (
                playlist.name.clone(),
                playlist.tracks.iter().map(stored_track).collect(),
            )
        })
        .collect();
    save_document(store, PLAYLISTS_KEY, &document);
    save_document(store, LAST_ACTIVE_PLAYLIST_KEY, &active_name.to_string());
}

/// Best-effort reconstruction of the playlist map. Attempts the legacy
/// single-playlist document only when the multi-playlist key is entirely
/// absent. Always yields at least one playlist and a valid active name.
pub fn load_playlists(store: &KvStore) -> (Vec<NamedPlaylist>, String) {
    let mut playlists: Vec<NamedPlaylist> = Vec::new();

    match store.get(PLAYLISTS_KEY) {
        Some(raw) => {
            if let Some(document) =
                parse_document::<BTreeMap<String, Vec<StoredTrack>>>(PLAYLISTS_KEY, &raw)
            {
                for (name, stored_tracks) in document {
                    let mut tracks: Vec<Track> =
                        stored_tracks.into_iter().map(restore_track).collect();
                    reindex(&mut tracks);
                    playlists.push(NamedPlaylist { name, tracks });
                }
            }
        }
        None => {
            // Legacy migration path: only when the multi-playlist document
            // never existed.
            if let Some(raw) = store.get(LEGACY_PLAYLIST_KEY) {
                if let Some(stored_tracks) =
                    parse_document::<Vec<StoredTrack>>(LEGACY_PLAYLIST_KEY, &raw)
                {
                    let mut tracks: Vec<Track> =
                        stored_tracks.into_iter().map(restore_track).collect();
                    reindex(&mut tracks);
                    warn!(
                        "Persistence: migrated {} tracks from the legacy playlist document",
                        tracks.len()
                    );
                    playlists.push(NamedPlaylist {
                        name: DEFAULT_PLAYLIST_NAME.to_string(),
                        tracks,
                    });
                }
            }
        }
    }

    if playlists.is_empty() {
        playlists.push(NamedPlaylist::new(DEFAULT_PLAYLIST_NAME));
    }

    let stored_active: String = load_or_default(store, LAST_ACTIVE_PLAYLIST_KEY);
    let active_name = if playlists.iter().any(|playlist| playlist.name == stored_active) {
        stored_active
    } else {
        playlists[0].name.clone()
    };
    (playlists, active_name)
}

pub fn save_shuffle_state(store: &KvStore, shuffled: bool) {
    save_document(store, SHUFFLE_STATE_KEY, &shuffled);
}

pub fn load_shuffle_state(store: &KvStore) -> bool {
    load_or_default(store, SHUFFLE_STATE_KEY)
}

pub fn save_repeat_mode(store: &KvStore, repeat_mode: RepeatMode) {
    save_document(store, REPEAT_MODE_KEY, &repeat_mode);
}

pub fn load_repeat_mode(store: &KvStore) -> RepeatMode {
    store
        .get(REPEAT_MODE_KEY)
        .and_then(|raw| parse_document(REPEAT_MODE_KEY, &raw))
        .unwrap_or(RepeatMode::None)
}

pub fn save_eq_settings(store: &KvStore, settings: &EqSettings) {
    save_document(store, EQ_SETTINGS_KEY, settings);
}

pub fn load_eq_settings(store: &KvStore) -> EqSettings {
    load_or_default(store, EQ_SETTINGS_KEY)
}

pub fn save_volume_settings(store: &KvStore, settings: &VolumeSettings) {
    save_document(store, VOLUME_SETTINGS_KEY, settings);
}

pub fn load_volume_settings(store: &KvStore) -> VolumeSettings {
    load_or_default(store, VOLUME_SETTINGS_KEY)
}

pub fn save_recently_played(store: &KvStore, recently_played: &[PathBuf]) {
    save_document(store, RECENTLY_PLAYED_KEY, &recently_played.to_vec());
}

pub fn load_recently_played(store: &KvStore) -> Vec<PathBuf> {
    load_or_default(store, RECENTLY_PLAYED_KEY)
}

/// Play counts are keyed by path strings; JSON maps require string keys.
pub fn save_most_played(store: &KvStore, counts: &HashMap<String, u64>) {
    save_document(store, MOST_PLAYED_KEY, counts);
}

pub fn load_most_played(store: &KvStore) -> HashMap<String, u64> {
    load_or_default(store, MOST_PLAYED_KEY)
}

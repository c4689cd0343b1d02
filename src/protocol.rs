//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between the playlist
//! core, decoding, playback, metadata extraction, equalizer ownership,
//! history tracking, and the front-end.

use std::path::PathBuf;
use std::sync::Arc;

use crate::equalizer::EqSettings;
use crate::playlist::TrackMetadata;

/// Repeat behavior applied when a track ends or navigation passes the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    None, // Stop after reaching the end of the playlist
    One,  // Restart the finished track
    All,  // Wrap around to the beginning of the playlist
}

impl RepeatMode {
    /// The next mode in the none -> one -> all cycle.
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::None => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::None,
        }
    }
}

/// Which side of a drop target a dragged row lands on, decided by the
/// front-end from the pointer position relative to the row midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPosition {
    Before,
    After,
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Playlist(PlaylistMessage),
    Playback(PlaybackMessage),
    Audio(AudioMessage),
    Metadata(MetadataMessage),
    Equalizer(EqualizerMessage),
    History(HistoryMessage),
}

/// One track row as rendered by a front-end.
#[derive(Debug, Clone)]
pub struct TrackSummary {
    /// Stable track id.
    pub id: String,
    /// File path on disk.
    pub path: PathBuf,
    /// Original filename.
    pub name: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub year: String,
}

/// Track identity and location handed to the decoder.
#[derive(Debug, Clone)]
pub struct TrackIdentifier {
    /// Stable track id.
    pub id: String,
    /// File path on disk.
    pub path: PathBuf,
}

/// Fully decoded, output-ready audio for one track.
#[derive(Debug, Clone)]
pub struct DecodedTrack {
    /// Stable track id.
    pub id: String,
    /// Interleaved samples at the output sample rate.
    pub samples: Arc<Vec<f32>>,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Estimated duration in milliseconds.
    pub duration_ms: u64,
}

/// Everything a front-end or OS integration needs about the bound track.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub id: String,
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub lyrics: Option<String>,
    /// Extracted cover art written to a cache file, when present.
    pub art_path: Option<PathBuf>,
}

/// Playlist-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum PlaylistMessage {
    /// Add the given files to the active playlist (selection or drop).
    AddFiles(Vec<PathBuf>),
    /// Every file in an add batch failed the extension allow-list.
    FilesRejected { attempted: usize },
    TracksAdded(Vec<TrackSummary>),
    RemoveTrack { id: String },
    CreatePlaylist { name: String },
    DeletePlaylist { name: String },
    SwitchPlaylist { name: String },
    /// A playlist operation was rejected by input validation, no state change.
    PlaylistRejected { reason: String },
    PlaylistsChanged { names: Vec<String>, active: String },
    /// Reorder gesture: a row started being dragged.
    BeginDrag { id: String },
    /// Reorder gesture: the pointer is over another row.
    DragOver { target_id: String, position: DropPosition },
    /// Reorder gesture: the row was released.
    Drop,
    SetSearchTerm(String),
    SetGenreFilter(String),
    SetYearFilter(String),
    ClearFilters,
    /// The displayable subset of the active playlist changed.
    DisplayListChanged {
        tracks: Vec<TrackSummary>,
        playing_id: Option<String>,
        genres: Vec<String>,
        years: Vec<String>,
    },
    ToggleShuffle,
    ShuffleChanged(bool),
    CycleRepeat,
    RepeatChanged(RepeatMode),
    QueueAdd { id: String },
    QueueRemove { path: PathBuf },
    QueueClear,
    QueueChanged(Vec<PathBuf>),
}

/// Playback-domain commands and engine notifications.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    // Commands from front-ends and OS media controls.
    Play,
    Pause,
    TogglePlayPause,
    Stop,
    Next,
    Previous,
    PlayTrack { id: String },
    /// Play a track known only by path (history and queue entries).
    PlayPath { path: PathBuf },
    /// Seek to a position expressed as a 0.0..=1.0 fraction of the duration.
    Seek(f32),
    SetVolume(f32),
    ToggleMute,

    // Events emitted by the audio engine and the playlist core.
    TrackStarted { id: String },
    TrackPaused,
    TrackResumed,
    TrackFinished { id: String },
    PlaybackProgress { elapsed_ms: u64, total_ms: u64 },
    /// Playback could not start or continue for the given track.
    PlaybackFailed { id: String, reason: String },
    /// The track's file is missing and needs re-selection.
    TrackUnavailable { id: String, reason: String },
    NowPlayingChanged {
        track: Option<NowPlaying>,
        is_playing: bool,
    },
    VolumeChanged { level: f32, muted: bool },
}

/// Flattened DSP parameters applied by the audio output callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqDspParams {
    pub enabled: bool,
    /// Preamp as a linear gain factor.
    pub preamp_gain: f32,
    /// Per-band peaking gains in dB.
    pub band_gains_db: [f32; crate::equalizer::EQ_BAND_COUNT],
}

/// Audio-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum AudioMessage {
    DecodeTrack(TrackIdentifier),
    TrackDecoded(DecodedTrack),
    DecodeFailed { id: String, error: String },
    /// The output device was opened with the given format.
    DeviceOpened { sample_rate: u32, channels: u16 },
    PausePlayback,
    ResumePlayback,
    /// Release the bound track buffer and silence the output.
    StopPlayback,
    SeekTo(f32),
    /// Restart the bound track from the beginning (repeat-one).
    ReplayCurrent { id: String },
    ApplyVolume(f32),
    SetEqParams(EqDspParams),
}

/// Metadata-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum MetadataMessage {
    Fetch(TrackIdentifier),
    Loaded {
        id: String,
        metadata: TrackMetadata,
        art_path: Option<PathBuf>,
    },
}

/// Equalizer and volume ownership commands and notifications.
#[derive(Debug, Clone)]
pub enum EqualizerMessage {
    SetPreamp(f32),
    SetBand { index: usize, gain_db: f32 },
    ApplyPreset(String),
    ToggleEnabled,
    StateChanged(EqSettings),
}

/// Play-history commands and notifications.
#[derive(Debug, Clone)]
pub enum HistoryMessage {
    LogPlay { path: PathBuf },
    RecentlyPlayedChanged(Vec<PathBuf>),
    /// Most-played tallies, truncated to the display cap, most played first.
    MostPlayedChanged(Vec<(PathBuf, u64)>),
}

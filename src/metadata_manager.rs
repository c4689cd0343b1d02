//! Metadata extraction runtime component.
//!
//! Fetches tags and cover art off the playback path. Extraction failures are
//! recovered locally with filename-derived values, never surfaced. Cover-art
//! bytes are written to a cache file so OS integrations can reference them.

use std::path::PathBuf;

use log::{debug, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::metadata;
use crate::playlist::TrackMetadata;
use crate::protocol::{Message, MetadataMessage, TrackIdentifier};

/// Serves lazy metadata fetch requests from the playlist core.
pub struct MetadataManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    art_cache_dir: PathBuf,
}

impl MetadataManager {
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>) -> Self {
        let art_cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cadenza")
            .join("art");
        Self {
            bus_consumer,
            bus_producer,
            art_cache_dir,
        }
    }

    fn write_art_cache(&self, track_id: &str, bytes: &[u8]) -> Option<PathBuf> {
        if let Err(io_error) = std::fs::create_dir_all(&self.art_cache_dir) {
            warn!(
                "MetadataManager: could not create art cache dir {}: {}",
                self.art_cache_dir.display(),
                io_error
            );
            return None;
        }
        let art_path = self.art_cache_dir.join(format!("{track_id}.img"));
        match std::fs::write(&art_path, bytes) {
            Ok(()) => Some(art_path),
            Err(io_error) => {
                warn!(
                    "MetadataManager: could not write art cache file {}: {}",
                    art_path.display(),
                    io_error
                );
                None
            }
        }
    }

    fn fetch(&self, track: TrackIdentifier) {
        debug!(
            "MetadataManager: fetching tags for {} ({})",
            track.path.display(),
            track.id
        );
        // Tag failures fall back to filename parsing, fully recovered here.
        let metadata = metadata::read_track_metadata(&track.path).unwrap_or_else(|| {
            let name = track
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            TrackMetadata::from_filename(name)
        });

        let art_path = metadata::read_embedded_cover_art(&track.path)
            .and_then(|bytes| self.write_art_cache(&track.id, &bytes));

        let _ = self.bus_producer.send(Message::Metadata(MetadataMessage::Loaded {
            id: track.id,
            metadata,
            art_path,
        }));
    }

    /// Starts the blocking manager loop.
    pub fn run(&mut self) {
        info!("MetadataManager: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Metadata(MetadataMessage::Fetch(track))) => self.fetch(track),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("MetadataManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

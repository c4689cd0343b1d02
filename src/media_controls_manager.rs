//! OS media controls bridge (MPRIS/SMTC/Now Playing).
//!
//! Best effort: maps platform transport events onto bus commands and mirrors
//! the bound track's metadata, artwork and playback state outward. Every
//! platform failure is logged and the player keeps running without the
//! integration.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig, SeekDirection,
};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{Message, NowPlaying, PlaybackMessage};

const MEDIA_CONTROLS_DISPLAY_NAME: &str = "Cadenza";
const MEDIA_CONTROLS_DBUS_NAME: &str = "cadenza";
const SEEK_STEP_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, Default)]
struct ControlState {
    is_playing: bool,
    elapsed_ms: u64,
    total_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackPublishState {
    Stopped,
    Paused,
    Playing,
}

/// Handles OS media control events and publishes player state.
pub struct MediaControlsManager {
    bus_consumer: Receiver<Message>,
    control_state: Arc<Mutex<ControlState>>,
    controls: Option<MediaControls>,
    current_track: Option<NowPlaying>,
    last_published_playback: Option<PlaybackPublishState>,
    last_published_track_id: Option<String>,
    last_published_total_ms: u64,
}

impl MediaControlsManager {
    /// Creates a manager and attempts to initialize platform media controls.
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>) -> Self {
        let control_state = Arc::new(Mutex::new(ControlState::default()));
        let controls = Self::create_controls(bus_producer, Arc::clone(&control_state));

        Self {
            bus_consumer,
            control_state,
            controls,
            current_track: None,
            last_published_playback: None,
            last_published_track_id: None,
            last_published_total_ms: 0,
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn create_controls(
        bus_producer: Sender<Message>,
        control_state: Arc<Mutex<ControlState>>,
    ) -> Option<MediaControls> {
        let mut controls = match MediaControls::new(PlatformConfig {
            display_name: MEDIA_CONTROLS_DISPLAY_NAME,
            dbus_name: MEDIA_CONTROLS_DBUS_NAME,
            hwnd: None,
        }) {
            Ok(controls) => controls,
            Err(platform_error) => {
                warn!(
                    "MediaControlsManager: failed to create media controls backend: {}",
                    platform_error
                );
                return None;
            }
        };

        if let Err(attach_error) = controls.attach(move |event| {
            let snapshot = match control_state.lock() {
                Ok(state) => *state,
                Err(poisoned) => *poisoned.into_inner(),
            };
            if let Some(playback_message) = Self::map_control_event(event, snapshot) {
                let _ = bus_producer.send(Message::Playback(playback_message));
            }
        }) {
            warn!(
                "MediaControlsManager: failed to attach media controls handler: {}",
                attach_error
            );
            return None;
        }

        Some(controls)
    }

    #[cfg(target_os = "windows")]
    fn create_controls(
        _bus_producer: Sender<Message>,
        _control_state: Arc<Mutex<ControlState>>,
    ) -> Option<MediaControls> {
        // Souvlaki requires an HWND on Windows, which a console process
        // does not have.
        warn!("MediaControlsManager: Windows media controls are disabled (no HWND)");
        None
    }

    fn map_control_event(event: MediaControlEvent, state: ControlState) -> Option<PlaybackMessage> {
        match event {
            MediaControlEvent::Play => Some(PlaybackMessage::Play),
            MediaControlEvent::Pause => Some(PlaybackMessage::Pause),
            MediaControlEvent::Toggle => Some(PlaybackMessage::TogglePlayPause),
            MediaControlEvent::Next => Some(PlaybackMessage::Next),
            MediaControlEvent::Previous => Some(PlaybackMessage::Previous),
            MediaControlEvent::Stop => Some(PlaybackMessage::Stop),
            MediaControlEvent::SetPosition(position) => {
                Self::seek_message_from_target_ms(state, position.0.as_millis() as u64)
            }
            MediaControlEvent::SeekBy(direction, delta) => {
                let delta_ms = delta.as_millis() as u64;
                let target_ms = match direction {
                    SeekDirection::Forward => state.elapsed_ms.saturating_add(delta_ms),
                    SeekDirection::Backward => state.elapsed_ms.saturating_sub(delta_ms),
                };
                Self::seek_message_from_target_ms(state, target_ms)
            }
            MediaControlEvent::Seek(direction) => {
                let target_ms = match direction {
                    SeekDirection::Forward => state.elapsed_ms.saturating_add(SEEK_STEP_MS),
                    SeekDirection::Backward => state.elapsed_ms.saturating_sub(SEEK_STEP_MS),
                };
                Self::seek_message_from_target_ms(state, target_ms)
            }
            MediaControlEvent::SetVolume(_)
            | MediaControlEvent::OpenUri(_)
            | MediaControlEvent::Raise
            | MediaControlEvent::Quit => None,
        }
    }

    fn seek_message_from_target_ms(state: ControlState, target_ms: u64) -> Option<PlaybackMessage> {
        if state.total_ms == 0 {
            return None;
        }
        let clamped_ms = target_ms.min(state.total_ms);
        let fraction = (clamped_ms as f32 / state.total_ms as f32).clamp(0.0, 1.0);
        Some(PlaybackMessage::Seek(fraction))
    }

    fn update_control_state<F>(&self, update: F)
    where
        F: FnOnce(&mut ControlState),
    {
        match self.control_state.lock() {
            Ok(mut state) => update(&mut state),
            Err(poisoned) => {
                let mut state = poisoned.into_inner();
                update(&mut state);
            }
        }
    }

    fn control_state_snapshot(&self) -> ControlState {
        match self.control_state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn desired_playback_publish_state(&self) -> PlaybackPublishState {
        if self.current_track.is_none() {
            return PlaybackPublishState::Stopped;
        }
        if self.control_state_snapshot().is_playing {
            PlaybackPublishState::Playing
        } else {
            PlaybackPublishState::Paused
        }
    }

    fn publish_playback_if_needed(&mut self) {
        let desired_state = self.desired_playback_publish_state();
        if self.last_published_playback == Some(desired_state) {
            return;
        }
        let Some(controls) = self.controls.as_mut() else {
            return;
        };

        let playback = match desired_state {
            PlaybackPublishState::Stopped => MediaPlayback::Stopped,
            PlaybackPublishState::Paused => MediaPlayback::Paused { progress: None },
            PlaybackPublishState::Playing => MediaPlayback::Playing { progress: None },
        };
        if let Err(publish_error) = controls.set_playback(playback) {
            warn!(
                "MediaControlsManager: failed to publish playback state {:?}: {}",
                desired_state, publish_error
            );
            return;
        }
        self.last_published_playback = Some(desired_state);
    }

    fn cover_url(art_path: Option<&PathBuf>) -> Option<String> {
        art_path.map(|path| format!("file://{}", path.display()))
    }

    fn publish_metadata_if_needed(&mut self) {
        let snapshot = self.control_state_snapshot();
        let track_id = self
            .current_track
            .as_ref()
            .map(|track| track.id.clone());
        let total_ms = if track_id.is_some() { snapshot.total_ms } else { 0 };

        if self.last_published_track_id == track_id && self.last_published_total_ms == total_ms {
            return;
        }
        let Some(controls) = self.controls.as_mut() else {
            return;
        };

        let publish_result = if let Some(track) = self.current_track.as_ref() {
            let cover_url = Self::cover_url(track.art_path.as_ref());
            let duration = (total_ms > 0).then(|| Duration::from_millis(total_ms));
            controls.set_metadata(MediaMetadata {
                title: Some(track.title.as_str()),
                artist: Some(track.artist.as_str()),
                album: Some(track.album.as_str()),
                cover_url: cover_url.as_deref(),
                duration,
            })
        } else {
            controls.set_metadata(MediaMetadata::default())
        };

        if let Err(publish_error) = publish_result {
            warn!(
                "MediaControlsManager: failed to publish metadata: {}",
                publish_error
            );
            return;
        }
        self.last_published_track_id = track_id;
        self.last_published_total_ms = total_ms;
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Playback(PlaybackMessage::NowPlayingChanged { track, is_playing }) => {
                self.update_control_state(|state| {
                    state.is_playing = is_playing;
                    if track.is_none() {
                        state.elapsed_ms = 0;
                        state.total_ms = 0;
                    }
                });
                // Force a metadata refresh when the same track gains art or
                // richer tags mid-play.
                if track.is_some() {
                    self.last_published_track_id = None;
                }
                self.current_track = track;
                self.publish_playback_if_needed();
                self.publish_metadata_if_needed();
            }
            Message::Playback(PlaybackMessage::PlaybackProgress {
                elapsed_ms,
                total_ms,
            }) => {
                self.update_control_state(|state| {
                    state.elapsed_ms = elapsed_ms;
                    state.total_ms = total_ms;
                });
                self.publish_metadata_if_needed();
            }
            _ => {}
        }
    }

    /// Starts the blocking manager loop.
    pub fn run(&mut self) {
        info!("MediaControlsManager: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("MediaControlsManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlState, MediaControlsManager};
    use crate::protocol::PlaybackMessage;
    use souvlaki::{MediaControlEvent, MediaPosition, SeekDirection};
    use std::time::Duration;

    fn assert_seek_message(message: Option<PlaybackMessage>, expected: f32) {
        match message {
            Some(PlaybackMessage::Seek(value)) => {
                assert!((value - expected).abs() < f32::EPSILON);
            }
            _ => panic!("expected PlaybackMessage::Seek"),
        }
    }

    #[test]
    fn test_toggle_event_maps_to_toggle_command() {
        let state = ControlState::default();
        let message = MediaControlsManager::map_control_event(MediaControlEvent::Toggle, state);
        assert!(matches!(message, Some(PlaybackMessage::TogglePlayPause)));
    }

    #[test]
    fn test_transport_events_map_to_commands() {
        let state = ControlState::default();
        assert!(matches!(
            MediaControlsManager::map_control_event(MediaControlEvent::Next, state),
            Some(PlaybackMessage::Next)
        ));
        assert!(matches!(
            MediaControlsManager::map_control_event(MediaControlEvent::Previous, state),
            Some(PlaybackMessage::Previous)
        ));
        assert!(matches!(
            MediaControlsManager::map_control_event(MediaControlEvent::Stop, state),
            Some(PlaybackMessage::Stop)
        ));
    }

    #[test]
    fn test_set_position_event_maps_to_seek_fraction() {
        let state = ControlState {
            is_playing: true,
            elapsed_ms: 0,
            total_ms: 200_000,
        };
        let message = MediaControlsManager::map_control_event(
            MediaControlEvent::SetPosition(MediaPosition(Duration::from_millis(50_000))),
            state,
        );
        assert_seek_message(message, 0.25);
    }

    #[test]
    fn test_seek_by_forward_maps_to_seek_fraction() {
        let state = ControlState {
            is_playing: true,
            elapsed_ms: 80_000,
            total_ms: 200_000,
        };
        let message = MediaControlsManager::map_control_event(
            MediaControlEvent::SeekBy(SeekDirection::Forward, Duration::from_millis(20_000)),
            state,
        );
        assert_seek_message(message, 0.5);
    }

    #[test]
    fn test_seek_without_duration_is_ignored() {
        let state = ControlState {
            is_playing: true,
            elapsed_ms: 10_000,
            total_ms: 0,
        };
        let message = MediaControlsManager::map_control_event(
            MediaControlEvent::SeekBy(SeekDirection::Backward, Duration::from_millis(5_000)),
            state,
        );
        assert!(message.is_none());
    }
}

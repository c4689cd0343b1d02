//! Equalizer and volume ownership runtime component.
//!
//! Restores both documents at startup, pushes applied parameters to the
//! audio player, and persists on every change. The signal-path configuration
//! lives beside playback and never gates it.

use log::{info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::equalizer::EqSettings;
use crate::kv_store::KvStore;
use crate::persistence::{self, VolumeSettings};
use crate::protocol::{AudioMessage, EqualizerMessage, Message, PlaybackMessage};

pub struct EqualizerManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    store: KvStore,
    settings: EqSettings,
    volume: VolumeSettings,
}

impl EqualizerManager {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        store: KvStore,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            store,
            settings: EqSettings::default(),
            volume: VolumeSettings::default(),
        }
    }

    fn push_eq_to_player(&self) {
        let _ = self.bus_producer.send(Message::Audio(AudioMessage::SetEqParams(
            self.settings.dsp_params(),
        )));
        let _ = self.bus_producer.send(Message::Equalizer(
            EqualizerMessage::StateChanged(self.settings.clone()),
        ));
    }

    fn push_volume_to_player(&self) {
        let _ = self
            .bus_producer
            .send(Message::Audio(AudioMessage::ApplyVolume(self.volume.level)));
        let _ = self
            .bus_producer
            .send(Message::Playback(PlaybackMessage::VolumeChanged {
                level: self.volume.level,
                muted: self.volume.level == 0.0,
            }));
    }

    fn persist_eq(&self) {
        persistence::save_eq_settings(&self.store, &self.settings);
    }

    fn persist_volume(&self) {
        persistence::save_volume_settings(&self.store, &self.volume);
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Equalizer(EqualizerMessage::SetPreamp(db)) => {
                self.settings.set_preamp(db);
                self.persist_eq();
                self.push_eq_to_player();
            }
            Message::Equalizer(EqualizerMessage::SetBand { index, gain_db }) => {
                if self.settings.set_band(index, gain_db) {
                    self.persist_eq();
                    self.push_eq_to_player();
                } else {
                    warn!("EqualizerManager: ignoring out-of-range band {}", index);
                }
            }
            Message::Equalizer(EqualizerMessage::ApplyPreset(name)) => {
                self.settings.apply_preset(&name);
                self.persist_eq();
                self.push_eq_to_player();
            }
            Message::Equalizer(EqualizerMessage::ToggleEnabled) => {
                self.settings.toggle_enabled();
                self.persist_eq();
                self.push_eq_to_player();
            }
            Message::Playback(PlaybackMessage::SetVolume(level)) => {
                self.volume.level = level.clamp(0.0, 1.0);
                self.persist_volume();
                self.push_volume_to_player();
            }
            Message::Playback(PlaybackMessage::ToggleMute) => {
                if self.volume.level > 0.0 {
                    self.volume.level_before_mute = self.volume.level;
                    self.volume.level = 0.0;
                } else {
                    self.volume.level = if self.volume.level_before_mute > 0.0 {
                        self.volume.level_before_mute
                    } else {
                        1.0
                    };
                }
                self.persist_volume();
                self.push_volume_to_player();
            }
            _ => {}
        }
    }

    /// Starts the blocking manager loop.
    pub fn run(&mut self) {
        self.settings = persistence::load_eq_settings(&self.store);
        self.volume = persistence::load_volume_settings(&self.store);
        info!(
            "EqualizerManager: restored preset '{}' (enabled={}), volume {:.2}",
            self.settings.preset_name, self.settings.enabled, self.volume.level
        );
        self.push_eq_to_player();
        self.push_volume_to_player();

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("EqualizerManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError};

    fn spawn_manager() -> (
        broadcast::Sender<Message>,
        broadcast::Receiver<Message>,
    ) {
        let (bus_sender, _) = broadcast::channel(1024);
        let manager_receiver = bus_sender.subscribe();
        let manager_sender = bus_sender.clone();
        let observer = bus_sender.subscribe();
        thread::spawn(move || {
            let store = KvStore::new_in_memory().expect("in-memory store should open");
            let mut manager = EqualizerManager::new(manager_receiver, manager_sender, store);
            manager.run();
        });
        (bus_sender, observer)
    }

    fn wait_for<F>(receiver: &mut broadcast::Receiver<Message>, mut predicate: F) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > Duration::from_secs(2) {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed"),
            }
        }
    }

    #[test]
    fn test_preset_application_pushes_dsp_params() {
        let (bus_sender, mut observer) = spawn_manager();
        // Initial restore emits defaults first.
        let _ = wait_for(&mut observer, |message| {
            matches!(message, Message::Equalizer(EqualizerMessage::StateChanged(_)))
        });

        bus_sender
            .send(Message::Equalizer(EqualizerMessage::ApplyPreset(
                "rock".to_string(),
            )))
            .expect("send should succeed");

        // The applied DSP params go out first, then the state notification.
        let _ = wait_for(&mut observer, |message| {
            matches!(
                message,
                Message::Audio(AudioMessage::SetEqParams(params))
                    if params.enabled && params.band_gains_db == [4.0, 3.0, -2.0, 3.0, 5.0]
            )
        });
        let message = wait_for(&mut observer, |message| {
            matches!(
                message,
                Message::Equalizer(EqualizerMessage::StateChanged(settings))
                    if settings.preset_name == "rock"
            )
        });
        if let Message::Equalizer(EqualizerMessage::StateChanged(settings)) = message {
            assert_eq!(settings.band_gains_db, [4.0, 3.0, -2.0, 3.0, 5.0]);
        }
    }

    #[test]
    fn test_mute_toggle_round_trips_previous_level() {
        let (bus_sender, mut observer) = spawn_manager();
        let _ = wait_for(&mut observer, |message| {
            matches!(message, Message::Playback(PlaybackMessage::VolumeChanged { .. }))
        });

        bus_sender
            .send(Message::Playback(PlaybackMessage::SetVolume(0.7)))
            .expect("send should succeed");
        let _ = wait_for(&mut observer, |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::VolumeChanged { level, muted: false })
                    if (level - 0.7).abs() < 1e-6
            )
        });

        bus_sender
            .send(Message::Playback(PlaybackMessage::ToggleMute))
            .expect("send should succeed");
        let _ = wait_for(&mut observer, |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::VolumeChanged { level, muted: true })
                    if *level == 0.0
            )
        });

        bus_sender
            .send(Message::Playback(PlaybackMessage::ToggleMute))
            .expect("send should succeed");
        let _ = wait_for(&mut observer, |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::VolumeChanged { level, muted: false })
                    if (level - 0.7).abs() < 1e-6
            )
        });
    }
}

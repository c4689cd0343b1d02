//! Output runtime component.
//!
//! Owns the single cpal output stream and at most one bound track buffer.
//! Binding a new buffer always releases the previous one, as does stopping;
//! there is never more than one playable resource alive. The output callback
//! applies volume, the equalizer chain and the analyzer tap, and reports
//! started/paused/resumed/finished/progress events back over the bus.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::config::Config;
use crate::equalizer::EqChain;
use crate::protocol::{AudioMessage, DecodedTrack, EqDspParams, Message, PlaybackMessage};
use crate::visualizer::SharedAnalyzer;

struct BoundTrack {
    id: String,
    samples: Arc<Vec<f32>>,
    /// Interleaved cursor into `samples`.
    position: usize,
    finished_sent: bool,
}

fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct AudioPlayer {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    current: Arc<Mutex<Option<BoundTrack>>>,
    is_playing: Arc<AtomicBool>,
    volume_bits: Arc<AtomicU32>,
    eq: Arc<Mutex<EqChain>>,
    analyzer: SharedAnalyzer,
    device: Option<cpal::Device>,
    stream_config: Option<cpal::StreamConfig>,
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    device_channels: u16,
    progress_interval_ms: u64,
}

impl AudioPlayer {
    /// Picks the output device and format. Must be constructed on the thread
    /// that will run it: the cpal stream never crosses threads.
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        config: &Config,
        analyzer: SharedAnalyzer,
    ) -> Self {
        let (device, stream_config) = setup_output_device(config);
        let (sample_rate, device_channels) = stream_config
            .as_ref()
            .map(|config| (config.sample_rate.0, config.channels))
            .unwrap_or((44_100, 2));

        let eq = EqChain::new(
            2,
            sample_rate as f32,
            EqDspParams {
                enabled: true,
                preamp_gain: 1.0,
                band_gains_db: [0.0; crate::equalizer::EQ_BAND_COUNT],
            },
        );

        Self {
            bus_consumer,
            bus_producer,
            current: Arc::new(Mutex::new(None)),
            is_playing: Arc::new(AtomicBool::new(false)),
            volume_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            eq: Arc::new(Mutex::new(eq)),
            analyzer,
            device,
            stream_config,
            stream: None,
            sample_rate,
            device_channels,
            progress_interval_ms: config.playback.progress_interval_ms,
        }
    }

    fn create_stream(&mut self) {
        let Some(device) = self.device.as_ref() else {
            error!("AudioPlayer: cannot create stream, no output device");
            return;
        };
        let Some(stream_config) = self.stream_config.as_ref() else {
            error!("AudioPlayer: cannot create stream, no stream config");
            return;
        };

        let current = Arc::clone(&self.current);
        let is_playing = Arc::clone(&self.is_playing);
        let volume_bits = Arc::clone(&self.volume_bits);
        let eq = Arc::clone(&self.eq);
        let analyzer = Arc::clone(&self.analyzer);
        let bus_producer = self.bus_producer.clone();
        let device_channels = self.device_channels as usize;
        let sample_rate = self.sample_rate.max(1);
        let progress_threshold =
            (sample_rate as u64 * 2 * self.progress_interval_ms / 1_000).max(1) as usize;

        let mut tap_buffer: Vec<f32> = Vec::with_capacity(4_096);
        let mut samples_since_progress: usize = 0;

        match device.build_output_stream(
            stream_config,
            move |output_buffer: &mut [f32], _: &cpal::OutputCallbackInfo| {
                tap_buffer.clear();
                if !is_playing.load(Ordering::Relaxed) {
                    output_buffer.fill(0.0);
                    return;
                }
                let mut current_guard = lock_or_recover(&current);
                let Some(track) = current_guard.as_mut() else {
                    output_buffer.fill(0.0);
                    return;
                };

                let volume = f32::from_bits(volume_bits.load(Ordering::Relaxed));
                let mut eq_guard = lock_or_recover(&eq);
                for output_frame in output_buffer.chunks_mut(device_channels) {
                    if track.position + 1 < track.samples.len() {
                        let left = track.samples[track.position] * volume;
                        let right = track.samples[track.position + 1] * volume;
                        track.position += 2;

                        let left = eq_guard.process(left, 0);
                        let right = eq_guard.process(right, 1);
                        tap_buffer.push(left);
                        tap_buffer.push(right);

                        if device_channels == 1 {
                            output_frame[0] = (left + right) * 0.5;
                        } else {
                            output_frame[0] = left;
                            output_frame[1] = right;
                            for extra in output_frame.iter_mut().skip(2) {
                                *extra = 0.0;
                            }
                        }
                    } else {
                        output_frame.fill(0.0);
                        if !track.finished_sent {
                            track.finished_sent = true;
                            is_playing.store(false, Ordering::Relaxed);
                            let _ = bus_producer.send(Message::Playback(
                                PlaybackMessage::TrackFinished {
                                    id: track.id.clone(),
                                },
                            ));
                        }
                    }
                }

                samples_since_progress += tap_buffer.len();
                if samples_since_progress >= progress_threshold && !track.finished_sent {
                    samples_since_progress = 0;
                    let elapsed_ms =
                        (track.position as u64 / 2) * 1_000 / sample_rate as u64;
                    let total_ms =
                        (track.samples.len() as u64 / 2) * 1_000 / sample_rate as u64;
                    let _ = bus_producer.send(Message::Playback(
                        PlaybackMessage::PlaybackProgress {
                            elapsed_ms,
                            total_ms,
                        },
                    ));
                }
                drop(eq_guard);
                drop(current_guard);
                analyzer.push_samples(&tap_buffer, 2);
            },
            |stream_error| error!("AudioPlayer: stream error: {}", stream_error),
            None,
        ) {
            Ok(stream) => {
                // Start paused; the callback stays silent until a bind.
                if let Err(pause_error) = stream.pause() {
                    debug!("AudioPlayer: initial pause failed: {}", pause_error);
                }
                self.stream = Some(stream);
                debug!("AudioPlayer: output stream created");
            }
            Err(build_error) => {
                error!("AudioPlayer: failed to build output stream: {}", build_error);
            }
        }
    }

    fn start_stream(&self) -> bool {
        match self.stream.as_ref() {
            Some(stream) => match stream.play() {
                Ok(()) => true,
                Err(play_error) => {
                    error!("AudioPlayer: failed to start stream: {}", play_error);
                    false
                }
            },
            None => {
                warn!("AudioPlayer: no output stream available");
                false
            }
        }
    }

    fn pause_stream(&self) {
        if let Some(stream) = self.stream.as_ref() {
            if let Err(pause_error) = stream.pause() {
                error!("AudioPlayer: failed to pause stream: {}", pause_error);
            }
        }
    }

    fn bind_track(&mut self, decoded: DecodedTrack) {
        let id = decoded.id.clone();
        {
            // Replacing the option releases the previously bound buffer.
            let mut current_guard = lock_or_recover(&self.current);
            *current_guard = Some(BoundTrack {
                id: decoded.id,
                samples: decoded.samples,
                position: 0,
                finished_sent: false,
            });
        }
        self.analyzer.reset();
        if self.start_stream() {
            self.is_playing.store(true, Ordering::Relaxed);
            let _ = self
                .bus_producer
                .send(Message::Playback(PlaybackMessage::TrackStarted { id }));
        } else {
            let mut current_guard = lock_or_recover(&self.current);
            *current_guard = None;
            let _ = self
                .bus_producer
                .send(Message::Playback(PlaybackMessage::PlaybackFailed {
                    id,
                    reason: "audio output unavailable".to_string(),
                }));
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Audio(AudioMessage::TrackDecoded(decoded)) => {
                debug!("AudioPlayer: binding track {}", decoded.id);
                self.bind_track(decoded);
            }
            Message::Audio(AudioMessage::PausePlayback) => {
                self.is_playing.store(false, Ordering::Relaxed);
                self.pause_stream();
                let _ = self
                    .bus_producer
                    .send(Message::Playback(PlaybackMessage::TrackPaused));
            }
            Message::Audio(AudioMessage::ResumePlayback) => {
                let has_track = lock_or_recover(&self.current).is_some();
                if has_track && self.start_stream() {
                    self.is_playing.store(true, Ordering::Relaxed);
                    let _ = self
                        .bus_producer
                        .send(Message::Playback(PlaybackMessage::TrackResumed));
                }
            }
            Message::Audio(AudioMessage::StopPlayback) => {
                self.is_playing.store(false, Ordering::Relaxed);
                self.pause_stream();
                let mut current_guard = lock_or_recover(&self.current);
                *current_guard = None;
                drop(current_guard);
                self.analyzer.reset();
            }
            Message::Audio(AudioMessage::SeekTo(fraction)) => {
                let mut current_guard = lock_or_recover(&self.current);
                if let Some(track) = current_guard.as_mut() {
                    let frames = track.samples.len() / 2;
                    let target_frame =
                        (fraction.clamp(0.0, 1.0) * frames as f32) as usize;
                    track.position = target_frame.min(frames.saturating_sub(1)) * 2;
                    track.finished_sent = false;
                }
            }
            Message::Audio(AudioMessage::ReplayCurrent { id }) => {
                let mut restarted = false;
                {
                    let mut current_guard = lock_or_recover(&self.current);
                    if let Some(track) = current_guard.as_mut() {
                        if track.id == id {
                            track.position = 0;
                            track.finished_sent = false;
                            restarted = true;
                        }
                    }
                }
                if restarted && self.start_stream() {
                    self.is_playing.store(true, Ordering::Relaxed);
                    let _ = self
                        .bus_producer
                        .send(Message::Playback(PlaybackMessage::TrackStarted { id }));
                }
            }
            Message::Audio(AudioMessage::ApplyVolume(level)) => {
                self.volume_bits
                    .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
            }
            Message::Audio(AudioMessage::SetEqParams(params)) => {
                lock_or_recover(&self.eq).set_params(params);
            }
            _ => {}
        }
    }

    /// Starts the blocking player loop.
    pub fn run(&mut self) {
        self.create_stream();
        info!(
            "AudioPlayer: started at {} Hz, {} channels",
            self.sample_rate, self.device_channels
        );
        let _ = self
            .bus_producer
            .send(Message::Audio(AudioMessage::DeviceOpened {
                sample_rate: self.sample_rate,
                channels: self.device_channels,
            }));

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("AudioPlayer: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Picks the configured (or default) device and a 2-channel f32 output
/// format, preferring 44.1 kHz when the device allows it.
fn setup_output_device(config: &Config) -> (Option<cpal::Device>, Option<cpal::StreamConfig>) {
    let host = cpal::default_host();

    let device = if config.output.output_device_auto || config.output.output_device_name.is_empty()
    {
        host.default_output_device()
    } else {
        let wanted = config.output.output_device_name.as_str();
        host.output_devices()
            .ok()
            .and_then(|mut devices| {
                devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == wanted)
                        .unwrap_or(false)
                })
            })
            .or_else(|| {
                warn!(
                    "AudioPlayer: configured device '{}' not found, using default",
                    wanted
                );
                host.default_output_device()
            })
    };

    let Some(device) = device else {
        error!("AudioPlayer: no output device available");
        return (None, None);
    };

    let supported = match device.supported_output_configs() {
        Ok(configs) => configs,
        Err(config_error) => {
            error!("AudioPlayer: could not query device configs: {}", config_error);
            return (Some(device), None);
        }
    };

    let mut fallback = None;
    let mut chosen = None;
    for range in supported {
        if range.sample_format() != cpal::SampleFormat::F32 {
            continue;
        }
        if range.channels() == 2 {
            chosen = Some(range);
            break;
        }
        if fallback.is_none() {
            fallback = Some(range);
        }
    }
    let Some(range) = chosen.or(fallback) else {
        error!("AudioPlayer: device offers no f32 output config");
        return (Some(device), None);
    };

    let preferred_rate = 44_100u32.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
    let stream_config: cpal::StreamConfig =
        range.with_sample_rate(cpal::SampleRate(preferred_rate)).into();
    (Some(device), Some(stream_config))
}

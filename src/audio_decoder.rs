//! Decoding runtime component.
//!
//! Turns one file into a complete interleaved stereo buffer at the output
//! device's sample rate. Exactly one decode runs at a time; a superseding
//! request simply queues behind and the playlist core's identity checks sort
//! out which result is still wanted.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{AudioMessage, DecodedTrack, Message, TrackIdentifier};

const RESAMPLER_CHUNK_FRAMES: usize = 1024;
const OUTPUT_CHANNELS: u16 = 2;

pub struct AudioDecoder {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    output_sample_rate: u32,
}

impl AudioDecoder {
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            output_sample_rate: 44_100,
        }
    }

    /// Starts the blocking decode loop.
    pub fn run(&mut self) {
        info!("AudioDecoder: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Audio(AudioMessage::DecodeTrack(track))) => {
                    self.decode_track(track);
                }
                Ok(Message::Audio(AudioMessage::DeviceOpened { sample_rate, .. })) => {
                    debug!("AudioDecoder: output rate is {} Hz", sample_rate);
                    self.output_sample_rate = sample_rate;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("AudioDecoder: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn decode_track(&mut self, track: TrackIdentifier) {
        debug!("AudioDecoder: decoding {}", track.path.display());
        match decode_file(&track.path, self.output_sample_rate) {
            Ok(samples) => {
                let frames = samples.len() / OUTPUT_CHANNELS as usize;
                let duration_ms = frames as u64 * 1_000 / self.output_sample_rate.max(1) as u64;
                debug!(
                    "AudioDecoder: decoded {} frames ({} ms) for {}",
                    frames, duration_ms, track.id
                );
                let _ = self
                    .bus_producer
                    .send(Message::Audio(AudioMessage::TrackDecoded(DecodedTrack {
                        id: track.id,
                        samples: Arc::new(samples),
                        sample_rate: self.output_sample_rate,
                        channels: OUTPUT_CHANNELS,
                        duration_ms,
                    })));
            }
            Err(error) => {
                warn!(
                    "AudioDecoder: failed to decode {}: {}",
                    track.path.display(),
                    error
                );
                let _ = self
                    .bus_producer
                    .send(Message::Audio(AudioMessage::DecodeFailed {
                        id: track.id,
                        error,
                    }));
            }
        }
    }
}

/// Decodes a whole file into interleaved stereo f32 at `target_rate`.
fn decode_file(path: &Path, target_rate: u32) -> Result<Vec<f32>, String> {
    let file = std::fs::File::open(path).map_err(|error| format!("open failed: {error}"))?;
    let media_source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|extension| extension.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|error| format!("probe failed: {error}"))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .default_track()
        .ok_or_else(|| "no default audio track".to_string())?;
    let track_id = track.id;
    let source_rate = track.codec_params.sample_rate.unwrap_or(44_100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|error| format!("decoder creation failed: {error}"))?;

    let mut stereo_samples: Vec<f32> = Vec::new();
    while let Ok(packet) = format_reader.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let channels = spec.channels.count().max(1);
                let mut sample_buffer =
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buffer.copy_interleaved_ref(decoded);
                for frame in sample_buffer.samples().chunks(channels) {
                    match channels {
                        1 => {
                            stereo_samples.push(frame[0]);
                            stereo_samples.push(frame[0]);
                        }
                        _ => {
                            stereo_samples.push(frame[0]);
                            stereo_samples.push(frame[1]);
                        }
                    }
                }
            }
            Err(decode_error) => {
                debug!("AudioDecoder: decode error, stopping early: {}", decode_error);
                break;
            }
        }
    }

    if stereo_samples.is_empty() {
        return Err("no audio samples decoded".to_string());
    }
    resample_stereo(stereo_samples, source_rate, target_rate)
}

/// Resamples interleaved stereo audio. Identity when the rates match.
fn resample_stereo(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>, String> {
    if source_rate == target_rate {
        return Ok(samples);
    }

    let frames = samples.len() / 2;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        RESAMPLER_CHUNK_FRAMES,
        4,
        2,
    )
    .map_err(|error| format!("resampler creation failed: {error}"))?;

    let mut output = Vec::with_capacity(
        (frames as u64 * target_rate as u64 / source_rate.max(1) as u64) as usize * 2,
    );
    let mut position = 0;
    while position < frames {
        let needed = resampler.input_frames_next();
        let end = (position + needed).min(frames);
        // The final chunk is zero-padded up to the fixed input size.
        let mut chunk_left = left[position..end].to_vec();
        let mut chunk_right = right[position..end].to_vec();
        chunk_left.resize(needed, 0.0);
        chunk_right.resize(needed, 0.0);

        let resampled = resampler
            .process(&[chunk_left, chunk_right], None)
            .map_err(|error| format!("resampling failed: {error}"))?;
        for index in 0..resampled[0].len() {
            output.push(resampled[0][index]);
            output.push(resampled[1][index]);
        }
        position = end;
    }
    Ok(output)
}

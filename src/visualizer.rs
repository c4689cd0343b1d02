//! Real-time frequency analyzer.
//!
//! The output callback taps post-EQ samples into a shared ring; front-ends
//! pull a 128-bin byte spectrum on demand. Scaling mirrors the browser
//! analyser the player is modeled after: 256-point FFT, Blackman window,
//! magnitudes smoothed over time with a 0.8 constant and mapped from the
//! [-100 dB, -30 dB] range onto 0..=255.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

pub const FFT_SIZE: usize = 256;
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

pub type SharedAnalyzer = Arc<SpectrumAnalyzer>;

struct AnalyzerInner {
    ring: VecDeque<f32>,
    smoothed: [f32; SPECTRUM_BINS],
}

/// Thread-shared analyzer: the audio callback writes, front-ends read.
pub struct SpectrumAnalyzer {
    inner: Mutex<AnalyzerInner>,
    fft: Arc<dyn Fft<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        Self {
            inner: Mutex::new(AnalyzerInner {
                ring: VecDeque::with_capacity(FFT_SIZE),
                smoothed: [0.0; SPECTRUM_BINS],
            }),
            fft,
        }
    }

    /// Feeds interleaved output samples, folding channels to mono.
    pub fn push_samples(&self, interleaved: &[f32], channels: usize) {
        if interleaved.is_empty() || channels == 0 {
            return;
        }
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        for frame in interleaved.chunks(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            if inner.ring.len() == FFT_SIZE {
                inner.ring.pop_front();
            }
            inner.ring.push_back(mono);
        }
    }

    /// Clears the ring and the temporal smoothing state (playback stopped).
    pub fn reset(&self) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.ring.clear();
        inner.smoothed = [0.0; SPECTRUM_BINS];
    }

    /// Computes the current byte spectrum, most recent window of samples.
    pub fn byte_spectrum(&self) -> [u8; SPECTRUM_BINS] {
        let mut buffer = [Complex::new(0.0f32, 0.0f32); FFT_SIZE];
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        let available = inner.ring.len();
        for (index, sample) in inner.ring.iter().enumerate() {
            // Blackman window, matching the browser analyser.
            let phase = 2.0 * std::f32::consts::PI * index as f32 / (FFT_SIZE as f32 - 1.0);
            let window = 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos();
            buffer[index] = Complex::new(sample * window, 0.0);
        }
        if available == 0 {
            inner.smoothed = [0.0; SPECTRUM_BINS];
            return [0; SPECTRUM_BINS];
        }

        self.fft.process(&mut buffer);

        let mut bytes = [0u8; SPECTRUM_BINS];
        for bin in 0..SPECTRUM_BINS {
            let magnitude = buffer[bin].norm() / FFT_SIZE as f32;
            let smoothed = SMOOTHING * inner.smoothed[bin] + (1.0 - SMOOTHING) * magnitude;
            inner.smoothed[bin] = smoothed;
            let db = if smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                MIN_DECIBELS
            };
            let normalized = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
            bytes[bin] = (normalized.clamp(0.0, 1.0) * 255.0) as u8;
        }
        bytes
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

//! Equalizer state and DSP.
//!
//! Five fixed-frequency peaking bands plus a preamp. The preamp dB value is
//! what the user entered and what gets persisted; it is applied to the signal
//! as a `10^(dB/20)` linear factor. Band gains are handed to the peaking
//! filters in dB directly. Hand-adjusting any control while a named preset is
//! selected flips the preset to "custom" and re-enables a disabled EQ.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::protocol::EqDspParams;

pub const EQ_BAND_COUNT: usize = 5;

/// Fixed peaking-band center frequencies in Hz.
pub const EQ_FREQUENCIES: [f32; EQ_BAND_COUNT] = [60.0, 310.0, 1000.0, 6000.0, 12000.0];

const EQ_BAND_Q: f32 = 1.0;
const MAX_GAIN_DB: f32 = 12.0;

pub const CUSTOM_PRESET_NAME: &str = "custom";
pub const DEFAULT_PRESET_NAME: &str = "flat";

/// A named factory EQ curve.
#[derive(Debug, Clone, Copy)]
pub struct EqPreset {
    pub name: &'static str,
    pub preamp_db: f32,
    pub band_gains_db: [f32; EQ_BAND_COUNT],
}

pub const EQ_PRESETS: [EqPreset; 5] = [
    EqPreset {
        name: "flat",
        preamp_db: 0.0,
        band_gains_db: [0.0, 0.0, 0.0, 0.0, 0.0],
    },
    EqPreset {
        name: "rock",
        preamp_db: 1.0,
        band_gains_db: [4.0, 3.0, -2.0, 3.0, 5.0],
    },
    EqPreset {
        name: "jazz",
        preamp_db: 0.0,
        band_gains_db: [3.0, 2.0, -1.0, 2.0, 3.0],
    },
    EqPreset {
        name: "pop",
        preamp_db: 1.0,
        band_gains_db: [1.0, 2.0, 0.0, 1.0, 2.0],
    },
    EqPreset {
        name: "classical",
        preamp_db: 0.0,
        band_gains_db: [-1.0, 0.0, 0.0, 1.0, 2.0],
    },
];

pub fn preset_by_name(name: &str) -> Option<&'static EqPreset> {
    EQ_PRESETS.iter().find(|preset| preset.name == name)
}

/// Converts a user-entered dB value to the linear gain factor applied to the
/// signal.
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Persisted equalizer state.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EqSettings {
    #[serde(default = "default_preset_name")]
    pub preset_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub preamp_db: f32,
    #[serde(default)]
    pub band_gains_db: [f32; EQ_BAND_COUNT],
}

fn default_preset_name() -> String {
    DEFAULT_PRESET_NAME.to_string()
}

fn default_enabled() -> bool {
    true
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            preset_name: default_preset_name(),
            enabled: true,
            preamp_db: 0.0,
            band_gains_db: [0.0; EQ_BAND_COUNT],
        }
    }
}

impl EqSettings {
    /// Applies a named preset; unknown names fall back to flat.
    pub fn apply_preset(&mut self, name: &str) {
        let preset = preset_by_name(name)
            .or_else(|| preset_by_name(DEFAULT_PRESET_NAME))
            .copied();
        if let Some(preset) = preset {
            self.preset_name = preset.name.to_string();
            self.preamp_db = preset.preamp_db;
            self.band_gains_db = preset.band_gains_db;
            self.enabled = true;
        }
    }

    /// Hand-adjusts the preamp. Marks the curve as custom and re-enables a
    /// disabled EQ, matching slider behavior.
    pub fn set_preamp(&mut self, db: f32) {
        self.preamp_db = db.clamp(-MAX_GAIN_DB, MAX_GAIN_DB);
        self.preset_name = CUSTOM_PRESET_NAME.to_string();
        self.enabled = true;
    }

    /// Hand-adjusts one band. Returns false for an out-of-range index.
    pub fn set_band(&mut self, index: usize, gain_db: f32) -> bool {
        let Some(band) = self.band_gains_db.get_mut(index) else {
            return false;
        };
        *band = gain_db.clamp(-MAX_GAIN_DB, MAX_GAIN_DB);
        self.preset_name = CUSTOM_PRESET_NAME.to_string();
        self.enabled = true;
        true
    }

    pub fn toggle_enabled(&mut self) {
        self.enabled = !self.enabled;
    }

    /// Parameters the audio callback applies. A disabled EQ keeps the entered
    /// values but applies unity preamp and zeroed bands.
    pub fn dsp_params(&self) -> EqDspParams {
        if self.enabled {
            EqDspParams {
                enabled: true,
                preamp_gain: db_to_linear(self.preamp_db),
                band_gains_db: self.band_gains_db,
            }
        } else {
            EqDspParams {
                enabled: false,
                preamp_gain: 1.0,
                band_gains_db: [0.0; EQ_BAND_COUNT],
            }
        }
    }
}

fn make_filter(frequency: f32, gain_db: f32, sample_rate: f32) -> DirectForm2Transposed<f32> {
    let max_frequency = sample_rate / 2.0 - 1.0;
    let clamped_frequency = frequency.min(max_frequency).max(1.0);
    let coefficients = Coefficients::<f32>::from_params(
        Type::PeakingEQ(gain_db),
        sample_rate.hz(),
        clamped_frequency.hz(),
        EQ_BAND_Q,
    )
    .unwrap_or_else(|_| {
        Coefficients::<f32>::from_params(
            Type::PeakingEQ(0.0),
            sample_rate.hz(),
            clamped_frequency.hz(),
            EQ_BAND_Q,
        )
        .unwrap()
    });
    DirectForm2Transposed::<f32>::new(coefficients)
}

/// Per-channel cascade of peaking filters plus the preamp factor, run inside
/// the output callback.
pub struct EqChain {
    /// filters[channel][band]
    filters: Vec<[DirectForm2Transposed<f32>; EQ_BAND_COUNT]>,
    params: EqDspParams,
    sample_rate: f32,
}

impl EqChain {
    pub fn new(channels: u16, sample_rate: f32, params: EqDspParams) -> Self {
        let filters = (0..channels.max(1) as usize)
            .map(|_| {
                std::array::from_fn(|band| {
                    make_filter(EQ_FREQUENCIES[band], params.band_gains_db[band], sample_rate)
                })
            })
            .collect();
        Self {
            filters,
            params,
            sample_rate,
        }
    }

    /// Swaps in new parameters, rebuilding filter coefficients only when the
    /// band gains actually changed.
    pub fn set_params(&mut self, params: EqDspParams) {
        if params == self.params {
            return;
        }
        if params.band_gains_db != self.params.band_gains_db {
            for channel_filters in &mut self.filters {
                for (band, filter) in channel_filters.iter_mut().enumerate() {
                    *filter = make_filter(
                        EQ_FREQUENCIES[band],
                        params.band_gains_db[band],
                        self.sample_rate,
                    );
                }
            }
        }
        self.params = params;
    }

    /// Processes one sample of one channel through preamp and band cascade.
    pub fn process(&mut self, sample: f32, channel: usize) -> f32 {
        if !self.params.enabled {
            return sample;
        }
        let Some(channel_filters) = self.filters.get_mut(channel) else {
            return sample;
        };
        let mut output = sample * self.params.preamp_gain;
        for filter in channel_filters.iter_mut() {
            output = filter.run(output);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_linear_conversions() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-5);
        assert!((db_to_linear(-20.0) - 0.1).abs() < 1e-6);
        assert!((db_to_linear(6.0) - 1.9952624).abs() < 1e-4);
    }

    #[test]
    fn test_apply_preset_sets_curve_and_enables() {
        let mut settings = EqSettings {
            enabled: false,
            ..EqSettings::default()
        };
        settings.apply_preset("rock");
        assert_eq!(settings.preset_name, "rock");
        assert!(settings.enabled);
        assert_eq!(settings.band_gains_db, [4.0, 3.0, -2.0, 3.0, 5.0]);
        assert!((settings.preamp_db - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unknown_preset_falls_back_to_flat() {
        let mut settings = EqSettings::default();
        settings.apply_preset("does-not-exist");
        assert_eq!(settings.preset_name, "flat");
        assert_eq!(settings.band_gains_db, [0.0; EQ_BAND_COUNT]);
    }

    #[test]
    fn test_hand_adjustment_flips_to_custom_and_reenables() {
        let mut settings = EqSettings::default();
        settings.apply_preset("jazz");
        settings.enabled = false;
        assert!(settings.set_band(2, 4.0));
        assert_eq!(settings.preset_name, CUSTOM_PRESET_NAME);
        assert!(settings.enabled);
        assert!((settings.band_gains_db[2] - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_band_gain_is_clamped() {
        let mut settings = EqSettings::default();
        assert!(settings.set_band(0, 40.0));
        assert!((settings.band_gains_db[0] - MAX_GAIN_DB).abs() < f32::EPSILON);
        assert!(!settings.set_band(EQ_BAND_COUNT, 1.0));
    }

    #[test]
    fn test_disabled_eq_applies_unity_params_but_keeps_values() {
        let mut settings = EqSettings::default();
        settings.apply_preset("rock");
        settings.toggle_enabled();
        let params = settings.dsp_params();
        assert!(!params.enabled);
        assert!((params.preamp_gain - 1.0).abs() < f32::EPSILON);
        assert_eq!(params.band_gains_db, [0.0; EQ_BAND_COUNT]);
        // The entered curve survives for the next enable.
        assert_eq!(settings.band_gains_db, [4.0, 3.0, -2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_flat_enabled_chain_passes_signal_through() {
        let params = EqSettings::default().dsp_params();
        let mut chain = EqChain::new(2, 44_100.0, params);
        let output = chain.process(0.5, 0);
        assert!((output - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_disabled_chain_is_identity() {
        let mut settings = EqSettings::default();
        settings.apply_preset("rock");
        settings.toggle_enabled();
        let mut chain = EqChain::new(1, 48_000.0, settings.dsp_params());
        assert_eq!(chain.process(0.25, 0), 0.25);
    }
}

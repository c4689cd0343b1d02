//! Application configuration model and defaults.
//!
//! Read once at startup from `config.toml` in the platform config dir.
//! Player state (playlists, EQ, volume, history) is not configuration and
//! lives in the key-value store instead.

use std::path::Path;

use log::{info, warn};

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Audio output device preferences.
    pub output: OutputConfig,
    #[serde(default)]
    /// Playback event behavior.
    pub playback: PlaybackConfig,
}

/// Output device preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub output_device_name: String,
    #[serde(default = "default_true")]
    pub output_device_auto: bool,
}

/// Playback event behavior.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    /// How often progress events are emitted while playing.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_progress_interval_ms() -> u64 {
    250
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_device_name: String::new(),
            output_device_auto: true,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

/// Clamps values a hand-edited config file could have pushed out of range.
pub fn sanitize_config(config: Config) -> Config {
    Config {
        output: config.output,
        playback: PlaybackConfig {
            progress_interval_ms: config.playback.progress_interval_ms.clamp(50, 5_000),
        },
    }
}

/// Loads the config file, writing a default one on first start. Parse
/// failures are logged and fall back to defaults.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match toml::to_string(&default_config) {
            Ok(serialized) => {
                if let Err(io_error) = std::fs::write(path, serialized) {
                    warn!(
                        "Failed to write default config to {}: {}",
                        path.display(),
                        io_error
                    );
                }
            }
            Err(serialize_error) => {
                warn!("Failed to serialize default config: {}", serialize_error);
            }
        }
        return default_config;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(io_error) => {
            warn!(
                "Failed to read config file {}. Using defaults. error={}",
                path.display(),
                io_error
            );
            return Config::default();
        }
    };
    match toml::from_str::<Config>(&content) {
        Ok(config) => sanitize_config(config),
        Err(parse_error) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                parse_error
            );
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert!(config.output.output_device_name.is_empty());
        assert!(config.output.output_device_auto);
        assert_eq!(config.playback.progress_interval_ms, 250);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[output]
output_device_name = "USB DAC"
"#,
        )
        .expect("config should parse");
        assert_eq!(parsed.output.output_device_name, "USB DAC");
        assert!(parsed.output.output_device_auto);
        assert_eq!(parsed.playback.progress_interval_ms, 250);
    }

    #[test]
    fn test_sanitize_clamps_progress_interval() {
        let config = Config {
            playback: PlaybackConfig {
                progress_interval_ms: 1,
            },
            ..Config::default()
        };
        assert_eq!(sanitize_config(config).playback.progress_interval_ms, 50);
    }
}

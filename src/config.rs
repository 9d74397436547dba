use lazy_static::lazy_static;
use log::warn;
use parking_lot::RwLock;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::{ClipError, Result};

lazy_static! {
    static ref CONFIG: RwLock<PlaybackConfig> = RwLock::new(PlaybackConfig::load());
}

const CONFIG_PATHS: [&str; 2] = ["./clipstream.toml", "./clipstream_config.toml"];
const ENV_PREFIX: &str = "CLIPSTREAM_";

const KEYS: [&str; 11] = [
    "frame_buffer_target",
    "sample_high_water",
    "sample_low_water",
    "source_batch_size",
    "read_chunk_size",
    "ring_buffer_seconds",
    "render_quantum",
    "sample_rate",
    "tick_interval_ms",
    "audio_fill_interval_ms",
    "audio_fill_target_seconds",
];

/// Tunables shared by the demuxer, the frame pipeline, the audio path and
/// the clock.
///
/// Components take a `PlaybackConfig` at construction; the process-wide
/// copy behind [`get`] is only a convenience for callers that do not manage
/// their own.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Decoded frames kept ahead of the playhead.
    pub frame_buffer_target: usize,
    /// Queued samples per track at which the source is paused.
    pub sample_high_water: usize,
    /// Queued samples per track below which a pull re-arms a paused source.
    pub sample_low_water: usize,
    /// Maximum samples per delivery batch from the track source.
    pub source_batch_size: usize,
    /// Bytes requested per read from the streamed byte source.
    pub read_chunk_size: usize,
    /// Audio ring capacity, in seconds of audio.
    pub ring_buffer_seconds: f64,
    /// Frames per real-time render callback.
    pub render_quantum: usize,
    /// Output sample rate used when sizing the ring.
    pub sample_rate: u32,
    /// Period of the default clock tick source.
    pub tick_interval: Duration,
    /// Period of the audio feeder loop.
    pub audio_fill_interval: Duration,
    /// How much decoded audio the feeder tries to keep in the ring, in seconds.
    pub audio_fill_target_seconds: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_buffer_target: 3,
            sample_high_water: 50,
            sample_low_water: 10,
            source_batch_size: 16,
            read_chunk_size: 64 * 1024,
            ring_buffer_seconds: 0.5,
            render_quantum: 128,
            sample_rate: 48_000,
            tick_interval: Duration::from_micros(16_667),
            audio_fill_interval: Duration::from_millis(10),
            audio_fill_target_seconds: 0.25,
        }
    }
}

impl PlaybackConfig {
    /// Defaults, overridden by the first config file found, overridden by
    /// `CLIPSTREAM_*` environment variables. Bad values are logged and
    /// skipped; a combination that fails [`validate`](Self::validate) falls
    /// back to the defaults.
    pub fn load() -> Self {
        let file = CONFIG_PATHS.iter().find_map(|path| {
            let mut content = String::new();
            File::open(path)
                .and_then(|mut file| file.read_to_string(&mut content))
                .ok()
                .map(|_| content)
        });
        Self::from_sources(file.as_deref(), |name| env::var(name).ok())
    }

    /// Builds a config from file content and an environment lookup, with the
    /// same precedence and fallback as [`load`](Self::load).
    pub fn from_sources<F>(file: Option<&str>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PlaybackConfig::default();
        if let Some(content) = file {
            config.merge_str(content);
        }

        for key in &KEYS {
            let name = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Some(value) = env(&name) {
                if let Err(e) = config.set(key, &value) {
                    warn!("ignoring {}: {}", name, e);
                }
            }
        }

        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!("invalid playback config ({}), using defaults", e);
                PlaybackConfig::default()
            }
        }
    }

    /// Applies `key = value` lines. Comments and unknown keys are ignored.
    pub fn merge_str(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !KEYS.contains(&key) {
                continue;
            }
            if let Err(e) = self.set(key, value) {
                warn!("ignoring config key {}: {}", key, e);
            }
        }
    }

    /// Sets a single key from its textual value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "frame_buffer_target" => self.frame_buffer_target = value.parse()?,
            "sample_high_water" => self.sample_high_water = value.parse()?,
            "sample_low_water" => self.sample_low_water = value.parse()?,
            "source_batch_size" => self.source_batch_size = value.parse()?,
            "read_chunk_size" => self.read_chunk_size = value.parse()?,
            "ring_buffer_seconds" => self.ring_buffer_seconds = value.parse()?,
            "render_quantum" => self.render_quantum = value.parse()?,
            "sample_rate" => self.sample_rate = value.parse()?,
            "tick_interval_ms" => self.tick_interval = millis(value.parse()?)?,
            "audio_fill_interval_ms" => self.audio_fill_interval = millis(value.parse()?)?,
            "audio_fill_target_seconds" => self.audio_fill_target_seconds = value.parse()?,
            other => {
                return Err(ClipError::InvalidData(format!("unknown config key {}", other)))
            }
        }
        Ok(())
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("frame_buffer_target", self.frame_buffer_target),
            ("sample_high_water", self.sample_high_water),
            ("source_batch_size", self.source_batch_size),
            ("read_chunk_size", self.read_chunk_size),
            ("render_quantum", self.render_quantum),
            ("sample_rate", self.sample_rate as usize),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ClipError::InvalidData(format!("{} must be non-zero", name)));
            }
        }
        if self.sample_low_water >= self.sample_high_water {
            return Err(ClipError::InvalidData(format!(
                "sample_low_water ({}) must be below sample_high_water ({})",
                self.sample_low_water, self.sample_high_water
            )));
        }
        if self.ring_buffer_seconds.is_nan() || self.ring_buffer_seconds <= 0.0 {
            return Err(ClipError::InvalidData("ring_buffer_seconds must be positive".into()));
        }
        if self.tick_interval.is_zero() || self.audio_fill_interval.is_zero() {
            return Err(ClipError::InvalidData("intervals must be non-zero".into()));
        }
        Ok(())
    }

    /// Ring capacity in frames for the configured length and sample rate.
    pub fn ring_capacity_frames(&self) -> usize {
        let frames = (self.ring_buffer_seconds * self.sample_rate as f64).ceil() as usize;
        frames.max(self.render_quantum)
    }

    /// Frames the audio feeder aims to keep buffered.
    pub fn audio_fill_target_frames(&self) -> usize {
        (self.audio_fill_target_seconds * self.sample_rate as f64).ceil() as usize
    }

    /// Re-reads config files and environment into the process-wide copy.
    pub fn reload() {
        let new_config = PlaybackConfig::load();
        *CONFIG.write() = new_config;
    }
}

fn millis(value: f64) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(ClipError::InvalidData(format!("bad duration {} ms", value)));
    }
    Ok(Duration::from_micros((value * 1000.0).round() as u64))
}

/// Returns the process-wide configuration.
pub fn get() -> PlaybackConfig {
    CONFIG.read().clone()
}

/// Re-reads config files and environment into the process-wide copy.
pub fn reload() {
    PlaybackConfig::reload();
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# Clipstream Configuration
# Values shown are the defaults. Environment variables CLIPSTREAM_<KEY> win over this file.

frame_buffer_target = 3
sample_high_water = 50
sample_low_water = 10
source_batch_size = 16
read_chunk_size = 65536
ring_buffer_seconds = 0.5
render_quantum = 128
sample_rate = 48000
tick_interval_ms = 16.667
audio_fill_interval_ms = 10
audio_fill_target_seconds = 0.25
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlaybackConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_buffer_target, 3);
        assert_eq!(config.sample_high_water, 50);
        assert_eq!(config.ring_capacity_frames(), 24_000);
    }

    #[test]
    fn test_merge_str() {
        let mut config = PlaybackConfig::default();
        config.merge_str(
            "# comment\n\
             frame_buffer_target = 5\n\
             sample_rate = \"44100\"\n\
             unknown = 1\n\
             tick_interval_ms = 20\n",
        );
        assert_eq!(config.frame_buffer_target, 5);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.tick_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_bad_value_is_skipped() {
        let mut config = PlaybackConfig::default();
        config.merge_str("sample_high_water = lots");
        assert_eq!(config.sample_high_water, 50);
        assert!(matches!(
            config.set("sample_high_water", "lots"),
            Err(ClipError::ParseInt(_))
        ));
        assert!(matches!(
            config.set("ring_buffer_seconds", "x"),
            Err(ClipError::ParseFloat(_))
        ));
    }

    #[test]
    fn test_validate_water_marks() {
        let config = PlaybackConfig {
            sample_low_water: 50,
            ..PlaybackConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PlaybackConfig {
            render_quantum: 0,
            ..PlaybackConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sources_layer_file_then_env() {
        let config = PlaybackConfig::from_sources(
            Some("frame_buffer_target = 5\nrender_quantum = 256\n"),
            |name| (name == "CLIPSTREAM_RENDER_QUANTUM").then(|| "512".to_string()),
        );
        assert_eq!(config.frame_buffer_target, 5);
        assert_eq!(config.render_quantum, 512);
    }

    #[test]
    fn test_invalid_sources_fall_back_to_defaults() {
        let config = PlaybackConfig::from_sources(
            Some("sample_high_water = 4\nsample_low_water = 8\n"),
            |_| None,
        );
        assert_eq!(config, PlaybackConfig::default());

        let config = PlaybackConfig::from_sources(None, |name| {
            (name == "CLIPSTREAM_RENDER_QUANTUM").then(|| "0".to_string())
        });
        assert_eq!(config, PlaybackConfig::default());
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let dir = std::env::temp_dir().join(format!("clipstream-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("clipstream.toml");
        let _ = std::fs::remove_file(&path);
        create_default_config_template(&path).unwrap();

        let mut config = PlaybackConfig::default();
        config.merge_str(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(config, PlaybackConfig::default());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

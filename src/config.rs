use crate::device::FacingMode;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub visibility: VisibilitySettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureSettings {
    /// Preferred camera facing direction
    #[serde(default = "default_facing")]
    pub facing: FacingMode,

    /// Request an audio track alongside video
    #[serde(default)]
    pub audio: bool,

    /// JPEG quality for frozen frames, in (0, 1]
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlaybackSettings {
    /// Release the playback pipeline whenever the resource leaves the
    /// viewport, instead of keeping it paused and warm
    #[serde(default)]
    pub release_when_hidden: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VisibilitySettings {
    /// Fraction of the element's area that must intersect the viewport
    /// before it counts as visible
    #[serde(default = "default_visibility_threshold")]
    pub threshold: f64,

    /// Fraction by which the viewport is expanded on each side, so playback
    /// can pre-warm slightly before full entry
    #[serde(default = "default_visibility_margin")]
    pub margin: f64,

    /// Ratio subtracted from the threshold on exit, suppressing rapid
    /// flip-flapping right at the boundary
    #[serde(default = "default_visibility_hysteresis")]
    pub hysteresis: f64,
}

fn default_facing() -> FacingMode {
    FacingMode::Rear
}

fn default_jpeg_quality() -> f32 {
    0.8
}

fn default_visibility_threshold() -> f64 {
    0.25
}

fn default_visibility_margin() -> f64 {
    0.1
}

fn default_visibility_hysteresis() -> f64 {
    0.05
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            facing: default_facing(),
            audio: false,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            release_when_hidden: false,
        }
    }
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            threshold: default_visibility_threshold(),
            margin: default_visibility_margin(),
            hysteresis: default_visibility_hysteresis(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            playback: PlaybackSettings::default(),
            visibility: VisibilitySettings::default(),
        }
    }
}

impl MediaConfig {
    /// Load configuration from an optional TOML file and environment
    /// variables (prefix `MEDIACTL_`), layered over built-in defaults.
    pub fn load<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            let path = path.as_ref();
            debug!("Loading configuration from: {}", path.display());
            builder = builder.add_source(File::from(path).required(false));
        }

        builder = builder.add_source(Environment::with_prefix("MEDIACTL").separator("__"));

        let config: MediaConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            "Configuration loaded: facing={:?}, jpeg_quality={}, visibility threshold={}",
            config.capture.facing, config.capture.jpeg_quality, config.visibility.threshold
        );

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.jpeg_quality <= 0.0 || self.capture.jpeg_quality > 1.0 {
            return Err(ConfigError::Message(format!(
                "capture.jpeg_quality must be in (0, 1], got {}",
                self.capture.jpeg_quality
            )));
        }

        if self.visibility.threshold <= 0.0 || self.visibility.threshold > 1.0 {
            return Err(ConfigError::Message(format!(
                "visibility.threshold must be in (0, 1], got {}",
                self.visibility.threshold
            )));
        }

        if self.visibility.margin < 0.0 {
            return Err(ConfigError::Message(format!(
                "visibility.margin must be non-negative, got {}",
                self.visibility.margin
            )));
        }

        if self.visibility.hysteresis < 0.0 || self.visibility.hysteresis >= self.visibility.threshold
        {
            return Err(ConfigError::Message(format!(
                "visibility.hysteresis must be in [0, threshold), got {}",
                self.visibility.hysteresis
            )));
        }

        Ok(())
    }

    /// Serialize the configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), contents)?;
        debug!("Configuration saved to: {}", path.as_ref().display());
        Ok(())
    }
}

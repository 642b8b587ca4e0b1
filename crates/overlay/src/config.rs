//! Markup engine configuration.
//!
//! Configuration can be created programmatically, loaded from a JSON file, or
//! read from environment variables layered over the defaults.

use crate::input::PointerKind;
use crate::persistence::PersistenceMode;
use pdf_markup_core::{Color, InkStyle};
use pdf_markup_render::CompositeMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Which pointer kinds may start a stroke
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerFilter {
    #[default]
    Any,
    StylusOnly,
    Kinds(Vec<PointerKind>),
}

impl PointerFilter {
    pub fn accepts(&self, kind: PointerKind) -> bool {
        match self {
            PointerFilter::Any => true,
            PointerFilter::StylusOnly => kind == PointerKind::Stylus,
            PointerFilter::Kinds(kinds) => kinds.contains(&kind),
        }
    }

    fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" | "" => Ok(PointerFilter::Any),
            "stylus" | "stylus_only" => Ok(PointerFilter::StylusOnly),
            list => list
                .split(',')
                .map(str::parse::<PointerKind>)
                .collect::<Result<Vec<_>, _>>()
                .map(PointerFilter::Kinds),
        }
    }
}

/// Active input policy handed to the gesture tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPolicy {
    pub pointers: PointerFilter,
    /// Refuse a new session while another one is tracking
    pub single_point_only: bool,
    /// Strokes ending with fewer samples are discarded
    pub min_samples: usize,
}

impl Default for InputPolicy {
    fn default() -> Self {
        Self { pointers: PointerFilter::Any, single_point_only: false, min_samples: 1 }
    }
}

/// Configuration for the markup engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupConfig {
    pub input_policy: InputPolicy,
    /// Pen used for new strokes
    pub ink: InkStyle,
    /// Pixels per page point for `current_raster`
    pub raster_scale: f64,
    /// Pixels per page point for persisted stamps
    pub stamp_scale: f64,
    pub composite_mode: CompositeMode,
    pub persistence_mode: PersistenceMode,
    /// Save the document after every successful flush
    pub autosave: bool,
    /// Save the document when an overlay with new strokes is released
    pub save_on_release: bool,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            input_policy: InputPolicy::default(),
            ink: InkStyle::default(),
            raster_scale: 1.0,
            stamp_scale: 2.0,
            composite_mode: CompositeMode::Inline,
            persistence_mode: PersistenceMode::Background,
            autosave: false,
            save_on_release: false,
        }
    }
}

impl MarkupConfig {
    pub fn with_input_policy(mut self, policy: InputPolicy) -> Self {
        self.input_policy = policy;
        self
    }

    pub fn with_ink(mut self, ink: InkStyle) -> Self {
        self.ink = ink;
        self
    }

    pub fn with_raster_scale(mut self, scale: f64) -> Self {
        self.raster_scale = scale;
        self
    }

    pub fn with_stamp_scale(mut self, scale: f64) -> Self {
        self.stamp_scale = scale;
        self
    }

    pub fn with_composite_mode(mut self, mode: CompositeMode) -> Self {
        self.composite_mode = mode;
        self
    }

    pub fn with_persistence_mode(mut self, mode: PersistenceMode) -> Self {
        self.persistence_mode = mode;
        self
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn with_save_on_release(mut self, save: bool) -> Self {
        self.save_on_release = save;
        self
    }

    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `PDF_MARKUP_POINTERS`: `any`, `stylus`, or a list such as `touch,mouse`
    /// - `PDF_MARKUP_SINGLE_POINT`: `true`/`false`
    /// - `PDF_MARKUP_MIN_SAMPLES`: minimum samples per stroke (default: 1)
    /// - `PDF_MARKUP_INK_COLOR`: `#RRGGBB` or `#RRGGBBAA`
    /// - `PDF_MARKUP_INK_WIDTH`: base width in points (default: 5)
    /// - `PDF_MARKUP_RASTER_SCALE`: overlay pixels per point (default: 1)
    /// - `PDF_MARKUP_STAMP_SCALE`: stamp pixels per point (default: 2)
    /// - `PDF_MARKUP_COMPOSITE`: `inline` or `background`
    /// - `PDF_MARKUP_PERSISTENCE`: `inline` or `background`
    /// - `PDF_MARKUP_AUTOSAVE`: `true`/`false`
    /// - `PDF_MARKUP_SAVE_ON_RELEASE`: `true`/`false`
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = env_var("PDF_MARKUP_POINTERS") {
            config.input_policy.pointers = PointerFilter::parse(&val)
                .map_err(|_| ConfigError::InvalidValue("PDF_MARKUP_POINTERS".to_string()))?;
        }
        if let Some(val) = env_var("PDF_MARKUP_SINGLE_POINT") {
            config.input_policy.single_point_only = parse_env("PDF_MARKUP_SINGLE_POINT", &val)?;
        }
        if let Some(val) = env_var("PDF_MARKUP_MIN_SAMPLES") {
            config.input_policy.min_samples = parse_env("PDF_MARKUP_MIN_SAMPLES", &val)?;
        }
        if let Some(val) = env_var("PDF_MARKUP_INK_COLOR") {
            config.ink.color = parse_hex_color(&val)
                .ok_or_else(|| ConfigError::InvalidValue("PDF_MARKUP_INK_COLOR".to_string()))?;
        }
        if let Some(val) = env_var("PDF_MARKUP_INK_WIDTH") {
            config.ink.width = parse_env("PDF_MARKUP_INK_WIDTH", &val)?;
        }
        if let Some(val) = env_var("PDF_MARKUP_RASTER_SCALE") {
            config.raster_scale = parse_env("PDF_MARKUP_RASTER_SCALE", &val)?;
        }
        if let Some(val) = env_var("PDF_MARKUP_STAMP_SCALE") {
            config.stamp_scale = parse_env("PDF_MARKUP_STAMP_SCALE", &val)?;
        }
        if let Some(val) = env_var("PDF_MARKUP_COMPOSITE") {
            config.composite_mode = match val.to_ascii_lowercase().as_str() {
                "inline" => CompositeMode::Inline,
                "background" => CompositeMode::Background,
                _ => return Err(ConfigError::InvalidValue("PDF_MARKUP_COMPOSITE".to_string())),
            };
        }
        if let Some(val) = env_var("PDF_MARKUP_PERSISTENCE") {
            config.persistence_mode = match val.to_ascii_lowercase().as_str() {
                "inline" => PersistenceMode::Inline,
                "background" => PersistenceMode::Background,
                _ => return Err(ConfigError::InvalidValue("PDF_MARKUP_PERSISTENCE".to_string())),
            };
        }
        if let Some(val) = env_var("PDF_MARKUP_AUTOSAVE") {
            config.autosave = parse_env("PDF_MARKUP_AUTOSAVE", &val)?;
        }
        if let Some(val) = env_var("PDF_MARKUP_SAVE_ON_RELEASE") {
            config.save_on_release = parse_env("PDF_MARKUP_SAVE_ON_RELEASE", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file. Missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or holds invalid values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Check value ranges the engine depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.raster_scale.is_finite() && self.raster_scale > 0.0) {
            return Err(ConfigError::InvalidValue("raster_scale".to_string()));
        }
        if !(self.stamp_scale.is_finite() && self.stamp_scale > 0.0) {
            return Err(ConfigError::InvalidValue("stamp_scale".to_string()));
        }
        if !(self.ink.width.is_finite() && self.ink.width > 0.0) {
            return Err(ConfigError::InvalidValue("ink.width".to_string()));
        }
        Ok(())
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|val| val.trim().to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn parse_hex_color(value: &str) -> Option<Color> {
    let hex = value.trim().trim_start_matches('#');
    if !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Color::rgb(channel(0)?, channel(2)?, channel(4)?)),
        8 => Some(Color::new(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
        _ => None,
    }
}

//! Application Configuration
//!
//! Detector thresholds and CLI settings stored in TOML format. Every
//! section is optional in the file; missing sections keep their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::vision::components::ShapeFilter;
use crate::vision::reader::ReaderConfig;
use crate::vision::regions::GeometryProfile;
use crate::vision::segmentation::{ColorClass, ColorProfile};

/// Detector config version understood by this build
pub const CONFIG_VERSION: u32 = 1;

/// Every threshold used by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub version: u32,
    pub anchor: AnchorConfig,
    /// Search windows relative to the date anchor
    pub geometry: GeometryProfile,
    pub colors: ColorsConfig,
    /// Shape filter for the red count badge
    pub badge: ShapeFilter,
    /// Shape filter for the yellow banner
    pub banner: ShapeFilter,
    pub reader: ReaderConfig,
    pub signals: SignalsConfig,
    pub overlay: OverlayConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            anchor: AnchorConfig::default(),
            geometry: GeometryProfile::default(),
            colors: ColorsConfig::default(),
            badge: ShapeFilter::badge(),
            banner: ShapeFilter::banner(),
            reader: ReaderConfig::default(),
            signals: SignalsConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Reject configs the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Version {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }

        if !(0.0..=1.0).contains(&self.anchor.min_confidence) {
            return Err(ConfigError::invalid("anchor.min_confidence", "must be within [0, 1]"));
        }

        for class in [ColorClass::AlertRed, ColorClass::WarningYellow, ColorClass::DigitWhite] {
            self.colors
                .get(class)
                .check()
                .map_err(|msg| ConfigError::invalid(&format!("colors.{}", class), msg))?;
        }

        self.badge.check().map_err(|msg| ConfigError::invalid("badge", msg))?;
        self.banner.check().map_err(|msg| ConfigError::invalid("banner", msg))?;

        let reader = &self.reader;
        if reader.upscale == 0 || reader.upscale > 8 {
            return Err(ConfigError::invalid("reader.upscale", "must be within 1..=8"));
        }
        if reader.pad_ratio < 0.0 || !reader.pad_ratio.is_finite() {
            return Err(ConfigError::invalid("reader.pad_ratio", "must be >= 0"));
        }
        if reader.clahe_tiles.0 == 0 || reader.clahe_tiles.1 == 0 {
            return Err(ConfigError::invalid("reader.clahe_tiles", "must be at least 1x1"));
        }

        if self.overlay.font_size <= 0.0 {
            return Err(ConfigError::invalid("overlay.font_size", "must be > 0"));
        }

        Ok(())
    }
}

/// Anchor search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Detections below this confidence cannot become the anchor
    pub min_confidence: f32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self { min_confidence: 0.5 }
    }
}

/// Per-class segmentation profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    pub alert_red: ColorProfile,
    pub warning_yellow: ColorProfile,
    pub digit_white: ColorProfile,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            alert_red: ColorProfile::alert_red(),
            warning_yellow: ColorProfile::warning_yellow(),
            digit_white: ColorProfile::digit_white(),
        }
    }
}

impl ColorsConfig {
    pub fn get(&self, class: ColorClass) -> &ColorProfile {
        match class {
            ColorClass::AlertRed => &self.alert_red,
            ColorClass::WarningYellow => &self.warning_yellow,
            ColorClass::DigitWhite => &self.digit_white,
        }
    }
}

/// Which signals run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub badge: bool,
    pub banner: bool,
    pub numeric_mismatch: bool,
    /// Read the count printed on a winning badge
    pub read_badge_value: bool,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            badge: true,
            banner: true,
            numeric_mismatch: true,
            read_badge_value: false,
        }
    }
}

/// Debug overlay rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TTF/OTF font for labels; the bundled DejaVu Sans Mono when unset
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: 14.0,
        }
    }
}

/// Recognition backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Model directory; the data directory's `models/` when unset
    pub models_dir: Option<PathBuf>,
    /// ONNX Runtime intra-op threads per session
    pub intra_threads: usize,
    /// Backend drops recognized lines below this confidence
    pub min_confidence: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            intra_threads: 4,
            min_confidence: 0.1,
        }
    }
}

/// Target date selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Dashboard's local time as an offset from UTC
    pub utc_offset_minutes: i32,
    /// From this local hour on, `auto` targets tomorrow
    pub switch_hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 60,
            switch_hour: 12,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub schedule: ScheduleConfig,
    pub detector: DetectorConfig,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
    config.detector.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.detector.validate().is_ok());

        assert_eq!(config.detector.version, CONFIG_VERSION);
        assert!(config.detector.signals.badge);
        assert!(config.detector.signals.banner);
        assert!(config.detector.signals.numeric_mismatch);
        assert!(!config.detector.signals.read_badge_value);
        assert_eq!(config.schedule.switch_hour, 12);
        assert_eq!(config.detector.badge.max_area_px, Some(3000));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.detector, config.detector);
    }

    #[test]
    fn test_partial_file_overrides_only_named_values() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            "[detector.signals]\nbanner = false\n\n[detector.reader]\nupscale = 3\n\n[schedule]\nutc_offset_minutes = 180"
        )
        .unwrap();

        let loaded = load_config(temp_file.path()).unwrap();
        assert!(!loaded.detector.signals.banner);
        assert!(loaded.detector.signals.badge);
        assert_eq!(loaded.detector.reader.upscale, 3);
        assert!((loaded.detector.reader.pad_ratio - 0.12).abs() < 1e-6);
        assert_eq!(loaded.schedule.utc_offset_minutes, 180);
        assert_eq!(loaded.schedule.switch_hour, 12);
        assert_eq!(loaded.detector.colors, ColorsConfig::default());
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.detector.badge.min_area_px = 250;
        config.backend.models_dir = Some(PathBuf::from("/opt/models"));

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.detector.badge.min_area_px, 250);
        assert_eq!(loaded.backend.models_dir, Some(PathBuf::from("/opt/models")));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[detector]\nversion = 2").unwrap();
        let err = load_config(temp_file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Version { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DetectorConfig::default();
        config.reader.upscale = 0;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.badge.max_aspect = Some(0.5);
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.colors.alert_red.hue_ranges[1].hue = (170, 200);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_file_not_found() {
        assert!(load_config(Path::new("/nonexistent/path/config.toml")).is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();
        assert!(load_config(temp_file.path()).is_err());
    }
}

//! Tool configuration: gesture thresholds and storage directories.

use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{fs, path::PathBuf};

/// Gesture-recogniser thresholds. Distances are screen pixels, times are
/// milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub swipe_min_px: i32,
    pub pinch_threshold_px: i32,
    pub long_press_ms: i64,
    pub long_press_slop_px: i32,
    pub double_tap_ms: i64,
    pub double_tap_slop_px: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            swipe_min_px: 50,
            pinch_threshold_px: 20,
            long_press_ms: 500,
            long_press_slop_px: 20,
            double_tap_ms: 300,
            double_tap_slop_px: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub thresholds: Thresholds,
}

fn default_config_text() -> &'static str {
    include_str!("../config/default.toml")
}

pub fn config_dir() -> PathBuf {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".config").join("touchmap")
}

/// Storage layout for calibration and profile files, with CLI overrides.
#[derive(Debug, Clone)]
pub struct Dirs {
    pub base: PathBuf,
    pub calibrations: PathBuf,
    pub profiles: PathBuf,
}

impl Dirs {
    pub fn resolve(
        base_override: Option<PathBuf>,
        calibration_override: Option<PathBuf>,
        profile_override: Option<PathBuf>,
    ) -> Result<Self> {
        let base = base_override.unwrap_or_else(config_dir);
        let calibrations = calibration_override.unwrap_or_else(|| base.join("calibrations"));
        let profiles = profile_override.unwrap_or_else(|| base.join("profiles"));
        fs::create_dir_all(&calibrations)
            .with_context(|| format!("failed to create {}", calibrations.display()))?;
        fs::create_dir_all(&profiles)
            .with_context(|| format!("failed to create {}", profiles.display()))?;
        Ok(Self {
            base,
            calibrations,
            profiles,
        })
    }
}

impl AppConfig {
    /// Load `config.toml` from the config directory, installing the embedded
    /// default on first run.
    pub fn load_or_install_default() -> Result<Self> {
        let dir = config_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.toml");
        if !path.exists() {
            fs::write(&path, default_config_text())?;
            info!("installed default config at {}", path.display());
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        let config: AppConfig =
            toml::from_str(&text).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let th = &self.thresholds;
        if th.long_press_ms <= 0 || th.double_tap_ms <= 0 {
            return Err(anyhow!("threshold times must be positive durations"));
        }
        if th.swipe_min_px <= 0 || th.pinch_threshold_px <= 0 {
            return Err(anyhow!("threshold distances must be positive pixels"));
        }
        Ok(())
    }
}

/// Lower-cased alphanumeric file-name stem for a device or profile name.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if matches!(c, ' ' | '-' | '_' | '.') && !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("device");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses_and_validates() {
        let config: AppConfig = toml::from_str(default_config_text()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.thresholds.swipe_min_px, 50);
        assert_eq!(config.thresholds.long_press_ms, 500);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: AppConfig = toml::from_str("[thresholds]\nswipe_min_px = 80\n").unwrap();
        assert_eq!(config.thresholds.swipe_min_px, 80);
        assert_eq!(config.thresholds.double_tap_ms, 300);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let config: AppConfig =
            toml::from_str("[thresholds]\nlong_press_ms = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn slugify_flattens_device_names() {
        assert_eq!(slugify("Wacom Intuos Pro M Pen"), "wacom_intuos_pro_m_pen");
        assert_eq!(slugify("  !!  "), "device");
        assert_eq!(slugify("ELAN-Touchscreen.v2"), "elan_touchscreen_v2");
    }
}

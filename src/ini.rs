//! Keyed text files for calibration and profile storage.
//!
//! Sections of `key=value` pairs; `#`/`;` comment lines and unknown keys are
//! tolerated so files survive edits by other tools.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::Path,
};

#[derive(Debug, Clone, Default)]
pub struct IniData {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniData {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut data = Self::default();
        let mut section = "default".to_string();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                continue; // skip malformed line
            };
            data.set(&section, key.trim(), value.trim());
        }
        data
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (name, section) in &self.sections {
            let _ = writeln!(out, "[{name}]");
            for (key, value) in section {
                let _ = writeln!(out, "{key}={value}");
            }
            out.push('\n');
        }
        fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn get_str(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    pub fn get_f64(&self, section: &str, key: &str, default: f64) -> f64 {
        self.get(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_i32(&self, section: &str, key: &str, default: i32) -> i32 {
        self.get(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get(section, key) {
            Some(v) => v != "0" && !v.eq_ignore_ascii_case("false"),
            None => default,
        }
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        self.get(section, key)
            .ok_or_else(|| anyhow!("missing key {key} in section [{section}]"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_ignores_noise() {
        let data = IniData::parse(
            "# comment\n; also comment\n[Calibration]\nmode = minmax\nmin_x=12.5\n\nbroken line\n[Other]\nflag=1\n",
        );
        assert_eq!(data.get("Calibration", "mode"), Some("minmax"));
        assert_eq!(data.get_f64("Calibration", "min_x", 0.0), 12.5);
        assert!(data.get_bool("Other", "flag", false));
        assert_eq!(data.get("Calibration", "broken line"), None);
    }

    #[test]
    fn unknown_keys_are_preserved_on_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.ini");
        let mut data = IniData::parse("[Calibration]\nmode=affine\nfuture_key=7\n");
        data.set("Metadata", "saved_with", "touchmap");
        data.save(&path).unwrap();

        let reloaded = IniData::load(&path).unwrap();
        assert_eq!(reloaded.get("Calibration", "future_key"), Some("7"));
        assert_eq!(reloaded.get("Metadata", "saved_with"), Some("touchmap"));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let data = IniData::parse("[A]\nx=1\n");
        assert_eq!(data.get_i32("A", "y", 42), 42);
        assert_eq!(data.get_str("B", "z", "dflt"), "dflt");
        assert!(data.require("A", "y").is_err());
    }
}

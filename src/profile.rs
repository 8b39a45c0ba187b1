//! Monitor-mapping profiles: which device maps to which monitor, under
//! which desktop layout.

use anyhow::Result;
use std::path::Path;

use crate::ini::IniData;
use crate::monitors::{identity_ctm, DesktopLayout, Monitor, Rotation};

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub name: String,
    pub device_id: i32,
    pub device_name: String,
    pub layout_hash: String,
    pub monitor: Monitor,
    pub include_related: bool,
    pub tool_filters: Vec<String>,
    /// Desktop geometry at save time, for diagnostics.
    pub layout_origin: (i32, i32),
    pub layout_size: (i32, i32),
    pub ctm: [f64; 9],
}

impl Profile {
    pub fn from_layout(
        name: &str,
        device_id: i32,
        device_name: &str,
        layout: &DesktopLayout,
        monitor: Monitor,
        ctm: [f64; 9],
    ) -> Self {
        Self {
            name: name.to_string(),
            device_id,
            device_name: device_name.to_string(),
            layout_hash: layout.hash.clone(),
            monitor,
            include_related: true,
            tool_filters: Vec::new(),
            layout_origin: (layout.origin_x, layout.origin_y),
            layout_size: (layout.width, layout.height),
            ctm,
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut data = IniData::default();
        data.set("Profile", "device_id", self.device_id.to_string());
        data.set("Profile", "device_name", self.device_name.as_str());
        data.set("Profile", "layout_hash", self.layout_hash.as_str());
        data.set("Profile", "monitor_name", self.monitor.name.as_str());
        data.set("Profile", "monitor_index", self.monitor.index.to_string());
        data.set("Profile", "monitor_x", self.monitor.x.to_string());
        data.set("Profile", "monitor_y", self.monitor.y.to_string());
        data.set("Profile", "monitor_width", self.monitor.width.to_string());
        data.set("Profile", "monitor_height", self.monitor.height.to_string());
        data.set("Profile", "monitor_rotation", self.monitor.rotation.as_str());
        data.set("Profile", "monitor_scale_x", format!("{}", self.monitor.scale_x));
        data.set("Profile", "monitor_scale_y", format!("{}", self.monitor.scale_y));
        data.set(
            "Profile",
            "include_related",
            if self.include_related { "1" } else { "0" },
        );
        if !self.tool_filters.is_empty() {
            data.set("Profile", "tool_filters", self.tool_filters.join(","));
        }
        data.set("Layout", "origin_x", self.layout_origin.0.to_string());
        data.set("Layout", "origin_y", self.layout_origin.1.to_string());
        data.set("Layout", "width", self.layout_size.0.to_string());
        data.set("Layout", "height", self.layout_size.1.to_string());
        for (i, v) in self.ctm.iter().enumerate() {
            data.set("CTM", &format!("m{i}"), format!("{v:.6}"));
        }
        data.save(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = IniData::load(path)?;
        let mut profile = Profile {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            device_id: data.get_i32("Profile", "device_id", -1),
            device_name: data.get_str("Profile", "device_name", ""),
            layout_hash: data.get_str("Profile", "layout_hash", ""),
            include_related: data.get_bool("Profile", "include_related", true),
            tool_filters: data
                .get_str("Profile", "tool_filters", "")
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            layout_origin: (
                data.get_i32("Layout", "origin_x", 0),
                data.get_i32("Layout", "origin_y", 0),
            ),
            layout_size: (
                data.get_i32("Layout", "width", 0),
                data.get_i32("Layout", "height", 0),
            ),
            ctm: identity_ctm(),
            monitor: Monitor {
                index: data.get_i32("Profile", "monitor_index", -1),
                name: data.get_str("Profile", "monitor_name", ""),
                x: data.get_i32("Profile", "monitor_x", 0),
                y: data.get_i32("Profile", "monitor_y", 0),
                width: data.get_i32("Profile", "monitor_width", 0),
                height: data.get_i32("Profile", "monitor_height", 0),
                scale_x: data.get_f64("Profile", "monitor_scale_x", 1.0),
                scale_y: data.get_f64("Profile", "monitor_scale_y", 1.0),
                rotation: data
                    .get_str("Profile", "monitor_rotation", "normal")
                    .parse::<Rotation>()
                    .unwrap_or_default(),
                ..Monitor::default()
            },
        };
        let identity = identity_ctm();
        for (i, slot) in profile.ctm.iter_mut().enumerate() {
            *slot = data.get_f64("CTM", &format!("m{i}"), identity[i]);
        }
        Ok(profile)
    }

    /// Whether the saved layout still matches the live one.
    pub fn matches_layout(&self, layout: &DesktopLayout) -> bool {
        self.layout_hash.is_empty() || self.layout_hash == layout.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::{finalize_layout, parse_listmonitors};

    fn layout() -> DesktopLayout {
        finalize_layout(parse_listmonitors(
            "Monitors: 2\n 0: +*eDP-1 1920/1x1080/1+0+0  eDP-1\n 1: +HDMI-1 2560/1x1440/1+1920+0  HDMI-1\n",
        ))
    }

    #[test]
    fn profile_round_trip_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desk.ini");
        let layout = layout();
        let mut profile = Profile::from_layout(
            "desk",
            12,
            "Wacom Intuos Pro M Pen stylus",
            &layout,
            layout.monitors[1].clone(),
            crate::monitors::compute_ctm(&layout, &layout.monitors[1]),
        );
        profile.tool_filters = vec!["stylus".into(), "eraser".into()];
        profile.include_related = false;
        profile.save_to(&path).unwrap();

        let loaded = Profile::load_from(&path).unwrap();
        assert_eq!(loaded.name, "desk");
        assert_eq!(loaded.device_id, 12);
        assert_eq!(loaded.device_name, "Wacom Intuos Pro M Pen stylus");
        assert_eq!(loaded.layout_hash, layout.hash);
        assert_eq!(loaded.monitor.name, "HDMI-1");
        assert_eq!(loaded.monitor.width, 2560);
        assert_eq!(loaded.monitor.rotation, Rotation::Normal);
        assert!(!loaded.include_related);
        assert_eq!(loaded.tool_filters, vec!["stylus", "eraser"]);
        assert_eq!(loaded.layout_size, (1920 + 2560, 1440));
        for (a, b) in loaded.ctm.iter().zip(profile.ctm.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn layout_hash_gates_profile_reuse() {
        let layout = layout();
        let mut profile = Profile::from_layout(
            "p",
            1,
            "dev",
            &layout,
            layout.monitors[0].clone(),
            identity_ctm(),
        );
        assert!(profile.matches_layout(&layout));

        let other = finalize_layout(parse_listmonitors(
            "Monitors: 1\n 0: +*eDP-1 1920/1x1080/1+0+0  eDP-1\n",
        ));
        assert!(!profile.matches_layout(&other));

        // profiles saved before hashing existed always apply
        profile.layout_hash.clear();
        assert!(profile.matches_layout(&other));
    }

    #[test]
    fn missing_ctm_keys_default_to_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.ini");
        std::fs::write(&path, "[Profile]\ndevice_id=3\n").unwrap();
        let profile = Profile::load_from(&path).unwrap();
        assert_eq!(profile.ctm, identity_ctm());
        assert_eq!(profile.device_id, 3);
        assert!(profile.include_related);
    }
}

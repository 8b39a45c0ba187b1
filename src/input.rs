//! Input device discovery & capability probe (evdev 0.13.2 compatible)

use evdev::{AbsoluteAxisCode, Device, EventType, KeyCode, RelativeAxisCode};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Device protocol selected once at start; the reader loop dispatches on
/// this tag once per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Multitouch protocol B (slots + tracking ids).
    Multitouch,
    /// Plain absolute X/Y, optionally with a contact key.
    SingleTouchAbs,
    /// Relative motion and/or contact keys.
    Relative,
    /// Raw 3-byte mouse packet stream, classified by path heuristic.
    Ps2Mouse,
}

#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub class: DeviceClass,
    /// Whether the device exposes a dedicated touch-contact key. When absent
    /// the reader treats the pen-tool or primary-button key as contact.
    pub has_btn_touch: bool,
}

pub fn is_mouse_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.contains("mouse"))
        .unwrap_or(false)
}

/// Classify an opened event device, or `None` when it exposes nothing a
/// touch pipeline can consume.
pub fn probe(dev: &Device) -> Option<Capabilities> {
    let has_abs = dev.supported_events().contains(EventType::ABSOLUTE);
    let axes = dev.supported_absolute_axes();
    let has_mt = axes.as_ref().map_or(false, |a| {
        a.contains(AbsoluteAxisCode::ABS_MT_SLOT)
            && a.contains(AbsoluteAxisCode::ABS_MT_TRACKING_ID)
            && a.contains(AbsoluteAxisCode::ABS_MT_POSITION_X)
            && a.contains(AbsoluteAxisCode::ABS_MT_POSITION_Y)
    });
    let has_xy = axes.as_ref().map_or(false, |a| {
        a.contains(AbsoluteAxisCode::ABS_X) && a.contains(AbsoluteAxisCode::ABS_Y)
    });

    let keys = dev.supported_keys();
    let has_btn_touch = keys.as_ref().map_or(false, |k| k.contains(KeyCode::BTN_TOUCH));
    let has_contact_key = keys.as_ref().map_or(false, |k| {
        k.contains(KeyCode::BTN_TOUCH)
            || k.contains(KeyCode::BTN_TOOL_PEN)
            || k.contains(KeyCode::BTN_LEFT)
    });

    let rel = dev.supported_relative_axes();
    let has_rel = rel.as_ref().map_or(false, |r| {
        r.contains(RelativeAxisCode::REL_X) || r.contains(RelativeAxisCode::REL_Y)
    });

    let class = if has_abs && has_mt {
        DeviceClass::Multitouch
    } else if has_abs && has_xy {
        DeviceClass::SingleTouchAbs
    } else if has_rel || has_contact_key {
        DeviceClass::Relative
    } else {
        return None;
    };

    Some(Capabilities {
        class,
        has_btn_touch,
    })
}

/// Enumerate `/dev/input` nodes in auto-detection order: mouse-named first,
/// event-named second, everything else last.
pub fn discover() -> Vec<PathBuf> {
    let mut mice = Vec::new();
    let mut events = Vec::new();
    let mut rest = Vec::new();
    if let Ok(rd) = fs::read_dir("/dev/input") {
        for entry in rd.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue; // by-id / by-path
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.contains("mouse") {
                mice.push(path);
            } else if name.starts_with("event") {
                events.push(path);
            } else {
                rest.push(path);
            }
        }
    }
    mice.sort();
    events.sort();
    rest.sort();
    mice.into_iter().chain(events).chain(rest).collect()
}

/// Multitouch-capable event devices, with names, for listings.
pub fn discover_multitouch() -> Vec<(PathBuf, String)> {
    let mut out = Vec::new();
    for path in discover() {
        if is_mouse_path(&path) {
            continue;
        }
        if let Ok(dev) = Device::open(&path) {
            if matches!(
                probe(&dev),
                Some(Capabilities {
                    class: DeviceClass::Multitouch,
                    ..
                })
            ) {
                out.push((path, dev.name().unwrap_or("unknown").to_string()));
            }
        }
    }
    out
}

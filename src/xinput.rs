//! X11 input-stack integration: device resolution, related-tool discovery,
//! and CTM application through the xinput CLI.

use anyhow::{Result, anyhow};
use evdev::AbsoluteAxisCode;
use log::{debug, warn};
use std::{collections::HashMap, fs, path::Path, process::Command};

/// Name suffixes shared by the tools of one physical tablet, longest first.
const TOOL_SUFFIXES: [&str; 10] = [
    " pen stylus",
    " pen eraser",
    " pen cursor",
    " pen pen",
    " pen pad",
    " stylus",
    " eraser",
    " cursor",
    " pad",
    " touch",
];

#[derive(Debug, Clone)]
pub struct XDevice {
    pub id: i32,
    pub name: String,
    pub path: String,
    pub is_absolute: bool,
    pub max_x: i32,
    pub max_y: i32,
}

fn run_capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn device_name(id: i32) -> Option<String> {
    let out = run_capture("xinput", &["list", "--name-only", &id.to_string()])?;
    let name = out.lines().next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub fn list_device_ids() -> Vec<i32> {
    run_capture("xinput", &["list", "--id-only"])
        .map(|out| out.lines().filter_map(|l| l.trim().parse().ok()).collect())
        .unwrap_or_default()
}

/// Map an xinput device id to its event-node path. Tries the "Device Node"
/// property, then symlink targets under /dev/input/by-id and by-path whose
/// target matches the reported name. Empty string when nothing matches.
pub fn device_path(id: i32) -> String {
    if let Some(props) = run_capture("xinput", &["list-props", &id.to_string()]) {
        if let Some(node) = parse_device_node(&props) {
            return node;
        }
    }

    if let Some(name) = device_name(id) {
        let needle = name.to_ascii_lowercase().replace(' ', "_");
        for dir in ["/dev/input/by-id", "/dev/input/by-path"] {
            if let Some(path) = search_symlinks(Path::new(dir), &needle) {
                return path;
            }
        }
    }
    String::new()
}

pub(crate) fn parse_device_node(props: &str) -> Option<String> {
    let line = props.lines().find(|l| l.contains("Device Node"))?;
    let start = line.find('"')? + 1;
    let end = line.rfind('"')?;
    if end <= start {
        return None;
    }
    Some(line[start..end].to_string())
}

fn search_symlinks(dir: &Path, needle: &str) -> Option<String> {
    for entry in fs::read_dir(dir).ok()?.flatten() {
        let entry_name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        let target = fs::read_link(entry.path())
            .map(|t| t.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if !entry_name.contains(needle) && !target.contains(needle) {
            continue;
        }
        let resolved = fs::canonicalize(entry.path()).ok()?;
        return Some(resolved.display().to_string());
    }
    None
}

/// Raw coordinate maxima for a device: ABS_X/ABS_Y absolute-axis info from
/// the event node, with the Wacom tablet-area property as fallback.
pub fn device_ranges(id: i32, path: &str) -> (i32, i32) {
    if !path.is_empty() {
        if let Ok(dev) = evdev::Device::open(path) {
            if let Ok(absinfo) = dev.get_absinfo() {
                let mut max_x = 0;
                let mut max_y = 0;
                for (axis, info) in absinfo {
                    if axis == AbsoluteAxisCode::ABS_X {
                        max_x = info.maximum();
                    } else if axis == AbsoluteAxisCode::ABS_Y {
                        max_y = info.maximum();
                    }
                }
                if max_x > 0 && max_y > 0 {
                    return (max_x, max_y);
                }
            }
        }
    }
    if let Some(props) = run_capture("xinput", &["list-props", &id.to_string()]) {
        if let Some(area) = parse_wacom_area(&props) {
            return area;
        }
    }
    debug!("no absolute range found for device {id}, assuming 4096x4096");
    (4096, 4096)
}

/// `Wacom Tablet Area (285):  0, 0, 21600, 13500` -> (21600, 13500)
pub(crate) fn parse_wacom_area(props: &str) -> Option<(i32, i32)> {
    let line = props.lines().find(|l| l.contains("Wacom Tablet Area"))?;
    let values = line.rsplit(':').next()?;
    let fields: Vec<i32> = values
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect();
    if fields.len() == 4 {
        Some((fields[2], fields[3]))
    } else {
        None
    }
}

pub fn enumerate_devices() -> Vec<XDevice> {
    list_device_ids()
        .into_iter()
        .filter_map(|id| {
            let name = device_name(id)?;
            let path = device_path(id);
            let is_absolute = !path.is_empty()
                && evdev::Device::open(&path)
                    .map(|d| d.supported_absolute_axes().is_some())
                    .unwrap_or(false);
            let (max_x, max_y) = if is_absolute {
                device_ranges(id, &path)
            } else {
                (0, 0)
            };
            Some(XDevice {
                id,
                name,
                path,
                is_absolute,
                max_x,
                max_y,
            })
        })
        .collect()
}

/// Strip the tool suffix from a device name to obtain the family shared by
/// the stylus, eraser, pad, … of one physical tablet.
pub fn family_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    for suffix in TOOL_SUFFIXES {
        if let Some(stripped) = lowered.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    lowered
}

/// The base id followed by every enumerated device sharing its family name.
pub fn related_device_ids(base_id: i32, exclude_pads: bool) -> Vec<i32> {
    let Some(base_name) = device_name(base_id) else {
        return vec![base_id];
    };
    related_ids_in(base_id, &base_name, &enumerate_named_devices(), exclude_pads)
}

fn enumerate_named_devices() -> Vec<(i32, String)> {
    list_device_ids()
        .into_iter()
        .filter_map(|id| device_name(id).map(|name| (id, name)))
        .collect()
}

pub(crate) fn related_ids_in(
    base_id: i32,
    base_name: &str,
    devices: &[(i32, String)],
    exclude_pads: bool,
) -> Vec<i32> {
    let family = family_name(base_name);
    let mut ids = vec![base_id];
    for (id, name) in devices {
        if *id == base_id {
            continue;
        }
        if family_name(name) != family {
            continue;
        }
        if exclude_pads && name.to_ascii_lowercase().contains("pad") {
            continue;
        }
        ids.push(*id);
    }
    ids
}

/// Keep only ids whose name contains one of the filters; an empty filter set
/// or an empty result keeps everything.
pub fn filter_by_tool(
    ids: &[i32],
    names: &HashMap<i32, String>,
    filters: &[String],
) -> Vec<i32> {
    if filters.is_empty() {
        return ids.to_vec();
    }
    let filtered: Vec<i32> = ids
        .iter()
        .copied()
        .filter(|id| {
            names.get(id).is_some_and(|name| {
                let lowered = name.to_ascii_lowercase();
                filters.iter().any(|f| lowered.contains(f.as_str()))
            })
        })
        .collect();
    if filtered.is_empty() {
        ids.to_vec()
    } else {
        filtered
    }
}

/// Push a coordinate transformation matrix to the X input stack. This is the
/// only persistent side effect of monitor mapping.
pub fn apply_ctm(id: i32, matrix: &[f64; 9]) -> Result<()> {
    let mut args: Vec<String> = vec![
        "set-prop".into(),
        id.to_string(),
        "Coordinate Transformation Matrix".into(),
    ];
    args.extend(matrix.iter().map(|v| format!("{v:.6}")));
    let status = Command::new("xinput")
        .args(&args)
        .status()
        .map_err(|e| anyhow!("failed to invoke xinput set-prop: {e}"))?;
    if !status.success() {
        return Err(anyhow!("xinput set-prop failed for device {id}"));
    }
    Ok(())
}

pub fn apply_ctm_all(ids: &[i32], matrix: &[f64; 9]) -> Result<()> {
    let mut ok = true;
    for &id in ids {
        if let Err(e) = apply_ctm(id, matrix) {
            warn!("{e:#}");
            ok = false;
        }
    }
    if ok {
        Ok(())
    } else {
        Err(anyhow!("some devices rejected the transformation matrix"))
    }
}

pub fn read_ctm(id: i32) -> Option<[f64; 9]> {
    let props = run_capture("xinput", &["list-props", &id.to_string()])?;
    parse_ctm(&props)
}

pub(crate) fn parse_ctm(props: &str) -> Option<[f64; 9]> {
    let line = props
        .lines()
        .find(|l| l.contains("Coordinate Transformation Matrix"))?;
    let values = line.rsplit(':').next()?;
    let mut matrix = [0.0f64; 9];
    let mut count = 0;
    for field in values.split(',') {
        if count == 9 {
            break;
        }
        matrix[count] = field.trim().parse().ok()?;
        count += 1;
    }
    if count == 9 {
        Some(matrix)
    } else {
        None
    }
}

//! Desktop layout snapshots and per-monitor coordinate transforms.
//!
//! Built from the window system's monitor listing at configuration time,
//! never on the input hot path.

use anyhow::{Result, anyhow};
use std::fmt::Write as _;
use std::process::Command;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Normal,
    Inverted,
    Left,
    Right,
}

impl Rotation {
    pub fn as_str(self) -> &'static str {
        match self {
            Rotation::Normal => "normal",
            Rotation::Inverted => "inverted",
            Rotation::Left => "left",
            Rotation::Right => "right",
        }
    }
}

impl FromStr for Rotation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "" => Ok(Rotation::Normal),
            "inverted" => Ok(Rotation::Inverted),
            "left" => Ok(Rotation::Left),
            "right" => Ok(Rotation::Right),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub index: i32,
    pub name: String,
    pub primary: bool,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: Rotation,
    pub edid_hash: String,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            index: -1,
            name: String::new(),
            primary: false,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: Rotation::Normal,
            edid_hash: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesktopLayout {
    pub monitors: Vec<Monitor>,
    pub origin_x: i32,
    pub origin_y: i32,
    pub width: i32,
    pub height: i32,
    /// Content hash used for "layout unchanged since profile was saved".
    pub hash: String,
}

/// Snapshot the current monitor arrangement via the xrandr CLI.
pub fn detect_layout() -> Result<DesktopLayout> {
    let listing = run_xrandr(&["--listmonitors"])?;
    let mut monitors = parse_listmonitors(&listing);
    if monitors.is_empty() {
        return Err(anyhow!("no active monitors detected"));
    }
    if let Ok(verbose) = run_xrandr(&["--verbose"]) {
        apply_verbose_details(&mut monitors, &verbose);
    }
    Ok(finalize_layout(monitors))
}

fn run_xrandr(args: &[&str]) -> Result<String> {
    let output = Command::new("xrandr")
        .args(args)
        .output()
        .map_err(|e| anyhow!("failed to invoke xrandr {}: {e}", args.join(" ")))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `xrandr --listmonitors` lines of the form
/// ` 0: +*eDP-1 1920/344x1080/194+0+0  eDP-1`.
pub(crate) fn parse_listmonitors(listing: &str) -> Vec<Monitor> {
    let mut monitors = Vec::new();
    for line in listing.lines().skip(1) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            continue;
        }
        let mut monitor = Monitor {
            index: tokens[0]
                .trim_end_matches(':')
                .parse()
                .unwrap_or(monitors.len() as i32),
            primary: tokens[1].contains('*'),
            name: tokens.last().unwrap().to_string(),
            ..Monitor::default()
        };
        let Some(geometry) = tokens
            .iter()
            .find(|t| t.contains('x') && t.contains('+'))
            .and_then(|t| parse_geometry(t))
        else {
            continue;
        };
        (monitor.width, monitor.height, monitor.x, monitor.y) = geometry;
        monitors.push(monitor);
    }
    monitors
}

/// `WIDTH[/mm]xHEIGHT[/mm]+X+Y`, offsets possibly negative.
fn parse_geometry(token: &str) -> Option<(i32, i32, i32, i32)> {
    let (w_part, rest) = token.split_at(token.find('x')?);
    let rest = &rest[1..];
    let width: i32 = w_part.split('/').next()?.parse().ok()?;
    let sign = rest.find(['+', '-'])?;
    let (h_part, offsets) = rest.split_at(sign);
    let height: i32 = h_part.split('/').next()?.parse().ok()?;
    let offsets = split_signed(offsets);
    if offsets.len() < 2 {
        return None;
    }
    Some((width, height, offsets[0], offsets[1]))
}

fn split_signed(s: &str) -> Vec<i32> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for c in s.chars() {
        match c {
            '+' | '-' => {
                if let Ok(v) = cur.parse() {
                    out.push(v);
                }
                cur.clear();
                if c == '-' {
                    cur.push('-');
                }
            }
            d if d.is_ascii_digit() => cur.push(d),
            _ => {}
        }
    }
    if let Ok(v) = cur.parse() {
        out.push(v);
    }
    out
}

/// Fold rotation, scale and EDID identity from `xrandr --verbose` into the
/// monitor list.
pub(crate) fn apply_verbose_details(monitors: &mut [Monitor], verbose: &str) {
    let mut lines = verbose.lines().peekable();
    let mut current: Option<usize> = None;
    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            // output header line: "<name> connected ... <rotation> (normal left ...) ..."
            current = monitors
                .iter()
                .position(|m| line == m.name || line.starts_with(&format!("{} ", m.name)));
            if let Some(idx) = current {
                if let Some(rotation) = header_rotation(line) {
                    monitors[idx].rotation = rotation;
                }
            }
            continue;
        }
        let Some(idx) = current else { continue };
        let trimmed = line.trim();
        if let Some(scales) = trimmed.strip_prefix("Scale:") {
            if let Some((sx, sy)) = scales.trim().split_once('x') {
                if let (Ok(sx), Ok(sy)) = (sx.trim().parse(), sy.trim().parse()) {
                    if sx > 0.0 {
                        monitors[idx].scale_x = sx;
                    }
                    if sy > 0.0 {
                        monitors[idx].scale_y = sy;
                    }
                }
            }
        } else if trimmed == "EDID:" {
            let mut edid = String::new();
            while let Some(next) = lines.peek() {
                let candidate = next.trim();
                if next.starts_with(char::is_whitespace)
                    && !candidate.is_empty()
                    && candidate.chars().all(|c| c.is_ascii_hexdigit())
                {
                    edid.push_str(candidate);
                    lines.next();
                } else {
                    break;
                }
            }
            if !edid.is_empty() {
                monitors[idx].edid_hash = format!("{:x}", fnv1a64(edid.as_bytes()));
            }
        }
    }
}

/// The rotation keyword on a header line sits outside any parenthesised
/// group (the group lists every supported rotation).
fn header_rotation(line: &str) -> Option<Rotation> {
    let mut depth = 0i32;
    for token in line.split_whitespace() {
        let opens = token.matches('(').count() as i32;
        let closes = token.matches(')').count() as i32;
        if depth == 0 && !token.starts_with('(') {
            if let Ok(rotation) = token.parse() {
                return Some(rotation);
            }
        }
        depth += opens - closes;
    }
    None
}

pub(crate) fn finalize_layout(monitors: Vec<Monitor>) -> DesktopLayout {
    let mut min_x = i32::MAX;
    let mut min_y = i32::MAX;
    let mut max_x = i32::MIN;
    let mut max_y = i32::MIN;
    for m in &monitors {
        min_x = min_x.min(m.x);
        min_y = min_y.min(m.y);
        max_x = max_x.max(m.x + m.width);
        max_y = max_y.max(m.y + m.height);
    }
    let mut layout = DesktopLayout {
        monitors,
        origin_x: min_x,
        origin_y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
        hash: String::new(),
    };
    layout.hash = layout_hash(&layout);
    layout
}

/// FNV-1a 64 over a canonical text encoding of the layout, in enumeration
/// order.
pub fn layout_hash(layout: &DesktopLayout) -> String {
    let mut canon = format!(
        "{},{},{},{};",
        layout.origin_x, layout.origin_y, layout.width, layout.height
    );
    for m in &layout.monitors {
        let _ = write!(
            canon,
            "{}|{}|{}|{}|{}|{}|{}|{}|{};",
            m.name,
            m.x,
            m.y,
            m.width,
            m.height,
            m.rotation.as_str(),
            m.scale_x,
            m.scale_y,
            m.edid_hash
        );
    }
    format!("{:x}", fnv1a64(canon.as_bytes()))
}

pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub fn find_by_index<'a>(layout: &'a DesktopLayout, index: i32) -> Option<&'a Monitor> {
    layout
        .monitors
        .iter()
        .find(|m| m.index == index)
        .or_else(|| {
            usize::try_from(index)
                .ok()
                .and_then(|i| layout.monitors.get(i))
        })
}

pub fn find_by_name<'a>(layout: &'a DesktopLayout, name: &str) -> Option<&'a Monitor> {
    layout
        .monitors
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
}

/// Identity: map the device onto the full desktop.
pub fn identity_ctm() -> [f64; 9] {
    [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
}

/// 3x3 row-major matrix mapping the unit square onto the monitor rectangle
/// with its rotation applied, in desktop-normalised coordinates.
pub fn compute_ctm(layout: &DesktopLayout, monitor: &Monitor) -> [f64; 9] {
    let dw = f64::from(layout.width).max(1.0);
    let dh = f64::from(layout.height).max(1.0);

    let mut ox = f64::from(monitor.x - layout.origin_x);
    let mut oy = f64::from(monitor.y - layout.origin_y);
    let mut w = f64::from(monitor.width);
    let mut h = f64::from(monitor.height);
    if monitor.scale_x > 0.0 {
        w *= monitor.scale_x;
        ox *= monitor.scale_x;
    }
    if monitor.scale_y > 0.0 {
        h *= monitor.scale_y;
        oy *= monitor.scale_y;
    }

    let (m0, m1, m2, m3, m4, m5) = match monitor.rotation {
        Rotation::Normal => (w, 0.0, ox, 0.0, h, oy),
        Rotation::Inverted => (-w, 0.0, ox + w, 0.0, -h, oy + h),
        Rotation::Left => (0.0, h, ox, -w, 0.0, oy + w),
        Rotation::Right => (0.0, -h, ox + h, w, 0.0, oy),
    };

    [
        m0 / dw,
        m1 / dw,
        m2 / dw,
        m3 / dh,
        m4 / dh,
        m5 / dh,
        0.0,
        0.0,
        1.0,
    ]
}

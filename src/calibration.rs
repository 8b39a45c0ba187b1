//! Raw-to-screen coordinate transform and calibration fitting.

use anyhow::{Context, Result, anyhow};
use log::warn;
use std::path::Path;

use crate::ini::IniData;

/// Fallback raw range when captured calibration data is unusable.
pub const FALLBACK_RAW_MAX: f64 = 4095.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationMode {
    MinMax,
    Affine,
}

impl CalibrationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationMode::MinMax => "minmax",
            CalibrationMode::Affine => "affine",
        }
    }
}

/// Mapping from raw device coordinates to a screen region.
///
/// `screen_width`/`screen_height` describe the target region, the offsets its
/// placement inside the full desktop. `margin_percent` is applied while
/// fitting, not per event.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub mode: CalibrationMode,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub affine: [f64; 6],
    pub screen_width: i32,
    pub screen_height: i32,
    pub x_offset: i32,
    pub y_offset: i32,
    pub margin_percent: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::MinMax,
            min_x: 0.0,
            max_x: 40640.0,
            min_y: 0.0,
            max_y: 30480.0,
            affine: IDENTITY_AFFINE,
            screen_width: 800,
            screen_height: 480,
            x_offset: 0,
            y_offset: 0,
            margin_percent: 0.0,
        }
    }
}

const IDENTITY_AFFINE: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

impl Calibration {
    pub fn set_minmax(
        &mut self,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        screen_width: i32,
        screen_height: i32,
    ) {
        self.mode = CalibrationMode::MinMax;
        self.min_x = min_x;
        self.max_x = max_x;
        self.min_y = min_y;
        self.max_y = max_y;
        self.screen_width = screen_width;
        self.screen_height = screen_height;
        self.affine = IDENTITY_AFFINE;
        self.margin_percent = 0.0;
    }

    pub fn set_affine(&mut self, matrix: [f64; 6], screen_width: i32, screen_height: i32) {
        self.mode = CalibrationMode::Affine;
        self.affine = matrix;
        self.screen_width = screen_width;
        self.screen_height = screen_height;
    }

    pub fn set_margin(&mut self, margin_percent: f64) {
        self.margin_percent = margin_percent;
    }

    pub fn set_offset(&mut self, x_offset: i32, y_offset: i32) {
        self.x_offset = x_offset;
        self.y_offset = y_offset;
    }

    /// Map a raw device coordinate pair onto the configured screen region.
    pub fn map(&self, raw_x: i32, raw_y: i32) -> (i32, i32) {
        let rx = f64::from(raw_x);
        let ry = f64::from(raw_y);

        let (sx, sy) = match self.mode {
            CalibrationMode::Affine => (
                self.affine[0] * rx + self.affine[1] * ry + self.affine[2],
                self.affine[3] * rx + self.affine[4] * ry + self.affine[5],
            ),
            CalibrationMode::MinMax => {
                let mut range_x = self.max_x - self.min_x;
                let mut range_y = self.max_y - self.min_y;
                // collapsed ranges pin the axis to the offset
                if range_x <= 0.0 {
                    range_x = 1.0;
                }
                if range_y <= 0.0 {
                    range_y = 1.0;
                }
                let u = ((rx.clamp(self.min_x, self.max_x) - self.min_x) / range_x).clamp(0.0, 1.0);
                let v = ((ry.clamp(self.min_y, self.max_y) - self.min_y) / range_y).clamp(0.0, 1.0);
                (
                    u * f64::from((self.screen_width - 1).max(0)),
                    v * f64::from((self.screen_height - 1).max(0)),
                )
            }
        };

        let min_sx = f64::from(self.x_offset);
        let max_sx = min_sx + f64::from((self.screen_width - 1).max(0));
        let min_sy = f64::from(self.y_offset);
        let max_sy = min_sy + f64::from((self.screen_height - 1).max(0));

        let x = (sx + f64::from(self.x_offset)).clamp(min_sx, max_sx);
        let y = (sy + f64::from(self.y_offset)).clamp(min_sy, max_sy);
        (x.round() as i32, y.round() as i32)
    }

    /// Load calibration values from `path`, keeping the current value for any
    /// absent key. Accepts the legacy single-line numeric format read-only.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let data = IniData::parse(&text);
        if data.has_section("Calibration") {
            self.apply_ini(&data);
            return Ok(());
        }

        // legacy: eight whitespace-separated integers
        let fields: Vec<i32> = text.split_whitespace().filter_map(|t| t.parse().ok()).collect();
        if fields.len() == 8 {
            self.set_minmax(
                f64::from(fields[0]),
                f64::from(fields[1]),
                f64::from(fields[2]),
                f64::from(fields[3]),
                fields[4],
                fields[5],
            );
            self.set_offset(fields[6], fields[7]);
            return Ok(());
        }
        Err(anyhow!("unrecognised calibration file {}", path.display()))
    }

    fn apply_ini(&mut self, data: &IniData) {
        let mode = data.get_str("Calibration", "mode", "minmax").to_ascii_lowercase();
        let screen_width = data.get_i32("Calibration", "screen_width", self.screen_width);
        let screen_height = data.get_i32("Calibration", "screen_height", self.screen_height);
        let offset_x = data.get_i32("Calibration", "offset_x", 0);
        let offset_y = data.get_i32("Calibration", "offset_y", 0);
        let margin = data.get_f64("Calibration", "margin_percent", 0.0);

        if mode == "affine" {
            let matrix = [
                data.get_f64("Affine", "m0", self.affine[0]),
                data.get_f64("Affine", "m1", self.affine[1]),
                data.get_f64("Affine", "m2", self.affine[2]),
                data.get_f64("Affine", "m3", self.affine[3]),
                data.get_f64("Affine", "m4", self.affine[4]),
                data.get_f64("Affine", "m5", self.affine[5]),
            ];
            self.set_affine(matrix, screen_width, screen_height);
        } else {
            let min_x = data.get_f64("Calibration", "min_x", self.min_x);
            let max_x = data.get_f64("Calibration", "max_x", self.max_x);
            let min_y = data.get_f64("Calibration", "min_y", self.min_y);
            let max_y = data.get_f64("Calibration", "max_y", self.max_y);
            self.set_minmax(min_x, max_x, min_y, max_y, screen_width, screen_height);
        }
        self.set_offset(offset_x, offset_y);
        self.margin_percent = margin;
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut data = IniData::default();
        data.set("Calibration", "mode", self.mode.as_str());
        data.set("Calibration", "min_x", format!("{:.6}", self.min_x));
        data.set("Calibration", "max_x", format!("{:.6}", self.max_x));
        data.set("Calibration", "min_y", format!("{:.6}", self.min_y));
        data.set("Calibration", "max_y", format!("{:.6}", self.max_y));
        data.set("Calibration", "screen_width", self.screen_width.to_string());
        data.set("Calibration", "screen_height", self.screen_height.to_string());
        data.set("Calibration", "offset_x", self.x_offset.to_string());
        data.set("Calibration", "offset_y", self.y_offset.to_string());
        data.set("Calibration", "margin_percent", format!("{:.6}", self.margin_percent));
        if self.mode == CalibrationMode::Affine {
            for (i, m) in self.affine.iter().enumerate() {
                data.set("Affine", &format!("m{i}"), format!("{m:.6}"));
            }
        }
        data.set("Metadata", "saved_with", "touchmap");
        data.save(path)
    }
}

/// Axis-aligned fit from four captured corner points ordered top-left,
/// top-right, bottom-right, bottom-left. Each edge bound is the average of
/// the two raw samples on that edge, optionally shrunk by `margin_percent`
/// per side.
pub fn fit_minmax(raw: &[(f64, f64); 4], margin_percent: f64) -> (f64, f64, f64, f64) {
    let mut min_x = (raw[0].0 + raw[3].0) / 2.0;
    let mut max_x = (raw[1].0 + raw[2].0) / 2.0;
    let mut min_y = (raw[0].1 + raw[1].1) / 2.0;
    let mut max_y = (raw[2].1 + raw[3].1) / 2.0;

    if max_x - min_x <= 0.0 {
        warn!("degenerate x range in calibration capture, using fallback range");
        min_x = 0.0;
        max_x = FALLBACK_RAW_MAX;
    }
    if max_y - min_y <= 0.0 {
        warn!("degenerate y range in calibration capture, using fallback range");
        min_y = 0.0;
        max_y = FALLBACK_RAW_MAX;
    }

    if margin_percent > 0.0 {
        let shrink_x = (max_x - min_x) * margin_percent / 100.0;
        let shrink_y = (max_y - min_y) * margin_percent / 100.0;
        min_x += shrink_x;
        max_x -= shrink_x;
        min_y += shrink_y;
        max_y -= shrink_y;
    }
    (min_x, max_x, min_y, max_y)
}

/// Weighted least-squares affine fit from four raw/target point pairs.
///
/// Builds the shared 3x3 normal-equation matrix and solves it once per output
/// axis. Returns `None` when the system is singular (pivot below 1e-9).
pub fn fit_affine(
    raw: &[(f64, f64); 4],
    target: &[(f64, f64); 4],
) -> Option<[f64; 6]> {
    let mut normal = [[0.0f64; 3]; 3];
    let mut bx = [0.0f64; 3];
    let mut by = [0.0f64; 3];

    for (&(rx, ry), &(tx, ty)) in raw.iter().zip(target.iter()) {
        let v = [rx, ry, 1.0];
        for r in 0..3 {
            for c in 0..3 {
                normal[r][c] += v[r] * v[c];
            }
            bx[r] += v[r] * tx;
            by[r] += v[r] * ty;
        }
    }

    let ax = gaussian_solve3(normal, bx)?;
    let ay = gaussian_solve3(normal, by)?;
    Some([ax[0], ax[1], ax[2], ay[0], ay[1], ay[2]])
}

fn gaussian_solve3(mut m: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for i in 0..3 {
        let mut pivot_row = i;
        for r in i + 1..3 {
            if m[r][i].abs() > m[pivot_row][i].abs() {
                pivot_row = r;
            }
        }
        if m[pivot_row][i].abs() < 1e-9 {
            return None;
        }
        if pivot_row != i {
            m.swap(i, pivot_row);
            b.swap(i, pivot_row);
        }
        let diag = m[i][i];
        for c in i..3 {
            m[i][c] /= diag;
        }
        b[i] /= diag;
        for r in 0..3 {
            if r == i {
                continue;
            }
            let factor = m[r][i];
            for c in i..3 {
                m[r][c] -= factor * m[i][c];
            }
            b[r] -= factor * b[i];
        }
    }
    Some(b)
}

//! Linux user-space touch/tablet input processing.
//!
//! Reads raw absolute- and relative-axis events from an input device, tracks
//! multi-touch slot state, applies a calibration transform, recognises
//! gestures, and can re-publish the calibrated events through a synthetic
//! device. A companion surface discovers monitors and computes per-monitor
//! coordinate-transformation matrices for the X11 input stack.

pub mod calibration;
pub mod cli;
pub mod config;
pub mod events;
pub mod gestures;
pub mod ini;
pub mod input;
pub mod logging;
pub mod mitm;
pub mod monitors;
pub mod profile;
pub mod reader;
pub mod tracker;
pub mod xinput;

pub use calibration::{Calibration, CalibrationMode};
pub use events::{EventKind, TouchEvent};
pub use reader::TouchReader;
pub use tracker::{TouchRecord, MAX_SLOTS};

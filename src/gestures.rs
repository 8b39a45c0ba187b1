//! Gesture recognition over successive touch-table snapshots.
//!
//! Runs exactly at sync boundaries. Emission order per sync: TouchDown,
//! TouchUp (followed by LongPress, DoubleTap, Swipe), TouchMove, Pinch.

use crate::config::Thresholds;
use crate::events::{EventKind, TouchEvent};
use crate::tracker::{TouchRecord, TouchState};

#[derive(Debug)]
pub struct GestureDetector {
    thresholds: Thresholds,
    prev_count: usize,
    prev_distance: i32,
    last_tap_ms: i64,
    last_tap_x: i32,
    last_tap_y: i32,
    /// Most recent non-empty touch set, used to classify releases.
    last_active: Vec<TouchRecord>,
}

impl GestureDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            prev_count: 0,
            prev_distance: 0,
            last_tap_ms: i64::MIN / 2,
            last_tap_x: 0,
            last_tap_y: 0,
            last_active: Vec::new(),
        }
    }

    /// Compare the previous and current touch sets and emit events.
    pub fn on_sync(&mut self, state: &mut TouchState, now_ms: i64) -> Vec<TouchEvent> {
        if state.touch_count() > 0 && self.prev_count == 0 {
            state.freeze_starts(now_ms);
        }
        let touches = state.active_touches();
        let count = touches.len();
        let (cx, cy) = state.centroid();
        let mut out = Vec::new();

        let make = |kind, touch_count, x, y, value| TouchEvent {
            kind,
            touch_count,
            x,
            y,
            value,
            timestamp_ms: now_ms,
            touches: touches.clone(),
        };

        if count > 0 && self.prev_count == 0 {
            out.push(make(EventKind::TouchDown, count, cx, cy, 0));
        }

        if count == 0 && self.prev_count > 0 {
            let (rx, ry) = centroid_of(&self.last_active);
            out.push(make(EventKind::TouchUp, 0, rx, ry, 0));

            for t in &self.last_active {
                let dx = (t.x - t.start_x).abs();
                let dy = (t.y - t.start_y).abs();
                if dx < self.thresholds.long_press_slop_px
                    && dy < self.thresholds.long_press_slop_px
                    && now_ms - t.timestamp_ms >= self.thresholds.long_press_ms
                {
                    out.push(make(EventKind::LongPress, 1, t.x, t.y, 0));
                }
            }

            if self.prev_count == 1 {
                let dx = (rx - self.last_tap_x).abs();
                let dy = (ry - self.last_tap_y).abs();
                if dx < self.thresholds.double_tap_slop_px
                    && dy < self.thresholds.double_tap_slop_px
                    && now_ms - self.last_tap_ms < self.thresholds.double_tap_ms
                {
                    out.push(make(EventKind::DoubleTap, 1, rx, ry, 0));
                }
                self.last_tap_ms = now_ms;
                self.last_tap_x = rx;
                self.last_tap_y = ry;

                if let Some(t) = self.last_active.first() {
                    let dx = t.x - t.start_x;
                    let dy = t.y - t.start_y;
                    if dx.abs() > self.thresholds.swipe_min_px && dx.abs() > dy.abs() * 2 {
                        let kind = if dx > 0 {
                            EventKind::SwipeRight
                        } else {
                            EventKind::SwipeLeft
                        };
                        out.push(make(kind, 1, rx, ry, dx.abs()));
                    } else if dy.abs() > self.thresholds.swipe_min_px && dy.abs() > dx.abs() * 2 {
                        let kind = if dy > 0 {
                            EventKind::SwipeDown
                        } else {
                            EventKind::SwipeUp
                        };
                        out.push(make(kind, 1, rx, ry, dy.abs()));
                    }
                }
            }
        }

        if count > 0 && count == self.prev_count {
            out.push(make(EventKind::TouchMove, count, cx, cy, 0));
        }

        if count == 2 {
            let d = contact_distance(&touches[0], &touches[1]);
            if self.prev_distance > 0 {
                let delta = d - self.prev_distance;
                if delta.abs() > self.thresholds.pinch_threshold_px {
                    let kind = if delta > 0 {
                        EventKind::PinchOut
                    } else {
                        EventKind::PinchIn
                    };
                    out.push(make(kind, 2, cx, cy, delta.abs()));
                    self.prev_distance = d;
                }
            } else {
                self.prev_distance = d.max(1);
            }
        } else {
            self.prev_distance = 0;
        }

        if count > 0 {
            self.last_active = touches;
        }
        self.prev_count = count;
        out
    }
}

fn contact_distance(a: &TouchRecord, b: &TouchRecord) -> i32 {
    let dx = f64::from(a.x - b.x);
    let dy = f64::from(a.y - b.y);
    (dx * dx + dy * dy).sqrt() as i32
}

fn centroid_of(touches: &[TouchRecord]) -> (i32, i32) {
    if touches.is_empty() {
        return (0, 0);
    }
    let sum_x: i64 = touches.iter().map(|t| i64::from(t.x)).sum();
    let sum_y: i64 = touches.iter().map(|t| i64::from(t.y)).sum();
    let n = touches.len() as i64;
    ((sum_x / n) as i32, (sum_y / n) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TouchState {
        let mut st = TouchState::default();
        st.calibration.set_minmax(0.0, 4095.0, 0.0, 4095.0, 800, 480);
        st
    }

    fn detector() -> GestureDetector {
        GestureDetector::new(Thresholds::default())
    }

    fn kinds(events: &[TouchEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn tap_emits_down_then_up_at_release_centroid() {
        let mut st = state();
        let mut det = detector();

        st.on_slot(0);
        st.on_tracking_id(17, 0);
        st.on_position_x(2048);
        st.on_position_y(2048);
        let down = det.on_sync(&mut st, 0);
        assert_eq!(kinds(&down), vec![EventKind::TouchDown]);
        assert!((down[0].x - 400).abs() <= 1 && (down[0].y - 240).abs() <= 1);
        assert_eq!(down[0].touch_count, 1);

        st.on_tracking_id(-1, 10);
        let up = det.on_sync(&mut st, 10);
        assert_eq!(up[0].kind, EventKind::TouchUp);
        assert_eq!(up[0].touch_count, 0);
        assert!((up[0].x - 400).abs() <= 1 && (up[0].y - 240).abs() <= 1);
    }

    #[test]
    fn steady_contact_emits_moves() {
        let mut st = state();
        let mut det = detector();
        st.on_tracking_id(1, 0);
        st.on_position_x(1000);
        st.on_position_y(1000);
        det.on_sync(&mut st, 0);

        st.on_position_x(1200);
        let moves = det.on_sync(&mut st, 5);
        assert_eq!(kinds(&moves), vec![EventKind::TouchMove]);
    }

    #[test]
    fn horizontal_swipe_carries_magnitude() {
        let mut st = state();
        let mut det = detector();
        st.on_tracking_id(1, 0);
        st.on_position_x(100);
        st.on_position_y(2000);
        det.on_sync(&mut st, 0);

        for step in 1..=20 {
            st.on_position_x(100 + step * 195);
            det.on_sync(&mut st, i64::from(step));
        }
        st.on_tracking_id(-1, 25);
        let events = det.on_sync(&mut st, 25);
        assert_eq!(events[0].kind, EventKind::TouchUp);
        let swipe = events
            .iter()
            .find(|e| e.kind == EventKind::SwipeRight)
            .expect("swipe emitted");
        assert!(swipe.value >= 50, "magnitude {}", swipe.value);
    }

    #[test]
    fn diagonal_release_is_not_a_swipe() {
        let mut st = state();
        let mut det = detector();
        st.on_tracking_id(1, 0);
        st.on_position_x(1000);
        st.on_position_y(1000);
        det.on_sync(&mut st, 0);
        // roughly equal axes: dominant axis not twice the other
        st.on_position_x(2000);
        st.on_position_y(1800);
        det.on_sync(&mut st, 5);
        st.on_tracking_id(-1, 10);
        let events = det.on_sync(&mut st, 10);
        assert!(events.iter().all(|e| !matches!(
            e.kind,
            EventKind::SwipeLeft | EventKind::SwipeRight | EventKind::SwipeUp | EventKind::SwipeDown
        )));
    }

    #[test]
    fn pinch_out_accumulates_and_does_not_refire() {
        let mut st = state();
        let mut det = detector();
        st.on_slot(0);
        st.on_tracking_id(1, 0);
        st.on_position_x(1000);
        st.on_position_y(2000);
        st.on_slot(1);
        st.on_tracking_id(2, 0);
        st.on_position_x(3000);
        st.on_position_y(2000);
        det.on_sync(&mut st, 0);

        let mut pinch_count = 0;
        let mut left = 1000;
        let mut right = 3000;
        for step in 1..=12 {
            left -= 25;
            right += 25;
            st.on_slot(0);
            st.on_position_x(left);
            st.on_slot(1);
            st.on_position_x(right);
            for e in det.on_sync(&mut st, i64::from(step)) {
                if e.kind == EventKind::PinchOut {
                    assert!(e.value > 0);
                    pinch_count += 1;
                }
            }
        }
        assert!(pinch_count >= 1, "no pinch after sustained separation");

        // no motion: nothing further fires
        let quiet = det.on_sync(&mut st, 100);
        assert!(quiet.iter().all(|e| e.kind != EventKind::PinchOut));
    }

    #[test]
    fn double_tap_requires_time_and_proximity() {
        let mut st = state();
        let mut det = detector();

        let tap = |st: &mut TouchState, det: &mut GestureDetector, raw: (i32, i32), t: i64| {
            st.on_tracking_id(1, t);
            st.on_position_x(raw.0);
            st.on_position_y(raw.1);
            det.on_sync(st, t);
            st.on_tracking_id(-1, t + 5);
            det.on_sync(st, t + 5)
        };

        tap(&mut st, &mut det, (2048, 2048), 0);
        let second = tap(&mut st, &mut det, (2060, 2050), 200);
        assert!(second.iter().any(|e| e.kind == EventKind::DoubleTap));

        // a third tap 400 ms later is too late
        let third = tap(&mut st, &mut det, (2060, 2050), 605);
        assert!(third.iter().all(|e| e.kind != EventKind::DoubleTap));
    }

    #[test]
    fn long_press_fires_once_on_release() {
        let mut st = state();
        let mut det = detector();
        st.on_tracking_id(1, 0);
        st.on_position_x(2048);
        st.on_position_y(2048);
        det.on_sync(&mut st, 0);

        // stationary holds
        det.on_sync(&mut st, 300);
        det.on_sync(&mut st, 600);

        st.on_tracking_id(-1, 610);
        let events = det.on_sync(&mut st, 610);
        let presses: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::LongPress)
            .collect();
        assert_eq!(presses.len(), 1);
        assert!((presses[0].x - 400).abs() <= 1);
        assert!((presses[0].y - 240).abs() <= 1);
    }

    #[test]
    fn moved_contact_is_not_a_long_press() {
        let mut st = state();
        let mut det = detector();
        st.on_tracking_id(1, 0);
        st.on_position_x(2048);
        st.on_position_y(2048);
        det.on_sync(&mut st, 0);
        st.on_position_x(3000);
        det.on_sync(&mut st, 600);
        st.on_tracking_id(-1, 610);
        let events = det.on_sync(&mut st, 610);
        assert!(events.iter().all(|e| e.kind != EventKind::LongPress));
    }
}

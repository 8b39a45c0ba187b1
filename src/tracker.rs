//! Per-slot touch tracking over the kernel multitouch slot protocol.

use crate::calibration::Calibration;

/// Fixed slot capacity of the touch table.
pub const MAX_SLOTS: usize = 10;

/// One multitouch slot. `tracking_id < 0` means the slot is empty.
#[derive(Debug, Clone, Copy)]
pub struct TouchRecord {
    pub tracking_id: i32,
    pub raw_x: i32,
    pub raw_y: i32,
    pub x: i32,
    pub y: i32,
    pub start_x: i32,
    pub start_y: i32,
    pub timestamp_ms: i64,
}

impl Default for TouchRecord {
    fn default() -> Self {
        Self {
            tracking_id: -1,
            raw_x: 0,
            raw_y: 0,
            x: 0,
            y: 0,
            start_x: 0,
            start_y: 0,
            timestamp_ms: 0,
        }
    }
}

impl TouchRecord {
    pub fn active(&self) -> bool {
        self.tracking_id >= 0
    }
}

/// Slot table plus the calibration used to derive screen coordinates.
///
/// The reader thread owns this for writing; everyone shares one mutex around
/// it and holds it only for a few arithmetic operations.
#[derive(Debug, Default)]
pub struct TouchState {
    slots: [TouchRecord; MAX_SLOTS],
    current_slot: usize,
    pub calibration: Calibration,
}

impl TouchState {
    pub fn on_slot(&mut self, slot: i32) {
        self.current_slot = slot.clamp(0, MAX_SLOTS as i32 - 1) as usize;
    }

    pub fn on_tracking_id(&mut self, tracking_id: i32, now_ms: i64) {
        let slot = &mut self.slots[self.current_slot];
        slot.tracking_id = tracking_id;
        if tracking_id >= 0 {
            slot.timestamp_ms = now_ms;
            slot.start_x = slot.x;
            slot.start_y = slot.y;
        }
    }

    pub fn on_position_x(&mut self, raw: i32) {
        let (x, y) = self
            .calibration
            .map(raw, self.slots[self.current_slot].raw_y);
        let slot = &mut self.slots[self.current_slot];
        slot.raw_x = raw;
        slot.x = x;
        slot.y = y;
    }

    pub fn on_position_y(&mut self, raw: i32) {
        let (x, y) = self
            .calibration
            .map(self.slots[self.current_slot].raw_x, raw);
        let slot = &mut self.slots[self.current_slot];
        slot.raw_y = raw;
        slot.x = x;
        slot.y = y;
    }

    /// Single-touch absolute axes land on slot 0 regardless of the cursor.
    pub fn on_abs_x(&mut self, raw: i32) {
        let (x, y) = self.calibration.map(raw, self.slots[0].raw_y);
        let slot = &mut self.slots[0];
        slot.raw_x = raw;
        slot.x = x;
        slot.y = y;
    }

    pub fn on_abs_y(&mut self, raw: i32) {
        let (x, y) = self.calibration.map(self.slots[0].raw_x, raw);
        let slot = &mut self.slots[0];
        slot.raw_y = raw;
        slot.x = x;
        slot.y = y;
    }

    /// Relative motion accumulates onto slot 0 only while it is active.
    pub fn on_rel(&mut self, dx: i32, dy: i32) {
        if !self.slots[0].active() {
            return;
        }
        let raw_x = self.slots[0].raw_x + dx;
        let raw_y = self.slots[0].raw_y + dy;
        let (x, y) = self.calibration.map(raw_x, raw_y);
        let slot = &mut self.slots[0];
        slot.raw_x = raw_x;
        slot.raw_y = raw_y;
        slot.x = x;
        slot.y = y;
    }

    /// Contact-key fallback for devices without the multitouch protocol.
    pub fn set_contact(&mut self, down: bool, now_ms: i64) {
        let slot = &mut self.slots[0];
        if down {
            if !slot.active() {
                slot.tracking_id = 0;
                slot.timestamp_ms = now_ms;
                slot.start_x = slot.x;
                slot.start_y = slot.y;
            }
        } else {
            slot.tracking_id = -1;
        }
    }

    /// Position slot 0 at an absolute raw point, activating it if needed.
    /// Used by the mouse-stream fallback.
    pub fn place_slot0(&mut self, raw_x: i32, raw_y: i32, activate: bool, now_ms: i64) {
        let (x, y) = self.calibration.map(raw_x, raw_y);
        let slot = &mut self.slots[0];
        slot.raw_x = raw_x;
        slot.raw_y = raw_y;
        slot.x = x;
        slot.y = y;
        if activate && !slot.active() {
            slot.tracking_id = 0;
            slot.timestamp_ms = now_ms;
            slot.start_x = x;
            slot.start_y = y;
        }
    }

    pub fn release_slot0(&mut self) {
        self.slots[0].tracking_id = -1;
    }

    /// Re-stamp start position and first-contact time for every active slot.
    /// Called at the touch-down sync, once all position events of the batch
    /// have been applied.
    pub fn freeze_starts(&mut self, now_ms: i64) {
        for slot in self.slots.iter_mut().filter(|s| s.active()) {
            slot.start_x = slot.x;
            slot.start_y = slot.y;
            slot.timestamp_ms = now_ms;
        }
    }

    pub fn slot0(&self) -> &TouchRecord {
        &self.slots[0]
    }

    pub fn touch_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active()).count()
    }

    /// Ordered copies of every active slot.
    pub fn active_touches(&self) -> Vec<TouchRecord> {
        self.slots.iter().filter(|s| s.active()).copied().collect()
    }

    /// Integer mean of the active calibrated coordinates. `(0, 0)` when empty.
    pub fn centroid(&self) -> (i32, i32) {
        let mut count = 0i64;
        let mut sum_x = 0i64;
        let mut sum_y = 0i64;
        for slot in self.slots.iter().filter(|s| s.active()) {
            sum_x += i64::from(slot.x);
            sum_y += i64::from(slot.y);
            count += 1;
        }
        if count == 0 {
            (0, 0)
        } else {
            ((sum_x / count) as i32, (sum_y / count) as i32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TouchState {
        let mut st = TouchState::default();
        st.calibration.set_minmax(0.0, 4095.0, 0.0, 4095.0, 800, 480);
        st
    }

    #[test]
    fn slot_protocol_tracks_distinct_contacts() {
        let mut st = state();
        st.on_slot(0);
        st.on_tracking_id(17, 100);
        st.on_position_x(1000);
        st.on_position_y(1000);
        st.on_slot(1);
        st.on_tracking_id(18, 101);
        st.on_position_x(3000);
        st.on_position_y(3000);

        assert_eq!(st.touch_count(), 2);
        let ids: Vec<i32> = st.active_touches().iter().map(|t| t.tracking_id).collect();
        assert_eq!(ids, vec![17, 18]);

        st.on_slot(0);
        st.on_tracking_id(-1, 102);
        assert_eq!(st.touch_count(), 1);
        assert_eq!(st.active_touches()[0].tracking_id, 18);
    }

    #[test]
    fn active_count_matches_tracking_id_cardinality() {
        let mut st = state();
        for slot in 0..MAX_SLOTS {
            st.on_slot(slot as i32);
            st.on_tracking_id(slot as i32 + 100, 0);
        }
        assert_eq!(st.touch_count(), MAX_SLOTS);
        let distinct: std::collections::HashSet<i32> =
            st.active_touches().iter().map(|t| t.tracking_id).collect();
        assert_eq!(distinct.len(), st.touch_count());
    }

    #[test]
    fn start_position_frozen_at_contact_down() {
        let mut st = state();
        st.on_slot(0);
        st.on_position_x(2048);
        st.on_position_y(2048);
        st.on_tracking_id(5, 50);
        let start = (st.slot0().start_x, st.slot0().start_y);

        st.on_position_x(4000);
        st.on_position_y(100);
        assert_eq!((st.slot0().start_x, st.slot0().start_y), start);
        assert_ne!((st.slot0().x, st.slot0().y), start);
    }

    #[test]
    fn relative_motion_needs_an_active_contact() {
        let mut st = state();
        st.on_rel(10, 10);
        assert_eq!(st.slot0().raw_x, 0);

        st.place_slot0(2048, 2048, true, 0);
        st.on_rel(100, -50);
        assert_eq!(st.slot0().raw_x, 2148);
        assert_eq!(st.slot0().raw_y, 1998);
    }

    #[test]
    fn centroid_is_integer_mean_of_active_slots() {
        let mut st = state();
        st.on_slot(0);
        st.on_tracking_id(1, 0);
        st.on_position_x(0);
        st.on_position_y(0);
        st.on_slot(1);
        st.on_tracking_id(2, 0);
        st.on_position_x(4095);
        st.on_position_y(4095);
        let (cx, cy) = st.centroid();
        assert_eq!(cx, (0 + 799) / 2);
        assert_eq!(cy, (0 + 479) / 2);
    }
}

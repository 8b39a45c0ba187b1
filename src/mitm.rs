//! Re-publication of calibrated events through a synthetic input device.

use anyhow::{Context, Result};
use evdev::{
    uinput::VirtualDevice, AbsInfo, AbsoluteAxisCode, AttributeSet, BusType, EventType, InputEvent,
    InputId, KeyCode, SynchronizationCode, UinputAbsSetup,
};
use log::info;
use std::io;

/// Synthetic absolute pointer carrying already-calibrated coordinates.
///
/// Advertises contact key + absolute X/Y with ranges matching the screen
/// region, so downstream consumers need no further transformation.
pub struct Injector {
    device: VirtualDevice,
    contact_down: bool,
}

impl Injector {
    pub fn create(screen_width: i32, screen_height: i32) -> Result<Self> {
        let mut keys = AttributeSet::<KeyCode>::new();
        keys.insert(KeyCode::BTN_TOUCH);

        let abs_x = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_X,
            AbsInfo::new(0, 0, (screen_width - 1).max(1), 0, 0, 0),
        );
        let abs_y = UinputAbsSetup::new(
            AbsoluteAxisCode::ABS_Y,
            AbsInfo::new(0, 0, (screen_height - 1).max(1), 0, 0, 0),
        );

        let device = VirtualDevice::builder()
            .context("failed to open uinput")?
            .name("touchmap calibrated pointer")
            .input_id(InputId::new(BusType::BUS_USB, 0x1234, 0x5678, 1))
            .with_keys(&keys)
            .context("failed to advertise contact key")?
            .with_absolute_axis(&abs_x)
            .context("failed to advertise ABS_X")?
            .with_absolute_axis(&abs_y)
            .context("failed to advertise ABS_Y")?
            .build()
            .context("failed to create synthetic device")?;

        info!("created synthetic pointer ({screen_width}x{screen_height})");
        Ok(Self {
            device,
            contact_down: false,
        })
    }

    /// Contact-down (once) + position + sync.
    pub fn emit_position(&mut self, x: i32, y: i32) -> io::Result<()> {
        let plan = plan_position(&mut self.contact_down, x, y);
        self.device.emit(&materialize(&plan))
    }

    /// Contact-up + sync. No-op when the contact is already up.
    pub fn emit_release(&mut self) -> io::Result<()> {
        let plan = plan_release(&mut self.contact_down);
        if plan.is_empty() {
            return Ok(());
        }
        self.device.emit(&materialize(&plan))
    }
}

fn materialize(plan: &[(u16, u16, i32)]) -> Vec<InputEvent> {
    plan.iter()
        .map(|&(etype, code, value)| InputEvent::new(etype, code, value))
        .collect()
}

/// Wire packets as (type, code, value) triples; timestamps stay zero because
/// the kernel ignores them for injected events.
fn plan_position(contact_down: &mut bool, x: i32, y: i32) -> Vec<(u16, u16, i32)> {
    let mut plan = Vec::with_capacity(4);
    if !*contact_down {
        plan.push((EventType::KEY.0, KeyCode::BTN_TOUCH.0, 1));
        *contact_down = true;
    }
    plan.push((EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_X.0, x));
    plan.push((EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_Y.0, y));
    plan.push((
        EventType::SYNCHRONIZATION.0,
        SynchronizationCode::SYN_REPORT.0,
        0,
    ));
    plan
}

fn plan_release(contact_down: &mut bool) -> Vec<(u16, u16, i32)> {
    if !*contact_down {
        return Vec::new();
    }
    *contact_down = false;
    vec![
        (EventType::KEY.0, KeyCode::BTN_TOUCH.0, 0),
        (
            EventType::SYNCHRONIZATION.0,
            SynchronizationCode::SYN_REPORT.0,
            0,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_down_is_emitted_once() {
        let mut down = false;
        let first = plan_position(&mut down, 10, 20);
        assert_eq!(first[0], (EventType::KEY.0, KeyCode::BTN_TOUCH.0, 1));
        assert_eq!(first.len(), 4);

        let second = plan_position(&mut down, 11, 21);
        assert_eq!(second.len(), 3);
        assert_eq!(second[0], (EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_X.0, 11));
        assert_eq!(
            second.last().copied().unwrap(),
            (EventType::SYNCHRONIZATION.0, SynchronizationCode::SYN_REPORT.0, 0)
        );
    }

    #[test]
    fn release_is_idempotent() {
        let mut down = true;
        let up = plan_release(&mut down);
        assert_eq!(up[0], (EventType::KEY.0, KeyCode::BTN_TOUCH.0, 0));
        assert!(plan_release(&mut down).is_empty());
    }

    #[test]
    fn packets_always_end_with_sync() {
        let mut down = false;
        for plan in [plan_position(&mut down, 1, 2), plan_release(&mut down)] {
            assert_eq!(
                plan.last().copied().unwrap(),
                (EventType::SYNCHRONIZATION.0, SynchronizationCode::SYN_REPORT.0, 0)
            );
        }
    }
}

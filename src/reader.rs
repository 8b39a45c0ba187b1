//! The touch reader: device lifecycle, the reader thread, and the public
//! consumer API.

use anyhow::{Context, Result, anyhow};
use evdev::{AbsoluteAxisCode, Device, EventType, KeyCode, RelativeAxisCode, SynchronizationCode};
use log::{debug, info, warn};
use std::{
    fs::{File, OpenOptions},
    io::Read as _,
    os::unix::fs::OpenOptionsExt,
    path::Path,
    sync::{
        Arc, Mutex,
        mpsc::{self, SyncSender},
    },
    thread,
    time::{Duration, Instant},
};

use crate::calibration::{self, Calibration};
use crate::config::Thresholds;
use crate::events::{EventCallback, EventKind, EventQueue, TouchEvent};
use crate::gestures::GestureDetector;
use crate::input::{self, Capabilities, DeviceClass};
use crate::mitm::Injector;
use crate::tracker::{TouchRecord, TouchState};

/// Upper bound of the virtual raw space used by the mouse-stream fallback.
/// Not derived from the display; the calibration maps it onto the screen.
const MOUSE_RAW_MAX: i32 = 4095;
const MOUSE_RAW_CENTRE: i32 = 2048;

/// Idle sleep between non-blocking reads.
const POLL_INTERVAL: Duration = Duration::from_millis(4);

/// Injection settings shared between the API and the reader thread. The
/// thread applies grab changes at the next packet boundary.
#[derive(Default)]
struct MitmShared {
    enabled: bool,
    grab_source: bool,
    injector: Option<Injector>,
}

enum Source {
    Evdev {
        device: Device,
        caps: Capabilities,
    },
    Ps2(File),
}

/// Reads one input device on a dedicated thread, tracks multi-touch slot
/// state, applies the calibration transform, recognises gestures, and
/// delivers [`TouchEvent`]s through a bounded queue.
pub struct TouchReader {
    state: Arc<Mutex<TouchState>>,
    queue: Arc<EventQueue>,
    mitm: Arc<Mutex<MitmShared>>,
    thresholds: Thresholds,
    thread: Option<thread::JoinHandle<()>>,
    selected_device: Option<String>,
}

impl Default for TouchReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TouchReader {
    pub fn new() -> Self {
        Self::with_thresholds(Thresholds::default())
    }

    pub fn with_thresholds(thresholds: Thresholds) -> Self {
        Self {
            state: Arc::new(Mutex::new(TouchState::default())),
            queue: Arc::new(EventQueue::new()),
            mitm: Arc::new(Mutex::new(MitmShared::default())),
            thresholds,
            thread: None,
            selected_device: None,
        }
    }

    /// Open `path` and start the reader thread.
    pub fn start(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_running() {
            return Err(anyhow!("reader already started"));
        }
        let path = path.as_ref();
        let source = open_source(path)?;
        self.launch(source, path.display().to_string())
    }

    /// Enumerate input devices and start on the first usable one.
    pub fn start_auto(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(anyhow!("reader already started"));
        }
        for path in input::discover() {
            match open_source(&path) {
                Ok(source) => {
                    info!("auto-detected input device {}", path.display());
                    return self.launch(source, path.display().to_string());
                }
                Err(e) => debug!("skipping {}: {e:#}", path.display()),
            }
        }
        Err(anyhow!("no usable input device found under /dev/input"))
    }

    fn launch(&mut self, source: Source, label: String) -> Result<()> {
        {
            // fresh slot table, calibration survives restarts
            let mut st = self.state.lock().unwrap();
            let calibration = st.calibration.clone();
            *st = TouchState::default();
            st.calibration = calibration;
        }
        self.queue.set_running(true);
        self.selected_device = Some(label);

        let state = Arc::clone(&self.state);
        let queue = Arc::clone(&self.queue);
        let mitm = Arc::clone(&self.mitm);
        let detector = GestureDetector::new(self.thresholds.clone());
        let handle = thread::Builder::new()
            .name("touchmap-reader".into())
            .spawn(move || reader_loop(source, state, queue, mitm, detector))
            .context("failed to spawn reader thread")?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Idempotent shutdown: flag, wake waiters, join, release grab, close
    /// the source, destroy the synthetic device.
    pub fn stop(&mut self) {
        self.queue.set_running(false);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        let mut mitm = self.mitm.lock().unwrap();
        mitm.enabled = false;
        mitm.grab_source = false;
        mitm.injector = None;
    }

    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    pub fn selected_device(&self) -> Option<&str> {
        self.selected_device.as_deref()
    }

    pub fn set_event_callback(&self, callback: Option<EventCallback>) {
        self.queue.set_callback(callback);
    }

    pub fn touch_count(&self) -> usize {
        self.state.lock().unwrap().touch_count()
    }

    /// Calibrated coordinates of the `index`-th active touch.
    pub fn touch_coordinates(&self, index: usize) -> Option<(i32, i32)> {
        let st = self.state.lock().unwrap();
        st.active_touches().get(index).map(|t| (t.x, t.y))
    }

    pub fn raw_touch_coordinates(&self, index: usize) -> Option<(i32, i32)> {
        let st = self.state.lock().unwrap();
        st.active_touches().get(index).map(|t| (t.raw_x, t.raw_y))
    }

    pub fn active_touches(&self) -> Vec<TouchRecord> {
        self.state.lock().unwrap().active_touches()
    }

    /// Non-blocking removal of the next queued event.
    pub fn poll_event(&self) -> Option<TouchEvent> {
        self.queue.poll()
    }

    /// Blocking wait; `None` timeout waits with a one-second liveness cap.
    pub fn wait_event(&self, timeout: Option<Duration>) -> Option<TouchEvent> {
        self.queue.wait(timeout)
    }

    pub fn clear_events(&self) {
        self.queue.clear();
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(anyhow!("reader is not started"))
        }
    }

    pub fn set_calibration(
        &self,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        screen_width: i32,
        screen_height: i32,
    ) -> Result<()> {
        self.ensure_running()?;
        self.state
            .lock()
            .unwrap()
            .calibration
            .set_minmax(min_x, max_x, min_y, max_y, screen_width, screen_height);
        Ok(())
    }

    pub fn set_affine_calibration(
        &self,
        matrix: [f64; 6],
        screen_width: i32,
        screen_height: i32,
    ) -> Result<()> {
        self.ensure_running()?;
        self.state
            .lock()
            .unwrap()
            .calibration
            .set_affine(matrix, screen_width, screen_height);
        Ok(())
    }

    pub fn set_calibration_margin(&self, margin_percent: f64) -> Result<()> {
        self.ensure_running()?;
        self.state.lock().unwrap().calibration.set_margin(margin_percent);
        Ok(())
    }

    pub fn set_calibration_offset(&self, x_offset: i32, y_offset: i32) -> Result<()> {
        self.ensure_running()?;
        self.state
            .lock()
            .unwrap()
            .calibration
            .set_offset(x_offset, y_offset);
        Ok(())
    }

    pub fn calibration(&self) -> Calibration {
        self.state.lock().unwrap().calibration.clone()
    }

    pub fn load_calibration(&self, path: &Path) -> Result<()> {
        self.ensure_running()?;
        self.state.lock().unwrap().calibration.apply_file(path)
    }

    pub fn save_calibration(&self, path: &Path) -> Result<()> {
        self.calibration().save_to(path)
    }

    /// Enable or disable re-publication of calibrated events through a
    /// synthetic device. `grab_source` additionally hides the raw device
    /// from the rest of the system; a refused grab only logs a warning.
    pub fn enable_mitm(&self, enable: bool, grab_source: bool) -> Result<()> {
        self.ensure_running()?;
        let mut mitm = self.mitm.lock().unwrap();
        if enable {
            if mitm.injector.is_none() {
                let calibration = self.state.lock().unwrap().calibration.clone();
                let injector =
                    Injector::create(calibration.screen_width, calibration.screen_height)?;
                mitm.injector = Some(injector);
            }
            mitm.enabled = true;
            mitm.grab_source = grab_source;
        } else {
            mitm.enabled = false;
            mitm.grab_source = false;
            mitm.injector = None;
        }
        Ok(())
    }

    /// Interactive four-corner calibration.
    ///
    /// Prompts on stdout, captures one touch-down per corner through a
    /// one-shot channel armed per step, then fits and applies the result.
    pub fn run_calibration(
        &self,
        screen_width: i32,
        screen_height: i32,
        margin_percent: f64,
        use_affine: bool,
    ) -> Result<()> {
        self.ensure_running()?;

        const CORNERS: [&str; 4] = ["top-left", "top-right", "bottom-right", "bottom-left"];
        const CORNER_TIMEOUT: Duration = Duration::from_secs(15);
        let inset = 20.0;
        let targets = [
            (inset, inset),
            (f64::from(screen_width) - inset, inset),
            (
                f64::from(screen_width) - inset,
                f64::from(screen_height) - inset,
            ),
            (inset, f64::from(screen_height) - inset),
        ];

        // Arm a fresh one-shot sender per corner; the capture callback fires
        // it on the first touch-down and goes quiet until re-armed.
        let armed: Arc<Mutex<Option<SyncSender<(i32, i32)>>>> = Arc::new(Mutex::new(None));
        let capture = Arc::clone(&armed);
        let previous = self.queue.take_callback();
        self.queue.set_callback(Some(Arc::new(move |event: &TouchEvent| {
            if event.kind != EventKind::TouchDown {
                return;
            }
            if let Some(first) = event.touches.first() {
                if let Some(tx) = capture.lock().unwrap().take() {
                    let _ = tx.try_send((first.raw_x, first.raw_y));
                }
            }
        })));

        let restore = |queue: &EventQueue| queue.set_callback(previous.clone());

        println!("Calibration target area: {screen_width}x{screen_height}");
        let mut raw = [(0.0f64, 0.0f64); 4];
        for (step, label) in CORNERS.iter().enumerate() {
            let (tx, rx) = mpsc::sync_channel(1);
            *armed.lock().unwrap() = Some(tx);
            println!("Touch the {label} corner...");

            let deadline = Instant::now() + CORNER_TIMEOUT;
            let point = loop {
                if !self.is_running() {
                    restore(&self.queue);
                    return Err(anyhow!("calibration aborted: reader stopped"));
                }
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(point) => break Some(point),
                    Err(mpsc::RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
                    Err(_) => break None,
                }
            };
            let Some((raw_x, raw_y)) = point else {
                restore(&self.queue);
                return Err(anyhow!("timed out waiting for the {label} corner"));
            };
            println!("Captured raw point: ({raw_x}, {raw_y})");
            raw[step] = (f64::from(raw_x), f64::from(raw_y));

            // settle so the same contact does not bleed into the next corner
            thread::sleep(Duration::from_millis(500));
        }
        restore(&self.queue);

        if use_affine {
            if let Some(matrix) = calibration::fit_affine(&raw, &targets) {
                let mut st = self.state.lock().unwrap();
                st.calibration.set_affine(matrix, screen_width, screen_height);
                st.calibration.set_margin(margin_percent);
                return Ok(());
            }
            warn!("degenerate corner capture, falling back to min/max fit");
        }

        let (min_x, max_x, min_y, max_y) = calibration::fit_minmax(&raw, margin_percent);
        let mut st = self.state.lock().unwrap();
        st.calibration
            .set_minmax(min_x, max_x, min_y, max_y, screen_width, screen_height);
        st.calibration.set_margin(margin_percent);
        Ok(())
    }
}

impl Drop for TouchReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_source(path: &Path) -> Result<Source> {
    if input::is_mouse_path(path) {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        return Ok(Source::Ps2(file));
    }
    let mut device = Device::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let caps = input::probe(&device).ok_or_else(|| {
        anyhow!(
            "{} reports neither absolute nor relative axes",
            path.display()
        )
    })?;
    device
        .set_nonblocking(true)
        .with_context(|| format!("failed to set {} non-blocking", path.display()))?;
    Ok(Source::Evdev { device, caps })
}

fn reader_loop(
    source: Source,
    state: Arc<Mutex<TouchState>>,
    queue: Arc<EventQueue>,
    mitm: Arc<Mutex<MitmShared>>,
    detector: GestureDetector,
) {
    match source {
        Source::Evdev { device, caps } => {
            let pipeline = Pipeline::new(state, Arc::clone(&queue), Arc::clone(&mitm), detector, caps);
            evdev_loop(device, pipeline, &queue, &mitm);
        }
        Source::Ps2(file) => {
            let caps = Capabilities {
                class: DeviceClass::Ps2Mouse,
                has_btn_touch: false,
            };
            let pipeline = Pipeline::new(state, Arc::clone(&queue), mitm, detector, caps);
            ps2_loop(file, pipeline, &queue);
        }
    }
}

fn evdev_loop(
    mut device: Device,
    mut pipeline: Pipeline,
    queue: &EventQueue,
    mitm: &Mutex<MitmShared>,
) {
    let mut grabbed = false;
    let mut grab_refused = false;
    while queue.is_running() {
        // apply grab changes requested by the API
        let want_grab = {
            let m = mitm.lock().unwrap();
            m.enabled && m.grab_source
        };
        if want_grab && !grabbed && !grab_refused {
            match device.grab() {
                Ok(()) => {
                    grabbed = true;
                    info!("grabbed source device");
                }
                Err(e) => {
                    warn!("exclusive grab refused: {e}");
                    grab_refused = true;
                }
            }
        } else if !want_grab {
            if grabbed {
                let _ = device.ungrab();
                grabbed = false;
                info!("released source device");
            }
            grab_refused = false;
        }

        let batch: Vec<(u16, u16, i32)> = match device.fetch_events() {
            Ok(events) => events
                .map(|ev| (ev.event_type().0, ev.code(), ev.value()))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                // transient; retry on the next iteration
                debug!("device read failed: {e}");
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        };
        for (etype, code, value) in batch {
            pipeline.handle(etype, code, value);
        }
    }
    if grabbed {
        let _ = device.ungrab();
    }
}

fn ps2_loop(mut file: File, mut pipeline: Pipeline, queue: &EventQueue) {
    let mut packet = [0u8; 3];
    let mut filled = 0usize;
    let mut byte = [0u8; 1];
    while queue.is_running() {
        match file.read(&mut byte) {
            Ok(1) => {}
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                debug!("mouse read failed: {e}");
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        }
        packet[filled] = byte[0];
        filled += 1;
        if filled == packet.len() {
            filled = 0;
            pipeline.ps2_packet(&packet);
        }
    }
}

/// Decode + state update + gesture dispatch, independent of the I/O loop.
struct Pipeline {
    state: Arc<Mutex<TouchState>>,
    queue: Arc<EventQueue>,
    mitm: Arc<Mutex<MitmShared>>,
    detector: GestureDetector,
    epoch: Instant,
    multitouch: bool,
    has_btn_touch: bool,
    pending: bool,
}

impl Pipeline {
    fn new(
        state: Arc<Mutex<TouchState>>,
        queue: Arc<EventQueue>,
        mitm: Arc<Mutex<MitmShared>>,
        detector: GestureDetector,
        caps: Capabilities,
    ) -> Self {
        Self {
            state,
            queue,
            mitm,
            detector,
            epoch: Instant::now(),
            multitouch: caps.class == DeviceClass::Multitouch,
            has_btn_touch: caps.has_btn_touch,
            pending: false,
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Apply one kernel input event to the touch table.
    fn handle(&mut self, etype: u16, code: u16, value: i32) {
        let now = self.now_ms();
        if etype == EventType::ABSOLUTE.0 {
            let mut st = self.state.lock().unwrap();
            match code {
                c if c == AbsoluteAxisCode::ABS_MT_SLOT.0 => st.on_slot(value),
                c if c == AbsoluteAxisCode::ABS_MT_TRACKING_ID.0 => {
                    st.on_tracking_id(value, now);
                    self.pending = true;
                }
                c if c == AbsoluteAxisCode::ABS_MT_POSITION_X.0 => {
                    st.on_position_x(value);
                    self.pending = true;
                }
                c if c == AbsoluteAxisCode::ABS_MT_POSITION_Y.0 => {
                    st.on_position_y(value);
                    self.pending = true;
                }
                c if c == AbsoluteAxisCode::ABS_X.0 => {
                    st.on_abs_x(value);
                    self.pending = true;
                }
                c if c == AbsoluteAxisCode::ABS_Y.0 => {
                    st.on_abs_y(value);
                    self.pending = true;
                }
                _ => {}
            }
        } else if etype == EventType::KEY.0 {
            let is_contact = code == KeyCode::BTN_TOUCH.0
                || (!self.has_btn_touch
                    && (code == KeyCode::BTN_TOOL_PEN.0 || code == KeyCode::BTN_LEFT.0));
            // slot 0 contact toggling only for devices without the MT protocol
            if is_contact && !self.multitouch {
                self.state.lock().unwrap().set_contact(value != 0, now);
                self.pending = true;
            }
        } else if etype == EventType::RELATIVE.0 {
            let mut st = self.state.lock().unwrap();
            if code == RelativeAxisCode::REL_X.0 {
                st.on_rel(value, 0);
                self.pending = true;
            } else if code == RelativeAxisCode::REL_Y.0 {
                st.on_rel(0, value);
                self.pending = true;
            }
        } else if etype == EventType::SYNCHRONIZATION.0
            && code == SynchronizationCode::SYN_REPORT.0
            && self.pending
        {
            self.pending = false;
            self.dispatch(now);
        }
    }

    /// Decode a complete 3-byte mouse packet and run the detector.
    fn ps2_packet(&mut self, packet: &[u8; 3]) {
        let now = self.now_ms();
        let left_button = packet[0] & 0x01 != 0;
        let dx = i32::from(packet[1]) - if packet[0] & 0x10 != 0 { 256 } else { 0 };
        let dy = i32::from(packet[2]) - if packet[0] & 0x20 != 0 { 256 } else { 0 };

        {
            let mut st = self.state.lock().unwrap();
            if left_button {
                if !st.slot0().active() {
                    st.place_slot0(MOUSE_RAW_CENTRE, MOUSE_RAW_CENTRE, true, now);
                }
                let raw_x = (st.slot0().raw_x + dx).clamp(0, MOUSE_RAW_MAX);
                // mouse dy grows upward, raw space grows downward
                let raw_y = (st.slot0().raw_y - dy).clamp(0, MOUSE_RAW_MAX);
                st.place_slot0(raw_x, raw_y, false, now);
            } else if st.slot0().active() {
                st.release_slot0();
            }
        }
        self.dispatch(now);
    }

    /// Sync boundary: run the gesture detector, feed the injector, enqueue.
    fn dispatch(&mut self, now: i64) {
        let events = {
            let mut st = self.state.lock().unwrap();
            self.detector.on_sync(&mut st, now)
        };
        for event in events {
            {
                let mut mitm = self.mitm.lock().unwrap();
                if mitm.enabled {
                    if let Some(injector) = mitm.injector.as_mut() {
                        let result = match event.kind {
                            EventKind::TouchDown | EventKind::TouchMove if event.touch_count > 0 => {
                                injector.emit_position(event.x, event.y)
                            }
                            EventKind::TouchUp => injector.emit_release(),
                            _ => Ok(()),
                        };
                        if let Err(e) = result {
                            warn!("injector write failed: {e}");
                        }
                    }
                }
            }
            self.queue.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn test_pipeline() -> (Pipeline, Arc<EventQueue>) {
        let mut state = TouchState::default();
        state
            .calibration
            .set_minmax(0.0, 4095.0, 0.0, 4095.0, 800, 480);
        let state = Arc::new(Mutex::new(state));
        let queue = Arc::new(EventQueue::new());
        queue.set_running(true);
        let caps = Capabilities {
            class: DeviceClass::Multitouch,
            has_btn_touch: false,
        };
        let pipeline = Pipeline::new(
            state,
            Arc::clone(&queue),
            Arc::new(Mutex::new(MitmShared::default())),
            GestureDetector::new(Thresholds::default()),
            caps,
        );
        (pipeline, queue)
    }

    fn abs(pipeline: &mut Pipeline, code: AbsoluteAxisCode, value: i32) {
        pipeline.handle(EventType::ABSOLUTE.0, code.0, value);
    }

    fn syn(pipeline: &mut Pipeline) {
        pipeline.handle(
            EventType::SYNCHRONIZATION.0,
            SynchronizationCode::SYN_REPORT.0,
            0,
        );
    }

    fn drain(queue: &EventQueue) -> Vec<TouchEvent> {
        std::iter::from_fn(|| queue.poll()).collect()
    }

    #[test]
    fn single_tap_at_centre_maps_to_screen_centre() {
        let (mut p, queue) = test_pipeline();
        abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 0);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_TRACKING_ID, 17);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, 2048);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_Y, 2048);
        syn(&mut p);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_TRACKING_ID, -1);
        syn(&mut p);

        let events = drain(&queue);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::TouchDown);
        assert_eq!(events[0].touch_count, 1);
        assert!((events[0].x - 400).abs() <= 1 && (events[0].y - 240).abs() <= 1);
        assert_eq!(events[1].kind, EventKind::TouchUp);
        assert_eq!(events[1].touch_count, 0);
        assert!((events[1].x - 400).abs() <= 1 && (events[1].y - 240).abs() <= 1);
    }

    #[test]
    fn swipe_right_stream_emits_down_moves_swipe_up() {
        let (mut p, queue) = test_pipeline();
        abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 0);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_TRACKING_ID, 5);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, 100);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_Y, 2000);
        syn(&mut p);
        let mut raw_x = 100;
        for _ in 0..20 {
            raw_x = (raw_x + 200).min(4000);
            abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, raw_x);
            syn(&mut p);
        }
        abs(&mut p, AbsoluteAxisCode::ABS_MT_TRACKING_ID, -1);
        syn(&mut p);

        let events = drain(&queue);
        assert_eq!(events.first().unwrap().kind, EventKind::TouchDown);
        let moves = events
            .iter()
            .filter(|e| e.kind == EventKind::TouchMove)
            .count();
        assert!(moves >= 19, "only {moves} moves");
        let up_pos = events
            .iter()
            .position(|e| e.kind == EventKind::TouchUp)
            .unwrap();
        let swipe_pos = events
            .iter()
            .position(|e| e.kind == EventKind::SwipeRight)
            .expect("swipe emitted");
        assert!(swipe_pos > up_pos, "swipe follows the release");
        assert!(events[swipe_pos].value >= 50);
    }

    #[test]
    fn separating_contacts_produce_one_pinch_out() {
        let (mut p, queue) = test_pipeline();
        abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 0);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_TRACKING_ID, 1);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, 1000);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_Y, 2000);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 1);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_TRACKING_ID, 2);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, 3000);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_Y, 2000);
        syn(&mut p);

        let (mut left, mut right) = (1000, 3000);
        for _ in 0..10 {
            left -= 25;
            right += 25;
            abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 0);
            abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, left);
            abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 1);
            abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, right);
            syn(&mut p);
        }
        let pinches: Vec<TouchEvent> = drain(&queue)
            .into_iter()
            .filter(|e| e.kind == EventKind::PinchOut)
            .collect();
        assert!(!pinches.is_empty(), "no pinch-out emitted");
        assert!(pinches.iter().all(|e| e.value > 0));

        // a sync without motion adds no redundant pinch
        abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 0);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, left);
        syn(&mut p);
        assert!(drain(&queue).iter().all(|e| e.kind != EventKind::PinchOut));
    }

    #[test]
    fn contact_key_drives_slot0_for_single_touch_devices() {
        let (mut p, queue) = test_pipeline();
        p.multitouch = false;

        p.handle(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_X.0, 2048);
        p.handle(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_Y.0, 2048);
        p.handle(EventType::KEY.0, KeyCode::BTN_TOOL_PEN.0, 1);
        syn(&mut p);
        p.handle(EventType::KEY.0, KeyCode::BTN_TOOL_PEN.0, 0);
        syn(&mut p);

        let events = drain(&queue);
        assert_eq!(events[0].kind, EventKind::TouchDown);
        assert!((events[0].x - 400).abs() <= 1);
        assert_eq!(events[1].kind, EventKind::TouchUp);
    }

    #[test]
    fn relative_motion_moves_the_active_contact() {
        let (mut p, queue) = test_pipeline();
        p.multitouch = false;

        p.handle(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_X.0, 2048);
        p.handle(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_Y.0, 2048);
        p.handle(EventType::KEY.0, KeyCode::BTN_TOUCH.0, 1);
        syn(&mut p);
        p.handle(EventType::RELATIVE.0, RelativeAxisCode::REL_X.0, 400);
        syn(&mut p);

        let events = drain(&queue);
        assert_eq!(events[1].kind, EventKind::TouchMove);
        assert!(events[1].x > events[0].x);
    }

    #[test]
    fn ps2_packets_synthesise_a_centred_contact() {
        let (mut p, queue) = test_pipeline();
        p.multitouch = false;

        // left button down, no motion
        p.ps2_packet(&[0x09, 0, 0]);
        // move right 100, up 50 (raw y decreases by -(-?): dy positive moves up)
        p.ps2_packet(&[0x09, 100, 50]);
        // release
        p.ps2_packet(&[0x08, 0, 0]);

        let events = drain(&queue);
        assert_eq!(events[0].kind, EventKind::TouchDown);
        assert!((events[0].x - 400).abs() <= 1 && (events[0].y - 240).abs() <= 1);
        assert_eq!(events[1].kind, EventKind::TouchMove);
        assert!(events[1].x > events[0].x);
        assert!(events[1].y < events[0].y);
        assert_eq!(events[2].kind, EventKind::TouchUp);
    }

    #[test]
    fn ps2_sign_extension_and_clamping() {
        let (mut p, _queue) = test_pipeline();
        p.multitouch = false;

        p.ps2_packet(&[0x09, 0, 0]);
        // dx = 156 - 256 = -100
        p.ps2_packet(&[0x19, 156, 0]);
        {
            let st = p.state.lock().unwrap();
            assert_eq!(st.slot0().raw_x, MOUSE_RAW_CENTRE - 100);
        }
        // drive far left; raw x clamps at 0
        for _ in 0..30 {
            p.ps2_packet(&[0x19, 156, 0]);
        }
        let st = p.state.lock().unwrap();
        assert_eq!(st.slot0().raw_x, 0);
    }

    #[test]
    fn slot_cursor_out_of_range_is_clamped() {
        let (mut p, queue) = test_pipeline();
        abs(&mut p, AbsoluteAxisCode::ABS_MT_SLOT, 99);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_TRACKING_ID, 7);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_X, 2048);
        abs(&mut p, AbsoluteAxisCode::ABS_MT_POSITION_Y, 2048);
        syn(&mut p);
        let events = drain(&queue);
        assert_eq!(events[0].kind, EventKind::TouchDown);
        assert_eq!(events[0].touch_count, 1);
    }
}

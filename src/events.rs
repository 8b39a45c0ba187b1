//! Emitted touch events and the bounded queue that delivers them.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::tracker::TouchRecord;

/// Queue capacity. The producer is the real-time reader, so overflow drops
/// the oldest element instead of back-pressuring.
pub const MAX_EVENTS: usize = 32;

/// Upper bound on a single blocking wait, keeping shutdown latency bounded.
const MAX_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TouchDown,
    TouchUp,
    TouchMove,
    SwipeLeft,
    SwipeRight,
    SwipeUp,
    SwipeDown,
    PinchIn,
    PinchOut,
    LongPress,
    DoubleTap,
    /// Reserved; not emitted by the current recogniser.
    Rotate,
}

/// One recognised event, with a snapshot of the active slots at emission.
#[derive(Debug, Clone)]
pub struct TouchEvent {
    pub kind: EventKind,
    pub touch_count: usize,
    /// Centroid of the active touches.
    pub x: i32,
    pub y: i32,
    /// Swipe magnitude or pinch delta in screen pixels.
    pub value: i32,
    pub timestamp_ms: i64,
    pub touches: Vec<TouchRecord>,
}

pub type EventCallback = Arc<dyn Fn(&TouchEvent) + Send + Sync>;

struct QueueInner {
    events: VecDeque<TouchEvent>,
    callback: Option<EventCallback>,
}

/// Bounded FIFO with a blocking wait and an optional synchronous callback.
///
/// The callback lives behind the queue mutex; dispatch clones the handle and
/// invokes it after the lock is released, so delivery order is preserved by
/// the single producer and callbacks may re-enter the reader API.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
    running: AtomicBool,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(MAX_EVENTS),
                callback: None,
            }),
            ready: Condvar::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if !running {
            self.ready.notify_all();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_callback(&self, callback: Option<EventCallback>) {
        self.inner.lock().unwrap().callback = callback;
    }

    pub fn take_callback(&self) -> Option<EventCallback> {
        self.inner.lock().unwrap().callback.take()
    }

    /// Enqueue, wake one waiter, then run the registered callback.
    pub fn push(&self, event: TouchEvent) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            inner.events.push_back(event.clone());
            if inner.events.len() > MAX_EVENTS {
                inner.events.pop_front();
            }
            inner.callback.clone()
        };
        self.ready.notify_one();
        if let Some(cb) = callback {
            cb(&event);
        }
    }

    /// Non-blocking removal of the head element.
    pub fn poll(&self) -> Option<TouchEvent> {
        self.inner.lock().unwrap().events.pop_front()
    }

    /// Block until an event arrives, the timeout elapses, or shutdown.
    ///
    /// `None` means "no deadline" and is served as a single wait capped at
    /// one second, so a stuck consumer always regains control.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<TouchEvent> {
        if !self.is_running() {
            return None;
        }
        let cap = timeout.unwrap_or(MAX_WAIT);

        let inner = self.inner.lock().unwrap();
        if cap.is_zero() {
            let mut inner = inner;
            return inner.events.pop_front();
        }
        let (mut inner, _timed_out) = self
            .ready
            .wait_timeout_while(inner, cap, |i| {
                i.events.is_empty() && self.running.load(Ordering::SeqCst)
            })
            .unwrap();
        if !self.is_running() {
            return None;
        }
        inner.events.pop_front()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().events.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn event(seq: i32) -> TouchEvent {
        TouchEvent {
            kind: EventKind::TouchMove,
            touch_count: 1,
            x: seq,
            y: 0,
            value: 0,
            timestamp_ms: i64::from(seq),
            touches: Vec::new(),
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = EventQueue::new();
        q.set_running(true);
        for i in 0..5 {
            q.push(event(i));
        }
        for i in 0..5 {
            assert_eq!(q.poll().unwrap().x, i);
        }
        assert!(q.poll().is_none());
    }

    #[test]
    fn overflow_drops_only_head_elements() {
        let q = EventQueue::new();
        q.set_running(true);
        for i in 0..(MAX_EVENTS as i32 + 8) {
            q.push(event(i));
        }
        assert_eq!(q.len(), MAX_EVENTS);
        assert_eq!(q.poll().unwrap().x, 8);
        let mut last = 8;
        while let Some(e) = q.poll() {
            assert!(e.x >= last);
            last = e.x;
        }
        assert_eq!(last, MAX_EVENTS as i32 + 7);
    }

    #[test]
    fn wait_times_out_with_no_event() {
        let q = EventQueue::new();
        q.set_running(true);
        let started = Instant::now();
        assert!(q.wait(Some(Duration::from_millis(50))).is_none());
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn blocking_wait_is_capped_for_liveness() {
        let q = EventQueue::new();
        q.set_running(true);
        let started = Instant::now();
        assert!(q.wait(None).is_none());
        assert!(started.elapsed() <= Duration::from_millis(1100));
    }

    #[test]
    fn shutdown_wakes_blocked_waiters() {
        let q = Arc::new(EventQueue::new());
        q.set_running(true);
        let waiter = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                let started = Instant::now();
                let got = q.wait(None);
                (got.is_none(), started.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        q.set_running(false);
        let (empty, elapsed) = waiter.join().unwrap();
        assert!(empty);
        assert!(elapsed <= Duration::from_millis(1100));
    }

    #[test]
    fn callback_sees_events_in_production_order() {
        let q = EventQueue::new();
        q.set_running(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        q.set_callback(Some(Arc::new(move |e: &TouchEvent| {
            sink.lock().unwrap().push(e.x);
        })));
        for i in 0..4 {
            q.push(event(i));
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn clear_drops_pending_events() {
        let q = EventQueue::new();
        q.set_running(true);
        q.push(event(1));
        q.push(event(2));
        q.clear();
        assert!(q.is_empty());
        assert!(q.poll().is_none());
    }
}

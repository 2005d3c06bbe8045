//! Synthetic touch injection.
//!
//! [`InputBridge`] wraps a platform [`InjectionCapability`] and adds the
//! composite gestures (swipe, long press) on top of single touch events.
//!
//! # Availability
//!
//! Whether the platform can inject at all is probed lazily on first use and
//! cached. Call [`InputBridge::invalidate`] when something that affects it
//! changes (e.g. an accessibility grant) to force a re-probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TetherError;
use crate::message::{Point, TouchAction};

/// Interval between interpolated moves of a swipe.
pub const SWIPE_STEP: Duration = Duration::from_millis(10);

const UNKNOWN: u8 = 0;
const AVAILABLE: u8 = 1;
const UNAVAILABLE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchEvent {
    pub at: Point,
    pub action: TouchAction,
}

impl TouchEvent {
    pub fn new(at: Point, action: TouchAction) -> Self {
        Self { at, action }
    }
}

/// The platform primitive that actually delivers input.
pub trait InjectionCapability: Send + Sync {
    /// Whether injection can work right now.
    fn probe(&self) -> bool;

    /// Deliver one event. `false` means the platform rejected it.
    fn inject(&self, event: TouchEvent) -> bool;
}

// ── InputBridge ──────────────────────────────────────────────────

pub struct InputBridge {
    capability: Arc<dyn InjectionCapability>,
    availability: AtomicU8,
}

impl InputBridge {
    pub fn new(capability: Arc<dyn InjectionCapability>) -> Self {
        Self {
            capability,
            availability: AtomicU8::new(UNKNOWN),
        }
    }

    pub fn is_available(&self) -> bool {
        match self.availability.load(Ordering::Acquire) {
            AVAILABLE => true,
            UNAVAILABLE => false,
            _ => {
                let available = self.capability.probe();
                let cached = if available { AVAILABLE } else { UNAVAILABLE };
                self.availability.store(cached, Ordering::Release);
                debug!(available, "probed input injection");
                available
            }
        }
    }

    /// Forget the cached probe result.
    pub fn invalidate(&self) {
        self.availability.store(UNKNOWN, Ordering::Release);
    }

    pub fn inject_touch(&self, at: Point, action: TouchAction) -> Result<(), TetherError> {
        if !self.is_available() {
            return Err(TetherError::InjectionUnavailable);
        }
        self.send(TouchEvent::new(at, action))
    }

    /// Down at `from`, evenly spaced moves every [`SWIPE_STEP`], Up at `to`.
    ///
    /// Stops at the first rejected event; events already delivered are not
    /// undone.
    pub async fn inject_swipe(
        &self,
        from: Point,
        to: Point,
        duration: Duration,
    ) -> Result<(), TetherError> {
        if !self.is_available() {
            return Err(TetherError::InjectionUnavailable);
        }

        let steps = swipe_steps(duration);
        self.send(TouchEvent::new(from, TouchAction::Down))?;
        for i in 1..steps {
            self.send(TouchEvent::new(
                interpolate(from, to, i, steps),
                TouchAction::Move,
            ))?;
            tokio::time::sleep(SWIPE_STEP).await;
        }
        self.send(TouchEvent::new(to, TouchAction::Up))
    }

    pub async fn inject_long_press(&self, at: Point, duration: Duration) -> Result<(), TetherError> {
        if !self.is_available() {
            return Err(TetherError::InjectionUnavailable);
        }
        self.send(TouchEvent::new(at, TouchAction::Down))?;
        tokio::time::sleep(duration).await;
        self.send(TouchEvent::new(at, TouchAction::Up))
    }

    fn send(&self, event: TouchEvent) -> Result<(), TetherError> {
        if self.capability.inject(event) {
            Ok(())
        } else {
            warn!(x = event.at.x, y = event.at.y, action = ?event.action, "touch injection rejected");
            Err(TetherError::InjectionFailed {
                x: event.at.x,
                y: event.at.y,
            })
        }
    }
}

fn swipe_steps(duration: Duration) -> u32 {
    let steps = duration.as_millis() / SWIPE_STEP.as_millis();
    u32::try_from(steps).unwrap_or(u32::MAX).max(1)
}

fn interpolate(from: Point, to: Point, step: u32, steps: u32) -> Point {
    let t = f64::from(step) / f64::from(steps);
    let lerp = |a: i32, b: i32| {
        let (a, b) = (f64::from(a), f64::from(b));
        (a + (b - a) * t)
            .round()
            .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
    };
    Point::new(lerp(from.x, to.x), lerp(from.y, to.y))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct Recorder {
        available: AtomicBool,
        probes: AtomicUsize,
        fail_after: Option<usize>,
        events: Mutex<Vec<TouchEvent>>,
    }

    impl Recorder {
        fn new(available: bool) -> Arc<Self> {
            Self::failing_after(available, None)
        }

        fn failing_after(available: bool, fail_after: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                available: AtomicBool::new(available),
                probes: AtomicUsize::new(0),
                fail_after,
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<TouchEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl InjectionCapability for Recorder {
        fn probe(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.available.load(Ordering::SeqCst)
        }

        fn inject(&self, event: TouchEvent) -> bool {
            let mut events = self.events.lock().unwrap();
            if self.fail_after.is_some_and(|n| events.len() >= n) {
                return false;
            }
            events.push(event);
            true
        }
    }

    #[test]
    fn availability_is_probed_once_and_cached() {
        let rec = Recorder::new(true);
        let bridge = InputBridge::new(rec.clone());
        assert!(bridge.is_available());
        assert!(bridge.is_available());
        assert_eq!(rec.probes.load(Ordering::SeqCst), 1);

        rec.available.store(false, Ordering::SeqCst);
        assert!(bridge.is_available());
        bridge.invalidate();
        assert!(!bridge.is_available());
        assert_eq!(rec.probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unavailable_never_touches_the_primitive() {
        let rec = Recorder::new(false);
        let bridge = InputBridge::new(rec.clone());
        assert!(matches!(
            bridge.inject_touch(Point::new(1, 2), TouchAction::Down),
            Err(TetherError::InjectionUnavailable)
        ));
        assert!(rec.events().is_empty());
    }

    #[test]
    fn rejected_touch_reports_coordinates() {
        let rec = Recorder::failing_after(true, Some(0));
        let bridge = InputBridge::new(rec);
        assert!(matches!(
            bridge.inject_touch(Point::new(7, 9), TouchAction::Up),
            Err(TetherError::InjectionFailed { x: 7, y: 9 })
        ));
    }

    #[tokio::test]
    async fn swipe_interpolates_between_endpoints() {
        let rec = Recorder::new(true);
        let bridge = InputBridge::new(rec.clone());
        bridge
            .inject_swipe(Point::new(0, 0), Point::new(100, 40), Duration::from_millis(50))
            .await
            .unwrap();

        let events = rec.events();
        // Down, four moves, Up.
        assert_eq!(events.len(), 6);
        assert_eq!(events[0], TouchEvent::new(Point::new(0, 0), TouchAction::Down));
        assert_eq!(events[1], TouchEvent::new(Point::new(20, 8), TouchAction::Move));
        assert_eq!(events[4], TouchEvent::new(Point::new(80, 32), TouchAction::Move));
        assert_eq!(events[5], TouchEvent::new(Point::new(100, 40), TouchAction::Up));
    }

    #[tokio::test]
    async fn short_swipe_is_down_then_up() {
        let rec = Recorder::new(true);
        let bridge = InputBridge::new(rec.clone());
        bridge
            .inject_swipe(Point::new(5, 5), Point::new(6, 6), Duration::ZERO)
            .await
            .unwrap();
        let actions: Vec<TouchAction> = rec.events().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![TouchAction::Down, TouchAction::Up]);
    }

    #[tokio::test]
    async fn swipe_stops_at_first_failure_without_rollback() {
        let rec = Recorder::failing_after(true, Some(3));
        let bridge = InputBridge::new(rec.clone());
        let err = bridge
            .inject_swipe(Point::new(0, 0), Point::new(100, 0), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::InjectionFailed { .. }));
        // Down + two moves were delivered and stay delivered.
        assert_eq!(rec.events().len(), 3);
    }

    #[tokio::test]
    async fn long_press_is_down_wait_up() {
        let rec = Recorder::new(true);
        let bridge = InputBridge::new(rec.clone());
        let started = std::time::Instant::now();
        bridge
            .inject_long_press(Point::new(3, 4), Duration::from_millis(30))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
        let actions: Vec<TouchAction> = rec.events().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![TouchAction::Down, TouchAction::Up]);
    }

    #[tokio::test]
    async fn swipe_across_the_full_coordinate_range() {
        let rec = Recorder::new(true);
        let bridge = InputBridge::new(rec.clone());
        let from = Point::new(i32::MIN, i32::MAX);
        let to = Point::new(i32::MAX, i32::MIN);
        bridge
            .inject_swipe(from, to, Duration::from_millis(40))
            .await
            .unwrap();

        let events = rec.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].at, from);
        assert_eq!(events[4].at, to);
        let xs: Vec<i32> = events.iter().map(|e| e.at.x).collect();
        assert!(xs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn interpolation_stays_in_range() {
        let from = Point::new(i32::MIN, 0);
        let to = Point::new(i32::MAX, 0);
        assert_eq!(interpolate(from, to, 0, 4), from);
        assert_eq!(interpolate(from, to, 4, 4), to);
        assert_eq!(interpolate(to, from, 4, 4), from);
    }

    #[test]
    fn step_count() {
        assert_eq!(swipe_steps(Duration::ZERO), 1);
        assert_eq!(swipe_steps(Duration::from_millis(9)), 1);
        assert_eq!(swipe_steps(Duration::from_millis(300)), 30);
    }
}

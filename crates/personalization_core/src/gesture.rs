//! crates/personalization_core/src/gesture.rs
//!
//! Turns a continuous drag signal into a discrete swipe decision.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::domain::SwipeAction;

pub const DEFAULT_SWIPE_THRESHOLD: f64 = 150.0;
/// Release velocity (px/s) that triggers a swipe regardless of distance.
pub const VELOCITY_THRESHOLD: f64 = 500.0;
pub const MAX_ROTATION_DEG: f64 = 25.0;
/// Offset at which the rotation reaches its limit.
const ROTATION_INPUT_RANGE: f64 = 200.0;
/// Only samples this recent contribute to the sampled velocity.
const VELOCITY_WINDOW: Duration = Duration::from_millis(100);
const MAX_SAMPLES: usize = 32;

//=========================================================================================
// Observable Drag Position
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DragPoint {
    pub x: f64,
    pub y: f64,
}

pub const ORIGIN: DragPoint = DragPoint { x: 0.0, y: 0.0 };

type PositionObserver = Arc<dyn Fn(DragPoint) + Send + Sync>;

/// The tracked card position: a current value plus change notification.
#[derive(Clone, Default)]
pub struct DragPosition {
    inner: Arc<Mutex<PositionInner>>,
}

#[derive(Default)]
struct PositionInner {
    value: DragPoint,
    next_id: u64,
    observers: Vec<(u64, PositionObserver)>,
}

/// Handle returned by [`DragPosition::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

impl DragPosition {
    fn inner(&self) -> MutexGuard<'_, PositionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> DragPoint {
        self.inner().value
    }

    pub fn set(&self, value: DragPoint) {
        let observers: Vec<PositionObserver> = {
            let mut inner = self.inner();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.observers.iter().map(|(_, o)| o.clone()).collect()
        };
        for observer in observers {
            observer(value);
        }
    }

    pub fn subscribe(&self, observer: impl Fn(DragPoint) + Send + Sync + 'static) -> ObserverId {
        let mut inner = self.inner();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.observers.push((id, Arc::new(observer)));
        ObserverId(id)
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.inner()
            .observers
            .retain(|(existing, _)| *existing != id.0);
    }
}

//=========================================================================================
// Decision Rule
//=========================================================================================

/// A completed swipe gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwipeDecision {
    pub action: SwipeAction,
    pub offset_x: f64,
    pub velocity_x: f64,
    /// Time between the start of the drag and its release.
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome {
    Swipe(SwipeDecision),
    /// Below both thresholds; the card springs back to the origin.
    Reset,
}

/// Classifies a release. Positive offsets are likes, negative offsets are passes.
pub fn classify(offset_x: f64, velocity_x: f64, threshold: f64) -> Option<SwipeAction> {
    if offset_x.abs() <= threshold && velocity_x.abs() <= VELOCITY_THRESHOLD {
        return None;
    }
    // A flick with no net displacement still has a direction.
    let direction = if offset_x != 0.0 { offset_x } else { velocity_x };
    if direction > 0.0 {
        Some(SwipeAction::Like)
    } else if direction < 0.0 {
        Some(SwipeAction::Pass)
    } else {
        None
    }
}

/// Card tilt in degrees for a horizontal offset.
pub fn rotation_for(offset_x: f64) -> f64 {
    (offset_x / ROTATION_INPUT_RANGE * MAX_ROTATION_DEG).clamp(-MAX_ROTATION_DEG, MAX_ROTATION_DEG)
}

//=========================================================================================
// Tracker
//=========================================================================================

pub struct GestureTracker {
    threshold: f64,
    position: DragPosition,
    drag_started_at: Option<Instant>,
    samples: VecDeque<(Instant, f64)>,
}

impl Default for GestureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SWIPE_THRESHOLD)
    }
}

impl GestureTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            position: DragPosition::default(),
            drag_started_at: None,
            samples: VecDeque::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The observable position the card is rendered from.
    pub fn position(&self) -> &DragPosition {
        &self.position
    }

    pub fn begin(&mut self, at: Instant) {
        self.drag_started_at = Some(at);
        self.samples.clear();
        self.samples.push_back((at, self.position.get().x));
    }

    /// Records the drag offset relative to the origin.
    pub fn drag(&mut self, offset: DragPoint, at: Instant) {
        if self.drag_started_at.is_none() {
            self.begin(at);
        }
        self.position.set(offset);
        self.samples.push_back((at, offset.x));
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    pub fn rotation(&self) -> f64 {
        rotation_for(self.position.get().x)
    }

    /// Horizontal velocity in px/s estimated from the recent drag samples.
    pub fn sample_velocity(&self) -> f64 {
        let Some(&(last_at, last_x)) = self.samples.back() else {
            return 0.0;
        };
        let first = self
            .samples
            .iter()
            .find(|(at, _)| last_at.duration_since(*at) <= VELOCITY_WINDOW)
            .copied();
        match first {
            Some((first_at, first_x)) => {
                let dt = last_at.duration_since(first_at).as_secs_f64();
                if dt > 0.0 {
                    (last_x - first_x) / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// Ends the drag. `velocity_x` is the release velocity reported by the input layer.
    pub fn release(&mut self, velocity_x: f64, at: Instant) -> GestureOutcome {
        let offset_x = self.position.get().x;
        let elapsed = self
            .drag_started_at
            .take()
            .map(|start| at.saturating_duration_since(start))
            .unwrap_or_default();

        match classify(offset_x, velocity_x, self.threshold) {
            Some(action) => GestureOutcome::Swipe(SwipeDecision {
                action,
                offset_x,
                velocity_x,
                elapsed,
            }),
            None => {
                self.position.set(ORIGIN);
                self.samples.clear();
                GestureOutcome::Reset
            }
        }
    }

    /// Runs a whole recorded drag: `samples` are offsets relative to `start`, the
    /// release happens at `release_after` with the velocity sampled from the drag.
    pub fn replay(
        &mut self,
        start: Instant,
        samples: &[(Duration, DragPoint)],
        release_after: Duration,
    ) -> GestureOutcome {
        self.reset();
        self.begin(start);
        for (after, offset) in samples {
            self.drag(*offset, start + *after);
        }
        let velocity_x = self.sample_velocity();
        self.release(velocity_x, start + release_after)
    }

    /// Puts the tracker back at the origin for the next card.
    pub fn reset(&mut self) {
        self.drag_started_at = None;
        self.samples.clear();
        self.position.set(ORIGIN);
    }
}

//! crates/personalization_core/src/haptics.rs
//!
//! Maps interaction classes to vibration patterns.

use std::sync::Arc;

use crate::domain::SwipeAction;
use crate::ports::Vibrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticKind {
    Light,
    Medium,
    Heavy,
    Selection,
    Success,
    Warning,
    Error,
}

impl HapticKind {
    /// Vibration pattern in milliseconds, alternating on and off.
    pub fn pattern(&self) -> &'static [u64] {
        match self {
            HapticKind::Light => &[10],
            HapticKind::Medium => &[20],
            HapticKind::Heavy => &[30],
            HapticKind::Selection => &[5],
            HapticKind::Success => &[10, 50, 20],
            HapticKind::Warning => &[30, 40, 30],
            HapticKind::Error => &[50, 30, 50, 30, 50],
        }
    }

    pub fn for_swipe(action: SwipeAction) -> Self {
        match action {
            SwipeAction::Like => HapticKind::Medium,
            SwipeAction::Pass => HapticKind::Light,
            SwipeAction::Save => HapticKind::Heavy,
        }
    }
}

#[derive(Clone)]
pub struct HapticNotifier {
    vibrator: Option<Arc<dyn Vibrator>>,
}

impl HapticNotifier {
    pub fn new(vibrator: Arc<dyn Vibrator>) -> Self {
        Self {
            vibrator: Some(vibrator),
        }
    }

    /// A notifier for hosts without a vibration device.
    pub fn disabled() -> Self {
        Self { vibrator: None }
    }

    /// Returns whether the device actually vibrated.
    pub fn notify(&self, kind: HapticKind) -> bool {
        match &self.vibrator {
            Some(vibrator) => vibrator.vibrate(kind.pattern()),
            None => false,
        }
    }

    pub fn swipe(&self, action: SwipeAction) -> bool {
        self.notify(HapticKind::for_swipe(action))
    }
}

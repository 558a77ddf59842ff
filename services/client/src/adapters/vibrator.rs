//! services/client/src/adapters/vibrator.rs
//!
//! A `Vibrator` for hosts without a haptic motor: patterns are written to the log.

use personalization_core::ports::Vibrator;
use tracing::debug;

#[derive(Clone, Debug, Default)]
pub struct TracingVibrator;

impl Vibrator for TracingVibrator {
    fn vibrate(&self, pattern: &[u64]) -> bool {
        debug!(?pattern, "Haptic pattern played.");
        true
    }
}

//! services/client/src/engine/device.rs
//!
//! Resolves the stable per-device identifier used to correlate sessions.

use chrono::Utc;
use personalization_core::FingerprintProvider;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

const FALLBACK_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// What consumers see while and after the identifier resolves.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceIdentityState {
    pub id: Option<String>,
    /// While `true` no session should be started.
    pub is_loading: bool,
    /// The provider failure that forced the fallback, kept for diagnostics only.
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct DeviceIdentity {
    state: watch::Receiver<DeviceIdentityState>,
}

impl DeviceIdentity {
    /// Starts resolving in the background and returns immediately.
    pub fn resolve(provider: Arc<dyn FingerprintProvider>) -> Self {
        let (tx, rx) = watch::channel(DeviceIdentityState {
            id: None,
            is_loading: true,
            error: None,
        });

        tokio::spawn(async move {
            let resolved = match provider.fingerprint().await {
                Ok(id) if !id.trim().is_empty() => {
                    info!("Device fingerprint resolved.");
                    DeviceIdentityState {
                        id: Some(id),
                        is_loading: false,
                        error: None,
                    }
                }
                Ok(_) => fallback_state("fingerprint provider returned an empty id".to_string()),
                Err(e) => fallback_state(e.to_string()),
            };
            let _ = tx.send(resolved);
        });

        Self { state: rx }
    }

    pub fn snapshot(&self) -> DeviceIdentityState {
        self.state.borrow().clone()
    }

    /// Waits until resolution finished and returns the identifier.
    pub async fn wait_ready(&self) -> String {
        let mut rx = self.state.clone();
        let resolved = rx.wait_for(|s| !s.is_loading).await.map(|s| s.id.clone());
        match resolved {
            Ok(Some(id)) => id,
            // The resolver task went away without publishing.
            _ => generate_fallback_id(),
        }
    }
}

fn fallback_state(reason: String) -> DeviceIdentityState {
    warn!("Device fingerprint unavailable, using a generated id: {}", reason);
    DeviceIdentityState {
        id: Some(generate_fallback_id()),
        is_loading: false,
        error: Some(reason),
    }
}

/// `fallback_<unix millis>_<random base36 suffix>`.
pub fn generate_fallback_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..FALLBACK_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("fallback_{}_{}", Utc::now().timestamp_millis(), suffix)
}

pub mod device;
pub mod prefetch;
pub mod protocol;
pub mod realtime;
pub mod session;

// Re-export the controller types so the binary can wire a session without
// reaching into each submodule.
pub use device::{DeviceIdentity, DeviceIdentityState};
pub use prefetch::MediaPrefetcher;
pub use protocol::{ClientFrame, ServerEnvelope};
pub use realtime::{ChannelConfig, ChannelState, ChannelStatus, RealtimeChannel};
pub use session::{DeckLoad, PersonalizationSession, PersonalizationStep, SessionSnapshot};

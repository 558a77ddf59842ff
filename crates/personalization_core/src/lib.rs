pub mod analytics;
pub mod domain;
pub mod gesture;
pub mod haptics;
pub mod ports;

pub use analytics::{AnalyticsBus, AnalyticsEvent, EventName, Payload, Subscription};
pub use domain::{
    ConfirmOutcome, Deck, DeckCard, PersonalizationPolicy, PersonalizationStatus, RevealItem,
    RevealResult, Session, SessionStatus, SwapOutcome, SwipeAck, SwipeAction, SwipeRecord, Vibe,
};
pub use gesture::{DragPoint, DragPosition, GestureOutcome, GestureTracker, SwipeDecision};
pub use haptics::{HapticKind, HapticNotifier};
pub use ports::{
    FingerprintProvider, FrameSink, FrameStream, ImageLoader, PersonalizationApi, PortError,
    PortResult, RealtimeConnection, RealtimeConnector, Vibrator,
};

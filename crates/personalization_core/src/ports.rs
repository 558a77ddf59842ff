//! crates/personalization_core/src/ports.rs
//!
//! Defines the service contracts (traits) the personalization engine depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete HTTP, WebSocket and device implementations.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{
    ConfirmOutcome, Deck, PersonalizationStatus, RevealResult, Session, SwapOutcome, SwipeAck,
    SwipeRecord,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (HTTP, sockets, devices).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Remote Personalization API
//=========================================================================================

/// The remote personalization service, addressed by itinerary token.
#[async_trait]
pub trait PersonalizationApi: Send + Sync {
    async fn status(&self, token: &str) -> PortResult<PersonalizationStatus>;

    async fn start(
        &self,
        token: &str,
        selected_vibes: &[String],
        device_id: Option<&str>,
    ) -> PortResult<Session>;

    async fn resume(&self, token: &str) -> PortResult<Session>;

    async fn deck(&self, token: &str) -> PortResult<Deck>;

    async fn swipe(&self, token: &str, record: &SwipeRecord) -> PortResult<SwipeAck>;

    async fn complete(&self, token: &str) -> PortResult<RevealResult>;

    async fn confirm(&self, token: &str, cart_item_ids: &[String]) -> PortResult<ConfirmOutcome>;

    async fn swap(
        &self,
        token: &str,
        cart_item_id: &str,
        new_activity_id: &str,
    ) -> PortResult<SwapOutcome>;
}

//=========================================================================================
// Device Ports
//=========================================================================================

#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// Loads an image into whatever cache backs the loader.
    async fn load(&self, url: &str) -> PortResult<()>;
}

#[async_trait]
pub trait FingerprintProvider: Send + Sync {
    /// Produces a stable identifier for this device or installation.
    async fn fingerprint(&self) -> PortResult<String>;
}

pub trait Vibrator: Send + Sync {
    /// Plays a vibration pattern in milliseconds. Returns `false` when unsupported.
    fn vibrate(&self, pattern: &[u64]) -> bool;
}

//=========================================================================================
// Realtime Transport Ports
//=========================================================================================

/// Inbound text frames. The stream ending means the transport closed.
pub type FrameStream = Pin<Box<dyn Stream<Item = PortResult<String>> + Send>>;

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> PortResult<()>;
    async fn close(&mut self) -> PortResult<()>;
}

/// An open duplex transport.
pub struct RealtimeConnection {
    pub sink: Box<dyn FrameSink>,
    pub frames: FrameStream,
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Opens a new transport to `url`.
    async fn connect(&self, url: &str) -> PortResult<RealtimeConnection>;
}

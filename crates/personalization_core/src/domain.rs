//! crates/personalization_core/src/domain.rs
//!
//! Defines the pure, core data structures for the personalization flow.
//! These structs are independent of any transport or serialization format.

use std::fmt;

/// The decision a traveler makes about a single deck card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwipeAction {
    Like,
    Pass,
    Save,
}

impl SwipeAction {
    /// The wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwipeAction::Like => "LIKE",
            SwipeAction::Pass => "PASS",
            SwipeAction::Save => "SAVE",
        }
    }
}

impl fmt::Display for SwipeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side lifecycle of a personalization session, mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Confirmed,
    Abandoned,
    /// A status this client does not know about yet.
    Unknown(String),
}

impl SessionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "active" => SessionStatus::Active,
            "completed" => SessionStatus::Completed,
            "confirmed" => SessionStatus::Confirmed,
            "abandoned" => SessionStatus::Abandoned,
            _ => SessionStatus::Unknown(raw.to_string()),
        }
    }
}

/// One personalization attempt against an itinerary.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub itinerary_token: String,
    /// Ordered and free of duplicates.
    pub selected_vibes: Vec<String>,
    pub device_id: Option<String>,
    pub status: SessionStatus,
}

/// A candidate activity offered in the deck. Never mutated once fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckCard {
    pub activity_id: String,
    pub name: String,
    pub short_description: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<u32>,
    pub location: Option<String>,
    pub price: f64,
    pub currency: String,
    pub hero_image_url: Option<String>,
    pub vibe_tags: Vec<String>,
    pub position: usize,
}

/// A resolved card, appended to the swipe log and never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct SwipeRecord {
    pub activity_id: String,
    pub action: SwipeAction,
    /// Zero-based deck index at the time the swipe was recorded.
    pub card_position: usize,
    pub seconds_viewed: u64,
    pub velocity: Option<f64>,
}

/// An activity as placed (or not placed) by the server-side fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealItem {
    pub cart_item_id: Option<String>,
    pub activity_id: String,
    pub name: String,
    pub day_number: Option<u32>,
    pub start_time: Option<String>,
    pub price: f64,
    pub fit_reason: Option<String>,
}

/// The outcome of fitting liked activities into the itinerary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RevealResult {
    pub fitted_items: Vec<RevealItem>,
    pub missed_items: Vec<RevealItem>,
    pub saved_items: Vec<RevealItem>,
    pub total_added_price: f64,
    pub currency: String,
}

/// An agency-defined taste tag offered on the vibe check screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Vibe {
    pub id: String,
    pub name: String,
    pub emoji: Option<String>,
}

/// Agency policy that bounds the flow.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonalizationPolicy {
    pub max_vibes: usize,
    pub deck_size: usize,
    pub allow_swaps: bool,
}

impl Default for PersonalizationPolicy {
    fn default() -> Self {
        Self {
            max_vibes: 3,
            deck_size: 10,
            allow_swaps: true,
        }
    }
}

/// Whether personalization is available for an itinerary.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonalizationStatus {
    pub enabled: bool,
    pub has_active_session: bool,
    pub session: Option<Session>,
    pub available_vibes: Vec<Vibe>,
    pub policy: PersonalizationPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deck {
    pub session_id: String,
    pub cards: Vec<DeckCard>,
    pub total_cards: usize,
    pub cards_remaining: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwipeAck {
    pub success: bool,
    pub message: String,
    pub cards_remaining: usize,
    pub cards_liked: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    pub success: bool,
    pub message: String,
    pub added_count: usize,
    pub itinerary_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapOutcome {
    pub success: bool,
    pub message: String,
    pub new_cart_item_id: Option<String>,
    pub fit_status: String,
    pub fit_reason: Option<String>,
    pub updated_reveal: RevealResult,
}

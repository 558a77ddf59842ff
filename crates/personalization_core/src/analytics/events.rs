//! Event names and the typed emitters that wrap `AnalyticsBus::track`.

use serde_json::{json, Value};

use super::{AnalyticsBus, Payload};
use crate::domain::{DeckCard, RevealResult, SwipeAction, SwipeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    SessionStart,
    SessionResume,
    VibeSelect,
    VibeDeselect,
    CardView,
    CardSwipe,
    CardButtonClick,
    CardExpand,
    DeckStart,
    DeckComplete,
    RevealView,
    SwapInitiate,
    SwapComplete,
    ConfirmClick,
    ConfirmSuccess,
    SessionAbandon,
    Error,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::SessionStart => "personalization_session_start",
            EventName::SessionResume => "personalization_session_resume",
            EventName::VibeSelect => "personalization_vibe_select",
            EventName::VibeDeselect => "personalization_vibe_deselect",
            EventName::CardView => "personalization_card_view",
            EventName::CardSwipe => "personalization_card_swipe",
            EventName::CardButtonClick => "personalization_card_button_click",
            EventName::CardExpand => "personalization_card_expand",
            EventName::DeckStart => "personalization_deck_start",
            EventName::DeckComplete => "personalization_deck_complete",
            EventName::RevealView => "personalization_reveal_view",
            EventName::SwapInitiate => "personalization_swap_initiate",
            EventName::SwapComplete => "personalization_swap_complete",
            EventName::ConfirmClick => "personalization_confirm_click",
            EventName::ConfirmSuccess => "personalization_confirm_success",
            EventName::SessionAbandon => "personalization_session_abandon",
            EventName::Error => "personalization_error",
        }
    }
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

impl AnalyticsBus {
    pub fn track_session_start(&self, session_id: &str, vibes: &[String], device_id: Option<&str>) {
        self.reset_session();
        self.mark_session_start();
        self.track(
            EventName::SessionStart,
            into_payload(json!({
                "session_id": session_id,
                "vibes": vibes,
                "vibe_count": vibes.len(),
                "device_id": device_id,
            })),
        );
    }

    pub fn track_session_resume(&self, session_id: &str, cards_swiped: usize) {
        self.mark_session_start();
        self.track(
            EventName::SessionResume,
            into_payload(json!({ "session_id": session_id, "cards_swiped": cards_swiped })),
        );
    }

    pub fn track_vibe_select(&self, vibe: &str, selected_count: usize) {
        self.track(
            EventName::VibeSelect,
            into_payload(json!({ "vibe": vibe, "selected_count": selected_count })),
        );
    }

    pub fn track_vibe_deselect(&self, vibe: &str, selected_count: usize) {
        self.track(
            EventName::VibeDeselect,
            into_payload(json!({ "vibe": vibe, "selected_count": selected_count })),
        );
    }

    pub fn track_card_view(&self, card: &DeckCard) {
        self.track(
            EventName::CardView,
            into_payload(json!({
                "activity_id": card.activity_id,
                "activity_name": card.name,
                "card_position": card.position,
                "vibe_tags": card.vibe_tags,
            })),
        );
    }

    pub fn track_card_swipe(&self, record: &SwipeRecord) {
        self.track(
            EventName::CardSwipe,
            into_payload(json!({
                "activity_id": record.activity_id,
                "action": record.action.as_str(),
                "card_position": record.card_position,
                "seconds_viewed": record.seconds_viewed,
                "velocity": record.velocity,
            })),
        );
    }

    pub fn track_card_button_click(&self, activity_id: &str, action: SwipeAction) {
        self.track(
            EventName::CardButtonClick,
            into_payload(json!({ "activity_id": activity_id, "action": action.as_str() })),
        );
    }

    pub fn track_card_expand(&self, activity_id: &str, card_position: usize) {
        self.track(
            EventName::CardExpand,
            into_payload(json!({ "activity_id": activity_id, "card_position": card_position })),
        );
    }

    pub fn track_deck_start(&self, session_id: &str, total_cards: usize) {
        self.track(
            EventName::DeckStart,
            into_payload(json!({ "session_id": session_id, "total_cards": total_cards })),
        );
    }

    pub fn track_deck_complete(&self, session_id: &str, swipes: &[SwipeRecord]) {
        let count = |action: SwipeAction| swipes.iter().filter(|s| s.action == action).count();
        self.track(
            EventName::DeckComplete,
            into_payload(json!({
                "session_id": session_id,
                "total_swiped": swipes.len(),
                "liked": count(SwipeAction::Like),
                "passed": count(SwipeAction::Pass),
                "saved": count(SwipeAction::Save),
            })),
        );
    }

    pub fn track_reveal_view(&self, session_id: &str, reveal: &RevealResult) {
        self.track(
            EventName::RevealView,
            into_payload(json!({
                "session_id": session_id,
                "fitted_count": reveal.fitted_items.len(),
                "missed_count": reveal.missed_items.len(),
                "saved_count": reveal.saved_items.len(),
                "total_added_price": reveal.total_added_price,
                "currency": reveal.currency,
            })),
        );
    }

    pub fn track_swap_initiate(&self, session_id: &str, cart_item_id: &str, new_activity_id: &str) {
        self.track(
            EventName::SwapInitiate,
            into_payload(json!({
                "session_id": session_id,
                "cart_item_id": cart_item_id,
                "new_activity_id": new_activity_id,
            })),
        );
    }

    pub fn track_swap_complete(
        &self,
        session_id: &str,
        new_cart_item_id: Option<&str>,
        fit_status: &str,
    ) {
        self.track(
            EventName::SwapComplete,
            into_payload(json!({
                "session_id": session_id,
                "new_cart_item_id": new_cart_item_id,
                "fit_status": fit_status,
            })),
        );
    }

    pub fn track_confirm_click(&self, session_id: &str, item_count: usize) {
        self.track(
            EventName::ConfirmClick,
            into_payload(json!({ "session_id": session_id, "item_count": item_count })),
        );
    }

    pub fn track_confirm_success(
        &self,
        session_id: &str,
        added_count: usize,
        itinerary_id: Option<&str>,
    ) {
        self.track(
            EventName::ConfirmSuccess,
            into_payload(json!({
                "session_id": session_id,
                "added_count": added_count,
                "itinerary_id": itinerary_id,
            })),
        );
    }

    pub fn track_session_abandon(&self, session_id: Option<&str>, step: &str, cards_swiped: usize) {
        self.track(
            EventName::SessionAbandon,
            into_payload(json!({
                "session_id": session_id,
                "step": step,
                "cards_swiped": cards_swiped,
            })),
        );
    }

    pub fn track_error(&self, operation: &str, message: &str) {
        self.track(
            EventName::Error,
            into_payload(json!({ "operation": operation, "message": message })),
        );
    }
}

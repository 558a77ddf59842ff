//! services/client/src/adapters/http_api.rs
//!
//! This module contains the adapter for the remote personalization REST API.
//! It implements the `PersonalizationApi` port from the `core` crate.
//!
//! Wire payloads are camelCase JSON. They are decoded into private record structs
//! and converted into the pure domain types with `to_domain`, so serde never leaks
//! into the core crate.

use async_trait::async_trait;
use personalization_core::domain::{
    ConfirmOutcome, Deck, DeckCard, PersonalizationPolicy, PersonalizationStatus, RevealItem,
    RevealResult, Session, SessionStatus, SwapOutcome, SwipeAck, SwipeRecord, Vibe,
};
use personalization_core::ports::{PersonalizationApi, PortError, PortResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

//=========================================================================================
// "Impure" Wire Record Structs
//=========================================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    id: String,
    #[serde(default)]
    itinerary_token: Option<String>,
    #[serde(default)]
    selected_vibes: Vec<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    status: String,
}

impl SessionRecord {
    fn to_domain(self, token: &str) -> Session {
        Session {
            id: self.id,
            itinerary_token: self.itinerary_token.unwrap_or_else(|| token.to_string()),
            selected_vibes: self.selected_vibes,
            device_id: self.device_id,
            status: SessionStatus::parse(&self.status),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VibeRecord {
    id: String,
    name: String,
    #[serde(default)]
    emoji: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRecord {
    max_vibes: Option<usize>,
    deck_size: Option<usize>,
    allow_swaps: Option<bool>,
}

impl PolicyRecord {
    fn to_domain(self) -> PersonalizationPolicy {
        let defaults = PersonalizationPolicy::default();
        PersonalizationPolicy {
            max_vibes: self.max_vibes.unwrap_or(defaults.max_vibes),
            deck_size: self.deck_size.unwrap_or(defaults.deck_size),
            allow_swaps: self.allow_swaps.unwrap_or(defaults.allow_swaps),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRecord {
    enabled: bool,
    #[serde(default)]
    has_active_session: bool,
    #[serde(default)]
    session: Option<SessionRecord>,
    #[serde(default)]
    available_vibes: Vec<VibeRecord>,
    #[serde(default)]
    policy: Option<PolicyRecord>,
}

impl StatusRecord {
    fn to_domain(self, token: &str) -> PersonalizationStatus {
        PersonalizationStatus {
            enabled: self.enabled,
            has_active_session: self.has_active_session,
            session: self.session.map(|s| s.to_domain(token)),
            available_vibes: self
                .available_vibes
                .into_iter()
                .map(|v| Vibe {
                    id: v.id,
                    name: v.name,
                    emoji: v.emoji,
                })
                .collect(),
            policy: self.policy.map(PolicyRecord::to_domain).unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardRecord {
    activity_id: String,
    name: String,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    hero_image_url: Option<String>,
    #[serde(default)]
    vibe_tags: Vec<String>,
    #[serde(default)]
    position: Option<usize>,
}

impl CardRecord {
    fn to_domain(self, index: usize) -> DeckCard {
        DeckCard {
            activity_id: self.activity_id,
            name: self.name,
            short_description: self.short_description,
            description: self.description,
            duration_minutes: self.duration_minutes,
            location: self.location,
            price: self.price,
            currency: self.currency,
            hero_image_url: self.hero_image_url,
            vibe_tags: self.vibe_tags,
            position: self.position.unwrap_or(index),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeckRecord {
    session_id: String,
    #[serde(default)]
    cards: Vec<CardRecord>,
    total_cards: Option<usize>,
    cards_remaining: Option<usize>,
}

impl DeckRecord {
    fn to_domain(self) -> Deck {
        let cards: Vec<DeckCard> = self
            .cards
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.to_domain(i))
            .collect();
        Deck {
            session_id: self.session_id,
            total_cards: self.total_cards.unwrap_or(cards.len()),
            cards_remaining: self.cards_remaining.unwrap_or(cards.len()),
            cards,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwipeAckRecord {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cards_remaining: usize,
    #[serde(default)]
    cards_liked: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevealItemRecord {
    #[serde(default)]
    cart_item_id: Option<String>,
    activity_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    day_number: Option<u32>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    fit_reason: Option<String>,
}

impl RevealItemRecord {
    fn to_domain(self) -> RevealItem {
        RevealItem {
            cart_item_id: self.cart_item_id,
            activity_id: self.activity_id,
            name: self.name,
            day_number: self.day_number,
            start_time: self.start_time,
            price: self.price,
            fit_reason: self.fit_reason,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevealRecord {
    #[serde(default)]
    fitted_items: Vec<RevealItemRecord>,
    #[serde(default)]
    missed_items: Vec<RevealItemRecord>,
    #[serde(default)]
    saved_items: Vec<RevealItemRecord>,
    #[serde(default)]
    total_added_price: f64,
    #[serde(default)]
    currency: String,
}

impl RevealRecord {
    fn to_domain(self) -> RevealResult {
        let items = |records: Vec<RevealItemRecord>| {
            records
                .into_iter()
                .map(RevealItemRecord::to_domain)
                .collect::<Vec<_>>()
        };
        RevealResult {
            fitted_items: items(self.fitted_items),
            missed_items: items(self.missed_items),
            saved_items: items(self.saved_items),
            total_added_price: self.total_added_price,
            currency: self.currency,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRecord {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    added_count: usize,
    #[serde(default)]
    itinerary_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapRecord {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    new_cart_item_id: Option<String>,
    #[serde(default)]
    fit_status: String,
    #[serde(default)]
    fit_reason: Option<String>,
    #[serde(default)]
    updated_reveal: Option<RevealRecord>,
}

//=========================================================================================
// Request Bodies
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    selected_vibes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwipeRequest<'a> {
    activity_id: &'a str,
    action: &'static str,
    seconds_viewed: u64,
    card_position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    swipe_velocity: Option<f64>,
}

impl<'a> From<&'a SwipeRecord> for SwipeRequest<'a> {
    fn from(record: &'a SwipeRecord) -> Self {
        Self {
            activity_id: &record.activity_id,
            action: record.action.as_str(),
            seconds_viewed: record.seconds_viewed,
            card_position: record.card_position,
            swipe_velocity: record.velocity,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest<'a> {
    cart_item_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    cart_item_id: &'a str,
    new_activity_id: &'a str,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `PersonalizationApi` port over HTTP.
#[derive(Clone)]
pub struct HttpPersonalizationApi {
    client: Client,
    base_url: String,
}

impl HttpPersonalizationApi {
    /// Creates a new `HttpPersonalizationApi` rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, token: &str, operation: &str) -> String {
        format!("{}/personalization/{}/{}", self.base_url, token, operation)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, operation: &str) -> PortResult<T> {
        let request_id = Uuid::new_v4().to_string();
        debug!(operation, request_id = %request_id, "Calling personalization API.");
        let response = request
            .header("X-Request-Id", &request_id)
            .send()
            .await
            .map_err(|e| PortError::Network(e.to_string()))?;
        decode(response, operation).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response, operation: &str) -> PortResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| PortError::InvalidResponse(e.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    warn!(operation, status = status.as_u16(), "Personalization API call failed.");
    Err(map_status(status, &body))
}

/// Maps a non-success HTTP status (and its body, if any) to a port error.
fn map_status(status: StatusCode, body: &str) -> PortError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        StatusCode::NOT_FOUND => PortError::NotFound(
            error_message(body).unwrap_or_else(|| "resource not found".to_string()),
        ),
        _ => PortError::Rejected(
            error_message(body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        ),
    }
}

fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

//=========================================================================================
// `PersonalizationApi` Trait Implementation
//=========================================================================================

#[async_trait]
impl PersonalizationApi for HttpPersonalizationApi {
    async fn status(&self, token: &str) -> PortResult<PersonalizationStatus> {
        let request = self.client.get(self.url(token, "status"));
        let record: StatusRecord = self.send(request, "status").await?;
        Ok(record.to_domain(token))
    }

    async fn start(
        &self,
        token: &str,
        selected_vibes: &[String],
        device_id: Option<&str>,
    ) -> PortResult<Session> {
        let body = StartRequest {
            selected_vibes,
            device_id,
        };
        let request = self.client.post(self.url(token, "start")).json(&body);
        let record: SessionRecord = self.send(request, "start").await?;
        Ok(record.to_domain(token))
    }

    async fn resume(&self, token: &str) -> PortResult<Session> {
        let request = self.client.get(self.url(token, "resume"));
        let record: SessionRecord = self.send(request, "resume").await?;
        Ok(record.to_domain(token))
    }

    async fn deck(&self, token: &str) -> PortResult<Deck> {
        let request = self.client.get(self.url(token, "deck"));
        let record: DeckRecord = self.send(request, "deck").await?;
        Ok(record.to_domain())
    }

    async fn swipe(&self, token: &str, record: &SwipeRecord) -> PortResult<SwipeAck> {
        let request = self
            .client
            .post(self.url(token, "swipe"))
            .json(&SwipeRequest::from(record));
        let ack: SwipeAckRecord = self.send(request, "swipe").await?;
        Ok(SwipeAck {
            success: ack.success,
            message: ack.message,
            cards_remaining: ack.cards_remaining,
            cards_liked: ack.cards_liked,
        })
    }

    async fn complete(&self, token: &str) -> PortResult<RevealResult> {
        let request = self.client.post(self.url(token, "complete"));
        let record: RevealRecord = self.send(request, "complete").await?;
        Ok(record.to_domain())
    }

    async fn confirm(&self, token: &str, cart_item_ids: &[String]) -> PortResult<ConfirmOutcome> {
        let request = self
            .client
            .post(self.url(token, "confirm"))
            .json(&ConfirmRequest { cart_item_ids });
        let record: ConfirmRecord = self.send(request, "confirm").await?;
        Ok(ConfirmOutcome {
            success: record.success,
            message: record.message,
            added_count: record.added_count,
            itinerary_id: record.itinerary_id,
        })
    }

    async fn swap(
        &self,
        token: &str,
        cart_item_id: &str,
        new_activity_id: &str,
    ) -> PortResult<SwapOutcome> {
        let request = self.client.post(self.url(token, "swap")).json(&SwapRequest {
            cart_item_id,
            new_activity_id,
        });
        let record: SwapRecord = self.send(request, "swap").await?;
        Ok(SwapOutcome {
            success: record.success,
            message: record.message,
            new_cart_item_id: record.new_cart_item_id,
            fit_status: record.fit_status,
            fit_reason: record.fit_reason,
            updated_reveal: record
                .updated_reveal
                .map(RevealRecord::to_domain)
                .unwrap_or_default(),
        })
    }
}

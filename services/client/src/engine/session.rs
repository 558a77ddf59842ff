//! services/client/src/engine/session.rs
//!
//! The personalization session state machine.
//!
//! One `PersonalizationSession` drives a traveler through
//! vibe check → deck → loading → reveal → confirmed against the remote API.
//! Local state is kept behind a mutex that is never held across a remote call, so
//! every transition between two suspension points is atomic.

use personalization_core::{
    AnalyticsBus, ConfirmOutcome, DeckCard, GestureOutcome, HapticKind, HapticNotifier,
    PersonalizationApi, PersonalizationStatus, RevealResult, Session, SwapOutcome, SwipeAction,
    SwipeRecord,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::prefetch::MediaPrefetcher;
use crate::error::{SessionError, SessionResult};

const DEFAULT_MAX_VIBES: usize = 3;

//=========================================================================================
// Public State Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonalizationStep {
    Entry,
    VibeCheck,
    Deck,
    Loading,
    Reveal,
    Confirmed,
}

impl PersonalizationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalizationStep::Entry => "entry",
            PersonalizationStep::VibeCheck => "vibe_check",
            PersonalizationStep::Deck => "deck",
            PersonalizationStep::Loading => "loading",
            PersonalizationStep::Reveal => "reveal",
            PersonalizationStep::Confirmed => "confirmed",
        }
    }
}

/// Result of `load_deck`. An empty deck is a normal outcome the host renders as
/// "no activities", not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckLoad {
    Ready { total_cards: usize },
    Empty,
}

/// An owned copy of everything a host renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub step: PersonalizationStep,
    pub status: Option<PersonalizationStatus>,
    pub session: Option<Session>,
    pub selected_vibes: Vec<String>,
    pub deck_len: usize,
    pub current_card_index: usize,
    pub current_card: Option<DeckCard>,
    pub swipe_log: Vec<SwipeRecord>,
    pub reveal: Option<RevealResult>,
    pub error: Option<SessionError>,
    pub is_starting: bool,
    pub is_completing: bool,
}

//=========================================================================================
// Internal State
//=========================================================================================

struct SessionState {
    step: PersonalizationStep,
    status: Option<PersonalizationStatus>,
    selected_vibes: Vec<String>,
    session: Option<Session>,
    deck: Vec<DeckCard>,
    deck_loaded: bool,
    swipe_log: Vec<SwipeRecord>,
    reveal: Option<RevealResult>,
    error: Option<SessionError>,
    /// When the current card became current.
    card_shown_at: Instant,
    prefetcher: Option<MediaPrefetcher>,
}

/// Single-flight flag. Set on acquire, cleared when dropped, whatever the outcome.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn dedup_preserving_order(vibes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(vibes.len());
    for vibe in vibes {
        if !out.contains(vibe) {
            out.push(vibe.clone());
        }
    }
    out
}

//=========================================================================================
// The Session Controller
//=========================================================================================

pub struct PersonalizationSession {
    token: String,
    api: Arc<dyn PersonalizationApi>,
    analytics: AnalyticsBus,
    haptics: HapticNotifier,
    starting: AtomicBool,
    completing: AtomicBool,
    state: Mutex<SessionState>,
}

impl PersonalizationSession {
    /// Creates a controller for one personalization attempt on `token`.
    ///
    /// Analytics are always emitted; a bus without listeners is the "disabled" case.
    pub fn new(token: impl Into<String>, api: Arc<dyn PersonalizationApi>, analytics: AnalyticsBus) -> Self {
        Self {
            token: token.into(),
            api,
            analytics,
            haptics: HapticNotifier::disabled(),
            starting: AtomicBool::new(false),
            completing: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                step: PersonalizationStep::Entry,
                status: None,
                selected_vibes: Vec::new(),
                session: None,
                deck: Vec::new(),
                deck_loaded: false,
                swipe_log: Vec::new(),
                reveal: None,
                error: None,
                card_shown_at: Instant::now(),
                prefetcher: None,
            }),
        }
    }

    pub fn with_haptics(mut self, haptics: HapticNotifier) -> Self {
        self.haptics = haptics;
        self
    }

    pub fn with_prefetcher(self, prefetcher: MediaPrefetcher) -> Self {
        self.state().prefetcher = Some(prefetcher);
        self
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a failure in the error slot and the analytics stream, then hands it back.
    fn fail(&self, operation: &'static str, error: SessionError) -> SessionError {
        error!(operation, "Personalization operation failed: {}", error);
        self.state().error = Some(error.clone());
        self.analytics.track_error(operation, &error.to_string());
        self.haptics.notify(HapticKind::Error);
        error
    }

    fn require_step(&self, operation: &'static str, expected: PersonalizationStep) -> SessionResult<()> {
        let actual = self.state().step;
        if actual == expected {
            Ok(())
        } else {
            Err(self.fail(operation, SessionError::InvalidStep { expected, actual }))
        }
    }

    /// The held session, checked against `session_id` when one is given.
    fn active_session(&self, session_id: Option<&str>) -> SessionResult<Session> {
        let state = self.state();
        match (&state.session, session_id) {
            (None, _) => Err(SessionError::NoActiveSession),
            (Some(session), Some(requested)) if session.id != requested => {
                Err(SessionError::SessionMismatch {
                    active: session.id.clone(),
                    requested: requested.to_string(),
                })
            }
            (Some(session), _) => Ok(session.clone()),
        }
    }

    //-------------------------------------------------------------------------------------
    // Reads
    //-------------------------------------------------------------------------------------

    pub fn step(&self) -> PersonalizationStep {
        self.state().step
    }

    pub fn session(&self) -> Option<Session> {
        self.state().session.clone()
    }

    pub fn error(&self) -> Option<SessionError> {
        self.state().error.clone()
    }

    pub fn clear_error(&self) {
        self.state().error = None;
    }

    pub fn reveal(&self) -> Option<RevealResult> {
        self.state().reveal.clone()
    }

    pub fn selected_vibes(&self) -> Vec<String> {
        self.state().selected_vibes.clone()
    }

    pub fn swipe_log(&self) -> Vec<SwipeRecord> {
        self.state().swipe_log.clone()
    }

    /// Always equal to the number of recorded swipes.
    pub fn current_card_index(&self) -> usize {
        self.state().swipe_log.len()
    }

    /// The card at the current index, or `None` once the deck is exhausted.
    pub fn get_current_card(&self) -> Option<DeckCard> {
        let state = self.state();
        state.deck.get(state.swipe_log.len()).cloned()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        let index = state.swipe_log.len();
        SessionSnapshot {
            step: state.step,
            status: state.status.clone(),
            session: state.session.clone(),
            selected_vibes: state.selected_vibes.clone(),
            deck_len: state.deck.len(),
            current_card_index: index,
            current_card: state.deck.get(index).cloned(),
            swipe_log: state.swipe_log.clone(),
            reveal: state.reveal.clone(),
            error: state.error.clone(),
            is_starting: self.starting.load(Ordering::Acquire),
            is_completing: self.completing.load(Ordering::Acquire),
        }
    }

    //-------------------------------------------------------------------------------------
    // Entry and Vibe Check
    //-------------------------------------------------------------------------------------

    /// Fetches availability, vibes and policy for the itinerary.
    pub async fn load_status(&self) -> SessionResult<PersonalizationStatus> {
        match self.api.status(&self.token).await {
            Ok(status) => {
                debug!(
                    enabled = status.enabled,
                    has_active_session = status.has_active_session,
                    "Personalization status loaded."
                );
                self.state().status = Some(status.clone());
                Ok(status)
            }
            Err(e) => Err(self.fail("status", e.into())),
        }
    }

    /// Moves from the entry screen to the vibe check.
    pub fn begin(&self) -> PersonalizationStep {
        let mut state = self.state();
        if state.step == PersonalizationStep::Entry {
            state.step = PersonalizationStep::VibeCheck;
        }
        state.step
    }

    /// Replaces the selection.
    ///
    /// Callers are expected to pass between one and `max_vibes` entries; the
    /// selection is not validated here. Duplicates are dropped, order is kept.
    pub fn set_selected_vibes(&self, vibes: &[String]) {
        self.state().selected_vibes = dedup_preserving_order(vibes);
    }

    /// Selects or deselects one vibe. Returns whether it is selected afterwards.
    ///
    /// A selection beyond the policy limit is ignored.
    pub fn toggle_vibe(&self, vibe: &str) -> bool {
        let (selected, count) = {
            let mut state = self.state();
            let max_vibes = state
                .status
                .as_ref()
                .map(|s| s.policy.max_vibes)
                .unwrap_or(DEFAULT_MAX_VIBES);

            if let Some(pos) = state.selected_vibes.iter().position(|v| v == vibe) {
                state.selected_vibes.remove(pos);
                (false, state.selected_vibes.len())
            } else if state.selected_vibes.len() >= max_vibes {
                debug!(vibe, max_vibes, "Vibe limit reached, selection ignored.");
                return false;
            } else {
                state.selected_vibes.push(vibe.to_string());
                (true, state.selected_vibes.len())
            }
        };

        self.haptics.notify(HapticKind::Selection);
        if selected {
            self.analytics.track_vibe_select(vibe, count);
        } else {
            self.analytics.track_vibe_deselect(vibe, count);
        }
        selected
    }

    //-------------------------------------------------------------------------------------
    // Session Lifecycle
    //-------------------------------------------------------------------------------------

    /// Starts the remote session and advances to the deck.
    ///
    /// Returns `Ok(None)` without calling the API when a start is already in flight
    /// or a session is already held.
    pub async fn start_session(
        &self,
        device_id: Option<&str>,
        selected_vibes: &[String],
    ) -> SessionResult<Option<Session>> {
        let Some(_flight) = FlightGuard::acquire(&self.starting) else {
            debug!("Session start already in flight, ignoring duplicate.");
            return Ok(None);
        };

        let vibes = dedup_preserving_order(selected_vibes);
        {
            let mut state = self.state();
            if state.session.is_some() {
                warn!("A personalization session is already active, ignoring start.");
                return Ok(None);
            }
            if state.status.as_ref().is_some_and(|s| !s.enabled) {
                drop(state);
                return Err(self.fail("start", SessionError::Disabled));
            }
            state.selected_vibes = vibes.clone();
            state.error = None;
        }

        match self.api.start(&self.token, &vibes, device_id).await {
            Ok(session) => {
                info!(session_id = %session.id, "Personalization session started.");
                {
                    let mut state = self.state();
                    state.session = Some(session.clone());
                    state.step = PersonalizationStep::Deck;
                }
                self.analytics.track_session_start(&session.id, &vibes, device_id);
                self.haptics.notify(HapticKind::Success);
                Ok(Some(session))
            }
            Err(e) => Err(self.fail("start", e.into())),
        }
    }

    /// Adopts the server's active session instead of starting a new one.
    pub async fn resume_session(&self) -> SessionResult<Option<Session>> {
        let Some(_flight) = FlightGuard::acquire(&self.starting) else {
            return Ok(None);
        };
        if self.state().session.is_some() {
            return Ok(None);
        }

        match self.api.resume(&self.token).await {
            Ok(session) => {
                info!(session_id = %session.id, "Personalization session resumed.");
                let swiped = {
                    let mut state = self.state();
                    state.selected_vibes = session.selected_vibes.clone();
                    state.session = Some(session.clone());
                    state.step = PersonalizationStep::Deck;
                    state.error = None;
                    state.swipe_log.len()
                };
                self.analytics.track_session_resume(&session.id, swiped);
                Ok(Some(session))
            }
            Err(e) => Err(self.fail("resume", e.into())),
        }
    }

    /// Fetches the deck once per session. Later calls return the cached outcome.
    pub async fn load_deck(&self, session_id: &str) -> SessionResult<DeckLoad> {
        let session = self
            .active_session(Some(session_id))
            .map_err(|e| self.fail("deck", e))?;

        {
            let state = self.state();
            if state.deck_loaded {
                return Ok(match state.deck.len() {
                    0 => DeckLoad::Empty,
                    total_cards => DeckLoad::Ready { total_cards },
                });
            }
        }

        let deck = match self.api.deck(&self.token).await {
            Ok(deck) => deck,
            Err(e) => return Err(self.fail("deck", e.into())),
        };

        let first_card = {
            let mut state = self.state();
            state.deck = deck.cards;
            state.deck_loaded = true;
            state.card_shown_at = Instant::now();
            let index = state.swipe_log.len();
            let SessionState {
                prefetcher, deck, ..
            } = &mut *state;
            if let Some(prefetcher) = prefetcher.as_mut() {
                prefetcher.reset();
                prefetcher.on_index_change(deck, index);
            }
            state.deck.get(index).cloned()
        };

        let total_cards = self.state().deck.len();
        info!(session_id = %session.id, total_cards, "Deck loaded.");
        self.analytics.track_deck_start(&session.id, total_cards);

        match first_card {
            Some(card) => {
                self.analytics.track_card_view(&card);
                Ok(DeckLoad::Ready { total_cards })
            }
            None => {
                info!(session_id = %session.id, "Deck is empty, nothing to personalize.");
                Ok(DeckLoad::Empty)
            }
        }
    }

    /// Resolves the current card.
    ///
    /// The record is appended to the log before the remote call, so rapid swipes keep
    /// their order whatever order the acknowledgements arrive in. A failed call does
    /// not remove the record; the failure is reported and returned.
    pub async fn record_swipe(
        &self,
        action: SwipeAction,
        velocity: Option<f64>,
    ) -> SessionResult<SwipeRecord> {
        let appended = {
            let mut state = self.state();
            let index = state.swipe_log.len();
            match (state.session.clone(), state.deck.get(index).cloned()) {
                (None, _) => Err(SessionError::NoActiveSession),
                (Some(_), None) => Err(SessionError::DeckExhausted),
                (Some(session), Some(card)) => {
                    let now = Instant::now();
                    let viewed = now.saturating_duration_since(state.card_shown_at);
                    let record = SwipeRecord {
                        activity_id: card.activity_id.clone(),
                        action,
                        card_position: index,
                        seconds_viewed: viewed.as_secs_f64().round() as u64,
                        velocity,
                    };
                    state.swipe_log.push(record.clone());
                    state.card_shown_at = now;

                    let next_index = index + 1;
                    let SessionState {
                        prefetcher, deck, ..
                    } = &mut *state;
                    if let Some(prefetcher) = prefetcher.as_mut() {
                        prefetcher.on_index_change(deck, next_index);
                    }
                    let next_card = state.deck.get(next_index).cloned();
                    let completed_log = next_card.is_none().then(|| state.swipe_log.clone());
                    Ok((session, record, next_card, completed_log))
                }
            }
        };
        let (session, record, next_card, completed_log) =
            appended.map_err(|e| self.fail("swipe", e))?;

        self.haptics.swipe(action);
        self.analytics.track_card_swipe(&record);
        if let Some(card) = next_card {
            self.analytics.track_card_view(&card);
        }
        if let Some(log) = completed_log {
            info!(session_id = %session.id, swiped = log.len(), "Deck complete.");
            self.analytics.track_deck_complete(&session.id, &log);
        }

        match self.api.swipe(&self.token, &record).await {
            Ok(ack) if ack.success => {
                debug!(
                    card_position = record.card_position,
                    cards_remaining = ack.cards_remaining,
                    "Swipe acknowledged."
                );
                Ok(record)
            }
            Ok(ack) => Err(self.fail("swipe", SessionError::Rejected(ack.message))),
            Err(e) => Err(self.fail("swipe", e.into())),
        }
    }

    /// Feeds a finished drag from the gesture tracker. A reset records nothing.
    pub async fn resolve_gesture(&self, outcome: GestureOutcome) -> SessionResult<Option<SwipeRecord>> {
        match outcome {
            GestureOutcome::Swipe(decision) => self
                .record_swipe(decision.action, Some(decision.velocity_x))
                .await
                .map(Some),
            GestureOutcome::Reset => Ok(None),
        }
    }

    /// The like/pass/save button path.
    pub async fn button_swipe(&self, action: SwipeAction) -> SessionResult<SwipeRecord> {
        if let Some(card) = self.get_current_card() {
            self.analytics.track_card_button_click(&card.activity_id, action);
        }
        self.record_swipe(action, None).await
    }

    /// Reports that the traveler opened the details of the current card.
    pub fn expand_card(&self) -> Option<DeckCard> {
        let card = self.get_current_card()?;
        self.analytics.track_card_expand(&card.activity_id, card.position);
        Some(card)
    }

    /// Asks the server to fit the liked activities.
    ///
    /// Runs from `Deck`, or from `Loading` to retry a failed attempt; any other step
    /// is rejected with `InvalidStep`.
    ///
    /// Concurrent or repeated calls while one is outstanding return `Ok(None)` without
    /// a second remote call. The step moves to `Loading` immediately and to `Reveal`
    /// on success; on failure it stays in `Loading` with the error slot set.
    pub async fn complete_personalization(
        &self,
        session_id: &str,
    ) -> SessionResult<Option<RevealResult>> {
        let Some(_flight) = FlightGuard::acquire(&self.completing) else {
            debug!("Completion already in flight, ignoring duplicate.");
            return Ok(None);
        };
        let session = self
            .active_session(Some(session_id))
            .map_err(|e| self.fail("complete", e))?;

        let entered = {
            let mut state = self.state();
            let step = state.step;
            match step {
                PersonalizationStep::Deck | PersonalizationStep::Loading => {
                    state.step = PersonalizationStep::Loading;
                    state.error = None;
                    Ok(())
                }
                actual => Err(SessionError::InvalidStep {
                    expected: PersonalizationStep::Deck,
                    actual,
                }),
            }
        };
        entered.map_err(|e| self.fail("complete", e))?;

        match self.api.complete(&self.token).await {
            Ok(reveal) => {
                info!(
                    session_id = %session.id,
                    fitted = reveal.fitted_items.len(),
                    missed = reveal.missed_items.len(),
                    "Personalization fitted."
                );
                {
                    let mut state = self.state();
                    state.reveal = Some(reveal.clone());
                    state.step = PersonalizationStep::Reveal;
                }
                self.analytics.track_reveal_view(&session.id, &reveal);
                self.haptics.notify(HapticKind::Success);
                Ok(Some(reveal))
            }
            Err(e) => Err(self.fail("complete", e.into())),
        }
    }

    /// Adds the fitted items to the itinerary. Only valid at `Reveal`.
    pub async fn confirm_selections(&self, session_id: &str) -> SessionResult<ConfirmOutcome> {
        let session = self
            .active_session(Some(session_id))
            .map_err(|e| self.fail("confirm", e))?;
        self.require_step("confirm", PersonalizationStep::Reveal)?;

        let cart_item_ids: Vec<String> = self
            .state()
            .reveal
            .as_ref()
            .map(|r| {
                r.fitted_items
                    .iter()
                    .filter_map(|item| item.cart_item_id.clone())
                    .collect()
            })
            .unwrap_or_default();
        self.analytics.track_confirm_click(&session.id, cart_item_ids.len());

        match self.api.confirm(&self.token, &cart_item_ids).await {
            Ok(outcome) if outcome.success => {
                info!(
                    session_id = %session.id,
                    added = outcome.added_count,
                    "Personalization confirmed."
                );
                {
                    let mut state = self.state();
                    state.step = PersonalizationStep::Confirmed;
                    state.error = None;
                }
                self.analytics.track_confirm_success(
                    &session.id,
                    outcome.added_count,
                    outcome.itinerary_id.as_deref(),
                );
                self.haptics.notify(HapticKind::Success);
                Ok(outcome)
            }
            Ok(outcome) => Err(self.fail("confirm", SessionError::Rejected(outcome.message))),
            Err(e) => Err(self.fail("confirm", e.into())),
        }
    }

    /// Replaces one fitted item with another activity. Only valid at `Reveal`.
    /// The reveal is swapped as a whole for the server's updated one; the step
    /// does not change.
    pub async fn swap_activity(&self, remove_id: &str, add_id: &str) -> SessionResult<SwapOutcome> {
        let session = self
            .active_session(None)
            .map_err(|e| self.fail("swap", e))?;
        self.require_step("swap", PersonalizationStep::Reveal)?;
        self.analytics.track_swap_initiate(&session.id, remove_id, add_id);

        match self.api.swap(&self.token, remove_id, add_id).await {
            Ok(outcome) if outcome.success => {
                info!(
                    session_id = %session.id,
                    fit_status = %outcome.fit_status,
                    "Activity swapped."
                );
                {
                    let mut state = self.state();
                    state.reveal = Some(outcome.updated_reveal.clone());
                    state.error = None;
                }
                self.analytics.track_swap_complete(
                    &session.id,
                    outcome.new_cart_item_id.as_deref(),
                    &outcome.fit_status,
                );
                Ok(outcome)
            }
            Ok(outcome) => Err(self.fail("swap", SessionError::Rejected(outcome.message))),
            Err(e) => Err(self.fail("swap", e.into())),
        }
    }

    /// The traveler left the flow. Nothing is sent to the server.
    pub fn abandon(&self) {
        let (session_id, step, swiped) = {
            let state = self.state();
            (
                state.session.as_ref().map(|s| s.id.clone()),
                state.step,
                state.swipe_log.len(),
            )
        };
        if step == PersonalizationStep::Confirmed {
            return;
        }
        info!(step = step.as_str(), swiped, "Personalization abandoned.");
        self.analytics
            .track_session_abandon(session_id.as_deref(), step.as_str(), swiped);
        self.analytics.reset_session();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

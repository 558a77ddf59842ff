use super::*;
use async_trait::async_trait;
use personalization_core::gesture::{GestureOutcome, SwipeDecision};
use personalization_core::{
    Deck, EventName, PersonalizationPolicy, PortError, PortResult, RevealItem, SessionStatus,
    SwipeAck,
};
use std::time::Duration;

//=========================================================================================
// In-memory API
//=========================================================================================

#[derive(Default)]
struct FakeState {
    enabled: bool,
    cards: Vec<DeckCard>,
    start_calls: usize,
    deck_calls: usize,
    complete_calls: usize,
    start_delay_ms: u64,
    complete_delay_ms: u64,
    /// Per card position.
    swipe_delays_ms: Vec<u64>,
    fail_swipes: bool,
    fail_completes: usize,
    /// In acknowledgement order.
    acked_swipes: Vec<SwipeRecord>,
    confirmed_ids: Vec<Vec<String>>,
}

struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    fn with_cards(count: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                enabled: true,
                cards: (0..count).map(card).collect(),
                ..FakeState::default()
            }),
        })
    }

    fn fake(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

fn card(position: usize) -> DeckCard {
    DeckCard {
        activity_id: format!("act-{position}"),
        name: format!("Activity {position}"),
        short_description: None,
        description: None,
        duration_minutes: Some(90),
        location: None,
        price: 25.0,
        currency: "EUR".to_string(),
        hero_image_url: Some(format!("https://img.example/{position}.jpg")),
        vibe_tags: vec!["adventure".to_string()],
        position,
    }
}

fn reveal_item(activity_id: &str) -> RevealItem {
    RevealItem {
        cart_item_id: Some(format!("cart-{activity_id}")),
        activity_id: activity_id.to_string(),
        name: activity_id.to_string(),
        day_number: Some(1),
        start_time: None,
        price: 25.0,
        fit_reason: None,
    }
}

#[async_trait]
impl PersonalizationApi for FakeApi {
    async fn status(&self, _token: &str) -> PortResult<PersonalizationStatus> {
        let enabled = self.fake().enabled;
        Ok(PersonalizationStatus {
            enabled,
            has_active_session: false,
            session: None,
            available_vibes: Vec::new(),
            policy: PersonalizationPolicy {
                max_vibes: 2,
                ..PersonalizationPolicy::default()
            },
        })
    }

    async fn start(
        &self,
        token: &str,
        selected_vibes: &[String],
        device_id: Option<&str>,
    ) -> PortResult<Session> {
        let delay = {
            let mut fake = self.fake();
            fake.start_calls += 1;
            fake.start_delay_ms
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(Session {
            id: "s1".to_string(),
            itinerary_token: token.to_string(),
            selected_vibes: selected_vibes.to_vec(),
            device_id: device_id.map(str::to_string),
            status: SessionStatus::Active,
        })
    }

    async fn resume(&self, token: &str) -> PortResult<Session> {
        Ok(Session {
            id: "s-resumed".to_string(),
            itinerary_token: token.to_string(),
            selected_vibes: vec!["relax".to_string()],
            device_id: None,
            status: SessionStatus::Active,
        })
    }

    async fn deck(&self, _token: &str) -> PortResult<Deck> {
        let mut fake = self.fake();
        fake.deck_calls += 1;
        Ok(Deck {
            session_id: "s1".to_string(),
            cards: fake.cards.clone(),
            total_cards: fake.cards.len(),
            cards_remaining: fake.cards.len(),
        })
    }

    async fn swipe(&self, _token: &str, record: &SwipeRecord) -> PortResult<SwipeAck> {
        let (delay, fail) = {
            let fake = self.fake();
            let delay = fake
                .swipe_delays_ms
                .get(record.card_position)
                .copied()
                .unwrap_or(0);
            (delay, fake.fail_swipes)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if fail {
            return Err(PortError::Network("connection reset".to_string()));
        }
        let mut fake = self.fake();
        fake.acked_swipes.push(record.clone());
        let liked = fake
            .acked_swipes
            .iter()
            .filter(|s| s.action == SwipeAction::Like)
            .count();
        Ok(SwipeAck {
            success: true,
            message: "ok".to_string(),
            cards_remaining: fake.cards.len().saturating_sub(fake.acked_swipes.len()),
            cards_liked: liked,
        })
    }

    async fn complete(&self, _token: &str) -> PortResult<RevealResult> {
        let (delay, fail) = {
            let mut fake = self.fake();
            fake.complete_calls += 1;
            let fail = fake.fail_completes > 0;
            if fail {
                fake.fail_completes -= 1;
            }
            (fake.complete_delay_ms, fail)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if fail {
            return Err(PortError::Network("timeout".to_string()));
        }
        let fake = self.fake();
        let liked: Vec<RevealItem> = fake
            .acked_swipes
            .iter()
            .filter(|s| s.action == SwipeAction::Like)
            .map(|s| reveal_item(&s.activity_id))
            .collect();
        let fitted: Vec<RevealItem> = liked.iter().take(2).cloned().collect();
        let missed: Vec<RevealItem> = liked.iter().skip(2).cloned().collect();
        Ok(RevealResult {
            total_added_price: fitted.iter().map(|i| i.price).sum(),
            fitted_items: fitted,
            missed_items: missed,
            saved_items: Vec::new(),
            currency: "EUR".to_string(),
        })
    }

    async fn confirm(&self, _token: &str, cart_item_ids: &[String]) -> PortResult<ConfirmOutcome> {
        self.fake().confirmed_ids.push(cart_item_ids.to_vec());
        Ok(ConfirmOutcome {
            success: true,
            message: "added".to_string(),
            added_count: cart_item_ids.len(),
            itinerary_id: Some("it-9".to_string()),
        })
    }

    async fn swap(
        &self,
        _token: &str,
        cart_item_id: &str,
        new_activity_id: &str,
    ) -> PortResult<SwapOutcome> {
        if cart_item_id == "cart-missing" {
            return Ok(SwapOutcome {
                success: false,
                message: "cart item not found".to_string(),
                new_cart_item_id: None,
                fit_status: "failed".to_string(),
                fit_reason: None,
                updated_reveal: RevealResult::default(),
            });
        }
        Ok(SwapOutcome {
            success: true,
            message: "swapped".to_string(),
            new_cart_item_id: Some(format!("cart-{new_activity_id}")),
            fit_status: "fitted".to_string(),
            fit_reason: Some("free afternoon".to_string()),
            updated_reveal: RevealResult {
                fitted_items: vec![reveal_item(new_activity_id)],
                missed_items: Vec::new(),
                saved_items: Vec::new(),
                total_added_price: 25.0,
                currency: "EUR".to_string(),
            },
        })
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn controller(api: Arc<FakeApi>) -> (PersonalizationSession, Arc<Mutex<Vec<EventName>>>) {
    let bus = AnalyticsBus::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe(move |event| {
        sink.lock().unwrap().push(event.name);
        Ok(())
    });
    (PersonalizationSession::new("tok-1", api, bus), events)
}

fn vibes(names: &[&str]) -> Vec<String> {
    names.iter().map(|v| v.to_string()).collect()
}

async fn started_with_deck(api: Arc<FakeApi>) -> (PersonalizationSession, Arc<Mutex<Vec<EventName>>>) {
    let (session, events) = controller(api);
    session
        .start_session(Some("dev-1"), &vibes(&["adventure"]))
        .await
        .unwrap();
    session.load_deck("s1").await.unwrap();
    (session, events)
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn full_flow_from_vibes_to_confirmation() {
    let api = FakeApi::with_cards(3);
    let (session, events) = controller(api.clone());

    assert_eq!(session.begin(), PersonalizationStep::VibeCheck);
    let started = session
        .start_session(Some("dev-1"), &vibes(&["adventure", "relax"]))
        .await
        .unwrap()
        .expect("first start performs the call");
    assert_eq!(started.id, "s1");
    assert_eq!(started.selected_vibes, vibes(&["adventure", "relax"]));
    assert_eq!(session.step(), PersonalizationStep::Deck);

    assert_eq!(
        session.load_deck("s1").await.unwrap(),
        DeckLoad::Ready { total_cards: 3 }
    );

    for action in [SwipeAction::Like, SwipeAction::Pass, SwipeAction::Like] {
        session.record_swipe(action, None).await.unwrap();
    }
    let positions: Vec<usize> = session.swipe_log().iter().map(|r| r.card_position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(session.current_card_index(), 3);
    assert_eq!(session.get_current_card(), None);

    let reveal = session
        .complete_personalization("s1")
        .await
        .unwrap()
        .expect("completion performs the call");
    assert!(reveal.fitted_items.len() <= 2);
    assert_eq!(session.step(), PersonalizationStep::Reveal);

    let outcome = session.confirm_selections("s1").await.unwrap();
    assert!(outcome.success);
    assert_eq!(session.step(), PersonalizationStep::Confirmed);
    assert_eq!(
        api.fake().confirmed_ids,
        vec![vec!["cart-act-0".to_string(), "cart-act-2".to_string()]]
    );

    let events = events.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&EventName::SessionStart));
    assert!(events.contains(&EventName::DeckStart));
    assert!(events.contains(&EventName::DeckComplete));
    assert!(events.contains(&EventName::RevealView));
    assert_eq!(events.last(), Some(&EventName::ConfirmSuccess));
    assert_eq!(
        events.iter().filter(|e| **e == EventName::CardSwipe).count(),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn swipe_log_keeps_user_order_when_acks_arrive_reversed() {
    let api = FakeApi::with_cards(3);
    api.fake().swipe_delays_ms = vec![30, 20, 10];
    let (session, _) = started_with_deck(api.clone()).await;

    let (a, b, c) = tokio::join!(
        session.record_swipe(SwipeAction::Like, None),
        session.record_swipe(SwipeAction::Pass, None),
        session.record_swipe(SwipeAction::Save, None),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let log = session.swipe_log();
    assert_eq!(log.len(), 3);
    assert_eq!(session.current_card_index(), log.len());
    let order: Vec<(&str, SwipeAction)> = log
        .iter()
        .map(|r| (r.activity_id.as_str(), r.action))
        .collect();
    assert_eq!(
        order,
        vec![
            ("act-0", SwipeAction::Like),
            ("act-1", SwipeAction::Pass),
            ("act-2", SwipeAction::Save),
        ]
    );

    let acked: Vec<usize> = api.fake().acked_swipes.iter().map(|r| r.card_position).collect();
    assert_eq!(acked, vec![2, 1, 0]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_completion_makes_one_remote_call() {
    let api = FakeApi::with_cards(2);
    api.fake().complete_delay_ms = 50;
    let (session, _) = started_with_deck(api.clone()).await;
    session.record_swipe(SwipeAction::Like, None).await.unwrap();

    let (first, second, _) = tokio::join!(
        session.complete_personalization("s1"),
        session.complete_personalization("s1"),
        async {
            assert_eq!(session.step(), PersonalizationStep::Loading);
            assert!(session.snapshot().is_completing);
        },
    );

    assert!(first.unwrap().is_some());
    assert_eq!(second.unwrap(), None);
    assert_eq!(api.fake().complete_calls, 1);
    assert_eq!(session.step(), PersonalizationStep::Reveal);
    assert!(!session.snapshot().is_completing);
}

#[tokio::test(start_paused = true)]
async fn failed_completion_stays_loading_and_can_be_retried() {
    let api = FakeApi::with_cards(1);
    api.fake().fail_completes = 1;
    let (session, events) = started_with_deck(api.clone()).await;

    let err = session.complete_personalization("s1").await.unwrap_err();
    assert_eq!(err, SessionError::Port(PortError::Network("timeout".to_string())));
    assert_eq!(session.step(), PersonalizationStep::Loading);
    assert_eq!(session.error(), Some(err));
    assert!(events.lock().unwrap().contains(&EventName::Error));

    assert!(session.complete_personalization("s1").await.unwrap().is_some());
    assert_eq!(api.fake().complete_calls, 2);
    assert_eq!(session.step(), PersonalizationStep::Reveal);
    assert_eq!(session.error(), None);
}

#[tokio::test(start_paused = true)]
async fn double_submitted_start_makes_one_remote_call() {
    let api = FakeApi::with_cards(1);
    api.fake().start_delay_ms = 50;
    let (session, _) = controller(api.clone());
    let chosen = vibes(&["relax"]);

    let (first, second) = tokio::join!(
        session.start_session(None, &chosen),
        session.start_session(None, &chosen),
    );
    assert!(first.unwrap().is_some());
    assert_eq!(second.unwrap(), None);

    // A held session is never replaced.
    assert_eq!(session.start_session(None, &chosen).await.unwrap(), None);
    assert_eq!(api.fake().start_calls, 1);
    assert_eq!(session.session().map(|s| s.id), Some("s1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn failed_swipe_is_not_rolled_back() {
    let api = FakeApi::with_cards(2);
    api.fake().fail_swipes = true;
    let (session, events) = started_with_deck(api).await;

    let err = session.record_swipe(SwipeAction::Like, Some(720.0)).await.unwrap_err();
    assert!(matches!(err, SessionError::Port(PortError::Network(_))));

    assert_eq!(session.current_card_index(), 1);
    assert_eq!(session.swipe_log()[0].velocity, Some(720.0));
    assert_eq!(session.get_current_card().map(|c| c.activity_id), Some("act-1".to_string()));
    assert!(session.error().is_some());
    assert_eq!(events.lock().unwrap().last(), Some(&EventName::Error));
}

#[tokio::test(start_paused = true)]
async fn empty_deck_is_a_handled_outcome() {
    let api = FakeApi::with_cards(0);
    let (session, _) = controller(api.clone());
    session.start_session(None, &vibes(&["adventure"])).await.unwrap();

    assert_eq!(session.load_deck("s1").await.unwrap(), DeckLoad::Empty);
    assert_eq!(session.step(), PersonalizationStep::Deck);
    assert_eq!(session.get_current_card(), None);
    assert_eq!(session.error(), None);

    // The deck is fetched once per session.
    assert_eq!(session.load_deck("s1").await.unwrap(), DeckLoad::Empty);
    assert_eq!(api.fake().deck_calls, 1);

    let err = session.record_swipe(SwipeAction::Like, None).await.unwrap_err();
    assert_eq!(err, SessionError::DeckExhausted);
    assert!(session.swipe_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn seconds_viewed_is_rounded_time_since_card_became_current() {
    let api = FakeApi::with_cards(3);
    let (session, _) = started_with_deck(api).await;

    tokio::time::advance(Duration::from_millis(2600)).await;
    let first = session.record_swipe(SwipeAction::Pass, None).await.unwrap();
    tokio::time::advance(Duration::from_millis(1400)).await;
    let second = session.record_swipe(SwipeAction::Like, None).await.unwrap();

    assert_eq!(first.seconds_viewed, 3);
    assert_eq!(second.seconds_viewed, 1);
}

#[tokio::test(start_paused = true)]
async fn swap_replaces_reveal_without_changing_step() {
    let api = FakeApi::with_cards(2);
    let (idle, _) = controller(api.clone());
    assert_eq!(
        idle.swap_activity("cart-act-0", "act-9").await.unwrap_err(),
        SessionError::NoActiveSession
    );

    let (session, events) = started_with_deck(api).await;
    session.record_swipe(SwipeAction::Like, None).await.unwrap();
    session.complete_personalization("s1").await.unwrap();

    let outcome = session.swap_activity("cart-act-0", "act-9").await.unwrap();
    assert_eq!(outcome.new_cart_item_id.as_deref(), Some("cart-act-9"));
    assert_eq!(session.step(), PersonalizationStep::Reveal);
    let reveal = session.reveal().unwrap();
    assert_eq!(reveal.fitted_items.len(), 1);
    assert_eq!(reveal.fitted_items[0].activity_id, "act-9");

    let rejected = session.swap_activity("cart-missing", "act-3").await.unwrap_err();
    assert_eq!(rejected, SessionError::Rejected("cart item not found".to_string()));
    assert_eq!(session.reveal(), Some(reveal));

    let events = events.lock().unwrap();
    assert!(events.contains(&EventName::SwapInitiate));
    assert!(events.contains(&EventName::SwapComplete));
}

#[tokio::test(start_paused = true)]
async fn operations_on_another_session_id_are_rejected() {
    let api = FakeApi::with_cards(2);
    let (session, _) = controller(api.clone());
    assert_eq!(
        session.load_deck("s1").await.unwrap_err(),
        SessionError::NoActiveSession
    );

    session.start_session(None, &vibes(&["relax"])).await.unwrap();
    let err = session.load_deck("s2").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::SessionMismatch {
            active: "s1".to_string(),
            requested: "s2".to_string(),
        }
    );
    assert_eq!(api.fake().deck_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn vibe_toggling_respects_policy_limit() {
    let api = FakeApi::with_cards(1);
    let (session, events) = controller(api);
    session.load_status().await.unwrap();

    assert!(session.toggle_vibe("adventure"));
    assert!(session.toggle_vibe("relax"));
    assert!(!session.toggle_vibe("food"));
    assert_eq!(session.selected_vibes(), vibes(&["adventure", "relax"]));

    assert!(!session.toggle_vibe("adventure"));
    assert_eq!(session.selected_vibes(), vibes(&["relax"]));

    session.set_selected_vibes(&vibes(&["food", "food", "culture"]));
    assert_eq!(session.selected_vibes(), vibes(&["food", "culture"]));

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![EventName::VibeSelect, EventName::VibeSelect, EventName::VibeDeselect]
    );
}

#[tokio::test(start_paused = true)]
async fn disabled_itinerary_cannot_start() {
    let api = FakeApi::with_cards(1);
    api.fake().enabled = false;
    let (session, _) = controller(api.clone());
    session.load_status().await.unwrap();

    let err = session.start_session(None, &vibes(&["relax"])).await.unwrap_err();
    assert_eq!(err, SessionError::Disabled);
    assert_eq!(api.fake().start_calls, 0);
    assert_eq!(session.step(), PersonalizationStep::Entry);
}

#[tokio::test(start_paused = true)]
async fn gestures_and_buttons_feed_the_same_log() {
    let api = FakeApi::with_cards(3);
    let (session, events) = started_with_deck(api).await;

    assert_eq!(session.resolve_gesture(GestureOutcome::Reset).await.unwrap(), None);
    let swiped = session
        .resolve_gesture(GestureOutcome::Swipe(SwipeDecision {
            action: SwipeAction::Pass,
            offset_x: -180.0,
            velocity_x: -640.0,
            elapsed: Duration::from_millis(300),
        }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(swiped.velocity, Some(-640.0));

    let expanded = session.expand_card().unwrap();
    assert_eq!(expanded.activity_id, "act-1");
    let pressed = session.button_swipe(SwipeAction::Save).await.unwrap();
    assert_eq!(pressed.card_position, 1);
    assert_eq!(pressed.velocity, None);
    assert_eq!(session.current_card_index(), 2);

    let events = events.lock().unwrap();
    assert!(events.contains(&EventName::CardExpand));
    assert!(events.contains(&EventName::CardButtonClick));
}

#[tokio::test(start_paused = true)]
async fn resume_adopts_server_session() {
    let api = FakeApi::with_cards(2);
    let (session, events) = controller(api);

    let resumed = session.resume_session().await.unwrap().unwrap();
    assert_eq!(resumed.id, "s-resumed");
    assert_eq!(session.step(), PersonalizationStep::Deck);
    assert_eq!(session.selected_vibes(), vibes(&["relax"]));
    assert_eq!(session.resume_session().await.unwrap(), None);

    session.abandon();
    let events = events.lock().unwrap();
    assert_eq!(*events, vec![EventName::SessionResume, EventName::SessionAbandon]);
}

#[tokio::test(start_paused = true)]
async fn completion_after_confirmation_is_rejected() {
    let api = FakeApi::with_cards(1);
    let (session, events) = started_with_deck(api.clone()).await;
    session.record_swipe(SwipeAction::Like, None).await.unwrap();
    session.complete_personalization("s1").await.unwrap();
    session.confirm_selections("s1").await.unwrap();
    assert_eq!(session.step(), PersonalizationStep::Confirmed);

    let err = session.complete_personalization("s1").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidStep {
            expected: PersonalizationStep::Deck,
            actual: PersonalizationStep::Confirmed,
        }
    );
    assert_eq!(api.fake().complete_calls, 1);
    assert_eq!(session.step(), PersonalizationStep::Confirmed);
    assert_eq!(session.error(), Some(err));
    assert_eq!(events.lock().unwrap().last(), Some(&EventName::Error));

    // Confirming twice is rejected the same way.
    let again = session.confirm_selections("s1").await.unwrap_err();
    assert!(matches!(
        again,
        SessionError::InvalidStep { actual: PersonalizationStep::Confirmed, .. }
    ));
    assert_eq!(api.fake().confirmed_ids.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn confirm_requires_a_reveal() {
    let api = FakeApi::with_cards(2);
    let (session, _) = started_with_deck(api.clone()).await;

    let err = session.confirm_selections("s1").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidStep {
            expected: PersonalizationStep::Reveal,
            actual: PersonalizationStep::Deck,
        }
    );
    assert!(api.fake().confirmed_ids.is_empty());
    assert_eq!(session.step(), PersonalizationStep::Deck);
    assert_eq!(session.error(), Some(err));
}

#[tokio::test(start_paused = true)]
async fn swap_requires_a_reveal() {
    let api = FakeApi::with_cards(2);
    let (session, events) = started_with_deck(api).await;

    let err = session.swap_activity("cart-act-0", "act-9").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidStep {
            expected: PersonalizationStep::Reveal,
            actual: PersonalizationStep::Deck,
        }
    );
    assert_eq!(session.reveal(), None);
    assert_eq!(session.step(), PersonalizationStep::Deck);
    assert!(!events.lock().unwrap().contains(&EventName::SwapInitiate));
}

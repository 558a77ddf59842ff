//! services/client/src/bin/personalize.rs
//!
//! A headless driver for one personalization run against a live deployment.
//! It likes every card sharing a vibe with the selection, passes on the rest,
//! then completes and confirms the session. Each decision is played as a drag
//! through the gesture tracker, so the configured swipe threshold applies.

use client_lib::{
    adapters::{
        HttpImageLoader, HttpPersonalizationApi, MachineFingerprint, TracingVibrator,
        TungsteniteConnector,
    },
    config::Config,
    engine::{
        ChannelConfig, DeckLoad, DeviceIdentity, MediaPrefetcher, PersonalizationSession,
        RealtimeChannel,
    },
    error::ClientError,
};
use personalization_core::{
    analytics, DeckCard, DragPoint, GestureOutcome, GestureTracker, HapticNotifier, SwipeAction,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting personalization run...");

    // --- 2. Initialize Service Adapters ---
    let api = Arc::new(HttpPersonalizationApi::new(
        config.api_base_url.clone(),
        config.http_timeout,
    )?);
    let images = Arc::new(HttpImageLoader::new(config.http_timeout)?);
    let fingerprint = Arc::new(MachineFingerprint::new(config.machine_id_path.clone()));
    let connector = Arc::new(TungsteniteConnector::new());

    // --- 3. Analytics & Device Identity ---
    let bus = analytics::global();
    let analytics_log = bus.subscribe(|event| {
        debug!(
            event = event.name.as_str(),
            payload = %serde_json::Value::Object(event.payload.clone()),
            "Analytics event."
        );
        Ok(())
    });
    let identity = DeviceIdentity::resolve(fingerprint);

    // --- 4. Realtime Channel ---
    let channel = RealtimeChannel::new(
        ChannelConfig {
            base_delay: config.reconnect_base_delay,
            max_reconnect_attempts: config.reconnect_max_attempts,
            ..ChannelConfig::new(config.realtime_url.clone(), config.itinerary_token.clone())
        },
        connector,
    );
    let mut updates = channel.messages();
    let update_logger = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(envelope) => info!(kind = %envelope.kind, "Itinerary update received."),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Realtime updates lagged."),
                Err(RecvError::Closed) => break,
            }
        }
    });
    channel.connect();

    // --- 5. Build the Session Controller ---
    let session = PersonalizationSession::new(config.itinerary_token.clone(), api, bus.clone())
        .with_haptics(HapticNotifier::new(Arc::new(TracingVibrator)))
        .with_prefetcher(MediaPrefetcher::new(images, config.prefetch_window));

    let result = run(&session, &identity, &config).await;
    if result.is_err() {
        session.abandon();
    }

    // --- 6. Tear Down ---
    channel.disconnect();
    update_logger.abort();
    analytics_log.unsubscribe();
    result
}

async fn run(
    session: &PersonalizationSession,
    identity: &DeviceIdentity,
    config: &Config,
) -> Result<(), ClientError> {
    let status = session.load_status().await?;
    if !status.enabled {
        info!("Personalization is not enabled for this itinerary.");
        return Ok(());
    }
    session.begin();

    let active = if status.has_active_session {
        session.resume_session().await?
    } else {
        let wanted: Vec<String> = if config.vibes.is_empty() {
            status.available_vibes.iter().map(|v| v.id.clone()).collect()
        } else {
            config.vibes.clone()
        };
        for vibe in &wanted {
            session.toggle_vibe(vibe);
        }
        let device_id = identity.wait_ready().await;
        session
            .start_session(Some(device_id.as_str()), &session.selected_vibes())
            .await?
    };
    let active = active.ok_or_else(|| ClientError::Internal("no session was started".to_string()))?;

    match session.load_deck(&active.id).await? {
        DeckLoad::Empty => {
            info!(session_id = %active.id, "Empty deck, nothing to swipe.");
            return Ok(());
        }
        DeckLoad::Ready { total_cards } => info!(total_cards, "Swiping through the deck."),
    }

    let vibes = active.selected_vibes.clone();
    let mut tracker = GestureTracker::new(config.swipe_threshold);
    while let Some(card) = session.get_current_card() {
        let action = choose(&card, &vibes);
        let outcome = drag_towards(&mut tracker, action);
        let record = match session.resolve_gesture(outcome).await? {
            Some(record) => record,
            None => session.button_swipe(action).await?,
        };
        info!(
            activity = %card.name,
            action = %record.action,
            position = record.card_position,
            "Card swiped."
        );
    }

    if let Some(reveal) = session.complete_personalization(&active.id).await? {
        for item in &reveal.fitted_items {
            info!(activity = %item.name, day = ?item.day_number, "Fitted.");
        }
        for item in &reveal.missed_items {
            info!(activity = %item.name, reason = ?item.fit_reason, "Did not fit.");
        }
    }

    let outcome = session.confirm_selections(&active.id).await?;
    info!(
        added = outcome.added_count,
        itinerary_id = ?outcome.itinerary_id,
        "Personalization run finished."
    );
    Ok(())
}

fn choose(card: &DeckCard, vibes: &[String]) -> SwipeAction {
    if card.vibe_tags.iter().any(|tag| vibes.contains(tag)) {
        SwipeAction::Like
    } else {
        SwipeAction::Pass
    }
}

/// A steady horizontal drag that ends a fifth past the threshold, in the
/// direction of `action`. Saves have no drag direction and go through the button.
fn drag_towards(tracker: &mut GestureTracker, action: SwipeAction) -> GestureOutcome {
    const STEPS: u32 = 4;
    const STEP: Duration = Duration::from_millis(120);

    let direction = match action {
        SwipeAction::Like => 1.0,
        SwipeAction::Pass => -1.0,
        SwipeAction::Save => return GestureOutcome::Reset,
    };
    let distance = tracker.threshold() * 1.2;
    let samples: Vec<(Duration, DragPoint)> = (1..=STEPS)
        .map(|step| {
            let x = direction * distance * f64::from(step) / f64::from(STEPS);
            (STEP * step, DragPoint { x, y: 0.0 })
        })
        .collect();
    tracker.replay(Instant::now(), &samples, STEP * STEPS)
}

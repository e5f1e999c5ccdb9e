use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::{MAX_PROCESSED_PAIRS, PROCESSED_RETENTION_MS};
use crate::model::*;
use crate::notify::{Notification, Notifier};
use crate::observability::{SIDE_EFFECT_FAILURES_TOTAL, WEBHOOK_EVENTS_TOTAL};
use crate::profiles::ProfileDirectory;

use super::events::{PaymentEvent, PaymentEventKind};
use super::signature::SignatureVerifier;
use super::WebhookError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    Processed { booking_id: Ulid, changed: bool },
    Duplicate { booking_id: Ulid },
    Ignored(String),
}

impl WebhookAck {
    fn outcome(&self) -> &'static str {
        match self {
            WebhookAck::Processed { changed: true, .. } => "processed",
            WebhookAck::Processed { changed: false, .. } => "noop",
            WebhookAck::Duplicate { .. } => "duplicate",
            WebhookAck::Ignored(_) => "ignored",
        }
    }
}

/// Verifies provider events and maps them onto lifecycle events, at least
/// once and without repeating side effects.
pub struct WebhookProcessor {
    engine: Arc<Engine>,
    verifier: Arc<dyn SignatureVerifier>,
    profiles: Arc<dyn ProfileDirectory>,
    notifier: Arc<dyn Notifier>,
    /// (booking id, checkout session id) → when it was processed.
    processed: DashMap<(Ulid, String), Ms>,
    /// Same pairs in the order they were remembered, oldest first.
    processed_order: Mutex<VecDeque<((Ulid, String), Ms)>>,
}

impl WebhookProcessor {
    pub fn new(
        engine: Arc<Engine>,
        verifier: Arc<dyn SignatureVerifier>,
        profiles: Arc<dyn ProfileDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            verifier,
            profiles,
            notifier,
            processed: DashMap::new(),
            processed_order: Mutex::new(VecDeque::new()),
        }
    }

    /// Only signature failures come back as `Err`. Anything that goes wrong
    /// after verification is logged and acknowledged so the provider doesn't
    /// retry it in a storm.
    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, WebhookError> {
        let header = signature.ok_or(WebhookError::MissingSignature)?;
        let now_secs = self.engine.now().div_euclid(1000);
        if let Err(e) = self.verifier.verify(raw_body, header, now_secs) {
            warn!("webhook rejected: {e}");
            metrics::counter!(WEBHOOK_EVENTS_TOTAL, "type" => "unverified", "outcome" => "rejected")
                .increment(1);
            return Err(e);
        }

        let event = match PaymentEvent::from_bytes(raw_body) {
            Ok(event) => event,
            Err(e) => {
                error!("webhook payload unreadable: {e}");
                metrics::counter!(WEBHOOK_EVENTS_TOTAL, "type" => "unparsed", "outcome" => "error")
                    .increment(1);
                return Ok(WebhookAck::Ignored(e.to_string()));
            }
        };

        let label = event.kind.label();
        let ack = match self.process(&event).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(event_id = %event.event_id, event = event.kind.as_str(), "webhook processing failed: {e}");
                metrics::counter!(WEBHOOK_EVENTS_TOTAL, "type" => label, "outcome" => "error")
                    .increment(1);
                return Ok(WebhookAck::Ignored(e.to_string()));
            }
        };
        metrics::counter!(WEBHOOK_EVENTS_TOTAL, "type" => label, "outcome" => ack.outcome())
            .increment(1);
        Ok(ack)
    }

    async fn process(&self, event: &PaymentEvent) -> Result<WebhookAck, WebhookError> {
        match &event.kind {
            PaymentEventKind::CheckoutCompleted | PaymentEventKind::AsyncPaymentSucceeded => {
                self.on_completed(event).await
            }
            PaymentEventKind::CheckoutExpired | PaymentEventKind::AsyncPaymentFailed => {
                self.on_failed(event).await
            }
            PaymentEventKind::Other(kind) => {
                if !kind.starts_with("reporting.") {
                    debug!(event_id = %event.event_id, event = kind.as_str(), "ignoring webhook event");
                }
                Ok(WebhookAck::Ignored(format!("unhandled event type {kind}")))
            }
        }
    }

    /// Metadata booking id first, then the persisted session id.
    async fn resolve(&self, event: &PaymentEvent) -> Result<Option<Booking>, WebhookError> {
        let bookings = &self.engine.stores.bookings;
        if let Some(id) = event.booking_ref.as_deref().and_then(|r| r.parse::<Ulid>().ok())
            && let Some(booking) = bookings.get(id).await.map_err(EngineError::from)?
        {
            return Ok(Some(booking));
        }
        match event.session_id.as_deref() {
            Some(session) => Ok(bookings
                .find_by_session(session)
                .await
                .map_err(EngineError::from)?),
            None => Ok(None),
        }
    }

    async fn on_completed(&self, event: &PaymentEvent) -> Result<WebhookAck, WebhookError> {
        let session_id = event
            .session_id
            .clone()
            .ok_or_else(|| WebhookError::InvalidPayload("checkout session without id".into()))?;
        let Some(booking) = self.resolve(event).await? else {
            warn!(event_id = %event.event_id, session_id = %session_id, "no booking for completed checkout");
            return Ok(WebhookAck::Ignored("booking not found".into()));
        };
        if !event.funds_captured() {
            info!(
                booking_id = %booking.id,
                session_id = %session_id,
                payment_status = event.payment_status.as_deref().unwrap_or_default(),
                "checkout completed without funds, waiting for settlement"
            );
            return Ok(WebhookAck::Ignored("payment not settled".into()));
        }

        let key = (booking.id, session_id.clone());
        if self.processed.contains_key(&key) {
            info!(booking_id = %booking.id, session_id = %session_id, "duplicate webhook delivery");
            return Ok(WebhookAck::Duplicate {
                booking_id: booking.id,
            });
        }

        let applied = self
            .engine
            .apply(LifecycleEvent::PaymentSucceeded {
                booking_id: booking.id,
                session_id: session_id.clone(),
                amount: event.amount_total,
            })
            .await?;

        self.log_payment(booking.id, event, None).await;
        if applied.changed {
            self.provision(&applied.booking).await;
            self.notify_confirmed(&applied.booking).await;
        }
        self.remember(key);

        Ok(WebhookAck::Processed {
            booking_id: booking.id,
            changed: applied.changed,
        })
    }

    async fn on_failed(&self, event: &PaymentEvent) -> Result<WebhookAck, WebhookError> {
        let Some(booking) = self.resolve(event).await? else {
            warn!(event_id = %event.event_id, event = event.kind.as_str(), "no booking for failed checkout");
            return Ok(WebhookAck::Ignored("booking not found".into()));
        };
        let applied = self
            .engine
            .apply(LifecycleEvent::PaymentFailedOrExpired {
                booking_id: booking.id,
            })
            .await?;
        let reason = match event.kind {
            PaymentEventKind::CheckoutExpired => "checkout session expired",
            _ => "async payment failed",
        };
        self.log_payment(booking.id, event, Some(reason.to_string())).await;
        Ok(WebhookAck::Processed {
            booking_id: booking.id,
            changed: applied.changed,
        })
    }

    /// Evicts from the old end until the rest are within retention and
    /// under the cap. A replay of an evicted pair still lands on the state
    /// machine, which treats it as a no-op.
    fn remember(&self, key: (Ulid, String)) {
        let now = self.engine.now();
        let mut order = self
            .processed_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.processed.insert(key.clone(), now);
        order.push_back((key, now));
        while let Some((_, at)) = order.front() {
            if order.len() <= MAX_PROCESSED_PAIRS && now - *at < PROCESSED_RETENTION_MS {
                break;
            }
            if let Some((old, at)) = order.pop_front() {
                self.processed.remove_if(&old, |_, seen| *seen == at);
            }
        }
    }

    pub fn processed_pairs(&self) -> usize {
        self.processed.len()
    }

    async fn log_payment(&self, booking_id: Ulid, event: &PaymentEvent, error_message: Option<String>) {
        let entry = PaymentLogEntry {
            id: Ulid::new(),
            booking_id,
            provider_event: event.kind.as_str().to_string(),
            error_message,
            at: self.engine.now(),
        };
        if let Err(e) = self.engine.stores.bookings.log_payment_event(entry).await {
            side_effect_failed("payment_log");
            warn!(booking_id = %booking_id, "payment log write failed: {e}");
        }
    }

    /// Parent first, then each athlete under it. Each failure is logged on
    /// its own and the rest still run.
    async fn provision(&self, booking: &Booking) {
        let parent = match self.profiles.upsert_parent(&booking.parent).await {
            Ok((parent, how)) => {
                info!(booking_id = %booking.id, parent_id = %parent.id, outcome = ?how, "parent provisioned");
                parent
            }
            Err(e) => {
                side_effect_failed("parent");
                warn!(booking_id = %booking.id, "parent provisioning failed: {e}");
                return;
            }
        };
        for athlete in &booking.athletes {
            match self.profiles.upsert_athlete(parent.id, athlete).await {
                Ok((profile, how)) => {
                    info!(booking_id = %booking.id, athlete_id = %profile.id, outcome = ?how, "athlete provisioned");
                }
                Err(e) => {
                    side_effect_failed("athlete");
                    warn!(booking_id = %booking.id, athlete = %athlete.name, "athlete provisioning failed: {e}");
                }
            }
        }
    }

    async fn notify_confirmed(&self, booking: &Booking) {
        let notification = Notification::BookingConfirmed {
            booking_id: booking.id,
            parent_email: booking.parent.email.clone(),
            parent_name: format!("{} {}", booking.parent.first_name, booking.parent.last_name)
                .trim()
                .to_string(),
            date: booking.preferred_date,
            time: format_time_of_day(booking.preferred_time),
            lesson_type: booking.lesson_type.clone(),
            amount_paid: booking.paid_amount,
        };
        if let Err(e) = self.notifier.enqueue(notification).await {
            side_effect_failed("notification");
            warn!(booking_id = %booking.id, "confirmation notification failed: {e}");
        }
    }
}

fn side_effect_failed(effect: &'static str) {
    metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "effect" => effect).increment(1);
}

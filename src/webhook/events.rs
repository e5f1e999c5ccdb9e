//! Narrow internal shape for payment-provider webhook payloads.
//!
//! Only the fields the lifecycle needs survive translation; the rest of the
//! vendor payload never reaches the engine.

use std::collections::HashMap;

use serde::Deserialize;

use super::WebhookError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    CheckoutCompleted,
    AsyncPaymentSucceeded,
    CheckoutExpired,
    AsyncPaymentFailed,
    Other(String),
}

impl PaymentEventKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutCompleted,
            "checkout.session.async_payment_succeeded" => Self::AsyncPaymentSucceeded,
            "checkout.session.expired" => Self::CheckoutExpired,
            "checkout.session.async_payment_failed" => Self::AsyncPaymentFailed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::CheckoutCompleted => "checkout.session.completed",
            Self::AsyncPaymentSucceeded => "checkout.session.async_payment_succeeded",
            Self::CheckoutExpired => "checkout.session.expired",
            Self::AsyncPaymentFailed => "checkout.session.async_payment_failed",
            Self::Other(s) => s,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted => "completed",
            Self::AsyncPaymentSucceeded => "async_payment_succeeded",
            Self::CheckoutExpired => "expired",
            Self::AsyncPaymentFailed => "async_payment_failed",
            Self::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub event_id: String,
    pub kind: PaymentEventKind,
    /// Checkout session id (`data.object.id`).
    pub session_id: Option<String>,
    /// Booking id from metadata, if the checkout carried one.
    pub booking_ref: Option<String>,
    /// Smallest currency unit.
    pub amount_total: Option<i64>,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: EnvelopeData,
}

#[derive(Deserialize, Default)]
struct EnvelopeData {
    #[serde(default)]
    object: SessionObject,
}

#[derive(Deserialize, Default)]
struct SessionObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

impl SessionObject {
    fn booking_ref(&self) -> Option<String> {
        ["booking_id", "bookingId"].iter().find_map(|key| {
            match self.metadata.get(*key)? {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        })
    }
}

impl PaymentEvent {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WebhookError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let object = envelope.data.object;
        Ok(Self {
            event_id: envelope.id,
            kind: PaymentEventKind::parse(&envelope.event_type),
            booking_ref: object.booking_ref(),
            session_id: object.id,
            amount_total: object.amount_total,
            payment_status: object.payment_status,
        })
    }

    /// Whether the session's funds are in hand. Delayed payment methods
    /// complete checkout as `unpaid` and settle with a later
    /// `async_payment_succeeded` event.
    pub fn funds_captured(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            None | Some("paid") | Some("no_payment_required")
        )
    }
}

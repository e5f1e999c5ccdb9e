//! Payment-provider webhooks: verify, translate, and feed the lifecycle.

mod events;
mod processor;
mod signature;

pub use events::{PaymentEvent, PaymentEventKind};
pub use processor::{WebhookAck, WebhookProcessor};
pub use signature::{sign_payload, SignatureVerifier, StripeSignatureVerifier};

use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    MissingSignature,
    InvalidSignature(String),
    TimestampOutOfTolerance,
    InvalidPayload(String),
    Engine(EngineError),
}

impl WebhookError {
    /// The only errors surfaced to the provider; everything else is acknowledged.
    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature(_)
                | WebhookError::TimestampOutOfTolerance
        )
    }
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::MissingSignature => write!(f, "missing signature header"),
            WebhookError::InvalidSignature(msg) => write!(f, "signature verification failed: {msg}"),
            WebhookError::TimestampOutOfTolerance => write!(f, "timestamp outside tolerance"),
            WebhookError::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            WebhookError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WebhookError {}

impl From<EngineError> for WebhookError {
    fn from(e: EngineError) -> Self {
        WebhookError::Engine(e)
    }
}

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::limits::WEBHOOK_TOLERANCE_SECS;

use super::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies that a raw webhook body was sent by the payment provider.
/// An SDK-backed implementation can stand in for the built-in one.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, raw_body: &[u8], header: &str, now_secs: i64) -> Result<(), WebhookError>;
}

/// `t=<unix secs>,v1=<hex hmac-sha256 of "t.body">`, keyed by the endpoint
/// secret. Any one matching `v1` passes.
pub struct StripeSignatureVerifier {
    secret: Option<String>,
    tolerance_secs: i64,
}

impl StripeSignatureVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            tolerance_secs: WEBHOOK_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, secs: i64) -> Self {
        self.tolerance_secs = secs;
        self
    }
}

fn keyed_mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Build a header the verifier accepts. Used by tests and local tooling.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
    let ts = timestamp.to_string();
    let digest = keyed_mac(secret, &ts, body)?.finalize().into_bytes();
    Ok(format!("t={ts},v1={}", hex::encode(digest)))
}

impl SignatureVerifier for StripeSignatureVerifier {
    fn verify(&self, raw_body: &[u8], header: &str, now_secs: i64) -> Result<(), WebhookError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| WebhookError::InvalidSignature("webhook secret not configured".into()))?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = Some(v),
                Some(("v1", v)) => candidates.push(v),
                _ => {}
            }
        }
        let ts = timestamp
            .ok_or_else(|| WebhookError::InvalidSignature("missing timestamp".into()))?;
        let ts_secs: i64 = ts
            .parse()
            .map_err(|_| WebhookError::InvalidSignature("malformed timestamp".into()))?;
        if candidates.is_empty() {
            return Err(WebhookError::InvalidSignature("no v1 signature".into()));
        }
        if now_secs - ts_secs > self.tolerance_secs {
            return Err(WebhookError::TimestampOutOfTolerance);
        }

        let mac = keyed_mac(secret, ts, raw_body)?;
        let matched = candidates
            .iter()
            .filter_map(|c| hex::decode(c).ok())
            .any(|sig| mac.clone().verify_slice(&sig).is_ok());
        if matched {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature("no matching signature".into()))
        }
    }
}

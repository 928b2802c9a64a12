//! Stripe integration: the create-and-confirm charge call used by the
//! checkout orchestrator, plus webhook signature verification for the
//! settlement reconciler.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::domain::errors::DomainError;
use crate::domain::ports::{ChargeRequest, PaymentConfirmation, PaymentProcessor};

const API_BASE: &str = "https://api.stripe.com/v1";

/// Reject signed payloads older than this, limiting replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeClient {
    http: reqwest::blocking::Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            secret_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

impl PaymentProcessor for StripeClient {
    /// POST /v1/payment_intents with `confirm=true`: a single round-trip that
    /// both creates and captures the payment. Transport errors and API
    /// errors are both payment failures from the caller's point of view.
    fn charge(&self, request: ChargeRequest) -> Result<PaymentConfirmation, DomainError> {
        let params = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.clone()),
            ("payment_method", request.payment_method.clone()),
            ("confirm", "true".to_string()),
            ("metadata[customer_ref]", request.customer_ref.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            (
                "automatic_payment_methods[allow_redirects]",
                "never".to_string(),
            ),
        ];

        let response = self
            .http
            .post(format!("{}/payment_intents", API_BASE))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .map_err(|e| DomainError::PaymentFailed(format!("processor unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<StripeErrorBody>()
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(DomainError::PaymentFailed(message));
        }

        let intent: PaymentIntent = response
            .json()
            .map_err(|e| DomainError::PaymentFailed(format!("malformed processor reply: {}", e)))?;

        Ok(PaymentConfirmation {
            succeeded: intent.status == "succeeded",
            payment_ref: intent.id,
            status: intent.status,
        })
    }
}

/// A notification relevant to settlement, extracted from a webhook body.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded { payment_ref: String },
    PaymentFailed { payment_ref: String },
    /// Delivered but not relevant to the pipeline; acknowledged and dropped.
    Ignored,
}

/// Verify a `Stripe-Signature` style header (`t=<unix>,v1=<hex hmac>`)
/// against the raw request body: HMAC-SHA256 over `"{t}.{body}"` with the
/// shared webhook secret, plus a freshness check on `t`.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str) -> Result<(), DomainError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(DomainError::InvalidSignature)?;
    if candidates.is_empty() {
        return Err(DomainError::InvalidSignature);
    }

    let age = (chrono::Utc::now().timestamp() - timestamp).abs();
    if age > SIGNATURE_TOLERANCE_SECS {
        return Err(DomainError::InvalidSignature);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| DomainError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    for candidate in candidates {
        if let Ok(decoded) = hex::decode(candidate) {
            // verify_slice is constant-time.
            if mac.clone().verify_slice(&decoded).is_ok() {
                return Ok(());
            }
        }
    }
    Err(DomainError::InvalidSignature)
}

/// Map a verified webhook body to a settlement event.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, DomainError> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "type")]
        event_type: String,
        data: EnvelopeData,
    }
    #[derive(Deserialize)]
    struct EnvelopeData {
        object: EnvelopeObject,
    }
    #[derive(Deserialize)]
    struct EnvelopeObject {
        id: String,
    }

    let envelope: Envelope = serde_json::from_slice(payload)
        .map_err(|e| DomainError::InvalidInput(format!("malformed webhook body: {}", e)))?;

    Ok(match envelope.event_type.as_str() {
        "payment_intent.succeeded" => WebhookEvent::PaymentSucceeded {
            payment_ref: envelope.data.object.id,
        },
        "payment_intent.payment_failed" => WebhookEvent::PaymentFailed {
            payment_ref: envelope.data.object.id,
        },
        _ => WebhookEvent::Ignored,
    })
}

#[cfg(test)]
mod tests {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::{parse_event, verify_signature, WebhookEvent};
    use crate::domain::errors::DomainError;

    const SECRET: &str = "whsec_test123secret456";

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn header_for(payload: &[u8], secret: &str, timestamp: i64) -> String {
        format!("t={},v1={}", timestamp, sign(payload, secret, timestamp))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let now = chrono::Utc::now().timestamp();
        let header = header_for(payload, SECRET, now);

        verify_signature(payload, &header, SECRET).expect("should verify");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let now = chrono::Utc::now().timestamp();
        let header = header_for(payload, "whsec_other", now);

        let err = verify_signature(payload, &header, SECRET).expect_err("must fail");
        assert!(matches!(err, DomainError::InvalidSignature));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let tampered = br#"{"type":"payment_intent.succeeded","amount":1}"#;
        let now = chrono::Utc::now().timestamp();
        let header = header_for(payload, SECRET, now);

        assert!(verify_signature(tampered, &header, SECRET).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let stale = chrono::Utc::now().timestamp() - 600;
        let header = header_for(payload, SECRET, stale);

        assert!(verify_signature(payload, &header, SECRET).is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let payload = b"{}";
        assert!(verify_signature(payload, "v1=deadbeef", SECRET).is_err());
        assert!(verify_signature(payload, "t=123", SECRET).is_err());
        assert!(verify_signature(payload, "", SECRET).is_err());
    }

    #[test]
    fn success_event_parses_to_payment_ref() {
        let payload =
            br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_123"}}}"#;
        let event = parse_event(payload).expect("parse");
        assert_eq!(
            event,
            WebhookEvent::PaymentSucceeded { payment_ref: "pi_123".to_string() }
        );
    }

    #[test]
    fn failure_event_parses_to_payment_ref() {
        let payload =
            br#"{"type":"payment_intent.payment_failed","data":{"object":{"id":"pi_9"}}}"#;
        let event = parse_event(payload).expect("parse");
        assert_eq!(
            event,
            WebhookEvent::PaymentFailed { payment_ref: "pi_9".to_string() }
        );
    }

    #[test]
    fn unrelated_event_is_ignored() {
        let payload = br#"{"type":"charge.refunded","data":{"object":{"id":"re_1"}}}"#;
        assert_eq!(parse_event(payload).expect("parse"), WebhookEvent::Ignored);
    }

    #[test]
    fn garbage_body_is_invalid_input() {
        let err = parse_event(b"not json").expect_err("must fail");
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }
}

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::application::settlement::SettlementService;
use crate::config::Settings;
use crate::domain::errors::DomainError;
use crate::errors::AppError;
use crate::payment::{parse_event, verify_signature, WebhookEvent};

/// POST /webhooks/stripe
///
/// Settlement notification entry point. The signature is verified against
/// the raw body before anything is parsed; without a configured webhook
/// secret every delivery is rejected.
///
/// Reconciliation failures after a valid signature are logged, not returned:
/// the processor's outcome is authoritative and already happened, so the
/// delivery is acknowledged and any residue is an operator problem.
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    request_body = String,
    responses(
        (status = 200, description = "Notification acknowledged"),
        (status = 400, description = "Signature verification failed"),
    ),
    tag = "webhooks"
)]
pub async fn stripe_webhook(
    settings: web::Data<Settings>,
    service: web::Data<SettlementService>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let Some(secret) = settings.stripe_webhook_secret.as_deref() else {
        log::error!("Webhook rejected: STRIPE_WEBHOOK_SECRET is not configured");
        return Err(DomainError::InvalidSignature.into());
    };

    let signature = req
        .headers()
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(DomainError::InvalidSignature)?;

    verify_signature(&body, signature, secret)?;

    let outcome = match parse_event(&body)? {
        WebhookEvent::PaymentSucceeded { payment_ref } => {
            web::block(move || service.payment_succeeded(&payment_ref)).await
        }
        WebhookEvent::PaymentFailed { payment_ref } => {
            web::block(move || service.payment_failed(&payment_ref)).await
        }
        WebhookEvent::Ignored => return Ok(HttpResponse::Ok().json(json!({ "received": true }))),
    };

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Settlement reconciliation failed: {}", e),
        Err(e) => log::error!("Settlement task failed: {}", e),
    }

    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

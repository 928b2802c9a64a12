use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::checkout::CheckoutService;
use crate::errors::AppError;

use super::AuthedUser;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// Shipping address; must belong to the requester.
    pub address_id: Uuid,
    /// Processor payment-method reference (e.g. "pm_...").
    pub payment_method_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub message: String,
    pub order_id: Uuid,
    pub payment_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryLineResponse {
    pub item_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: String,
    pub subtotal: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSummaryResponse {
    pub cart_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<SummaryLineResponse>,
    pub total: String,
}

/// GET /checkout/summary
///
/// Validates the requester's active cart and returns item subtotals and the
/// total that checkout would charge. No money moves here.
#[utoipa::path(
    get,
    path = "/checkout/summary",
    responses(
        (status = 200, description = "Cart validated and totalled", body = CheckoutSummaryResponse),
        (status = 404, description = "No active cart, or cart is empty"),
        (status = 410, description = "Cart expired"),
    ),
    tag = "checkout"
)]
pub async fn checkout_summary(
    service: web::Data<CheckoutService>,
    user: AuthedUser,
) -> Result<HttpResponse, AppError> {
    let summary = web::block(move || service.summary(user.0))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(CheckoutSummaryResponse {
        cart_id: summary.cart_id,
        expires_at: summary.expires_at,
        items: summary
            .items
            .into_iter()
            .map(|line| SummaryLineResponse {
                item_id: line.item_id,
                product_name: line.product_name,
                sku: line.variant_sku,
                quantity: line.quantity,
                unit_price: line.unit_price.to_string(),
                subtotal: line.subtotal.to_string(),
            })
            .collect(),
        total: summary.total.to_string(),
    }))
}

/// POST /checkout
///
/// Runs the checkout state machine on the requester's active cart:
/// validate, charge the processor, then finalize order + cart atomically.
#[utoipa::path(
    post,
    path = "/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order settled", body = CheckoutResponse),
        (status = 402, description = "Payment declined; cart and reservations kept"),
        (status = 403, description = "Address belongs to another user"),
        (status = 404, description = "No active cart, or unknown address"),
        (status = 410, description = "Cart expired"),
        (status = 500, description = "Payment captured but finalization failed"),
    ),
    tag = "checkout"
)]
pub async fn create_order(
    service: web::Data<CheckoutService>,
    user: AuthedUser,
    body: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let receipt =
        web::block(move || service.checkout(user.0, body.address_id, &body.payment_method_id))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(CheckoutResponse {
        message: "Order placed successfully".to_string(),
        order_id: receipt.order_id,
        payment_id: receipt.payment_ref,
    }))
}

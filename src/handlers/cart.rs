use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::cart_service::CartService;
use crate::errors::AppError;

use super::AuthedUser;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddItemResponse {
    pub message: String,
    pub cart_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemResponse {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    /// Per-unit price captured at add time, as a decimal string.
    pub price: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartSummaryResponse {
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartResponse {
    /// `null` when the user has no active cart.
    pub cart: Option<CartSummaryResponse>,
    pub items: Vec<CartItemResponse>,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /cart/items
///
/// Adds a variant to the requester's active cart, reserving stock in the
/// same transaction. Repeated adds for the same variant merge quantities.
#[utoipa::path(
    post,
    path = "/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added, stock reserved", body = AddItemResponse),
        (status = 404, description = "Unknown product variant"),
        (status = 409, description = "Insufficient stock"),
    ),
    tag = "cart"
)]
pub async fn add_item(
    service: web::Data<CartService>,
    user: AuthedUser,
    body: web::Json<AddItemRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let cart_id = web::block(move || service.add_item(user.0, body.variant_id, body.quantity))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(AddItemResponse {
        message: "Item added to cart".to_string(),
        cart_id,
    }))
}

/// DELETE /cart/items/{id}
///
/// Removes the item; stock is restored only while the owning cart is still
/// active.
#[utoipa::path(
    delete,
    path = "/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item UUID")),
    responses(
        (status = 200, description = "Item removed"),
        (status = 403, description = "Cart belongs to another user"),
        (status = 404, description = "Unknown cart item"),
    ),
    tag = "cart"
)]
pub async fn remove_item(
    service: web::Data<CartService>,
    user: AuthedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let item_id = path.into_inner();
    web::block(move || service.remove_item(item_id, user.0))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(json!({ "message": "Item removed from cart" })))
}

/// GET /cart
///
/// The requester's active cart with items enriched with catalog data, or the
/// empty-cart sentinel.
#[utoipa::path(
    get,
    path = "/cart",
    responses(
        (status = 200, description = "Active cart (possibly empty)", body = CartResponse),
    ),
    tag = "cart"
)]
pub async fn view_cart(
    service: web::Data<CartService>,
    user: AuthedUser,
) -> Result<HttpResponse, AppError> {
    let view = web::block(move || service.view(user.0))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(CartResponse {
        cart: view.cart.map(|cart| CartSummaryResponse {
            id: cart.id,
            expires_at: cart.expires_at,
        }),
        items: view
            .items
            .into_iter()
            .map(|item| CartItemResponse {
                id: item.id,
                variant_id: item.product_variant_id,
                product_name: item.product_name,
                sku: item.variant_sku,
                quantity: item.quantity,
                price: item.price.to_string(),
            })
            .collect(),
    }))
}

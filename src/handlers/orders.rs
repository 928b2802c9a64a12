use actix_web::{web, HttpResponse};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::errors::AppError;
use crate::models::order::Order;
use crate::models::order_item::OrderItem;
use crate::schema::{order_items, orders};

use super::AuthedUser;

// ── Response DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    pub price: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub payment_id: String,
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub payment_status: String,
    pub created_at: String,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HistoryParams {
    /// Page number (1-based). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of orders per page. Defaults to 20, maximum 100.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub items: Vec<OrderResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

fn to_response(order: Order, items: Vec<OrderItem>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        payment_id: order.payment_ref,
        amount: order.amount.to_string(),
        currency: order.currency,
        status: order.status,
        payment_status: order.payment_status,
        created_at: order.created_at.to_rfc3339(),
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                id: item.id,
                product_name: item.product_name,
                sku: item.variant_sku,
                quantity: item.quantity,
                price: item.price.to_string(),
            })
            .collect(),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /orders
///
/// The requester's order history, newest first, with item snapshots.
#[utoipa::path(
    get,
    path = "/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number (1-based, default 1)"),
        ("limit" = Option<i64>, Query, description = "Orders per page (default 20, max 100)"),
    ),
    responses(
        (status = 200, description = "Paginated order history", body = HistoryResponse),
    ),
    tag = "orders"
)]
pub async fn get_history(
    pool: web::Data<DbPool>,
    user: AuthedUser,
    query: web::Query<HistoryParams>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let page = params.page.max(1);
    let limit = params.limit.clamp(1, 100);
    let offset = (page - 1) * limit;

    let result = web::block(move || {
        let mut conn = pool.get()?;

        let total: i64 = orders::table
            .filter(orders::user_id.eq(user.0))
            .count()
            .get_result(&mut conn)?;

        let rows: Vec<Order> = orders::table
            .filter(orders::user_id.eq(user.0))
            .select(Order::as_select())
            .order(orders::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load(&mut conn)?;

        let snapshots: Vec<OrderItem> = OrderItem::belonging_to(&rows)
            .select(OrderItem::as_select())
            .load(&mut conn)?;
        let grouped = snapshots.grouped_by(&rows);

        let items = rows
            .into_iter()
            .zip(grouped)
            .map(|(order, items)| to_response(order, items))
            .collect::<Vec<_>>();

        Ok::<_, DomainError>((total, items))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;
    let (total, items) = result;

    Ok(HttpResponse::Ok().json(HistoryResponse {
        total,
        page,
        limit,
        items,
    }))
}

/// GET /orders/{id}
///
/// One order with its item snapshots; only visible to its owner.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order UUID")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 403, description = "Order belongs to another user"),
        (status = 404, description = "Order not found"),
    ),
    tag = "orders"
)]
pub async fn get_order(
    pool: web::Data<DbPool>,
    user: AuthedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();

    let response = web::block(move || {
        let mut conn = pool.get()?;

        let order: Order = orders::table
            .filter(orders::id.eq(order_id))
            .select(Order::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(DomainError::NotFound("Order"))?;
        if order.user_id != user.0 {
            return Err(DomainError::Forbidden);
        }

        let items: Vec<OrderItem> = order_items::table
            .filter(order_items::order_id.eq(order.id))
            .select(OrderItem::as_select())
            .load(&mut conn)?;

        Ok::<_, DomainError>(to_response(order, items))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(response))
}

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::order_items;

/// Denormalized snapshot of what was bought. Name and SKU are copied at
/// purchase time so the order survives catalog mutation; `product_variant_id`
/// is kept (nullable) so the reconciler can restore stock on payment failure.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = order_items)]
#[diesel(belongs_to(crate::models::order::Order))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_variant_id: Option<Uuid>,
    pub product_name: String,
    pub variant_sku: String,
    pub quantity: i32,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = order_items)]
pub struct NewOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_variant_id: Option<Uuid>,
    pub product_name: String,
    pub variant_sku: String,
    pub quantity: i32,
    pub price: BigDecimal,
}

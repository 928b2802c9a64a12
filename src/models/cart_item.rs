use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::cart_items;

/// `price` is the per-unit price captured when the item was first added.
/// A unique index on (cart_id, product_variant_id) guarantees repeated adds
/// merge into one row.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = cart_items)]
#[diesel(belongs_to(crate::models::cart::Cart))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_variant_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cart_items)]
pub struct NewCartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_variant_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
}

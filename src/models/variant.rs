use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::product_variants;

/// `quantity` is the stock ledger for this variant. It only moves through
/// the reservation/restoration primitives in `crate::stock`.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = product_variants)]
#[diesel(belongs_to(crate::models::product::Product))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub color: Option<String>,
    pub price: Option<BigDecimal>,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = product_variants)]
pub struct NewProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub color: Option<String>,
    pub price: Option<BigDecimal>,
    pub quantity: i32,
}

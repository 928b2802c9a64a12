use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::orders;

/// `payment_ref` is the external processor's payment id and the key the
/// settlement reconciler uses to find this order again.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_ref: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub payment_status: String,
    pub shipping_address: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_ref: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub payment_status: String,
    pub shipping_address: Value,
}

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A cart item enriched with current catalog data, as returned by the
/// cart view operation.
#[derive(Debug, Clone)]
pub struct CartItemView {
    pub id: Uuid,
    pub product_variant_id: Uuid,
    pub product_name: String,
    pub variant_sku: String,
    pub quantity: i32,
    /// Price captured when the item was added, immune to later catalog edits.
    pub price: BigDecimal,
}

/// The active cart with its items. `cart` is `None` when the user has no
/// active cart; the handler turns that into the empty-cart sentinel.
#[derive(Debug, Clone)]
pub struct CartView {
    pub cart: Option<CartSummary>,
    pub items: Vec<CartItemView>,
}

impl CartView {
    pub fn empty() -> Self {
        CartView { cart: None, items: vec![] }
    }
}

#[derive(Debug, Clone)]
pub struct CartSummary {
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Returned to the caller once checkout settles.
#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub payment_ref: String,
}

/// Pre-checkout validation result: the cart totalled line by line, exactly
/// as the charge amount will be computed.
#[derive(Debug, Clone)]
pub struct CheckoutSummary {
    pub cart_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<SummaryLine>,
    pub total: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct SummaryLine {
    pub item_id: Uuid,
    pub product_name: String,
    pub variant_sku: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub subtotal: BigDecimal,
}

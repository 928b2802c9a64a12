//! Cart Aggregate operations: add, remove, view.
//!
//! Stock is reserved at add-time, not at checkout-time, so two shoppers can
//! never both win the last unit at checkout. Every reservation made here is
//! matched by exactly one restoration, performed by whichever actor wins the
//! cart's status compare-and-swap (user removal, checkout, or the sweeper).

use chrono::{Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::status::CartStatus;
use crate::domain::views::{CartItemView, CartSummary, CartView};
use crate::models::cart::{Cart, NewCart};
use crate::models::cart_item::{CartItem, NewCartItem};
use crate::models::product::Product;
use crate::models::variant::ProductVariant;
use crate::schema::{cart_items, carts, product_variants, products};
use crate::stock;

pub struct CartService {
    pool: DbPool,
    cart_expiry: Duration,
}

impl CartService {
    pub fn new(pool: DbPool, cart_expiry: Duration) -> Self {
        Self { pool, cart_expiry }
    }

    /// Add `quantity` units of a variant to the user's active cart, creating
    /// the cart if necessary and reserving the stock in the same transaction.
    ///
    /// Repeated adds for the same variant merge into one cart item, keeping
    /// the price captured on the first add. Returns the cart id.
    pub fn add_item(
        &self,
        user_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<Uuid, DomainError> {
        if quantity < 1 {
            return Err(DomainError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }

        let mut conn = self.pool.get()?;
        let expires_at = Utc::now() + self.cart_expiry;

        conn.transaction::<_, DomainError, _>(|conn| {
            let variant: ProductVariant = product_variants::table
                .filter(product_variants::id.eq(variant_id))
                .select(ProductVariant::as_select())
                .first(conn)
                .optional()?
                .ok_or(DomainError::NotFound("Product variant"))?;

            // Find or create the active cart, pushing expiry forward either way.
            let existing: Option<Cart> = carts::table
                .filter(carts::user_id.eq(user_id))
                .filter(carts::status.eq(CartStatus::Active.as_str()))
                .select(Cart::as_select())
                .first(conn)
                .optional()?;

            let cart_id = match existing {
                Some(cart) => {
                    diesel::update(carts::table.filter(carts::id.eq(cart.id)))
                        .set((
                            carts::expires_at.eq(expires_at),
                            carts::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)?;
                    cart.id
                }
                None => {
                    // Two first adds can race past the lookup; the partial
                    // unique index on (user_id) WHERE active arbitrates.
                    // `do_nothing` keeps the transaction alive for the loser,
                    // who merges into the winner's cart.
                    let fresh = NewCart {
                        id: Uuid::new_v4(),
                        user_id,
                        status: CartStatus::Active.as_str().to_string(),
                        expires_at,
                    };
                    let inserted = diesel::insert_into(carts::table)
                        .values(&fresh)
                        .on_conflict(carts::user_id)
                        .filter_target(carts::status.eq(CartStatus::Active.as_str()))
                        .do_nothing()
                        .execute(conn)?;
                    if inserted == 1 {
                        fresh.id
                    } else {
                        carts::table
                            .filter(carts::user_id.eq(user_id))
                            .filter(carts::status.eq(CartStatus::Active.as_str()))
                            .select(carts::id)
                            .first(conn)?
                    }
                }
            };

            stock::reserve(conn, variant_id, quantity)?;

            // Effective price: variant override, else the product base price.
            // Only used when this is the first add; a merge keeps the price
            // captured back then.
            let price = match variant.price.clone() {
                Some(price) => price,
                None => products::table
                    .filter(products::id.eq(variant.product_id))
                    .select(products::base_price)
                    .first(conn)?,
            };

            diesel::insert_into(cart_items::table)
                .values(&NewCartItem {
                    id: Uuid::new_v4(),
                    cart_id,
                    product_variant_id: variant_id,
                    quantity,
                    price,
                })
                .on_conflict((cart_items::cart_id, cart_items::product_variant_id))
                .do_update()
                .set(cart_items::quantity.eq(cart_items::quantity + quantity))
                .execute(conn)?;

            Ok(cart_id)
        })
    }

    /// Remove a cart item, restoring its reserved stock only while the owning
    /// cart is still `active`. Once the cart has moved on (`processing`,
    /// `expired`, `failed`, `completed`), another actor owns or has already
    /// performed the restoration and restoring again would double-count.
    pub fn remove_item(&self, item_id: Uuid, requester: Uuid) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        let expires_at = Utc::now() + self.cart_expiry;

        conn.transaction::<_, DomainError, _>(|conn| {
            let found: Option<(CartItem, Cart)> = cart_items::table
                .inner_join(carts::table)
                .filter(cart_items::id.eq(item_id))
                .select((CartItem::as_select(), Cart::as_select()))
                .first(conn)
                .optional()?;

            let (item, cart) = found.ok_or(DomainError::NotFound("Cart item"))?;
            if cart.user_id != requester {
                return Err(DomainError::Forbidden);
            }

            if cart.status == CartStatus::Active.as_str() {
                if stock::restore(conn, item.product_variant_id, item.quantity)?.is_none() {
                    log::warn!(
                        "Variant {} vanished before stock restore for cart item {}",
                        item.product_variant_id,
                        item.id
                    );
                }
                diesel::update(carts::table.filter(carts::id.eq(cart.id)))
                    .set((
                        carts::expires_at.eq(expires_at),
                        carts::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
            }

            // The item row goes away regardless of cart status.
            diesel::delete(cart_items::table.filter(cart_items::id.eq(item.id))).execute(conn)?;

            Ok(())
        })
    }

    /// The user's active cart with items enriched with current catalog data,
    /// or the empty-cart sentinel.
    pub fn view(&self, user_id: Uuid) -> Result<CartView, DomainError> {
        let mut conn = self.pool.get()?;

        let cart: Option<Cart> = carts::table
            .filter(carts::user_id.eq(user_id))
            .filter(carts::status.eq(CartStatus::Active.as_str()))
            .select(Cart::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(cart) = cart else {
            return Ok(CartView::empty());
        };

        let rows: Vec<(CartItem, ProductVariant, Product)> = cart_items::table
            .inner_join(product_variants::table.inner_join(products::table))
            .filter(cart_items::cart_id.eq(cart.id))
            .select((
                CartItem::as_select(),
                ProductVariant::as_select(),
                Product::as_select(),
            ))
            .load(&mut conn)?;

        Ok(CartView {
            cart: Some(CartSummary {
                id: cart.id,
                expires_at: cart.expires_at,
            }),
            items: rows
                .into_iter()
                .map(|(item, variant, product)| CartItemView {
                    id: item.id,
                    product_variant_id: variant.id,
                    product_name: product.name,
                    variant_sku: variant.sku,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
        })
    }
}

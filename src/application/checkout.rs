//! Checkout orchestrator: validating → paying → finalizing.
//!
//! Stock was already decremented at add-to-cart time, so no inventory moves
//! here. The external charge is made outside any database transaction; a
//! declined or errored payment leaves the cart `active` and its stock
//! reserved, deliberately, so retry and sweeper reclamation cannot race a
//! synchronous compensation. Only a confirmed payment reaches the finalize
//! transaction.

use std::sync::Arc;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::ports::{ChargeRequest, PaymentProcessor};
use crate::domain::status::{CartStatus, OrderStatus, PaymentState};
use crate::domain::views::{CheckoutReceipt, CheckoutSummary, SummaryLine};
use crate::models::address::UserAddress;
use crate::models::cart::Cart;
use crate::models::cart_item::CartItem;
use crate::models::order::NewOrder;
use crate::models::order_item::NewOrderItem;
use crate::models::product::Product;
use crate::models::variant::ProductVariant;
use crate::schema::{cart_items, carts, order_items, orders, product_variants, products, user_addresses};

const UNKNOWN_PRODUCT: &str = "Unknown product";
const UNKNOWN_SKU: &str = "UNKNOWN-SKU";

pub struct CheckoutService {
    pool: DbPool,
    processor: Arc<dyn PaymentProcessor>,
    currency: String,
}

impl CheckoutService {
    pub fn new(pool: DbPool, processor: Arc<dyn PaymentProcessor>, currency: String) -> Self {
        Self {
            pool,
            processor,
            currency,
        }
    }

    /// Validate the active cart and total it line by line, without touching
    /// the processor. Runs the same checks checkout itself starts with, so a
    /// caller that gets a summary back knows checkout would pass validation.
    pub fn summary(&self, user_id: Uuid) -> Result<CheckoutSummary, DomainError> {
        let mut conn = self.pool.get()?;

        let cart: Cart = carts::table
            .filter(carts::user_id.eq(user_id))
            .filter(carts::status.eq(CartStatus::Active.as_str()))
            .select(Cart::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(DomainError::NotFound("Active cart"))?;

        if cart.expires_at <= Utc::now() {
            return Err(DomainError::CartExpired);
        }

        let rows: Vec<(CartItem, ProductVariant, Product)> = cart_items::table
            .inner_join(product_variants::table.inner_join(products::table))
            .filter(cart_items::cart_id.eq(cart.id))
            .select((
                CartItem::as_select(),
                ProductVariant::as_select(),
                Product::as_select(),
            ))
            .load(&mut conn)?;
        if rows.is_empty() {
            return Err(DomainError::NotFound("Active cart"));
        }

        let mut total = BigDecimal::from(0);
        let mut items = Vec::with_capacity(rows.len());
        for (item, variant, product) in rows {
            let subtotal = &item.price * BigDecimal::from(item.quantity);
            total = total + &subtotal;
            items.push(SummaryLine {
                item_id: item.id,
                product_name: product.name,
                variant_sku: variant.sku,
                quantity: item.quantity,
                unit_price: item.price,
                subtotal,
            });
        }

        Ok(CheckoutSummary {
            cart_id: cart.id,
            expires_at: cart.expires_at,
            items,
            total,
        })
    }

    pub fn checkout(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        payment_method: &str,
    ) -> Result<CheckoutReceipt, DomainError> {
        let mut conn = self.pool.get()?;

        // Validating.
        let cart: Cart = carts::table
            .filter(carts::user_id.eq(user_id))
            .filter(carts::status.eq(CartStatus::Active.as_str()))
            .select(Cart::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(DomainError::NotFound("Active cart"))?;

        if cart.expires_at <= Utc::now() {
            return Err(DomainError::CartExpired);
        }

        let items: Vec<CartItem> = cart_items::table
            .filter(cart_items::cart_id.eq(cart.id))
            .select(CartItem::as_select())
            .load(&mut conn)?;
        if items.is_empty() {
            return Err(DomainError::NotFound("Active cart"));
        }

        let address: UserAddress = user_addresses::table
            .filter(user_addresses::id.eq(address_id))
            .select(UserAddress::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or(DomainError::NotFound("Address"))?;
        if address.user_id != user_id {
            return Err(DomainError::Forbidden);
        }

        let amount: BigDecimal = items
            .iter()
            .map(|item| &item.price * BigDecimal::from(item.quantity))
            .sum();

        // Paying. A single synchronous round-trip, outside any transaction.
        // The connection is released while the network call is in flight.
        drop(conn);

        let confirmation = self.processor.charge(ChargeRequest {
            amount_minor: to_minor_units(&amount)?,
            currency: self.currency.clone(),
            customer_ref: user_id,
            payment_method: payment_method.to_string(),
        })?;
        if !confirmation.succeeded {
            return Err(DomainError::PaymentFailed(format!(
                "processor reported status '{}'",
                confirmation.status
            )));
        }
        let payment_ref = confirmation.payment_ref;

        // Finalizing. Money has been captured; from here on, any failure is
        // the lost-write case and must reach the operator with the payment
        // reference attached.
        let mut conn = self.pool.get().map_err(|e| {
            log::error!(
                "CRITICAL: payment {} captured but no DB connection for finalization: {}",
                payment_ref,
                e
            );
            DomainError::FinalizationFailed {
                payment_ref: payment_ref.clone(),
            }
        })?;

        let order_id = conn
            .transaction::<_, DomainError, _>(|conn| {
                // Claim the cart out of `active`; zero rows means another
                // actor (sweeper) won the status CAS while we were paying.
                let claimed = diesel::update(
                    carts::table
                        .filter(carts::id.eq(cart.id))
                        .filter(carts::status.eq(CartStatus::Active.as_str())),
                )
                .set((
                    carts::status.eq(CartStatus::Completed.as_str()),
                    carts::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
                if claimed == 0 {
                    return Err(DomainError::Internal(
                        "cart left active state during payment".to_string(),
                    ));
                }

                let order_id = Uuid::new_v4();
                diesel::insert_into(orders::table)
                    .values(&NewOrder {
                        id: order_id,
                        user_id,
                        payment_ref: payment_ref.clone(),
                        amount: amount.clone(),
                        currency: self.currency.clone(),
                        status: OrderStatus::Processing.as_str().to_string(),
                        payment_status: PaymentState::Paid.as_str().to_string(),
                        shipping_address: serde_json::to_value(&address)
                            .map_err(|e| DomainError::Internal(e.to_string()))?,
                    })
                    .execute(conn)?;

                // Snapshot name and SKU from the current catalog, with
                // sentinels when the variant vanished mid-flight.
                let mut snapshots = Vec::with_capacity(items.len());
                for item in &items {
                    let catalog: Option<(ProductVariant, Product)> = product_variants::table
                        .inner_join(products::table)
                        .filter(product_variants::id.eq(item.product_variant_id))
                        .select((ProductVariant::as_select(), Product::as_select()))
                        .first(conn)
                        .optional()?;

                    let (product_name, variant_sku) = match &catalog {
                        Some((variant, product)) => (product.name.clone(), variant.sku.clone()),
                        None => (UNKNOWN_PRODUCT.to_string(), UNKNOWN_SKU.to_string()),
                    };

                    snapshots.push(NewOrderItem {
                        id: Uuid::new_v4(),
                        order_id,
                        product_variant_id: catalog.as_ref().map(|_| item.product_variant_id),
                        product_name,
                        variant_sku,
                        quantity: item.quantity,
                        price: item.price.clone(),
                    });
                }
                diesel::insert_into(order_items::table)
                    .values(&snapshots)
                    .execute(conn)?;

                Ok(order_id)
            })
            .map_err(|e| {
                log::error!(
                    "CRITICAL: payment {} captured but order finalization failed for cart {}: {}",
                    payment_ref,
                    cart.id,
                    e
                );
                DomainError::FinalizationFailed {
                    payment_ref: payment_ref.clone(),
                }
            })?;

        log::info!(
            "Order {} settled with payment {} for user {}",
            order_id,
            payment_ref,
            user_id
        );

        Ok(CheckoutReceipt {
            order_id,
            payment_ref,
        })
    }
}

/// Convert a decimal major-unit amount to the processor's integer minor
/// units, rounding half-up on sub-cent residue.
fn to_minor_units(amount: &BigDecimal) -> Result<i64, DomainError> {
    (amount * BigDecimal::from(100))
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
        .ok_or_else(|| DomainError::Internal("amount out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bigdecimal::BigDecimal;
    use diesel::prelude::*;
    use uuid::Uuid;

    use super::{to_minor_units, CheckoutService};
    use crate::application::cart_service::CartService;
    use crate::domain::errors::DomainError;
    use crate::domain::ports::{ChargeRequest, PaymentConfirmation, PaymentProcessor};
    use crate::domain::status::CartStatus;
    use crate::schema::{carts, order_items, orders};
    use crate::testutil::{seed_address, seed_variant, setup_db, variant_quantity};

    /// Test double standing in for the external processor.
    struct StubProcessor {
        succeed: bool,
        calls: AtomicUsize,
        last_amount: AtomicUsize,
    }

    impl StubProcessor {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                calls: AtomicUsize::new(0),
                last_amount: AtomicUsize::new(0),
            })
        }
    }

    impl PaymentProcessor for StubProcessor {
        fn charge(&self, request: ChargeRequest) -> Result<PaymentConfirmation, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_amount
                .store(request.amount_minor as usize, Ordering::SeqCst);
            if self.succeed {
                Ok(PaymentConfirmation {
                    payment_ref: format!("pi_{}", Uuid::new_v4().simple()),
                    status: "succeeded".to_string(),
                    succeeded: true,
                })
            } else {
                Err(DomainError::PaymentFailed("card declined".to_string()))
            }
        }
    }

    #[test]
    fn minor_units_round_half_up() {
        let amount = BigDecimal::from_str("12.345").expect("decimal");
        assert_eq!(to_minor_units(&amount).expect("convert"), 1235);
        let amount = BigDecimal::from_str("30.00").expect("decimal");
        assert_eq!(to_minor_units(&amount).expect("convert"), 3000);
    }

    #[tokio::test]
    async fn settled_checkout_creates_paid_order_and_completes_cart() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 5, "10.00");
        let user = Uuid::new_v4();
        let address_id = seed_address(&mut conn, user);

        let carts_svc = CartService::new(pool.clone(), chrono::Duration::minutes(10));
        let cart_id = carts_svc.add_item(user, variant_id, 3).expect("add");
        assert_eq!(variant_quantity(&mut conn, variant_id), 2);

        let processor = StubProcessor::new(true);
        let checkout = CheckoutService::new(pool.clone(), processor.clone(), "usd".to_string());
        let receipt = checkout
            .checkout(user, address_id, "pm_card_visa")
            .expect("checkout");

        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        // 3 × 10.00 → 3000 cents.
        assert_eq!(processor.last_amount.load(Ordering::SeqCst), 3000);

        let (payment_status, status): (String, String) = orders::table
            .filter(orders::id.eq(receipt.order_id))
            .select((orders::payment_status, orders::status))
            .first(&mut conn)
            .expect("order");
        assert_eq!(payment_status, "paid");
        assert_eq!(status, "processing");

        let cart_status: String = carts::table
            .filter(carts::id.eq(cart_id))
            .select(carts::status)
            .first(&mut conn)
            .expect("cart");
        assert_eq!(cart_status, CartStatus::Completed.as_str());

        // Stock permanently consumed: still 2, no further movement.
        assert_eq!(variant_quantity(&mut conn, variant_id), 2);

        let snapshot_count: i64 = order_items::table
            .filter(order_items::order_id.eq(receipt.order_id))
            .count()
            .get_result(&mut conn)
            .expect("count");
        assert_eq!(snapshot_count, 1);
    }

    #[tokio::test]
    async fn declined_payment_leaves_cart_active_and_stock_reserved() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 5, "10.00");
        let user = Uuid::new_v4();
        let address_id = seed_address(&mut conn, user);

        let carts_svc = CartService::new(pool.clone(), chrono::Duration::minutes(10));
        let cart_id = carts_svc.add_item(user, variant_id, 3).expect("add");

        let checkout =
            CheckoutService::new(pool.clone(), StubProcessor::new(false), "usd".to_string());
        let err = checkout
            .checkout(user, address_id, "pm_card_visa")
            .expect_err("must fail");
        assert!(matches!(err, DomainError::PaymentFailed(_)));

        // No compensation here: the sweeper owns the eventual restore.
        let cart_status: String = carts::table
            .filter(carts::id.eq(cart_id))
            .select(carts::status)
            .first(&mut conn)
            .expect("cart");
        assert_eq!(cart_status, CartStatus::Active.as_str());
        assert_eq!(variant_quantity(&mut conn, variant_id), 2);

        let order_count: i64 = orders::table.count().get_result(&mut conn).expect("count");
        assert_eq!(order_count, 0);
    }

    #[tokio::test]
    async fn checkout_without_cart_is_not_found() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let user = Uuid::new_v4();
        let address_id = seed_address(&mut conn, user);

        let checkout =
            CheckoutService::new(pool.clone(), StubProcessor::new(true), "usd".to_string());
        let err = checkout
            .checkout(user, address_id, "pm_card_visa")
            .expect_err("must fail");
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn checkout_of_expired_cart_is_rejected_before_payment() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 5, "10.00");
        let user = Uuid::new_v4();
        let address_id = seed_address(&mut conn, user);

        let carts_svc = CartService::new(pool.clone(), chrono::Duration::minutes(10));
        let cart_id = carts_svc.add_item(user, variant_id, 2).expect("add");
        diesel::update(carts::table.filter(carts::id.eq(cart_id)))
            .set(carts::expires_at.eq(chrono::Utc::now() - chrono::Duration::minutes(1)))
            .execute(&mut conn)
            .expect("backdate");

        let processor = StubProcessor::new(true);
        let checkout = CheckoutService::new(pool.clone(), processor.clone(), "usd".to_string());
        let err = checkout
            .checkout(user, address_id, "pm_card_visa")
            .expect_err("must fail");
        assert!(matches!(err, DomainError::CartExpired));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0, "no charge attempted");
    }

    #[tokio::test]
    async fn summary_totals_the_cart_without_charging() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 10, "10.00");
        let user = Uuid::new_v4();

        let carts_svc = CartService::new(pool.clone(), chrono::Duration::minutes(10));
        carts_svc.add_item(user, variant_id, 3).expect("add");

        let processor = StubProcessor::new(true);
        let checkout = CheckoutService::new(pool.clone(), processor.clone(), "usd".to_string());
        let summary = checkout.summary(user).expect("summary");

        assert_eq!(summary.items.len(), 1);
        assert_eq!(summary.items[0].quantity, 3);
        assert_eq!(summary.items[0].subtotal.to_string(), "30.00");
        assert_eq!(summary.total.to_string(), "30.00");
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn summary_of_expired_cart_is_rejected() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 5, "10.00");
        let user = Uuid::new_v4();

        let carts_svc = CartService::new(pool.clone(), chrono::Duration::minutes(10));
        let cart_id = carts_svc.add_item(user, variant_id, 1).expect("add");
        diesel::update(carts::table.filter(carts::id.eq(cart_id)))
            .set(carts::expires_at.eq(chrono::Utc::now() - chrono::Duration::minutes(1)))
            .execute(&mut conn)
            .expect("backdate");

        let checkout =
            CheckoutService::new(pool.clone(), StubProcessor::new(true), "usd".to_string());
        let err = checkout.summary(user).expect_err("must fail");
        assert!(matches!(err, DomainError::CartExpired));
    }

    #[tokio::test]
    async fn foreign_address_is_forbidden() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 5, "10.00");
        let user = Uuid::new_v4();
        let foreign_address = seed_address(&mut conn, Uuid::new_v4());

        let carts_svc = CartService::new(pool.clone(), chrono::Duration::minutes(10));
        carts_svc.add_item(user, variant_id, 1).expect("add");

        let checkout =
            CheckoutService::new(pool.clone(), StubProcessor::new(true), "usd".to_string());
        let err = checkout
            .checkout(user, foreign_address, "pm_card_visa")
            .expect_err("must fail");
        assert!(matches!(err, DomainError::Forbidden));
    }
}

//! Settlement reconciler: consumes asynchronous payment-processor
//! notifications and brings local order and stock state back in line with
//! the processor's authoritative outcome.
//!
//! Both handlers are idempotent under redelivery. The processor has already
//! moved the money, so nothing here is surfaced to an end user; anything
//! that cannot be reconciled automatically is logged as an operational
//! incident instead.

use chrono::Utc;
use diesel::prelude::*;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::status::{OrderStatus, PaymentState};
use crate::models::order::Order;
use crate::models::order_item::OrderItem;
use crate::schema::{order_items, orders};
use crate::stock;

pub struct SettlementService {
    pool: DbPool,
}

impl SettlementService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The processor reports a payment as captured.
    ///
    /// Normally a no-op: checkout already recorded the paid order. If the
    /// order was locally written off (`failed`/`cancelled`) the processor
    /// wins and the order is promoted back to paid. A missing order is the
    /// severe lost-write case; it is logged loudly and acknowledged, since
    /// reconstructing an order from processor metadata alone is not
    /// supported.
    pub fn payment_succeeded(&self, payment_ref: &str) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;

        let order: Option<Order> = orders::table
            .filter(orders::payment_ref.eq(payment_ref))
            .select(Order::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(order) = order else {
            log::error!(
                "CRITICAL: payment {} succeeded at the processor but no local order exists \
                 (lost write); manual reconciliation required",
                payment_ref
            );
            return Ok(());
        };

        if order.payment_status == PaymentState::Paid.as_str() {
            log::info!("Payment {} already settled on order {}", payment_ref, order.id);
            return Ok(());
        }

        if order.status == OrderStatus::Cancelled.as_str()
            || order.payment_status == PaymentState::Failed.as_str()
        {
            diesel::update(orders::table.filter(orders::id.eq(order.id)))
                .set((
                    orders::status.eq(OrderStatus::Processing.as_str()),
                    orders::payment_status.eq(PaymentState::Paid.as_str()),
                    orders::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;
            log::warn!(
                "Order {} was written off locally but payment {} succeeded; promoted to paid",
                order.id,
                payment_ref
            );
            return Ok(());
        }

        // Pending order, e.g. the notification raced the finalize commit.
        diesel::update(orders::table.filter(orders::id.eq(order.id)))
            .set((
                orders::payment_status.eq(PaymentState::Paid.as_str()),
                orders::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        log::info!("Payment {} confirmed for order {}", payment_ref, order.id);
        Ok(())
    }

    /// The processor reports a payment as failed.
    ///
    /// Cancels the order and restores stock for every snapshotted item, in
    /// one transaction, keyed on the order not being cancelled yet so a
    /// redelivered notification cannot restore stock twice.
    pub fn payment_failed(&self, payment_ref: &str) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;

        let order: Option<Order> = orders::table
            .filter(orders::payment_ref.eq(payment_ref))
            .select(Order::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(order) = order else {
            log::info!("Failure notification for unknown payment {}, nothing to do", payment_ref);
            return Ok(());
        };

        conn.transaction::<_, DomainError, _>(|conn| {
            // The CAS doubles as the idempotency guard.
            let cancelled = diesel::update(
                orders::table
                    .filter(orders::id.eq(order.id))
                    .filter(orders::status.ne(OrderStatus::Cancelled.as_str())),
            )
            .set((
                orders::status.eq(OrderStatus::Cancelled.as_str()),
                orders::payment_status.eq(PaymentState::Failed.as_str()),
                orders::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

            if cancelled == 0 {
                log::info!(
                    "Order {} already cancelled, skipping stock restore for payment {}",
                    order.id,
                    payment_ref
                );
                return Ok(());
            }

            let items: Vec<OrderItem> = order_items::table
                .filter(order_items::order_id.eq(order.id))
                .select(OrderItem::as_select())
                .load(conn)?;

            for item in &items {
                let Some(variant_id) = item.product_variant_id else {
                    log::warn!(
                        "Order item {} has no variant reference, stock not restorable",
                        item.id
                    );
                    continue;
                };
                if stock::restore(conn, variant_id, item.quantity)?.is_none() {
                    log::warn!(
                        "Variant {} vanished before reconciliation restore for order {}",
                        variant_id,
                        order.id
                    );
                }
            }

            log::info!(
                "Order {} cancelled after failed payment {}, stock restored",
                order.id,
                payment_ref
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bigdecimal::BigDecimal;
    use diesel::prelude::*;
    use uuid::Uuid;

    use super::SettlementService;
    use crate::models::order::NewOrder;
    use crate::models::order_item::NewOrderItem;
    use crate::schema::{order_items, orders};
    use crate::testutil::{seed_variant, setup_db, variant_quantity};

    fn seed_order(
        conn: &mut PgConnection,
        payment_ref: &str,
        status: &str,
        payment_status: &str,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Uuid {
        let order_id = Uuid::new_v4();
        diesel::insert_into(orders::table)
            .values(&NewOrder {
                id: order_id,
                user_id: Uuid::new_v4(),
                payment_ref: payment_ref.to_string(),
                amount: BigDecimal::from_str("30.00").expect("decimal"),
                currency: "usd".to_string(),
                status: status.to_string(),
                payment_status: payment_status.to_string(),
                shipping_address: serde_json::json!({"city": "Springfield"}),
            })
            .execute(conn)
            .expect("insert order");

        diesel::insert_into(order_items::table)
            .values(&NewOrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_variant_id: variant_id,
                product_name: "Test product".to_string(),
                variant_sku: "SKU-1".to_string(),
                quantity,
                price: BigDecimal::from_str("10.00").expect("decimal"),
            })
            .execute(conn)
            .expect("insert order item");

        order_id
    }

    fn order_state(conn: &mut PgConnection, order_id: Uuid) -> (String, String) {
        orders::table
            .filter(orders::id.eq(order_id))
            .select((orders::status, orders::payment_status))
            .first(conn)
            .expect("order")
    }

    #[tokio::test]
    async fn success_for_paid_order_is_a_no_op() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let order_id = seed_order(&mut conn, "pi_paid", "processing", "paid", None, 1);

        SettlementService::new(pool.clone())
            .payment_succeeded("pi_paid")
            .expect("reconcile");

        assert_eq!(order_state(&mut conn, order_id), ("processing".into(), "paid".into()));
    }

    #[tokio::test]
    async fn success_promotes_locally_written_off_order() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let order_id = seed_order(&mut conn, "pi_recover", "cancelled", "failed", None, 1);

        SettlementService::new(pool.clone())
            .payment_succeeded("pi_recover")
            .expect("reconcile");

        assert_eq!(order_state(&mut conn, order_id), ("processing".into(), "paid".into()));
    }

    #[tokio::test]
    async fn success_for_unknown_payment_is_logged_not_fatal() {
        let (_container, pool) = setup_db().await;

        // The lost-write case: must acknowledge without erroring.
        SettlementService::new(pool)
            .payment_succeeded("pi_ghost")
            .expect("must not fail");
    }

    #[tokio::test]
    async fn failure_cancels_order_and_restores_stock() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 2, "10.00");
        let order_id = seed_order(&mut conn, "pi_fail", "processing", "paid", Some(variant_id), 3);

        SettlementService::new(pool.clone())
            .payment_failed("pi_fail")
            .expect("reconcile");

        assert_eq!(order_state(&mut conn, order_id), ("cancelled".into(), "failed".into()));
        assert_eq!(variant_quantity(&mut conn, variant_id), 5);
    }

    #[tokio::test]
    async fn redelivered_failure_restores_stock_only_once() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 2, "10.00");
        seed_order(&mut conn, "pi_dup", "processing", "paid", Some(variant_id), 3);

        let svc = SettlementService::new(pool.clone());
        svc.payment_failed("pi_dup").expect("first delivery");
        svc.payment_failed("pi_dup").expect("second delivery");

        assert_eq!(variant_quantity(&mut conn, variant_id), 5);
    }

    #[tokio::test]
    async fn failure_for_unknown_payment_is_a_no_op() {
        let (_container, pool) = setup_db().await;

        SettlementService::new(pool)
            .payment_failed("pi_ghost")
            .expect("must not fail");
    }
}

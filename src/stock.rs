//! Stock Ledger primitives.
//!
//! Every reservation or restoration is a single predicate-guarded UPDATE on
//! `product_variants.quantity`, so interleaved callers never read-then-write
//! a stale counter. Restoration is not idempotent by itself; callers own the
//! exactly-once guarantee via the cart/order status compare-and-swap.

use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::schema::product_variants::dsl as pv;

/// Atomically decrement a variant's available quantity.
///
/// Fails with `InsufficientStock` when fewer than `quantity` units remain,
/// leaving the ledger untouched. Returns the new available quantity.
pub fn reserve(
    conn: &mut PgConnection,
    variant_id: Uuid,
    quantity: i32,
) -> Result<i32, DomainError> {
    let updated: Option<i32> = diesel::update(
        pv::product_variants
            .filter(pv::id.eq(variant_id))
            .filter(pv::quantity.ge(quantity)),
    )
    .set(pv::quantity.eq(pv::quantity - quantity))
    .returning(pv::quantity)
    .get_result(conn)
    .optional()?;

    match updated {
        Some(remaining) => Ok(remaining),
        None => {
            // Zero rows: either the variant is gone or the predicate failed.
            let available: Option<i32> = pv::product_variants
                .filter(pv::id.eq(variant_id))
                .select(pv::quantity)
                .first(conn)
                .optional()?;
            match available {
                Some(available) => Err(DomainError::InsufficientStock { available }),
                None => Err(DomainError::NotFound("Product variant")),
            }
        }
    }
}

/// Atomically increment a variant's available quantity.
///
/// Returns `None` when the variant no longer exists (catalog deletion); the
/// caller decides whether that is worth logging.
pub fn restore(
    conn: &mut PgConnection,
    variant_id: Uuid,
    quantity: i32,
) -> Result<Option<i32>, DomainError> {
    let updated: Option<i32> = diesel::update(pv::product_variants.filter(pv::id.eq(variant_id)))
        .set(pv::quantity.eq(pv::quantity + quantity))
        .returning(pv::quantity)
        .get_result(conn)
        .optional()?;

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{reserve, restore};
    use crate::domain::errors::DomainError;
    use crate::testutil::{seed_variant, setup_db};

    #[tokio::test]
    async fn reserve_decrements_down_to_zero() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 5, "10.00");

        assert_eq!(reserve(&mut conn, variant_id, 3).expect("reserve"), 2);
        assert_eq!(reserve(&mut conn, variant_id, 2).expect("reserve"), 0);
    }

    #[tokio::test]
    async fn reserve_beyond_available_fails_and_leaves_ledger_unchanged() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 5, "10.00");

        let err = reserve(&mut conn, variant_id, 6).expect_err("must fail");
        assert!(matches!(err, DomainError::InsufficientStock { available: 5 }));

        // The failed attempt must not have touched the counter.
        assert_eq!(reserve(&mut conn, variant_id, 5).expect("reserve"), 0);
    }

    #[tokio::test]
    async fn reserve_unknown_variant_is_not_found() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");

        let err = reserve(&mut conn, Uuid::new_v4(), 1).expect_err("must fail");
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn restore_increments_and_reports_new_quantity() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 2, "10.00");

        let restored = restore(&mut conn, variant_id, 3).expect("restore");
        assert_eq!(restored, Some(5));
    }

    #[tokio::test]
    async fn restore_of_deleted_variant_returns_none() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");

        let restored = restore(&mut conn, Uuid::new_v4(), 3).expect("restore");
        assert_eq!(restored, None);
    }

    #[tokio::test]
    async fn reserve_restore_sequence_nets_out() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let variant_id = seed_variant(&mut conn, 10, "1.50");

        reserve(&mut conn, variant_id, 4).expect("reserve");
        reserve(&mut conn, variant_id, 3).expect("reserve");
        restore(&mut conn, variant_id, 4).expect("restore");
        let final_qty = restore(&mut conn, variant_id, 3).expect("restore");
        assert_eq!(final_qty, Some(10));
    }
}

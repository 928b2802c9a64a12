//! Expiry sweeper: reclaims stock from abandoned carts.
//!
//! Claim-then-restore is the correctness mechanism. The claim is a
//! conditional UPDATE keyed on the persisted status (and expiry), so a
//! concurrent checkout, a user removal, or a second sweeper replica can never
//! restore the same reservation twice: exactly one actor wins the CAS.

use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::status::CartStatus;
use crate::models::cart_item::CartItem;
use crate::schema::{cart_items, carts};
use crate::stock;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Carts claimed and successfully marked expired.
    pub expired: usize,
    /// Carts another actor transitioned before we could claim them.
    pub skipped: usize,
    /// Carts claimed but left in `failed` after a mid-flight error.
    pub failed: usize,
}

pub struct ExpirySweeper {
    pool: DbPool,
}

impl ExpirySweeper {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// One sweep pass over all expired active carts.
    pub fn sweep_once(&self) -> Result<SweepReport, DomainError> {
        let mut conn = self.pool.get()?;

        let candidates: Vec<Uuid> = carts::table
            .filter(carts::status.eq(CartStatus::Active.as_str()))
            .filter(carts::expires_at.lt(Utc::now()))
            .select(carts::id)
            .load(&mut conn)?;

        let mut report = SweepReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }
        log::info!("Sweeper found {} potentially expired carts", candidates.len());

        for cart_id in candidates {
            match self.process_cart(&mut conn, cart_id) {
                Ok(true) => report.expired += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    log::error!("Sweeper failed to process cart {}: {}", cart_id, e);
                    // Best-effort recovery so the cart does not sit in
                    // `processing` forever. `failed` is a safe terminal
                    // state; a further error here is logged only.
                    match park_failed(&mut conn, cart_id) {
                        Ok(0) => log::debug!(
                            "Cart {} was not in processing, nothing to park",
                            cart_id
                        ),
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("Sweeper could not park cart {} as failed: {}", cart_id, e)
                        }
                    }
                }
            }
        }

        log::info!(
            "Sweep finished: {} expired, {} skipped, {} failed",
            report.expired,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Returns Ok(true) if this run expired the cart, Ok(false) if another
    /// actor got there first.
    fn process_cart(&self, conn: &mut PgConnection, cart_id: Uuid) -> Result<bool, DomainError> {
        // Claim: CAS on (status = active, still expired). A concurrent add
        // pushing expires_at forward, or another sweeper instance, makes
        // this touch zero rows.
        let claimed = diesel::update(
            carts::table
                .filter(carts::id.eq(cart_id))
                .filter(carts::status.eq(CartStatus::Active.as_str()))
                .filter(carts::expires_at.lt(Utc::now())),
        )
        .set((
            carts::status.eq(CartStatus::Processing.as_str()),
            carts::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

        if claimed == 0 {
            log::debug!("Cart {} was already transitioned, skipping", cart_id);
            return Ok(false);
        }

        // Restore from a fresh read, not from any pre-claim snapshot, so
        // items removed before the claim are not restored twice.
        let items: Vec<CartItem> = cart_items::table
            .filter(cart_items::cart_id.eq(cart_id))
            .select(CartItem::as_select())
            .load(conn)?;

        for item in &items {
            match stock::restore(conn, item.product_variant_id, item.quantity)? {
                Some(quantity) => log::debug!(
                    "Restored {} units to variant {} (now {})",
                    item.quantity,
                    item.product_variant_id,
                    quantity
                ),
                None => log::warn!(
                    "Variant {} vanished before sweeper restore for cart {}",
                    item.product_variant_id,
                    cart_id
                ),
            }
        }

        diesel::update(carts::table.filter(carts::id.eq(cart_id)))
            .set((
                carts::status.eq(CartStatus::Expired.as_str()),
                carts::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        log::info!("Cart {} expired, {} item reservations reclaimed", cart_id, items.len());
        Ok(true)
    }
}

/// Park a cart this run claimed as `failed`. Conditional on `processing` so
/// that an error raised before the claim landed (the cart may still be
/// `active`, possibly extended by a concurrent add) never strands a live
/// cart's reservations.
fn park_failed(conn: &mut PgConnection, cart_id: Uuid) -> Result<usize, DomainError> {
    Ok(diesel::update(
        carts::table
            .filter(carts::id.eq(cart_id))
            .filter(carts::status.eq(CartStatus::Processing.as_str())),
    )
    .set((
        carts::status.eq(CartStatus::Failed.as_str()),
        carts::updated_at.eq(Utc::now()),
    ))
    .execute(conn)?)
}

/// Run the sweeper on a fixed interval until the process exits. Safe to run
/// on several replicas at once; the claim CAS dedupes the work.
pub fn spawn(pool: DbPool, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let pool = pool.clone();
            let outcome =
                tokio::task::spawn_blocking(move || ExpirySweeper::new(pool).sweep_once()).await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::error!("Sweep run failed: {}", e),
                Err(e) => log::error!("Sweep task panicked: {}", e),
            }
        }
    })
}

//! Reservation engine: reserve, capture and release stock for orders.
//!
//! All three operations exist in two forms. The plain form opens and commits
//! its own transaction; the `_in` form joins a transaction owned by the
//! caller so a checkout or a payment settlement stays one unit of work.

use std::collections::BTreeMap;

use common::{LocationId, OrderId, VariantId};
use domain::{LedgerError, Reservation};
use serde::{Deserialize, Serialize};
use store::{Store, Transaction};

use crate::error::{EngineError, Result};
use crate::ledger;

/// One order line as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl ReservationLine {
    pub fn new(variant_id: VariantId, quantity: u32) -> Self {
        Self {
            variant_id,
            quantity,
        }
    }
}

/// Holds, converts and returns stock at one location per reservation.
#[derive(Clone)]
pub struct ReservationEngine<S: Store> {
    store: S,
    main_location: LocationId,
}

impl<S: Store> ReservationEngine<S> {
    /// Creates an engine bound to an already resolved main location.
    pub fn new(store: S, main_location: LocationId) -> Self {
        Self {
            store,
            main_location,
        }
    }

    /// Looks up the main location by code once and binds the engine to it.
    pub async fn resolve(store: S, location_code: &str) -> Result<Self> {
        let mut tx = store.begin().await?;
        let location = tx
            .location_by_code(location_code)
            .await?
            .ok_or_else(|| EngineError::LocationNotFound(location_code.to_string()))?;
        drop(tx);

        tracing::info!(code = location_code, location_id = %location.id, "main location resolved");
        Ok(Self::new(store, location.id))
    }

    pub fn main_location(&self) -> LocationId {
        self.main_location
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reserves every line at `location_id` in its own transaction.
    #[tracing::instrument(skip(self, lines))]
    pub async fn reserve(
        &self,
        order_id: OrderId,
        location_id: LocationId,
        lines: &[ReservationLine],
    ) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let created = self.reserve_in(&mut tx, order_id, location_id, lines).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Reserves every line inside the caller's transaction.
    ///
    /// Lines of the same variant are merged and processed in ascending
    /// variant order so concurrent batches always lock levels in the same
    /// order. Lines that already have a reservation for this order and
    /// location, or whose variant does not need one, are skipped. Running
    /// out of free stock on any line fails the whole batch; the caller must
    /// then drop the transaction.
    ///
    /// Returns the number of reservations created.
    pub async fn reserve_in<T: Transaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
        location_id: LocationId,
        lines: &[ReservationLine],
    ) -> Result<usize> {
        let mut merged: BTreeMap<VariantId, i64> = BTreeMap::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(LedgerError::InvalidQuantity(0).into());
            }
            *merged.entry(line.variant_id).or_default() += i64::from(line.quantity);
        }

        let mut created = 0;
        for (variant_id, quantity) in merged {
            if tx
                .reservation(order_id, variant_id, location_id)
                .await?
                .is_some()
            {
                continue;
            }

            let variant = tx
                .variant(variant_id)
                .await?
                .ok_or(EngineError::VariantNotFound(variant_id))?;
            if !variant.requires_reservation() {
                continue;
            }

            // A concurrent reserve for the same order may win the key;
            // that counts as already reserved.
            let reservation = Reservation::new(order_id, variant_id, location_id, quantity);
            if !tx.insert_reservation(&reservation).await? {
                continue;
            }

            let mut level = tx.lock_stock_level(variant_id, location_id).await?;
            level.hold(quantity).map_err(|e| match e {
                LedgerError::InsufficientStock { free, .. } => EngineError::InsufficientStock {
                    sku: variant.sku.clone(),
                    free,
                },
                other => other.into(),
            })?;
            tx.save_stock_level(&level).await?;

            created += 1;
            metrics::counter!("reservations_created_total").increment(1);
            tracing::debug!(%order_id, sku = %variant.sku, quantity, "stock reserved");
        }
        Ok(created)
    }

    /// Captures the order's open reservations in their own transaction.
    #[tracing::instrument(skip(self))]
    pub async fn capture(&self, order_id: OrderId) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let captured = self.capture_in(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(captured)
    }

    /// Turns every open reservation of the order into a sale:
    /// `reserved` and `available` both drop by the reserved quantity.
    ///
    /// A no-op when nothing is reserved, so repeated calls are safe.
    pub async fn capture_in<T: Transaction>(&self, tx: &mut T, order_id: OrderId) -> Result<usize> {
        let mut open = tx.lock_open_reservations(order_id).await?;
        for reservation in &mut open {
            let mut level = tx
                .lock_stock_level(reservation.variant_id, reservation.location_id)
                .await?;
            ledger::capture_held(&mut level, reservation.quantity);
            tx.save_stock_level(&level).await?;

            reservation.mark_captured()?;
            tx.save_reservation(reservation).await?;
        }

        if !open.is_empty() {
            metrics::counter!("reservations_captured_total").increment(open.len() as u64);
            tracing::info!(%order_id, count = open.len(), "reservations captured");
        }
        Ok(open.len())
    }

    /// Releases the order's open reservations in their own transaction.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, order_id: OrderId) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let released = self.release_in(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(released)
    }

    /// Returns every open reservation of the order to free stock.
    /// `available` is untouched. A no-op when nothing is reserved.
    pub async fn release_in<T: Transaction>(&self, tx: &mut T, order_id: OrderId) -> Result<usize> {
        let mut open = tx.lock_open_reservations(order_id).await?;
        for reservation in &mut open {
            let mut level = tx
                .lock_stock_level(reservation.variant_id, reservation.location_id)
                .await?;
            ledger::release_held(&mut level, reservation.quantity);
            tx.save_stock_level(&level).await?;

            reservation.mark_released()?;
            tx.save_reservation(reservation).await?;
        }

        if !open.is_empty() {
            metrics::counter!("reservations_released_total").increment(open.len() as u64);
            tracing::info!(%order_id, count = open.len(), "reservations released");
        }
        Ok(open.len())
    }
}

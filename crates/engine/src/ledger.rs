//! Stock ledger: the only code that changes stock levels.
//!
//! Every mutation happens on a level obtained through
//! [`Transaction::lock_stock_level`], so the row stays locked until the
//! enclosing transaction ends. Subtractions never go below zero; when the
//! floor actually bites the ledger logs a warning and bumps
//! `stock_ledger_clamped_total`.

use common::{LocationId, VariantId};
use domain::{Clamp, StockLevel};
use store::{Store, Transaction};

use crate::error::{EngineError, Result};

/// Converts `quantity` held units into a sale on a locked level.
pub(crate) fn capture_held(level: &mut StockLevel, quantity: i64) {
    let clamp = level.capture(quantity);
    report_clamp(level, clamp, "capture", quantity);
}

/// Returns `quantity` held units to free stock on a locked level.
pub(crate) fn release_held(level: &mut StockLevel, quantity: i64) {
    let clamp = level.release(quantity);
    report_clamp(level, clamp, "release", quantity);
}

fn report_clamp(level: &StockLevel, clamp: Clamp, operation: &'static str, quantity: i64) {
    if clamp.is_clean() {
        return;
    }
    tracing::warn!(
        variant_id = %level.variant_id,
        location_id = %level.location_id,
        operation,
        quantity,
        reserved_shortfall = clamp.reserved_shortfall,
        available_shortfall = clamp.available_shortfall,
        "stock level clamped at zero"
    );
    if clamp.reserved_shortfall > 0 {
        metrics::counter!("stock_ledger_clamped_total", "field" => "reserved", "operation" => operation)
            .increment(1);
    }
    if clamp.available_shortfall > 0 {
        metrics::counter!("stock_ledger_clamped_total", "field" => "available", "operation" => operation)
            .increment(1);
    }
}

/// Stock intake and inspection.
#[derive(Clone)]
pub struct StockLedger<S: Store> {
    store: S,
    main_location: LocationId,
}

impl<S: Store> StockLedger<S> {
    pub fn new(store: S, main_location: LocationId) -> Self {
        Self {
            store,
            main_location,
        }
    }

    /// Adds (or, with a negative `delta`, removes) on-hand stock.
    ///
    /// Without a location code the main location is used. A correction that
    /// would leave less on hand than is reserved is rejected.
    #[tracing::instrument(skip(self))]
    pub async fn receive(
        &self,
        variant_id: VariantId,
        delta: i64,
        location_code: Option<&str>,
    ) -> Result<StockLevel> {
        let mut tx = self.store.begin().await?;

        let location_id = match location_code {
            Some(code) => {
                tx.location_by_code(code)
                    .await?
                    .ok_or_else(|| EngineError::LocationNotFound(code.to_string()))?
                    .id
            }
            None => self.main_location,
        };
        if tx.variant(variant_id).await?.is_none() {
            return Err(EngineError::VariantNotFound(variant_id));
        }

        let mut level = tx.lock_stock_level(variant_id, location_id).await?;
        level.adjust(delta)?;
        tx.save_stock_level(&level).await?;
        tx.commit().await?;

        tracing::info!(
            %variant_id,
            %location_id,
            available = level.available,
            reserved = level.reserved,
            "stock received"
        );
        Ok(level)
    }

    /// Every level recorded for a variant.
    pub async fn levels(&self, variant_id: VariantId) -> Result<Vec<StockLevel>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.stock_levels(variant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, StockItemId};
    use domain::{LedgerError, Location, Variant};
    use store::InMemoryStore;

    use super::*;

    async fn seeded() -> (InMemoryStore, Location, Variant) {
        let store = InMemoryStore::new();
        let location = Location {
            id: LocationId::new(),
            name: "Main Shop".to_string(),
            code: "MAIN_SHOP".to_string(),
            is_active: true,
        };
        let variant = Variant {
            id: VariantId::new(),
            product_title: "Phone Case".to_string(),
            variant_title: None,
            sku: "CASE-1".to_string(),
            price: Money::from_cents(150_000),
            is_active: true,
            track_inventory: true,
            allow_backorder: false,
        };
        let mut tx = store.begin().await.unwrap();
        tx.upsert_location(&location).await.unwrap();
        tx.upsert_variant(&variant).await.unwrap();
        tx.commit().await.unwrap();
        (store, location, variant)
    }

    #[test]
    fn test_capture_held_floors_at_zero() {
        let mut level = StockLevel::empty(StockItemId::new(), VariantId::new(), LocationId::new());
        level.available = 2;
        level.reserved = 1;

        capture_held(&mut level, 3);

        assert_eq!((level.available, level.reserved), (0, 0));
    }

    #[test]
    fn test_release_held_leaves_available() {
        let mut level = StockLevel::empty(StockItemId::new(), VariantId::new(), LocationId::new());
        level.available = 5;
        level.reserved = 2;

        release_held(&mut level, 4);

        assert_eq!((level.available, level.reserved), (5, 0));
    }

    #[tokio::test]
    async fn test_receive_into_main_location() {
        let (store, location, variant) = seeded().await;
        let ledger = StockLedger::new(store, location.id);

        let level = ledger.receive(variant.id, 7, None).await.unwrap();
        assert_eq!(level.available, 7);
        assert_eq!(level.location_id, location.id);

        let levels = ledger.levels(variant.id).await.unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].available, 7);
    }

    #[tokio::test]
    async fn test_receive_by_location_code() {
        let (store, location, variant) = seeded().await;
        let ledger = StockLedger::new(store, LocationId::new());

        let level = ledger
            .receive(variant.id, 3, Some("MAIN_SHOP"))
            .await
            .unwrap();
        assert_eq!(level.location_id, location.id);

        let err = ledger
            .receive(variant.id, 3, Some("WAREHOUSE"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LocationNotFound(code) if code == "WAREHOUSE"));
    }

    #[tokio::test]
    async fn test_correction_below_reserved_rejected() {
        let (store, location, variant) = seeded().await;
        let ledger = StockLedger::new(store.clone(), location.id);
        ledger.receive(variant.id, 5, None).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut level = tx.lock_stock_level(variant.id, location.id).await.unwrap();
        level.hold(4).unwrap();
        tx.save_stock_level(&level).await.unwrap();
        tx.commit().await.unwrap();

        let err = ledger.receive(variant.id, -2, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(domain::DomainError::Ledger(LedgerError::BelowReserved { .. }))
        ));
        assert_eq!(ledger.levels(variant.id).await.unwrap()[0].available, 5);
    }

    #[tokio::test]
    async fn test_receive_unknown_variant() {
        let (store, location, _) = seeded().await;
        let ledger = StockLedger::new(store, location.id);

        let missing = VariantId::new();
        let err = ledger.receive(missing, 1, None).await.unwrap_err();
        assert!(matches!(err, EngineError::VariantNotFound(id) if id == missing));
    }
}

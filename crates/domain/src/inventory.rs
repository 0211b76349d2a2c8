//! Stock records: locations, variant policy, stock levels and reservations.

use chrono::{DateTime, Utc};
use common::{LocationId, Money, OrderId, ReservationId, StockItemId, VariantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::UnknownValue;

/// Errors raised by stock level and reservation arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Not enough free stock to hold the requested quantity.
    #[error("Not enough stock: requested {requested}, available {free}")]
    InsufficientStock { requested: i64, free: i64 },

    /// Quantities moved through the ledger must be positive.
    #[error("Invalid stock quantity: {0}")]
    InvalidQuantity(i64),

    /// An adjustment would push on-hand stock below what is reserved.
    #[error("Adjustment of {delta} would leave available {available} below reserved {reserved}")]
    BelowReserved {
        delta: i64,
        available: i64,
        reserved: i64,
    },

    /// The reservation already left the `reserved` status.
    #[error("Reservation is already {0}")]
    ReservationClosed(ReservationStatus),
}

/// A stock-holding place. Reference data, seeded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub code: String,
    pub is_active: bool,
}

/// The slice of a catalog variant the order pipeline depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_title: String,
    pub variant_title: Option<String>,
    pub sku: String,
    pub price: Money,
    pub is_active: bool,
    pub track_inventory: bool,
    pub allow_backorder: bool,
}

impl Variant {
    /// Untracked and backorderable variants are sold without holding stock.
    pub fn requires_reservation(&self) -> bool {
        self.track_inventory && !self.allow_backorder
    }
}

/// How much of a requested subtraction was cut off by the zero floor.
///
/// A non-zero shortfall means the ledger and its reservations disagreed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clamp {
    pub reserved_shortfall: i64,
    pub available_shortfall: i64,
}

impl Clamp {
    pub fn is_clean(&self) -> bool {
        self.reserved_shortfall == 0 && self.available_shortfall == 0
    }
}

/// Subtracts with a floor at zero, returning the new value and the shortfall.
fn floor_sub(current: i64, quantity: i64) -> (i64, i64) {
    let next = current - quantity;
    if next < 0 { (0, -next) } else { (next, 0) }
}

/// Per (stock item, location) counters.
///
/// `available` is on-hand stock, `reserved` the part held for open orders.
/// Invariant: `0 <= reserved <= available`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub stock_item_id: StockItemId,
    pub variant_id: VariantId,
    pub location_id: LocationId,
    pub available: i64,
    pub reserved: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// A freshly created level with nothing on hand.
    pub fn empty(stock_item_id: StockItemId, variant_id: VariantId, location_id: LocationId) -> Self {
        Self {
            stock_item_id,
            variant_id,
            location_id,
            available: 0,
            reserved: 0,
            updated_at: Utc::now(),
        }
    }

    /// Stock that can still be promised to new orders.
    pub fn free(&self) -> i64 {
        self.available - self.reserved
    }

    /// Holds `quantity` for an order.
    pub fn hold(&mut self, quantity: i64) -> Result<(), LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        let free = self.free();
        if quantity > free {
            return Err(LedgerError::InsufficientStock {
                requested: quantity,
                free,
            });
        }
        self.reserved += quantity;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Converts a hold into a sale: both counters drop by `quantity`.
    pub fn capture(&mut self, quantity: i64) -> Clamp {
        let (reserved, reserved_shortfall) = floor_sub(self.reserved, quantity);
        let (available, available_shortfall) = floor_sub(self.available, quantity);
        self.reserved = reserved;
        self.available = available;
        self.updated_at = Utc::now();
        Clamp {
            reserved_shortfall,
            available_shortfall,
        }
    }

    /// Returns a hold to free stock. `available` is untouched.
    pub fn release(&mut self, quantity: i64) -> Clamp {
        let (reserved, reserved_shortfall) = floor_sub(self.reserved, quantity);
        self.reserved = reserved;
        self.updated_at = Utc::now();
        Clamp {
            reserved_shortfall,
            available_shortfall: 0,
        }
    }

    /// Stock intake (positive) or correction (negative).
    pub fn adjust(&mut self, delta: i64) -> Result<(), LedgerError> {
        let available = self.available + delta;
        if available < self.reserved {
            return Err(LedgerError::BelowReserved {
                delta,
                available: self.available,
                reserved: self.reserved,
            });
        }
        self.available = available;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Lifecycle of a reservation: `reserved` moves once, to `captured` or `released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Reserved,
    Captured,
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Captured => "captured",
            ReservationStatus::Released => "released",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(ReservationStatus::Reserved),
            "captured" => Ok(ReservationStatus::Captured),
            "released" => Ok(ReservationStatus::Released),
            other => Err(UnknownValue::new("reservation status", other)),
        }
    }
}

/// Stock held for one order line at one location.
///
/// Unique per (order, variant, location); the store enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    pub variant_id: VariantId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        order_id: OrderId,
        variant_id: VariantId,
        location_id: LocationId,
        quantity: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ReservationId::new(),
            order_id,
            variant_id,
            location_id,
            quantity,
            status: ReservationStatus::Reserved,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }

    pub fn mark_captured(&mut self) -> Result<(), LedgerError> {
        self.close(ReservationStatus::Captured)
    }

    pub fn mark_released(&mut self) -> Result<(), LedgerError> {
        self.close(ReservationStatus::Released)
    }

    fn close(&mut self, status: ReservationStatus) -> Result<(), LedgerError> {
        if !self.is_open() {
            return Err(LedgerError::ReservationClosed(self.status));
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }
}

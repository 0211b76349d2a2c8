use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{LocationId, OrderId, PaymentIntentId, VariantId};
use domain::{
    Customer, Location, Order, OrderNumber, PaymentIntent, Reservation, StockLevel, Variant,
};

use crate::Result;

/// Entry point to a transactional backing store.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// The unit of work handed out by [`Store::begin`].
    type Tx: Transaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// One all-or-nothing unit of work.
///
/// Methods prefixed with `lock_` take an exclusive lock on the rows they
/// return, held until [`Transaction::commit`] or until the transaction is
/// dropped. Dropping without committing rolls everything back.
#[async_trait]
pub trait Transaction: Send + Sized {
    /// Makes every write of this transaction durable and releases its locks.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;

    // -- Reference data --

    /// Looks up a location by its unique code.
    async fn location_by_code(&mut self, code: &str) -> Result<Option<Location>>;

    /// Inserts a location or updates the one with the same id.
    async fn upsert_location(&mut self, location: &Location) -> Result<()>;

    /// Looks up a catalog variant.
    async fn variant(&mut self, id: VariantId) -> Result<Option<Variant>>;

    /// Inserts a variant or updates the one with the same id.
    async fn upsert_variant(&mut self, variant: &Variant) -> Result<()>;

    // -- Customers --

    /// Finds the customer registered with a phone number, locked for update.
    async fn lock_customer_by_phone(&mut self, phone: &str) -> Result<Option<Customer>>;

    /// Inserts a customer.
    ///
    /// Returns `false` without touching anything when the phone number is
    /// already registered.
    async fn insert_customer(&mut self, customer: &Customer) -> Result<bool>;

    /// Writes back a customer's name, email and timestamp.
    async fn save_customer(&mut self, customer: &Customer) -> Result<()>;

    // -- Stock ledger --

    /// Returns the stock level of a variant at a location, creating the stock
    /// item and a zeroed level on first touch, locked for update.
    async fn lock_stock_level(
        &mut self,
        variant_id: VariantId,
        location_id: LocationId,
    ) -> Result<StockLevel>;

    /// Writes back a level previously obtained from [`Transaction::lock_stock_level`].
    async fn save_stock_level(&mut self, level: &StockLevel) -> Result<()>;

    /// Unlocked read of every level recorded for a variant.
    async fn stock_levels(&mut self, variant_id: VariantId) -> Result<Vec<StockLevel>>;

    // -- Reservations --

    /// Finds the reservation for one (order, variant, location) key.
    async fn reservation(
        &mut self,
        order_id: OrderId,
        variant_id: VariantId,
        location_id: LocationId,
    ) -> Result<Option<Reservation>>;

    /// Inserts a reservation.
    ///
    /// Returns `false` without touching anything when a reservation with the
    /// same (order, variant, location) key already exists.
    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<bool>;

    /// Returns the order's reservations still in `reserved` status, ordered by
    /// variant, locked for update.
    async fn lock_open_reservations(&mut self, order_id: OrderId) -> Result<Vec<Reservation>>;

    /// Writes back a reservation's status.
    async fn save_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    /// Every reservation of the order, in any status.
    async fn reservations(&mut self, order_id: OrderId) -> Result<Vec<Reservation>>;

    // -- Orders --

    /// Inserts an order with its items.
    ///
    /// Fails with [`crate::StoreError::Conflict`] if the order number is taken.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Unlocked read of an order by its number.
    async fn order_by_number(&mut self, number: &str) -> Result<Option<Order>>;

    /// Reads an order by its number, locked for update.
    async fn lock_order_by_number(&mut self, number: &str) -> Result<Option<Order>>;

    /// Reads an order by id, locked for update.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Writes back an order's status, payment status and timestamp.
    async fn save_order(&mut self, order: &Order) -> Result<()>;

    /// Numbers of orders still `pending` and not paid that were created
    /// before `created_before`, oldest first.
    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderNumber>>;

    // -- Payment intents --

    /// Appends an intent to its order's log and assigns its sequence number.
    async fn insert_intent(&mut self, intent: &mut PaymentIntent) -> Result<()>;

    /// Writes back an intent's status, gateway fields and payload snapshots.
    async fn save_intent(&mut self, intent: &PaymentIntent) -> Result<()>;

    /// Reads an intent by id, locked for update.
    async fn lock_intent(&mut self, id: PaymentIntentId) -> Result<Option<PaymentIntent>>;

    /// The order's intent log, oldest first.
    async fn intents(&mut self, order_id: OrderId) -> Result<Vec<PaymentIntent>>;

    /// The most recent intent carrying a gateway correlation id. Unlocked:
    /// lock its order, then the intent itself, before changing either.
    async fn latest_intent_by_reference(
        &mut self,
        gateway: &str,
        reference: &str,
    ) -> Result<Option<PaymentIntent>>;
}

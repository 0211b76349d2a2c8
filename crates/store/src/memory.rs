use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{LocationId, OrderId, PaymentIntentId, StockItemId, VariantId};
use domain::{
    Customer, Location, Order, OrderNumber, OrderStatus, PaymentIntent, Reservation,
    ReservationStatus, StockLevel, Variant,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Result, StoreError,
    store::{Store, Transaction},
};

type ReservationKey = (OrderId, VariantId, LocationId);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    locations: HashMap<LocationId, Location>,
    variants: HashMap<VariantId, Variant>,
    customers: HashMap<String, Customer>,
    stock_items: HashMap<VariantId, StockItemId>,
    levels: HashMap<(StockItemId, LocationId), StockLevel>,
    reservations: BTreeMap<ReservationKey, Reservation>,
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<String, OrderId>,
    intents: Vec<PaymentIntent>,
    next_intent_sequence: i64,
}

/// In-memory store for tests and local development. Production runs on
/// [`crate::PostgresStore`].
///
/// Transactions are fully serialized: [`Store::begin`] waits for the single
/// state mutex. A transaction starts out sharing the committed state and
/// copies it on its first write, so reads never clone; the copy replaces the
/// shared state on commit. This gives the same isolation and all-or-nothing
/// guarantees as the PostgreSQL store, with none of its concurrency.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<Arc<MemoryState>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }
}

/// Transaction over an [`InMemoryStore`], holding the store lock while alive.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Arc<MemoryState>>,
    working: Arc<MemoryState>,
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let guard = self.state.clone().lock_owned().await;
        let working = Arc::clone(&guard);
        Ok(MemoryTransaction { guard, working })
    }
}

impl MemoryTransaction {
    fn state_mut(&mut self) -> &mut MemoryState {
        Arc::make_mut(&mut self.working)
    }

    fn sorted_intents(&self, order_id: OrderId) -> Vec<PaymentIntent> {
        let mut intents: Vec<PaymentIntent> = self
            .working
            .intents
            .iter()
            .filter(|i| i.order_id() == order_id)
            .cloned()
            .collect();
        intents.sort_by_key(PaymentIntent::sequence);
        intents
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(mut self) -> Result<()> {
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }

    async fn location_by_code(&mut self, code: &str) -> Result<Option<Location>> {
        Ok(self
            .working
            .locations
            .values()
            .find(|l| l.code == code)
            .cloned())
    }

    async fn upsert_location(&mut self, location: &Location) -> Result<()> {
        let code_taken = self
            .working
            .locations
            .values()
            .any(|l| l.code == location.code && l.id != location.id);
        if code_taken {
            return Err(StoreError::Conflict(format!(
                "location code {} already exists",
                location.code
            )));
        }
        self.state_mut().locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn variant(&mut self, id: VariantId) -> Result<Option<Variant>> {
        Ok(self.working.variants.get(&id).cloned())
    }

    async fn upsert_variant(&mut self, variant: &Variant) -> Result<()> {
        let sku_taken = self
            .working
            .variants
            .values()
            .any(|v| v.sku == variant.sku && v.id != variant.id);
        if sku_taken {
            return Err(StoreError::Conflict(format!(
                "sku {} already exists",
                variant.sku
            )));
        }
        self.state_mut().variants.insert(variant.id, variant.clone());
        Ok(())
    }

    async fn lock_customer_by_phone(&mut self, phone: &str) -> Result<Option<Customer>> {
        Ok(self.working.customers.get(phone).cloned())
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<bool> {
        if self.working.customers.contains_key(&customer.phone) {
            return Ok(false);
        }
        self.state_mut()
            .customers
            .insert(customer.phone.clone(), customer.clone());
        Ok(true)
    }

    async fn save_customer(&mut self, customer: &Customer) -> Result<()> {
        match self.state_mut().customers.get_mut(&customer.phone) {
            Some(existing) if existing.id == customer.id => {
                *existing = customer.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("customer {}", customer.id))),
        }
    }

    async fn lock_stock_level(
        &mut self,
        variant_id: VariantId,
        location_id: LocationId,
    ) -> Result<StockLevel> {
        let state = self.state_mut();
        let stock_item_id = *state
            .stock_items
            .entry(variant_id)
            .or_insert_with(StockItemId::new);
        let level = state
            .levels
            .entry((stock_item_id, location_id))
            .or_insert_with(|| StockLevel::empty(stock_item_id, variant_id, location_id));
        Ok(level.clone())
    }

    async fn save_stock_level(&mut self, level: &StockLevel) -> Result<()> {
        let key = (level.stock_item_id, level.location_id);
        match self.state_mut().levels.get_mut(&key) {
            Some(existing) => {
                *existing = level.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "stock level for variant {} at location {}",
                level.variant_id, level.location_id
            ))),
        }
    }

    async fn stock_levels(&mut self, variant_id: VariantId) -> Result<Vec<StockLevel>> {
        Ok(self
            .working
            .levels
            .values()
            .filter(|l| l.variant_id == variant_id)
            .cloned()
            .collect())
    }

    async fn reservation(
        &mut self,
        order_id: OrderId,
        variant_id: VariantId,
        location_id: LocationId,
    ) -> Result<Option<Reservation>> {
        Ok(self
            .working
            .reservations
            .get(&(order_id, variant_id, location_id))
            .cloned())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<bool> {
        let key = (
            reservation.order_id,
            reservation.variant_id,
            reservation.location_id,
        );
        if self.working.reservations.contains_key(&key) {
            return Ok(false);
        }
        self.state_mut().reservations.insert(key, reservation.clone());
        Ok(true)
    }

    async fn lock_open_reservations(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| r.order_id == order_id && r.status == ReservationStatus::Reserved)
            .cloned()
            .collect())
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let key = (
            reservation.order_id,
            reservation.variant_id,
            reservation.location_id,
        );
        match self.state_mut().reservations.get_mut(&key) {
            Some(existing) => {
                *existing = reservation.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "reservation {}",
                reservation.id
            ))),
        }
    }

    async fn reservations(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let number = order.number().as_str().to_string();
        if self.working.order_numbers.contains_key(&number) {
            return Err(StoreError::Conflict(format!(
                "order number {number} already exists"
            )));
        }
        let state = self.state_mut();
        state.order_numbers.insert(number, order.id());
        state.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn order_by_number(&mut self, number: &str) -> Result<Option<Order>> {
        Ok(self
            .working
            .order_numbers
            .get(number)
            .and_then(|id| self.working.orders.get(id))
            .cloned())
    }

    async fn lock_order_by_number(&mut self, number: &str) -> Result<Option<Order>> {
        self.order_by_number(number).await
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        match self.state_mut().orders.get_mut(&order.id()) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("order {}", order.number()))),
        }
    }

    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderNumber>> {
        let mut stale: Vec<&Order> = self
            .working
            .orders
            .values()
            .filter(|o| {
                o.status() == OrderStatus::Pending && !o.is_paid() && o.created_at() < created_before
            })
            .collect();
        stale.sort_by_key(|o| o.created_at());
        Ok(stale
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|o| o.number().clone())
            .collect())
    }

    async fn insert_intent(&mut self, intent: &mut PaymentIntent) -> Result<()> {
        if !self.working.orders.contains_key(&intent.order_id()) {
            return Err(StoreError::NotFound(format!("order {}", intent.order_id())));
        }
        let state = self.state_mut();
        state.next_intent_sequence += 1;
        intent.assign_sequence(state.next_intent_sequence);
        state.intents.push(intent.clone());
        Ok(())
    }

    async fn save_intent(&mut self, intent: &PaymentIntent) -> Result<()> {
        match self
            .state_mut()
            .intents
            .iter_mut()
            .find(|i| i.id() == intent.id())
        {
            Some(existing) => {
                *existing = intent.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("payment intent {}", intent.id()))),
        }
    }

    async fn lock_intent(&mut self, id: PaymentIntentId) -> Result<Option<PaymentIntent>> {
        Ok(self.working.intents.iter().find(|i| i.id() == id).cloned())
    }

    async fn intents(&mut self, order_id: OrderId) -> Result<Vec<PaymentIntent>> {
        Ok(self.sorted_intents(order_id))
    }

    async fn latest_intent_by_reference(
        &mut self,
        gateway: &str,
        reference: &str,
    ) -> Result<Option<PaymentIntent>> {
        Ok(self
            .working
            .intents
            .iter()
            .filter(|i| i.gateway() == Some(gateway) && i.gateway_reference() == Some(reference))
            .max_by_key(|i| i.sequence())
            .cloned())
    }
}

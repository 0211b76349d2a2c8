//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId};
use serde::Serialize;
use serde_json::Value;

use super::{
    CustomerContact, FulfillmentMethod, OrderError, OrderItem, OrderNumber, OrderStatus,
    OrderTotals, PaymentStatus,
};

/// Everything checkout knows when it places an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub number: OrderNumber,
    pub customer_id: Option<CustomerId>,
    pub customer: CustomerContact,
    pub currency: String,
    pub fulfillment: FulfillmentMethod,
    pub items: Vec<OrderItem>,
    pub discount_total: Money,
    pub shipping_total: Money,
    pub tax_total: Money,
    pub shipping_address: Option<Value>,
    pub billing_address: Option<Value>,
    pub notes: Option<String>,
}

/// Flat view of a persisted order, used by stores to rehydrate the aggregate.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub number: OrderNumber,
    pub customer_id: Option<CustomerId>,
    pub customer: CustomerContact,
    pub currency: String,
    pub totals: OrderTotals,
    pub fulfillment: FulfillmentMethod,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub shipping_address: Option<Value>,
    pub billing_address: Option<Value>,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order aggregate root.
///
/// Line items, totals and address snapshots are frozen at placement. Only
/// `status` and `payment_status` move afterwards, and only through the
/// transition methods below.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    id: OrderId,
    number: OrderNumber,
    customer_id: Option<CustomerId>,
    customer: CustomerContact,
    currency: String,
    totals: OrderTotals,
    fulfillment: FulfillmentMethod,
    status: OrderStatus,
    payment_status: PaymentStatus,
    shipping_address: Option<Value>,
    billing_address: Option<Value>,
    notes: Option<String>,
    items: Vec<OrderItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Validates the checkout data and creates a `pending` / `unpaid` order.
    pub fn place(new: NewOrder, now: DateTime<Utc>) -> Result<Self, OrderError> {
        if new.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &new.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    price: item.unit_price.cents(),
                });
            }
        }
        if new.fulfillment == FulfillmentMethod::Delivery && new.shipping_address.is_none() {
            return Err(OrderError::ShippingAddressRequired);
        }

        let line_totals = new
            .items
            .iter()
            .map(OrderItem::line_total)
            .collect::<Result<Vec<_>, _>>()?;
        let subtotal = Money::checked_sum(line_totals).ok_or(OrderError::AmountOverflow)?;
        let totals = OrderTotals::compute(
            subtotal,
            new.discount_total,
            new.shipping_total,
            new.tax_total,
        )?;

        // Pickup orders never carry a shipping address.
        let shipping_address = match new.fulfillment {
            FulfillmentMethod::Delivery => new.shipping_address,
            FulfillmentMethod::Pickup => None,
        };

        Ok(Self {
            id: OrderId::new(),
            number: new.number,
            customer_id: new.customer_id,
            customer: new.customer,
            currency: new.currency,
            totals,
            fulfillment: new.fulfillment,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            shipping_address,
            billing_address: new.billing_address,
            notes: new.notes,
            items: new.items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order from persisted columns.
    pub fn from_parts(parts: OrderParts) -> Self {
        Self {
            id: parts.id,
            number: parts.number,
            customer_id: parts.customer_id,
            customer: parts.customer,
            currency: parts.currency,
            totals: parts.totals,
            fulfillment: parts.fulfillment,
            status: parts.status,
            payment_status: parts.payment_status,
            shipping_address: parts.shipping_address,
            billing_address: parts.billing_address,
            notes: parts.notes,
            items: parts.items,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    fn transition(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    fn set_payment_status(&mut self, payment_status: PaymentStatus) {
        self.payment_status = payment_status;
        self.updated_at = Utc::now();
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn number(&self) -> &OrderNumber {
        &self.number
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn customer(&self) -> &CustomerContact {
        &self.customer
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    /// Returns the amount a payment must settle.
    pub fn grand_total(&self) -> Money {
        self.totals.grand_total
    }

    pub fn fulfillment(&self) -> FulfillmentMethod {
        self.fulfillment
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn shipping_address(&self) -> Option<&Value> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&Value> {
        self.billing_address.as_ref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Transitions
impl Order {
    /// Checks that a payment may be started or settled against this order.
    pub fn ensure_payable(&self) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::NotPayable {
                current_state: self.status,
            });
        }
        if self.is_paid() {
            return Err(OrderError::AlreadyPaid);
        }
        if !self.has_items() {
            return Err(OrderError::NoItems);
        }
        Ok(())
    }

    /// pending → confirmed.
    pub fn confirm(&mut self) -> Result<(), OrderError> {
        if !self.status.can_confirm() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "confirm",
            });
        }
        self.transition(OrderStatus::Confirmed);
        Ok(())
    }

    /// confirmed → ready_to_pickup (pickup orders only).
    pub fn mark_ready_for_pickup(&mut self) -> Result<(), OrderError> {
        const ACTION: &str = "mark ready for pickup";
        if self.fulfillment != FulfillmentMethod::Pickup {
            return Err(OrderError::FulfillmentMismatch {
                fulfillment: self.fulfillment,
                action: ACTION,
            });
        }
        if !self.status.can_mark_ready_for_pickup(self.fulfillment) {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: ACTION,
            });
        }
        self.transition(OrderStatus::ReadyToPickup);
        Ok(())
    }

    /// confirmed → on_delivery (delivery orders only).
    pub fn dispatch(&mut self) -> Result<(), OrderError> {
        const ACTION: &str = "dispatch";
        if self.fulfillment != FulfillmentMethod::Delivery {
            return Err(OrderError::FulfillmentMismatch {
                fulfillment: self.fulfillment,
                action: ACTION,
            });
        }
        if !self.status.can_dispatch(self.fulfillment) {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: ACTION,
            });
        }
        self.transition(OrderStatus::OnDelivery);
        Ok(())
    }

    /// ready_to_pickup / on_delivery → delivered.
    pub fn deliver(&mut self) -> Result<(), OrderError> {
        if !self.status.can_deliver(self.fulfillment) {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "deliver",
            });
        }
        self.transition(OrderStatus::Delivered);
        Ok(())
    }

    /// Any non-terminal status → canceled. A paid order's payment status is
    /// flipped to refunded; moving the money back is handled outside.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "cancel",
            });
        }
        if self.is_paid() {
            self.payment_status = PaymentStatus::Refunded;
        }
        self.transition(OrderStatus::Canceled);
        Ok(())
    }

    /// confirmed + paid → refunded (bookkeeping only).
    pub fn refund(&mut self) -> Result<(), OrderError> {
        if !self.is_paid() {
            return Err(OrderError::NotPaid);
        }
        if !self.status.can_refund() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "refund",
            });
        }
        self.payment_status = PaymentStatus::Refunded;
        self.transition(OrderStatus::Refunded);
        Ok(())
    }

    /// Cash or counter payment collected. Marks the order paid and, if it was
    /// still pending, confirms it in the same write.
    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        if matches!(self.status, OrderStatus::Canceled | OrderStatus::Refunded) {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "mark paid",
            });
        }
        if self.is_paid() {
            return Err(OrderError::AlreadyPaid);
        }
        self.record_capture()
    }

    /// A gateway (or cashier) captured the money: paid, and confirmed if it
    /// was still pending.
    ///
    /// A canceled or refunded order refuses it. Its stock is gone, so money
    /// arriving late is refunded by hand instead of reviving the order.
    pub fn record_capture(&mut self) -> Result<(), OrderError> {
        if matches!(self.status, OrderStatus::Canceled | OrderStatus::Refunded) {
            return Err(OrderError::NotPayable {
                current_state: self.status,
            });
        }
        self.payment_status = PaymentStatus::Paid;
        if self.status == OrderStatus::Pending {
            self.status = OrderStatus::Confirmed;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// A new payment attempt replaces a failed one: failed → unpaid.
    pub fn reopen_payment(&mut self) {
        if self.payment_status == PaymentStatus::Failed {
            self.set_payment_status(PaymentStatus::Unpaid);
        }
    }

    /// A gateway reported an unambiguous failure.
    ///
    /// With `cancel` set, a still-pending order is canceled as well.
    pub fn record_payment_failure(&mut self, cancel: bool) {
        if self.is_paid() {
            return;
        }
        self.set_payment_status(PaymentStatus::Failed);
        if cancel && self.status == OrderStatus::Pending {
            self.transition(OrderStatus::Canceled);
        }
    }

    /// Cancels an abandoned checkout: only `pending` and not yet paid.
    pub fn expire(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending || self.is_paid() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "expire",
            });
        }
        self.transition(OrderStatus::Canceled);
        Ok(())
    }
}

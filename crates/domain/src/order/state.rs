//! Order status state machine, payment status and fulfillment method.

use serde::{Deserialize, Serialize};

use crate::error::UnknownValue;

/// How the customer receives the goods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMethod {
    Delivery,
    Pickup,
}

impl FulfillmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentMethod::Delivery => "delivery",
            FulfillmentMethod::Pickup => "pickup",
        }
    }
}

impl std::fmt::Display for FulfillmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FulfillmentMethod {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivery" => Ok(FulfillmentMethod::Delivery),
            "pickup" => Ok(FulfillmentMethod::Pickup),
            other => Err(UnknownValue::new("fulfillment method", other)),
        }
    }
}

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──┬──► ReadyToPickup ──┐
///    │            │       │                    ├──► Delivered
///    │            │       └──► OnDelivery ─────┘
///    │            │
///    │            └──(paid)──► Refunded
///    │
///    └──── any non-terminal state ────► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created at checkout, stock reserved, awaiting payment or confirmation.
    #[default]
    Pending,

    /// Accepted for fulfillment.
    Confirmed,

    /// Pickup orders waiting at the counter.
    ReadyToPickup,

    /// Delivery orders handed to the courier.
    OnDelivery,

    /// Goods received by the customer (terminal state).
    Delivered,

    /// Order abandoned or rejected (terminal state).
    Canceled,

    /// Paid order reversed (terminal state).
    Refunded,
}

impl OrderStatus {
    /// Returns true if the order can be confirmed in this status.
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a pickup order can be marked ready at the counter.
    pub fn can_mark_ready_for_pickup(&self, fulfillment: FulfillmentMethod) -> bool {
        matches!(self, OrderStatus::Confirmed) && fulfillment == FulfillmentMethod::Pickup
    }

    /// Returns true if a delivery order can be handed to the courier.
    pub fn can_dispatch(&self, fulfillment: FulfillmentMethod) -> bool {
        matches!(self, OrderStatus::Confirmed) && fulfillment == FulfillmentMethod::Delivery
    }

    /// Returns true if the order can be marked delivered.
    ///
    /// Only the in-transit status matching the fulfillment method qualifies.
    pub fn can_deliver(&self, fulfillment: FulfillmentMethod) -> bool {
        match fulfillment {
            FulfillmentMethod::Pickup => matches!(self, OrderStatus::ReadyToPickup),
            FulfillmentMethod::Delivery => matches!(self, OrderStatus::OnDelivery),
        }
    }

    /// Returns true if the order can be canceled in this status.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if a paid order in this status can be refunded.
    pub fn can_refund(&self) -> bool {
        matches!(self, OrderStatus::Confirmed)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Canceled | OrderStatus::Refunded
        )
    }

    /// Returns the status name as stored and rendered.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::ReadyToPickup => "ready_to_pickup",
            OrderStatus::OnDelivery => "on_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "ready_to_pickup" => Ok(OrderStatus::ReadyToPickup),
            "on_delivery" => Ok(OrderStatus::OnDelivery),
            "delivered" => Ok(OrderStatus::Delivered),
            "canceled" => Ok(OrderStatus::Canceled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(UnknownValue::new("order status", other)),
        }
    }
}

/// Money-side status of an order, tracked independently of fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Authorized,
    Paid,
    PartialRefund,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Paid => "paid",
            PaymentStatus::PartialRefund => "partial_refund",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "authorized" => Ok(PaymentStatus::Authorized),
            "paid" => Ok(PaymentStatus::Paid),
            "partial_refund" => Ok(PaymentStatus::PartialRefund),
            "refunded" => Ok(PaymentStatus::Refunded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownValue::new("payment status", other)),
        }
    }
}

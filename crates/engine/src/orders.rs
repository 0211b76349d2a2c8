//! Order administration: lookup, cancel, fulfillment, cash collection and
//! refund bookkeeping.

use domain::{IntentStatus, Order, OrderStatus, PaymentIntent, Reservation};
use serde::Serialize;
use store::{Store, Transaction};

use crate::error::{EngineError, Result};
use crate::payments::cancel_open_intents;
use crate::reservation::ReservationEngine;

/// An order with its reservations and intent log.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order: Order,
    pub reservations: Vec<Reservation>,
    pub payment_intents: Vec<PaymentIntent>,
}

pub struct OrderService<S: Store> {
    store: S,
    reservations: ReservationEngine<S>,
}

impl<S: Store> OrderService<S> {
    pub fn new(reservations: ReservationEngine<S>) -> Self {
        Self {
            store: reservations.store().clone(),
            reservations,
        }
    }

    pub async fn get(&self, order_number: &str) -> Result<OrderView> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order_by_number(order_number)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_number.to_string()))?;
        let reservations = tx.reservations(order.id()).await?;
        let payment_intents = tx.intents(order.id()).await?;
        Ok(OrderView {
            order,
            reservations,
            payment_intents,
        })
    }

    async fn lock<T: Transaction>(tx: &mut T, order_number: &str) -> Result<Order> {
        tx.lock_order_by_number(order_number)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_number.to_string()))
    }

    /// Cancels the order, releases whatever stock is still held for it and
    /// cancels its open intents. Captured stock stays sold.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_number: &str) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = Self::lock(&mut tx, order_number).await?;

        order.cancel()?;
        let released = self.reservations.release_in(&mut tx, order.id()).await?;
        let cancelled = cancel_open_intents(&mut tx, order.id()).await?;
        tx.save_order(&order).await?;
        tx.commit().await?;

        metrics::counter!("orders_canceled_total", "source" => "admin").increment(1);
        tracing::info!(released, cancelled_intents = cancelled, "order canceled");
        Ok(order)
    }

    /// Moves the order along its fulfillment path.
    #[tracing::instrument(skip(self))]
    pub async fn advance(&self, order_number: &str, target: OrderStatus) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = Self::lock(&mut tx, order_number).await?;

        match target {
            OrderStatus::Confirmed => order.confirm()?,
            OrderStatus::ReadyToPickup => order.mark_ready_for_pickup()?,
            OrderStatus::OnDelivery => order.dispatch()?,
            OrderStatus::Delivered => order.deliver()?,
            other => {
                return Err(EngineError::Validation(format!(
                    "Status {other} is not a fulfillment step."
                )));
            }
        }
        tx.save_order(&order).await?;
        tx.commit().await?;

        tracing::info!(status = %order.status(), "fulfillment advanced");
        Ok(order)
    }

    /// Records cash collected for an in-person order. Any stock still held
    /// is captured and the latest open in-person intent is marked captured.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(&self, order_number: &str) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = Self::lock(&mut tx, order_number).await?;

        order.mark_paid()?;
        self.reservations.capture_in(&mut tx, order.id()).await?;

        let in_person = tx
            .intents(order.id())
            .await?
            .into_iter()
            .rev()
            .find(|i| i.gateway().is_none() && i.status().is_open());
        if let Some(listed) = in_person
            && let Some(mut intent) = tx.lock_intent(listed.id()).await?
        {
            intent.mark_captured()?;
            tx.save_intent(&intent).await?;
        }

        tx.save_order(&order).await?;
        tx.commit().await?;

        metrics::counter!("payments_captured_total", "gateway" => "in_person").increment(1);
        tracing::info!("order marked paid");
        Ok(order)
    }

    /// Refund bookkeeping: the order and its latest captured intent move to
    /// refunded. No money is moved here.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_number: &str) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = Self::lock(&mut tx, order_number).await?;

        order.refund()?;
        let captured = tx
            .intents(order.id())
            .await?
            .into_iter()
            .rev()
            .find(|i| i.status() == IntentStatus::Captured);
        if let Some(listed) = captured
            && let Some(mut intent) = tx.lock_intent(listed.id()).await?
        {
            intent.refund()?;
            tx.save_intent(&intent).await?;
        }

        tx.save_order(&order).await?;
        tx.commit().await?;

        tracing::info!("order refunded");
        Ok(order)
    }
}

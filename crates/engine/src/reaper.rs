//! Background reaper for abandoned checkouts.
//!
//! Orders that stay `pending` and unpaid past the reservation TTL are
//! canceled, their held stock released and their open intents cancelled.
//! Each order is handled in its own transaction and re-checked under lock,
//! so a payment landing mid-sweep wins. An order that fails to expire is
//! logged and skipped; the rest of the sweep goes on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::OrderStatus;
use store::{Store, Transaction};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::payments::cancel_open_intents;
use crate::reservation::ReservationEngine;

const SWEEP_BATCH: i64 = 100;

pub struct Reaper<S: Store> {
    store: S,
    reservations: ReservationEngine<S>,
    ttl: chrono::Duration,
}

impl<S: Store> Reaper<S> {
    pub fn new(reservations: ReservationEngine<S>, ttl: chrono::Duration) -> Self {
        Self {
            store: reservations.store().clone(),
            reservations,
            ttl,
        }
    }

    /// Expires every stale order found at `now`. Returns how many were
    /// canceled. Only failing to list stale orders is an error.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.ttl;
        let mut expired = 0;
        let mut failed = 0;

        loop {
            let mut tx = self.store.begin().await?;
            let stale = tx.stale_pending_orders(cutoff, SWEEP_BATCH).await?;
            drop(tx);

            let mut progressed = 0;
            for number in &stale {
                match self.expire(number.as_str()).await {
                    Ok(true) => progressed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        failed += 1;
                        metrics::counter!("reaper_errors_total").increment(1);
                        tracing::error!(order_number = %number, error = %e, "order not expired");
                    }
                }
            }
            expired += progressed;

            if stale.len() < SWEEP_BATCH as usize || progressed == 0 {
                break;
            }
        }

        if expired > 0 || failed > 0 {
            tracing::info!(expired, failed, "stale pending orders expired");
        }
        Ok(expired)
    }

    async fn expire(&self, order_number: &str) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let Some(mut order) = tx.lock_order_by_number(order_number).await? else {
            return Ok(false);
        };
        if order.status() != OrderStatus::Pending || order.is_paid() {
            return Ok(false);
        }

        order.expire()?;
        let released = self.reservations.release_in(&mut tx, order.id()).await?;
        cancel_open_intents(&mut tx, order.id()).await?;
        tx.save_order(&order).await?;
        tx.commit().await?;

        metrics::counter!("reaper_orders_expired_total").increment(1);
        tracing::info!(order_number, released, "abandoned order expired");
        Ok(true)
    }

    /// Runs [`Reaper::sweep_once`] every `interval` until `shutdown` flips
    /// to true. Sweep errors are logged and the loop keeps going.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()).await {
                            tracing::error!(error = %e, "reaper sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("reaper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

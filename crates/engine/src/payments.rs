//! Payment orchestration over the append-only intent log.
//!
//! Starting a payment dispatches on the method's settlement capability.
//! Immediate methods (cash on delivery, pay at pickup) capture stock and
//! confirm the order at once. Redirect methods open a pending intent and hand
//! the customer to a gateway; the order settles later, when a webhook or a
//! status poll reports the outcome.
//!
//! Settlement always locks the order before the intent, the same order every
//! other writer uses.
//!
//! An order has at most one open intent. Starting a new attempt cancels the
//! others, and only the attempt still in play may move the order: a failure
//! reported for a superseded intent is recorded on that intent alone.

use common::{Money, OrderId};
use domain::{
    GatewayOutcome, IntentStatus, Order, OrderStatus, PaymentIntent, PaymentMethod,
    PaymentMethods, PaymentStatus,
};
use serde::Serialize;
use serde_json::{Value, json};
use store::{Store, StoreError, Transaction};

use crate::error::{EngineError, Result};
use crate::gateways::{GatewayRegistry, RedirectTarget};
use crate::reservation::{ReservationEngine, ReservationLine};

#[derive(Debug, Clone, Copy)]
pub struct PaymentSettings {
    /// Release stock and cancel the order when a gateway reports an
    /// unambiguous failure. Pending outcomes never trigger it.
    pub release_on_failure: bool,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            release_on_failure: true,
        }
    }
}

/// Gateway hand-off returned to the storefront.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayHandoff {
    pub provider: String,
    #[serde(flatten)]
    pub redirect: RedirectTarget,
}

/// Result of starting a payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStart {
    pub message: String,
    pub order: Order,
    pub payment_intent: PaymentIntent,
    pub gateway: Option<GatewayHandoff>,
    /// True when an earlier start was reused instead of creating anything.
    pub idempotent: bool,
}

/// Acknowledgement returned to a gateway. Webhooks are always acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub ok: bool,
    pub message: String,
}

impl WebhookAck {
    fn new(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

/// Result of polling a gateway for an order's latest transaction.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    pub order_number: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub outcome: GatewayOutcome,
    pub message: String,
    pub gateway_response: Value,
}

/// Amount and currency a gateway claims it settled, as sent.
#[derive(Debug, Clone, Default)]
struct Reported {
    amount: Option<String>,
    currency: Option<String>,
}

impl Reported {
    /// An amount that is present must parse and equal the expected one.
    fn amount_matches(&self, expected: Money) -> bool {
        match self.amount.as_deref() {
            None => true,
            Some(raw) => Money::parse_decimal(raw) == Some(expected),
        }
    }

    fn currency_matches(&self, expected: &str) -> bool {
        self.currency
            .as_deref()
            .is_none_or(|c| c.eq_ignore_ascii_case(expected))
    }
}

/// Cancels every still-open intent of the order.
pub(crate) async fn cancel_open_intents<T: Transaction>(
    tx: &mut T,
    order_id: OrderId,
) -> Result<usize> {
    let mut cancelled = 0;
    for listed in tx.intents(order_id).await? {
        if !listed.status().is_open() {
            continue;
        }
        if let Some(mut intent) = tx.lock_intent(listed.id()).await?
            && intent.status().is_open()
        {
            intent.cancel()?;
            tx.save_intent(&intent).await?;
            cancelled += 1;
        }
    }
    Ok(cancelled)
}

/// Starts payments and applies gateway outcomes.
pub struct PaymentService<S: Store> {
    store: S,
    reservations: ReservationEngine<S>,
    methods: PaymentMethods,
    gateways: GatewayRegistry,
    settings: PaymentSettings,
}

impl<S: Store> PaymentService<S> {
    pub fn new(
        reservations: ReservationEngine<S>,
        methods: PaymentMethods,
        gateways: GatewayRegistry,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store: reservations.store().clone(),
            reservations,
            methods,
            gateways,
            settings,
        }
    }

    pub fn method(&self, code: &str) -> Option<&PaymentMethod> {
        self.methods.get(code)
    }

    /// Starts (or resumes) payment of an order with the given method.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, order_number: &str, method_code: &str) -> Result<PaymentStart> {
        let method = self
            .methods
            .get(method_code)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPaymentMethod(method_code.to_string()))?;

        let started = if method.is_immediate() {
            self.start_immediate(order_number, &method).await?
        } else {
            self.start_redirect(order_number, &method).await?
        };

        if !started.idempotent {
            metrics::counter!("payments_started_total", "method" => method.code.clone())
                .increment(1);
        }
        Ok(started)
    }

    /// One transaction: reserve (if checkout did not), capture, append a
    /// pending intent and confirm the order. Payment stays unpaid until the
    /// cash is collected.
    async fn start_immediate(&self, order_number: &str, method: &PaymentMethod) -> Result<PaymentStart> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order_by_number(order_number)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_number.to_string()))?;
        order.ensure_payable()?;

        let existing = tx
            .intents(order.id())
            .await?
            .into_iter()
            .rev()
            .find(|i| i.method_code() == method.code && i.status().is_live());
        if let Some(intent) = existing
            && order.status() == OrderStatus::Confirmed
        {
            return Ok(PaymentStart {
                message: format!("{} selected.", method.name),
                order,
                payment_intent: intent,
                gateway: None,
                idempotent: true,
            });
        }

        let lines: Vec<ReservationLine> = order
            .items()
            .iter()
            .map(|i| ReservationLine::new(i.variant_id, i.quantity))
            .collect();
        self.reservations
            .reserve_in(&mut tx, order.id(), self.reservations.main_location(), &lines)
            .await?;
        self.reservations.capture_in(&mut tx, order.id()).await?;

        let superseded = cancel_open_intents(&mut tx, order.id()).await?;
        let mut intent =
            PaymentIntent::open(order.id(), method, order.grand_total(), order.currency());
        intent.record_start(
            None,
            None,
            json!({
                "type": method.code,
                "note": "Settled in person. Inventory captured immediately.",
            }),
        );
        tx.insert_intent(&mut intent).await?;

        order.reopen_payment();
        if order.status() == OrderStatus::Pending {
            order.confirm()?;
        }
        tx.save_order(&order).await?;
        tx.commit().await?;

        tracing::info!(
            order_number,
            method = %method.code,
            superseded,
            "immediate payment started"
        );
        Ok(PaymentStart {
            message: format!("{} selected.", method.name),
            order,
            payment_intent: intent,
            gateway: None,
            idempotent: false,
        })
    }

    /// Reuses or appends a pending intent, then asks the gateway for a
    /// checkout with no transaction open, then records the hand-off.
    async fn start_redirect(&self, order_number: &str, method: &PaymentMethod) -> Result<PaymentStart> {
        let gateway_name = method.gateway().unwrap_or_default();
        let gateway = self
            .gateways
            .get(gateway_name)
            .ok_or_else(|| EngineError::GatewayNotConfigured(gateway_name.to_string()))?;

        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order_by_number(order_number)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_number.to_string()))?;
        order.ensure_payable()?;

        let reusable = tx
            .intents(order.id())
            .await?
            .into_iter()
            .rev()
            .find(|i| i.method_code() == method.code && i.status().is_open());
        let (intent, reused) = match reusable {
            Some(intent) => (intent, true),
            None => {
                let superseded = cancel_open_intents(&mut tx, order.id()).await?;
                if superseded > 0 {
                    tracing::info!(order_number, superseded, "earlier payment attempts cancelled");
                }
                let mut intent =
                    PaymentIntent::open(order.id(), method, order.grand_total(), order.currency());
                tx.insert_intent(&mut intent).await?;
                order.reopen_payment();
                tx.save_order(&order).await?;
                (intent, false)
            }
        };
        tx.commit().await?;

        let handoff = gateway.start(&order, &intent).await?;

        let mut tx = self.store.begin().await?;
        let mut intent = tx.lock_intent(intent.id()).await?.ok_or_else(|| {
            StoreError::NotFound(format!("payment intent {}", intent.id()))
        })?;
        if intent.status().is_open() {
            intent.record_start(
                handoff.correlation_id.clone(),
                Some(handoff.redirect.url().to_string()),
                handoff.request_snapshot,
            );
            tx.save_intent(&intent).await?;
            tx.commit().await?;
        }

        tracing::info!(
            order_number,
            gateway = gateway_name,
            reference = ?intent.gateway_reference(),
            reused,
            "redirect payment started"
        );
        Ok(PaymentStart {
            message: format!("Redirect to {}", method.name),
            order,
            payment_intent: intent,
            gateway: Some(GatewayHandoff {
                provider: gateway_name.to_string(),
                redirect: handoff.redirect,
            }),
            idempotent: reused,
        })
    }

    /// Applies a gateway callback. Always acknowledges; anything that cannot
    /// be applied is logged and ignored.
    #[tracing::instrument(skip(self, payload))]
    pub async fn handle_webhook(&self, provider: &str, payload: Value) -> Result<WebhookAck> {
        metrics::counter!("webhooks_received_total", "provider" => provider.to_string())
            .increment(1);

        let Some(gateway) = self.gateways.get(provider) else {
            tracing::warn!("webhook for unknown provider");
            return Ok(self.rejected(provider, "unknown_provider", "Unknown provider (ignored)"));
        };

        let verification = match gateway.verify_callback(&payload).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "webhook verification failed");
                return Ok(self.rejected(provider, "verification_error", "Verification failed (ignored)"));
            }
        };

        let Some(reference) = verification.correlation_id.clone() else {
            tracing::warn!("webhook without a correlation id");
            return Ok(self.rejected(provider, "intent_not_found", "Intent not found (ignored)"));
        };

        let mut tx = self.store.begin().await?;
        let Some(found) = tx.latest_intent_by_reference(provider, &reference).await? else {
            tracing::warn!(%reference, "webhook for unknown intent");
            return Ok(self.rejected(provider, "intent_not_found", "Intent not found (ignored)"));
        };
        let Some(mut order) = tx.lock_order(found.order_id()).await? else {
            tracing::warn!(%reference, "webhook intent without order");
            return Ok(self.rejected(provider, "order_not_found", "Order not found (ignored)"));
        };
        let Some(mut intent) = tx.lock_intent(found.id()).await? else {
            return Ok(self.rejected(provider, "intent_not_found", "Intent not found (ignored)"));
        };

        intent.record_webhook(payload);

        if !verification.verified {
            tx.save_intent(&intent).await?;
            tx.commit().await?;
            tracing::warn!(%reference, order_number = %order.number(), "webhook signature invalid");
            return Ok(self.rejected(provider, "invalid_signature", "Invalid signature (ignored)"));
        }

        let reported = Reported {
            amount: verification.reported_amount,
            currency: verification.reported_currency,
        };
        let message = self
            .apply_outcome(&mut tx, &mut order, &mut intent, &verification.outcome, &reported)
            .await?;
        tx.commit().await?;

        tracing::info!(
            %reference,
            order_number = %order.number(),
            outcome = verification.outcome.as_str(),
            ack = %message,
            "webhook applied"
        );
        Ok(WebhookAck::new(message))
    }

    fn rejected(&self, provider: &str, reason: &'static str, message: &str) -> WebhookAck {
        metrics::counter!(
            "webhooks_rejected_total",
            "provider" => provider.to_string(),
            "reason" => reason
        )
        .increment(1);
        WebhookAck::new(message)
    }

    /// Asks the gateway about the order's latest referenced intent and
    /// applies the answer exactly like a verified webhook.
    #[tracing::instrument(skip(self))]
    pub async fn poll(&self, order_number: &str) -> Result<PaymentStatusView> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order_by_number(order_number)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_number.to_string()))?;
        let latest = tx
            .intents(order.id())
            .await?
            .into_iter()
            .rev()
            .find(|i| i.gateway().is_some() && i.gateway_reference().is_some())
            .ok_or(EngineError::NoGatewayTransaction)?;
        drop(tx);

        let (Some(gateway_name), Some(reference)) = (latest.gateway(), latest.gateway_reference())
        else {
            return Err(EngineError::NoGatewayTransaction);
        };
        let gateway = self
            .gateways
            .get(gateway_name)
            .ok_or_else(|| EngineError::GatewayNotConfigured(gateway_name.to_string()))?;
        let polled = gateway.poll(reference).await?;

        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order.id())
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_number.to_string()))?;
        let mut intent = tx
            .lock_intent(latest.id())
            .await?
            .ok_or(EngineError::NoGatewayTransaction)?;
        intent.record_response(polled.raw.clone());
        let message = self
            .apply_outcome(&mut tx, &mut order, &mut intent, &polled.outcome, &Reported::default())
            .await?;
        tx.commit().await?;

        Ok(PaymentStatusView {
            order_number: order.number().as_str().to_string(),
            order_status: order.status(),
            payment_status: order.payment_status(),
            outcome: polled.outcome,
            message,
            gateway_response: polled.raw,
        })
    }

    /// Shared settlement step for webhooks and polls. Both rows are locked by
    /// the caller; the intent is always saved so its snapshots persist.
    async fn apply_outcome<T: Transaction>(
        &self,
        tx: &mut T,
        order: &mut Order,
        intent: &mut PaymentIntent,
        outcome: &GatewayOutcome,
        reported: &Reported,
    ) -> Result<String> {
        let gateway = intent.gateway().unwrap_or("none").to_string();
        let settled = order.is_paid() || intent.status() == IntentStatus::Captured;

        let message = match outcome {
            GatewayOutcome::Success if settled => "Already processed".to_string(),
            GatewayOutcome::Success => {
                if !reported.amount_matches(intent.amount())
                    || !reported.currency_matches(intent.currency())
                {
                    tracing::error!(
                        order_number = %order.number(),
                        expected_amount = %intent.amount(),
                        expected_currency = intent.currency(),
                        reported_amount = ?reported.amount,
                        reported_currency = ?reported.currency,
                        "gateway reported a different amount; capture not applied"
                    );
                    metrics::counter!("payments_amount_mismatch_total", "gateway" => gateway)
                        .increment(1);
                    tx.save_intent(intent).await?;
                    return Ok("Amount mismatch (ignored)".to_string());
                }

                if matches!(order.status(), OrderStatus::Canceled | OrderStatus::Refunded) {
                    // Money moved but the stock is gone: keep the order as it
                    // is and leave the refund to staff.
                    intent.mark_captured()?;
                    tx.save_intent(intent).await?;
                    tracing::error!(
                        order_number = %order.number(),
                        order_status = order.status().as_str(),
                        amount = %intent.amount(),
                        "payment captured for a closed order; refund it manually"
                    );
                    metrics::counter!("payments_captured_after_cancel_total", "gateway" => gateway)
                        .increment(1);
                    return Ok("Payment received for a canceled order (flagged for refund)".to_string());
                }

                self.reservations.capture_in(tx, order.id()).await?;
                intent.mark_captured()?;
                order.record_capture()?;
                tx.save_order(order).await?;
                tx.save_intent(intent).await?;
                let superseded = cancel_open_intents(tx, order.id()).await?;

                metrics::counter!("payments_captured_total", "gateway" => gateway).increment(1);
                tracing::info!(order_number = %order.number(), superseded, "payment captured");
                return Ok("Payment captured and order confirmed".to_string());
            }
            GatewayOutcome::Pending => "Payment pending".to_string(),
            GatewayOutcome::Failure { .. } if settled => "Already processed".to_string(),
            GatewayOutcome::Failure { reason } => {
                if intent.status().is_live() {
                    intent.mark_failed()?;
                    let superseded = tx
                        .intents(order.id())
                        .await?
                        .iter()
                        .any(|other| other.id() != intent.id() && other.status().is_live());
                    if superseded {
                        tracing::info!(
                            order_number = %order.number(),
                            %reason,
                            "superseded payment attempt failed; order left as is"
                        );
                    } else {
                        if self.settings.release_on_failure
                            && order.status() == OrderStatus::Pending
                        {
                            self.reservations.release_in(tx, order.id()).await?;
                        }
                        order.record_payment_failure(self.settings.release_on_failure);
                        tx.save_order(order).await?;
                        tracing::info!(order_number = %order.number(), %reason, "payment failed");
                    }
                    metrics::counter!("payments_failed_total", "gateway" => gateway).increment(1);
                }
                "Payment not successful".to_string()
            }
        };

        tx.save_intent(intent).await?;
        Ok(message)
    }
}

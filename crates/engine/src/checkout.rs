//! Checkout: turns a guest cart into a pending order with its stock held.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::Money;
use domain::{
    Customer, CustomerContact, FulfillmentMethod, NewOrder, Order, OrderItem, OrderNumber,
    PaymentMethods,
};
use serde::Deserialize;
use serde_json::Value;
use store::{Store, StoreError, Transaction};

use crate::cart::{Cart, CartSource};
use crate::error::{EngineError, Result};
use crate::reservation::{ReservationEngine, ReservationLine};

/// Checkout form as submitted by the storefront.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutRequest {
    pub fulfillment_method: Option<String>,
    pub payment_method_code: Option<String>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub shipping_address: Option<Value>,
    pub billing_address: Option<Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Used when the cart carries no currency.
    pub default_currency: String,
    /// Flat shipping charged on delivery orders.
    pub delivery_fee: Money,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            default_currency: "LKR".to_string(),
            delivery_fee: Money::from_cents(30_000),
        }
    }
}

/// Attempts at a fresh order number before a collision is reported.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

type NumberSource = Arc<dyn Fn(DateTime<Utc>) -> OrderNumber + Send + Sync>;

struct ValidCheckout {
    fulfillment: FulfillmentMethod,
    customer: CustomerContact,
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EngineError::Validation(format!("The {field} field is required.")))
}

fn is_blank(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Creates orders from carts.
pub struct CheckoutService<S: Store, C: CartSource> {
    store: S,
    reservations: ReservationEngine<S>,
    carts: C,
    methods: PaymentMethods,
    settings: CheckoutSettings,
    numbers: NumberSource,
}

/// Finds the customer registered under the contact's phone, creating one on
/// first checkout. A missing email is filled from the contact.
async fn find_or_create_customer<T: Transaction>(
    tx: &mut T,
    contact: &CustomerContact,
    now: DateTime<Utc>,
) -> Result<Customer> {
    let existing = match tx.lock_customer_by_phone(&contact.phone).await? {
        Some(customer) => customer,
        None => {
            let customer = Customer::from_contact(contact, now);
            if tx.insert_customer(&customer).await? {
                return Ok(customer);
            }
            // Registered by a concurrent checkout since the lookup.
            tx.lock_customer_by_phone(&contact.phone)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound(format!("customer with phone {}", contact.phone))
                })?
        }
    };

    let mut customer = existing;
    if customer.fill_missing_email(contact.email.as_deref(), now) {
        tx.save_customer(&customer).await?;
    }
    Ok(customer)
}

impl<S: Store, C: CartSource> CheckoutService<S, C> {
    pub fn new(
        reservations: ReservationEngine<S>,
        carts: C,
        methods: PaymentMethods,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store: reservations.store().clone(),
            reservations,
            carts,
            methods,
            settings,
            numbers: Arc::new(OrderNumber::generate),
        }
    }

    /// Replaces the order number generator.
    pub fn with_number_source(
        mut self,
        numbers: impl Fn(DateTime<Utc>) -> OrderNumber + Send + Sync + 'static,
    ) -> Self {
        self.numbers = Arc::new(numbers);
        self
    }

    /// Places an order for the guest cart behind `token`.
    ///
    /// The customer, the order, its items and its reservations at the main
    /// location are written in one transaction; nothing is written if any
    /// line cannot be reserved. A collision on the generated order number
    /// retries the whole transaction with a new number. The cart is marked
    /// converted afterwards.
    #[tracing::instrument(skip(self, request), fields(order_number = tracing::field::Empty))]
    pub async fn checkout(&self, token: &str, request: &CheckoutRequest) -> Result<Order> {
        let started = Instant::now();
        let result = self.place(token, request).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                tracing::Span::current().record("order_number", order.number().as_str());
                metrics::counter!("checkout_orders_total").increment(1);
                tracing::info!(
                    grand_total = %order.grand_total(),
                    items = order.items().len(),
                    "order placed"
                );
            }
            Err(e) => {
                let reason = match e {
                    EngineError::InsufficientStock { .. } => "insufficient_stock",
                    EngineError::EmptyCart => "empty_cart",
                    EngineError::ItemUnavailable => "item_unavailable",
                    EngineError::Validation(_) | EngineError::UnknownPaymentMethod(_) => {
                        "validation"
                    }
                    _ => "error",
                };
                metrics::counter!("checkout_rejected_total", "reason" => reason).increment(1);
                tracing::info!(reason, error = %e, "checkout rejected");
            }
        }
        result
    }

    fn validate(&self, request: &CheckoutRequest) -> Result<ValidCheckout> {
        let fulfillment = required(&request.fulfillment_method, "fulfillment method")?
            .parse::<FulfillmentMethod>()
            .map_err(|_| {
                EngineError::Validation(
                    "The selected fulfillment method is invalid.".to_string(),
                )
            })?;
        let name = required(&request.guest_name, "guest name")?;
        let phone = required(&request.guest_phone, "guest phone")?;

        if fulfillment == FulfillmentMethod::Delivery && is_blank(&request.shipping_address) {
            return Err(EngineError::Validation(
                "Shipping address is required for delivery".to_string(),
            ));
        }
        if let Some(code) = request
            .payment_method_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            && self.methods.get(code).is_none()
        {
            return Err(EngineError::UnknownPaymentMethod(code.to_string()));
        }

        let email = request
            .guest_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        Ok(ValidCheckout {
            fulfillment,
            customer: CustomerContact { name, phone, email },
        })
    }

    async fn place(&self, token: &str, request: &CheckoutRequest) -> Result<Order> {
        let valid = self.validate(request)?;

        let cart = self
            .carts
            .load(token)
            .await?
            .filter(|c| !c.lines.is_empty())
            .ok_or(EngineError::EmptyCart)?;

        let mut attempt = 1;
        let order = loop {
            match self.place_once(&cart, &valid, request).await {
                // Customers and reservations insert with ON CONFLICT, so the
                // order number is the only unique key a checkout can hit.
                Err(EngineError::Store(StoreError::Conflict(reason)))
                    if attempt < ORDER_NUMBER_ATTEMPTS =>
                {
                    metrics::counter!("checkout_number_collisions_total").increment(1);
                    tracing::warn!(attempt, %reason, "order number taken, retrying");
                    attempt += 1;
                }
                result => break result?,
            }
        };

        if let Err(e) = self.carts.mark_converted(token).await {
            tracing::warn!(error = %e, "order placed but cart not marked converted");
        }
        Ok(order)
    }

    async fn place_once(
        &self,
        cart: &Cart,
        valid: &ValidCheckout,
        request: &CheckoutRequest,
    ) -> Result<Order> {
        let mut tx = self.store.begin().await?;

        // Prices come from the catalog, not from the cart.
        let mut items = Vec::with_capacity(cart.lines.len());
        for line in &cart.lines {
            let variant = tx
                .variant(line.variant_id)
                .await?
                .filter(|v| v.is_active)
                .ok_or(EngineError::ItemUnavailable)?;
            items.push(OrderItem {
                variant_id: variant.id,
                product_title: variant.product_title,
                variant_title: variant.variant_title,
                sku: variant.sku,
                unit_price: variant.price,
                quantity: line.quantity,
            });
        }

        let shipping_total = match valid.fulfillment {
            FulfillmentMethod::Delivery => self.settings.delivery_fee,
            FulfillmentMethod::Pickup => Money::zero(),
        };
        let currency = if cart.currency.trim().is_empty() {
            self.settings.default_currency.clone()
        } else {
            cart.currency.clone()
        };

        let now = Utc::now();
        let customer = find_or_create_customer(&mut tx, &valid.customer, now).await?;
        let order = Order::place(
            NewOrder {
                number: (self.numbers)(now),
                customer_id: Some(customer.id),
                customer: valid.customer.clone(),
                currency,
                fulfillment: valid.fulfillment,
                items,
                discount_total: Money::zero(),
                shipping_total,
                tax_total: Money::zero(),
                shipping_address: request.shipping_address.clone(),
                billing_address: request.billing_address.clone(),
                notes: request.notes.clone(),
            },
            now,
        )?;
        tx.insert_order(&order).await?;

        let lines: Vec<ReservationLine> = order
            .items()
            .iter()
            .map(|i| ReservationLine::new(i.variant_id, i.quantity))
            .collect();
        self.reservations
            .reserve_in(&mut tx, order.id(), self.reservations.main_location(), &lines)
            .await?;

        tx.commit().await?;
        Ok(order)
    }
}

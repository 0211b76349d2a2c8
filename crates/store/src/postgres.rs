use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CustomerId, LocationId, Money, OrderId, PaymentIntentId, ReservationId, StockItemId, VariantId,
};
use domain::{
    Customer, CustomerContact, IntentParts, Location, Order, OrderItem, OrderNumber, OrderParts,
    OrderTotals, PaymentIntent, Reservation, StockLevel, Variant,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{Store, Transaction},
};

const ORDER_COLUMNS: &str = "id, order_number, customer_id, customer_name, customer_phone, customer_email, \
     currency, subtotal_cents, discount_total_cents, shipping_total_cents, tax_total_cents, \
     grand_total_cents, fulfillment_method, status, payment_status, shipping_address, \
     billing_address, notes, created_at, updated_at";

const INTENT_COLUMNS: &str = "id, sequence, order_id, method_code, gateway, amount_cents, currency, \
     status, gateway_reference, redirect_url, request_payload, response_payload, webhook_payload, \
     created_at, updated_at";

const RESERVATION_COLUMNS: &str =
    "id, order_id, variant_id, location_id, quantity, status, created_at, updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

/// Transaction over a [`PostgresStore`]. Rolled back by sqlx when dropped
/// uncommitted.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn non_negative_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn row_to_location(row: &PgRow) -> Result<Location> {
    Ok(Location {
        id: LocationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        is_active: row.try_get("is_active")?,
    })
}

fn row_to_variant(row: &PgRow) -> Result<Variant> {
    Ok(Variant {
        id: VariantId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_title: row.try_get("product_title")?,
        variant_title: row.try_get("variant_title")?,
        sku: row.try_get("sku")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        is_active: row.try_get("is_active")?,
        track_inventory: row.try_get("track_inventory")?,
        allow_backorder: row.try_get("allow_backorder")?,
    })
}

fn row_to_level(row: &PgRow) -> Result<StockLevel> {
    Ok(StockLevel {
        stock_item_id: StockItemId::from_uuid(row.try_get::<Uuid, _>("stock_item_id")?),
        variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
        location_id: LocationId::from_uuid(row.try_get::<Uuid, _>("location_id")?),
        available: row.try_get("available")?,
        reserved: row.try_get("reserved")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_reservation(row: &PgRow) -> Result<Reservation> {
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
        location_id: LocationId::from_uuid(row.try_get::<Uuid, _>("location_id")?),
        quantity: row.try_get("quantity")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_customer(row: &PgRow) -> Result<Customer> {
    Ok(Customer {
        id: CustomerId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
        product_title: row.try_get("product_title")?,
        variant_title: row.try_get("variant_title")?,
        sku: row.try_get("sku")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        quantity: non_negative_u32(row.try_get("quantity")?, "order_items.quantity")?,
    })
}

fn row_to_intent(row: &PgRow) -> Result<PaymentIntent> {
    Ok(PaymentIntent::from_parts(IntentParts {
        id: PaymentIntentId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        method_code: row.try_get("method_code")?,
        gateway: row.try_get("gateway")?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        currency: row.try_get("currency")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        gateway_reference: row.try_get("gateway_reference")?,
        redirect_url: row.try_get("redirect_url")?,
        request_payload: row.try_get("request_payload")?,
        response_payload: row.try_get("response_payload")?,
        webhook_payload: row.try_get("webhook_payload")?,
        sequence: row.try_get("sequence")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

impl PgTransaction {
    async fn load_order(&mut self, row: Option<PgRow>) -> Result<Option<Order>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id: Uuid = row.try_get("id")?;

        let item_rows = sqlx::query(
            r#"
            SELECT variant_id, product_title, variant_title, sku, unit_price_cents, quantity
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;
        let items = item_rows
            .iter()
            .map(row_to_item)
            .collect::<Result<Vec<_>>>()?;

        let totals = OrderTotals {
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            discount_total: Money::from_cents(row.try_get("discount_total_cents")?),
            shipping_total: Money::from_cents(row.try_get("shipping_total_cents")?),
            tax_total: Money::from_cents(row.try_get("tax_total_cents")?),
            grand_total: Money::from_cents(row.try_get("grand_total_cents")?),
        };
        let number: String = row.try_get("order_number")?;
        if !totals.is_balanced() {
            return Err(StoreError::Corrupt(format!(
                "order {number} totals do not add up"
            )));
        }

        Ok(Some(Order::from_parts(OrderParts {
            id: OrderId::from_uuid(id),
            number: OrderNumber::new(number),
            customer_id: row
                .try_get::<Option<Uuid>, _>("customer_id")?
                .map(CustomerId::from_uuid),
            customer: CustomerContact {
                name: row.try_get("customer_name")?,
                phone: row.try_get("customer_phone")?,
                email: row.try_get("customer_email")?,
            },
            currency: row.try_get("currency")?,
            totals,
            fulfillment: row.try_get::<String, _>("fulfillment_method")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
            shipping_address: row.try_get("shipping_address")?,
            billing_address: row.try_get("billing_address")?,
            notes: row.try_get("notes")?,
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })))
    }

    async fn fetch_order(&mut self, filter: &str, lock: bool, key: OrderKey<'_>) -> Result<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {filter} = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let query = sqlx::query(&sql);
        let query = match key {
            OrderKey::Number(number) => query.bind(number),
            OrderKey::Id(id) => query.bind(id),
        };
        let row = query.fetch_optional(&mut *self.tx).await?;
        self.load_order(row).await
    }
}

enum OrderKey<'a> {
    Number(&'a str),
    Id(Uuid),
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn location_by_code(&mut self, code: &str) -> Result<Option<Location>> {
        let row = sqlx::query("SELECT id, name, code, is_active FROM locations WHERE code = $1")
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_location).transpose()
    }

    async fn upsert_location(&mut self, location: &Location) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, name, code, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, code = EXCLUDED.code, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(location.id.as_uuid())
        .bind(&location.name)
        .bind(&location.code)
        .bind(location.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("locations_code_key")
            {
                return StoreError::Conflict(format!(
                    "location code {} already exists",
                    location.code
                ));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn variant(&mut self, id: VariantId) -> Result<Option<Variant>> {
        let row = sqlx::query(
            r#"
            SELECT id, product_title, variant_title, sku, price_cents, is_active,
                   track_inventory, allow_backorder
            FROM variants
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_variant).transpose()
    }

    async fn upsert_variant(&mut self, variant: &Variant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO variants (id, product_title, variant_title, sku, price_cents, is_active,
                                  track_inventory, allow_backorder)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET product_title = EXCLUDED.product_title,
                variant_title = EXCLUDED.variant_title,
                sku = EXCLUDED.sku,
                price_cents = EXCLUDED.price_cents,
                is_active = EXCLUDED.is_active,
                track_inventory = EXCLUDED.track_inventory,
                allow_backorder = EXCLUDED.allow_backorder
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(&variant.product_title)
        .bind(&variant.variant_title)
        .bind(&variant.sku)
        .bind(variant.price.cents())
        .bind(variant.is_active)
        .bind(variant.track_inventory)
        .bind(variant.allow_backorder)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("variants_sku_key")
            {
                return StoreError::Conflict(format!("sku {} already exists", variant.sku));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn lock_customer_by_phone(&mut self, phone: &str) -> Result<Option<Customer>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, phone, email, created_at, updated_at
            FROM customers
            WHERE phone = $1
            FOR UPDATE
            "#,
        )
        .bind(phone)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_customer).transpose()
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<bool> {
        // A concurrent checkout with the same phone makes ON CONFLICT wait for
        // its commit; the loser then re-reads the winner's row.
        let result = sqlx::query(
            r#"
            INSERT INTO customers (id, name, phone, email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT customers_phone_key DO NOTHING
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(&customer.email)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_customer(&mut self, customer: &Customer) -> Result<()> {
        let result = sqlx::query(
            "UPDATE customers SET name = $2, email = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(customer.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("customer {}", customer.id)));
        }
        Ok(())
    }

    async fn lock_stock_level(
        &mut self,
        variant_id: VariantId,
        location_id: LocationId,
    ) -> Result<StockLevel> {
        // Both inserts are no-ops when the rows exist; a concurrent inserter
        // makes ON CONFLICT wait for its commit instead of failing.
        sqlx::query(
            "INSERT INTO stock_items (id, variant_id) VALUES ($1, $2) ON CONFLICT (variant_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(variant_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        let stock_item_id: Uuid =
            sqlx::query_scalar("SELECT id FROM stock_items WHERE variant_id = $1")
                .bind(variant_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO stock_levels (stock_item_id, location_id, available, reserved)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (stock_item_id, location_id) DO NOTHING
            "#,
        )
        .bind(stock_item_id)
        .bind(location_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT l.stock_item_id, i.variant_id, l.location_id, l.available, l.reserved, l.updated_at
            FROM stock_levels l
            JOIN stock_items i ON i.id = l.stock_item_id
            WHERE l.stock_item_id = $1 AND l.location_id = $2
            FOR UPDATE OF l
            "#,
        )
        .bind(stock_item_id)
        .bind(location_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_level(&row)
    }

    async fn save_stock_level(&mut self, level: &StockLevel) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_levels
            SET available = $3, reserved = $4, updated_at = $5
            WHERE stock_item_id = $1 AND location_id = $2
            "#,
        )
        .bind(level.stock_item_id.as_uuid())
        .bind(level.location_id.as_uuid())
        .bind(level.available)
        .bind(level.reserved)
        .bind(level.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "stock level for variant {} at location {}",
                level.variant_id, level.location_id
            )));
        }
        Ok(())
    }

    async fn stock_levels(&mut self, variant_id: VariantId) -> Result<Vec<StockLevel>> {
        let rows = sqlx::query(
            r#"
            SELECT l.stock_item_id, i.variant_id, l.location_id, l.available, l.reserved, l.updated_at
            FROM stock_levels l
            JOIN stock_items i ON i.id = l.stock_item_id
            WHERE i.variant_id = $1
            ORDER BY l.location_id
            "#,
        )
        .bind(variant_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_level).collect()
    }

    async fn reservation(
        &mut self,
        order_id: OrderId,
        variant_id: VariantId,
        location_id: LocationId,
    ) -> Result<Option<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE order_id = $1 AND variant_id = $2 AND location_id = $3"
        );
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(variant_id.as_uuid())
            .bind(location_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_reservation).transpose()
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<bool> {
        // ON CONFLICT keeps the transaction usable, unlike catching the
        // unique violation after the fact.
        let result = sqlx::query(
            r#"
            INSERT INTO reservations (id, order_id, variant_id, location_id, quantity, status,
                                      created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT ON CONSTRAINT reservations_order_variant_location_key DO NOTHING
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.order_id.as_uuid())
        .bind(reservation.variant_id.as_uuid())
        .bind(reservation.location_id.as_uuid())
        .bind(reservation.quantity)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn lock_open_reservations(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE order_id = $1 AND status = 'reserved' \
             ORDER BY variant_id, location_id \
             FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let result =
            sqlx::query("UPDATE reservations SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(reservation.id.as_uuid())
                .bind(reservation.status.as_str())
                .bind(reservation.updated_at)
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "reservation {}",
                reservation.id
            )));
        }
        Ok(())
    }

    async fn reservations(&mut self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 \
             ORDER BY variant_id, location_id"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let totals = order.totals();
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, customer_id, customer_name, customer_phone,
                                customer_email, currency, subtotal_cents, discount_total_cents,
                                shipping_total_cents, tax_total_cents, grand_total_cents,
                                fulfillment_method, status, payment_status, shipping_address,
                                billing_address, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                    $19, $20)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.number().as_str())
        .bind(order.customer_id().map(|id| id.as_uuid()))
        .bind(&order.customer().name)
        .bind(&order.customer().phone)
        .bind(&order.customer().email)
        .bind(order.currency())
        .bind(totals.subtotal.cents())
        .bind(totals.discount_total.cents())
        .bind(totals.shipping_total.cents())
        .bind(totals.tax_total.cents())
        .bind(totals.grand_total.cents())
        .bind(order.fulfillment().as_str())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.shipping_address())
        .bind(order.billing_address())
        .bind(order.notes())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_order_number_key")
            {
                return StoreError::Conflict(format!(
                    "order number {} already exists",
                    order.number()
                ));
            }
            StoreError::Database(e)
        })?;

        for (position, item) in order.items().iter().enumerate() {
            let line_total = item
                .line_total()
                .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", order.number())))?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, variant_id, product_title, variant_title,
                                         sku, unit_price_cents, quantity, line_total_cents)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(position as i32)
            .bind(item.variant_id.as_uuid())
            .bind(&item.product_title)
            .bind(&item.variant_title)
            .bind(&item.sku)
            .bind(item.unit_price.cents())
            .bind(i64::from(item.quantity))
            .bind(line_total.cents())
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn order_by_number(&mut self, number: &str) -> Result<Option<Order>> {
        self.fetch_order("order_number", false, OrderKey::Number(number))
            .await
    }

    async fn lock_order_by_number(&mut self, number: &str) -> Result<Option<Order>> {
        self.fetch_order("order_number", true, OrderKey::Number(number))
            .await
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.fetch_order("id", true, OrderKey::Id(id.as_uuid())).await
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", order.number())));
        }
        Ok(())
    }

    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderNumber>> {
        let numbers: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT order_number
            FROM orders
            WHERE status = 'pending' AND payment_status <> 'paid' AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(numbers.into_iter().map(OrderNumber::new).collect())
    }

    async fn insert_intent(&mut self, intent: &mut PaymentIntent) -> Result<()> {
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO payment_intents (id, order_id, method_code, gateway, amount_cents, currency,
                                         status, gateway_reference, redirect_url, request_payload,
                                         response_payload, webhook_payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING sequence
            "#,
        )
        .bind(intent.id().as_uuid())
        .bind(intent.order_id().as_uuid())
        .bind(intent.method_code())
        .bind(intent.gateway())
        .bind(intent.amount().cents())
        .bind(intent.currency())
        .bind(intent.status().as_str())
        .bind(intent.gateway_reference())
        .bind(intent.redirect_url())
        .bind(intent.request_payload())
        .bind(intent.response_payload())
        .bind(intent.webhook_payload())
        .bind(intent.created_at())
        .bind(intent.updated_at())
        .fetch_one(&mut *self.tx)
        .await?;

        intent.assign_sequence(sequence);
        Ok(())
    }

    async fn save_intent(&mut self, intent: &PaymentIntent) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = $2, gateway_reference = $3, redirect_url = $4, request_payload = $5,
                response_payload = $6, webhook_payload = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(intent.id().as_uuid())
        .bind(intent.status().as_str())
        .bind(intent.gateway_reference())
        .bind(intent.redirect_url())
        .bind(intent.request_payload())
        .bind(intent.response_payload())
        .bind(intent.webhook_payload())
        .bind(intent.updated_at())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment intent {}", intent.id())));
        }
        Ok(())
    }

    async fn lock_intent(&mut self, id: PaymentIntentId) -> Result<Option<PaymentIntent>> {
        let sql = format!("SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_intent).transpose()
    }

    async fn intents(&mut self, order_id: OrderId) -> Result<Vec<PaymentIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE order_id = $1 ORDER BY sequence ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_intent).collect()
    }

    async fn latest_intent_by_reference(
        &mut self,
        gateway: &str,
        reference: &str,
    ) -> Result<Option<PaymentIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE gateway = $1 AND gateway_reference = $2 \
             ORDER BY sequence DESC \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(gateway)
            .bind(reference)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_intent).transpose()
    }
}

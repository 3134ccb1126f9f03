use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Cart, CartLine, DomainError, Money, Order, OrderId, OrderLine, OrderStatus, Principal, Product,
    ProductId, Role, UserId,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{CartStore, CatalogStore, DecrementOutcome, OrderLedger, PrincipalDirectory},
};

/// PostgreSQL-backed store implementation.
///
/// Constructed once at startup around a connection pool and passed to
/// whoever needs it; there is no process-wide connection state.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    /// Creates or updates a user row and binds a bearer token to it.
    pub async fn register_principal(&self, token: &str, principal: Principal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, role, is_active, api_token)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                role = EXCLUDED.role,
                is_active = EXCLUDED.is_active,
                api_token = EXCLUDED.api_token
            "#,
        )
        .bind(principal.user_id.as_uuid())
        .bind(role_to_str(principal.role))
        .bind(principal.is_active)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let stock: i32 = row.try_get("stock")?;
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: stock_from_db(stock)?,
            owner: UserId::from_uuid(row.try_get::<Uuid, _>("owner_id")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderLine {
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            name: row.try_get("name")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            quantity: stock_from_db(quantity)?,
        })
    }

    async fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let updated_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT updated_at FROM carts WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        let Some(updated_at) = updated_at else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity
            FROM cart_lines
            WHERE user_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let quantity: i32 = row.try_get("quantity")?;
            lines.push(CartLine {
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                quantity: stock_from_db(quantity)?,
            });
        }

        Ok(Some(Cart::from_lines(user_id, lines, updated_at)?))
    }

    /// Loads orders (in the given row order) together with their lines.
    async fn hydrate_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<_, _>>()?;

        let line_rows = sqlx::query(
            r#"
            SELECT order_id, product_id, name, unit_price_cents, quantity
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines_by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &line_rows {
            let order_id: Uuid = row.try_get("order_id")?;
            lines_by_order
                .entry(order_id)
                .or_default()
                .push(Self::row_to_order_line(row)?);
        }

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let status: String = row.try_get("status")?;
            let stored_total: i64 = row.try_get("total_amount_cents")?;

            let order = Order::restore(
                OrderId::from_uuid(id),
                UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                lines_by_order.remove(&id).unwrap_or_default(),
                status.parse::<OrderStatus>().map_err(StoreError::Corrupt)?,
                row.try_get("shipping_address")?,
                row.try_get("created_at")?,
            )
            .map_err(|e| StoreError::Corrupt(format!("order {id}: {e}")))?;

            if order.total_amount().cents() != stored_total {
                return Err(StoreError::Corrupt(format!(
                    "order {id} total {stored_total} does not match its lines ({})",
                    order.total_amount().cents()
                )));
            }
            orders.push(order);
        }

        Ok(orders)
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, name, price_cents, stock, owner_id, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn insert_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(quantity_to_db(product.id, product.stock)?)
        .bind(product.owner.as_uuid())
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn try_decrement_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome> {
        let db_quantity = quantity_to_db(product_id, quantity)?;

        // Single statement: the row lock taken by UPDATE makes the
        // `stock >= $2` check and the write indivisible.
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock - $2, updated_at = NOW()
            WHERE id = $1 AND stock >= $2
            RETURNING stock
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(db_quantity)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(DecrementOutcome::Applied {
                remaining: stock_from_db(remaining)?,
            });
        }

        let available: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        tracing::debug!(?available, quantity, "conditional decrement matched no row");
        match available {
            Some(available) => Ok(DecrementOutcome::Rejected {
                available: stock_from_db(available)?,
            }),
            None => Ok(DecrementOutcome::Missing),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn increment_stock(&self, product_id: ProductId, quantity: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(quantity_to_db(product_id, quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        self.load_cart(user_id).await
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product_id,
                quantity: 0,
            }
            .into());
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO carts (user_id, updated_at)
            VALUES ($1, NOW())
            ON CONFLICT (user_id) DO UPDATE SET updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO cart_lines (user_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, product_id) DO UPDATE SET
                quantity = cart_lines.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(quantity_to_db(product_id, quantity)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.load_cart(user_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("cart for {user_id} vanished after write")))
    }

    async fn remove_from_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Cart>> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE carts SET updated_at = NOW() WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1 AND product_id = $2")
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.load_cart(user_id).await
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for PostgresStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id(), lines = order.lines().len()))]
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_amount_cents, status, shipping_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.total_amount().cents())
        .bind(order.status().as_str())
        .bind(order.shipping_address())
        .bind(order.created_at())
        .execute(&mut *tx)
        .await?;

        for (line_no, line) in order.lines().iter().enumerate() {
            let line_no = i32::try_from(line_no)
                .map_err(|_| StoreError::Corrupt(format!("order {} has too many lines", order.id())))?;

            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, line_no, product_id, name, unit_price_cents, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(line_no)
            .bind(line.product_id.as_uuid())
            .bind(&line.name)
            .bind(line.unit_price.cents())
            .bind(quantity_to_db(line.product_id, line.quantity)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, total_amount_cents, status, shipping_address, created_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_orders(rows).await
    }

    async fn all_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, total_amount_cents, status, shipping_address, created_at
            FROM orders
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_orders(rows).await
    }
}

#[async_trait]
impl PrincipalDirectory for PostgresStore {
    async fn principal_for_token(&self, token: &str) -> Result<Option<Principal>> {
        let row: Option<PgRow> =
            sqlx::query("SELECT id, role, is_active FROM users WHERE api_token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => {
                let role: String = row.try_get("role")?;
                Ok(Some(Principal {
                    user_id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    role: role.parse::<Role>().map_err(StoreError::Corrupt)?,
                    is_active: row.try_get("is_active")?,
                }))
            }
            None => Ok(None),
        }
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Admin => "Admin",
    }
}

fn stock_from_db(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative quantity {value}")))
}

fn quantity_to_db(product_id: ProductId, quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| {
        StoreError::Invalid(DomainError::InvalidQuantity {
            product_id,
            quantity: i64::from(quantity),
        })
    })
}

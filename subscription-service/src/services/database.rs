//! PostgreSQL store for subscription-service.

use crate::models::{
    Bill, BillStatus, CreateBill, CreateProduct, CreateSubscription, CreateUser, Product,
    Subscription, SubscriptionStatus, User,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{
    BillRepository, ProductRepository, Store, SubscriptionRepository, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str =
    "subscription_id, user_id, product_id, start_date, next_billing_date, status, created_utc";

const BILL_COLUMNS: &str = "bill_id, subscription_id, amount, status, created_utc, paid_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Run a single-row `UPDATE subscriptions` and map "no row" to NotFound.
    async fn update_subscription_column<T>(
        &self,
        operation: &'static str,
        sql: &'static str,
        subscription_id: Uuid,
        value: T,
    ) -> Result<(), AppError>
    where
        T: for<'q> sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send + 'static,
    {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let result = sqlx::query(sql)
            .bind(subscription_id)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e)))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                subscription_id
            )));
        }

        Ok(())
    }
}

// =========================================================================
// User Operations
// =========================================================================

#[async_trait]
impl UserRepository for Database {
    #[instrument(skip(self, input))]
    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, name, email)
            VALUES ($1, $2, $3)
            RETURNING user_id, name, email, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Email {} already registered", input.email))
            }
            e => AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e)),
        })?;

        timer.observe_duration();
        info!(user_id = %user.user_id, "User created");

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, name, email, created_utc
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get user: {}", e)))?;

        timer.observe_duration();

        Ok(user)
    }
}

// =========================================================================
// Product Operations
// =========================================================================

#[async_trait]
impl ProductRepository for Database {
    #[instrument(skip(self, input))]
    async fn create_product(&self, input: &CreateProduct) -> Result<Product, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (product_id, name, description, price)
            VALUES ($1, $2, $3, $4)
            RETURNING product_id, name, description, price, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.price)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create product: {}", e)))?;

        timer.observe_duration();
        info!(product_id = %product.product_id, name = %product.name, "Product created");

        Ok(product)
    }

    #[instrument(skip(self))]
    async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_products"])
            .start_timer();

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, price, created_utc
            FROM products
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list products: {}", e)))?;

        timer.observe_duration();

        Ok(products)
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, price, created_utc
            FROM products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get product: {}", e)))?;

        timer.observe_duration();

        Ok(product)
    }
}

// =========================================================================
// Subscription Operations
// =========================================================================

#[async_trait]
impl SubscriptionRepository for Database {
    #[instrument(skip(self, input), fields(user_id = %input.user_id, product_id = %input.product_id))]
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, product_id, start_date, next_billing_date, status, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.product_id)
        .bind(input.start_date)
        .bind(input.next_billing_date)
        .bind(input.status.as_str())
        .bind(input.created_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e)))?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Subscription created");

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE subscription_id = $1
            "#
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    async fn get_active_subscription(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1 AND product_id = $2 AND status = 'active'
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get active subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(as_of = %as_of))]
    async fn subscriptions_due_by(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["subscriptions_due_by"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE status = 'active'
              AND next_billing_date <= $1
            "#
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find subscriptions due for billing: {}", e)))?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id, status = status.as_str()))]
    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AppError> {
        self.update_subscription_column(
            "update_subscription_status",
            "UPDATE subscriptions SET status = $2 WHERE subscription_id = $1",
            subscription_id,
            status.as_str(),
        )
        .await
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn update_subscription_start_date(
        &self,
        subscription_id: Uuid,
        start_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update_subscription_column(
            "update_subscription_start_date",
            "UPDATE subscriptions SET start_date = $2 WHERE subscription_id = $1",
            subscription_id,
            start_date,
        )
        .await
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn update_subscription_next_billing_date(
        &self,
        subscription_id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update_subscription_column(
            "update_subscription_next_billing_date",
            "UPDATE subscriptions SET next_billing_date = $2 WHERE subscription_id = $1",
            subscription_id,
            next_billing_date,
        )
        .await
    }
}

// =========================================================================
// Bill Operations
// =========================================================================

#[async_trait]
impl BillRepository for Database {
    #[instrument(skip(self, input), fields(subscription_id = %input.subscription_id))]
    async fn create_bill(&self, input: &CreateBill) -> Result<Bill, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_bill"])
            .start_timer();

        let bill = sqlx::query_as::<_, Bill>(&format!(
            r#"
            INSERT INTO bills (bill_id, subscription_id, amount, status, created_utc, paid_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {BILL_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.subscription_id)
        .bind(input.amount)
        .bind(input.status.as_str())
        .bind(input.created_utc)
        .bind(input.paid_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create bill: {}", e)))?;

        timer.observe_duration();
        info!(bill_id = %bill.bill_id, status = %bill.status, "Bill created");

        Ok(bill)
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bill"])
            .start_timer();

        let bill = sqlx::query_as::<_, Bill>(&format!(
            r#"
            SELECT {BILL_COLUMNS}
            FROM bills
            WHERE bill_id = $1
            "#
        ))
        .bind(bill_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bill: {}", e)))?;

        timer.observe_duration();

        Ok(bill)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["bills_for_user"])
            .start_timer();

        let bills = sqlx::query_as::<_, Bill>(
            r#"
            SELECT b.bill_id, b.subscription_id, b.amount, b.status, b.created_utc, b.paid_utc
            FROM bills b
            JOIN subscriptions s ON b.subscription_id = s.subscription_id
            WHERE s.user_id = $1
            ORDER BY b.created_utc
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list user bills: {}", e)))?;

        timer.observe_duration();

        Ok(bills)
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn mark_bill_paid(
        &self,
        bill_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Bill, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_bill_paid"])
            .start_timer();

        // Conditional on the current status so two concurrent payments cannot
        // both succeed.
        let bill = sqlx::query_as::<_, Bill>(&format!(
            r#"
            UPDATE bills
            SET status = $2, paid_utc = $3
            WHERE bill_id = $1 AND status = $4
            RETURNING {BILL_COLUMNS}
            "#
        ))
        .bind(bill_id)
        .bind(BillStatus::Paid.as_str())
        .bind(paid_at)
        .bind(BillStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark bill paid: {}", e)))?;

        timer.observe_duration();

        match bill {
            Some(bill) => {
                info!(bill_id = %bill.bill_id, "Bill marked paid");
                Ok(bill)
            }
            None => match self.get_bill(bill_id).await? {
                Some(_) => Err(AppError::Conflict(anyhow::anyhow!(
                    "Bill {} is already paid",
                    bill_id
                ))),
                None => Err(AppError::NotFound(anyhow::anyhow!("Bill {} not found", bill_id))),
            },
        }
    }
}

#[async_trait]
impl Store for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}

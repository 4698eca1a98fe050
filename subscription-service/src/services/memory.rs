//! In-memory store, for tests and local runs without PostgreSQL.

use crate::models::{
    Bill, BillStatus, CreateBill, CreateProduct, CreateSubscription, CreateUser, Product,
    Subscription, SubscriptionStatus, User,
};
use crate::services::repository::{
    BillRepository, ProductRepository, Store, SubscriptionRepository, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    products: HashMap<Uuid, Product>,
    subscriptions: HashMap<Uuid, Subscription>,
    bills: HashMap<Uuid, Bill>,
}

/// Store backed by process memory. Each operation is atomic on its own,
/// like a single SQL statement.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("In-memory store mutex poisoned: {}", e)))
    }

    /// Every bill stored for a subscription, oldest first.
    pub fn bills_for_subscription(&self, subscription_id: Uuid) -> Vec<Bill> {
        let Ok(tables) = self.tables() else {
            return Vec::new();
        };
        let mut bills: Vec<Bill> = tables
            .bills
            .values()
            .filter(|b| b.subscription_id == subscription_id)
            .cloned()
            .collect();
        bills.sort_by_key(|b| b.created_utc);
        bills
    }

    /// Number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables()
            .map(|t| t.users.len() + t.products.len() + t.subscriptions.len() + t.bills.len())
            .unwrap_or_default()
    }

    fn update_subscription(
        &self,
        subscription_id: Uuid,
        apply: impl FnOnce(&mut Subscription),
    ) -> Result<(), AppError> {
        let mut tables = self.tables()?;
        let subscription = tables.subscriptions.get_mut(&subscription_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Subscription {} not found", subscription_id))
        })?;
        apply(subscription);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let mut tables = self.tables()?;
        if tables.users.values().any(|u| u.email == input.email) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Email {} already registered",
                input.email
            )));
        }

        let user = User {
            user_id: Uuid::new_v4(),
            name: input.name.clone(),
            email: input.email.clone(),
            created_utc: Utc::now(),
        };
        tables.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.tables()?.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn create_product(&self, input: &CreateProduct) -> Result<Product, AppError> {
        let product = Product {
            product_id: Uuid::new_v4(),
            name: input.name.clone(),
            description: input.description.clone(),
            price: input.price,
            created_utc: Utc::now(),
        };
        self.tables()?
            .products
            .insert(product.product_id, product.clone());
        Ok(product)
    }

    async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        let mut products: Vec<Product> = self.tables()?.products.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        Ok(self.tables()?.products.get(&product_id).cloned())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        let subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            user_id: input.user_id,
            product_id: input.product_id,
            start_date: input.start_date,
            next_billing_date: input.next_billing_date,
            status: input.status.as_str().to_string(),
            created_utc: input.created_utc,
        };
        self.tables()?
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self.tables()?.subscriptions.get(&subscription_id).cloned())
    }

    async fn get_active_subscription(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self
            .tables()?
            .subscriptions
            .values()
            .find(|s| {
                s.user_id == user_id
                    && s.product_id == product_id
                    && s.status() == SubscriptionStatus::Active
            })
            .cloned())
    }

    async fn subscriptions_due_by(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        Ok(self
            .tables()?
            .subscriptions
            .values()
            .filter(|s| s.is_due(as_of))
            .cloned()
            .collect())
    }

    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AppError> {
        self.update_subscription(subscription_id, |s| {
            s.status = status.as_str().to_string()
        })
    }

    async fn update_subscription_start_date(
        &self,
        subscription_id: Uuid,
        start_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update_subscription(subscription_id, |s| s.start_date = start_date)
    }

    async fn update_subscription_next_billing_date(
        &self,
        subscription_id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update_subscription(subscription_id, |s| {
            s.next_billing_date = next_billing_date
        })
    }
}

#[async_trait]
impl BillRepository for InMemoryStore {
    async fn create_bill(&self, input: &CreateBill) -> Result<Bill, AppError> {
        let bill = Bill {
            bill_id: Uuid::new_v4(),
            subscription_id: input.subscription_id,
            amount: input.amount,
            status: input.status.as_str().to_string(),
            created_utc: input.created_utc,
            paid_utc: input.paid_utc,
        };
        self.tables()?.bills.insert(bill.bill_id, bill.clone());
        Ok(bill)
    }

    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
        Ok(self.tables()?.bills.get(&bill_id).cloned())
    }

    async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, AppError> {
        let tables = self.tables()?;
        let mut bills: Vec<Bill> = tables
            .bills
            .values()
            .filter(|b| {
                tables
                    .subscriptions
                    .get(&b.subscription_id)
                    .is_some_and(|s| s.user_id == user_id)
            })
            .cloned()
            .collect();
        bills.sort_by_key(|b| b.created_utc);
        Ok(bills)
    }

    async fn mark_bill_paid(
        &self,
        bill_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Bill, AppError> {
        let mut tables = self.tables()?;
        let bill = tables
            .bills
            .get_mut(&bill_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bill {} not found", bill_id)))?;

        if bill.is_paid() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Bill {} is already paid",
                bill_id
            )));
        }

        bill.status = BillStatus::Paid.as_str().to_string();
        bill.paid_utc = Some(paid_at);
        Ok(bill.clone())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.tables().map(|_| ())
    }
}

//! Store gateway: persistence operations grouped by entity.
//!
//! Reads return `Ok(None)` when the row is absent. Single-row updates return
//! `AppError::NotFound` when no row matched. Every other failure is a
//! dependency failure of the backing store.

use crate::models::{
    Bill, CreateBill, CreateProduct, CreateSubscription, CreateUser, Product, Subscription,
    SubscriptionStatus, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn create_product(&self, input: &CreateProduct) -> Result<Product, AppError>;

    async fn list_products(&self) -> Result<Vec<Product>, AppError>;

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError>;

    async fn get_subscription(&self, subscription_id: Uuid)
        -> Result<Option<Subscription>, AppError>;

    /// The `active` subscription of `user_id` to `product_id`, if any.
    async fn get_active_subscription(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;

    /// Active subscriptions whose next billing date is at or before `as_of`.
    async fn subscriptions_due_by(&self, as_of: DateTime<Utc>)
        -> Result<Vec<Subscription>, AppError>;

    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AppError>;

    async fn update_subscription_start_date(
        &self,
        subscription_id: Uuid,
        start_date: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn update_subscription_next_billing_date(
        &self,
        subscription_id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait BillRepository: Send + Sync {
    async fn create_bill(&self, input: &CreateBill) -> Result<Bill, AppError>;

    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError>;

    /// Every bill of every subscription owned by `user_id`, oldest first.
    async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, AppError>;

    /// Move a pending bill to `paid`.
    ///
    /// Fails with `AppError::Conflict` if the bill is already paid and
    /// `AppError::NotFound` if it does not exist.
    async fn mark_bill_paid(
        &self,
        bill_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Bill, AppError>;
}

/// Every capability the billing flow needs from one backing store.
#[async_trait]
pub trait Store:
    UserRepository + ProductRepository + SubscriptionRepository + BillRepository
{
    async fn health_check(&self) -> Result<(), AppError>;
}

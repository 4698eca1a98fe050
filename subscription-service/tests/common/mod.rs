//! Shared helpers for subscription-service integration tests.
//!
//! Everything runs against the in-memory store and lock with a manual
//! clock, so no PostgreSQL or Redis is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::observability::install_metrics_recorder;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subscription_service::billing::{
    BillingCycleEngine, BillingScheduler, DailySchedule, LockSettings, PaymentSettlement,
    SubscriptionManager,
};
use subscription_service::clock::{Clock, ManualClock};
use subscription_service::models::{
    Bill, CreateBill, CreateProduct, CreateSubscription, CreateUser, Product, Subscription,
    SubscriptionStatus, User,
};
use subscription_service::services::{
    init_metrics, BillRepository, DistributedLock, InMemoryLock, InMemoryStore,
    ProductRepository, Store, SubscriptionRepository, UserRepository,
};
use uuid::Uuid;

/// 2024-01-15 10:00:00 UTC, the instant every test starts at.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

pub fn price(units: i64, cents: u32) -> Decimal {
    Decimal::new(units * 100 + cents as i64, 2)
}

pub struct TestContext {
    pub memory: Arc<InMemoryStore>,
    pub store: Arc<dyn Store>,
    pub lock: Arc<InMemoryLock>,
    pub clock: ManualClock,
}

impl TestContext {
    pub fn new() -> Self {
        let memory = Arc::new(InMemoryStore::new());
        Self::with_store(memory.clone(), memory)
    }

    /// Context whose services go through `store`, while `memory` is the
    /// backing data the test inspects.
    pub fn with_store(memory: Arc<InMemoryStore>, store: Arc<dyn Store>) -> Self {
        init_metrics();
        install_metrics_recorder().unwrap();
        Self {
            memory,
            store,
            lock: Arc::new(InMemoryLock::new()),
            clock: ManualClock::new(base_time()),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    pub fn engine(&self) -> BillingCycleEngine {
        BillingCycleEngine::new(self.store.clone(), self.clock())
    }

    pub fn settlement(&self) -> PaymentSettlement {
        PaymentSettlement::new(self.store.clone(), self.clock())
    }

    pub fn subscriptions(&self) -> SubscriptionManager {
        SubscriptionManager::new(self.store.clone(), self.clock())
    }

    pub fn scheduler(&self, instance_id: &str) -> BillingScheduler {
        self.scheduler_with_lock(self.lock.clone(), instance_id)
    }

    pub fn scheduler_with_lock(
        &self,
        lock: Arc<dyn DistributedLock>,
        instance_id: &str,
    ) -> BillingScheduler {
        BillingScheduler::new(
            self.engine(),
            lock,
            self.clock(),
            LockSettings::default(),
            DailySchedule::default(),
            instance_id,
        )
    }

    pub async fn seed_user(&self, name: &str) -> User {
        self.memory
            .create_user(&CreateUser {
                name: name.to_string(),
                email: format!("{}-{}@example.com", name.to_lowercase(), Uuid::new_v4()),
            })
            .await
            .unwrap()
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> Product {
        self.memory
            .create_product(&CreateProduct {
                name: name.to_string(),
                description: None,
                price,
            })
            .await
            .unwrap()
    }

    /// An active subscription whose next billing date is `next_billing_date`,
    /// written straight to the store.
    pub async fn seed_subscription(
        &self,
        user: &User,
        product: &Product,
        next_billing_date: DateTime<Utc>,
    ) -> Subscription {
        self.memory
            .create_subscription(&CreateSubscription {
                user_id: user.user_id,
                product_id: product.product_id,
                start_date: base_time(),
                next_billing_date,
                status: SubscriptionStatus::Active,
                created_utc: base_time(),
            })
            .await
            .unwrap()
    }

    /// `count` subscriptions already due at `base_time()`.
    pub async fn seed_due_subscriptions(&self, count: usize, price: Decimal) -> Vec<Subscription> {
        let product = self.seed_product("Plan", price).await;
        let mut subscriptions = Vec::with_capacity(count);
        for i in 0..count {
            let user = self.seed_user(&format!("user{}", i)).await;
            subscriptions.push(self.seed_subscription(&user, &product, base_time()).await);
        }
        subscriptions
    }

    pub async fn subscription(&self, subscription_id: Uuid) -> Subscription {
        self.memory
            .get_subscription(subscription_id)
            .await
            .unwrap()
            .expect("subscription exists")
    }

    pub async fn bill(&self, bill_id: Uuid) -> Bill {
        self.memory
            .get_bill(bill_id)
            .await
            .unwrap()
            .expect("bill exists")
    }

    pub fn bills(&self, subscription_id: Uuid) -> Vec<Bill> {
        self.memory.bills_for_subscription(subscription_id)
    }
}

/// Store wrapper that injects failures and delays in front of an
/// [`InMemoryStore`].
pub struct FaultyStore {
    inner: Arc<InMemoryStore>,
    /// Bill creations allowed before every further one fails.
    bill_budget: AtomicUsize,
    fail_start_date_updates: AtomicBool,
    due_query_delay: Duration,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            bill_budget: AtomicUsize::new(usize::MAX),
            fail_start_date_updates: AtomicBool::new(false),
            due_query_delay: Duration::ZERO,
        }
    }

    pub fn failing_bills_after(self, successes: usize) -> Self {
        self.bill_budget.store(successes, Ordering::SeqCst);
        self
    }

    pub fn failing_start_date_updates(self) -> Self {
        self.fail_start_date_updates.store(true, Ordering::SeqCst);
        self
    }

    /// Slow down the due query so a cycle holds the lock for `delay`.
    pub fn with_due_query_delay(mut self, delay: Duration) -> Self {
        self.due_query_delay = delay;
        self
    }

    fn injected(operation: &str) -> AppError {
        AppError::DatabaseError(anyhow::anyhow!("injected failure in {}", operation))
    }
}

#[async_trait]
impl UserRepository for FaultyStore {
    async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        self.inner.create_user(input).await
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.inner.get_user(user_id).await
    }
}

#[async_trait]
impl ProductRepository for FaultyStore {
    async fn create_product(&self, input: &CreateProduct) -> Result<Product, AppError> {
        self.inner.create_product(input).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        self.inner.list_products().await
    }

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        self.inner.get_product(product_id).await
    }
}

#[async_trait]
impl SubscriptionRepository for FaultyStore {
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        self.inner.create_subscription(input).await
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        self.inner.get_subscription(subscription_id).await
    }

    async fn get_active_subscription(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        self.inner.get_active_subscription(user_id, product_id).await
    }

    async fn subscriptions_due_by(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        if !self.due_query_delay.is_zero() {
            tokio::time::sleep(self.due_query_delay).await;
        }
        self.inner.subscriptions_due_by(as_of).await
    }

    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AppError> {
        self.inner
            .update_subscription_status(subscription_id, status)
            .await
    }

    async fn update_subscription_start_date(
        &self,
        subscription_id: Uuid,
        start_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if self.fail_start_date_updates.load(Ordering::SeqCst) {
            return Err(Self::injected("update_subscription_start_date"));
        }
        self.inner
            .update_subscription_start_date(subscription_id, start_date)
            .await
    }

    async fn update_subscription_next_billing_date(
        &self,
        subscription_id: Uuid,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner
            .update_subscription_next_billing_date(subscription_id, next_billing_date)
            .await
    }
}

#[async_trait]
impl BillRepository for FaultyStore {
    async fn create_bill(&self, input: &CreateBill) -> Result<Bill, AppError> {
        let allowed = self
            .bill_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(Self::injected("create_bill"));
        }
        self.inner.create_bill(input).await
    }

    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
        self.inner.get_bill(bill_id).await
    }

    async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, AppError> {
        self.inner.bills_for_user(user_id).await
    }

    async fn mark_bill_paid(
        &self,
        bill_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Bill, AppError> {
        self.inner.mark_bill_paid(bill_id, paid_at).await
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }
}

/// Lock wrapper whose deletes always fail, as when the lock backend drops
/// the connection right after a cycle.
pub struct UndeletableLock {
    pub inner: Arc<InMemoryLock>,
    pub delete_calls: AtomicUsize,
}

impl UndeletableLock {
    pub fn new(inner: Arc<InMemoryLock>) -> Self {
        Self {
            inner,
            delete_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DistributedLock for UndeletableLock {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, _key: &str) -> Result<(), AppError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::ServiceUnavailable("lock backend unreachable".to_string()))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }
}

/// Lock whose backend is down: every call errors.
pub struct UnreachableLock {
    pub attempts: AtomicUsize,
}

impl UnreachableLock {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DistributedLock for UnreachableLock {
    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<bool, AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AppError::ServiceUnavailable("lock backend unreachable".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), AppError> {
        Err(AppError::ServiceUnavailable("lock backend unreachable".to_string()))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Err(AppError::ServiceUnavailable("lock backend unreachable".to_string()))
    }
}

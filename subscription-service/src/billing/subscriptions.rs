//! Subscription creation and lookup.

use crate::clock::Clock;
use crate::error::BillingError;
use crate::models::{
    add_billing_period, Bill, CreateBill, CreateSubscription, Subscription, SubscriptionStatus,
};
use crate::services::{
    record_bill_created, record_subscription_operation, BillRepository, ProductRepository,
    Store, SubscriptionRepository, UserRepository,
};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start a subscription and charge its first period up front.
    ///
    /// The subscription starts now and is next billed one period later. A
    /// paid bill for the product's current price is written alongside it.
    /// A user may hold at most one active subscription per product.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<(Subscription, Bill), BillingError> {
        if self
            .store
            .get_active_subscription(user_id, product_id)
            .await?
            .is_some()
        {
            warn!("Rejected duplicate active subscription");
            return Err(BillingError::DuplicateActiveSubscription {
                user_id,
                product_id,
            });
        }

        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::not_found("user", user_id))?;

        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| BillingError::not_found("product", product_id))?;

        let now = self.clock.now();
        let subscription = self
            .store
            .create_subscription(&CreateSubscription {
                user_id,
                product_id,
                start_date: now,
                next_billing_date: add_billing_period(now),
                status: SubscriptionStatus::Active,
                created_utc: now,
            })
            .await?;

        let bill = self
            .store
            .create_bill(&CreateBill::prepaid(
                subscription.subscription_id,
                product.price,
                now,
            ))
            .await?;

        record_subscription_operation("create");
        record_bill_created("signup", bill.amount.to_f64().unwrap_or_default());

        info!(
            subscription_id = %subscription.subscription_id,
            bill_id = %bill.bill_id,
            amount = %bill.amount,
            next_billing_date = %subscription.next_billing_date,
            "Subscription created with prepaid first bill"
        );

        Ok((subscription, bill))
    }

    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Subscription, BillingError> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))
    }
}

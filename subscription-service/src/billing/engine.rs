//! Billing cycle engine: turns due subscriptions into pending bills.

use crate::clock::Clock;
use crate::error::BillingError;
use crate::models::{Bill, CreateBill, Subscription, SubscriptionStatus};
use crate::services::{
    record_bill_created, record_error, BillRepository, ProductRepository, Store,
    SubscriptionRepository,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Result of a cycle that processed its whole due-set.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub as_of: DateTime<Utc>,
    /// Subscriptions selected as due.
    pub due: usize,
    /// Pending bills created, one per due subscription.
    pub bills: Vec<Bill>,
}

#[derive(Clone)]
pub struct BillingCycleEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl BillingCycleEngine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Bill every active subscription whose next billing date is at or
    /// before `as_of`.
    ///
    /// Subscriptions are processed one at a time. The first failure aborts
    /// the rest of the batch; subscriptions already processed keep their
    /// hold and their bill, and untouched ones stay active so the next run
    /// selects them again.
    #[instrument(skip(self), fields(as_of = %as_of))]
    pub async fn run_cycle(&self, as_of: DateTime<Utc>) -> Result<CycleReport, BillingError> {
        let due = self.store.subscriptions_due_by(as_of).await.map_err(|e| {
            record_error("store", "subscriptions_due_by");
            BillingError::from(e)
        })?;

        info!(due = due.len(), "Generating bills for due subscriptions");

        let mut bills = Vec::with_capacity(due.len());
        for (processed, subscription) in due.iter().enumerate() {
            match self.bill_subscription(subscription).await {
                Ok(bill) => bills.push(bill),
                Err(e) => {
                    record_error(e.kind_label(), "bill_subscription");
                    error!(
                        subscription_id = %subscription.subscription_id,
                        processed = processed,
                        due = due.len(),
                        error = %e,
                        "Billing cycle aborted"
                    );
                    return Err(BillingError::CycleAborted {
                        processed,
                        due: due.len(),
                        subscription_id: subscription.subscription_id,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(billed = bills.len(), "Billing cycle finished");

        Ok(CycleReport {
            as_of,
            due: due.len(),
            bills,
        })
    }

    /// Hold the subscription, then raise a pending bill at the product's
    /// current price.
    ///
    /// The hold is written first: if bill creation then fails, the
    /// subscription is out of the due-set and cannot be billed twice. It
    /// needs manual reconciliation instead.
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    async fn bill_subscription(&self, subscription: &Subscription) -> Result<Bill, BillingError> {
        self.store
            .update_subscription_status(subscription.subscription_id, SubscriptionStatus::Hold)
            .await?;

        let product = self
            .store
            .get_product(subscription.product_id)
            .await?
            .ok_or_else(|| BillingError::not_found("product", subscription.product_id))?;

        let bill = self
            .store
            .create_bill(&CreateBill::pending(
                subscription.subscription_id,
                product.price,
                self.clock.now(),
            ))
            .await?;

        record_bill_created("cycle", bill.amount.to_f64().unwrap_or_default());
        info!(
            bill_id = %bill.bill_id,
            amount = %bill.amount,
            "Subscription put on hold and billed"
        );

        Ok(bill)
    }
}

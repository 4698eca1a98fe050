//! Payment settlement: the only path from `hold` back to `active`.

use crate::clock::Clock;
use crate::error::BillingError;
use crate::models::{add_billing_period, Bill, SubscriptionStatus};
use crate::services::{
    record_error, record_settlement, BillRepository, Store, SubscriptionRepository,
    UserRepository,
};
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What a successful settlement changed.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledPayment {
    pub bill: Bill,
    pub subscription_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
}

/// Bill reads and settlement.
#[derive(Clone)]
pub struct PaymentSettlement {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl PaymentSettlement {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get_bill(&self, bill_id: Uuid) -> Result<Bill, BillingError> {
        self.store
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| BillingError::not_found("bill", bill_id))
    }

    /// All bills of a user's subscriptions. The user must exist.
    pub async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, BillingError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::not_found("user", user_id))?;

        Ok(self.store.bills_for_user(user_id).await?)
    }

    /// Mark a pending bill paid and reactivate its subscription for another
    /// period starting now.
    ///
    /// Rejected with `DuplicateActiveSubscription`, and nothing written, when
    /// another subscription of the same user and product is already active.
    ///
    /// Writes, in order: bill paid, start date, next billing date, status.
    /// They are not one transaction; the first failing write is returned
    /// and nothing is retried or compensated.
    #[instrument(skip(self), fields(bill_id = %bill_id))]
    pub async fn settle_payment(&self, bill_id: Uuid) -> Result<SettledPayment, BillingError> {
        let result = self.settle(bill_id).await;
        match &result {
            Ok(_) => record_settlement("settled"),
            Err(e) => record_settlement(e.kind_label()),
        }
        result
    }

    async fn settle(&self, bill_id: Uuid) -> Result<SettledPayment, BillingError> {
        let bill = self.get_bill(bill_id).await?;
        if bill.is_paid() {
            warn!(bill_id = %bill_id, "Rejected payment of already paid bill");
            return Err(BillingError::AlreadyPaid(bill_id));
        }
        self.ensure_active_slot_free(bill.subscription_id).await?;

        let now = self.clock.now();
        let bill = self
            .store
            .mark_bill_paid(bill_id, now)
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent payment of the same bill
                AppError::Conflict(_) => BillingError::AlreadyPaid(bill_id),
                e => BillingError::from(e),
            })?;

        let subscription_id = bill.subscription_id;
        let next_billing_date = add_billing_period(now);

        if let Err(e) = self
            .reactivate(subscription_id, now, next_billing_date)
            .await
        {
            record_error(e.kind_label(), "settle_payment");
            error!(
                bill_id = %bill_id,
                subscription_id = %subscription_id,
                error = %e,
                reconciliation_required = true,
                "Bill marked paid but subscription was not reactivated"
            );
            return Err(e);
        }

        info!(
            bill_id = %bill_id,
            subscription_id = %subscription_id,
            next_billing_date = %next_billing_date,
            "Payment settled, subscription reactivated"
        );

        Ok(SettledPayment {
            bill,
            subscription_id,
            start_date: now,
            next_billing_date,
        })
    }

    /// Reactivating must not leave two active subscriptions for the same
    /// user and product. Checked before any write.
    async fn ensure_active_slot_free(&self, subscription_id: Uuid) -> Result<(), BillingError> {
        let subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;

        let active = self
            .store
            .get_active_subscription(subscription.user_id, subscription.product_id)
            .await?;

        match active {
            Some(other) if other.subscription_id != subscription_id => {
                warn!(
                    subscription_id = %subscription_id,
                    active_subscription_id = %other.subscription_id,
                    "Rejected payment, another subscription for this product is active"
                );
                Err(BillingError::DuplicateActiveSubscription {
                    user_id: subscription.user_id,
                    product_id: subscription.product_id,
                })
            }
            _ => Ok(()),
        }
    }

    async fn reactivate(
        &self,
        subscription_id: Uuid,
        start_date: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.store
            .update_subscription_start_date(subscription_id, start_date)
            .await?;
        self.store
            .update_subscription_next_billing_date(subscription_id, next_billing_date)
            .await?;
        self.store
            .update_subscription_status(subscription_id, SubscriptionStatus::Active)
            .await?;
        Ok(())
    }
}

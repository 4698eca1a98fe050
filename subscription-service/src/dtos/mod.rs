use crate::billing::SettledPayment;
use crate::models::{Bill, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionCreatedResponse {
    pub subscription: Subscription,
    /// First period, already paid.
    pub initial_bill: Bill,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentSettledResponse {
    pub bill: Bill,
    pub subscription_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
}

impl From<SettledPayment> for PaymentSettledResponse {
    fn from(settled: SettledPayment) -> Self {
        Self {
            bill: settled.bill,
            subscription_id: settled.subscription_id,
            start_date: settled.start_date,
            next_billing_date: settled.next_billing_date,
        }
    }
}

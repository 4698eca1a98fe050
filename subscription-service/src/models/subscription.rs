//! Subscription model.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

/// Subscription status.
///
/// `Hold` takes a subscription out of the due-selection until its
/// outstanding bill is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Hold,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Hold => "hold",
        }
    }

    /// Unknown values read as `Hold` so a corrupted row is never billed.
    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "hold" => SubscriptionStatus::Hold,
            other => {
                warn!(status = other, "Unknown subscription status, treating as hold");
                SubscriptionStatus::Hold
            }
        }
    }
}

/// Subscription of one user to one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    /// Active and its billing date has arrived.
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.status() == SubscriptionStatus::Active && self.next_billing_date <= as_of
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub created_utc: DateTime<Utc>,
}

/// One billing period (a calendar month) after `from`.
///
/// Month-end dates clamp: Jan 31 + 1 month is the last day of February.
pub fn add_billing_period(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

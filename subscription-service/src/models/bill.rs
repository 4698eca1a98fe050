//! Bill model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

/// Bill status. A bill moves from `Pending` to `Paid` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Pending,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Paid => "paid",
        }
    }

    /// Unknown values read as `Paid` so a corrupted row is never payable.
    pub fn from_string(s: &str) -> Self {
        match s {
            "pending" => BillStatus::Pending,
            "paid" => BillStatus::Paid,
            other => {
                warn!(status = other, "Unknown bill status, treating as paid");
                BillStatus::Paid
            }
        }
    }
}

/// Charge for one billing period of a subscription.
///
/// `amount` is captured from the product price when the bill is created and
/// is never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Bill {
    pub bill_id: Uuid,
    pub subscription_id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub paid_utc: Option<DateTime<Utc>>,
}

impl Bill {
    pub fn status(&self) -> BillStatus {
        BillStatus::from_string(&self.status)
    }

    pub fn is_paid(&self) -> bool {
        self.status() == BillStatus::Paid
    }
}

/// Input for creating a bill.
#[derive(Debug, Clone)]
pub struct CreateBill {
    pub subscription_id: Uuid,
    pub amount: Decimal,
    pub status: BillStatus,
    pub created_utc: DateTime<Utc>,
    pub paid_utc: Option<DateTime<Utc>>,
}

impl CreateBill {
    /// First-period bill, settled at signup.
    pub fn prepaid(subscription_id: Uuid, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            subscription_id,
            amount,
            status: BillStatus::Paid,
            created_utc: now,
            paid_utc: Some(now),
        }
    }

    /// Bill raised by a billing cycle, awaiting payment.
    pub fn pending(subscription_id: Uuid, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            subscription_id,
            amount,
            status: BillStatus::Pending,
            created_utc: now,
            paid_utc: None,
        }
    }
}

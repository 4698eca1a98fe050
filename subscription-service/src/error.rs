//! Domain errors for the billing flow.

use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The entity does not exist. Never retried.
    NotFound,
    /// Duplicate active subscription or already-paid bill. Never retried.
    Conflict,
    /// The billing lock could not be taken within the retry budget.
    LockUnavailable,
    /// Store or lock backend failed.
    DependencyFailure,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("user {user_id} already has an active subscription for product {product_id}")]
    DuplicateActiveSubscription { user_id: Uuid, product_id: Uuid },

    #[error("bill {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("billing lock '{key}' unavailable after {attempts} attempts")]
    LockUnavailable { key: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] AppError),

    #[error(
        "billing cycle aborted at subscription {subscription_id} after {processed} of {due} processed: {source}"
    )]
    CycleAborted {
        processed: usize,
        due: usize,
        subscription_id: Uuid,
        #[source]
        source: Box<BillingError>,
    },
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        BillingError::NotFound { entity, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::NotFound { .. } => ErrorKind::NotFound,
            BillingError::DuplicateActiveSubscription { .. } | BillingError::AlreadyPaid(_) => {
                ErrorKind::Conflict
            }
            BillingError::LockUnavailable { .. } => ErrorKind::LockUnavailable,
            BillingError::Store(AppError::NotFound(_)) => ErrorKind::NotFound,
            BillingError::Store(AppError::Conflict(_)) => ErrorKind::Conflict,
            BillingError::Store(_) => ErrorKind::DependencyFailure,
            BillingError::CycleAborted { source, .. } => source.kind(),
        }
    }

    /// Label used for metrics.
    pub fn kind_label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::LockUnavailable => "lock_unavailable",
            ErrorKind::DependencyFailure => "dependency_failure",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Store(inner) => inner,
            BillingError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            BillingError::DuplicateActiveSubscription { .. } | BillingError::AlreadyPaid(_) => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            BillingError::LockUnavailable { .. } => AppError::ServiceUnavailable(err.to_string()),
            BillingError::CycleAborted { .. } => {
                AppError::InternalError(anyhow::anyhow!(err.to_string()))
            }
        }
    }
}

//! Billing flow: cycle engine, scheduler, settlement and subscription creation.

pub mod engine;
pub mod scheduler;
pub mod settlement;
pub mod subscriptions;

pub use engine::{BillingCycleEngine, CycleReport};
pub use scheduler::{BillingScheduler, CycleOutcome, DailySchedule, LockSettings};
pub use settlement::{PaymentSettlement, SettledPayment};
pub use subscriptions::SubscriptionManager;

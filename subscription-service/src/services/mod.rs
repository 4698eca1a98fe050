//! Services module for subscription-service.

pub mod database;
pub mod lock;
pub mod memory;
pub mod metrics;
pub mod repository;

pub use database::Database;
pub use lock::{DistributedLock, InMemoryLock, RedisLock};
pub use memory::InMemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_bill_created, record_billing_cycle,
    record_billing_cycle_duration, record_error, record_lock_acquisition,
    record_lock_release_failure, record_settlement, record_subscription_operation,
};
pub use repository::{
    BillRepository, ProductRepository, Store, SubscriptionRepository, UserRepository,
};

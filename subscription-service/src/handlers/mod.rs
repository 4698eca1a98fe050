//! HTTP handlers for subscription-service.

pub mod bills;
pub mod health;
pub mod products;
pub mod subscriptions;
pub mod users;

pub use bills::{get_bill, list_user_bills, pay_bill};
pub use health::{health_check, metrics_handler, readiness_check};
pub use products::{get_product, list_products};
pub use subscriptions::{create_subscription, get_subscription};
pub use users::{create_user, get_user};

//! Domain models for subscription-service.

mod bill;
mod product;
mod subscription;
mod user;

pub use bill::{Bill, BillStatus, CreateBill};
pub use product::{CreateProduct, Product};
pub use subscription::{add_billing_period, CreateSubscription, Subscription, SubscriptionStatus};
pub use user::{CreateUser, User};

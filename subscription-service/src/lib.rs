//! Subscription Service - recurring billing with a cluster-wide billing job.

pub mod billing;
pub mod clock;
pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::AppState;

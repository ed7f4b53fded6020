pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod state;
pub mod store;
pub mod watchdog;

//! TierKeeper library exports

pub mod cancel;
pub mod config;
pub mod error;
pub mod history;
pub mod models;
pub mod policy;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod store;

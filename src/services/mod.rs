//! Lifecycle engine components

pub mod archival;
pub mod backup;
pub mod compression;
pub mod monitor;
pub mod tiering;
pub mod views;

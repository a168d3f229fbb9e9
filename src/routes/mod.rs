//! HTTP API handlers

pub mod alerts;
pub mod backups;
pub mod health;
pub mod jobs;
pub mod policies;
pub mod views;

//! Compliance deadline scheduling and notification prioritization for business entities.

pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod notifications;
pub mod obligations;
pub mod repository;
pub mod telemetry;

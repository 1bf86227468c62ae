//! Shared types, configuration and error taxonomy for the notification and
//! reconciliation subsystem.

pub mod config;
pub mod db;
pub mod error;
pub mod types;

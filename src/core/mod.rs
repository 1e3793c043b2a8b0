//! # Core Module
//!
//! Configuration and error types shared by every feature.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Add typed service errors
//! - 1.0.0: Initial creation with config module

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{CeilingOutcome, Config, SchedulerSettings};
pub use error::{ServiceError, ServiceResult};

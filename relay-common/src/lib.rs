//! Relay Common - Shared configuration, errors, and logging for the DM relay.
//!
//! This crate provides:
//! - Configuration types, file loading, and environment overrides
//! - Configuration validation
//! - Error types and context helpers
//! - Logging setup and trace ID generation

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{Config, DiscordConfig, InferenceConfig, ObservabilityConfig, ProviderKind};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};

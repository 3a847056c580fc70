//! Core types and utilities for the OPC-UA plugin server
//!
//! # Modules
//!
//! - `config`: Environment loading and server parameters
//! - `error`: Error types and Result alias
//! - `ids`: Well-known namespace 0 identifiers
//! - `status`: OPC-UA status codes
//! - `types`: Node identifiers, names and values

pub mod config;
pub mod error;
pub mod ids;
pub mod status;
pub mod types;

// Re-exports
pub use config::{LogLevel, ServerParams};
pub use error::{Error, ErrorClass, Result};
pub use status::StatusCode;
pub use types::*;

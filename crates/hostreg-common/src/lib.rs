//! Shared utilities for the hostreg crates
//!
//! - [`logging`]: tracing subscriber initialization and error-chain formatting

pub mod logging;

pub use logging::{format_error, init, LogLevel, LogOptions, LoggingError};

//! # Turnos Common
//!
//! Shared plumbing for the Turnos admin worker crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Wall-clock abstraction for timestamps that tests can pin

pub mod clock;
pub mod logging;

pub use clock::{Clock, FixedClock, SystemClock};
pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};

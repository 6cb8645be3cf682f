//! Common utilities and types shared across Parley components.

#![warn(clippy::pedantic)]

/// Module for wall-clock helpers
pub mod clock;

/// Module for the envelope wire types exchanged on every transport
pub mod envelope;

/// Module for the relay service wire contract
pub mod relay;

/// Module for common data types
pub mod types;

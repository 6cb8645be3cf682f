//! Parley Relay Service Library
//!
//! The out-of-band leg of Parley's redundant transport fan-out: a small HTTP
//! service storing envelopes per target participant for pickup by polling.
//! Durable across fully disjoint devices and processes, unlike media-client
//! signaling or the in-process bus.
//!
//! Storage is deliberately short-lived and in-memory: at most 50 envelopes
//! per target, pruned past a retention horizon. Consistency between
//! participants comes from the coordinator's idempotent reconciliation
//! rules, not from this store - no participant ever holds a lock on it.
//!
//! # Modules
//!
//! - [`routes`] - the HTTP surface (submit, poll, health probes)
//! - [`store`] - the bounded per-target envelope store
//! - [`tasks`] - the retention prune task
//! - [`config`] - service configuration from environment

pub mod config;
pub mod routes;
pub mod store;
pub mod tasks;

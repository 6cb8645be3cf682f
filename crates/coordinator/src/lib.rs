//! Parley Presence & Pairing Coordinator
//!
//! This library tracks which participants are online in a channel, pairs two
//! idle participants into a two-party conversation, and keeps that decision
//! consistent across redundant, unordered delivery channels - without a
//! central authority. Any participant's device may independently believe it
//! is the source of truth; convergence comes from idempotent reconciliation,
//! not coordination.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorActor (one per participant process)
//! ├── owns the Reconciliation Engine
//! │   ├── Presence Registry (last-write-wins participant records)
//! │   ├── Conversation Table (canonical (low, high) pair records)
//! │   └── bounded dedup set (drops redundant deliveries)
//! ├── fans every outbound envelope to all transports
//! │   ├── Realtime adapter (media-client signaling)
//! │   ├── Relay adapter (HTTP push + poll, bounded retry/backoff)
//! │   └── Local broadcast adapter (in-process bus)
//! └── interval ticks: presence heartbeat + staleness sweep
//! ```
//!
//! # Key design decisions
//!
//! - **Redundant fan-out is the correctness mechanism**: every logical event
//!   goes out on every transport; receivers deduplicate by message id and
//!   converge by last-write-wins timestamps.
//! - **Canonical pairing**: a conversation's members are stored as
//!   `(min, max)`, so both sides compute an identical record without
//!   coordination.
//! - **One actor, one mutator**: adapter pumps, media events, local actions,
//!   and timers serialize through a single mailbox; the primary bug class
//!   this design prevents is concurrent uncoordinated mutation.
//! - **Effects, not callbacks**: the engine is a synchronous state machine
//!   returning explicit effects, so the distributed-systems properties are
//!   tested without any async machinery.
//!
//! # Modules
//!
//! - [`actors`] - the coordinator actor and its mailbox types
//! - [`engine`] - the reconciliation state machine
//! - [`registry`] / [`conversations`] - the two state tables
//! - [`pairing`] - candidate selection and pair establishment
//! - [`dedup`] - the bounded recently-seen set
//! - [`transport`] - the three adapters and fan-out
//! - [`media`] - collaborator seams (media client, recorder)
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types

pub mod actors;
pub mod config;
pub mod conversations;
pub mod dedup;
pub mod engine;
pub mod errors;
pub mod media;
pub mod pairing;
pub mod registry;
pub mod transport;

//! Actor model implementation.
//!
//! One coordinator actor per participant process; everything that mutates
//! presence or conversation state goes through its mailbox.

mod coordinator;
mod messages;
mod metrics;

pub use coordinator::{CoordinatorActor, CoordinatorActorHandle};
pub use messages::CoordinatorMessage;
pub use metrics::{CoordinatorMetrics, MetricsSnapshot};

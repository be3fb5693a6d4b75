//! Garbage collector: priority queue, eligibility policy and the
//! time-boxed collector run.

mod collector;
pub mod policy;
pub mod queue;

pub use collector::{GcLoopHandle, GcSummary};
pub use policy::{EligibilityPolicy, Ineligibility};
pub use queue::{damped_delay, GcQueue, QueueEntry};

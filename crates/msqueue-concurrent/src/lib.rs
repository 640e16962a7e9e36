//! Concurrent, lock-free queues for msqueue
//!
//! - `linked`: Unbounded lock-free MPMC linked queue (Michael-Scott, epoch reclamation)
//! - `bounded`: Capacity-limited wrapper that rejects pushes when full
//! - `wait`: Backoff, parking, deadline and cancellation for blocking pops
//! - `stats`: Advisory operation counters

pub mod bounded;
pub mod linked;
pub mod stats;
pub mod wait;

pub use bounded::{BoundedQueue, PushError};
pub use linked::{Drain, LinkedQueue};
pub use msqueue_core::{QueueError, Result, WaitConfig, WaitStrategy};
pub use stats::QueueStats;
pub use tokio_util::sync::CancellationToken;
pub use wait::WaitOptions;

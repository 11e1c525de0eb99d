//! Host-side synchronization.
//!
//! # Responsibility
//! - Compute published statistics straight from the Shared Store.
//! - Run sync passes and fan changes out to the side-channel, the
//!   extension, the wearable and in-process subscribers.
//! - Host the coordinator on its own coordination thread.

pub mod bus;
pub mod coordinator;
pub mod runtime;
pub mod schedule;
pub mod stats;

pub use bus::{EventSource, SyncBus, SyncNotification};
pub use coordinator::{SyncCoordinator, SyncPhase, SyncReport, SyncTrigger};
pub use runtime::{HostHandle, HostRuntime, RuntimeError};

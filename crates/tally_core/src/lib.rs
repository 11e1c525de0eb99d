//! Core of the Tally habit tracker: local-first storage and multi-process
//! synchronization between the host app, its glanceable extension and the
//! companion wearable.
//! This crate is the single source of truth for sync and storage invariants.

pub mod calendar;
pub mod clock;
pub mod config;
pub mod db;
pub mod extension;
pub mod logging;
pub mod model;
pub mod provision;
pub mod queue;
pub mod refresh;
pub mod repo;
pub mod service;
pub mod side_channel;
pub mod sync;
pub mod wearable;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, TallyConfig};
pub use extension::ExtensionClient;
pub use logging::{default_log_level, init_logging, logging_status, ProcessRole};
pub use model::event::{EventId, EventValidationError, LoggedEvent};
pub use model::intent::PendingWriteIntent;
pub use model::snapshot::{EventSummary, PeriodStats, SyncSnapshot};
pub use model::tag::{Tag, TagId};
pub use provision::{
    ProvisionError, ProvisionedStore, ProvisioningState, StoreProvisioner, StoreTier,
};
pub use queue::{DrainOutcome, PendingWriteQueue, QueueError};
pub use repo::{RepoError, RepoResult};
pub use service::event_service::EventService;
pub use side_channel::{SideChannel, SideChannelError};
pub use sync::{
    EventSource, HostHandle, HostRuntime, RuntimeError, SyncBus, SyncCoordinator,
    SyncNotification, SyncPhase, SyncReport, SyncTrigger,
};
pub use wearable::{
    ChannelError, ChannelState, MemoryTransport, WearableChannel, WearableTransport, WireMessage,
    WireReply,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

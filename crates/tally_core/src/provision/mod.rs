//! Shared Store provisioning.
//!
//! # Responsibility
//! - Pick where the Shared Store lives: shared location, private location
//!   (shared-journal then local-only journal), and finally memory.
//! - Verify integrity right after opening and repair damaged stores.
//! - Run the one-time legacy import on the opened store.
//!
//! # Invariants
//! - `provision` always returns a usable store unless even the in-memory
//!   store cannot be created.
//! - `locked` probes are retried and never repaired.
//! - The in-memory tier is logged as critical since nothing it stores
//!   survives the process.

pub mod legacy;
pub mod probe;
pub mod repair;

use crate::clock::Clock;
use crate::config::TallyConfig;
use crate::db::{open_db, open_db_in_memory, DbError, JournalProfile, STORE_FILE_NAME};
use crate::side_channel::{SideChannel, SideChannelError};
use legacy::{migrate_legacy_store, MigrationOutcome};
use log::{error, info, warn};
use probe::{classify_db_error, probe_store, FailureClass, ProbeFailure};
use repair::{repair_store, RepairOutcome};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which rung of the ladder produced the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTier {
    Shared,
    Local,
    LocalOnly,
    Memory,
}

impl StoreTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Local => "local",
            Self::LocalOnly => "local_only",
            Self::Memory => "memory",
        }
    }

    /// Whether other processes of the family can see this store.
    pub fn is_shared(self) -> bool {
        self == Self::Shared
    }
}

/// Diagnostics describing how the store was provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningState {
    pub tier: StoreTier,
    pub path: Option<PathBuf>,
    pub repair: Option<RepairOutcome>,
    pub migration: MigrationOutcome,
    /// `locked` probes that were retried before the store was accepted.
    pub probe_retries: u32,
}

pub struct ProvisionedStore {
    pub conn: Connection,
    pub state: ProvisioningState,
}

#[derive(Debug)]
pub enum ProvisionError {
    /// Not even an in-memory store could be created.
    Fatal(DbError),
    /// Not even an in-memory side-channel could be created.
    SideChannel(SideChannelError),
}

impl Display for ProvisionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal(err) => write!(f, "no store could be provisioned: {err}"),
            Self::SideChannel(err) => write!(f, "no side-channel could be opened: {err}"),
        }
    }
}

impl Error for ProvisionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fatal(err) => Some(err),
            Self::SideChannel(err) => Some(err),
        }
    }
}

/// Why one ladder rung was skipped.
#[derive(Debug)]
enum TierFailure {
    Open(DbError),
    Probe(ProbeFailure),
}

impl Display for TierFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(err) => write!(f, "{err}"),
            Self::Probe(failure) => write!(f, "{failure}"),
        }
    }
}

impl From<DbError> for TierFailure {
    fn from(value: DbError) -> Self {
        Self::Open(value)
    }
}

struct Opened {
    conn: Connection,
    repair: Option<RepairOutcome>,
    probe_retries: u32,
}

/// One-shot provisioner; consumed by [`StoreProvisioner::provision`].
pub struct StoreProvisioner<'a> {
    config: &'a TallyConfig,
    side_channel: &'a SideChannel,
    clock: &'a dyn Clock,
}

impl<'a> StoreProvisioner<'a> {
    pub fn new(
        config: &'a TallyConfig,
        side_channel: &'a SideChannel,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            side_channel,
            clock,
        }
    }

    /// Walks the fallback ladder and returns the first usable store.
    ///
    /// # Errors
    /// - [`ProvisionError::Fatal`] when the in-memory store fails too.
    pub fn provision(self) -> Result<ProvisionedStore, ProvisionError> {
        if let Some(shared_dir) = self.config.resolve_shared_dir() {
            if let Some(store) =
                self.try_tier(StoreTier::Shared, &shared_dir, JournalProfile::Shared)
            {
                return Ok(store);
            }
        } else {
            warn!(
                "event=store_provision module=provision status=degraded tier=shared \
                 reason=location_unavailable"
            );
        }

        match std::fs::create_dir_all(&self.config.local_dir) {
            Ok(()) => {
                let local_dir = self.config.local_dir.clone();
                if let Some(store) =
                    self.try_tier(StoreTier::Local, &local_dir, JournalProfile::Shared)
                {
                    return Ok(store);
                }
                if let Some(store) =
                    self.try_tier(StoreTier::LocalOnly, &local_dir, JournalProfile::LocalOnly)
                {
                    return Ok(store);
                }
            }
            Err(err) => warn!(
                "event=store_provision module=provision status=degraded tier=local error={err}"
            ),
        }

        let conn = open_db_in_memory().map_err(|err| {
            error!("event=store_provision module=provision status=fatal error={err}");
            ProvisionError::Fatal(err)
        })?;
        error!(
            "event=store_provision module=provision status=critical tier=memory \
             reason=no_persistent_location"
        );
        Ok(ProvisionedStore {
            conn,
            state: ProvisioningState {
                tier: StoreTier::Memory,
                path: None,
                repair: None,
                migration: MigrationOutcome::NotApplicable,
                probe_retries: 0,
            },
        })
    }

    fn try_tier(
        &self,
        tier: StoreTier,
        dir: &Path,
        profile: JournalProfile,
    ) -> Option<ProvisionedStore> {
        let path = dir.join(STORE_FILE_NAME);
        let mut opened = match self.open_verified(&path, profile) {
            Ok(opened) => opened,
            Err(err) => {
                warn!(
                    "event=store_provision module=provision status=degraded tier={} error={err}",
                    tier.as_str()
                );
                return None;
            }
        };

        let migration = migrate_legacy_store(&mut opened.conn, dir, self.side_channel);
        info!(
            "event=store_provision module=provision status=ok tier={} repaired={} probe_retries={}",
            tier.as_str(),
            opened.repair.is_some(),
            opened.probe_retries
        );
        Some(ProvisionedStore {
            conn: opened.conn,
            state: ProvisioningState {
                tier,
                path: Some(path),
                repair: opened.repair,
                migration,
                probe_retries: opened.probe_retries,
            },
        })
    }

    fn open_verified(&self, path: &Path, profile: JournalProfile) -> Result<Opened, TierFailure> {
        let conn = match open_db(path, profile) {
            Ok(conn) => conn,
            Err(err) if classify_db_error(&err).needs_repair() => {
                error!("event=store_integrity module=provision status=unopenable error={err}");
                return self.repair(None, path, profile, 0);
            }
            Err(err) => return Err(err.into()),
        };

        let mut retries = 0;
        loop {
            match probe_store(&conn) {
                Ok(()) => {
                    return Ok(Opened {
                        conn,
                        repair: None,
                        probe_retries: retries,
                    })
                }
                Err(failure) if failure.class == FailureClass::Locked => {
                    if retries >= self.config.probe_retry_limit {
                        warn!(
                            "event=store_integrity module=provision status=locked_accepted \
                             retries={retries}"
                        );
                        return Ok(Opened {
                            conn,
                            repair: None,
                            probe_retries: retries,
                        });
                    }
                    retries += 1;
                    std::thread::sleep(Duration::from_millis(self.config.probe_retry_backoff_ms));
                }
                Err(failure) if failure.class.needs_repair() => {
                    error!("event=store_integrity module=provision status=failed error={failure}");
                    return self.repair(Some(conn), path, profile, retries);
                }
                Err(failure) => {
                    warn!(
                        "event=store_integrity module=provision status=unavailable error={failure}"
                    );
                    return Err(TierFailure::Probe(failure));
                }
            }
        }
    }

    fn repair(
        &self,
        damaged: Option<Connection>,
        path: &Path,
        profile: JournalProfile,
        probe_retries: u32,
    ) -> Result<Opened, TierFailure> {
        let (conn, outcome) =
            repair_store(damaged, path, profile, self.side_channel, self.clock.now_ms())?;
        Ok(Opened {
            conn,
            repair: Some(outcome),
            probe_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreProvisioner, StoreTier};
    use crate::clock::ManualClock;
    use crate::config::TallyConfig;
    use crate::provision::legacy::MigrationOutcome;
    use crate::side_channel::SideChannel;

    #[test]
    fn shared_location_wins_when_available() {
        let shared = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let config = TallyConfig::with_dirs(Some(shared.path().to_path_buf()), local.path());
        let side = SideChannel::open_in_memory().unwrap();
        let clock = ManualClock::new(0);

        let store = StoreProvisioner::new(&config, &side, &clock).provision().unwrap();
        assert_eq!(store.state.tier, StoreTier::Shared);
        assert!(store.state.repair.is_none());
        assert_eq!(store.state.migration, MigrationOutcome::NothingToMigrate);
    }

    #[test]
    fn missing_shared_location_falls_back_to_local() {
        let local = tempfile::tempdir().unwrap();
        let config = TallyConfig::with_dirs(None, local.path());
        let side = SideChannel::open_in_memory().unwrap();
        let clock = ManualClock::new(0);

        let store = StoreProvisioner::new(&config, &side, &clock).provision().unwrap();
        assert_eq!(store.state.tier, StoreTier::Local);
        assert!(!store.state.tier.is_shared());
    }
}

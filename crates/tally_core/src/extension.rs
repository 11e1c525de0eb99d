//! Glanceable-extension role.
//!
//! # Responsibility
//! - Log events without opening the Shared Store: append an intent to the
//!   pending-write queue and countersign the side-channel so glanceable
//!   values update before the host drains.
//! - Read the published snapshot and today's per-day list.
//!
//! # Invariants
//! - Never opens the Shared Store.
//! - Every logged event advances the watermark to at least its own
//!   timestamp, which is how the host notices the write.

use crate::calendar;
use crate::clock::Clock;
use crate::config::TallyConfig;
use crate::model::intent::PendingWriteIntent;
use crate::model::snapshot::{EventSummary, SyncSnapshot};
use crate::queue::{PendingWriteQueue, QueueError};
use crate::side_channel::{keys, SideChannel, SideChannelResult};
use log::{info, warn};
use std::sync::Arc;

pub struct ExtensionClient {
    side_channel: SideChannel,
    clock: Arc<dyn Clock>,
}

impl ExtensionClient {
    pub fn new(side_channel: SideChannel, clock: Arc<dyn Clock>) -> Self {
        Self {
            side_channel,
            clock,
        }
    }

    /// Opens the side-channel through its fallback ladder.
    pub fn open(config: &TallyConfig, clock: Arc<dyn Clock>) -> SideChannelResult<Self> {
        Ok(Self::new(SideChannel::open_with_fallback(config)?, clock))
    }

    pub fn side_channel(&self) -> &SideChannel {
        &self.side_channel
    }

    /// Queues one event for the host and countersigns the side-channel.
    ///
    /// Countersign failures are logged only; the queued intent is what
    /// matters and the next host pass rewrites every derived value.
    pub fn log_event(
        &self,
        timestamp_ms: i64,
        note: impl Into<String>,
    ) -> Result<PendingWriteIntent, QueueError> {
        let intent = PendingWriteIntent::new(timestamp_ms, note);
        let pending = PendingWriteQueue::new(&self.side_channel).enqueue(intent.clone())?;
        if let Err(err) = self.countersign(&intent) {
            warn!("event=extension_countersign module=extension status=error error={err}");
        }
        info!("event=extension_log_event module=extension status=ok pending={pending}");
        Ok(intent)
    }

    pub fn snapshot(&self) -> SideChannelResult<SyncSnapshot> {
        self.side_channel.read_snapshot()
    }

    /// Today's events as last published, plus what this process queued since.
    pub fn today_events(&self) -> SideChannelResult<Vec<EventSummary>> {
        let today = calendar::local_date(self.clock.now_ms());
        self.side_channel.read_day_events(today)
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        PendingWriteQueue::new(&self.side_channel).len()
    }

    /// Bumped by the host every time it asks the extension to redraw.
    pub fn refresh_generation(&self) -> SideChannelResult<u64> {
        Ok(self
            .side_channel
            .get::<u64>(keys::EXTENSION_REFRESH_GENERATION)?
            .unwrap_or(0))
    }

    fn countersign(&self, intent: &PendingWriteIntent) -> SideChannelResult<()> {
        let now = self.clock.now_ms();
        let event_day = calendar::local_date(intent.timestamp_ms);
        if event_day == calendar::local_date(now) {
            self.side_channel
                .update::<u32, (), _>(keys::TODAY_COUNT, |count| {
                    (Some(count.unwrap_or(0).saturating_add(1)), ())
                })?;
        }
        self.side_channel
            .update::<i64, (), _>(keys::LAST_EVENT_AT_MS, |last| {
                let next = last.map_or(intent.timestamp_ms, |value| value.max(intent.timestamp_ms));
                (Some(next), ())
            })?;

        let summary = EventSummary::from(&intent.to_event());
        self.side_channel.update::<Vec<EventSummary>, (), _>(
            &keys::events_by_day(event_day),
            |list| {
                let mut list = list.unwrap_or_default();
                if !list.iter().any(|existing| existing.id == summary.id) {
                    list.push(summary);
                    list.sort_by_key(|event| event.timestamp);
                }
                (Some(list), ())
            },
        )?;

        self.side_channel
            .advance_watermark(now.max(intent.timestamp_ms))?;
        Ok(())
    }
}

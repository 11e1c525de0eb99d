//! Host-side sync coordinator.
//!
//! # Responsibility
//! - Decide when to reconcile and what to publish.
//! - Run sync passes: drain queue, recompute snapshot from the store,
//!   publish it to the side-channel, refresh the extension, mirror to the
//!   wearable.
//! - Answer wearable requests and handle its session callbacks.
//!
//! # Invariants
//! - Phase is `Idle -> Syncing -> Idle`; a pass always ends in `Idle`.
//! - A trigger raised while a pass was running is ignored.
//! - Failures inside a pass are logged and reported, never propagated;
//!   the next trigger retries.
//! - Every pass that mutates the store advances the watermark to at least
//!   the pass time.
//! - Passes for host-logged events publish no in-process snapshot.

use super::bus::{EventSource, SyncBus, SyncNotification};
use super::stats::{compute_period_stats, compute_snapshot, today_events};
use crate::calendar;
use crate::clock::Clock;
use crate::config::TallyConfig;
use crate::model::event::{EventId, LoggedEvent};
use crate::model::snapshot::{EventSummary, SyncSnapshot};
use crate::model::tag::TagId;
use crate::provision::{
    ProvisionError, ProvisionedStore, ProvisioningState, StoreProvisioner,
};
use crate::queue::{DrainOutcome, PendingWriteQueue};
use crate::refresh::{LoggingRefreshTrigger, RefreshTrigger};
use crate::repo::RepoResult;
use crate::service::event_service::EventService;
use crate::side_channel::{keys, SideChannel};
use crate::wearable::{WearableChannel, WearableTransport, WireMessage, WireReply};
use chrono::Days;
use log::{debug, info, warn};
use rusqlite::Connection;
use std::sync::Arc;

/// Days of per-day event lists kept in the side-channel.
const DAY_LIST_RETENTION_DAYS: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Periodic timer while foregrounded.
    Tick,
    /// Host moved to foreground.
    Foreground,
    /// An event was logged by one of the processes.
    EventAdded(EventSource),
    /// Host-side edit other than an add (delete, re-tag).
    HostEdit,
    /// Another process advanced the side-channel watermark.
    WatermarkAdvanced,
}

impl SyncTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Foreground => "foreground",
            Self::EventAdded(EventSource::Host) => "event_added_host",
            Self::EventAdded(EventSource::Extension) => "event_added_extension",
            Self::EventAdded(EventSource::Wearable) => "event_added_wearable",
            Self::HostEdit => "host_edit",
            Self::WatermarkAdvanced => "watermark_advanced",
        }
    }
}

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub drain: DrainOutcome,
    /// Published snapshot, with the watermark actually stored.
    pub snapshot: Option<SyncSnapshot>,
    pub refreshed: bool,
    pub pushed: bool,
    pub failures: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct SyncCoordinator {
    conn: Connection,
    side_channel: SideChannel,
    config: TallyConfig,
    clock: Arc<dyn Clock>,
    bus: SyncBus,
    wearable: Option<WearableChannel>,
    refresh: Box<dyn RefreshTrigger>,
    provisioning: ProvisioningState,
    phase: SyncPhase,
    last_seen_watermark: i64,
    last_pass_window: Option<(i64, i64)>,
}

impl SyncCoordinator {
    pub fn new(
        store: ProvisionedStore,
        side_channel: SideChannel,
        config: TallyConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_seen_watermark = side_channel.watermark().unwrap_or(0);
        Self {
            conn: store.conn,
            side_channel,
            config,
            clock,
            bus: SyncBus::new(),
            wearable: None,
            refresh: Box::new(LoggingRefreshTrigger),
            provisioning: store.state,
            phase: SyncPhase::Idle,
            last_seen_watermark,
            last_pass_window: None,
        }
    }

    /// Opens the side-channel and provisions the store for `config`.
    ///
    /// # Errors
    /// - Only when neither a side-channel nor a store could be created,
    ///   not even in memory.
    pub fn bootstrap(config: TallyConfig, clock: Arc<dyn Clock>) -> Result<Self, ProvisionError> {
        let side_channel =
            SideChannel::open_with_fallback(&config).map_err(ProvisionError::SideChannel)?;
        let store = StoreProvisioner::new(&config, &side_channel, clock.as_ref())
            .provision()?;
        Ok(Self::new(store, side_channel, config, clock))
    }

    pub fn with_wearable(mut self, transport: Box<dyn WearableTransport>) -> Self {
        self.wearable = Some(WearableChannel::new(transport));
        self
    }

    pub fn with_refresh_trigger(mut self, trigger: Box<dyn RefreshTrigger>) -> Self {
        self.refresh = trigger;
        self
    }

    pub fn with_bus(mut self, bus: SyncBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    pub fn config(&self) -> &TallyConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn provisioning(&self) -> &ProvisioningState {
        &self.provisioning
    }

    pub fn side_channel(&self) -> &SideChannel {
        &self.side_channel
    }

    pub fn wearable(&self) -> Option<&WearableChannel> {
        self.wearable.as_ref()
    }

    pub fn last_seen_watermark(&self) -> i64 {
        self.last_seen_watermark
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Read-only and tag use-cases on the host's store connection.
    pub fn events(&self) -> EventService<'_> {
        EventService::new(&self.conn)
    }

    /// Runs one pass for `trigger` unless it was raised while a pass ran.
    ///
    /// Returns `None` when the trigger was ignored.
    pub fn handle_trigger(
        &mut self,
        trigger: SyncTrigger,
        raised_at_ms: i64,
    ) -> Option<SyncReport> {
        if self.phase == SyncPhase::Syncing || self.raised_during_last_pass(raised_at_ms) {
            debug!(
                "event=sync_trigger module=sync status=skipped trigger={} reason=reentrant",
                trigger.as_str()
            );
            return None;
        }

        let report = self.run_pass(trigger);

        match trigger {
            SyncTrigger::EventAdded(source @ (EventSource::Extension | EventSource::Wearable)) => {
                self.bus.publish(SyncNotification::EventsChanged { source });
            }
            SyncTrigger::WatermarkAdvanced => {
                let watermark_ms = report
                    .snapshot
                    .as_ref()
                    .map_or(self.last_seen_watermark, |snapshot| snapshot.watermark_ms);
                self.bus.publish(SyncNotification::ExternalChange { watermark_ms });
            }
            _ => {}
        }
        if trigger != SyncTrigger::EventAdded(EventSource::Host) {
            if let Some(snapshot) = &report.snapshot {
                self.bus.publish(SyncNotification::SnapshotPublished(snapshot.clone()));
            }
        }
        Some(report)
    }

    /// Runs a pass for `trigger` raised now.
    pub fn trigger_now(&mut self, trigger: SyncTrigger) -> Option<SyncReport> {
        let now = self.clock.now_ms();
        self.handle_trigger(trigger, now)
    }

    /// Newer watermark written by another process, if any.
    pub fn observe_external_change(&self) -> Option<i64> {
        match self.side_channel.watermark() {
            Ok(watermark) if watermark > self.last_seen_watermark => Some(watermark),
            Ok(_) => None,
            Err(err) => {
                warn!("event=watermark_observe module=sync status=error error={err}");
                None
            }
        }
    }

    /// Logs a host-originated event, mirrors it to the wearable and runs a
    /// pass.
    pub fn add_host_event(
        &mut self,
        timestamp_ms: i64,
        note: &str,
        tag_ids: &[TagId],
    ) -> RepoResult<LoggedEvent> {
        let event = self.events().add_event(timestamp_ms, note, tag_ids)?;
        self.push_to_wearable(&WireMessage::from(&EventSummary::from(&event)));
        self.trigger_now(SyncTrigger::EventAdded(EventSource::Host));
        Ok(event)
    }

    pub fn delete_host_event(&mut self, id: EventId) -> RepoResult<()> {
        self.events().delete_event(id)?;
        self.trigger_now(SyncTrigger::HostEdit);
        Ok(())
    }

    pub fn retag_host_event(&mut self, id: EventId, tag_ids: &[TagId]) -> RepoResult<LoggedEvent> {
        let event = self.events().set_event_tags(id, tag_ids)?;
        self.trigger_now(SyncTrigger::HostEdit);
        Ok(event)
    }

    /// Answers one decoded wearable request.
    pub fn handle_wearable_request(&mut self, message: WireMessage) -> WireReply {
        let action = message.action();
        let now = self.clock.now_ms();
        let reply = match message {
            WireMessage::AddEvent { timestamp, note } => {
                let added = self.events().add_event(timestamp, note, &[]);
                match added {
                    Ok(event) => {
                        self.handle_trigger(SyncTrigger::EventAdded(EventSource::Wearable), now);
                        WireReply::added(event.id)
                    }
                    Err(err) => WireReply::failure(err.to_string()),
                }
            }
            WireMessage::RequestSync => match today_events(&self.conn, now) {
                Ok(events) => WireReply::events(events.iter().map(EventSummary::from).collect()),
                Err(err) => WireReply::failure(err.to_string()),
            },
            WireMessage::GetStats => match compute_period_stats(&self.conn, now) {
                Ok(stats) => WireReply::stats(stats),
                Err(err) => WireReply::failure(err.to_string()),
            },
            WireMessage::EventAdded { .. } | WireMessage::FullSync { .. } => {
                WireReply::failure(format!("unsupported request action `{action}`"))
            }
        };
        info!(
            "event=wearable_request module=sync status={} action={action}",
            if reply.success { "ok" } else { "error" }
        );
        reply
    }

    /// Decodes, answers and encodes one raw wearable request.
    pub fn handle_wearable_payload(&mut self, payload: &str) -> String {
        let reply = match WireMessage::from_json(payload) {
            Ok(message) => self.handle_wearable_request(message),
            Err(err) => {
                warn!("event=wearable_request module=sync status=error reason=decode error={err}");
                WireReply::failure(format!("malformed request: {err}"))
            }
        };
        reply.to_json()
    }

    /// Asks the extension to redraw one snapshot kind without running a pass.
    pub fn refresh_extension_kind(&mut self, kind: &str) {
        self.refresh.reload_kind(kind);
        self.bump_refresh_generation(kind);
    }

    /// Starts the wearable session if one is configured.
    pub fn activate_wearable(&mut self) {
        if let Some(channel) = self.wearable.as_mut() {
            if let Err(err) = channel.activate() {
                debug!("event=wearable_activate module=sync status=deferred error={err}");
            }
        }
    }

    pub fn on_wearable_activated(&mut self, reachable: bool) {
        let catch_up = self
            .wearable
            .as_mut()
            .is_some_and(|channel| channel.on_activation_complete(reachable));
        if catch_up {
            self.push_catch_up();
        }
    }

    pub fn on_wearable_reachability(&mut self, reachable: bool) {
        let catch_up = self
            .wearable
            .as_mut()
            .is_some_and(|channel| channel.on_reachability_changed(reachable));
        if catch_up {
            self.push_catch_up();
        }
    }

    fn raised_during_last_pass(&self, raised_at_ms: i64) -> bool {
        self.last_pass_window
            .is_some_and(|(start, end)| raised_at_ms >= start && raised_at_ms < end)
    }

    fn run_pass(&mut self, trigger: SyncTrigger) -> SyncReport {
        self.phase = SyncPhase::Syncing;
        let started_at = self.clock.now_ms();
        info!(
            "event=sync_pass module=sync status=start trigger={}",
            trigger.as_str()
        );
        let mut report = SyncReport::default();
        // Anything written before this point is covered by the pass.
        let observed = self.side_channel.watermark().unwrap_or(0);

        let drained =
            PendingWriteQueue::new(&self.side_channel).drain_and_apply(&mut self.conn, started_at);
        match drained {
            Ok(outcome) => report.drain = outcome,
            Err(err) => report.failures.push(format!("drain: {err}")),
        }

        let today = today_events(&self.conn, started_at);
        match compute_snapshot(&self.conn, started_at, self.config.average_window_days) {
            Ok(mut snapshot) => match self.side_channel.write_snapshot(&snapshot, started_at) {
                Ok(watermark) => {
                    snapshot.watermark_ms = watermark;
                    self.last_seen_watermark =
                        self.last_seen_watermark.max(started_at).max(observed);
                    report.snapshot = Some(snapshot);
                }
                Err(err) => report.failures.push(format!("snapshot write: {err}")),
            },
            Err(err) => report.failures.push(format!("snapshot compute: {err}")),
        }

        let summaries: Option<Vec<EventSummary>> = match today {
            Ok(events) => Some(events.iter().map(EventSummary::from).collect()),
            Err(err) => {
                report.failures.push(format!("today events: {err}"));
                None
            }
        };
        if let Some(summaries) = &summaries {
            self.publish_day_list(started_at, summaries, &mut report);
        }

        self.refresh.reload_all();
        self.bump_refresh_generation("all");
        report.refreshed = true;

        if let Some(summaries) = summaries {
            report.pushed = self.push_to_wearable(&WireMessage::FullSync {
                cigarettes: summaries,
            });
        }

        let ended_at = self.clock.now_ms();
        self.last_pass_window = Some((started_at, ended_at));
        self.phase = SyncPhase::Idle;
        if report.is_clean() {
            info!(
                "event=sync_pass module=sync status=ok trigger={} drained={} inserted={} \
                 pushed={} duration_ms={}",
                trigger.as_str(),
                report.drain.drained,
                report.drain.inserted,
                report.pushed,
                ended_at - started_at
            );
        } else {
            warn!(
                "event=sync_pass module=sync status=degraded trigger={} failures={} \
                 first_failure={}",
                trigger.as_str(),
                report.failures.len(),
                report.failures[0]
            );
        }
        report
    }

    fn publish_day_list(&self, now_ms: i64, summaries: &[EventSummary], report: &mut SyncReport) {
        let today = calendar::local_date(now_ms);
        if let Err(err) = self.side_channel.write_day_events(today, summaries) {
            report.failures.push(format!("day list: {err}"));
            return;
        }
        let keep_from = today
            .checked_sub_days(Days::new(DAY_LIST_RETENTION_DAYS - 1))
            .unwrap_or(today);
        if let Err(err) = self.side_channel.prune_day_events(keep_from) {
            warn!("event=day_list_prune module=sync status=error error={err}");
        }
    }

    fn bump_refresh_generation(&self, kind: &str) {
        let bumped = self
            .side_channel
            .update::<u64, u64, _>(keys::EXTENSION_REFRESH_GENERATION, |current| {
                let next = current.unwrap_or(0) + 1;
                (Some(next), next)
            })
            .and_then(|_| self.side_channel.set(keys::EXTENSION_REFRESH_KIND, &kind));
        if let Err(err) = bumped {
            warn!("event=extension_refresh module=sync status=error error={err}");
        }
    }

    fn push_catch_up(&mut self) {
        let now = self.clock.now_ms();
        match today_events(&self.conn, now) {
            Ok(events) => {
                self.push_to_wearable(&WireMessage::FullSync {
                    cigarettes: events.iter().map(EventSummary::from).collect(),
                });
            }
            Err(err) => warn!("event=wearable_catch_up module=sync status=error error={err}"),
        }
    }

    /// Best-effort push; returns whether the message left.
    fn push_to_wearable(&mut self, message: &WireMessage) -> bool {
        match self.wearable.as_mut() {
            Some(channel) if channel.is_reachable() => channel.push(message).is_ok(),
            _ => false,
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        info!(
            "event=coordinator_shutdown module=sync status=ok tier={}",
            self.provisioning.tier.as_str()
        );
    }
}

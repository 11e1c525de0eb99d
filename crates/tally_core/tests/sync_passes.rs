use chrono::{Local, TimeZone};
use std::sync::Arc;
use tally_core::model::intent::PendingWriteIntent;
use tally_core::refresh::{RecordingRefreshTrigger, RefreshRequest};
use tally_core::side_channel::keys;
use tally_core::{
    EventSource, ExtensionClient, ManualClock, PendingWriteQueue, SideChannel, SyncCoordinator,
    SyncNotification, SyncTrigger, TallyConfig,
};
use tempfile::TempDir;

fn local_noon() -> i64 {
    Local
        .with_ymd_and_hms(2026, 6, 15, 12, 0, 0)
        .single()
        .unwrap()
        .timestamp_millis()
}

/// Host coordinator plus an extension client sharing one side-channel file.
struct Family {
    _dir: TempDir,
    clock: ManualClock,
    host: SyncCoordinator,
    extension: ExtensionClient,
}

fn family() -> Family {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(local_noon());
    let config = TallyConfig::with_dirs(Some(dir.path().join("shared")), dir.path().join("local"));
    let host = SyncCoordinator::bootstrap(config.clone(), Arc::new(clock.clone())).unwrap();
    let extension = ExtensionClient::open(&config, Arc::new(clock.clone())).unwrap();
    Family {
        _dir: dir,
        clock,
        host,
        extension,
    }
}

#[test]
fn queued_intents_land_once_and_update_today_count() {
    let mut family = family();
    let noon = local_noon();
    for offset in [3, 2, 1] {
        family
            .extension
            .log_event(noon - offset * 60_000, "")
            .unwrap();
    }
    family.clock.advance(1_000);

    let report = family.host.trigger_now(SyncTrigger::Foreground).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.drain.inserted, 3);

    let store_events = family
        .host
        .events()
        .events_on_day(family.clock_now(), 0)
        .unwrap();
    let timestamps: Vec<i64> = store_events.iter().map(|event| event.timestamp_ms).collect();
    assert_eq!(
        timestamps,
        vec![noon - 180_000, noon - 120_000, noon - 60_000]
    );
    assert_eq!(family.extension.pending_count().unwrap(), 0);
    assert_eq!(family.extension.snapshot().unwrap().today_count, 3);
    assert_eq!(family.extension.today_events().unwrap().len(), 3);
}

#[test]
fn second_drain_with_empty_queue_inserts_nothing() {
    let mut family = family();
    family.extension.log_event(local_noon(), "").unwrap();

    let first = family.host.trigger_now(SyncTrigger::Tick).unwrap();
    family.clock.advance(10_000);
    let second = family.host.trigger_now(SyncTrigger::Tick).unwrap();

    assert_eq!(first.drain.inserted, 1);
    assert!(second.drain.is_noop());
    assert_eq!(host_event_count(&family), 1);
}

#[test]
fn intents_left_behind_by_a_crash_are_not_duplicated() {
    let mut family = family();
    let intent = family.extension.log_event(local_noon(), "").unwrap();
    family.host.trigger_now(SyncTrigger::Tick).unwrap();

    // Store commit succeeded but the queue clear never happened.
    family
        .extension
        .side_channel()
        .set(keys::PENDING_EVENTS, &vec![intent])
        .unwrap();
    family.clock.advance(10_000);
    let report = family.host.trigger_now(SyncTrigger::Tick).unwrap();

    assert_eq!(report.drain.duplicates, 1);
    assert_eq!(host_event_count(&family), 1);
    assert_eq!(family.extension.pending_count().unwrap(), 0);
}

#[test]
fn n_intents_while_host_is_away_become_n_events() {
    let mut family = family();
    let queue = PendingWriteQueue::new(family.extension.side_channel());
    for index in 0..25 {
        queue
            .enqueue(PendingWriteIntent::new(local_noon() - index * 1_000, ""))
            .unwrap();
    }

    family.host.trigger_now(SyncTrigger::Foreground).unwrap();
    assert_eq!(host_event_count(&family), 25);
    assert!(queue.is_empty().unwrap());
}

#[test]
fn watermark_never_moves_backwards() {
    let mut family = family();
    let mut last = 0;

    family.extension.log_event(local_noon() + 90_000, "").unwrap();
    for step in 0..4 {
        family.host.trigger_now(SyncTrigger::Tick).unwrap();
        let watermark = family.extension.side_channel().watermark().unwrap();
        assert!(watermark >= last, "step {step}: {watermark} < {last}");
        last = watermark;
        family.clock.advance(if step % 2 == 0 { 5_000 } else { -2_000 });
    }
    assert!(last >= local_noon() + 90_000);
}

#[test]
fn extension_write_is_observed_as_external_change() {
    let mut family = family();
    family.host.trigger_now(SyncTrigger::Foreground).unwrap();
    assert_eq!(family.host.observe_external_change(), None);

    family.clock.advance(2_000);
    family.extension.log_event(family.clock_now(), "").unwrap();
    let observed = family.host.observe_external_change().unwrap();
    assert_eq!(observed, family.clock_now());

    family.host.trigger_now(SyncTrigger::WatermarkAdvanced).unwrap();
    assert_eq!(family.host.observe_external_change(), None);
    assert_eq!(host_event_count(&family), 1);
}

#[test]
fn broadcast_depends_on_event_source() {
    let mut family = family();
    let notifications = family.host.bus().subscribe();

    family.host.add_host_event(local_noon(), "", &[]).unwrap();
    let host_side: Vec<SyncNotification> = notifications.try_iter().collect();
    assert!(host_side.is_empty(), "{host_side:?}");

    family.clock.advance(1_000);
    family.extension.log_event(local_noon(), "").unwrap();
    family
        .host
        .trigger_now(SyncTrigger::EventAdded(EventSource::Extension))
        .unwrap();
    let extension_side: Vec<SyncNotification> = notifications.try_iter().collect();
    assert!(extension_side.contains(&SyncNotification::EventsChanged {
        source: EventSource::Extension
    }));
    assert!(extension_side
        .iter()
        .any(|notification| matches!(notification, SyncNotification::SnapshotPublished(_))));
}

#[test]
fn every_pass_asks_the_extension_to_redraw() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(local_noon());
    let config = TallyConfig::with_dirs(None, dir.path());
    let refresh = RecordingRefreshTrigger::new();
    let mut host = SyncCoordinator::bootstrap(config, Arc::new(clock.clone()))
        .unwrap()
        .with_refresh_trigger(Box::new(refresh.clone()));

    host.trigger_now(SyncTrigger::Tick).unwrap();
    clock.advance(1);
    host.trigger_now(SyncTrigger::Foreground).unwrap();

    assert_eq!(refresh.requests(), vec![RefreshRequest::All, RefreshRequest::All]);
    let generation: u64 = host
        .side_channel()
        .get(keys::EXTENSION_REFRESH_GENERATION)
        .unwrap()
        .unwrap();
    assert_eq!(generation, 2);
}

#[test]
fn host_side_channel_and_extension_see_the_same_file() {
    let family = family();
    let host_side: &SideChannel = family.host.side_channel();
    host_side.set("probe", &41_u32).unwrap();
    assert_eq!(
        family.extension.side_channel().get::<u32>("probe").unwrap(),
        Some(41)
    );
}

fn host_event_count(family: &Family) -> u64 {
    let mut total = 0;
    for offset in 0..2 {
        total += family
            .host
            .events()
            .events_on_day(family.clock_now(), offset)
            .unwrap()
            .len() as u64;
    }
    total
}

impl Family {
    fn clock_now(&self) -> i64 {
        use tally_core::Clock;
        self.clock.now_ms()
    }
}

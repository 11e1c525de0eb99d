//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Start and stop the host coordination runtime for the app process.
//! - Forward host edits, lifecycle changes and wearable traffic to it.
//! - Give the glanceable extension its queue-and-countersign path.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - At most one host runtime exists per process.
//! - Extension calls never touch the Shared Store.

use log::warn;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tally_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    EventId, ExtensionClient, HostHandle, HostRuntime, ProcessRole, SyncCoordinator,
    SyncNotification, SyncSnapshot, SyncTrigger, SystemClock, TallyConfig,
};

struct HostSession {
    handle: HostHandle,
    notifications: Receiver<SyncNotification>,
}

static HOST: OnceLock<Mutex<Option<HostSession>>> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `role`: `host|extension|tooling` (case-insensitive).
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same arguments (idempotent).
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(role: String, level: String, log_dir: String) -> String {
    let role = match parse_role(&role) {
        Ok(role) => role,
        Err(err) => return err,
    };
    match init_logging_inner(role, level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyActionResponse {
    /// Whether operation succeeded.
    pub ok: bool,
    /// Event ID touched by the operation, when there is one.
    pub event_id: Option<String>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

impl TallyActionResponse {
    fn success(message: impl Into<String>, event_id: Option<String>) -> Self {
        Self {
            ok: true,
            event_id,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            event_id: None,
            message: message.into(),
        }
    }
}

/// Glanceable snapshot envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotResponse {
    pub ok: bool,
    pub today_count: u32,
    pub daily_average: f64,
    pub last_event_at_ms: Option<i64>,
    pub watermark_ms: i64,
    pub message: String,
}

impl SnapshotResponse {
    fn from_snapshot(snapshot: SyncSnapshot) -> Self {
        Self {
            ok: true,
            today_count: snapshot.today_count,
            daily_average: snapshot.daily_average,
            last_event_at_ms: snapshot.last_event_at_ms,
            watermark_ms: snapshot.watermark_ms,
            message: String::new(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            today_count: 0,
            daily_average: 0.0,
            last_event_at_ms: None,
            watermark_ms: 0,
            message: message.into(),
        }
    }
}

/// Starts the host runtime over the given directories.
///
/// `shared_dir` is the app-group container; `None` or blank runs local-only.
///
/// # FFI contract
/// - Sync call; provisions the store before returning.
/// - Starting twice is a no-op success.
#[flutter_rust_bridge::frb(sync)]
pub fn host_start(shared_dir: Option<String>, local_dir: String) -> TallyActionResponse {
    let mut slot = host_slot();
    if slot.is_some() {
        return TallyActionResponse::success("Host already running.", None);
    }

    let config = build_config(shared_dir, local_dir);
    let coordinator = match SyncCoordinator::bootstrap(config, Arc::new(SystemClock)) {
        Ok(coordinator) => coordinator,
        Err(err) => return TallyActionResponse::failure(format!("host_start failed: {err}")),
    };
    let tier = coordinator.provisioning().tier.as_str();
    match HostRuntime::spawn(coordinator) {
        Ok(handle) => {
            let notifications = handle.subscribe();
            *slot = Some(HostSession {
                handle,
                notifications,
            });
            TallyActionResponse::success(format!("Host started on {tier} store."), None)
        }
        Err(err) => TallyActionResponse::failure(format!("host_start failed: {err}")),
    }
}

/// Stops the host runtime and joins its thread.
#[flutter_rust_bridge::frb(sync)]
pub fn host_stop() -> TallyActionResponse {
    match host_slot().take() {
        Some(session) => {
            session.handle.shutdown();
            TallyActionResponse::success("Host stopped.", None)
        }
        None => TallyActionResponse::success("Host was not running.", None),
    }
}

/// Foreground/background lifecycle signal. Foreground starts the tick and
/// runs a pass; background cancels the tick.
#[flutter_rust_bridge::frb(sync)]
pub fn host_set_foreground(foreground: bool) -> TallyActionResponse {
    with_host("host_set_foreground", |handle| {
        handle.set_foreground(foreground).map(|()| None)
    })
}

/// Called by the platform when another process touched the shared container.
#[flutter_rust_bridge::frb(sync)]
pub fn host_notify_external_change() -> TallyActionResponse {
    with_host("host_notify_external_change", |handle| {
        handle.notify_external_change().map(|()| None)
    })
}

/// Called when the extension reports it logged an event.
#[flutter_rust_bridge::frb(sync)]
pub fn host_extension_event_added() -> TallyActionResponse {
    with_host("host_extension_event_added", |handle| {
        handle.extension_event_added().map(|()| None)
    })
}

/// Forces a pass and waits for it.
#[flutter_rust_bridge::frb(sync)]
pub fn host_sync_now() -> TallyActionResponse {
    with_host("host_sync_now", |handle| {
        handle.sync_now(SyncTrigger::Foreground).map(|_| None)
    })
}

/// Logs one event from the host UI.
#[flutter_rust_bridge::frb(sync)]
pub fn host_add_event(timestamp_ms: i64, note: String) -> TallyActionResponse {
    with_host("host_add_event", |handle| {
        handle
            .add_event(timestamp_ms, note.trim(), Vec::new())
            .map(|event| Some(event.id.to_string()))
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn host_delete_event(event_id: String) -> TallyActionResponse {
    let id = match parse_event_id(&event_id) {
        Ok(id) => id,
        Err(err) => return TallyActionResponse::failure(format!("host_delete_event failed: {err}")),
    };
    with_host("host_delete_event", |handle| {
        handle.delete_event(id).map(|()| Some(event_id.clone()))
    })
}

/// Asks the extension to redraw one snapshot kind.
#[flutter_rust_bridge::frb(sync)]
pub fn host_refresh_extension(kind: String) -> TallyActionResponse {
    with_host("host_refresh_extension", |handle| {
        handle.refresh_extension(kind.trim()).map(|()| None)
    })
}

/// Snapshot as currently published in the side-channel.
#[flutter_rust_bridge::frb(sync)]
pub fn host_snapshot() -> SnapshotResponse {
    let slot = host_slot();
    let Some(session) = slot.as_ref() else {
        return SnapshotResponse::failure("host_snapshot failed: host is not running");
    };
    match session.handle.snapshot() {
        Ok(Some(snapshot)) => SnapshotResponse::from_snapshot(snapshot),
        Ok(None) => SnapshotResponse::failure("host_snapshot failed: side-channel unreadable"),
        Err(err) => SnapshotResponse::failure(format!("host_snapshot failed: {err}")),
    }
}

/// Drains bus notifications since the last call, as stable labels
/// (`events_changed:<source>`, `external_change`, `snapshot`).
#[flutter_rust_bridge::frb(sync)]
pub fn host_poll_notifications() -> Vec<String> {
    let slot = host_slot();
    let Some(session) = slot.as_ref() else {
        return Vec::new();
    };
    session
        .notifications
        .try_iter()
        .map(|notification| notification_label(&notification))
        .collect()
}

/// Answers one raw wearable request with its encoded reply.
///
/// # FFI contract
/// - Always returns a JSON object; failures carry `success: false`.
#[flutter_rust_bridge::frb(sync)]
pub fn wearable_request(payload: String) -> String {
    let slot = host_slot();
    let Some(session) = slot.as_ref() else {
        return r#"{"success":false,"error":"host is not running"}"#.to_string();
    };
    match session.handle.wearable_request(payload) {
        Ok(reply) => reply,
        Err(err) => format!(r#"{{"success":false,"error":"{err}"}}"#),
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn wearable_activated(reachable: bool) -> TallyActionResponse {
    with_host("wearable_activated", |handle| {
        handle.wearable_activated(reachable).map(|()| None)
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn wearable_reachability_changed(reachable: bool) -> TallyActionResponse {
    with_host("wearable_reachability_changed", |handle| {
        handle.wearable_reachability(reachable).map(|()| None)
    })
}

/// Extension path: queues one event for the host and countersigns the
/// glanceable values.
#[flutter_rust_bridge::frb(sync)]
pub fn extension_log_event(
    shared_dir: Option<String>,
    local_dir: String,
    timestamp_ms: i64,
    note: String,
) -> TallyActionResponse {
    let client = match open_extension(shared_dir, local_dir) {
        Ok(client) => client,
        Err(err) => {
            return TallyActionResponse::failure(format!("extension_log_event failed: {err}"))
        }
    };
    match client.log_event(timestamp_ms, note.trim()) {
        Ok(intent) => TallyActionResponse::success(
            "Event queued.",
            intent.intent_id.map(|id| id.to_string()),
        ),
        Err(err) => TallyActionResponse::failure(format!("extension_log_event failed: {err}")),
    }
}

/// Extension path: reads the published snapshot.
#[flutter_rust_bridge::frb(sync)]
pub fn extension_snapshot(shared_dir: Option<String>, local_dir: String) -> SnapshotResponse {
    let client = match open_extension(shared_dir, local_dir) {
        Ok(client) => client,
        Err(err) => return SnapshotResponse::failure(format!("extension_snapshot failed: {err}")),
    };
    match client.snapshot() {
        Ok(snapshot) => SnapshotResponse::from_snapshot(snapshot),
        Err(err) => SnapshotResponse::failure(format!("extension_snapshot failed: {err}")),
    }
}

fn host_slot() -> MutexGuard<'static, Option<HostSession>> {
    let slot = HOST.get_or_init(|| Mutex::new(None));
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("event=ffi_host_slot module=ffi status=recovered reason=poisoned");
            poisoned.into_inner()
        }
    }
}

fn with_host(
    operation: &str,
    f: impl FnOnce(&HostHandle) -> Result<Option<String>, tally_core::RuntimeError>,
) -> TallyActionResponse {
    let slot = host_slot();
    let Some(session) = slot.as_ref() else {
        return TallyActionResponse::failure(format!("{operation} failed: host is not running"));
    };
    match f(&session.handle) {
        Ok(event_id) => TallyActionResponse::success("OK", event_id),
        Err(err) => TallyActionResponse::failure(format!("{operation} failed: {err}")),
    }
}

fn build_config(shared_dir: Option<String>, local_dir: String) -> TallyConfig {
    let shared_dir = shared_dir
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from);
    TallyConfig::with_dirs(shared_dir, local_dir.trim())
}

fn open_extension(
    shared_dir: Option<String>,
    local_dir: String,
) -> Result<ExtensionClient, String> {
    let config = build_config(shared_dir, local_dir);
    ExtensionClient::open(&config, Arc::new(SystemClock)).map_err(|err| err.to_string())
}

fn parse_role(raw: &str) -> Result<ProcessRole, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "host" => Ok(ProcessRole::Host),
        "extension" => Ok(ProcessRole::Extension),
        "tooling" => Ok(ProcessRole::Tooling),
        other => Err(format!("unsupported process role `{other}`")),
    }
}

fn parse_event_id(raw: &str) -> Result<EventId, String> {
    uuid::Uuid::parse_str(raw.trim()).map_err(|err| format!("invalid event id: {err}"))
}

fn notification_label(notification: &SyncNotification) -> String {
    match notification {
        SyncNotification::EventsChanged { source } => format!("events_changed:{}", source.as_str()),
        SyncNotification::ExternalChange { .. } => "external_change".to_string(),
        SyncNotification::SnapshotPublished(_) => "snapshot".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        core_version, extension_log_event, extension_snapshot, host_add_event, host_delete_event,
        host_poll_notifications, host_snapshot, host_start, host_stop, host_sync_now, init_logging,
        ping, wearable_request,
    };
    use std::time::{SystemTime, UNIX_EPOCH};
    use tally_core::calendar::day_range;

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_unknown_role() {
        let error = init_logging("daemon".to_string(), "info".to_string(), "/tmp".to_string());
        assert!(error.contains("daemon"));
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("host".to_string(), "info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn extension_queue_is_visible_in_its_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_string_lossy().to_string();

        let note = " from widget ".to_string();
        let logged = extension_log_event(None, local.clone(), now_ms(), note);
        assert!(logged.ok, "{}", logged.message);
        assert!(logged.event_id.is_some());

        let snapshot = extension_snapshot(None, local);
        assert!(snapshot.ok, "{}", snapshot.message);
        assert!(snapshot.watermark_ms > 0);
    }

    #[test]
    fn host_lifecycle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("group").to_string_lossy().to_string();
        let local = dir.path().join("app").to_string_lossy().to_string();

        let started = host_start(Some(shared.clone()), local.clone());
        assert!(started.ok, "{}", started.message);

        let (today_start, _) = day_range(now_ms(), 0);
        let queued = extension_log_event(Some(shared), local, today_start, String::new());
        assert!(queued.ok, "{}", queued.message);

        let added = host_add_event(today_start, "manual".to_string());
        assert!(added.ok, "{}", added.message);
        let snapshot = host_snapshot();
        assert!(snapshot.ok, "{}", snapshot.message);
        assert_eq!(snapshot.today_count, 2);

        host_poll_notifications();
        assert!(host_sync_now().ok);
        assert!(host_poll_notifications()
            .iter()
            .any(|label| label == "snapshot"));

        let stats = wearable_request(r#"{"action":"getStats"}"#.to_string());
        assert!(stats.contains(r#""success":true"#), "{stats}");

        let deleted = host_delete_event(added.event_id.unwrap());
        assert!(deleted.ok, "{}", deleted.message);
        assert!(host_stop().ok);

        let after = host_add_event(now_ms(), String::new());
        assert!(!after.ok);
        assert!(after.message.contains("not running"));
    }

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    }
}

//! Host coordination context.
//!
//! # Responsibility
//! - Own the [`SyncCoordinator`] (and with it the store connection) on one
//!   dedicated thread.
//! - Drive the periodic tick and the external-change debounce as deadlines
//!   of that thread's command loop.
//!
//! # Invariants
//! - Store I/O happens only on the runtime thread.
//! - Timers exist only while the loop runs; shutdown cancels them and joins
//!   the thread. Dropping the handle shuts down too.
//! - The tick runs only while the host is foregrounded.

use super::bus::{EventSource, SyncBus, SyncNotification};
use super::coordinator::{SyncCoordinator, SyncReport, SyncTrigger};
use super::schedule::{TimerEvent, TimerSchedule};
use crate::clock::Clock;
use crate::model::event::{EventId, LoggedEvent};
use crate::model::snapshot::SyncSnapshot;
use crate::model::tag::TagId;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime thread is gone.
    Stopped,
    /// The request reached the runtime but failed there.
    Rejected(String),
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "host runtime is not running"),
            Self::Rejected(message) => write!(f, "{message}"),
        }
    }
}

impl Error for RuntimeError {}

type Reply<T> = Sender<T>;

enum HostCommand {
    Trigger {
        trigger: SyncTrigger,
        raised_at_ms: i64,
        reply: Option<Reply<Option<SyncReport>>>,
    },
    SetForeground(bool),
    ExternalChange,
    AddEvent {
        timestamp_ms: i64,
        note: String,
        tag_ids: Vec<TagId>,
        reply: Reply<Result<LoggedEvent, String>>,
    },
    DeleteEvent {
        id: EventId,
        reply: Reply<Result<(), String>>,
    },
    WearablePayload {
        payload: String,
        reply: Reply<String>,
    },
    WearableActivated(bool),
    WearableReachability(bool),
    RefreshExtension(String),
    Snapshot {
        reply: Reply<Option<SyncSnapshot>>,
    },
    Shutdown,
}

pub struct HostRuntime;

impl HostRuntime {
    /// Moves `coordinator` onto a new thread and starts its loop.
    ///
    /// The host starts foregrounded: a `Foreground` pass runs first and the
    /// tick is armed.
    pub fn spawn(coordinator: SyncCoordinator) -> std::io::Result<HostHandle> {
        let (sender, receiver) = mpsc::channel();
        let bus = coordinator.bus().clone();
        let clock = coordinator.clock();
        let thread = std::thread::Builder::new()
            .name("tally-host".to_string())
            .spawn(move || run_loop(coordinator, receiver))?;
        info!("event=host_runtime module=sync status=started");
        Ok(HostHandle {
            sender,
            thread: Some(thread),
            bus,
            clock,
        })
    }
}

/// Owning handle to the runtime thread.
pub struct HostHandle {
    sender: Sender<HostCommand>,
    thread: Option<JoinHandle<()>>,
    bus: SyncBus,
    clock: Arc<dyn Clock>,
}

impl HostHandle {
    pub fn subscribe(&self) -> Receiver<SyncNotification> {
        self.bus.subscribe()
    }

    /// Queues a trigger raised now; fire-and-forget.
    pub fn trigger(&self, trigger: SyncTrigger) -> Result<(), RuntimeError> {
        self.send(HostCommand::Trigger {
            trigger,
            raised_at_ms: self.clock.now_ms(),
            reply: None,
        })
    }

    /// Runs a pass and waits for its report. `None` when it was ignored.
    pub fn sync_now(&self, trigger: SyncTrigger) -> Result<Option<SyncReport>, RuntimeError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::Trigger {
            trigger,
            raised_at_ms: self.clock.now_ms(),
            reply: Some(reply),
        })?;
        response.recv().map_err(|_| RuntimeError::Stopped)
    }

    /// Signals that the extension logged an event.
    pub fn extension_event_added(&self) -> Result<(), RuntimeError> {
        self.trigger(SyncTrigger::EventAdded(EventSource::Extension))
    }

    pub fn set_foreground(&self, foreground: bool) -> Result<(), RuntimeError> {
        self.send(HostCommand::SetForeground(foreground))
    }

    /// Reports a side-channel change seen by a platform callback. Bursts
    /// coalesce into one pass after the debounce window.
    pub fn notify_external_change(&self) -> Result<(), RuntimeError> {
        self.send(HostCommand::ExternalChange)
    }

    pub fn add_event(
        &self,
        timestamp_ms: i64,
        note: impl Into<String>,
        tag_ids: Vec<TagId>,
    ) -> Result<LoggedEvent, RuntimeError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::AddEvent {
            timestamp_ms,
            note: note.into(),
            tag_ids,
            reply,
        })?;
        response
            .recv()
            .map_err(|_| RuntimeError::Stopped)?
            .map_err(RuntimeError::Rejected)
    }

    pub fn delete_event(&self, id: EventId) -> Result<(), RuntimeError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::DeleteEvent { id, reply })?;
        response
            .recv()
            .map_err(|_| RuntimeError::Stopped)?
            .map_err(RuntimeError::Rejected)
    }

    /// Answers one raw wearable request; returns the encoded reply.
    pub fn wearable_request(&self, payload: impl Into<String>) -> Result<String, RuntimeError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::WearablePayload {
            payload: payload.into(),
            reply,
        })?;
        response.recv().map_err(|_| RuntimeError::Stopped)
    }

    pub fn wearable_activated(&self, reachable: bool) -> Result<(), RuntimeError> {
        self.send(HostCommand::WearableActivated(reachable))
    }

    pub fn wearable_reachability(&self, reachable: bool) -> Result<(), RuntimeError> {
        self.send(HostCommand::WearableReachability(reachable))
    }

    /// Asks the extension to redraw one snapshot kind.
    pub fn refresh_extension(&self, kind: impl Into<String>) -> Result<(), RuntimeError> {
        self.send(HostCommand::RefreshExtension(kind.into()))
    }

    /// Snapshot as currently stored in the side-channel.
    pub fn snapshot(&self) -> Result<Option<SyncSnapshot>, RuntimeError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::Snapshot { reply })?;
        response.recv().map_err(|_| RuntimeError::Stopped)
    }

    /// Stops timers and joins the runtime thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.sender.send(HostCommand::Shutdown);
        if thread.join().is_err() {
            error!("event=host_runtime module=sync status=error reason=thread_panicked");
        }
        info!("event=host_runtime module=sync status=stopped");
    }

    fn send(&self, command: HostCommand) -> Result<(), RuntimeError> {
        self.sender.send(command).map_err(|_| RuntimeError::Stopped)
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(mut coordinator: SyncCoordinator, commands: Receiver<HostCommand>) {
    let config = coordinator.config().clone();
    let mut schedule = TimerSchedule::new(config.tick_interval(), config.debounce());
    coordinator.activate_wearable();
    coordinator.trigger_now(SyncTrigger::Foreground);
    schedule.start_ticking(Instant::now());

    loop {
        let next = match schedule.timeout(Instant::now()) {
            Some(timeout) => commands.recv_timeout(timeout),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(HostCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => handle_command(&mut coordinator, &mut schedule, command),
            Err(RecvTimeoutError::Timeout) => {
                for due in schedule.take_due(Instant::now()) {
                    match due {
                        TimerEvent::Tick => {
                            coordinator.trigger_now(SyncTrigger::Tick);
                        }
                        TimerEvent::Debounce => {
                            if coordinator.observe_external_change().is_some() {
                                coordinator.trigger_now(SyncTrigger::WatermarkAdvanced);
                            }
                        }
                    }
                }
            }
        }
    }

    schedule.cancel_all();
    info!("event=host_runtime module=sync status=loop_exit");
}

fn handle_command(
    coordinator: &mut SyncCoordinator,
    schedule: &mut TimerSchedule,
    command: HostCommand,
) {
    match command {
        HostCommand::Trigger {
            trigger,
            raised_at_ms,
            reply,
        } => {
            let report = coordinator.handle_trigger(trigger, raised_at_ms);
            if let Some(reply) = reply {
                let _ = reply.send(report);
            }
        }
        HostCommand::SetForeground(true) => {
            let was_ticking = schedule.is_ticking();
            schedule.start_ticking(Instant::now());
            if !was_ticking {
                coordinator.trigger_now(SyncTrigger::Foreground);
            }
        }
        HostCommand::SetForeground(false) => schedule.stop_ticking(),
        HostCommand::ExternalChange => {
            schedule.arm_debounce(Instant::now());
        }
        HostCommand::AddEvent {
            timestamp_ms,
            note,
            tag_ids,
            reply,
        } => {
            let result = coordinator
                .add_host_event(timestamp_ms, &note, &tag_ids)
                .map_err(|err| err.to_string());
            let _ = reply.send(result);
        }
        HostCommand::DeleteEvent { id, reply } => {
            let result = coordinator.delete_host_event(id).map_err(|err| err.to_string());
            let _ = reply.send(result);
        }
        HostCommand::WearablePayload { payload, reply } => {
            let _ = reply.send(coordinator.handle_wearable_payload(&payload));
        }
        HostCommand::WearableActivated(reachable) => coordinator.on_wearable_activated(reachable),
        HostCommand::WearableReachability(reachable) => {
            coordinator.on_wearable_reachability(reachable)
        }
        HostCommand::RefreshExtension(kind) => coordinator.refresh_extension_kind(&kind),
        HostCommand::Snapshot { reply } => {
            let snapshot = match coordinator.side_channel().read_snapshot() {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    warn!("event=snapshot_read module=sync status=error error={err}");
                    None
                }
            };
            let _ = reply.send(snapshot);
        }
        HostCommand::Shutdown => {}
    }
}

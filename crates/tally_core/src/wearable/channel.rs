//! Session and reachability state of the wearable link.
//!
//! # Invariants
//! - Pushes leave only while the state is `Reachable`; otherwise they are
//!   dropped. The side-channel is the durable path for the companion.
//! - A catch-up is requested exactly once per transition into `Reachable`.
//! - Send failures are reported to the caller and never retried here.

use super::message::WireMessage;
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Inactive,
    Activating,
    Reachable,
    Unreachable,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Activating => "activating",
            Self::Reachable => "reachable",
            Self::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    NotReachable(ChannelState),
    Transport(String),
    Encode(String),
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReachable(state) => {
                write!(f, "wearable not reachable (state={})", state.as_str())
            }
            Self::Transport(message) => write!(f, "wearable transport failure: {message}"),
            Self::Encode(message) => write!(f, "wearable message encoding failed: {message}"),
        }
    }
}

impl Error for ChannelError {}

/// Platform session the channel drives.
///
/// `activate` starts an asynchronous activation; its completion and every
/// later reachability change come back through
/// [`WearableChannel::on_activation_complete`] and
/// [`WearableChannel::on_reachability_changed`].
pub trait WearableTransport: Send {
    fn activate(&mut self) -> Result<(), ChannelError>;
    fn send(&mut self, message: &WireMessage) -> Result<(), ChannelError>;
}

pub struct WearableChannel {
    state: ChannelState,
    transport: Box<dyn WearableTransport>,
}

impl WearableChannel {
    pub fn new(transport: Box<dyn WearableTransport>) -> Self {
        Self {
            state: ChannelState::Inactive,
            transport,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_reachable(&self) -> bool {
        self.state == ChannelState::Reachable
    }

    /// Starts session activation. No-op unless currently inactive.
    pub fn activate(&mut self) -> Result<(), ChannelError> {
        if self.state != ChannelState::Inactive {
            return Ok(());
        }
        self.transition(ChannelState::Activating);
        if let Err(err) = self.transport.activate() {
            warn!("event=wearable_activate module=wearable status=error error={err}");
            self.transition(ChannelState::Inactive);
            return Err(err);
        }
        Ok(())
    }

    /// Records the end of activation. Returns whether a catch-up push is due.
    pub fn on_activation_complete(&mut self, reachable: bool) -> bool {
        if self.state != ChannelState::Activating {
            debug!(
                "event=wearable_activated module=wearable status=skipped state={}",
                self.state.as_str()
            );
            return false;
        }
        self.transition(if reachable {
            ChannelState::Reachable
        } else {
            ChannelState::Unreachable
        });
        reachable
    }

    /// Records a reachability callback. Returns whether a catch-up push is due.
    pub fn on_reachability_changed(&mut self, reachable: bool) -> bool {
        match (self.state, reachable) {
            (ChannelState::Inactive | ChannelState::Activating, _) => {
                debug!(
                    "event=wearable_reachability module=wearable status=skipped state={}",
                    self.state.as_str()
                );
                false
            }
            (ChannelState::Unreachable, true) => {
                self.transition(ChannelState::Reachable);
                true
            }
            (ChannelState::Reachable, false) => {
                self.transition(ChannelState::Unreachable);
                false
            }
            _ => false,
        }
    }

    /// Ends the session; later pushes are dropped until reactivation.
    pub fn deactivate(&mut self) {
        self.transition(ChannelState::Inactive);
    }

    /// Fire-and-forget push. Dropped with `NotReachable` unless reachable.
    pub fn push(&mut self, message: &WireMessage) -> Result<(), ChannelError> {
        if !self.is_reachable() {
            debug!(
                "event=wearable_push module=wearable status=dropped action={} state={}",
                message.action(),
                self.state.as_str()
            );
            return Err(ChannelError::NotReachable(self.state));
        }
        match self.transport.send(message) {
            Ok(()) => {
                debug!(
                    "event=wearable_push module=wearable status=ok action={}",
                    message.action()
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=wearable_push module=wearable status=error action={} error={err}",
                    message.action()
                );
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: ChannelState) {
        if self.state != next {
            info!(
                "event=wearable_state module=wearable status=ok from={} to={}",
                self.state.as_str(),
                next.as_str()
            );
            self.state = next;
        }
    }
}

/// In-process transport that records every sent message.
///
/// Used where no companion device exists (tooling, tests). Clones share
/// the same record.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<WireMessage>>>,
    fail_sends: Arc<Mutex<bool>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<WireMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Makes every following send fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        match self.fail_sends.lock() {
            Ok(mut flag) => *flag = failing,
            Err(poisoned) => *poisoned.into_inner() = failing,
        }
    }

    fn is_failing(&self) -> bool {
        match self.fail_sends.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl WearableTransport for MemoryTransport {
    fn activate(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn send(&mut self, message: &WireMessage) -> Result<(), ChannelError> {
        if self.is_failing() {
            return Err(ChannelError::Transport("peer rejected message".to_string()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelError, ChannelState, MemoryTransport, WearableChannel};
    use crate::wearable::message::WireMessage;

    fn channel() -> (WearableChannel, MemoryTransport) {
        let transport = MemoryTransport::new();
        (WearableChannel::new(Box::new(transport.clone())), transport)
    }

    #[test]
    fn pushes_are_dropped_until_reachable() {
        let (mut channel, transport) = channel();
        assert_eq!(
            channel.push(&WireMessage::GetStats),
            Err(ChannelError::NotReachable(ChannelState::Inactive))
        );

        channel.activate().unwrap();
        assert_eq!(channel.state(), ChannelState::Activating);
        assert!(!channel.on_activation_complete(false));
        assert!(channel.push(&WireMessage::RequestSync).is_err());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn catch_up_fires_once_per_transition_into_reachable() {
        let (mut channel, _) = channel();
        channel.activate().unwrap();
        assert!(channel.on_activation_complete(true));
        assert!(!channel.on_reachability_changed(true));
        assert!(!channel.on_reachability_changed(false));
        assert_eq!(channel.state(), ChannelState::Unreachable);
        assert!(channel.on_reachability_changed(true));
        assert!(!channel.on_reachability_changed(true));
    }

    #[test]
    fn reachability_before_activation_is_ignored() {
        let (mut channel, _) = channel();
        assert!(!channel.on_reachability_changed(true));
        assert_eq!(channel.state(), ChannelState::Inactive);
        assert!(!channel.on_activation_complete(true));
    }

    #[test]
    fn send_failures_surface_without_state_change() {
        let (mut channel, transport) = channel();
        channel.activate().unwrap();
        channel.on_activation_complete(true);
        transport.set_failing(true);

        assert!(matches!(
            channel.push(&WireMessage::RequestSync),
            Err(ChannelError::Transport(_))
        ));
        assert!(channel.is_reachable());
    }
}

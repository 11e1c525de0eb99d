//! Typed in-process notification bus.
//!
//! The coordinator publishes; UI layers subscribe and receive on their own
//! thread. Subscribers whose receiver was dropped are pruned on publish.

use crate::model::snapshot::SyncSnapshot;
use log::debug;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Which process produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Host,
    Extension,
    Wearable,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Extension => "extension",
            Self::Wearable => "wearable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
    /// Events were added outside the host UI; views should reload.
    EventsChanged { source: EventSource },
    /// Another process advanced the watermark.
    ExternalChange { watermark_ms: i64 },
    /// A sync pass published a fresh snapshot.
    SnapshotPublished(SyncSnapshot),
}

#[derive(Clone, Default)]
pub struct SyncBus {
    subscribers: Arc<Mutex<Vec<Sender<SyncNotification>>>>,
}

impl SyncBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SyncNotification> {
        let (sender, receiver) = mpsc::channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(sender),
            Err(poisoned) => poisoned.into_inner().push(sender),
        }
        receiver
    }

    /// Delivers to every live subscriber. Returns how many received it.
    pub fn publish(&self, notification: SyncNotification) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|sender| sender.send(notification.clone()).is_ok());
        let delivered = subscribers.len();
        debug!("event=bus_publish module=sync status=ok delivered={delivered}");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(subscribers) => subscribers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventSource, SyncBus, SyncNotification};

    #[test]
    fn every_subscriber_receives_and_dropped_ones_are_pruned() {
        let bus = SyncBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();
        drop(second);

        let delivered = bus.publish(SyncNotification::EventsChanged {
            source: EventSource::Extension,
        });
        assert_eq!(delivered, 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            first.try_recv().unwrap(),
            SyncNotification::EventsChanged {
                source: EventSource::Extension
            }
        );
    }
}

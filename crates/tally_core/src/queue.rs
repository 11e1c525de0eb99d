//! Pending-Write Queue.
//!
//! # Responsibility
//! - Let processes that must not hold the Shared Store open (the glanceable
//!   extension) record write intents in the side-channel.
//! - Let the host drain those intents into the Shared Store.
//!
//! # Invariants
//! - Intents are appended in creation order under `keys::PENDING_EVENTS`.
//! - The queue is shortened only after the store commit succeeded, and only
//!   by the exact prefix that was committed; intents appended during a drain
//!   survive it.
//! - Replaying a committed intent never creates a second event: intents
//!   with an id reuse it as event id, intents without one are matched on
//!   timestamp + note.

use crate::model::intent::PendingWriteIntent;
use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
use crate::repo::RepoError;
use crate::side_channel::{keys, SideChannel, SideChannelError};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum QueueError {
    SideChannel(SideChannelError),
    Store(RepoError),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SideChannel(err) => write!(f, "pending queue side-channel failure: {err}"),
            Self::Store(err) => write!(f, "pending queue store failure: {err}"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SideChannel(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<SideChannelError> for QueueError {
    fn from(value: SideChannelError) -> Self {
        Self::SideChannel(value)
    }
}

impl From<RepoError> for QueueError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.into())
    }
}

/// What one drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Intents read from the queue.
    pub drained: usize,
    /// New events written to the store.
    pub inserted: usize,
    /// Intents that were already committed by an earlier drain.
    pub duplicates: usize,
    /// Intents that failed validation and were dropped.
    pub rejected: usize,
    /// Whether the drained prefix was removed from the side-channel.
    pub cleared: bool,
}

impl DrainOutcome {
    pub fn is_noop(&self) -> bool {
        self.drained == 0
    }
}

pub struct PendingWriteQueue<'a> {
    side_channel: &'a SideChannel,
}

impl<'a> PendingWriteQueue<'a> {
    pub fn new(side_channel: &'a SideChannel) -> Self {
        Self { side_channel }
    }

    /// Appends one intent. Returns the queue length after the append.
    pub fn enqueue(&self, intent: PendingWriteIntent) -> Result<usize, QueueError> {
        let len = self
            .side_channel
            .update::<Vec<PendingWriteIntent>, usize, _>(keys::PENDING_EVENTS, |current| {
                let mut list = current.unwrap_or_default();
                list.push(intent);
                let len = list.len();
                (Some(list), len)
            })?;
        debug!("event=queue_enqueue module=queue status=ok pending={len}");
        Ok(len)
    }

    pub fn pending(&self) -> Result<Vec<PendingWriteIntent>, QueueError> {
        Ok(self
            .side_channel
            .get::<Vec<PendingWriteIntent>>(keys::PENDING_EVENTS)?
            .unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Commits every queued intent to the store, then removes them from the
    /// queue and advances the watermark to `now_ms`.
    ///
    /// An empty queue is a cheap no-op that touches neither store nor
    /// watermark. When the store commit fails the queue is left untouched.
    pub fn drain_and_apply(
        &self,
        conn: &mut Connection,
        now_ms: i64,
    ) -> Result<DrainOutcome, QueueError> {
        let intents = self.pending()?;
        if intents.is_empty() {
            return Ok(DrainOutcome::default());
        }

        let mut outcome = DrainOutcome {
            drained: intents.len(),
            ..DrainOutcome::default()
        };

        let tx = conn.transaction()?;
        {
            let repo = SqliteEventRepository::new(&tx);
            for intent in &intents {
                if intent.intent_id.is_none()
                    && repo.event_exists_with(intent.timestamp_ms, &intent.note)?
                {
                    outcome.duplicates += 1;
                    continue;
                }
                match repo.insert_event_if_absent(&intent.to_event()) {
                    Ok(true) => outcome.inserted += 1,
                    Ok(false) => outcome.duplicates += 1,
                    Err(RepoError::Validation(err)) => {
                        warn!("event=queue_drain module=queue status=rejected error={err}");
                        outcome.rejected += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        tx.commit()?;

        match self.remove_prefix(&intents) {
            Ok(()) => outcome.cleared = true,
            Err(err) => warn!(
                "event=queue_clear module=queue status=error drained={} error={err}",
                outcome.drained
            ),
        }
        if let Err(err) = self.side_channel.advance_watermark(now_ms) {
            warn!("event=queue_watermark module=queue status=error error={err}");
        }

        info!(
            "event=queue_drain module=queue status=ok drained={} inserted={} duplicates={} \
             rejected={} cleared={}",
            outcome.drained, outcome.inserted, outcome.duplicates, outcome.rejected, outcome.cleared
        );
        Ok(outcome)
    }

    fn remove_prefix(&self, drained: &[PendingWriteIntent]) -> Result<(), SideChannelError> {
        self.side_channel
            .update::<Vec<PendingWriteIntent>, (), _>(keys::PENDING_EVENTS, |current| {
                let mut list = current.unwrap_or_default();
                if list.len() >= drained.len() && list[..drained.len()] == *drained {
                    list.drain(..drained.len());
                } else {
                    list.retain(|intent| !drained.contains(intent));
                }
                let next = if list.is_empty() { None } else { Some(list) };
                (next, ())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::PendingWriteQueue;
    use crate::db::open_db_in_memory;
    use crate::model::intent::PendingWriteIntent;
    use crate::repo::event_repo::{EventRepository, SqliteEventRepository};
    use crate::side_channel::{keys, SideChannel};

    #[test]
    fn empty_drain_is_noop_and_keeps_watermark() {
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();
        let queue = PendingWriteQueue::new(&side);

        let outcome = queue.drain_and_apply(&mut conn, 1_000).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(side.watermark().unwrap(), 0);
    }

    #[test]
    fn replayed_intents_are_not_inserted_twice() {
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();
        let queue = PendingWriteQueue::new(&side);
        let intent = PendingWriteIntent::new(100, "");
        queue.enqueue(intent.clone()).unwrap();
        queue.drain_and_apply(&mut conn, 1_000).unwrap();

        // Simulates a crash after commit but before the queue was cleared.
        side.set(keys::PENDING_EVENTS, &vec![intent]).unwrap();
        let outcome = queue.drain_and_apply(&mut conn, 2_000).unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(SqliteEventRepository::new(&conn).count_events().unwrap(), 1);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn legacy_intents_without_id_dedup_on_content() {
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();
        let queue = PendingWriteQueue::new(&side);
        let legacy = PendingWriteIntent {
            intent_id: None,
            timestamp_ms: 42,
            note: "walk".to_string(),
        };
        queue.enqueue(legacy.clone()).unwrap();
        queue.drain_and_apply(&mut conn, 1).unwrap();
        queue.enqueue(legacy).unwrap();

        let outcome = queue.drain_and_apply(&mut conn, 2).unwrap();
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(SqliteEventRepository::new(&conn).count_events().unwrap(), 1);
    }

    #[test]
    fn invalid_intents_are_dropped_without_blocking_the_queue() {
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();
        let queue = PendingWriteQueue::new(&side);
        queue.enqueue(PendingWriteIntent::new(-1, "")).unwrap();
        queue.enqueue(PendingWriteIntent::new(10, "")).unwrap();

        let outcome = queue.drain_and_apply(&mut conn, 50).unwrap();
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.inserted, 1);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn failed_commit_leaves_queue_intact() {
        let side = SideChannel::open_in_memory().unwrap();
        let mut conn = open_db_in_memory().unwrap();
        conn.execute_batch("DROP TABLE event_tags; DROP TABLE events;").unwrap();
        let queue = PendingWriteQueue::new(&side);
        queue.enqueue(PendingWriteIntent::new(10, "")).unwrap();

        assert!(queue.drain_and_apply(&mut conn, 50).is_err());
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(side.watermark().unwrap(), 0);
    }
}

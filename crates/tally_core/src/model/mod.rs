//! Domain model for logged events and the records around them.
//!
//! # Responsibility
//! - Define canonical data structures shared by all three processes.
//! - Keep wire-independent shapes; serialization lives at the boundaries.
//!
//! # Invariants
//! - Every persisted record is identified by a stable UUID.
//! - Timestamps are Unix epoch milliseconds.

pub mod catalog;
pub mod event;
pub mod intent;
pub mod snapshot;
pub mod tag;

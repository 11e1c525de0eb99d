//! Companion wearable link: wire messages and the reachability-gated channel.

pub mod channel;
pub mod message;

pub use channel::{ChannelError, ChannelState, MemoryTransport, WearableChannel, WearableTransport};
pub use message::{WireMessage, WireReply};

//! Flutter-facing bindings for the tally core.

pub mod api;

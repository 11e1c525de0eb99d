//! Extension refresh trigger.
//!
//! One-way "redraw your cached snapshot" signal toward the glanceable
//! extension's host environment. The coordinator also bumps
//! `keys::EXTENSION_REFRESH_GENERATION` so an extension that polls the
//! side-channel notices the request.

use log::debug;
use std::sync::{Arc, Mutex};

pub trait RefreshTrigger: Send {
    /// Invalidate and redraw every cached snapshot.
    fn reload_all(&mut self);
    /// Invalidate one named snapshot kind.
    fn reload_kind(&mut self, kind: &str);
}

/// Trigger for hosts without an extension environment.
#[derive(Debug, Default)]
pub struct LoggingRefreshTrigger;

impl RefreshTrigger for LoggingRefreshTrigger {
    fn reload_all(&mut self) {
        debug!("event=extension_refresh module=refresh status=ok scope=all");
    }

    fn reload_kind(&mut self, kind: &str) {
        debug!("event=extension_refresh module=refresh status=ok scope=kind kind={kind}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRequest {
    All,
    Kind(String),
}

/// Records requests; clones share one record.
#[derive(Debug, Clone, Default)]
pub struct RecordingRefreshTrigger {
    requests: Arc<Mutex<Vec<RefreshRequest>>>,
}

impl RecordingRefreshTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RefreshRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, request: RefreshRequest) {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
    }
}

impl RefreshTrigger for RecordingRefreshTrigger {
    fn reload_all(&mut self) {
        self.record(RefreshRequest::All);
    }

    fn reload_kind(&mut self, kind: &str) {
        self.record(RefreshRequest::Kind(kind.to_string()));
    }
}

//! Host use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep UI/FFI layers and the sync coordinator decoupled from SQL.

pub mod event_service;

//! tractcore — personalization and real-time synchronization engine for a
//! multi-tenant content platform.
//!
//! Exposes the core modules for use by the `tractcored` binary and by
//! integration tests; HTTP wiring (routing, middleware, `AppState`) lives in
//! `main.rs`.

pub mod api;
pub mod auth;
pub mod belief;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod dto;
pub mod error;
pub mod events;
pub mod fragment;
pub mod ids;
pub mod middleware;
pub mod repository;
pub mod session;
pub mod sse;
pub mod tenant;
pub mod warmer;

pub use config::Config;
pub use error::{CoreError, CoreResult};

//! HTTP surface (spec.md §6): route handlers plus the `AppState` they share.

pub mod routes;

use crate::auth::AuthState;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::repository::Repository;
use crate::sse::SseHub;
use std::sync::Arc;

/// Shared application state threaded through every route via
/// `axum::extract::State`, mirroring the base crate's single `AppState`
/// handed to every router.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheManager,
    pub repository: Arc<dyn Repository>,
    pub sse_hub: Arc<SseHub>,
    pub auth: AuthState,
    pub config: Arc<Config>,
}

pub use routes::{
    health_check, list_all_fingerprint_ids, list_all_session_ids, render_pane, sse_stream,
    update_state,
};

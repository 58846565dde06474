//! SSE Hub (spec.md §4.I): fans belief-visibility changes out to live
//! browser connections. One bounded channel per `(tenant, session,
//! storyfragment)`; a fresh `subscribe()` on the same key replaces whatever
//! was there, and a full channel drops the subscription rather than
//! blocking the broadcaster.

use crate::cache::TenantCache;
use crate::dto::SseEventPayload;
use crate::ids::{SessionId, StoryfragmentId};
use crate::session::AffectedPane;
use axum::response::sse::Event;
use futures_util::Stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

type Key = (String, SessionId, StoryfragmentId);

pub struct SseHub {
    capacity: usize,
    subscriptions: RwLock<HashMap<Key, mpsc::Sender<SseEventPayload>>>,
}

impl SseHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    fn key(tenant: &TenantCache, session_id: SessionId, storyfragment_id: &str) -> Key {
        (tenant.tenant_id.clone(), session_id, storyfragment_id.to_string())
    }

    /// A client may hold at most one subscription per key; subscribing
    /// again replaces the prior sender, which drops and ends the old
    /// receiver's stream.
    pub fn subscribe(
        &self,
        tenant: &Arc<TenantCache>,
        session_id: SessionId,
        storyfragment_id: StoryfragmentId,
    ) -> mpsc::Receiver<SseEventPayload> {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let key = Self::key(tenant, session_id, &storyfragment_id);
        self.subscriptions.write().insert(key, tx);
        rx
    }

    pub fn unsubscribe(&self, tenant: &Arc<TenantCache>, session_id: SessionId, storyfragment_id: &str) {
        let key = Self::key(tenant, session_id, storyfragment_id);
        self.subscriptions.write().remove(&key);
    }

    /// Never blocks: a slow or wedged client must not stall the broadcaster
    /// (spec.md §7, Capacity: "Drop the subscription; rely on client
    /// reconnect").
    pub async fn publish(
        &self,
        tenant: &Arc<TenantCache>,
        session_id: &SessionId,
        storyfragment_id: &StoryfragmentId,
        affected_panes: Vec<AffectedPane>,
        scroll_target: Option<String>,
    ) {
        let key = Self::key(tenant, *session_id, storyfragment_id);
        let sender = self.subscriptions.read().get(&key).cloned();
        let Some(sender) = sender else {
            return;
        };

        let payload = SseEventPayload {
            storyfragment_id: storyfragment_id.clone(),
            affected_panes,
            goto_pane_id: scroll_target,
        };

        if sender.try_send(payload).is_err() {
            self.subscriptions.write().remove(&key);
        }
    }

    pub fn has_viewing_sessions(&self, tenant: &Arc<TenantCache>, storyfragment_id: &str) -> bool {
        self.subscriptions
            .read()
            .keys()
            .any(|(tid, _, sf)| tid == &tenant.tenant_id && sf == storyfragment_id)
    }
}

/// Adapt a subscription's receiver into the `Stream` axum's `Sse` response
/// wants, JSON-encoding each payload as a `message` event.
pub fn event_stream(
    rx: mpsc::Receiver<SseEventPayload>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|payload| {
        let data = serde_json::to_string(&payload).unwrap_or_default();
        Ok(Event::default().event("message").data(data))
    })
}

//! Live session registry: account id -> current outbound channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use parley_types::{Envelope, ServerEvent};

/// Maps each authenticated account to its single live outbound channel.
/// Holds only senders; connection lifecycle stays with the connection task.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// account id -> (connection id, outbound sender). The connection id
    /// lets a stale disconnect prove it still owns the binding.
    channels: RwLock<HashMap<u64, (Uuid, mpsc::UnboundedSender<Envelope>)>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Bind an account to a connection's channel, replacing any previous
    /// binding (last login wins). The old channel is not closed here; its
    /// connection task keeps running until its socket drops.
    pub async fn bind(&self, user_id: u64, conn_id: Uuid, tx: mpsc::UnboundedSender<Envelope>) {
        self.inner
            .channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
    }

    /// Remove the binding, but only if `conn_id` still owns it. A stale
    /// disconnect racing a fresh login must not unbind the newer session.
    pub async fn unbind(&self, user_id: u64, conn_id: Uuid) {
        let mut channels = self.inner.channels.write().await;
        if let Some((bound, _)) = channels.get(&user_id) {
            if *bound == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Best-effort push to one account. A silent no-op when offline; no
    /// queuing, no store-and-forward.
    pub async fn send(&self, user_id: u64, event: ServerEvent) {
        let channels = self.inner.channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(Envelope::event(event));
        }
    }

    /// Fan one event out to a recipient set under a single read lock.
    /// Offline recipients are skipped.
    pub async fn send_to_many(&self, user_ids: &[u64], event: ServerEvent) {
        let channels = self.inner.channels.read().await;
        for user_id in user_ids {
            if let Some((_, tx)) = channels.get(user_id) {
                let _ = tx.send(Envelope::event(event.clone()));
            }
        }
    }

    pub async fn is_online(&self, user_id: u64) -> bool {
        self.inner.channels.read().await.contains_key(&user_id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

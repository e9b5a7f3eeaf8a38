//! Shared server state — the fan-out hub plus connection tracking.

use std::sync::Arc;

use dashmap::DashMap;
use sqlx::PgPool;

use crate::config::Config;
use crate::rooms::{Hub, SessionTx};
use crate::types::{ClientInfo, ServerMessage, SessionId};

/// Handle for one live connection, bound or not.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub tx: SessionTx,
}

/// Shared state accessible from all handlers.
pub struct AppState {
    pub db: PgPool,
    /// Room membership + broadcast. The only mutable shared state of the
    /// fan-out core, mutated exclusively through [`Hub`] operations.
    pub hub: Hub,
    /// Every live session keyed by its id, for the `update-clients`
    /// snapshot and global broadcasts.
    pub connections: DashMap<SessionId, SessionHandle>,
    pub config: Config,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Arc<Self> {
        Arc::new(Self {
            db,
            hub: Hub::new(),
            connections: DashMap::new(),
            config,
        })
    }

    /// Snapshot of currently connected session identities.
    pub fn client_snapshot(&self) -> Vec<ClientInfo> {
        self.connections
            .iter()
            .map(|entry| ClientInfo { id: *entry.key() })
            .collect()
    }

    /// Fire-and-forget send to every live session.
    pub fn broadcast_all(&self, msg: ServerMessage) {
        for entry in self.connections.iter() {
            let _ = entry.value().tx.try_send(msg.clone());
        }
    }
}

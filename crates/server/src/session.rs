// Per-connection session state and the live-session table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lexhub_common::types::{Language, UserRole};
use tokio::sync::RwLock;
use uuid::Uuid;

/// State for one live connection.
///
/// Owned exclusively by the connection's socket task and mutated only
/// there; registries hold the connection id and an outbound sender, never
/// the session itself.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque id, stable for the socket's lifetime.
    pub connection_id: Uuid,
    /// Logical identity that survives reconnects (client-supplied or generated).
    pub session_id: String,
    pub user_id: Option<String>,
    pub user_role: Option<UserRole>,
    pub authenticated: bool,
    pub language: Language,
    pub conversation_id: Option<Uuid>,
    /// Current primary room (the conversation room once chat is initialized).
    pub room_id: Option<String>,
    /// Invariant: mirrors room registry membership for this connection.
    pub joined_rooms: HashSet<String>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    /// Fresh anonymous session. The authenticator upgrades it from
    /// handshake credentials where possible.
    pub fn anonymous(session_id: Option<String>, language: Language) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            session_id: session_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("session_{}", Uuid::new_v4())),
            user_id: None,
            user_role: None,
            authenticated: false,
            language,
            conversation_id: None,
            room_id: None,
            joined_rooms: HashSet::new(),
            connected_at: Utc::now(),
        }
    }

    /// Staff sessions may enter support rooms.
    pub fn is_elevated(&self) -> bool {
        self.authenticated && self.user_role.is_some_and(UserRole::is_elevated)
    }
}

/// Live-session table: connection id -> logical session id.
///
/// Entries are removed at disconnect; persisted conversations are closed,
/// not deleted.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl ActiveSessions {
    pub async fn insert(&self, connection_id: Uuid, session_id: String) {
        self.inner.write().await.insert(connection_id, session_id);
    }

    pub async fn remove(&self, connection_id: Uuid) {
        self.inner.write().await.remove(&connection_id);
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

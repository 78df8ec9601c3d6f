// Reconnection vault: short-lived, single-use session snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use lexhub_common::types::{Language, UserRole};
use rand::RngCore;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

const RECONNECTION_TOKEN_BYTES: usize = 32;

/// The slice of session state restored when a dropped client returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSnapshot {
    pub user_id: Option<String>,
    pub user_role: Option<UserRole>,
    pub authenticated: bool,
    pub language: Language,
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
struct VaultEntry {
    snapshot: ReconnectSnapshot,
    expires_at: Instant,
}

/// Token -> snapshot store. Tokens are unguessable, expire after a fixed
/// TTL whether or not they are used, and are destroyed on first consume.
#[derive(Debug, Clone)]
pub struct ReconnectionVault {
    entries: Arc<RwLock<HashMap<String, VaultEntry>>>,
    ttl: Duration,
}

impl ReconnectionVault {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Issue a fresh token for this snapshot.
    pub async fn issue(&self, snapshot: ReconnectSnapshot) -> String {
        let token = generate_reconnection_token();
        let entry = VaultEntry { snapshot, expires_at: Instant::now() + self.ttl };
        self.entries.write().await.insert(token.clone(), entry);
        token
    }

    /// Redeem a token. Destructive: the same token fails on a second call,
    /// and expired entries are treated as absent.
    pub async fn consume(&self, token: &str) -> Option<ReconnectSnapshot> {
        let entry = self.entries.write().await.remove(token)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.snapshot)
    }

    /// Drop entries past their TTL. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| now < entry.expires_at);
        before - guard.len()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Generate a random opaque reconnection token.
fn generate_reconnection_token() -> String {
    let mut bytes = [0u8; RECONNECTION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

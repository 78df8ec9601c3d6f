// Room membership and fan-out.
//
// The registry maps room id -> connection id -> outbound sender. Broadcast
// collects senders under the read lock, drops it, then sends; a slow or
// dead receiver never blocks the registry.

use std::collections::HashMap;
use std::sync::Arc;

use lexhub_common::protocol::ws::ServerFrame;
use lexhub_common::types::{conversation_room, notifications_room, RoomType};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::session::Session;
use crate::store::ChatStore;

/// Outbound half of a connection. The socket task owns the receiver and
/// writes every frame to the wire in order.
pub type Outbound = mpsc::UnboundedSender<ServerFrame>;

#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, HashMap<Uuid, Outbound>>>>,
}

impl RoomRegistry {
    pub async fn join(&self, room_id: &str, connection_id: Uuid, outbound: Outbound) {
        self.rooms
            .write()
            .await
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id, outbound);
    }

    /// Remove a member; empty rooms are deleted. Returns whether the
    /// connection was actually a member.
    pub async fn leave(&self, room_id: &str, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            rooms.remove(room_id);
        }
        removed
    }

    pub async fn is_member(&self, room_id: &str, connection_id: Uuid) -> bool {
        self.rooms
            .read()
            .await
            .get(room_id)
            .is_some_and(|members| members.contains_key(&connection_id))
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, HashMap::len)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Deliver a frame to every member of a room.
    pub async fn broadcast(&self, room_id: &str, frame: &ServerFrame) {
        self.broadcast_filtered(room_id, frame, None).await;
    }

    /// Deliver a frame to every member except one connection (typically the
    /// originator, which already received its own copy).
    pub async fn broadcast_excluding(
        &self,
        room_id: &str,
        frame: &ServerFrame,
        excluded: Uuid,
    ) {
        self.broadcast_filtered(room_id, frame, Some(excluded)).await;
    }

    async fn broadcast_filtered(&self, room_id: &str, frame: &ServerFrame, excluded: Option<Uuid>) {
        let recipients: Vec<Outbound> = {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(room_id) else {
                return;
            };
            members
                .iter()
                .filter(|(id, _)| Some(**id) != excluded)
                .map(|(_, sender)| sender.clone())
                .collect()
        };

        for sender in recipients {
            // Receiver gone means the socket task is tearing down; its
            // membership is cleaned up at disconnect.
            let _ = sender.send(frame.clone());
        }
    }
}

/// Authorization and session bookkeeping on top of the registry.
#[derive(Clone)]
pub struct RoomManager {
    registry: RoomRegistry,
    store: Arc<dyn ChatStore>,
}

impl RoomManager {
    pub fn new(registry: RoomRegistry, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Decide whether this session may enter the room. The rule set is
    /// re-checked on every join; authentication state alone is never enough.
    pub async fn authorize_join(
        &self,
        session: &Session,
        room_id: &str,
        room_type: RoomType,
    ) -> Result<(), String> {
        match room_type {
            RoomType::Conversation => {
                let owned = session
                    .conversation_id
                    .is_some_and(|id| conversation_room(id) == room_id);
                if owned {
                    Ok(())
                } else {
                    Err("You can only join your own conversation room".to_string())
                }
            }
            RoomType::Case => {
                if !session.authenticated {
                    return Err("Authentication required for case rooms".to_string());
                }
                let Some(case_id) = parse_case_room(room_id) else {
                    return Err("Invalid case room id".to_string());
                };
                let case = self
                    .store
                    .case(case_id)
                    .await
                    .map_err(|_| "Case lookup failed".to_string())?;
                // Only the case's own client or attorney may enter; there
                // is no staff-wide bypass.
                let user_id = session.user_id.as_deref();
                let participant = case.is_some_and(|case| {
                    user_id.is_some()
                        && (user_id == case.client_id.as_deref()
                            || user_id == case.attorney_id.as_deref())
                });
                if participant {
                    Ok(())
                } else {
                    Err("You do not have access to this case".to_string())
                }
            }
            RoomType::Support => {
                if session.is_elevated() {
                    Ok(())
                } else {
                    Err("Support rooms are restricted to staff".to_string())
                }
            }
            RoomType::Broadcast => Ok(()),
            RoomType::Notification => {
                let owned = session
                    .user_id
                    .as_deref()
                    .is_some_and(|user_id| notifications_room(user_id) == room_id);
                if session.authenticated && owned {
                    Ok(())
                } else {
                    Err("You can only subscribe to your own notifications".to_string())
                }
            }
        }
    }

    /// Enter a room: registry insert, session bookkeeping, and a presence
    /// announcement to the existing members.
    pub async fn join_room(
        &self,
        session: &mut Session,
        room_id: &str,
        outbound: &Outbound,
        announce: bool,
    ) {
        self.registry.join(room_id, session.connection_id, outbound.clone()).await;
        session.joined_rooms.insert(room_id.to_string());
        debug!(room_id, connection_id = %session.connection_id, "joined room");

        if announce {
            self.registry
                .broadcast_excluding(
                    room_id,
                    &ServerFrame::RoomParticipantJoined {
                        room_id: room_id.to_string(),
                        user_id: session.user_id.clone(),
                        connection_id: session.connection_id,
                    },
                    session.connection_id,
                )
                .await;
        }
    }

    /// Leave a room; returns false when the session was not a member.
    pub async fn leave_room(&self, session: &mut Session, room_id: &str, announce: bool) -> bool {
        let was_member = self.registry.leave(room_id, session.connection_id).await;
        session.joined_rooms.remove(room_id);
        if !was_member {
            return false;
        }
        debug!(room_id, connection_id = %session.connection_id, "left room");

        if announce {
            self.registry
                .broadcast(
                    room_id,
                    &ServerFrame::RoomParticipantLeft {
                        room_id: room_id.to_string(),
                        user_id: session.user_id.clone(),
                        connection_id: session.connection_id,
                    },
                )
                .await;
        }
        true
    }

    /// Disconnect cleanup: leave every joined room with departure
    /// announcements for the explicit rooms.
    pub async fn leave_all(&self, session: &mut Session) {
        let rooms: Vec<String> = session.joined_rooms.drain().collect();
        for room_id in rooms {
            if self.registry.leave(&room_id, session.connection_id).await {
                self.registry
                    .broadcast(
                        &room_id,
                        &ServerFrame::RoomParticipantLeft {
                            room_id: room_id.clone(),
                            user_id: session.user_id.clone(),
                            connection_id: session.connection_id,
                        },
                    )
                    .await;
            }
        }
    }
}

/// Extract the case id from a `case_{uuid}` room id.
fn parse_case_room(room_id: &str) -> Option<Uuid> {
    room_id.strip_prefix("case_").and_then(|raw| Uuid::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexhub_common::types::{case_room, CaseRecord, Language, UserRole};
    use crate::store::MemoryStore;

    fn channel() -> (Outbound, mpsc::UnboundedReceiver<ServerFrame>) {
        mpsc::unbounded_channel()
    }

    fn client_session(user_id: &str) -> Session {
        let mut session = Session::anonymous(None, Language::En);
        session.user_id = Some(user_id.to_string());
        session.user_role = Some(UserRole::Client);
        session.authenticated = true;
        session
    }

    #[tokio::test]
    async fn broadcast_reaches_members_and_skips_the_excluded() {
        let registry = RoomRegistry::default();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.join("broadcast_all", a, tx_a).await;
        registry.join("broadcast_all", b, tx_b).await;

        let frame = ServerFrame::RoomMessage {
            room_id: "broadcast_all".to_string(),
            user_id: Some("u".to_string()),
            message: "hi".to_string(),
            timestamp: chrono::Utc::now(),
        };
        registry.broadcast_excluding("broadcast_all", &frame, a).await;

        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(ServerFrame::RoomMessage { .. })));
    }

    #[tokio::test]
    async fn empty_rooms_are_deleted_on_last_leave() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();
        let member = Uuid::new_v4();

        registry.join("case_x", member, tx).await;
        assert_eq!(registry.room_count().await, 1);

        assert!(registry.leave("case_x", member).await);
        assert_eq!(registry.room_count().await, 0);
        assert!(!registry.leave("case_x", member).await);
    }

    #[tokio::test]
    async fn dead_receivers_do_not_poison_broadcast() {
        let registry = RoomRegistry::default();
        let (tx_dead, rx_dead) = channel();
        let (tx_live, mut rx_live) = channel();
        drop(rx_dead);

        registry.join("room", Uuid::new_v4(), tx_dead).await;
        registry.join("room", Uuid::new_v4(), tx_live).await;

        registry
            .broadcast(
                "room",
                &ServerFrame::RoomLeft { room_id: "room".to_string() },
            )
            .await;
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn conversation_rooms_admit_only_their_owner() {
        let store = Arc::new(MemoryStore::new());
        let manager = RoomManager::new(RoomRegistry::default(), store);
        let mut session = client_session("user-1");
        let conversation_id = Uuid::new_v4();
        session.conversation_id = Some(conversation_id);

        let own_room = conversation_room(conversation_id);
        assert!(manager.authorize_join(&session, &own_room, RoomType::Conversation).await.is_ok());

        let other_room = conversation_room(Uuid::new_v4());
        assert!(manager
            .authorize_join(&session, &other_room, RoomType::Conversation)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn case_rooms_admit_only_the_cases_participants() {
        let store = Arc::new(MemoryStore::new());
        let case_id = Uuid::new_v4();
        store
            .insert_case(CaseRecord {
                id: case_id,
                case_number: "2026-00042".to_string(),
                client_id: Some("client-1".to_string()),
                attorney_id: Some("attorney-1".to_string()),
            })
            .await;
        let manager = RoomManager::new(RoomRegistry::default(), store);
        let room = case_room(case_id);

        let client = client_session("client-1");
        assert!(manager.authorize_join(&client, &room, RoomType::Case).await.is_ok());

        let mut attorney = client_session("attorney-1");
        attorney.user_role = Some(UserRole::Attorney);
        assert!(manager.authorize_join(&attorney, &room, RoomType::Case).await.is_ok());

        let stranger = client_session("someone-else");
        assert!(manager.authorize_join(&stranger, &room, RoomType::Case).await.is_err());

        let anonymous = Session::anonymous(None, Language::En);
        assert!(manager.authorize_join(&anonymous, &room, RoomType::Case).await.is_err());
    }

    #[tokio::test]
    async fn staff_outside_a_case_are_denied_its_room() {
        let store = Arc::new(MemoryStore::new());
        let case_id = Uuid::new_v4();
        store
            .insert_case(CaseRecord {
                id: case_id,
                case_number: "2026-00042".to_string(),
                client_id: Some("client-1".to_string()),
                attorney_id: Some("attorney-1".to_string()),
            })
            .await;
        let manager = RoomManager::new(RoomRegistry::default(), store);
        let room = case_room(case_id);

        let mut admin = client_session("outsider-admin");
        admin.user_role = Some(UserRole::Admin);
        assert!(manager.authorize_join(&admin, &room, RoomType::Case).await.is_err());

        let mut other_attorney = client_session("attorney-2");
        other_attorney.user_role = Some(UserRole::Attorney);
        assert!(manager.authorize_join(&other_attorney, &room, RoomType::Case).await.is_err());
    }

    #[tokio::test]
    async fn support_rooms_require_elevation_and_broadcast_is_open() {
        let store = Arc::new(MemoryStore::new());
        let manager = RoomManager::new(RoomRegistry::default(), store);

        let client = client_session("client-1");
        assert!(manager.authorize_join(&client, "support_1", RoomType::Support).await.is_err());
        assert!(manager.authorize_join(&client, "broadcast_all", RoomType::Broadcast).await.is_ok());

        let mut admin = client_session("admin-1");
        admin.user_role = Some(UserRole::Admin);
        assert!(manager.authorize_join(&admin, "support_1", RoomType::Support).await.is_ok());
    }

    #[tokio::test]
    async fn notification_rooms_are_owner_only() {
        let store = Arc::new(MemoryStore::new());
        let manager = RoomManager::new(RoomRegistry::default(), store);

        let session = client_session("user-1");
        let own = notifications_room("user-1");
        let other = notifications_room("user-2");
        assert!(manager.authorize_join(&session, &own, RoomType::Notification).await.is_ok());
        assert!(manager.authorize_join(&session, &other, RoomType::Notification).await.is_err());

        let anonymous = Session::anonymous(None, Language::En);
        assert!(manager.authorize_join(&anonymous, &own, RoomType::Notification).await.is_err());
    }

    #[tokio::test]
    async fn join_announces_to_existing_members_but_not_the_joiner() {
        let store = Arc::new(MemoryStore::new());
        let manager = RoomManager::new(RoomRegistry::default(), store);

        let mut first = client_session("user-1");
        let (tx_first, mut rx_first) = channel();
        manager.join_room(&mut first, "broadcast_all", &tx_first, true).await;

        let mut second = client_session("user-2");
        let (tx_second, mut rx_second) = channel();
        manager.join_room(&mut second, "broadcast_all", &tx_second, true).await;

        assert!(matches!(
            rx_first.try_recv(),
            Ok(ServerFrame::RoomParticipantJoined { .. })
        ));
        assert!(rx_second.try_recv().is_err());
        assert!(second.joined_rooms.contains("broadcast_all"));
    }

    #[tokio::test]
    async fn leave_all_clears_membership_and_announces() {
        let store = Arc::new(MemoryStore::new());
        let manager = RoomManager::new(RoomRegistry::default(), store);

        let mut leaver = client_session("user-1");
        let (tx_leaver, _rx_leaver) = channel();
        manager.join_room(&mut leaver, "broadcast_all", &tx_leaver, false).await;
        manager.join_room(&mut leaver, "support_1", &tx_leaver, false).await;

        let mut observer = client_session("user-2");
        let (tx_observer, mut rx_observer) = channel();
        manager.join_room(&mut observer, "broadcast_all", &tx_observer, false).await;

        manager.leave_all(&mut leaver).await;

        assert!(leaver.joined_rooms.is_empty());
        assert_eq!(manager.registry().member_count("broadcast_all").await, 1);
        assert_eq!(manager.registry().member_count("support_1").await, 0);
        assert!(matches!(
            rx_observer.try_recv(),
            Ok(ServerFrame::RoomParticipantLeft { .. })
        ));
    }
}

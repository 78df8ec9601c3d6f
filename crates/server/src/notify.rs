// User notifications: subscription, backlog delivery, and push.

use std::sync::Arc;

use lexhub_common::protocol::ws::ServerFrame;
use lexhub_common::types::{notifications_room, NotificationKind, RoomType};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::rooms::{Outbound, RoomManager};
use crate::session::Session;
use crate::store::ChatStore;

#[derive(Clone)]
pub struct NotificationBroadcaster {
    store: Arc<dyn ChatStore>,
    rooms: RoomManager,
    backlog: usize,
}

impl NotificationBroadcaster {
    pub fn new(store: Arc<dyn ChatStore>, rooms: RoomManager, backlog: usize) -> Self {
        Self { store, rooms, backlog }
    }

    /// Subscribe the session to its own notification stream and deliver
    /// the unread backlog.
    pub async fn subscribe(&self, session: &mut Session, outbound: &Outbound) {
        let Some(user_id) = session.user_id.clone() else {
            send(outbound, notifications_error("Authentication required"));
            return;
        };
        let room_id = notifications_room(&user_id);
        if self
            .rooms
            .authorize_join(session, &room_id, RoomType::Notification)
            .await
            .is_err()
        {
            send(outbound, notifications_error("Authentication required"));
            return;
        }

        self.rooms.join_room(session, &room_id, outbound, false).await;

        match self.store.unread_notifications(&user_id, self.backlog).await {
            Ok(notifications) => {
                send(outbound, ServerFrame::NotificationsInitial { notifications });
            }
            Err(err) => {
                error!(user_id, error = %err, "failed to load unread notifications");
                send(outbound, notifications_error("Could not load notifications"));
            }
        }
    }

    /// Mark one of the session user's notifications read.
    ///
    /// Requires a verified identity; a self-reported `user_id` on an
    /// anonymous session is not enough.
    pub async fn mark_read(&self, session: &Session, notification_id: Uuid, outbound: &Outbound) {
        if !session.authenticated {
            send(outbound, notifications_error("Authentication required"));
            return;
        }
        let Some(user_id) = session.user_id.as_deref() else {
            send(outbound, notifications_error("Authentication required"));
            return;
        };

        match self.store.mark_notification_read(user_id, notification_id).await {
            Ok(true) => {
                send(outbound, ServerFrame::NotificationsMarkedRead { notification_id });
            }
            Ok(false) => {
                send(outbound, notifications_error("Notification not found"));
            }
            Err(err) => {
                error!(user_id, error = %err, "failed to mark notification read");
                send(outbound, notifications_error("Could not update notification"));
            }
        }
    }

    /// Persist a notification and push it to the user's live subscribers.
    /// Persistence failures are logged, not fatal to the caller.
    pub async fn push(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: Value,
    ) {
        let notification = match self
            .store
            .create_notification(user_id, kind, title, message, metadata)
            .await
        {
            Ok(notification) => notification,
            Err(err) => {
                error!(user_id, error = %err, "failed to persist notification");
                return;
            }
        };

        info!(user_id, notification_id = %notification.id, "notification pushed");
        self.rooms
            .registry()
            .broadcast(
                &notifications_room(user_id),
                &ServerFrame::Notification { notification },
            )
            .await;
    }
}

fn send(outbound: &Outbound, frame: ServerFrame) {
    let _ = outbound.send(frame);
}

fn notifications_error(message: &str) -> ServerFrame {
    ServerFrame::NotificationsError { message: message.to_string() }
}

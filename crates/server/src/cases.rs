// Case update fan-out: room broadcast plus offline notifications.

use std::sync::Arc;

use chrono::Utc;
use lexhub_common::protocol::ws::ServerFrame;
use lexhub_common::types::{case_room, CaseUpdateType, NotificationKind};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::notify::NotificationBroadcaster;
use crate::rooms::RoomManager;
use crate::store::ChatStore;

#[derive(Clone)]
pub struct CaseUpdateBroadcaster {
    store: Arc<dyn ChatStore>,
    rooms: RoomManager,
    notifier: NotificationBroadcaster,
}

impl CaseUpdateBroadcaster {
    pub fn new(
        store: Arc<dyn ChatStore>,
        rooms: RoomManager,
        notifier: NotificationBroadcaster,
    ) -> Self {
        Self { store, rooms, notifier }
    }

    /// Publish one case update: live broadcast to the case room, then a
    /// persistent notification to each participant except whoever made the
    /// change (`data.updatedBy`).
    pub async fn publish(&self, case_id: Uuid, update_type: CaseUpdateType, data: Value) {
        self.rooms
            .registry()
            .broadcast(
                &case_room(case_id),
                &ServerFrame::CaseUpdate {
                    case_id,
                    update_type,
                    data: data.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await;

        let case = match self.store.case(case_id).await {
            Ok(Some(case)) => case,
            Ok(None) => {
                warn!(%case_id, "case update for unknown case");
                return;
            }
            Err(err) => {
                warn!(%case_id, error = %err, "case lookup failed during update");
                return;
            }
        };

        info!(%case_id, ?update_type, "case update published");

        let updated_by = data.get("updatedBy").and_then(Value::as_str);
        let message = update_type.describe(&case.case_number);
        let metadata = json!({ "caseId": case_id, "updateType": update_type });

        let mut recipients: Vec<&str> = Vec::new();
        if let Some(client_id) = case.client_id.as_deref() {
            recipients.push(client_id);
        }
        if let Some(attorney_id) = case.attorney_id.as_deref() {
            if !recipients.contains(&attorney_id) {
                recipients.push(attorney_id);
            }
        }

        for recipient in recipients {
            if Some(recipient) == updated_by {
                continue;
            }
            self.notifier
                .push(recipient, NotificationKind::Info, "Case Update", &message, metadata.clone())
                .await;
        }
    }
}

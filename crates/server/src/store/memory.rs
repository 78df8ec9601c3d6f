// In-memory store: the default backend and the test double.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lexhub_common::types::{
    CaseRecord, ConversationRecord, ConversationStatus, Language, MessageRecord, MessageRole,
    NotificationKind, NotificationRecord, StoreError, SupportTicketRecord, TicketCategory,
    TicketPriority, TicketStatus,
};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ChatStore;

#[derive(Debug, Default)]
struct MemoryInner {
    conversations: HashMap<Uuid, ConversationRecord>,
    messages: HashMap<Uuid, Vec<MessageRecord>>,
    notifications: HashMap<String, Vec<NotificationRecord>>,
    cases: HashMap<Uuid, CaseRecord>,
    tickets: Vec<SupportTicketRecord>,
}

/// Single-lock in-memory backend. All tables live behind one `RwLock`, so
/// cross-table operations stay consistent without lock ordering rules.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a case row. Case lifecycle lives in the firm's case-management
    /// system; the hub only reads them.
    pub async fn insert_case(&self, case: CaseRecord) {
        self.inner.write().await.cases.insert(case.id, case);
    }

    /// Snapshot of persisted tickets, oldest first.
    pub async fn tickets(&self) -> Vec<SupportTicketRecord> {
        self.inner.read().await.tickets.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_conversation(
        &self,
        user_id: Option<String>,
        language: Language,
    ) -> Result<ConversationRecord, StoreError> {
        let conversation = ConversationRecord {
            id: Uuid::new_v4(),
            user_id,
            language,
            status: ConversationStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            disconnect_reason: None,
        };
        let mut inner = self.inner.write().await;
        inner.messages.insert(conversation.id, Vec::new());
        inner.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn conversation(&self, id: Uuid) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn close_conversation(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let conversation =
            inner.conversations.get_mut(&id).ok_or(StoreError::NotFound)?;
        if conversation.status == ConversationStatus::Closed {
            return Ok(());
        }
        conversation.status = ConversationStatus::Closed;
        conversation.ended_at = Some(Utc::now());
        conversation.disconnect_reason = Some(reason.to_string());
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: Value,
    ) -> Result<MessageRecord, StoreError> {
        let message = MessageRecord {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        let transcript =
            inner.messages.get_mut(&conversation_id).ok_or(StoreError::NotFound)?;
        transcript.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let inner = self.inner.read().await;
        let transcript = inner.messages.get(&conversation_id).ok_or(StoreError::NotFound)?;
        let start = transcript.len().saturating_sub(limit);
        Ok(transcript[start..].to_vec())
    }

    async fn create_notification(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: Value,
    ) -> Result<NotificationRecord, StoreError> {
        let notification = NotificationRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            metadata,
            read: false,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .notifications
            .entry(user_id.to_string())
            .or_default()
            .push(notification.clone());
        Ok(notification)
    }

    async fn unread_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let inner = self.inner.read().await;
        let Some(rows) = inner.notifications.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(rows.iter().rev().filter(|n| !n.read).take(limit).cloned().collect())
    }

    async fn mark_notification_read(
        &self,
        user_id: &str,
        notification_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(rows) = inner.notifications.get_mut(user_id) else {
            return Ok(false);
        };
        match rows.iter_mut().find(|n| n.id == notification_id) {
            Some(notification) => {
                notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn case(&self, case_id: Uuid) -> Result<Option<CaseRecord>, StoreError> {
        Ok(self.inner.read().await.cases.get(&case_id).cloned())
    }

    async fn create_support_ticket(
        &self,
        user_id: &str,
        subject: &str,
        description: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<SupportTicketRecord, StoreError> {
        let ticket = SupportTicketRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            subject: subject.to_string(),
            description: description.to_string(),
            category: TicketCategory::GeneralInquiry,
            priority: TicketPriority::High,
            status: TicketStatus::Open,
            conversation_id,
            created_at: Utc::now(),
        };
        self.inner.write().await.tickets.push(ticket.clone());
        Ok(ticket)
    }
}

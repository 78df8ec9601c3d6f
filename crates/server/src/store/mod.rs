// Persistence store seam.
//
// The hub only depends on this trait; production wiring (SQL, CRM sync)
// is injected at startup. The in-memory implementation in `memory` is the
// shipped default and the test double.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use lexhub_common::types::{
    CaseRecord, ConversationRecord, Language, MessageRecord, MessageRole, NotificationKind,
    NotificationRecord, StoreError, SupportTicketRecord,
};
use serde_json::Value;
use uuid::Uuid;

/// Conversation, transcript, notification, case, and ticket persistence.
///
/// Every method is a suspension point; callers must not hold any lock
/// across these awaits.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_conversation(
        &self,
        user_id: Option<String>,
        language: Language,
    ) -> Result<ConversationRecord, StoreError>;

    async fn conversation(&self, id: Uuid) -> Result<Option<ConversationRecord>, StoreError>;

    /// Mark a conversation closed with an end timestamp and disconnect
    /// reason. Closing an already-closed conversation is a no-op.
    async fn close_conversation(&self, id: Uuid, reason: &str) -> Result<(), StoreError>;

    /// Append one transcript entry. Messages are never mutated afterwards.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: Value,
    ) -> Result<MessageRecord, StoreError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    async fn create_notification(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: Value,
    ) -> Result<NotificationRecord, StoreError>;

    /// Unread notifications for a user, most recent first, bounded.
    async fn unread_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Mark a notification read, scoped to the owning user. Returns false
    /// when no matching row exists for that user.
    async fn mark_notification_read(
        &self,
        user_id: &str,
        notification_id: Uuid,
    ) -> Result<bool, StoreError>;

    async fn case(&self, case_id: Uuid) -> Result<Option<CaseRecord>, StoreError>;

    async fn create_support_ticket(
        &self,
        user_id: &str,
        subject: &str,
        description: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<SupportTicketRecord, StoreError>;
}

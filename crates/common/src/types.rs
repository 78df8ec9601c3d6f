// Core domain types shared across all LexHub crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Languages the hub answers in. Unknown language tags fall back to English.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl Language {
    /// Parse a client-supplied language tag, falling back to English.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "es" | "es-us" | "es-mx" => Self::Es,
            _ => Self::En,
        }
    }

    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
        }
    }
}

/// Role carried in an identity-provider token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Attorney,
    Admin,
}

impl UserRole {
    /// Parse a role claim; the identity provider emits uppercase values.
    pub fn from_claim(claim: &str) -> Option<Self> {
        match claim.to_ascii_lowercase().as_str() {
            "client" => Some(Self::Client),
            "attorney" => Some(Self::Attorney),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Attorneys and admins may enter staff-only rooms.
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::Attorney | Self::Admin)
    }
}

/// Room classes the hub multiplexes connections into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Conversation,
    Case,
    Support,
    Broadcast,
    Notification,
}

/// Room id for a chat conversation, e.g. `conversation_{id}`.
pub fn conversation_room(conversation_id: Uuid) -> String {
    format!("conversation_{conversation_id}")
}

/// Room id for case update fan-out, e.g. `case_{id}`.
pub fn case_room(case_id: Uuid) -> String {
    format!("case_{case_id}")
}

/// Per-user notification push channel, e.g. `notifications_{userId}`.
pub fn notifications_room(user_id: &str) -> String {
    format!("notifications_{user_id}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
}

/// A chat conversation. Closed on disconnect, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: Uuid,
    /// `None` for anonymous visitors.
    pub user_id: Option<String>,
    pub language: Language,
    pub status: ConversationStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub disconnect_reason: Option<String>,
}

/// A persisted transcript entry. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A durable notification row; the live push is at-most-once, this is the
/// re-fetchable record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// A legal case as the hub sees it: just enough to authorize room access
/// and address update notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub id: Uuid,
    pub case_number: String,
    pub client_id: Option<String>,
    pub attorney_id: Option<String>,
}

/// Kinds of case updates pushed to participants. Unknown wire values
/// deserialize to [`CaseUpdateType::Other`] rather than failing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseUpdateType {
    StatusChange,
    DocumentAdded,
    NoteAdded,
    AttorneyAssigned,
    TaskUpdated,
    #[serde(other)]
    Other,
}

impl CaseUpdateType {
    /// Human-readable notification text referencing the case number.
    pub fn describe(self, case_number: &str) -> String {
        match self {
            Self::StatusChange => format!("Case {case_number} status has been updated"),
            Self::DocumentAdded => format!("New document added to case {case_number}"),
            Self::NoteAdded => format!("New note added to case {case_number}"),
            Self::AttorneyAssigned => format!("Attorney assigned to case {case_number}"),
            Self::TaskUpdated => format!("Task updated in case {case_number}"),
            Self::Other => format!("Case {case_number} has been updated"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    GeneralInquiry,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Closed,
}

/// A support ticket raised when a conversation escalates to a human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicketRecord {
    pub id: Uuid,
    pub user_id: String,
    pub subject: String,
    pub description: String,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub conversation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// How a conversation escalates out of the automated responder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EscalationType {
    Voice,
    Human,
}

/// Errors surfaced by a persistence store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

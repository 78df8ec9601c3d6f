// WebSocket frame types for the lexhub-chat.v1 protocol.
//
// Frames are internally tagged on `type` and keep the event names the
// browser widget already speaks (`chat:init`, `room:join`, ...). Payload
// fields are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{EscalationType, MessageRecord, MessageRole, NotificationRecord, RoomType};

/// Client -> Server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Start (or restart) a chat conversation.
    #[serde(rename = "chat:init", rename_all = "camelCase")]
    ChatInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },

    /// An inbound chat message for the automated responder.
    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    #[serde(rename = "room:join", rename_all = "camelCase")]
    RoomJoin { room_id: String, room_type: RoomType },

    #[serde(rename = "room:leave", rename_all = "camelCase")]
    RoomLeave { room_id: String },

    /// Free-form message relayed to everyone in a joined room.
    #[serde(rename = "room:message", rename_all = "camelCase")]
    RoomMessage { room_id: String, message: String },

    #[serde(rename = "notifications:subscribe")]
    NotificationsSubscribe,

    #[serde(rename = "notifications:mark-read", rename_all = "camelCase")]
    NotificationsMarkRead { notification_id: Uuid },

    #[serde(rename = "case:subscribe", rename_all = "camelCase")]
    CaseSubscribe { case_id: Uuid },

    #[serde(rename = "case:unsubscribe", rename_all = "camelCase")]
    CaseUnsubscribe { case_id: Uuid },

    /// Resume a prior conversation after a transport drop.
    #[serde(rename = "reconnect:attempt", rename_all = "camelCase")]
    ReconnectAttempt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
    },

    #[serde(rename = "typing:start")]
    TypingStart,

    #[serde(rename = "typing:stop")]
    TypingStop,

    #[serde(rename = "language:change")]
    LanguageChange { language: String },
}

/// Conversation history returned on a successful reconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationHistory {
    pub id: Uuid,
    /// Most recent messages, oldest first.
    pub messages: Vec<MessageRecord>,
}

/// Server -> Client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        role: MessageRole,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        is_typing: bool,
    },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error { code: String, message: String },

    #[serde(rename = "room:joined", rename_all = "camelCase")]
    RoomJoined { room_id: String },

    #[serde(rename = "room:left", rename_all = "camelCase")]
    RoomLeft { room_id: String },

    #[serde(rename = "room:error", rename_all = "camelCase")]
    RoomError { message: String },

    #[serde(rename = "room:participant-joined", rename_all = "camelCase")]
    RoomParticipantJoined {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        connection_id: Uuid,
    },

    #[serde(rename = "room:participant-left", rename_all = "camelCase")]
    RoomParticipantLeft {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        connection_id: Uuid,
    },

    #[serde(rename = "room:message", rename_all = "camelCase")]
    RoomMessage {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Unread backlog delivered once on subscribe, most recent first.
    #[serde(rename = "notifications:initial", rename_all = "camelCase")]
    NotificationsInitial { notifications: Vec<NotificationRecord> },

    #[serde(rename = "notification", rename_all = "camelCase")]
    Notification { notification: NotificationRecord },

    #[serde(rename = "notifications:marked-read", rename_all = "camelCase")]
    NotificationsMarkedRead { notification_id: Uuid },

    #[serde(rename = "notifications:error", rename_all = "camelCase")]
    NotificationsError { message: String },

    #[serde(rename = "case:subscribed", rename_all = "camelCase")]
    CaseSubscribed { case_id: Uuid },

    #[serde(rename = "case:unsubscribed", rename_all = "camelCase")]
    CaseUnsubscribed { case_id: Uuid },

    #[serde(rename = "case:update", rename_all = "camelCase")]
    CaseUpdate {
        case_id: Uuid,
        update_type: crate::types::CaseUpdateType,
        data: Value,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "case:error", rename_all = "camelCase")]
    CaseError { message: String },

    #[serde(rename = "reconnect:success", rename_all = "camelCase")]
    ReconnectSuccess { conversation: ConversationHistory },

    #[serde(rename = "reconnect:error", rename_all = "camelCase")]
    ReconnectError { message: String },

    /// Hand-off signal; the outer tag is `type`, so the variant carries
    /// `escalationType` instead of a second `type` key.
    #[serde(rename = "escalation", rename_all = "camelCase")]
    Escalation {
        escalation_type: EscalationType,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },

    /// One-time credential the client must store to survive transport drops.
    #[serde(rename = "auth:reconnection-token", rename_all = "camelCase")]
    AuthReconnectionToken { token: String },

    #[serde(rename = "language:changed", rename_all = "camelCase")]
    LanguageChanged { language: String },
}

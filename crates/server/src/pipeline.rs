// Chat message pipeline: rate limit, persist, process, reply.

use std::sync::Arc;

use chrono::Utc;
use lexhub_common::protocol::ws::ServerFrame;
use lexhub_common::types::{conversation_room, EscalationType, MessageRole};
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::limiter::RateLimiter;
use crate::processor::MessageProcessor;
use crate::rooms::{Outbound, RoomManager};
use crate::session::Session;
use crate::store::ChatStore;

/// Orders the stages every inbound chat message goes through. Frames the
/// sender must see (its own echo, typing, errors) go straight down the
/// outbound channel; everything else fans out through the room registry.
#[derive(Clone)]
pub struct MessagePipeline {
    limiter: RateLimiter,
    store: Arc<dyn ChatStore>,
    processor: Arc<dyn MessageProcessor>,
    rooms: RoomManager,
    processor_timeout: Duration,
}

impl MessagePipeline {
    pub fn new(
        limiter: RateLimiter,
        store: Arc<dyn ChatStore>,
        processor: Arc<dyn MessageProcessor>,
        rooms: RoomManager,
        processor_timeout_secs: u64,
    ) -> Self {
        Self {
            limiter,
            store,
            processor,
            rooms,
            processor_timeout: Duration::from_secs(processor_timeout_secs),
        }
    }

    /// Run one chat message through the pipeline. Returns the escalation
    /// the processor requested, if any; the caller owns the hand-off.
    pub async fn handle_chat_message(
        &self,
        session: &mut Session,
        content: String,
        metadata: Option<Value>,
        outbound: &Outbound,
    ) -> Option<EscalationType> {
        if !self.limiter.admit(session.connection_id).await {
            warn!(connection_id = %session.connection_id, "rate limit exceeded");
            send(outbound, error_frame(ErrorCode::RateLimited));
            return None;
        }

        match self.run_stages(session, content, metadata, outbound).await {
            Ok(escalation) => escalation,
            Err(code) => {
                // The client may still believe the assistant is typing.
                let stopped = ServerFrame::Typing { user_id: None, is_typing: false };
                send(outbound, stopped.clone());
                if let Some(room_id) = session.room_id.clone() {
                    self.rooms
                        .registry()
                        .broadcast_excluding(&room_id, &stopped, session.connection_id)
                        .await;
                }
                send(outbound, error_frame(code));
                None
            }
        }
    }

    async fn run_stages(
        &self,
        session: &mut Session,
        content: String,
        metadata: Option<Value>,
        outbound: &Outbound,
    ) -> Result<Option<EscalationType>, ErrorCode> {
        let conversation_id = self.ensure_conversation(session, outbound).await?;
        let room_id = conversation_room(conversation_id);

        self.store
            .append_message(
                conversation_id,
                MessageRole::User,
                &content,
                metadata.unwrap_or_else(|| json!({})),
            )
            .await
            .map_err(|err| {
                error!(%conversation_id, error = %err, "failed to persist user message");
                ErrorCode::PersistenceFailed
            })?;

        let typing = ServerFrame::Typing { user_id: None, is_typing: true };
        send(outbound, typing.clone());
        self.rooms
            .registry()
            .broadcast_excluding(&room_id, &typing, session.connection_id)
            .await;

        let reply = tokio::time::timeout(
            self.processor_timeout,
            self.processor.process(&content, session),
        )
        .await
        .map_err(|_| {
            error!(%conversation_id, "message processor timed out");
            ErrorCode::ProcessorFailed
        })?
        .map_err(|err| {
            error!(%conversation_id, error = %err, "message processor failed");
            ErrorCode::ProcessorFailed
        })?;

        self.store
            .append_message(conversation_id, MessageRole::Assistant, &reply.content, reply.metadata.clone())
            .await
            .map_err(|err| {
                error!(%conversation_id, error = %err, "failed to persist assistant message");
                ErrorCode::PersistenceFailed
            })?;

        let stopped = ServerFrame::Typing { user_id: None, is_typing: false };
        send(outbound, stopped.clone());
        send(
            outbound,
            ServerFrame::Message {
                role: MessageRole::Assistant,
                content: reply.content,
                metadata: Some(reply.metadata),
                timestamp: Utc::now(),
            },
        );
        self.rooms
            .registry()
            .broadcast_excluding(&room_id, &stopped, session.connection_id)
            .await;

        Ok(reply.escalation)
    }

    /// Lazily create the conversation on the first message after init was
    /// skipped, and make sure the session sits in its conversation room.
    async fn ensure_conversation(
        &self,
        session: &mut Session,
        outbound: &Outbound,
    ) -> Result<Uuid, ErrorCode> {
        if let Some(id) = session.conversation_id {
            return Ok(id);
        }

        let conversation = self
            .store
            .create_conversation(session.user_id.clone(), session.language)
            .await
            .map_err(|err| {
                error!(error = %err, "failed to create conversation");
                ErrorCode::PersistenceFailed
            })?;

        session.conversation_id = Some(conversation.id);
        let room_id = conversation_room(conversation.id);
        session.room_id = Some(room_id.clone());
        self.rooms.join_room(session, &room_id, outbound, false).await;
        Ok(conversation.id)
    }
}

fn send(outbound: &Outbound, frame: ServerFrame) {
    let _ = outbound.send(frame);
}

fn error_frame(code: ErrorCode) -> ServerFrame {
    ServerFrame::Error {
        code: code.as_str().to_string(),
        message: code.default_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexhub_common::types::Language;
    use tokio::sync::mpsc;

    use crate::processor::{IntentResponder, ProcessorReply};
    use crate::rooms::RoomRegistry;
    use crate::store::MemoryStore;

    struct FailingProcessor;

    #[async_trait]
    impl MessageProcessor for FailingProcessor {
        async fn process(&self, _: &str, _: &Session) -> anyhow::Result<ProcessorReply> {
            anyhow::bail!("upstream unavailable")
        }
    }

    struct StalledProcessor;

    #[async_trait]
    impl MessageProcessor for StalledProcessor {
        async fn process(&self, _: &str, _: &Session) -> anyhow::Result<ProcessorReply> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ProcessorReply::text("too late"))
        }
    }

    fn pipeline_with(
        store: Arc<MemoryStore>,
        processor: Arc<dyn MessageProcessor>,
        max_messages: usize,
    ) -> MessagePipeline {
        let rooms = RoomManager::new(RoomRegistry::default(), store.clone());
        MessagePipeline::new(RateLimiter::new(60_000, max_messages), store, processor, rooms, 30)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn happy_path_persists_both_sides_and_replies() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(store.clone(), Arc::new(IntentResponder::new()), 30);
        let mut session = Session::anonymous(None, Language::En);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let escalation = pipeline
            .handle_chat_message(&mut session, "I want to schedule".to_string(), None, &tx)
            .await;
        assert!(escalation.is_none());

        let conversation_id = session.conversation_id.expect("conversation created lazily");
        let transcript = store.recent_messages(conversation_id, 10).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, MessageRole::User);
        assert_eq!(transcript[1].role, MessageRole::Assistant);

        let frames = drain(&mut rx);
        assert!(matches!(frames[0], ServerFrame::Typing { is_typing: true, .. }));
        assert!(matches!(frames[1], ServerFrame::Typing { is_typing: false, .. }));
        assert!(matches!(
            &frames[2],
            ServerFrame::Message { role: MessageRole::Assistant, .. }
        ));
    }

    #[tokio::test]
    async fn over_limit_messages_are_rejected_without_persistence() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(store.clone(), Arc::new(IntentResponder::new()), 1);
        let mut session = Session::anonymous(None, Language::En);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline
            .handle_chat_message(&mut session, "first".to_string(), None, &tx)
            .await;
        drain(&mut rx);

        pipeline
            .handle_chat_message(&mut session, "second".to_string(), None, &tx)
            .await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            ServerFrame::Error { code, .. } if code == "RATE_LIMITED"
        ));

        let conversation_id = session.conversation_id.unwrap();
        let transcript = store.recent_messages(conversation_id, 10).await.unwrap();
        assert_eq!(transcript.len(), 2, "rejected message must not be persisted");
    }

    #[tokio::test]
    async fn processor_failure_stops_typing_and_reports_an_error() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(store.clone(), Arc::new(FailingProcessor), 30);
        let mut session = Session::anonymous(None, Language::En);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline
            .handle_chat_message(&mut session, "hello".to_string(), None, &tx)
            .await;

        let frames = drain(&mut rx);
        let last_typing = frames
            .iter()
            .filter_map(|frame| match frame {
                ServerFrame::Typing { is_typing, .. } => Some(*is_typing),
                _ => None,
            })
            .last();
        assert_eq!(last_typing, Some(false), "typing must end false after a failure");
        assert!(frames.iter().any(|frame| matches!(
            frame,
            ServerFrame::Error { code, .. } if code == "PROCESSOR_FAILED"
        )));

        // User message persists even when the processor fails.
        let conversation_id = session.conversation_id.unwrap();
        let transcript = store.recent_messages(conversation_id, 10).await.unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, MessageRole::User);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_processor_hits_the_timeout() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(store, Arc::new(StalledProcessor), 30);
        let mut session = Session::anonymous(None, Language::En);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline
            .handle_chat_message(&mut session, "hello".to_string(), None, &tx)
            .await;

        let frames = drain(&mut rx);
        assert!(frames.iter().any(|frame| matches!(
            frame,
            ServerFrame::Error { code, .. } if code == "PROCESSOR_FAILED"
        )));
    }

    #[tokio::test]
    async fn voice_keywords_bubble_up_an_escalation() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(store, Arc::new(IntentResponder::new()), 30);
        let mut session = Session::anonymous(None, Language::En);
        let (tx, _rx) = mpsc::unbounded_channel();

        let escalation = pipeline
            .handle_chat_message(&mut session, "I want to talk to a person".to_string(), None, &tx)
            .await;
        assert_eq!(escalation, Some(EscalationType::Voice));
    }

    #[tokio::test]
    async fn typing_indicators_fan_out_to_the_conversation_room() {
        let store = Arc::new(MemoryStore::new());
        let rooms = RoomManager::new(RoomRegistry::default(), store.clone());
        let pipeline = MessagePipeline::new(
            RateLimiter::new(60_000, 30),
            store.clone(),
            Arc::new(IntentResponder::new()),
            rooms.clone(),
            30,
        );

        let mut sender = Session::anonymous(None, Language::En);
        let (tx_sender, _rx_sender) = mpsc::unbounded_channel();

        // First message creates the conversation and its room.
        pipeline
            .handle_chat_message(&mut sender, "hello".to_string(), None, &tx_sender)
            .await;

        // An attorney observing the same conversation room.
        let mut observer = Session::anonymous(None, Language::En);
        let room_id = sender.room_id.clone().unwrap();
        let (tx_observer, mut rx_observer) = mpsc::unbounded_channel();
        rooms.join_room(&mut observer, &room_id, &tx_observer, false).await;

        pipeline
            .handle_chat_message(&mut sender, "more".to_string(), None, &tx_sender)
            .await;

        let frames = drain(&mut rx_observer);
        assert!(frames
            .iter()
            .any(|frame| matches!(frame, ServerFrame::Typing { is_typing: true, .. })));
        assert!(frames
            .iter()
            .any(|frame| matches!(frame, ServerFrame::Typing { is_typing: false, .. })));
    }
}

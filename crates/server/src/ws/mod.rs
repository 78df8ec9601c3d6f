// WebSocket endpoint: upgrade, heartbeat loop, and frame dispatch.

mod protocol;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use lexhub_common::protocol::ws::{ClientFrame, ConversationHistory, ServerFrame};
use lexhub_common::types::{case_room, conversation_room, Language, MessageRole, RoomType};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::handshake::{authenticate, HandshakeParams};
use crate::auth::jwt::JwtVerifier;
use crate::cases::CaseUpdateBroadcaster;
use crate::config::HubConfig;
use crate::error::{
    request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
};
use crate::escalation::EscalationHandler;
use crate::limiter::RateLimiter;
use crate::notify::NotificationBroadcaster;
use crate::pipeline::MessagePipeline;
use crate::processor::MessageProcessor;
use crate::rooms::{Outbound, RoomManager, RoomRegistry};
use crate::session::{ActiveSessions, Session};
use crate::store::ChatStore;
use crate::vault::{ReconnectSnapshot, ReconnectionVault};

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 25_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 60_000;
pub(crate) const MAX_FRAME_BYTES: usize = 65_536;

/// Shared hub state handed to every connection task.
#[derive(Clone)]
pub struct HubState {
    pub verifier: Arc<JwtVerifier>,
    pub vault: ReconnectionVault,
    pub rooms: RoomManager,
    pub store: Arc<dyn ChatStore>,
    pub pipeline: MessagePipeline,
    pub notifier: NotificationBroadcaster,
    pub cases: CaseUpdateBroadcaster,
    pub escalations: EscalationHandler,
    pub sessions: ActiveSessions,
    pub limiter: RateLimiter,
    pub history_page_size: usize,
}

impl HubState {
    pub fn build(
        config: &HubConfig,
        store: Arc<dyn ChatStore>,
        processor: Arc<dyn MessageProcessor>,
    ) -> anyhow::Result<Self> {
        let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret)?);
        let vault = ReconnectionVault::new(config.reconnect_token_ttl_secs);
        let limiter =
            RateLimiter::new(config.rate_limit_window_ms, config.rate_limit_max_messages);
        let rooms = RoomManager::new(RoomRegistry::default(), store.clone());
        let pipeline = MessagePipeline::new(
            limiter.clone(),
            store.clone(),
            processor,
            rooms.clone(),
            config.processor_timeout_secs,
        );
        let notifier =
            NotificationBroadcaster::new(store.clone(), rooms.clone(), config.notification_backlog);
        let cases = CaseUpdateBroadcaster::new(store.clone(), rooms.clone(), notifier.clone());
        let escalations =
            EscalationHandler::new(store.clone(), config.voice_phone_number.clone());

        Ok(Self {
            verifier,
            vault,
            rooms,
            store,
            pipeline,
            notifier,
            cases,
            escalations,
            sessions: ActiveSessions::default(),
            limiter,
            history_page_size: config.history_page_size,
        })
    }
}

pub fn router(state: HubState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(
    Query(params): Query<HandshakeParams>,
    State(state): State<HubState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, async move {
            let session = authenticate(params, &state.verifier, &state.vault).await;
            handle_socket(state, session, socket).await;
        })
        .await;
    })
}

async fn handle_socket(state: HubState, mut session: Session, mut socket: WebSocket) {
    info!(
        connection_id = %session.connection_id,
        session_id = %session.session_id,
        authenticated = session.authenticated,
        "connection established"
    );

    // The client must stash this token to survive transport drops.
    let reconnection_token = state
        .vault
        .issue(ReconnectSnapshot {
            user_id: session.user_id.clone(),
            user_role: session.user_role,
            authenticated: session.authenticated,
            language: session.language,
            conversation_id: session.conversation_id,
        })
        .await;
    if protocol::send_frame(
        &mut socket,
        &ServerFrame::AuthReconnectionToken { token: reconnection_token },
    )
    .await
    .is_err()
    {
        return;
    }

    state.sessions.insert(session.connection_id, session.session_id.clone()).await;

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerFrame>();

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(connection_id = %session.connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if protocol::send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        let frame = match protocol::decode_frame(&raw) {
                            Ok(frame) => frame,
                            Err(error) => {
                                warn!(connection_id = %session.connection_id, %error, "undecodable frame");
                                let rejected = ServerFrame::Error {
                                    code: ErrorCode::ProtocolViolation.as_str().to_string(),
                                    message: ErrorCode::ProtocolViolation.default_message().to_string(),
                                };
                                if protocol::send_frame(&mut socket, &rejected).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };
                        dispatch_frame(&state, &mut session, frame, &outbound_sender).await;
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {
                        warn!(connection_id = %session.connection_id, "binary frame ignored");
                    }
                    Err(_) => break,
                }
            }
        }
    }

    disconnect(&state, &mut session).await;
}

/// Disconnect cleanup: leave rooms, close the conversation, release
/// limiter state, drop the live-session entry.
async fn disconnect(state: &HubState, session: &mut Session) {
    info!(connection_id = %session.connection_id, "connection closed");
    state.rooms.leave_all(session).await;

    if let Some(conversation_id) = session.conversation_id {
        if let Err(err) = state.store.close_conversation(conversation_id, "client disconnect").await
        {
            error!(%conversation_id, error = %err, "failed to close conversation on disconnect");
        }
    }

    state.limiter.forget(session.connection_id).await;
    state.sessions.remove(session.connection_id).await;
}

pub(crate) async fn dispatch_frame(
    state: &HubState,
    session: &mut Session,
    frame: ClientFrame,
    outbound: &Outbound,
) {
    match frame {
        ClientFrame::ChatInit { user_id, language } => {
            handle_chat_init(state, session, user_id, language, outbound).await;
        }
        ClientFrame::Message { content, language, metadata } => {
            if let Some(tag) = language.as_deref() {
                session.language = Language::from_tag(tag);
            }
            let escalation =
                state.pipeline.handle_chat_message(session, content, metadata, outbound).await;
            if let Some(escalation) = escalation {
                state.escalations.escalate(session, escalation, outbound).await;
            }
        }
        ClientFrame::RoomJoin { room_id, room_type } => {
            handle_room_join(state, session, room_id, room_type, outbound).await;
        }
        ClientFrame::RoomLeave { room_id } => {
            if state.rooms.leave_room(session, &room_id, true).await {
                send(outbound, ServerFrame::RoomLeft { room_id });
            } else {
                send(outbound, ServerFrame::RoomError { message: "Not in this room".to_string() });
            }
        }
        ClientFrame::RoomMessage { room_id, message } => {
            handle_room_message(state, session, room_id, message, outbound).await;
        }
        ClientFrame::NotificationsSubscribe => {
            state.notifier.subscribe(session, outbound).await;
        }
        ClientFrame::NotificationsMarkRead { notification_id } => {
            state.notifier.mark_read(session, notification_id, outbound).await;
        }
        ClientFrame::CaseSubscribe { case_id } => {
            handle_case_subscribe(state, session, case_id, outbound).await;
        }
        ClientFrame::CaseUnsubscribe { case_id } => {
            state.rooms.leave_room(session, &case_room(case_id), false).await;
            send(outbound, ServerFrame::CaseUnsubscribed { case_id });
        }
        ClientFrame::ReconnectAttempt { conversation_id } => {
            handle_reconnect_attempt(state, session, conversation_id, outbound).await;
        }
        ClientFrame::TypingStart => {
            broadcast_typing(state, session, true).await;
        }
        ClientFrame::TypingStop => {
            broadcast_typing(state, session, false).await;
        }
        ClientFrame::LanguageChange { language } => {
            session.language = Language::from_tag(&language);
            send(
                outbound,
                ServerFrame::LanguageChanged { language: session.language.as_tag().to_string() },
            );
        }
    }
}

/// Start a conversation: persist it, enter its room, greet the visitor.
pub(crate) async fn handle_chat_init(
    state: &HubState,
    session: &mut Session,
    user_id: Option<String>,
    language: Option<String>,
    outbound: &Outbound,
) {
    if let Some(tag) = language.as_deref() {
        session.language = Language::from_tag(tag);
    }
    // A verified identity always wins over the widget's self-reported one.
    if !session.authenticated {
        if let Some(user_id) = user_id.filter(|id| !id.trim().is_empty()) {
            session.user_id = Some(user_id);
        }
    }

    let conversation = match state
        .store
        .create_conversation(session.user_id.clone(), session.language)
        .await
    {
        Ok(conversation) => conversation,
        Err(err) => {
            error!(error = %err, "failed to create conversation");
            send(
                outbound,
                ServerFrame::Error {
                    code: ErrorCode::PersistenceFailed.as_str().to_string(),
                    message: ErrorCode::PersistenceFailed.default_message().to_string(),
                },
            );
            return;
        }
    };

    // Re-initializing replaces the active conversation; drop the old
    // room membership so stale broadcasts stop.
    if let Some(previous_room) = session.room_id.take() {
        state.rooms.leave_room(session, &previous_room, false).await;
    }

    session.conversation_id = Some(conversation.id);
    let room_id = conversation_room(conversation.id);
    session.room_id = Some(room_id.clone());
    state.rooms.join_room(session, &room_id, outbound, false).await;

    info!(conversation_id = %conversation.id, connection_id = %session.connection_id, "conversation started");

    let welcome = welcome_message(session.language);
    let metadata = json!({ "kind": "welcome" });
    if let Err(err) = state
        .store
        .append_message(conversation.id, MessageRole::Assistant, welcome, metadata.clone())
        .await
    {
        error!(conversation_id = %conversation.id, error = %err, "failed to persist welcome message");
    }
    send(
        outbound,
        ServerFrame::Message {
            role: MessageRole::Assistant,
            content: welcome.to_string(),
            metadata: Some(metadata),
            timestamp: Utc::now(),
        },
    );
}

pub(crate) async fn handle_room_join(
    state: &HubState,
    session: &mut Session,
    room_id: String,
    room_type: RoomType,
    outbound: &Outbound,
) {
    match state.rooms.authorize_join(session, &room_id, room_type).await {
        Ok(()) => {
            state.rooms.join_room(session, &room_id, outbound, true).await;
            send(outbound, ServerFrame::RoomJoined { room_id });
        }
        Err(message) => {
            warn!(room_id, connection_id = %session.connection_id, "room join denied");
            send(outbound, ServerFrame::RoomError { message });
        }
    }
}

pub(crate) async fn handle_room_message(
    state: &HubState,
    session: &Session,
    room_id: String,
    message: String,
    outbound: &Outbound,
) {
    if !state.rooms.registry().is_member(&room_id, session.connection_id).await {
        send(outbound, ServerFrame::RoomError { message: "Not in this room".to_string() });
        return;
    }

    state
        .rooms
        .registry()
        .broadcast(
            &room_id,
            &ServerFrame::RoomMessage {
                room_id: room_id.clone(),
                user_id: session.user_id.clone(),
                message,
                timestamp: Utc::now(),
            },
        )
        .await;
}

pub(crate) async fn handle_case_subscribe(
    state: &HubState,
    session: &mut Session,
    case_id: Uuid,
    outbound: &Outbound,
) {
    if !session.authenticated {
        send(outbound, ServerFrame::CaseError { message: "Authentication required".to_string() });
        return;
    }

    let room_id = case_room(case_id);
    match state.rooms.authorize_join(session, &room_id, RoomType::Case).await {
        Ok(()) => {
            state.rooms.join_room(session, &room_id, outbound, false).await;
            send(outbound, ServerFrame::CaseSubscribed { case_id });
        }
        Err(message) => {
            warn!(%case_id, connection_id = %session.connection_id, "case subscription denied");
            send(outbound, ServerFrame::CaseError { message });
        }
    }
}

/// Resume a conversation after a transport drop: rebind the session to the
/// conversation room and replay the recent transcript.
pub(crate) async fn handle_reconnect_attempt(
    state: &HubState,
    session: &mut Session,
    conversation_id: Option<Uuid>,
    outbound: &Outbound,
) {
    let Some(conversation_id) = conversation_id.or(session.conversation_id) else {
        send(
            outbound,
            ServerFrame::ReconnectError { message: "No conversation to resume".to_string() },
        );
        return;
    };

    let conversation = match state.store.conversation(conversation_id).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => {
            send(
                outbound,
                ServerFrame::ReconnectError { message: "Conversation not found".to_string() },
            );
            return;
        }
        Err(err) => {
            error!(%conversation_id, error = %err, "conversation lookup failed on reconnect");
            send(
                outbound,
                ServerFrame::ReconnectError { message: "Could not restore conversation".to_string() },
            );
            return;
        }
    };

    session.conversation_id = Some(conversation.id);
    let room_id = conversation_room(conversation.id);
    session.room_id = Some(room_id.clone());
    state.rooms.join_room(session, &room_id, outbound, false).await;

    let messages = match state.store.recent_messages(conversation.id, state.history_page_size).await
    {
        Ok(messages) => messages,
        Err(err) => {
            error!(conversation_id = %conversation.id, error = %err, "history load failed on reconnect");
            send(
                outbound,
                ServerFrame::ReconnectError { message: "Could not restore conversation".to_string() },
            );
            return;
        }
    };

    info!(conversation_id = %conversation.id, connection_id = %session.connection_id, "conversation resumed");
    send(
        outbound,
        ServerFrame::ReconnectSuccess {
            conversation: ConversationHistory { id: conversation.id, messages },
        },
    );
}

async fn broadcast_typing(state: &HubState, session: &Session, is_typing: bool) {
    let Some(room_id) = session.room_id.as_deref() else {
        return;
    };
    state
        .rooms
        .registry()
        .broadcast_excluding(
            room_id,
            &ServerFrame::Typing { user_id: session.user_id.clone(), is_typing },
            session.connection_id,
        )
        .await;
}

const fn welcome_message(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Hello! I'm the firm's virtual assistant. How can I help you today?"
        }
        Language::Es => {
            "¡Hola! Soy el asistente virtual de la firma. ¿Cómo puedo ayudarle hoy?"
        }
    }
}

fn send(outbound: &Outbound, frame: ServerFrame) {
    let _ = outbound.send(frame);
}

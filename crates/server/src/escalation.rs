// Escalation hand-off: voice callback details or a human support ticket.

use std::sync::Arc;

use lexhub_common::protocol::ws::ServerFrame;
use lexhub_common::types::{EscalationType, Language};
use tracing::{error, info};

use crate::error::ErrorCode;
use crate::rooms::Outbound;
use crate::session::Session;
use crate::store::ChatStore;

#[derive(Clone)]
pub struct EscalationHandler {
    store: Arc<dyn ChatStore>,
    phone_number: String,
}

impl EscalationHandler {
    pub fn new(store: Arc<dyn ChatStore>, phone_number: String) -> Self {
        Self { store, phone_number }
    }

    /// Carry out an escalation the processor requested and acknowledge it
    /// to the client.
    pub async fn escalate(
        &self,
        session: &Session,
        escalation: EscalationType,
        outbound: &Outbound,
    ) {
        let es = session.language == Language::Es;
        match escalation {
            EscalationType::Voice => {
                info!(connection_id = %session.connection_id, "voice escalation");
                let message = if es {
                    format!("Puede llamarnos al {} para hablar con nuestro equipo.", self.phone_number)
                } else {
                    format!("You can reach our team by phone at {}.", self.phone_number)
                };
                send(
                    outbound,
                    ServerFrame::Escalation {
                        escalation_type: EscalationType::Voice,
                        message,
                        phone_number: Some(self.phone_number.clone()),
                    },
                );
            }
            EscalationType::Human => {
                // A ticket needs an owner and a transcript; anonymous chats
                // still get the acknowledgement so the widget can react.
                if let (Some(user_id), Some(conversation_id)) =
                    (session.user_id.as_deref(), session.conversation_id)
                {
                    let created = self
                        .store
                        .create_support_ticket(
                            user_id,
                            "Human Agent Requested",
                            "Visitor asked to speak with a human agent during a chat conversation.",
                            Some(conversation_id),
                        )
                        .await;
                    match created {
                        Ok(ticket) => {
                            info!(ticket_id = %ticket.id, user_id, "support ticket created");
                        }
                        Err(err) => {
                            error!(user_id, error = %err, "failed to create support ticket");
                            send(
                                outbound,
                                ServerFrame::Error {
                                    code: ErrorCode::PersistenceFailed.as_str().to_string(),
                                    message: ErrorCode::PersistenceFailed
                                        .default_message()
                                        .to_string(),
                                },
                            );
                            return;
                        }
                    }
                }

                let message = if es {
                    "Un miembro de nuestro equipo se pondrá en contacto con usted en breve."
                } else {
                    "A member of our team will follow up with you shortly."
                };
                send(
                    outbound,
                    ServerFrame::Escalation {
                        escalation_type: EscalationType::Human,
                        message: message.to_string(),
                        phone_number: None,
                    },
                );
            }
        }
    }
}

fn send(outbound: &Outbound, frame: ServerFrame) {
    let _ = outbound.send(frame);
}

// Automated message processing seam.
//
// The pipeline only sees the `MessageProcessor` trait; the shipped
// implementation is a keyword intent responder. An LLM- or CRM-backed
// processor plugs in behind the same trait.

use async_trait::async_trait;
use lexhub_common::types::{EscalationType, Language};
use serde_json::{json, Value};

use crate::session::Session;

/// What a processor produced for one inbound chat message.
#[derive(Debug, Clone)]
pub struct ProcessorReply {
    pub content: String,
    pub metadata: Value,
    /// Set when the processor decided the conversation should leave the
    /// automated flow.
    pub escalation: Option<EscalationType>,
}

impl ProcessorReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: json!({}), escalation: None }
    }
}

#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, content: &str, session: &Session) -> anyhow::Result<ProcessorReply>;
}

/// Keyword-matching responder for the intake widget.
///
/// Matching is case-insensitive substring search, first rule wins. Replies
/// are localized to the session language.
#[derive(Debug, Clone, Default)]
pub struct IntentResponder;

impl IntentResponder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageProcessor for IntentResponder {
    async fn process(&self, content: &str, session: &Session) -> anyhow::Result<ProcessorReply> {
        let lower = content.to_lowercase();
        let es = session.language == Language::Es;

        if contains_any(&lower, &["speak", "talk", "call", "hablar", "llamar", "llamada"]) {
            let reply = if es {
                "Con gusto lo comunico con nuestro equipo por teléfono."
            } else {
                "I'd be happy to connect you with our team by phone."
            };
            return Ok(ProcessorReply {
                content: reply.to_string(),
                metadata: json!({ "intent": "voice_request" }),
                escalation: Some(EscalationType::Voice),
            });
        }

        // "person" alone would shadow "personal injury" below, so the human
        // rule matches only unambiguous phrasings.
        if contains_any(&lower, &["human", "agent", "real person", "representative", "humano", "agente", "representante"]) {
            let reply = if es {
                "Entendido, lo conecto con un miembro de nuestro equipo."
            } else {
                "Understood, let me connect you with a member of our team."
            };
            return Ok(ProcessorReply {
                content: reply.to_string(),
                metadata: json!({ "intent": "human_request" }),
                escalation: Some(EscalationType::Human),
            });
        }

        if contains_any(&lower, &["appointment", "schedule", "cita", "agendar"]) {
            let reply = if es {
                "Puedo ayudarle a agendar una consulta. ¿Qué día le conviene?"
            } else {
                "I can help you schedule a consultation. What day works best for you?"
            };
            return Ok(ProcessorReply {
                content: reply.to_string(),
                metadata: json!({ "intent": "appointment" }),
                escalation: None,
            });
        }

        if contains_any(&lower, &["immigration", "visa", "inmigraci", "green card"]) {
            let reply = if es {
                "Nuestro equipo de inmigración puede ayudarle. ¿Me cuenta un poco más sobre su situación?"
            } else {
                "Our immigration team can help with that. Could you tell me a bit more about your situation?"
            };
            return Ok(ProcessorReply {
                content: reply.to_string(),
                metadata: json!({ "intent": "immigration", "practiceArea": "immigration" }),
                escalation: None,
            });
        }

        if contains_any(&lower, &["accident", "injury", "accidente", "lesion", "lesión"]) {
            let reply = if es {
                "Lamento lo ocurrido. Nuestro equipo de lesiones personales puede revisar su caso. ¿Cuándo sucedió?"
            } else {
                "I'm sorry to hear that. Our personal injury team can review your case. When did it happen?"
            };
            return Ok(ProcessorReply {
                content: reply.to_string(),
                metadata: json!({ "intent": "personal_injury", "practiceArea": "personal_injury" }),
                escalation: None,
            });
        }

        let reply = if es {
            "Gracias por su mensaje. ¿Podría contarme más sobre el tema legal en el que necesita ayuda?"
        } else {
            "Thanks for your message. Could you tell me more about the legal matter you need help with?"
        };
        Ok(ProcessorReply {
            content: reply.to_string(),
            metadata: json!({ "intent": "clarification" }),
            escalation: None,
        })
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

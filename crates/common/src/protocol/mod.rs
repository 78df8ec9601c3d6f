// Wire protocol for the lexhub-chat.v1 WebSocket contract.

pub mod ws;

/// Protocol identifier clients may log or report against.
pub const CURRENT_PROTOCOL_VERSION: &str = "lexhub-chat.v1";

// Connection handshake: soft authentication from query credentials.
//
// A bad or missing token never rejects the connection; the visitor simply
// stays anonymous. Authorization is re-checked at every room join, so a
// degraded session can only reach public surfaces.

use serde::Deserialize;
use tracing::{debug, warn};

use lexhub_common::types::Language;

use crate::auth::jwt::JwtVerifier;
use crate::session::Session;
use crate::vault::ReconnectionVault;

/// Credentials and hints supplied on the upgrade request query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    pub session_id: Option<String>,
    pub language: Option<String>,
    pub token: Option<String>,
    pub reconnection_token: Option<String>,
}

/// Build the session for a new connection.
///
/// Precedence: a valid JWT authenticates a fresh session; otherwise a
/// valid reconnection token restores the prior session (including
/// identity and conversation); otherwise the session is anonymous.
pub async fn authenticate(
    params: HandshakeParams,
    verifier: &JwtVerifier,
    vault: &ReconnectionVault,
) -> Session {
    let language = params
        .language
        .as_deref()
        .map(Language::from_tag)
        .unwrap_or_default();
    let mut session = Session::anonymous(params.session_id, language);

    if let Some(token) = params.token.as_deref() {
        match verifier.verify(token) {
            Ok(identity) => {
                debug!(user_id = %identity.user_id, "handshake authenticated");
                session.user_id = Some(identity.user_id);
                session.user_role = identity.role;
                session.authenticated = true;
                // The reconnection token, if any, is left unconsumed; the
                // vault sweeper expires it.
                return session;
            }
            Err(error) => {
                warn!(%error, "handshake token rejected, trying remaining credentials");
            }
        }
    }

    if let Some(token) = params.reconnection_token.as_deref() {
        if let Some(snapshot) = vault.consume(token).await {
            debug!(session_id = %session.session_id, "session restored from reconnection token");
            session.user_id = snapshot.user_id;
            session.user_role = snapshot.user_role;
            session.authenticated = snapshot.authenticated;
            session.conversation_id = snapshot.conversation_id;
            // An explicit language hint on the new handshake wins.
            if params.language.is_none() {
                session.language = snapshot.language;
            }
            return session;
        }
        warn!(session_id = %session.session_id, "invalid or expired reconnection token");
    }

    session
}

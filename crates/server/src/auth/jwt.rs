use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lexhub_common::types::UserRole;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const IDENTITY_TOKEN_TTL_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    iat: i64,
    exp: i64,
}

/// Identity extracted from a valid handshake token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: String,
    /// `None` when the token carries no role or an unrecognized one.
    pub role: Option<UserRole>,
}

#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Issue an identity token. Production tokens come from the identity
    /// provider; this exists for local development and tests.
    pub fn issue_token(&self, user_id: &str, role: Option<UserRole>) -> anyhow::Result<String> {
        self.issue_token_at(user_id, role, current_unix_timestamp()?)
    }

    fn issue_token_at(
        &self,
        user_id: &str,
        role: Option<UserRole>,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = IdentityClaims {
            sub: user_id.to_string(),
            role: role.map(|role| match role {
                UserRole::Client => "CLIENT".to_string(),
                UserRole::Attorney => "ATTORNEY".to_string(),
                UserRole::Admin => "ADMIN".to_string(),
            }),
            iat: issued_at,
            exp: issued_at + IDENTITY_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode identity token")
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<TokenIdentity> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode identity token")?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(anyhow!("identity token subject is empty"));
        }

        let role = claims.role.as_deref().and_then(UserRole::from_claim);
        Ok(TokenIdentity { user_id: claims.sub, role })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, JwtVerifier, IDENTITY_TOKEN_TTL_SECONDS};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use lexhub_common::types::UserRole;
    use serde::Serialize;

    const TEST_SECRET: &str = "lexhub_test_secret_that_is_definitely_long_enough";

    #[test]
    fn issues_and_verifies_identity_tokens() {
        let verifier = JwtVerifier::new(TEST_SECRET).expect("verifier should initialize");

        let token = verifier
            .issue_token("user-1", Some(UserRole::Attorney))
            .expect("token should be issued");
        let identity = verifier.verify(&token).expect("token should verify");

        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.role, Some(UserRole::Attorney));
    }

    #[test]
    fn unknown_roles_degrade_to_none() {
        #[derive(Serialize)]
        struct Claims {
            sub: String,
            role: String,
            iat: i64,
            exp: i64,
        }

        let now = current_unix_timestamp().unwrap();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Claims {
                sub: "user-1".to_string(),
                role: "PARALEGAL".to_string(),
                iat: now,
                exp: now + IDENTITY_TOKEN_TTL_SECONDS,
            },
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();

        let verifier = JwtVerifier::new(TEST_SECRET).unwrap();
        let identity = verifier.verify(&token).expect("token should verify");
        assert_eq!(identity.role, None);
    }

    #[test]
    fn rejects_tampered_tokens() {
        let verifier = JwtVerifier::new(TEST_SECRET).unwrap();
        let token = verifier.issue_token("user-1", None).unwrap();

        let mut tampered = token.clone();
        tampered.replace_range(tampered.len() - 2.., "xx");
        assert!(verifier.verify(&tampered).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let verifier = JwtVerifier::new(TEST_SECRET).unwrap();
        let issued_at = current_unix_timestamp().unwrap() - IDENTITY_TOKEN_TTL_SECONDS - 10;
        let token = verifier.issue_token_at("user-1", None, issued_at).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_tokens_signed_with_a_different_secret() {
        let issuer =
            JwtVerifier::new("another_secret_that_is_also_long_enough_ok").unwrap();
        let verifier = JwtVerifier::new(TEST_SECRET).unwrap();

        let token = issuer.issue_token("user-1", None).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn short_secrets_are_refused() {
        assert!(JwtVerifier::new("too-short").is_err());
    }
}

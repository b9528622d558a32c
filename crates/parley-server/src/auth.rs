//! Handshake authentication.
//!
//! Clients open `/ws?userId=<id>&token=<jwt>`. The token is an HS256 JWT
//! carrying `{user_id, username, exp}`; it must verify and must belong to the
//! requested user id.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parley_core::UserId;
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

/// Who a verified token belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated user.
    pub user_id: UserId,
    /// Display name from the token.
    pub username: String,
}

/// Verifies bearer tokens.
#[cfg_attr(test, mockall::automock)]
pub trait Authenticator: Send + Sync {
    /// Check `token` and return the identity it was issued to.
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// JWT claim set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id.
    pub user_id: i64,
    /// Subject display name.
    pub username: String,
    /// Expiry (unix seconds).
    pub exp: u64,
}

/// HS256 JWT verifier.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Verifier for tokens signed with `secret`, tolerating `leeway_secs` of skew.
    pub fn new(secret: &[u8], leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Identity {
            user_id: UserId::new(data.claims.user_id),
            username: data.claims.username,
        })
    }
}

/// Sign `claims` with `secret` (HS256). Used by token issuers and tests.
pub fn issue_token(secret: &[u8], claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    jsonwebtoken::encode(&Header::default(), claims, &EncodingKey::from_secret(secret))
}

/// Query string of the WebSocket handshake.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    /// Requested user id (string so a malformed value is reported, not rejected by the extractor).
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
}

/// Validate a handshake.
///
/// Checks run in order: token present, token valid, user id present, user id
/// matches the token.
pub fn authorize_handshake(
    query: &HandshakeQuery,
    auth: &dyn Authenticator,
) -> Result<Identity, AuthError> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let identity = auth.verify(token)?;
    let requested: UserId = query
        .user_id
        .as_deref()
        .and_then(|raw| raw.parse().ok())
        .ok_or(AuthError::MissingUserId)?;
    if identity.user_id != requested {
        return Err(AuthError::UserMismatch {
            claimed: identity.user_id,
            requested,
        });
    }
    Ok(identity)
}

//! `/history` read endpoint.
//!
//! `GET /history?token=<jwt>&peer=<id>|group=<id>|assistant=true&start=&end=&reverse=`
//!
//! Ranks are inclusive and may be negative (counted from the newest entry).
//! `reverse=true` returns newest first. The caller must be a party to the
//! conversation: one side of a direct chat, a member of the group, or the
//! owner of the assistant log.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parley_core::{GroupId, HistoryKey, UserId};
use parley_history::{HistoryStore, StoreError, fetch};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use crate::auth::Authenticator;
use crate::errors::{AuthError, MembershipError};
use crate::membership::GroupMembership;

/// Query string of a history read.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryQuery {
    /// Bearer token of the caller.
    pub token: Option<String>,
    /// Other side of a direct conversation.
    pub peer: Option<i64>,
    /// Group conversation.
    pub group: Option<i64>,
    /// The caller's own assistant conversation.
    #[serde(default)]
    pub assistant: bool,
    /// First rank (inclusive).
    #[serde(default)]
    pub start: i64,
    /// Last rank (inclusive).
    #[serde(default = "default_end")]
    pub end: i64,
    /// Newest first.
    #[serde(default)]
    pub reverse: bool,
}

fn default_end() -> i64 {
    -1
}

/// History read failures, mapped onto HTTP statuses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401.
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    /// 400.
    #[error("{0}")]
    BadRequest(&'static str),
    /// 403.
    #[error("not a participant in this conversation")]
    Forbidden,
    /// 503.
    #[error(transparent)]
    Membership(#[from] MembershipError),
    /// 503.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Membership(_) | Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "history read failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Authenticate, authorize and read one page of history.
///
/// Stored frames are returned as JSON values in the requested order.
pub async fn read_history(
    query: &HistoryQuery,
    auth: &dyn Authenticator,
    history: &dyn HistoryStore,
    groups: &dyn GroupMembership,
) -> Result<Vec<Value>, ApiError> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let caller = auth.verify(token)?.user_id;

    let key = match (query.peer, query.group, query.assistant) {
        (Some(peer), None, false) => HistoryKey::direct(caller, UserId::new(peer)),
        (None, Some(group), false) => {
            let group = GroupId::new(group);
            if !groups.members_of(group).await?.contains(&caller) {
                return Err(ApiError::Forbidden);
            }
            HistoryKey::group(group)
        }
        (None, None, true) => HistoryKey::assistant(caller),
        (None, None, false) => {
            return Err(ApiError::BadRequest("one of peer, group or assistant is required"));
        }
        _ => return Err(ApiError::BadRequest("peer, group and assistant are exclusive")),
    };

    let frames = fetch(history, &key, query.start, query.end, query.reverse).await?;
    Ok(frames
        .iter()
        .map(|frame| {
            serde_json::from_str(frame.as_str()).unwrap_or_else(|_| Value::String(frame.to_string()))
        })
        .collect())
}

use axum::Json;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Header the chat server sets on integration callbacks it proxies.
pub const CHAT_USER_HEADER: &str = "Mattermost-User-ID";

/// Chat user id taken from [`CHAT_USER_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser(pub String);

pub async fn require_chat_user(mut request: Request, next: Next) -> Response {
    let user_id = request
        .headers()
        .get(CHAT_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string);

    let Some(user_id) = user_id else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "not authorized"})),
        )
            .into_response();
    };

    request.extensions_mut().insert(ChatUser(user_id));
    next.run(request).await
}

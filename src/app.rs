use crate::chat::ChatPlatform;
use crate::client::IncidentApi;
use crate::config::{Config, ConfigHandle};
use crate::correlator::{Correlator, NotificationTarget};
use crate::dispatcher::{ActionDispatcher, ActionOutcome};
use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::middleware::{ChatUser, require_chat_user};
use crate::sources::{ValidationError, pagerduty};
use crate::store::NotificationStore;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use incident_core::events::NormalizedBatch;
use incident_core::model::{ActionKind, ActionRequest, User};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_LIST_LIMIT: u32 = 10;
const MAX_LIST_LIMIT: u32 = 25;

#[derive(Clone)]
pub struct AppState {
    config: ConfigHandle,
    channel_id: String,
    correlator: Correlator,
    dispatcher: ActionDispatcher,
    incidents: Arc<dyn IncidentApi>,
    chat: Arc<dyn ChatPlatform>,
    store: NotificationStore,
    metrics: Metrics,
}

impl AppState {
    /// `channel_id` is the already resolved destination for new notifications.
    pub fn new(
        config: ConfigHandle,
        channel_id: String,
        incidents: Arc<dyn IncidentApi>,
        chat: Arc<dyn ChatPlatform>,
        store: NotificationStore,
        metrics: Metrics,
    ) -> Self {
        let correlator = Correlator::new(chat.clone(), store.clone());
        let dispatcher = ActionDispatcher::new(incidents.clone(), correlator.clone());

        Self {
            config,
            channel_id,
            correlator,
            dispatcher,
            incidents,
            chat,
            store,
            metrics,
        }
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    fn target(&self, config: &Config) -> NotificationTarget {
        NotificationTarget {
            channel_id: self.channel_id.clone(),
            public_url: config.public_url.clone(),
        }
    }
}

/// Builds the HTTP router. Connection-level layers such as per-IP rate
/// limiting are added by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    let max_payload_bytes = state.config.current().max_payload_bytes;

    let api = Router::new()
        .route("/incidents", get(list_incidents))
        .route("/incidents/{incident_id}", get(get_incident))
        .route("/incidents/{incident_id}/{action}", post(incident_action))
        .route_layer(axum::middleware::from_fn(require_chat_user));

    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(max_payload_bytes))
        .with_state(state)
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let config = state.config.current();

    if let Some(secret) = config.pagerduty_webhook_secret.as_deref() {
        if let Err(rejection) = pagerduty::validate(secret, &headers, &body) {
            warn!(
                reason = ?rejection,
                enforced = config.pagerduty_enforce_signature,
                "webhook signature verification failed"
            );
            if config.pagerduty_enforce_signature {
                state.metrics.inc_dropped("bad_signature");
                return validation_response(rejection);
            }
        }
    }

    let payload = match pagerduty::decode(&body) {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(reason = ?rejection, "rejecting malformed webhook payload");
            state.metrics.inc_dropped("malformed");
            return validation_response(rejection);
        }
    };

    let shape = payload.shape();
    let message_count = payload.message_count();
    state.metrics.inc_received(shape);

    let NormalizedBatch { events, malformed } = match payload.into_batch() {
        Ok(batch) => batch,
        Err(error) => {
            warn!(shape, error = %error, "rejecting webhook with undecodable incident");
            state.metrics.inc_dropped("malformed");
            return error_response(&RelayError::from(error));
        }
    };

    for _ in 0..malformed {
        state.metrics.inc_dropped("malformed");
    }
    for _ in (events.len() + malformed)..message_count {
        state.metrics.inc_dropped("ignored_event");
    }

    let target = state.target(&config);
    for event in &events {
        match state.correlator.handle(event, &target).await {
            Ok(outcome) => {
                state.metrics.inc_notification(outcome.as_str());
                info!(
                    event_id = %event.id,
                    event_type = event.kind.as_str(),
                    incident_id = %event.incident.id,
                    message_id = outcome.message_id(),
                    outcome = outcome.as_str(),
                    "processed incident event"
                );
            }
            Err(error) => {
                state.metrics.inc_notification("failed");
                error!(
                    event_id = %event.id,
                    event_type = event.kind.as_str(),
                    incident_id = %event.incident.id,
                    error = %error,
                    "failed to process incident event"
                );
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "failed to process webhook"})),
                )
                    .into_response();
            }
        }
    }

    StatusCode::OK.into_response()
}

/// Callback body. Plain clients send the fields at the top level; chat
/// integrations nest the control context and the chosen select option.
#[derive(Debug, Default, Deserialize)]
struct ActionCallback {
    #[serde(default)]
    incident_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    assignee_id: Option<String>,
    #[serde(default)]
    context: CallbackContext,
}

#[derive(Debug, Default, Deserialize)]
struct CallbackContext {
    #[serde(default)]
    incident_id: String,
    #[serde(default)]
    selected_option: Option<String>,
}

async fn incident_action(
    State(state): State<Arc<AppState>>,
    Path((incident_id, action)): Path<(String, String)>,
    Extension(ChatUser(header_user)): Extension<ChatUser>,
    body: Bytes,
) -> Response {
    let action_label = action
        .parse::<ActionKind>()
        .map(ActionKind::as_str)
        .unwrap_or("invalid");

    let callback: ActionCallback = if body.is_empty() {
        ActionCallback::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(callback) => callback,
            Err(error) => {
                state.metrics.inc_action(action_label, "bad_request");
                return error_response(&RelayError::Decode(format!(
                    "invalid action body: {error}"
                )));
            }
        }
    };

    let body_incident = if callback.incident_id.is_empty() {
        callback.context.incident_id.as_str()
    } else {
        callback.incident_id.as_str()
    };
    if !body_incident.is_empty() && body_incident != incident_id {
        state.metrics.inc_action(action_label, "bad_request");
        return error_response(&RelayError::InvalidAction(
            "incident id in body does not match path".to_string(),
        ));
    }

    // The header is set by the chat server; the body is caller-controlled.
    if !callback.user_id.is_empty() && callback.user_id != header_user {
        state.metrics.inc_action(action_label, "forbidden");
        warn!(
            incident_id = %incident_id,
            header_user = %header_user,
            body_user = %callback.user_id,
            "rejecting action for a user other than the caller"
        );
        return error_response(&RelayError::Forbidden(
            "user id in body does not match the calling user".to_string(),
        ));
    }

    let request = ActionRequest {
        incident_id,
        action,
        user_id: header_user,
        assignee_id: callback.assignee_id.or(callback.context.selected_option),
    };

    match run_action(&state, &request).await {
        Ok(ActionOutcome::Updated(_)) => {
            state.metrics.inc_action(action_label, "success");
            (StatusCode::OK, Json(json!({"status": "success"}))).into_response()
        }
        Ok(ActionOutcome::Candidates(users)) => {
            state.metrics.inc_action(action_label, "listed");
            (StatusCode::OK, Json(candidate_update(&users))).into_response()
        }
        Err(error) => {
            state.metrics.inc_action(action_label, "error");
            warn!(
                incident_id = %request.incident_id,
                action = %request.action,
                user_id = %request.user_id,
                error = %error,
                "incident action failed"
            );
            error_response(&error)
        }
    }
}

async fn run_action(state: &AppState, request: &ActionRequest) -> Result<ActionOutcome, RelayError> {
    // Validate before spending a chat lookup on the acting user.
    request
        .action
        .parse::<ActionKind>()
        .map_err(|_| RelayError::InvalidAction(format!("unsupported action {:?}", request.action)))?;

    let acting_email = if request.wants_candidate_list() {
        String::new()
    } else {
        state.chat.user_email(&request.user_id).await?
    };

    let config = state.config.current();
    state
        .dispatcher
        .dispatch(request, &acting_email, &state.target(&config))
        .await
}

/// Select-option update returned to the chat platform for `fetch_users`.
pub fn candidate_update(users: &[User]) -> Value {
    let options: Vec<Value> = users
        .iter()
        .map(|user| json!({"text": user.name, "value": user.id}))
        .collect();

    json!({
        "update": {
            "props": {
                "attachments": [{
                    "actions": [{
                        "id": ActionKind::Reassign.as_str(),
                        "name": "Reassign",
                        "type": "select",
                        "options": options,
                    }]
                }]
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub urgency: Option<String>,
    pub service: Option<String>,
    pub limit: Option<String>,
}

/// Translates list query parameters into incident service filters.
pub fn list_filters(query: &ListQuery) -> Vec<(String, String)> {
    let limit = query
        .limit
        .as_deref()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|limit| *limit > 0)
        .map(|limit| limit.min(MAX_LIST_LIMIT))
        .unwrap_or(DEFAULT_LIST_LIMIT);

    let mut filters = vec![("limit".to_string(), limit.to_string())];
    let optional = [
        ("statuses[]", &query.status),
        ("urgencies[]", &query.urgency),
        ("service_ids[]", &query.service),
    ];
    for (key, value) in optional {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            filters.push((key.to_string(), value.to_string()));
        }
    }
    filters
}

async fn list_incidents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.incidents.list(&list_filters(&query)).await {
        Ok(incidents) => (StatusCode::OK, Json(json!({"incidents": incidents}))).into_response(),
        Err(error) => {
            error!(error = %error, "failed to list incidents");
            error_response(&error)
        }
    }
}

async fn get_incident(
    State(state): State<Arc<AppState>>,
    Path(incident_id): Path<String>,
) -> Response {
    match state.incidents.get(&incident_id).await {
        Ok(incident) => (StatusCode::OK, Json(incident)).into_response(),
        Err(error) => {
            if !error.is_not_found() {
                error!(incident_id = %incident_id, error = %error, "failed to get incident");
            }
            error_response(&error)
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(error) = state.store.ping() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready", "reason": error.to_string()})),
        );
    }

    let config = state.config.current();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "bind": config.bind_addr,
            "channel_id": state.channel_id,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(error) => {
            error!(error = %error, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn validation_response(rejection: ValidationError) -> Response {
    match rejection {
        ValidationError::Unauthorized(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response(),
        ValidationError::BadRequest(message) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
        }
    }
}

fn error_response(error: &RelayError) -> Response {
    (error.status_code(), Json(json!({"error": error.to_string()}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::fakes::{ApiCall, FakeIncidentApi, RecordingChat};
    use crate::middleware::CHAT_USER_HEADER;
    use crate::store::MemoryKvStore;
    use axum::body::Body;
    use axum::http::Request;
    use incident_core::signatures::sign;
    use tower::ServiceExt;

    struct Harness {
        api: FakeIncidentApi,
        chat: RecordingChat,
        state: Arc<AppState>,
    }

    fn harness(config: Config) -> Harness {
        let api = FakeIncidentApi::with_users(vec![User {
            id: "U1".to_string(),
            name: "Ada".to_string(),
            email: None,
        }]);
        let chat = RecordingChat::default();
        let state = Arc::new(AppState::new(
            ConfigHandle::new(config),
            "chan-1".to_string(),
            Arc::new(api.clone()),
            Arc::new(chat.clone()),
            NotificationStore::new(Arc::new(MemoryKvStore::new())),
            Metrics::new().expect("metrics"),
        ));
        Harness { api, chat, state }
    }

    fn webhook_body(event_type: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": {
                "id": "EVT1",
                "event_type": event_type,
                "resource_type": "incident",
                "data": {"id": "INC1", "number": 42, "title": "Checkout errors",
                          "status": "triggered", "urgency": "high"}
            }
        }))
        .expect("encode")
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = router(state.clone()).oneshot(request).await.expect("response");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, body)
    }

    fn post_webhook(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::post("/webhook").header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(pagerduty::SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body)).expect("request")
    }

    fn post_action(path: &str, body: Value) -> Request<Body> {
        Request::post(path)
            .header(CHAT_USER_HEADER, "mm-user")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn webhook_success_has_empty_body() {
        let h = harness(test_config());
        let (status, body) = send(&h.state, post_webhook(webhook_body("incident.triggered"), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(h.chat.posted_count(), 1);
    }

    #[tokio::test]
    async fn unrecognized_event_is_accepted_without_posting() {
        let h = harness(test_config());
        let (status, _) = send(&h.state, post_webhook(webhook_body("incident.annotated"), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.chat.posted_count(), 0);
    }

    #[tokio::test]
    async fn bad_signature_is_only_logged_unless_enforced() {
        let mut config = test_config();
        config.pagerduty_webhook_secret = Some("pd-secret".to_string());
        let h = harness(config.clone());
        let (status, _) = send(
            &h.state,
            post_webhook(webhook_body("incident.triggered"), Some("v1=bad".to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        config.pagerduty_enforce_signature = true;
        let h = harness(config);
        let (status, _) = send(
            &h.state,
            post_webhook(webhook_body("incident.triggered"), Some("v1=bad".to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(h.chat.posted_count(), 0);

        let body = webhook_body("incident.triggered");
        let signature = sign("pd-secret", &body);
        let (status, _) = send(&h.state, post_webhook(body, Some(signature))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn action_routes_require_chat_user() {
        let h = harness(test_config());
        let request = Request::post("/api/v1/incidents/INC1/acknowledge")
            .body(Body::from("{}"))
            .expect("request");
        let (status, _) = send(&h.state, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_action_is_bad_request_without_remote_calls() {
        let h = harness(test_config());
        let (status, body) = send(
            &h.state,
            post_action("/api/v1/incidents/INC1/launch_missiles", json!({})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).expect("json");
        assert!(body["error"].as_str().unwrap_or_default().contains("launch_missiles"));
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn fetch_users_returns_select_options() {
        let h = harness(test_config());
        let (status, body) = send(
            &h.state,
            post_action(
                "/api/v1/incidents/INC1/reassign",
                json!({"incident_id": "INC1", "assignee_id": "fetch_users"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).expect("json");
        let action = &body["update"]["props"]["attachments"][0]["actions"][0];
        assert_eq!(action["type"], "select");
        assert_eq!(action["options"], json!([{"text": "Ada", "value": "U1"}]));
        assert_eq!(h.api.calls(), vec![ApiCall::ListUsers]);
    }

    #[tokio::test]
    async fn selected_option_from_chat_context_is_the_assignee() {
        let h = harness(test_config());
        let (status, _) = send(
            &h.state,
            post_action(
                "/api/v1/incidents/INC1/reassign",
                json!({"user_id": "mm-user", "context": {"incident_id": "INC1", "selected_option": "U1"}}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            h.api.calls(),
            vec![ApiCall::Assign {
                incident_id: "INC1".to_string(),
                assignee_ids: vec!["U1".to_string()],
                email: "mm-user@example.com".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn action_for_another_user_is_forbidden() {
        let h = harness(test_config());
        let (status, body) = send(
            &h.state,
            post_action("/api/v1/incidents/INC1/resolve", json!({"user_id": "victim"})),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        let body: Value = serde_json::from_slice(&body).expect("json");
        assert!(body["error"].as_str().unwrap_or_default().contains("calling user"));
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn action_without_body_user_acts_as_header_user() {
        let h = harness(test_config());
        let (status, _) = send(
            &h.state,
            post_action("/api/v1/incidents/INC1/resolve", json!({"incident_id": "INC1"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            h.api.calls(),
            vec![ApiCall::Update {
                incident_id: "INC1".to_string(),
                status: incident_core::model::IncidentStatus::Resolved,
                email: "mm-user@example.com".to_string(),
                note: String::new(),
            }]
        );
    }

    #[tokio::test]
    async fn legacy_batch_posts_valid_messages_past_a_malformed_one() {
        let h = harness(test_config());
        let body = serde_json::to_vec(&json!({
            "messages": [
                {"id": "M1", "event": "incident.trigger", "incident": {"id": "BAD"}},
                {"id": "M2", "event": "incident.trigger",
                 "incident": {"id": "INC2", "incident_number": 7, "title": "Queue backlog",
                              "status": "triggered", "urgency": "low"}}
            ]
        }))
        .expect("encode");

        let (status, _) = send(&h.state, post_webhook(body, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.chat.posted_count(), 1);

        let (_, metrics) = send(
            &h.state,
            Request::get("/metrics").body(Body::empty()).expect("request"),
        )
        .await;
        let text = String::from_utf8(metrics.to_vec()).expect("utf-8");
        assert!(text.contains("pagerduty_relay_events_dropped_total{reason=\"malformed\"} 1"));
        assert!(!text.contains("reason=\"ignored_event\""));
    }

    #[tokio::test]
    async fn mismatched_incident_id_is_rejected() {
        let h = harness(test_config());
        let (status, _) = send(
            &h.state,
            post_action("/api/v1/incidents/INC1/resolve", json!({"incident_id": "INC9"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn list_passes_translated_filters() {
        let h = harness(test_config());
        let request = Request::get("/api/v1/incidents?status=triggered&urgency=high&limit=99")
            .header(CHAT_USER_HEADER, "mm-user")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(&h.state, request).await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(body["incidents"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            h.api.calls(),
            vec![ApiCall::List(vec![
                ("limit".to_string(), "25".to_string()),
                ("statuses[]".to_string(), "triggered".to_string()),
                ("urgencies[]".to_string(), "high".to_string()),
            ])]
        );
    }

    #[test]
    fn list_limit_defaults_when_missing_or_invalid() {
        for limit in [None, Some("0"), Some("abc")] {
            let query = ListQuery {
                limit: limit.map(ToString::to_string),
                ..ListQuery::default()
            };
            assert_eq!(
                list_filters(&query),
                vec![("limit".to_string(), "10".to_string())]
            );
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_counters() {
        let h = harness(test_config());
        send(&h.state, post_webhook(webhook_body("incident.triggered"), None)).await;

        let (status, body) = send(
            &h.state,
            Request::get("/metrics").body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body.to_vec()).expect("utf-8");
        assert!(text.contains("pagerduty_relay_notifications_total{outcome=\"created\"} 1"));
    }
}

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;

use crate::application::{Accumulator, AppResult, DebounceGate};
use crate::domain::ScopeId;

#[derive(Clone)]
pub struct ApiState {
    pub accumulator: Accumulator,
    pub gate: Arc<DebounceGate>,
    pub api_token: Option<String>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scopes/{scope}", get(scope_status))
        .route("/scopes/{scope}/reset", post(reset_scope))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Serialize)]
pub struct ScopeStatus {
    pub scope: String,
    pub score: u64,
    pub pending_events: u64,
    pub debounce_locked: bool,
    pub threshold: u64,
}

async fn load_status(state: &ApiState, scope: &ScopeId) -> AppResult<ScopeStatus> {
    Ok(ScopeStatus {
        scope: scope.to_string(),
        score: state.accumulator.get(scope).await?,
        pending_events: state.accumulator.pending(scope).await?,
        debounce_locked: state.gate.is_locked(scope).await?,
        threshold: state.gate.threshold(),
    })
}

async fn scope_status(
    State(state): State<ApiState>,
    Path(scope): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    match load_status(&state, &ScopeId::new(scope)).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {e}")).into_response(),
    }
}

/// Operator override: zero the counter without dispatching. The pending
/// batch is kept and goes out with the next notification.
async fn reset_scope(
    State(state): State<ApiState>,
    Path(scope): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    let scope = ScopeId::new(scope);
    if let Err(e) = state.accumulator.reset_to_zero(&scope).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {e}")).into_response();
    }
    match load_status(&state, &scope).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {e}")).into_response(),
    }
}

fn check_auth(headers: &HeaderMap, token: &Option<String>) -> Result<(), (StatusCode, String)> {
    let Some(expected) = token else {
        return Ok(());
    };
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if auth == format!("Bearer {}", expected) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthorized".to_string()))
    }
}

pub async fn serve(
    listen: &str,
    state: ApiState,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(%listen, "admin api listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::application::{
        GateSettings, Outbox, SharedStore, SystemClock, TtlMutex,
    };
    use crate::domain::{InboundEvent, KeySpace};
    use crate::infrastructure::log_sink::LogDispatchSink;
    use crate::infrastructure::memory_store::InMemorySharedStore;

    fn state(api_token: Option<&str>) -> ApiState {
        let store: Arc<dyn SharedStore> = Arc::new(InMemorySharedStore::new());
        let keys = KeySpace::new("api");
        let accumulator = Accumulator::new(store.clone(), keys.clone(), Duration::from_secs(60));
        let gate = Arc::new(DebounceGate::new(
            accumulator.clone(),
            TtlMutex::new(store.clone()),
            Arc::new(LogDispatchSink::new()),
            Outbox::new(store, keys.outbox()),
            Arc::new(SystemClock),
            GateSettings {
                threshold: 10,
                window: Duration::from_secs(60),
                dispatch_timeout: Duration::from_secs(1),
            },
        ));
        ApiState {
            accumulator,
            gate,
            api_token: api_token.map(str::to_string),
        }
    }

    fn mail(id: &str) -> InboundEvent {
        InboundEvent {
            id: id.to_string(),
            scope_id: "alice".to_string(),
            sender: None,
            recipients: vec![],
            subject: None,
            sent_at: None,
            has_attachments: false,
        }
    }

    async fn call(state: &ApiState, req: Request<Body>) -> (StatusCode, Value) {
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn scope_status_reports_score_and_pending_batch() {
        let st = state(None);
        let scope = ScopeId::new("alice");
        st.accumulator.record(&scope, &mail("m1"), 5).await.unwrap();
        st.accumulator.record(&scope, &mail("m2"), 2).await.unwrap();

        let (code, body) = call(&st, get_req("/scopes/alice")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["scope"], "alice");
        assert_eq!(body["score"], 7);
        assert_eq!(body["pending_events"], 2);
        assert_eq!(body["debounce_locked"], false);
        assert_eq!(body["threshold"], 10);
    }

    #[tokio::test]
    async fn reset_zeroes_counter_and_keeps_batch() {
        let st = state(None);
        let scope = ScopeId::new("alice");
        st.accumulator.record(&scope, &mail("m1"), 5).await.unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/scopes/alice/reset")
            .body(Body::empty())
            .unwrap();
        let (code, body) = call(&st, req).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["score"], 0);
        assert_eq!(body["pending_events"], 1);
        assert_eq!(st.accumulator.get(&scope).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bearer_token_is_enforced_except_on_health() {
        let st = state(Some("s3cret"));

        let (code, _) = call(&st, get_req("/scopes/alice")).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .uri("/scopes/alice")
            .header("authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&st, wrong).await.0, StatusCode::UNAUTHORIZED);

        let reset = Request::builder()
            .method("POST")
            .uri("/scopes/alice/reset")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&st, reset).await.0, StatusCode::UNAUTHORIZED);

        let ok = Request::builder()
            .uri("/scopes/alice")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&st, ok).await.0, StatusCode::OK);

        assert_eq!(call(&st, get_req("/health")).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn status_shows_held_debounce_lock() {
        let st = state(None);
        let scope = ScopeId::new("alice");
        st.accumulator.record(&scope, &mail("m1"), 12).await.unwrap();
        st.gate.observe(&scope, 12).await.unwrap();

        let (_, body) = call(&st, get_req("/scopes/alice")).await;
        assert_eq!(body["debounce_locked"], true);
        assert_eq!(body["score"], 0);
    }
}

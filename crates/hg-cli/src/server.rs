use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hg_engine::{AnalysisError, AnalysisGateway, FeedbackChannel, GatewayReply, PromptComposer};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

/// Encoded images reach ~6.7 MiB at the provider's 5 MiB ceiling.
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

pub struct ServerState {
    pub gateway: AnalysisGateway,
    pub feedback: FeedbackChannel,
}

type SharedState = Arc<ServerState>;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/modes", get(modes_handler))
        .route("/api/lenses", get(lenses_handler))
        .route("/api/analyze-artwork", post(analyze_handler))
        .route("/api/submit-feedback", post(feedback_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: SharedState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local = listener.local_addr().context("failed to read local address")?;
    log::info!(
        "Hidden Grammar server listening on http://{local} (provider {}, model {})",
        state.gateway.provider_name(),
        state.gateway.model()
    );
    if !state.gateway.credential_present() {
        log::warn!(
            "{} credentials are missing; analysis requests will fail",
            state.gateway.provider_name()
        );
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {err}");
        return;
    }
    log::info!("shutting down");
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn modes_handler(State(state): State<SharedState>) -> Json<Value> {
    Json(modes_catalog(state.gateway.composer()))
}

async fn lenses_handler(State(state): State<SharedState>) -> Json<Value> {
    Json(lenses_catalog(state.gateway.composer()))
}

async fn analyze_handler(State(state): State<SharedState>, body: Bytes) -> Response {
    let body = match serde_json::from_slice::<Value>(&body) {
        Ok(body) => body,
        Err(err) => {
            let err = AnalysisError::Validation(format!("Request body must be valid JSON: {err}"));
            return reply_response(state.gateway.error_reply(&err));
        }
    };
    let worker = state.clone();
    match tokio::task::spawn_blocking(move || worker.gateway.handle_analyze(&body)).await {
        Ok(reply) => reply_response(reply),
        Err(err) => {
            log::error!("analysis worker failed: {err}");
            reply_response(GatewayReply {
                status: 500,
                body: json!({
                    "error": "Failed to analyze artwork",
                    "details": err.to_string(),
                    "credentialPresent": state.gateway.credential_present(),
                }),
            })
        }
    }
}

/// Any body is acknowledged; unparseable ones are logged and dropped.
async fn feedback_handler(State(state): State<SharedState>, body: Bytes) -> Response {
    let body = serde_json::from_slice::<Value>(&body).unwrap_or_else(|err| {
        log::warn!("feedback body is not JSON: {err}");
        Value::Null
    });
    let worker = state.clone();
    match tokio::task::spawn_blocking(move || worker.feedback.handle_submit(&body)).await {
        Ok(reply) => reply_response(reply),
        Err(err) => {
            log::error!("feedback worker failed: {err}");
            reply_response(GatewayReply::ok(json!({ "success": true })))
        }
    }
}

fn reply_response(reply: GatewayReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.body)).into_response()
}

/// Categories with their modes, sub-modes and context fields.
pub fn modes_catalog(composer: &PromptComposer) -> Value {
    let modes = composer.modes();
    let categories = modes
        .categories()
        .iter()
        .map(|category| {
            let members = modes.by_category(&category.id);
            let fields = members
                .first()
                .map(|mode| mode.fields.clone())
                .unwrap_or_default();
            let submodes = members
                .first()
                .map(|mode| mode.submodes.clone())
                .unwrap_or_default();
            json!({
                "id": category.id,
                "label": category.label,
                "description": category.description,
                "fields": fields,
                "subModes": submodes,
                "modes": members
                    .iter()
                    .map(|mode| json!({
                        "id": mode.id,
                        "label": mode.label,
                        "description": mode.description,
                        "gating": mode.gating.as_str(),
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect::<Vec<_>>();
    json!({ "categories": categories })
}

pub fn lenses_catalog(composer: &PromptComposer) -> Value {
    let groups = composer
        .lenses()
        .grouped()
        .into_iter()
        .map(|(category, lenses)| {
            json!({
                "id": category.id,
                "name": category.name,
                "lenses": lenses
                    .iter()
                    .map(|lens| json!({
                        "id": lens.id,
                        "name": lens.name,
                        "thinker": lens.thinker,
                        "tagline": lens.tagline,
                        "requiresIntent": lens.requires_intent(),
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect::<Vec<_>>();
    json!({ "categories": groups })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use hg_engine::providers::{DryrunProvider, VisionProviderRegistry};
    use hg_engine::{AnalysisGateway, FeedbackChannel, GatewayReply, PromptComposer};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{lenses_catalog, modes_catalog, reply_response, router, ServerState};

    const PNG_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    fn dryrun_state() -> anyhow::Result<Arc<ServerState>> {
        let mut providers = VisionProviderRegistry::new();
        providers.register(DryrunProvider);
        let gateway = AnalysisGateway::new(
            PromptComposer::builtin()?,
            providers,
            "dryrun",
            "dryrun-vision-1",
            512,
        )?;
        Ok(Arc::new(ServerState {
            gateway,
            feedback: FeedbackChannel::disabled(),
        }))
    }

    fn post(uri: &str, content_type: Option<&str>, body: &str) -> anyhow::Result<Request<Body>> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        Ok(builder.body(Body::from(body.to_string()))?)
    }

    async fn json_body(response: Response) -> anyhow::Result<Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn feedback_always_acknowledges() -> anyhow::Result<()> {
        let app = router(dryrun_state()?);
        let cases = [
            (Some("application/json"), "{not json"),
            (None, "{}"),
            (Some("text/plain"), "five stars"),
            (Some("application/json"), r#"{"rating": 4, "sessionId": "s-1"}"#),
        ];
        for (content_type, body) in cases {
            let response = app
                .clone()
                .oneshot(post("/api/submit-feedback", content_type, body)?)
                .await?;
            assert_eq!(response.status(), StatusCode::OK, "body {body:?}");
            assert_eq!(json_body(response).await?, json!({"success": true}));
        }
        Ok(())
    }

    #[tokio::test]
    async fn malformed_analyze_body_is_a_json_400() -> anyhow::Result<()> {
        let app = router(dryrun_state()?);
        let response = app
            .clone()
            .oneshot(post("/api/analyze-artwork", Some("application/json"), "{bad")?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await?;
        assert!(body["error"]
            .as_str()
            .unwrap_or_default()
            .contains("Request body must be valid JSON"));

        let not_object = app
            .oneshot(post("/api/analyze-artwork", None, "\"just text\"")?)
            .await?;
        assert_eq!(not_object.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(not_object).await?["error"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn analyze_route_runs_dryrun_provider() -> anyhow::Result<()> {
        let app = router(dryrun_state()?);
        let body = json!({
            "image": PNG_DATA_URL,
            "promptId": "fine-art-comprehensive",
            "fields": {"artist": "Test Artist"},
        })
        .to_string();
        let response = app
            .clone()
            .oneshot(post("/api/analyze-artwork", None, &body)?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let reply = json_body(response).await?;
        assert_eq!(reply["success"], json!(true));
        assert!(reply["analysis"].as_str().unwrap_or_default().contains("<h2>"));

        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(health.status(), StatusCode::OK);
        Ok(())
    }

    #[test]
    fn reply_status_is_preserved() {
        let response = reply_response(GatewayReply {
            status: 400,
            body: json!({"error": "No image provided"}),
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bogus = reply_response(GatewayReply {
            status: 42,
            body: json!({}),
        });
        assert_eq!(bogus.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn modes_catalog_groups_by_category() -> anyhow::Result<()> {
        let catalog = modes_catalog(&PromptComposer::builtin()?);
        let categories = catalog["categories"].as_array().cloned().unwrap_or_default();
        assert_eq!(categories[0]["id"], json!("fine-art"));
        assert_eq!(categories[0]["modes"][0]["id"], json!("fine-art-comprehensive"));
        assert_eq!(categories[0]["modes"][0]["gating"], json!("full"));
        assert_eq!(categories[0]["subModes"][0]["label"], json!("Painting"));
        assert!(categories.iter().any(|category| category["id"] == json!("studio")));
        Ok(())
    }

    #[test]
    fn lenses_catalog_flags_intent_lenses() -> anyhow::Result<()> {
        let catalog = lenses_catalog(&PromptComposer::builtin()?);
        let lenses = catalog["categories"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .flat_map(|category| category["lenses"].as_array().cloned().unwrap_or_default())
            .collect::<Vec<_>>();
        let intent = lenses
            .iter()
            .find(|lens| lens["id"] == json!("lens-stated-intent"))
            .cloned()
            .unwrap_or_default();
        assert_eq!(intent["requiresIntent"], json!(true));
        assert_eq!(lenses.len(), 18);
        Ok(())
    }
}

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bloom_contracts::requests::{AppSelectionRequest, ChatRequest, ChatResponse};
use bloom_contracts::PublicApp;
use bloom_engine::analytics::SELECT_EVENT;
use bloom_engine::{BloomEngine, SelectionError};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::state::SharedState;

const DEFAULT_EVENT_LIMIT: u32 = 100;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/hello", get(hello))
        .route("/api/app", post(chat_app))
        .route("/api/app/selection", post(capture_selection))
        .route("/api/abtest/events", get(abtest_events))
        .route("/api/project-info", get(project_info))
        .route("/api/pipelines", get(pipelines))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Selection(SelectionError),
    Upstream(anyhow::Error),
    Internal(anyhow::Error),
}

impl From<SelectionError> for ApiError {
    fn from(err: SelectionError) -> Self {
        Self::Selection(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Selection(err) => {
                let status = if err.is_empty_result() {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
            Self::Upstream(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": format!("{err:#}"),
                    "details": "Check server logs for more information",
                })),
            )
                .into_response(),
            Self::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{err:#}") })),
            )
                .into_response(),
        }
    }
}

async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello, World!" }))
}

async fn chat_app(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let outcome = with_engine(&state, move |engine| {
        engine.handle_chat(&request).map_err(ApiError::from)
    })
    .await?;

    Ok(Json(ChatResponse {
        apps: outcome.apps.into_iter().map(PublicApp::from).collect(),
    }))
}

async fn capture_selection(
    State(state): State<SharedState>,
    Json(request): Json<AppSelectionRequest>,
) -> Result<Json<Value>, ApiError> {
    info!(
        selected_id = ?request.selected_id,
        choices = ?request.choices,
        user_id = ?request.user_id,
        "app selected"
    );
    for selection in &request.app_selections {
        let status = if selection.is_selected {
            "SELECTED"
        } else {
            "NOT SELECTED"
        };
        info!(app_id = %selection.app_id, status, "app selection detail");
    }

    let selected_pipeline = lookup_pipeline(&state, request.selected_id.clone()).await?;

    if let Some(journal) = &state.journal {
        if let Err(err) = journal.record(&request, selected_pipeline.as_deref()) {
            warn!(path = %journal.path().display(), error = %format!("{err:#}"), "selection journal write failed");
        }
    }

    let properties = selection_properties(&request, selected_pipeline.as_deref());
    let analytics = state.analytics.clone();
    let distinct_id = request.distinct_id().to_string();
    tokio::spawn(async move {
        analytics
            .capture(SELECT_EVENT, &distinct_id, properties, None)
            .await;
    });

    Ok(Json(json!({
        "status": "success",
        "selected_id": request.selected_id,
        "app_selections": request.app_selections,
    })))
}

async fn lookup_pipeline(
    state: &SharedState,
    app_id: Option<String>,
) -> Result<Option<String>, ApiError> {
    let Some(app_id) = app_id else {
        return Ok(None);
    };
    with_engine(state, move |engine| Ok(engine.pipeline_of(&app_id))).await
}

/// Runs `f` against the locked engine on the blocking pool; chat selection
/// can hold the lock across file reads.
async fn with_engine<T, F>(state: &SharedState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut BloomEngine) -> Result<T, ApiError> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || {
        let mut engine = state.engine().map_err(ApiError::Internal)?;
        f(&mut *engine)
    })
    .await
    .map_err(|err| ApiError::Internal(anyhow::anyhow!("engine task failed: {err}")))?
}

fn selection_properties(
    request: &AppSelectionRequest,
    selected_pipeline: Option<&str>,
) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("selected_app_id".to_string(), json!(request.selected_id));
    properties.insert("total_choices".to_string(), json!(request.choices.len()));
    properties.insert("choices".to_string(), json!(request.choices));
    properties.insert("app_selections".to_string(), json!(request.app_selections));
    if let Some(pipeline) = selected_pipeline {
        properties.insert("selected_pipeline".to_string(), json!(pipeline));
    }
    properties
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    after: Option<String>,
    before: Option<String>,
    #[serde(default = "default_event_limit")]
    limit: u32,
}

fn default_event_limit() -> u32 {
    DEFAULT_EVENT_LIMIT
}

async fn abtest_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    let events = state
        .analytics
        .fetch_ab_test_events(query.after.as_deref(), query.before.as_deref(), query.limit)
        .await
        .map_err(|err| {
            error!(error = %format!("{err:#}"), "fetching ab test events failed");
            ApiError::Upstream(err)
        })?;
    let count = events
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    info!(count, "fetched ab test events");
    Ok(Json(events))
}

async fn project_info(State(state): State<SharedState>) -> Response {
    if !state.analytics.public_key_configured() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "PUBLIC_POSTHOG_KEY not set" })),
        )
            .into_response();
    }
    match state.analytics.project_info().await {
        Ok(upstream) if upstream.status == 200 => Json(upstream.body).into_response(),
        Ok(upstream) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("Failed to get project info: {}", upstream.status),
                "response": upstream.body,
            })),
        )
            .into_response(),
        Err(err) => ApiError::Internal(err).into_response(),
    }
}

async fn pipelines(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    with_engine(&state, |engine| {
        Ok(Json(json!({
            "pipelines": engine.pipeline_ids(),
            "apps": engine.catalog_len(),
        })))
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use bloom_contracts::selections::SelectionJournal;
    use bloom_engine::{AnalyticsClient, AnalyticsSettings, BloomEngine, EngineSettings};
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::create_router;
    use crate::state::{AppState, SharedState};

    fn write_png(path: &Path, color: [u8; 3]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        RgbImage::from_pixel(2, 2, Rgb(color)).save(path)?;
        Ok(())
    }

    fn test_state(root: &Path, journal: Option<SelectionJournal>) -> anyhow::Result<SharedState> {
        let engine = BloomEngine::bootstrap_with_rng(
            EngineSettings::new(root),
            Box::new(StdRng::seed_from_u64(31)),
        )?;
        let analytics = AnalyticsClient::new(AnalyticsSettings::default())?;
        Ok(AppState::shared(engine, analytics, journal))
    }

    fn seeded_tree(root: &Path) -> anyhow::Result<()> {
        write_png(&root.join("old").join("1.png"), [200, 10, 10])?;
        write_png(&root.join("new").join("2.png"), [10, 10, 200])?;
        Ok(())
    }

    async fn send(state: &SharedState, request: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
        let response = create_router(state.clone()).oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }

    fn post_json(uri: &str, body: Value) -> anyhow::Result<Request<Body>> {
        Ok(Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?)
    }

    fn get(uri: &str) -> anyhow::Result<Request<Body>> {
        Ok(Request::builder().uri(uri).body(Body::empty())?)
    }

    #[tokio::test]
    async fn hello_answers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state = test_state(temp.path(), None)?;
        let (status, body) = send(&state, get("/api/hello")?).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "Hello, World!"}));
        Ok(())
    }

    #[tokio::test]
    async fn chat_returns_public_apps_only() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seeded_tree(temp.path())?;
        let state = test_state(temp.path(), None)?;

        let mut sizes = Vec::new();
        for _ in 0..20 {
            let (status, body) =
                send(&state, post_json("/api/app", json!({"message": "a weather app"}))?).await?;
            assert_eq!(status, StatusCode::OK);
            let apps = body["apps"].as_array().cloned().unwrap_or_default();
            for app in &apps {
                assert!(app.get("origin_pipeline").is_none());
                assert!(app["image"]
                    .as_str()
                    .unwrap_or_default()
                    .starts_with("data:image/png;base64,"));
            }
            sizes.push(apps.len());
        }
        assert!(sizes.iter().all(|size| *size == 1 || *size == 2));
        assert!(sizes.contains(&1) && sizes.contains(&2));
        Ok(())
    }

    #[tokio::test]
    async fn chat_tolerates_missing_message() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seeded_tree(temp.path())?;
        let state = test_state(temp.path(), None)?;
        let (status, body) = send(&state, post_json("/api/app", json!({}))?).await?;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["apps"].as_array().cloned().unwrap_or_default().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn chat_on_empty_resources_is_not_found() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state = test_state(temp.path(), None)?;
        for _ in 0..6 {
            let (status, body) = send(&state, post_json("/api/app", json!({"message": "x"}))?).await?;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body["error"].as_str().is_some());
        }
        Ok(())
    }

    #[tokio::test]
    async fn selection_is_journaled_with_pipeline() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resources = temp.path().join("resource");
        seeded_tree(&resources)?;
        let journal_path = temp.path().join("selections.jsonl");
        let state = test_state(&resources, Some(SelectionJournal::new(&journal_path)))?;

        let (_, chat) = send(&state, post_json("/api/app", json!({"message": "x"}))?).await?;
        let selected = chat["apps"][0]["id"].as_str().unwrap_or_default().to_string();
        let expected_pipeline = state.engine()?.pipeline_of(&selected);
        assert!(expected_pipeline.is_some());

        let (status, body) = send(
            &state,
            post_json(
                "/api/app/selection",
                json!({
                    "selected_id": selected,
                    "choices": [selected],
                    "app_selections": [{"app_id": selected, "is_selected": true}],
                    "user_id": "user-9",
                }),
            )?,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("success"));
        assert_eq!(body["selected_id"], json!(selected));
        assert_eq!(body["app_selections"][0]["is_selected"], json!(true));

        let raw = fs::read_to_string(&journal_path)?;
        let line: Value = serde_json::from_str(raw.lines().next().unwrap_or("{}"))?;
        assert_eq!(line["selected_pipeline"], json!(expected_pipeline));
        assert_eq!(line["user_id"], json!("user-9"));
        Ok(())
    }

    #[tokio::test]
    async fn selection_of_unknown_app_journals_null_pipeline() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resources = temp.path().join("resource");
        seeded_tree(&resources)?;
        let journal_path = temp.path().join("selections.jsonl");
        let state = test_state(&resources, Some(SelectionJournal::new(&journal_path)))?;

        let (status, _) = send(
            &state,
            post_json(
                "/api/app/selection",
                json!({"selected_id": "not-served", "choices": null, "app_selections": null}),
            )?,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);

        let raw = fs::read_to_string(&journal_path)?;
        let line: Value = serde_json::from_str(raw.lines().next().unwrap_or("{}"))?;
        assert_eq!(line["selected_id"], json!("not-served"));
        assert_eq!(line["selected_pipeline"], Value::Null);
        assert_eq!(line["choices"], json!([]));
        Ok(())
    }

    #[tokio::test]
    async fn chat_accepts_null_message() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seeded_tree(temp.path())?;
        let state = test_state(temp.path(), None)?;
        let request = post_json("/api/app", json!({"message": null, "user_id": null}))?;
        let (status, body) = send(&state, request).await?;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["apps"].as_array().cloned().unwrap_or_default().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn selection_tolerates_empty_body_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state = test_state(temp.path(), None)?;
        let (status, body) = send(&state, post_json("/api/app/selection", json!({}))?).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "success", "selected_id": null, "app_selections": []})
        );
        Ok(())
    }

    #[tokio::test]
    async fn events_without_credentials_fail_with_details() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state = test_state(temp.path(), None)?;
        let (status, body) = send(&state, get("/api/abtest/events?limit=5")?).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            json!("POSTHOG_PERSONAL_API_KEY environment variable is not set")
        );
        assert_eq!(body["details"], json!("Check server logs for more information"));
        Ok(())
    }

    #[tokio::test]
    async fn project_info_requires_public_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state = test_state(temp.path(), None)?;
        let (status, body) = send(&state, get("/api/project-info")?).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "PUBLIC_POSTHOG_KEY not set"}));
        Ok(())
    }

    #[tokio::test]
    async fn pipelines_lists_index_and_catalog_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seeded_tree(temp.path())?;
        let state = test_state(temp.path(), None)?;
        let (status, body) = send(&state, get("/api/pipelines")?).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"pipelines": ["new", "old"], "apps": 2}));
        Ok(())
    }
}

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::audit::{AuditFilter, EntityType};
use crate::errors::WorkflowError;
use crate::service::WorkflowService;
use crate::trace::{ArtifactKind, ArtifactRef, LinkType};
use crate::workflow::ReviewOutcome;

/// Header carrying the acting user's identity on mutating routes.
pub const USER_HEADER: &str = "x-user-id";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: WorkflowService,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitForReviewRequest {
    pub title: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReviewRequest {
    pub outcome: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default = "default_next_phase_allowed")]
    pub next_phase_allowed: bool,
}

fn default_next_phase_allowed() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub current_phase_id: Uuid,
    pub target_phase_id: Uuid,
    #[serde(default)]
    pub comments: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub completion_percentage: u8,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterArtifactRequest {
    pub kind: String,
    pub artifact_id: String,
    #[serde(default)]
    pub title: String,
}

/// Link endpoints are `kind:id` references, e.g. `design_input:DI-1`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLinkRequest {
    pub source: String,
    pub target: String,
    pub link_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Workflow(WorkflowError),
    BadRequest(String),
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError::Workflow(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Workflow(WorkflowError::InvalidInput(rejection.body_text()))
    }
}

fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        WorkflowError::AlreadyInitialized { .. }
        | WorkflowError::InvalidTransition(_)
        | WorkflowError::SequenceViolation { .. }
        | WorkflowError::ReviewAlreadyOpen { .. }
        | WorkflowError::CycleDetected { .. }
        | WorkflowError::DuplicateLink { .. }
        | WorkflowError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        WorkflowError::InvalidInput(_) | WorkflowError::InvalidLink(_) => StatusCode::BAD_REQUEST,
        WorkflowError::AuditWriteFailure(_)
        | WorkflowError::LockPoisoned
        | WorkflowError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Workflow(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(error = ?err, "Request failed");
                }
                (status, err.kind(), err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };
        (
            status,
            Json(serde_json::json!({"error": message, "kind": kind})),
        )
            .into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/projects/{id}/workflow",
            get(get_workflow_summary).post(initialize_workflow),
        )
        .route("/api/projects/{id}/phases", get(list_phases))
        .route("/api/projects/{id}/bottlenecks", get(get_bottlenecks))
        .route("/api/projects/{id}/transitions", post(request_transition))
        .route("/api/projects/{id}/reviews", get(list_active_reviews))
        .route(
            "/api/projects/{id}/traceability-matrix",
            get(get_traceability_matrix),
        )
        .route(
            "/api/projects/{id}/traceability-matrix/snapshots",
            get(list_matrix_snapshots).post(save_matrix_snapshot),
        )
        .route("/api/projects/{id}/artifacts", post(register_artifact))
        .route("/api/projects/{id}/links", get(list_links).post(add_link))
        .route("/api/projects/{id}/audit", get(get_audit_trail))
        .route("/api/phases/{id}/submit-for-review", post(submit_for_review))
        .route("/api/phases/{id}/progress", post(update_progress))
        .route("/api/phases/{id}/reviews", get(get_review_history))
        .route("/api/reviews/{id}", get(get_review))
        .route("/api/reviews/{id}/complete", post(complete_review))
        .route("/api/links/{id}/deactivate", post(deactivate_link))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Mutating routes must name the acting user.
fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Missing X-User-Id header".to_string()))
}

fn parse_field<T: FromStr<Err = String>>(value: &str) -> Result<T, ApiError> {
    T::from_str(value.trim()).map_err(ApiError::BadRequest)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn initialize_workflow(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&headers)?;
    let phases = state.service.initialize_workflow(project_id, &user).await?;
    Ok((StatusCode::CREATED, Json(phases)))
}

async fn get_workflow_summary(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.summary(project_id).await?))
}

async fn list_phases(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.phases(project_id).await?))
}

async fn get_bottlenecks(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.bottlenecks(project_id).await?))
}

async fn submit_for_review(
    State(state): State<SharedState>,
    Path(phase_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<SubmitForReviewRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = require_user(&headers)?;
    let review = state
        .service
        .submit_for_review(phase_id, &req.title, &req.scope, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn complete_review(
    State(state): State<SharedState>,
    Path(review_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<CompleteReviewRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = require_user(&headers)?;
    let outcome: ReviewOutcome = parse_field(&req.outcome)?;
    let review = state
        .service
        .complete_review(review_id, outcome, &req.comments, req.next_phase_allowed, &user)
        .await?;
    Ok(Json(review))
}

async fn request_transition(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = require_user(&headers)?;
    let phases = state
        .service
        .request_transition(
            project_id,
            req.current_phase_id,
            req.target_phase_id,
            &req.comments,
            &user,
        )
        .await?;
    Ok(Json(phases))
}

async fn update_progress(
    State(state): State<SharedState>,
    Path(phase_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = require_user(&headers)?;
    let phase = state
        .service
        .update_progress(phase_id, req.completion_percentage, &user)
        .await?;
    Ok(Json(phase))
}

async fn list_active_reviews(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.active_reviews(project_id).await?))
}

async fn get_review_history(
    State(state): State<SharedState>,
    Path(phase_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.review_history(phase_id).await?))
}

async fn get_review(
    State(state): State<SharedState>,
    Path(review_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_review(review_id).await?))
}

async fn register_artifact(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    payload: Result<Json<RegisterArtifactRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = require_user(&headers)?;
    let kind: ArtifactKind = parse_field(&req.kind)?;
    let artifact = state
        .service
        .register_artifact(project_id, kind, &req.artifact_id, &req.title, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

async fn add_link(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    payload: Result<Json<AddLinkRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = require_user(&headers)?;
    let source: ArtifactRef = parse_field(&req.source)?;
    let target: ArtifactRef = parse_field(&req.target)?;
    let link_type: LinkType = parse_field(&req.link_type)?;
    let link = state
        .service
        .add_link(project_id, source, target, link_type, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn list_links(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.links(project_id).await?))
}

async fn deactivate_link(
    State(state): State<SharedState>,
    Path(link_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&headers)?;
    Ok(Json(state.service.deactivate_link(link_id, &user).await?))
}

async fn get_traceability_matrix(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.traceability_matrix(project_id).await?))
}

async fn save_matrix_snapshot(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&headers)?;
    let snapshot = state.service.save_matrix_snapshot(project_id, &user).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn list_matrix_snapshots(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.matrix_snapshots(project_id).await?))
}

async fn get_audit_trail(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entity_type = query
        .entity_type
        .as_deref()
        .map(parse_field::<EntityType>)
        .transpose()?;
    let filter = AuditFilter {
        entity_type,
        entity_id: query.entity_id,
    };
    Ok(Json(state.service.audit_trail(project_id, filter).await?))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{PhaseDefinition, PhaseRegistry};
    use crate::store::{DbHandle, GateDb};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let registry = PhaseRegistry::new(vec![
            PhaseDefinition::new("planning", "Planning", 1),
            PhaseDefinition::new("inputs", "Inputs", 2),
            PhaseDefinition::new("outputs", "Outputs", 3),
        ])
        .unwrap();
        let db = GateDb::new_in_memory().unwrap();
        db.sync_phase_definitions(&registry).unwrap();
        let (ws_tx, _) = broadcast::channel(16);
        let service =
            WorkflowService::new(DbHandle::new(db), Arc::new(registry)).with_events(ws_tx.clone());
        Arc::new(AppState { service, ws_tx })
    }

    fn test_app() -> Router {
        api_router().with_state(test_state())
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", "qa.lead")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn init(app: &Router) -> Vec<Value> {
        let (status, phases) = send(app, post("/api/projects/1/workflow", json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        phases.as_array().unwrap().clone()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_initialize_and_list_phases() {
        let app = test_app();
        let phases = init(&app).await;
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0]["status"], "active");
        assert_eq!(phases[1]["canStart"], false);
        assert_eq!(phases[1]["blockingPhase"], "Planning");

        let (status, listed) = send(&app, get("/api/projects/1/phases")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 3);

        let (status, body) = send(&app, post("/api/projects/1/workflow", json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "already_initialized");
    }

    #[tokio::test]
    async fn test_phases_of_unknown_project_is_404() {
        let app = test_app();
        let (status, body) = send(&app, get("/api/projects/99/phases")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_missing_user_header_is_400() {
        let app = test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/projects/1/workflow")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["kind"], "bad_request");
    }

    #[tokio::test]
    async fn test_review_cycle_over_http() {
        let app = test_app();
        let phases = init(&app).await;
        let planning = phases[0]["id"].as_str().unwrap().to_string();
        let inputs = phases[1]["id"].as_str().unwrap().to_string();

        let (status, review) = send(
            &app,
            post(
                &format!("/api/phases/{}/submit-for-review", planning),
                json!({"title": "Planning gate", "scope": "Plan"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(review["status"], "in_progress");
        let review_id = review["id"].as_str().unwrap().to_string();

        let (_, report) = send(&app, get("/api/projects/1/bottlenecks")).await;
        assert_eq!(report["activeBottlenecks"], 1);
        assert_eq!(report["workflowBlocked"], true);

        let (status, body) = send(
            &app,
            post(
                &format!("/api/reviews/{}/complete", review_id),
                json!({"outcome": "maybe"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");

        let (status, completed) = send(
            &app,
            post(
                &format!("/api/reviews/{}/complete", review_id),
                json!({"outcome": "approved", "comments": "ok", "nextPhaseAllowed": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(completed["outcome"], "approved");

        let (status, phases) = send(
            &app,
            post(
                "/api/projects/1/transitions",
                json!({"currentPhaseId": planning, "targetPhaseId": inputs}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(phases[0]["status"], "locked");
        assert_eq!(phases[1]["status"], "active");

        let (status, body) = send(
            &app,
            post(
                "/api/projects/1/transitions",
                json!({"currentPhaseId": planning, "targetPhaseId": inputs}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "sequence_violation");
    }

    #[tokio::test]
    async fn test_progress_out_of_range_is_400() {
        let app = test_app();
        let phases = init(&app).await;
        let planning = phases[0]["id"].as_str().unwrap();
        let (status, body) = send(
            &app,
            post(
                &format!("/api/phases/{}/progress", planning),
                json!({"completionPercentage": 140}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_input");

        let (status, phase) = send(
            &app,
            post(
                &format!("/api/phases/{}/progress", planning),
                json!({"completionPercentage": 40}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(phase["completionPercentage"], 40);
    }

    #[tokio::test]
    async fn test_malformed_bodies_use_error_envelope() {
        let app = test_app();
        let phases = init(&app).await;
        let planning = phases[0]["id"].as_str().unwrap();
        let uri = format!("/api/phases/{}/progress", planning);

        let (status, body) = send(&app, post(&uri, json!({"completionPercentage": 300}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_input");
        assert!(body["error"].is_string());

        let request = Request::builder()
            .method("POST")
            .uri(&uri)
            .header("content-type", "application/json")
            .header("x-user-id", "qa.lead")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_input");

        let (status, body) = send(
            &app,
            post(&format!("/api/phases/{}/submit-for-review", planning), json!({"scope": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_input");
    }

    #[tokio::test]
    async fn test_traceability_over_http() {
        let app = test_app();
        for (kind, id) in [
            ("user_need", "UN-1"),
            ("design_input", "DI-1"),
            ("verification", "VER-1"),
        ] {
            let (status, _) = send(
                &app,
                post(
                    "/api/projects/3/artifacts",
                    json!({"kind": kind, "artifactId": id, "title": id}),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, link) = send(
            &app,
            post(
                "/api/projects/3/links",
                json!({"source": "user_need:UN-1", "target": "design_input:DI-1", "linkType": "derives_from"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(link["active"], true);

        let (status, body) = send(
            &app,
            post(
                "/api/projects/3/links",
                json!({"source": "user_need:UN-1", "target": "design_input:DI-1", "linkType": "verifies"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_link");

        let (status, body) = send(
            &app,
            post(
                "/api/projects/3/links",
                json!({"source": "design_input:DI-1", "target": "user_need:UN-1", "linkType": "derives_from"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "cycle_detected");

        let (status, matrix) = send(&app, get("/api/projects/3/traceability-matrix")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(matrix["coverageStatistics"]["user_need.design_input"]["percentage"], 100);
        assert!(matrix["gapAnalysis"].as_array().is_some());

        let link_id = link["id"].as_str().unwrap();
        let (status, deactivated) = send(
            &app,
            post(&format!("/api/links/{}/deactivate", link_id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deactivated["active"], false);
    }

    #[tokio::test]
    async fn test_audit_trail_filter() {
        let app = test_app();
        init(&app).await;

        let (status, entries) = send(&app, get("/api/projects/1/audit")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(entries.as_array().unwrap().len(), 5);

        let (_, entries) = send(&app, get("/api/projects/1/audit?entityType=workflow")).await;
        assert_eq!(entries.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, get("/api/projects/1/audit?entityType=widget")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_initialize_broadcasts_ws() {
        let state = test_state();
        let mut rx = state.ws_tx.subscribe();
        let app = api_router().with_state(state);
        init(&app).await;

        let msg = rx.recv().await.unwrap();
        let parsed: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "WorkflowInitialized");
        assert_eq!(parsed["data"]["phases"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&WorkflowError::not_found("Phase instance", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&WorkflowError::ConcurrentModification {
                project_id: 1,
                scope: "workflow".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&WorkflowError::AuditWriteFailure(anyhow::anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

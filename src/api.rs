//! HTTP surface: one-shot provisioning plus job and audit endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AssignReport, AuditCoordinator, AuditError, Decision};
use crate::deploy::{DeployError, DeploymentPlanner};
use crate::error::ErrorKind;
use crate::provisioning::{ProvisioningRequest, ProvisioningResult};
use crate::state_machine::{Auditor, AuditorId, Job, JobId, JobInput, JobStateMachine, JobStatus, StateError};
use crate::store::JobQuery;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub machine: JobStateMachine,
    pub audit: Arc<AuditCoordinator>,
    pub planner: Arc<DeploymentPlanner>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/provision", post(provision))
        .route("/api/jobs", post(create_job).get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/review", post(review_job))
        .route("/api/jobs/{id}/resubmit", post(resubmit_job))
        .route("/api/audit/assign", post(assign_jobs))
        .route("/api/auditors", post(create_auditor).get(list_auditors))
        .route("/api/auditors/{id}/queue", get(auditor_queue))
        .with_state(state)
}

/// Error body: `{"error": {"message", "kind", "status"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: status_for(kind),
            kind,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PayloadTooLarge => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Transient
        | ErrorKind::Permanent
        | ErrorKind::Timeout
        | ErrorKind::MaxRetriesExceeded => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "kind": self.kind,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Jobs leave the API without transfer credentials.
fn redact(mut job: Job) -> Job {
    job.result.credentials = None;
    job
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionBody {
    domain: String,
    blueprint_id: String,
    client_id: String,
    client_slug: String,
    html_content: String,
}

/// Always answers `{success, url, error?}`; the status code carries the
/// failure class.
async fn provision(
    State(state): State<AppState>,
    Json(body): Json<ProvisionBody>,
) -> (StatusCode, Json<ProvisioningResult>) {
    let request = ProvisioningRequest {
        domain: body.domain,
        blueprint_id: body.blueprint_id,
        client_id: body.client_id,
        client_slug: body.client_slug,
        html_content: body.html_content,
        files: Vec::new(),
        post_install: None,
    };
    let outcome = match state.planner.plan_request(&request) {
        Ok(plan) => state
            .planner
            .execute(&plan)
            .await
            .map(|result| (plan.domain, result)),
        Err(e) => Err(e),
    };
    match outcome {
        Ok((domain, result)) => {
            info!(domain = %domain, url = %result.url, "provisioned via api");
            (
                StatusCode::OK,
                Json(ProvisioningResult {
                    credentials: None,
                    ..result
                }),
            )
        }
        Err(e) => {
            warn!(domain = %request.domain, error = %e, "provision request failed");
            (
                status_for(e.kind()),
                Json(ProvisioningResult {
                    success: false,
                    url: String::new(),
                    credentials: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<JobInput>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.machine.create(input).await?;
    Ok((StatusCode::CREATED, Json(redact(job))))
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Job>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let store = state.machine.store();
    let jobs = match params.status {
        Some(status) => {
            let status: JobStatus = status.parse().map_err(ApiError::bad_request)?;
            store.find(&JobQuery::Status(status), limit).await
        }
        None => store.recent(limit).await,
    }
    .map_err(StateError::from)?;
    Ok(Json(jobs.into_iter().map(redact).collect()))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    let job = state.machine.get(&JobId(id)).await?;
    Ok(Json(redact(job)))
}

#[derive(Debug, Deserialize)]
struct ReviewBody {
    decision: String,
    #[serde(default)]
    issues: Vec<String>,
}

async fn review_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReviewBody>,
) -> ApiResult<Json<Job>> {
    let decision: Decision = body.decision.parse()?;
    let job = state.audit.review(&JobId(id), decision, body.issues).await?;
    Ok(Json(redact(job)))
}

async fn resubmit_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.audit.resubmit(&JobId(id)).await?;
    Ok(Json(redact(job)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignBody {
    auditor_id: String,
    job_ids: Vec<String>,
}

async fn assign_jobs(
    State(state): State<AppState>,
    Json(body): Json<AssignBody>,
) -> ApiResult<Json<AssignReport>> {
    let ids: Vec<JobId> = body.job_ids.into_iter().map(JobId).collect();
    let report = state.audit.assign(&ids, &AuditorId(body.auditor_id)).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct AuditorBody {
    name: String,
    email: String,
}

async fn create_auditor(
    State(state): State<AppState>,
    Json(body): Json<AuditorBody>,
) -> ApiResult<(StatusCode, Json<Auditor>)> {
    let auditor = state.audit.register_auditor(&body.name, &body.email).await?;
    Ok((StatusCode::CREATED, Json(auditor)))
}

async fn list_auditors(State(state): State<AppState>) -> ApiResult<Json<Vec<Auditor>>> {
    Ok(Json(state.audit.list_auditors().await?))
}

async fn auditor_queue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Job>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let jobs = state.audit.queue_for(&AuditorId(id), limit).await?;
    Ok(Json(jobs.into_iter().map(redact).collect()))
}

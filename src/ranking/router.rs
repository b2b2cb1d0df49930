use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{Application, ApplicationId, Ranking, RankingId};
use super::quota::QuotaTable;
use super::service::{RankingService, RankingServiceError};
use super::store::{RankingRepository, RepositoryError};

/// Router builder exposing the ranking data contract to the UI layer.
pub fn ranking_router<R>(service: Arc<RankingService<R>>) -> Router
where
    R: RankingRepository + 'static,
{
    Router::new()
        .route("/api/v1/rankings/:id", get(get_ranking_handler::<R>))
        .route(
            "/api/v1/rankings/:id/reorder",
            post(reorder_handler::<R>),
        )
        .route("/api/v1/rankings/:id/import", post(import_handler::<R>))
        .route("/api/v1/rankings/:id/export", get(export_handler::<R>))
        .route(
            "/api/v1/rankings/:id/distribute",
            post(distribute_handler::<R>),
        )
        .route(
            "/api/v1/rankings/:id/finalize",
            post(finalize_handler::<R>),
        )
        .route(
            "/api/v1/rankings/:id/roster-status",
            get(roster_status_handler::<R>),
        )
        .route("/api/v1/rankings/:id/roster", post(start_roster_handler::<R>))
        .route(
            "/api/v1/rankings/:id/roster/run",
            post(run_roster_handler::<R>),
        )
        .route(
            "/api/v1/rankings/:id/roster/fail",
            post(fail_roster_handler::<R>),
        )
        .route(
            "/api/v1/rankings/:id/roster/lock",
            post(lock_roster_handler::<R>),
        )
        .route(
            "/api/v1/rankings/:id/roster/unlock",
            post(unlock_roster_handler::<R>),
        )
        .route(
            "/api/v1/rankings/:id/applications/:application_id/delete",
            post(delete_application_handler::<R>),
        )
        .route(
            "/api/v1/rankings/:id/applications/:application_id/restore",
            post(restore_application_handler::<R>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReorderRequest {
    pub(crate) new_order: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImportRequest {
    pub(crate) csv: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DistributeParams {
    #[serde(default)]
    pub(crate) force: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartRosterRequest {
    pub(crate) cycle: super::roster::RosterCycle,
    pub(crate) period_label: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnlockRosterRequest {
    pub(crate) period_label: String,
}

/// Serialized application inside a ranking view.
#[derive(Debug, Serialize)]
pub struct ApplicationView {
    pub id: u64,
    pub app_id: String,
    pub student_name: String,
    pub student_id: String,
    pub academy_code: String,
    pub academy_name: String,
    pub department_code: String,
    pub department_name: String,
    pub eligible_subtypes: Vec<String>,
    pub status: &'static str,
    pub status_zh: &'static str,
    pub review_status: &'static str,
}

impl ApplicationView {
    fn from_domain(application: &Application) -> Self {
        Self {
            id: application.id.0,
            app_id: application.app_id.clone(),
            student_name: application.student_name.clone(),
            student_id: application.student_id.clone(),
            academy_code: application.academy_code.clone(),
            academy_name: application.academy_name.clone(),
            department_code: application.department_code.clone(),
            department_name: application.department_name.clone(),
            eligible_subtypes: application.eligible_subtypes.iter().cloned().collect(),
            status: application.status.label(),
            status_zh: application.status.label_zh(),
            review_status: application.review_status.label(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RankingItemView {
    pub rank_position: u32,
    pub is_allocated: bool,
    pub sub_type: String,
    pub application: ApplicationView,
}

#[derive(Debug, Serialize)]
pub struct SubTypeMetadata {
    pub code: String,
    pub total_quota: u32,
}

#[derive(Debug, Serialize)]
pub struct CollegeQuotaEntry {
    pub sub_type: String,
    pub college: String,
    pub quota: u32,
}

/// Full ranking payload for `GET /rankings/:id`.
#[derive(Debug, Serialize)]
pub struct RankingView {
    pub id: u64,
    pub sub_type_code: String,
    pub academic_year: u16,
    pub semester: &'static str,
    pub semester_zh: &'static str,
    pub total_quota: u32,
    pub is_finalized: bool,
    pub version: u64,
    pub items: Vec<RankingItemView>,
    pub sub_type_metadata: Vec<SubTypeMetadata>,
    pub college_quota_breakdown: Vec<CollegeQuotaEntry>,
}

impl RankingView {
    pub fn build(ranking: &Ranking, quotas: &QuotaTable) -> Self {
        let mut items: Vec<&super::domain::RankingItem> = ranking.items.iter().collect();
        items.sort_by_key(|item| item.rank_position);

        let sub_type_metadata = quotas
            .sub_types()
            .iter()
            .map(|code| SubTypeMetadata {
                code: code.clone(),
                total_quota: quotas.total_quota(code).unwrap_or(0),
            })
            .collect();

        let college_quota_breakdown = quotas
            .sub_types()
            .iter()
            .flat_map(|sub_type| {
                quotas
                    .colleges(sub_type)
                    .map(move |(college, quota)| CollegeQuotaEntry {
                        sub_type: sub_type.clone(),
                        college: college.to_string(),
                        quota,
                    })
            })
            .collect();

        Self {
            id: ranking.id.0,
            sub_type_code: ranking.sub_type_code.clone(),
            academic_year: ranking.academic_year,
            semester: ranking.semester.label(),
            semester_zh: ranking.semester.label_zh(),
            total_quota: ranking.total_quota,
            is_finalized: ranking.is_finalized,
            version: ranking.version,
            items: items
                .into_iter()
                .map(|item| RankingItemView {
                    rank_position: item.rank_position,
                    is_allocated: item.is_allocated,
                    sub_type: item.sub_type.clone(),
                    application: ApplicationView::from_domain(&item.application),
                })
                .collect(),
            sub_type_metadata,
            college_quota_breakdown,
        }
    }
}

fn error_response(error: RankingServiceError) -> Response {
    let status = match &error {
        RankingServiceError::Repository(RepositoryError::NotFound(_))
        | RankingServiceError::RosterMissing(_)
        | RankingServiceError::ApplicationNotFound { .. } => StatusCode::NOT_FOUND,
        RankingServiceError::Repository(RepositoryError::ConcurrentModification { .. })
        | RankingServiceError::Repository(RepositoryError::Conflict(_))
        | RankingServiceError::DistributionInProgress(_)
        | RankingServiceError::DistributionLocked { .. }
        | RankingServiceError::RosterExists(_)
        | RankingServiceError::NotFinalized(_)
        | RankingServiceError::Roster(_)
        | RankingServiceError::Reorder(super::domain::ReorderError::Finalized { .. }) => {
            StatusCode::CONFLICT
        }
        RankingServiceError::Reorder(_)
        | RankingServiceError::Sheet(_)
        | RankingServiceError::Status(_)
        | RankingServiceError::Eligibility(_)
        | RankingServiceError::ImportValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RankingServiceError::Quota(_) | RankingServiceError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let body = match &error {
        RankingServiceError::ImportValidation { issues } => json!({
            "code": error.code(),
            "message": error.to_string(),
            "issues": issues,
        }),
        _ => json!({
            "code": error.code(),
            "message": error.to_string(),
        }),
    };
    (status, Json(body)).into_response()
}

pub(crate) async fn get_ranking_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.get(RankingId(id)) {
        Ok(ranking) => {
            let view = RankingView::build(&ranking, service.quotas());
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reorder_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
    Json(request): Json<ReorderRequest>,
) -> Response
where
    R: RankingRepository + 'static,
{
    let order: Vec<ApplicationId> = request.new_order.into_iter().map(ApplicationId).collect();
    match service.reorder(RankingId(id), &order) {
        Ok(ranking) => {
            let view = RankingView::build(&ranking, service.quotas());
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn import_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
    Json(request): Json<ImportRequest>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.import_csv(RankingId(id), &request.csv) {
        Ok(ranking) => {
            let view = RankingView::build(&ranking, service.quotas());
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn export_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.export_csv(RankingId(id)) {
        Ok(csv) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            csv,
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn distribute_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
    Query(params): Query<DistributeParams>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.distribute(RankingId(id), params.force) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn finalize_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.finalize(RankingId(id)) {
        Ok(ranking) => {
            let view = RankingView::build(&ranking, service.quotas());
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn roster_status_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.roster_status(RankingId(id)) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn start_roster_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
    Json(request): Json<StartRosterRequest>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.start_roster(RankingId(id), request.cycle, &request.period_label) {
        Ok(roster) => (StatusCode::CREATED, Json(roster)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn run_roster_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.run_roster_job(RankingId(id)) {
        Ok(roster) => (StatusCode::OK, Json(roster)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn fail_roster_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.fail_roster(RankingId(id)) {
        Ok(roster) => (StatusCode::OK, Json(roster)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn lock_roster_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.lock_roster(RankingId(id)) {
        Ok(roster) => (StatusCode::OK, Json(roster)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn unlock_roster_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path(id): Path<u64>,
    Json(request): Json<UnlockRosterRequest>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.unlock_roster(RankingId(id), &request.period_label) {
        Ok(roster) => (StatusCode::OK, Json(roster)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn delete_application_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path((id, application_id)): Path<(u64, u64)>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.delete_application(RankingId(id), ApplicationId(application_id)) {
        Ok(ranking) => {
            let view = RankingView::build(&ranking, service.quotas());
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn restore_application_handler<R>(
    State(service): State<Arc<RankingService<R>>>,
    Path((id, application_id)): Path<(u64, u64)>,
) -> Response
where
    R: RankingRepository + 'static,
{
    match service.restore_application(RankingId(id), ApplicationId(application_id)) {
        Ok(ranking) => {
            let view = RankingView::build(&ranking, service.quotas());
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

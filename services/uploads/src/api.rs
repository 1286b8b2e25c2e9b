use crate::audit::{AuditEntry, AuditLog};
use crate::blob_store::ObjectStore;
use crate::compression::{CompressionStrategy, UploadFile};
use crate::config::ApiConfig;
use crate::entity::{
    EntityDraft, EntityKind, FoodDraft, FoodRecord, ImageDraft, ImageRecord, PeerReviewDraft,
    PeerReviewRecord, Visibility,
};
use crate::pipeline::{PipelineError, UploadPipeline, UploadRequest};
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::repository::EntityRepository;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Header carrying the authenticated caller's id
pub const CALLER_HEADER: &str = "x-user-id";

/// Shared limiter token for the cached profile read endpoints
pub const CACHE_TOKEN: &str = "CACHE_TOKEN";

const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Audit name of the profile foods read
pub const LIST_FOODS_API_NAME: &str = "get_profile_foods";
pub const GET_FOOD_API_NAME: &str = "get_food";
pub const LIST_IMAGES_API_NAME: &str = "get_images";
pub const LIST_PEER_REVIEWS_API_NAME: &str = "get_peer_reviews";

type RateHeaders = [(&'static str, String); 2];

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub repository: Arc<dyn EntityRepository>,
    pub object_store: Arc<dyn ObjectStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: AuditLog,
    pub presigned_url_expiry: Duration,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// `payload` part of a submit form
#[derive(Debug, Deserialize)]
struct SubmitPayload<T> {
    #[serde(flatten)]
    entity: T,
    #[serde(default)]
    visibility: Visibility,
    #[serde(default)]
    strategy: CompressionStrategy,
}

/// Created entity
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: i64,
    pub kind: String,
    pub blob_path: Option<String>,
}

/// Query parameters for reads that can return blob URLs
#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    /// Include presigned image URLs
    #[serde(default)]
    pub include_urls: bool,
}

/// Food with optional presigned image URL
#[derive(Debug, Serialize)]
pub struct FoodWithUrl {
    #[serde(flatten)]
    pub food: FoodRecord,
    pub url: Option<String>,
    pub url_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ProfileFoodsResponse {
    pub profile_id: String,
    pub foods: Vec<FoodWithUrl>,
    pub count: usize,
}

/// Image with optional presigned URL for its file
#[derive(Debug, Serialize)]
pub struct ImageWithUrl {
    #[serde(flatten)]
    pub image: ImageRecord,
    pub url: Option<String>,
    pub url_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageWithUrl>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct PeerReviewsResponse {
    pub peer_reviews: Vec<PeerReviewRecord>,
    pub count: usize,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/foods", post(submit_food))
        .route("/api/v1/foods/:food_id", get(get_food))
        .route("/api/v1/images", post(submit_image).get(list_images))
        .route(
            "/api/v1/peer-reviews",
            post(submit_peer_review).get(list_peer_reviews),
        )
        .route("/api/v1/profiles/:profile_id/foods", get(list_profile_foods))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "uploads-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.repository.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[instrument(skip_all)]
async fn submit_food(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    submit_entity::<FoodDraft>(&state, &headers, multipart, EntityDraft::Food).await
}

#[instrument(skip_all)]
async fn submit_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    submit_entity::<ImageDraft>(&state, &headers, multipart, EntityDraft::Image).await
}

#[instrument(skip_all)]
async fn submit_peer_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    submit_entity::<PeerReviewDraft>(&state, &headers, multipart, EntityDraft::PeerReview).await
}

async fn submit_entity<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    multipart: Multipart,
    into_draft: fn(T) -> EntityDraft,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let owner_id = caller_id(headers).ok_or_else(|| {
        error_response(
            StatusCode::UNAUTHORIZED,
            "Missing caller id",
            "UNAUTHENTICATED",
        )
    })?;

    let (payload, file) = read_form(multipart).await?;

    let payload: SubmitPayload<T> = serde_json::from_str(payload.as_deref().unwrap_or("{}"))
        .map_err(|e| {
            warn!(error = %e, "Invalid submit payload");
            error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid payload: {e}"),
                "INVALID_PAYLOAD",
            )
        })?;

    let entity = into_draft(payload.entity);
    let kind = entity.kind();

    let request = UploadRequest {
        owner_id,
        entity,
        file,
        strategy: payload.strategy,
        visibility: payload.visibility,
    };

    match state.pipeline.submit(request).await {
        Ok(outcome) => Ok((
            StatusCode::CREATED,
            Json(SubmitResponse {
                id: outcome.id,
                kind: outcome.kind.label().to_string(),
                blob_path: outcome.blob_path,
            }),
        )),
        Err(e) => Err(pipeline_error_response(&e, kind)),
    }
}

/// Map a pipeline failure to a status; the caller only sees the generic message
fn pipeline_error_response(err: &PipelineError, kind: EntityKind) -> ApiError {
    let (status, code) = match err {
        PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        PipelineError::Compression(_) => (StatusCode::UNPROCESSABLE_ENTITY, "COMPRESSION_ERROR"),
        PipelineError::Upload { .. } => (StatusCode::BAD_GATEWAY, "UPLOAD_ERROR"),
        PipelineError::Persist { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "PERSIST_ERROR"),
    };
    error_response(status, err.user_message(kind), code)
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Collect the `payload` and `file` parts; other parts are ignored
async fn read_form(
    mut multipart: Multipart,
) -> Result<(Option<String>, Option<UploadFile>), ApiError> {
    let malformed = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            warn!(error = %e, "Multipart body over the size limit");
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "File too large",
                "FILE_TOO_LARGE",
            );
        }
        warn!(error = %e, "Malformed multipart body");
        error_response(StatusCode::BAD_REQUEST, e.body_text(), "INVALID_FORM")
    };

    let mut payload = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("payload") => {
                payload = Some(field.text().await.map_err(malformed)?);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(malformed)?;
                // Browsers send an empty part when no file was picked
                if !bytes.is_empty() {
                    let mut upload = UploadFile::new(bytes.to_vec(), filename);
                    upload.content_type = content_type;
                    file = Some(upload);
                }
            }
            _ => {}
        }
    }

    Ok((payload, file))
}

/// Count a read against the shared cache token.
///
/// A rejection comes back as a ready 429 so the handler returns before any
/// repository call.
fn admit_read(state: &AppState) -> Result<RateHeaders, Response> {
    match state
        .rate_limiter
        .check(CACHE_TOKEN, state.rate_limiter.default_limit())
    {
        RateLimitDecision::Allowed { limit, remaining } => Ok([
            (RATE_LIMIT_LIMIT_HEADER, limit.to_string()),
            (RATE_LIMIT_REMAINING_HEADER, remaining.to_string()),
        ]),
        RateLimitDecision::Limited { limit, retry_after } => {
            metrics::counter!("ratelimit.rejected").increment(1);
            warn!(limit, retry_after = ?retry_after, "Rate limit exceeded");
            Err((
                StatusCode::TOO_MANY_REQUESTS,
                [
                    (RATE_LIMIT_LIMIT_HEADER, limit.to_string()),
                    (RATE_LIMIT_REMAINING_HEADER, "0".to_string()),
                    ("retry-after", retry_after.as_secs().max(1).to_string()),
                ],
                Json(ErrorResponse {
                    error: "Rate limit exceeded".to_string(),
                    code: "RATE_LIMITED".to_string(),
                }),
            )
                .into_response())
        }
    }
}

fn query_failed(rate_headers: RateHeaders, message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        rate_headers,
        Json(ErrorResponse {
            error: message.to_string(),
            code: "QUERY_ERROR".to_string(),
        }),
    )
        .into_response()
}

async fn audit_read(state: &AppState, viewer_id: &str, api_name: &str) {
    let called_by = if viewer_id.is_empty() {
        "anonymous"
    } else {
        viewer_id
    };
    state
        .audit
        .record_best_effort(AuditEntry::new(called_by, api_name))
        .await;
}

/// Presign `path` when asked to; a signing failure drops the URL, not the row
async fn optional_url(
    state: &AppState,
    path: Option<&str>,
    include_urls: bool,
) -> (Option<String>, Option<DateTime<Utc>>) {
    match path {
        Some(path) if include_urls => match presign(state, path).await {
            Ok((url, expires_at)) => (Some(url), expires_at),
            Err(e) => {
                error!(error = %e, path = %path, "Failed to generate presigned URL");
                (None, None)
            }
        },
        _ => (None, None),
    }
}

/// Foods on a profile visible to the caller. Rate limited before any read.
#[instrument(skip(state, headers))]
async fn list_profile_foods(
    State(state): State<AppState>,
    Path(profile_id): Path<String>,
    Query(params): Query<UrlQuery>,
    headers: HeaderMap,
) -> Response {
    let rate_headers = match admit_read(&state) {
        Ok(headers) => headers,
        Err(limited) => return limited,
    };

    let viewer_id = caller_id(&headers).unwrap_or_default();

    let foods = match state.repository.list_foods(&profile_id, &viewer_id).await {
        Ok(foods) => foods,
        Err(e) => {
            error!(error = %e, "Failed to query foods");
            return query_failed(rate_headers, "Failed to query foods");
        }
    };

    let mut responses = Vec::with_capacity(foods.len());
    for food in foods.into_iter().filter(|f| f.readable_by(&viewer_id)) {
        let (url, url_expires_at) =
            optional_url(&state, food.image_url.as_deref(), params.include_urls).await;
        responses.push(FoodWithUrl {
            food,
            url,
            url_expires_at,
        });
    }

    audit_read(&state, &viewer_id, LIST_FOODS_API_NAME).await;

    (
        StatusCode::OK,
        rate_headers,
        Json(ProfileFoodsResponse {
            profile_id,
            count: responses.len(),
            foods: responses,
        }),
    )
        .into_response()
}

/// A single food; private foods of other users read as missing
#[instrument(skip(state, headers))]
async fn get_food(
    State(state): State<AppState>,
    Path(food_id): Path<i64>,
    Query(params): Query<UrlQuery>,
    headers: HeaderMap,
) -> Response {
    let rate_headers = match admit_read(&state) {
        Ok(headers) => headers,
        Err(limited) => return limited,
    };

    let viewer_id = caller_id(&headers).unwrap_or_default();

    let food = match state.repository.get_food(food_id, &viewer_id).await {
        Ok(food) => food.filter(|f| f.readable_by(&viewer_id)),
        Err(e) => {
            error!(error = %e, "Failed to query food");
            return query_failed(rate_headers, "Failed to query food");
        }
    };

    let Some(food) = food else {
        return (
            StatusCode::NOT_FOUND,
            rate_headers,
            Json(ErrorResponse {
                error: "Food not found".to_string(),
                code: "NOT_FOUND".to_string(),
            }),
        )
            .into_response();
    };

    let (url, url_expires_at) =
        optional_url(&state, food.image_url.as_deref(), params.include_urls).await;

    audit_read(&state, &viewer_id, GET_FOOD_API_NAME).await;

    (
        StatusCode::OK,
        rate_headers,
        Json(FoodWithUrl {
            food,
            url,
            url_expires_at,
        }),
    )
        .into_response()
}

#[instrument(skip(state, headers))]
async fn list_images(
    State(state): State<AppState>,
    Query(params): Query<UrlQuery>,
    headers: HeaderMap,
) -> Response {
    let rate_headers = match admit_read(&state) {
        Ok(headers) => headers,
        Err(limited) => return limited,
    };

    let viewer_id = caller_id(&headers).unwrap_or_default();

    let images = match state.repository.list_images(&viewer_id).await {
        Ok(images) => images,
        Err(e) => {
            error!(error = %e, "Failed to query images");
            return query_failed(rate_headers, "Failed to query images");
        }
    };

    let mut responses = Vec::with_capacity(images.len());
    for image in images.into_iter().filter(|i| i.readable_by(&viewer_id)) {
        let (url, url_expires_at) =
            optional_url(&state, image.filepath.as_deref(), params.include_urls).await;
        responses.push(ImageWithUrl {
            image,
            url,
            url_expires_at,
        });
    }

    audit_read(&state, &viewer_id, LIST_IMAGES_API_NAME).await;

    (
        StatusCode::OK,
        rate_headers,
        Json(ImagesResponse {
            count: responses.len(),
            images: responses,
        }),
    )
        .into_response()
}

#[instrument(skip(state, headers))]
async fn list_peer_reviews(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let rate_headers = match admit_read(&state) {
        Ok(headers) => headers,
        Err(limited) => return limited,
    };

    let viewer_id = caller_id(&headers).unwrap_or_default();

    let reviews: Vec<_> = match state.repository.list_peer_reviews(&viewer_id).await {
        Ok(reviews) => reviews
            .into_iter()
            .filter(|r| r.readable_by(&viewer_id))
            .collect(),
        Err(e) => {
            error!(error = %e, "Failed to query peer reviews");
            return query_failed(rate_headers, "Failed to query peer reviews");
        }
    };

    audit_read(&state, &viewer_id, LIST_PEER_REVIEWS_API_NAME).await;

    (
        StatusCode::OK,
        rate_headers,
        Json(PeerReviewsResponse {
            count: reviews.len(),
            peer_reviews: reviews,
        }),
    )
        .into_response()
}

async fn presign(state: &AppState, path: &str) -> Result<(String, Option<DateTime<Utc>>)> {
    let url = state
        .object_store
        .presigned_url(path, state.presigned_url_expiry)
        .await?;

    let expires_at = chrono::Duration::from_std(state.presigned_url_expiry)
        .ok()
        .map(|d| Utc::now() + d);

    Ok((url, expires_at))
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting uploads API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

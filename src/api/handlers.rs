use axum::{
    extract::State,
    http::{StatusCode, Uri},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::models::{ClientProfile, Normalization, Recommendation};
use crate::services::{RefreshOutcome, Recommender};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct CoinstallRequest {
    pub guid: String,
    /// Normalization name; defaults to `rownorm_sum`
    pub normalization: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CoinstallResponse {
    pub guid: String,
    pub normalization: String,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    #[serde(flatten)]
    pub profile: ClientProfile,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub client_id: String,
    pub recommender: &'static str,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub active_generation: Option<u8>,
    pub local_generation: Option<u8>,
    pub lease_holder: Option<String>,
}

/// Resolves the requested limit, rejecting values above `max_limit`
fn resolve_limit(
    requested: Option<usize>,
    default_limit: usize,
    max_limit: usize,
) -> AppResult<usize> {
    let limit = requested.unwrap_or(default_limit);
    if limit > max_limit {
        return Err(AppError::InvalidInput(format!(
            "limit must be at most {}",
            max_limit
        )));
    }
    Ok(limit)
}

// Handlers

pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Which generation is published and which one this process reads
pub async fn get_generation(State(state): State<AppState>) -> AppResult<Json<GenerationResponse>> {
    let active = state.cache.get_active_generation().await?;
    Ok(Json(GenerationResponse {
        active_generation: active.map(|g| g.id()),
        local_generation: state.cache.last_seen_generation().map(|g| g.id()),
        lease_holder: state.cache.lease_holder().await?,
    }))
}

/// Coinstallation recommendations for a single seed add-on.
///
/// Unknown normalizations and seeds without data answer with an empty list.
pub async fn recommend_coinstall(
    State(state): State<AppState>,
    Json(request): Json<CoinstallRequest>,
) -> AppResult<Json<CoinstallResponse>> {
    let guid = request.guid.trim();
    if guid.is_empty() {
        return Err(AppError::InvalidInput("guid must not be empty".to_string()));
    }

    let normalization = request
        .normalization
        .unwrap_or_else(|| Normalization::default().to_string());
    let limit = resolve_limit(request.limit, state.default_limit, state.max_limit)?;

    let recommendations = state
        .coinstall
        .recommend(guid, &normalization, limit)
        .await?;

    Ok(Json(CoinstallResponse {
        guid: guid.to_string(),
        normalization,
        recommendations,
    }))
}

pub async fn recommend_ensemble(
    State(state): State<AppState>,
    Json(request): Json<ProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    recommend_for_profile(&state, state.ensemble.as_ref(), request).await
}

pub async fn recommend_hybrid(
    State(state): State<AppState>,
    Json(request): Json<ProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    recommend_for_profile(&state, state.hybrid.as_ref(), request).await
}

/// Resolves one generation view for the whole request and runs `recommender`
/// against it
async fn recommend_for_profile(
    state: &AppState,
    recommender: &dyn Recommender,
    request: ProfileRequest,
) -> AppResult<Json<ProfileResponse>> {
    let ProfileRequest { profile, limit } = request;
    if profile.client_id.trim().is_empty() {
        return Err(AppError::InvalidInput("client_id must not be empty".to_string()));
    }
    let limit = resolve_limit(limit, state.default_limit, state.max_limit)?;

    let Some(view) = state.cache.ensure_fresh().await? else {
        tracing::info!(client_id = %profile.client_id, "No active generation, cannot recommend");
        return Ok(Json(ProfileResponse {
            client_id: profile.client_id,
            recommender: recommender.name(),
            recommendations: Vec::new(),
        }));
    };

    let recommendations = recommender
        .recommend(&view, &profile, limit)
        .await?
        .into_iter()
        .map(|(guid, weight)| Recommendation::weighted(guid, weight))
        .collect();

    Ok(Json(ProfileResponse {
        client_id: profile.client_id,
        recommender: recommender.name(),
        recommendations,
    }))
}

/// Fallback for unknown paths
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}

/// Runs a refresh now, unless another process holds the lease
pub async fn refresh(State(state): State<AppState>) -> AppResult<Json<RefreshOutcome>> {
    Ok(Json(state.cache.refresh().await?))
}

//! HTTP request handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use klaxon_common::Snapshot;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use crate::engine::{AlertOutcome, EngineStatus};
use crate::error::{ChainError, ResolveError};
use crate::playback::Priority;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct EngineStatusResponse {
    version: String,
    port: u16,
    #[serde(flatten)]
    engine: EngineStatus,
}

/// One snapshot or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SnapshotBatch {
    One(Snapshot),
    Many(Vec<Snapshot>),
}

impl SnapshotBatch {
    fn into_vec(self) -> Vec<Snapshot> {
        match self {
            SnapshotBatch::One(snapshot) => vec![snapshot],
            SnapshotBatch::Many(snapshots) => snapshots,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    accepted: usize,
    outcomes: Vec<AlertOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ChainResponse {
    status: String,
    chain_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestPoolQuery {
    /// Also submit the selected sound for playback
    #[serde(default)]
    play: bool,
}

#[derive(Debug, Serialize)]
pub struct TestPoolResponse {
    pool_id: String,
    sound: String,
    path: String,
    volume: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<u64>,
}

type ApiError = (StatusCode, Json<StatusResponse>);

fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(StatusResponse {
            status: message.into(),
        }),
    )
}

fn chain_error(error: ChainError) -> ApiError {
    let code = match &error {
        ChainError::NotFound(_) => StatusCode::NOT_FOUND,
        ChainError::AlreadyRunning(_) | ChainError::NotRunning(_) => StatusCode::CONFLICT,
        ChainError::RequiredStepFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(code, error.to_string())
}

fn resolve_error(error: ResolveError) -> ApiError {
    let code = match &error {
        ResolveError::NotFound { .. } => StatusCode::NOT_FOUND,
        ResolveError::EmptyPool(_) | ResolveError::NotASound(_) => StatusCode::BAD_REQUEST,
    };
    api_error(code, error.to_string())
}

// ============================================================================
// Health / Status
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "klaxon-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/v1/status - counters, running chains, queue depth
pub async fn status(State(state): State<AppState>) -> Json<EngineStatusResponse> {
    Json(EngineStatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        port: state.port,
        engine: state.engine.status(),
    })
}

// ============================================================================
// Snapshots
// ============================================================================

/// POST /api/v1/snapshots - feed one snapshot or an array of them
pub async fn ingest_snapshots(
    State(state): State<AppState>,
    body: Result<Json<SnapshotBatch>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(batch) = body.map_err(|e| {
        warn!("Rejected snapshot body: {}", e);
        api_error(StatusCode::BAD_REQUEST, e.body_text())
    })?;
    let snapshots = batch.into_vec();

    if let Some(blank) = snapshots.iter().position(|s| s.key.trim().is_empty()) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("snapshot {} has an empty key", blank),
        ));
    }

    let accepted = snapshots.len();
    let outcomes = snapshots
        .iter()
        .flat_map(|snapshot| state.engine.ingest(snapshot))
        .collect();

    Ok(Json(IngestResponse { accepted, outcomes }))
}

// ============================================================================
// Chains
// ============================================================================

/// POST /api/v1/chains/:chain_id/run
pub async fn run_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<String>,
) -> Result<(StatusCode, Json<ChainResponse>), ApiError> {
    state.engine.run_chain(&chain_id).map_err(chain_error)?;
    info!(chain_id = %chain_id, "Chain started via API");
    Ok((
        StatusCode::ACCEPTED,
        Json(ChainResponse {
            status: "started".to_string(),
            chain_id,
        }),
    ))
}

/// POST /api/v1/chains/:chain_id/stop
pub async fn stop_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<String>,
) -> Result<Json<ChainResponse>, ApiError> {
    state.engine.stop_chain(&chain_id).map_err(chain_error)?;
    Ok(Json(ChainResponse {
        status: "stopping".to_string(),
        chain_id,
    }))
}

// ============================================================================
// Pools
// ============================================================================

/// GET /api/v1/pools/:pool_id/test[?play=true]
///
/// One selection from the pool, bypassing detection and cooldown.
pub async fn test_pool(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Query(query): Query<TestPoolQuery>,
) -> Result<Json<TestPoolResponse>, ApiError> {
    let resolved = state.engine.test_pool(&pool_id).map_err(resolve_error)?;
    info!(pool_id = %pool_id, sound = %resolved.sound, "Pool test selection");

    let mut response = TestPoolResponse {
        pool_id,
        sound: resolved.sound.clone(),
        path: resolved.path.display().to_string(),
        volume: resolved.volume,
        request_id: None,
    };
    if query.play {
        let handle = state.engine.play(resolved, Priority::Normal);
        response.request_id = Some(handle.id());
    }
    Ok(Json(response))
}

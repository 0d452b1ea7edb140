//! Thin axum handlers over the pipeline (spec §6 — explicitly out of scope
//! as a deep implementation, carried here only because a runnable service
//! needs a transport). Mirrors the teacher's `App::new` router assembly:
//! one `Router` built once, `CorsLayer` + `TraceLayer` layered on top,
//! `AppState` injected via `.with_state`.

use crate::cache::CacheStats;
use crate::errors::{AppError, AppResult};
use crate::models::{Artist, RecommendRequest, RecommendResponse};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/recommend", axum::routing::post(recommend))
        .route("/api/artists/:id", axum::routing::get(get_artist))
        .route("/api/playlists", axum::routing::get(list_playlists))
        .route("/api/library/test", axum::routing::get(library_test))
        .route("/api/cache/stats", axum::routing::get(cache_stats))
        .route("/api/cache/clear", axum::routing::post(cache_clear))
        .route("/api/health", axum::routing::get(health))
        .route("/api/info", axum::routing::get(info))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn recommend(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecommendRequest>,
) -> Json<RecommendResponse> {
    Json(state.orchestrator.recommend(request).await)
}

#[derive(Debug, Serialize)]
struct ArtistResponse {
    artist: Option<Artist>,
    needs_fetch: bool,
}

async fn get_artist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ArtistResponse>> {
    if !is_valid_mbid(&id) {
        return Err(AppError::BadRequest("Invalid MBID format".to_string()));
    }
    let (artist, needs_refresh) = state.cache.get(&id).await?;
    match artist {
        Some(artist) => Ok(Json(ArtistResponse {
            artist: Some(artist),
            needs_fetch: needs_refresh,
        })),
        None => Err(AppError::NotFound(format!("no artist with id {id}"))),
    }
}

/// Length 36, hyphens at positions 8/13/18/23, hex everywhere else
/// (spec §6).
fn is_valid_mbid(id: &str) -> bool {
    if id.len() != 36 {
        return false;
    }
    id.chars().enumerate().all(|(i, c)| {
        if [8, 13, 18, 23].contains(&i) {
            c == '-'
        } else {
            c.is_ascii_hexdigit()
        }
    })
}

#[derive(Debug, Serialize)]
struct PlaylistsResponse {
    playlists: Vec<crate::models::Playlist>,
    count: usize,
}

async fn list_playlists(State(state): State<Arc<AppState>>) -> AppResult<Json<PlaylistsResponse>> {
    let playlists = state.library.list_playlists().await?;
    Ok(Json(PlaylistsResponse {
        count: playlists.len(),
        playlists,
    }))
}

#[derive(Debug, Serialize)]
struct LibraryTestResponse {
    status: &'static str,
    server: Option<String>,
}

async fn library_test(State(state): State<Arc<AppState>>) -> Json<LibraryTestResponse> {
    match state.library.test_connection().await {
        Ok(()) => Json(LibraryTestResponse {
            status: "ok",
            server: Some(state.options.library_url.clone()),
        }),
        Err(_) => Json(LibraryTestResponse {
            status: "unreachable",
            server: None,
        }),
    }
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> AppResult<Json<CacheStats>> {
    Ok(Json(state.cache.stats().await?))
}

#[derive(Debug, Serialize)]
struct CacheClearResponse {
    status: &'static str,
    message: String,
}

async fn cache_clear(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<CacheClearResponse>> {
    let kind = params.get("type").map(String::as_str).unwrap_or("expired");
    let count = match kind {
        "all" => state.cache.clear_all().await?,
        "expired" => state.cache.clear_expired().await?,
        other => {
            return Err(AppError::BadRequest(format!(
                "unknown cache clear type {other}"
            )))
        }
    };
    Ok(Json(CacheClearResponse {
        status: "ok",
        message: format!("cleared {count} entries"),
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: chrono::DateTime<Utc>,
    version: String,
    cache: CacheStats,
    library: LibraryTestResponse,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let cache = state.cache.stats().await.unwrap_or_default();
    let library = match state.library.test_connection().await {
        Ok(()) => LibraryTestResponse {
            status: "ok",
            server: Some(state.options.library_url.clone()),
        },
        Err(_) => LibraryTestResponse {
            status: "unreachable",
            server: None,
        },
    };
    Json(HealthResponse {
        status: "ok",
        service: "discovery-server",
        timestamp: Utc::now(),
        version: state.options.server_version.clone(),
        cache,
        library,
    })
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    service: &'static str,
    version: String,
    features: Vec<&'static str>,
    sources: Vec<&'static str>,
}

async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "discovery-server",
        version: state.options.server_version.clone(),
        features: vec!["recommendations", "enrichment-cache", "background-refresh"],
        sources: vec!["canonical", "discogs", "lastfm", "llm"],
    })
}

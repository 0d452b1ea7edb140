//! End-to-end tests over the HTTP surface (spec §6), driven with
//! `tower::ServiceExt::oneshot` against a real router/`AppState` — no mock
//! server substitutes for the library/canonical/LLM upstreams, so these
//! exercise the paths reachable without live network: validation, cache
//! introspection, and the non-fatal failure shape when an upstream is
//! unreachable.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use discovery_server::cache::Cache;
use discovery_server::clients::canonical::CanonicalClient;
use discovery_server::clients::library::LibraryClient;
use discovery_server::clients::llm::LlmClient;
use discovery_server::config::{CacheOptions, RefresherOptions, TtlOptions};
use discovery_server::enrichment::EnrichmentEngine;
use discovery_server::http;
use discovery_server::orchestrator::Orchestrator;
use discovery_server::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// An `AppState` wired with real collaborators pointed at a library URL
/// with nothing listening on it, so upstream calls fail fast rather than
/// reaching the network.
async fn test_state() -> Arc<AppState> {
    let cache = Arc::new(Cache::new(&CacheOptions { path: None, in_memory: true }).unwrap());
    cache.migrate().await.unwrap();

    let library = Arc::new(LibraryClient::new(
        "http://127.0.0.1:1",
        "testuser",
        "testpass",
    ));
    let llm = Arc::new(LlmClient::new("test-key", "gpt-4o-mini"));
    let engine = Arc::new(EnrichmentEngine::new(CanonicalClient::new(), vec![]));
    let orchestrator = Arc::new(Orchestrator::new(
        library.clone(),
        llm,
        engine,
        cache.clone(),
        TtlOptions::default(),
    ));

    Arc::new(AppState {
        options: discovery_server::config::ServerOptions {
            library_url: "http://127.0.0.1:1".to_string(),
            library_user: "testuser".to_string(),
            library_password: "testpass".to_string(),
            llm_api_key: "test-key".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            discogs_token: None,
            lastfm_api_key: None,
            cache: CacheOptions { path: None, in_memory: true },
            ttl: TtlOptions::default(),
            refresher: RefresherOptions::default(),
            server_version: "test".to_string(),
        },
        cache,
        library,
        orchestrator,
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok_with_cache_and_library_sections() {
    let state = test_state().await;
    let router = http::router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "discovery-server");
    assert_eq!(body["library"]["status"], "unreachable");
}

#[tokio::test]
async fn info_lists_sources() {
    let state = test_state().await;
    let router = http::router(state);

    let response = router
        .oneshot(Request::builder().uri("/api/info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let sources: Vec<String> = body["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(sources.contains(&"canonical".to_string()));
    assert!(sources.contains(&"lastfm".to_string()));
}

#[tokio::test]
async fn artist_lookup_rejects_malformed_mbid() {
    let state = test_state().await;
    let router = http::router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/artists/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid MBID format");
}

#[tokio::test]
async fn artist_lookup_404s_on_well_formed_but_unknown_id() {
    let state = test_state().await;
    let router = http::router(state);

    let well_formed = "01234567-89ab-cdef-0123-456789abcdef";
    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/api/artists/{well_formed}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cache_stats_and_clear_round_trip() {
    let state = test_state().await;

    let router = http::router(state.clone());
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/cache/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 0);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cache/clear?type=expired")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn cache_clear_rejects_unknown_type() {
    let state = test_state().await;
    let router = http::router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cache/clear?type=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Library failure on seed fetch aborts the request (spec §7, "required-
/// source failures propagate"). No upstream is listening, so this exercises
/// the real failure path rather than a mock.
#[tokio::test]
async fn recommend_returns_error_status_when_library_is_unreachable() {
    let state = test_state().await;
    let router = http::router(state);

    let request = json!({
        "playlist_name": "Best Of",
        "max_results": 3,
    });

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/recommend")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["suggestions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn options_preflight_is_not_routed_to_handlers() {
    let state = test_state().await;
    let router = http::router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/recommend")
                .header("origin", "https://example.com")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

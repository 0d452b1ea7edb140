//! C9: the recommendation orchestrator (spec §4.9) — the top-level pipeline
//! stitching seeds → exclusions → LLM → filter → enrich → response.

use crate::cache::Cache;
use crate::clients::library::LibraryClient;
use crate::clients::llm::{filter_known, LlmClient};
use crate::config::TtlOptions;
use crate::enrichment::EnrichmentEngine;
use crate::errors::{AppError, AppResult};
use crate::models::{Artist, RecommendMetadata, RecommendRequest, RecommendResponse};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::warn;

const MAX_CONCURRENT_ENRICHMENTS: usize = 3;

pub struct Orchestrator {
    library: Arc<LibraryClient>,
    llm: Arc<LlmClient>,
    engine: Arc<EnrichmentEngine>,
    cache: Arc<Cache>,
    ttl: TtlOptions,
}

impl Orchestrator {
    pub fn new(
        library: Arc<LibraryClient>,
        llm: Arc<LlmClient>,
        engine: Arc<EnrichmentEngine>,
        cache: Arc<Cache>,
        ttl: TtlOptions,
    ) -> Self {
        Self {
            library,
            llm,
            engine,
            cache,
            ttl,
        }
    }

    pub async fn recommend(&self, request: RecommendRequest) -> RecommendResponse {
        let start = Instant::now();
        let request_id = format!("rec_{}", monotonic_nanos());

        match self.run(&request).await {
            Ok((suggestions, mut metadata)) => {
                metadata.processing_ms = start.elapsed().as_millis() as u64;
                metadata.generated_at = Utc::now();
                RecommendResponse {
                    status: "success",
                    request_id,
                    suggestions,
                    metadata,
                    error: None,
                }
            }
            Err(err) => RecommendResponse {
                status: "error",
                request_id,
                suggestions: vec![],
                metadata: RecommendMetadata {
                    processing_ms: start.elapsed().as_millis() as u64,
                    generated_at: Utc::now(),
                    ..Default::default()
                },
                error: Some(err.to_string()),
            },
        }
    }

    async fn run(&self, request: &RecommendRequest) -> AppResult<(Vec<Artist>, RecommendMetadata)> {
        // Step 1: normalize.
        let max_results = normalize_max_results(request.max_results);

        // Step 2: seeds, with the 7★ → 5★ → full-playlist fallback.
        let (seeds, seed_rating_floor) = self.fetch_seeds(&request.playlist_name).await?;
        if seeds.is_empty() {
            return Err(AppError::NoSeeds);
        }

        // Step 3: exclusion set, non-fatal.
        let known_artists = match self.library.list_all_artists().await {
            Ok(artists) => artists,
            Err(err) => {
                warn!(error = %err, "failed to fetch known-artist list, proceeding with an empty exclusion set");
                Vec::new()
            }
        };

        // Step 4: call the LLM for 2x slack.
        let prompt = self.llm.build_prompt(
            &seeds,
            &known_artists,
            request.genre.as_deref(),
            max_results * 2,
        );
        let raw_suggestions = self.llm.complete(prompt, max_results).await?;

        // Step 5: exclusion filter.
        let survivors = filter_known(&raw_suggestions, &known_artists);
        if survivors.is_empty() {
            return Err(AppError::AllFiltered(format!(
                "all {} LLM suggestions were already known",
                raw_suggestions.len()
            )));
        }

        // Step 6: truncate to max_results.
        let truncated: Vec<String> = survivors.into_iter().take(max_results as usize).collect();

        // Step 7: bounded enrichment, order-preserving.
        let (suggestions, warnings, cache_hits, enrichment_calls) =
            self.enrich_in_order(truncated).await;

        let metadata = RecommendMetadata {
            seed_track_count: seeds.len(),
            known_artist_count: known_artists.len(),
            processing_ms: 0,
            cache_hits,
            // seeds + exclusion list + LLM call, plus one call per canonical
            // resolve/secondary-source lookup actually made (cache hits pay
            // nothing extra).
            api_call_count: 3 + enrichment_calls,
            seed_rating_floor,
            generated_at: Utc::now(),
            warnings,
        };

        Ok((suggestions, metadata))
    }

    async fn fetch_seeds(&self, playlist_name: &str) -> AppResult<(Vec<crate::models::PlaylistTrack>, u8)> {
        let seven_star = self.library.get_highly_rated(playlist_name, 7).await?;
        if !seven_star.is_empty() {
            return Ok((seven_star, 7));
        }
        let five_star = self.library.get_highly_rated(playlist_name, 5).await?;
        if !five_star.is_empty() {
            return Ok((five_star, 5));
        }
        let all_tracks = self.library.get_playlist_tracks(playlist_name).await?;
        Ok((all_tracks, 0))
    }

    /// Concurrency bounded to 3 in-flight enrichments; results are collected
    /// into an index-keyed slot map and flattened back into the LLM's
    /// original order, dropping any name whose enrichment failed (spec §9).
    /// Each task resolves the canonical id first, consults the cache by that
    /// id, and only pays for the secondary-source calls on a miss or a stale
    /// hit — a fresh hit is returned as-is and counted in `cache_hits`.
    async fn enrich_in_order(&self, names: Vec<String>) -> (Vec<Artist>, Vec<String>, usize, usize) {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_ENRICHMENTS));
        let mut set = tokio::task::JoinSet::new();

        for (index, name) in names.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let engine = self.engine.clone();
            let cache = self.cache.clone();
            let ttl = self.ttl;
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = Self::enrich_one(&engine, &cache, &ttl, &name).await;
                let stored = match outcome {
                    Ok((artist, hit, calls, warnings)) => (Some(artist), hit, calls, warnings),
                    Err(err) => (None, false, 0, vec![format!("{name}: {err}")]),
                };
                (index, stored)
            });
        }

        let mut warnings = Vec::new();
        let mut cache_hits = 0usize;
        let mut api_calls = 0usize;
        let mut results: Vec<(usize, Option<Artist>)> = Vec::new();

        while let Some(joined) = set.join_next().await {
            if let Ok((index, (artist, hit, calls, mut msgs))) = joined {
                warnings.append(&mut msgs);
                if hit {
                    cache_hits += 1;
                }
                api_calls += calls;
                results.push((index, artist));
            }
        }
        results.sort_by_key(|(index, _)| *index);

        let suggestions: Vec<Artist> = results.into_iter().filter_map(|(_, artist)| artist).collect();
        (suggestions, warnings, cache_hits, api_calls)
    }

    /// `(artist, was_cache_hit, api_calls_made, warnings)`.
    async fn enrich_one(
        engine: &EnrichmentEngine,
        cache: &Cache,
        ttl: &TtlOptions,
        name: &str,
    ) -> AppResult<(Artist, bool, usize, Vec<String>)> {
        let baseline = engine.resolve_by_name(name).await?;
        let (cached, needs_refresh) = cache.get(&baseline.id).await.unwrap_or((None, true));
        if let Some(artist) = cached {
            if !needs_refresh {
                return Ok((artist, true, 0, Vec::new()));
            }
        }

        let (enriched, warnings) = engine.run_secondary_sources(baseline).await?;
        let persisted = cache.put(enriched, ttl).await?;
        let calls = 1 + engine.source_count();
        Ok((persisted, false, calls, warnings))
    }
}

/// Clamp to `[1, 20]`, default 5 when `≤ 0` (spec §4.9 step 1).
fn normalize_max_results(requested: Option<i64>) -> i64 {
    match requested {
        None => 5,
        Some(n) if n <= 0 => 5,
        Some(n) => n.min(20),
    }
}

fn monotonic_nanos() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_coerces_to_five() {
        assert_eq!(normalize_max_results(Some(0)), 5);
    }

    #[test]
    fn fifty_coerces_to_twenty() {
        assert_eq!(normalize_max_results(Some(50)), 20);
    }

    #[test]
    fn none_defaults_to_five() {
        assert_eq!(normalize_max_results(None), 5);
    }

    #[test]
    fn within_range_passes_through() {
        assert_eq!(normalize_max_results(Some(12)), 12);
    }

    #[tokio::test]
    async fn second_enrichment_of_same_name_is_served_from_a_fresh_cache_hit() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/artist"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "artists": [{
                    "id": "cache-hit-artist",
                    "name": "Boris",
                    "country": "JP",
                    "life-span": {"begin": "1992"},
                    "releases": [],
                    "tags": [],
                    "genres": []
                }]
            })))
            .mount(&server)
            .await;

        let engine = EnrichmentEngine::new(
            crate::clients::canonical::CanonicalClient::with_base_url(server.uri()),
            vec![],
        );
        let cache = Cache::new(&crate::config::CacheOptions { path: None, in_memory: true }).unwrap();
        cache.migrate().await.unwrap();
        let ttl = TtlOptions::default();

        let (first, first_hit, _, _) = Orchestrator::enrich_one(&engine, &cache, &ttl, "Boris")
            .await
            .unwrap();
        assert!(!first_hit);

        let (second, second_hit, _, _) = Orchestrator::enrich_one(&engine, &cache, &ttl, "Boris")
            .await
            .unwrap();
        assert!(second_hit);
        assert_eq!(second.id, first.id);
    }

    fn test_orchestrator(
        library_uri: &str,
        llm_uri: &str,
        canonical_uri: &str,
    ) -> Orchestrator {
        let library = Arc::new(crate::clients::library::LibraryClient::new(
            library_uri,
            "user",
            "pass",
        ));
        let llm = Arc::new(crate::clients::llm::LlmClient::with_endpoint(
            llm_uri, "key", "gpt",
        ));
        let engine = Arc::new(EnrichmentEngine::new(
            crate::clients::canonical::CanonicalClient::with_base_url(canonical_uri),
            vec![],
        ));
        let cache = Arc::new(Cache::new(&crate::config::CacheOptions { path: None, in_memory: true }).unwrap());
        Orchestrator::new(library, llm, engine, cache, TtlOptions::default())
    }

    /// Spec §8 scenario 2: every LLM suggestion is already a known library
    /// artist, so nothing survives the exclusion filter.
    #[tokio::test]
    async fn all_suggestions_already_known_yields_all_filtered_error() {
        let library = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/rest/getPlaylists.view"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(
                r#"<subsonic-response status="ok" version="1.16.1"><playlists><playlist name="Best Of" songCount="1"/></playlists></subsonic-response>"#,
                "application/xml",
            ))
            .mount(&library)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/rest/getPlaylist.view"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(
                r#"<subsonic-response status="ok" version="1.16.1"><playlist songCount="1"><entry title="Song" artist="Seed Artist" album="Album" year="2001" userRating="7"/></playlist></subsonic-response>"#,
                "application/xml",
            ))
            .mount(&library)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/rest/getArtists.view"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(
                r#"<subsonic-response status="ok" version="1.16.1"><artists><index><artist name="Band A"/><artist name="Band B"/></index></artists></subsonic-response>"#,
                "application/xml",
            ))
            .mount(&library)
            .await;

        let llm = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "content": "{\"suggestions\": [\"Band A\", \"Band B\"], \"reasoning\": \"close match\", \"confidence\": 0.9}"
                    }
                }]
            })))
            .mount(&llm)
            .await;

        let orchestrator = test_orchestrator(&library.uri(), &llm.uri(), "https://unused.example.org");
        let response = orchestrator
            .recommend(RecommendRequest {
                playlist_name: "Best Of".into(),
                genre: None,
                max_results: Some(5),
            })
            .await;

        assert_eq!(response.status, "error");
        assert!(response.suggestions.is_empty());
        let error = response.error.expect("an AllFiltered error message");
        assert!(error.contains("already known"), "unexpected error message: {error}");
    }

    /// Spec §8 "Artist-ordering preservation": `enrich_in_order` restores the
    /// LLM's original ordering regardless of which enrichment task finishes
    /// first.
    #[tokio::test]
    async fn enrich_in_order_preserves_llm_order_despite_out_of_order_completion() {
        let server = wiremock::MockServer::start().await;
        let mock_for = |name: &str, id: &str, delay_ms: u64| {
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .and(wiremock::matchers::path("/artist"))
                .and(wiremock::matchers::query_param(
                    "query",
                    format!("artist:\"{name}\"").as_str(),
                ))
                .respond_with(
                    wiremock::ResponseTemplate::new(200)
                        .set_delay(std::time::Duration::from_millis(delay_ms))
                        .set_body_json(serde_json::json!({
                            "artists": [{
                                "id": id,
                                "name": name,
                                "country": "US",
                                "life-span": {"begin": "2000"},
                                "releases": [],
                                "tags": [],
                                "genres": []
                            }]
                        })),
                )
        };
        mock_for("Alpha", "id-alpha", 120).mount(&server).await;
        mock_for("Beta", "id-beta", 60).mount(&server).await;
        mock_for("Gamma", "id-gamma", 0).mount(&server).await;

        let orchestrator = test_orchestrator("https://unused.example.org", "https://unused.example.org", &server.uri());
        let (suggestions, _warnings, _hits, _calls) = orchestrator
            .enrich_in_order(vec!["Alpha".to_string(), "Beta".to_string(), "Gamma".to_string()])
            .await;

        assert_eq!(
            suggestions.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            vec!["Alpha", "Beta", "Gamma"]
        );
    }
}

//! C7: the enrichment engine (spec §4.7). Turns a name or a canonical id
//! into a fully enriched [`Artist`], writing through nothing itself — the
//! caller (C9 or the refresher) decides whether/when to persist.

use crate::clients::canonical::CanonicalClient;
use crate::clients::EnrichmentSource;
use crate::errors::AppResult;
use crate::models::Artist;
use chrono::Utc;
use tracing::warn;

pub struct EnrichmentEngine {
    canonical: CanonicalClient,
    sources: Vec<Box<dyn EnrichmentSource>>,
}

impl EnrichmentEngine {
    pub fn new(canonical: CanonicalClient, sources: Vec<Box<dyn EnrichmentSource>>) -> Self {
        Self { canonical, sources }
    }

    /// Number of secondary sources configured; lets a caller meter API calls
    /// without reaching into the engine's internals.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Step 1-2 of spec §4.7: a canonical-source failure is fatal — there is
    /// no `id` to key a cacheable record on.
    pub async fn enrich_by_name(&self, name: &str) -> AppResult<(Artist, Vec<String>)> {
        let artist = self.resolve_by_name(name).await?;
        self.run_secondary_sources(artist).await
    }

    pub async fn enrich_by_id(&self, id: &str) -> AppResult<(Artist, Vec<String>)> {
        let artist = self.canonical.fetch_by_id(id).await?;
        self.run_secondary_sources(artist).await
    }

    /// Just the canonical-identity half of §4.7 step 1-2, split out so a
    /// caller (the orchestrator) can consult the cache by `id` before paying
    /// for the secondary-source calls in [`Self::run_secondary_sources`].
    pub async fn resolve_by_name(&self, name: &str) -> AppResult<Artist> {
        self.canonical
            .search_by_name(name)
            .await?
            .ok_or_else(|| crate::errors::AppError::NotFound(format!("no canonical artist named {name}")))
    }

    /// Used by the background refresher: same pipeline, but keeps the
    /// existing `id` rather than re-resolving it by name.
    pub async fn re_enrich(&self, artist: &Artist) -> AppResult<(Artist, Vec<String>)> {
        let refreshed = self.canonical.fetch_by_id(&artist.id).await?;
        self.run_secondary_sources(refreshed).await
    }

    /// Runs every configured secondary source over an already-resolved
    /// baseline artist. Exposed so the orchestrator can skip straight here
    /// for a cache miss without a redundant canonical lookup.
    pub async fn run_secondary_sources(&self, mut artist: Artist) -> AppResult<(Artist, Vec<String>)> {
        let mut warnings = Vec::new();
        for source in &self.sources {
            let before = artist.verified.get(source.source_name()).copied();
            source.enrich_in_place(&mut artist).await;
            let after = artist.verified.get(source.source_name()).copied();
            if after == Some(false) && before != Some(false) {
                let message = format!("{} enrichment failed, degraded gracefully", source.source_name());
                warn!(source = source.source_name(), "enrichment degraded");
                warnings.push(message);
            }
        }
        artist.last_updated = Utc::now();
        Ok((artist, warnings))
    }
}

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The central entity (spec §3). Immutable value data: the cache owns the
/// stored copy, enrichment produces new values, the orchestrator holds
/// transient borrows. Never mutated in place — always replaced wholesale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub verified: BTreeMap<String, bool>,
    #[serde(default)]
    pub album_count: u32,
    #[serde(default)]
    pub years_active: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub genres: IndexSet<String>,
    #[serde(default)]
    pub external_urls: BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
    pub cache_expiry: DateTime<Utc>,
}

impl Artist {
    /// `any(verified.values())`, used to pick the TTL bucket (spec §4.6).
    pub fn is_any_verified(&self) -> bool {
        self.verified.values().any(|v| *v)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.cache_expiry > now
    }

    /// Push a genre in, respecting the "first writer wins" ordered-set
    /// semantics from spec §3 (order = source priority, dedup on first
    /// insertion, case-sensitive).
    pub fn push_genre(&mut self, genre: impl Into<String>) {
        let genre = genre.into();
        if !genre.is_empty() {
            self.genres.insert(genre);
        }
    }
}

/// Transient value passed from the library client to the orchestrator/LLM
/// client (spec §3). Never persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub title: String,
    pub artist_name: String,
    pub album: String,
    pub year: Option<u32>,
    /// 0-10, 0 = unrated.
    pub rating: u8,
    pub play_count: u32,
    pub last_played: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    pub kind: String,
    pub smart: bool,
    pub track_count: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RecommendRequest {
    pub playlist_name: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub max_results: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecommendResponse {
    pub status: &'static str,
    pub request_id: String,
    pub suggestions: Vec<Artist>,
    pub metadata: RecommendMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RecommendMetadata {
    pub seed_track_count: usize,
    pub known_artist_count: usize,
    pub processing_ms: u64,
    pub cache_hits: usize,
    pub api_call_count: usize,
    /// Which rating floor produced the seed set: 7, 5, or 0 (full
    /// playlist, ratings not required). Spec §9 Open Question.
    pub seed_rating_floor: u8,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

//! C2: the canonical-source client (spec §4.2) — a MusicBrainz-equivalent
//! artist identity lookup. Every Artist in the system originates here: it is
//! the only source that mints an `id`.

use super::{moka_client, DEFAULT_TIMEOUT};
use crate::errors::{AppError, AppResult};
use crate::models::Artist;
use chrono::{Duration as ChronoDuration, Utc};
use governor::Quota;
use once_cell::sync::OnceCell;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

const BASE_URL: &str = "https://musicbrainz.example.org/ws/2";

fn client() -> &'static ClientWithMiddleware {
    static CLIENT: OnceCell<ClientWithMiddleware> = OnceCell::new();
    CLIENT.get_or_init(|| {
        let quota = Quota::with_period(Duration::from_millis(1100))
            .unwrap()
            .allow_burst(NonZeroU32::new(1).unwrap());
        moka_client(quota, DEFAULT_TIMEOUT)
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    artists: Vec<ArtistDoc>,
}

#[derive(Debug, Deserialize)]
struct ArtistDoc {
    id: String,
    name: String,
    country: Option<String>,
    #[serde(rename = "life-span")]
    life_span: Option<LifeSpan>,
    #[serde(default)]
    releases: Vec<serde_json::Value>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    genres: Vec<Genre>,
}

#[derive(Debug, Deserialize)]
struct LifeSpan {
    begin: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

/// Looks up a single artist by exact name match, or its full detail by id.
/// Both operations feed the same §4.2 transformation into an [`Artist`].
pub struct CanonicalClient {
    base_url: String,
    retry_cap: u32,
}

impl CanonicalClient {
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            retry_cap: 2,
        }
    }

    /// Points the client at an arbitrary base URL, e.g. a `wiremock`
    /// `MockServer` in tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            retry_cap: 2,
        }
    }

    pub async fn search_by_name(&self, name: &str) -> AppResult<Option<Artist>> {
        let query = format!("artist:\"{}\"", name);
        let base_url = &self.base_url;
        let (status, body) = super::get_with_retry(
            || client().get(format!("{base_url}/artist")).query(&[
                ("query", query.as_str()),
                ("fmt", "json"),
                ("limit", "1"),
            ]),
            self.retry_cap,
        )
        .await?;

        match status.as_u16() {
            200 => {
                let parsed: SearchResponse = serde_json::from_str(&body)?;
                Ok(parsed.artists.into_iter().next().map(transform))
            }
            404 => Ok(None),
            other => Err(AppError::UpstreamError(format!(
                "canonical source search returned {other}"
            ))),
        }
    }

    pub async fn fetch_by_id(&self, id: &str) -> AppResult<Artist> {
        let base_url = &self.base_url;
        let (status, body) = super::get_with_retry(
            || {
                client()
                    .get(format!("{base_url}/artist/{id}"))
                    .query(&[("inc", "releases+tags+genres"), ("fmt", "json")])
            },
            self.retry_cap,
        )
        .await?;

        match status.as_u16() {
            200 => {
                let doc: ArtistDoc = serde_json::from_str(&body)?;
                Ok(transform(doc))
            }
            404 => Err(AppError::NotFound(format!("no canonical artist {id}"))),
            other => Err(AppError::UpstreamError(format!(
                "canonical source lookup returned {other}"
            ))),
        }
    }
}

impl Default for CanonicalClient {
    fn default() -> Self {
        Self::new()
    }
}

fn transform(doc: ArtistDoc) -> Artist {
    let now = Utc::now();
    let years_active = match doc.life_span {
        Some(LifeSpan { begin: Some(begin), end }) => {
            format!("{begin}-{}", end.unwrap_or_else(|| "present".to_string()))
        }
        _ => String::new(),
    };

    let mut genres = indexmap::IndexSet::new();
    for tag in doc.tags.iter().filter(|t| t.count > 5) {
        genres.insert(tag.name.clone());
    }
    for genre in &doc.genres {
        genres.insert(genre.name.clone());
    }

    let mut verified = BTreeMap::new();
    verified.insert("canonical".to_string(), true);
    let mut external_urls = BTreeMap::new();
    external_urls.insert(
        "canonical".to_string(),
        format!("https://musicbrainz.example.org/artist/{}", doc.id),
    );

    Artist {
        id: doc.id,
        name: doc.name,
        verified,
        album_count: doc.releases.len() as u32,
        years_active,
        country: doc.country.unwrap_or_default(),
        description: String::new(),
        image_url: String::new(),
        genres,
        external_urls,
        last_updated: now,
        cache_expiry: now + ChronoDuration::days(30),
    }
}

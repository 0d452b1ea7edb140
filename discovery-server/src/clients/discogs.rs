//! C3: Discogs-equivalent enrichment client (spec §4.3).

use super::{moka_client, EnrichmentSource, DEFAULT_TIMEOUT};
use crate::models::Artist;
use governor::Quota;
use once_cell::sync::OnceCell;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::warn;

const BASE_URL: &str = "https://discogs.example.org/database";

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
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ArtistDetail {
    #[serde(default)]
    profile: String,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    #[serde(rename = "type")]
    kind: String,
    uri: String,
}

pub struct DiscogsClient {
    base_url: String,
    token: Option<String>,
    retry_cap: u32,
}

impl DiscogsClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            token,
            retry_cap: 2,
        }
    }

    /// Points the client at an arbitrary base URL, e.g. a `wiremock`
    /// `MockServer` in tests.
    pub fn with_base_url(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            retry_cap: 2,
        }
    }

    async fn lookup(&self, token: &str, name: &str) -> anyhow::Result<Option<ArtistDetail>> {
        let base_url = &self.base_url;
        let (status, body) = super::get_with_retry(
            || {
                client()
                    .get(format!("{base_url}/search"))
                    .query(&[("q", name), ("type", "artist"), ("token", token)])
            },
            self.retry_cap,
        )
        .await?;
        if status.as_u16() != 200 {
            anyhow::bail!("discogs search returned {status}");
        }
        let search: SearchResponse = serde_json::from_str(&body)?;
        let Some(hit) = search.results.into_iter().next() else {
            return Ok(None);
        };

        let (status, body) = super::get_with_retry(
            || {
                client()
                    .get(format!("{base_url}/artists/{}", hit.id))
                    .query(&[("token", token)])
            },
            self.retry_cap,
        )
        .await?;
        if status.as_u16() != 200 {
            anyhow::bail!("discogs artist fetch returned {status}");
        }
        Ok(Some(serde_json::from_str(&body)?))
    }
}

#[async_trait::async_trait]
impl EnrichmentSource for DiscogsClient {
    fn source_name(&self) -> &'static str {
        "discogs"
    }

    async fn enrich_in_place(&self, artist: &mut Artist) {
        let Some(token) = &self.token else {
            artist.verified.insert(self.source_name().to_string(), false);
            artist
                .external_urls
                .entry(self.source_name().to_string())
                .or_insert_with(String::new);
            return;
        };

        match self.lookup(token, &artist.name).await {
            Ok(Some(detail)) => {
                if artist.description.is_empty() {
                    artist.description = clean_biography(&detail.profile);
                }
                for genre in &detail.genres {
                    artist.push_genre(genre.clone());
                }
                if let Some(image) = select_image(&detail.images) {
                    if artist.image_url.is_empty() {
                        artist.image_url = image;
                    }
                }
                if !detail.urls.is_empty() {
                    artist
                        .external_urls
                        .entry(self.source_name().to_string())
                        .or_insert_with(|| detail.urls[0].clone());
                } else {
                    artist
                        .external_urls
                        .entry(self.source_name().to_string())
                        .or_insert_with(String::new);
                }
                // Invariant (iii): verified only holds once a non-empty URL
                // actually landed in external_urls, not just on a successful
                // lookup (spec §3, §8).
                let has_url = artist
                    .external_urls
                    .get(self.source_name())
                    .map(|url| !url.is_empty())
                    .unwrap_or(false);
                artist.verified.insert(self.source_name().to_string(), has_url);
            }
            Ok(None) => {
                artist.verified.insert(self.source_name().to_string(), false);
                artist
                    .external_urls
                    .entry(self.source_name().to_string())
                    .or_insert_with(String::new);
            }
            Err(err) => {
                warn!(source = self.source_name(), error = %err, "enrichment failed, degrading gracefully");
                artist.verified.insert(self.source_name().to_string(), false);
                artist
                    .external_urls
                    .entry(self.source_name().to_string())
                    .or_insert_with(String::new);
            }
        }
    }
}

/// Prefer the image tagged `primary`; otherwise the first non-empty URI.
fn select_image(images: &[Image]) -> Option<String> {
    images
        .iter()
        .find(|i| i.kind == "primary" && !i.uri.is_empty())
        .or_else(|| images.iter().find(|i| !i.uri.is_empty()))
        .map(|i| i.uri.clone())
}

/// Shared by both enrichment sources (spec §4.3): strip markup, drop any
/// line still containing `<`, drop the CC attribution and "read more"
/// suffixes, trim, cap at 500 characters.
pub fn clean_biography(raw: &str) -> String {
    let stripped = raw
        .replace("<br/>", "\n")
        .replace("<br>", "\n")
        .replace("<p>", "\n")
        .replace("</p>", "\n");

    let mut text = stripped
        .lines()
        .filter(|line| !line.contains('<'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    if let Some(idx) = text.find("Creative Commons") {
        text.truncate(idx);
    }
    if let Some(idx) = text.find("read more") {
        text.truncate(idx);
    } else if let Some(idx) = text.find("Read more") {
        text.truncate(idx);
    }

    let text = text.trim().to_string();
    if text.chars().count() > 500 {
        text.chars().take(500).collect()
    } else {
        text
    }
}

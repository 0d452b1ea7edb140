//! C3: Last.fm-equivalent enrichment client (spec §4.3).

use super::discogs::clean_biography;
use super::{moka_client, EnrichmentSource, DEFAULT_TIMEOUT};
use crate::models::Artist;
use governor::Quota;
use once_cell::sync::OnceCell;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::warn;

const BASE_URL: &str = "https://lastfm.example.org/2.0";

fn client() -> &'static ClientWithMiddleware {
    static CLIENT: OnceCell<ClientWithMiddleware> = OnceCell::new();
    CLIENT.get_or_init(|| {
        let quota = Quota::with_period(Duration::from_millis(250))
            .unwrap()
            .allow_burst(NonZeroU32::new(1).unwrap());
        moka_client(quota, DEFAULT_TIMEOUT)
    })
}

#[derive(Debug, Deserialize)]
struct ArtistInfoResponse {
    artist: Option<ArtistInfo>,
}

#[derive(Debug, Deserialize)]
struct ArtistInfo {
    #[serde(default)]
    tags: Option<Tags>,
    #[serde(default)]
    bio: Option<Bio>,
    #[serde(default)]
    image: Vec<Image>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tags {
    #[serde(default)]
    tag: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Bio {
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct Image {
    #[serde(rename = "size")]
    size: String,
    #[serde(rename = "#text")]
    text: String,
}

pub struct LastFmClient {
    base_url: String,
    api_key: Option<String>,
    retry_cap: u32,
}

impl LastFmClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            api_key,
            retry_cap: 2,
        }
    }

    /// Points the client at an arbitrary base URL, e.g. a `wiremock`
    /// `MockServer` in tests.
    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            retry_cap: 2,
        }
    }

    async fn lookup(&self, api_key: &str, name: &str) -> anyhow::Result<Option<ArtistInfo>> {
        let (status, body) = super::get_with_retry(
            || {
                client().get(&self.base_url).query(&[
                    ("method", "artist.getinfo"),
                    ("artist", name),
                    ("api_key", api_key),
                    ("format", "json"),
                ])
            },
            self.retry_cap,
        )
        .await?;
        if status.as_u16() != 200 {
            anyhow::bail!("lastfm artist.getinfo returned {status}");
        }
        let parsed: ArtistInfoResponse = serde_json::from_str(&body)?;
        Ok(parsed.artist)
    }
}

#[async_trait::async_trait]
impl EnrichmentSource for LastFmClient {
    fn source_name(&self) -> &'static str {
        "lastfm"
    }

    async fn enrich_in_place(&self, artist: &mut Artist) {
        let Some(api_key) = &self.api_key else {
            artist.verified.insert(self.source_name().to_string(), false);
            artist
                .external_urls
                .entry(self.source_name().to_string())
                .or_insert_with(String::new);
            return;
        };

        match self.lookup(api_key, &artist.name).await {
            Ok(Some(info)) => {
                if artist.description.is_empty() {
                    if let Some(bio) = &info.bio {
                        artist.description = clean_biography(&bio.summary);
                    }
                }
                if let Some(tags) = &info.tags {
                    for tag in &tags.tag {
                        artist.push_genre(tag.name.clone());
                    }
                }
                if artist.image_url.is_empty() {
                    if let Some(image) = select_image(&info.image) {
                        artist.image_url = image;
                    }
                }
                artist
                    .external_urls
                    .entry(self.source_name().to_string())
                    .or_insert_with(|| info.url.clone().unwrap_or_default());
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

/// extralarge > large > medium > small among non-empty URIs (spec §4.3).
fn select_image(images: &[Image]) -> Option<String> {
    for tier in ["extralarge", "large", "medium", "small"] {
        if let Some(image) = images
            .iter()
            .find(|i| i.size == tier && !i.text.is_empty())
        {
            return Some(image.text.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_extralarge_over_other_tiers() {
        let images = vec![
            Image { size: "small".into(), text: "s.jpg".into() },
            Image { size: "large".into(), text: "l.jpg".into() },
            Image { size: "extralarge".into(), text: "xl.jpg".into() },
        ];
        assert_eq!(select_image(&images), Some("xl.jpg".to_string()));
    }

    #[test]
    fn skips_empty_uris_in_preferred_tier() {
        let images = vec![
            Image { size: "extralarge".into(), text: "".into() },
            Image { size: "large".into(), text: "l.jpg".into() },
        ];
        assert_eq!(select_image(&images), Some("l.jpg".to_string()));
    }

    #[tokio::test]
    async fn missing_key_degrades_gracefully() {
        let client = LastFmClient::new(None);
        let mut artist = Artist {
            id: "x".into(),
            name: "Test".into(),
            ..Default::default()
        };
        client.enrich_in_place(&mut artist).await;
        assert_eq!(artist.verified.get("lastfm"), Some(&false));
        assert_eq!(artist.external_urls.get("lastfm").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn enrich_fills_genres_and_image_from_live_http() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "artist": {
                    "tags": {"tag": [{"name": "post-rock"}]},
                    "bio": {"summary": "A band."},
                    "image": [
                        {"size": "small", "#text": "s.jpg"},
                        {"size": "extralarge", "#text": "xl.jpg"}
                    ],
                    "url": "https://lastfm.example.org/artist/x"
                }
            })))
            .mount(&server)
            .await;

        let client = LastFmClient::with_base_url(server.uri(), Some("key".to_string()));
        let mut artist = Artist {
            id: "x".into(),
            name: "Test".into(),
            ..Default::default()
        };
        client.enrich_in_place(&mut artist).await;

        assert_eq!(artist.verified.get("lastfm"), Some(&true));
        assert_eq!(artist.image_url, "xl.jpg");
        assert!(artist.genres.contains("post-rock"));
        assert_eq!(artist.description, "A band.");
    }

    /// Invariant (iii): a successful lookup whose payload carries no `url`
    /// must not mark the source verified (spec §3, §8).
    #[tokio::test]
    async fn successful_lookup_with_no_url_stays_unverified() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "artist": {
                    "tags": {"tag": []},
                    "bio": {"summary": "A band with no profile link."},
                    "image": []
                }
            })))
            .mount(&server)
            .await;

        let client = LastFmClient::with_base_url(server.uri(), Some("key".to_string()));
        let mut artist = Artist {
            id: "x".into(),
            name: "Test".into(),
            ..Default::default()
        };
        client.enrich_in_place(&mut artist).await;

        assert_eq!(artist.verified.get("lastfm"), Some(&false));
        assert_eq!(artist.external_urls.get("lastfm").map(String::as_str), Some(""));
        assert_eq!(artist.description, "A band with no profile link.");
    }
}

//! C4: the media-server library client (spec §4.4).
//!
//! The media server this talks to speaks the same Subsonic-family REST/XML
//! dialect the teacher project serves (`api/auth.rs`'s `t = md5(password +
//! salt)`, `s = salt` token scheme) — this client runs that scheme in
//! reverse, minting a token instead of checking one, and parses the replies
//! with `quick-xml` instead of producing them.

use super::{moka_client, DEFAULT_TIMEOUT};
use crate::errors::{AppError, AppResult};
use crate::models::{Playlist, PlaylistTrack};
use governor::Quota;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;
use uuid::Uuid;

const API_VERSION: &str = "1.16.1";
const CLIENT_NAME: &str = "discovery-server";

#[derive(Debug, Deserialize)]
#[serde(rename = "subsonic-response")]
struct SubsonicEnvelope<T> {
    #[serde(rename = "@status")]
    status: String,
    error: Option<SubsonicError>,
    #[serde(rename = "$value")]
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SubsonicError {
    #[serde(rename = "@code")]
    code: u32,
    #[serde(rename = "@message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistsBody {
    playlist: Vec<PlaylistXml>,
}

#[derive(Debug, Deserialize)]
struct PlaylistXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@songCount", default)]
    song_count: u32,
}

#[derive(Debug, Deserialize)]
struct PlaylistDetailBody {
    #[serde(rename = "@songCount", default)]
    #[allow(dead_code)]
    song_count: u32,
    #[serde(rename = "entry", default)]
    entries: Vec<EntryXml>,
}

#[derive(Debug, Deserialize)]
struct EntryXml {
    #[serde(rename = "@title")]
    title: String,
    #[serde(rename = "@artist", default)]
    artist: String,
    #[serde(rename = "@album", default)]
    album: String,
    #[serde(rename = "@year", default)]
    year: Option<u32>,
    #[serde(rename = "@userRating", default)]
    user_rating: Option<u8>,
    #[serde(rename = "@playCount", default)]
    play_count: Option<u32>,
    #[serde(rename = "@played", default)]
    played: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistsBody {
    #[serde(rename = "index", default)]
    indexes: Vec<IndexXml>,
}

#[derive(Debug, Deserialize)]
struct IndexXml {
    #[serde(rename = "artist", default)]
    artists: Vec<ArtistXml>,
}

#[derive(Debug, Deserialize)]
struct ArtistXml {
    #[serde(rename = "@name")]
    name: String,
}

fn client() -> &'static ClientWithMiddleware {
    static CLIENT: once_cell::sync::OnceCell<ClientWithMiddleware> = once_cell::sync::OnceCell::new();
    CLIENT.get_or_init(|| {
        let quota = Quota::with_period(Duration::from_millis(100))
            .unwrap()
            .allow_burst(NonZeroU32::new(4).unwrap());
        moka_client(quota, DEFAULT_TIMEOUT)
    })
}

pub struct LibraryClient {
    base_url: String,
    user: String,
    password: String,
}

impl LibraryClient {
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
        }
    }

    fn auth_params(&self) -> (String, String) {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = md5::compute(format!("{}{}", self.password, salt));
        (format!("{digest:x}"), salt)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/rest/{endpoint}", self.base_url)
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, endpoint: &str, extra: &[(&str, &str)]) -> AppResult<Option<T>> {
        let (token, salt) = self.auth_params();
        let mut params = vec![
            ("u", self.user.as_str()),
            ("t", token.as_str()),
            ("s", salt.as_str()),
            ("v", API_VERSION),
            ("c", CLIENT_NAME),
            ("f", "xml"),
        ];
        params.extend_from_slice(extra);

        let response = client()
            .get(self.url(endpoint))
            .query(&params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UpstreamError(format!(
                "library server returned {status}"
            )));
        }
        let body = response.text().await?;
        let envelope: SubsonicEnvelope<T> = quick_xml::de::from_str(&body)
            .map_err(|e| AppError::UpstreamError(format!("malformed library response: {e}")))?;

        if envelope.status != "ok" {
            let err = envelope.error.ok_or_else(|| {
                AppError::UpstreamError("library server reported failure with no error detail".into())
            })?;
            return Err(match err.code {
                40 => AppError::Unauthorized(err.message),
                50 => AppError::Forbidden(err.message),
                70 => return Ok(None),
                _ => AppError::UpstreamError(err.message),
            });
        }

        Ok(envelope.body)
    }

    pub async fn test_connection(&self) -> AppResult<()> {
        self.call::<()>("ping.view", &[]).await?;
        Ok(())
    }

    pub async fn list_playlists(&self) -> AppResult<Vec<Playlist>> {
        let body: Option<PlaylistsBody> = self.call("getPlaylists.view", &[]).await?;
        Ok(body
            .map(|b| {
                b.playlist
                    .into_iter()
                    .map(|p| Playlist {
                        name: p.name,
                        kind: "audio".to_string(),
                        smart: false,
                        track_count: p.song_count,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Case-insensitive name lookup (spec §4.4); `PlaylistNotFound` via
    /// `AppError::NotFound` when no playlist matches.
    pub async fn get_playlist_tracks(&self, name: &str) -> AppResult<Vec<PlaylistTrack>> {
        let playlists = self.list_playlists().await?;
        let target = playlists
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| AppError::NotFound(format!("no playlist named {name}")))?;

        let body: Option<PlaylistDetailBody> = self
            .call("getPlaylist.view", &[("id", target.name.as_str())])
            .await?;
        let entries = body.map(|b| b.entries).unwrap_or_default();
        Ok(entries
            .into_iter()
            .map(|e| PlaylistTrack {
                title: e.title,
                artist_name: e.artist,
                album: e.album,
                year: e.year,
                rating: e.user_rating.unwrap_or(0),
                play_count: e.play_count.unwrap_or(0),
                last_played: e
                    .played
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc)),
            })
            .collect())
    }

    pub async fn get_highly_rated(&self, name: &str, min_rating: u8) -> AppResult<Vec<PlaylistTrack>> {
        let tracks = self.get_playlist_tracks(name).await?;
        Ok(tracks.into_iter().filter(|t| t.rating >= min_rating).collect())
    }

    /// Every artist in the library section, deduplicated (spec §4.4).
    pub async fn list_all_artists(&self) -> AppResult<Vec<String>> {
        let body: Option<ArtistsBody> = self.call("getArtists.view", &[]).await?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for index in body.map(|b| b.indexes).unwrap_or_default() {
            for artist in index.artists {
                if seen.insert(artist.name.clone()) {
                    out.push(artist.name);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_playlists_parses_subsonic_xml_over_live_http() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/rest/getPlaylists.view"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(
                r#"<subsonic-response status="ok" version="1.16.1"><playlists><playlist name="Best Of" songCount="3"/></playlists></subsonic-response>"#,
                "application/xml",
            ))
            .mount(&server)
            .await;

        let client = LibraryClient::new(server.uri(), "user", "pass");
        let playlists = client.list_playlists().await.unwrap();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].name, "Best Of");
        assert_eq!(playlists[0].track_count, 3);
    }

    #[tokio::test]
    async fn unauthorized_subsonic_error_maps_to_unauthorized() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/rest/ping.view"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(
                r#"<subsonic-response status="failed" version="1.16.1"><error code="40" message="Wrong username or password"/></subsonic-response>"#,
                "application/xml",
            ))
            .mount(&server)
            .await;

        let client = LibraryClient::new(server.uri(), "user", "wrong");
        let result = client.test_connection().await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn get_playlist_tracks_is_case_insensitive_and_not_found_when_absent() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/rest/getPlaylists.view"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(
                r#"<subsonic-response status="ok" version="1.16.1"><playlists><playlist name="Best Of" songCount="1"/></playlists></subsonic-response>"#,
                "application/xml",
            ))
            .mount(&server)
            .await;

        let client = LibraryClient::new(server.uri(), "user", "pass");
        let result = client.get_playlist_tracks("no such playlist").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}

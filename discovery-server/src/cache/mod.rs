//! C6: the persistent cache store (spec §4.6). A single SQLite file, one
//! `artists` table, JSON-encoded complex fields — the same `sqlx` +
//! `deadpool` pooling and `ON CONFLICT ... RETURNING` upsert idiom the
//! teacher project uses for its own catalog tables.

mod db_pool;

use crate::config::{CacheOptions, TtlOptions};
use crate::errors::AppResult;
use crate::models::Artist;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use db_pool::DbPool;
use deadpool::managed::{Object, Pool};
use indexmap::IndexSet;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Connection, Row};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::ops::DerefMut;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

pub struct Cache {
    pool: Pool<DbPool>,
}

impl Debug for Cache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[Cache]")
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub total: i64,
    pub fresh: i64,
    pub stale: i64,
}

impl Cache {
    pub fn new(options: &CacheOptions) -> AppResult<Self> {
        let connect_options = if options.in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(
                    options
                        .path
                        .clone()
                        .unwrap_or_else(|| PathBuf::from(".")),
                )
                .create_if_missing(true)
                .synchronous(SqliteSynchronous::Normal)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(30))
        };
        let mgr = DbPool::new(connect_options);
        let mut builder = Pool::builder(mgr);
        if options.in_memory {
            // Each `:memory:` connection is its own private database; capping
            // the pool at one connection keeps every query on the same
            // dataset instead of silently fanning out across disjoint DBs.
            builder = builder.max_size(1);
        }
        let pool: Pool<DbPool> = builder.build()?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(self.conn().await?.deref_mut())
            .await?;
        Ok(())
    }

    async fn conn(&self) -> AppResult<Object<DbPool>> {
        Ok(self.pool.get().await?)
    }

    /// `(artist, needs_refresh)`: absent or expired both ask for a refresh,
    /// but an expired row is still handed back to the caller (spec §3,
    /// "stale entries are still returned but flagged for refresh").
    pub async fn get(&self, id: &str) -> AppResult<(Option<Artist>, bool)> {
        let row = sqlx::query("SELECT * FROM artists WHERE id = ?")
            .bind(id)
            .fetch_optional(self.conn().await?.deref_mut())
            .await?;

        match row {
            None => Ok((None, true)),
            Some(row) => {
                let artist = artist_from_row(&row)?;
                let needs_refresh = !artist.is_fresh(Utc::now());
                Ok((Some(artist), needs_refresh))
            }
        }
    }

    /// Sets `last_updated = now` and picks the TTL bucket from
    /// `any(verified.values())` (spec §4.6), then upserts the full row.
    pub async fn put(&self, mut artist: Artist, ttl: &TtlOptions) -> AppResult<Artist> {
        let now = Utc::now();
        artist.last_updated = now;
        artist.cache_expiry = now
            + if artist.is_any_verified() {
                ChronoDuration::from_std(ttl.verified_ttl).unwrap_or_else(|_| ChronoDuration::days(30))
            } else {
                ChronoDuration::from_std(ttl.unverified_ttl).unwrap_or_else(|_| ChronoDuration::days(7))
            };

        upsert(self.conn().await?.deref_mut(), &artist).await?;
        Ok(artist)
    }

    /// All-or-nothing multi-upsert (spec §4.6).
    pub async fn bulk_put(&self, artists: Vec<Artist>, ttl: &TtlOptions) -> AppResult<Vec<Artist>> {
        let now = Utc::now();
        let mut stamped = Vec::with_capacity(artists.len());
        for mut artist in artists {
            artist.last_updated = now;
            artist.cache_expiry = now
                + if artist.is_any_verified() {
                    ChronoDuration::from_std(ttl.verified_ttl).unwrap_or_else(|_| ChronoDuration::days(30))
                } else {
                    ChronoDuration::from_std(ttl.unverified_ttl).unwrap_or_else(|_| ChronoDuration::days(7))
                };
            stamped.push(artist);
        }

        let mut conn = self.conn().await?;
        let mut tx = conn.begin().await?;
        for artist in &stamped {
            upsert(&mut tx, artist).await?;
        }
        tx.commit().await?;
        Ok(stamped)
    }

    /// Oldest-expiry-first, up to `limit` (spec §4.6) — feeds the
    /// background refresher's batches.
    pub async fn expired(&self, limit: i64) -> AppResult<Vec<Artist>> {
        let now = Utc::now();
        let rows = sqlx::query("SELECT * FROM artists WHERE cache_expiry <= ? ORDER BY cache_expiry ASC LIMIT ?")
            .bind(now)
            .bind(limit)
            .fetch_all(self.conn().await?.deref_mut())
            .await?;
        rows.iter().map(artist_from_row).collect()
    }

    /// Updates only `cache_expiry`/`last_updated`, used to throttle retries
    /// on a failed re-enrichment (spec §4.8).
    pub async fn touch_expiry(&self, id: &str, new_expiry: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE artists SET cache_expiry = ?, last_updated = ? WHERE id = ?")
            .bind(new_expiry)
            .bind(Utc::now())
            .bind(id)
            .execute(self.conn().await?.deref_mut())
            .await?;
        Ok(())
    }

    /// Deletes rows whose `expiry < now - age`; returns the count deleted.
    pub async fn evict_older_than(&self, age: std::time::Duration) -> AppResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::from_std(age).unwrap_or_else(|_| ChronoDuration::days(7));
        let result = sqlx::query("DELETE FROM artists WHERE cache_expiry < ?")
            .bind(cutoff)
            .execute(self.conn().await?.deref_mut())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> AppResult<CacheStats> {
        let now = Utc::now();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists")
            .fetch_one(self.conn().await?.deref_mut())
            .await?;
        let fresh: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists WHERE cache_expiry > ?")
            .bind(now)
            .fetch_one(self.conn().await?.deref_mut())
            .await?;
        Ok(CacheStats {
            total,
            fresh,
            stale: total - fresh,
        })
    }

    pub async fn clear_all(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM artists")
            .execute(self.conn().await?.deref_mut())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM artists WHERE cache_expiry <= ?")
            .bind(Utc::now())
            .execute(self.conn().await?.deref_mut())
            .await?;
        Ok(result.rows_affected())
    }
}

async fn upsert<'a, E>(executor: E, artist: &Artist) -> AppResult<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    debug!(id = %artist.id, "upserting artist");
    sqlx::query(
        r#"
        INSERT INTO artists
            (id, name, verified_json, album_count, years_active, description,
             genres_json, country, image_url, external_urls_json, last_updated, cache_expiry)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            verified_json = excluded.verified_json,
            album_count = excluded.album_count,
            years_active = excluded.years_active,
            description = excluded.description,
            genres_json = excluded.genres_json,
            country = excluded.country,
            image_url = excluded.image_url,
            external_urls_json = excluded.external_urls_json,
            last_updated = excluded.last_updated,
            cache_expiry = excluded.cache_expiry
        "#,
    )
    .bind(&artist.id)
    .bind(&artist.name)
    .bind(serde_json::to_string(&artist.verified)?)
    .bind(artist.album_count)
    .bind(&artist.years_active)
    .bind(&artist.description)
    .bind(serde_json::to_string(&artist.genres)?)
    .bind(&artist.country)
    .bind(&artist.image_url)
    .bind(serde_json::to_string(&artist.external_urls)?)
    .bind(artist.last_updated)
    .bind(artist.cache_expiry)
    .execute(executor)
    .await?;
    Ok(())
}

fn artist_from_row(row: &SqliteRow) -> AppResult<Artist> {
    let verified_json: String = row.try_get("verified_json")?;
    let genres_json: String = row.try_get("genres_json")?;
    let external_urls_json: String = row.try_get("external_urls_json")?;

    Ok(Artist {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        verified: serde_json::from_str::<BTreeMap<String, bool>>(&verified_json)?,
        album_count: row.try_get::<i64, _>("album_count")? as u32,
        years_active: row.try_get("years_active")?,
        country: row.try_get("country")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        genres: serde_json::from_str::<IndexSet<String>>(&genres_json)?,
        external_urls: serde_json::from_str::<BTreeMap<String, String>>(&external_urls_json)?,
        last_updated: row.try_get("last_updated")?,
        cache_expiry: row.try_get("cache_expiry")?,
    })
}

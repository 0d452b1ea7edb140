use clap::Parser;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const SERVER_VERSION: &str = git_version::git_version!(fallback = "unknown");
pub const USER_AGENT: &str = const_format::formatcp!(
    "discovery-server/{} (+https://github.com/example/discovery-server)",
    "0.1.0"
);

#[derive(Parser, Debug)]
#[clap(
    name = "discoveryd",
    author = "discovery-server contributors",
    version = SERVER_VERSION
)]
pub struct Cli {
    /// Base URL of the self-hosted media server (e.g. https://music.example.com)
    #[arg(long, env = "DISC_LIBRARY_URL")]
    pub library_url: String,

    /// Username used to authenticate against the media server
    #[arg(long, env = "DISC_LIBRARY_USER")]
    pub library_user: String,

    /// Password used to authenticate against the media server
    #[arg(long, env = "DISC_LIBRARY_PASSWORD")]
    pub library_password: String,

    /// API key for the chat-completion backend
    #[arg(long, env = "DISC_LLM_API_KEY")]
    pub llm_api_key: String,

    /// Chat-completion model id
    #[arg(long, default_value = "gpt-4o-mini", env = "DISC_LLM_MODEL")]
    pub llm_model: String,

    /// Discogs API token (optional; enrichment degrades gracefully without it)
    #[arg(long, env = "DISC_DISCOGS_TOKEN")]
    pub discogs_token: Option<String>,

    /// last.fm API key (optional; enrichment degrades gracefully without it)
    #[arg(long, env = "DISC_LASTFM_API_KEY")]
    pub lastfm_api_key: Option<String>,

    /// Path to the SQLite cache file. Defaults to an in-memory database.
    #[arg(long, env = "DISC_CACHE_PATH")]
    pub cache_path: Option<PathBuf>,

    /// Host/port to bind the HTTP server on
    #[arg(long, default_value = "0.0.0.0:8080", env = "DISC_LISTEN_ADDR")]
    pub listen_addr: String,
}

#[derive(Clone)]
pub struct ServerOptions {
    pub library_url: String,
    pub library_user: String,
    pub library_password: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub discogs_token: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub cache: CacheOptions,
    pub ttl: TtlOptions,
    pub refresher: RefresherOptions,
    pub server_version: String,
}

impl Debug for ServerOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[ServerOptions]")
    }
}

#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub path: Option<PathBuf>,
    pub in_memory: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct TtlOptions {
    pub verified_ttl: Duration,
    pub unverified_ttl: Duration,
    pub eviction_age: Duration,
}

impl Default for TtlOptions {
    fn default() -> Self {
        Self {
            verified_ttl: Duration::from_secs(30 * 24 * 3600),
            unverified_ttl: Duration::from_secs(7 * 24 * 3600),
            eviction_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RefresherOptions {
    pub refresh_interval: Duration,
    pub cleanup_interval: Duration,
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl Default for RefresherOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(24 * 3600),
            batch_size: 10,
            max_concurrency: 3,
        }
    }
}

impl From<Cli> for ServerOptions {
    fn from(cli: Cli) -> Self {
        let in_memory = cli.cache_path.is_none();
        Self {
            library_url: cli.library_url,
            library_user: cli.library_user,
            library_password: cli.library_password,
            llm_api_key: cli.llm_api_key,
            llm_model: cli.llm_model,
            discogs_token: cli.discogs_token,
            lastfm_api_key: cli.lastfm_api_key,
            cache: CacheOptions {
                path: cli.cache_path,
                in_memory,
            },
            ttl: TtlOptions::default(),
            refresher: RefresherOptions::default(),
            server_version: SERVER_VERSION.to_string(),
        }
    }
}

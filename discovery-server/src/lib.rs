pub mod cache;
pub mod clients;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod refresher;

use crate::cache::Cache;
use crate::clients::canonical::CanonicalClient;
use crate::clients::discogs::DiscogsClient;
use crate::clients::lastfm::LastFmClient;
use crate::clients::library::LibraryClient;
use crate::clients::llm::LlmClient;
use crate::clients::EnrichmentSource;
use crate::config::ServerOptions;
use crate::enrichment::EnrichmentEngine;
use crate::errors::AppResult;
use crate::orchestrator::Orchestrator;
use crate::refresher::Refresher;
use axum::Router;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub struct App {
    pub options: ServerOptions,
    pub router: Router,
    pub state: Arc<AppState>,
    pub refresher: Arc<Refresher>,
}

pub struct AppState {
    pub options: ServerOptions,
    pub cache: Arc<Cache>,
    pub library: Arc<LibraryClient>,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    pub async fn new(options: ServerOptions) -> AppResult<Self> {
        let cache = Arc::new(Cache::new(&options.cache)?);
        cache.migrate().await?;

        let library = Arc::new(LibraryClient::new(
            options.library_url.clone(),
            options.library_user.clone(),
            options.library_password.clone(),
        ));
        let llm = Arc::new(LlmClient::new(options.llm_api_key.clone(), options.llm_model.clone()));

        let sources: Vec<Box<dyn EnrichmentSource>> = vec![
            Box::new(DiscogsClient::new(options.discogs_token.clone())),
            Box::new(LastFmClient::new(options.lastfm_api_key.clone())),
        ];
        let engine = Arc::new(EnrichmentEngine::new(CanonicalClient::new(), sources));

        let orchestrator = Arc::new(Orchestrator::new(
            library.clone(),
            llm,
            engine.clone(),
            cache.clone(),
            options.ttl,
        ));

        let refresher = Arc::new(Refresher::new(
            cache.clone(),
            engine,
            options.refresher,
            options.ttl,
        ));

        let state = Arc::new(AppState {
            options: options.clone(),
            cache,
            library,
            orchestrator,
        });

        let router = http::router(state.clone());

        Ok(Self {
            options,
            router,
            state,
            refresher,
        })
    }
}

pub fn enable_default_tracing() {
    let filter = EnvFilter::try_from_env("DISC_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env())
        .add_directive(LevelFilter::WARN.into())
        .add_directive("discovery_server=info".parse().unwrap());

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

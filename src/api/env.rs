//! Application context (§10.1): one `Env` per process, threaded through
//! every handler via axum's `State` extractor rather than read from
//! globals. Mirrors the `Config`-is-explicit convention from `config.rs`.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ReadThroughCache;
use crate::config::Config;
use crate::db::{Db, DbHandle};
use crate::events::SqliteEventStore;
use crate::orchestrator::runner::PhaseRunner;
use crate::orchestrator::Orchestrator;
use crate::pipeline::resources::{KeywordSetRepository, PersonaRepository, ProxyRepository};
use crate::pipeline::DomainRepository;
use crate::sse::Fanout;

/// Bundles the database, orchestrator, phase runner, SSE fan-out, and the
/// three read-through caches (§4.5) the HTTP pipeline reads personas,
/// proxies, and keyword sets through.
pub struct Env {
    pub config: Config,
    pub db: DbHandle,
    pub orchestrator: Arc<Orchestrator>,
    pub runner: Arc<PhaseRunner>,
    pub fanout: Fanout,
    pub domains: DomainRepository,
    pub persona_repo: Arc<PersonaRepository>,
    pub proxy_repo: Arc<ProxyRepository>,
    pub keyword_repo: Arc<KeywordSetRepository>,
    pub persona_cache: Arc<ReadThroughCache<crate::domain::Persona, PersonaRepository>>,
    pub proxy_cache: Arc<ReadThroughCache<crate::domain::Proxy, ProxyRepository>>,
    pub keyword_cache: Arc<ReadThroughCache<crate::domain::KeywordSet, KeywordSetRepository>>,
}

pub type SharedEnv = Arc<Env>;

impl Env {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.ensure_directories()?;
        let db = DbHandle::new(Db::open(&config.db_path)?);
        Ok(Self::from_db(config, db))
    }

    pub fn new_in_memory() -> anyhow::Result<Self> {
        let config = Config {
            db_path: ":memory:".into(),
            ..Config::default()
        };
        let db = DbHandle::new(Db::open_in_memory()?);
        Ok(Self::from_db(config, db))
    }

    fn from_db(config: Config, db: DbHandle) -> Self {
        let events = Arc::new(SqliteEventStore::new(db.clone()));
        let fanout = Fanout::new(config.sse_buffer_size);
        let orchestrator = Arc::new(Orchestrator::new(db.clone(), events, fanout.clone()));
        let domains = DomainRepository::new(db.clone());

        let persona_repo = Arc::new(PersonaRepository::new(db.clone()));
        let proxy_repo = Arc::new(ProxyRepository::new(db.clone()));
        let keyword_repo = Arc::new(KeywordSetRepository::new(db.clone()));

        let ttl = Duration::from_secs(config.cache_ttl_secs);
        let persona_cache = Arc::new(ReadThroughCache::new(persona_repo.clone(), ttl));
        let proxy_cache = Arc::new(ReadThroughCache::new(proxy_repo.clone(), ttl));
        let keyword_cache = Arc::new(ReadThroughCache::new(keyword_repo.clone(), ttl));

        let runner = PhaseRunner::new(
            db.clone(),
            orchestrator.clone(),
            domains.clone(),
            persona_cache.clone(),
            proxy_cache.clone(),
            keyword_cache.clone(),
            proxy_repo.clone(),
            config.default_batch_size as i64,
            config.snapshot_event_interval as i64,
            Duration::from_secs(config.snapshot_time_interval_secs),
        );

        Self {
            config,
            db,
            orchestrator,
            runner,
            fanout,
            domains,
            persona_repo,
            proxy_repo,
            keyword_repo,
            persona_cache,
            proxy_cache,
            keyword_cache,
        }
    }
}

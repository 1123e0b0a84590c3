//! Wiring of configuration to storage backends and the engine.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dt_core::{Cache, Engine, EventKind, ExtensionError, Listener, MemoryCache, TrackerEvent};
use dt_db::{SqliteCache, SqliteStore};

use crate::Config;

const LIFECYCLE: [EventKind; 6] = [
    EventKind::Added,
    EventKind::StageCompleted,
    EventKind::AllCompleted,
    EventKind::Reset,
    EventKind::Limited,
    EventKind::Expired,
];

/// An engine over SQLite storage, plus direct access to the store for
/// listings the engine does not offer.
#[derive(Debug)]
pub struct Backend {
    pub engine: Engine,
    pub store: Arc<SqliteStore>,
}

impl Backend {
    /// Opens the configured store and cache, creating parent directories.
    pub fn open(config: &Config) -> Result<Self> {
        ensure_parent(&config.database_path).context("failed to create database directory")?;
        let store = Arc::new(
            SqliteStore::open(&config.database_path)
                .with_context(|| format!("failed to open {}", config.database_path.display()))?,
        );

        let engine = match &config.cache_path {
            Some(path) => {
                ensure_parent(path).context("failed to create cache directory")?;
                let cache = SqliteCache::open(path)
                    .with_context(|| format!("failed to open cache {}", path.display()))?;
                build(cache, &store, config)
            }
            None => build(MemoryCache::new(), &store, config),
        };
        Ok(Self { engine, store })
    }

    /// Backend over an in-memory store. Used by command tests.
    pub fn in_memory(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open_in_memory()?);
        let engine = build(MemoryCache::new(), &store, config);
        Ok(Self { engine, store })
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn build(cache: impl Cache + 'static, store: &Arc<SqliteStore>, config: &Config) -> Engine {
    let engine = Engine::builder(cache, Arc::clone(store))
        .config(config.engine())
        .build();
    let logger: Arc<dyn Listener> =
        Arc::new(|event: &TrackerEvent| -> Result<(), ExtensionError> {
            tracing::info!(
                kind = %event.kind,
                group_id = %event.group_id,
                tracker = %event.tracker.name(),
                stage = event.stage,
                progress = event.tracker.progress(),
                "lifecycle event"
            );
            Ok(())
        });
    for kind in LIFECYCLE {
        engine.add_listener(kind, Arc::clone(&logger));
    }
    engine
}

//! Process configuration read from environment variables.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rowforge_core::StoreError;
use tracing::warn;

use crate::jobs::DispatchMode;
use crate::store::services::HashService;
use crate::store::{HashMapStore, StoreBackend};

/// Jobs database: tasks, locks, owner indexes and queues.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/3";
/// Data database: table rows of the hash-map store.
pub const DEFAULT_DATA_REDIS_URL: &str = "redis://localhost:6379/2";
pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_DEQUEUE_TIMEOUT_SECS: u64 = 5;

/// Which store implementation row operations go through.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BackendKind {
    Ordered,
    #[default]
    HashMap,
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ordered" => Ok(BackendKind::Ordered),
            "hashmap" => Ok(BackendKind::HashMap),
            other => Err(StoreError::Backend(format!("unknown backend '{other}'"))),
        }
    }
}

impl BackendKind {
    /// Build the store over the data service. `data` must not be the jobs
    /// service: `destroy` flushes that one.
    ///
    /// There is no ordered service client yet, so `Ordered` is an error here;
    /// library users wrap their own service in `OrderedStore`.
    pub fn build(self, data: Arc<dyn HashService>) -> Result<Arc<dyn StoreBackend>, StoreError> {
        match self {
            BackendKind::Ordered => Err(StoreError::backend(
                "no ordered service client is configured",
            )),
            BackendKind::HashMap => Ok(Arc::new(HashMapStore::new(data))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub backend: BackendKind,
    pub redis_url: String,
    pub data_redis_url: String,
    /// Run dispatched calls in the caller's thread instead of queueing them.
    pub local: bool,
    pub dequeue_timeout: Duration,
    pub default_queue: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            data_redis_url: DEFAULT_DATA_REDIS_URL.to_string(),
            local: false,
            dequeue_timeout: Duration::from_secs(DEFAULT_DEQUEUE_TIMEOUT_SECS),
            default_queue: DEFAULT_QUEUE.to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("ROWFORGE_BACKEND") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(value = %raw, error = %e, "ROWFORGE_BACKEND not recognised, using hashmap");
                defaults.backend
            }),
            None => defaults.backend,
        };

        let redis_url = lookup("REDIS_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.redis_url);
        let data_redis_url = lookup("ROWFORGE_DATA_REDIS_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.data_redis_url);
        if data_redis_url == redis_url {
            warn!(redis_url = %redis_url, "jobs and data share one database; destroy will wipe table rows");
        }

        let local = match lookup("ROWFORGE_LOCAL") {
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "ROWFORGE_LOCAL is not a boolean, using queued dispatch");
                false
            }),
            None => defaults.local,
        };

        let dequeue_timeout = match lookup("ROWFORGE_DEQUEUE_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => {
                    warn!("dequeue timeout of 0s would spin, using 1s");
                    Duration::from_secs(1)
                }
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    warn!(value = %raw, default = DEFAULT_DEQUEUE_TIMEOUT_SECS, "invalid dequeue timeout, using default");
                    defaults.dequeue_timeout
                }
            },
            None => defaults.dequeue_timeout,
        };

        let default_queue = lookup("ROWFORGE_DEFAULT_QUEUE")
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(defaults.default_queue);

        Self {
            backend,
            redis_url,
            data_redis_url,
            local,
            dequeue_timeout,
            default_queue,
        }
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.local {
            DispatchMode::Local
        } else {
            DispatchMode::Queued {
                queue: self.default_queue.clone(),
            }
        }
    }

    /// Hash-map service for tasks and queues.
    pub fn jobs_service(&self) -> Result<Arc<dyn HashService>, StoreError> {
        open_hash_service(&self.redis_url)
    }

    /// Hash-map service holding table rows.
    pub fn data_service(&self) -> Result<Arc<dyn HashService>, StoreError> {
        open_hash_service(&self.data_redis_url)
    }

    /// The configured store over the data service.
    pub fn store_backend(&self) -> Result<Arc<dyn StoreBackend>, StoreError> {
        self.backend.build(self.data_service()?)
    }
}

#[cfg(feature = "redis")]
fn open_hash_service(url: &str) -> Result<Arc<dyn HashService>, StoreError> {
    let service = crate::store::services::RedisHashService::new(url)?;
    Ok(Arc::new(service))
}

/// Every call returns a fresh, empty service.
#[cfg(not(feature = "redis"))]
fn open_hash_service(url: &str) -> Result<Arc<dyn HashService>, StoreError> {
    warn!(redis_url = %url, "redis feature not enabled, falling back to an in-memory service");
    Ok(Arc::new(crate::store::services::InMemoryHashService::new()))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::services::InMemoryHashService;
    use rowforge_core::ColumnMap;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    fn image() -> ColumnMap {
        ColumnMap::from([(b"data:image".to_vec(), b"X".to_vec())])
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg, WorkerConfig::default());
        assert_ne!(cfg.redis_url, cfg.data_redis_url);
        assert_eq!(
            cfg.dispatch_mode(),
            DispatchMode::Queued {
                queue: "default".to_string()
            }
        );
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config(&[
            ("ROWFORGE_BACKEND", "Ordered"),
            ("REDIS_URL", "redis://cache:6380/3"),
            ("ROWFORGE_DATA_REDIS_URL", "redis://cache:6380/2"),
            ("ROWFORGE_LOCAL", "true"),
            ("ROWFORGE_DEQUEUE_TIMEOUT_SECS", "2"),
            ("ROWFORGE_DEFAULT_QUEUE", "images"),
        ]);
        assert_eq!(cfg.backend, BackendKind::Ordered);
        assert_eq!(cfg.redis_url, "redis://cache:6380/3");
        assert_eq!(cfg.data_redis_url, "redis://cache:6380/2");
        assert!(cfg.local);
        assert_eq!(cfg.dequeue_timeout, Duration::from_secs(2));
        assert_eq!(cfg.default_queue, "images");
        assert_eq!(cfg.dispatch_mode(), DispatchMode::Local);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config(&[
            ("ROWFORGE_BACKEND", "cassandra"),
            ("ROWFORGE_LOCAL", "maybe"),
            ("ROWFORGE_DEQUEUE_TIMEOUT_SECS", "soon"),
            ("ROWFORGE_DEFAULT_QUEUE", "  "),
        ]);
        assert_eq!(cfg, WorkerConfig::default());
    }

    #[test]
    fn zero_dequeue_timeout_is_clamped() {
        let cfg = config(&[("ROWFORGE_DEQUEUE_TIMEOUT_SECS", "0")]);
        assert_eq!(cfg.dequeue_timeout, Duration::from_secs(1));
    }

    #[test]
    fn hashmap_backend_writes_to_the_data_service() {
        let data: Arc<dyn HashService> = Arc::new(InMemoryHashService::new());
        let backend = BackendKind::HashMap.build(data.clone()).unwrap();
        backend.mutate_row("images", b"k", &image()).unwrap();
        assert!(data.exists(b"images:k").unwrap());
    }

    #[test]
    fn ordered_backend_without_a_client_is_an_error() {
        let data: Arc<dyn HashService> = Arc::new(InMemoryHashService::new());
        assert!(matches!(
            BackendKind::Ordered.build(data),
            Err(StoreError::Backend(_))
        ));
        let cfg = config(&[("ROWFORGE_BACKEND", "ordered")]);
        assert!(cfg.store_backend().is_err());
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn destroy_leaves_table_rows_intact() {
        use crate::jobs::JobRegistry;

        let cfg = config(&[]);
        let registry = JobRegistry::new(cfg.jobs_service().unwrap());
        let backend = cfg.store_backend().unwrap();

        backend.mutate_row("images", b"cats/1", &image()).unwrap();
        // Same shape as a registry key in a shared database.
        backend.mutate_row("task", b"abc", &image()).unwrap();
        assert!(registry.list_all_tasks().unwrap().is_empty());

        registry.destroy().unwrap();
        assert_eq!(backend.get_row("images", b"cats/1", &[]).unwrap(), image());
        assert_eq!(backend.get_row("task", b"abc", &[]).unwrap(), image());
    }
}

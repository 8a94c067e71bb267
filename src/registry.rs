//! Process-wide mapping from pool name to a running [`Pool`], plus the
//! URL-scheme dispatch that picks a [`Driver`] for a connection string.
//!
//! Grounded on the teacher's `driver_factory.rs` (`Url::parse(...).scheme()`
//! match against `"postgres" | "postgresql" | "pgsql"`) and `init.c`'s
//! `GetServer`, which keeps one table of named pools per virtual server with
//! a distinguished default.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::PoolConfig;
use crate::drivers::sqlx_backend;
use crate::error::{Error, Result};
use crate::pool::Pool;

/// Builds the concrete [`crate::driver::Driver`] for a connection URL,
/// dispatching on scheme. The only backend shipped today is PostgreSQL;
/// adding another means adding another arm here and under `drivers/`.
fn driver_descriptor(url: &str) -> Result<crate::driver::DriverDescriptor> {
    sqlx_backend::descriptor(url)
}

/// All pools known to one logical server, keyed by pool name, with one
/// name distinguished as the default.
pub struct Registry {
    pools: DashMap<String, Arc<Pool>>,
    default_name: DashMap<(), String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            default_name: DashMap::new(),
        }
    }

    /// Registers a pool backed by the driver matching `url`'s scheme.
    /// Setting `config.default` makes it the server's default pool.
    pub fn add_pool(&self, name: impl Into<String>, url: &str, config: PoolConfig) -> Result<Arc<Pool>> {
        let name = name.into();
        let descriptor = driver_descriptor(url)?;
        log::debug!("registering pool {name:?} ({})", descriptor.database_name);
        let is_default = config.default;
        let pool = Pool::new(name.clone(), descriptor.driver, config);
        self.pools.insert(name.clone(), Arc::clone(&pool));
        if is_default || self.default_name.is_empty() {
            self.default_name.insert((), name);
        }
        Ok(pool)
    }

    #[must_use]
    pub fn get_pool(&self, name: &str) -> Option<Arc<Pool>> {
        self.pools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn default_pool(&self) -> Result<Arc<Pool>> {
        let name = self
            .default_name
            .get(&())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::protocol("no default pool configured"))?;
        self.get_pool(&name)
            .ok_or_else(|| Error::protocol(format!("default pool {name:?} is not registered")))
    }

    #[must_use]
    pub fn list_pools(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Shuts down every registered pool. `deadlines` maps pool name to its
    /// shutdown deadline; pools absent from the map get an immediate
    /// phase-1-only shutdown (`stopping` set, no draining).
    pub fn shutdown_all(&self, deadlines: &HashMap<String, std::time::Duration>) {
        for entry in &self.pools {
            entry.value().shutdown(deadlines.get(entry.key()).copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_is_rejected() {
        let registry = Registry::new();
        let err = registry.add_pool("main", "redis://localhost/0", PoolConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn first_registered_pool_becomes_default() {
        // Uses a URL that parses but whose scheme (postgres) is supported,
        // so registration itself succeeds without a live database — only
        // `Pool::new`'s bookkeeping runs, no connection is opened.
        let registry = Registry::new();
        let pool = registry
            .add_pool("main", "postgres://localhost/test", PoolConfig::default())
            .unwrap();
        assert_eq!(pool.name, "main");
        assert_eq!(registry.default_pool().unwrap().name, "main");
        assert_eq!(registry.list_pools(), vec!["main".to_string()]);
    }
}

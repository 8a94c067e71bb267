//! Per-handle prepared-statement cache.
//!
//! Grounded on `Dbi_Prepare`/`Statement` in `init.c`: a bounded,
//! single-owner associative store from the *original* SQL text to a prepared
//! statement, evicted by a soft byte budget (`cachesize`) in least-recently-used
//! order, with the driver's `prepare_close` invoked on every eviction. No
//! corpus crate offers a single-threaded LRU with a synchronous drop-hook of
//! this shape (the teacher's `threadsafe-lru` is a *shared*, cross-request
//! cache sized for AST reuse — the wrong fit for a single-owner cache that
//! must call back into the driver on eviction), so this is built directly
//! over `HashMap` plus an intrusive recency order.

use std::collections::HashMap;

use crate::driver::{Driver, StatementHandle};
use crate::error::Result;

/// A prepared statement owned by a single handle's cache.
pub struct Statement {
    /// Original SQL text (the cache key), kept alongside the entry for eviction logging.
    pub original_sql: String,
    /// Driver-rewritten SQL, after bind-variable substitution.
    pub rewritten_sql: String,
    /// Unique id within the owning handle; persists across cache evictions.
    pub id: u64,
    /// Ordered bind-variable names, duplicates preserved by position.
    pub variables: Vec<String>,
    /// Column count, reported by the driver after first prepare.
    pub num_cols: u32,
    /// Total number of `exec` calls made against this statement.
    pub num_queries: u64,
    /// Driver-private prepared-statement context.
    pub driver_data: Option<StatementHandle>,
}

impl Statement {
    /// Approximate heap footprint, used against the cache's byte budget.
    fn approx_size(&self) -> usize {
        self.original_sql.len()
            + self.rewritten_sql.len()
            + self.variables.iter().map(String::len).sum::<usize>()
            + 64
    }
}

/// A bounded, per-handle cache from original SQL text to [`Statement`].
pub struct StatementCache {
    budget_bytes: usize,
    used_bytes: usize,
    next_id: u64,
    entries: HashMap<String, Statement>,
    /// Most-recently-used SQL texts at the back.
    recency: Vec<String>,
}

impl StatementCache {
    #[must_use]
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            used_bytes: 0,
            next_id: 0,
            entries: HashMap::new(),
            recency: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, sql: &str) -> Option<&Statement> {
        self.entries.get(sql)
    }

    /// Driver-private statement context for an already-cached entry, for the
    /// `exec`/`next_row`/`flush` calls that need `&mut StatementHandle`.
    pub fn entry_mut(&mut self, sql: &str) -> Option<&mut StatementHandle> {
        self.entries.get_mut(sql)?.driver_data.as_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, sql: &str) {
        if let Some(pos) = self.recency.iter().position(|s| s == sql) {
            let sql = self.recency.remove(pos);
            self.recency.push(sql);
        }
    }

    /// Inserts a newly prepared statement, evicting least-recently-used
    /// entries (invoking the driver's `prepare_close` on each) until the
    /// byte budget is satisfied.
    pub fn insert(
        &mut self,
        driver: &dyn Driver,
        conn: &mut crate::driver::Connection,
        original_sql: String,
        rewritten_sql: String,
        variables: Vec<String>,
        num_cols: u32,
        driver_data: StatementHandle,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let stmt = Statement {
            original_sql: original_sql.clone(),
            rewritten_sql,
            id,
            variables,
            num_cols,
            num_queries: 0,
            driver_data: Some(driver_data),
        };
        self.used_bytes += stmt.approx_size();
        self.entries.insert(original_sql.clone(), stmt);
        self.recency.push(original_sql);
        self.evict_to_budget(driver, conn);
        id
    }

    /// Removes an entry without invoking a driver callback; used when a
    /// `prepare` attempt fails before the statement is cached.
    pub fn remove(&mut self, sql: &str) {
        if let Some(stmt) = self.entries.remove(sql) {
            self.used_bytes = self.used_bytes.saturating_sub(stmt.approx_size());
        }
        self.recency.retain(|s| s != sql);
    }

    pub fn increment_queries(&mut self, sql: &str) {
        if let Some(stmt) = self.entries.get_mut(sql) {
            stmt.num_queries += 1;
        }
        self.touch(sql);
    }

    fn evict_to_budget(&mut self, driver: &dyn Driver, conn: &mut crate::driver::Connection) {
        while self.used_bytes > self.budget_bytes && !self.recency.is_empty() {
            let lru_sql = self.recency.remove(0);
            if let Some(mut stmt) = self.entries.remove(&lru_sql) {
                self.used_bytes = self.used_bytes.saturating_sub(stmt.approx_size());
                if let Some(mut driver_data) = stmt.driver_data.take() {
                    driver.prepare_close(conn, &mut driver_data);
                }
            }
        }
    }

    /// Evicts every entry, invoking the driver's `prepare_close` on each.
    /// Called on handle disconnect/close per §4.2.
    pub fn flush(&mut self, driver: &dyn Driver, conn: &mut crate::driver::Connection) {
        for (_, mut stmt) in self.entries.drain() {
            if let Some(mut driver_data) = stmt.driver_data.take() {
                driver.prepare_close(conn, &mut driver_data);
            }
        }
        self.recency.clear();
        self.used_bytes = 0;
    }
}

/// Outcome of [`StatementCache`]'s central operation, mirroring §4.2's
/// `lookup_or_insert(sql) -> (Statement, bool new)`.
pub enum Lookup<'a> {
    Hit(&'a Statement),
    Miss,
}

impl<'a> Lookup<'a> {
    #[must_use]
    pub fn hit(self) -> Option<&'a Statement> {
        match self {
            Lookup::Hit(stmt) => Some(stmt),
            Lookup::Miss => None,
        }
    }
}

impl StatementCache {
    #[must_use]
    pub fn lookup(&self, sql: &str) -> Lookup<'_> {
        match self.entries.get(sql) {
            Some(stmt) => Lookup::Hit(stmt),
            None => Lookup::Miss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mock::MockDriver;

    fn driver() -> MockDriver {
        MockDriver::new()
    }

    #[test]
    fn insert_then_lookup_hits() {
        let driver = driver();
        let mut conn = driver.open().unwrap();
        let mut cache = StatementCache::new(1024 * 1024);
        assert!(matches!(cache.lookup("select 1"), Lookup::Miss));
        cache.insert(
            &driver,
            &mut conn,
            "select 1".into(),
            "select 1".into(),
            vec![],
            1,
            Box::new(()),
        );
        assert!(matches!(cache.lookup("select 1"), Lookup::Hit(_)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_runs_prepare_close_and_respects_budget() {
        let driver = driver();
        let mut conn = driver.open().unwrap();
        // Budget far too small to hold two entries at once.
        let mut cache = StatementCache::new(1);
        cache.insert(
            &driver,
            &mut conn,
            "select 1".into(),
            "select 1".into(),
            vec![],
            1,
            Box::new(()),
        );
        cache.insert(
            &driver,
            &mut conn,
            "select 2".into(),
            "select 2".into(),
            vec![],
            1,
            Box::new(()),
        );
        assert!(matches!(cache.lookup("select 1"), Lookup::Miss));
        assert!(matches!(cache.lookup("select 2"), Lookup::Hit(_)));
        assert_eq!(driver.prepare_close_calls(), 1);
    }

    #[test]
    fn flush_evicts_everything() {
        let driver = driver();
        let mut conn = driver.open().unwrap();
        let mut cache = StatementCache::new(1024 * 1024);
        cache.insert(
            &driver,
            &mut conn,
            "select 1".into(),
            "select 1".into(),
            vec![],
            1,
            Box::new(()),
        );
        cache.flush(&driver, &mut conn);
        assert!(cache.is_empty());
        assert_eq!(driver.prepare_close_calls(), 1);
    }
}

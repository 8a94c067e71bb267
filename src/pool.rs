//! Bounded connection pool: blocking acquisition, staleness-driven
//! recycling, epoch-based bouncing, and a thread-local fast path for
//! unlimited-concurrency pools.
//!
//! Grounded directly on `init.c`'s `GetHandle`/`ReturnHandle` (renamed here
//! `get_handle`/`put_handle`), `CloseIfStale`, `CheckPool`,
//! `ScheduledPoolCheck`, and `AtShutdown` — the teacher ships no connection
//! pool of its own (`dbms/postgres/inner.rs` wraps a full `sqlx::Pool` and
//! delegates pooling entirely to it), so this module has no teacher
//! counterpart to adapt and is built from the original semantics using
//! plain `std::sync::{Mutex, Condvar}` (confirmed absent from every example
//! repo's dependency tree, so no closer-fit crate exists in the corpus).

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::{ConfigValue, PoolConfig};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::handle::{Handle, Slot};

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub handlegets: u64,
    pub handlemisses: u64,
    pub handleopens: u64,
    pub handlefailures: u64,
    pub queries: u64,
    pub agedcloses: u64,
    pub idlecloses: u64,
    pub oppscloses: u64,
}

impl Stats {
    /// `key value` pairs per `SPEC_FULL.md` §6, `bounces` carrying the
    /// current epoch.
    #[must_use]
    pub fn to_pairs(self, epoch: u64) -> Vec<(&'static str, u64)> {
        vec![
            ("handlegets", self.handlegets),
            ("handlemisses", self.handlemisses),
            ("handleopens", self.handleopens),
            ("handlefailures", self.handlefailures),
            ("queries", self.queries),
            ("agedcloses", self.agedcloses),
            ("idlecloses", self.idlecloses),
            ("oppscloses", self.oppscloses),
            ("bounces", epoch),
        ]
    }
}

struct Inner {
    /// Head = most recently connected; tail = disconnected. Popped from the front.
    idle: VecDeque<Handle>,
    nhandles: u32,
    stopping: bool,
    epoch: u64,
    stats: Stats,
}

/// A handle parked in a thread's local cache, paired with a weak
/// back-reference to its owning pool so the cache's destructor can reclaim
/// it instead of leaking it when the thread exits.
struct TlsEntry {
    handle: Option<Handle>,
    pool: Weak<Pool>,
}

impl Drop for TlsEntry {
    fn drop(&mut self) {
        let Some(mut handle) = self.handle.take() else { return };
        match self.pool.upgrade() {
            Some(pool) => {
                // Route through the ordinary mutex-guarded release path
                // rather than back into this (currently unwinding) TLS slot.
                handle.slot = Slot::Pool(0);
                pool.put_handle(handle);
            }
            None => handle.disconnect(),
        }
    }
}

pub struct Pool {
    pub name: String,
    driver: Arc<dyn Driver>,
    config: RwLock<PoolConfig>,
    inner: Mutex<Inner>,
    cond: Condvar,
    sweep_stop: Arc<AtomicBool>,
    self_weak: OnceLock<Weak<Pool>>,
}

thread_local! {
    static TLS_HANDLES: RefCell<HashMap<String, TlsEntry>> = RefCell::new(HashMap::new());
}

impl Pool {
    #[must_use]
    pub fn new(name: impl Into<String>, driver: Arc<dyn Driver>, config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            name: name.into(),
            driver,
            config: RwLock::new(config),
            inner: Mutex::new(Inner {
                idle: VecDeque::new(),
                nhandles: 0,
                stopping: false,
                epoch: 0,
                stats: Stats::default(),
            }),
            cond: Condvar::new(),
            sweep_stop: Arc::new(AtomicBool::new(false)),
            self_weak: OnceLock::new(),
        });
        let _ = pool.self_weak.set(Arc::downgrade(&pool));
        Self::spawn_sweeper(&pool);
        pool
    }

    /// A snapshot of this pool's current configuration.
    #[must_use]
    pub fn config_snapshot(&self) -> PoolConfig {
        self.config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Reads option `option`'s current value, optionally overwriting it with
    /// `new_value` first, matching the public `config(pool, opt, new?) ->
    /// old` surface. Always returns the value the option had *before* this
    /// call.
    pub fn config_get_set(&self, option: &str, new_value: Option<ConfigValue>) -> Result<Option<ConfigValue>> {
        let mut guard = self.config.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let old = guard.get(option);
        if let Some(value) = new_value {
            guard.set(option, value)?;
        }
        Ok(old)
    }

    fn weak_self(&self) -> Weak<Self> {
        self.self_weak.get().cloned().unwrap_or_default()
    }

    fn spawn_sweeper(pool: &Arc<Self>) {
        let stop = Arc::clone(&pool.sweep_stop);
        let pool = Arc::clone(pool);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                // Read fresh each iteration so a runtime `checkinterval`
                // change via `config_get_set` takes effect on the next sweep.
                let interval = pool
                    .config
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .checkinterval;
                thread::sleep(interval);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                pool.check_pool(false);
            }
        });
    }

    /// Acquires a handle, blocking up to `timeout` (or the pool's default).
    pub fn get_handle(&self, timeout: Option<Duration>) -> Result<Handle> {
        let config = self.config_snapshot();

        if config.maxhandles == 0 {
            if let Some(handle) = TLS_HANDLES.with(|cache| {
                cache
                    .borrow_mut()
                    .remove(&self.name)
                    .and_then(|mut entry| entry.handle.take())
            }) {
                return Ok(handle);
            }
        }

        let deadline = Instant::now() + timeout.unwrap_or(config.timeout);
        let mut handle = {
            let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.stats.handlegets += 1;

            loop {
                if guard.stopping {
                    return Err(Error::shutdown(&self.name));
                }
                if let Some(h) = guard.idle.pop_front() {
                    break h;
                }
                if config.maxhandles == 0 || guard.nhandles < config.maxhandles {
                    guard.nhandles += 1;
                    break Handle::new(
                        Arc::clone(&self.driver),
                        self.name.clone(),
                        guard.epoch,
                        config.cachesize,
                        config.maxrows,
                    );
                }

                let now = Instant::now();
                if now >= deadline {
                    guard.stats.handlemisses += 1;
                    return Err(Error::timeout(&self.name));
                }
                let (g, timed_out) = self
                    .cond
                    .wait_timeout(guard, deadline - now)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                guard = g;
                if timed_out.timed_out() && guard.idle.is_empty() {
                    guard.stats.handlemisses += 1;
                    return Err(Error::timeout(&self.name));
                }
            }
        };

        let was_connected = handle.is_connected();
        if let Err(e) = handle.ensure_connected() {
            let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.stats.handlefailures += 1;
            guard.idle.push_back(handle);
            self.cond.notify_all();
            return Err(e);
        }
        if !was_connected {
            let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.stats.handleopens += 1;
        }

        if config.maxhandles == 0 {
            handle.slot = Slot::ThreadLocal;
        }
        Ok(handle)
    }

    /// Releases a handle back to the pool (or, for unlimited-concurrency
    /// pools, back onto the calling thread's cache).
    pub fn put_handle(&self, mut handle: Handle) {
        if let Err(e) = handle.reset() {
            log::warn!("pool {:?}: reset failed on release: {e}", self.name);
        }

        if handle.slot == Slot::ThreadLocal {
            let pool = self.weak_self();
            TLS_HANDLES.with(|cache| {
                cache.borrow_mut().insert(
                    self.name.clone(),
                    TlsEntry {
                        handle: Some(handle),
                        pool,
                    },
                );
            });
            return;
        }

        let config = self.config_snapshot();
        handle.atime = Utc::now();
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        close_if_stale(&config, &mut guard.stats, &mut handle, guard.epoch, guard.stopping);

        let over_capacity = config.maxhandles != 0 && guard.nhandles > config.maxhandles;
        if guard.stopping || over_capacity {
            handle.disconnect();
            guard.nhandles = guard.nhandles.saturating_sub(1);
        } else if handle.is_connected() {
            guard.idle.push_front(handle);
        } else {
            guard.idle.push_back(handle);
        }
        self.cond.notify_all();
    }

    /// Re-evaluates every idle handle's staleness; with `stale=true` also
    /// bumps the epoch first so in-flight handles are recycled on return.
    pub fn check_pool(&self, stale: bool) {
        let config = self.config_snapshot();
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if stale {
            guard.epoch += 1;
        }
        let epoch = guard.epoch;
        let stopping = guard.stopping;
        let mut idle: Vec<Handle> = guard.idle.drain(..).collect();
        for handle in &mut idle {
            close_if_stale(&config, &mut guard.stats, handle, epoch, stopping);
        }
        idle.sort_by_key(|h| !h.is_connected());
        guard.idle.extend(idle);
        self.cond.notify_all();
    }

    #[must_use]
    pub fn bounce(&self) -> u64 {
        self.check_pool(true);
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).epoch
    }

    #[must_use]
    pub fn stats(&self) -> Vec<(&'static str, u64)> {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.stats.to_pairs(guard.epoch)
    }

    /// Two-phase shutdown. `deadline == None` only flips `stopping` and
    /// wakes waiters; pass a deadline to additionally drain and close idle
    /// handles until `nhandles` reaches zero or time runs out.
    pub fn shutdown(&self, deadline: Option<Duration>) {
        {
            let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.stopping = true;
        }
        self.sweep_stop.store(true, Ordering::Relaxed);
        self.cond.notify_all();

        let Some(deadline) = deadline else { return };
        let until = Instant::now() + deadline;
        loop {
            {
                let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                while let Some(mut h) = guard.idle.pop_front() {
                    h.disconnect();
                    guard.nhandles = guard.nhandles.saturating_sub(1);
                }
                if guard.nhandles == 0 {
                    return;
                }
            }
            if Instant::now() >= until {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

enum StaleReason {
    Stopped,
    Bounced,
    Aged,
    Idle,
    Used,
}

/// Evaluated in strict priority order; the first match wins. On a match,
/// flushes the statement cache, closes the driver connection, accumulates
/// the handle's query count into the pool total, and brings the handle's
/// epoch up to date so it isn't re-evaluated as stale again before its next
/// connect.
///
/// A handle that's already disconnected is left alone (`init.c:1870`'s
/// `Connected(handlePtr)` guard): its `otime`/`atime` are frozen at close, so
/// without this guard every subsequent sweep would re-match and re-count it.
fn close_if_stale(config: &PoolConfig, stats: &mut Stats, handle: &mut Handle, epoch: u64, stopping: bool) {
    if !handle.is_connected() {
        return;
    }

    let now = Utc::now();
    let older_than = |max: Duration, since| chrono::Duration::from_std(max).is_ok_and(|max| since < now - max);

    let reason = if stopping {
        Some(StaleReason::Stopped)
    } else if epoch > handle.epoch {
        Some(StaleReason::Bounced)
    } else if config.maxopen.is_some_and(|max| older_than(max, handle.otime)) {
        Some(StaleReason::Aged)
    } else if config.maxidle.is_some_and(|max| older_than(max, handle.atime)) {
        Some(StaleReason::Idle)
    } else if config.maxqueries > 0 && handle.queries_since_connect() >= config.maxqueries {
        Some(StaleReason::Used)
    } else {
        None
    };

    let Some(reason) = reason else { return };
    match reason {
        StaleReason::Aged => stats.agedcloses += 1,
        StaleReason::Idle => stats.idlecloses += 1,
        StaleReason::Used => stats.oppscloses += 1,
        StaleReason::Stopped | StaleReason::Bounced => {}
    }
    // Only accumulated here, on an actual close, matching `init.c:1891-1895`
    // (`poolPtr->stats.queries += handlePtr->stats.queries; handlePtr->stats.queries = 0;`) —
    // a live, repeatedly-recycled handle must not re-add its cumulative count
    // on every release.
    stats.queries += handle.take_query_count();
    handle.disconnect();
    handle.epoch = epoch;
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.sweep_stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mock::MockDriver;
    use std::sync::Arc as StdArc;

    fn pool_with(config: PoolConfig) -> StdArc<Pool> {
        let driver = StdArc::new(MockDriver::new());
        Pool::new("test", driver, config)
    }

    #[test]
    fn get_then_put_recycles_same_handle() {
        let pool = pool_with(PoolConfig {
            maxhandles: 4,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });
        let h = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
        pool.put_handle(h);
        let stats = pool.stats();
        assert_eq!(stats.iter().find(|(k, _)| *k == "handlegets").unwrap().1, 1);
    }

    #[test]
    fn acquisition_times_out_when_exhausted() {
        let pool = pool_with(PoolConfig {
            maxhandles: 1,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });
        let _h1 = pool.get_handle(Some(Duration::from_millis(50))).unwrap();
        let err = pool.get_handle(Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn shutdown_rejects_new_acquisitions() {
        let pool = pool_with(PoolConfig {
            maxhandles: 4,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });
        pool.shutdown(None);
        let err = pool.get_handle(Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, Error::Shutdown { .. }));
    }

    #[test]
    fn bounce_forces_reconnect_on_next_use() {
        let pool = pool_with(PoolConfig {
            maxhandles: 1,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });
        let h = pool.get_handle(Some(Duration::from_millis(50))).unwrap();
        pool.put_handle(h);
        pool.bounce();

        let h2 = pool.get_handle(Some(Duration::from_millis(50))).unwrap();
        pool.put_handle(h2);

        let stats = pool.stats();
        assert_eq!(stats.iter().find(|(k, _)| *k == "handleopens").unwrap().1, 2);
    }

    #[test]
    fn unlimited_pool_reuses_thread_local_handle() {
        let pool = pool_with(PoolConfig {
            maxhandles: 0,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });
        let h = pool.get_handle(None).unwrap();
        pool.put_handle(h);
        let h2 = pool.get_handle(None).unwrap();
        pool.put_handle(h2);
        // A fresh driver-level open only ever happened once; the second
        // acquisition came from the thread-local cache.
        let stats = pool.stats();
        assert_eq!(stats.iter().find(|(k, _)| *k == "handleopens").unwrap().1, 1);
    }

    #[test]
    fn tls_destructor_reclaims_handle_when_thread_exits() {
        let pool = pool_with(PoolConfig {
            maxhandles: 0,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });

        let worker_pool = StdArc::clone(&pool);
        thread::spawn(move || {
            let h = worker_pool.get_handle(None).unwrap();
            worker_pool.put_handle(h);
        })
        .join()
        .unwrap();

        // The worker thread's TLS cache was torn down without the worker
        // ever calling put_handle from the main thread; the handle should
        // have come back through TlsEntry's Drop, not leaked.
        let h2 = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
        pool.put_handle(h2);
        let stats = pool.stats();
        assert_eq!(stats.iter().find(|(k, _)| *k == "handleopens").unwrap().1, 1);
    }

    #[test]
    fn config_get_set_returns_old_value_and_applies_new() {
        let pool = pool_with(PoolConfig {
            maxhandles: 4,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });
        let old = pool.config_get_set("maxrows", Some(ConfigValue::Int(5000))).unwrap();
        assert_eq!(old, Some(ConfigValue::Int(1000)));
        assert_eq!(pool.config_snapshot().maxrows, 5000);
    }

    #[test]
    fn config_get_set_rejects_unknown_option() {
        let pool = pool_with(PoolConfig {
            maxhandles: 4,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        });
        assert!(pool.config_get_set("bogus", Some(ConfigValue::Int(1))).is_err());
    }
}

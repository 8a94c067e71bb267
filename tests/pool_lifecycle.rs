//! End-to-end pool/handle lifecycle scenarios against the in-memory mock
//! driver: concurrent acquisition under a bound, idle recycling driven by
//! `maxidle`, bouncing a handle out from under a concurrent leaseholder, and
//! transaction rollback on a failed statement.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dbi_core::config::PoolConfig;
use dbi_core::driver::{Isolation, Value};
use dbi_core::drivers::mock::MockDriver;
use dbi_core::error::Error;
use dbi_core::pool::Pool;

fn pool(config: PoolConfig) -> Arc<Pool> {
    Pool::new("test", Arc::new(MockDriver::new()), config)
}

#[test]
fn concurrent_acquisitions_respect_the_bound() {
    let pool = pool(PoolConfig {
        maxhandles: 2,
        checkinterval: Duration::from_secs(3600),
        ..PoolConfig::default()
    });

    let h1 = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    let h2 = pool.get_handle(Some(Duration::from_millis(100))).unwrap();

    // A third waiter blocks until one of the two leases is released.
    let waiter_pool = Arc::clone(&pool);
    let waiter = thread::spawn(move || waiter_pool.get_handle(Some(Duration::from_millis(500))));

    thread::sleep(Duration::from_millis(50));
    pool.put_handle(h1);

    let h3 = waiter.join().unwrap().expect("waiter should acquire the released handle");
    pool.put_handle(h2);
    pool.put_handle(h3);

    let stats = pool.stats();
    assert_eq!(stats.iter().find(|(k, _)| *k == "handlegets").unwrap().1, 3);
    assert_eq!(stats.iter().find(|(k, _)| *k == "handlemisses").unwrap().1, 0);
}

#[test]
fn idle_handle_past_maxidle_is_closed_on_sweep() {
    let pool = pool(PoolConfig {
        maxhandles: 1,
        maxidle: Some(Duration::from_millis(20)),
        checkinterval: Duration::from_secs(3600),
        ..PoolConfig::default()
    });

    let h = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    pool.put_handle(h);
    thread::sleep(Duration::from_millis(60));

    // check_pool(false) is what the background sweeper would call on its
    // own schedule; driving it directly keeps the test deterministic.
    pool.check_pool(false);

    let stats = pool.stats();
    assert_eq!(stats.iter().find(|(k, _)| *k == "idlecloses").unwrap().1, 1);

    // The next acquisition must reconnect rather than reuse a stale handle.
    let h2 = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    pool.put_handle(h2);
    let stats = pool.stats();
    assert_eq!(stats.iter().find(|(k, _)| *k == "handleopens").unwrap().1, 2);
}

#[test]
fn bounce_while_leased_reconnects_on_release_not_before() {
    let pool = pool(PoolConfig {
        maxhandles: 1,
        checkinterval: Duration::from_secs(3600),
        ..PoolConfig::default()
    });

    let h = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    let epoch_at_checkout = h.epoch;

    // Bouncing while the only handle is leased out must not touch it yet;
    // check_pool only re-evaluates the idle queue.
    let new_epoch = pool.bounce();
    assert!(new_epoch > epoch_at_checkout);

    pool.put_handle(h);
    let stats = pool.stats();
    // The returned handle was behind the epoch, so put_handle's
    // close_if_stale closed it instead of recycling it live.
    assert_eq!(stats.iter().find(|(k, _)| *k == "agedcloses").unwrap().1, 0);

    let h2 = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    assert_eq!(h2.epoch, new_epoch);
    pool.put_handle(h2);
}

#[test]
fn timeout_when_pool_is_exhausted_and_nobody_releases() {
    let pool = pool(PoolConfig {
        maxhandles: 1,
        checkinterval: Duration::from_secs(3600),
        ..PoolConfig::default()
    });
    let _held = pool.get_handle(Some(Duration::from_millis(50))).unwrap();

    let err = pool.get_handle(Some(Duration::from_millis(50))).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    let stats = pool.stats();
    assert_eq!(stats.iter().find(|(k, _)| *k == "handlemisses").unwrap().1, 1);
}

#[test]
fn failed_exec_inside_a_transaction_surfaces_and_rollback_clears_it() {
    let driver = Arc::new(MockDriver::new());
    // MockDriver::bindvar rewrites every `:name` occurrence to `?`.
    driver.fail_exec_for("select 1 where id = ?");
    let pool = Pool::new(
        "txn",
        driver as Arc<dyn dbi_core::driver::Driver>,
        PoolConfig {
            maxhandles: 1,
            checkinterval: Duration::from_secs(3600),
            ..PoolConfig::default()
        },
    );

    let mut handle = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    handle.begin(Isolation::ReadCommitted).unwrap();

    handle.prepare("select 1 where id = :id").unwrap();
    let err = handle.exec(&[Value::from(1_i64)], None).unwrap_err();
    assert!(matches!(err, Error::ExecFailure { .. }));
    assert!(handle.exception().is_some());

    handle.rollback().unwrap();
    assert_eq!(handle.trans_depth, -1);

    // reset() (as put_handle calls) must clear the residual exception.
    handle.reset().unwrap();
    assert!(handle.exception().is_none());
    pool.put_handle(handle);
}

#[test]
fn shutdown_drains_idle_handles_within_deadline() {
    let pool = pool(PoolConfig {
        maxhandles: 2,
        checkinterval: Duration::from_secs(3600),
        ..PoolConfig::default()
    });
    let h1 = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    let h2 = pool.get_handle(Some(Duration::from_millis(100))).unwrap();
    pool.put_handle(h1);
    pool.put_handle(h2);

    pool.shutdown(Some(Duration::from_millis(200)));

    let err = pool.get_handle(Some(Duration::from_millis(20))).unwrap_err();
    assert!(matches!(err, Error::Shutdown { .. }));
}

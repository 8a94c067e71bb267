//! A single database connection plus its private cursor, statement cache,
//! and exception state.
//!
//! Grounded on `Dbi_Handle` (`nsdbi.h`) and the handle-scoped operations in
//! `init.c` (`Dbi_Prepare`, `Dbi_Exec`, `Dbi_NextRow`, `Dbi_Begin`,
//! `Dbi_Commit`, `Dbi_Rollback`, `Dbi_Flush`, `Dbi_Reset`).

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::bind::parse_bind_vars;
use crate::driver::{Connection, Driver, Isolation, TransactionCmd, Value};
use crate::error::{Error, Result};
use crate::statement::{Lookup, StatementCache};

/// Exec state machine per §4.4: `Idle -> Prepared -> Executing -> Fetching`,
/// returning to `Idle` via `Flush`/`Reset` or after the last row is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Prepared,
    Executing,
    Fetching,
}

/// Out-of-band SQL-state-style exception, the lingua franca with drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub code: String,
    pub message: String,
}

/// Where a handle currently lives, used by the pool to decide recycling and
/// by invariants in `SPEC_FULL.md` §3/§8 ("a handle is on exactly one of:
/// idle queue, thread cache, or borrowed").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Borrowed by a caller, or sitting in a bounded pool's idle queue
    /// (distinguished by the pool, not by this field) — `n >= 0`.
    Pool(u32),
    /// Attached to a thread-local cache (`maxhandles == 0` pools).
    ThreadLocal,
}

pub struct Handle {
    pub driver: Arc<dyn Driver>,
    pub pool_name: String,
    pub connection: Option<Connection>,
    pub exception: Option<Exception>,
    /// `-1` = no active transaction, `0..n` = savepoint stack depth.
    pub trans_depth: i32,
    pub isolation: Option<Isolation>,
    pub otime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    pub epoch: u64,
    pub cache: StatementCache,
    pub slot: Slot,
    pub max_rows: u64,

    state: ExecState,
    current_sql: Option<String>,
    next_row_index: u64,
    queries_since_connect: u64,
}

impl Handle {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, pool_name: String, epoch: u64, cachesize: usize, max_rows: u64) -> Self {
        let now = Utc::now();
        Self {
            driver,
            pool_name,
            connection: None,
            exception: None,
            trans_depth: -1,
            isolation: None,
            otime: now,
            atime: now,
            epoch,
            cache: StatementCache::new(cachesize),
            slot: Slot::Pool(0),
            max_rows,
            state: ExecState::Idle,
            current_sql: None,
            next_row_index: 0,
            queries_since_connect: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ExecState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| self.driver.connected(c))
    }

    /// Opens the driver connection if not already connected.
    pub fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let conn = self
            .driver
            .open()
            .map_err(|e| Error::connect(&self.pool_name, e.to_string()))?;
        self.connection = Some(conn);
        self.otime = Utc::now();
        self.queries_since_connect = 0;
        Ok(())
    }

    /// Total queries executed since the connection was opened; the pool uses
    /// this against `maxqueries` in `close_if_stale`.
    #[must_use]
    pub fn queries_since_connect(&self) -> u64 {
        self.queries_since_connect
    }

    /// Returns the query count since connect and resets it to zero, for the
    /// pool to fold into its own running total exactly once, at close.
    pub fn take_query_count(&mut self) -> u64 {
        std::mem::take(&mut self.queries_since_connect)
    }

    /// Parses bind variables, looks up or inserts the statement in the
    /// per-handle cache, and calls the driver's `prepare` on a cache miss.
    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        if matches!(self.cache.lookup(sql), Lookup::Hit(_)) {
            self.current_sql = Some(sql.to_string());
            self.state = ExecState::Prepared;
            return Ok(());
        }

        let driver = Arc::clone(&self.driver);
        let (rewritten, variables) =
            parse_bind_vars(sql, |out, name, index| driver.bindvar(out, name, index))?;

        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::protocol("handle is not connected"))?;
        let mut outcome = driver.prepare(conn, &rewritten)?;

        if outcome.num_vars as usize != variables.len() {
            // The driver already allocated a statement for this prepare;
            // unlike a bare `prepare` error, it must be released explicitly
            // here or it leaks driver-side.
            driver.prepare_close(conn, &mut outcome.statement);
            self.cache.remove(sql);
            return Err(Error::bind_mismatch(variables.len(), outcome.num_vars as usize));
        }

        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::protocol("handle is not connected"))?;

        self.cache.insert(
            driver.as_ref(),
            conn,
            sql.to_string(),
            rewritten,
            variables,
            outcome.num_cols,
            outcome.statement,
        );
        self.current_sql = Some(sql.to_string());
        self.state = ExecState::Prepared;
        Ok(())
    }

    #[must_use]
    pub fn num_variables(&self) -> usize {
        self.current_statement().map_or(0, |s| s.variables.len())
    }

    pub fn variable_name(&mut self, index: usize) -> Result<String> {
        let out_of_range = self
            .current_statement()
            .is_none_or(|s| index >= s.variables.len());
        if out_of_range {
            // Matches the original's double-signal behavior (see
            // SPEC_FULL.md §9 open question): record into the exception
            // buffer *and* return an error, so both signals are available.
            self.exception = Some(Exception {
                code: "HY000".to_string(),
                message: format!("variable index {index} out of range"),
            });
            return Err(Error::protocol(format!("variable index {index} out of range")));
        }
        Ok(self.current_statement().unwrap().variables[index].clone())
    }

    #[must_use]
    pub fn num_columns(&self) -> u32 {
        self.current_statement().map_or(0, |s| s.num_cols)
    }

    fn current_statement(&self) -> Option<&crate::statement::Statement> {
        let sql = self.current_sql.as_ref()?;
        match self.cache.lookup(sql) {
            Lookup::Hit(stmt) => Some(stmt),
            Lookup::Miss => None,
        }
    }

    /// Binds `values` and executes the most recently prepared statement.
    pub fn exec(&mut self, values: &[Value], max_rows: Option<u64>) -> Result<()> {
        if self.state != ExecState::Prepared {
            return Err(Error::protocol("exec called without a matching prepare"));
        }
        let sql = self
            .current_sql
            .clone()
            .ok_or_else(|| Error::protocol("exec called without a matching prepare"))?;

        let driver = Arc::clone(&self.driver);
        self.cache.increment_queries(&sql);
        self.queries_since_connect += 1;
        self.max_rows = max_rows.unwrap_or(self.max_rows);

        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::protocol("handle is not connected"))?;
        let entry = self
            .cache
            .entry_mut(&sql)
            .ok_or_else(|| Error::protocol("prepared statement evicted before exec"))?;
        match driver.exec(conn, entry, values) {
            Ok(()) => {
                self.state = ExecState::Fetching;
                self.next_row_index = 0;
                Ok(())
            }
            Err(e) => {
                self.exception = Some(Exception {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Prepares and executes `sql` in one step, for callers that don't need
    /// statement reuse.
    pub fn exec_direct(&mut self, sql: &str) -> Result<()> {
        self.prepare(sql)?;
        self.exec(&[], None)
    }

    /// Advances the cursor. Returns `true` when the last row has been
    /// consumed. Enforces `max_rows`.
    pub fn next_row(&mut self) -> Result<bool> {
        if self.state != ExecState::Fetching {
            return Err(Error::protocol("next_row called with no pending result"));
        }
        if self.next_row_index >= self.max_rows {
            self.state = ExecState::Idle;
            return Err(Error::row_limit(self.max_rows));
        }
        let sql = self
            .current_sql
            .clone()
            .ok_or_else(|| Error::protocol("next_row called with no pending result"))?;
        let driver = Arc::clone(&self.driver);
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::protocol("handle is not connected"))?;
        let entry = self
            .cache
            .entry_mut(&sql)
            .ok_or_else(|| Error::protocol("prepared statement evicted mid-fetch"))?;
        let end = driver.next_row(conn, entry)?;
        self.next_row_index += 1;
        if end {
            self.state = ExecState::Idle;
        }
        Ok(end)
    }

    pub fn column_length(&self, index: usize) -> Result<(usize, bool)> {
        let sql = self.current_sql.as_ref().ok_or_else(|| Error::protocol("no current statement"))?;
        let conn = self.connection.as_ref().ok_or_else(|| Error::protocol("not connected"))?;
        let entry = self
            .cache
            .get(sql)
            .and_then(|s| s.driver_data.as_ref())
            .ok_or_else(|| Error::protocol("no prepared statement"))?;
        self.driver.column_length(conn, entry, index)
    }

    pub fn column_value(&self, index: usize) -> Result<Value> {
        let sql = self.current_sql.as_ref().ok_or_else(|| Error::protocol("no current statement"))?;
        let conn = self.connection.as_ref().ok_or_else(|| Error::protocol("not connected"))?;
        let entry = self
            .cache
            .get(sql)
            .and_then(|s| s.driver_data.as_ref())
            .ok_or_else(|| Error::protocol("no prepared statement"))?;
        self.driver.column_value(conn, entry, index)
    }

    pub fn column_name(&self, index: usize) -> Result<String> {
        let sql = self.current_sql.as_ref().ok_or_else(|| Error::protocol("no current statement"))?;
        let conn = self.connection.as_ref().ok_or_else(|| Error::protocol("not connected"))?;
        let entry = self
            .cache
            .get(sql)
            .and_then(|s| s.driver_data.as_ref())
            .ok_or_else(|| Error::protocol("no prepared statement"))?;
        self.driver.column_name(conn, entry, index)
    }

    /// Begins an outer transaction (`depth -1 -> 0`) or a nested savepoint
    /// (`depth >= 1`). Raising isolation once inside an outer transaction is
    /// rejected.
    pub fn begin(&mut self, isolation: Isolation) -> Result<()> {
        if self.trans_depth >= 0 {
            if let Some(current) = self.isolation {
                if isolation > current {
                    return Err(Error::txn_rule(
                        "cannot raise isolation level inside an active transaction",
                    ));
                }
            }
        } else {
            self.isolation = Some(isolation);
        }
        let depth = (self.trans_depth + 1).max(0) as u32;
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::protocol("handle is not connected"))?;
        self.driver.transaction(conn, depth, TransactionCmd::Begin, isolation)?;
        self.trans_depth += 1;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.end_transaction(TransactionCmd::Commit)
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.end_transaction(TransactionCmd::Rollback)
    }

    fn end_transaction(&mut self, cmd: TransactionCmd) -> Result<()> {
        if self.trans_depth < 0 {
            return Err(Error::txn_rule("no active transaction"));
        }
        let depth = self.trans_depth as u32;
        let isolation = self.isolation.unwrap_or(Isolation::ReadCommitted);
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::protocol("handle is not connected"))?;
        self.driver.transaction(conn, depth, cmd, isolation)?;
        self.trans_depth -= 1;
        if self.trans_depth < 0 {
            self.isolation = None;
        }
        Ok(())
    }

    /// Discards pending rows for the current statement.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(sql) = self.current_sql.clone() {
            let driver = Arc::clone(&self.driver);
            if let Some(conn) = self.connection.as_mut() {
                if let Some(entry) = self.cache.entry_mut(&sql) {
                    driver.flush(conn, entry)?;
                }
            }
        }
        self.state = ExecState::Idle;
        Ok(())
    }

    /// Restores the handle to a sane state for its next use: flushes
    /// pending rows, clears the exception, asks the driver to reset. Any
    /// residual exception is logged at `Error` severity before clearing,
    /// per §7 Propagation. Idempotent on an already-idle handle.
    pub fn reset(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(exc) = self.exception.take() {
            log::error!(
                "pool {:?}: clearing residual exception [{}] on reset: {}",
                self.pool_name,
                exc.code,
                exc.message
            );
        }
        if let Some(conn) = self.connection.as_mut() {
            self.driver.reset(conn)?;
        }
        self.state = ExecState::Idle;
        self.current_sql = None;
        Ok(())
    }

    #[must_use]
    pub fn exception(&self) -> Option<&Exception> {
        self.exception.as_ref()
    }

    pub fn set_exception(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.exception = Some(Exception {
            code: code.into(),
            message: message.into(),
        });
    }

    pub fn clear_exception(&mut self) {
        self.exception = None;
    }

    /// Logs the current exception, if any, at `Error` severity without clearing it.
    pub fn log_exception(&self) {
        if let Some(exc) = &self.exception {
            log::error!("pool {:?}: [{}] {}", self.pool_name, exc.code, exc.message);
        }
    }

    /// Closes the connection and flushes the statement cache. Idempotent.
    ///
    /// Zeroes `otime`/`atime` (`init.c:1894`: `handlePtr->atime =
    /// handlePtr->otime = 0`) since a disconnected handle's age is
    /// meaningless; `close_if_stale`'s `is_connected()` guard is what
    /// actually stops a closed handle from being re-matched, this just
    /// keeps the timestamps from reading as nonsense in the meantime.
    pub fn disconnect(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            self.cache.flush(self.driver.as_ref(), &mut conn);
            self.driver.close(&mut conn);
        }
        self.state = ExecState::Idle;
        self.current_sql = None;
        self.trans_depth = -1;
        self.isolation = None;
        self.otime = DateTime::<Utc>::UNIX_EPOCH;
        self.atime = DateTime::<Utc>::UNIX_EPOCH;
    }
}

//! An in-memory [`Driver`] with no real I/O, used only by this crate's own
//! unit and integration tests (see `SPEC_FULL.md` §10.4). Not the scripting
//! layer's mock driver named out of scope in §1 — this one exists purely to
//! make pool/handle lifecycle behavior testable without a real database.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::driver::{Connection, Driver, Isolation, PrepareOutcome, StatementHandle, TransactionCmd, Value};
use crate::error::{Error, Result};

struct MockConnection {
    connected: bool,
}

struct MockStatement {
    rows: Vec<Vec<Value>>,
    cursor: usize,
    should_fail: bool,
}

/// Canned row set a test can register for a given SQL text via [`MockDriver::set_rows`].
pub struct MockDriver {
    open_calls: AtomicU64,
    close_calls: AtomicU64,
    prepare_close_calls: AtomicU64,
    fail_open: AtomicBool,
    fail_exec_sql: Mutex<Option<String>>,
    rows_by_sql: Mutex<HashMap<String, Vec<Vec<Value>>>>,
    columns_by_sql: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open_calls: AtomicU64::new(0),
            close_calls: AtomicU64::new(0),
            prepare_close_calls: AtomicU64::new(0),
            fail_open: AtomicBool::new(false),
            fail_exec_sql: Mutex::new(None),
            rows_by_sql: Mutex::new(HashMap::new()),
            columns_by_sql: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_calls(&self) -> u64 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn prepare_close_calls(&self) -> u64 {
        self.prepare_close_calls.load(Ordering::SeqCst)
    }

    /// Makes the next `open()` call fail, to exercise `Error::Connect` paths.
    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Makes `exec` fail whenever the rewritten SQL equals `sql`.
    pub fn fail_exec_for(&self, sql: impl Into<String>) {
        *self.fail_exec_sql.lock().unwrap() = Some(sql.into());
    }

    /// Registers the rows (and, implicitly, column count) returned by `exec`
    /// for a given rewritten SQL text.
    pub fn set_rows(&self, sql: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) {
        let sql = sql.into();
        self.columns_by_sql.lock().unwrap().insert(sql.clone(), columns);
        self.rows_by_sql.lock().unwrap().insert(sql, rows);
    }
}

fn downcast_conn(conn: &Connection) -> &MockConnection {
    conn.downcast_ref::<MockConnection>()
        .expect("driver-private connection context is not a MockConnection")
}

fn downcast_conn_mut(conn: &mut Connection) -> &mut MockConnection {
    conn.downcast_mut::<MockConnection>()
        .expect("driver-private connection context is not a MockConnection")
}

fn downcast_stmt(stmt: &StatementHandle) -> &MockStatement {
    stmt.downcast_ref::<MockStatement>()
        .expect("driver-private statement context is not a MockStatement")
}

fn downcast_stmt_mut(stmt: &mut StatementHandle) -> &mut MockStatement {
    stmt.downcast_mut::<MockStatement>()
        .expect("driver-private statement context is not a MockStatement")
}

impl Driver for MockDriver {
    fn open(&self) -> Result<Connection> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(Error::connect("mock", "simulated connect failure"));
        }
        Ok(Box::new(MockConnection { connected: true }))
    }

    fn close(&self, conn: &mut Connection) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        downcast_conn_mut(conn).connected = false;
    }

    fn connected(&self, conn: &Connection) -> bool {
        downcast_conn(conn).connected
    }

    fn bindvar(&self, out: &mut String, _name: &str, _index: usize) {
        out.push('?');
    }

    fn prepare(&self, _conn: &mut Connection, sql: &str) -> Result<PrepareOutcome> {
        let num_vars = sql.bytes().filter(|&b| b == b'?').count() as u32;
        let columns = self
            .columns_by_sql
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_default();
        let should_fail = self.fail_exec_sql.lock().unwrap().as_deref() == Some(sql);
        Ok(PrepareOutcome {
            statement: Box::new(MockStatement {
                rows: Vec::new(),
                cursor: 0,
                should_fail,
            }),
            num_vars,
            num_cols: columns.len() as u32,
        })
    }

    fn prepare_close(&self, _conn: &mut Connection, _stmt: &mut StatementHandle) {
        self.prepare_close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn exec(&self, _conn: &mut Connection, stmt: &mut StatementHandle, _values: &[Value]) -> Result<()> {
        let rows_by_sql = self.rows_by_sql.lock().unwrap();
        let mock_stmt = downcast_stmt_mut(stmt);
        if mock_stmt.should_fail {
            return Err(Error::exec_failure("DBI", "simulated exec failure"));
        }
        if mock_stmt.rows.is_empty() {
            if let Some(rows) = rows_by_sql.values().next() {
                mock_stmt.rows = rows.clone();
            }
        }
        mock_stmt.cursor = 0;
        Ok(())
    }

    fn next_row(&self, _conn: &mut Connection, stmt: &mut StatementHandle) -> Result<bool> {
        let mock_stmt = downcast_stmt_mut(stmt);
        if mock_stmt.cursor >= mock_stmt.rows.len() {
            return Ok(true);
        }
        mock_stmt.cursor += 1;
        Ok(mock_stmt.cursor >= mock_stmt.rows.len())
    }

    fn column_length(&self, _conn: &Connection, stmt: &StatementHandle, index: usize) -> Result<(usize, bool)> {
        let mock_stmt = downcast_stmt(stmt);
        let row_idx = mock_stmt.cursor.saturating_sub(1);
        let value = mock_stmt
            .rows
            .get(row_idx)
            .and_then(|row| row.get(index))
            .ok_or_else(|| Error::protocol("column index out of range"))?;
        Ok((value.data.as_ref().map_or(0, Vec::len), value.binary))
    }

    fn column_name(&self, _conn: &Connection, _stmt: &StatementHandle, index: usize) -> Result<String> {
        Ok(format!("column{index}"))
    }

    fn column_value(&self, _conn: &Connection, stmt: &StatementHandle, index: usize) -> Result<Value> {
        let mock_stmt = downcast_stmt(stmt);
        let row_idx = mock_stmt.cursor.saturating_sub(1);
        mock_stmt
            .rows
            .get(row_idx)
            .and_then(|row| row.get(index))
            .cloned()
            .ok_or_else(|| Error::protocol("column index out of range"))
    }

    fn transaction(
        &self,
        _conn: &mut Connection,
        _depth: u32,
        _cmd: TransactionCmd,
        _isolation: Isolation,
    ) -> Result<()> {
        Ok(())
    }

    fn flush(&self, _conn: &mut Connection, stmt: &mut StatementHandle) -> Result<()> {
        let mock_stmt = downcast_stmt_mut(stmt);
        mock_stmt.cursor = mock_stmt.rows.len();
        Ok(())
    }

    fn reset(&self, _conn: &mut Connection) -> Result<()> {
        Ok(())
    }
}

//! A concrete [`Driver`] backed by `sqlx-oldapi`'s PostgreSQL connection
//! type.
//!
//! Grounded on the teacher's `dbms/postgres/inner.rs` (`PoolOptions`,
//! `RUNTIME.block_on` bridging) and `driver_factory.rs` (URL-based
//! construction) — adapted from "one `sqlx::Pool` per driver instance,
//! pooling handled entirely by sqlx" to "one `PgConnection` per `Driver::open`
//! call, pooling handled entirely by this crate's own `pool.rs`", since the
//! core owns connection lifecycle per `SPEC_FULL.md` §4.3.

use sqlx_oldapi::{Column, Connection as _, Executor, Row};

use crate::driver::{
    self, Connection as DriverConnection, Driver, Isolation, PrepareOutcome, StatementHandle, TransactionCmd, Value,
};
use crate::error::{Error, Result};
use crate::RUNTIME;

struct PgConnectionHandle {
    conn: Option<sqlx_oldapi::postgres::PgConnection>,
}

struct PgStatement {
    sql: String,
    rows: Vec<sqlx_oldapi::postgres::PgRow>,
    cursor: usize,
}

/// Driver for a single PostgreSQL database, identified by a connection URL.
pub struct PgDriver {
    url: String,
}

impl PgDriver {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn downcast_conn(conn: &DriverConnection) -> &PgConnectionHandle {
    conn.downcast_ref::<PgConnectionHandle>()
        .expect("driver-private connection context is not a PgConnectionHandle")
}

fn downcast_conn_mut(conn: &mut DriverConnection) -> &mut PgConnectionHandle {
    conn.downcast_mut::<PgConnectionHandle>()
        .expect("driver-private connection context is not a PgConnectionHandle")
}

fn downcast_stmt(stmt: &StatementHandle) -> &PgStatement {
    stmt.downcast_ref::<PgStatement>()
        .expect("driver-private statement context is not a PgStatement")
}

fn downcast_stmt_mut(stmt: &mut StatementHandle) -> &mut PgStatement {
    stmt.downcast_mut::<PgStatement>()
        .expect("driver-private statement context is not a PgStatement")
}

/// Reads a single column out of a row as the wire [`Value`] shape: raw text
/// bytes plus a binary flag. This driver surfaces every column as text,
/// matching the core's narrower value model — no typed column decoding is
/// part of this crate's scope.
fn column_as_value(row: &sqlx_oldapi::postgres::PgRow, index: usize) -> Result<Value> {
    use sqlx_oldapi::ValueRef;
    let raw = row
        .try_get_raw(index)
        .map_err(|e| Error::protocol(format!("column {index} out of range: {e}")))?;
    if raw.is_null() {
        return Ok(Value::null());
    }
    let text: Option<String> = row
        .try_get(index)
        .map_err(|e| Error::protocol(format!("failed to decode column {index}: {e}")))?;
    Ok(text.map_or_else(Value::null, Value::from))
}

impl Driver for PgDriver {
    fn open(&self) -> Result<DriverConnection> {
        let conn = RUNTIME
            .block_on(sqlx_oldapi::postgres::PgConnection::connect(&self.url))
            .map_err(|e| Error::connect(&self.url, e.to_string()))?;
        Ok(Box::new(PgConnectionHandle { conn: Some(conn) }))
    }

    fn close(&self, conn: &mut DriverConnection) {
        let handle = downcast_conn_mut(conn);
        if let Some(mut c) = handle.conn.take() {
            let _ = RUNTIME.block_on(c.close());
        }
    }

    fn connected(&self, conn: &DriverConnection) -> bool {
        downcast_conn(conn).conn.is_some()
    }

    fn bindvar(&self, out: &mut String, _name: &str, index: usize) {
        out.push('$');
        out.push_str(&(index + 1).to_string());
    }

    fn prepare(&self, conn: &mut DriverConnection, sql: &str) -> Result<PrepareOutcome> {
        let handle = downcast_conn_mut(conn);
        let pg_conn = handle
            .conn
            .as_mut()
            .ok_or_else(|| Error::protocol("prepare on a disconnected handle"))?;
        let described = RUNTIME
            .block_on(pg_conn.describe(sql))
            .map_err(|e| Error::prepare(e.to_string()))?;
        let num_vars = described.parameters().map_or(0, |p| match p {
            sqlx_oldapi::Either::Left(types) => types.len() as u32,
            sqlx_oldapi::Either::Right(count) => count as u32,
        });
        let num_cols = described.columns().len() as u32;
        Ok(PrepareOutcome {
            statement: Box::new(PgStatement {
                sql: sql.to_string(),
                rows: Vec::new(),
                cursor: 0,
            }),
            num_vars,
            num_cols,
        })
    }

    fn prepare_close(&self, _conn: &mut DriverConnection, _stmt: &mut StatementHandle) {
        // sqlx-oldapi has no separate server-side deallocate step reachable
        // from this API surface; dropping the statement context is enough.
    }

    fn exec(&self, conn: &mut DriverConnection, stmt: &mut StatementHandle, values: &[Value]) -> Result<()> {
        let handle = downcast_conn_mut(conn);
        let pg_conn = handle
            .conn
            .as_mut()
            .ok_or_else(|| Error::protocol("exec on a disconnected handle"))?;
        let pg_stmt = downcast_stmt_mut(stmt);

        let mut query = sqlx_oldapi::query(&pg_stmt.sql);
        for value in values {
            match &value.data {
                None => query = query.bind(Option::<String>::None),
                Some(bytes) => {
                    let text = String::from_utf8_lossy(bytes).into_owned();
                    query = query.bind(text);
                }
            }
        }

        let rows = RUNTIME
            .block_on(query.fetch_all(&mut *pg_conn))
            .map_err(|e| Error::exec_failure("DBI", e.to_string()))?;
        pg_stmt.rows = rows;
        pg_stmt.cursor = 0;
        Ok(())
    }

    fn next_row(&self, _conn: &mut DriverConnection, stmt: &mut StatementHandle) -> Result<bool> {
        let pg_stmt = downcast_stmt_mut(stmt);
        if pg_stmt.cursor >= pg_stmt.rows.len() {
            return Ok(true);
        }
        pg_stmt.cursor += 1;
        Ok(pg_stmt.cursor >= pg_stmt.rows.len())
    }

    fn column_length(&self, _conn: &DriverConnection, stmt: &StatementHandle, index: usize) -> Result<(usize, bool)> {
        let pg_stmt = downcast_stmt(stmt);
        let row = pg_stmt
            .rows
            .get(pg_stmt.cursor.saturating_sub(1))
            .ok_or_else(|| Error::protocol("no current row"))?;
        let value = column_as_value(row, index)?;
        Ok((value.data.as_ref().map_or(0, Vec::len), value.binary))
    }

    fn column_name(&self, _conn: &DriverConnection, stmt: &StatementHandle, index: usize) -> Result<String> {
        let pg_stmt = downcast_stmt(stmt);
        let row = pg_stmt
            .rows
            .first()
            .ok_or_else(|| Error::protocol("statement has not been executed"))?;
        row.columns()
            .get(index)
            .map(|c| c.name().to_string())
            .ok_or_else(|| Error::protocol("column index out of range"))
    }

    fn column_value(&self, _conn: &DriverConnection, stmt: &StatementHandle, index: usize) -> Result<Value> {
        let pg_stmt = downcast_stmt(stmt);
        let row = pg_stmt
            .rows
            .get(pg_stmt.cursor.saturating_sub(1))
            .ok_or_else(|| Error::protocol("no current row"))?;
        column_as_value(row, index)
    }

    fn transaction(
        &self,
        conn: &mut DriverConnection,
        depth: u32,
        cmd: TransactionCmd,
        isolation: Isolation,
    ) -> Result<()> {
        let handle = downcast_conn_mut(conn);
        let pg_conn = handle
            .conn
            .as_mut()
            .ok_or_else(|| Error::protocol("transaction on a disconnected handle"))?;

        let sql = match (depth, cmd) {
            (0, TransactionCmd::Begin) => format!(
                "BEGIN ISOLATION LEVEL {}",
                isolation_sql(isolation)
            ),
            (0, TransactionCmd::Commit) => "COMMIT".to_string(),
            (0, TransactionCmd::Rollback) => "ROLLBACK".to_string(),
            (n, TransactionCmd::Begin) => format!("SAVEPOINT sp_{n}"),
            (n, TransactionCmd::Commit) => format!("RELEASE SAVEPOINT sp_{n}"),
            (n, TransactionCmd::Rollback) => format!("ROLLBACK TO SAVEPOINT sp_{n}"),
        };
        RUNTIME
            .block_on(pg_conn.execute(sql.as_str()))
            .map_err(|e| Error::txn_rule(e.to_string()))?;
        Ok(())
    }

    fn flush(&self, _conn: &mut DriverConnection, stmt: &mut StatementHandle) -> Result<()> {
        let pg_stmt = downcast_stmt_mut(stmt);
        pg_stmt.cursor = pg_stmt.rows.len();
        Ok(())
    }

    fn reset(&self, conn: &mut DriverConnection) -> Result<()> {
        let handle = downcast_conn_mut(conn);
        if let Some(pg_conn) = handle.conn.as_mut() {
            RUNTIME
                .block_on(pg_conn.execute("ROLLBACK"))
                .map_err(|e| Error::protocol(e.to_string()))?;
        }
        Ok(())
    }
}

fn isolation_sql(isolation: Isolation) -> &'static str {
    match isolation {
        Isolation::ReadUncommitted => "READ UNCOMMITTED",
        Isolation::ReadCommitted => "READ COMMITTED",
        Isolation::RepeatableRead => "REPEATABLE READ",
        Isolation::Serializable => "SERIALIZABLE",
    }
}

// Driver descriptor convenience constructor, grounded on `driver_factory.rs`'s
// URL-scheme dispatch (`postgres://`, `postgresql://`, `pgsql://`).
pub fn descriptor(url: &str) -> Result<driver::DriverDescriptor> {
    let parsed = url::Url::parse(url).map_err(|e| Error::connect(url, e.to_string()))?;
    match parsed.scheme() {
        "postgres" | "postgresql" | "pgsql" => Ok(driver::DriverDescriptor::new(
            "pg",
            "postgres",
            std::sync::Arc::new(PgDriver::new(url)),
        )),
        other => Err(Error::connect(url, format!("unsupported scheme {other:?}"))),
    }
}

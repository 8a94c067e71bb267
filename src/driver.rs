//! The narrow, callback-shaped contract every database backend implements.
//!
//! Grounded directly on `nsdbidrv.h`'s 14-callback table (`Dbi_OpenProc` ..
//! `Dbi_ResetProc`) and `Dbi_RegisterDriver`. In a language with trait
//! objects the `Dbi_ProcId` discriminator and the table-at-registration
//! pattern are pure C artifacts and are collapsed here into a single trait;
//! the legacy `Dbi_Proc`/`DbiDriver` table in the even older `drv.c` is not
//! modeled at all (superseded).

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;

/// Opaque, driver-private connection context. Stands in for the C world's
/// `ClientData driverData` field on `Dbi_Handle`.
pub type Connection = Box<dyn Any + Send>;

/// Opaque, driver-private prepared-statement context. Stands in for
/// `Dbi_Statement.driverData`.
pub type StatementHandle = Box<dyn Any + Send>;

/// SQL transaction isolation level, per `Dbi_Isolation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Isolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A phase of a transaction, per `Dbi_TransactionCmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionCmd {
    Begin,
    Commit,
    Rollback,
}

/// A single value crossing the driver boundary: a bind parameter going in,
/// or a column value coming out. `None` data is a SQL NULL. Stands in for
/// `Dbi_Value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub data: Option<Vec<u8>>,
    pub binary: bool,
}

impl Value {
    #[must_use]
    pub fn null() -> Self {
        Self {
            data: None,
            binary: false,
        }
    }

    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            binary: false,
        }
    }

    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            binary: true,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::text(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::text(s.into_bytes())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::text(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::text(if v { "t" } else { "f" })
    }
}

/// The 14-method driver contract. A driver missing a faithful implementation
/// of any method is not rejected at compile time the way the original
/// rejects an incomplete `Dbi_DriverProc` table at registration — the trait
/// itself is the completeness check.
pub trait Driver: Send + Sync {
    /// Opens a connection, returning driver-private context.
    fn open(&self) -> Result<Connection>;

    /// Closes the connection. Must be idempotent on an already-disconnected handle.
    fn close(&self, conn: &mut Connection);

    /// Cheap health predicate.
    fn connected(&self, conn: &Connection) -> bool;

    /// Emits this driver's native placeholder notation for `name` at zero-based `index`.
    fn bindvar(&self, out: &mut String, name: &str, index: usize);

    /// Parses and prepares `sql`, returning driver-private statement context
    /// plus the variable and column counts it found.
    fn prepare(&self, conn: &mut Connection, sql: &str) -> Result<PrepareOutcome>;

    /// Releases driver resources for a cached statement, on eviction or handle close.
    fn prepare_close(&self, conn: &mut Connection, stmt: &mut StatementHandle);

    /// Binds `values` and executes. May open a row cursor.
    fn exec(&self, conn: &mut Connection, stmt: &mut StatementHandle, values: &[Value]) -> Result<()>;

    /// Advances the row cursor. Returns `true` when the last row has been consumed.
    fn next_row(&self, conn: &mut Connection, stmt: &mut StatementHandle) -> Result<bool>;

    /// Length in bytes of the current row's column `index`, and whether it is binary.
    fn column_length(&self, conn: &Connection, stmt: &StatementHandle, index: usize) -> Result<(usize, bool)>;

    /// Column label for the current statement.
    fn column_name(&self, conn: &Connection, stmt: &StatementHandle, index: usize) -> Result<String>;

    /// Current row's value for `index`.
    fn column_value(&self, conn: &Connection, stmt: &StatementHandle, index: usize) -> Result<Value>;

    /// Begins, commits, or rolls back at the given savepoint `depth`.
    fn transaction(
        &self,
        conn: &mut Connection,
        depth: u32,
        cmd: TransactionCmd,
        isolation: Isolation,
    ) -> Result<()>;

    /// Discards any pending rows for the current statement.
    fn flush(&self, conn: &mut Connection, stmt: &mut StatementHandle) -> Result<()>;

    /// Restores the handle to a sane state for its next use (aborts any
    /// in-flight statement, resets autocommit, etc.).
    fn reset(&self, conn: &mut Connection) -> Result<()>;
}

/// Result of a successful `Driver::prepare` call.
pub struct PrepareOutcome {
    pub statement: StatementHandle,
    pub num_vars: u32,
    pub num_cols: u32,
}

/// An immutable record naming one backend: driver identifier, database
/// identifier, and its callback table. Registered once, shared by every pool
/// using it. Stands in for the combination of `Dbi_RegisterDriver`'s
/// arguments and the table it builds internally.
pub struct DriverDescriptor {
    pub driver_name: String,
    pub database_name: String,
    pub driver: Arc<dyn Driver>,
}

impl DriverDescriptor {
    #[must_use]
    pub fn new(
        driver_name: impl Into<String>,
        database_name: impl Into<String>,
        driver: Arc<dyn Driver>,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            database_name: database_name.into(),
            driver,
        }
    }
}

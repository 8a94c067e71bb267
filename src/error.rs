use std::fmt;

/// SQL-state-style result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the core can return to a caller.
///
/// Every variant carries a 5-character SQL-state-like code via [`Error::code`].
/// Core-generated programming errors use `"HY000"`; core-generated domain
/// errors use `"DBI"`; driver-reported failures pass the driver's own code
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Handle acquisition deadline exceeded.
    Timeout { pool: String },
    /// Pool is draining; no further handles will be issued.
    Shutdown { pool: String },
    /// Driver's `open` callback failed.
    Connect { pool: String, message: String },
    /// Bind parsing or driver `prepare` failed.
    Prepare { message: String },
    /// Driver reported a different variable count than the parser counted.
    BindMismatch { parsed: usize, reported: usize },
    /// More than the compile-time maximum placeholders in one statement.
    BindOverflow { found: usize, max: usize },
    /// Driver `exec` failed; carries the driver's own SQL-state code.
    ExecFailure { code: String, message: String },
    /// API used out of order, or an index/argument was out of range.
    Protocol { message: String },
    /// `maxRows` ceiling exceeded while fetching.
    RowLimit { max_rows: u64 },
    /// Illegal transaction nesting or commit/rollback without a transaction.
    TxnRule { message: String },
}

impl Error {
    #[must_use]
    pub fn timeout(pool: impl Into<String>) -> Self {
        Self::Timeout { pool: pool.into() }
    }

    #[must_use]
    pub fn shutdown(pool: impl Into<String>) -> Self {
        Self::Shutdown { pool: pool.into() }
    }

    #[must_use]
    pub fn connect(pool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            pool: pool.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn prepare(message: impl Into<String>) -> Self {
        Self::Prepare {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bind_mismatch(parsed: usize, reported: usize) -> Self {
        Self::BindMismatch { parsed, reported }
    }

    #[must_use]
    pub fn bind_overflow(found: usize, max: usize) -> Self {
        Self::BindOverflow { found, max }
    }

    #[must_use]
    pub fn exec_failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecFailure {
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn row_limit(max_rows: u64) -> Self {
        Self::RowLimit { max_rows }
    }

    #[must_use]
    pub fn txn_rule(message: impl Into<String>) -> Self {
        Self::TxnRule {
            message: message.into(),
        }
    }

    /// The 5-character SQL-state-style code for this error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::ExecFailure { code, .. } => code,
            Self::Timeout { .. }
            | Self::Shutdown { .. }
            | Self::Connect { .. }
            | Self::BindMismatch { .. } => "DBI",
            Self::Prepare { .. }
            | Self::BindOverflow { .. }
            | Self::Protocol { .. }
            | Self::RowLimit { .. }
            | Self::TxnRule { .. } => "HY000",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { pool } => write!(f, "[{}] timed out waiting for a handle on pool {pool:?}", self.code()),
            Self::Shutdown { pool } => write!(f, "[{}] pool {pool:?} is shutting down", self.code()),
            Self::Connect { pool, message } => {
                write!(f, "[{}] connect failed on pool {pool:?}: {message}", self.code())
            }
            Self::Prepare { message } => write!(f, "[{}] prepare failed: {message}", self.code()),
            Self::BindMismatch { parsed, reported } => write!(
                f,
                "[{}] parser counted {parsed} bind variables but driver reported {reported}",
                self.code()
            ),
            Self::BindOverflow { found, max } => {
                write!(f, "[{}] {found} bind variables exceeds the maximum of {max}", self.code())
            }
            Self::ExecFailure { code, message } => write!(f, "[{code}] {message}"),
            Self::Protocol { message } => write!(f, "[{}] {message}", self.code()),
            Self::RowLimit { max_rows } => {
                write!(f, "[{}] row limit of {max_rows} exceeded", self.code())
            }
            Self::TxnRule { message } => write!(f, "[{}] {message}", self.code()),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_spec() {
        assert_eq!(Error::timeout("p").code(), "DBI");
        assert_eq!(Error::shutdown("p").code(), "DBI");
        assert_eq!(Error::connect("p", "refused").code(), "DBI");
        assert_eq!(Error::bind_mismatch(1, 2).code(), "DBI");
        assert_eq!(Error::prepare("bad sql").code(), "HY000");
        assert_eq!(Error::bind_overflow(33, 32).code(), "HY000");
        assert_eq!(Error::protocol("out of order").code(), "HY000");
        assert_eq!(Error::row_limit(1000).code(), "HY000");
        assert_eq!(Error::txn_rule("no active transaction").code(), "HY000");
        assert_eq!(Error::exec_failure("23505", "duplicate key").code(), "23505");
    }

    #[test]
    fn display_includes_code() {
        let e = Error::bind_overflow(33, 32);
        let s = e.to_string();
        assert!(s.contains("HY000"));
        assert!(s.contains("33"));
        assert!(s.contains('3') && s.contains('2'));
    }
}

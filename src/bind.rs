//! Scans raw SQL for `:name` bind variables and rewrites them into a driver's
//! native placeholder notation.
//!
//! Grounded on the original `ParseBindVars`/`DefineBindVar` pair: a single
//! left-to-right pass tracking quote state and the run of a pending
//! identifier, with duplicate names kept as separate positional entries
//! because some drivers (positional `?`) cannot resolve a repeated name on
//! their own.

use crate::error::{Error, Result};

/// Compile-time cap on distinct bind-variable *occurrences* per statement.
pub const MAX_BIND_VARS: usize = 32;

#[derive(Clone, Copy)]
enum Mode {
    Normal,
    Quoted,
    /// Scanning the identifier that follows a `:`; byte offset of the `:` itself.
    Bind(usize),
}

/// Parses `sql`, calling `emit(out, name, index)` for each recognized bind
/// variable so the driver can append its native placeholder notation to
/// `out`. Returns the rewritten SQL and the ordered (duplicates preserved)
/// list of variable names.
///
/// # Errors
/// Returns [`Error::BindOverflow`] past [`MAX_BIND_VARS`] occurrences, and
/// [`Error::Prepare`] for a degenerate `:` with no following name (including
/// one at the very end of the input).
pub fn parse_bind_vars(
    sql: &str,
    mut emit: impl FnMut(&mut String, &str, usize),
) -> Result<(String, Vec<String>)> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 32);
    let mut names = Vec::new();
    let mut mode = Mode::Normal;
    let mut chunk_start = 0usize;

    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        let prev = if i == 0 { None } else { Some(bytes[i - 1]) };
        let next = bytes.get(i + 1).copied();

        match mode {
            Mode::Normal
                if c == b':' && prev != Some(b':') && next != Some(b':') && prev != Some(b'\\') =>
            {
                mode = Mode::Bind(i);
            }
            Mode::Normal if c == b'\'' && prev != Some(b'\\') => {
                mode = Mode::Quoted;
            }
            Mode::Quoted if c == b'\'' && prev != Some(b'\\') => {
                mode = Mode::Normal;
            }
            Mode::Bind(start) if !(c.is_ascii_alphanumeric() || c == b'_') && i > start + 1 => {
                out.push_str(&sql[chunk_start..start]);
                let name = &sql[start + 1..i];
                if names.len() >= MAX_BIND_VARS {
                    return Err(Error::bind_overflow(names.len() + 1, MAX_BIND_VARS));
                }
                emit(&mut out, name, names.len());
                names.push(name.to_string());
                chunk_start = i;
                mode = Mode::Normal;
                // Reprocess this byte under Normal mode (it may itself start
                // a quote or another bind variable).
                continue;
            }
            Mode::Bind(start) if !(c.is_ascii_alphanumeric() || c == b'_') => {
                // `:` immediately followed by a non-identifier byte: literal colon.
                let _ = start;
                mode = Mode::Normal;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    match mode {
        Mode::Bind(start) if bytes.len() > start + 1 => {
            out.push_str(&sql[chunk_start..start]);
            let name = &sql[start + 1..];
            if names.len() >= MAX_BIND_VARS {
                return Err(Error::bind_overflow(names.len() + 1, MAX_BIND_VARS));
            }
            emit(&mut out, name, names.len());
            names.push(name.to_string());
        }
        Mode::Bind(start) => {
            // Trailing `:` with nothing after it: degenerate empty name.
            return Err(Error::prepare(format!(
                "empty bind variable name at byte offset {start}"
            )));
        }
        Mode::Normal | Mode::Quoted => {
            out.push_str(&sql[chunk_start..]);
        }
    }

    Ok((out, names))
}

/// A no-op emitter that copies `:name` back unchanged; used to check that
/// bind parsing is idempotent over its own output.
pub fn identity_emit(out: &mut String, name: &str, _index: usize) {
    out.push(':');
    out.push_str(name);
}

/// Emits PostgreSQL-style `$1`, `$2`, ... placeholders (1-based).
pub fn dollar_emit(out: &mut String, _name: &str, index: usize) {
    out.push('$');
    out.push_str(&(index + 1).to_string());
}

/// Emits a bare `?` for every occurrence, for drivers with purely positional
/// placeholders.
pub fn question_mark_emit(out: &mut String, _name: &str, _index: usize) {
    out.push('?');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_basics() {
        let sql = "SELECT * FROM t WHERE a=:id AND b='::x' AND c=:name";
        let (rewritten, names) = parse_bind_vars(sql, dollar_emit).unwrap();
        assert_eq!(
            rewritten,
            "SELECT * FROM t WHERE a=$1 AND b='::x' AND c=$2"
        );
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn duplicate_variable_not_coalesced() {
        let sql = "WHERE a=:x OR b=:x";
        let (rewritten, names) = parse_bind_vars(sql, question_mark_emit).unwrap();
        assert_eq!(rewritten, "WHERE a=? OR b=?");
        assert_eq!(names, vec!["x", "x"]);
    }

    #[test]
    fn double_colon_cast_is_not_a_placeholder() {
        let (rewritten, names) = parse_bind_vars("a::int", dollar_emit).unwrap();
        assert_eq!(rewritten, "a::int");
        assert!(names.is_empty());
    }

    #[test]
    fn escaped_colon_is_not_a_placeholder() {
        let (rewritten, names) = parse_bind_vars(r"a\:b", dollar_emit).unwrap();
        assert_eq!(rewritten, r"a\:b");
        assert!(names.is_empty());
    }

    #[test]
    fn trailing_variable_at_end_of_input_is_valid() {
        let (rewritten, names) = parse_bind_vars("SELECT :id", dollar_emit).unwrap();
        assert_eq!(rewritten, "SELECT $1");
        assert_eq!(names, vec!["id"]);
    }

    #[test]
    fn lone_trailing_colon_is_a_prepare_error() {
        let err = parse_bind_vars("SELECT x = :", dollar_emit).unwrap_err();
        assert!(matches!(err, Error::Prepare { .. }));
    }

    #[test]
    fn exactly_32_placeholders_succeeds() {
        let sql = (0..32)
            .map(|i| format!(":v{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let (_, names) = parse_bind_vars(&sql, dollar_emit).unwrap();
        assert_eq!(names.len(), 32);
    }

    #[test]
    fn thirty_three_placeholders_overflows() {
        let sql = (0..33)
            .map(|i| format!(":v{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let err = parse_bind_vars(&sql, dollar_emit).unwrap_err();
        assert!(matches!(err, Error::BindOverflow { found: 33, max: 32 }));
    }

    #[test]
    fn quoted_colon_is_literal() {
        let (rewritten, names) = parse_bind_vars("b='a:b'", dollar_emit).unwrap();
        assert_eq!(rewritten, "b='a:b'");
        assert!(names.is_empty());
    }

    #[test]
    fn rewritten_sql_is_idempotent_under_identity_emitter() {
        let sql = "a=:x AND b=:y AND c=:x";
        let (once, names1) = parse_bind_vars(sql, identity_emit).unwrap();
        let (twice, names2) = parse_bind_vars(&once, identity_emit).unwrap();
        assert_eq!(once, twice);
        assert_eq!(names1, names2);
    }
}

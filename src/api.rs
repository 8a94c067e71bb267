//! The thin procedural surface named in `SPEC_FULL.md` §4.5: pool lookup,
//! handle lease/release, and the handle operations, as free functions over
//! the process-wide [`Registry`].
//!
//! Grounded on `nsdbi.h`'s public function list (`Dbi_GetHandle`,
//! `Dbi_PutHandle`, `Dbi_Exec`, `Dbi_NextRow`, ...) — this module is the
//! direct analogue of that header, minus the scripting-layer nested-lease
//! stack (out of scope per §1, left to the embedder).

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigValue, PoolConfig, RECOGNIZED_OPTIONS};
use crate::driver::Value;
use crate::error::{Error, Result};
use crate::handle::{Exception, Handle};
use crate::pool::Pool;
use crate::registry::Registry;

/// Registers a new pool on `registry`, dispatching to a driver by the
/// connection URL's scheme.
pub fn add_pool(registry: &Registry, name: impl Into<String>, url: &str, config: PoolConfig) -> Result<Arc<Pool>> {
    registry.add_pool(name, url, config)
}

#[must_use]
pub fn get_pool(registry: &Registry, name: &str) -> Option<Arc<Pool>> {
    registry.get_pool(name)
}

pub fn default_pool(registry: &Registry) -> Result<Arc<Pool>> {
    registry.default_pool()
}

#[must_use]
pub fn list_pools(registry: &Registry) -> Vec<String> {
    registry.list_pools()
}

pub fn get_handle(pool: &Arc<Pool>, timeout: Option<Duration>) -> Result<Handle> {
    pool.get_handle(timeout)
}

pub fn put_handle(pool: &Arc<Pool>, handle: Handle) {
    pool.put_handle(handle);
}

pub fn prepare(handle: &mut Handle, sql: &str) -> Result<()> {
    handle.prepare(sql)
}

#[must_use]
pub fn num_variables(handle: &Handle) -> usize {
    handle.num_variables()
}

pub fn variable_name(handle: &mut Handle, index: usize) -> Result<String> {
    handle.variable_name(index)
}

#[must_use]
pub fn num_columns(handle: &Handle) -> u32 {
    handle.num_columns()
}

pub fn column_name(handle: &Handle, index: usize) -> Result<String> {
    handle.column_name(index)
}

pub fn exec(handle: &mut Handle, values: &[Value], max_rows: Option<u64>) -> Result<()> {
    handle.exec(values, max_rows)
}

pub fn exec_direct(handle: &mut Handle, sql: &str) -> Result<()> {
    handle.exec_direct(sql)
}

pub fn next_row(handle: &mut Handle) -> Result<bool> {
    handle.next_row()
}

pub fn column_length(handle: &Handle, index: usize) -> Result<(usize, bool)> {
    handle.column_length(index)
}

pub fn column_value(handle: &Handle, index: usize) -> Result<Value> {
    handle.column_value(index)
}

pub fn begin(handle: &mut Handle, isolation: crate::driver::Isolation) -> Result<()> {
    handle.begin(isolation)
}

pub fn commit(handle: &mut Handle) -> Result<()> {
    handle.commit()
}

pub fn rollback(handle: &mut Handle) -> Result<()> {
    handle.rollback()
}

pub fn flush(handle: &mut Handle) -> Result<()> {
    handle.flush()
}

pub fn reset(handle: &mut Handle) -> Result<()> {
    handle.reset()
}

/// Bumps the pool's epoch, forcing every idle and in-flight handle to
/// reconnect once recycled. Returns the new epoch.
pub fn bounce_pool(pool: &Pool) -> u64 {
    log::info!("pool {:?}: bouncing", pool.name);
    pool.bounce()
}

#[must_use]
pub fn stats(pool: &Pool) -> Vec<(&'static str, u64)> {
    pool.stats()
}

/// Reads a pool option's current value, optionally writing `new_value`
/// first. Always returns the value the option had *before* this call;
/// `Ok(None)` means it had no value set. `Err` means `option` is not a
/// recognized name, or `new_value`'s type doesn't match the option.
pub fn config(pool: &Pool, option: &str, new_value: Option<ConfigValue>) -> Result<Option<ConfigValue>> {
    if !RECOGNIZED_OPTIONS.contains(&option) {
        return Err(Error::protocol(format!("unknown pool option {option:?}")));
    }
    pool.config_get_set(option, new_value)
}

#[must_use]
pub fn exception(handle: &Handle) -> Option<&Exception> {
    handle.exception()
}

pub fn set_exception(handle: &mut Handle, code: impl Into<String>, message: impl Into<String>) {
    handle.set_exception(code, message);
}

pub fn clear_exception(handle: &mut Handle) {
    handle.clear_exception();
}

pub fn log_exception(handle: &Handle) {
    handle.log_exception();
}

//! Concrete [`crate::driver::Driver`] implementations.
//!
//! `sqlx_backend` is the one real backend this crate ships, adapted from the
//! teacher's `sqlx-oldapi` integration. `mock` is ambient test tooling only
//! (see `SPEC_FULL.md` §10.4): an in-process driver with no real I/O, used
//! exclusively by this crate's own test suite to exercise pool and handle
//! logic deterministically.

pub mod mock;
pub mod sqlx_backend;

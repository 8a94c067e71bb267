#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]

//! Bounded connection pooling, bind-variable parsing, and a pluggable
//! driver contract for a multi-threaded application server.
//!
//! The crate has four layers: a bind-variable [`bind`] parser, a
//! per-handle [`statement`] cache, a [`pool`] that owns connection
//! lifecycle and recycling, and the [`driver`] contract that backends
//! implement. [`api`] is the thin procedural surface tying them together;
//! [`registry`] is the process-wide table of named pools.

pub mod api;
pub mod bind;
pub mod config;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod handle;
pub mod pool;
pub mod registry;
pub mod statement;

use std::sync::LazyLock;

use tokio::runtime::Runtime;

/// Shared runtime bridging this crate's synchronous [`driver::Driver`]
/// contract to `sqlx-oldapi`'s async client, used only by the concrete
/// backends under [`drivers`].
pub(crate) static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| Runtime::new().expect("failed to start Tokio runtime"));

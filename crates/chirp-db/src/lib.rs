//! Database layer for the chirp backend.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations for the tables this core owns:
//! `emotion_signals` and `emotion_reports`.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-process backend needs no external
//!   database server; WAL allows concurrent readers with a single writer,
//!   which matches the scheduler's read-mostly access pattern.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management. Store functions take `&Connection` and run on the
//!   blocking pool from async code.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema ships with the code that depends on it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};

//! Shared database repository test infrastructure
//!
//! The same test logic runs against both SQLite and PostgreSQL:
//!
//! - **SQLite**: fast in-memory tests that run with every `cargo test`
//! - **PostgreSQL**: testcontainers-backed, run with `cargo test -- --ignored`
//!
//! Each module holds shared `async fn`s taking a migrated `&DbPool`, plus a
//! `sqlite_tests` and a `postgres_tests` module that instantiate them.

mod event_logs;

//! End-to-end tests that drive the full router against in-memory SQLite.

#[cfg(all(test, feature = "database-sqlite"))]
mod api;

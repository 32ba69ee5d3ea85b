//! Core data model for the gateway's metadata side-table.
//!
//! The single entity is the object record: one row per uploaded object,
//! mapped to SQLite via `sqlx::FromRow` and serialized as JSON via `serde`.

pub mod object;

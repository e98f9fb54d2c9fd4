//! Core of the reality compiler.
//!
//! This is the foundation Port 42 daemon builds on: the content-addressed
//! object store, the virtual filesystem that projects it into named views,
//! the relation store and materialization pipeline that turn declarations
//! into running tools, and the supporting subsystems (sessions, search, the
//! reference resolver, the RPC wire protocol) an agent drives all of it
//! through.
//!
//! ## Module Overview
//!
//! - **`store`**: content-addressed object store (bytes + metadata sidecars)
//! - **`metadata`**: metadata sidecar schema and its derived SQLite index
//! - **`vfs`**: read-only virtual filesystem over the store and its views
//! - **`relation`**: declarative relations (the "what should exist")
//! - **`materializer`**: turns a relation into a running tool on disk
//! - **`rules`**: condition/action auto-spawn rules fired after materialization
//! - **`session`**: conversational memory, `Active -> Idle -> {Completed,Abandoned}`
//! - **`reference`**: `@type:target` reference grammar and bounded resolution
//! - **`url_cache`**: TTL-governed cache for fetched URL artifacts
//! - **`search`**: deterministic keyword search over the metadata index
//! - **`context`**: in-memory ring buffers feeding agent context snapshots
//! - **`prompt`**: system prompt assembly for agent sessions
//! - **`protocol`**: the line-delimited JSON RPC wire types
//! - **`validate`**: request validation (prompt length, reference grammar)
//! - **`config`**: on-disk layout and tunables
//! - **`db`**: SQLite connection helpers and the per-path lock map
//! - **`schemas`**: canonical SQL schemas for the derived indices
//! - **`error`**: canonical error type for all Port 42 operations
//! - **`time`**: clock and id-generation helpers
//! - **`ai`**: seam for the out-of-scope AI provider client

pub mod ai;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod materializer;
pub mod metadata;
pub mod prompt;
pub mod protocol;
pub mod reference;
pub mod relation;
pub mod rules;
pub mod schemas;
pub mod search;
pub mod session;
pub mod store;
pub mod time;
pub mod url_cache;
pub mod validate;
pub mod vfs;

//! Port 42: a local-first reality compiler.
//!
//! Port 42 is a content-addressed object store wrapped in a virtual
//! filesystem, with a declarative relation layer that materializes tools
//! and artifacts on disk and a small rule engine that lets those tools
//! spawn their own documentation and tests. Agents talk to the daemon over
//! a local socket using a line-delimited JSON protocol; everything else in
//! this crate exists to make that protocol's handlers small.
//!
//! # Architecture
//!
//! - **Object store** (`core::store`): immutable bytes addressed by SHA-256,
//!   with a JSON metadata sidecar per object.
//! - **Virtual filesystem** (`core::vfs`): a read-only, many-to-one
//!   projection of the store into named views (`/commands`, `/memory`,
//!   `/by-date`, `/by-agent`, `/similar/<name>`, ...).
//! - **Relations** (`core::relation`) and the **materializer**
//!   (`core::materializer`): a relation declares what should exist; the
//!   materializer turns it into an executable tool on disk.
//! - **Rules** (`core::rules`): fire after a successful materialization and
//!   may auto-spawn companion relations (viewers, docs, tests), guarded
//!   against recursion.
//! - **Sessions** (`core::session`): conversational memory with a small
//!   state machine, lazily idled on read.
//! - **Reference resolver** (`core::reference`) and **URL cache**
//!   (`core::url_cache`): `@type:target` references are resolved with a
//!   per-type timeout and folded into an agent's context under a byte
//!   budget.
//!
//! # Crate Structure
//!
//! - [`core`]: the store, VFS, relation/materialization pipeline, rule
//!   engine, session store, reference resolver, search, and the RPC wire
//!   types.
//! - [`server`]: the TCP RPC server that dispatches wire requests to the
//!   subsystems in [`core`].

pub mod core;
pub mod server;

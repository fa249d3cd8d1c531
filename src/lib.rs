//! Purpose: Library crate that bootstraps the bundled RLCSA native library.
//! Exports: `api` (public surface), `core` (bootstrap internals).
//! Role: Backs the `rlcsa-loader` diagnostic binary and any host that needs the native index.
//! Invariants: Loading is once-only per process; failures are fatal and never retried.
pub mod api;
pub mod core;

// Core modules: bundled resource, staging, loading, and the once-only bootstrap.
pub mod bootstrap;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod loader;
pub mod resource;
pub mod staging;

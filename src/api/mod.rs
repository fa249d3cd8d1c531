//! Purpose: Define the stable public Rust API boundary for the native loader.
//! Exports: `ensure_loaded`, the loader traits, configuration, and error types.
//! Role: Public, additive-only surface; hosts call `ensure_loaded` during startup.
//! Invariants: The process-wide bootstrapper is reachable only through this module.

pub use crate::core::bootstrap::{Bootstrapper, LoadState, ensure_loaded, load_state};
pub use crate::core::cleanup::{CleanupEntry, CleanupStack, pending_at_exit};
pub use crate::core::config::{CleanupPolicy, LoaderConfig, default_library_file_name};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::loader::{DynamicLoader, NativeLibrary, SystemLoader};
pub use crate::core::resource::{BundledResource, RESOURCE_NAME, ResourceSource, sha256_hex};
pub use crate::core::staging::StagedLibrary;

/// Metadata for the library embedded in this build.
pub fn bundled_resource() -> BundledResource {
    BundledResource::embedded()
}

//! Purpose: Fixed configuration for staging and loading the native library.
//! Exports: `LoaderConfig`, `CleanupPolicy`, `default_library_file_name`.
//! Invariants: `library_file_name` is a bare file name, never a path.
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::PathBuf;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CleanupPolicy {
    /// Remove the staged file and directory as soon as the library is mapped.
    Immediate,
    /// Keep the staged artifact until the process exits.
    AtExit,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        // Windows refuses to delete a DLL that is still loaded.
        if cfg!(unix) {
            CleanupPolicy::Immediate
        } else {
            CleanupPolicy::AtExit
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoaderConfig {
    pub library_file_name: String,
    pub temp_prefix: String,
    pub temp_root: Option<PathBuf>,
    pub cleanup: CleanupPolicy,
    pub verify_digest: bool,
}

pub fn default_library_file_name() -> String {
    format!("{DLL_PREFIX}rlcsa{DLL_SUFFIX}")
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            library_file_name: default_library_file_name(),
            temp_prefix: "rlcsa-".to_string(),
            temp_root: None,
            cleanup: CleanupPolicy::default(),
            verify_digest: true,
        }
    }
}

impl LoaderConfig {
    pub fn with_library_file_name(mut self, name: impl Into<String>) -> Self {
        self.library_file_name = name.into();
        self
    }

    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_verify_digest(mut self, verify: bool) -> Self {
        self.verify_digest = verify;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        let name = self.library_file_name.as_str();
        if name.is_empty() || name == "." || name == ".." {
            return Err(Error::new(ErrorKind::Usage).with_message("library file name is empty"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("library file name {name:?} contains a path separator")));
        }
        if self.temp_prefix.contains('/') || self.temp_prefix.contains('\\') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("temp prefix contains a path separator"));
        }
        Ok(())
    }
}

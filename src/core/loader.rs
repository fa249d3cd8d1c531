//! Purpose: Hand a staged shared object to the platform dynamic loader.
//! Exports: `DynamicLoader`, `SystemLoader`, `NativeLibrary`.
//! Role: The only module that calls into `libloading`.
//! Invariants: Libraries are loaded by absolute path.
//! Invariants: A loaded library is never unloaded; dropping the handle leaks it on purpose.
//! Notes: On unix the library is opened `RTLD_NOW | RTLD_GLOBAL` so unresolved symbols fail
//! the load itself rather than a later call.
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

pub trait DynamicLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<NativeLibrary, Error>;
}

/// Loads through dlopen / LoadLibrary.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLoader;

impl DynamicLoader for SystemLoader {
    fn load(&self, path: &Path) -> Result<NativeLibrary, Error> {
        if !path.is_absolute() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("native library path must be absolute")
                .with_path(path));
        }
        tracing::debug!(path = %path.display(), "loading native library");
        // SAFETY: loading runs the library's initializers; the staged bytes come from
        // this build and are trusted the same way linked code is.
        let library = unsafe { open_library(path) }.map_err(|err| {
            Error::new(ErrorKind::Load)
                .with_message("platform loader rejected the native library")
                .with_hint("Check that the bundled library matches this platform and architecture.")
                .with_path(path)
                .with_source(err)
        })?;
        Ok(NativeLibrary::new(path, library))
    }
}

#[cfg(unix)]
unsafe fn open_library(path: &Path) -> Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
    unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(Into::into)
}

#[cfg(not(unix))]
unsafe fn open_library(path: &Path) -> Result<libloading::Library, libloading::Error> {
    unsafe { libloading::Library::new(path) }
}

pub struct NativeLibrary {
    path: PathBuf,
    library: Option<libloading::Library>,
}

impl NativeLibrary {
    pub fn new(path: impl Into<PathBuf>, library: libloading::Library) -> Self {
        Self {
            path: path.into(),
            library: Some(library),
        }
    }

    /// A handle with no mapped object behind it, for loaders that only record the request.
    #[doc(hidden)]
    pub fn unmapped(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            library: None,
        }
    }

    /// Path the library was loaded from. The file may already be removed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_mapped(&self) -> bool {
        self.library.is_some()
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        let Some(library) = &self.library else {
            return false;
        };
        // SAFETY: the pointer is only checked for presence, never called.
        unsafe { library.get::<*const ()>(name.as_bytes()) }.is_ok()
    }

    /// Resolve an exported symbol as a value of type `T`, typically an
    /// `unsafe extern "C" fn` pointer.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's real type. The result stays valid for the
    /// rest of the process because the library is never unloaded.
    pub unsafe fn symbol<T: Copy>(&self, name: &str) -> Result<T, Error> {
        let library = self.library.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Load)
                .with_message(format!("symbol {name} requested from an unmapped library"))
                .with_path(&self.path)
        })?;
        let symbol = unsafe { library.get::<T>(name.as_bytes()) }.map_err(|err| {
            Error::new(ErrorKind::Load)
                .with_message(format!("symbol not found: {name}"))
                .with_path(&self.path)
                .with_source(err)
        })?;
        Ok(*symbol)
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            std::mem::forget(library);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DynamicLoader, NativeLibrary, SystemLoader};
    use crate::core::error::ErrorKind;
    use std::fs;
    use std::path::Path;

    #[test]
    fn garbage_bytes_are_a_load_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("librlcsa.so");
        fs::write(&path, b"this is not a shared object").expect("write");

        let err = SystemLoader.load(&path).expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(err.path(), Some(path.as_path()));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = SystemLoader
            .load(Path::new("librlcsa.so"))
            .expect_err("relative");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn unmapped_library_has_no_symbols() {
        let library = NativeLibrary::unmapped("/tmp/librlcsa.so");
        assert!(!library.is_mapped());
        assert!(!library.has_symbol("malloc"));
        let err = unsafe { library.symbol::<unsafe extern "C" fn()>("malloc") }
            .expect_err("unmapped");
        assert_eq!(err.kind(), ErrorKind::Load);
    }
}

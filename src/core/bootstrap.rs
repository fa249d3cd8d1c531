//! Purpose: One-time, idempotent extraction and load of the bundled native library.
//! Exports: `Bootstrapper`, `LoadState`, `ensure_loaded`, `load_state`.
//! Role: Drives resource -> staging -> loader -> cleanup, and guards it with a once-only latch.
//! Invariants: At most one staging and one load per bootstrapper, however many callers race.
//! Invariants: Callers only ever observe a fully loaded library (`OnceLock` publication).
//! Invariants: A failed attempt is remembered and never retried.
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, OnceLock, TryLockError};

use crate::core::cleanup;
use crate::core::config::{CleanupPolicy, LoaderConfig};
use crate::core::error::{Error, ErrorKind};
use crate::core::loader::{DynamicLoader, NativeLibrary, SystemLoader};
use crate::core::resource::{BundledResource, ResourceSource};
use crate::core::staging::StagedLibrary;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadState {
    NotLoaded,
    Loaded,
    Failed,
}

/// What a failed attempt reported, replayed to every later caller.
#[derive(Clone, Debug)]
struct Failure {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
}

impl Failure {
    fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().map(str::to_string),
            hint: err.hint().map(str::to_string),
            path: err.path().map(Path::to_path_buf),
        }
    }

    fn to_error(&self) -> Error {
        let message = match &self.message {
            Some(message) => format!("native library initialization already failed: {message}"),
            None => "native library initialization already failed".to_string(),
        };
        let mut err = Error::new(self.kind).with_message(message);
        if let Some(hint) = &self.hint {
            err = err.with_hint(hint.clone());
        }
        if let Some(path) = &self.path {
            err = err.with_path(path);
        }
        err
    }
}

pub struct Bootstrapper<R, L> {
    resource: R,
    loader: L,
    config: LoaderConfig,
    loaded: OnceLock<NativeLibrary>,
    attempt: Mutex<Option<Failure>>,
}

impl<R: ResourceSource, L: DynamicLoader> Bootstrapper<R, L> {
    pub fn new(resource: R, loader: L, config: LoaderConfig) -> Self {
        Self {
            resource,
            loader,
            config,
            loaded: OnceLock::new(),
            attempt: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Extract and load the library unless that already happened.
    pub fn ensure_loaded(&self) -> Result<&NativeLibrary, Error> {
        if let Some(library) = self.loaded.get() {
            return Ok(library);
        }

        let mut attempt = self.attempt.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("native library load guard poisoned")
        })?;
        if let Some(library) = self.loaded.get() {
            return Ok(library);
        }
        if let Some(failure) = attempt.as_ref() {
            return Err(failure.to_error());
        }

        match self.load_once() {
            Ok(library) => Ok(self.loaded.get_or_init(|| library)),
            Err(err) => {
                tracing::error!(error = %err, "native library initialization failed");
                *attempt = Some(Failure::from_error(&err));
                Err(err)
            }
        }
    }

    pub fn state(&self) -> LoadState {
        if self.loaded.get().is_some() {
            return LoadState::Loaded;
        }
        let failed = match self.attempt.try_lock() {
            Ok(attempt) => attempt.is_some(),
            Err(TryLockError::Poisoned(_)) => true,
            // Another caller is mid-load.
            Err(TryLockError::WouldBlock) => false,
        };
        if failed {
            LoadState::Failed
        } else {
            LoadState::NotLoaded
        }
    }

    fn load_once(&self) -> Result<NativeLibrary, Error> {
        let staged = StagedLibrary::stage(&self.resource, &self.config)?;
        let bytes = staged.len();
        let sha256 = staged.sha256().to_string();

        // On failure `staged` is dropped here, removing the file and then its directory.
        let library = self.loader.load(staged.path())?;

        match self.config.cleanup {
            CleanupPolicy::Immediate => {
                if let Err(err) = staged.release() {
                    tracing::warn!(error = %err, "failed to remove staged native library");
                }
            }
            CleanupPolicy::AtExit => {
                if let Err(err) = staged.keep_until_exit() {
                    tracing::warn!(error = %err, "failed to schedule staged native library removal");
                }
            }
        }

        tracing::info!(
            resource = self.resource.name(),
            path = %library.path().display(),
            bytes,
            sha256 = %sha256,
            pending_cleanup = cleanup::pending_at_exit(),
            "native library loaded"
        );
        Ok(library)
    }
}

static PROCESS: LazyLock<Bootstrapper<BundledResource, SystemLoader>> = LazyLock::new(|| {
    Bootstrapper::new(
        BundledResource::embedded(),
        SystemLoader,
        LoaderConfig::default(),
    )
});

/// Load the bundled RLCSA library into this process, once.
///
/// Every failure is fatal for native initialization; callers should stop
/// rather than continue without the library.
pub fn ensure_loaded() -> Result<&'static NativeLibrary, Error> {
    PROCESS.ensure_loaded()
}

pub fn load_state() -> LoadState {
    PROCESS.state()
}

//! Purpose: Ordered removal of staged artifacts, immediately or at process exit.
//! Exports: `CleanupStack`, `CleanupEntry`, `register_at_exit`, `pending_at_exit`.
//! Invariants: Entries run last-in first-out; callers push a directory before its contents.
//! Invariants: Directories are removed with `remove_dir`, never recursively.
//! Invariants: Entries that are already gone count as removed.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, Once};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CleanupEntry {
    File(PathBuf),
    Dir(PathBuf),
}

impl CleanupEntry {
    pub fn path(&self) -> &Path {
        match self {
            CleanupEntry::File(path) | CleanupEntry::Dir(path) => path,
        }
    }

    fn remove(&self) -> Result<(), Error> {
        let result = match self {
            CleanupEntry::File(path) => fs::remove_file(path),
            CleanupEntry::Dir(path) => fs::remove_dir(path),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::new(ErrorKind::Storage)
                .with_message("failed to remove staged artifact")
                .with_path(self.path())
                .with_source(err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct CleanupStack {
    entries: Vec<CleanupEntry>,
}

impl CleanupStack {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push_dir(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(CleanupEntry::Dir(path.into()));
    }

    pub fn push_file(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(CleanupEntry::File(path.into()));
    }

    pub fn entries(&self) -> &[CleanupEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every entry newest-first, continuing past failures.
    pub fn run(&mut self) -> Vec<Error> {
        let mut failures = Vec::new();
        while let Some(entry) = self.entries.pop() {
            if let Err(err) = entry.remove() {
                failures.push(err);
            }
        }
        failures
    }
}

static EXIT_CLEANUP: Mutex<CleanupStack> = Mutex::new(CleanupStack::new());
static EXIT_HOOK: Once = Once::new();
static EXIT_HOOK_STATUS: AtomicI32 = AtomicI32::new(0);

extern "C" fn run_exit_cleanup() {
    // Best effort: nothing useful can be reported this late.
    if let Ok(mut stack) = EXIT_CLEANUP.lock() {
        let _ = stack.run();
    }
}

/// Schedule `dir` and then `file` (inside it) for removal when the process exits.
pub fn register_at_exit(dir: &Path, file: &Path) -> Result<(), Error> {
    EXIT_HOOK.call_once(|| {
        let status = unsafe { libc::atexit(run_exit_cleanup) };
        EXIT_HOOK_STATUS.store(status, Ordering::Relaxed);
    });
    // `call_once` orders the store before every later load.
    let status = EXIT_HOOK_STATUS.load(Ordering::Relaxed);
    if status != 0 {
        return Err(Error::new(ErrorKind::Storage)
            .with_message("failed to register exit cleanup hook")
            .with_path(dir));
    }

    let mut stack = EXIT_CLEANUP
        .lock()
        .map_err(|_| Error::new(ErrorKind::Internal).with_message("exit cleanup lock poisoned"))?;
    stack.push_dir(dir);
    stack.push_file(file);
    tracing::debug!(dir = %dir.display(), file = %file.display(), "registered exit cleanup");
    Ok(())
}

/// Number of artifacts waiting for process exit.
pub fn pending_at_exit() -> usize {
    EXIT_CLEANUP.lock().map(|stack| stack.len()).unwrap_or(0)
}

//! Purpose: Materialize the bundled library as a file inside a private temp directory.
//! Exports: `StagedLibrary`.
//! Role: Owns the on-disk copy between staging and cleanup.
//! Invariants: The resource is opened before anything is created on disk.
//! Invariants: Staged bytes equal the resource bytes (length and SHA-256 are checked).
//! Invariants: Every release path removes the file before its directory.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::core::cleanup;
use crate::core::config::LoaderConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::resource::{ResourceSource, hex, sha256_hex};

const COPY_BUF: usize = 64 * 1024;

#[derive(Debug)]
pub struct StagedLibrary {
    dir: Option<TempDir>,
    dir_path: PathBuf,
    path: PathBuf,
    len: u64,
    sha256: String,
}

impl StagedLibrary {
    /// Copy `resource` into a fresh private directory.
    ///
    /// On error everything created so far is removed before returning.
    pub fn stage(resource: &dyn ResourceSource, config: &LoaderConfig) -> Result<Self, Error> {
        config.validate()?;
        let mut reader = resource.open()?;

        let dir = create_private_dir(config)?;
        let dir_path = dir.path().to_path_buf();
        let path = dir_path.join(&config.library_file_name);
        tracing::debug!(dir = %dir_path.display(), resource = resource.name(), "created staging directory");

        let mut staged = Self {
            dir: Some(dir),
            dir_path,
            path,
            len: 0,
            sha256: String::new(),
        };
        staged.copy_from(&mut reader)?;
        if config.verify_digest {
            staged.verify()?;
        }
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir_path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Remove the staged file, then its directory.
    pub fn release(mut self) -> Result<(), Error> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        fs::remove_file(&self.path).or_else(ignore_not_found).map_err(|err| {
            Error::new(ErrorKind::Storage)
                .with_message("failed to remove staged library")
                .with_path(&self.path)
                .with_source(err)
        })?;
        dir.close().map_err(|err| {
            Error::new(ErrorKind::Storage)
                .with_message("failed to remove staging directory")
                .with_path(&self.dir_path)
                .with_source(err)
        })?;
        tracing::debug!(dir = %self.dir_path.display(), "removed staged library");
        Ok(())
    }

    /// Hand the artifact to the exit-cleanup registry instead of removing it now.
    pub fn keep_until_exit(self) -> Result<PathBuf, Error> {
        self.keep_with(cleanup::register_at_exit)
    }

    /// Register first; the temp-dir guard is only given up once removal is scheduled.
    /// On a registration error `self` drops and removes the artifact.
    fn keep_with(
        mut self,
        register: impl FnOnce(&Path, &Path) -> Result<(), Error>,
    ) -> Result<PathBuf, Error> {
        if self.dir.is_none() {
            return Ok(self.path.clone());
        }
        register(&self.dir_path, &self.path)?;
        if let Some(dir) = self.dir.take() {
            let _ = dir.keep();
        }
        Ok(self.path.clone())
    }

    fn copy_from(&mut self, reader: &mut dyn Read) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|err| self.storage("failed to create staged library", err))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUF];
        let mut len = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.storage("failed to read bundled library", err)),
            };
            file.write_all(&buf[..n])
                .map_err(|err| self.storage("failed to write staged library", err))?;
            hasher.update(&buf[..n]);
            len += n as u64;
        }
        file.sync_all()
            .map_err(|err| self.storage("failed to sync staged library", err))?;
        drop(file);
        make_loadable(&self.path).map_err(|err| self.storage("failed to set library permissions", err))?;

        self.len = len;
        self.sha256 = hex(&hasher.finalize());
        tracing::debug!(path = %self.path.display(), bytes = len, "copied bundled library");
        Ok(())
    }

    fn verify(&self) -> Result<(), Error> {
        let mut bytes = Vec::with_capacity(self.len as usize);
        File::open(&self.path)
            .and_then(|mut file| file.read_to_end(&mut bytes))
            .map_err(|err| self.storage("failed to re-read staged library", err))?;
        if bytes.len() as u64 != self.len || sha256_hex(&bytes) != self.sha256 {
            return Err(Error::new(ErrorKind::Storage)
                .with_message("staged library does not match the bundled bytes")
                .with_path(&self.path));
        }
        Ok(())
    }

    fn storage(&self, message: &str, err: io::Error) -> Error {
        Error::new(ErrorKind::Storage)
            .with_message(message)
            .with_path(&self.path)
            .with_source(err)
    }
}

impl Drop for StagedLibrary {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(err) = fs::remove_file(&self.path).or_else(ignore_not_found) {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove staged library");
            }
            if let Err(err) = dir.close() {
                tracing::warn!(dir = %self.dir_path.display(), error = %err, "failed to remove staging directory");
            }
        }
    }
}

fn create_private_dir(config: &LoaderConfig) -> Result<TempDir, Error> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(&config.temp_prefix);
    let result = match &config.temp_root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    };
    result.map_err(|err| {
        let root = config.temp_root.clone().unwrap_or_else(std::env::temp_dir);
        Error::new(ErrorKind::Storage)
            .with_message("failed to create private temp directory")
            .with_path(root)
            .with_source(err)
    })
}

#[cfg(unix)]
fn make_loadable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn make_loadable(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn ignore_not_found(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::StagedLibrary;
    use crate::core::config::LoaderConfig;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::resource::{BundledResource, ResourceSource, sha256_hex};
    use std::fs;
    use std::io::{self, Read};

    static BYTES: &[u8] = b"\x7fELF\x02\x01\x01 staged library fixture";

    struct FailingResource;

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("truncated archive"));
            }
            self.served = true;
            buf[..4].copy_from_slice(b"\x7fELF");
            Ok(4)
        }
    }

    impl ResourceSource for FailingResource {
        fn name(&self) -> &str {
            "rlcsa.so"
        }

        fn open(&self) -> Result<Box<dyn Read + '_>, Error> {
            Ok(Box::new(FailingReader { served: false }))
        }
    }

    fn config_in(root: &std::path::Path) -> LoaderConfig {
        LoaderConfig::default().with_temp_root(root)
    }

    fn entries(root: &std::path::Path) -> usize {
        fs::read_dir(root).expect("read_dir").count()
    }

    #[test]
    fn staged_file_matches_resource_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let staged = StagedLibrary::stage(&resource, &config_in(temp.path())).expect("stage");

        assert_eq!(fs::read(staged.path()).expect("read"), BYTES);
        assert_eq!(staged.len(), BYTES.len() as u64);
        assert_eq!(staged.sha256(), sha256_hex(BYTES));
        assert_eq!(staged.path().parent(), Some(staged.dir()));
        assert!(staged.dir().starts_with(temp.path()));
        let dir_name = staged.dir().file_name().unwrap().to_string_lossy().into_owned();
        assert!(dir_name.starts_with("rlcsa-"), "{dir_name}");
    }

    #[test]
    fn each_stage_gets_its_own_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let config = config_in(temp.path());
        let first = StagedLibrary::stage(&resource, &config).expect("first");
        let second = StagedLibrary::stage(&resource, &config).expect("second");
        assert_ne!(first.dir(), second.dir());
        assert_eq!(entries(temp.path()), 2);
    }

    #[test]
    fn release_removes_file_and_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let staged = StagedLibrary::stage(&resource, &config_in(temp.path())).expect("stage");
        let file = staged.path().to_path_buf();
        let dir = staged.dir().to_path_buf();

        staged.release().expect("release");
        assert!(!file.exists());
        assert!(!dir.exists());
        assert_eq!(entries(temp.path()), 0);
    }

    #[test]
    fn drop_cleans_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let staged = StagedLibrary::stage(&resource, &config_in(temp.path())).expect("stage");
        drop(staged);
        assert_eq!(entries(temp.path()), 0);
    }

    #[test]
    fn missing_resource_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", None);
        let err = StagedLibrary::stage(&resource, &config_in(temp.path())).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
        assert_eq!(entries(temp.path()), 0);
    }

    #[test]
    fn read_fault_is_storage_error_and_leaves_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = StagedLibrary::stage(&FailingResource, &config_in(temp.path()))
            .expect_err("read fault");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.message(), Some("failed to read bundled library"));
        assert_eq!(entries(temp.path()), 0);
    }

    #[test]
    fn unusable_temp_root_is_storage_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let not_a_dir = temp.path().join("file");
        fs::write(&not_a_dir, b"x").expect("write");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let err = StagedLibrary::stage(&resource, &config_in(&not_a_dir)).expect_err("root");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.path(), Some(not_a_dir.as_path()));
    }

    #[test]
    fn empty_resource_stages_empty_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(b"".as_slice()));
        let staged = StagedLibrary::stage(&resource, &config_in(temp.path())).expect("stage");
        assert!(staged.is_empty());
        assert_eq!(fs::read(staged.path()).expect("read"), b"");
    }

    #[test]
    fn large_resource_spans_multiple_copy_buffers() {
        let bytes: &'static [u8] = Box::leak(
            (0..200_000u32)
                .map(|i| (i % 251) as u8)
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );
        assert!(bytes.len() > 3 * super::COPY_BUF);
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(bytes));
        let config = config_in(temp.path()).with_verify_digest(true);
        let staged = StagedLibrary::stage(&resource, &config).expect("stage");

        assert_eq!(staged.len(), 200_000);
        assert_eq!(staged.sha256(), sha256_hex(bytes));
        assert_eq!(fs::read(staged.path()).expect("read"), bytes);
    }

    #[test]
    fn keep_registers_directory_then_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let staged = StagedLibrary::stage(&resource, &config_in(temp.path())).expect("stage");
        let expected = (staged.dir().to_path_buf(), staged.path().to_path_buf());

        let mut registered = None;
        let kept = staged
            .keep_with(|dir, file| {
                registered = Some((dir.to_path_buf(), file.to_path_buf()));
                Ok(())
            })
            .expect("keep");

        assert_eq!(registered, Some(expected));
        assert_eq!(fs::read(&kept).expect("artifact survives"), BYTES);
        fs::remove_file(&kept).expect("remove file");
        fs::remove_dir(kept.parent().expect("parent")).expect("remove dir");
    }

    #[test]
    fn failed_exit_registration_removes_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let staged = StagedLibrary::stage(&resource, &config_in(temp.path())).expect("stage");

        let err = staged
            .keep_with(|_, _| {
                Err(Error::new(ErrorKind::Storage).with_message("exit hook unavailable"))
            })
            .expect_err("registration fails");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(entries(temp.path()), 0);
    }
}

//! Purpose: Hold top-level CLI command dispatch for `rlcsa-loader`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `info` and `extract` never load the library; only `check` does.
//! Invariants: `completion` is the only command whose stdout is not JSON.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::*;
use rlcsa_loader::api::{
    BundledResource, LoadState, LoaderConfig, NativeLibrary, ResourceSource, bundled_resource,
    ensure_loaded, load_state, sha256_hex,
};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Info => {
            emit_json(info_json(&bundled_resource(), &LoaderConfig::default()));
            Ok(RunOutcome::ok())
        }
        Command::Extract { out, force } => {
            let value = extract(&bundled_resource(), &LoaderConfig::default(), &out, force)?;
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Check => {
            let library = ensure_loaded()?;
            emit_json(check_json(library, load_state()));
            Ok(RunOutcome::ok())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "rlcsa-loader", &mut std::io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }));
            Ok(RunOutcome::ok())
        }
    }
}

fn info_json(resource: &BundledResource, config: &LoaderConfig) -> Value {
    json!({
        "resource": resource.name(),
        "bundled": resource.is_present(),
        "size": resource.len(),
        "sha256": resource.sha256(),
        "library_file_name": config.library_file_name,
        "temp_prefix": config.temp_prefix,
        "cleanup": format!("{:?}", config.cleanup),
    })
}

fn check_json(library: &NativeLibrary, state: LoadState) -> Value {
    json!({
        "state": format!("{state:?}"),
        "loaded_from": library.path().display().to_string(),
        "mapped": library.is_mapped(),
        "staged_file_present": library.path().exists(),
    })
}

fn extract(
    resource: &BundledResource,
    config: &LoaderConfig,
    out: &Path,
    force: bool,
) -> Result<Value, Error> {
    config.validate()?;
    let bytes = resource.require()?;

    fs::create_dir_all(out).map_err(|err| {
        Error::new(ErrorKind::Storage)
            .with_message("failed to create output directory")
            .with_path(out)
            .with_source(err)
    })?;

    let path = out.join(&config.library_file_name);
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = options.open(&path).map_err(|err| {
        let already_exists = err.kind() == std::io::ErrorKind::AlreadyExists;
        let err = Error::new(ErrorKind::Storage)
            .with_message("failed to create extracted library")
            .with_path(&path)
            .with_source(err);
        if already_exists {
            err.with_hint("Pass --force to overwrite it.")
        } else {
            err
        }
    })?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| {
            Error::new(ErrorKind::Storage)
                .with_message("failed to write extracted library")
                .with_path(&path)
                .with_source(err)
        })?;

    Ok(json!({
        "path": path.display().to_string(),
        "size": bytes.len(),
        "sha256": sha256_hex(bytes),
    }))
}

#[cfg(test)]
mod tests {
    use super::{check_json, extract, info_json};
    use rlcsa_loader::api::{
        Bootstrapper, BundledResource, CleanupPolicy, ErrorKind, LoaderConfig, SystemLoader,
        sha256_hex,
    };
    use std::fs;

    static BYTES: &[u8] = b"\x7fELF extract fixture";

    #[test]
    fn info_reports_absent_resource() {
        let resource = BundledResource::from_static("rlcsa.so", None);
        let value = info_json(&resource, &LoaderConfig::default());
        assert_eq!(value["resource"], "rlcsa.so");
        assert_eq!(value["bundled"], false);
        assert!(value["size"].is_null());
        assert!(value["sha256"].is_null());
    }

    #[test]
    fn extract_writes_bytes_and_refuses_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("out");
        let resource = BundledResource::from_static("rlcsa.so", Some(BYTES));
        let config = LoaderConfig::default().with_library_file_name("librlcsa.so");

        let value = extract(&resource, &config, &out, false).expect("extract");
        assert_eq!(value["size"], BYTES.len());
        assert_eq!(value["sha256"], sha256_hex(BYTES));
        assert_eq!(fs::read(out.join("librlcsa.so")).expect("read"), BYTES);

        let err = extract(&resource, &config, &out, false).expect_err("exists");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.hint().is_some());

        extract(&resource, &config, &out, true).expect("force");
    }

    #[test]
    fn extract_without_resource_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resource = BundledResource::from_static("rlcsa.so", None);
        let err = extract(&resource, &LoaderConfig::default(), temp.path(), false)
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn check_reports_loaded_library_after_cleanup() {
        let Some(bytes) = [
            "/lib/x86_64-linux-gnu/libz.so.1",
            "/usr/lib/x86_64-linux-gnu/libz.so.1",
            "/lib64/libz.so.1",
            "/usr/lib64/libz.so.1",
            "/usr/lib/libz.so.1",
        ]
        .iter()
            .find_map(|path| fs::read(path).ok())
        else {
            return;
        };
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        let temp = tempfile::tempdir().expect("tempdir");
        let boot = Bootstrapper::new(
            BundledResource::from_static("rlcsa.so", Some(bytes)),
            SystemLoader,
            LoaderConfig::default()
                .with_temp_root(temp.path())
                .with_cleanup(CleanupPolicy::Immediate),
        );

        let library = boot.ensure_loaded().expect("load");
        let value = check_json(library, boot.state());
        assert_eq!(value["state"], "Loaded");
        assert_eq!(value["mapped"], true);
        assert_eq!(value["staged_file_present"], false);
        assert!(
            value["loaded_from"]
                .as_str()
                .unwrap()
                .starts_with(temp.path().to_str().unwrap())
        );
    }
}

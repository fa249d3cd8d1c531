//! Purpose: Embed the prebuilt RLCSA shared object into the crate at compile time.
//! Role: Cargo build-script; resolves the library path and generates `bundled_library.rs`.
//! Invariants: `RLCSA_NATIVE_LIB` wins over the repo-local `native/rlcsa.so` candidate.
//! Invariants: A missing library is not a build error; the resource is reported absent at runtime.
//! Invariants: A path named by `RLCSA_NATIVE_LIB` that does not exist fails the build.
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_LIB: &str = "RLCSA_NATIVE_LIB";
const GENERATED: &str = "bundled_library.rs";

fn main() {
    println!("cargo:rerun-if-env-changed={ENV_LIB}");
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let library = resolve_library(&manifest_dir);
    if let Some(path) = &library {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    let source = generated_source(library.as_deref());
    fs::write(out_dir.join(GENERATED), source)
        .unwrap_or_else(|err| panic!("failed to write {GENERATED}: {err}"));
}

fn resolve_library(manifest_dir: &Path) -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(ENV_LIB).filter(|value| !value.is_empty()) {
        let path = PathBuf::from(explicit);
        if !path.is_file() {
            panic!(
                "{ENV_LIB} points at {}, which is not a file; unset it or build the RLCSA \
                 shared object first",
                path.display()
            );
        }
        return Some(canonical(path));
    }

    let candidate = manifest_dir.join("native").join("rlcsa.so");
    candidate.is_file().then(|| canonical(candidate))
}

fn canonical(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

fn generated_source(library: Option<&Path>) -> String {
    match library {
        Some(path) => {
            let literal = format!("{:?}", path.to_string_lossy());
            format!("pub(crate) const BUNDLED_LIBRARY: Option<&[u8]> = Some(include_bytes!({literal}) as &[u8]);\n")
        }
        None => "pub(crate) const BUNDLED_LIBRARY: Option<&[u8]> = None;\n".to_string(),
    }
}

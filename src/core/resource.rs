//! Purpose: Access to the native library bytes embedded by the build script.
//! Exports: `ResourceSource`, `BundledResource`, `RESOURCE_NAME`, `sha256_hex`.
//! Role: The only place that knows where the shared object comes from.
//! Invariants: Opening a missing resource fails with `ResourceNotFound` and touches no files.
use std::io::{self, Read};

use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};

include!(concat!(env!("OUT_DIR"), "/bundled_library.rs"));

/// Logical name the library is packaged under.
pub const RESOURCE_NAME: &str = "rlcsa.so";

/// A readable source of native library bytes.
pub trait ResourceSource: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<Box<dyn Read + '_>, Error>;
}

#[derive(Clone, Copy, Debug)]
pub struct BundledResource {
    name: &'static str,
    bytes: Option<&'static [u8]>,
}

impl BundledResource {
    /// The library embedded into this build, if any.
    pub fn embedded() -> Self {
        Self {
            name: RESOURCE_NAME,
            bytes: BUNDLED_LIBRARY,
        }
    }

    pub fn from_static(name: &'static str, bytes: Option<&'static [u8]>) -> Self {
        Self { name, bytes }
    }

    pub fn is_present(&self) -> bool {
        self.bytes.is_some()
    }

    pub fn bytes(&self) -> Option<&'static [u8]> {
        self.bytes
    }

    pub fn len(&self) -> Option<usize> {
        self.bytes.map(<[u8]>::len)
    }

    pub fn sha256(&self) -> Option<String> {
        self.bytes.map(sha256_hex)
    }

    /// The bundled bytes, or `ResourceNotFound` when this build carries none.
    pub fn require(&self) -> Result<&'static [u8], Error> {
        self.bytes.ok_or_else(|| not_found(self.name))
    }
}

impl ResourceSource for BundledResource {
    fn name(&self) -> &str {
        self.name
    }

    fn open(&self) -> Result<Box<dyn Read + '_>, Error> {
        let bytes = self.require()?;
        Ok(Box::new(io::Cursor::new(bytes)))
    }
}

fn not_found(name: &str) -> Error {
    Error::new(ErrorKind::ResourceNotFound)
        .with_message(format!("native library {name} is not bundled in this build"))
        .with_hint("Rebuild with RLCSA_NATIVE_LIB pointing at the RLCSA shared object.")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

//! Loader manifest for the keystream bytecode module.
//!
//! The manifest names the module's imports and exports so the host can
//! wire its primitives without knowing the toolchain that produced the
//! module. Every field has a default; an absent manifest file means the
//! defaults are used.
//!
//! Example `keystream.loader.json`:
//! ```json
//! {
//!   "import_module": "env",
//!   "output_hook": "wasm_isaac_generate",
//!   "cipher_new": "isaac_new",
//!   "cipher_generate": "isaac_generate",
//!   "cipher_release": "isaac_delete"
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Import and export names of a keystream module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderManifest {
    /// Module namespace the host primitives are provided under.
    pub import_module: String,
    /// Import the module calls with `(ptr, len)` of generated output.
    pub output_hook: String,
    /// Print sink import `(ptr, len)`.
    pub print: String,
    /// Error sink import `(ptr, len)`.
    pub print_err: String,
    /// Millisecond clock import `() -> i64`.
    pub now: String,
    /// Exported linear memory.
    pub memory: String,
    /// Allocator export `(size) -> ptr`.
    pub alloc: String,
    /// Deallocator export `(ptr)`.
    pub dealloc: String,
    /// Cipher constructor export `(key_ptr, key_len) -> handle`.
    pub cipher_new: String,
    /// Output generation export `(handle, len)`.
    pub cipher_generate: String,
    /// Cipher release export `(handle)`, used when present.
    pub cipher_release: Option<String>,
    /// Initializer export called once after instantiation, when present.
    pub start: Option<String>,
}

impl Default for LoaderManifest {
    fn default() -> Self {
        Self {
            import_module: "env".to_string(),
            output_hook: "keystream_output".to_string(),
            print: "print".to_string(),
            print_err: "print_err".to_string(),
            now: "now_ms".to_string(),
            memory: "memory".to_string(),
            alloc: "malloc".to_string(),
            dealloc: "free".to_string(),
            cipher_new: "keystream_new".to_string(),
            cipher_generate: "keystream_generate".to_string(),
            cipher_release: Some("keystream_delete".to_string()),
            start: Some("_initialize".to_string()),
        }
    }
}

impl LoaderManifest {
    /// Parse a manifest from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::EngineInit(format!("invalid loader manifest: {}", e)))
    }

    /// Read the manifest at `path`, falling back to defaults when the file
    /// does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::from_json(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no loader manifest, using default ABI");
                Ok(Self::default())
            }
            Err(e) => Err(Error::EngineInit(format!(
                "cannot read loader manifest {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

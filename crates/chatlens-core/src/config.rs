//! Engine configuration.
//!
//! Configuration is a JSON file in which every field is optional.
//!
//! Example `chatlens.json`:
//! ```json
//! {
//!   "resource_root": "/opt/chatlens/resources",
//!   "keystream_module": "keystream.wasm",
//!   "keystream_loader": "keystream.loader.json",
//!   "default_keystream_len": 131072,
//!   "max_batch_size": 500,
//!   "keyword_scan_ceiling": 10000,
//!   "cache_dir": "/var/cache/chatlens"
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default keystream length in bytes.
pub const DEFAULT_KEYSTREAM_LEN: usize = 131_072;

/// Upper bound on the native cursor batch size.
pub const MAX_BATCH_SIZE: usize = 500;

/// Row ceiling for keyword scans.
pub const KEYWORD_SCAN_CEILING: usize = 10_000;

/// Default bytecode module file name.
pub const DEFAULT_MODULE_FILE: &str = "keystream.wasm";

/// Default loader manifest file name.
pub const DEFAULT_LOADER_FILE: &str = "keystream.loader.json";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the bytecode assets.
    pub resource_root: PathBuf,
    /// Bytecode module file name, relative to `resource_root`.
    pub keystream_module: String,
    /// Loader manifest file name, relative to `resource_root`.
    pub keystream_loader: String,
    /// Keystream length requested when the blob is not longer.
    pub default_keystream_len: usize,
    /// Upper bound on the native cursor batch size.
    pub max_batch_size: usize,
    /// Row ceiling for keyword scans.
    pub keyword_scan_ceiling: usize,
    /// Where decrypted video is written.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resource_root: PathBuf::from("resources"),
            keystream_module: DEFAULT_MODULE_FILE.to_string(),
            keystream_loader: DEFAULT_LOADER_FILE.to_string(),
            default_keystream_len: DEFAULT_KEYSTREAM_LEN,
            max_batch_size: MAX_BATCH_SIZE,
            keyword_scan_ceiling: KEYWORD_SCAN_CEILING,
            cache_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_keystream_len == 0 {
            return Err(Error::Config("default_keystream_len must be positive".into()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be positive".into()));
        }
        if self.keyword_scan_ceiling == 0 {
            return Err(Error::Config("keyword_scan_ceiling must be positive".into()));
        }
        Ok(())
    }

    /// Absolute path of the bytecode module.
    pub fn module_path(&self) -> PathBuf {
        self.resource_root.join(&self.keystream_module)
    }

    /// Absolute path of the loader manifest.
    pub fn loader_path(&self) -> PathBuf {
        self.resource_root.join(&self.keystream_loader)
    }
}

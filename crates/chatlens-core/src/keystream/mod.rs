//! Keystream generation for media decryption.
//!
//! Media keystreams come from a proprietary stream cipher shipped as a
//! bytecode module. The module is loaded once per generator and reused;
//! keystreams themselves are produced fresh for every request.
//!
//! ## Lifecycle
//!
//! - First `generate` call loads the module and its loader manifest.
//!   Concurrent first callers wait on that one initialization.
//! - A failed initialization is not cached; the next call retries.
//! - Generation calls are serialized: the interpreter is single-threaded
//!   and the output hook writes into shared host state. Each call runs on
//!   the blocking pool so interpretation does not stall async workers.
//!
//! ## Output order
//!
//! The module emits bytes in the reverse of consumption order. The
//! captured buffer is reversed before it is returned, so index 0 of a
//! [`Keystream`] pairs with byte 0 of the ciphertext.

pub mod loader;
mod sandbox;

pub use loader::LoaderManifest;
pub use sandbox::Sandbox;

use crate::config::{EngineConfig, DEFAULT_KEYSTREAM_LEN};
use crate::error::{Error, Result};
use crate::logging::RedactedKey;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Where the bytecode module comes from.
#[derive(Clone)]
pub enum ModuleSource {
    /// Module and loader manifest files on disk.
    Files {
        /// Bytecode module path.
        module: PathBuf,
        /// Loader manifest path.
        loader: PathBuf,
    },
    /// Module bytes already in memory.
    Embedded {
        /// Bytecode module.
        wasm: Arc<[u8]>,
        /// Loader manifest.
        manifest: LoaderManifest,
    },
}

impl fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSource::Files { module, loader } => f
                .debug_struct("Files")
                .field("module", module)
                .field("loader", loader)
                .finish(),
            ModuleSource::Embedded { wasm, .. } => {
                write!(f, "Embedded({} bytes)", wasm.len())
            }
        }
    }
}

impl ModuleSource {
    /// Asset paths resolved from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        ModuleSource::Files {
            module: config.module_path(),
            loader: config.loader_path(),
        }
    }

    async fn load(&self) -> Result<Sandbox> {
        match self {
            ModuleSource::Files { module, loader } => {
                let wasm = tokio::fs::read(module).await.map_err(|e| {
                    Error::EngineInit(format!("cannot read module {}: {}", module.display(), e))
                })?;
                let manifest = LoaderManifest::load(loader).await?;
                Sandbox::load(&wasm, manifest)
            }
            ModuleSource::Embedded { wasm, manifest } => Sandbox::load(wasm, manifest.clone()),
        }
    }
}

/// A generated keystream, in consumption order. Zeroized on drop.
#[derive(Clone)]
pub struct Keystream(Zeroizing<Vec<u8>>);

impl Keystream {
    /// Wrap raw module output, reversing it into consumption order.
    pub fn from_generated(mut raw: Vec<u8>) -> Self {
        raw.reverse();
        Self(Zeroizing::new(raw))
    }

    /// Keystream bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the keystream is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Keystream {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Keystream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keystream([{} bytes])", self.0.len())
    }
}

/// Derives keystreams from media keys using the bytecode module.
pub struct KeystreamGenerator {
    source: ModuleSource,
    default_len: usize,
    sandbox: OnceCell<Arc<Mutex<Sandbox>>>,
    load_attempts: AtomicUsize,
}

static GLOBAL: OnceLock<Arc<KeystreamGenerator>> = OnceLock::new();

impl KeystreamGenerator {
    /// Create a generator; the module is loaded on first use.
    pub fn new(source: ModuleSource) -> Self {
        Self {
            source,
            default_len: DEFAULT_KEYSTREAM_LEN,
            sandbox: OnceCell::new(),
            load_attempts: AtomicUsize::new(0),
        }
    }

    /// Create a generator using the configured assets and default length.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_len: config.default_keystream_len,
            ..Self::new(ModuleSource::from_config(config))
        }
    }

    /// Process-wide generator. The first caller's configuration wins.
    pub fn global(config: &EngineConfig) -> Arc<KeystreamGenerator> {
        GLOBAL
            .get_or_init(|| Arc::new(Self::from_config(config)))
            .clone()
    }

    /// Length used when callers do not ask for one.
    pub fn default_len(&self) -> usize {
        self.default_len
    }

    /// Whether the module has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.sandbox.initialized()
    }

    /// Number of times the module load has been attempted.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    async fn sandbox(&self) -> Result<&Arc<Mutex<Sandbox>>> {
        self.sandbox
            .get_or_try_init(|| async {
                let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                info!(source = ?self.source, attempt, "loading keystream module");
                let sandbox = self.source.load().await?;
                Ok::<_, Error>(Arc::new(Mutex::new(sandbox)))
            })
            .await
    }

    /// Generate `length` keystream bytes for `key`.
    pub async fn generate(&self, key: &str, length: usize) -> Result<Keystream> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::KeyMissing);
        }
        if length == 0 {
            return Err(Error::InvalidInput("keystream length must be positive".into()));
        }

        let mut guard = Arc::clone(self.sandbox().await?).lock_owned().await;
        let key_bytes = Zeroizing::new(key.as_bytes().to_vec());
        let raw = tokio::task::spawn_blocking(move || guard.generate_raw(&key_bytes, length))
            .await
            .map_err(|e| Error::Derivation(format!("generation task failed: {}", e)))??;

        debug!(key = %RedactedKey(key), length, "generated keystream");
        Ok(Keystream::from_generated(raw))
    }

    /// Generate a keystream of the default length.
    pub async fn generate_default(&self, key: &str) -> Result<Keystream> {
        self.generate(key, self.default_len).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystream_reverses_generation_order() {
        let ks = Keystream::from_generated(vec![1, 2, 3, 4]);
        assert_eq!(ks.as_bytes(), &[4, 3, 2, 1]);
        assert_eq!(ks.len(), 4);
        assert!(!ks.is_empty());
    }

    #[test]
    fn test_keystream_debug_hides_bytes() {
        let ks = Keystream::from_generated(vec![0xAB; 8]);
        assert_eq!(format!("{:?}", ks), "Keystream([8 bytes])");
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_loading() {
        let generator = KeystreamGenerator::new(ModuleSource::Files {
            module: PathBuf::from("/nonexistent/keystream.wasm"),
            loader: PathBuf::from("/nonexistent/keystream.loader.json"),
        });
        let err = generator.generate("  ", 16).await.expect_err("empty key");
        assert!(matches!(err, Error::KeyMissing));
        assert!(!generator.is_initialized());
        assert_eq!(generator.load_attempts(), 0);
    }

    #[tokio::test]
    async fn test_missing_module_is_engine_init_error() {
        let generator = KeystreamGenerator::new(ModuleSource::Files {
            module: PathBuf::from("/nonexistent/keystream.wasm"),
            loader: PathBuf::from("/nonexistent/keystream.loader.json"),
        });
        let err = generator.generate("12345", 16).await.expect_err("no module");
        assert!(matches!(err, Error::EngineInit(_)));
        assert!(!generator.is_initialized());

        generator.generate("12345", 16).await.expect_err("still no module");
        assert_eq!(generator.load_attempts(), 2);
    }

    #[tokio::test]
    async fn test_garbage_module_is_engine_init_error() {
        let generator = KeystreamGenerator::new(ModuleSource::Embedded {
            wasm: Arc::from(&b"not a wasm module"[..]),
            manifest: LoaderManifest::default(),
        });
        let err = generator.generate("12345", 16).await.expect_err("bad module");
        assert!(matches!(err, Error::EngineInit(_)));
    }
}

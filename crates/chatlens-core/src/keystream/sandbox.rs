//! Capability-scoped host for the keystream bytecode module.
//!
//! The module is a WebAssembly binary run by the `wasmi` interpreter. It
//! sees exactly four host functions, all under the manifest's import
//! namespace:
//!
//! - the output hook `(ptr, len)`, which hands the host a region of the
//!   module's linear memory holding generated bytes
//! - a print sink and an error sink `(ptr, len)`, forwarded to `tracing`
//! - a millisecond clock `() -> i64`
//!
//! A module importing anything else fails to instantiate. The interpreter
//! is single-threaded, so a `Sandbox` is driven through `&mut self` and
//! the owner serializes calls.

use super::loader::LoaderManifest;
use crate::error::{Error, Result};
use std::time::Instant;
use tracing::{debug, info, warn};
use wasmi::{Caller, Engine, Extern, Instance, Linker, Memory, Module, Store, TypedFunc};

const MODULE_LOG_TARGET: &str = "chatlens::keystream::module";

/// Per-store host state shared with the host functions.
struct HostState {
    memory_export: String,
    captured: Vec<u8>,
    hook_calls: u32,
    fault: Option<String>,
    started: Instant,
}

impl HostState {
    fn new(memory_export: &str) -> Self {
        Self {
            memory_export: memory_export.to_string(),
            captured: Vec::new(),
            hook_calls: 0,
            fault: None,
            started: Instant::now(),
        }
    }

    fn reset_capture(&mut self) {
        self.captured.clear();
        self.hook_calls = 0;
        self.fault = None;
    }
}

/// Copy `[ptr, ptr + len)` out of the caller's exported memory.
fn read_region(caller: &Caller<'_, HostState>, ptr: i32, len: i32) -> std::result::Result<Vec<u8>, String> {
    let memory = caller
        .get_export(&caller.data().memory_export)
        .and_then(Extern::into_memory)
        .ok_or_else(|| "module exports no memory".to_string())?;

    // wasm32 addresses are unsigned
    let start = ptr as u32 as usize;
    let len = len as u32 as usize;
    let end = start
        .checked_add(len)
        .ok_or_else(|| "output region overflows".to_string())?;

    memory
        .data(caller)
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| format!("output region {}..{} out of bounds", start, end))
}

/// A loaded, instantiated keystream module.
pub struct Sandbox {
    store: Store<HostState>,
    instance: Instance,
    manifest: LoaderManifest,
}

impl Sandbox {
    /// Compile and instantiate `wasm`, wiring only the enumerated host
    /// primitives, then run the module's initializer if it exports one.
    pub fn load(wasm: &[u8], manifest: LoaderManifest) -> Result<Self> {
        let engine = Engine::default();
        let module = Module::new(&engine, wasm)
            .map_err(|e| Error::EngineInit(format!("invalid module: {}", e)))?;

        let mut store = Store::new(&engine, HostState::new(&manifest.memory));
        let mut linker = <Linker<HostState>>::new(&engine);
        let ns = manifest.import_module.as_str();

        linker
            .func_wrap(
                ns,
                &manifest.output_hook,
                |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                    match read_region(&caller, ptr, len) {
                        Ok(bytes) => {
                            let state = caller.data_mut();
                            state.captured.extend_from_slice(&bytes);
                            state.hook_calls += 1;
                        }
                        Err(fault) => caller.data_mut().fault = Some(fault),
                    }
                },
            )
            .map_err(|e| Error::EngineInit(e.to_string()))?;

        linker
            .func_wrap(
                ns,
                &manifest.print,
                |caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                    if let Ok(bytes) = read_region(&caller, ptr, len) {
                        info!(target: MODULE_LOG_TARGET, "{}", String::from_utf8_lossy(&bytes));
                    }
                },
            )
            .map_err(|e| Error::EngineInit(e.to_string()))?;

        linker
            .func_wrap(
                ns,
                &manifest.print_err,
                |caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                    if let Ok(bytes) = read_region(&caller, ptr, len) {
                        warn!(target: MODULE_LOG_TARGET, "{}", String::from_utf8_lossy(&bytes));
                    }
                },
            )
            .map_err(|e| Error::EngineInit(e.to_string()))?;

        linker
            .func_wrap(ns, &manifest.now, |caller: Caller<'_, HostState>| -> i64 {
                caller.data().started.elapsed().as_millis() as i64
            })
            .map_err(|e| Error::EngineInit(e.to_string()))?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| Error::EngineInit(format!("instantiation failed: {}", e)))?
            .start(&mut store)
            .map_err(|e| Error::EngineInit(format!("start function failed: {}", e)))?;

        if let Some(start) = manifest.start.as_deref() {
            if let Ok(init) = instance.get_typed_func::<(), ()>(&store, start) {
                init.call(&mut store, ())
                    .map_err(|e| Error::EngineInit(format!("initializer failed: {}", e)))?;
                debug!(export = start, "ran module initializer");
            }
        }

        Ok(Self {
            store,
            instance,
            manifest,
        })
    }

    fn memory(&self) -> Result<Memory> {
        self.instance
            .get_memory(&self.store, &self.manifest.memory)
            .ok_or_else(|| Error::Derivation(format!("missing export `{}`", self.manifest.memory)))
    }

    fn func<P, R>(&self, name: &str) -> Result<TypedFunc<P, R>>
    where
        P: wasmi::WasmParams,
        R: wasmi::WasmResults,
    {
        self.instance
            .get_typed_func::<P, R>(&self.store, name)
            .map_err(|e| Error::Derivation(format!("missing export `{}`: {}", name, e)))
    }

    /// Run the cipher for `key` and return the raw captured output, in the
    /// order the module produced it.
    pub fn generate_raw(&mut self, key: &[u8], length: usize) -> Result<Vec<u8>> {
        let requested = i32::try_from(length)
            .map_err(|_| Error::InvalidInput(format!("keystream length {} too large", length)))?;
        let key_len = i32::try_from(key.len())
            .map_err(|_| Error::InvalidInput("key too long".into()))?;

        let memory = self.memory()?;
        let alloc = self.func::<i32, i32>(&self.manifest.alloc)?;
        let cipher_new = self.func::<(i32, i32), i32>(&self.manifest.cipher_new)?;
        let generate = self.func::<(i32, i32), ()>(&self.manifest.cipher_generate)?;
        let dealloc = self.func::<i32, ()>(&self.manifest.dealloc).ok();
        let release = self
            .manifest
            .cipher_release
            .clone()
            .and_then(|name| self.func::<i32, ()>(&name).ok());

        // Key is passed NUL-terminated for C-string consumers.
        let key_ptr = alloc
            .call(&mut self.store, key_len + 1)
            .map_err(|e| Error::Derivation(format!("allocation trapped: {}", e)))?;
        let mut key_buf = Vec::with_capacity(key.len() + 1);
        key_buf.extend_from_slice(key);
        key_buf.push(0);
        memory
            .write(&mut self.store, key_ptr as u32 as usize, &key_buf)
            .map_err(|e| Error::Derivation(format!("cannot write key: {}", e)))?;

        self.store.data_mut().reset_capture();

        let outcome = cipher_new
            .call(&mut self.store, (key_ptr, key_len))
            .map_err(|e| Error::Derivation(format!("cipher init trapped: {}", e)))
            .and_then(|handle| {
                let generated = generate
                    .call(&mut self.store, (handle, requested))
                    .map_err(|e| Error::Derivation(format!("generation trapped: {}", e)));
                if let Some(release) = &release {
                    if let Err(e) = release.call(&mut self.store, handle) {
                        warn!(error = %e, "cipher release trapped");
                    }
                }
                generated
            });

        if let Some(dealloc) = &dealloc {
            if let Err(e) = dealloc.call(&mut self.store, key_ptr) {
                warn!(error = %e, "key buffer release trapped");
            }
        }
        outcome?;

        let state = self.store.data_mut();
        if let Some(fault) = state.fault.take() {
            return Err(Error::Capture(fault));
        }
        if state.hook_calls == 0 {
            return Err(Error::Capture("module never invoked the output hook".into()));
        }
        let captured = std::mem::take(&mut state.captured);
        if captured.len() != length {
            return Err(Error::Capture(format!(
                "captured {} bytes, expected {}",
                captured.len(),
                length
            )));
        }
        Ok(captured)
    }
}

//! Shared fixtures: small keystream modules written in WAT.
//!
//! The reference module derives a seed from the key
//! (`h = 7; h = h * 31 + byte`) and emits `(h + i) & 0xff` for byte `i`
//! through the output hook.

#![allow(dead_code)]

use chatlens_core::keystream::{KeystreamGenerator, LoaderManifest, ModuleSource};
use std::sync::Arc;

/// Reference keystream module using the default import/export names.
pub const REFERENCE_WAT: &str = r#"
(module
  (import "env" "keystream_output" (func $out (param i32 i32)))
  (import "env" "print" (func $print (param i32 i32)))
  (memory (export "memory") 8)
  (data (i32.const 16) "generating")
  (global $bump (mut i32) (i32.const 1024))

  (func (export "malloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $bump))
    (global.set $bump (i32.add (global.get $bump) (local.get $size)))
    (local.get $ptr))

  (func (export "free") (param i32))

  (func (export "keystream_new") (param $ptr i32) (param $len i32) (result i32)
    (local $h i32)
    (local $i i32)
    (local.set $h (i32.const 7))
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
        (local.set $h
          (i32.add
            (i32.mul (local.get $h) (i32.const 31))
            (i32.load8_u (i32.add (local.get $ptr) (local.get $i)))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (local.get $h))

  (func (export "keystream_generate") (param $h i32) (param $n i32)
    (local $i i32)
    (call $print (i32.const 16) (i32.const 10))
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $n)))
        (i32.store8
          (i32.add (i32.const 65536) (local.get $i))
          (i32.add (local.get $h) (local.get $i)))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (call $out (i32.const 65536) (local.get $n)))

  (func (export "keystream_delete") (param i32))
)
"#;

/// Runs to completion without ever calling the output hook.
pub const SILENT_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "malloc") (param i32) (result i32) (i32.const 1024))
  (func (export "free") (param i32))
  (func (export "keystream_new") (param i32 i32) (result i32) (i32.const 1))
  (func (export "keystream_generate") (param i32 i32))
)
"#;

/// Lacks the generation entry point.
pub const NO_GENERATE_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "malloc") (param i32) (result i32) (i32.const 1024))
  (func (export "free") (param i32))
  (func (export "keystream_new") (param i32 i32) (result i32) (i32.const 1))
)
"#;

/// Asks the host for a primitive outside the sandbox's set.
pub const FORBIDDEN_IMPORT_WAT: &str = r#"
(module
  (import "env" "open_socket" (func (param i32) (result i32)))
  (memory (export "memory") 1)
)
"#;

/// Compile WAT text to a module binary.
pub fn compile(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("valid wat")
}

/// Generator over an in-memory module with default names.
pub fn generator(wat: &str) -> Arc<KeystreamGenerator> {
    generator_with(wat, LoaderManifest::default())
}

/// Generator over an in-memory module with an explicit manifest.
pub fn generator_with(wat: &str, manifest: LoaderManifest) -> Arc<KeystreamGenerator> {
    Arc::new(KeystreamGenerator::new(ModuleSource::Embedded {
        wasm: Arc::from(compile(wat)),
        manifest,
    }))
}

/// Seed the reference module derives from `key`.
pub fn reference_seed(key: &str) -> i32 {
    key.bytes()
        .fold(7i32, |h, b| h.wrapping_mul(31).wrapping_add(i32::from(b)))
}

/// Keystream the reference module yields for `key`, in consumption order.
pub fn reference_keystream(key: &str, length: usize) -> Vec<u8> {
    let h = reference_seed(key);
    let mut raw: Vec<u8> = (0..length)
        .map(|i| (h.wrapping_add(i as i32) & 0xff) as u8)
        .collect();
    raw.reverse();
    raw
}

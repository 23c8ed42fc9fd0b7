//! # ChatLens Core Library
//!
//! Read-side engine for an encrypted chat client's local store: turns
//! encrypted media into displayable files, serves conversation history as
//! offset/limit pages over a native batch cursor, and recovers member
//! nicknames from opaque group-metadata blobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Application                │
//! ├─────────────────────────────────────────┤
//! │    media    │  storage  │    extbuf     │
//! ├─────────────────────────────────────────┤
//! │  keystream (sandboxed bytecode module)  │
//! ├─────────────────────────────────────────┤
//! │   config    │   error   │   logging     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Key handling
//!
//! - Media keys and keystreams never reach logs in full
//! - Keystream buffers are zeroized on drop
//! - The keystream module runs in an interpreter with no host access
//!   beyond its output hook, two log sinks and a clock

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod extbuf;
pub mod keystream;
pub mod logging;
pub mod media;
pub mod storage;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Remote filesystem abstraction for mirrorsync.
//!
//! This module provides the capability set the sync engine consumes
//! (`stat`, `list_dir`, `mkdir`, streamed reads and writes, optional content
//! digests) together with the bundled backends and a registry for resolving
//! them by name.
//!
//! # Design Principles
//! - Protocol isolation: no wire-protocol logic leaks into the sync engine
//! - Async operations: all I/O operations are async
//! - Streaming support: file content moves in caller-sized chunks
//! - Unified error semantics: consistent error types across providers

pub mod digest;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use digest::{ContentHasher, DigestAlgorithm};
pub use local::LocalFs;
pub use memory::{Fault, MemoryFs, OpCounts};
pub use provider::{
    Connect, DigestReply, FileStat, RemoteEntry, RemoteFs, RemoteReader, RemoteWriter,
};
pub use registry::{create_default_registry, ConnectorFactory, ProviderRegistry};

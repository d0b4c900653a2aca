//! Path-oriented VFS layer for a networked POSIX filesystem.
//!
//! This crate sits between filesystem adapters (FUSE, SDKs, gateways) and the
//! two backend services of the filesystem:
//!
//! - a [`MetaService`] that owns the namespace and attributes, addressed by inode
//! - a chunked data engine ([`DataReader`]/[`DataWriter`]) that owns file content
//!
//! # Components
//!
//! - [`FileSystem`] - path-level facade: resolve, check permissions, forward,
//!   invalidate, log
//! - [`File`] - per-open-file handle with a cursor, lazily opened read and
//!   write sessions and a directory snapshot
//! - [`PathResolver`] - fast whole-path resolution with a component walk
//!   fallback that expands symlinks and detects cycles
//! - [`cache`] - TTL caches for names and attributes plus their background
//!   sweeper
//! - [`AccessLogger`] - asynchronous, bounded, rotating access log
//! - [`FsStats`] - counters injected at construction
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tidefs_vfs::testing::MemBackend;
//! use tidefs_vfs::{AccessMask, FileSystem, OpContext, ReadOutcome, VfsConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tidefs_vfs::FsError> {
//! let backend = Arc::new(MemBackend::new());
//! let fs = FileSystem::new(
//!     VfsConfig::default(),
//!     backend.clone(),
//!     backend.clone(),
//!     backend,
//! )
//! .await;
//!
//! let ctx = OpContext::root();
//! fs.mkdir_all(&ctx, "/data/logs", 0o755, 0o022).await?;
//!
//! let file = fs.create(&ctx, "/data/logs/today", 0o644, 0o022).await?;
//! file.write(&ctx, b"hello").await?;
//! file.close(&ctx).await?;
//!
//! let file = fs.open(&ctx, "/data/logs/today", AccessMask::READ).await?;
//! let mut buf = [0u8; 16];
//! assert_eq!(file.pread(&ctx, &mut buf, 0).await?, ReadOutcome::Data(5));
//! assert_eq!(&buf[..5], b"hello");
//! file.close(&ctx).await?;
//! # Ok(())
//! # }
//! ```

pub mod access_log;
pub mod cache;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod file;
pub mod fs;
pub mod internal;
pub mod meta;
pub mod resolver;
pub mod stats;
pub mod testing;
pub mod types;

pub use access_log::AccessLogger;
pub use cache::{AttrCache, CacheSweeper, EntryCache, MetaCaches};
pub use config::{AccessLogConfig, VfsConfig};
pub use context::OpContext;
pub use data::{CHUNK_SIZE, DataReader, DataWriter, ReadSession, WriteSession};
pub use error::{FsError, FsResult};
pub use file::{File, ReadOutcome};
pub use fs::FileSystem;
pub use internal::InternalNode;
pub use meta::MetaService;
pub use resolver::{FileStat, PathResolver, ResolvedPath};
pub use stats::{FsStats, FsStatsSnapshot};
pub use types::{
    AccessMask, AclEntry, AclRule, AclType, Attr, DirEntry, FileKind, InodeId, RenameFlags,
    SetAttrMask, StatFs, Summary, XattrFlags,
};

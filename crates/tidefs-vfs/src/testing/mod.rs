//! Testing utilities for code built on the VFS layer.
//!
//! [`MemBackend`] is an in-memory metadata service and data engine in one
//! value. It keeps per-operation call counters and lets a test queue faults
//! for specific operations, which is what cache, retry and adapter tests need
//! to observe.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidefs_vfs::testing::MemBackend;
//!
//! let backend = Arc::new(MemBackend::new());
//! let fs = FileSystem::new(config, backend.clone(), backend.clone(), backend.clone()).await;
//! fs.stat(&ctx, "/").await?;
//! assert_eq!(backend.calls("lookup"), 0);
//! ```

mod mem;

pub use mem::MemBackend;

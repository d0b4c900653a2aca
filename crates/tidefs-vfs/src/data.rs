//! Chunked data engine contract.
//!
//! The data engine owns file content. A [`File`](crate::File) obtains at most
//! one read session and one write session from it, lazily, and owns them
//! exclusively until close.

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::FsResult;
use crate::types::InodeId;

/// Size of a data chunk. Chunk indices in the metadata contract count these.
pub const CHUNK_SIZE: u64 = 64 << 20;

/// Opens read sessions.
#[async_trait]
pub trait DataReader: Send + Sync {
    /// Opens a read session for `inode`, which is `length` bytes long.
    async fn open(&self, inode: InodeId, length: u64) -> FsResult<Box<dyn ReadSession>>;

    /// Size-change notification for open sessions on `inode`.
    fn truncate(&self, inode: InodeId, length: u64);
}

/// A read session over one inode.
#[async_trait]
pub trait ReadSession: Send + Sync {
    /// Reads into `buf` at `offset`, returning the bytes read.
    ///
    /// [`FsError::TryAgain`](crate::FsError::TryAgain) asks the caller to repeat the read.
    async fn read(&mut self, ctx: &OpContext, offset: u64, buf: &mut [u8]) -> FsResult<usize>;

    async fn close(&mut self);
}

/// Opens write sessions.
#[async_trait]
pub trait DataWriter: Send + Sync {
    /// Opens a write session for `inode`, which is `length` bytes long.
    async fn open(&self, inode: InodeId, length: u64) -> FsResult<Box<dyn WriteSession>>;

    /// Size-change notification for open sessions on `inode`.
    fn truncate(&self, inode: InodeId, length: u64);
}

/// A write session over one inode.
#[async_trait]
pub trait WriteSession: Send + Sync {
    async fn write(&mut self, ctx: &OpContext, offset: u64, data: &[u8]) -> FsResult<()>;

    /// Makes buffered writes visible to readers and the metadata service.
    async fn flush(&mut self, ctx: &OpContext) -> FsResult<()>;

    /// Flushes and releases the session.
    async fn close(&mut self, ctx: &OpContext) -> FsResult<()>;
}

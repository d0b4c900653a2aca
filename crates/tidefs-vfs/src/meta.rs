//! Metadata service contract.
//!
//! The metadata service owns the namespace, allocates inodes and stores
//! attributes. The VFS layer depends only on this trait and never on a
//! concrete backend. Every method reports failures as [`FsError`] kinds that
//! mirror POSIX errno values.
//!
//! [`FsError`]: crate::FsError

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::{FsError, FsResult};
use crate::types::{
    AccessMask, AclRule, AclType, Attr, DirEntry, InodeId, RenameFlags, SetAttrMask, StatFs,
    Summary, XattrFlags,
};

/// Inode-oriented metadata operations.
#[async_trait]
pub trait MetaService: Send + Sync {
    /// Looks up `name` in directory `parent`.
    async fn lookup(&self, ctx: &OpContext, parent: InodeId, name: &str)
    -> FsResult<(InodeId, Attr)>;

    /// Resolves a whole relative `path` below `parent` in one call.
    ///
    /// Backends without server-side resolution keep the default, which
    /// reports [`FsError::NotSupported`] so the caller walks components.
    async fn resolve(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        path: &str,
    ) -> FsResult<(InodeId, Attr)> {
        let _ = (ctx, parent, path);
        Err(FsError::NotSupported)
    }

    async fn get_attr(&self, ctx: &OpContext, inode: InodeId) -> FsResult<Attr>;

    /// Updates the fields selected by `mask` from `attr`, returning the result.
    async fn set_attr(
        &self,
        ctx: &OpContext,
        inode: InodeId,
        mask: SetAttrMask,
        attr: &Attr,
    ) -> FsResult<Attr>;

    /// Checks `mask` against `attr` for the caller.
    async fn access(
        &self,
        ctx: &OpContext,
        inode: InodeId,
        mask: AccessMask,
        attr: &Attr,
    ) -> FsResult<()>;

    async fn mkdir(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
        mode: u16,
        umask: u16,
    ) -> FsResult<(InodeId, Attr)>;

    /// Creates and opens a regular file. `flags` are open(2) flags.
    async fn create(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
        mode: u16,
        umask: u16,
        flags: i32,
    ) -> FsResult<(InodeId, Attr)>;

    async fn unlink(&self, ctx: &OpContext, parent: InodeId, name: &str) -> FsResult<()>;

    async fn rmdir(&self, ctx: &OpContext, parent: InodeId, name: &str) -> FsResult<()>;

    /// Removes `name` and everything below it, returning the number of entries removed.
    async fn remove(&self, ctx: &OpContext, parent: InodeId, name: &str) -> FsResult<u64>;

    /// Renames an entry, returning the moved inode.
    async fn rename(
        &self,
        ctx: &OpContext,
        src_parent: InodeId,
        src_name: &str,
        dst_parent: InodeId,
        dst_name: &str,
        flags: RenameFlags,
    ) -> FsResult<(InodeId, Attr)>;

    async fn link(
        &self,
        ctx: &OpContext,
        inode: InodeId,
        parent: InodeId,
        name: &str,
    ) -> FsResult<Attr>;

    async fn symlink(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
        target: &str,
    ) -> FsResult<(InodeId, Attr)>;

    async fn read_link(&self, ctx: &OpContext, inode: InodeId) -> FsResult<String>;

    async fn truncate(&self, ctx: &OpContext, inode: InodeId, length: u64) -> FsResult<Attr>;

    /// Copies `len` bytes between files, returning the bytes copied.
    async fn copy_file_range(
        &self,
        ctx: &OpContext,
        src: InodeId,
        src_offset: u64,
        dst: InodeId,
        dst_offset: u64,
        len: u64,
    ) -> FsResult<u64>;

    async fn get_xattr(&self, ctx: &OpContext, inode: InodeId, name: &str) -> FsResult<Vec<u8>>;

    async fn list_xattr(&self, ctx: &OpContext, inode: InodeId) -> FsResult<Vec<String>>;

    async fn set_xattr(
        &self,
        ctx: &OpContext,
        inode: InodeId,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
    ) -> FsResult<()>;

    async fn remove_xattr(&self, ctx: &OpContext, inode: InodeId, name: &str) -> FsResult<()>;

    async fn get_facl(&self, ctx: &OpContext, inode: InodeId, acl: AclType) -> FsResult<AclRule>;

    async fn set_facl(
        &self,
        ctx: &OpContext,
        inode: InodeId,
        acl: AclType,
        rule: &AclRule,
    ) -> FsResult<()>;

    /// Lists a directory. With `plus` the attributes are filled in.
    async fn readdir(&self, ctx: &OpContext, inode: InodeId, plus: bool)
    -> FsResult<Vec<DirEntry>>;

    async fn stat_fs(&self, ctx: &OpContext, inode: InodeId) -> FsResult<StatFs>;

    /// Registers an open session on `inode`.
    async fn open(&self, ctx: &OpContext, inode: InodeId, flags: i32) -> FsResult<Attr>;

    /// Ends a session registered by `open` or `create`.
    async fn close(&self, ctx: &OpContext, inode: InodeId) -> FsResult<()>;

    async fn get_summary(&self, ctx: &OpContext, inode: InodeId) -> FsResult<Summary>;

    /// Drops cached slice metadata for chunk `index` of `inode`.
    async fn invalidate_chunk_cache(
        &self,
        ctx: &OpContext,
        inode: InodeId,
        index: u32,
    ) -> FsResult<()>;
}

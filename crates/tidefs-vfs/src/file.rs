//! Per-open-file handle.
//!
//! A [`File`] owns a cursor, at most one read session and one write session
//! (both opened lazily), and a directory snapshot taken on the first listing.
//! Every operation takes the handle's lock, so calls on one handle are totally
//! ordered while different handles proceed independently.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::sync::Mutex;
use tracing::debug;

use crate::context::OpContext;
use crate::data::{ReadSession, WriteSession};
use crate::error::{FsError, FsResult};
use crate::fs::FsInner;
use crate::internal::is_internal;
use crate::resolver::FileStat;
use crate::types::{AccessMask, AclRule, AclType, Attr, DirEntry, InodeId, SetAttrMask, Summary};

/// Result of a read that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were read into the buffer.
    Data(usize),
    /// The offset is at or past the end of the file.
    EndOfStream,
}

impl ReadOutcome {
    /// Bytes read, zero at end of stream.
    pub fn len(self) -> usize {
        match self {
            Self::Data(n) => n,
            Self::EndOfStream => 0,
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn is_end(self) -> bool {
        self == Self::EndOfStream
    }
}

struct FileState {
    info: FileStat,
    offset: u64,
    reader: Option<Box<dyn ReadSession>>,
    writer: Option<Box<dyn WriteSession>>,
    listing: Option<Vec<DirEntry>>,
    closed: bool,
}

/// An open file or directory.
pub struct File {
    fs: Arc<FsInner>,
    path: String,
    inode: InodeId,
    flags: AccessMask,
    state: Mutex<FileState>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("inode", &self.inode)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl File {
    pub(crate) fn new(fs: Arc<FsInner>, path: &str, info: FileStat, flags: AccessMask) -> Self {
        fs.stats.record_handle_open();
        Self {
            fs,
            path: path.to_owned(),
            inode: info.inode,
            flags,
            state: Mutex::new(FileState {
                info,
                offset: 0,
                reader: None,
                writer: None,
                listing: None,
                closed: false,
            }),
        }
    }

    pub fn inode(&self) -> InodeId {
        self.inode
    }

    /// Path the handle was opened with.
    pub fn name(&self) -> &str {
        &self.path
    }

    /// Access mode the handle was opened with; empty for a bare lookup.
    pub fn flags(&self) -> AccessMask {
        self.flags
    }

    /// Attributes as last seen by this handle.
    pub async fn stat(&self) -> FileStat {
        self.state.lock().await.info.clone()
    }

    async fn lock_open(&self) -> FsResult<tokio::sync::MutexGuard<'_, FileState>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(FsError::BadHandle);
        }
        Ok(state)
    }

    /// Moves the cursor. `SeekFrom::End` uses the size known to this handle.
    pub async fn seek(&self, ctx: &OpContext, pos: SeekFrom) -> FsResult<u64> {
        let result = self.seek_locked(pos).await;
        self.fs.log(ctx, &result, format_args!("Seek ({},{pos:?})", self.path));
        result
    }

    async fn seek_locked(&self, pos: SeekFrom) -> FsResult<u64> {
        let mut state = self.lock_open().await?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => state.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => state.info.attr.length.checked_add_signed(delta),
        };
        let offset = target.ok_or(FsError::InvalidArgument)?;
        state.offset = offset;
        Ok(offset)
    }

    /// Reads at the cursor and advances it.
    pub async fn read(&self, ctx: &OpContext, buf: &mut [u8]) -> FsResult<ReadOutcome> {
        let len = buf.len();
        let result = async {
            let mut state = self.lock_open().await?;
            let offset = state.offset;
            let outcome = self.pread_locked(ctx, &mut state, buf, offset).await?;
            state.offset += outcome.len() as u64;
            Ok(outcome)
        }
        .await;
        self.fs.log(ctx, &result, format_args!("Read ({},{len})", self.path));
        result
    }

    /// Reads at `offset` without moving the cursor.
    pub async fn pread(&self, ctx: &OpContext, buf: &mut [u8], offset: u64) -> FsResult<ReadOutcome> {
        let len = buf.len();
        let result = async {
            let mut state = self.lock_open().await?;
            self.pread_locked(ctx, &mut state, buf, offset).await
        }
        .await;
        self.fs
            .log(ctx, &result, format_args!("Pread ({},{len},{offset})", self.path));
        result
    }

    async fn pread_locked(
        &self,
        ctx: &OpContext,
        state: &mut FileState,
        buf: &mut [u8],
        offset: u64,
    ) -> FsResult<ReadOutcome> {
        let started = Instant::now();
        let size = state.info.attr.length;
        if offset >= size {
            return Ok(ReadOutcome::EndOfStream);
        }
        let available = usize::try_from(size - offset).unwrap_or(usize::MAX);
        let want = available.min(buf.len());
        let buf = &mut buf[..want];
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        if let Some(writer) = state.writer.as_mut() {
            writer.flush(ctx).await?;
            self.fs.resolver.invalidate_attr(self.inode);
        }
        if state.reader.is_none() {
            state.reader = Some(self.fs.reader.open(self.inode, size).await?);
        }
        let Some(reader) = state.reader.as_mut() else {
            return Err(FsError::BadHandle);
        };

        loop {
            match reader.read(ctx, offset, buf).await {
                Err(FsError::TryAgain) => tokio::task::yield_now().await,
                Err(err) => return Err(err),
                Ok(0) => return Ok(ReadOutcome::EndOfStream),
                Ok(n) => {
                    self.fs.stats.record_read(n as u64, started.elapsed());
                    return Ok(ReadOutcome::Data(n));
                }
            }
        }
    }

    /// Writes at the cursor and advances it.
    pub async fn write(&self, ctx: &OpContext, data: &[u8]) -> FsResult<usize> {
        let result = async {
            let mut state = self.lock_open().await?;
            let offset = state.offset;
            let n = self.pwrite_locked(ctx, &mut state, data, offset).await?;
            state.offset += n as u64;
            Ok(n)
        }
        .await;
        self.fs
            .log(ctx, &result, format_args!("Write ({},{})", self.path, data.len()));
        result
    }

    /// Writes at `offset` without moving the cursor.
    pub async fn pwrite(&self, ctx: &OpContext, data: &[u8], offset: u64) -> FsResult<usize> {
        let result = async {
            let mut state = self.lock_open().await?;
            self.pwrite_locked(ctx, &mut state, data, offset).await
        }
        .await;
        self.fs.log(
            ctx,
            &result,
            format_args!("Pwrite ({},{},{offset})", self.path, data.len()),
        );
        result
    }

    async fn pwrite_locked(
        &self,
        ctx: &OpContext,
        state: &mut FileState,
        data: &[u8],
        offset: u64,
    ) -> FsResult<usize> {
        let started = Instant::now();
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(FsError::InvalidArgument)?;
        if state.writer.is_none() {
            state.writer = Some(self.fs.writer.open(self.inode, state.info.attr.length).await?);
        }
        let Some(writer) = state.writer.as_mut() else {
            return Err(FsError::BadHandle);
        };
        if let Err(err) = writer.write(ctx, offset, data).await {
            if let Some(mut broken) = state.writer.take() {
                let _ = broken.close(ctx).await;
            }
            return Err(err);
        }
        if end > state.info.attr.length {
            state.info.attr.length = end;
            self.fs.resolver.invalidate_attr(self.inode);
        }
        self.fs.stats.record_write(data.len() as u64, started.elapsed());
        Ok(data.len())
    }

    /// Flushes pending writes of this handle.
    pub async fn flush(&self, ctx: &OpContext) -> FsResult<()> {
        self.flush_as(ctx, "Flush").await
    }

    /// Flushes pending writes of this handle.
    pub async fn fsync(&self, ctx: &OpContext) -> FsResult<()> {
        self.flush_as(ctx, "Fsync").await
    }

    async fn flush_as(&self, ctx: &OpContext, op: &str) -> FsResult<()> {
        let mut state = self.lock_open().await?;
        let Some(writer) = state.writer.as_mut() else {
            return Ok(());
        };
        let result = writer.flush(ctx).await;
        self.fs.resolver.invalidate_attr(self.inode);
        drop(state);
        self.fs.log(ctx, &result, format_args!("{op} ({})", self.path));
        result
    }

    /// Releases the handle.
    ///
    /// Pending writes are flushed and the write session is closed before this
    /// returns. The read session is released after the configured grace delay.
    /// Closing twice is a no-op.
    pub async fn close(&self, ctx: &OpContext) -> FsResult<()> {
        let result = self.close_locked(ctx).await;
        self.fs.log(ctx, &result, format_args!("Close ({})", self.path));
        result
    }

    async fn close_locked(&self, ctx: &OpContext) -> FsResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.listing = None;
        self.fs.stats.record_handle_close();

        let mut result = Ok(());
        if !self.flags.is_empty() && !state.info.is_dir() {
            state.offset = 0;
            if let Some(mut reader) = state.reader.take() {
                let delay = self.fs.config.read_release_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    reader.close().await;
                });
            }
            if let Some(mut writer) = state.writer.take() {
                result = writer.close(ctx).await;
                self.fs.resolver.invalidate_attr(self.inode);
            }
            if !is_internal(self.inode) {
                if let Err(err) = self.fs.meta.close(ctx, self.inode).await {
                    debug!(inode = %self.inode, error = %err, "metadata close failed");
                }
            }
        }
        result
    }

    /// Drops a lookup-only handle without logging a close.
    pub(crate) async fn release(&self) {
        let mut state = self.state.lock().await;
        if !std::mem::replace(&mut state.closed, true) {
            self.fs.stats.record_handle_close();
        }
    }

    async fn load_listing(
        &self,
        ctx: &OpContext,
        state: &mut FileState,
        mask: AccessMask,
    ) -> FsResult<()> {
        if state.listing.is_some() {
            return Ok(());
        }
        self.fs
            .resolver
            .check_access(ctx, self.inode, mask, &state.info.attr)
            .await?;
        state.listing = Some(self.fs.meta.readdir(ctx, self.inode, true).await?);
        Ok(())
    }

    /// Returns up to `count` entries from the cursor and advances it.
    ///
    /// A non-positive `count` returns everything left. The listing is taken
    /// once per handle and later calls page through that snapshot.
    pub async fn readdir(&self, ctx: &OpContext, count: i32) -> FsResult<Vec<FileStat>> {
        let result = async {
            let mut state = self.lock_open().await?;
            self.load_listing(ctx, &mut state, AccessMask::READ).await?;
            let start = usize::try_from(state.offset).unwrap_or(usize::MAX);
            let page: Vec<FileStat> = match &state.listing {
                Some(listing) if start < listing.len() => {
                    let rest = &listing[start..];
                    let take = usize::try_from(count)
                        .ok()
                        .filter(|n| *n > 0)
                        .map_or(rest.len(), |n| n.min(rest.len()));
                    rest[..take]
                        .iter()
                        .map(|e| FileStat::new(e.inode, e.name.clone(), e.attr.clone()))
                        .collect()
                }
                _ => Vec::new(),
            };
            state.offset += page.len() as u64;
            Ok(page)
        }
        .await;
        let found = result.as_ref().map_or(0, Vec::len);
        self.fs.log(
            ctx,
            &result,
            format_args!("Readdir ({},{count}) [{found}]", self.path),
        );
        result
    }

    /// Returns the entries from `offset` on, excluding `.` and `..`.
    pub async fn readdir_plus(&self, ctx: &OpContext, offset: usize) -> FsResult<Vec<DirEntry>> {
        let result = async {
            let mut state = self.lock_open().await?;
            self.load_listing(ctx, &mut state, AccessMask::READ | AccessMask::EXECUTE)
                .await?;
            let entries = state
                .listing
                .iter()
                .flatten()
                .filter(|e| e.name != "." && e.name != "..")
                .skip(offset)
                .cloned()
                .collect::<Vec<_>>();
            Ok(entries)
        }
        .await;
        let found = result.as_ref().map_or(0, Vec::len);
        self.fs.log(
            ctx,
            &result,
            format_args!("ReaddirPlus ({},{offset}) [{found}]", self.path),
        );
        result
    }

    /// Recursive usage below this handle, not cached.
    pub async fn summary(&self, ctx: &OpContext) -> FsResult<Summary> {
        let result = self.fs.meta.get_summary(ctx, self.inode).await;
        self.fs
            .log(ctx, &result, format_args!("Summary ({})", self.path));
        result
    }

    /// Changes permission bits. Only the owner or the superuser may do this.
    pub async fn chmod(&self, ctx: &OpContext, mode: u16) -> FsResult<()> {
        let result = async {
            let mut state = self.lock_open().await?;
            if !ctx.is_root() && ctx.uid != state.info.attr.uid {
                return Err(FsError::PermissionDenied);
            }
            let mut attr = state.info.attr.clone();
            attr.mode = mode & 0o7777;
            self.set_attr_locked(ctx, &mut state, SetAttrMask::MODE, &attr)
                .await
        }
        .await;
        self.fs
            .log(ctx, &result, format_args!("Chmod ({},{mode:o})", self.path));
        result
    }

    /// Changes ownership.
    ///
    /// Only the superuser may change the owner. The owner may change the group
    /// to one of its own groups.
    pub async fn chown(&self, ctx: &OpContext, uid: u32, gid: u32) -> FsResult<()> {
        let result = async {
            let mut state = self.lock_open().await?;
            let current = &state.info.attr;
            let mut mask = SetAttrMask::empty();
            if uid != current.uid {
                if !ctx.is_root() {
                    return Err(FsError::PermissionDenied);
                }
                mask |= SetAttrMask::UID;
            }
            if gid != current.gid {
                if !ctx.is_root() && (ctx.uid != current.uid || !ctx.in_group(gid)) {
                    return Err(FsError::PermissionDenied);
                }
                mask |= SetAttrMask::GID;
            }
            if mask.is_empty() {
                return Ok(());
            }
            let mut attr = current.clone();
            attr.uid = uid;
            attr.gid = gid;
            self.set_attr_locked(ctx, &mut state, mask, &attr).await
        }
        .await;
        self.fs
            .log(ctx, &result, format_args!("Chown ({},{uid},{gid})", self.path));
        result
    }

    /// Sets access and/or modification time. `None` leaves a time unchanged.
    pub async fn utime(
        &self,
        ctx: &OpContext,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> FsResult<()> {
        let mut mask = SetAttrMask::empty();
        if atime.is_some() {
            mask |= SetAttrMask::ATIME;
        }
        if mtime.is_some() {
            mask |= SetAttrMask::MTIME;
        }
        if mask.is_empty() {
            return Ok(());
        }
        let result = async {
            let mut state = self.lock_open().await?;
            self.fs
                .resolver
                .check_access(ctx, self.inode, AccessMask::WRITE, &state.info.attr)
                .await?;
            let mut attr = state.info.attr.clone();
            if let Some(atime) = atime {
                attr.atime = atime;
            }
            if let Some(mtime) = mtime {
                attr.mtime = mtime;
            }
            self.set_attr_locked(ctx, &mut state, mask, &attr).await
        }
        .await;
        self.fs.log(
            ctx,
            &result,
            format_args!("Utime ({},{atime:?},{mtime:?})", self.path),
        );
        result
    }

    async fn set_attr_locked(
        &self,
        ctx: &OpContext,
        state: &mut FileState,
        mask: SetAttrMask,
        attr: &Attr,
    ) -> FsResult<()> {
        let result = self.fs.meta.set_attr(ctx, self.inode, mask, attr).await;
        self.fs.resolver.invalidate_attr(self.inode);
        state.info.attr = result?;
        Ok(())
    }

    /// Reads the ACL of this handle's inode.
    pub async fn get_facl(&self, ctx: &OpContext, acl: AclType) -> FsResult<AclRule> {
        let info = self.lock_open().await?.info.clone();
        let result = self.fs.get_facl(ctx, &info, acl).await;
        self.fs
            .log(ctx, &result, format_args!("GetFacl ({},{acl:?})", self.path));
        result
    }

    /// Replaces the ACL of this handle's inode.
    pub async fn set_facl(&self, ctx: &OpContext, acl: AclType, rule: &AclRule) -> FsResult<()> {
        let info = self.lock_open().await?.info.clone();
        let result = self.fs.set_facl(ctx, &info, acl, rule).await;
        self.fs
            .log(ctx, &result, format_args!("SetFacl ({},{acl:?})", self.path));
        result
    }
}

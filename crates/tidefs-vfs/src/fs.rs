//! Path-level filesystem facade.
//!
//! [`FileSystem`] accepts absolute paths and an [`OpContext`], resolves them
//! through the [`PathResolver`], checks permissions on the caller's behalf,
//! forwards the inode-level call to the [`MetaService`] and invalidates the
//! cache records the call made stale. Every public operation writes one line
//! to the access log when one is configured.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, instrument, warn};

use crate::access_log::AccessLogger;
use crate::cache::{CacheSweeper, MetaCaches};
use crate::config::VfsConfig;
use crate::context::OpContext;
use crate::data::{CHUNK_SIZE, DataReader, DataWriter};
use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::internal::is_internal;
use crate::meta::MetaService;
use crate::resolver::{FileStat, PathResolver, components, split_parent};
use crate::stats::FsStats;
use crate::types::{AccessMask, AclRule, AclType, Attr, InodeId, RenameFlags, StatFs, Summary, XattrFlags};

/// State shared by the facade and every handle it opened.
pub(crate) struct FsInner {
    pub(crate) config: Arc<VfsConfig>,
    pub(crate) meta: Arc<dyn MetaService>,
    pub(crate) reader: Arc<dyn DataReader>,
    pub(crate) writer: Arc<dyn DataWriter>,
    pub(crate) resolver: PathResolver,
    pub(crate) caches: Arc<MetaCaches>,
    pub(crate) stats: Arc<FsStats>,
    access_log: Option<AccessLogger>,
    sweeper: CacheSweeper,
}

#[derive(Clone, Copy)]
enum NewNode {
    Directory { mode: u16, umask: u16 },
    File { mode: u16, umask: u16, flags: i32 },
}

impl FsInner {
    /// Records the outcome of one operation in the stats and the access log.
    pub(crate) fn log<T>(&self, ctx: &OpContext, result: &FsResult<T>, command: fmt::Arguments<'_>) {
        self.stats.record_op(ctx.elapsed(), result.is_err());
        let Some(log) = &self.access_log else {
            return;
        };
        let queued = match result {
            Ok(_) => log.log(ctx, format_args!("{command}: OK")),
            Err(err) => log.log(ctx, format_args!("{command}: {err}")),
        };
        if !queued {
            self.stats.record_log_dropped();
        }
    }

    /// Creates a directory or file under `parent`, retrying once when the
    /// cached parent turns out to have been moved to the trash.
    async fn make_node(
        &self,
        ctx: &OpContext,
        parent_path: &str,
        mut parent: FileStat,
        name: &str,
        kind: NewNode,
    ) -> FsResult<(InodeId, Attr)> {
        let mut retried = false;
        let result = loop {
            let attempt = match kind {
                NewNode::Directory { mode, umask } => {
                    self.meta.mkdir(ctx, parent.inode, name, mode, umask).await
                }
                NewNode::File { mode, umask, flags } => {
                    self.meta
                        .create(ctx, parent.inode, name, mode, umask, flags)
                        .await
                }
            };
            match attempt {
                Err(FsError::NotFound) if !retried && !parent.inode.is_root() => {
                    retried = true;
                    let (grand_path, parent_name) = split_parent(parent_path);
                    let grand = self.resolver.resolve(ctx, grand_path, true).await?;
                    self.resolver.invalidate_entry(grand.inode, parent_name);
                    let fresh = self.resolver.resolve(ctx, parent_path, true).await?;
                    if fresh.inode == parent.inode {
                        break Err(FsError::NotFound);
                    }
                    debug!(
                        stale = %parent.inode,
                        fresh = %fresh.inode,
                        "parent was replaced, retrying"
                    );
                    parent = fresh;
                }
                other => break other,
            }
        };
        self.resolver.invalidate_entry(parent.inode, name);
        result
    }

    /// Resolves the parent of `path` and checks that the caller may modify it.
    async fn writable_parent<'p>(
        &self,
        ctx: &OpContext,
        path: &'p str,
    ) -> FsResult<(&'p str, FileStat, &'p str)> {
        let (dir, name) = split_parent(path);
        let parent = self.resolver.resolve(ctx, dir, true).await?;
        if !parent.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.resolver
            .check_access(ctx, parent.inode, AccessMask::WRITE, &parent.attr)
            .await?;
        Ok((dir, parent, name))
    }

    async fn resolve_with(
        &self,
        ctx: &OpContext,
        path: &str,
        mask: AccessMask,
    ) -> FsResult<FileStat> {
        let info = self.resolver.resolve(ctx, path, true).await?;
        self.resolver
            .check_access(ctx, info.inode, mask, &info.attr)
            .await?;
        Ok(info)
    }

    pub(crate) async fn get_facl(
        &self,
        ctx: &OpContext,
        info: &FileStat,
        acl: AclType,
    ) -> FsResult<AclRule> {
        self.meta.get_facl(ctx, info.inode, acl).await
    }

    /// Replaces an ACL.
    ///
    /// An empty access rule keeps the owner and other bits of the current
    /// rule and folds its mask into the group bits.
    pub(crate) async fn set_facl(
        &self,
        ctx: &OpContext,
        info: &FileStat,
        acl: AclType,
        rule: &AclRule,
    ) -> FsResult<()> {
        if acl == AclType::Default && !info.is_dir() {
            return Err(FsError::InvalidArgument);
        }
        if !ctx.is_root() && ctx.uid != info.attr.uid {
            return Err(FsError::NotPermitted);
        }
        let mut rule = rule.clone();
        if acl == AclType::Access && rule.is_empty() {
            match self.meta.get_facl(ctx, info.inode, AclType::Access).await {
                Ok(old) => {
                    rule.owner = old.owner;
                    rule.other = old.other;
                    rule.group = old.group & old.mask;
                }
                Err(FsError::NoAttribute) => {}
                Err(err) => return Err(err),
            }
        }
        let result = self.meta.set_facl(ctx, info.inode, acl, &rule).await;
        self.resolver.invalidate_attr(info.inode);
        result
    }
}

/// Rewrites an absolute `target` relative to the directory `link_dir`.
fn relative_target(link_dir: &str, target: &str) -> String {
    let base = clean(link_dir);
    let dest = clean(target);
    let common = base.iter().zip(&dest).take_while(|(a, b)| a == b).count();
    let parts: Vec<&str> = std::iter::repeat_n("..", base.len() - common)
        .chain(dest[common..].iter().copied())
        .collect();
    if parts.is_empty() {
        ".".to_owned()
    } else {
        parts.join("/")
    }
}

/// Lexically cleaned components of an absolute path.
fn clean(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for part in components(path) {
        match part {
            "." => {}
            ".." => {
                out.pop();
            }
            part => out.push(part),
        }
    }
    out
}

/// The path-level filesystem.
///
/// Cloning is cheap and every clone shares the same caches, stats and log.
/// Must be created inside a tokio runtime, which runs the cache sweeper and
/// the access-log writer.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<FsInner>,
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl FileSystem {
    pub async fn new(
        config: VfsConfig,
        meta: Arc<dyn MetaService>,
        reader: Arc<dyn DataReader>,
        writer: Arc<dyn DataWriter>,
    ) -> Self {
        Self::with_stats(config, meta, reader, writer, Arc::new(FsStats::new())).await
    }

    /// Builds a filesystem that records into `stats`.
    ///
    /// A log file that cannot be opened is reported and the filesystem runs
    /// without an access log.
    pub async fn with_stats(
        config: VfsConfig,
        meta: Arc<dyn MetaService>,
        reader: Arc<dyn DataReader>,
        writer: Arc<dyn DataWriter>,
        stats: Arc<FsStats>,
    ) -> Self {
        let config = Arc::new(config);
        let caches = Arc::new(MetaCaches::with_stats(stats.entry_cache(), stats.attr_cache()));
        let sweeper = CacheSweeper::spawn(&caches, config.sweep_interval, config.sweep_budget);
        let access_log = match &config.access_log {
            Some(log_config) => match AccessLogger::open(log_config.clone()).await {
                Ok(log) => Some(log),
                Err(err) => {
                    warn!(path = %log_config.path.display(), error = %err, "access log disabled");
                    None
                }
            },
            None => None,
        };
        let resolver = PathResolver::new(Arc::clone(&meta), Arc::clone(&caches), Arc::clone(&config));
        Self {
            inner: Arc::new(FsInner {
                config,
                meta,
                reader,
                writer,
                resolver,
                caches,
                stats,
                access_log,
                sweeper,
            }),
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &Arc<FsStats> {
        &self.inner.stats
    }

    /// The name and attribute caches, for adapters that invalidate on
    /// external notifications.
    pub fn caches(&self) -> &MetaCaches {
        &self.inner.caches
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.inner.resolver
    }

    pub fn access_log(&self) -> Option<&AccessLogger> {
        self.inner.access_log.as_ref()
    }

    /// Waits for queued access-log lines to reach the file.
    pub async fn flush(&self) {
        if let Some(log) = &self.inner.access_log {
            log.flush().await;
        }
    }

    /// Stops the sweeper and the access-log writer. Open handles stay usable.
    pub async fn close(&self) {
        self.inner.sweeper.stop();
        if let Some(log) = &self.inner.access_log {
            log.close().await;
        }
    }

    pub async fn stat_fs(&self, ctx: &OpContext) -> FsResult<StatFs> {
        let result = self.inner.meta.stat_fs(ctx, InodeId::ROOT).await;
        self.inner.log(ctx, &result, format_args!("StatFS ()"));
        result
    }

    /// Attributes of `path`, following a final symlink.
    pub async fn stat(&self, ctx: &OpContext, path: &str) -> FsResult<FileStat> {
        let result = self.inner.resolver.resolve(ctx, path, true).await;
        self.inner.log(ctx, &result, format_args!("Stat ({path})"));
        result
    }

    /// Attributes of `path` itself, even when it is a symlink.
    pub async fn lstat(&self, ctx: &OpContext, path: &str) -> FsResult<FileStat> {
        let result = self.inner.resolver.resolve(ctx, path, false).await;
        self.inner.log(ctx, &result, format_args!("Lstat ({path})"));
        result
    }

    pub async fn access(&self, ctx: &OpContext, path: &str, mask: AccessMask) -> FsResult<()> {
        let result = self.inner.resolve_with(ctx, path, mask).await.map(drop);
        self.inner
            .log(ctx, &result, format_args!("Access ({path},{:o})", mask.bits()));
        result
    }

    pub async fn readlink(&self, ctx: &OpContext, path: &str) -> FsResult<String> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolver.resolve(ctx, path, false).await?;
            fs.meta.read_link(ctx, info.inode).await
        }
        .await;
        fs.log(ctx, &result, format_args!("Readlink ({path})"));
        result
    }

    /// Recursive usage below `path`.
    pub async fn summary(&self, ctx: &OpContext, path: &str) -> FsResult<Summary> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolver.resolve(ctx, path, true).await?;
            fs.meta.get_summary(ctx, info.inode).await
        }
        .await;
        fs.log(ctx, &result, format_args!("Summary ({path})"));
        result
    }

    /// Opens `path`, following a final symlink.
    ///
    /// Empty `flags` only looks the path up. Otherwise the caller must hold
    /// the requested access and non-directories are registered with the
    /// metadata service.
    pub async fn open(&self, ctx: &OpContext, path: &str, flags: AccessMask) -> FsResult<File> {
        self.open_with(ctx, path, flags, true).await
    }

    /// Like [`open`](Self::open) but does not follow a final symlink.
    pub async fn lopen(&self, ctx: &OpContext, path: &str, flags: AccessMask) -> FsResult<File> {
        self.open_with(ctx, path, flags, false).await
    }

    #[instrument(level = "debug", skip(self, ctx), fields(uid = ctx.uid))]
    async fn open_with(
        &self,
        ctx: &OpContext,
        path: &str,
        flags: AccessMask,
        follow: bool,
    ) -> FsResult<File> {
        let fs = &self.inner;
        let result = async {
            let mut info = fs.resolver.resolve(ctx, path, follow).await?;
            if !flags.is_empty() && !info.is_dir() {
                fs.resolver
                    .check_access(ctx, info.inode, flags, &info.attr)
                    .await?;
                if !is_internal(info.inode) {
                    info.attr = fs.meta.open(ctx, info.inode, flags.open_flags()).await?;
                }
            }
            Ok(File::new(Arc::clone(fs), path, info, flags))
        }
        .await;
        if flags.is_empty() {
            fs.log(ctx, &result, format_args!("Lookup ({path})"));
        } else {
            fs.log(ctx, &result, format_args!("Open ({path},{:o})", flags.bits()));
        }
        result
    }

    /// Creates a regular file and opens it for reading and writing.
    #[instrument(level = "debug", skip(self, ctx), fields(uid = ctx.uid))]
    pub async fn create(&self, ctx: &OpContext, path: &str, mode: u16, umask: u16) -> FsResult<File> {
        let fs = &self.inner;
        let result = async {
            if path.ends_with('/') {
                return Err(FsError::InvalidArgument);
            }
            let (dir, parent, name) = fs.writable_parent(ctx, path).await?;
            let flags = AccessMask::READ | AccessMask::WRITE;
            let kind = NewNode::File {
                mode,
                umask,
                flags: libc::O_EXCL | flags.open_flags(),
            };
            let (inode, attr) = fs.make_node(ctx, dir, parent, name, kind).await?;
            Ok(File::new(
                Arc::clone(fs),
                path,
                FileStat::new(inode, name, attr),
                flags,
            ))
        }
        .await;
        fs.log(ctx, &result, format_args!("Create ({path},{mode:o})"));
        result
    }

    #[instrument(level = "debug", skip(self, ctx), fields(uid = ctx.uid))]
    pub async fn mkdir(&self, ctx: &OpContext, path: &str, mode: u16, umask: u16) -> FsResult<FileStat> {
        let fs = &self.inner;
        let result = async {
            if path == "/" {
                return Err(FsError::AlreadyExists);
            }
            let (dir, parent, name) = fs.writable_parent(ctx, path).await?;
            let (inode, attr) = fs
                .make_node(ctx, dir, parent, name, NewNode::Directory { mode, umask })
                .await?;
            Ok(FileStat::new(inode, name, attr))
        }
        .await;
        fs.log(ctx, &result, format_args!("Mkdir ({path},{mode:o})"));
        result
    }

    /// Creates `path` and any missing ancestors.
    ///
    /// Each ancestor is attempted once. Their outcomes are ignored and the
    /// result of creating `path` itself is returned.
    pub async fn mkdir_all(&self, ctx: &OpContext, path: &str, mode: u16, umask: u16) -> FsResult<()> {
        let mut pending = vec![path.to_owned()];
        let mut ascending = true;
        let mut last = Ok(());
        while let Some(current) = pending.last().cloned() {
            let result = self.mkdir(ctx, &current, mode, umask).await.map(drop);
            match result {
                Err(FsError::NotFound) if ascending => {
                    let (parent, _) = split_parent(&current);
                    if parent == "/" {
                        ascending = false;
                        pending.pop();
                        last = Err(FsError::NotFound);
                    } else {
                        pending.push(parent.to_owned());
                    }
                }
                other => {
                    ascending = false;
                    pending.pop();
                    last = other;
                }
            }
        }
        last
    }

    /// Removes a file, symlink or empty directory.
    pub async fn delete(&self, ctx: &OpContext, path: &str) -> FsResult<()> {
        let fs = &self.inner;
        let result = async {
            let (dir, name) = split_parent(path);
            if name.is_empty() {
                return Err(FsError::InvalidArgument);
            }
            let parent = fs.resolver.resolve(ctx, dir, true).await?;
            let target = fs.resolver.resolve(ctx, path, false).await?;
            fs.resolver
                .check_access(ctx, parent.inode, AccessMask::WRITE, &parent.attr)
                .await?;
            let result = if target.is_dir() {
                fs.meta.rmdir(ctx, parent.inode, name).await
            } else {
                fs.meta.unlink(ctx, parent.inode, name).await
            };
            fs.resolver.invalidate_entry(parent.inode, name);
            fs.resolver.invalidate_attr(target.inode);
            result
        }
        .await;
        fs.log(ctx, &result, format_args!("Delete ({path})"));
        result
    }

    /// Removes `path` and everything below it, returning the entries removed.
    pub async fn rmr(&self, ctx: &OpContext, path: &str) -> FsResult<u64> {
        let fs = &self.inner;
        let result = async {
            if split_parent(path).1.is_empty() {
                return Err(FsError::InvalidArgument);
            }
            let (_, parent, name) = fs.writable_parent(ctx, path).await?;
            let result = fs.meta.remove(ctx, parent.inode, name).await;
            fs.resolver.invalidate_entry(parent.inode, name);
            result
        }
        .await;
        fs.log(ctx, &result, format_args!("Rmr ({path})"));
        result
    }

    pub async fn rename(
        &self,
        ctx: &OpContext,
        src: &str,
        dst: &str,
        flags: RenameFlags,
    ) -> FsResult<()> {
        let fs = &self.inner;
        let result = async {
            let (_, src_parent, src_name) = fs.writable_parent(ctx, src).await?;
            let (_, dst_parent, dst_name) = fs.writable_parent(ctx, dst).await?;
            let replaced = fs
                .resolver
                .lookup(ctx, dst_parent.inode, dst_name)
                .await
                .ok()
                .map(|(inode, _)| inode);
            let result = fs
                .meta
                .rename(ctx, src_parent.inode, src_name, dst_parent.inode, dst_name, flags)
                .await;
            fs.resolver.invalidate_entry(src_parent.inode, src_name);
            fs.resolver.invalidate_entry(dst_parent.inode, dst_name);
            if let Some(replaced) = replaced {
                fs.resolver.invalidate_attr(replaced);
            }
            let (inode, _) = result?;
            fs.resolver.invalidate_attr(inode);
            Ok(())
        }
        .await;
        fs.log(
            ctx,
            &result,
            format_args!("Rename ({src},{dst},{})", flags.bits()),
        );
        result
    }

    /// Creates a hard link `dst` to `src`.
    pub async fn link(&self, ctx: &OpContext, src: &str, dst: &str) -> FsResult<FileStat> {
        let fs = &self.inner;
        let result = async {
            let source = fs.resolver.resolve(ctx, src, false).await?;
            let (_, parent, name) = fs.writable_parent(ctx, dst).await?;
            let attr = fs.meta.link(ctx, source.inode, parent.inode, name).await;
            fs.resolver.invalidate_entry(parent.inode, name);
            fs.resolver.invalidate_attr(source.inode);
            Ok(FileStat::new(source.inode, name, attr?))
        }
        .await;
        fs.log(ctx, &result, format_args!("Link ({src},{dst})"));
        result
    }

    /// Creates a symlink at `link` pointing to `target`.
    ///
    /// An absolute target is stored relative to the link's directory so the
    /// link keeps working wherever the filesystem is mounted.
    pub async fn symlink(&self, ctx: &OpContext, target: &str, link: &str) -> FsResult<FileStat> {
        let fs = &self.inner;
        let result = async {
            let (dir, parent, name) = fs.writable_parent(ctx, link).await?;
            let stored = if target.starts_with('/') {
                relative_target(dir, target)
            } else {
                target.to_owned()
            };
            let result = fs.meta.symlink(ctx, parent.inode, name, &stored).await;
            fs.resolver.invalidate_entry(parent.inode, name);
            let (inode, attr) = result?;
            Ok(FileStat::new(inode, name, attr))
        }
        .await;
        fs.log(ctx, &result, format_args!("Symlink ({target},{link})"));
        result
    }

    pub async fn truncate(&self, ctx: &OpContext, path: &str, length: u64) -> FsResult<()> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolve_with(ctx, path, AccessMask::WRITE).await?;
            let result = fs.meta.truncate(ctx, info.inode, length).await;
            fs.resolver.invalidate_attr(info.inode);
            result?;
            fs.reader.truncate(info.inode, length);
            fs.writer.truncate(info.inode, length);
            Ok(())
        }
        .await;
        fs.log(ctx, &result, format_args!("Truncate ({path},{length})"));
        result
    }

    /// Copies `len` bytes between two files, returning the bytes copied.
    pub async fn copy_file_range(
        &self,
        ctx: &OpContext,
        src: &str,
        src_offset: u64,
        dst: &str,
        dst_offset: u64,
        len: u64,
    ) -> FsResult<u64> {
        let fs = &self.inner;
        let result = async {
            if src_offset.checked_add(len).is_none() || dst_offset.checked_add(len).is_none() {
                return Err(FsError::InvalidArgument);
            }
            let dst_info = fs.resolve_with(ctx, dst, AccessMask::WRITE).await?;
            let src_info = fs.resolve_with(ctx, src, AccessMask::READ).await?;
            let copied = fs
                .meta
                .copy_file_range(ctx, src_info.inode, src_offset, dst_info.inode, dst_offset, len)
                .await;
            fs.resolver.invalidate_attr(dst_info.inode);
            let copied = copied?;
            if copied > 0 {
                let first = dst_offset / CHUNK_SIZE;
                let last = dst_offset.saturating_add(copied - 1) / CHUNK_SIZE;
                for index in first..=last {
                    if let Err(err) = fs
                        .meta
                        .invalidate_chunk_cache(ctx, dst_info.inode, index as u32)
                        .await
                    {
                        debug!(inode = %dst_info.inode, index, error = %err, "chunk invalidation failed");
                    }
                }
            }
            Ok(copied)
        }
        .await;
        fs.log(
            ctx,
            &result,
            format_args!("CopyFileRange ({src},{src_offset},{dst},{dst_offset},{len})"),
        );
        result
    }

    pub async fn chmod(&self, ctx: &OpContext, path: &str, mode: u16) -> FsResult<()> {
        let file = self.open(ctx, path, AccessMask::empty()).await?;
        let result = file.chmod(ctx, mode).await;
        file.release().await;
        result
    }

    pub async fn chown(&self, ctx: &OpContext, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let file = self.open(ctx, path, AccessMask::empty()).await?;
        let result = file.chown(ctx, uid, gid).await;
        file.release().await;
        result
    }

    /// Sets access and/or modification time of `path`.
    pub async fn utime(
        &self,
        ctx: &OpContext,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> FsResult<()> {
        let file = self.open(ctx, path, AccessMask::empty()).await?;
        let result = file.utime(ctx, atime, mtime).await;
        file.release().await;
        result
    }

    pub async fn get_xattr(&self, ctx: &OpContext, path: &str, name: &str) -> FsResult<Vec<u8>> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolve_with(ctx, path, AccessMask::READ).await?;
            fs.meta.get_xattr(ctx, info.inode, name).await
        }
        .await;
        fs.log(ctx, &result, format_args!("GetXattr ({path},{name})"));
        result
    }

    pub async fn list_xattr(&self, ctx: &OpContext, path: &str) -> FsResult<Vec<String>> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolve_with(ctx, path, AccessMask::READ).await?;
            fs.meta.list_xattr(ctx, info.inode).await
        }
        .await;
        fs.log(ctx, &result, format_args!("ListXattr ({path})"));
        result
    }

    pub async fn set_xattr(
        &self,
        ctx: &OpContext,
        path: &str,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
    ) -> FsResult<()> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolve_with(ctx, path, AccessMask::WRITE).await?;
            fs.meta.set_xattr(ctx, info.inode, name, value, flags).await
        }
        .await;
        fs.log(
            ctx,
            &result,
            format_args!("SetXattr ({path},{name},{},{})", value.len(), flags.bits()),
        );
        result
    }

    pub async fn remove_xattr(&self, ctx: &OpContext, path: &str, name: &str) -> FsResult<()> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolve_with(ctx, path, AccessMask::WRITE).await?;
            fs.meta.remove_xattr(ctx, info.inode, name).await
        }
        .await;
        fs.log(ctx, &result, format_args!("RemoveXattr ({path},{name})"));
        result
    }

    pub async fn get_facl(&self, ctx: &OpContext, path: &str, acl: AclType) -> FsResult<AclRule> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolver.resolve(ctx, path, true).await?;
            fs.get_facl(ctx, &info, acl).await
        }
        .await;
        fs.log(ctx, &result, format_args!("GetFacl ({path},{acl:?})"));
        result
    }

    /// Replaces an ACL of `path`. Only the owner or the superuser may do this.
    pub async fn set_facl(
        &self,
        ctx: &OpContext,
        path: &str,
        acl: AclType,
        rule: &AclRule,
    ) -> FsResult<()> {
        let fs = &self.inner;
        let result = async {
            let info = fs.resolver.resolve(ctx, path, true).await?;
            fs.set_facl(ctx, &info, acl, rule).await
        }
        .await;
        fs.log(ctx, &result, format_args!("SetFacl ({path},{acl:?})"));
        result
    }
}

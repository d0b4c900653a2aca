//! Path resolution.
//!
//! [`PathResolver`] turns an absolute path into an inode and an attribute
//! snapshot. When the metadata service supports it, the whole path is resolved
//! in one call. Otherwise, or when that call reports `NotSupported`, the path
//! is walked one component at a time through the [`EntryCache`] and
//! [`AttrCache`], expanding symlinks on the way.
//!
//! Symlink expansion is iterative. A link's target components are pushed in
//! front of the components still to be walked, and every followed link inode
//! is remembered for the duration of the call. Meeting the same link twice is
//! reported as [`FsError::SymlinkLoop`].
//!
//! [`EntryCache`]: crate::cache::EntryCache
//! [`AttrCache`]: crate::cache::AttrCache

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, instrument, trace};

use crate::cache::MetaCaches;
use crate::config::VfsConfig;
use crate::context::OpContext;
use crate::error::{FsError, FsResult};
use crate::internal::InternalNode;
use crate::meta::MetaService;
use crate::types::{AccessMask, Attr, InodeId};

/// A resolved path: inode, attribute snapshot and final name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub inode: InodeId,
    pub name: String,
    pub attr: Attr,
}

/// Return value of [`PathResolver::resolve`].
pub type ResolvedPath = FileStat;

impl FileStat {
    pub fn new(inode: InodeId, name: impl Into<String>, attr: Attr) -> Self {
        Self {
            inode,
            name: name.into(),
            attr,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.attr.is_dir()
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.attr.is_symlink()
    }

    /// Length in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.attr.length
    }

    pub fn mode(&self) -> u32 {
        self.attr.st_mode()
    }

    pub fn mtime(&self) -> SystemTime {
        self.attr.mtime
    }
}

/// Splits `path` into its parent directory and final name.
///
/// Trailing slashes are ignored. The parent of a top-level name is `/`, and
/// the root itself splits into `("/", "")`.
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None if trimmed.is_empty() => ("/", ""),
        None => ("/", trimmed),
    }
}

/// Non-empty components of `path`.
pub fn components(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

fn is_external_target(target: &str) -> bool {
    target.starts_with('/') || target.contains("://")
}

/// Resolves paths against a metadata service through the shared caches.
pub struct PathResolver {
    meta: Arc<dyn MetaService>,
    caches: Arc<MetaCaches>,
    config: Arc<VfsConfig>,
}

impl PathResolver {
    pub fn new(meta: Arc<dyn MetaService>, caches: Arc<MetaCaches>, config: Arc<VfsConfig>) -> Self {
        Self {
            meta,
            caches,
            config,
        }
    }

    pub fn caches(&self) -> &MetaCaches {
        &self.caches
    }

    /// Resolves `path`, following a symlink in the final component when
    /// `follow` is set. Symlinks in earlier components are always followed.
    #[instrument(level = "debug", skip(self, ctx), fields(uid = ctx.uid), err)]
    pub async fn resolve(&self, ctx: &OpContext, path: &str, follow: bool) -> FsResult<FileStat> {
        let mut parts = components(path);
        if let (Some(name), None) = (parts.next(), parts.next()) {
            if let Some(internal) = InternalNode::from_name(name) {
                return Ok(FileStat::new(internal.inode(), name, internal.attr()));
            }
        }
        if self.config.fast_resolve {
            match self.meta.resolve(ctx, InodeId::ROOT, path).await {
                Ok((_, attr)) if follow && attr.is_symlink() => {
                    trace!("fast resolve ended on a symlink, walking components");
                }
                Ok((inode, attr)) => {
                    let (_, name) = split_parent(path);
                    let name = if name.is_empty() { "/" } else { name };
                    return Ok(FileStat::new(inode, name, attr));
                }
                Err(err) if err.is_not_supported() => {
                    trace!("fast resolve not supported, walking components");
                }
                Err(err) => return Err(err),
            }
        }
        self.walk(ctx, path, follow).await
    }

    async fn walk(&self, ctx: &OpContext, path: &str, follow: bool) -> FsResult<FileStat> {
        let mut pending: VecDeque<String> = components(path).map(str::to_owned).collect();
        let mut visited: HashSet<InodeId> = HashSet::new();
        // `None` stands for the root, whose attributes are fetched only if needed.
        let mut node: Option<FileStat> = None;

        while let Some(name) = pending.pop_front() {
            let is_last = pending.is_empty();
            let parent = node.as_ref().map_or(InodeId::ROOT, |n| n.inode);

            if name == "." || name == ".." {
                if node.as_ref().is_some_and(|n| !n.is_dir()) {
                    return Err(FsError::NotADirectory);
                }
                if name == ".." && !parent.is_root() {
                    let (inode, attr) = self.meta.lookup(ctx, parent, "..").await?;
                    node = (!inode.is_root()).then(|| FileStat::new(inode, "..", attr));
                }
                continue;
            }

            if parent.is_root() && is_last {
                if let Some(internal) = InternalNode::from_name(&name) {
                    node = Some(FileStat::new(internal.inode(), name, internal.attr()));
                    continue;
                }
            }

            if let Some(dir) = &node {
                self.check_access(ctx, dir.inode, AccessMask::EXECUTE, &dir.attr)
                    .await?;
            }

            let (inode, attr) = self.lookup(ctx, parent, &name).await?;
            if attr.is_symlink() && (!is_last || follow) {
                if !visited.insert(inode) {
                    debug!(inode = %inode, "symlink loop");
                    return Err(FsError::SymlinkLoop);
                }
                let target = self.meta.read_link(ctx, inode).await?;
                if is_external_target(&target) {
                    return Err(FsError::ExternalSymlink { target });
                }
                for component in components(&target).rev() {
                    pending.push_front(component.to_owned());
                }
                continue;
            }
            node = Some(FileStat::new(inode, name, attr));
        }

        match node {
            Some(stat) => Ok(stat),
            None => {
                let attr = self.meta.get_attr(ctx, InodeId::ROOT).await?;
                Ok(FileStat::new(InodeId::ROOT, "/", attr))
            }
        }
    }

    /// Looks up `name` under `parent` through the caches.
    ///
    /// A cached name still has its attributes refreshed independently, since
    /// the two caches expire on their own schedules.
    pub async fn lookup(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
    ) -> FsResult<(InodeId, Attr)> {
        if let Some(entry) = self.caches.entries.get(parent, name) {
            if let Some(attr) = self.caches.attrs.get(entry.inode) {
                return Ok((entry.inode, attr));
            }
            match self.meta.get_attr(ctx, entry.inode).await {
                Ok(attr) => {
                    self.caches
                        .attrs
                        .put(entry.inode, attr.clone(), self.config.attr_timeout);
                    return Ok((entry.inode, attr));
                }
                Err(err) => {
                    self.caches.entries.invalidate(parent, name);
                    return Err(err);
                }
            }
        }

        let (inode, attr) = self.meta.lookup(ctx, parent, name).await?;
        let entry_ttl = self.config.entry_ttl(attr.is_dir());
        if !entry_ttl.is_zero() {
            self.caches
                .attrs
                .put(inode, attr.clone(), self.config.attr_timeout);
            self.caches
                .entries
                .put(parent, name, inode, attr.kind, entry_ttl);
        }
        Ok((inode, attr))
    }

    /// Checks `mask` on `inode` for the caller. The superuser always passes.
    pub async fn check_access(
        &self,
        ctx: &OpContext,
        inode: InodeId,
        mask: AccessMask,
        attr: &Attr,
    ) -> FsResult<()> {
        if ctx.is_root() || mask.is_empty() {
            return Ok(());
        }
        self.meta.access(ctx, inode, mask, attr).await
    }

    /// Forgets the cached name `(parent, name)`.
    pub fn invalidate_entry(&self, parent: InodeId, name: &str) {
        self.caches.entries.invalidate(parent, name);
    }

    /// Forgets the cached attributes of `inode`.
    pub fn invalidate_attr(&self, inode: InodeId) {
        self.caches.attrs.invalidate(inode);
    }
}

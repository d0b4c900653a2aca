use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::OpContext;
use crate::data::{DataReader, DataWriter, ReadSession, WriteSession};
use crate::error::{FsError, FsResult};
use crate::meta::MetaService;
use crate::resolver::components;
use crate::types::{
    AccessMask, AclRule, AclType, Attr, DirEntry, FileKind, InodeId, RenameFlags, SetAttrMask,
    StatFs, Summary, XattrFlags,
};

const BLOCK_SIZE: u64 = 4096;
const TOTAL_SPACE: u64 = 1 << 40;
const TOTAL_INODES: u64 = 1 << 20;

#[derive(Debug)]
struct Node {
    attr: Attr,
    children: BTreeMap<String, InodeId>,
    target: String,
    data: Vec<u8>,
    xattrs: BTreeMap<String, Vec<u8>>,
    access_acl: Option<AclRule>,
    default_acl: Option<AclRule>,
    sessions: u32,
}

impl Node {
    fn new(attr: Attr) -> Self {
        Self {
            attr,
            children: BTreeMap::new(),
            target: String::new(),
            data: Vec::new(),
            xattrs: BTreeMap::new(),
            access_acl: None,
            default_acl: None,
            sessions: 0,
        }
    }
}

#[derive(Debug)]
struct Store {
    nodes: HashMap<InodeId, Node>,
    next_inode: u64,
}

impl Store {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut root = Attr::new(FileKind::Directory, 0o777);
        root.nlink = 2;
        root.parent = InodeId::ROOT;
        nodes.insert(InodeId::ROOT, Node::new(root));
        let mut trash = Attr::new(FileKind::Directory, 0o555);
        trash.nlink = 2;
        trash.parent = InodeId::TRASH;
        nodes.insert(InodeId::TRASH, Node::new(trash));
        Self {
            nodes,
            next_inode: 2,
        }
    }

    fn node(&self, inode: InodeId) -> FsResult<&Node> {
        self.nodes.get(&inode).ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, inode: InodeId) -> FsResult<&mut Node> {
        self.nodes.get_mut(&inode).ok_or(FsError::NotFound)
    }

    fn dir(&self, inode: InodeId) -> FsResult<&Node> {
        let node = self.node(inode)?;
        if !node.attr.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(node)
    }

    fn child(&self, parent: InodeId, name: &str) -> FsResult<InodeId> {
        let dir = self.dir(parent)?;
        match name {
            "." => Ok(parent),
            ".." => Ok(dir.attr.parent),
            _ => dir.children.get(name).copied().ok_or(FsError::NotFound),
        }
    }

    /// True when `inode` hangs below the trash root.
    fn in_trash(&self, mut inode: InodeId) -> bool {
        for _ in 0..4096 {
            if inode == InodeId::TRASH {
                return true;
            }
            if inode.is_root() {
                return false;
            }
            match self.nodes.get(&inode) {
                Some(node) => inode = node.attr.parent,
                None => return true,
            }
        }
        false
    }

    /// Parent that may receive a new entry `name`.
    fn new_entry_parent(&self, parent: InodeId, name: &str) -> FsResult<()> {
        if self.in_trash(parent) {
            return Err(FsError::NotFound);
        }
        let dir = self.dir(parent)?;
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidArgument);
        }
        if dir.children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        Ok(())
    }

    fn insert(
        &mut self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
        mut attr: Attr,
    ) -> FsResult<(InodeId, Attr)> {
        let inode = InodeId::new(self.next_inode);
        self.next_inode += 1;
        let now = SystemTime::now();
        attr.uid = ctx.uid;
        attr.gid = ctx.gid;
        attr.atime = now;
        attr.mtime = now;
        attr.ctime = now;
        attr.parent = parent;
        if attr.is_dir() {
            attr.nlink = 2;
        }
        self.nodes.insert(inode, Node::new(attr.clone()));
        let is_dir = attr.is_dir();
        let dir = self.node_mut(parent)?;
        dir.children.insert(name.to_owned(), inode);
        dir.attr.mtime = now;
        if is_dir {
            dir.attr.nlink += 1;
        }
        Ok((inode, attr))
    }

    fn detach(&mut self, parent: InodeId, name: &str) -> FsResult<InodeId> {
        let dir = self.node_mut(parent)?;
        let inode = dir.children.remove(name).ok_or(FsError::NotFound)?;
        dir.attr.mtime = SystemTime::now();
        let child_is_dir = self.nodes.get(&inode).is_some_and(|n| n.attr.is_dir());
        if child_is_dir {
            let dir = self.node_mut(parent)?;
            dir.attr.nlink = dir.attr.nlink.saturating_sub(1);
        }
        Ok(inode)
    }

    fn release_link(&mut self, inode: InodeId) {
        let Some(node) = self.nodes.get_mut(&inode) else {
            return;
        };
        node.attr.nlink = node.attr.nlink.saturating_sub(1);
        node.attr.ctime = SystemTime::now();
        if node.attr.is_dir() || (node.attr.nlink == 0 && node.sessions == 0) {
            self.nodes.remove(&inode);
        }
    }

    fn remove_tree(&mut self, inode: InodeId) -> u64 {
        let children: Vec<InodeId> = self
            .nodes
            .get(&inode)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default();
        let removed: u64 = children.into_iter().map(|c| self.remove_tree(c)).sum();
        self.release_link(inode);
        removed + 1
    }

    fn walk(&self, path: &str) -> FsResult<InodeId> {
        let mut inode = InodeId::ROOT;
        for name in components(path) {
            inode = self.child(inode, name)?;
        }
        Ok(inode)
    }

    fn summarize(&self, inode: InodeId, summary: &mut Summary) {
        let Some(node) = self.nodes.get(&inode) else {
            return;
        };
        if node.attr.is_dir() {
            summary.dirs += 1;
            summary.size += BLOCK_SIZE;
            for child in node.children.values() {
                self.summarize(*child, summary);
            }
        } else {
            summary.files += 1;
            summary.length += node.attr.length;
            summary.size += node.attr.length.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        }
    }

    fn write_at(&mut self, inode: InodeId, offset: u64, data: &[u8]) -> FsResult<()> {
        let node = self.node_mut(inode)?;
        if node.attr.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let start = usize::try_from(offset).map_err(|_| FsError::InvalidArgument)?;
        let end = start + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[start..end].copy_from_slice(data);
        node.attr.length = node.data.len() as u64;
        node.attr.mtime = SystemTime::now();
        Ok(())
    }
}

#[derive(Debug)]
struct Shared {
    store: Mutex<Store>,
    calls: Mutex<HashMap<&'static str, u64>>,
    faults: Mutex<HashMap<&'static str, VecDeque<FsError>>>,
    fast_resolve: AtomicBool,
    read_sessions: AtomicUsize,
    write_sessions: AtomicUsize,
}

impl Shared {
    /// Counts a call to `op` and returns a queued fault for it, if any.
    fn enter(&self, op: &'static str) -> FsResult<()> {
        *self.calls.lock().entry(op).or_default() += 1;
        match self.faults.lock().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory metadata service and data engine.
///
/// The root directory is world-writable and owned by uid 0. Call counters are
/// keyed by method name (`"lookup"`, `"mkdir"`, ...). The data engine uses
/// `"read_open"`, `"read"`, `"write_open"`, `"write"` and `"flush"`. Writes are
/// buffered per session and become visible on flush or close.
#[derive(Debug, Clone)]
pub struct MemBackend {
    shared: Arc<Shared>,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(Store::new()),
                calls: Mutex::new(HashMap::new()),
                faults: Mutex::new(HashMap::new()),
                fast_resolve: AtomicBool::new(false),
                read_sessions: AtomicUsize::new(0),
                write_sessions: AtomicUsize::new(0),
            }),
        }
    }

    /// Serve whole-path `resolve` calls. Off by default.
    #[must_use]
    pub fn with_fast_resolve(self, enabled: bool) -> Self {
        self.shared.fast_resolve.store(enabled, Ordering::Relaxed);
        self
    }

    /// Number of calls made to `op` so far.
    pub fn calls(&self, op: &str) -> u64 {
        self.shared.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.shared.calls.lock().clear();
    }

    /// Makes the next call to `op` fail with `err`. Faults queue up per op.
    pub fn fail_next(&self, op: &'static str, err: FsError) {
        self.shared.faults.lock().entry(op).or_default().push_back(err);
    }

    /// Read sessions opened and not yet closed.
    pub fn open_read_sessions(&self) -> usize {
        self.shared.read_sessions.load(Ordering::SeqCst)
    }

    /// Write sessions opened and not yet closed.
    pub fn open_write_sessions(&self) -> usize {
        self.shared.write_sessions.load(Ordering::SeqCst)
    }

    /// Inode at `path`, without following symlinks or counting a call.
    pub fn inode_of(&self, path: &str) -> FsResult<InodeId> {
        self.shared.store.lock().walk(path)
    }

    /// Flushed content of the file at `path`.
    pub fn content(&self, path: &str) -> FsResult<Vec<u8>> {
        let store = self.shared.store.lock();
        let inode = store.walk(path)?;
        Ok(store.node(inode)?.data.clone())
    }

    /// Moves the entry at `path` into the trash, as a concurrent delete from
    /// another client would. New entries below it fail with `NotFound`.
    pub fn trash(&self, path: &str) -> FsResult<InodeId> {
        let (dir, name) = crate::resolver::split_parent(path);
        let mut store = self.shared.store.lock();
        let parent = store.walk(dir)?;
        let inode = store.detach(parent, name)?;
        let trash_name = format!("{parent}-{inode}-{name}");
        store.node_mut(inode)?.attr.parent = InodeId::TRASH;
        store
            .node_mut(InodeId::TRASH)?
            .children
            .insert(trash_name, inode);
        Ok(inode)
    }

    /// Creates a directory behind the VFS layer's back, as another client would.
    pub fn mkdir_external(&self, path: &str, mode: u16) -> FsResult<InodeId> {
        let (dir, name) = crate::resolver::split_parent(path);
        let mut store = self.shared.store.lock();
        let parent = store.walk(dir)?;
        store.new_entry_parent(parent, name)?;
        let (inode, _) = store.insert(
            &OpContext::root(),
            parent,
            name,
            Attr::new(FileKind::Directory, mode),
        )?;
        Ok(inode)
    }

    /// Changes the length of a file behind the VFS layer's back.
    pub fn set_length_external(&self, path: &str, length: u64) -> FsResult<()> {
        let mut store = self.shared.store.lock();
        let inode = store.walk(path)?;
        let node = store.node_mut(inode)?;
        node.data.resize(usize::try_from(length).map_err(|_| FsError::InvalidArgument)?, 0);
        node.attr.length = length;
        Ok(())
    }
}

fn permits(ctx: &OpContext, mask: AccessMask, attr: &Attr) -> bool {
    if ctx.is_root() {
        return true;
    }
    let bits = if ctx.uid == attr.uid {
        attr.mode >> 6
    } else if ctx.in_group(attr.gid) {
        attr.mode >> 3
    } else {
        attr.mode
    };
    let granted = AccessMask::from_bits_truncate((bits & 0o7) as u8);
    granted.contains(mask)
}

fn perm_bits(class: u16) -> u16 {
    if class == AclRule::UNSET { 0 } else { class & 0o7 }
}

#[async_trait]
impl MetaService for MemBackend {
    async fn lookup(
        &self,
        _ctx: &OpContext,
        parent: InodeId,
        name: &str,
    ) -> FsResult<(InodeId, Attr)> {
        self.shared.enter("lookup")?;
        let store = self.shared.store.lock();
        let inode = store.child(parent, name)?;
        Ok((inode, store.node(inode)?.attr.clone()))
    }

    async fn resolve(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        path: &str,
    ) -> FsResult<(InodeId, Attr)> {
        self.shared.enter("resolve")?;
        if !self.shared.fast_resolve.load(Ordering::Relaxed) {
            return Err(FsError::NotSupported);
        }
        let store = self.shared.store.lock();
        let mut inode = parent;
        for name in components(path) {
            let node = store.node(inode)?;
            if node.attr.is_symlink() {
                return Err(FsError::NotSupported);
            }
            if node.attr.is_dir() && !permits(ctx, AccessMask::EXECUTE, &node.attr) {
                return Err(FsError::PermissionDenied);
            }
            inode = store.child(inode, name)?;
        }
        Ok((inode, store.node(inode)?.attr.clone()))
    }

    async fn get_attr(&self, _ctx: &OpContext, inode: InodeId) -> FsResult<Attr> {
        self.shared.enter("get_attr")?;
        Ok(self.shared.store.lock().node(inode)?.attr.clone())
    }

    async fn set_attr(
        &self,
        _ctx: &OpContext,
        inode: InodeId,
        mask: SetAttrMask,
        attr: &Attr,
    ) -> FsResult<Attr> {
        self.shared.enter("set_attr")?;
        let mut store = self.shared.store.lock();
        let node = store.node_mut(inode)?;
        let now = SystemTime::now();
        if mask.contains(SetAttrMask::MODE) {
            node.attr.mode = attr.mode & 0o7777;
        }
        if mask.contains(SetAttrMask::UID) {
            node.attr.uid = attr.uid;
        }
        if mask.contains(SetAttrMask::GID) {
            node.attr.gid = attr.gid;
        }
        if mask.contains(SetAttrMask::SIZE) {
            node.data.resize(usize::try_from(attr.length).map_err(|_| FsError::InvalidArgument)?, 0);
            node.attr.length = attr.length;
        }
        if mask.contains(SetAttrMask::ATIME) {
            node.attr.atime = attr.atime;
        } else if mask.contains(SetAttrMask::ATIME_NOW) {
            node.attr.atime = now;
        }
        if mask.contains(SetAttrMask::MTIME) {
            node.attr.mtime = attr.mtime;
        } else if mask.contains(SetAttrMask::MTIME_NOW) {
            node.attr.mtime = now;
        }
        node.attr.ctime = now;
        Ok(node.attr.clone())
    }

    async fn access(
        &self,
        ctx: &OpContext,
        _inode: InodeId,
        mask: AccessMask,
        attr: &Attr,
    ) -> FsResult<()> {
        self.shared.enter("access")?;
        if permits(ctx, mask, attr) {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    async fn mkdir(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
        mode: u16,
        umask: u16,
    ) -> FsResult<(InodeId, Attr)> {
        self.shared.enter("mkdir")?;
        let mut store = self.shared.store.lock();
        store.new_entry_parent(parent, name)?;
        store.insert(ctx, parent, name, Attr::new(FileKind::Directory, mode & !umask))
    }

    async fn create(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
        mode: u16,
        umask: u16,
        _flags: i32,
    ) -> FsResult<(InodeId, Attr)> {
        self.shared.enter("create")?;
        let mut store = self.shared.store.lock();
        store.new_entry_parent(parent, name)?;
        let (inode, attr) =
            store.insert(ctx, parent, name, Attr::new(FileKind::File, mode & !umask))?;
        store.node_mut(inode)?.sessions += 1;
        Ok((inode, attr))
    }

    async fn unlink(&self, _ctx: &OpContext, parent: InodeId, name: &str) -> FsResult<()> {
        self.shared.enter("unlink")?;
        let mut store = self.shared.store.lock();
        let inode = store.child(parent, name)?;
        if store.node(inode)?.attr.is_dir() {
            return Err(FsError::IsADirectory);
        }
        store.detach(parent, name)?;
        store.release_link(inode);
        Ok(())
    }

    async fn rmdir(&self, _ctx: &OpContext, parent: InodeId, name: &str) -> FsResult<()> {
        self.shared.enter("rmdir")?;
        let mut store = self.shared.store.lock();
        let inode = store.child(parent, name)?;
        let node = store.dir(inode)?;
        if !node.children.is_empty() {
            return Err(FsError::NotEmpty);
        }
        store.detach(parent, name)?;
        store.release_link(inode);
        Ok(())
    }

    async fn remove(&self, _ctx: &OpContext, parent: InodeId, name: &str) -> FsResult<u64> {
        self.shared.enter("remove")?;
        let mut store = self.shared.store.lock();
        let inode = store.detach(parent, name)?;
        Ok(store.remove_tree(inode))
    }

    async fn rename(
        &self,
        _ctx: &OpContext,
        src_parent: InodeId,
        src_name: &str,
        dst_parent: InodeId,
        dst_name: &str,
        flags: RenameFlags,
    ) -> FsResult<(InodeId, Attr)> {
        self.shared.enter("rename")?;
        let mut store = self.shared.store.lock();
        let inode = store.child(src_parent, src_name)?;
        store.dir(dst_parent)?;
        let existing = store.child(dst_parent, dst_name).ok();

        if flags.contains(RenameFlags::EXCHANGE) {
            let other = existing.ok_or(FsError::NotFound)?;
            store.node_mut(src_parent)?.children.insert(src_name.to_owned(), other);
            store.node_mut(dst_parent)?.children.insert(dst_name.to_owned(), inode);
            store.node_mut(other)?.attr.parent = src_parent;
            let node = store.node_mut(inode)?;
            node.attr.parent = dst_parent;
            return Ok((inode, node.attr.clone()));
        }

        if let Some(other) = existing {
            if other == inode {
                return Ok((inode, store.node(inode)?.attr.clone()));
            }
            if flags.contains(RenameFlags::NOREPLACE) {
                return Err(FsError::AlreadyExists);
            }
            let src_is_dir = store.node(inode)?.attr.is_dir();
            let dst = store.node(other)?;
            match (src_is_dir, dst.attr.is_dir()) {
                (true, false) => return Err(FsError::NotADirectory),
                (false, true) => return Err(FsError::IsADirectory),
                (true, true) if !dst.children.is_empty() => return Err(FsError::NotEmpty),
                _ => {}
            }
            store.detach(dst_parent, dst_name)?;
            store.release_link(other);
        }

        store.detach(src_parent, src_name)?;
        let is_dir = store.node(inode)?.attr.is_dir();
        let dir = store.node_mut(dst_parent)?;
        dir.children.insert(dst_name.to_owned(), inode);
        if is_dir {
            dir.attr.nlink += 1;
        }
        let node = store.node_mut(inode)?;
        node.attr.parent = dst_parent;
        node.attr.ctime = SystemTime::now();
        Ok((inode, node.attr.clone()))
    }

    async fn link(
        &self,
        _ctx: &OpContext,
        inode: InodeId,
        parent: InodeId,
        name: &str,
    ) -> FsResult<Attr> {
        self.shared.enter("link")?;
        let mut store = self.shared.store.lock();
        if store.node(inode)?.attr.is_dir() {
            return Err(FsError::NotPermitted);
        }
        store.new_entry_parent(parent, name)?;
        store.node_mut(parent)?.children.insert(name.to_owned(), inode);
        let node = store.node_mut(inode)?;
        node.attr.nlink += 1;
        node.attr.ctime = SystemTime::now();
        Ok(node.attr.clone())
    }

    async fn symlink(
        &self,
        ctx: &OpContext,
        parent: InodeId,
        name: &str,
        target: &str,
    ) -> FsResult<(InodeId, Attr)> {
        self.shared.enter("symlink")?;
        let mut store = self.shared.store.lock();
        store.new_entry_parent(parent, name)?;
        let mut attr = Attr::new(FileKind::Symlink, 0o777);
        attr.length = target.len() as u64;
        let (inode, attr) = store.insert(ctx, parent, name, attr)?;
        store.node_mut(inode)?.target = target.to_owned();
        Ok((inode, attr))
    }

    async fn read_link(&self, _ctx: &OpContext, inode: InodeId) -> FsResult<String> {
        self.shared.enter("read_link")?;
        let store = self.shared.store.lock();
        let node = store.node(inode)?;
        if !node.attr.is_symlink() {
            return Err(FsError::InvalidArgument);
        }
        Ok(node.target.clone())
    }

    async fn truncate(&self, _ctx: &OpContext, inode: InodeId, length: u64) -> FsResult<Attr> {
        self.shared.enter("truncate")?;
        let mut store = self.shared.store.lock();
        let node = store.node_mut(inode)?;
        if node.attr.is_dir() {
            return Err(FsError::IsADirectory);
        }
        node.data.resize(usize::try_from(length).map_err(|_| FsError::InvalidArgument)?, 0);
        node.attr.length = length;
        node.attr.mtime = SystemTime::now();
        Ok(node.attr.clone())
    }

    async fn copy_file_range(
        &self,
        _ctx: &OpContext,
        src: InodeId,
        src_offset: u64,
        dst: InodeId,
        dst_offset: u64,
        len: u64,
    ) -> FsResult<u64> {
        self.shared.enter("copy_file_range")?;
        let mut store = self.shared.store.lock();
        let source = store.node(src)?;
        if source.attr.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let start = usize::try_from(src_offset).map_err(|_| FsError::InvalidArgument)?;
        if start >= source.data.len() {
            return Ok(0);
        }
        let end = source
            .data
            .len()
            .min(start.saturating_add(usize::try_from(len).unwrap_or(usize::MAX)));
        let chunk = source.data[start..end].to_vec();
        store.write_at(dst, dst_offset, &chunk)?;
        Ok(chunk.len() as u64)
    }

    async fn get_xattr(&self, _ctx: &OpContext, inode: InodeId, name: &str) -> FsResult<Vec<u8>> {
        self.shared.enter("get_xattr")?;
        let store = self.shared.store.lock();
        store
            .node(inode)?
            .xattrs
            .get(name)
            .cloned()
            .ok_or(FsError::NoAttribute)
    }

    async fn list_xattr(&self, _ctx: &OpContext, inode: InodeId) -> FsResult<Vec<String>> {
        self.shared.enter("list_xattr")?;
        let store = self.shared.store.lock();
        Ok(store.node(inode)?.xattrs.keys().cloned().collect())
    }

    async fn set_xattr(
        &self,
        _ctx: &OpContext,
        inode: InodeId,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
    ) -> FsResult<()> {
        self.shared.enter("set_xattr")?;
        if name.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let mut store = self.shared.store.lock();
        let node = store.node_mut(inode)?;
        let exists = node.xattrs.contains_key(name);
        if flags.contains(XattrFlags::CREATE) && exists {
            return Err(FsError::AlreadyExists);
        }
        if flags.contains(XattrFlags::REPLACE) && !exists {
            return Err(FsError::NoAttribute);
        }
        node.xattrs.insert(name.to_owned(), value.to_vec());
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    async fn remove_xattr(&self, _ctx: &OpContext, inode: InodeId, name: &str) -> FsResult<()> {
        self.shared.enter("remove_xattr")?;
        let mut store = self.shared.store.lock();
        let node = store.node_mut(inode)?;
        node.xattrs.remove(name).map(drop).ok_or(FsError::NoAttribute)
    }

    async fn get_facl(&self, _ctx: &OpContext, inode: InodeId, acl: AclType) -> FsResult<AclRule> {
        self.shared.enter("get_facl")?;
        let store = self.shared.store.lock();
        let node = store.node(inode)?;
        let rule = match acl {
            AclType::Access => &node.access_acl,
            AclType::Default => &node.default_acl,
        };
        rule.clone().ok_or(FsError::NoAttribute)
    }

    async fn set_facl(
        &self,
        _ctx: &OpContext,
        inode: InodeId,
        acl: AclType,
        rule: &AclRule,
    ) -> FsResult<()> {
        self.shared.enter("set_facl")?;
        let mut store = self.shared.store.lock();
        let node = store.node_mut(inode)?;
        match acl {
            AclType::Access => {
                if !rule.is_empty() {
                    let group = if rule.is_minimal() { rule.group } else { rule.mask };
                    let special = node.attr.mode & 0o7000;
                    node.attr.mode = special
                        | perm_bits(rule.owner) << 6
                        | perm_bits(group) << 3
                        | perm_bits(rule.other);
                }
                node.access_acl = (!rule.is_empty() && !rule.is_minimal()).then(|| rule.clone());
                node.attr.access_acl = node.access_acl.is_some();
            }
            AclType::Default => {
                if !node.attr.is_dir() {
                    return Err(FsError::InvalidArgument);
                }
                node.default_acl = (!rule.is_empty()).then(|| rule.clone());
                node.attr.default_acl = node.default_acl.is_some();
            }
        }
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    async fn readdir(
        &self,
        _ctx: &OpContext,
        inode: InodeId,
        _plus: bool,
    ) -> FsResult<Vec<DirEntry>> {
        self.shared.enter("readdir")?;
        let store = self.shared.store.lock();
        let dir = store.dir(inode)?;
        let parent = dir.attr.parent;
        let mut entries = vec![
            DirEntry {
                inode,
                name: ".".to_owned(),
                attr: dir.attr.clone(),
            },
            DirEntry {
                inode: parent,
                name: "..".to_owned(),
                attr: store.node(parent)?.attr.clone(),
            },
        ];
        for (name, child) in &dir.children {
            entries.push(DirEntry {
                inode: *child,
                name: name.clone(),
                attr: store.node(*child)?.attr.clone(),
            });
        }
        Ok(entries)
    }

    async fn stat_fs(&self, _ctx: &OpContext, _inode: InodeId) -> FsResult<StatFs> {
        self.shared.enter("stat_fs")?;
        let store = self.shared.store.lock();
        let used: u64 = store
            .nodes
            .values()
            .map(|n| n.attr.length.div_ceil(BLOCK_SIZE) * BLOCK_SIZE)
            .sum();
        let inodes = store.nodes.len() as u64;
        Ok(StatFs {
            total_space: TOTAL_SPACE,
            avail_space: TOTAL_SPACE.saturating_sub(used),
            used_inodes: inodes,
            avail_inodes: TOTAL_INODES.saturating_sub(inodes),
        })
    }

    async fn open(&self, _ctx: &OpContext, inode: InodeId, _flags: i32) -> FsResult<Attr> {
        self.shared.enter("open")?;
        let mut store = self.shared.store.lock();
        let node = store.node_mut(inode)?;
        node.sessions += 1;
        Ok(node.attr.clone())
    }

    async fn close(&self, _ctx: &OpContext, inode: InodeId) -> FsResult<()> {
        self.shared.enter("close")?;
        let mut store = self.shared.store.lock();
        let node = store.node_mut(inode)?;
        node.sessions = node.sessions.saturating_sub(1);
        if node.sessions == 0 && node.attr.nlink == 0 {
            store.nodes.remove(&inode);
        }
        Ok(())
    }

    async fn get_summary(&self, _ctx: &OpContext, inode: InodeId) -> FsResult<Summary> {
        self.shared.enter("get_summary")?;
        let store = self.shared.store.lock();
        store.node(inode)?;
        let mut summary = Summary::default();
        store.summarize(inode, &mut summary);
        Ok(summary)
    }

    async fn invalidate_chunk_cache(
        &self,
        _ctx: &OpContext,
        _inode: InodeId,
        _index: u32,
    ) -> FsResult<()> {
        self.shared.enter("invalidate_chunk_cache")
    }
}

#[async_trait]
impl DataReader for MemBackend {
    async fn open(&self, inode: InodeId, _length: u64) -> FsResult<Box<dyn ReadSession>> {
        self.shared.enter("read_open")?;
        self.shared.store.lock().node(inode)?;
        self.shared.read_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemReader {
            shared: Arc::clone(&self.shared),
            inode,
            closed: false,
        }))
    }

    fn truncate(&self, _inode: InodeId, _length: u64) {
        *self.shared.calls.lock().entry("read_truncate").or_default() += 1;
    }
}

#[async_trait]
impl DataWriter for MemBackend {
    async fn open(&self, inode: InodeId, _length: u64) -> FsResult<Box<dyn WriteSession>> {
        self.shared.enter("write_open")?;
        self.shared.store.lock().node(inode)?;
        self.shared.write_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemWriter {
            shared: Arc::clone(&self.shared),
            inode,
            pending: Vec::new(),
            closed: false,
        }))
    }

    fn truncate(&self, _inode: InodeId, _length: u64) {
        *self.shared.calls.lock().entry("write_truncate").or_default() += 1;
    }
}

struct MemReader {
    shared: Arc<Shared>,
    inode: InodeId,
    closed: bool,
}

#[async_trait]
impl ReadSession for MemReader {
    async fn read(&mut self, _ctx: &OpContext, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        self.shared.enter("read")?;
        let store = self.shared.store.lock();
        let data = &store.node(self.inode)?.data;
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    async fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            self.shared.read_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct MemWriter {
    shared: Arc<Shared>,
    inode: InodeId,
    pending: Vec<(u64, Vec<u8>)>,
    closed: bool,
}

#[async_trait]
impl WriteSession for MemWriter {
    async fn write(&mut self, _ctx: &OpContext, offset: u64, data: &[u8]) -> FsResult<()> {
        self.shared.enter("write")?;
        self.pending.push((offset, data.to_vec()));
        Ok(())
    }

    async fn flush(&mut self, _ctx: &OpContext) -> FsResult<()> {
        self.shared.enter("flush")?;
        let mut store = self.shared.store.lock();
        for (offset, data) in self.pending.drain(..) {
            store.write_at(self.inode, offset, &data)?;
        }
        Ok(())
    }

    async fn close(&mut self, ctx: &OpContext) -> FsResult<()> {
        let result = self.flush(ctx).await;
        if !std::mem::replace(&mut self.closed, true) {
            self.shared.write_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_namespace_basics() {
        let backend = MemBackend::new();
        let ctx = OpContext::new(1000, 1000, 1);

        let (dir, attr) = MetaService::mkdir(&backend, &ctx, InodeId::ROOT, "d", 0o777, 0o022)
            .await
            .unwrap();
        assert_eq!(attr.mode, 0o755);
        assert_eq!(attr.uid, 1000);
        assert_eq!(
            MetaService::mkdir(&backend, &ctx, InodeId::ROOT, "d", 0o755, 0).await,
            Err(FsError::AlreadyExists)
        );

        let (file, _) = backend
            .create(&ctx, dir, "f", 0o644, 0, libc::O_RDWR)
            .await
            .unwrap();
        assert_eq!(backend.lookup(&ctx, dir, "f").await.unwrap().0, file);
        assert_eq!(backend.lookup(&ctx, dir, "..").await.unwrap().0, InodeId::ROOT);
        assert_eq!(backend.rmdir(&ctx, InodeId::ROOT, "d").await, Err(FsError::NotEmpty));
        assert_eq!(backend.calls("mkdir"), 2);
    }

    #[tokio::test]
    async fn test_trashed_parent_rejects_new_entries() {
        let backend = MemBackend::new();
        let ctx = OpContext::root();
        let dir = backend.mkdir_external("/a", 0o755).unwrap();

        assert_eq!(backend.trash("/a").unwrap(), dir);
        assert_eq!(backend.inode_of("/a"), Err(FsError::NotFound));
        assert_eq!(
            MetaService::mkdir(&backend, &ctx, dir, "b", 0o755, 0).await,
            Err(FsError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed_once() {
        let backend = MemBackend::new();
        let ctx = OpContext::root();
        backend.fail_next("get_attr", FsError::Io);

        assert_eq!(backend.get_attr(&ctx, InodeId::ROOT).await, Err(FsError::Io));
        assert!(backend.get_attr(&ctx, InodeId::ROOT).await.is_ok());
        assert_eq!(backend.calls("get_attr"), 2);
    }

    #[tokio::test]
    async fn test_writes_visible_after_flush() {
        let backend = MemBackend::new();
        let ctx = OpContext::root();
        let (inode, _) = backend
            .create(&ctx, InodeId::ROOT, "f", 0o644, 0, libc::O_RDWR)
            .await
            .unwrap();

        let mut writer = DataWriter::open(&backend, inode, 0).await.unwrap();
        writer.write(&ctx, 0, b"abc").await.unwrap();
        assert_eq!(backend.content("/f").unwrap(), b"");
        writer.flush(&ctx).await.unwrap();
        assert_eq!(backend.content("/f").unwrap(), b"abc");
        writer.close(&ctx).await.unwrap();
        assert_eq!(backend.open_write_sessions(), 0);
    }
}

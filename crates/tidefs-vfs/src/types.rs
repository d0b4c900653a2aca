//! Value types shared between the VFS layer and its backends.

use std::fmt;
use std::time::SystemTime;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Opaque inode identifier allocated by the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InodeId(u64);

impl InodeId {
    /// The filesystem root.
    pub const ROOT: Self = Self(1);

    /// Root of the trash namespace that deleted entries are moved into.
    pub const TRASH: Self = Self(0x7FFF_FFFF_1000_0000);

    /// Wraps a raw inode number.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw inode number.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Fifo,
    BlockDevice,
    CharDevice,
    Socket,
}

impl FileKind {
    /// The `S_IFMT` bits for this type.
    pub fn type_bits(self) -> u32 {
        let bits = match self {
            Self::File => libc::S_IFREG,
            Self::Directory => libc::S_IFDIR,
            Self::Symlink => libc::S_IFLNK,
            Self::Fifo => libc::S_IFIFO,
            Self::BlockDevice => libc::S_IFBLK,
            Self::CharDevice => libc::S_IFCHR,
            Self::Socket => libc::S_IFSOCK,
        };
        u32::from(bits)
    }
}

/// Attribute snapshot copied out of the metadata service.
///
/// Every holder owns its own copy. Nothing here is shared or updated in place
/// once it leaves the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub kind: FileKind,
    /// Permission bits including setuid/setgid/sticky (`0o7777`).
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub nlink: u32,
    /// Length in bytes.
    pub length: u64,
    pub rdev: u32,
    /// Parent directory, when the backend tracks a single parent.
    pub parent: InodeId,
    /// An access ACL is attached.
    pub access_acl: bool,
    /// A default ACL is attached (directories only).
    pub default_acl: bool,
}

impl Attr {
    /// Blank attributes for a new object of `kind`.
    pub fn new(kind: FileKind, mode: u16) -> Self {
        Self {
            kind,
            mode: mode & 0o7777,
            uid: 0,
            gid: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
            nlink: 1,
            length: 0,
            rdev: 0,
            parent: InodeId::ROOT,
            access_acl: false,
            default_acl: false,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Mode including the file type bits, as `st_mode` reports it.
    pub fn st_mode(&self) -> u32 {
        self.kind.type_bits() | u32::from(self.mode)
    }
}

/// A directory listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeId,
    pub name: String,
    pub attr: Attr,
}

/// Recursive usage of a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Sum of file lengths.
    pub length: u64,
    /// Sum of allocated sizes.
    pub size: u64,
    pub files: u64,
    pub dirs: u64,
}

/// Filesystem capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFs {
    pub total_space: u64,
    pub avail_space: u64,
    pub used_inodes: u64,
    pub avail_inodes: u64,
}

bitflags! {
    /// Access request bits, matching the `rwx` triplet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMask: u8 {
        const READ = 4;
        const WRITE = 2;
        const EXECUTE = 1;
    }
}

impl AccessMask {
    /// Open flags for a handle opened with this mask.
    pub fn open_flags(self) -> i32 {
        if self.contains(Self::WRITE) {
            if self.contains(Self::READ) {
                libc::O_RDWR
            } else {
                libc::O_WRONLY
            }
        } else {
            libc::O_RDONLY
        }
    }
}

bitflags! {
    /// Which fields of a `set_attr` call are meaningful.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SetAttrMask: u16 {
        const MODE = 1 << 0;
        const UID = 1 << 1;
        const GID = 1 << 2;
        const SIZE = 1 << 3;
        const ATIME = 1 << 4;
        const MTIME = 1 << 5;
        const CTIME = 1 << 6;
        const ATIME_NOW = 1 << 7;
        const MTIME_NOW = 1 << 8;
    }
}

bitflags! {
    /// Flags for `rename`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct RenameFlags: u32 {
        /// Fail with `AlreadyExists` if the destination exists.
        const NOREPLACE = 1 << 0;
        /// Atomically swap source and destination.
        const EXCHANGE = 1 << 1;
    }
}

bitflags! {
    /// Flags for `set_xattr`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct XattrFlags: u32 {
        /// Fail if the attribute exists.
        const CREATE = 1;
        /// Fail if the attribute is missing.
        const REPLACE = 2;
    }
}

/// Which ACL of an inode is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AclType {
    /// Permissions checked on access.
    Access,
    /// Inherited by children created in a directory.
    Default,
}

/// One named user or group entry of an ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    pub id: u32,
    pub perm: u16,
}

/// A POSIX ACL.
///
/// Unset classes hold [`AclRule::UNSET`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclRule {
    pub owner: u16,
    pub group: u16,
    pub mask: u16,
    pub other: u16,
    pub named_users: Vec<AclEntry>,
    pub named_groups: Vec<AclEntry>,
}

impl AclRule {
    /// Marker for a class that carries no permission bits.
    pub const UNSET: u16 = 0xFFFF;

    /// A rule with every class unset and no named entries.
    pub fn empty() -> Self {
        Self {
            owner: Self::UNSET,
            group: Self::UNSET,
            mask: Self::UNSET,
            other: Self::UNSET,
            named_users: Vec::new(),
            named_groups: Vec::new(),
        }
    }

    /// True when the rule carries nothing, which asks the backend to drop it.
    pub fn is_empty(&self) -> bool {
        self.named_users.is_empty()
            && self.named_groups.is_empty()
            && self.owner == Self::UNSET
            && self.group == Self::UNSET
            && self.mask == Self::UNSET
            && self.other == Self::UNSET
    }

    /// True when only the owner/group/other classes are present.
    pub fn is_minimal(&self) -> bool {
        self.named_users.is_empty() && self.named_groups.is_empty() && self.mask == Self::UNSET
    }
}

impl Default for AclRule {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mask_open_flags() {
        assert_eq!(AccessMask::READ.open_flags(), libc::O_RDONLY);
        assert_eq!(AccessMask::WRITE.open_flags(), libc::O_WRONLY);
        assert_eq!((AccessMask::READ | AccessMask::WRITE).open_flags(), libc::O_RDWR);
        assert_eq!(AccessMask::empty().open_flags(), libc::O_RDONLY);
    }

    #[test]
    fn test_empty_acl_rule() {
        let rule = AclRule::empty();
        assert!(rule.is_empty());

        let mut named = AclRule::empty();
        named.named_users.push(AclEntry { id: 1000, perm: 0o6 });
        assert!(!named.is_empty());
        assert!(!named.is_minimal());
    }

    #[test]
    fn test_st_mode_includes_type_bits() {
        let attr = Attr::new(FileKind::Directory, 0o40755);
        assert_eq!(attr.mode, 0o755);
        assert_eq!(attr.st_mode(), u32::from(libc::S_IFDIR) | 0o755);
    }
}

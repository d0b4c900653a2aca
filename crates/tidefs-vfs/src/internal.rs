//! Reserved control files directly under the root.
//!
//! These names resolve to synthetic inodes above [`MIN_INTERNAL_INODE`]
//! without consulting the metadata service. Adapters serve their content.

use std::sync::LazyLock;
use std::time::SystemTime;

use nix::unistd::{getgid, getuid};

use crate::types::{Attr, FileKind, InodeId};

/// Base of the reserved inode numbers.
pub const MIN_INTERNAL_INODE: u64 = 0x7F_FFFF_FFFF_FFF0;

static CREATED: LazyLock<SystemTime> = LazyLock::new(SystemTime::now);

/// A reserved control file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalNode {
    AccessLog,
    Control,
    Stats,
    Config,
}

impl InternalNode {
    pub const ALL: [Self; 4] = [Self::AccessLog, Self::Control, Self::Stats, Self::Config];

    pub fn name(self) -> &'static str {
        match self {
            Self::AccessLog => ".accesslog",
            Self::Control => ".control",
            Self::Stats => ".stats",
            Self::Config => ".config",
        }
    }

    pub fn inode(self) -> InodeId {
        let offset = match self {
            Self::AccessLog => 1,
            Self::Control => 2,
            Self::Stats => 3,
            Self::Config => 4,
        };
        InodeId::new(MIN_INTERNAL_INODE + offset)
    }

    fn mode(self) -> u16 {
        match self {
            Self::AccessLog | Self::Config => 0o400,
            Self::Control => 0o666,
            Self::Stats => 0o444,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        if !name.starts_with('.') {
            return None;
        }
        Self::ALL.into_iter().find(|node| node.name() == name)
    }

    pub fn from_inode(inode: InodeId) -> Option<Self> {
        Self::ALL.into_iter().find(|node| node.inode() == inode)
    }

    /// Attributes of the node, owned by the current process.
    pub fn attr(self) -> Attr {
        let created = *CREATED;
        let mut attr = Attr::new(FileKind::File, self.mode());
        attr.uid = getuid().as_raw();
        attr.gid = getgid().as_raw();
        attr.atime = created;
        attr.mtime = created;
        attr.ctime = created;
        attr
    }
}

/// True for the inode of a reserved control file.
pub fn is_internal(inode: InodeId) -> bool {
    InternalNode::from_inode(inode).is_some()
}

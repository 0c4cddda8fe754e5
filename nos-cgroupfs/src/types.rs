//! Node kinds, modes, credentials and attributes for the cgroup file system

extern crate alloc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::time::Timespec;

/// Largest link count a node may reach
pub const MAX_LINK: u32 = 32767;

/// File type of a node as seen by the dispatch layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

/// cgroup node kind
///
/// The discriminant is the tag stored in the high byte of the inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CgrpNodeType {
    /// Regular file not (yet) bound to a subsystem knob
    Plain = 0,
    CgroupDir = 1,
    Procs = 2,
    Tasks = 3,
    CloneChildren = 4,
    CpusetCpus = 5,
    MemoryUsageInBytes = 6,
}

impl CgrpNodeType {
    pub fn is_dir(&self) -> bool {
        matches!(self, CgrpNodeType::CgroupDir)
    }

    pub fn is_pseudo_file(&self) -> bool {
        !matches!(self, CgrpNodeType::Plain | CgrpNodeType::CgroupDir)
    }
}

/// Compute the inode number of a cgroup node.
///
/// Layout is `00000000AABBBBBB`: `AA` is the node kind, `BBBBBB` the low 24
/// bits of the owning cgroup's node id.
pub fn inode_number(kind: CgrpNodeType, id: u64) -> u64 {
    ((kind as u64) << 24) | (id & 0xff_ffff)
}

/// File mode/permissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFDIR: u32 = 0o040000;

    pub fn new(mode: u32) -> Self {
        Self(mode)
    }

    /// Build a mode from a file type and permission bits (MAKEIMODE)
    pub fn make(file_type: FileType, perms: u32) -> Self {
        let ty = match file_type {
            FileType::Regular => Self::S_IFREG,
            FileType::Directory => Self::S_IFDIR,
        };
        Self(ty | (perms & 0o7777))
    }

    pub fn file_type(&self) -> FileType {
        match self.0 & Self::S_IFMT {
            Self::S_IFDIR => FileType::Directory,
            _ => FileType::Regular,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.0 & Self::S_IFMT == Self::S_IFDIR
    }

    pub fn permissions(&self) -> u32 {
        self.0 & 0o777
    }
}

bitflags! {
    /// Requested access, expressed in owner bit positions (VREAD/VWRITE/VEXEC)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: u32 {
        const READ = 0o400;
        const WRITE = 0o200;
        const EXEC = 0o100;
    }
}

/// Caller credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups
    pub groups: Vec<u32>,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: Vec::new(),
        }
    }

    /// Superuser credentials
    pub fn root() -> Self {
        Self::new(0, 0)
    }

    pub fn with_groups(mut self, groups: &[u32]) -> Self {
        self.groups.extend_from_slice(groups);
        self
    }

    pub fn is_member(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    pub fn is_privileged(&self) -> bool {
        self.uid == 0
    }
}

/// Attributes supplied when a node is created (vattr equivalent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub file_type: FileType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Explicit access time, if set by the caller
    pub atime: Option<Timespec>,
    /// Explicit modification time, if set by the caller
    pub mtime: Option<Timespec>,
}

impl NodeAttr {
    pub fn file(mode: u32) -> Self {
        Self {
            file_type: FileType::Regular,
            mode,
            uid: 0,
            gid: 0,
            atime: None,
            mtime: None,
        }
    }

    pub fn dir(mode: u32) -> Self {
        Self {
            file_type: FileType::Directory,
            ..Self::file(mode)
        }
    }

    pub fn with_times(mut self, atime: Option<Timespec>, mtime: Option<Timespec>) -> Self {
        self.atime = atime;
        self.mtime = mtime;
        self
    }
}

/// File attributes (stat structure equivalent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: u64,
    pub dev: u64,
    pub kind: CgrpNodeType,
    pub mode: FileMode,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// Process-wide identity of a node, used to seed the name hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

static NEXT_NODE_KEY: AtomicU64 = AtomicU64::new(1);

impl NodeKey {
    pub(crate) fn next() -> Self {
        NodeKey(NEXT_NODE_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

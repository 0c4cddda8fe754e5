//! cgroup nodes
//!
//! A node is a cgroup directory or one of its pseudo-files. Each node carries
//! two independent locks:
//!
//! - `state`: reader/writer lock over the node's type, attributes and
//!   directory list. Structural directory operations hold it as writer.
//! - `links`: mutex over the link count and ctime only. It is always the
//!   innermost node lock, so link bookkeeping can happen without the writer.
//!
//! Across nodes, locks are taken ancestor before descendant.

extern crate alloc;
use alloc::sync::{Arc, Weak};
use core::fmt;

use crate::dirent::DirList;
use crate::error::{CgrpError, CgrpResult};
use crate::mount::CgrpMount;
use crate::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use crate::time::Timespec;
use crate::types::{
    inode_number, AccessMode, CgrpNodeType, Credentials, FileAttr, FileMode, NodeAttr, NodeKey,
};

/// Shift between the owner, group and other permission triplets
const MODESHIFT: u32 = 3;

/// Attributes and directory shape, guarded by the node's reader/writer lock
#[derive(Debug)]
pub struct NodeState {
    pub kind: CgrpNodeType,
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    /// Bytes charged for directory entries
    pub size: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ino: u64,
    /// Entry list; empty for pseudo-files and truncated directories
    pub dir: DirList<Arc<CgrpNode>>,
}

impl NodeState {
    /// Change the node's kind and inode number
    pub fn retag(&mut self, kind: CgrpNodeType, ino: u64) {
        self.kind = kind;
        self.ino = ino;
    }
}

/// Link count and change time, guarded by the node's link lock
#[derive(Debug, Clone, Copy)]
pub struct LinkState {
    pub nlink: u32,
    pub ctime: Timespec,
}

/// A cgroup file system node
pub struct CgrpNode {
    key: NodeKey,
    nodeid: u64,
    fsid: u64,
    mount: Weak<CgrpMount>,
    state: RwLock<NodeState>,
    links: Mutex<LinkState>,
}

impl CgrpNode {
    /// Initialize a node with one link.
    ///
    /// Ownership is taken from `cred` when present, otherwise from `attr`.
    pub(crate) fn new(
        mount: Weak<CgrpMount>,
        fsid: u64,
        nodeid: u64,
        attr: &NodeAttr,
        cred: Option<&Credentials>,
        now: Timespec,
    ) -> Arc<Self> {
        let (uid, gid) = match cred {
            Some(c) => (c.uid, c.gid),
            None => (attr.uid, attr.gid),
        };
        Arc::new(Self {
            key: NodeKey::next(),
            nodeid,
            fsid,
            mount,
            state: RwLock::new(NodeState {
                kind: CgrpNodeType::Plain,
                mode: FileMode::make(attr.file_type, attr.mode),
                uid,
                gid,
                size: 0,
                atime: now,
                mtime: now,
                ino: inode_number(CgrpNodeType::Plain, nodeid),
                dir: DirList::new(),
            }),
            links: Mutex::new(LinkState { nlink: 1, ctime: now }),
        })
    }

    /// Identity used by the name index
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Per-mount generation number of this node
    pub fn nodeid(&self) -> u64 {
        self.nodeid
    }

    /// Device id of the owning mount
    pub fn fsid(&self) -> u64 {
        self.fsid
    }

    pub fn mount(&self) -> Option<Arc<CgrpMount>> {
        self.mount.upgrade()
    }

    /// Does this node belong to `mnt`?
    pub fn is_on(&self, mnt: &CgrpMount) -> bool {
        core::ptr::eq(self.mount.as_ptr(), mnt)
    }

    /// Do both nodes belong to the same mount?
    pub fn same_mount(&self, other: &CgrpNode) -> bool {
        Weak::ptr_eq(&self.mount, &other.mount)
    }

    /// Take the shape lock as reader.
    ///
    /// The calling thread must not hold this node's writer.
    pub fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read()
    }

    /// Take the shape lock as writer
    pub fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write()
    }

    /// Take the link-count lock
    pub fn links(&self) -> MutexGuard<'_, LinkState> {
        self.links.lock()
    }

    pub fn nlink(&self) -> u32 {
        self.links.lock().nlink
    }

    pub fn ctime(&self) -> Timespec {
        self.links.lock().ctime
    }

    pub fn kind(&self) -> CgrpNodeType {
        self.state.read().kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Add a link and stamp ctime
    pub(crate) fn incr_link(&self, now: Timespec) {
        let mut l = self.links.lock();
        l.nlink += 1;
        l.ctime = now;
    }

    /// Drop a link
    pub(crate) fn decr_link(&self) {
        let mut l = self.links.lock();
        debug_assert!(l.nlink > 0, "cgrp node {}: link count underflow", self.nodeid);
        l.nlink = l.nlink.saturating_sub(1);
    }

    pub(crate) fn touch_ctime(&self, now: Timespec) {
        self.links.lock().ctime = now;
    }

    /// Snapshot of the node's attributes
    pub fn getattr(&self) -> FileAttr {
        let state = self.state.read();
        let links = *self.links.lock();
        FileAttr {
            ino: state.ino,
            dev: self.fsid,
            kind: state.kind,
            mode: state.mode,
            nlink: links.nlink,
            uid: state.uid,
            gid: state.gid,
            size: state.size,
            atime: state.atime,
            mtime: state.mtime,
            ctime: links.ctime,
        }
    }
}

impl fmt::Debug for CgrpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CgrpNode")
            .field("key", &self.key)
            .field("nodeid", &self.nodeid)
            .field("fsid", &self.fsid)
            .finish()
    }
}

impl Drop for CgrpNode {
    fn drop(&mut self) {
        log::trace!("cgrp node {}: released", self.nodeid);
        if let Some(mnt) = self.mount.upgrade() {
            mnt.forget_node(self.nodeid);
        }
    }
}

/// Check `mode` access to a node for `cred`.
///
/// The owner triplet applies when the uid matches, the group triplet when
/// the caller is a member of the node's group, the other triplet otherwise.
/// Privileged callers may read and write anything, and execute directories
/// or files with at least one execute bit.
pub fn check_access(state: &NodeState, mode: AccessMode, cred: &Credentials) -> CgrpResult<()> {
    let mut shift = 0;
    if cred.uid != state.uid {
        shift += MODESHIFT;
        if !cred.is_member(state.gid) {
            shift += MODESHIFT;
        }
    }

    let granted = (state.mode.0 << shift) & AccessMode::all().bits();
    let missing = mode.bits() & !granted;
    if missing == 0 {
        return Ok(());
    }

    if cred.is_privileged() {
        let exec_ok = missing & AccessMode::EXEC.bits() == 0
            || state.mode.is_dir()
            || state.mode.0 & 0o111 != 0;
        if exec_ok {
            return Ok(());
        }
    }
    Err(CgrpError::PermissionDenied)
}

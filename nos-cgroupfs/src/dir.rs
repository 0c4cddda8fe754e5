//! Directory operations for the cgroup file system
//!
//! These routines keep a directory's entry list and the name index in step.
//! Callers hold the directory's writer for everything except `dir_lookup`,
//! and pass the guarded state in explicitly.

extern crate alloc;
use alloc::{string::String, sync::Arc, vec::Vec};

use crate::dirent::entry_size;
use crate::error::{CgrpError, CgrpResult};
use crate::hash::NodeHold;
use crate::mount::CgrpMount;
use crate::node::{check_access, CgrpNode, NodeState};
use crate::subsys::pseudo_files;
use crate::time::Timespec;
use crate::types::{
    inode_number, AccessMode, CgrpNodeType, Credentials, FileMode, FileType, NodeAttr, MAX_LINK,
};

/// Directory entry for readdir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub file_type: FileType,
    /// Cursor value of this entry
    pub offset: u64,
}

/// Entry creation operation
#[derive(Debug, Clone, Copy)]
pub enum DirOp<'a> {
    Create,
    Mkdir,
    /// Bind an existing node under a new name
    Rename(&'a Arc<CgrpNode>),
}

impl DirOp<'_> {
    fn makes_node(&self) -> bool {
        matches!(self, DirOp::Create | DirOp::Mkdir)
    }
}

/// Entry removal operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelOp {
    Remove,
    Rmdir,
}

/// Resolve `name` in `parent`.
///
/// An empty name resolves to `parent` itself. The returned handle is taken
/// under the index stripe lock, so it stays valid after a concurrent delete.
pub fn dir_lookup(
    mnt: &CgrpMount,
    parent: &Arc<CgrpNode>,
    name: &str,
    cred: &Credentials,
) -> CgrpResult<Arc<CgrpNode>> {
    let state = parent.read();
    if !state.kind.is_dir() {
        return Err(CgrpError::NotDirectory);
    }
    check_access(&state, AccessMode::EXEC, cred)?;

    if name.is_empty() {
        return Ok(parent.clone());
    }

    mnt.index()
        .lookup(name, parent.key(), NodeHold::Hold)
        .and_then(|hit| hit.held)
        .ok_or(CgrpError::NotFound)
}

/// Enter `name` into directory `dir`.
///
/// `state` is the guarded state of `dir`, whose writer the caller holds.
/// Creation ops allocate a new node; `DirOp::Rename` binds the given node and
/// takes a link on it. Without credentials the write check on `dir` is
/// skipped, which is how pseudo-files are created.
///
/// # Panics
///
/// Panics if `name` is empty.
pub fn dir_enter(
    mnt: &CgrpMount,
    dir: &Arc<CgrpNode>,
    state: &mut NodeState,
    name: &str,
    op: DirOp<'_>,
    attr: &NodeAttr,
    cred: Option<&Credentials>,
) -> CgrpResult<Arc<CgrpNode>> {
    debug_assert!(state.kind.is_dir());

    if name.contains('/') {
        return Err(CgrpError::PermissionDenied);
    }
    assert!(!name.is_empty(), "cgrp dir_enter: empty name");

    if let DirOp::Rename(src) = op {
        // The source may have been unlinked while it was unlocked.
        let _src_state = src.write();
        let mut links = src.links();
        if links.nlink == 0 {
            return Err(CgrpError::NotFound);
        }
        if links.nlink == MAX_LINK {
            return Err(CgrpError::TooManyLinks);
        }
        links.nlink += 1;
        links.ctime = mnt.now();
    }

    let res = enter_locked(mnt, dir, state, name, op, attr, cred);

    if let (Err(e), DirOp::Rename(src)) = (&res, op) {
        log::debug!("cgrp dir_enter: rename to {} failed ({}), dropping link", name, e);
        src.decr_link();
        src.touch_ctime(mnt.now());
    }
    res
}

fn enter_locked(
    mnt: &CgrpMount,
    dir: &Arc<CgrpNode>,
    state: &mut NodeState,
    name: &str,
    op: DirOp<'_>,
    attr: &NodeAttr,
    cred: Option<&Credentials>,
) -> CgrpResult<Arc<CgrpNode>> {
    // Removed directory still referenced by a caller
    if dir.nlink() == 0 {
        return Err(CgrpError::NotFound);
    }

    if mnt.index().lookup(name, dir.key(), NodeHold::Hold).is_some() {
        return Err(CgrpError::AlreadyExists);
    }

    if let Some(cred) = cred {
        check_access(state, AccessMode::WRITE, cred)?;
    }

    let node = match op {
        DirOp::Create | DirOp::Mkdir => dir_make_node(mnt, dir, attr, op, cred)?,
        DirOp::Rename(src) => src.clone(),
    };

    if let Err(e) = dir_add_entry(mnt, dir, state, &node, name) {
        if op.makes_node() {
            log::warn!("cgrp dir_enter: unmaking node {} ({})", node.nodeid(), e);
            unmake_node(mnt, &node);
        }
        return Err(e);
    }
    Ok(node)
}

/// Delete entry `name`, bound to `node`, from directory `dir`.
///
/// The caller holds the writers of both `dir` and `node` and passes their
/// guarded states. `DelOp::Rmdir` first removes every entry of `node` other
/// than "." and "..", then truncates `node` once its entry is gone.
///
/// # Panics
///
/// Panics if `name` is empty.
#[allow(clippy::too_many_arguments)]
pub fn dir_delete(
    mnt: &CgrpMount,
    dir: &Arc<CgrpNode>,
    dstate: &mut NodeState,
    node: &Arc<CgrpNode>,
    nstate: &mut NodeState,
    name: &str,
    op: DelOp,
    cred: &Credentials,
) -> CgrpResult<()> {
    assert!(!name.is_empty(), "cgrp dir_delete: empty name for node {}", node.nodeid());

    match name {
        "." => return Err(CgrpError::InvalidArgument),
        ".." => return Err(CgrpError::AlreadyExists),
        _ => {}
    }

    check_access(dstate, AccessMode::EXEC | AccessMode::WRITE, cred)?;

    if !dstate.dir.is_live() {
        return Err(CgrpError::NotFound);
    }
    if !node.same_mount(dir) {
        return Err(CgrpError::BadFileDescriptor);
    }

    if op == DelOp::Rmdir {
        debug_assert!(nstate.kind.is_dir());
        let children: Vec<(Arc<str>, Arc<CgrpNode>)> = nstate
            .dir
            .iter()
            .filter(|(_, s)| &*s.name != "." && &*s.name != "..")
            .map(|(_, s)| (s.name.clone(), s.node.clone()))
            .collect();

        for (child_name, child) in children {
            let mut cstate = child.write();
            if let Err(e) = dir_delete(
                mnt,
                node,
                nstate,
                &child,
                &mut cstate,
                &child_name,
                DelOp::Remove,
                cred,
            ) {
                log::warn!(
                    "cgrp dir_delete: failed to remove {} from node {}: {}",
                    child_name,
                    node.nodeid(),
                    e
                );
            }
        }
    }

    // Entry gone, or rebound by a concurrent rename
    let hit = mnt
        .index()
        .lookup(name, dir.key(), NodeHold::NoHold)
        .ok_or(CgrpError::NotFound)?;
    if !hit.binds(node) {
        return Err(CgrpError::NotFound);
    }

    let hash = match dstate.dir.get(hit.slot) {
        Some(slot) => slot.hash,
        None => return Err(CgrpError::NotFound),
    };
    mnt.index().remove(hash, dir.key(), hit.slot);
    let entry = dstate.dir.unlink(hit.slot);
    dstate.size -= entry_size(&entry.name);

    let now = mnt.now();
    dstate.mtime = now;
    dir.touch_ctime(now);
    node.touch_ctime(now);

    node.decr_link();
    if op == DelOp::Rmdir && nstate.kind.is_dir() {
        dir_trunc(mnt, node, nstate);
        debug_assert_eq!(node.nlink(), 0);
    }
    log::debug!("cgrp dir_delete: {} removed from node {}", name, dir.nodeid());
    Ok(())
}

/// Install "." and ".." in `dir` and populate its pseudo-files.
///
/// `state` is the guarded state of `dir`. The caller also holds the writer
/// of `parent`, which is `dir` itself for the mount root. Pseudo-files are
/// owned by the directory's owner and skip permission checks.
pub fn dir_init(
    mnt: &CgrpMount,
    parent: &Arc<CgrpNode>,
    dir: &Arc<CgrpNode>,
    state: &mut NodeState,
) -> CgrpResult<()> {
    debug_assert!(state.kind.is_dir());

    let (dot, dotdot) = state.dir.install_dots(dir.clone(), parent.clone())?;
    let index = mnt.index();
    for (id, target) in [(dot, dir), (dotdot, parent)] {
        let name = match state.dir.get(id) {
            Some(slot) => slot.name.clone(),
            None => unreachable!("cgrp dir_init: dot entries missing"),
        };
        let hash = index.insert(dir.key(), name, id, Arc::downgrade(target));
        state.dir.set_hash(id, hash);
    }

    let now = mnt.now();
    state.mtime = now;
    parent.incr_link(now);

    state.size = entry_size(".") + entry_size("..");
    {
        let mut links = dir.links();
        links.nlink = 2;
        links.ctime = now;
    }

    let attr = NodeAttr {
        uid: state.uid,
        gid: state.gid,
        ..NodeAttr::file(0o644)
    };
    for pf in pseudo_files(mnt.subsystem()) {
        let file = dir_enter(mnt, dir, state, pf.name, DirOp::Create, &attr, None)?;
        file.write().retag(pf.kind, inode_number(pf.kind, dir.nodeid()));
    }
    log::debug!(
        "cgrp dir_init: node {} initialized with {} entries",
        dir.nodeid(),
        state.dir.len()
    );
    Ok(())
}

/// Remove every entry of `dir`, dropping one link on each target.
pub fn dir_trunc(mnt: &CgrpMount, dir: &CgrpNode, state: &mut NodeState) {
    let index = mnt.index();
    while let Some((id, entry)) = state.dir.pop_front() {
        entry.node.decr_link();
        index.remove(entry.hash, dir.key(), id);
        state.size -= entry_size(&entry.name);
    }

    let now = mnt.now();
    state.mtime = now;
    dir.touch_ctime(now);

    debug_assert!(state.dir.is_empty());
    debug_assert_eq!(state.size, 0);
}

/// Offset-ordered entries of `dir` starting at `cursor`
pub fn dir_read(dir: &CgrpNode, cursor: u64) -> CgrpResult<Vec<DirEntry>> {
    let entries: Vec<(String, u64, Arc<CgrpNode>)> = {
        let state = dir.read();
        if !state.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }
        state
            .dir
            .iter()
            .filter(|(_, s)| s.offset >= cursor)
            .map(|(_, s)| (String::from(&*s.name), s.offset, s.node.clone()))
            .collect()
    };

    // Targets are read after the directory lock is dropped: ".." is an
    // ancestor and must not be locked under a descendant.
    Ok(entries
        .into_iter()
        .map(|(name, offset, node)| {
            let state = node.read();
            DirEntry {
                name,
                ino: state.ino,
                file_type: state.mode.file_type(),
                offset,
            }
        })
        .collect())
}

/// Link `node` into `dir` as `name`
fn dir_add_entry(
    mnt: &CgrpMount,
    dir: &Arc<CgrpNode>,
    state: &mut NodeState,
    node: &Arc<CgrpNode>,
    name: &str,
) -> CgrpResult<()> {
    // The directory was removed underneath the caller.
    if !state.dir.is_live() {
        return Err(CgrpError::NotFound);
    }
    if !node.same_mount(dir) {
        return Err(CgrpError::CrossDevice);
    }

    let name: Arc<str> = Arc::from(name);
    let size = entry_size(&name);
    let id = state.dir.insert(name.clone(), node.clone())?;
    let hash = mnt.index().insert(dir.key(), name, id, Arc::downgrade(node));
    state.dir.set_hash(id, hash);
    state.size += size;

    let now = mnt.now();
    state.mtime = now;
    dir.touch_ctime(now);
    Ok(())
}

/// Allocate a node for a create or mkdir under `parent`
fn dir_make_node(
    mnt: &CgrpMount,
    parent: &Arc<CgrpNode>,
    attr: &NodeAttr,
    op: DirOp<'_>,
    cred: Option<&Credentials>,
) -> CgrpResult<Arc<CgrpNode>> {
    let overflows = |t: Option<Timespec>| t.is_some_and(|t| t.overflows());
    if overflows(attr.atime) || overflows(attr.mtime) {
        return Err(CgrpError::Overflow);
    }

    let node = mnt.alloc_node(attr, cred);
    let res = {
        let mut state = node.write();
        if let Some(t) = attr.atime {
            state.atime = t;
        }
        if let Some(t) = attr.mtime {
            state.mtime = t;
        }
        match op {
            DirOp::Mkdir => {
                state.mode = FileMode::make(FileType::Directory, attr.mode);
                state.retag(
                    CgrpNodeType::CgroupDir,
                    inode_number(CgrpNodeType::CgroupDir, node.nodeid()),
                );
                dir_init(mnt, parent, &node, &mut state)
            }
            _ => Ok(()),
        }
    };

    if let Err(e) = res {
        log::warn!("cgrp dir_make_node: node {} init failed: {}", node.nodeid(), e);
        unmake_node(mnt, &node);
        return Err(e);
    }
    log::debug!("cgrp dir_make_node: node {} under {}", node.nodeid(), parent.nodeid());
    Ok(node)
}

/// Undo a node that never got linked into its parent
fn unmake_node(mnt: &CgrpMount, node: &Arc<CgrpNode>) {
    let mut state = node.write();
    if state.kind.is_dir() {
        dir_trunc(mnt, node, &mut state);
    }
    let mut links = node.links();
    links.nlink = 0;
    links.ctime = mnt.now();
}

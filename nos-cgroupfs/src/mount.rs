//! cgroup mount context
//!
//! A mount owns the root directory, the node-id generation counter and the
//! list of live nodes, and hands out the name index and clock used by the
//! directory operations. Its methods are the entry points used by the file
//! dispatch layer.

extern crate alloc;
use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};

use hashbrown::HashMap;

use crate::config::{IndexScope, MountConfig};
use crate::dir::{
    dir_delete, dir_enter, dir_init, dir_lookup, dir_read, dir_trunc, DelOp, DirEntry, DirOp,
};
use crate::error::{CgrpError, CgrpResult};
use crate::hash::{NameIndex, NodeHold};
use crate::node::{check_access, CgrpNode};
use crate::subsys::{num_pseudo_entries, SubsystemId};
use crate::sync::Mutex;
use crate::time::{Clock, Timespec};
use crate::types::{
    inode_number, AccessMode, CgrpNodeType, Credentials, FileAttr, FileType, NodeAttr,
};

/// Node id of the root directory; later nodes count up from here
const ROOT_NODEID: u64 = 1;

/// Node list, guarded by the mount's contents lock.
///
/// The lock is a leaf: nothing else is acquired while it is held, and no
/// node handle is dropped under it.
struct Contents {
    next_id: u64,
    nodes: HashMap<u64, Weak<CgrpNode>>,
}

/// A mounted cgroup file system
pub struct CgrpMount {
    dev: u64,
    subsystem: SubsystemId,
    root: Arc<CgrpNode>,
    index: Arc<NameIndex>,
    clock: Arc<dyn Clock>,
    contents: Mutex<Contents>,
    me: Weak<CgrpMount>,
}

fn is_dot(name: &str) -> bool {
    name == "." || name == ".."
}

impl CgrpMount {
    /// Mount with the default clock
    pub fn mount(config: MountConfig) -> CgrpResult<Arc<Self>> {
        #[cfg(feature = "std")]
        let clock: Arc<dyn Clock> = Arc::new(crate::time::SystemClock);
        #[cfg(not(feature = "std"))]
        let clock: Arc<dyn Clock> = Arc::new(crate::time::TickClock::new());
        Self::with_clock(config, clock)
    }

    /// Mount with an explicit time source
    pub fn with_clock(config: MountConfig, clock: Arc<dyn Clock>) -> CgrpResult<Arc<Self>> {
        config.validate()?;
        let index = match config.index {
            IndexScope::Global => NameIndex::global(),
            IndexScope::Private { buckets, stripes } => {
                Arc::new(NameIndex::with_geometry(buckets, stripes))
            }
        };

        let now = clock.now();
        let mnt = Arc::new_cyclic(|me: &Weak<CgrpMount>| {
            let attr = NodeAttr {
                uid: config.uid,
                gid: config.gid,
                ..NodeAttr::dir(config.root_mode)
            };
            let root = CgrpNode::new(me.clone(), config.dev, ROOT_NODEID, &attr, None, now);
            root.write().retag(
                CgrpNodeType::CgroupDir,
                inode_number(CgrpNodeType::CgroupDir, ROOT_NODEID),
            );

            let mut nodes = HashMap::new();
            nodes.insert(ROOT_NODEID, Arc::downgrade(&root));
            CgrpMount {
                dev: config.dev,
                subsystem: config.subsystem,
                root,
                index,
                clock,
                contents: Mutex::new(Contents {
                    next_id: ROOT_NODEID + 1,
                    nodes,
                }),
                me: me.clone(),
            }
        });

        {
            let root = mnt.root();
            let mut state = root.write();
            dir_init(&mnt, &root, &root, &mut state)?;
        }
        log::debug!(
            "cgroupfs: mounted {} on dev {} ({} nodes)",
            config.subsystem.name(),
            config.dev,
            mnt.node_count()
        );
        Ok(mnt)
    }

    pub fn root(&self) -> Arc<CgrpNode> {
        self.root.clone()
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn subsystem(&self) -> SubsystemId {
        self.subsystem
    }

    /// Name index used by this mount
    pub fn index(&self) -> &NameIndex {
        &self.index
    }

    pub(crate) fn now(&self) -> Timespec {
        self.clock.now()
    }

    /// Number of live nodes, root included
    pub fn node_count(&self) -> usize {
        self.contents.lock().nodes.len()
    }

    /// Allocate a node, assign it the next node id and add it to the list
    pub(crate) fn alloc_node(&self, attr: &NodeAttr, cred: Option<&Credentials>) -> Arc<CgrpNode> {
        let now = self.clock.now();
        let mut contents = self.contents.lock();
        let nodeid = contents.next_id;
        contents.next_id += 1;
        let node = CgrpNode::new(self.me.clone(), self.dev, nodeid, attr, cred, now);
        contents.nodes.insert(nodeid, Arc::downgrade(&node));
        node
    }

    /// Take a released node off the list
    pub(crate) fn forget_node(&self, nodeid: u64) {
        self.contents.lock().nodes.remove(&nodeid);
    }

    fn check_owner(&self, node: &CgrpNode) -> CgrpResult<()> {
        if node.is_on(self) {
            Ok(())
        } else {
            Err(CgrpError::BadFileDescriptor)
        }
    }

    /// Require `name` in `parent` to be bound to `node`.
    ///
    /// Called with the writer of `parent` held and before `node` is locked:
    /// a bound node is a child of `parent`, so locking it next keeps the
    /// ancestor-before-descendant order.
    fn check_bound(&self, parent: &CgrpNode, name: &str, node: &Arc<CgrpNode>) -> CgrpResult<()> {
        match self.index.lookup(name, parent.key(), NodeHold::NoHold) {
            Some(hit) if hit.binds(node) => Ok(()),
            _ => Err(CgrpError::NotFound),
        }
    }

    /// Resolve `name` in directory `parent`
    pub fn lookup(
        &self,
        parent: &Arc<CgrpNode>,
        name: &str,
        cred: &Credentials,
    ) -> CgrpResult<Arc<CgrpNode>> {
        self.check_owner(parent)?;
        dir_lookup(self, parent, name, cred)
    }

    /// Create a regular file `name` in `parent`
    pub fn create(
        &self,
        parent: &Arc<CgrpNode>,
        name: &str,
        attr: &NodeAttr,
        cred: &Credentials,
    ) -> CgrpResult<Arc<CgrpNode>> {
        self.enter_new(parent, name, DirOp::Create, FileType::Regular, attr, cred)
    }

    /// Create child group `name` in `parent`, populated with the subsystem's
    /// pseudo-files
    pub fn mkdir(
        &self,
        parent: &Arc<CgrpNode>,
        name: &str,
        attr: &NodeAttr,
        cred: &Credentials,
    ) -> CgrpResult<Arc<CgrpNode>> {
        self.enter_new(parent, name, DirOp::Mkdir, FileType::Directory, attr, cred)
    }

    fn enter_new(
        &self,
        parent: &Arc<CgrpNode>,
        name: &str,
        op: DirOp<'_>,
        file_type: FileType,
        attr: &NodeAttr,
        cred: &Credentials,
    ) -> CgrpResult<Arc<CgrpNode>> {
        self.check_owner(parent)?;
        let mut state = parent.write();
        if !state.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }
        let attr = NodeAttr { file_type, ..*attr };
        dir_enter(self, parent, &mut state, name, op, &attr, Some(cred))
    }

    /// Bind `node`, already linked in `parent`, under the additional name
    /// `name` in the same directory and return it.
    ///
    /// A node that has meanwhile been unlinked fails with `NotFound`. Nodes
    /// bound in other directories are rejected.
    pub fn rename(
        &self,
        parent: &Arc<CgrpNode>,
        name: &str,
        node: &Arc<CgrpNode>,
        cred: &Credentials,
    ) -> CgrpResult<Arc<CgrpNode>> {
        self.check_owner(parent)?;
        if Arc::ptr_eq(parent, node) {
            return Err(CgrpError::InvalidArgument);
        }

        let mut state = parent.write();
        if !state.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }
        let bound_here = state
            .dir
            .iter()
            .any(|(_, s)| !is_dot(&s.name) && Arc::ptr_eq(&s.node, node));
        if node.same_mount(parent) && node.nlink() > 0 && !bound_here {
            return Err(CgrpError::InvalidArgument);
        }

        let attr = NodeAttr::file(0);
        dir_enter(self, parent, &mut state, name, DirOp::Rename(node), &attr, Some(cred))
    }

    /// Rename entry `from` to `to` within `parent`.
    ///
    /// The destination name must not exist.
    pub fn rename_entry(
        &self,
        parent: &Arc<CgrpNode>,
        from: &str,
        to: &str,
        cred: &Credentials,
    ) -> CgrpResult<()> {
        self.check_owner(parent)?;
        if is_dot(from) || is_dot(to) {
            return Err(CgrpError::InvalidArgument);
        }

        let mut state = parent.write();
        if !state.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }
        check_access(&state, AccessMode::EXEC | AccessMode::WRITE, cred)?;

        let node = self
            .index
            .lookup(from, parent.key(), NodeHold::Hold)
            .and_then(|hit| hit.held)
            .ok_or(CgrpError::NotFound)?;
        if from == to {
            return Ok(());
        }

        let attr = NodeAttr::file(0);
        dir_enter(self, parent, &mut state, to, DirOp::Rename(&node), &attr, Some(cred))?;

        let mut nstate = node.write();
        if let Err(e) = dir_delete(
            self,
            parent,
            &mut state,
            &node,
            &mut nstate,
            from,
            DelOp::Remove,
            cred,
        ) {
            log::warn!("cgroupfs: rename {} -> {} failed to drop old name: {}", from, to, e);
            if let Err(e) =
                dir_delete(self, parent, &mut state, &node, &mut nstate, to, DelOp::Remove, cred)
            {
                log::warn!("cgroupfs: rename rollback of {} failed: {}", to, e);
            }
            return Err(e);
        }
        log::debug!("cgroupfs: renamed {} -> {} in node {}", from, to, parent.nodeid());
        Ok(())
    }

    /// Remove the non-directory entry `name`, bound to `node`, from `parent`
    pub fn remove(
        &self,
        parent: &Arc<CgrpNode>,
        node: &Arc<CgrpNode>,
        name: &str,
        cred: &Credentials,
    ) -> CgrpResult<()> {
        self.check_owner(parent)?;
        self.check_owner(node)?;
        match name {
            "." => return Err(CgrpError::InvalidArgument),
            ".." => return Err(CgrpError::AlreadyExists),
            _ => {}
        }
        if Arc::ptr_eq(parent, node) {
            return Err(CgrpError::InvalidArgument);
        }

        let mut pstate = parent.write();
        if !pstate.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }
        self.check_bound(parent, name, node)?;
        let mut nstate = node.write();
        if nstate.kind.is_dir() {
            return Err(CgrpError::IsDirectory);
        }
        dir_delete(self, parent, &mut pstate, node, &mut nstate, name, DelOp::Remove, cred)
    }

    /// Remove child group `name`, bound to `node`, from `parent` together
    /// with its pseudo-files
    pub fn rmdir(
        &self,
        parent: &Arc<CgrpNode>,
        node: &Arc<CgrpNode>,
        name: &str,
        cred: &Credentials,
    ) -> CgrpResult<()> {
        self.check_owner(parent)?;
        self.check_owner(node)?;
        match name {
            "." => return Err(CgrpError::InvalidArgument),
            ".." => return Err(CgrpError::AlreadyExists),
            _ => {}
        }
        if Arc::ptr_eq(node, &self.root) {
            return Err(CgrpError::Busy);
        }
        if Arc::ptr_eq(parent, node) {
            return Err(CgrpError::InvalidArgument);
        }

        let mut pstate = parent.write();
        if !pstate.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }
        self.check_bound(parent, name, node)?;
        let mut nstate = node.write();
        if !nstate.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }

        let max_entries = num_pseudo_entries(self.subsystem) + 2;
        let has_groups = nstate
            .dir
            .iter()
            .any(|(_, s)| !is_dot(&s.name) && s.node.is_dir());
        if nstate.dir.len() as usize > max_entries || has_groups {
            return Err(CgrpError::NotEmpty);
        }
        dir_delete(self, parent, &mut pstate, node, &mut nstate, name, DelOp::Rmdir, cred)
    }

    /// Remove every entry of directory `dir`
    pub fn truncate(&self, dir: &Arc<CgrpNode>) -> CgrpResult<()> {
        self.check_owner(dir)?;
        let mut state = dir.write();
        if !state.kind.is_dir() {
            return Err(CgrpError::NotDirectory);
        }
        dir_trunc(self, dir, &mut state);
        Ok(())
    }

    /// Check `mode` access to `node` for `cred`
    pub fn access(&self, node: &CgrpNode, mode: AccessMode, cred: &Credentials) -> CgrpResult<()> {
        self.check_owner(node)?;
        check_access(&node.read(), mode, cred)
    }

    /// Entries of `dir` whose offset is at least `cursor`
    pub fn readdir(&self, dir: &Arc<CgrpNode>, cursor: u64) -> CgrpResult<Vec<DirEntry>> {
        self.check_owner(dir)?;
        dir_read(dir, cursor)
    }

    pub fn getattr(&self, node: &CgrpNode) -> CgrpResult<FileAttr> {
        self.check_owner(node)?;
        Ok(node.getattr())
    }

    /// Tear the tree down: every directory is truncated, which drops the
    /// entries that keep nodes alive and clears them from the name index.
    pub fn unmount(&self) {
        log::debug!("cgroupfs: unmounting dev {}", self.dev);
        self.teardown();
    }

    fn teardown(&self) {
        let nodes: Vec<Arc<CgrpNode>> = {
            let contents = self.contents.lock();
            contents.nodes.values().filter_map(Weak::upgrade).collect()
        };
        for node in &nodes {
            let mut state = node.write();
            if state.kind.is_dir() && state.dir.is_live() {
                dir_trunc(self, node, &mut state);
            }
        }
    }
}

impl Drop for CgrpMount {
    fn drop(&mut self) {
        self.teardown();
    }
}

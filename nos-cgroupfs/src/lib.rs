//! NOS cgroupfs - directory and node management for the cgroup file system
//!
//! An in-memory pseudo file system in which every directory is a control
//! group and holds a fixed set of pseudo-files for its mount's subsystem,
//! plus one subdirectory per child group.
//!
//! # Architecture
//!
//! - **hash**: lock-striped name index mapping (parent, name) to an entry
//! - **dirent**: per-directory entry list with stable readdir offsets
//! - **node**: cgroup nodes, their two locks and access checks
//! - **dir**: lookup, enter, delete, init and truncate on directories
//! - **mount**: mount context and the operations used by the file layer
//!
//! # Locking
//!
//! Node locks are taken ancestor before descendant. Within a node the shape
//! lock (reader/writer) comes before the link-count mutex. Name index stripe
//! locks and the mount's node list lock are leaves.
//!
//! # Usage
//!
//! ```rust
//! use nos_cgroupfs::{CgrpMount, Credentials, MountConfig, NodeAttr};
//!
//! let mnt = CgrpMount::mount(MountConfig::from_options("cpuset")?)?;
//! let root = mnt.root();
//! let cred = Credentials::root();
//!
//! let group = mnt.mkdir(&root, "web", &NodeAttr::dir(0o755), &cred)?;
//! let cpus = mnt.lookup(&group, "cpuset.cpus", &cred)?;
//! assert_eq!(cpus.nlink(), 1);
//!
//! mnt.rmdir(&root, &group, "web", &cred)?;
//! assert_eq!(group.nlink(), 0);
//! # Ok::<(), nos_cgroupfs::CgrpError>(())
//! ```

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod dir;
pub mod dirent;
pub mod error;
pub mod hash;
pub mod mount;
pub mod node;
pub mod subsys;
pub mod sync;
pub mod time;
pub mod types;

pub use config::{IndexScope, MountConfig};
pub use dir::{DelOp, DirEntry, DirOp};
pub use error::{CgrpError, CgrpResult};
pub use hash::{NameIndex, NodeHold, CG_HASH_SIZE, CG_MUTEX_SIZE};
pub use mount::CgrpMount;
pub use node::CgrpNode;
pub use subsys::{num_pseudo_entries, SubsystemId};
pub use time::{Clock, TickClock, Timespec};
pub use types::{
    inode_number, AccessMode, CgrpNodeType, Credentials, FileAttr, FileMode, FileType, NodeAttr,
    MAX_LINK,
};

#[cfg(feature = "std")]
pub use time::SystemClock;

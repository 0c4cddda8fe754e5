//! Synchronization primitives for the cgroup file system
//!
//! Node shape locks are reader/writer spin locks; link-count locks and the
//! name index stripes are spin mutexes.

pub use spin::{Mutex, MutexGuard};
pub use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

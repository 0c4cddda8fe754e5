//! cgroup file system tests

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use nos_cgroupfs::*;
use proptest::prelude::*;

fn private_mount(ssid: SubsystemId) -> Arc<CgrpMount> {
    let config = MountConfig::default()
        .with_subsystem(ssid)
        .with_index(IndexScope::Private { buckets: 256, stripes: 16 });
    CgrpMount::with_clock(config, Arc::new(TickClock::new())).unwrap()
}

fn cred() -> Credentials {
    Credentials::root()
}

/// Offsets of `dir` in list order
fn offsets(dir: &CgrpNode) -> Vec<u64> {
    dir.read().dir.iter().map(|(_, s)| s.offset).collect()
}

/// Every list entry resolves through the index to the same node, and the
/// index holds nothing else for this mount.
fn assert_index_matches_lists(mnt: &CgrpMount, dirs: &[Arc<CgrpNode>]) {
    let mut entries = 0;
    for dir in dirs {
        let state = dir.read();
        for (slot, s) in state.dir.iter() {
            let hit = mnt
                .index()
                .lookup(&s.name, dir.key(), NodeHold::NoHold)
                .expect("listed entry is indexed");
            assert_eq!(hit.slot, slot);
            assert!(hit.binds(&s.node));
            entries += 1;
        }
    }
    assert_eq!(mnt.index().len(), entries);
}

#[test]
fn test_offsets_increase() {
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    for i in 0..32 {
        mnt.create(&root, &format!("f{}", i), &NodeAttr::file(0o644), &cred())
            .unwrap();
    }
    let offs = offsets(&root);
    assert!(offs.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(&offs[..2], &[0, 1]);
}

#[test]
fn test_duplicate_create() {
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let first = mnt.create(&root, "x", &NodeAttr::file(0o644), &cred()).unwrap();
    let nodes = mnt.node_count();
    let size = root.getattr().size;

    assert_eq!(
        mnt.create(&root, "x", &NodeAttr::file(0o644), &cred()).unwrap_err(),
        CgrpError::AlreadyExists
    );
    assert_eq!(mnt.node_count(), nodes);
    assert_eq!(root.getattr().size, size);
    assert!(Arc::ptr_eq(&mnt.lookup(&root, "x", &cred()).unwrap(), &first));
}

#[test]
fn test_create_then_lookup() {
    let mnt = private_mount(SubsystemId::Memory);
    let root = mnt.root();
    let node = mnt.create(&root, "x", &NodeAttr::file(0o600), &cred()).unwrap();
    let found = mnt.lookup(&root, "x", &cred()).unwrap();
    assert!(Arc::ptr_eq(&node, &found));
    assert_eq!(found.nlink(), 1);
    assert_eq!(mnt.getattr(&found).unwrap().mode.permissions(), 0o600);
}

#[test]
fn test_concurrent_create_same_name() {
    const THREADS: usize = 8;
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let before = mnt.node_count();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mnt = mnt.clone();
            let root = root.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                mnt.create(&root, "x", &NodeAttr::file(0o644), &cred())
                    .map(|_| ())
            })
        })
        .collect();

    let results: Vec<CgrpResult<()>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == CgrpError::AlreadyExists));

    // one new node, nothing leaked by the losers
    assert_eq!(mnt.node_count(), before + 1);
    assert_index_matches_lists(&mnt, &[root]);
}

#[test]
fn test_concurrent_mkdir_and_lookup() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 10;
    let mnt = private_mount(SubsystemId::Cpuset);
    let root = mnt.root();
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let makers: Vec<_> = (0..THREADS)
        .map(|t| {
            let mnt = mnt.clone();
            let root = root.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    mnt.mkdir(&root, &format!("g{}_{}", t, i), &NodeAttr::dir(0o755), &cred())
                        .unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let mnt = mnt.clone();
        let root = root.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..200 {
                let tasks = mnt.lookup(&root, "tasks", &cred()).unwrap();
                assert_eq!(tasks.kind(), CgrpNodeType::Tasks);
                let _ = mnt.readdir(&root, 0).unwrap();
            }
        })
    };

    for h in makers {
        h.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(root.nlink() as usize, 2 + THREADS * PER_THREAD);
    let entries = mnt.readdir(&root, 0).unwrap();
    let names: HashSet<String> = entries.into_iter().map(|e| e.name).collect();
    assert_eq!(
        names.len(),
        2 + num_pseudo_entries(SubsystemId::Cpuset) + THREADS * PER_THREAD
    );
    assert!(offsets(&root).windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_mkdir_rmdir_link_counts() {
    let mnt = private_mount(SubsystemId::Cpuset);
    let root = mnt.root();
    let nodes = mnt.node_count();
    let indexed = mnt.index().len();
    assert_eq!(root.nlink(), 2);

    let cg = mnt.mkdir(&root, "a", &NodeAttr::dir(0o755), &cred()).unwrap();
    assert_eq!(root.nlink(), 3);
    assert_eq!(cg.nlink(), 2);
    assert_eq!(
        cg.getattr().ino,
        inode_number(CgrpNodeType::CgroupDir, cg.nodeid())
    );
    assert_eq!(mnt.node_count(), nodes + 1 + num_pseudo_entries(SubsystemId::Cpuset));
    let cpus = mnt.lookup(&cg, "cpuset.cpus", &cred()).unwrap();
    assert_eq!(
        cpus.getattr().ino,
        inode_number(CgrpNodeType::CpusetCpus, cg.nodeid())
    );
    assert_index_matches_lists(&mnt, &[root.clone(), cg.clone()]);

    mnt.rmdir(&root, &cg, "a", &cred()).unwrap();
    assert_eq!(root.nlink(), 2);
    assert_eq!(cg.nlink(), 0);
    assert_eq!(cpus.nlink(), 0);
    assert_eq!(mnt.index().len(), indexed);
    assert_eq!(
        mnt.lookup(&root, "a", &cred()).unwrap_err(),
        CgrpError::NotFound
    );

    drop(cpus);
    drop(cg);
    assert_eq!(mnt.node_count(), nodes);
}

#[test]
fn test_nested_groups() {
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let a = mnt.mkdir(&root, "a", &NodeAttr::dir(0o755), &cred()).unwrap();
    let b = mnt.mkdir(&a, "b", &NodeAttr::dir(0o755), &cred()).unwrap();
    assert_eq!(a.nlink(), 3);
    assert!(Arc::ptr_eq(&mnt.lookup(&b, "..", &cred()).unwrap(), &a));

    assert_eq!(
        mnt.rmdir(&root, &a, "a", &cred()).unwrap_err(),
        CgrpError::NotEmpty
    );
    mnt.rmdir(&a, &b, "b", &cred()).unwrap();
    assert_eq!(a.nlink(), 2);
    mnt.rmdir(&root, &a, "a", &cred()).unwrap();
    assert_eq!(root.nlink(), 2);
}

#[test]
fn test_rename_after_unlink() {
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let node = mnt.create(&root, "f", &NodeAttr::file(0o644), &cred()).unwrap();
    mnt.remove(&root, &node, "f", &cred()).unwrap();
    assert_eq!(node.nlink(), 0);

    assert_eq!(
        mnt.rename(&root, "g", &node, &cred()).unwrap_err(),
        CgrpError::NotFound
    );
    assert_eq!(node.nlink(), 0);
    assert_eq!(
        mnt.lookup(&root, "g", &cred()).unwrap_err(),
        CgrpError::NotFound
    );
}

#[test]
fn test_remove_twice() {
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let node = mnt.create(&root, "f", &NodeAttr::file(0o644), &cred()).unwrap();
    mnt.remove(&root, &node, "f", &cred()).unwrap();
    assert_eq!(
        mnt.remove(&root, &node, "f", &cred()).unwrap_err(),
        CgrpError::NotFound
    );
}

#[test]
fn test_mismatched_delete_races_rmdir() {
    const ROUNDS: usize = 20_000;
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let cg = mnt.mkdir(&root, "cg", &NodeAttr::dir(0o755), &cred()).unwrap();
    let sub = mnt.mkdir(&cg, "sub", &NodeAttr::dir(0o755), &cred()).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    // Deletes `root` through a name in `cg` that binds something else
    let mismatched = {
        let (mnt, root, cg, barrier) = (mnt.clone(), root.clone(), cg.clone(), barrier.clone());
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS {
                assert_eq!(
                    mnt.remove(&cg, &root, "tasks", &cred()).unwrap_err(),
                    CgrpError::NotFound
                );
            }
        })
    };
    // Locks root, then cg, and backs off because cg holds a child group
    let busy = {
        let (mnt, root, cg, barrier) = (mnt.clone(), root.clone(), cg.clone(), barrier.clone());
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS {
                assert_eq!(
                    mnt.rmdir(&root, &cg, "cg", &cred()).unwrap_err(),
                    CgrpError::NotEmpty
                );
            }
        })
    };
    mismatched.join().unwrap();
    busy.join().unwrap();

    assert_eq!(cg.nlink(), 3);
    assert_eq!(root.nlink(), 3);
    assert_index_matches_lists(&mnt, &[root, cg, sub]);
}

#[test]
fn test_delete_needs_exec_and_write() {
    let owner = Credentials::new(100, 100);
    let config = MountConfig::default()
        .with_owner(100, 100)
        .with_index(IndexScope::Private { buckets: 64, stripes: 8 });
    let mnt = CgrpMount::with_clock(config, Arc::new(TickClock::new())).unwrap();
    let root = mnt.root();
    let node = mnt.create(&root, "f", &NodeAttr::file(0o644), &owner).unwrap();

    let stranger = Credentials::new(200, 200);
    assert_eq!(
        mnt.remove(&root, &node, "f", &stranger).unwrap_err(),
        CgrpError::PermissionDenied
    );
    assert_eq!(node.nlink(), 1);
    mnt.remove(&root, &node, "f", &owner).unwrap();
}

#[test]
fn test_readdir_cursor_survives_deletes() {
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let nodes: Vec<_> = (0..6)
        .map(|i| {
            let name = format!("f{}", i);
            let node = mnt.create(&root, &name, &NodeAttr::file(0o644), &cred()).unwrap();
            (name, node)
        })
        .collect();

    let page = mnt.readdir(&root, 0).unwrap();
    assert_eq!(page[7].name, "f2");
    let cursor = page[7].offset;
    // drop entries before the cursor; it still resumes at the same entry
    for (name, node) in &nodes[..2] {
        mnt.remove(&root, node, name, &cred()).unwrap();
    }
    let rest = mnt.readdir(&root, cursor).unwrap();
    assert_eq!(rest[0].name, "f2");
    assert_eq!(rest.len(), page.len() - 7);
}

#[test]
fn test_amortized_slot_search() {
    let mnt = private_mount(SubsystemId::Generic);
    let root = mnt.root();
    let mut live: Vec<(String, Arc<CgrpNode>)> = Vec::new();
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut creates = 0u64;

    for round in 0..200 {
        for i in 0..8 {
            let name = format!("f{}_{}", round, i);
            let node = mnt.create(&root, &name, &NodeAttr::file(0o644), &cred()).unwrap();
            live.push((name, node));
            creates += 1;
        }
        for _ in 0..6 {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let idx = (seed >> 33) as usize % live.len();
            let (name, node) = live.swap_remove(idx);
            mnt.remove(&root, &node, &name, &cred()).unwrap();
        }
    }

    let probes = root.read().dir.probes();
    assert!(
        probes <= 2 * creates,
        "{} probes for {} creates",
        probes,
        creates
    );
    assert!(offsets(&root).windows(2).all(|w| w[0] < w[1]));
    assert_index_matches_lists(&mnt, &[root]);
}

#[test]
fn test_global_index_is_shared() {
    let a = CgrpMount::mount(MountConfig::default().with_dev(1)).unwrap();
    let b = CgrpMount::mount(MountConfig::default().with_dev(2)).unwrap();
    assert!(std::ptr::eq(a.index(), b.index()));
    assert!(std::ptr::eq(a.index(), &*NameIndex::global()));

    // same names in both roots resolve per parent
    let ta = a.lookup(&a.root(), "tasks", &cred()).unwrap();
    let tb = b.lookup(&b.root(), "tasks", &cred()).unwrap();
    assert!(!Arc::ptr_eq(&ta, &tb));
    assert_eq!(ta.fsid(), 1);
    assert_eq!(tb.fsid(), 2);
}

#[test]
fn test_unmount_clears_private_index() {
    let mnt = private_mount(SubsystemId::Memory);
    let root = mnt.root();
    let a = mnt.mkdir(&root, "a", &NodeAttr::dir(0o755), &cred()).unwrap();
    mnt.create(&a, "extra", &NodeAttr::file(0o644), &cred()).unwrap();
    mnt.unmount();
    assert!(mnt.index().is_empty());
    assert_eq!(a.nlink(), 0);
    assert_eq!(
        mnt.create(&root, "late", &NodeAttr::file(0o644), &cred()).unwrap_err(),
        CgrpError::NotFound
    );
}

#[derive(Debug, Clone)]
enum Op {
    Create(u8),
    Remove(u8),
    Mkdir(u8),
    Rmdir(u8),
    Rename(u8, u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..24).prop_map(Op::Create),
        (0u8..24).prop_map(Op::Remove),
        (0u8..8).prop_map(Op::Mkdir),
        (0u8..8).prop_map(Op::Rmdir),
        (0u8..24, 0u8..24).prop_map(|(a, b)| Op::Rename(a, b)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_churn_keeps_list_and_index_in_step(ops in prop::collection::vec(op(), 1..200)) {
        let mnt = private_mount(SubsystemId::Generic);
        let root = mnt.root();
        let base_nodes = mnt.node_count();
        let mut creates = 0u64;

        for op in ops {
            match op {
                Op::Create(n) => {
                    if mnt.create(&root, &format!("f{}", n), &NodeAttr::file(0o644), &cred()).is_ok() {
                        creates += 1;
                    }
                }
                Op::Remove(n) => {
                    let name = format!("f{}", n);
                    if let Ok(node) = mnt.lookup(&root, &name, &cred()) {
                        mnt.remove(&root, &node, &name, &cred()).unwrap();
                        prop_assert_eq!(node.nlink(), 0);
                    }
                }
                Op::Mkdir(n) => {
                    if mnt.mkdir(&root, &format!("g{}", n), &NodeAttr::dir(0o755), &cred()).is_ok() {
                        creates += 1;
                    }
                }
                Op::Rmdir(n) => {
                    let name = format!("g{}", n);
                    if let Ok(node) = mnt.lookup(&root, &name, &cred()) {
                        mnt.rmdir(&root, &node, &name, &cred()).unwrap();
                        prop_assert_eq!(node.nlink(), 0);
                    }
                }
                Op::Rename(a, b) => {
                    let (from, to) = (format!("f{}", a), format!("f{}", b));
                    let existed = mnt.lookup(&root, &from, &cred()).is_ok();
                    let res = mnt.rename_entry(&root, &from, &to, &cred());
                    if res.is_ok() && a != b {
                        creates += 1;
                        prop_assert!(existed);
                        prop_assert!(mnt.lookup(&root, &from, &cred()).is_err());
                        prop_assert!(mnt.lookup(&root, &to, &cred()).is_ok());
                    }
                }
            }

            let offs = offsets(&root);
            prop_assert!(offs.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(offs.len() as u32, root.read().dir.len());
        }

        let groups: Vec<Arc<CgrpNode>> = root
            .read()
            .dir
            .iter()
            .filter(|(_, s)| s.name.starts_with('g'))
            .map(|(_, s)| s.node.clone())
            .collect();
        prop_assert_eq!(root.nlink() as usize, 2 + groups.len());
        let mut dirs = groups.clone();
        dirs.push(root.clone());
        assert_index_matches_lists(&mnt, &dirs);
        prop_assert!(root.read().dir.probes() <= 2 * creates);

        drop(dirs);
        drop(groups);
        let live = root.read().dir.len() as usize - 2 - num_pseudo_entries(SubsystemId::Generic);
        let per_group = 1 + num_pseudo_entries(SubsystemId::Generic);
        let group_count = root
            .read()
            .dir
            .iter()
            .filter(|(_, s)| s.name.starts_with('g'))
            .count();
        prop_assert_eq!(
            mnt.node_count(),
            base_nodes + (live - group_count) + group_count * per_group
        );
    }
}

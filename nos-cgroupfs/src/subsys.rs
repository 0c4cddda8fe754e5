//! Subsystem pseudo-file templates
//!
//! Every cgroup directory is populated with the pseudo-files listed for the
//! subsystem its mount was created for.

use crate::types::CgrpNodeType;

/// Subsystem a cgroup mount exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubsystemId {
    Generic = 1,
    Cpuset = 2,
    Memory = 3,
}

impl SubsystemId {
    /// Parse a subsystem name as given in mount options
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "generic" | "none" => Some(SubsystemId::Generic),
            "cpuset" => Some(SubsystemId::Cpuset),
            "memory" => Some(SubsystemId::Memory),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubsystemId::Generic => "generic",
            SubsystemId::Cpuset => "cpuset",
            SubsystemId::Memory => "memory",
        }
    }
}

/// One pseudo-file entry of a subsystem template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoFile {
    pub kind: CgrpNodeType,
    pub name: &'static str,
}

const fn pf(kind: CgrpNodeType, name: &'static str) -> PseudoFile {
    PseudoFile { kind, name }
}

static GENERIC_DIR: [PseudoFile; 3] = [
    pf(CgrpNodeType::CloneChildren, "cgroup.clone_children"),
    pf(CgrpNodeType::Procs, "cgroup.procs"),
    pf(CgrpNodeType::Tasks, "tasks"),
];

static CPUSET_DIR: [PseudoFile; 4] = [
    pf(CgrpNodeType::CloneChildren, "cgroup.clone_children"),
    pf(CgrpNodeType::Procs, "cgroup.procs"),
    pf(CgrpNodeType::CpusetCpus, "cpuset.cpus"),
    pf(CgrpNodeType::Tasks, "tasks"),
];

static MEMORY_DIR: [PseudoFile; 4] = [
    pf(CgrpNodeType::CloneChildren, "cgroup.clone_children"),
    pf(CgrpNodeType::Procs, "cgroup.procs"),
    pf(CgrpNodeType::MemoryUsageInBytes, "memory.usage_in_bytes"),
    pf(CgrpNodeType::Tasks, "tasks"),
];

/// Ordered pseudo-files materialized in every directory of a subsystem
pub fn pseudo_files(ssid: SubsystemId) -> &'static [PseudoFile] {
    match ssid {
        SubsystemId::Generic => &GENERIC_DIR,
        SubsystemId::Cpuset => &CPUSET_DIR,
        SubsystemId::Memory => &MEMORY_DIR,
    }
}

/// Number of pseudo-file entries in a directory of the given subsystem
pub fn num_pseudo_entries(ssid: SubsystemId) -> usize {
    pseudo_files(ssid).len()
}

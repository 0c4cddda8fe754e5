//! Mount configuration

use crate::error::{CgrpError, CgrpResult};
use crate::subsys::SubsystemId;

/// Which name index a mount uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    /// The process-wide index shared by all mounts
    Global,
    /// A private index with the given geometry
    Private { buckets: usize, stripes: usize },
}

/// cgroup mount configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountConfig {
    /// Subsystem whose pseudo-files populate every directory
    pub subsystem: SubsystemId,
    /// Device id reported for every node
    pub dev: u64,
    /// Permission bits of the root directory
    pub root_mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub index: IndexScope,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            subsystem: SubsystemId::Generic,
            dev: 0,
            root_mode: 0o755,
            uid: 0,
            gid: 0,
            index: IndexScope::Global,
        }
    }
}

impl MountConfig {
    pub fn with_subsystem(mut self, subsystem: SubsystemId) -> Self {
        self.subsystem = subsystem;
        self
    }

    pub fn with_dev(mut self, dev: u64) -> Self {
        self.dev = dev;
        self
    }

    pub fn with_root_mode(mut self, mode: u32) -> Self {
        self.root_mode = mode & 0o7777;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn with_index(mut self, index: IndexScope) -> Self {
        self.index = index;
        self
    }

    /// Parse a comma separated mount option string such as
    /// `"cpuset,dev=7,mode=0750"`.
    ///
    /// Bare words name the subsystem; `dev=`, `mode=` (octal), `uid=` and
    /// `gid=` set the corresponding fields. Unknown options are rejected.
    pub fn from_options(options: &str) -> CgrpResult<Self> {
        let mut config = Self::default();
        for opt in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match opt.split_once('=') {
                Some(("dev", v)) => config.dev = parse_num(v, 10)?,
                Some(("mode", v)) => {
                    config = config.with_root_mode(parse_num(v.trim_start_matches("0o"), 8)?)
                }
                Some(("uid", v)) => config.uid = parse_num(v, 10)?,
                Some(("gid", v)) => config.gid = parse_num(v, 10)?,
                Some((key, _)) => {
                    log::warn!("cgroupfs: unknown mount option {}", key);
                    return Err(CgrpError::InvalidArgument);
                }
                None => {
                    config.subsystem = SubsystemId::from_name(opt).ok_or_else(|| {
                        log::warn!("cgroupfs: unknown subsystem {}", opt);
                        CgrpError::InvalidArgument
                    })?;
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the index geometry
    pub fn validate(&self) -> CgrpResult<()> {
        if let IndexScope::Private { buckets, stripes } = self.index {
            if !buckets.is_power_of_two() || !stripes.is_power_of_two() || stripes > buckets {
                return Err(CgrpError::InvalidArgument);
            }
        }
        Ok(())
    }
}

fn parse_num<T: TryFrom<u64>>(s: &str, radix: u32) -> CgrpResult<T> {
    u64::from_str_radix(s, radix)
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or(CgrpError::InvalidArgument)
}

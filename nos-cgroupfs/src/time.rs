//! Timestamps and time sources for cgroup nodes

use core::sync::atomic::{AtomicU64, Ordering};

/// Seconds/nanoseconds timestamp (timestruc_t equivalent)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// True when the value cannot be represented by a 32-bit `time_t`
    pub fn overflows(&self) -> bool {
        self.sec < i32::MIN as i64 || self.sec > i32::MAX as i64
    }
}

/// Source of "now" for node timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> Timespec;
}

/// Monotonic logical clock: every reading advances by one microsecond.
///
/// Usable without an OS; readings are strictly increasing, which keeps
/// timestamp ordering observable in tests.
#[derive(Debug, Default)]
pub struct TickClock {
    ticks: AtomicU64,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }
}

impl Clock for TickClock {
    fn now(&self) -> Timespec {
        let t = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        Timespec::new((t / 1_000_000) as i64, ((t % 1_000_000) * 1_000) as u32)
    }
}

/// Wall clock backed by `std::time::SystemTime`
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now(&self) -> Timespec {
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Timespec::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(_) => Timespec::default(),
        }
    }
}

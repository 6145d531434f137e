//! Memory Pressure Probes
//!
//! The L1 janitor asks a [`MemoryProbe`] once per check interval and runs an
//! out-of-cycle sweep when usage reaches the configured high-water fraction.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Memory usage sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes currently in use
    pub used: u64,
    /// Bytes the usage is measured against
    pub reference: u64,
}

impl MemoryUsage {
    /// Fraction of the reference size in use (0.0 when the reference is unknown)
    pub fn ratio(&self) -> f64 {
        if self.reference == 0 {
            0.0
        } else {
            self.used as f64 / self.reference as f64
        }
    }

    /// True if usage is at or above `high_water` of the reference
    pub fn exceeds(&self, high_water: f64) -> bool {
        self.reference > 0 && self.ratio() >= high_water
    }
}

/// Source of process memory usage
pub trait MemoryProbe: Send + Sync {
    /// Sample current usage; `None` when the platform cannot report it
    fn sample(&self) -> Option<MemoryUsage>;
}

/// Samples this process's resident memory through `sysinfo`.
///
/// Usage is measured against a configured byte limit when one is set,
/// otherwise against total system memory. Without a limit the pressure sweep
/// only fires once the process holds most of the machine's RAM, so hosts that
/// want an earlier trigger should size a budget with [`with_limit`].
/// Measuring against the process's own peak is not an option: resident memory
/// sits at or near its high-water mark most of the time, which would keep
/// the sweep firing on every check.
///
/// [`with_limit`]: ProcessMemoryProbe::with_limit
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
    limit_bytes: Option<u64>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: get_current_pid().ok(),
            system: Mutex::new(System::new()),
            limit_bytes: None,
        }
    }

    /// Measure against a fixed byte budget instead of system memory
    pub fn with_limit(limit_bytes: u64) -> Self {
        Self {
            limit_bytes: Some(limit_bytes),
            ..Self::new()
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        let pid = self.pid?;
        let mut sys = self.system.lock();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything().with_memory(),
        );
        let used = sys.process(pid)?.memory();

        let reference = match self.limit_bytes {
            Some(limit) => limit,
            None => {
                sys.refresh_memory();
                sys.total_memory()
            }
        };
        Some(MemoryUsage { used, reference })
    }
}

impl std::fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemoryProbe")
            .field("pid", &self.pid)
            .field("limit_bytes", &self.limit_bytes)
            .finish()
    }
}

/// Probe returning a settable usage figure, for tests and embedding hosts
/// that track memory themselves
#[derive(Debug, Default)]
pub struct StaticMemoryProbe {
    used: AtomicU64,
    reference: AtomicU64,
}

impl StaticMemoryProbe {
    pub fn new(used: u64, reference: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
            reference: AtomicU64::new(reference),
        }
    }

    pub fn set_used(&self, used: u64) {
        self.used.store(used, Ordering::Relaxed);
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        Some(MemoryUsage {
            used: self.used.load(Ordering::Relaxed),
            reference: self.reference.load(Ordering::Relaxed),
        })
    }
}

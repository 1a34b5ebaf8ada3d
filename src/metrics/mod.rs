mod types;

pub use types::ResourceStatus;

use std::sync::{Arc, Mutex, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Samples CPU and memory usage of the current process.
///
/// Cloning shares the underlying `System`, so the CPU delta baseline is kept
/// across every clone.
#[derive(Clone)]
pub struct StatusSampler {
    inner: Arc<Mutex<SamplerState>>,
}

struct SamplerState {
    system: System,
    pid: Pid,
    samples: u64,
}

impl StatusSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // Initial refresh to establish baseline for CPU calculation
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(SamplerState {
                system,
                pid,
                samples: 0,
            })),
        }
    }

    /// Sample current CPU and memory usage.
    /// CPU usage is a delta against the previous refresh, so the very first
    /// sample after construction usually reports 0%.
    pub fn sample(&self) -> ResourceStatus {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        state.samples += 1;

        if let Some(process) = state.system.process(pid) {
            ResourceStatus {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            }
        } else {
            ResourceStatus::default()
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
    }
}

impl Default for StatusSampler {
    fn default() -> Self {
        Self::new()
    }
}

use std::{path::Path, time::Duration};

use crate::{
    exec::gpu::GpuBackendKind,
    foundation::error::{SchedError, SchedResult},
};

/// Scheduler configuration.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerOpts {
    /// CPU executor count. `None` uses the number of hardware threads (at least 1).
    pub cpu_threads: Option<usize>,
    /// Disk backup executors created up front. More are created on demand.
    pub hdd_backup_executors: usize,
    /// GPU post-processing backend. `None` disables the GPU lane.
    pub gpu: Option<GpuBackendKind>,
    /// Report executors whose current pass runs longer than this many milliseconds.
    pub stall_warning_ms: Option<u64>,
    /// While the disk lane is busy, producers are told threads are free as long as the pending
    /// disk backlog is below this.
    pub hdd_backlog_low_water: usize,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            cpu_threads: None,
            hdd_backup_executors: 1,
            gpu: None,
            stall_warning_ms: None,
            hdd_backlog_low_water: 2,
        }
    }
}

impl SchedulerOpts {
    /// Parse options from JSON.
    pub fn from_json_str(s: &str) -> SchedResult<Self> {
        let opts: Self = serde_json::from_str(s)
            .map_err(|e| SchedError::serde(format!("scheduler options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Read and parse options from a JSON file.
    pub fn from_json_file(path: &Path) -> SchedResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SchedError::Other(
                anyhow::Error::new(e).context(format!("read scheduler options '{}'", path.display())),
            )
        })?;
        Self::from_json_str(&text)
    }

    /// Reject settings that cannot produce a working scheduler.
    pub fn validate(&self) -> SchedResult<()> {
        if self.cpu_threads == Some(0) {
            return Err(SchedError::validation(
                "scheduler option 'cpu_threads' must be >= 1 when set",
            ));
        }
        if self.stall_warning_ms == Some(0) {
            return Err(SchedError::validation(
                "scheduler option 'stall_warning_ms' must be >= 1 when set",
            ));
        }
        Ok(())
    }

    /// CPU executor count after applying the hardware default.
    pub fn resolved_cpu_threads(&self) -> usize {
        self.cpu_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(usize::from)
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Stall threshold as a [`Duration`].
    pub fn stall_warning(&self) -> Option<Duration> {
        self.stall_warning_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/scheduler/opts.rs"]
mod tests;

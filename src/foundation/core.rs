use std::fmt;

/// The execution lane a processing pass runs on.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Hardware {
    /// CPU worker pool.
    Cpu,
    /// GPU post-processing stage.
    Gpu,
    /// Serialized disk-cache writer.
    Hdd,
}

impl fmt::Display for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Hdd => "hdd",
        };
        f.write_str(s)
    }
}

/// Hardware affinity of a task, consulted when a task is extracted from the queue.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HardwareSupport {
    /// Every pass runs on the CPU pool.
    #[default]
    CpuOnly,
    /// Passes after the first CPU pass may be taken by the GPU stage.
    CpuOrGpu,
}

impl HardwareSupport {
    /// Whether a CPU executor may run this task.
    pub fn cpu_capable(self) -> bool {
        match self {
            Self::CpuOnly | Self::CpuOrGpu => true,
        }
    }

    /// Whether the GPU stage may run this task (after a CPU pass).
    pub fn gpu_capable(self) -> bool {
        matches!(self, Self::CpuOrGpu)
    }
}

/// Lifecycle state of a task.
///
/// Variants are ordered: anything greater than [`TaskState::Processing`] is terminal.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, or scheduled but not yet admitted to a queue.
    #[default]
    NotQueued,
    /// Sitting in a queue or pending list.
    Queued,
    /// Assigned to an executor.
    Processing,
    /// Canceled out-of-band; terminal.
    Canceled,
    /// Completed its last step; terminal.
    Finished,
}

impl TaskState {
    /// `true` for [`TaskState::Canceled`] and [`TaskState::Finished`].
    pub fn is_terminal(self) -> bool {
        self > Self::Processing
    }
}

/// Which executor family an [`ExecutorId`] belongs to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// CPU worker executors.
    Cpu,
    /// Disk writer executors (primary and backups).
    Hdd,
    /// The single GPU post-processing stage.
    Gpu,
}

/// Stable identity of one executor. Executors are never destroyed, so ids are never reused.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ExecutorId {
    /// Executor family.
    pub lane: Lane,
    /// Index within the family, in creation order.
    pub index: u32,
}

impl ExecutorId {
    pub(crate) fn cpu(index: usize) -> Self {
        Self {
            lane: Lane::Cpu,
            index: index as u32,
        }
    }

    pub(crate) fn hdd(index: usize) -> Self {
        Self {
            lane: Lane::Hdd,
            index: index as u32,
        }
    }

    pub(crate) fn gpu() -> Self {
        Self {
            lane: Lane::Gpu,
            index: 0,
        }
    }

    pub(crate) fn slot(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lane = match self.lane {
            Lane::Cpu => "cpu",
            Lane::Hdd => "hdd",
            Lane::Gpu => "gpu",
        };
        write!(f, "{lane}#{}", self.index)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;

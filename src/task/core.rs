use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::foundation::core::{ExecutorId, Hardware, HardwareSupport, TaskState};

#[derive(Debug, Default)]
struct CoreInner {
    state: TaskState,
    last_hardware: Option<Hardware>,
    controller: Option<ExecutorId>,
    passes: u32,
}

/// Thread-safe task state machine.
///
/// `NotQueued -> Queued -> Processing -> {Finished | Canceled}`, plus `Processing -> Queued`
/// for continuations. Nothing leaves a terminal state; invalid transitions are ignored and
/// reported as `false`.
#[derive(Debug, Default)]
pub struct TaskCore {
    support: HardwareSupport,
    inner: Mutex<CoreInner>,
}

impl TaskCore {
    /// Create a core in [`TaskState::NotQueued`].
    pub fn new(support: HardwareSupport) -> Self {
        Self {
            support,
            inner: Mutex::new(CoreInner::default()),
        }
    }

    /// Hardware affinity fixed at construction.
    pub fn hardware_support(&self) -> HardwareSupport {
        self.support
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    /// Lane of the most recently started pass.
    pub fn last_hardware(&self) -> Option<Hardware> {
        self.lock().last_hardware
    }

    /// Disk executor bound by the last `set_controller` call.
    pub fn controller(&self) -> Option<ExecutorId> {
        self.lock().controller
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u32 {
        self.lock().passes
    }

    /// `NotQueued | Processing -> Queued`.
    pub fn mark_queued(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            TaskState::NotQueued | TaskState::Processing => {
                inner.state = TaskState::Queued;
                true
            }
            _ => false,
        }
    }

    /// `Queued -> Processing` on `hardware`.
    pub fn begin_pass(&self, hardware: Hardware) -> bool {
        let mut inner = self.lock();
        if inner.state != TaskState::Queued {
            tracing::trace!(state = ?inner.state, %hardware, "begin_pass ignored");
            return false;
        }
        inner.state = TaskState::Processing;
        inner.last_hardware = Some(hardware);
        inner.passes = inner.passes.saturating_add(1);
        true
    }

    /// Any non-terminal state `-> Finished`.
    pub fn finish(&self) -> bool {
        self.terminate(TaskState::Finished)
    }

    /// Any non-terminal state `-> Canceled`.
    pub fn cancel(&self) -> bool {
        self.terminate(TaskState::Canceled)
    }

    /// Bind the executor that handled the latest disk pass.
    pub fn set_controller(&self, executor: ExecutorId) {
        self.lock().controller = Some(executor);
    }

    fn terminate(&self, to: TaskState) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = to;
        true
    }

    fn lock(&self) -> MutexGuard<'_, CoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/task/core.rs"]
mod tests;

//! The task contract consumed by the scheduler.
//!
//! A task is opaque work plus a small state machine. The scheduler only drives transitions and
//! reads state; it never interprets what a pass computes.

pub(crate) mod core;
pub(crate) mod step;

use std::sync::Arc;

use crate::{
    exec::ExecCtx,
    foundation::core::{ExecutorId, Hardware, HardwareSupport, TaskState},
    foundation::error::{SchedError, SchedResult},
    task::core::TaskCore,
};

/// Shared handle to a task. Identity is pointer identity (see [`same_task`]).
pub type TaskHandle = Arc<dyn Task>;

/// A unit of schedulable work.
///
/// Implementors embed a [`TaskCore`] and implement [`Task::process`]; every contract method has
/// a default that delegates to the core. Override [`Task::next_step`] for multi-pass work and
/// [`Task::ready_to_be_processed`] to gate dispatch on dependencies.
pub trait Task: Send + Sync {
    /// State holder backing the default contract methods.
    fn core(&self) -> &TaskCore;

    /// Run one processing pass. Called on an executor thread, never on the control thread.
    fn process(&self, ctx: &ExecCtx<'_>) -> SchedResult<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "task"
    }

    /// Which lanes may run this task.
    fn hardware_support(&self) -> HardwareSupport {
        self.core().hardware_support()
    }

    /// Current lifecycle state.
    fn state(&self) -> TaskState {
        self.core().state()
    }

    /// Whether the task currently sits in a queue or pending list.
    fn is_queued(&self) -> bool {
        self.state() == TaskState::Queued
    }

    /// Lane of the most recent pass, if any pass has started.
    fn last_hardware(&self) -> Option<Hardware> {
        self.core().last_hardware()
    }

    /// Transition into the queued state.
    fn task_queued(&self) {
        self.core().mark_queued();
    }

    /// Transition into processing on `hardware`.
    fn about_to_process(&self, hardware: Hardware) {
        self.core().begin_pass(hardware);
    }

    /// Readiness predicate consulted before the task may occupy an executor.
    fn ready_to_be_processed(&self) -> bool {
        self.state() == TaskState::Queued
    }

    /// Advance to the next step. Returns `true` if another pass is required.
    fn next_step(&self) -> bool {
        false
    }

    /// Transition into the finished state.
    fn finished_processing(&self) {
        self.core().finish();
    }

    /// Record which disk executor handled this task.
    fn set_controller(&self, executor: ExecutorId) {
        self.core().set_controller(executor);
    }

    /// Cancel out-of-band. The scheduler notices lazily.
    fn cancel(&self) {
        self.core().cancel();
    }

    /// Called on the executor thread when [`Task::process`] fails or panics.
    fn handle_error(&self, err: SchedError) {
        tracing::warn!(task = self.name(), error = %err, "task pass failed; canceling");
        self.cancel();
    }
}

/// Pointer identity of two task handles.
pub fn same_task(a: &TaskHandle, b: &TaskHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Hashable identity of a task handle, agreeing with [`same_task`].
pub(crate) fn task_key(task: &TaskHandle) -> usize {
    Arc::as_ptr(task).cast::<()>() as usize
}

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    exec::ExecCtx,
    foundation::core::{HardwareSupport, TaskState},
    foundation::error::{SchedError, SchedResult},
    task::{Task, core::TaskCore},
};

type StepFn = Box<dyn Fn(&ExecCtx<'_>) -> SchedResult<()> + Send + Sync>;
type ReadyFn = Box<dyn Fn() -> bool + Send + Sync>;

/// A task assembled from closures, one per processing pass.
///
/// Pass `i` runs step `i`; `next_step` advances and reports whether steps remain. Each step can
/// inspect [`ExecCtx::hardware`] to specialize for the lane it landed on.
pub struct StepTask {
    core: TaskCore,
    name: String,
    steps: Vec<StepFn>,
    current: AtomicUsize,
    ready: Option<ReadyFn>,
}

impl StepTask {
    /// Start building a task.
    pub fn builder(name: impl Into<String>) -> StepTaskBuilder {
        StepTaskBuilder {
            name: name.into(),
            support: HardwareSupport::CpuOnly,
            steps: Vec::new(),
            ready: None,
        }
    }

    /// Index of the step the next pass will run.
    pub fn current_step(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Total number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

impl std::fmt::Debug for StepTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTask")
            .field("name", &self.name)
            .field("state", &self.core.state())
            .field("step", &self.current_step())
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Task for StepTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn process(&self, ctx: &ExecCtx<'_>) -> SchedResult<()> {
        let i = self.current_step();
        let step = self.steps.get(i).ok_or_else(|| {
            SchedError::validation(format!(
                "task '{}' has no step {i} ({} steps)",
                self.name,
                self.steps.len()
            ))
        })?;
        step(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ready_to_be_processed(&self) -> bool {
        self.state() == TaskState::Queued && self.ready.as_ref().is_none_or(|f| f())
    }

    fn next_step(&self) -> bool {
        let next = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        next < self.steps.len()
    }
}

/// Builder for [`StepTask`].
pub struct StepTaskBuilder {
    name: String,
    support: HardwareSupport,
    steps: Vec<StepFn>,
    ready: Option<ReadyFn>,
}

impl StepTaskBuilder {
    /// Hardware affinity (default [`HardwareSupport::CpuOnly`]).
    pub fn support(mut self, support: HardwareSupport) -> Self {
        self.support = support;
        self
    }

    /// Append a processing pass.
    pub fn step<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecCtx<'_>) -> SchedResult<()> + Send + Sync + 'static,
    {
        self.steps.push(Box::new(f));
        self
    }

    /// Extra readiness condition on top of "is queued" (e.g. a dependency has finished).
    pub fn ready_when<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.ready = Some(Box::new(f));
        self
    }

    /// Finish building.
    pub fn build(self) -> Arc<StepTask> {
        Arc::new(StepTask {
            core: TaskCore::new(self.support),
            name: self.name,
            steps: self.steps,
            current: AtomicUsize::new(0),
            ready: self.ready,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/task/step.rs"]
mod tests;

use std::{cell::RefCell, rc::Rc};

use crate::queue::task_queue::QueueBatch;

/// Something that produces render tasks, e.g. a scene in the editor.
///
/// During CPU admission the scheduler asks every visible producer to push its scheduled tasks
/// into the batch being assembled and to drop render state it no longer needs.
pub trait RenderProducer {
    /// Only visible producers take part in admission.
    fn is_visible(&self) -> bool {
        true
    }

    /// Push the producer's currently scheduled tasks.
    fn que_scheduled_tasks(&mut self, batch: &mut QueueBatch<'_>);

    /// Release transient render state.
    fn clear_render_data(&mut self) {}
}

/// Producers are owned by the application and shared with the scheduler on the control thread.
pub type SharedProducer = Rc<RefCell<dyn RenderProducer>>;

/// Receives scheduler signals. All methods default to no-ops.
pub trait SchedulerObserver {
    /// Number of busy CPU executors changed (or was re-reported).
    fn cpu_usage_changed(&mut self, _used: usize) {}

    /// Disk lane busy flag.
    fn hdd_usage_changed(&mut self, _busy: bool) {}

    /// GPU stage busy flag.
    fn gpu_usage_changed(&mut self, _busy: bool) {}

    /// There is capacity to admit more work; producers may schedule more.
    fn free_threads_available(&mut self) {}

    /// Every scheduled, queued and in-flight task has settled.
    fn all_tasks_finished(&mut self) {}
}

/// A scheduler signal, as captured by [`SignalRecorder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// See [`SchedulerObserver::cpu_usage_changed`].
    CpuUsage(usize),
    /// See [`SchedulerObserver::hdd_usage_changed`].
    HddUsage(bool),
    /// See [`SchedulerObserver::gpu_usage_changed`].
    GpuUsage(bool),
    /// See [`SchedulerObserver::free_threads_available`].
    FreeThreads,
    /// See [`SchedulerObserver::all_tasks_finished`].
    AllFinished,
}

/// Observer that appends every signal to a shared log.
#[derive(Clone, Debug, Default)]
pub struct SignalRecorder {
    log: Rc<RefCell<Vec<Signal>>>,
}

impl SignalRecorder {
    /// Create a recorder with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the signals recorded so far.
    pub fn signals(&self) -> Vec<Signal> {
        self.log.borrow().clone()
    }

    /// How many recorded signals match `pred`.
    pub fn count(&self, pred: impl Fn(&Signal) -> bool) -> usize {
        self.log.borrow().iter().filter(|s| pred(s)).count()
    }

    /// Highest CPU usage reported.
    pub fn peak_cpu_usage(&self) -> usize {
        self.log
            .borrow()
            .iter()
            .filter_map(|s| match s {
                Signal::CpuUsage(n) => Some(*n),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }

    fn push(&self, signal: Signal) {
        self.log.borrow_mut().push(signal);
    }
}

impl SchedulerObserver for SignalRecorder {
    fn cpu_usage_changed(&mut self, used: usize) {
        self.push(Signal::CpuUsage(used));
    }

    fn hdd_usage_changed(&mut self, busy: bool) {
        self.push(Signal::HddUsage(busy));
    }

    fn gpu_usage_changed(&mut self, busy: bool) {
        self.push(Signal::GpuUsage(busy));
    }

    fn free_threads_available(&mut self) {
        self.push(Signal::FreeThreads);
    }

    fn all_tasks_finished(&mut self) {
        self.push(Signal::AllFinished);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/scheduler/observer.rs"]
mod tests;

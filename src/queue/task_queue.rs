use std::collections::{HashSet, VecDeque};

use crate::{
    foundation::core::Hardware,
    foundation::error::{SchedError, SchedResult},
    task::{TaskHandle, same_task, task_key},
};

/// Pending CPU-lane work, grouped into batches.
///
/// Tasks are pushed between [`TaskQueue::begin_batch`] and [`TaskQueue::end_batch`]. The open
/// batch is invisible to extraction, so nothing pushed in it can be dispatched before the batch
/// closes. Closed batches are drained oldest first; within a batch, insertion order.
#[derive(Default)]
pub struct TaskQueue {
    closed: VecDeque<Vec<TaskHandle>>,
    open: Option<Vec<TaskHandle>>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batch. Fails if one is already open.
    pub fn begin_batch(&mut self) -> SchedResult<()> {
        if self.open.is_some() {
            return Err(SchedError::validation("queue batch already open"));
        }
        self.open = Some(Vec::new());
        Ok(())
    }

    /// Close the open batch, making its tasks extractable. Empty batches are discarded.
    pub fn end_batch(&mut self) -> SchedResult<()> {
        let batch = self
            .open
            .take()
            .ok_or_else(|| SchedError::validation("end_batch without an open queue batch"))?;
        if !batch.is_empty() {
            self.closed.push_back(batch);
        }
        Ok(())
    }

    /// Whether a batch is currently open.
    pub fn is_batch_open(&self) -> bool {
        self.open.is_some()
    }

    /// Push into the open batch, marking the task queued.
    pub fn push(&mut self, task: TaskHandle) -> SchedResult<()> {
        let batch = self
            .open
            .as_mut()
            .ok_or_else(|| SchedError::validation("push outside of a queue batch"))?;
        task.task_queued();
        batch.push(task);
        Ok(())
    }

    /// Number of non-empty closed batches plus the open one, if any.
    pub fn batch_count(&self) -> usize {
        self.closed.len() + usize::from(self.open.is_some())
    }

    /// Total tasks held, open batch included.
    pub fn len(&self) -> usize {
        self.closed.iter().map(Vec::len).sum::<usize>() + self.open.as_ref().map_or(0, Vec::len)
    }

    /// Whether no task is held at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `task` is held (pointer identity).
    pub fn contains(&self, task: &TaskHandle) -> bool {
        self.closed
            .iter()
            .flatten()
            .chain(self.open.iter().flatten())
            .any(|t| same_task(t, task))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &TaskHandle> {
        self.closed.iter().flatten().chain(self.open.iter().flatten())
    }

    /// Take the next task a CPU executor can run.
    ///
    /// Also yields tasks that already reached a terminal state so the caller can discard them
    /// instead of leaving them stranded.
    pub fn take_for_cpu(&mut self) -> Option<TaskHandle> {
        self.take_first(|t| {
            t.state().is_terminal()
                || (t.hardware_support().cpu_capable() && t.ready_to_be_processed())
        })
    }

    /// Take the next task the GPU stage can post-process: GPU-capable, ready, and with its most
    /// recent pass completed on the CPU.
    pub fn take_for_gpu(&mut self) -> Option<TaskHandle> {
        self.take_first(|t| {
            t.hardware_support().gpu_capable()
                && t.last_hardware() == Some(Hardware::Cpu)
                && t.ready_to_be_processed()
        })
    }

    fn take_first(&mut self, pred: impl Fn(&TaskHandle) -> bool) -> Option<TaskHandle> {
        let (bi, ti) = self.closed.iter().enumerate().find_map(|(bi, batch)| {
            batch.iter().position(&pred).map(|ti| (bi, ti))
        })?;
        let batch = &mut self.closed[bi];
        let task = batch.remove(ti);
        if batch.is_empty() {
            self.closed.remove(bi);
        }
        Some(task)
    }
}

/// Push-only view of an open queue batch, handed to producers during admission.
///
/// A task that is already queued, or that the scheduler reports as held elsewhere, is not
/// pushed again.
pub struct QueueBatch<'a> {
    queue: &'a mut TaskQueue,
    held: HashSet<usize>,
    pushed: usize,
    skipped: usize,
}

impl<'a> QueueBatch<'a> {
    pub(crate) fn new(queue: &'a mut TaskQueue, mut held: HashSet<usize>) -> Self {
        held.extend(queue.iter().map(task_key));
        Self {
            queue,
            held,
            pushed: 0,
            skipped: 0,
        }
    }

    /// Add a task to the batch.
    pub fn push(&mut self, task: TaskHandle) -> SchedResult<()> {
        if !self.held.insert(task_key(&task)) {
            tracing::debug!(task = task.name(), "already queued or running; not queued again");
            self.skipped += 1;
            return Ok(());
        }
        self.queue.push(task)?;
        self.pushed += 1;
        Ok(())
    }

    /// Tasks pushed through this view so far.
    pub fn pushed(&self) -> usize {
        self.pushed
    }

    /// Pushes ignored because the task was already held.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
#[path = "../../tests/unit/queue/task_queue.rs"]
mod tests;

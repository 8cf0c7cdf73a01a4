use std::{sync::mpsc::Sender, time::Instant};

use crate::{
    exec::{ExecCtx, SchedEvent, build_worker_pool, run_pass},
    foundation::core::ExecutorId,
    foundation::error::SchedResult,
    task::{TaskHandle, same_task},
};

struct CpuExecutor {
    id: ExecutorId,
    current: Option<TaskHandle>,
    started: Option<Instant>,
}

/// Fixed set of CPU executors backed by one worker pool with as many threads as executors.
///
/// Invariant: an executor is in `free` exactly when it has no `current` task, so
/// `free.len() + used() == total()` always holds.
pub(crate) struct CpuExecutorPool {
    pool: rayon::ThreadPool,
    executors: Vec<CpuExecutor>,
    free: Vec<ExecutorId>,
}

impl CpuExecutorPool {
    pub(crate) fn new(count: usize) -> SchedResult<Self> {
        let pool = build_worker_pool(count, "sched-cpu")?;
        let executors = (0..count)
            .map(|i| CpuExecutor {
                id: ExecutorId::cpu(i),
                current: None,
                started: None,
            })
            .collect::<Vec<_>>();
        let free = executors.iter().map(|e| e.id).collect();
        Ok(Self {
            pool,
            executors,
            free,
        })
    }

    pub(crate) fn total(&self) -> usize {
        self.executors.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn used(&self) -> usize {
        self.total() - self.free_count()
    }

    pub(crate) fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.used() > 0
    }

    pub(crate) fn take_free(&mut self) -> Option<ExecutorId> {
        self.free.pop()
    }

    /// Return an executor that was taken but never handed a task.
    pub(crate) fn put_back(&mut self, executor: ExecutorId) {
        debug_assert!(self.executors[executor.slot()].current.is_none());
        self.free.push(executor);
    }

    /// Hand `task` to an executor previously returned by [`Self::take_free`].
    pub(crate) fn process(
        &mut self,
        executor: ExecutorId,
        task: TaskHandle,
        events: &Sender<SchedEvent>,
    ) {
        let slot = &mut self.executors[executor.slot()];
        debug_assert!(slot.current.is_none(), "{executor} already busy");
        slot.current = Some(task.clone());
        slot.started = Some(Instant::now());

        let tx = events.clone();
        self.pool.spawn(move || {
            run_pass(&task, &ExecCtx::cpu(executor));
            let _ = tx.send(SchedEvent::CpuFinished { task, executor });
        });
    }

    /// Return an executor to the free list. Only the first release after a dispatch counts.
    pub(crate) fn release(&mut self, executor: ExecutorId) -> bool {
        let Some(slot) = self.executors.get_mut(executor.slot()) else {
            return false;
        };
        if slot.current.take().is_none() {
            return false;
        }
        slot.started = None;
        self.free.push(executor);
        true
    }

    pub(crate) fn is_running(&self, task: &TaskHandle) -> bool {
        self.executors
            .iter()
            .filter_map(|e| e.current.as_ref())
            .any(|t| same_task(t, task))
    }

    pub(crate) fn running(&self) -> impl Iterator<Item = &TaskHandle> {
        self.executors.iter().filter_map(|e| e.current.as_ref())
    }

    pub(crate) fn running_on(&self, executor: ExecutorId) -> Option<&TaskHandle> {
        self.executors.get(executor.slot())?.current.as_ref()
    }

    pub(crate) fn stalled(&self, now: Instant, threshold: std::time::Duration) -> Vec<ExecutorId> {
        self.executors
            .iter()
            .filter(|e| {
                e.started
                    .is_some_and(|t| now.saturating_duration_since(t) >= threshold)
            })
            .map(|e| e.id)
            .collect()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/exec/cpu.rs"]
mod tests;

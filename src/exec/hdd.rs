use std::{collections::VecDeque, sync::mpsc::Sender, time::Instant};

use crate::{
    exec::{ExecCtx, PartSignal, SchedEvent, build_worker_pool, run_pass},
    foundation::core::ExecutorId,
    foundation::error::SchedResult,
    task::TaskHandle,
};

struct HddExecutor {
    id: ExecutorId,
    pool: rayon::ThreadPool,
    current: Option<TaskHandle>,
    started: Option<Instant>,
}

/// Disk writer executors: one primary that accepts new work, plus backups.
///
/// When the primary reports that its pass is only finishing a tail, a backup is promoted and
/// the old primary keeps draining in the background. Executors are created on demand and never
/// destroyed; a demoted executor rejoins the backup pool once its pass fully completes.
pub(crate) struct HddExecutorSet {
    executors: Vec<HddExecutor>,
    primary: usize,
    free_backups: VecDeque<usize>,
    busy: bool,
}

impl HddExecutorSet {
    pub(crate) fn new(backups: usize) -> SchedResult<Self> {
        let mut set = Self {
            executors: Vec::new(),
            primary: 0,
            free_backups: VecDeque::new(),
            busy: false,
        };
        set.primary = set.create()?;
        for _ in 0..backups {
            let i = set.create()?;
            set.free_backups.push_back(i);
        }
        Ok(set)
    }

    fn create(&mut self) -> SchedResult<usize> {
        let i = self.executors.len();
        let pool = build_worker_pool(1, &format!("sched-hdd{i}"))?;
        self.executors.push(HddExecutor {
            id: ExecutorId::hdd(i),
            pool,
            current: None,
            started: None,
        });
        tracing::debug!(executor = %ExecutorId::hdd(i), "created disk executor");
        Ok(i)
    }

    pub(crate) fn primary(&self) -> ExecutorId {
        self.executors[self.primary].id
    }

    pub(crate) fn busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn executor_count(&self) -> usize {
        self.executors.len()
    }

    pub(crate) fn free_backup_count(&self) -> usize {
        self.free_backups.len()
    }

    /// Any disk pass running, including demoted executors finishing a tail.
    pub(crate) fn in_flight(&self) -> bool {
        self.executors.iter().any(|e| e.current.is_some())
    }

    pub(crate) fn running(&self) -> impl Iterator<Item = &TaskHandle> {
        self.executors.iter().filter_map(|e| e.current.as_ref())
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.executors.iter().filter(|e| e.current.is_some()).count()
    }

    /// Start `task` on the primary and mark the lane busy.
    pub(crate) fn dispatch(&mut self, task: TaskHandle, events: &Sender<SchedEvent>) {
        let exec = &mut self.executors[self.primary];
        debug_assert!(exec.current.is_none(), "{} already busy", exec.id);
        exec.current = Some(task.clone());
        exec.started = Some(Instant::now());
        self.busy = true;

        let executor = exec.id;
        let tx = events.clone();
        exec.pool.spawn(move || {
            let part = PartSignal::new(tx.clone(), executor);
            run_pass(&task, &ExecCtx::hdd(executor, &part));
            let _ = tx.send(SchedEvent::HddFinished { task, executor });
        });
    }

    /// Demote the busy primary and promote a free (or new) backup.
    ///
    /// Returns `false` without changes when the lane is not busy.
    pub(crate) fn switch_to_backup(&mut self) -> SchedResult<bool> {
        if !self.busy {
            return Ok(false);
        }
        let next = match self.free_backups.pop_front() {
            Some(i) => i,
            None => self.create()?,
        };
        tracing::debug!(
            from = %self.executors[self.primary].id,
            to = %self.executors[next].id,
            "rotating disk primary"
        );
        self.primary = next;
        self.busy = false;
        Ok(true)
    }

    /// Bookkeeping for a completed disk pass.
    pub(crate) fn on_finished(&mut self, executor: ExecutorId) {
        let i = executor.slot();
        if let Some(exec) = self.executors.get_mut(i) {
            exec.current = None;
            exec.started = None;
        }
        if i == self.primary {
            self.busy = false;
        } else if !self.free_backups.contains(&i) {
            self.free_backups.push_back(i);
        }
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
#[path = "../../tests/unit/exec/hdd.rs"]
mod tests;

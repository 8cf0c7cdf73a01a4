use std::{
    collections::HashSet,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    time::{Duration, Instant},
};

use crate::{
    exec::{
        SchedEvent,
        cpu::CpuExecutorPool,
        gpu::{GpuBackendKind, GpuPostProcessor},
        hdd::HddExecutorSet,
    },
    foundation::core::{ExecutorId, Hardware},
    foundation::error::{SchedError, SchedResult},
    queue::task_queue::{QueueBatch, TaskQueue},
    scheduler::observer::{SchedulerObserver, SharedProducer},
    scheduler::opts::SchedulerOpts,
    task::{TaskHandle, same_task, task_key},
};

/// Counters accumulated over the scheduler's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    /// Passes handed to CPU executors.
    pub cpu_dispatched: u64,
    /// Passes handed to the GPU stage.
    pub gpu_dispatched: u64,
    /// Passes handed to disk executors.
    pub hdd_dispatched: u64,
    /// Completions that asked for another pass.
    pub continuations: u64,
    /// Tasks finalized as finished.
    pub finished: u64,
    /// Terminal tasks discarded at dispatch time without occupying an executor.
    pub skipped_terminal: u64,
    /// Disk primary rotations.
    pub hdd_rotations: u64,
    /// Times the "all tasks finished" signal fired.
    pub settled_passes: u64,
}

/// Render task scheduler.
///
/// Owns the CPU executor pool, the disk executor set, the GPU post-processing stage and the
/// queues between them. All methods run on one control thread; executors report back through
/// an internal channel drained by [`Scheduler::try_process_events`], [`Scheduler::wait_event`]
/// or [`Scheduler::run_until_idle`].
///
/// Guarantees:
/// - at most one task per executor, and a task is never both queued and running;
/// - at most one newly dispatched disk pass at a time, while demoted disk executors may still
///   be finishing earlier passes;
/// - GPU passes only follow a completed CPU pass;
/// - nothing pushed in a queue batch is dispatched before the batch closes.
pub struct Scheduler {
    opts: SchedulerOpts,
    events_tx: Sender<SchedEvent>,
    events_rx: Receiver<SchedEvent>,

    cpu: CpuExecutorPool,
    hdd: HddExecutorSet,
    gpu: GpuPostProcessor,

    cpu_queue: TaskQueue,
    scheduled_cpu: Vec<TaskHandle>,
    scheduled_hdd: Vec<TaskHandle>,
    pending_hdd: Vec<TaskHandle>,
    cpu_queueing: bool,
    settle_pending: bool,

    producers: Vec<SharedProducer>,
    observers: Vec<Box<dyn SchedulerObserver>>,
    stats: SchedulerStats,
}

impl Scheduler {
    /// Build the executor lanes described by `opts`.
    ///
    /// Fails if a worker pool cannot be created, or if `opts.gpu` is set and GPU
    /// initialization fails.
    pub fn new(opts: SchedulerOpts) -> SchedResult<Self> {
        opts.validate()?;
        let (events_tx, events_rx) = mpsc::channel();
        let cpu = CpuExecutorPool::new(opts.resolved_cpu_threads())?;
        let hdd = HddExecutorSet::new(opts.hdd_backup_executors)?;

        let mut sched = Self {
            opts,
            events_tx,
            events_rx,
            cpu,
            hdd,
            gpu: GpuPostProcessor::new(),
            cpu_queue: TaskQueue::new(),
            scheduled_cpu: Vec::new(),
            scheduled_hdd: Vec::new(),
            pending_hdd: Vec::new(),
            cpu_queueing: false,
            settle_pending: false,
            producers: Vec::new(),
            observers: Vec::new(),
            stats: SchedulerStats::default(),
        };
        if let Some(kind) = sched.opts.gpu {
            sched.initialize_gpu(kind)?;
        }
        tracing::debug!(
            cpu_executors = sched.cpu.total(),
            hdd_executors = sched.hdd.executor_count(),
            gpu = sched.gpu.is_initialized(),
            "scheduler ready"
        );
        Ok(sched)
    }

    /// Bring up GPU post-processing. Until this succeeds, GPU-capable tasks run on the CPU.
    pub fn initialize_gpu(&mut self, kind: GpuBackendKind) -> SchedResult<()> {
        self.gpu.initialize(kind).inspect_err(|e| {
            tracing::error!(error = %e, "gpu post-processing unavailable");
        })
    }

    /// Options this scheduler was built with.
    pub fn opts(&self) -> &SchedulerOpts {
        &self.opts
    }

    /// Register a producer consulted during CPU admission.
    pub fn add_producer(&mut self, producer: SharedProducer) {
        self.producers.push(producer);
    }

    /// Register a signal observer.
    pub fn add_observer(&mut self, observer: Box<dyn SchedulerObserver>) {
        self.observers.push(observer);
    }

    /// Register intent to run `task` on the CPU pool. Nothing is dispatched until
    /// [`Scheduler::que_tasks`].
    pub fn schedule_cpu_task(&mut self, task: TaskHandle) {
        self.scheduled_cpu.push(task);
        self.settle_pending = true;
    }

    /// Register intent to run `task` on the disk lane.
    pub fn schedule_hdd_task(&mut self, task: TaskHandle) {
        self.scheduled_hdd.push(task);
        self.settle_pending = true;
    }

    /// Hand `task` straight to the GPU stage, which keeps its own order.
    ///
    /// A task whose most recent pass did not run on the CPU, or that cannot run on the GPU, or
    /// any task while the GPU lane is not initialized, is scheduled on the CPU instead. A task
    /// that is already queued or running is left where it is.
    pub fn schedule_gpu_task(&mut self, task: TaskHandle) {
        if self.is_held(&task) {
            tracing::debug!(task = task.name(), "already queued or running; not sent to gpu");
            return;
        }
        if !self.gpu.is_initialized() {
            tracing::debug!(task = task.name(), "gpu lane disabled; scheduling on cpu");
            return self.schedule_cpu_task(task);
        }
        if !task.hardware_support().gpu_capable() || task.last_hardware() != Some(Hardware::Cpu) {
            tracing::warn!(
                task = task.name(),
                "gpu submission without a completed cpu pass; scheduling on cpu"
            );
            return self.schedule_cpu_task(task);
        }
        self.hand_to_gpu(task);
    }

    /// Promote scheduled work into the queues and dispatch what fits.
    ///
    /// Cheap when there is nothing to do; safe to call as often as convenient.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn que_tasks(&mut self) -> SchedResult<()> {
        self.que_scheduled_cpu_tasks()?;
        self.que_scheduled_hdd_tasks();
        self.call_all_tasks_finished();
        Ok(())
    }

    fn should_que_more_cpu_tasks(&self) -> bool {
        let overflowed = self.cpu_queue.batch_count() >= self.cpu.total();
        self.cpu.has_free() && !self.cpu_queueing && !overflowed
    }

    fn should_que_more_hdd_tasks(&self) -> bool {
        self.hdd.busy() && self.pending_hdd.len() < self.opts.hdd_backlog_low_water
    }

    /// Identity keys of every task an executor or a lane-local list currently owns.
    fn held_keys(&self) -> HashSet<usize> {
        self.cpu
            .running()
            .chain(self.hdd.running())
            .chain(self.gpu.tasks())
            .chain(&self.pending_hdd)
            .map(task_key)
            .collect()
    }

    fn is_held(&self, task: &TaskHandle) -> bool {
        self.held_keys().contains(&task_key(task)) || self.cpu_queue.contains(task)
    }

    fn que_scheduled_cpu_tasks(&mut self) -> SchedResult<()> {
        if !self.should_que_more_cpu_tasks() {
            return Ok(());
        }
        self.cpu_queueing = true;
        let filled = self.fill_cpu_batch();
        self.cpu_queueing = false;
        filled?;

        if !self.cpu_queue.is_empty() {
            self.process_next_tasks();
        }
        Ok(())
    }

    fn fill_cpu_batch(&mut self) -> SchedResult<()> {
        self.cpu_queue.begin_batch()?;
        let held = self.held_keys();
        let mut batch = QueueBatch::new(&mut self.cpu_queue, held);
        let mut pushed = Ok(());

        for producer in &self.producers {
            let mut producer = producer.borrow_mut();
            if !producer.is_visible() {
                continue;
            }
            producer.que_scheduled_tasks(&mut batch);
            producer.clear_render_data();
        }
        // Order among scheduled tasks carries no meaning; drain from the back.
        while let Some(task) = self.scheduled_cpu.pop() {
            if let Err(e) = batch.push(task) {
                pushed = Err(e);
                break;
            }
        }

        let count = batch.pushed();
        let skipped = batch.skipped();
        self.cpu_queue.end_batch()?;
        if skipped > 0 {
            tracing::debug!(skipped, "ignored cpu submissions for held tasks");
        }
        if count > 0 {
            self.settle_pending = true;
            tracing::debug!(count, batches = self.cpu_queue.batch_count(), "queued cpu batch");
        }
        pushed
    }

    fn que_scheduled_hdd_tasks(&mut self) {
        if self.hdd.busy() {
            return;
        }
        for task in std::mem::take(&mut self.scheduled_hdd) {
            if self.is_held(&task) {
                tracing::debug!(task = task.name(), "already queued or running; not queued again");
                continue;
            }
            if !task.is_queued() {
                task.task_queued();
            }
            self.pending_hdd.push(task);
            self.try_processing_next_queued_hdd_task();
        }
    }

    /// Try every lane in turn (disk, GPU, CPU), then tell producers if there is room for more.
    pub fn process_next_tasks(&mut self) {
        loop {
            self.process_next_queued_hdd_task();
            // A lane that discarded a terminal task asks for another round.
            if !self.process_next_queued_gpu_task() && !self.process_next_queued_cpu_task() {
                break;
            }
        }
        if self.should_que_more_cpu_tasks() || self.should_que_more_hdd_tasks() {
            self.emit(|o| o.free_threads_available());
        }
    }

    /// Returns `true` when a terminal task was discarded and the lanes should be retried.
    fn process_next_queued_cpu_task(&mut self) -> bool {
        while self.cpu.has_free() && !self.cpu_queue.is_empty() {
            let Some(executor) = self.cpu.take_free() else {
                break;
            };
            let Some(task) = self.cpu_queue.take_for_cpu() else {
                self.cpu.put_back(executor);
                break;
            };
            if task.state().is_terminal() {
                // Canceled while queued.
                self.cpu.put_back(executor);
                self.stats.skipped_terminal += 1;
                tracing::trace!(task = task.name(), "skipping terminal task");
                return true;
            }

            task.about_to_process(Hardware::Cpu);
            tracing::debug!(task = task.name(), %executor, "dispatch cpu");
            self.cpu.process(executor, task, &self.events_tx);
            self.stats.cpu_dispatched += 1;
        }

        let used = self.cpu.used();
        self.emit(|o| o.cpu_usage_changed(used));
        false
    }

    fn process_next_queued_gpu_task(&mut self) -> bool {
        if !self.gpu.is_initialized() || !self.gpu.has_finished() {
            return false;
        }
        match self.cpu_queue.take_for_gpu() {
            Some(task) if task.state().is_terminal() => {
                self.stats.skipped_terminal += 1;
                tracing::trace!(task = task.name(), "skipping terminal task");
                return true;
            }
            Some(task) => {
                tracing::debug!(task = task.name(), "dispatch gpu");
                self.hand_to_gpu(task);
            }
            None => {}
        }

        let busy = !self.gpu.has_finished();
        self.emit(|o| o.gpu_usage_changed(busy));
        false
    }

    fn hand_to_gpu(&mut self, task: TaskHandle) {
        task.task_queued();
        self.gpu.add_to_process(task, &self.events_tx);
        self.stats.gpu_dispatched += 1;
        self.settle_pending = true;
    }

    fn try_processing_next_queued_hdd_task(&mut self) {
        if !self.hdd.busy() {
            self.process_next_queued_hdd_task();
        }
    }

    fn process_next_queued_hdd_task(&mut self) {
        if !self.hdd.busy() {
            let before = self.pending_hdd.len();
            self.pending_hdd.retain(|t| !t.state().is_terminal());
            self.stats.skipped_terminal += (before - self.pending_hdd.len()) as u64;

            if let Some(i) = self
                .pending_hdd
                .iter()
                .position(|t| t.ready_to_be_processed())
            {
                let task = self.pending_hdd.remove(i);
                let executor = self.hdd.primary();
                task.about_to_process(Hardware::Hdd);
                task.set_controller(executor);
                tracing::debug!(task = task.name(), %executor, "dispatch hdd");
                self.hdd.dispatch(task, &self.events_tx);
                self.stats.hdd_dispatched += 1;
            }
        }

        let busy = self.hdd.busy();
        self.emit(|o| o.hdd_usage_changed(busy));
    }

    pub(crate) fn handle_event(&mut self, event: SchedEvent) -> SchedResult<()> {
        match event {
            SchedEvent::CpuFinished { task, executor } => {
                self.after_cpu_task_finished(task, executor)
            }
            SchedEvent::HddFinished { task, executor } => {
                self.after_hdd_task_finished(task, executor)
            }
            SchedEvent::HddPartFinished { executor } => {
                self.switch_to_backup_hdd_executor(executor)
            }
            SchedEvent::GpuFinished { task } => self.after_gpu_task_finished(task),
        }
    }

    fn after_cpu_task_finished(
        &mut self,
        task: TaskHandle,
        executor: ExecutorId,
    ) -> SchedResult<()> {
        if !self.cpu.release(executor) {
            tracing::warn!(%executor, "completion from an idle cpu executor");
        }
        self.settle_pass(task);
        self.process_next_tasks();
        if !self.cpu.in_flight() {
            self.que_tasks()?;
        }
        self.call_all_tasks_finished();
        Ok(())
    }

    fn after_hdd_task_finished(
        &mut self,
        task: TaskHandle,
        executor: ExecutorId,
    ) -> SchedResult<()> {
        self.hdd.on_finished(executor);
        if !task.state().is_terminal() {
            task.finished_processing();
            self.stats.finished += 1;
        }
        self.process_next_tasks();
        if !self.hdd.in_flight() {
            self.que_tasks()?;
        }
        self.call_all_tasks_finished();
        Ok(())
    }

    fn after_gpu_task_finished(&mut self, task: TaskHandle) -> SchedResult<()> {
        self.gpu.task_done(&self.events_tx);
        self.settle_pass(task);
        self.process_next_tasks();
        if self.gpu.has_finished() {
            self.call_all_tasks_finished();
            if !self.cpu.in_flight() {
                self.que_tasks()?;
            }
        }
        Ok(())
    }

    /// Promote a backup disk executor once the primary only has trailing work left.
    ///
    /// Signals from executors that are no longer primary are ignored.
    fn switch_to_backup_hdd_executor(&mut self, executor: ExecutorId) -> SchedResult<()> {
        if executor != self.hdd.primary() {
            tracing::trace!(%executor, "part-finished from a demoted disk executor");
            return Ok(());
        }
        if !self.hdd.switch_to_backup()? {
            return Ok(());
        }
        self.stats.hdd_rotations += 1;
        tracing::debug!(
            primary = %self.hdd.primary(),
            free_backups = self.hdd.free_backup_count(),
            "disk lane handed to backup"
        );
        self.process_next_queued_hdd_task();
        Ok(())
    }

    /// Finalize a CPU or GPU pass: nothing for terminal tasks, reschedule continuations,
    /// finish the rest.
    fn settle_pass(&mut self, task: TaskHandle) {
        if task.state().is_terminal() {
            return;
        }
        if task.next_step() {
            self.stats.continuations += 1;
            self.schedule_cpu_task(task);
        } else {
            task.finished_processing();
            self.stats.finished += 1;
        }
    }

    fn call_all_tasks_finished(&mut self) {
        if !self.settle_pending || !self.is_idle() {
            return;
        }
        self.settle_pending = false;
        self.stats.settled_passes += 1;
        tracing::debug!("all tasks finished");
        self.emit(|o| o.all_tasks_finished());
    }

    fn emit(&mut self, f: impl Fn(&mut dyn SchedulerObserver)) {
        for observer in &mut self.observers {
            f(observer.as_mut());
        }
    }

    /// Handle every completion already delivered, without blocking. Returns how many.
    pub fn try_process_events(&mut self) -> SchedResult<usize> {
        let mut handled = 0;
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event)?;
                    handled += 1;
                }
                Err(TryRecvError::Empty) => return Ok(handled),
                Err(TryRecvError::Disconnected) => {
                    return Err(SchedError::executor("scheduler event channel disconnected"));
                }
            }
        }
    }

    /// Block for at most `timeout` waiting for one completion, then handle it.
    ///
    /// Returns `false` on timeout, after logging any executor past the stall threshold.
    pub fn wait_event(&mut self, timeout: Duration) -> SchedResult<bool> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event)?;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => {
                for executor in self.stalled_executors() {
                    tracing::warn!(%executor, "executor exceeded stall threshold");
                }
                Ok(false)
            }
            Err(RecvTimeoutError::Disconnected) => Err(SchedError::executor(
                "scheduler event channel disconnected",
            )),
        }
    }

    /// Admit and pump events until everything settles or `deadline` elapses.
    pub fn run_until_idle(&mut self, deadline: Duration) -> SchedResult<()> {
        let start = Instant::now();
        self.que_tasks()?;
        while !self.is_idle() {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Err(SchedError::stalled(format!(
                    "{} cpu / {} disk passes running, {} queued, {} awaiting gpu after {elapsed:?}",
                    self.cpu.used(),
                    self.hdd.in_flight_count(),
                    self.cpu_queue.len() + self.pending_hdd.len(),
                    self.gpu.pending_count()
                )));
            }
            let slice = (deadline - elapsed).min(Duration::from_millis(100));
            if !self.wait_event(slice)? {
                // Readiness may have changed without a completion.
                self.que_tasks()?;
                self.process_next_tasks();
            }
        }
        Ok(())
    }

    /// Executors whose current pass exceeds the configured stall threshold.
    pub fn stalled_executors(&self) -> Vec<ExecutorId> {
        let Some(threshold) = self.opts.stall_warning() else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut out = self.cpu.stalled(now, threshold);
        out.extend(self.hdd.stalled(now, threshold));
        out
    }

    /// Nothing scheduled, queued, pending or running on any lane.
    pub fn is_idle(&self) -> bool {
        self.scheduled_cpu.is_empty()
            && self.scheduled_hdd.is_empty()
            && self.cpu_queue.is_empty()
            && self.pending_hdd.is_empty()
            && !self.cpu.in_flight()
            && !self.hdd.in_flight()
            && self.gpu.has_finished()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Number of CPU executors.
    pub fn cpu_total(&self) -> usize {
        self.cpu.total()
    }

    /// CPU executors without a task.
    pub fn cpu_free(&self) -> usize {
        self.cpu.free_count()
    }

    /// CPU executors running a task.
    pub fn cpu_used(&self) -> usize {
        self.cpu.used()
    }

    /// Tasks registered with [`Scheduler::schedule_cpu_task`] and not yet admitted.
    pub fn scheduled_cpu_count(&self) -> usize {
        self.scheduled_cpu.len()
    }

    /// Tasks waiting in the CPU queue.
    pub fn queued_cpu_count(&self) -> usize {
        self.cpu_queue.len()
    }

    /// Open plus closed batches in the CPU queue.
    pub fn queue_batch_count(&self) -> usize {
        self.cpu_queue.batch_count()
    }

    /// Disk tasks registered and not yet admitted.
    pub fn scheduled_hdd_count(&self) -> usize {
        self.scheduled_hdd.len()
    }

    /// Disk tasks admitted and waiting for the primary.
    pub fn pending_hdd_count(&self) -> usize {
        self.pending_hdd.len()
    }

    /// Whether the disk primary is occupied by a newly dispatched pass.
    pub fn hdd_busy(&self) -> bool {
        self.hdd.busy()
    }

    /// Current disk primary.
    pub fn hdd_primary(&self) -> ExecutorId {
        self.hdd.primary()
    }

    /// Disk executors ever created.
    pub fn hdd_executor_count(&self) -> usize {
        self.hdd.executor_count()
    }

    /// Disk passes running, including demoted executors finishing a tail.
    pub fn hdd_in_flight(&self) -> usize {
        self.hdd.in_flight_count()
    }

    /// Whether the GPU lane is enabled.
    pub fn gpu_initialized(&self) -> bool {
        self.gpu.is_initialized()
    }

    /// Whether the GPU stage has nothing accepted or running.
    pub fn gpu_idle(&self) -> bool {
        self.gpu.has_finished()
    }

    /// Whether `task` sits in the CPU queue or the disk pending list.
    pub fn is_queued(&self, task: &TaskHandle) -> bool {
        self.cpu_queue.contains(task) || self.pending_hdd.iter().any(|t| same_task(t, task))
    }

    /// Whether `task` currently occupies a CPU executor or the GPU stage.
    pub fn is_running(&self, task: &TaskHandle) -> bool {
        self.cpu.is_running(task) || self.gpu.is_running(task)
    }

    /// Task running on a CPU executor, if any.
    pub fn cpu_task_on(&self, executor: ExecutorId) -> Option<&TaskHandle> {
        self.cpu.running_on(executor)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/scheduler/task_scheduler.rs"]
mod tests;

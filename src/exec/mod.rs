//! Executor lanes: the CPU worker pool, the disk writer set and the GPU post-processing stage.
//!
//! Executors only run passes. All bookkeeping (free lists, busy flags, in-flight handles) lives
//! on the control thread; workers talk back exclusively through [`SchedEvent`]s.

pub(crate) mod cpu;
pub(crate) mod gpu;
pub(crate) mod hdd;

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
};

use crate::{
    exec::gpu::GpuDevice,
    foundation::core::{ExecutorId, Hardware, Lane},
    foundation::error::{SchedError, SchedResult},
    task::TaskHandle,
};

/// Completion traffic from executor threads to the control thread.
pub(crate) enum SchedEvent {
    CpuFinished {
        task: TaskHandle,
        executor: ExecutorId,
    },
    HddFinished {
        task: TaskHandle,
        executor: ExecutorId,
    },
    /// A disk executor finished enough of its pass to accept new work.
    HddPartFinished { executor: ExecutorId },
    GpuFinished { task: TaskHandle },
}

/// One-shot "part finished" notifier handed to disk passes.
pub(crate) struct PartSignal {
    events: Sender<SchedEvent>,
    executor: ExecutorId,
    fired: AtomicBool,
}

impl PartSignal {
    pub(crate) fn new(events: Sender<SchedEvent>, executor: ExecutorId) -> Self {
        Self {
            events,
            executor,
            fired: AtomicBool::new(false),
        }
    }

    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.events
            .send(SchedEvent::HddPartFinished {
                executor: self.executor,
            })
            .is_ok()
    }
}

/// What a running pass can see about where it runs.
pub struct ExecCtx<'a> {
    hardware: Hardware,
    executor: ExecutorId,
    part: Option<&'a PartSignal>,
    gpu: Option<&'a GpuDevice>,
}

impl<'a> ExecCtx<'a> {
    /// Context for running a pass outside any scheduler (tools, tests, benchmarks).
    pub fn detached(hardware: Hardware) -> Self {
        let lane = match hardware {
            Hardware::Cpu => Lane::Cpu,
            Hardware::Gpu => Lane::Gpu,
            Hardware::Hdd => Lane::Hdd,
        };
        Self {
            hardware,
            executor: ExecutorId { lane, index: 0 },
            part: None,
            gpu: None,
        }
    }

    pub(crate) fn cpu(executor: ExecutorId) -> Self {
        Self {
            hardware: Hardware::Cpu,
            executor,
            part: None,
            gpu: None,
        }
    }

    pub(crate) fn hdd(executor: ExecutorId, part: &'a PartSignal) -> Self {
        Self {
            hardware: Hardware::Hdd,
            executor,
            part: Some(part),
            gpu: None,
        }
    }

    pub(crate) fn gpu(device: &'a GpuDevice) -> Self {
        Self {
            hardware: Hardware::Gpu,
            executor: ExecutorId::gpu(),
            part: None,
            gpu: Some(device),
        }
    }

    /// Lane this pass runs on.
    pub fn hardware(&self) -> Hardware {
        self.hardware
    }

    /// Executor running this pass.
    pub fn executor(&self) -> ExecutorId {
        self.executor
    }

    /// GPU device, for passes running on the GPU stage.
    pub fn gpu_device(&self) -> Option<&'a GpuDevice> {
        self.gpu
    }

    /// Tell the scheduler this disk pass may be overlapped by the next one.
    ///
    /// Call once the pass only has trailing work left (e.g. a flush). Returns `false` outside
    /// disk passes or when already signaled.
    pub fn signal_part_finished(&self) -> bool {
        self.part.is_some_and(PartSignal::fire)
    }
}

/// Run one pass, routing failures and panics to the task so the completion event always follows.
pub(crate) fn run_pass(task: &TaskHandle, ctx: &ExecCtx<'_>) {
    let span = tracing::debug_span!("pass", task = task.name(), executor = %ctx.executor());
    let _enter = span.enter();

    match panic::catch_unwind(AssertUnwindSafe(|| task.process(ctx))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => task.handle_error(err),
        Err(payload) => task.handle_error(SchedError::executor(format!(
            "task '{}' panicked: {}",
            task.name(),
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

pub(crate) fn build_worker_pool(threads: usize, prefix: &str) -> SchedResult<rayon::ThreadPool> {
    if threads == 0 {
        return Err(SchedError::validation(format!(
            "{prefix} worker pool needs at least one thread"
        )));
    }

    let name = prefix.to_owned();
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{name}-{i}"))
        .build()
        .map_err(|e| SchedError::executor(format!("failed to build {prefix} worker pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/exec/mod.rs"]
mod tests;

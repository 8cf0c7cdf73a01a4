//! render-sched is the render task scheduler of a motion-graphics editor.
//!
//! It dispatches render tasks produced by scenes onto three kinds of resources:
//!
//! 1. **CPU pool**: a fixed number of executors, one task each, fed from a batched queue.
//! 2. **Disk lane**: a serialized cache writer. A writer that only has trailing work left (e.g.
//!    a flush) can hand the lane to a backup executor so the next write starts immediately.
//! 3. **GPU stage**: an optional asynchronous post-processing step with its own FIFO. A task only
//!    reaches it after a completed CPU pass.
//!
//! All coordination runs on one control thread owning the [`Scheduler`]. Executors report
//! completions back over a channel; the control thread drains it with
//! [`Scheduler::try_process_events`], [`Scheduler::wait_event`] or
//! [`Scheduler::run_until_idle`]. The scheduler never interprets what a task computes.
//!
//! # Getting started
//!
//! - Implement [`Task`] (or assemble one from closures with [`StepTask`]).
//! - Register producers ([`RenderProducer`]) and observers ([`SchedulerObserver`]).
//! - Schedule work, then call [`Scheduler::que_tasks`] and pump events.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod exec;
mod foundation;
mod queue;
mod scheduler;
mod task;

pub use crate::exec::ExecCtx;
pub use crate::exec::gpu::{GpuBackendKind, GpuDevice};
#[cfg(feature = "gpu")]
pub use crate::exec::gpu::WgpuContext;
pub use crate::foundation::core::{ExecutorId, Hardware, HardwareSupport, Lane, TaskState};
pub use crate::foundation::error::{SchedError, SchedResult};
pub use crate::queue::task_queue::{QueueBatch, TaskQueue};
pub use crate::scheduler::observer::{
    RenderProducer, SchedulerObserver, SharedProducer, Signal, SignalRecorder,
};
pub use crate::scheduler::opts::SchedulerOpts;
pub use crate::scheduler::task_scheduler::{Scheduler, SchedulerStats};
pub use crate::task::core::TaskCore;
pub use crate::task::step::{StepTask, StepTaskBuilder};
pub use crate::task::{Task, TaskHandle, same_task};

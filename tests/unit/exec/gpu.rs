use super::*;
use crate::{
    foundation::core::{HardwareSupport, TaskState},
    task::step::StepTask,
};
use std::{sync::mpsc, time::Duration};

fn gpu_task(name: &str) -> TaskHandle {
    let task: TaskHandle = StepTask::builder(name)
        .support(HardwareSupport::CpuOrGpu)
        .step(|ctx| {
            assert_eq!(ctx.hardware(), Hardware::Gpu);
            assert!(ctx.gpu_device().is_some());
            Ok(())
        })
        .build();
    task.task_queued();
    task
}

#[test]
fn uninitialized_stage_holds_work() {
    let (tx, _rx) = mpsc::channel();
    let mut gpu = GpuPostProcessor::new();
    assert!(!gpu.is_initialized());
    gpu.add_to_process(gpu_task("a"), &tx);
    assert_eq!(gpu.pending_count(), 1);
    assert!(!gpu.has_finished());
}

#[test]
fn stage_runs_one_pass_at_a_time_in_fifo_order() {
    let (tx, rx) = mpsc::channel();
    let mut gpu = GpuPostProcessor::new();
    gpu.initialize(GpuBackendKind::Headless).unwrap();

    let a = gpu_task("a");
    let b = gpu_task("b");
    gpu.add_to_process(a.clone(), &tx);
    gpu.add_to_process(b.clone(), &tx);
    assert!(gpu.is_running(&a));
    assert_eq!(gpu.pending_count(), 1);

    let SchedEvent::GpuFinished { task } = rx.recv_timeout(Duration::from_secs(5)).unwrap() else {
        panic!("expected gpu completion");
    };
    assert!(same_task(&task, &a));
    gpu.task_done(&tx);
    assert!(gpu.is_running(&b));

    let SchedEvent::GpuFinished { task } = rx.recv_timeout(Duration::from_secs(5)).unwrap() else {
        panic!("expected gpu completion");
    };
    assert!(same_task(&task, &b));
    gpu.task_done(&tx);
    assert!(gpu.has_finished());
    assert_eq!(a.state(), TaskState::Processing);
}

#[test]
fn terminal_tasks_are_skipped() {
    let (tx, _rx) = mpsc::channel();
    let mut gpu = GpuPostProcessor::new();
    gpu.initialize(GpuBackendKind::Headless).unwrap();
    let task = gpu_task("canceled");
    task.cancel();
    gpu.add_to_process(task, &tx);
    assert!(gpu.has_finished());
}

#[test]
fn backend_kind_parses_from_config() {
    let kind: GpuBackendKind = serde_json::from_str("\"headless\"").unwrap();
    assert_eq!(kind, GpuBackendKind::Headless);
    assert_eq!(GpuDevice::open(kind).unwrap().kind(), GpuBackendKind::Headless);
}

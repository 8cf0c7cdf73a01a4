use super::*;
use crate::{
    foundation::core::{HardwareSupport, TaskState},
    scheduler::observer::{Signal, SignalRecorder},
    task::step::StepTask,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

fn scheduler(cpu_threads: usize) -> (Scheduler, SignalRecorder) {
    let mut sched = Scheduler::new(SchedulerOpts {
        cpu_threads: Some(cpu_threads),
        ..SchedulerOpts::default()
    })
    .unwrap();
    let recorder = SignalRecorder::new();
    sched.add_observer(Box::new(recorder.clone()));
    (sched, recorder)
}

fn counting_task(name: &str, runs: &Arc<AtomicUsize>) -> TaskHandle {
    let runs = Arc::clone(runs);
    StepTask::builder(name)
        .step(move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
}

#[test]
fn idle_scheduler_reports_capacity() {
    let (mut sched, recorder) = scheduler(2);
    sched.process_next_tasks();
    assert!(recorder.signals().contains(&Signal::CpuUsage(0)));
    assert!(recorder.signals().contains(&Signal::FreeThreads));
    assert_eq!(recorder.count(|s| *s == Signal::AllFinished), 0);
    assert!(sched.is_idle());
}

#[test]
fn que_tasks_with_nothing_scheduled_never_signals_completion() {
    let (mut sched, recorder) = scheduler(1);
    sched.que_tasks().unwrap();
    sched.que_tasks().unwrap();
    assert_eq!(recorder.count(|s| *s == Signal::AllFinished), 0);
}

#[test]
fn canceled_cpu_task_is_discarded_without_an_executor() {
    let (mut sched, recorder) = scheduler(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let task = counting_task("canceled", &runs);
    task.cancel();

    sched.schedule_cpu_task(task.clone());
    sched.que_tasks().unwrap();

    assert_eq!(sched.cpu_used(), 0);
    assert_eq!(sched.queued_cpu_count(), 0);
    assert_eq!(sched.stats().skipped_terminal, 1);
    assert_eq!(sched.stats().cpu_dispatched, 0);
    assert_eq!(task.state(), TaskState::Canceled);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.count(|s| *s == Signal::AllFinished), 1);
}

#[test]
fn canceled_disk_task_is_dropped_from_pending() {
    let (mut sched, recorder) = scheduler(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let task = counting_task("write", &runs);
    task.cancel();

    sched.schedule_hdd_task(task);
    sched.que_tasks().unwrap();

    assert_eq!(sched.pending_hdd_count(), 0);
    assert!(!sched.hdd_busy());
    assert_eq!(sched.stats().hdd_dispatched, 0);
    assert!(sched.is_idle());
    assert_eq!(recorder.count(|s| *s == Signal::AllFinished), 1);
}

#[test]
fn part_finished_from_a_non_primary_executor_is_ignored() {
    let (mut sched, _recorder) = scheduler(1);
    let primary = sched.hdd_primary();
    sched
        .handle_event(SchedEvent::HddPartFinished {
            executor: ExecutorId::hdd(9),
        })
        .unwrap();
    assert_eq!(sched.hdd_primary(), primary);
    assert_eq!(sched.stats().hdd_rotations, 0);
}

#[test]
fn part_finished_on_an_idle_primary_does_not_rotate() {
    let (mut sched, _recorder) = scheduler(1);
    let primary = sched.hdd_primary();
    sched
        .handle_event(SchedEvent::HddPartFinished { executor: primary })
        .unwrap();
    assert_eq!(sched.hdd_primary(), primary);
    assert_eq!(sched.hdd_executor_count(), 2);
}

#[test]
fn gpu_submission_without_gpu_lane_falls_back_to_cpu() {
    let (mut sched, _recorder) = scheduler(1);
    let task: TaskHandle = StepTask::builder("post")
        .support(HardwareSupport::CpuOrGpu)
        .step(|_| Ok(()))
        .build();
    sched.schedule_gpu_task(task);
    assert_eq!(sched.scheduled_cpu_count(), 1);
    assert!(sched.gpu_idle());
}

#[test]
fn gpu_submission_before_any_cpu_pass_falls_back_to_cpu() {
    let (mut sched, _recorder) = scheduler(1);
    sched.initialize_gpu(GpuBackendKind::Headless).unwrap();
    let task: TaskHandle = StepTask::builder("post")
        .support(HardwareSupport::CpuOrGpu)
        .step(|_| Ok(()))
        .build();
    sched.schedule_gpu_task(task);
    assert_eq!(sched.scheduled_cpu_count(), 1);
    assert_eq!(sched.stats().gpu_dispatched, 0);
}

#[test]
fn stale_cpu_completion_does_not_free_an_extra_executor() {
    let (mut sched, _recorder) = scheduler(2);
    let task: TaskHandle = StepTask::builder("ghost").step(|_| Ok(())).build();
    sched
        .handle_event(SchedEvent::CpuFinished {
            task,
            executor: ExecutorId::cpu(1),
        })
        .unwrap();
    assert_eq!(sched.cpu_free(), 2);
    assert_eq!(sched.cpu_used(), 0);
}

#[test]
fn stall_threshold_disabled_reports_nothing() {
    let (sched, _recorder) = scheduler(1);
    assert!(sched.stalled_executors().is_empty());
}

#[test]
fn disk_backlog_invites_producers_only_while_the_disk_is_busy() {
    let (mut sched, _recorder) = scheduler(1);
    assert!(!sched.should_que_more_hdd_tasks());

    let (release, blocked) = mpsc::channel::<()>();
    let blocked = std::sync::Mutex::new(blocked);
    let write: TaskHandle = StepTask::builder("write")
        .step(move |_| {
            let _ = blocked.lock().unwrap().recv();
            Ok(())
        })
        .build();
    sched.schedule_hdd_task(write);
    sched.que_tasks().unwrap();
    assert!(sched.hdd_busy());
    assert_eq!(sched.pending_hdd_count(), 0);
    assert!(sched.should_que_more_hdd_tasks());

    drop(release);
    sched.run_until_idle(Duration::from_secs(10)).unwrap();
    assert!(!sched.hdd_busy());
    assert!(!sched.should_que_more_hdd_tasks());
}

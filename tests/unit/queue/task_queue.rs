use super::*;
use crate::{
    foundation::core::{HardwareSupport, TaskState},
    task::step::StepTask,
};

fn task(name: &str, support: HardwareSupport) -> TaskHandle {
    StepTask::builder(name)
        .support(support)
        .step(|_| Ok(()))
        .step(|_| Ok(()))
        .build()
}

#[test]
fn open_batch_is_not_extractable() {
    let mut q = TaskQueue::new();
    q.begin_batch().unwrap();
    for i in 0..5 {
        q.push(task(&format!("t{i}"), HardwareSupport::CpuOnly)).unwrap();
    }
    assert_eq!(q.len(), 5);
    assert!(q.take_for_cpu().is_none());

    q.end_batch().unwrap();
    let mut taken = 0;
    while q.take_for_cpu().is_some() {
        taken += 1;
    }
    assert_eq!(taken, 5);
    assert!(q.is_empty());
    assert_eq!(q.batch_count(), 0);
}

#[test]
fn push_marks_tasks_queued_and_requires_a_batch() {
    let mut q = TaskQueue::new();
    let t = task("t", HardwareSupport::CpuOnly);
    assert!(q.push(t.clone()).is_err());
    assert_eq!(t.state(), TaskState::NotQueued);

    q.begin_batch().unwrap();
    q.push(t.clone()).unwrap();
    assert_eq!(t.state(), TaskState::Queued);
    assert!(q.contains(&t));
}

#[test]
fn batch_brackets_must_balance() {
    let mut q = TaskQueue::new();
    assert!(q.end_batch().is_err());
    q.begin_batch().unwrap();
    assert!(q.begin_batch().is_err());
    q.end_batch().unwrap();
}

#[test]
fn batches_drain_oldest_first_and_empty_batches_vanish() {
    let mut q = TaskQueue::new();
    let first = task("first", HardwareSupport::CpuOnly);
    let second = task("second", HardwareSupport::CpuOnly);

    q.begin_batch().unwrap();
    q.push(first.clone()).unwrap();
    q.end_batch().unwrap();
    q.begin_batch().unwrap();
    q.end_batch().unwrap();
    q.begin_batch().unwrap();
    q.push(second.clone()).unwrap();
    q.end_batch().unwrap();

    assert_eq!(q.batch_count(), 2);
    assert!(same_task(&q.take_for_cpu().unwrap(), &first));
    assert_eq!(q.batch_count(), 1);
    assert!(same_task(&q.take_for_cpu().unwrap(), &second));
}

#[test]
fn gpu_extraction_requires_a_completed_cpu_pass() {
    let mut q = TaskQueue::new();
    let fresh = task("fresh", HardwareSupport::CpuOrGpu);
    let cpu_only = task("cpu-only", HardwareSupport::CpuOnly);
    let post = task("post", HardwareSupport::CpuOrGpu);

    // `post` went through one CPU pass and asked for another.
    post.task_queued();
    post.about_to_process(Hardware::Cpu);
    assert!(post.next_step());

    q.begin_batch().unwrap();
    q.push(fresh.clone()).unwrap();
    q.push(cpu_only.clone()).unwrap();
    q.push(post.clone()).unwrap();
    q.end_batch().unwrap();

    let gpu = q.take_for_gpu().unwrap();
    assert!(same_task(&gpu, &post));
    assert!(q.take_for_gpu().is_none());
    assert!(!q.contains(&post));
    assert_eq!(q.len(), 2);
}

#[test]
fn terminal_tasks_surface_through_cpu_extraction() {
    let mut q = TaskQueue::new();
    let canceled = task("canceled", HardwareSupport::CpuOnly);
    q.begin_batch().unwrap();
    q.push(canceled.clone()).unwrap();
    q.end_batch().unwrap();

    canceled.cancel();
    assert!(q.take_for_gpu().is_none());
    let t = q.take_for_cpu().unwrap();
    assert!(t.state().is_terminal());
    assert!(q.is_empty());
}

#[test]
fn unready_tasks_are_skipped_not_removed() {
    let mut q = TaskQueue::new();
    let blocked = StepTask::builder("blocked")
        .step(|_| Ok(()))
        .ready_when(|| false)
        .build();
    let free = task("free", HardwareSupport::CpuOnly);
    let blocked: TaskHandle = blocked;

    q.begin_batch().unwrap();
    q.push(blocked.clone()).unwrap();
    q.push(free.clone()).unwrap();
    q.end_batch().unwrap();

    assert!(same_task(&q.take_for_cpu().unwrap(), &free));
    assert!(q.take_for_cpu().is_none());
    assert!(q.contains(&blocked));
}

#[test]
fn queue_batch_counts_pushes() {
    let mut q = TaskQueue::new();
    q.begin_batch().unwrap();
    {
        let mut batch = QueueBatch::new(&mut q, HashSet::new());
        batch.push(task("a", HardwareSupport::CpuOnly)).unwrap();
        batch.push(task("b", HardwareSupport::CpuOnly)).unwrap();
        assert_eq!(batch.pushed(), 2);
    }
    q.end_batch().unwrap();
    assert_eq!(q.len(), 2);
}

#[test]
fn queue_batch_ignores_tasks_already_held() {
    let mut q = TaskQueue::new();
    let queued = task("queued", HardwareSupport::CpuOnly);
    let running = task("running", HardwareSupport::CpuOnly);
    q.begin_batch().unwrap();
    q.push(queued.clone()).unwrap();
    q.end_batch().unwrap();

    q.begin_batch().unwrap();
    {
        let held = HashSet::from([task_key(&running)]);
        let mut batch = QueueBatch::new(&mut q, held);
        batch.push(queued.clone()).unwrap();
        batch.push(running.clone()).unwrap();
        let fresh = task("fresh", HardwareSupport::CpuOnly);
        batch.push(fresh.clone()).unwrap();
        batch.push(fresh).unwrap();
        assert_eq!(batch.pushed(), 1);
        assert_eq!(batch.skipped(), 3);
    }
    q.end_batch().unwrap();

    assert_eq!(q.len(), 2);
    assert!(!q.contains(&running));
    assert_eq!(running.state(), TaskState::NotQueued);
}

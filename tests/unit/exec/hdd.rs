use super::*;
use crate::{foundation::core::Hardware, task::step::StepTask};
use std::{sync::mpsc, time::Duration};

#[test]
fn part_finished_rotation_recycles_the_demoted_executor() {
    let (tx, rx) = mpsc::channel();
    let mut set = HddExecutorSet::new(1).unwrap();
    assert_eq!(set.executor_count(), 2);
    let first = set.primary();

    let task: TaskHandle = StepTask::builder("write")
        .step(|ctx| {
            ctx.signal_part_finished();
            Ok(())
        })
        .build();
    task.task_queued();
    task.about_to_process(Hardware::Hdd);
    set.dispatch(task, &tx);
    assert!(set.busy());

    let part = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(part, SchedEvent::HddPartFinished { executor } if executor == first));
    assert!(set.switch_to_backup().unwrap());
    assert!(!set.busy());
    assert_ne!(set.primary(), first);
    assert_eq!(set.free_backup_count(), 0);

    let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let SchedEvent::HddFinished { executor, .. } = done else {
        panic!("expected disk completion");
    };
    assert_eq!(executor, first);
    set.on_finished(executor);
    assert_eq!(set.free_backup_count(), 1);
    assert!(!set.in_flight());
}

#[test]
fn rotation_grows_the_set_when_no_backup_is_free() {
    let (tx, _rx) = mpsc::channel();
    let mut set = HddExecutorSet::new(0).unwrap();
    assert_eq!(set.executor_count(), 1);
    assert!(!set.switch_to_backup().unwrap(), "idle lane never rotates");

    let task: TaskHandle = StepTask::builder("noop").step(|_| Ok(())).build();
    task.task_queued();
    set.dispatch(task, &tx);
    assert!(set.switch_to_backup().unwrap());
    assert_eq!(set.executor_count(), 2);
    assert_eq!(set.primary(), ExecutorId::hdd(1));
}

#[test]
fn primary_completion_clears_busy_without_rotation() {
    let (tx, rx) = mpsc::channel();
    let mut set = HddExecutorSet::new(1).unwrap();
    let task: TaskHandle = StepTask::builder("noop").step(|_| Ok(())).build();
    task.task_queued();
    set.dispatch(task, &tx);

    let SchedEvent::HddFinished { executor, .. } = rx.recv_timeout(Duration::from_secs(5)).unwrap()
    else {
        panic!("expected disk completion");
    };
    set.on_finished(executor);
    assert!(!set.busy());
    assert_eq!(set.primary(), executor);
    assert_eq!(set.free_backup_count(), 1);
}

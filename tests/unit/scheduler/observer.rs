use super::*;

#[test]
fn recorder_clones_share_one_log() {
    let recorder = SignalRecorder::new();
    let mut observer: Box<dyn SchedulerObserver> = Box::new(recorder.clone());

    observer.cpu_usage_changed(3);
    observer.cpu_usage_changed(1);
    observer.hdd_usage_changed(true);
    observer.free_threads_available();
    observer.all_tasks_finished();

    assert_eq!(
        recorder.signals(),
        vec![
            Signal::CpuUsage(3),
            Signal::CpuUsage(1),
            Signal::HddUsage(true),
            Signal::FreeThreads,
            Signal::AllFinished,
        ]
    );
    assert_eq!(recorder.peak_cpu_usage(), 3);
    assert_eq!(recorder.count(|s| matches!(s, Signal::CpuUsage(_))), 2);

    recorder.clear();
    assert!(recorder.signals().is_empty());
    assert_eq!(recorder.peak_cpu_usage(), 0);
}

#[test]
fn producer_defaults_are_visible_and_keep_no_state() {
    struct Empty;
    impl RenderProducer for Empty {
        fn que_scheduled_tasks(&mut self, _batch: &mut QueueBatch<'_>) {}
    }
    let mut p = Empty;
    assert!(p.is_visible());
    p.clear_render_data();
}

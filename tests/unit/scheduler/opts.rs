use super::*;

#[test]
fn empty_object_yields_defaults() {
    let opts = SchedulerOpts::from_json_str("{}").unwrap();
    assert_eq!(opts, SchedulerOpts::default());
    assert_eq!(opts.hdd_backup_executors, 1);
    assert_eq!(opts.hdd_backlog_low_water, 2);
    assert!(opts.resolved_cpu_threads() >= 1);
}

#[test]
fn explicit_fields_are_honored() {
    let opts = SchedulerOpts::from_json_str(
        r#"{ "cpu_threads": 4, "gpu": "headless", "stall_warning_ms": 250 }"#,
    )
    .unwrap();
    assert_eq!(opts.resolved_cpu_threads(), 4);
    assert_eq!(opts.gpu, Some(GpuBackendKind::Headless));
    assert_eq!(opts.stall_warning(), Some(Duration::from_millis(250)));
}

#[test]
fn zero_threads_is_rejected() {
    let err = SchedulerOpts::from_json_str(r#"{ "cpu_threads": 0 }"#).unwrap_err();
    assert!(err.to_string().contains("cpu_threads"));
}

#[test]
fn unknown_keys_are_rejected() {
    let err = SchedulerOpts::from_json_str(r#"{ "threads": 2 }"#).unwrap_err();
    assert!(err.to_string().contains("serialization error:"));
}

#[test]
fn missing_file_reports_the_path() {
    let err = SchedulerOpts::from_json_file(Path::new("/definitely/not/here.json")).unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here.json"));
}

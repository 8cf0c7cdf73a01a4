use super::*;

#[test]
fn single_pass_lifecycle() {
    let core = TaskCore::new(HardwareSupport::CpuOnly);
    assert_eq!(core.state(), TaskState::NotQueued);
    assert!(core.mark_queued());
    assert!(core.begin_pass(Hardware::Cpu));
    assert_eq!(core.state(), TaskState::Processing);
    assert_eq!(core.last_hardware(), Some(Hardware::Cpu));
    assert!(core.finish());
    assert_eq!(core.state(), TaskState::Finished);
    assert_eq!(core.passes(), 1);
}

#[test]
fn continuation_loops_back_to_queued() {
    let core = TaskCore::new(HardwareSupport::CpuOrGpu);
    core.mark_queued();
    core.begin_pass(Hardware::Cpu);
    assert!(core.mark_queued());
    assert!(core.begin_pass(Hardware::Gpu));
    assert_eq!(core.last_hardware(), Some(Hardware::Gpu));
    assert_eq!(core.passes(), 2);
}

#[test]
fn terminal_states_are_sticky() {
    let core = TaskCore::new(HardwareSupport::CpuOnly);
    core.mark_queued();
    assert!(core.cancel());
    assert!(!core.mark_queued());
    assert!(!core.begin_pass(Hardware::Cpu));
    assert!(!core.finish());
    assert!(!core.cancel());
    assert_eq!(core.state(), TaskState::Canceled);
}

#[test]
fn begin_pass_requires_queued() {
    let core = TaskCore::new(HardwareSupport::CpuOnly);
    assert!(!core.begin_pass(Hardware::Hdd));
    assert_eq!(core.state(), TaskState::NotQueued);
    assert_eq!(core.last_hardware(), None);
}

#[test]
fn controller_binding_is_recorded() {
    let core = TaskCore::new(HardwareSupport::CpuOnly);
    assert_eq!(core.controller(), None);
    core.set_controller(ExecutorId::hdd(2));
    assert_eq!(core.controller(), Some(ExecutorId::hdd(2)));
}

pub(crate) mod observer;
pub(crate) mod opts;
pub(crate) mod task_scheduler;

pub(crate) mod task_queue;

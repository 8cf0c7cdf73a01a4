use std::{
    collections::VecDeque,
    sync::{Arc, mpsc::Sender},
};

use crate::{
    exec::{ExecCtx, SchedEvent, build_worker_pool, run_pass},
    foundation::core::Hardware,
    foundation::error::{SchedError, SchedResult},
    task::{TaskHandle, same_task},
};

/// Device backing the GPU post-processing stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuBackendKind {
    /// No device; GPU passes run on the stage's own worker thread. Always available.
    Headless,
    /// A `wgpu` device acquired at initialization.
    #[cfg(feature = "gpu")]
    Wgpu,
}

/// `wgpu` handles shared with GPU passes.
#[cfg(feature = "gpu")]
pub struct WgpuContext {
    /// Logical device.
    pub device: wgpu::Device,
    /// Submission queue.
    pub queue: wgpu::Queue,
    /// Adapter the device was created from.
    pub adapter_info: wgpu::AdapterInfo,
}

/// The device a GPU pass can use, see [`crate::ExecCtx::gpu_device`].
pub struct GpuDevice {
    kind: GpuBackendKind,
    #[cfg(feature = "gpu")]
    wgpu: Option<WgpuContext>,
}

impl GpuDevice {
    /// Open a device of the given kind.
    pub fn open(kind: GpuBackendKind) -> SchedResult<Self> {
        match kind {
            GpuBackendKind::Headless => Ok(Self {
                kind,
                #[cfg(feature = "gpu")]
                wgpu: None,
            }),
            #[cfg(feature = "gpu")]
            GpuBackendKind::Wgpu => Ok(Self {
                kind,
                wgpu: Some(open_wgpu()?),
            }),
        }
    }

    /// Which backend this device is.
    pub fn kind(&self) -> GpuBackendKind {
        self.kind
    }

    /// `wgpu` handles, when opened with [`GpuBackendKind::Wgpu`].
    #[cfg(feature = "gpu")]
    pub fn wgpu(&self) -> Option<&WgpuContext> {
        self.wgpu.as_ref()
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice").field("kind", &self.kind).finish()
    }
}

#[cfg(feature = "gpu")]
fn open_wgpu() -> SchedResult<WgpuContext> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .map_err(|e| match e {
        wgpu::RequestAdapterError::NotFound { .. } => {
            SchedError::gpu_init("no gpu adapter available")
        }
        other => SchedError::gpu_init(format!("wgpu request_adapter failed: {other:?}")),
    })?;

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("render_sched_post"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        experimental_features: wgpu::ExperimentalFeatures::default(),
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::Off,
    }))
    .map_err(|e| SchedError::gpu_init(format!("wgpu request_device failed: {e:?}")))?;

    Ok(WgpuContext {
        adapter_info: adapter.get_info(),
        device,
        queue,
    })
}

/// Single asynchronous post-processing stage with its own FIFO.
///
/// One pass runs at a time; [`Self::has_finished`] is `true` once the FIFO is drained and
/// nothing is running.
pub(crate) struct GpuPostProcessor {
    device: Option<Arc<GpuDevice>>,
    pool: Option<rayon::ThreadPool>,
    pending: VecDeque<TaskHandle>,
    in_flight: Option<TaskHandle>,
}

impl GpuPostProcessor {
    pub(crate) fn new() -> Self {
        Self {
            device: None,
            pool: None,
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    pub(crate) fn initialize(&mut self, kind: GpuBackendKind) -> SchedResult<()> {
        let device = GpuDevice::open(kind).map_err(|e| {
            SchedError::gpu_init(format!("failed to initialize gpu for post-processing: {e}"))
        })?;
        let pool = build_worker_pool(1, "sched-gpu")?;
        self.device = Some(Arc::new(device));
        self.pool = Some(pool);
        tracing::debug!(?kind, "gpu post-processing initialized");
        Ok(())
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub(crate) fn has_finished(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn add_to_process(&mut self, task: TaskHandle, events: &Sender<SchedEvent>) {
        self.pending.push_back(task);
        self.kick(events);
    }

    /// Bookkeeping for a completed pass; starts the next one if any.
    pub(crate) fn task_done(&mut self, events: &Sender<SchedEvent>) {
        self.in_flight = None;
        self.kick(events);
    }

    pub(crate) fn is_running(&self, task: &TaskHandle) -> bool {
        self.in_flight.as_ref().is_some_and(|t| same_task(t, task))
    }

    /// The pass in flight, then the ones waiting behind it.
    pub(crate) fn tasks(&self) -> impl Iterator<Item = &TaskHandle> {
        self.in_flight.iter().chain(&self.pending)
    }

    fn kick(&mut self, events: &Sender<SchedEvent>) {
        if self.in_flight.is_some() {
            return;
        }
        let (Some(device), Some(pool)) = (self.device.as_ref(), self.pool.as_ref()) else {
            return;
        };

        while let Some(task) = self.pending.pop_front() {
            if task.state().is_terminal() {
                tracing::trace!(task = task.name(), "dropping terminal task from gpu fifo");
                continue;
            }
            task.about_to_process(Hardware::Gpu);
            self.in_flight = Some(task.clone());

            let device = Arc::clone(device);
            let tx = events.clone();
            pool.spawn(move || {
                run_pass(&task, &ExecCtx::gpu(&device));
                let _ = tx.send(SchedEvent::GpuFinished { task });
            });
            break;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/exec/gpu.rs"]
mod tests;

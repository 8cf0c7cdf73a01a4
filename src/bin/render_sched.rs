use std::{
    cell::{Cell, RefCell},
    fs::File,
    path::{Path, PathBuf},
    rc::Rc,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use render_sched::{
    ExecCtx, GpuBackendKind, Hardware, HardwareSupport, QueueBatch, RenderProducer, SchedError,
    SchedResult, Scheduler, SchedulerObserver, SchedulerOpts, Task, TaskCore, TaskState,
};

#[derive(Parser, Debug)]
#[command(name = "render-sched", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a synthetic timeline through the scheduler and write frames to a disk cache.
    Demo(DemoArgs),
    /// Print the default scheduler options as JSON.
    Config,
}

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Number of frames on the timeline.
    #[arg(long, default_value_t = 48)]
    frames: u32,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 320)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 180)]
    height: u32,

    /// Extra CPU passes per frame between raster and post-processing.
    #[arg(long, default_value_t = 1)]
    steps: u32,

    /// Frames the scene admits per queue batch.
    #[arg(long, default_value_t = 8)]
    batch: u32,

    /// Post-process on the GPU stage (headless unless built with the `gpu` feature).
    #[arg(long)]
    gpu: bool,

    /// Cancel every K-th frame right after it is queued.
    #[arg(long)]
    cancel_every: Option<u32>,

    /// Directory for cached PNG frames (default: a temp directory).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Scheduler options JSON (see `render-sched config`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up if the timeline has not settled after this many seconds.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Print stats as JSON instead of a summary.
    #[arg(long)]
    json: bool,

    /// Log scheduler activity to stderr.
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo(args) => cmd_demo(args),
        Command::Config => cmd_config(),
    }
}

fn cmd_config() -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&SchedulerOpts::default())
        .context("serialize default scheduler options")?;
    println!("{json}");
    Ok(())
}

fn cmd_demo(args: DemoArgs) -> anyhow::Result<()> {
    if args.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }
    if args.width == 0 || args.height == 0 {
        anyhow::bail!("frame size must be non-zero, got {}x{}", args.width, args.height);
    }

    let mut opts = match &args.config {
        Some(path) => SchedulerOpts::from_json_file(path)?,
        None => SchedulerOpts::default(),
    };
    if args.gpu && opts.gpu.is_none() {
        opts.gpu = Some(default_gpu_backend());
    }

    let cache_dir = args
        .cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("render-sched-cache"));
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("create cache dir '{}'", cache_dir.display()))?;

    let mut sched = Scheduler::new(opts)?;
    let usage = UsageTracker::default();
    sched.add_observer(Box::new(usage.clone()));

    let scene = Rc::new(RefCell::new(TimelineScene {
        format: FrameFormat {
            width: args.width,
            height: args.height,
            extra_steps: args.steps,
            support: if sched.gpu_initialized() {
                HardwareSupport::CpuOrGpu
            } else {
                HardwareSupport::CpuOnly
            },
        },
        frames: args.frames,
        next_frame: 0,
        per_batch: args.batch.max(1),
        cancel_every: args.cancel_every.filter(|k| *k > 0),
        in_progress: Vec::new(),
        canceled: 0,
    }));
    sched.add_producer(scene.clone());

    let deadline = Duration::from_secs(args.timeout_secs);
    let start = Instant::now();
    let mut written = 0usize;
    let mut writes: Vec<Arc<CacheWriteTask>> = Vec::new();

    loop {
        for frame in scene.borrow_mut().take_finished() {
            let path = cache_dir.join(format!("frame_{:05}.png", frame.index));
            let write = Arc::new(CacheWriteTask::new(frame, path));
            writes.push(Arc::clone(&write));
            sched.schedule_hdd_task(write);
        }
        sched.que_tasks()?;

        writes.retain(|w| match w.state() {
            TaskState::Finished => {
                written += 1;
                false
            }
            TaskState::Canceled => false,
            _ => true,
        });

        if scene.borrow().is_done() && writes.is_empty() && sched.is_idle() {
            break;
        }
        if start.elapsed() >= deadline {
            return Err(SchedError::stalled(format!(
                "timeline did not settle within {}s",
                args.timeout_secs
            ))
            .into());
        }
        sched.wait_event(Duration::from_millis(50))?;
        sched.try_process_events()?;
    }

    let elapsed = start.elapsed();
    let stats = sched.stats();
    let canceled = scene.borrow().canceled;

    if args.json {
        let report = serde_json::json!({
            "frames": args.frames,
            "written": written,
            "canceled": canceled,
            "elapsed_ms": elapsed.as_millis() as u64,
            "peak_cpu_usage": usage.peak.get(),
            "cpu_executors": sched.cpu_total(),
            "hdd_executors": sched.hdd_executor_count(),
            "gpu": sched.gpu_initialized(),
            "scheduler": stats,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!(
            "rendered {} frames ({written} written, {canceled} canceled) in {:.2}s",
            args.frames,
            elapsed.as_secs_f64()
        );
        eprintln!(
            "cpu: {} executors, peak {} busy, {} passes ({} continuations)",
            sched.cpu_total(),
            usage.peak.get(),
            stats.cpu_dispatched,
            stats.continuations
        );
        eprintln!(
            "gpu: {} passes; disk: {} writes, {} rotations, {} executors",
            stats.gpu_dispatched,
            stats.hdd_dispatched,
            stats.hdd_rotations,
            sched.hdd_executor_count()
        );
        eprintln!("cache: {}", cache_dir.display());
    }
    Ok(())
}

#[cfg(feature = "gpu")]
fn default_gpu_backend() -> GpuBackendKind {
    GpuBackendKind::Wgpu
}

#[cfg(not(feature = "gpu"))]
fn default_gpu_backend() -> GpuBackendKind {
    GpuBackendKind::Headless
}

#[derive(Clone, Default)]
struct UsageTracker {
    peak: Rc<Cell<usize>>,
}

impl SchedulerObserver for UsageTracker {
    fn cpu_usage_changed(&mut self, used: usize) {
        self.peak.set(self.peak.get().max(used));
    }
}

#[derive(Clone, Copy)]
struct FrameFormat {
    width: u32,
    height: u32,
    extra_steps: u32,
    support: HardwareSupport,
}

struct TimelineScene {
    format: FrameFormat,
    frames: u32,
    next_frame: u32,
    per_batch: u32,
    cancel_every: Option<u32>,
    in_progress: Vec<Arc<FrameTask>>,
    canceled: usize,
}

impl TimelineScene {
    fn is_done(&self) -> bool {
        self.next_frame >= self.frames && self.in_progress.is_empty()
    }

    /// Frames whose render finished; canceled frames are counted and forgotten.
    fn take_finished(&mut self) -> Vec<Arc<FrameTask>> {
        let mut done = Vec::new();
        let mut canceled = 0;
        self.in_progress.retain(|f| match f.state() {
            TaskState::Finished => {
                done.push(Arc::clone(f));
                false
            }
            TaskState::Canceled => {
                canceled += 1;
                false
            }
            _ => true,
        });
        self.canceled += canceled;
        done
    }
}

impl RenderProducer for TimelineScene {
    fn que_scheduled_tasks(&mut self, batch: &mut QueueBatch<'_>) {
        let end = self.frames.min(self.next_frame + self.per_batch);
        for index in self.next_frame..end {
            let frame = Arc::new(FrameTask::new(index, self.format));
            if let Err(e) = batch.push(frame.clone()) {
                tracing::warn!(frame = index, error = %e, "failed to queue frame");
                return;
            }
            if self.cancel_every.is_some_and(|k| (index + 1) % k == 0) {
                frame.cancel();
            }
            self.in_progress.push(frame);
            self.next_frame = index + 1;
        }
    }
}

/// One timeline frame: raster, `extra_steps` refinement passes, then post-processing.
struct FrameTask {
    core: TaskCore,
    name: String,
    index: u32,
    format: FrameFormat,
    step: AtomicUsize,
    pixels: Mutex<Vec<u8>>,
}

impl FrameTask {
    fn new(index: u32, format: FrameFormat) -> Self {
        Self {
            core: TaskCore::new(format.support),
            name: format!("frame {index}"),
            index,
            format,
            step: AtomicUsize::new(0),
            pixels: Mutex::new(Vec::new()),
        }
    }

    fn total_steps(&self) -> usize {
        self.format.extra_steps as usize + 2
    }

    fn pixels(&self) -> SchedResult<MutexGuard<'_, Vec<u8>>> {
        self.pixels
            .lock()
            .map_err(|_| SchedError::executor(format!("{} pixel buffer poisoned", self.name)))
    }

    fn raster(&self, px: &mut Vec<u8>) {
        let (w, h) = (self.format.width as usize, self.format.height as usize);
        px.clear();
        px.reserve(w * h * 4);
        let phase = (self.index as usize * 7) % 256;
        for y in 0..h {
            for x in 0..w {
                px.extend_from_slice(&[
                    ((x * 255 / w.max(1) + phase) % 256) as u8,
                    (y * 255 / h.max(1)) as u8,
                    phase as u8,
                    255,
                ]);
            }
        }
    }

    fn smooth_rows(&self, px: &mut [u8]) {
        let row = self.format.width as usize * 4;
        for line in px.chunks_exact_mut(row) {
            for i in 4..line.len() {
                line[i] = ((u16::from(line[i]) + u16::from(line[i - 4])) / 2) as u8;
            }
        }
    }

    fn vignette(&self, px: &mut [u8]) {
        let (w, h) = (self.format.width as f32, self.format.height as f32);
        for (i, p) in px.chunks_exact_mut(4).enumerate() {
            let x = (i % self.format.width as usize) as f32 / w - 0.5;
            let y = (i / self.format.width as usize) as f32 / h - 0.5;
            let k = (1.0 - (x * x + y * y) * 1.5).clamp(0.0, 1.0);
            for c in &mut p[..3] {
                *c = (f32::from(*c) * k) as u8;
            }
        }
    }
}

impl Task for FrameTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, ctx: &ExecCtx<'_>) -> SchedResult<()> {
        let step = self.step.load(Ordering::Acquire);
        let mut px = self.pixels()?;
        if step == 0 {
            self.raster(&mut px);
        } else if step + 1 < self.total_steps() {
            self.smooth_rows(&mut px);
        } else {
            self.vignette(&mut px);
            if ctx.hardware() == Hardware::Gpu {
                tracing::trace!(frame = self.index, "post-processed on gpu stage");
            }
        }
        Ok(())
    }

    fn next_step(&self) -> bool {
        self.step.fetch_add(1, Ordering::AcqRel) + 1 < self.total_steps()
    }
}

/// Writes a finished frame to the disk cache. The fsync is the trailing part of the pass.
struct CacheWriteTask {
    core: TaskCore,
    name: String,
    frame: Arc<FrameTask>,
    path: PathBuf,
}

impl CacheWriteTask {
    fn new(frame: Arc<FrameTask>, path: PathBuf) -> Self {
        Self {
            core: TaskCore::new(HardwareSupport::CpuOnly),
            name: format!("cache write {}", frame.index),
            frame,
            path,
        }
    }
}

impl Task for CacheWriteTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, ctx: &ExecCtx<'_>) -> SchedResult<()> {
        {
            let px = self.frame.pixels()?;
            write_png(&self.path, &px, self.frame.format.width, self.frame.format.height)?;
        }
        ctx.signal_part_finished();

        File::open(&self.path)
            .and_then(|f| f.sync_all())
            .with_context(|| format!("sync '{}'", self.path.display()))?;
        Ok(())
    }
}

fn write_png(path: &Path, px: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
    image::save_buffer_with_format(
        path,
        px,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", path.display()))
}

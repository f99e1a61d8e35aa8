//! Headless session driver.
//!
//! Plays the role of a browser page for one guest module: it runs the entry
//! point, then ticks the frame clock, feeds scripted keyboard input and stops
//! on a frame limit, when the guest goes idle, or on Ctrl+C.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use frame_bridge_common::{ConfigFile, RuntimeConfig, RuntimeError, ScriptedInput};
use frame_bridge_core::store::create_store;
use frame_bridge_core::{
    CompiledModule, ExecutionMetrics, ExecutionResult, GuestInstance, InstanceRunner, WasmEngine,
};

use crate::linker::create_instance_runner;

/// Epoch tick period. Per-call timeouts are counted in these ticks.
const EPOCH_TICK: Duration = Duration::from_millis(1);

/// What a session should do after the entry point returns.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    /// Stop after this many frame ticks.
    pub frames: Option<u64>,

    /// Keyboard input, delivered before the frame tick it names.
    pub input: Vec<ScriptedInput>,

    /// Stop once no frame is armed and no input is left.
    pub stop_when_idle: bool,

    /// Write the final path as an SVG document here.
    pub svg_out: Option<PathBuf>,

    /// SVG viewport `(width, height)`.
    pub svg_size: (u32, u32),
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            frames: None,
            input: Vec::new(),
            stop_when_idle: true,
            svg_out: None,
            svg_size: (512, 512),
        }
    }
}

impl SessionPlan {
    /// Build a plan from the `[session]` and `[[input]]` sections.
    pub fn from_config_file(file: &ConfigFile) -> Self {
        Self {
            frames: file.session.frames,
            input: file.input_schedule(),
            svg_out: file.session.svg_out.as_ref().map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Set the frame limit.
    pub fn with_frames(mut self, frames: u64) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Add scripted input. The schedule is kept ordered by frame.
    pub fn with_input(mut self, input: impl IntoIterator<Item = ScriptedInput>) -> Self {
        self.input.extend(input);
        self.input.sort_by_key(|entry| entry.frame);
        self
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The frame limit was reached.
    FrameLimit,
    /// No frame armed and no input left.
    Idle,
    /// Shutdown was requested.
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::FrameLimit => write!(f, "frame_limit"),
            StopReason::Idle => write!(f, "idle"),
            StopReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub entry_point: Option<String>,
    pub stop_reason: StopReason,
    /// Frame ticks run.
    pub frames: u64,
    pub metrics: ExecutionMetrics,
    /// Most recent lines printed by the guest, up to `max_console_lines`.
    pub console: Vec<String>,
    /// Final path description.
    pub path: Option<String>,
    /// Random bytes handed to the guest.
    pub random_bytes: u64,
    /// Event loops still alive at the end.
    pub live_loops: usize,
}

/// Host for guest sessions.
///
/// Owns the engine and a linker with every host import registered. One host
/// can run any number of sessions; each gets its own store.
pub struct HostSession {
    engine: WasmEngine,
    runner: InstanceRunner,
    config: RuntimeConfig,
}

impl HostSession {
    /// Create a session host.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created or host function
    /// registration fails.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let runner = create_instance_runner(&engine, &config)?;

        Ok(Self {
            engine,
            runner,
            config,
        })
    }

    /// Get the engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile a guest module from a `.wasm`, `.wat` or `.cwasm` file.
    pub fn load_module(&self, path: &Path) -> Result<CompiledModule, RuntimeError> {
        CompiledModule::from_file(self.engine.inner(), path)
    }

    /// Instantiate a module in a fresh store and run its entry point.
    ///
    /// Per-call timeouts only fire while an [`EpochTicker`] runs, so this is
    /// reached through [`HostSession::run_with_shutdown`] alone.
    #[instrument(skip_all)]
    async fn start(&self, module: &CompiledModule) -> Result<GuestInstance, RuntimeError> {
        let session_id = Uuid::new_v4().to_string();
        let store = create_store(
            &self.engine,
            &self.config.execution,
            &self.config.host,
            session_id,
        )?;

        let mut guest = self
            .runner
            .instantiate(module, store, &self.config.execution, &self.config.guest)
            .await?;

        match guest.run_main().await? {
            ExecutionResult::Success => Ok(guest),
            ExecutionResult::Trap { message, .. } => Err(RuntimeError::trap(message)),
        }
    }

    /// Run a full session, stopping early on Ctrl+C or SIGTERM.
    pub async fn run(
        &self,
        module: &CompiledModule,
        plan: &SessionPlan,
    ) -> Result<SessionReport, RuntimeError> {
        self.run_with_shutdown(module, plan, shutdown_signal()).await
    }

    /// Run a full session, stopping early when `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns the first guest failure, or an I/O error writing the SVG.
    pub async fn run_with_shutdown(
        &self,
        module: &CompiledModule,
        plan: &SessionPlan,
        shutdown: impl Future<Output = ()>,
    ) -> Result<SessionReport, RuntimeError> {
        let _ticker = EpochTicker::spawn(&self.engine);

        let mut guest = self.start(module).await?;
        let (stop_reason, frames) = self.drive(&mut guest, plan, shutdown).await?;

        guest.finish();
        let ctx = guest.context();
        let report = SessionReport {
            session_id: ctx.session_id.clone(),
            entry_point: guest.entry_point().map(str::to_string),
            stop_reason,
            frames,
            metrics: ctx.metrics.clone(),
            console: ctx.console.iter().map(|line| line.message.clone()).collect(),
            path: ctx.drawable.d.clone(),
            random_bytes: ctx.random.bytes_served(),
            live_loops: ctx.event_loops.live_count(),
        };

        if let Some(path) = &plan.svg_out {
            let (width, height) = plan.svg_size;
            let document = ctx.drawable.to_svg_document(width, height);
            tokio::fs::write(path, document).await?;
            info!(path = %path.display(), "SVG snapshot written");
        }

        info!(
            session_id = %report.session_id,
            stop_reason = %report.stop_reason,
            frames = report.frames,
            guest_calls = report.metrics.guest_calls,
            "Session finished"
        );

        Ok(report)
    }

    /// Tick frames and feed input until a stop condition holds.
    #[instrument(skip_all, fields(session_id = %guest.context().session_id))]
    async fn drive(
        &self,
        guest: &mut GuestInstance,
        plan: &SessionPlan,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(StopReason, u64), RuntimeError> {
        let mut input: VecDeque<&ScriptedInput> = plan.input.iter().collect();
        let mut clock = tokio::time::interval(self.config.host.frame_interval());
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut frame: u64 = 0;
        let reason = loop {
            if plan.frames.is_some_and(|limit| frame >= limit) {
                break StopReason::FrameLimit;
            }
            if plan.stop_when_idle && input.is_empty() && guest.is_idle() {
                break StopReason::Idle;
            }

            tokio::select! {
                biased;
                () = &mut shutdown => break StopReason::Interrupted,
                _ = clock.tick() => {}
            }

            while let Some(entry) = input.front().filter(|entry| entry.frame <= frame) {
                debug!(frame, kind = %entry.kind, key = %entry.event.key, "Scripted input");
                guest.key_event(entry.kind, &entry.event).await?;
                input.pop_front();
            }

            guest.animation_frame().await?;
            frame += 1;
        };

        debug!(%reason, frame, "Frame clock stopped");
        Ok((reason, frame))
    }
}

impl fmt::Debug for HostSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSession")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Background thread advancing the engine epoch.
///
/// A thread rather than a task: guest calls do not yield, so a task on the
/// same runtime could not tick while the guest runs.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn spawn(engine: &WasmEngine) -> Option<Self> {
        if !engine.is_epoch_enabled() {
            return None;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let engine = engine.clone();
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("epoch-ticker".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            });

        match handle {
            Ok(handle) => Some(Self {
                stop,
                handle: Some(handle),
            }),
            Err(e) => {
                warn!(error = %e, "Failed to start epoch ticker, timeouts disabled");
                None
            }
        }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

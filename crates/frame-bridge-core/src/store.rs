//! Per-session host context and store management.
//!
//! This module provides:
//! - [`HostContext`]: Session state reachable from host functions
//! - [`ConsoleLine`]: Captured guest `puts` output
//! - [`PathElement`]: The drawable element targeted by `svg_set_path`
//! - [`ExecutionMetrics`]: Counters for guest calls and dispatched events

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::event_loop::EventLoopRegistry;
use crate::random::RandomFill;
use frame_bridge_common::{ExecutionConfig, HostConfig, RuntimeError};

/// Per-session host context.
///
/// One context lives in the store for the whole life of a guest instance.
/// Host functions reach it through [`wasmtime::Caller::data_mut`]; the
/// instance reaches it between guest calls.
pub struct HostContext {
    /// WASI preview1 context. Built only when enabled in [`HostConfig`].
    wasi: Option<WasiP1Ctx>,

    /// Store resource limits.
    limits: StoreLimits,

    /// Unique session identifier for tracing.
    pub session_id: String,

    /// Event loops created by the guest.
    pub event_loops: EventLoopRegistry,

    /// Secure random fill service.
    pub random: RandomFill,

    /// Most recent lines printed by the guest, oldest first.
    pub console: VecDeque<ConsoleLine>,

    /// Cap on `console`.
    max_console_lines: usize,

    /// Drawable element updated by `svg_set_path`.
    pub drawable: PathElement,

    /// Session metrics.
    pub metrics: ExecutionMetrics,

    /// Echo console output to stdout.
    echo_console: bool,

    /// Host clock origin for `now()`.
    start_time: Instant,
}

/// A line printed by the guest.
#[derive(Debug, Clone)]
pub struct ConsoleLine {
    /// Decoded text.
    pub message: String,

    /// When the line was printed.
    pub timestamp: Instant,
}

/// The path element whose `d` attribute the guest sets.
#[derive(Debug, Clone, Default)]
pub struct PathElement {
    /// Element identifier.
    pub element_id: String,

    /// Current path description.
    pub d: Option<String>,

    /// Number of times the attribute was set.
    pub updates: u64,
}

impl PathElement {
    /// Render the element as a standalone SVG document.
    pub fn to_svg_document(&self, width: u32, height: u32) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" \
             viewBox=\"0 0 {width} {height}\">\n  <path id=\"{}\" d=\"{}\" fill=\"none\" stroke=\"black\"/>\n</svg>\n",
            escape_attr(&self.element_id),
            escape_attr(self.d.as_deref().unwrap_or_default()),
        )
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Session metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Guest calls made by the host (entry point and dispatches).
    pub guest_calls: u64,

    /// Animation frames dispatched to the guest.
    pub frames_dispatched: u64,

    /// Key events dispatched to the guest.
    pub key_events_dispatched: u64,

    /// Deliveries dropped because the target loop was dead or gone.
    pub suppressed_deliveries: u64,

    /// Fuel consumed across all guest calls.
    pub fuel_consumed: u64,

    /// Session duration, set when the session finishes.
    pub duration: Option<Duration>,
}

impl HostContext {
    /// Create a new host context.
    pub fn new(session_id: String, host: &HostConfig, execution: &ExecutionConfig) -> Self {
        let wasi = host.wasi.then(|| {
            WasiCtxBuilder::new()
                .inherit_stdout()
                .inherit_stderr()
                .build_p1()
        });

        let limits = StoreLimitsBuilder::new()
            .memory_size(execution.max_memory_bytes())
            .build();

        Self {
            wasi,
            limits,
            session_id,
            event_loops: EventLoopRegistry::new(),
            random: RandomFill::new(host.max_random_bytes, host.random_quota_bytes),
            console: VecDeque::new(),
            max_console_lines: host.max_console_lines,
            drawable: PathElement {
                element_id: host.svg_element_id.clone(),
                ..PathElement::default()
            },
            metrics: ExecutionMetrics::default(),
            echo_console: host.echo_console,
            start_time: Instant::now(),
        }
    }

    /// Milliseconds since the session started, with sub-millisecond precision.
    pub fn now_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1e3
    }

    /// Get elapsed time since the session started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns `true` if console output is echoed to stdout.
    pub fn echo_console(&self) -> bool {
        self.echo_console
    }

    /// Cap on retained console lines.
    pub fn max_console_lines(&self) -> usize {
        self.max_console_lines
    }

    /// WASI preview1 context.
    ///
    /// Only reached when WASI is linked. A store created with WASI disabled
    /// gets an empty context with no inherited stdio.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        self.wasi.get_or_insert_with(|| WasiCtxBuilder::new().build_p1())
    }

    /// Finalize metrics after the session.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

/// Create a new Wasmtime store for a guest session.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    execution: &ExecutionConfig,
    host: &HostConfig,
    session_id: String,
) -> Result<Store<HostContext>, RuntimeError> {
    let context = HostContext::new(session_id, host, execution);
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    arm_call_limits(&mut store, engine, execution)?;

    Ok(store)
}

/// Reset the per-call limits before entering the guest.
///
/// Refuels the store to `max_fuel` and sets the epoch deadline to
/// `timeout_ms` ticks from now.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn arm_call_limits(
    store: &mut Store<HostContext>,
    engine: &WasmEngine,
    execution: &ExecutionConfig,
) -> Result<(), RuntimeError> {
    if engine.is_fuel_enabled() {
        store
            .set_fuel(execution.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    // One epoch tick per millisecond, driven by the session
    if engine.is_epoch_enabled() {
        store.set_epoch_deadline(execution.timeout_ms);
    }

    Ok(())
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<HostContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<HostContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}

//! Guest instance lifecycle and event dispatch.
//!
//! This module provides [`InstanceRunner`], which links and instantiates a
//! guest module, and [`GuestInstance`], the live guest:
//!
//! 1. Instantiate the module with the host import table
//! 2. Resolve the guest exports (memory, allocator, entry point, callback)
//! 3. Run the entry point once
//! 4. Dispatch frames and key events through the callback for the rest of
//!    the session

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Instance, Linker, Memory, Store, Trap, TypedFunc};

use crate::CompiledModule;
use crate::WasmEngine;
use crate::event_loop::{LoopId, ScheduledFrame, WireEvent};
use crate::memory::{self, GuestSlice};
use crate::store::{HostContext, arm_call_limits, calculate_fuel_consumed, get_remaining_fuel};
use frame_bridge_common::{
    ExecutionConfig, GuestConfig, HostFunctionError, KeyEventKind, KeyboardEvent, MemoryError,
    RuntimeError,
};

/// Result of running the guest entry point.
#[derive(Debug)]
pub enum ExecutionResult {
    /// Execution completed successfully.
    Success,

    /// Execution completed with a trap (runtime error).
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },
}

impl ExecutionResult {
    /// Returns `true` if execution was successful.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success)
    }

    /// Returns `true` if execution trapped.
    pub fn is_trap(&self) -> bool {
        matches!(self, ExecutionResult::Trap { .. })
    }
}

/// Callback signature: `(loop_id, kind, code, char, flags)`.
type EventCallback = TypedFunc<(u32, u32, u32, u32, u32), ()>;

/// Guest exports resolved at instantiation.
struct GuestExports {
    memory: Option<Memory>,
    alloc: Option<TypedFunc<u32, u32>>,
    entry: Option<(String, TypedFunc<(), ()>)>,
    callback: Option<EventCallback>,
    config: GuestConfig,
}

impl GuestExports {
    fn resolve(
        instance: &Instance,
        store: &mut Store<HostContext>,
        config: &GuestConfig,
    ) -> Result<Self, RuntimeError> {
        let memory = instance.get_memory(&mut *store, &config.memory_export);

        let alloc = typed_export::<u32, u32>(instance, store, &config.alloc_export)?;
        let callback = typed_export(instance, store, &config.callback_export)?;

        let mut entry = None;
        for name in &config.entry_points {
            if let Some(func) = typed_export::<(), ()>(instance, store, name)? {
                entry = Some((name.clone(), func));
                break;
            }
        }

        debug!(
            memory = memory.is_some(),
            alloc = alloc.is_some(),
            callback = callback.is_some(),
            entry = entry.as_ref().map(|(name, _)| name.as_str()),
            "Guest exports resolved"
        );

        Ok(Self {
            memory,
            alloc,
            entry,
            callback,
            config: config.clone(),
        })
    }

    fn memory(&self) -> Result<Memory, RuntimeError> {
        self.memory
            .ok_or_else(|| RuntimeError::export_not_found(&self.config.memory_export))
    }
}

/// Look up an optional typed function export.
///
/// Absent is `Ok(None)`; present with the wrong signature is an error.
fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<HostContext>,
    name: &str,
) -> Result<Option<TypedFunc<P, R>>, RuntimeError>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    func.typed::<P, R>(&*store).map(Some).map_err(|e| {
        RuntimeError::instantiation_failed(format!("Export '{name}' has the wrong signature: {e}"))
    })
}

/// Instance lifecycle manager.
///
/// Holds the engine and the linker carrying the host import table. Register
/// host functions through [`InstanceRunner::linker_mut`] before instantiating.
pub struct InstanceRunner {
    engine: WasmEngine,
    linker: Linker<HostContext>,
}

impl InstanceRunner {
    /// Create a new instance runner with an empty linker.
    pub fn new(engine: WasmEngine) -> Self {
        let linker = Linker::new(engine.inner());

        Self { engine, linker }
    }

    /// Get a mutable reference to the linker.
    ///
    /// Use this to register host functions.
    pub fn linker_mut(&mut self) -> &mut Linker<HostContext> {
        &mut self.linker
    }

    /// Get the engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Instantiate a guest module and resolve its exports.
    ///
    /// The entry point is not run; call [`GuestInstance::run_main`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An import cannot be resolved or instantiation traps
    /// - An export has the wrong signature
    #[instrument(skip_all, fields(module = %module.content_hash()))]
    pub async fn instantiate(
        &self,
        module: &CompiledModule,
        mut store: Store<HostContext>,
        execution: &ExecutionConfig,
        guest: &GuestConfig,
    ) -> Result<GuestInstance, RuntimeError> {
        debug!("Instantiating guest module");

        arm_call_limits(&mut store, &self.engine, execution)?;
        let instance = self
            .linker
            .instantiate_async(&mut store, module.inner())
            .await
            .map_err(|e| RuntimeError::instantiation_failed(format!("{e:#}")))?;

        let exports = GuestExports::resolve(&instance, &mut store, guest)?;

        info!(
            session_id = %store.data().session_id,
            entry_point = exports.entry.as_ref().map(|(name, _)| name.as_str()),
            "Guest instantiated"
        );

        Ok(GuestInstance {
            store,
            exports,
            engine: self.engine.clone(),
            execution: execution.clone(),
        })
    }
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner").finish_non_exhaustive()
    }
}

/// A live guest instance.
///
/// Owns the store, so all host state ([`HostContext`]) travels with it.
/// Every method that enters the guest resets the per-call fuel and epoch
/// limits first.
pub struct GuestInstance {
    store: Store<HostContext>,
    exports: GuestExports,
    engine: WasmEngine,
    execution: ExecutionConfig,
}

impl GuestInstance {
    /// Run the guest entry point.
    ///
    /// A guest trap is reported as [`ExecutionResult::Trap`]; resource limits
    /// and host function failures are errors.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry point is exported, fuel is exhausted, the
    /// call times out, or a host function fails fatally.
    #[instrument(skip(self))]
    pub async fn run_main(&mut self) -> Result<ExecutionResult, RuntimeError> {
        let Some((name, func)) = self.exports.entry.clone() else {
            return Err(RuntimeError::export_not_found(
                self.exports.config.entry_points.join("|"),
            ));
        };

        let start = Instant::now();
        let initial_fuel = self.enter()?;
        let result = func.call_async(&mut self.store, ()).await;
        let fuel_consumed = self.leave(initial_fuel);

        match result {
            Ok(()) => {
                info!(
                    entry_point = %name,
                    duration_ms = start.elapsed().as_millis(),
                    fuel_consumed,
                    "Entry point completed"
                );
                Ok(ExecutionResult::Success)
            }
            Err(err) => match self.classify(err) {
                RuntimeError::Trap { message } => {
                    error!(entry_point = %name, trap_message = %message, "Entry point trapped");
                    Ok(ExecutionResult::Trap {
                        code: trap_code(&message),
                        message,
                    })
                }
                other => Err(other),
            },
        }
    }

    /// Fire one animation frame tick.
    ///
    /// Every frame armed before the tick is resolved and, if its loop is
    /// still alive, dispatched. Returns the number of dispatches.
    ///
    /// # Errors
    ///
    /// Returns the first dispatch error. Frames not yet fired are put back
    /// for the next tick.
    pub async fn animation_frame(&mut self) -> Result<usize, RuntimeError> {
        let due = self.store.data_mut().event_loops.take_due_frames();
        let mut dispatched = 0;

        for (index, frame) in due.iter().enumerate() {
            let Some(event) = self.store.data_mut().event_loops.fire_frame(*frame) else {
                self.store.data_mut().metrics.suppressed_deliveries += 1;
                continue;
            };

            if let Err(err) = self.dispatch(event).await {
                self.restore_frames(&due[index + 1..]);
                return Err(err);
            }
            self.store.data_mut().metrics.frames_dispatched += 1;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Deliver a keyboard event to every subscribed loop.
    ///
    /// Returns the number of dispatches.
    ///
    /// # Errors
    ///
    /// Returns the first dispatch error.
    pub async fn key_event(
        &mut self,
        kind: KeyEventKind,
        event: &KeyboardEvent,
    ) -> Result<usize, RuntimeError> {
        let targets = self.store.data().event_loops.keyboard_targets();
        let mut dispatched = 0;

        for id in targets {
            let Some(wire) = self.store.data().event_loops.deliver_key(id, kind, event) else {
                self.store.data_mut().metrics.suppressed_deliveries += 1;
                continue;
            };

            self.dispatch(wire).await?;
            self.store.data_mut().metrics.key_events_dispatched += 1;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Invoke the guest callback with an encoded event.
    #[instrument(level = "trace", skip(self), fields(loop_id = event.loop_id, kind = ?event.kind))]
    async fn dispatch(&mut self, event: WireEvent) -> Result<(), RuntimeError> {
        let Some(callback) = self.exports.callback.clone() else {
            return Err(RuntimeError::export_not_found(
                &self.exports.config.callback_export,
            ));
        };

        let initial_fuel = self.enter()?;
        let result = callback.call_async(&mut self.store, event.args()).await;
        self.leave(initial_fuel);

        result.map_err(|err| {
            let err = self.classify(err);
            warn!(
                loop_id = event.loop_id,
                resource_limit = err.is_resource_limit(),
                error = %err,
                "Event dispatch failed"
            );
            err
        })
    }

    /// Copy `text` into memory allocated by the guest's allocator.
    ///
    /// Ownership of the allocation passes to the guest.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest has no allocator or memory export, the
    /// allocator traps, or the returned region is out of bounds.
    pub async fn put_str(&mut self, text: &str) -> Result<GuestSlice, RuntimeError> {
        let Some(alloc) = self.exports.alloc.clone() else {
            return Err(RuntimeError::export_not_found(
                &self.exports.config.alloc_export,
            ));
        };
        let memory = self.exports.memory()?;
        let len = u32::try_from(text.len())
            .map_err(|_| HostFunctionError::from(MemoryError::TooLarge { len: text.len() }))?;

        let initial_fuel = self.enter()?;
        let result = alloc.call_async(&mut self.store, len).await;
        self.leave(initial_fuel);
        let ptr = result.map_err(|err| self.classify(err))?;

        // Re-derive the view: the allocator may have grown memory
        let slice = memory::write_bytes(&memory, &mut self.store, ptr, text.as_bytes())
            .map_err(HostFunctionError::from)?;
        Ok(slice)
    }

    /// Decode a UTF-8 string from guest memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest has no memory export, the region is out
    /// of bounds, or the bytes are not valid UTF-8.
    pub fn read_str(&self, slice: GuestSlice) -> Result<String, RuntimeError> {
        let memory = self.exports.memory()?;
        let text = memory::decode(&memory, &self.store, slice).map_err(HostFunctionError::from)?;
        Ok(text)
    }

    /// Copy raw bytes out of guest memory.
    pub fn read_bytes(&self, slice: GuestSlice) -> Result<Vec<u8>, RuntimeError> {
        let memory = self.exports.memory()?;
        let bytes =
            memory::read_bytes(&memory, &self.store, slice).map_err(HostFunctionError::from)?;
        Ok(bytes.to_vec())
    }

    /// Dispose an event loop from the host side.
    pub fn dispose_loop(&mut self, id: LoopId) -> bool {
        self.store.data_mut().event_loops.dispose(id)
    }

    /// Returns `true` if no frame is armed.
    pub fn is_idle(&self) -> bool {
        !self.store.data().event_loops.has_pending_frames()
    }

    /// Name of the resolved entry point, if any.
    pub fn entry_point(&self) -> Option<&str> {
        self.exports.entry.as_ref().map(|(name, _)| name.as_str())
    }

    /// Get the engine the instance runs on.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the host context.
    pub fn context(&self) -> &HostContext {
        self.store.data()
    }

    /// Get the host context mutably.
    pub fn context_mut(&mut self) -> &mut HostContext {
        self.store.data_mut()
    }

    /// Finalize metrics at the end of a session.
    pub fn finish(&mut self) {
        self.store.data_mut().finalize_metrics();
    }

    /// Reset call limits and count the call. Returns the starting fuel.
    fn enter(&mut self) -> Result<u64, RuntimeError> {
        arm_call_limits(&mut self.store, &self.engine, &self.execution)?;
        self.store.data_mut().metrics.guest_calls += 1;
        Ok(get_remaining_fuel(&self.store).unwrap_or(0))
    }

    /// Record fuel used by the call that just returned.
    fn leave(&mut self, initial_fuel: u64) -> u64 {
        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &self.store);
        self.store.data_mut().metrics.fuel_consumed += fuel_consumed;
        fuel_consumed
    }

    /// Put unfired frames back at the head of the queue.
    fn restore_frames(&mut self, frames: &[ScheduledFrame]) {
        self.store
            .data_mut()
            .event_loops
            .restore_frames(frames.iter().copied());
    }

    /// Map an error returned by a guest call onto [`RuntimeError`].
    fn classify(&self, err: wasmtime::Error) -> RuntimeError {
        match err.downcast_ref::<Trap>() {
            Some(Trap::OutOfFuel) => return RuntimeError::FuelExhausted,
            Some(Trap::Interrupt) => {
                return RuntimeError::ExecutionTimeout {
                    duration_ms: self.execution.timeout_ms,
                };
            }
            _ => {}
        }

        match err.downcast::<HostFunctionError>() {
            Ok(host_error) => RuntimeError::HostFunction(host_error),
            Err(err) => RuntimeError::trap(format!("{err:#}")),
        }
    }
}

impl std::fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("session_id", &self.store.data().session_id)
            .field("entry_point", &self.entry_point())
            .finish_non_exhaustive()
    }
}

/// Extract the wasm trap code from a formatted trap message.
fn trap_code(message: &str) -> Option<String> {
    const CODES: &[&str] = &[
        "unreachable",
        "out of bounds memory access",
        "integer divide by zero",
        "indirect call type mismatch",
        "call stack exhausted",
    ];
    CODES
        .iter()
        .find(|code| message.contains(*code))
        .map(|code| (*code).to_string())
}

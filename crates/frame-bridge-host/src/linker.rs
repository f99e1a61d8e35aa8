//! Host function registration for Wasmtime linkers.
//!
//! Registers the [`IMPORTS`](crate::imports::IMPORTS) table on a linker.
//! Functions that take `(ptr, len)` look the guest memory up on every call:
//! the guest may have grown it since the last one.

use frame_bridge_common::{HostFunctionError, RuntimeConfig, RuntimeError};
use frame_bridge_core::memory::{self, GuestSlice};
use frame_bridge_core::{FillStatus, HostContext, InstanceRunner, WasmEngine};
use tracing::{debug, warn};
use wasmtime::{Caller, Extern, Linker, Memory};

use crate::console::ConsoleHost;
use crate::imports::{HOST_MODULE, IMPORTS};
use crate::svg::SvgHost;

/// Register every host import on a linker.
///
/// This registers:
/// - `env::puts`, `env::svg_set_path`
/// - `env::now`
/// - `env::event_loop_new`, `env::event_loop_raf`, `env::event_loop_dispose`
/// - `env::fill_rand`
/// - the legacy aliases of the above
/// - WASI preview1, when enabled in the host config
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(
    linker: &mut Linker<HostContext>,
    config: &RuntimeConfig,
) -> Result<(), RuntimeError> {
    let memory_export = config.guest.memory_export.as_str();

    register_console(linker, memory_export)?;
    register_clock(linker)?;
    register_event_loop(linker)?;
    register_svg(linker, memory_export)?;
    register_random(linker, memory_export)?;
    register_aliases(linker)?;

    if config.host.wasi {
        register_wasi(linker)?;
    }

    Ok(())
}

/// Create an instance runner with every host import registered.
pub fn create_instance_runner(
    engine: &WasmEngine,
    config: &RuntimeConfig,
) -> Result<InstanceRunner, RuntimeError> {
    let mut runner = InstanceRunner::new(engine.clone());
    register_all(runner.linker_mut(), config)?;
    Ok(runner)
}

/// Register `env::puts(ptr: i32, len: i32)`.
///
/// Invalid UTF-8 traps the guest call.
pub fn register_console(
    linker: &mut Linker<HostContext>,
    memory_export: &str,
) -> Result<(), RuntimeError> {
    let memory_export = memory_export.to_string();
    linker
        .func_wrap(
            HOST_MODULE,
            "puts",
            move |mut caller: Caller<'_, HostContext>, ptr: u32, len: u32| -> wasmtime::Result<()> {
                let message = read_guest_str(&mut caller, &memory_export, ptr, len)?;
                ConsoleHost::puts(caller.data_mut(), &message);
                Ok(())
            },
        )
        .map_err(|e| registration_failed("puts", &e))?;

    Ok(())
}

/// Register `env::now() -> f64`.
pub fn register_clock(linker: &mut Linker<HostContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(HOST_MODULE, "now", |caller: Caller<'_, HostContext>| {
            caller.data().now_ms()
        })
        .map_err(|e| registration_failed("now", &e))?;

    Ok(())
}

/// Register the event loop imports.
///
/// - `env::event_loop_new() -> i32`: new loop id
/// - `env::event_loop_raf(id: i32) -> i32`: 1 if `id` is known
/// - `env::event_loop_dispose(id: i32) -> i32`: 1 if `id` was known
pub fn register_event_loop(linker: &mut Linker<HostContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            HOST_MODULE,
            "event_loop_new",
            |mut caller: Caller<'_, HostContext>| -> u32 {
                caller.data_mut().event_loops.create()
            },
        )
        .map_err(|e| registration_failed("event_loop_new", &e))?;

    linker
        .func_wrap(
            HOST_MODULE,
            "event_loop_raf",
            |mut caller: Caller<'_, HostContext>, id: u32| -> u32 {
                u32::from(caller.data_mut().event_loops.arm_frame(id))
            },
        )
        .map_err(|e| registration_failed("event_loop_raf", &e))?;

    linker
        .func_wrap(
            HOST_MODULE,
            "event_loop_dispose",
            |mut caller: Caller<'_, HostContext>, id: u32| -> u32 {
                u32::from(caller.data_mut().event_loops.dispose(id))
            },
        )
        .map_err(|e| registration_failed("event_loop_dispose", &e))?;

    Ok(())
}

/// Register `env::svg_set_path(ptr: i32, len: i32)`.
///
/// Invalid UTF-8 traps the guest call.
pub fn register_svg(
    linker: &mut Linker<HostContext>,
    memory_export: &str,
) -> Result<(), RuntimeError> {
    let memory_export = memory_export.to_string();
    linker
        .func_wrap(
            HOST_MODULE,
            "svg_set_path",
            move |mut caller: Caller<'_, HostContext>, ptr: u32, len: u32| -> wasmtime::Result<()> {
                let d = read_guest_str(&mut caller, &memory_export, ptr, len)?;
                SvgHost::set_path(caller.data_mut(), &d);
                Ok(())
            },
        )
        .map_err(|e| registration_failed("svg_set_path", &e))?;

    Ok(())
}

/// Register `env::fill_rand(ptr: i32, len: i32) -> i32`.
///
/// A range outside guest memory yields `RANGE_ERROR`, like a per-call limit
/// violation. Entropy backend failures trap the guest call.
pub fn register_random(
    linker: &mut Linker<HostContext>,
    memory_export: &str,
) -> Result<(), RuntimeError> {
    let memory_export = memory_export.to_string();
    linker
        .func_wrap(
            HOST_MODULE,
            "fill_rand",
            move |mut caller: Caller<'_, HostContext>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
                let memory = guest_memory(&mut caller, &memory_export)?;
                let (data, ctx) = memory.data_and_store_mut(&mut caller);

                let Ok(range) = GuestSlice::new(ptr, len).range(data.len()) else {
                    debug!(ptr, len, memory_size = data.len(), "Random fill outside guest memory");
                    return Ok(FillStatus::RangeError.code());
                };

                let status = ctx.random.fill(&mut data[range])?;
                Ok(status.code())
            },
        )
        .map_err(|e| registration_failed("fill_rand", &e))?;

    Ok(())
}

/// Link every legacy alias to its current import.
fn register_aliases(linker: &mut Linker<HostContext>) -> Result<(), RuntimeError> {
    for import in IMPORTS {
        let Some(alias) = import.alias else {
            continue;
        };
        linker
            .alias(HOST_MODULE, import.name, HOST_MODULE, alias)
            .map_err(|e| registration_failed(alias, &e))?;
    }

    Ok(())
}

/// Link WASI preview1 for guests built for `wasm32-wasip1`.
pub fn register_wasi(linker: &mut Linker<HostContext>) -> Result<(), RuntimeError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, HostContext::wasi_mut).map_err(|e| {
        RuntimeError::Wasi(frame_bridge_common::WasiError::InitializationFailed {
            reason: e.to_string(),
        })
    })?;

    debug!("WASI preview1 linked");
    Ok(())
}

/// Look up the guest memory export.
fn guest_memory(caller: &mut Caller<'_, HostContext>, name: &str) -> wasmtime::Result<Memory> {
    caller
        .get_export(name)
        .and_then(Extern::into_memory)
        .ok_or_else(|| {
            warn!(export = name, "Memory export not found in guest module");
            HostFunctionError::missing_export(name).into()
        })
}

/// Decode a UTF-8 string the guest passed as `(ptr, len)`.
fn read_guest_str(
    caller: &mut Caller<'_, HostContext>,
    memory_export: &str,
    ptr: u32,
    len: u32,
) -> wasmtime::Result<String> {
    let memory = guest_memory(caller, memory_export)?;
    let text = memory::decode(&memory, &*caller, GuestSlice::new(ptr, len)).map_err(|e| {
        warn!(ptr, len, error = %e, "Rejected guest string");
        HostFunctionError::from(e)
    })?;
    Ok(text)
}

fn registration_failed(name: &str, err: &wasmtime::Error) -> RuntimeError {
    RuntimeError::invalid_config(format!("Failed to register {name} function: {err}"))
}

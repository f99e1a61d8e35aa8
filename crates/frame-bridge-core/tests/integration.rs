//! Integration tests for frame-bridge-core.
//!
//! These tests drive WAT guests through the complete pipeline:
//! - WAT compilation to module
//! - Store creation and host import registration
//! - Entry point execution
//! - Frame and keyboard dispatch through `event_loop_cb`
//! - Error mapping for traps, fuel and timeouts

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use frame_bridge_common::{
    EngineConfig, ExecutionConfig, HostConfig, HostFunctionError, KeyEventKind, KeyboardEvent,
    MemoryError, RuntimeConfig, RuntimeError,
};
use frame_bridge_core::event_loop::NO_CHAR;
use frame_bridge_core::store::create_store;
use frame_bridge_core::{
    CompiledModule, ExecutionResult, GuestInstance, GuestSlice, InstanceRunner, WasmEngine,
};
use frame_bridge_host::linker::register_all;

/// Imports shared by the test guests.
const IMPORTS: &str = r#"
    (import "env" "event_loop_new" (func $new (result i32)))
    (import "env" "event_loop_raf" (func $raf (param i32) (result i32)))
    (import "env" "event_loop_dispose" (func $dispose (param i32) (result i32)))
    (import "env" "puts" (func $puts (param i32 i32)))
    (import "env" "svg_set_path" (func $svg (param i32 i32)))
"#;

/// Guest that records every callback as five little-endian words at 1024,
/// with the record count at 1020. Frames re-arm the loop that received them.
///
/// `main` and `on_event` are spliced into the entry point and the callback.
fn recorder(main: &str, on_event: &str) -> String {
    format!(
        r#"
        (module
            {IMPORTS}
            (memory (export "memory") 1)
            (global $count (mut i32) (i32.const 0))
            (data (i32.const 0) "started")

            (func (export "main")
                {main}
            )

            (func (export "event_loop_cb")
                (param $id i32) (param $kind i32) (param $code i32) (param $chr i32) (param $flags i32)
                (local $at i32)
                (local.set $at
                    (i32.add (i32.const 1024) (i32.mul (global.get $count) (i32.const 20))))
                (i32.store (local.get $at) (local.get $id))
                (i32.store offset=4 (local.get $at) (local.get $kind))
                (i32.store offset=8 (local.get $at) (local.get $code))
                (i32.store offset=12 (local.get $at) (local.get $chr))
                (i32.store offset=16 (local.get $at) (local.get $flags))
                (global.set $count (i32.add (global.get $count) (i32.const 1)))
                (i32.store (i32.const 1020) (global.get $count))
                {on_event}
                (if (i32.eqz (local.get $kind))
                    (then (drop (call $raf (local.get $id)))))
            )
        )
        "#
    )
}

fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.engine.epoch_interruption = false;
    config.host.echo_console = false;
    config
}

async fn instantiate_with(wat: &str, config: &RuntimeConfig) -> Result<GuestInstance, RuntimeError> {
    let engine = WasmEngine::new(&config.engine).unwrap();
    let mut runner = InstanceRunner::new(engine.clone());
    register_all(runner.linker_mut(), config).unwrap();

    let compiled = CompiledModule::from_wat(engine.inner(), wat).unwrap();
    let store = create_store(
        &engine,
        &config.execution,
        &config.host,
        "test-session".into(),
    )?;

    runner
        .instantiate(&compiled, store, &config.execution, &config.guest)
        .await
}

/// Instantiate and run the entry point, which must succeed.
async fn start(wat: &str) -> GuestInstance {
    start_with(wat, &test_config()).await
}

async fn start_with(wat: &str, config: &RuntimeConfig) -> GuestInstance {
    let mut guest = instantiate_with(wat, config).await.unwrap();
    let result = guest.run_main().await.unwrap();
    assert!(result.is_success(), "entry point failed: {result:?}");
    guest
}

/// Callback records written by the [`recorder`] guest.
fn recorded(guest: &GuestInstance) -> Vec<[u32; 5]> {
    let count = read_u32(guest, 1020);
    let bytes = guest
        .read_bytes(GuestSlice::new(1024, count * 20))
        .unwrap();

    bytes
        .chunks_exact(20)
        .map(|record| {
            let mut words = [0u32; 5];
            for (word, chunk) in words.iter_mut().zip(record.chunks_exact(4)) {
                *word = u32::from_le_bytes(chunk.try_into().unwrap());
            }
            words
        })
        .collect()
}

fn read_u32(guest: &GuestInstance, ptr: u32) -> u32 {
    let bytes = guest.read_bytes(GuestSlice::new(ptr, 4)).unwrap();
    u32::from_le_bytes(bytes.try_into().unwrap())
}

const CREATE_AND_ARM: &str = r#"
    (drop (call $raf (call $new)))
    (call $puts (i32.const 0) (i32.const 7))
"#;

// ============================================================================
// Test: Animation Frames
// ============================================================================

#[tokio::test]
async fn test_frames_fire_and_rearm() {
    let mut guest = start(&recorder(CREATE_AND_ARM, "")).await;

    assert_eq!(guest.entry_point(), Some("main"));
    assert_eq!(guest.context().console[0].message, "started");

    for _ in 0..3 {
        assert_eq!(guest.animation_frame().await.unwrap(), 1);
    }

    assert_eq!(recorded(&guest), vec![[1, 0, 0, 0, 0]; 3]);
    assert!(!guest.is_idle());

    let metrics = &guest.context().metrics;
    assert_eq!(metrics.frames_dispatched, 3);
    // Entry point plus three frames
    assert_eq!(metrics.guest_calls, 4);
    assert!(metrics.fuel_consumed > 0);
}

#[tokio::test]
async fn test_no_frame_without_arm() {
    let mut guest = start(&recorder("(drop (call $new))", "")).await;

    assert!(guest.is_idle());
    assert_eq!(guest.animation_frame().await.unwrap(), 0);
    assert!(recorded(&guest).is_empty());
}

#[tokio::test]
async fn test_raf_result() {
    let main = r#"
        (i32.store (i32.const 8) (call $raf (i32.const 42)))
        (i32.store (i32.const 12) (call $raf (call $new)))
    "#;
    let guest = start(&recorder(main, "")).await;

    assert_eq!(read_u32(&guest, 8), 0);
    assert_eq!(read_u32(&guest, 12), 1);
}

#[tokio::test]
async fn test_dead_loop_gets_nothing() {
    let mut guest = start(&recorder(CREATE_AND_ARM, "")).await;

    // Killed while a frame is in flight
    assert!(guest.context_mut().event_loops.mark_dead(1));

    assert_eq!(guest.animation_frame().await.unwrap(), 0);
    let delivered = guest
        .key_event(KeyEventKind::Down, &KeyboardEvent::new("a", 65))
        .await
        .unwrap();
    assert_eq!(delivered, 0);

    assert!(recorded(&guest).is_empty());
    assert_eq!(guest.context().metrics.suppressed_deliveries, 2);
    assert_eq!(guest.context().event_loops.is_dead(1), Some(true));
}

#[tokio::test]
async fn test_dispose_mid_batch() {
    // Loop 1's callback disposes loop 2 while loop 2's frame is already due
    let main = r#"
        (drop (call $raf (call $new)))
        (drop (call $raf (call $new)))
    "#;
    let on_event = r#"
        (if (i32.eq (local.get $id) (i32.const 1))
            (then (drop (call $dispose (i32.const 2)))))
    "#;
    let mut guest = start(&recorder(main, on_event)).await;

    assert_eq!(guest.animation_frame().await.unwrap(), 1);
    assert_eq!(recorded(&guest), vec![[1, 0, 0, 0, 0]]);
    assert_eq!(guest.context().metrics.suppressed_deliveries, 1);
    assert!(!guest.context().event_loops.contains(2));
}

#[tokio::test]
async fn test_host_dispose() {
    let mut guest = start(&recorder(CREATE_AND_ARM, "")).await;

    assert!(guest.dispose_loop(1));
    assert!(!guest.dispose_loop(1));
    assert!(guest.is_idle());

    assert_eq!(guest.animation_frame().await.unwrap(), 0);
    let delivered = guest
        .key_event(KeyEventKind::Up, &KeyboardEvent::new("a", 65))
        .await
        .unwrap();
    assert_eq!(delivered, 0);
    assert!(recorded(&guest).is_empty());
}

// ============================================================================
// Test: Keyboard Events
// ============================================================================

#[tokio::test]
async fn test_key_events_encoding() {
    let mut guest = start(&recorder("(drop (call $new))", "")).await;

    let shortcut = KeyboardEvent::new("a", 65).with_shift().with_ctrl();
    guest.key_event(KeyEventKind::Down, &shortcut).await.unwrap();

    let shift = KeyboardEvent::new("Shift", 16).with_shift();
    guest.key_event(KeyEventKind::Up, &shift).await.unwrap();

    assert_eq!(
        recorded(&guest),
        vec![[1, 1, 65, 97, 3], [1, 2, 16, NO_CHAR, 1]]
    );
    assert_eq!(guest.context().metrics.key_events_dispatched, 2);
}

#[tokio::test]
async fn test_key_events_reach_every_loop_in_order() {
    let main = "(drop (call $new)) (drop (call $new)) (drop (call $new))";
    let mut guest = start(&recorder(main, "")).await;

    let delivered = guest
        .key_event(KeyEventKind::Down, &KeyboardEvent::new("x", 88))
        .await
        .unwrap();

    assert_eq!(delivered, 3);
    let ids: Vec<u32> = recorded(&guest).iter().map(|record| record[0]).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

// ============================================================================
// Test: Strings
// ============================================================================

#[tokio::test]
async fn test_svg_set_path() {
    let wat = format!(
        r#"
        (module
            {IMPORTS}
            (memory (export "memory") 1)
            (data (i32.const 64) "M 10 10 L 20 20 Z")
            (func (export "main")
                (call $svg (i32.const 64) (i32.const 17)))
        )
        "#
    );
    let guest = start(&wat).await;

    assert_eq!(guest.context().drawable.d.as_deref(), Some("M 10 10 L 20 20 Z"));
    assert_eq!(guest.context().drawable.updates, 1);
}

#[tokio::test]
async fn test_puts_invalid_utf8_fails_the_call() {
    let wat = format!(
        r#"
        (module
            {IMPORTS}
            (memory (export "memory") 1)
            (data (i32.const 0) "a\c3\28")
            (func (export "main")
                (call $puts (i32.const 0) (i32.const 3)))
        )
        "#
    );
    let mut guest = instantiate_with(&wat, &test_config()).await.unwrap();

    let result = guest.run_main().await;

    assert!(
        matches!(
            result,
            Err(RuntimeError::HostFunction(HostFunctionError::Memory(
                MemoryError::InvalidUtf8 { ptr: 0, len: 3, .. }
            )))
        ),
        "got {result:?}"
    );
    assert!(guest.context().console.is_empty());
}

#[tokio::test]
async fn test_puts_out_of_bounds_fails_the_call() {
    let wat = format!(
        r#"
        (module
            {IMPORTS}
            (memory (export "memory") 1)
            (func (export "main")
                (call $puts (i32.const 65530) (i32.const 16)))
        )
        "#
    );
    let mut guest = instantiate_with(&wat, &test_config()).await.unwrap();

    let result = guest.run_main().await;

    assert!(matches!(
        result,
        Err(RuntimeError::HostFunction(HostFunctionError::Memory(
            MemoryError::OutOfBounds { .. }
        )))
    ));
}

#[tokio::test]
async fn test_put_str_round_trip() {
    let wat = r#"
        (module
            (memory (export "memory") 1)
            (global $heap (mut i32) (i32.const 4096))
            (func (export "alloc") (param $len i32) (result i32)
                (local $ptr i32)
                (local.set $ptr (global.get $heap))
                (global.set $heap (i32.add (global.get $heap) (local.get $len)))
                (local.get $ptr))
            (func (export "main"))
        )
    "#;
    let mut guest = start(wat).await;

    for text in ["", "hello", "héllo wörld", "𝄞 and 😀"] {
        let slice = guest.put_str(text).await.unwrap();
        assert_eq!(slice.len as usize, text.len());
        assert_eq!(guest.read_str(slice).unwrap(), text);
    }
}

#[tokio::test]
async fn test_put_str_without_alloc() {
    let mut guest = start(r#"(module (memory (export "memory") 1) (func (export "main")))"#).await;

    let result = guest.put_str("hello").await;

    assert!(matches!(result, Err(RuntimeError::ExportNotFound { name }) if name == "alloc"));
}

// ============================================================================
// Test: Clock and Random
// ============================================================================

#[tokio::test]
async fn test_now_and_alias() {
    let wat = r#"
        (module
            (import "env" "now" (func $now (result f64)))
            (import "env" "performance_now" (func $performance_now (result f64)))
            (memory (export "memory") 1)
            (func (export "main")
                (f64.store (i32.const 0) (call $now))
                (f64.store (i32.const 8) (call $performance_now)))
        )
    "#;
    let guest = start(wat).await;

    let read_f64 = |ptr| {
        let bytes = guest.read_bytes(GuestSlice::new(ptr, 8)).unwrap();
        f64::from_le_bytes(bytes.try_into().unwrap())
    };
    let first = read_f64(0);
    let second = read_f64(8);

    assert!(first >= 0.0);
    assert!(second >= first);
}

#[tokio::test]
async fn test_fill_rand_statuses() {
    let wat = r#"
        (module
            (import "env" "fill_rand" (func $fill (param i32 i32) (result i32)))
            (import "env" "js_fill_rand" (func $js_fill (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "main")
                ;; in bounds, at the limit
                (i32.store (i32.const 0) (call $fill (i32.const 2048) (i32.const 128)))
                ;; over the per-call limit
                (i32.store (i32.const 4) (call $fill (i32.const 4096) (i32.const 129)))
                ;; outside guest memory
                (i32.store (i32.const 8) (call $js_fill (i32.const 65530) (i32.const 64)))
                ;; legacy alias, in bounds
                (i32.store (i32.const 12) (call $js_fill (i32.const 8192) (i32.const 32))))
        )
    "#;
    let mut config = test_config();
    config.host.max_random_bytes = 128;
    let guest = start_with(wat, &config).await;

    assert_eq!(read_u32(&guest, 0), 0);
    assert_eq!(read_u32(&guest, 4), 1);
    assert_eq!(read_u32(&guest, 8), 1);
    assert_eq!(read_u32(&guest, 12), 0);

    let filled = guest.read_bytes(GuestSlice::new(2048, 128)).unwrap();
    assert!(filled.iter().any(|&byte| byte != 0));
    assert_eq!(guest.context().random.bytes_served(), 160);
}

#[tokio::test]
async fn test_fill_rand_quota() {
    let wat = r#"
        (module
            (import "env" "fill_rand" (func $fill (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "main")
                (i32.store (i32.const 0) (call $fill (i32.const 1024) (i32.const 48)))
                (i32.store (i32.const 4) (call $fill (i32.const 1024) (i32.const 48))))
        )
    "#;
    let mut config = test_config();
    config.host.random_quota_bytes = Some(64);
    let guest = start_with(wat, &config).await;

    assert_eq!(read_u32(&guest, 0), 0);
    assert_eq!(read_u32(&guest, 4), 2);
}

// ============================================================================
// Test: Entry Points and Exports
// ============================================================================

#[tokio::test]
async fn test_fallback_entry_point() {
    let wat = r#"
        (module
            (import "env" "event_loop_new" (func $new (result i32)))
            (func (export "my_main") (drop (call $new)))
        )
    "#;
    let guest = start(wat).await;

    assert_eq!(guest.entry_point(), Some("my_main"));
    assert_eq!(guest.context().event_loops.len(), 1);
}

#[tokio::test]
async fn test_missing_entry_point() {
    let mut guest = instantiate_with("(module)", &test_config()).await.unwrap();

    let result = guest.run_main().await;

    assert!(matches!(result, Err(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn test_missing_callback() {
    let wat = r#"
        (module
            (import "env" "event_loop_new" (func $new (result i32)))
            (import "env" "event_loop_raf" (func $raf (param i32) (result i32)))
            (func (export "main") (drop (call $raf (call $new))))
        )
    "#;
    let mut guest = start(wat).await;

    let result = guest.animation_frame().await;

    assert!(
        matches!(result, Err(RuntimeError::ExportNotFound { ref name }) if name == "event_loop_cb")
    );
}

#[tokio::test]
async fn test_unknown_import_fails_instantiation() {
    let wat = r#"
        (module
            (import "env" "open_window" (func))
            (func (export "main"))
        )
    "#;

    let result = instantiate_with(wat, &test_config()).await;

    assert!(matches!(result, Err(RuntimeError::InstantiationFailed { .. })));
}

// ============================================================================
// Test: Traps and Limits
// ============================================================================

#[tokio::test]
async fn test_entry_point_trap() {
    let wat = r#"(module (func (export "main") unreachable))"#;
    let mut guest = instantiate_with(wat, &test_config()).await.unwrap();

    let result = guest.run_main().await.unwrap();

    assert!(result.is_trap(), "Expected trap, got {result:?}");
    if let ExecutionResult::Trap { code, .. } = result {
        assert_eq!(code.as_deref(), Some("unreachable"));
    }
}

#[tokio::test]
async fn test_callback_trap() {
    let mut guest = start(&recorder(CREATE_AND_ARM, "unreachable")).await;

    let result = guest.animation_frame().await;

    assert!(matches!(result, Err(RuntimeError::Trap { .. })));
}

#[tokio::test]
async fn test_callback_fuel_exhaustion() {
    let mut config = test_config();
    config.execution.max_fuel = 10_000;
    let on_event = "(loop $forever (br $forever))";
    let mut guest = start_with(&recorder(CREATE_AND_ARM, on_event), &config).await;

    let result = guest.animation_frame().await;

    assert!(matches!(result, Err(RuntimeError::FuelExhausted)));
}

#[tokio::test]
async fn test_fuel_is_per_call() {
    // Each frame burns a few hundred units: far more than the budget in total
    let on_event = r#"
        (local.set $at (i32.const 0))
        (loop $spin
            (local.set $at (i32.add (local.get $at) (i32.const 1)))
            (br_if $spin (i32.lt_u (local.get $at) (i32.const 100))))
    "#;
    let mut config = test_config();
    config.execution.max_fuel = 5_000;
    let mut guest = start_with(&recorder(CREATE_AND_ARM, on_event), &config).await;

    for _ in 0..50 {
        guest.animation_frame().await.unwrap();
    }

    assert!(guest.context().metrics.fuel_consumed > 5_000);
}

#[tokio::test]
async fn test_epoch_timeout() {
    let config = RuntimeConfig {
        engine: EngineConfig {
            epoch_interruption: true,
            fuel_metering: false,
            ..EngineConfig::default()
        },
        execution: ExecutionConfig {
            timeout_ms: 5,
            ..ExecutionConfig::default()
        },
        host: HostConfig {
            echo_console: false,
            ..HostConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let wat = r#"(module (func (export "main") (loop $forever (br $forever))))"#;
    let mut guest = instantiate_with(wat, &config).await.unwrap();

    // Tick the engine the guest runs on from another thread
    let stop = Arc::new(AtomicBool::new(false));
    let ticker = guest.engine().clone();
    let flag = Arc::clone(&stop);
    let handle = std::thread::spawn(move || {
        while !flag.load(Ordering::Relaxed) {
            std::thread::sleep(std::time::Duration::from_millis(1));
            ticker.increment_epoch();
        }
    });

    let result = guest.run_main().await;
    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();

    assert!(matches!(
        result,
        Err(RuntimeError::ExecutionTimeout { duration_ms: 5 })
    ));
}

// ============================================================================
// Test: Precompiled Modules
// ============================================================================

#[tokio::test]
async fn test_precompiled_module_runs() {
    let config = test_config();
    let engine = WasmEngine::new(&config.engine).unwrap();
    let mut runner = InstanceRunner::new(engine.clone());
    register_all(runner.linker_mut(), &config).unwrap();

    let compiled =
        CompiledModule::from_wat(engine.inner(), &recorder(CREATE_AND_ARM, "")).unwrap();
    let path = std::env::temp_dir().join(format!(
        "frame-bridge-guest-{}-{}.cwasm",
        std::process::id(),
        compiled.content_hash()
    ));
    compiled.save_precompiled(&path).unwrap();

    let loaded = CompiledModule::from_file(engine.inner(), &path);
    std::fs::remove_file(&path).unwrap();
    let loaded = loaded.unwrap();

    let store = create_store(&engine, &config.execution, &config.host, "aot".into()).unwrap();
    let mut guest = runner
        .instantiate(&loaded, store, &config.execution, &config.guest)
        .await
        .unwrap();

    assert!(guest.run_main().await.unwrap().is_success());
    assert_eq!(guest.context().console[0].message, "started");
    assert_eq!(guest.animation_frame().await.unwrap(), 1);
    assert_eq!(recorded(&guest), vec![[1, 0, 0, 0, 0]]);
}

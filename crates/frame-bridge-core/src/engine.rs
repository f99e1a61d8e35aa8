//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the host. It is:
//! - Shared by every store and compiled module of a session
//! - Set up with fuel metering and epoch interruption for per-call limits
//! - Async-enabled so guest calls can be awaited from the frame driver

use std::sync::Arc;

use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use frame_bridge_common::{EngineConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] and the configuration it was built
/// from. Stores consult that configuration to decide whether to refuel or
/// arm an epoch deadline before each guest call.
///
/// # Example
///
/// ```ignore
/// use frame_bridge_common::EngineConfig;
/// use frame_bridge_core::WasmEngine;
///
/// let config = EngineConfig::default();
/// let engine = WasmEngine::new(&config)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    /// - Cache configuration fails
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);

        if config.fuel_metering {
            wasmtime_config.consume_fuel(true);
        }

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        if config.cache_compiled_modules {
            let result = match config.cache_config {
                Some(ref path) => wasmtime_config.cache_config_load(path),
                None => wasmtime_config.cache_config_load_default(),
            };
            result.map_err(|e| {
                RuntimeError::invalid_config(format!("Failed to load module cache config: {e}"))
            })?;
            debug!(cache_config = ?config.cache_config, "Module caching configured");
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            fuel_metering = config.fuel_metering,
            epoch_interruption = config.epoch_interruption,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Increment the epoch counter.
    ///
    /// The session driver calls this once per millisecond while a guest is
    /// running so that epoch deadlines measure wall time.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }

    /// Check if fuel metering is enabled.
    pub fn is_fuel_enabled(&self) -> bool {
        self.config.fuel_metering
    }

    /// Check if epoch interruption is enabled.
    pub fn is_epoch_enabled(&self) -> bool {
        self.config.epoch_interruption
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("fuel_metering", &self.config.fuel_metering)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}

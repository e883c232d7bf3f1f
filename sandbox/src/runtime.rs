//! Sandbox runtime: Wasmtime engine, module loading, and the live bridge.
//!
//! [`Sandbox`] compiles and validates a module once. Each call to
//! [`Sandbox::instantiate`] produces a [`Bridge`]: one instance, one handle
//! table, one event loop. Every host entry point on the bridge is a
//! top-level boundary: fuel is refilled on the way in and queued finalizers
//! run on the way out.

use std::path::Path;

use wasmtime::{AsContextMut, Config, Engine, Linker, Module, Store, Trap, WasmParams, WasmResults};

use lightbridge_hostapi::{DisabledTransport, HostEnvironment, SystemEnvironment, WebSocketTransport};
use lightbridge_primitives::Handle;

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::event_loop::{self, Settled};
use crate::finalize;
use crate::linker::register_host_functions;
use crate::state::{call_guest, classify_trap, export_func, exports, BridgeState, Cx, Exports};
use crate::validation::validate_module;
use crate::value::{call_value, HostValue};

/// A validated module, ready to be instantiated.
pub struct Sandbox {
    engine: Engine,
    module: Module,
    config: SandboxConfig,
}

impl Sandbox {
    /// Create a new sandbox from WASM bytecode (or WAT text).
    ///
    /// Validates the module's exports and imports before accepting.
    pub fn new(wasm_bytes: impl AsRef<[u8]>, config: SandboxConfig) -> Result<Self, SandboxError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: SandboxConfig) -> Result<Self, SandboxError> {
        let engine = create_engine(&config)?;
        let module = Module::from_file(&engine, path)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Instantiate with the system clock and randomness and no network.
    pub fn instantiate(&self) -> Result<Bridge, SandboxError> {
        self.instantiate_with(Box::new(SystemEnvironment::new()), Box::new(DisabledTransport))
    }

    pub fn instantiate_with(
        &self,
        env: Box<dyn HostEnvironment>,
        transport: Box<dyn WebSocketTransport>,
    ) -> Result<Bridge, SandboxError> {
        let state = BridgeState::new(self.config.clone(), env, transport);
        let mut store = Store::new(&self.engine, state);
        store.limiter(|s| &mut s.limits);
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;

        let instance = match linker.instantiate(&mut store, &self.module) {
            Ok(instance) => instance,
            Err(e) => {
                return Err(match store.data_mut().unwind.take() {
                    Some(original) => original,
                    None if e.downcast_ref::<Trap>().is_some() => classify_trap(e),
                    None => SandboxError::Wasmtime(e),
                })
            }
        };
        let bound = Exports::bind(&mut store, instance)?;
        store.data_mut().exports = Some(bound);
        tracing::debug!(
            realloc = store.data().exports.as_ref().is_some_and(|e| e.realloc.is_some()),
            "sandbox instantiated"
        );
        Ok(Bridge { store })
    }
}

/// Create a Wasmtime engine with deterministic configuration.
fn create_engine(config: &SandboxConfig) -> Result<Engine, SandboxError> {
    let mut wasm_config = Config::new();

    // Fuel bounds every top-level call
    wasm_config.consume_fuel(config.fuel_limit.is_some());

    wasm_config.wasm_threads(false);
    wasm_config.wasm_simd(false);
    wasm_config.wasm_relaxed_simd(false);
    wasm_config.wasm_multi_memory(false);
    wasm_config.cranelift_nan_canonicalization(true);

    let max_bytes = config.max_memory_bytes() as u64;
    wasm_config.memory_guaranteed_dense_image_size(max_bytes.min(16 * 1024 * 1024));

    Ok(Engine::new(&wasm_config)?)
}

/// One instantiated module and the host state bridged to it.
pub struct Bridge {
    store: Store<BridgeState>,
}

impl Bridge {
    /// Run `op` as a top-level call: refuel first, collect finalizers after.
    ///
    /// Finalizers run even when `op` fails; the first error wins.
    pub fn with_context<T>(
        &mut self,
        op: impl FnOnce(&mut Cx<'_>) -> Result<T, SandboxError>,
    ) -> Result<T, SandboxError> {
        if let Some(fuel) = self.store.data().config.fuel_limit {
            self.store.set_fuel(fuel)?;
        }
        let mut cx = self.store.as_context_mut();
        let result = op(&mut cx);
        let collected = finalize::collect(&mut cx);
        match (result, collected) {
            (Ok(value), Ok(_)) => Ok(value),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        }
    }

    pub fn state(&self) -> &BridgeState {
        self.store.data()
    }

    // ── Handles ──

    pub fn alloc(&mut self, value: HostValue) -> Handle {
        self.store.data_mut().alloc(value)
    }

    pub fn get(&self, handle: Handle) -> Result<HostValue, SandboxError> {
        self.store.data().get(handle)
    }

    pub fn take(&mut self, handle: Handle) -> Result<HostValue, SandboxError> {
        self.store.data_mut().take(handle)
    }

    pub fn drop_ref(&mut self, handle: Handle) -> Result<bool, SandboxError> {
        self.store.data_mut().drop_ref(handle)
    }

    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle, SandboxError> {
        Ok(self.store.data_mut().heap.clone_ref(handle)?)
    }

    pub fn live_handles(&self) -> usize {
        self.store.data().heap.live_count()
    }

    pub fn borrowed_stack_pointer(&self) -> u32 {
        self.store.data().heap.stack_pointer()
    }

    // ── Calls ──

    /// Call an exported function by name.
    pub fn call_export<P, R>(&mut self, name: &str, params: P) -> Result<R, SandboxError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.with_context(|cx| {
            let func = export_func::<P, R>(cx, name)?;
            call_guest(cx, &func, params)
        })
    }

    /// Call a host function value, such as a wrapped sandbox closure.
    pub fn call_function(
        &mut self,
        callee: &HostValue,
        args: &[HostValue],
    ) -> Result<HostValue, SandboxError> {
        self.with_context(|cx| call_value(cx, callee, args))
    }

    /// Explicitly drop the host's reference to a wrapped closure.
    ///
    /// Returns true if the destructor ran now.
    pub fn drop_closure(&mut self, callee: &HostValue) -> Result<bool, SandboxError> {
        self.with_context(|cx| match callee.as_function().and_then(|f| f.as_closure()) {
            Some(closure) => closure.release(cx),
            None => Err(SandboxError::usage(format!(
                "{} is not a sandbox closure",
                callee.debug_string()
            ))),
        })
    }

    // ── Event loop ──

    pub fn run_until_idle(&mut self) -> Result<(), SandboxError> {
        self.with_context(event_loop::run_until_idle)
    }

    /// Drive the event loop, then read the outcome of `promise`.
    ///
    /// A rejection is returned as the thrown reason. A promise still pending
    /// once the loop is idle is a usage error.
    pub fn settle(&mut self, promise: &HostValue) -> Result<HostValue, SandboxError> {
        let HostValue::Promise(promise) = promise else {
            return Err(SandboxError::usage(format!(
                "{} is not a promise",
                promise.debug_string()
            )));
        };
        self.run_until_idle()?;
        match promise.outcome() {
            Some(Settled::Fulfilled(value)) => Ok(value),
            Some(Settled::Rejected(reason)) => Err(SandboxError::Thrown(reason)),
            None => Err(SandboxError::usage("promise still pending after the event loop went idle")),
        }
    }

    /// Deadline of the earliest pending timer, on the monotonic clock.
    pub fn next_timer_deadline(&self) -> Option<f64> {
        self.store.data().events.next_deadline()
    }

    // ── Finalization ──

    pub fn collect_garbage(&mut self) -> Result<usize, SandboxError> {
        let mut cx = self.store.as_context_mut();
        finalize::collect(&mut cx)
    }

    pub fn pending_reclaims(&self) -> usize {
        self.store.data().reclaim.len()
    }

    // ── Memory ──

    /// Current scratch stack pointer.
    pub fn scratch_pointer(&mut self) -> Result<u32, SandboxError> {
        let mut cx = self.store.as_context_mut();
        let adjust = exports(&cx)?.add_to_stack_pointer;
        call_guest(&mut cx, &adjust, 0)
    }

    /// Generation of the memory view cache, bumped whenever memory has grown.
    pub fn memory_generation(&mut self) -> Result<u64, SandboxError> {
        let mut cx = self.store.as_context_mut();
        let memory = exports(&cx)?.memory;
        let size = memory.data_size(&cx);
        cx.data_mut().views.observe(size);
        Ok(cx.data().views.generation())
    }

    /// Discard the instance: release every live handle, drop pending work,
    /// and run the destructors owed to the sandbox.
    ///
    /// Returns the number of host values that were still live.
    pub fn teardown(mut self) -> Result<usize, SandboxError> {
        let released = self.store.data_mut().heap.teardown();
        let count = released.len();
        drop(released);
        self.store.data_mut().events.clear();
        let ran = self.collect_garbage()?;
        tracing::debug!(count, ran, "bridge torn down");
        Ok(count)
    }
}

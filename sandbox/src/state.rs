//! Per-instance mutable state held in the Wasmtime `Store`.
//!
//! `BridgeState` owns everything one bridge/module pairing needs: the handle
//! table, the memory view cache, the bound exports, the host environment and
//! transport, the event loop, and the reclamation queue. It is created at
//! instantiation and emptied by `Bridge::teardown`.

use wasmtime::{
    AsContextMut, Instance, Memory, StoreContextMut, StoreLimits, StoreLimitsBuilder, Table,
    Trap, TypedFunc, WasmParams, WasmResults,
};

use lightbridge_hostapi::{HandleTable, HostEnvironment, WebSocketTransport};
use lightbridge_primitives::Handle;

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::event_loop::EventLoop;
use crate::finalize::ReclaimQueue;
use crate::memory::ViewCache;
use crate::value::HostValue;

/// Mutable access to the store from inside bridge operations.
pub type Cx<'a> = StoreContextMut<'a, BridgeState>;

/// Sandbox entry points the bridge calls, resolved once at instantiation.
#[derive(Clone)]
pub struct Exports {
    pub instance: Instance,
    pub memory: Memory,
    pub malloc: TypedFunc<u32, u32>,
    pub free: TypedFunc<(u32, u32), ()>,
    pub realloc: Option<TypedFunc<(u32, u32, u32), u32>>,
    pub add_to_stack_pointer: TypedFunc<i32, u32>,
    pub exn_store: Option<TypedFunc<u32, ()>>,
    pub table: Option<Table>,
}

impl Exports {
    pub fn bind(
        mut store: impl AsContextMut<Data = BridgeState>,
        instance: Instance,
    ) -> Result<Self, SandboxError> {
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| SandboxError::MemoryError("no memory export".into()))?;
        let malloc = instance.get_typed_func::<u32, u32>(&mut store, "bridge_malloc")?;
        let free = instance.get_typed_func::<(u32, u32), ()>(&mut store, "bridge_free")?;
        let add_to_stack_pointer =
            instance.get_typed_func::<i32, u32>(&mut store, "bridge_add_to_stack_pointer")?;
        let realloc = match instance.get_func(&mut store, "bridge_realloc") {
            Some(func) => Some(func.typed::<(u32, u32, u32), u32>(&store)?),
            None => None,
        };
        let exn_store = match instance.get_func(&mut store, "bridge_exn_store") {
            Some(func) => Some(func.typed::<u32, ()>(&store)?),
            None => None,
        };
        let table = instance.get_table(&mut store, "__indirect_function_table");
        Ok(Self {
            instance,
            memory,
            malloc,
            free,
            realloc,
            add_to_stack_pointer,
            exn_store,
            table,
        })
    }
}

pub struct BridgeState {
    pub heap: HandleTable<HostValue>,
    pub views: ViewCache,
    pub exports: Option<Exports>,
    pub env: Box<dyn HostEnvironment>,
    pub transport: Box<dyn WebSocketTransport>,
    pub events: EventLoop,
    pub reclaim: ReclaimQueue,
    /// A fatal error raised inside an import, waiting to be recovered by the
    /// host frame that called into the sandbox.
    pub unwind: Option<SandboxError>,
    pub limits: StoreLimits,
    pub config: SandboxConfig,
}

impl BridgeState {
    pub fn new(
        config: SandboxConfig,
        env: Box<dyn HostEnvironment>,
        transport: Box<dyn WebSocketTransport>,
    ) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();
        Self {
            heap: HandleTable::with_capacity(config.initial_heap_capacity),
            views: ViewCache::default(),
            exports: None,
            env,
            transport,
            events: EventLoop::default(),
            reclaim: ReclaimQueue::default(),
            unwind: None,
            limits,
            config,
        }
    }

    // ── Heap shortcuts ──

    pub fn alloc(&mut self, value: HostValue) -> Handle {
        let handle = self.heap.alloc(value);
        tracing::trace!(%handle, "alloc");
        handle
    }

    pub fn get(&self, handle: Handle) -> Result<HostValue, SandboxError> {
        Ok(self.heap.get(handle)?.clone())
    }

    pub fn take(&mut self, handle: Handle) -> Result<HostValue, SandboxError> {
        tracing::trace!(%handle, "take");
        Ok(self.heap.take(handle)?)
    }

    pub fn drop_ref(&mut self, handle: Handle) -> Result<bool, SandboxError> {
        tracing::trace!(%handle, "drop");
        self.heap.drop(handle).map_err(|e| {
            tracing::warn!(%handle, error = %e, "rejected handle release");
            SandboxError::HostError(e)
        })
    }
}

pub fn exports(cx: &Cx<'_>) -> Result<Exports, SandboxError> {
    cx.data()
        .exports
        .clone()
        .ok_or_else(|| SandboxError::usage("bridge used before its module was instantiated"))
}

/// Call into the sandbox, recovering the original error if an import unwound.
pub fn call_guest<P, R>(
    cx: &mut Cx<'_>,
    func: &TypedFunc<P, R>,
    params: P,
) -> Result<R, SandboxError>
where
    P: WasmParams,
    R: WasmResults,
{
    func.call(&mut *cx, params).map_err(|e| recover(cx, e))
}

/// Look up a named function export.
pub fn export_func<P, R>(cx: &mut Cx<'_>, name: &str) -> Result<TypedFunc<P, R>, SandboxError>
where
    P: WasmParams,
    R: WasmResults,
{
    let instance = exports(cx)?.instance;
    instance
        .get_typed_func::<P, R>(&mut *cx, name)
        .map_err(|e| SandboxError::usage(format!("export '{}': {}", name, e)))
}

/// Turn a failed sandbox call back into the error that caused it.
pub fn recover(cx: &mut Cx<'_>, err: anyhow::Error) -> SandboxError {
    match cx.data_mut().unwind.take() {
        Some(original) => original,
        None => classify_trap(err),
    }
}

/// Fuel exhaustion → `SandboxError::FuelExhausted`
/// Other traps → `SandboxError::GuestTrapped`
pub fn classify_trap(err: anyhow::Error) -> SandboxError {
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => SandboxError::FuelExhausted,
        Some(trap) => SandboxError::GuestTrapped(trap.to_string()),
        None => SandboxError::GuestTrapped(format!("{:#}", err)),
    }
}

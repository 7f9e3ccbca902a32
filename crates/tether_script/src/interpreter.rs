//! Interpreter instances and their lifecycle
//!
//! An [`Interpreter`] owns one engine context, addressed through a
//! [`ContextHandle`] in a process-wide table. Every operation on a context
//! runs under that context's re-entrant lock, so a host method called from
//! script may evaluate, bind, or close on the same context from the same
//! thread without deadlocking.

use crate::capability::CapabilityType;
use crate::config::EngineConfig;
use crate::dispatch::DispatchTable;
use crate::engine::{self, EngineContext};
use crate::error::{BindError, BridgeError};
use crate::handle::{ContextHandle, ContextState, HandleTable};
use crate::host::HostObject;
use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static CONTEXTS: Lazy<RwLock<HandleTable<Arc<ContextEntry>>>> =
    Lazy::new(|| RwLock::new(HandleTable::new()));

/// Engine state of one live context, guarded by its re-entrant lock.
struct ContextEntry {
    lock: ReentrantMutex<EntryState>,
    dispatch: Arc<DispatchTable>,
    #[cfg(test)]
    releases: std::sync::atomic::AtomicUsize,
}

struct EntryState {
    engine: RefCell<Option<Arc<EngineContext>>>,
    // Operations currently in flight on this thread's lock hold.
    depth: Cell<usize>,
    destroy_pending: Cell<bool>,
}

impl ContextEntry {
    fn new(engine: EngineContext) -> Self {
        Self {
            lock: ReentrantMutex::new(EntryState {
                engine: RefCell::new(Some(Arc::new(engine))),
                depth: Cell::new(0),
                destroy_pending: Cell::new(false),
            }),
            dispatch: Arc::new(DispatchTable::new()),
            #[cfg(test)]
            releases: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Run `f` against the engine under the context lock.
    fn run<R>(
        &self,
        f: impl FnOnce(&EngineContext, &Arc<DispatchTable>) -> Result<R, BridgeError>,
    ) -> Result<R, BridgeError> {
        let state = self.lock.lock();
        let engine = state.engine.borrow().clone().ok_or(BridgeError::Closed)?;

        state.depth.set(state.depth.get() + 1);
        let result = f(&engine, &self.dispatch);
        state.depth.set(state.depth.get() - 1);
        drop(engine);

        if state.depth.get() == 0 && state.destroy_pending.replace(false) {
            self.release(&state);
        }
        result
    }

    /// Destroy the engine now, or after the outermost in-flight operation.
    fn destroy(&self) {
        let state = self.lock.lock();
        if state.depth.get() > 0 {
            tracing::debug!("close requested mid-operation, deferring destroy");
            state.destroy_pending.set(true);
            return;
        }
        self.release(&state);
    }

    fn release(&self, state: &EntryState) {
        #[cfg(test)]
        self.releases.fetch_add(1, Ordering::SeqCst);
        let engine = state.engine.borrow_mut().take();
        self.dispatch.clear();
        match engine.map(Arc::try_unwrap) {
            Some(Ok(engine)) => engine::destroy_context(engine),
            Some(Err(_)) => tracing::warn!("engine context still shared at destroy"),
            None => {}
        }
    }
}

/// One embedded script interpreter.
///
/// Created live; [`close`](Interpreter::close) releases the engine. Dropping
/// a live interpreter leaks the engine and logs a warning, so pair every
/// [`create`](Interpreter::create) with a close or use
/// [`scoped`](Interpreter::scoped).
pub struct Interpreter {
    handle: AtomicU64,
    config: EngineConfig,
}

impl Interpreter {
    /// Create an interpreter with the default configuration.
    pub fn create() -> Result<Self, BridgeError> {
        Self::create_with(EngineConfig::default())
    }

    pub fn create_with(config: EngineConfig) -> Result<Self, BridgeError> {
        let engine = engine::create_context(&config).ok_or(BridgeError::OutOfMemory)?;
        let (handle, live) = {
            let mut contexts = CONTEXTS.write();
            let handle = contexts.insert(Arc::new(ContextEntry::new(engine)));
            (handle, contexts.len())
        };
        tracing::debug!(%handle, live, "interpreter created");
        Ok(Self {
            handle: AtomicU64::new(handle.to_bits()),
            config,
        })
    }

    /// Create an interpreter, run `f`, and close it on every exit path.
    pub fn scoped<R>(f: impl FnOnce(&Interpreter) -> R) -> Result<R, BridgeError> {
        Self::scoped_with(EngineConfig::default(), f)
    }

    pub fn scoped_with<R>(
        config: EngineConfig,
        f: impl FnOnce(&Interpreter) -> R,
    ) -> Result<R, BridgeError> {
        struct CloseOnDrop(Interpreter);

        impl Drop for CloseOnDrop {
            fn drop(&mut self) {
                self.0.close();
            }
        }

        let guard = CloseOnDrop(Self::create_with(config)?);
        Ok(f(&guard.0))
    }

    /// Current handle. [`ContextHandle::NULL`] once closed.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle::from_bits(self.handle.load(Ordering::Acquire))
    }

    pub fn state(&self) -> ContextState {
        if self.handle().is_null() {
            ContextState::Closed
        } else {
            ContextState::Live
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ContextState::Closed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate `source` under the configured default file name.
    pub fn evaluate(&self, source: &str) -> Result<String, BridgeError> {
        self.evaluate_named(source, &self.config.default_file_name)
    }

    /// Evaluate `source`, attributing diagnostics to `file_name`.
    ///
    /// Returns the completion value converted to text.
    pub fn evaluate_named(&self, source: &str, file_name: &str) -> Result<String, BridgeError> {
        self.entry()?.run(|engine, _| {
            engine::evaluate(engine, source, file_name).map_err(BridgeError::from)
        })
    }

    /// Install `object` as the script global `name`, exposing the methods
    /// declared by `capability`.
    ///
    /// A rejected bind leaves the namespace untouched. Binding an existing
    /// name replaces the global; proxies captured earlier keep calling the
    /// object they were created for.
    pub fn bind(
        &self,
        name: &str,
        capability: &CapabilityType,
        object: Arc<dyn HostObject>,
    ) -> Result<(), BridgeError> {
        let entry = self.entry()?;
        if name.is_empty() {
            return Err(BindError::InvalidName.into());
        }
        let descriptor = Arc::new(capability.describe(object.as_ref())?);

        entry.run(|engine, dispatch| {
            let global = dispatch.prepare(name, descriptor, object);
            engine::install_global(engine, dispatch, &global)?;
            tracing::debug!(
                handle = %self.handle(),
                name,
                capability = capability.name(),
                methods = global.descriptor().len(),
                "bound global"
            );
            dispatch.commit(global);
            Ok(())
        })
    }

    /// Names of the globals currently bound, sorted.
    pub fn globals(&self) -> Result<Vec<String>, BridgeError> {
        Ok(self.entry()?.dispatch.names())
    }

    /// Run a full engine collection cycle.
    ///
    /// Host objects reachable only through proxies the script has dropped,
    /// such as those replaced by a rebind, are released.
    pub fn collect_garbage(&self) -> Result<(), BridgeError> {
        self.entry()?.run(|engine, _| {
            engine::collect_garbage(engine);
            Ok(())
        })
    }

    /// Release the engine instance. Idempotent.
    ///
    /// Called from inside a host method on this interpreter, the handle
    /// reads closed at once and the engine is released when the outermost
    /// evaluation returns.
    pub fn close(&self) {
        let bits = self.handle.swap(0, Ordering::AcqRel);
        if bits == 0 {
            return;
        }
        let handle = ContextHandle::from_bits(bits);
        let (entry, live) = {
            let mut contexts = CONTEXTS.write();
            let entry = contexts.remove(handle);
            (entry, contexts.len())
        };
        if let Some(entry) = entry {
            entry.destroy();
            tracing::debug!(%handle, live, "interpreter closed");
        }
    }

    fn entry(&self) -> Result<Arc<ContextEntry>, BridgeError> {
        let handle = self.handle();
        if handle.is_null() {
            return Err(BridgeError::Closed);
        }
        CONTEXTS.read().get(handle).cloned().ok_or(BridgeError::Closed)
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        let handle = self.handle();
        if !handle.is_null() {
            tracing::warn!(%handle, "interpreter dropped without close; engine instance leaked");
        }
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("handle", &self.handle())
            .field("state", &self.state())
            .finish()
    }
}

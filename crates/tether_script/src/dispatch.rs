//! Script-to-host call dispatch
//!
//! Each interpreter owns one [`DispatchTable`] holding the global currently
//! bound under each name. Every proxy function installed into the script
//! namespace owns the [`BoundGlobal`] it was created for, so a replaced
//! binding lives exactly as long as some script value still reaches its
//! proxy. The table lock is never held while host code runs, so a host
//! method may re-enter the interpreter freely.

use crate::capability::{CapabilityDescriptor, MethodSignature};
use crate::error::DispatchError;
use crate::host::HostObject;
use crate::value::{self, TypeTag, Value};
use parking_lot::RwLock;
use rquickjs::{Ctx, Exception};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one bind call within a context.
pub type BindingId = u64;

/// A named host object installed in the script namespace.
pub struct BoundGlobal {
    id: BindingId,
    name: String,
    descriptor: Arc<CapabilityDescriptor>,
    target: Arc<dyn HostObject>,
}

impl BoundGlobal {
    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Arc<CapabilityDescriptor> {
        &self.descriptor
    }

    pub fn target(&self) -> &Arc<dyn HostObject> {
        &self.target
    }

    /// Invoke method `index` on the host object.
    ///
    /// Arguments must already match the declared parameter types. Host
    /// failures, including panics, come back as [`DispatchError::HostFault`].
    pub fn call(&self, index: usize, args: &[Value]) -> Result<Value, DispatchError> {
        let signature = self.signature(index, args.len())?;
        for (position, (arg, expected)) in args.iter().zip(signature.params()).enumerate() {
            if arg.type_tag() != *expected {
                return Err(DispatchError::TypeMismatch {
                    method: self.qualified(signature),
                    index: position,
                    expected: expected.clone(),
                    found: arg.type_tag().to_string(),
                });
            }
        }
        self.invoke(signature, args)
    }

    /// Method `index`, provided it takes `given` arguments.
    fn signature(&self, index: usize, given: usize) -> Result<&MethodSignature, DispatchError> {
        let signature =
            self.descriptor
                .method(index)
                .ok_or_else(|| DispatchError::UnknownMethod {
                    global: self.name.clone(),
                    index,
                })?;
        if given != signature.arity() {
            return Err(DispatchError::Arity {
                method: self.qualified(signature),
                expected: signature.arity(),
                given,
            });
        }
        Ok(signature)
    }

    fn invoke(&self, signature: &MethodSignature, args: &[Value]) -> Result<Value, DispatchError> {
        tracing::trace!(global = %self.name, method = signature.name(), "dispatching host call");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.target.invoke(signature.name(), args)
        }));
        let returned = match outcome {
            Ok(Ok(returned)) => returned,
            Ok(Err(err)) => {
                return Err(DispatchError::HostFault {
                    method: self.qualified(signature),
                    message: err.message().to_string(),
                })
            }
            Err(payload) => {
                return Err(DispatchError::HostFault {
                    method: self.qualified(signature),
                    message: panic_message(payload.as_ref()),
                })
            }
        };

        if *signature.returns() == TypeTag::Void {
            return Ok(Value::Void);
        }
        if returned.type_tag() != *signature.returns() {
            return Err(DispatchError::HostFault {
                method: self.qualified(signature),
                message: format!(
                    "returned {} but declares {}",
                    returned.type_tag(),
                    signature.returns()
                ),
            });
        }
        Ok(returned)
    }

    /// Convert script arguments to the declared parameter types of `signature`.
    fn unmarshal(
        &self,
        signature: &MethodSignature,
        args: &[rquickjs::Value<'_>],
    ) -> Result<Vec<Value>, DispatchError> {
        args.iter()
            .zip(signature.params())
            .enumerate()
            .map(|(position, (arg, expected))| {
                value::from_js(arg, expected).map_err(|found| DispatchError::TypeMismatch {
                    method: self.qualified(signature),
                    index: position,
                    expected: expected.clone(),
                    found: found.to_string(),
                })
            })
            .collect()
    }

    fn qualified(&self, signature: &MethodSignature) -> String {
        format!("{}.{}", self.name, signature.name())
    }
}

impl fmt::Debug for BoundGlobal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundGlobal")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capability", &self.descriptor.type_name())
            .finish()
    }
}

/// Where a proxy function forwards its calls.
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub global: Arc<BoundGlobal>,
    pub method: usize,
}

/// Per-context table of bound globals.
#[derive(Default)]
pub struct DispatchTable {
    next_id: AtomicU64,
    globals: RwLock<HashMap<String, Arc<BoundGlobal>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bound global without publishing it.
    pub(crate) fn prepare(
        &self,
        name: &str,
        descriptor: Arc<CapabilityDescriptor>,
        target: Arc<dyn HostObject>,
    ) -> Arc<BoundGlobal> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(BoundGlobal {
            id,
            name: name.to_string(),
            descriptor,
            target,
        })
    }

    /// Publish a prepared global, releasing any earlier one with the same name.
    pub(crate) fn commit(&self, global: Arc<BoundGlobal>) {
        let replaced = self.globals.write().insert(global.name.clone(), global);
        if let Some(replaced) = replaced {
            tracing::trace!(name = %replaced.name, binding = replaced.id, "replaced global");
        }
    }

    /// The global currently published under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<BoundGlobal>> {
        self.globals.read().get(name).cloned()
    }

    /// Resolve the global a proxy was created for.
    ///
    /// A proxy that outlived a rebind keeps its original binding; once the
    /// name is gone from the table, nothing resolves.
    pub fn resolve(&self, target: &CallTarget) -> Option<Arc<BoundGlobal>> {
        let globals = self.globals.read();
        globals.get(target.global.name())?;
        Some(Arc::clone(&target.global))
    }

    /// Names of the currently published globals, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.globals.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.globals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every published binding.
    pub(crate) fn clear(&self) {
        self.globals.write().clear();
    }

    /// Resolve, unmarshal, invoke, and marshal one call coming from script.
    ///
    /// Every failure is thrown into the script as an exception.
    pub(crate) fn dispatch<'js>(
        &self,
        ctx: &Ctx<'js>,
        target: &CallTarget,
        args: Vec<rquickjs::Value<'js>>,
    ) -> rquickjs::Result<rquickjs::Value<'js>> {
        let returned = self
            .resolve(target)
            .ok_or_else(|| DispatchError::UnknownGlobal {
                name: target.global.name.clone(),
            })
            .and_then(|global| {
                let signature = global.signature(target.method, args.len())?;
                let values = global.unmarshal(signature, &args)?;
                global.invoke(signature, &values)
            })
            .map_err(|err| throw(ctx, &err))?;
        value::to_js(ctx, &returned)
    }
}

fn throw(ctx: &Ctx<'_>, err: &DispatchError) -> rquickjs::Error {
    let message = err.to_string();
    match err {
        DispatchError::UnknownGlobal { .. } | DispatchError::UnknownMethod { .. } => {
            Exception::throw_reference(ctx, &message)
        }
        DispatchError::Arity { .. } | DispatchError::TypeMismatch { .. } => {
            Exception::throw_type(ctx, &message)
        }
        DispatchError::HostFault { .. } => Exception::throw_message(ctx, &message),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

//! Host objects that can be bound into the script namespace

use crate::error::HostError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// A host-side object reachable from script through a bound global.
///
/// The bridge holds the object behind an `Arc` for as long as the owning
/// interpreter is live, and may call it from whichever thread is evaluating.
pub trait HostObject: Send + Sync {
    /// Whether this object implements the capability type named `type_name`.
    fn implements(&self, type_name: &str) -> bool;

    /// Whether `invoke` can handle `method`. Checked for every declared
    /// method when the object is bound.
    fn responds_to(&self, method: &str) -> bool;

    /// Invoke `method` with arguments already converted to the declared types.
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, HostError>;
}

type HostMethod = Box<dyn Fn(&[Value]) -> Result<Value, HostError> + Send + Sync>;

/// Closure-backed [`HostObject`].
///
/// ```ignore
/// let adder = FnObject::new("Calculator")
///     .method("add", |args| Ok(Value::Int32(args[0].as_i32().unwrap_or(0) + 1)));
/// ```
pub struct FnObject {
    implements: Vec<String>,
    methods: HashMap<String, HostMethod>,
}

impl FnObject {
    /// Create an object implementing the capability type `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            implements: vec![type_name.into()],
            methods: HashMap::new(),
        }
    }

    /// Register the body of `name`. Replaces any earlier body with that name.
    pub fn method<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(body));
        self
    }

    /// Declare that this object also implements `type_name`.
    pub fn also_implements(mut self, type_name: impl Into<String>) -> Self {
        self.implements.push(type_name.into());
        self
    }
}

impl HostObject for FnObject {
    fn implements(&self, type_name: &str) -> bool {
        self.implements.iter().any(|name| name == type_name)
    }

    fn responds_to(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, HostError> {
        match self.methods.get(method) {
            Some(body) => body(args),
            None => Err(HostError::new(format!("no method named '{method}'"))),
        }
    }
}

impl fmt::Debug for FnObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("FnObject")
            .field("implements", &self.implements)
            .field("methods", &methods)
            .finish()
    }
}

//! Tether Scripting Bridge
//!
//! Embeds a JavaScript interpreter (QuickJS via rquickjs) and exposes
//! host objects to it through typed capabilities.
//!
//! ## Architecture
//!
//! - **Handles:** each interpreter is a generational handle into a
//!   process-wide instance table
//! - **Capabilities:** host objects are bound under a global name, restricted
//!   to methods over boolean, int32, double and string
//! - **Dispatch:** script calls reach the host through a per-context table
//!   indexed by global name and method index
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tether_script::{CapabilityType, FnObject, Interpreter, TypeTag, Value};
//!
//! let greeter = FnObject::new("Greeter")
//!     .method("greet", |args| Ok(Value::from(format!("hi {}", args[0].as_str().unwrap_or("")))));
//! let capability = CapabilityType::interface("Greeter")
//!     .method("greet", [TypeTag::String], TypeTag::String);
//!
//! let reply = Interpreter::scoped(|js| {
//!     js.bind("greeter", &capability, Arc::new(greeter))?;
//!     js.evaluate("greeter.greet('ada')")
//! })??;
//! assert_eq!(reply, "hi ada");
//! ```

pub mod capability;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handle;
pub mod host;
pub mod interpreter;
pub mod value;

pub use capability::{CapabilityDescriptor, CapabilityType, MethodSignature, TypeKind};
pub use config::EngineConfig;
pub use dispatch::{BoundGlobal, DispatchTable};
pub use error::{BindError, BridgeError, ConfigError, DispatchError, HostError, ScriptError};
pub use handle::{ContextHandle, ContextState};
pub use host::{FnObject, HostObject};
pub use interpreter::Interpreter;
pub use value::{TypeTag, Value};

pub use rquickjs;

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

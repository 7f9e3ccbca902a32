//! Interpreter engine adapter
//!
//! QuickJS, reached through rquickjs, is treated as a black box. This module
//! is the entire contract the bridge relies on:
//!
//! - [`create_context`] / [`destroy_context`]: one runtime and one context
//!   per interpreter instance
//! - [`evaluate`]: run source, stringify the completion value
//! - [`install_global`]: publish a proxy object whose functions forward to a
//!   [`DispatchTable`]
//! - [`collect_garbage`]: run a full collection cycle
//! - [`local_time_zone_offset`]: the host timezone query exposed to
//!   capabilities. QuickJS computes `Date` offsets itself through libc, and
//!   rquickjs offers no hook to replace that, so this mirrors its answer.
//!
//! Script-to-host calls may re-enter [`evaluate`] on the context that is
//! already running. The engine lock is held by the outer frame at that point,
//! so the adapter tracks which contexts are mid-dispatch on this thread and
//! evaluates on the active one directly instead of locking again.

use crate::config::EngineConfig;
use crate::dispatch::{BoundGlobal, CallTarget, DispatchTable};
use crate::error::{BridgeError, ScriptError};
use crate::value;
use chrono::{DateTime, Local, TimeZone};
use rquickjs::context::EvalOptions;
use rquickjs::function::Rest;
use rquickjs::{qjs, Context, Ctx, Function, Object, Runtime};
use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// One engine instance: a runtime and the single context living in it.
pub struct EngineContext {
    // Declared first so the context is released before its runtime.
    context: Context,
    runtime: Runtime,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("context", &self.context.as_raw())
            .finish()
    }
}

/// Allocate a new engine instance. `None` when the engine cannot allocate.
pub fn create_context(config: &EngineConfig) -> Option<EngineContext> {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::debug!(%err, "engine runtime allocation failed");
            return None;
        }
    };
    if let Some(limit) = config.memory_limit {
        runtime.set_memory_limit(limit);
    }
    if let Some(limit) = config.max_stack_size {
        runtime.set_max_stack_size(limit);
    }
    if let Some(threshold) = config.gc_threshold {
        runtime.set_gc_threshold(threshold);
    }

    match Context::full(&runtime) {
        Ok(context) => Some(EngineContext { context, runtime }),
        Err(err) => {
            tracing::debug!(%err, "engine context allocation failed");
            None
        }
    }
}

/// Release an engine instance.
///
/// Must not be called while a script is running on it.
pub fn destroy_context(context: EngineContext) {
    let EngineContext { context, runtime } = context;
    drop(context);
    runtime.run_gc();
    tracing::trace!("engine context destroyed");
}

/// Evaluate `source` and return its completion value as text.
///
/// `file_name` only affects diagnostics.
pub fn evaluate(context: &EngineContext, source: &str, file_name: &str) -> Result<String, ScriptError> {
    enter(context, |ctx| evaluate_in(&ctx, source, file_name))
}

/// Publish `global` as a proxy object in the context's global namespace,
/// replacing anything already stored under that name.
pub fn install_global(
    context: &EngineContext,
    dispatch: &Arc<DispatchTable>,
    global: &Arc<BoundGlobal>,
) -> Result<(), BridgeError> {
    enter(context, |ctx| {
        install_proxy(&ctx, dispatch, global).map_err(|err| match err {
            rquickjs::Error::Exception => BridgeError::Engine(describe_pending(&ctx)),
            other => BridgeError::Engine(other.to_string()),
        })
    })
}

/// Run a full collection cycle. Host objects held only by unreachable
/// proxies are released.
pub fn collect_garbage(context: &EngineContext) {
    enter(context, |ctx| ctx.run_gc());
}

/// Offset of local time from UTC, in seconds, at `millis` since the epoch.
pub fn local_time_zone_offset(millis: f64) -> i32 {
    if !millis.is_finite() {
        return 0;
    }
    match DateTime::from_timestamp_millis(millis as i64) {
        Some(utc) => Local
            .offset_from_utc_datetime(&utc.naive_utc())
            .local_minus_utc(),
        None => 0,
    }
}

fn enter<F, R>(context: &EngineContext, f: F) -> R
where
    F: for<'js> FnOnce(Ctx<'js>) -> R,
{
    let raw = context.context.as_raw();
    if ActiveContext::contains(raw) {
        // SAFETY: a dispatched call further up this thread's stack holds the
        // runtime lock for `raw`, and the `Ctx` cannot escape `f`.
        let ctx = unsafe { Ctx::from_raw(raw) };
        return f(ctx);
    }
    context.context.with(f)
}

fn evaluate_in(ctx: &Ctx<'_>, source: &str, file_name: &str) -> Result<String, ScriptError> {
    let mut options = EvalOptions::default();
    options.strict = false;
    options.filename = Some(file_name.to_string());

    ctx.eval_with_options::<rquickjs::Value, _>(source, options)
        .and_then(|completion| value::stringify(ctx, completion))
        .map_err(|err| script_error(ctx, err, file_name))
}

fn script_error(ctx: &Ctx<'_>, err: rquickjs::Error, file_name: &str) -> ScriptError {
    if !matches!(err, rquickjs::Error::Exception) {
        return ScriptError::new(err.to_string()).in_file(file_name);
    }

    let thrown = ctx.catch();
    let stack = thrown.as_exception().and_then(|exception| exception.stack());
    let error = ScriptError::new(render_thrown(ctx, thrown)).in_file(file_name);
    match stack.as_deref().and_then(|stack| line_in_stack(stack, file_name)) {
        Some(line) => error.at_line(line),
        None => error,
    }
}

fn describe_pending(ctx: &Ctx<'_>) -> String {
    let thrown = ctx.catch();
    render_thrown(ctx, thrown)
}

fn render_thrown<'js>(ctx: &Ctx<'js>, thrown: rquickjs::Value<'js>) -> String {
    match value::stringify(ctx, thrown) {
        Ok(message) => message,
        Err(_) => {
            // toString itself threw; discard that exception too.
            let _ = ctx.catch();
            "uncaught exception".to_string()
        }
    }
}

/// First line number recorded for `file_name` in an engine backtrace.
///
/// Frames look like `at <eval> (main.js:3:9)` or `at main.js:1:6`.
fn line_in_stack(stack: &str, file_name: &str) -> Option<u32> {
    let marker = format!("{file_name}:");
    stack.match_indices(&marker).find_map(|(at, _)| {
        let digits: String = stack[at + marker.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

fn install_proxy<'js>(
    ctx: &Ctx<'js>,
    dispatch: &Arc<DispatchTable>,
    global: &Arc<BoundGlobal>,
) -> rquickjs::Result<()> {
    let proxy = Object::new(ctx.clone())?;
    for (index, method) in global.descriptor().methods().iter().enumerate() {
        let table = Arc::clone(dispatch);
        let target = CallTarget {
            global: Arc::clone(global),
            method: index,
        };
        let function = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<rquickjs::Value<'js>>| {
                let _active = ActiveContext::enter(&ctx);
                table.dispatch(&ctx, &target, args.0)
            },
        )?
        .with_name(method.name())?;
        proxy.set(method.name(), function)?;
    }
    ctx.globals().set(global.name(), proxy)
}

thread_local! {
    static ACTIVE: RefCell<Vec<NonNull<qjs::JSContext>>> = const { RefCell::new(Vec::new()) };
}

/// Marks a context as running a dispatched host call on this thread.
struct ActiveContext;

impl ActiveContext {
    fn enter(ctx: &Ctx<'_>) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(ctx.as_raw()));
        ActiveContext
    }

    fn contains(raw: NonNull<qjs::JSContext>) -> bool {
        ACTIVE.with(|active| active.borrow().contains(&raw))
    }
}

impl Drop for ActiveContext {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

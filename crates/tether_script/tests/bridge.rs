use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tether_script::{
    BindError, BridgeError, CapabilityType, EngineConfig, FnObject, HostError, Interpreter,
    TypeTag, Value,
};

fn calculator() -> CapabilityType {
    CapabilityType::interface("Calculator")
        .method("add", [TypeTag::Int32, TypeTag::Int32], TypeTag::Int32)
        .method("half", [TypeTag::Double], TypeTag::Double)
        .method("negate", [TypeTag::Boolean], TypeTag::Boolean)
        .method("shout", [TypeTag::String], TypeTag::String)
        .method("fail", [], TypeTag::Void)
        .method("explode", [], TypeTag::Void)
        .method("reset", [], TypeTag::Void)
}

fn calculator_object(calls: Arc<AtomicUsize>) -> FnObject {
    FnObject::new("Calculator")
        .method("add", move |args| {
            calls.fetch_add(1, Ordering::SeqCst);
            let a = args[0].as_i32().unwrap_or_default();
            let b = args[1].as_i32().unwrap_or_default();
            Ok(Value::Int32(a + b))
        })
        .method("half", |args| Ok(Value::Double(args[0].as_f64().unwrap_or_default() / 2.0)))
        .method("negate", |args| Ok(Value::Boolean(!args[0].as_bool().unwrap_or_default())))
        .method("shout", |args| {
            Ok(Value::from(args[0].as_str().unwrap_or_default().to_uppercase()))
        })
        .method("fail", |_| Err(HostError::new("disk full")))
        .method("explode", |_| panic!("kaboom"))
        .method("reset", |_| Ok(Value::Int32(99)))
}

fn with_calculator(test: impl FnOnce(&Interpreter, &AtomicUsize)) {
    let calls = Arc::new(AtomicUsize::new(0));
    let object = calculator_object(Arc::clone(&calls));
    Interpreter::scoped(|js| {
        js.bind("calc", &calculator(), Arc::new(object)).unwrap();
        test(js, &calls);
    })
    .unwrap();
}

fn script_error(result: Result<String, BridgeError>) -> tether_script::ScriptError {
    match result {
        Err(BridgeError::Script(err)) => err,
        other => panic!("expected script error, got {other:?}"),
    }
}

#[test]
fn evaluate_returns_completion_as_text() {
    Interpreter::scoped(|js| {
        assert_eq!(js.evaluate("1+1").unwrap(), "2");
        assert_eq!(js.evaluate("0.5 * 3").unwrap(), "1.5");
        assert_eq!(js.evaluate("'a' + 1").unwrap(), "a1");
        assert_eq!(js.evaluate("1 < 2").unwrap(), "true");
        assert_eq!(js.evaluate("null").unwrap(), "null");
        assert_eq!(js.evaluate("undefined").unwrap(), "undefined");
        assert_eq!(js.evaluate("[1, 2, 3]").unwrap(), "1,2,3");
        assert_eq!(js.evaluate("({})").unwrap(), "[object Object]");
    })
    .unwrap();
}

#[test]
fn globals_persist_between_evaluations() {
    Interpreter::scoped(|js| {
        js.evaluate("var total = 10; function bump(n) { total += n; return total; }")
            .unwrap();
        assert_eq!(js.evaluate("bump(5)").unwrap(), "15");
        assert_eq!(js.evaluate("total").unwrap(), "15");
    })
    .unwrap();
}

#[test]
fn syntax_and_runtime_errors_surface_as_script_errors() {
    Interpreter::scoped(|js| {
        let err = script_error(js.evaluate("1 +"));
        assert!(err.message().starts_with("SyntaxError"), "{err}");

        let err = script_error(js.evaluate_named("var a = 1;\nmissing();", "main.js"));
        assert!(err.message().contains("missing"), "{err}");
        assert_eq!(err.file_name(), Some("main.js"));
        assert_eq!(err.line(), Some(2));

        let err = script_error(js.evaluate("throw 'plain'"));
        assert_eq!(err.message(), "plain");
        assert_eq!(err.file_name(), Some("?"));
    })
    .unwrap();
}

#[test]
fn bound_methods_marshal_primitives() {
    with_calculator(|js, calls| {
        assert_eq!(js.evaluate("calc.add(2, 3)").unwrap(), "5");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(js.evaluate("calc.add(4.0, -1)").unwrap(), "3");
        assert_eq!(js.evaluate("calc.half(3)").unwrap(), "1.5");
        assert_eq!(js.evaluate("calc.negate(false)").unwrap(), "true");
        assert_eq!(js.evaluate("calc.shout('hey')").unwrap(), "HEY");
        assert_eq!(js.evaluate("typeof calc.add(1, 1)").unwrap(), "number");
    });
}

#[test]
fn void_methods_return_undefined() {
    with_calculator(|js, _| {
        assert_eq!(js.evaluate("typeof calc.reset()").unwrap(), "undefined");
    });
}

#[test]
fn argument_mismatches_throw_type_errors() {
    with_calculator(|js, calls| {
        let checks = [
            "calc.add(1)",
            "calc.add(1, 2, 3)",
            "calc.add('1', 2)",
            "calc.add(1.5, 2)",
            "calc.negate(0)",
            "calc.shout(7)",
        ];
        for check in checks {
            let guarded = format!("try {{ {check}; 'no error' }} catch (e) {{ e instanceof TypeError }}");
            assert_eq!(js.evaluate(&guarded).unwrap(), "true", "{check}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn host_faults_are_catchable_in_script() {
    with_calculator(|js, _| {
        let caught = js
            .evaluate("try { calc.fail(); 'no error' } catch (e) { e.message }")
            .unwrap();
        assert!(caught.contains("calc.fail"), "{caught}");
        assert!(caught.contains("disk full"), "{caught}");

        let caught = js
            .evaluate("try { calc.explode(); 'no error' } catch (e) { e.message }")
            .unwrap();
        assert!(caught.contains("kaboom"), "{caught}");

        let err = script_error(js.evaluate("calc.fail()"));
        assert!(err.message().contains("disk full"), "{err}");
    });
}

#[test]
fn rejected_bind_installs_nothing() {
    Interpreter::scoped(|js| {
        let object = Arc::new(calculator_object(Arc::new(AtomicUsize::new(0))));

        let err = js
            .bind("calc", &CapabilityType::class("Calculator"), object.clone())
            .unwrap_err();
        assert!(matches!(err, BridgeError::Bind(BindError::NotACapability { .. })));

        let overloaded = calculator().method("add", [TypeTag::Double], TypeTag::Double);
        let err = js.bind("calc", &overloaded, object.clone()).unwrap_err();
        assert!(matches!(err, BridgeError::Bind(BindError::Overloaded { .. })));

        let opaque_return = CapabilityType::interface("Calculator").method(
            "add",
            [TypeTag::Int32, TypeTag::Int32],
            TypeTag::other("Map"),
        );
        let err = js.bind("calc", &opaque_return, object.clone()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::Bind(BindError::UnsupportedReturn {
                method: "add".into(),
                type_tag: TypeTag::other("Map"),
            })
        );

        let hollow = Arc::new(FnObject::new("Calculator"));
        let err = js.bind("calc", &calculator(), hollow).unwrap_err();
        assert!(matches!(err, BridgeError::Bind(BindError::NotSatisfied { .. })));

        let err = js.bind("", &calculator(), object).unwrap_err();
        assert_eq!(err, BridgeError::Bind(BindError::InvalidName));

        assert_eq!(js.evaluate("typeof calc").unwrap(), "undefined");
        assert!(js.globals().unwrap().is_empty());
    })
    .unwrap();
}

#[test]
fn rebinding_replaces_global_but_not_captured_proxies() {
    let named = |reply: &'static str| {
        Arc::new(FnObject::new("Named").method("name", move |_| Ok(Value::from(reply))))
    };
    let capability = CapabilityType::interface("Named").method("name", [], TypeTag::String);

    Interpreter::scoped(|js| {
        js.bind("svc", &capability, named("one")).unwrap();
        js.evaluate("var old = svc;").unwrap();
        js.bind("svc", &capability, named("two")).unwrap();

        assert_eq!(js.evaluate("old.name() + ',' + svc.name()").unwrap(), "one,two");
        assert_eq!(js.globals().unwrap(), vec!["svc".to_string()]);
    })
    .unwrap();
}

#[test]
fn rebinding_releases_unreachable_host_objects() {
    let capability = CapabilityType::interface("Named").method("name", [], TypeTag::String);
    let first: Arc<dyn tether_script::HostObject> =
        Arc::new(FnObject::new("Named").method("name", |_| Ok(Value::from("first"))));

    Interpreter::scoped(|js| {
        js.bind("svc", &capability, Arc::clone(&first)).unwrap();
        assert_eq!(js.evaluate("svc.name()").unwrap(), "first");

        for round in 0..100 {
            let reply = format!("round {round}");
            let next = FnObject::new("Named").method("name", move |_| Ok(Value::from(reply.as_str())));
            js.bind("svc", &capability, Arc::new(next)).unwrap();
        }
        js.collect_garbage().unwrap();

        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(js.evaluate("svc.name()").unwrap(), "round 99");
    })
    .unwrap();
}

#[test]
fn close_is_idempotent_and_final() {
    let js = Interpreter::create().unwrap();
    js.close();
    js.close();
    assert!(js.is_closed());
    assert_eq!(js.evaluate("1"), Err(BridgeError::Closed));
    assert_eq!(
        js.bind("calc", &calculator(), Arc::new(FnObject::new("Calculator"))),
        Err(BridgeError::Closed)
    );
}

#[test]
fn concurrent_close_destroys_once() {
    let object: Arc<dyn tether_script::HostObject> =
        Arc::new(calculator_object(Arc::new(AtomicUsize::new(0))));
    let js = Arc::new(Interpreter::create().unwrap());
    js.bind("calc", &calculator(), Arc::clone(&object)).unwrap();
    let closers: Vec<_> = (0..4)
        .map(|_| {
            let js = Arc::clone(&js);
            thread::spawn(move || js.close())
        })
        .collect();
    for closer in closers {
        closer.join().unwrap();
    }
    assert!(js.is_closed());
    assert_eq!(Arc::strong_count(&object), 1);
}

#[test]
fn closing_releases_host_objects() {
    let object: Arc<dyn tether_script::HostObject> =
        Arc::new(calculator_object(Arc::new(AtomicUsize::new(0))));
    let js = Interpreter::create().unwrap();
    js.bind("calc", &calculator(), Arc::clone(&object)).unwrap();
    assert!(Arc::strong_count(&object) > 1);

    js.close();
    assert_eq!(Arc::strong_count(&object), 1);
}

#[test]
fn evaluations_from_many_threads_are_serialized() {
    let js = Arc::new(Interpreter::create().unwrap());
    js.evaluate("var counter = 0;").unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let js = Arc::clone(&js);
            thread::spawn(move || {
                for _ in 0..50 {
                    js.evaluate("counter = counter + 1").unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(js.evaluate("counter").unwrap(), "200");
    js.close();
}

fn reentrant_capability() -> CapabilityType {
    CapabilityType::interface("Shell")
        .method("eval", [TypeTag::String], TypeTag::String)
        .method("shutdown", [], TypeTag::Void)
}

fn shell_for(target: Arc<Interpreter>) -> Arc<FnObject> {
    let closer = Arc::clone(&target);
    Arc::new(
        FnObject::new("Shell")
            .method("eval", move |args| {
                target
                    .evaluate(args[0].as_str().unwrap_or_default())
                    .map(Value::from)
                    .map_err(|err| HostError::new(err.to_string()))
            })
            .method("shutdown", move |_| {
                closer.close();
                Ok(Value::Void)
            }),
    )
}

#[test]
fn host_methods_may_reenter_evaluate() {
    let js = Arc::new(Interpreter::create().unwrap());
    js.bind("shell", &reentrant_capability(), shell_for(Arc::clone(&js)))
        .unwrap();

    assert_eq!(js.evaluate("var base = 40; shell.eval('base + 2')").unwrap(), "42");
    assert_eq!(
        js.evaluate("shell.eval(\"shell.eval('6 * 7')\")").unwrap(),
        "42"
    );

    let caught = js
        .evaluate("try { shell.eval('throw new Error(\"inner\")') } catch (e) { e.message }")
        .unwrap();
    assert!(caught.contains("inner"), "{caught}");
    js.close();
}

#[test]
fn host_methods_may_evaluate_other_contexts() {
    let other = Arc::new(Interpreter::create().unwrap());
    other.evaluate("var secret = 'from other'").unwrap();

    let js = Interpreter::create().unwrap();
    js.bind("other", &reentrant_capability(), shell_for(Arc::clone(&other)))
        .unwrap();
    assert_eq!(js.evaluate("other.eval('secret')").unwrap(), "from other");

    js.close();
    other.close();
}

#[test]
fn close_from_host_method_is_deferred() {
    let js = Arc::new(Interpreter::create().unwrap());
    js.bind("shell", &reentrant_capability(), shell_for(Arc::clone(&js)))
        .unwrap();

    assert_eq!(js.evaluate("shell.shutdown(); 'still running'").unwrap(), "still running");
    assert!(js.is_closed());
    assert_eq!(js.evaluate("1"), Err(BridgeError::Closed));
}

#[test]
fn allocation_failure_is_out_of_memory() {
    let config = EngineConfig {
        memory_limit: Some(1024),
        ..EngineConfig::default()
    };
    assert_eq!(Interpreter::create_with(config).unwrap_err(), BridgeError::OutOfMemory);
}

#[test]
fn scoped_closes_when_body_panics() {
    let handle = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&handle);
    let outcome = std::panic::catch_unwind(move || {
        Interpreter::scoped(|js| {
            *seen.lock().unwrap() = Some(js.handle());
            panic!("body failed");
        })
    });
    assert!(outcome.is_err());

    // A fresh interpreter may reuse the slot, but never the generation.
    let js = Interpreter::create().unwrap();
    assert_ne!(Some(js.handle()), *handle.lock().unwrap());
    js.close();
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn dropping_a_live_interpreter_warns() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let closed = Interpreter::create().unwrap();
        closed.close();
        drop(closed);

        let leaked = Interpreter::create().unwrap();
        drop(leaked);
    });

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert_eq!(output.matches("leaked").count(), 1, "{output}");
    assert!(output.contains("WARN"), "{output}");
}

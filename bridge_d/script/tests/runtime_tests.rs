//! Managed runtime tests against a small bridged fixture.

use api::{BoundMember, NativeFault, NativeHandle, Signature, ValueTag};
use common::RuntimeConfig;
use interop::{Dispatcher, InteropError, LifecycleHooks, LifecycleState, RegistryBuilder};
use script::{exceptions, AssemblyBuilder, ClassBuilder, Domain, ScriptError, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, line: impl Into<String>) {
    journal.lock().unwrap().push(line.into());
}

fn widget(name: &str) -> BoundMember {
    BoundMember::instance_member(
        "Test.Widget",
        name,
        Signature::new([ValueTag::String], ValueTag::String),
    )
}

fn setup() -> (Domain, Journal) {
    let _ = env_logger::builder().is_test(true).try_init();
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));

    let mut builder = RegistryBuilder::new();
    let j = journal.clone();
    let k = journal.clone();
    builder
        .bridge_type(
            "Test.Widget",
            LifecycleHooks::new(
                move |_h| {
                    note(&j, "native ctor");
                    Ok(())
                },
                move |_h, _r: ()| note(&k, "native dtor"),
            ),
        )
        .unwrap();
    builder
        .register(widget("Echo"), |_this: NativeHandle, s: String| s)
        .unwrap();
    builder
        .register(
            widget("Fail"),
            |_this: NativeHandle, s: String| -> Result<String, NativeFault> {
                Err(NativeFault::new(s))
            },
        )
        .unwrap();

    let dispatcher = Dispatcher::new(Arc::new(builder.freeze()));
    let domain = Domain::new(RuntimeConfig::default(), dispatcher);

    let ctor_journal = journal.clone();
    let fin_journal = journal.clone();
    let finally_journal = journal.clone();
    let image = AssemblyBuilder::new("RuntimeTests")
        .class(
            ClassBuilder::new("Test", "Widget")
                .extern_instance("Echo", [ValueTag::String], ValueTag::String)
                .extern_instance("Fail", [ValueTag::String], ValueTag::String)
                .constructor(move |_ctx| {
                    note(&ctor_journal, "managed ctor");
                    Ok(Value::Void)
                })
                .finalizer(move |_ctx| {
                    note(&fin_journal, "managed finalizer");
                    Ok(Value::Void)
                }),
        )
        .class(
            ClassBuilder::new("", "Driver")
                .method("Echo", [ValueTag::String], ValueTag::String, |ctx| {
                    let w = ctx.new_object("Widget")?;
                    let s = ctx.string(0)?;
                    ctx.call_extern(w, "Echo", vec![Value::String(s)])
                })
                .method("Fail", [ValueTag::String], ValueTag::Void, move |ctx| {
                    let w = ctx.new_object("Widget")?;
                    let s = ctx.string(0)?;
                    let journal = finally_journal.clone();
                    ctx.try_finally(
                        |ctx| ctx.call_extern(w, "Fail", vec![Value::String(s)]),
                        move |_ctx| note(&journal, "finally"),
                    )?;
                    Ok(Value::Void)
                })
                .method("Catch", [], ValueTag::String, |ctx| {
                    let w = ctx.new_object("Widget")?;
                    ctx.try_catch(
                        |ctx| ctx.call_extern(w, "Fail", vec![Value::from("caught")]),
                        |_ctx, e| Ok(Value::from(e.message)),
                    )
                })
                .method("Throw", [], ValueTag::Void, |ctx| {
                    ctx.throw(exceptions::EXCEPTION, "Hello!")
                }),
        )
        .build()
        .unwrap();
    domain.provide(image);
    (domain, journal)
}

#[test]
fn test_lookup_failures() {
    let (domain, _) = setup();
    assert!(matches!(
        domain.load_assembly("some_assembly_that_doesnt_exist_12345"),
        Err(ScriptError::AssemblyNotFound(_))
    ));

    let assembly = domain.load_assembly("RuntimeTests").unwrap();
    assert!(matches!(
        assembly.get_class("SomeClassThatDoesntExist12345"),
        Err(ScriptError::ClassNotFound(_))
    ));

    let driver = assembly.get_class("Driver").unwrap();
    let obj = assembly.new_class_instance(&driver).unwrap();
    assert!(obj.get_method("Echo", 1).is_ok());
    assert!(matches!(
        obj.get_method("Echo", 2),
        Err(ScriptError::MethodNotFound(_))
    ));
}

#[test]
fn test_string_round_trip_through_native() {
    let (domain, _) = setup();
    let assembly = domain.load_assembly("RuntimeTests").unwrap();
    let obj = assembly
        .new_class_instance(&assembly.get_class("Driver").unwrap())
        .unwrap();

    let echo = obj.thunk::<(&str,), String>("Echo").unwrap();
    assert_eq!(echo.call(("Hello from C#!",)).unwrap(), "Hello from C#!");
}

#[test]
fn test_native_fault_runs_finally_and_surfaces_message() {
    let (domain, journal) = setup();
    let assembly = domain.load_assembly("RuntimeTests").unwrap();
    let obj = assembly
        .new_class_instance(&assembly.get_class("Driver").unwrap())
        .unwrap();

    let fail = obj.thunk::<(&str,), ()>("Fail").unwrap();
    match fail.call(("Hello!",)) {
        Err(InteropError::ManagedFault { member, exception }) => {
            assert_eq!(member, "Driver::Fail");
            assert_eq!(exception.type_name, interop::fault::NATIVE_EXCEPTION);
            assert_eq!(exception.message, "Hello!");
            assert_eq!(exception.origin(), Some("Test.Widget::Fail"));
        }
        other => panic!("expected managed fault, got {:?}", other),
    }
    assert!(journal.lock().unwrap().contains(&"finally".to_string()));

    let catch = obj.thunk::<(), String>("Catch").unwrap();
    assert_eq!(catch.call(()).unwrap(), "caught");
}

#[test]
fn test_managed_exception_reaches_native_caller() {
    let (domain, _) = setup();
    let assembly = domain.load_assembly("RuntimeTests").unwrap();
    let obj = assembly
        .new_class_instance(&assembly.get_class("Driver").unwrap())
        .unwrap();

    let err = obj.thunk::<(), ()>("Throw").unwrap().call(()).unwrap_err();
    match err {
        InteropError::ManagedFault { exception, .. } => {
            assert_eq!(exception.type_name, exceptions::EXCEPTION);
            assert_eq!(exception.message, "Hello!");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_construction_and_collection_order() {
    let (domain, journal) = setup();
    let assembly = domain.load_assembly("RuntimeTests").unwrap();
    let widget = assembly.get_class("Test.Widget").unwrap();

    let instance = assembly.new_class_instance(&widget).unwrap();
    let object = instance.object();
    assert_eq!(
        domain.dispatcher().objects().state(object),
        LifecycleState::Live
    );
    assert_eq!(domain.collect(), 0);

    drop(instance);
    assert_eq!(domain.collect(), 1);
    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "native ctor",
            "managed ctor",
            "managed finalizer",
            "native dtor"
        ]
    );
    assert_eq!(domain.dispatcher().objects().live_count(), 0);
}

#[test]
fn test_dispose_then_collect_destroys_once() {
    let (domain, journal) = setup();
    let assembly = domain.load_assembly("RuntimeTests").unwrap();
    let widget = assembly.get_class("Widget").unwrap();

    let instance = assembly.new_class_instance(&widget).unwrap();
    assert!(instance.dispose());
    assert!(!instance.dispose());
    drop(instance);
    domain.collect();

    let dtors = journal
        .lock()
        .unwrap()
        .iter()
        .filter(|line| *line == "native dtor")
        .count();
    assert_eq!(dtors, 1);
}

#[test]
fn test_extern_differing_only_in_return_type_is_rejected() {
    let result = AssemblyBuilder::new("Ambiguous")
        .class(
            ClassBuilder::new("Aeon", "NativeMath")
                .extern_static("AddLeet", [ValueTag::Int32], ValueTag::Int32)
                .extern_static("AddLeet", [ValueTag::Int32], ValueTag::Int64),
        )
        .build();
    assert!(matches!(result, Err(ScriptError::AmbiguousExtern(_))));
}

#[test]
fn test_concurrent_collections_finalize_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut builder = RegistryBuilder::new();
    builder
        .bridge_type(
            "Test.Slow",
            LifecycleHooks::new(
                |_h| Ok(()),
                |_h, _r: ()| thread::sleep(Duration::from_millis(300)),
            ),
        )
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(builder.freeze()));
    let domain = Domain::new(RuntimeConfig::default(), dispatcher);

    let finalized = Arc::new(AtomicUsize::new(0));
    let counter = finalized.clone();
    domain.provide(
        AssemblyBuilder::new("Slow")
            .class(ClassBuilder::new("Test", "Slow").finalizer(move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Void)
            }))
            .build()
            .unwrap(),
    );
    let assembly = domain.load_assembly("Slow").unwrap();
    let slow = assembly.get_class("Test.Slow").unwrap();
    drop(assembly.new_class_instance(&slow).unwrap());

    let first = {
        let domain = domain.clone();
        thread::spawn(move || domain.collect())
    };
    // Lands while the first collection is inside the destroy hook
    thread::sleep(Duration::from_millis(100));
    let second = domain.collect();
    let first = first.join().unwrap();

    assert_eq!(first + second, 1);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert_eq!(domain.object_count(), 0);
}

#[test]
fn test_unbridged_object_cannot_cross_as_handle() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut builder = RegistryBuilder::new();
    builder
        .register(
            BoundMember::static_member(
                "Test.Native",
                "Touch",
                Signature::new([ValueTag::Object], ValueTag::Void),
            ),
            |_h: NativeHandle| {},
        )
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(builder.freeze()));
    let domain = Domain::new(RuntimeConfig::default(), dispatcher);
    domain.provide(
        AssemblyBuilder::new("Plain")
            .class(ClassBuilder::new("Test", "Plain"))
            .class(
                ClassBuilder::new("Test", "Native")
                    .extern_static("Touch", [ValueTag::Object], ValueTag::Void)
                    .static_method("Pass", [], ValueTag::Void, |ctx| {
                        let plain = ctx.new_object("Plain")?;
                        ctx.call_static_extern("Test.Native", "Touch", vec![Value::Object(plain)])
                    }),
            )
            .build()
            .unwrap(),
    );
    domain.load_assembly("Plain").unwrap();

    let pass = domain.static_thunk::<(), ()>("Test.Native", "Pass").unwrap();
    match pass.call(()) {
        Err(InteropError::ManagedFault { exception, .. }) => {
            assert_eq!(exception.type_name, interop::fault::MARSHAL_EXCEPTION);
            assert!(exception.message.contains("no live native handle"));
        }
        other => panic!("expected a marshal fault, got {:?}", other),
    }
}

//! Bridge behavior across threads and through the process-wide host.

use api::{BoundMember, MarshaledValue, NativeFault, NativeHandle, ObjectId, Signature, ValueTag};
use interop::{
    bridge_registry, init_bridge_host, CallFrame, Dispatcher, InteropError, LifecycleHooks,
    LifecycleState, ObjectBridge, RegistryBuilder,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn wait() -> BoundMember {
    BoundMember::instance_member(
        "Aeon.Slow",
        "Wait",
        Signature::new([ValueTag::Int32], ValueTag::Int32),
    )
}

struct SlowFixture {
    dispatcher: Dispatcher,
    started: std::sync::mpsc::Receiver<()>,
    release: Arc<AtomicBool>,
    destroyed: Arc<AtomicUsize>,
    during_call: Arc<AtomicBool>,
}

fn slow_fixture() -> SlowFixture {
    let (started_tx, started) = channel();
    let started_tx = Mutex::new(started_tx);
    let release = Arc::new(AtomicBool::new(false));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let in_call = Arc::new(AtomicBool::new(false));
    let during_call = Arc::new(AtomicBool::new(false));

    let mut builder = RegistryBuilder::new();
    let gate = release.clone();
    let flag = in_call.clone();
    builder
        .register(wait(), move |_this: NativeHandle, n: i32| {
            flag.store(true, Ordering::SeqCst);
            let _ = started_tx.lock().unwrap().send(());
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            flag.store(false, Ordering::SeqCst);
            n
        })
        .unwrap();

    let counter = destroyed.clone();
    let overlap = during_call.clone();
    builder
        .bridge_type(
            "Aeon.Slow",
            LifecycleHooks::new(
                |_h| Ok(()),
                move |_h, _r: ()| {
                    if in_call.load(Ordering::SeqCst) {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            ),
        )
        .unwrap();

    SlowFixture {
        dispatcher: Dispatcher::new(Arc::new(builder.freeze())),
        started,
        release,
        destroyed,
        during_call,
    }
}

#[test]
fn test_destroy_waits_for_in_flight_call() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fixture = slow_fixture();
    let object = ObjectId(1);
    fixture.dispatcher.construct("Aeon.Slow", object).unwrap();

    let caller = {
        let dispatcher = fixture.dispatcher.clone();
        thread::spawn(move || {
            dispatcher.invoke(
                &wait(),
                CallFrame::with_this(object, vec![MarshaledValue::Int32(7)]),
            )
        })
    };
    fixture.started.recv().unwrap();

    let destroyer = {
        let dispatcher = fixture.dispatcher.clone();
        thread::spawn(move || dispatcher.finalize(object))
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(fixture.destroyed.load(Ordering::SeqCst), 0);
    assert_eq!(
        fixture.dispatcher.objects().state(object),
        LifecycleState::Destructing
    );

    fixture.release.store(true, Ordering::SeqCst);
    assert_eq!(caller.join().unwrap().unwrap(), MarshaledValue::Int32(7));
    assert!(destroyer.join().unwrap());

    assert_eq!(fixture.destroyed.load(Ordering::SeqCst), 1);
    assert!(!fixture.during_call.load(Ordering::SeqCst));
    assert_eq!(
        fixture.dispatcher.objects().state(object),
        LifecycleState::Destroyed
    );
}

#[test]
fn test_concurrent_destroys_run_hook_once() {
    let objects = Arc::new(ObjectBridge::new());
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = destroyed.clone();
    let hooks = LifecycleHooks::new(
        |_h| Ok(()),
        move |_h, _r: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );
    objects.construct(ObjectId(1), "Aeon.MyObject", &hooks).unwrap();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let objects = objects.clone();
            thread::spawn(move || objects.destroy(ObjectId(1)))
        })
        .collect();
    let ran: usize = threads
        .into_iter()
        .map(|t| t.join().unwrap() as usize)
        .sum();

    assert_eq!(ran, 1);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_destroy_from_inside_call_is_deferred() {
    let objects = Arc::new(ObjectBridge::new());
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = destroyed.clone();

    let kill = BoundMember::instance_member("Aeon.MyObject", "Kill", Signature::void());
    let mut builder = RegistryBuilder::new();
    let inner = objects.clone();
    builder
        .register(kill.clone(), move |this: NativeHandle| -> Result<(), NativeFault> {
            let object = inner
                .object_of(this)
                .map_err(|e| NativeFault::new(e.to_string()))?;
            // Resource is still usable for the rest of this call
            if inner.destroy(object) {
                return Err(NativeFault::new("destroyed while in flight"));
            }
            inner
                .with_resource(this, |count: &mut u32| *count += 1)
                .map_err(|e| NativeFault::new(e.to_string()))
        })
        .unwrap();
    builder
        .bridge_type(
            "Aeon.MyObject",
            LifecycleHooks::new(
                |_h| Ok(0u32),
                move |_h, uses: u32| {
                    counter.fetch_add(uses as usize + 1, Ordering::SeqCst);
                },
            ),
        )
        .unwrap();
    let dispatcher = Dispatcher::with_objects(Arc::new(builder.freeze()), objects.clone());

    dispatcher.construct("Aeon.MyObject", ObjectId(4)).unwrap();
    dispatcher
        .invoke(&kill, CallFrame::with_this(ObjectId(4), vec![]))
        .unwrap();

    // Hook ran after the call, seeing the increment made inside it
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert_eq!(objects.state(ObjectId(4)), LifecycleState::Destroyed);
}

#[test]
fn test_native_panic_becomes_fault() {
    let crash = BoundMember::static_member("Aeon.NativeMath", "Crash", Signature::void());
    let mut builder = RegistryBuilder::new();
    builder
        .register(crash.clone(), || -> () { panic!("bad native code") })
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(builder.freeze()));

    match dispatcher.invoke(&crash, CallFrame::default()) {
        Err(InteropError::NativeFault { fault, .. }) => {
            assert!(fault.message.contains("bad native code"))
        }
        other => panic!("expected native fault, got {:?}", other),
    }
}

#[test]
fn test_host_initializes_once() {
    let mut builder = RegistryBuilder::new();
    builder
        .register(
            BoundMember::static_member(
                "Aeon.NativeMath",
                "AddLeet",
                Signature::new([ValueTag::Int32], ValueTag::Int32),
            ),
            |a: i32| a + 1337,
        )
        .unwrap();

    let registry = init_bridge_host(builder).unwrap();
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(&registry, &bridge_registry().unwrap()));

    let err = init_bridge_host(RegistryBuilder::new()).unwrap_err();
    assert!(matches!(err, InteropError::HostInit(_)));
    assert!(err.is_fatal());
    assert_eq!(bridge_registry().unwrap().len(), 1);
}

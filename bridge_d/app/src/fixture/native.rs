//! Host side of the `BridgeTests` fixture.

use log::info;
use std::sync::{Arc, Mutex, PoisonError};

use api::{BoundMember, NativeFault, NativeHandle, Signature, ValueTag};
use interop::{InteropError, LifecycleHooks, ObjectBridge, RegistryBuilder};

pub const MY_OBJECT: &str = "Aeon.MyObject";
pub const NATIVE_MATH: &str = "Aeon.NativeMath";

/// Everything the native bindings did, in order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "bridge_d::native", "{}", line);
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| *entry == line)
            .count()
    }
}

/// Native state behind every `Aeon.MyObject`.
#[derive(Debug, Default)]
pub struct MyObject {
    calls: i32,
}

fn my_object(member: &str, params: &[ValueTag], ret: ValueTag) -> BoundMember {
    BoundMember::instance_member(MY_OBJECT, member, Signature::new(params, ret))
}

fn native_math(member: &str, params: &[ValueTag], ret: ValueTag) -> BoundMember {
    BoundMember::static_member(NATIVE_MATH, member, Signature::new(params, ret))
}

fn released(err: InteropError) -> NativeFault {
    NativeFault::new(err.to_string())
}

/// Registers the fixture's native members and bridged types.
pub fn register_native_bindings(
    builder: &mut RegistryBuilder,
    objects: &Arc<ObjectBridge>,
    journal: &Journal,
) -> Result<(), InteropError> {
    let created = journal.clone();
    let deleted = journal.clone();
    builder.bridge_type(
        MY_OBJECT,
        LifecycleHooks::new(
            move |_handle| {
                created.record("MyObject created.");
                Ok(MyObject::default())
            },
            move |_handle, _object: MyObject| deleted.record("MyObject deleted."),
        ),
    )?;

    let (bridge, log) = (objects.clone(), journal.clone());
    builder.register(
        my_object("DoStuff", &[ValueTag::String], ValueTag::Void),
        move |this: NativeHandle, value: String| -> Result<(), NativeFault> {
            bridge
                .with_resource(this, |object: &mut MyObject| object.calls += 1)
                .map_err(released)?;
            log.record(format!("DoStuff was called with: {}", value));
            Ok(())
        },
    )?;

    let bridge = objects.clone();
    builder.register(
        my_object("Echo", &[ValueTag::String], ValueTag::String),
        move |this: NativeHandle, value: String| -> Result<String, NativeFault> {
            bridge
                .with_resource(this, |object: &mut MyObject| object.calls += 1)
                .map_err(released)?;
            Ok(value)
        },
    )?;

    let bridge = objects.clone();
    builder.register(
        my_object("CallCount", &[], ValueTag::Int32),
        move |this: NativeHandle| -> Result<i32, NativeFault> {
            bridge
                .with_resource(this, |object: &mut MyObject| object.calls)
                .map_err(released)
        },
    )?;

    builder.register(
        my_object("Fail", &[ValueTag::String], ValueTag::Void),
        |_this: NativeHandle, message: String| -> Result<(), NativeFault> {
            Err(NativeFault::new(message))
        },
    )?;

    builder.register(
        native_math("AddLeet", &[ValueTag::Int32], ValueTag::Int32),
        |a: i32| -> Result<i32, NativeFault> {
            a.checked_add(1337)
                .ok_or_else(|| NativeFault::new(format!("{} + 1337 overflows int", a)))
        },
    )?;

    let log = journal.clone();
    builder.register(
        native_math(
            "Mix",
            &[ValueTag::Float32, ValueTag::Int32, ValueTag::Float32],
            ValueTag::Void,
        ),
        move |a: f32, b: i32, c: f32| log.record(format!("Mix({}, {}, {})", a, b, c)),
    )?;

    Ok(())
}

//! Managed side of the `BridgeTests` fixture.

use api::ValueTag;
use script::{exceptions, AssemblyBuilder, AssemblyDef, ClassBuilder, ScriptError, Value};

use super::native::{MY_OBJECT, NATIVE_MATH};

pub const CLASS_INSTANCE_TEST: &str = "ClassInstanceTest";

fn my_object_class() -> ClassBuilder {
    ClassBuilder::new("Aeon", "MyObject")
        .extern_instance("DoStuff", [ValueTag::String], ValueTag::Void)
        .extern_instance("Echo", [ValueTag::String], ValueTag::String)
        .extern_instance("CallCount", [], ValueTag::Int32)
        .extern_instance("Fail", [ValueTag::String], ValueTag::Void)
        .constructor(|ctx| {
            ctx.log("MyObject constructor");
            Ok(Value::Void)
        })
        .finalizer(|ctx| {
            ctx.log("MyObject finalizer");
            Ok(Value::Void)
        })
}

fn native_math_class() -> ClassBuilder {
    ClassBuilder::new("Aeon", "NativeMath")
        .extern_static("AddLeet", [ValueTag::Int32], ValueTag::Int32)
        .extern_static(
            "Mix",
            [ValueTag::Float32, ValueTag::Int32, ValueTag::Float32],
            ValueTag::Void,
        )
}

fn class_instance_test() -> ClassBuilder {
    ClassBuilder::new("", CLASS_INSTANCE_TEST)
        .method("Method", [], ValueTag::Void, |ctx| {
            ctx.log("Method called");
            Ok(Value::Void)
        })
        .method("MethodWithParameter", [ValueTag::Int32], ValueTag::Void, |ctx| {
            let value = ctx.int(0)?;
            ctx.log(&format!("MethodWithParameter called with {}", value));
            Ok(Value::Void)
        })
        .method(
            "MethodWithParameterAndReturnValue",
            [ValueTag::Int32],
            ValueTag::Int32,
            |ctx| {
                let value = ctx.int(0)?;
                ctx.call_static_extern(NATIVE_MATH, "AddLeet", vec![Value::from(value)])
            },
        )
        .method(
            "MethodWithParameters",
            [ValueTag::Float32, ValueTag::Int32, ValueTag::Float32],
            ValueTag::Void,
            |ctx| {
                let args = vec![
                    Value::from(ctx.float(0)?),
                    Value::from(ctx.int(1)?),
                    Value::from(ctx.float(2)?),
                ];
                ctx.call_static_extern(NATIVE_MATH, "Mix", args)
            },
        )
        .method("MethodWithStringReturnValue", [], ValueTag::String, |_ctx| {
            Ok(Value::from("Hello from C#!"))
        })
        .method("EchoString", [ValueTag::String], ValueTag::String, |ctx| {
            let value = ctx.string(0)?;
            let object = ctx.new_object(MY_OBJECT)?;
            ctx.call_extern(object, "Echo", vec![Value::String(value)])
        })
        .method("ExceptionMethod", [], ValueTag::Void, |ctx| {
            ctx.throw(exceptions::EXCEPTION, "Hello!")
        })
        .method("NativeExceptionMethod", [ValueTag::String], ValueTag::Void, |ctx| {
            let message = ctx.string(0)?;
            let object = ctx.new_object(MY_OBJECT)?;
            ctx.try_finally(
                |ctx| ctx.call_extern(object, "Fail", vec![Value::String(message)]),
                |ctx| ctx.log("finally after native fault"),
            )
        })
        .method("CatchNativeException", [ValueTag::String], ValueTag::String, |ctx| {
            let message = ctx.string(0)?;
            let object = ctx.new_object(MY_OBJECT)?;
            ctx.try_catch(
                |ctx| {
                    ctx.call_extern(object, "Fail", vec![Value::String(message)])?;
                    Ok(Value::from("no exception"))
                },
                |_ctx, exception| Ok(Value::from(exception.message)),
            )
        })
        .method("UseMyObject", [ValueTag::String], ValueTag::Int32, |ctx| {
            let value = ctx.string(0)?;
            let object = ctx.new_object(MY_OBJECT)?;
            ctx.call_extern(object, "DoStuff", vec![Value::String(value.clone())])?;
            ctx.call_extern(object, "DoStuff", vec![Value::String(value)])?;
            ctx.call_extern(object, "CallCount", vec![])
        })
        .method("CreateMyObject", [], ValueTag::Void, |ctx| {
            ctx.new_object(MY_OBJECT)?;
            Ok(Value::Void)
        })
}

/// The `BridgeTests` assembly image.
pub fn bridge_tests_assembly(name: &str) -> Result<AssemblyDef, ScriptError> {
    AssemblyBuilder::new(name)
        .class(my_object_class())
        .class(native_math_class())
        .class(class_instance_test())
        .build()
}

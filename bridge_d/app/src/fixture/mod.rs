//! The `BridgeTests` fixture: native bindings, the managed test assembly and
//! the scenarios that exercise the bridge through them.

mod managed;
mod native;

pub use managed::{bridge_tests_assembly, CLASS_INSTANCE_TEST};
pub use native::{register_native_bindings, Journal, MyObject, MY_OBJECT, NATIVE_MATH};

use anyhow::{bail, ensure, Result};
use log::{error, info};

use interop::{fault, InteropError};
use script::{exceptions, ClassInstance, Domain, ScriptError};

use crate::report::{FixtureReport, ScenarioResult};

struct Runner {
    results: Vec<ScenarioResult>,
}

impl Runner {
    fn scenario(&mut self, name: &str, f: impl FnOnce() -> Result<String>) {
        let result = match f() {
            Ok(detail) => {
                info!("✓ {}: {}", name, detail);
                ScenarioResult::passed(name, detail)
            }
            Err(e) => {
                error!("✗ {}: {:#}", name, e);
                ScenarioResult::failed(name, format!("{:#}", e))
            }
        };
        self.results.push(result);
    }
}

fn expect_fault(err: InteropError, type_name: &str, message: &str) -> Result<String> {
    match err {
        InteropError::ManagedFault { member, exception } => {
            ensure!(
                exception.type_name == type_name,
                "expected {}, got {}",
                type_name,
                exception.type_name
            );
            ensure!(
                exception.message == message,
                "expected message {:?}, got {:?}",
                message,
                exception.message
            );
            Ok(format!("{} raised {}", member, exception))
        }
        other => bail!("expected a managed fault, got {}", other),
    }
}

/// Runs every scenario against `assembly_name` loaded into `domain`.
///
/// A failing scenario is recorded and the run continues. Only a failure to
/// load the assembly or instantiate the test class aborts the run.
pub fn run_fixture(
    domain: &Domain,
    assembly_name: &str,
    journal: &Journal,
) -> Result<FixtureReport> {
    let mut runner = Runner {
        results: Vec::new(),
    };

    runner.scenario("load_assembly_fail", || {
        match domain.load_assembly("some_assembly_that_doesnt_exist_12345") {
            Err(ScriptError::AssemblyNotFound(name)) => Ok(format!("{} not found", name)),
            Err(other) => bail!("unexpected error {}", other),
            Ok(_) => bail!("loading a missing assembly succeeded"),
        }
    });

    let assembly = domain.load_assembly(assembly_name)?;

    runner.scenario("get_class_fail", || {
        match assembly.get_class("SomeClassThatDoesntExist12345") {
            Err(ScriptError::ClassNotFound(name)) => Ok(format!("{} not found", name)),
            Err(other) => bail!("unexpected error {}", other),
            Ok(_) => bail!("looking up a missing class succeeded"),
        }
    });

    let class = assembly.get_class(CLASS_INSTANCE_TEST)?;
    let obj: ClassInstance = assembly.new_class_instance(&class)?;

    runner.scenario("get_method", || {
        obj.get_method("Method", 0)?;
        obj.get_method("MethodWithParameter", 1)?;
        obj.get_method("MethodWithParameterAndReturnValue", 1)?;
        ensure!(
            matches!(
                obj.get_method("Method", 3),
                Err(ScriptError::MethodNotFound(_))
            ),
            "Method/3 should not exist"
        );
        Ok("methods resolved by name and parameter count".into())
    });

    runner.scenario("method", || {
        obj.thunk::<(), ()>("Method")?.call(())?;
        Ok("Method()".into())
    });

    runner.scenario("method_with_parameter", || {
        obj.thunk::<(i32,), ()>("MethodWithParameter")?.call((42,))?;
        Ok("MethodWithParameter(42)".into())
    });

    runner.scenario("add_leet", || {
        let thunk = obj.thunk::<(i32,), i32>("MethodWithParameterAndReturnValue")?;
        let value = thunk.call((5,))?;
        ensure!(value == 1342, "5 + 1337 returned {}", value);
        Ok(format!("5 + 1337 = {}", value))
    });

    runner.scenario("mixed_parameters", || {
        let thunk = obj.thunk::<(f32, i32, f32), ()>("MethodWithParameters")?;
        thunk.call((1.5, 2, 3.25))?;
        let expected = "Mix(1.5, 2, 3.25)";
        ensure!(journal.count(expected) > 0, "native side never saw {}", expected);
        Ok(expected.into())
    });

    runner.scenario("string_return", || {
        let value = obj
            .thunk::<(), String>("MethodWithStringReturnValue")?
            .call(())?;
        ensure!(value == "Hello from C#!", "got {:?}", value);
        Ok(value)
    });

    runner.scenario("string_round_trip", || {
        let sent = "Hello from C#!";
        let value = obj.thunk::<(&str,), String>("EchoString")?.call((sent,))?;
        ensure!(value.as_bytes() == sent.as_bytes(), "got {:?}", value);
        Ok(value)
    });

    runner.scenario("managed_exception", || {
        match obj.thunk::<(), ()>("ExceptionMethod")?.call(()) {
            Err(err) => expect_fault(err, exceptions::EXCEPTION, "Hello!"),
            Ok(()) => bail!("ExceptionMethod returned normally"),
        }
    });

    runner.scenario("native_exception", || {
        match obj
            .thunk::<(&str,), ()>("NativeExceptionMethod")?
            .call(("Hello!",))
        {
            Err(err) => expect_fault(err, fault::NATIVE_EXCEPTION, "Hello!"),
            Ok(()) => bail!("NativeExceptionMethod returned normally"),
        }
    });

    runner.scenario("caught_native_exception", || {
        let thunk = obj.thunk::<(&str,), String>("CatchNativeException")?;
        let message = thunk.call(("Hello!",))?;
        ensure!(message == "Hello!", "caught {:?}", message);
        Ok(format!("managed catch saw {:?}", message))
    });

    runner.scenario("native_object", || {
        let thunk = obj.thunk::<(&str,), i32>("UseMyObject")?;
        let calls = thunk.call(("Hello from C#!",))?;
        ensure!(calls == 2, "CallCount returned {}", calls);
        ensure!(
            journal.count("DoStuff was called with: Hello from C#!") >= 2,
            "DoStuff never reached native code"
        );
        Ok(format!("{} native calls on one instance", calls))
    });

    runner.scenario("native_object_lifecycle", || {
        obj.thunk::<(), ()>("CreateMyObject")?.call(())?;
        domain.collect();
        let created = journal.count("MyObject created.");
        let deleted = journal.count("MyObject deleted.");
        ensure!(created > 0, "no MyObject was created");
        ensure!(
            created == deleted,
            "{} created but {} deleted after collection",
            created,
            deleted
        );
        ensure!(
            domain.dispatcher().objects().live_count() == 0,
            "native handles survived collection"
        );
        Ok(format!("{} created, {} deleted", created, deleted))
    });

    drop(obj);
    Ok(FixtureReport::new(domain.name(), assembly_name, runner.results))
}

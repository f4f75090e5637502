// Example binding module: adds string helpers under `Aeon.Echo`.

use anyhow::Result;
use api::{BoundMember, ModuleLogger, Signature, ValueTag};
use interop::{BindingModule, InteropError, RegistryBuilder};

pub const ECHO_TYPE: &str = "Aeon.Echo";

pub struct EchoModule {
    logger: Option<ModuleLogger>,
}

impl EchoModule {
    fn new() -> Self {
        Self { logger: None }
    }
}

fn length_of(count: usize) -> Result<i32, api::NativeFault> {
    i32::try_from(count)
        .map_err(|_| api::NativeFault::new(format!("length {} does not fit an int", count)))
}

fn member(name: &str, params: &[ValueTag], ret: ValueTag) -> BoundMember {
    BoundMember::static_member(ECHO_TYPE, name, Signature::new(params, ret))
}

impl BindingModule for EchoModule {
    fn name(&self) -> &str {
        "echo_module"
    }

    fn initialize(&mut self, logger: ModuleLogger) -> Result<()> {
        logger.info("Initializing echo module");
        self.logger = Some(logger);
        Ok(())
    }

    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), InteropError> {
        builder.register(
            member("Reverse", &[ValueTag::String], ValueTag::String),
            |value: String| value.chars().rev().collect::<String>(),
        )?;
        builder.register(
            member("Length", &[ValueTag::String], ValueTag::Int32),
            |value: String| length_of(value.chars().count()),
        )?;
        builder.register(
            member("Repeat", &[ValueTag::String, ValueTag::Int32], ValueTag::String),
            |value: String, times: i32| -> Result<String, api::NativeFault> {
                let times = usize::try_from(times)
                    .map_err(|_| api::NativeFault::new(format!("cannot repeat {} times", times)))?;
                Ok(value.repeat(times))
            },
        )?;

        if let Some(logger) = &self.logger {
            logger.debug(&format!("Registered 3 bindings on {}", ECHO_TYPE));
        }
        Ok(())
    }

    fn unload(&mut self) {
        if let Some(logger) = &self.logger {
            logger.info("Tearing down echo module");
        }
    }
}

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn create_module() -> *mut dyn BindingModule {
    Box::into_raw(Box::new(EchoModule::new()))
}

mod member;
mod value;

pub use member::{BoundMember, MemberKey, MemberKind, Signature};
pub use value::{MarshaledValue, NativeHandle, ObjectId, ValueTag};

use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CString};

/// Failure reported by a native implementation.
///
/// Returned through `Err`, never encoded in a normal return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct NativeFault {
    pub message: String,
}

impl NativeFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An exception raised by managed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{type_name}: {message}")]
pub struct ManagedException {
    /// Fully qualified managed exception type, e.g. `System.Exception`.
    pub type_name: String,
    pub message: String,
    /// Managed frames the exception unwound through, innermost first.
    #[serde(default)]
    pub trace: Vec<String>,
}

impl ManagedException {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Member the exception was first raised in, if known.
    pub fn origin(&self) -> Option<&str> {
        self.trace.first().map(String::as_str)
    }

    pub fn push_frame(&mut self, frame: impl Into<String>) {
        self.trace.push(frame.into());
    }
}

/// log level for module logging
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

/// logger callback for modules
pub type LogCallback = extern "C" fn(level: LogLevel, target: *const c_char, message: *const c_char);

/// Logger handed to native binding modules so their output lands in the host log.
pub struct ModuleLogger {
    callback: LogCallback,
    module_name: String,
}

impl ModuleLogger {
    pub fn new(callback: LogCallback, module_name: String) -> Self {
        Self {
            callback,
            module_name,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    fn log(&self, level: LogLevel, message: &str) {
        let (Ok(target), Ok(msg)) = (
            CString::new(self.module_name.as_str()),
            CString::new(message.replace('\0', "\\0")),
        ) else {
            log::warn!("Dropping log line from {:?}: interior NUL", self.module_name);
            return;
        };
        (self.callback)(level, target.as_ptr(), msg.as_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::sync::Mutex;

    static CAPTURED: Mutex<Vec<(LogLevel, String, String)>> = Mutex::new(Vec::new());

    extern "C" fn capture(level: LogLevel, target: *const c_char, message: *const c_char) {
        let target = unsafe { CStr::from_ptr(target) }.to_string_lossy().into_owned();
        let message = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
        CAPTURED.lock().unwrap().push((level, target, message));
    }

    #[test]
    fn test_module_logger_forwards_through_callback() {
        let logger = ModuleLogger::new(capture, "bridge_d::plugins::echo".to_string());
        logger.warn("careful");
        logger.info("nul\0inside");

        let captured = CAPTURED.lock().unwrap();
        assert_eq!(
            captured[0],
            (
                LogLevel::Warn,
                "bridge_d::plugins::echo".to_string(),
                "careful".to_string()
            )
        );
        assert_eq!(captured[1].2, "nul\\0inside");
    }

    #[test]
    fn test_managed_exception_origin() {
        let mut ex = ManagedException::new("System.Exception", "Hello!");
        assert_eq!(ex.origin(), None);
        ex.push_frame("ClassInstanceTest::ExceptionMethod");
        ex.push_frame("ClassInstanceTest::Outer");
        assert_eq!(ex.origin(), Some("ClassInstanceTest::ExceptionMethod"));
        assert_eq!(ex.to_string(), "System.Exception: Hello!");
    }
}

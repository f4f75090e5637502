use log::info;
use std::sync::Arc;

use api::{ManagedException, MemberKind, ObjectId};

use crate::assembly::ClassDef;
use crate::domain::Domain;
use crate::exceptions;
use crate::value::Value;

/// What a managed method body sees while it runs: its receiver, its
/// arguments and the operations of the runtime.
pub struct ManagedContext<'d> {
    domain: &'d Domain,
    class: Arc<ClassDef>,
    frame: String,
    this: Option<ObjectId>,
    args: Vec<Value>,
    depth: usize,
    // Objects allocated by this frame, rooted until it returns
    locals: Vec<ObjectId>,
}

impl<'d> ManagedContext<'d> {
    pub(crate) fn new(
        domain: &'d Domain,
        class: Arc<ClassDef>,
        frame: &str,
        this: Option<ObjectId>,
        args: Vec<Value>,
        depth: usize,
    ) -> Self {
        Self {
            domain,
            class,
            frame: frame.to_string(),
            this,
            args,
            depth,
            locals: Vec::new(),
        }
    }

    pub(crate) fn release_locals(&mut self) {
        for object in self.locals.drain(..) {
            self.domain.unroot(object);
        }
    }

    /// `Type::Method` of the running frame.
    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn this(&self) -> Result<ObjectId, ManagedException> {
        self.this.ok_or_else(|| {
            ManagedException::new(
                exceptions::NULL_REFERENCE,
                format!("{} has no receiver", self.frame),
            )
        })
    }

    pub fn arg(&self, index: usize) -> Result<&Value, ManagedException> {
        self.args.get(index).ok_or_else(|| {
            ManagedException::new(
                exceptions::ARGUMENT_OUT_OF_RANGE,
                format!("{} has no argument {}", self.frame, index),
            )
        })
    }

    fn cast_error(&self, index: usize, wanted: &str, found: &Value) -> ManagedException {
        ManagedException::new(
            exceptions::INVALID_CAST,
            format!("{} argument {} is {}, not {}", self.frame, index, found, wanted),
        )
    }

    pub fn int(&self, index: usize) -> Result<i32, ManagedException> {
        match self.arg(index)? {
            Value::Int32(v) => Ok(*v),
            other => Err(self.cast_error(index, "int", other)),
        }
    }

    pub fn float(&self, index: usize) -> Result<f32, ManagedException> {
        match self.arg(index)? {
            Value::Float32(v) => Ok(*v),
            other => Err(self.cast_error(index, "float", other)),
        }
    }

    pub fn string(&self, index: usize) -> Result<Arc<str>, ManagedException> {
        match self.arg(index)? {
            Value::String(v) => Ok(v.clone()),
            Value::Null => Err(ManagedException::new(
                exceptions::NULL_REFERENCE,
                format!("{} argument {} is null", self.frame, index),
            )),
            other => Err(self.cast_error(index, "string", other)),
        }
    }

    pub fn object(&self, index: usize) -> Result<ObjectId, ManagedException> {
        match self.arg(index)? {
            Value::Object(v) => Ok(*v),
            Value::Null => Err(ManagedException::new(
                exceptions::NULL_REFERENCE,
                format!("{} argument {} is null", self.frame, index),
            )),
            other => Err(self.cast_error(index, "object", other)),
        }
    }

    fn class_of(&self, object: ObjectId) -> Result<Arc<ClassDef>, ManagedException> {
        self.domain.class_of(object).ok_or_else(|| {
            ManagedException::new(
                exceptions::NULL_REFERENCE,
                format!("{} is no longer on the heap", object),
            )
        })
    }

    fn class_named(&self, type_name: &str) -> Result<Arc<ClassDef>, ManagedException> {
        if type_name == self.class.name || type_name == self.class.full_name() {
            return Ok(self.class.clone());
        }
        self.domain
            .find_class(type_name)
            .ok_or_else(|| ManagedException::new(exceptions::TYPE_LOAD, type_name))
    }

    /// Calls a host-implemented instance member of `receiver`.
    ///
    /// Failures on the native side are raised here as managed exceptions.
    pub fn call_extern(
        &mut self,
        receiver: ObjectId,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, ManagedException> {
        let class = self.class_of(receiver)?;
        let member = class
            .find_extern(name, MemberKind::Instance, &args)
            .ok_or_else(|| self.missing(&class, name, &args))?;
        self.domain.call_extern(member, Some(receiver), &args)
    }

    /// Calls a host-implemented static member.
    pub fn call_static_extern(
        &mut self,
        type_name: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, ManagedException> {
        let class = self.class_named(type_name)?;
        let member = class
            .find_extern(name, MemberKind::Static, &args)
            .ok_or_else(|| self.missing(&class, name, &args))?;
        self.domain.call_extern(member, None, &args)
    }

    fn missing(&self, class: &ClassDef, name: &str, args: &[Value]) -> ManagedException {
        ManagedException::new(
            exceptions::MISSING_METHOD,
            format!("{}::{}/{}", class.full_name(), name, args.len()),
        )
    }

    /// Calls a managed instance method of `receiver`.
    pub fn call(
        &mut self,
        receiver: ObjectId,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, ManagedException> {
        let class = self.class_of(receiver)?;
        let value = self
            .domain
            .run_method(&class, name, Some(receiver), args, self.depth + 1)?;
        self.keep(&value);
        Ok(value)
    }

    /// Calls a managed static method.
    pub fn call_static(
        &mut self,
        type_name: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, ManagedException> {
        let class = self.class_named(type_name)?;
        let value = self
            .domain
            .run_method(&class, name, None, args, self.depth + 1)?;
        self.keep(&value);
        Ok(value)
    }

    // Returned objects stay alive for the rest of this frame.
    fn keep(&mut self, value: &Value) {
        if let Some(object) = value.as_object() {
            self.domain.root(object);
            self.locals.push(object);
        }
    }

    /// `new T()`: fires the native construction hook of bridged types, then
    /// the managed constructor.
    pub fn new_object(&mut self, type_name: &str) -> Result<ObjectId, ManagedException> {
        let class = self.class_named(type_name)?;
        let object = self.domain.new_object(&class, self.depth + 1)?;
        self.locals.push(object);
        Ok(object)
    }

    /// Releases the native side of `object` now.
    pub fn dispose(&mut self, object: ObjectId) -> bool {
        self.domain.dispose(object)
    }

    /// `throw new T(message)`.
    pub fn throw<T>(&self, type_name: &str, message: impl Into<String>) -> Result<T, ManagedException> {
        Err(ManagedException::new(type_name, message))
    }

    /// `try { body } catch (Exception e) { handler }`.
    pub fn try_catch<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, ManagedException>,
        handler: impl FnOnce(&mut Self, ManagedException) -> Result<T, ManagedException>,
    ) -> Result<T, ManagedException> {
        match body(self) {
            Ok(value) => Ok(value),
            Err(exception) => handler(self, exception),
        }
    }

    /// `try { body } finally { finally }`. The finally block runs on both
    /// paths; the body's outcome is kept.
    pub fn try_finally<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, ManagedException>,
        finally: impl FnOnce(&mut Self),
    ) -> Result<T, ManagedException> {
        let result = body(self);
        finally(self);
        result
    }

    /// `Console.WriteLine` for managed code.
    pub fn log(&self, message: &str) {
        info!(target: "script::managed", "[{}] {}", self.frame, message);
    }
}

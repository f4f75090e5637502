use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use api::{BoundMember, ManagedException, MarshaledValue, MemberKind, ObjectId, Signature};
use common::RuntimeConfig;
use interop::{
    fault, to_managed_exception, CallFrame, Dispatcher, FromManaged, ManagedRuntime, MethodRef,
    MethodThunk, ThunkArgs,
};

use crate::assembly::{Assembly, AssemblyDef, Class, ClassDef, MethodBody};
use crate::context::ManagedContext;
use crate::value::Value;
use crate::{exceptions, ScriptError};

struct HeapObject {
    class: Arc<ClassDef>,
    roots: usize,
    /// Claimed by a collection; no other collection may finalize it.
    finalizing: bool,
}

#[derive(Default)]
struct Heap {
    next_id: u64,
    objects: HashMap<ObjectId, HeapObject>,
}

struct DomainInner {
    name: String,
    max_call_depth: usize,
    dispatcher: Dispatcher,
    images: RwLock<HashMap<String, Arc<AssemblyDef>>>,
    classes: RwLock<HashMap<String, Arc<ClassDef>>>,
    heap: Mutex<Heap>,
}

/// One application domain of the managed runtime.
///
/// Cheap to clone; clones share the same heap and loaded classes.
#[derive(Clone)]
pub struct Domain(Arc<DomainInner>);

impl Domain {
    pub fn new(config: RuntimeConfig, dispatcher: Dispatcher) -> Self {
        info!("Creating domain '{}'", config.domain);
        Self(Arc::new(DomainInner {
            name: config.domain,
            max_call_depth: config.max_call_depth,
            dispatcher,
            images: RwLock::new(HashMap::new()),
            classes: RwLock::new(HashMap::new()),
            heap: Mutex::new(Heap::default()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.0.dispatcher
    }

    fn heap(&self) -> MutexGuard<'_, Heap> {
        self.0.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes an assembly image available to [`load_assembly`](Self::load_assembly).
    pub fn provide(&self, image: AssemblyDef) {
        debug!("Assembly image '{}' provided to '{}'", image.name, self.0.name);
        self.0
            .images
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(image.name.clone(), Arc::new(image));
    }

    /// Loads a provided assembly.
    ///
    /// Every extern declaration is resolved against the native registry
    /// here, so an unbound member fails the load instead of the first call.
    pub fn load_assembly(&self, name: &str) -> Result<Assembly, ScriptError> {
        let image = self
            .0
            .images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::AssemblyNotFound(name.to_string()))?;

        let registry = self.0.dispatcher.registry();
        for member in image.externs() {
            registry.resolve(member)?;
        }

        let mut classes = self
            .0
            .classes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for class in &image.classes {
            classes.insert(class.full_name(), class.clone());
        }
        drop(classes);

        info!(
            "Loaded assembly '{}' ({} classes) into '{}'",
            image.name,
            image.classes.len(),
            self.0.name
        );
        Ok(Assembly {
            name: image.name.clone(),
            domain: self.clone(),
            classes: image
                .classes
                .iter()
                .map(|def| Class { def: def.clone() })
                .collect(),
        })
    }

    pub(crate) fn find_class(&self, name: &str) -> Option<Arc<ClassDef>> {
        let classes = self
            .0
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(class) = classes.get(name) {
            return Some(class.clone());
        }
        let mut matches = classes.values().filter(|class| class.name == name);
        match (matches.next(), matches.next()) {
            (Some(class), None) => Some(class.clone()),
            _ => None,
        }
    }

    pub(crate) fn class_of(&self, object: ObjectId) -> Option<Arc<ClassDef>> {
        self.heap().objects.get(&object).map(|o| o.class.clone())
    }

    pub(crate) fn root(&self, object: ObjectId) {
        if let Some(o) = self.heap().objects.get_mut(&object) {
            o.roots += 1;
        }
    }

    pub(crate) fn unroot(&self, object: ObjectId) {
        if let Some(o) = self.heap().objects.get_mut(&object) {
            o.roots = o.roots.saturating_sub(1);
        }
    }

    /// Number of objects on the managed heap.
    pub fn object_count(&self) -> usize {
        self.heap().objects.len()
    }

    /// Allocates an instance of `class`, fires the native construction hook
    /// and then runs the managed constructor.
    ///
    /// The new object comes back rooted once; the caller owns that root.
    pub(crate) fn new_object(
        &self,
        class: &Arc<ClassDef>,
        depth: usize,
    ) -> Result<ObjectId, ManagedException> {
        let full_name = class.full_name();
        let object = {
            let mut heap = self.heap();
            heap.next_id += 1;
            let object = ObjectId(heap.next_id);
            heap.objects.insert(
                object,
                HeapObject {
                    class: class.clone(),
                    roots: 1,
                    finalizing: false,
                },
            );
            object
        };

        if let Err(err) = self.0.dispatcher.construct(&full_name, object) {
            self.heap().objects.remove(&object);
            let mut exception = to_managed_exception(err);
            exception.push_frame(format!("{}::.ctor", full_name));
            return Err(exception);
        }

        if let Some(ctor) = &class.constructor {
            let frame = format!("{}::.ctor", full_name);
            if let Err(exception) =
                self.run_body(class, &frame, ctor, Some(object), Vec::new(), depth)
            {
                // Unreachable from here on; the collector finalizes it.
                self.unroot(object);
                return Err(exception);
            }
        }
        debug!("Allocated {} {}", full_name, object);
        Ok(object)
    }

    /// Runs the native destruction hook of `object` now.
    ///
    /// The object stays on the heap until it is collected.
    pub fn dispose(&self, object: ObjectId) -> bool {
        self.0.dispatcher.finalize(object)
    }

    /// Finalizes and frees every unrooted object. Returns how many were freed.
    ///
    /// Objects already claimed by a concurrent collection are skipped.
    pub fn collect(&self) -> usize {
        let garbage: Vec<(ObjectId, Arc<ClassDef>)> = self
            .heap()
            .objects
            .iter_mut()
            .filter(|(_, o)| o.roots == 0 && !o.finalizing)
            .map(|(id, o)| {
                o.finalizing = true;
                (*id, o.class.clone())
            })
            .collect();

        for (object, class) in &garbage {
            if let Some(finalizer) = &class.finalizer {
                let frame = format!("{}::Finalize", class.full_name());
                if let Err(exception) =
                    self.run_body(class, &frame, finalizer, Some(*object), Vec::new(), 0)
                {
                    warn!("Finalizer of {} {} threw {}", class.full_name(), object, exception);
                }
            }
            self.0.dispatcher.finalize(*object);
            self.0.dispatcher.objects().forget(*object);
            self.heap().objects.remove(object);
        }

        if !garbage.is_empty() {
            debug!("Collected {} object(s) in '{}'", garbage.len(), self.0.name);
        }
        garbage.len()
    }

    /// Typed entry point into a static managed method.
    pub fn static_thunk<Args: ThunkArgs, Ret: FromManaged>(
        &self,
        type_name: &str,
        method: &str,
    ) -> Result<MethodThunk<'_, Args, Ret>, ScriptError> {
        let class = self
            .find_class(type_name)
            .ok_or_else(|| ScriptError::ClassNotFound(type_name.to_string()))?;
        let arity = Args::tags().len();
        class
            .find_method(method, arity)
            .filter(|m| m.kind == MemberKind::Static)
            .ok_or_else(|| {
                ScriptError::MethodNotFound(format!("{}::{}/{}", type_name, method, arity))
            })?;
        Ok(MethodThunk::bind(
            self,
            MethodRef::new(class.full_name(), method, arity),
            None,
        )?)
    }

    /// Runs a managed method with argument and return checks.
    pub(crate) fn run_method(
        &self,
        class: &Arc<ClassDef>,
        name: &str,
        this: Option<ObjectId>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ManagedException> {
        let frame = format!("{}::{}", class.full_name(), name);
        let method = class
            .find_method(name, args.len())
            .filter(|m| (m.kind == MemberKind::Instance) == this.is_some())
            .ok_or_else(|| {
                ManagedException::new(
                    exceptions::MISSING_METHOD,
                    format!("{}/{}", frame, args.len()),
                )
            })?;

        check_values(&frame, &method.signature, &args)?;
        let value = self.run_body(class, &frame, &method.body, this, args, depth)?;
        if !value.fits(method.signature.ret) {
            return Err(ManagedException::new(
                exceptions::INVALID_CAST,
                format!("{} returned {} for {}", frame, value, method.signature.ret),
            ));
        }
        Ok(value)
    }

    fn run_body(
        &self,
        class: &Arc<ClassDef>,
        frame: &str,
        body: &MethodBody,
        this: Option<ObjectId>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ManagedException> {
        if depth >= self.0.max_call_depth {
            return Err(ManagedException::new(
                exceptions::STACK_OVERFLOW,
                format!("call depth exceeded {} entering {}", self.0.max_call_depth, frame),
            ));
        }

        if let Some(this) = this {
            self.root(this);
        }
        let mut ctx = ManagedContext::new(self, class.clone(), frame, this, args, depth);
        let result = body(&mut ctx);
        ctx.release_locals();
        if let Some(this) = this {
            self.unroot(this);
        }

        result.map_err(|mut exception| {
            exception.push_frame(frame);
            exception
        })
    }

    /// Managed call into a host-implemented member.
    pub(crate) fn call_extern(
        &self,
        member: &BoundMember,
        this: Option<ObjectId>,
        args: &[Value],
    ) -> Result<Value, ManagedException> {
        let marshaled = args
            .iter()
            .map(|arg| self.to_marshaled(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let frame = match this {
            Some(this) => CallFrame::with_this(this, marshaled),
            None => CallFrame::new(marshaled),
        };

        match self.0.dispatcher.invoke(member, frame) {
            Ok(value) => self.from_marshaled(value),
            Err(err) => {
                let reraised = matches!(err, interop::InteropError::ManagedFault { .. });
                let mut exception = to_managed_exception(err);
                if !reraised {
                    exception.push_frame(member.qualified_name());
                }
                Err(exception)
            }
        }
    }

    fn to_marshaled(&self, value: &Value) -> Result<MarshaledValue, ManagedException> {
        Ok(match value {
            Value::Void => MarshaledValue::Void,
            Value::Null => {
                return Err(ManagedException::new(
                    exceptions::NULL_REFERENCE,
                    "null cannot cross into native code",
                ))
            }
            Value::Int32(v) => MarshaledValue::Int32(*v),
            Value::Int64(v) => MarshaledValue::Int64(*v),
            Value::UInt32(v) => MarshaledValue::UInt32(*v),
            Value::UInt64(v) => MarshaledValue::UInt64(*v),
            Value::Float32(v) => MarshaledValue::Float32(*v),
            Value::Float64(v) => MarshaledValue::Float64(*v),
            Value::Bool(v) => MarshaledValue::Bool(*v),
            Value::String(v) => MarshaledValue::String(v.to_string()),
            Value::Object(object) => MarshaledValue::Object(
                self.0
                    .dispatcher
                    .objects()
                    .handle_of(*object)
                    .map_err(|err| {
                        ManagedException::new(
                            fault::MARSHAL_EXCEPTION,
                            format!("{} has no live native handle ({})", object, err),
                        )
                    })?,
            ),
        })
    }

    fn from_marshaled(&self, value: MarshaledValue) -> Result<Value, ManagedException> {
        Ok(match value {
            MarshaledValue::Void => Value::Void,
            MarshaledValue::Int32(v) => Value::Int32(v),
            MarshaledValue::Int64(v) => Value::Int64(v),
            MarshaledValue::UInt32(v) => Value::UInt32(v),
            MarshaledValue::UInt64(v) => Value::UInt64(v),
            MarshaledValue::Float32(v) => Value::Float32(v),
            MarshaledValue::Float64(v) => Value::Float64(v),
            MarshaledValue::Bool(v) => Value::Bool(v),
            MarshaledValue::String(v) => Value::from(v),
            MarshaledValue::Object(handle) => Value::Object(
                self.0
                    .dispatcher
                    .objects()
                    .object_of(handle)
                    .map_err(to_managed_exception)?,
            ),
        })
    }
}

fn check_values(frame: &str, signature: &Signature, args: &[Value]) -> Result<(), ManagedException> {
    if args.len() != signature.arity() {
        return Err(ManagedException::new(
            exceptions::ARGUMENT,
            format!("{} expects {} argument(s), got {}", frame, signature.arity(), args.len()),
        ));
    }
    for (i, (arg, tag)) in args.iter().zip(&signature.params).enumerate() {
        if !arg.fits(*tag) {
            return Err(ManagedException::new(
                exceptions::ARGUMENT,
                format!("{} argument {} must be {}, got {}", frame, i, tag, arg),
            ));
        }
    }
    Ok(())
}

impl ManagedRuntime for Domain {
    fn method_signature(&self, method: &MethodRef) -> Option<(Signature, MemberKind)> {
        let class = self.find_class(&method.type_name)?;
        let def = class.find_method(&method.method, method.arity)?;
        Some((def.signature.clone(), def.kind))
    }

    fn invoke(
        &self,
        method: &MethodRef,
        this: Option<ObjectId>,
        args: Vec<MarshaledValue>,
    ) -> Result<MarshaledValue, ManagedException> {
        let class = self.find_class(&method.type_name).ok_or_else(|| {
            ManagedException::new(exceptions::TYPE_LOAD, method.type_name.clone())
        })?;
        let args = args
            .into_iter()
            .map(|arg| self.from_marshaled(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let value = self.run_method(&class, &method.method, this, args, 0)?;
        self.to_marshaled(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssemblyBuilder, ClassBuilder};
    use api::ValueTag;
    use interop::RegistryBuilder;

    fn empty_domain(max_call_depth: usize) -> Domain {
        let config = RuntimeConfig {
            max_call_depth,
            ..RuntimeConfig::default()
        };
        Domain::new(config, Dispatcher::new(Arc::new(RegistryBuilder::new().freeze())))
    }

    #[test]
    fn test_unknown_assembly() {
        let domain = empty_domain(16);
        assert!(matches!(
            domain.load_assembly("some_assembly_that_doesnt_exist_12345"),
            Err(ScriptError::AssemblyNotFound(_))
        ));
    }

    #[test]
    fn test_unbound_extern_fails_load() {
        let domain = empty_domain(16);
        domain.provide(
            AssemblyBuilder::new("Broken")
                .class(ClassBuilder::new("Aeon", "MyObject").extern_instance(
                    "DoStuff",
                    [ValueTag::String],
                    ValueTag::Void,
                ))
                .build()
                .unwrap(),
        );
        assert!(matches!(
            domain.load_assembly("Broken"),
            Err(ScriptError::Binding(interop::InteropError::UnboundMember(_)))
        ));
    }

    #[test]
    fn test_runaway_recursion_overflows() {
        let domain = empty_domain(8);
        domain.provide(
            AssemblyBuilder::new("Recursion")
                .class(ClassBuilder::new("", "Loop").static_method(
                    "Forever",
                    [],
                    ValueTag::Void,
                    |ctx| ctx.call_static("Loop", "Forever", vec![]),
                ))
                .build()
                .unwrap(),
        );
        domain.load_assembly("Recursion").unwrap();

        let thunk = domain.static_thunk::<(), ()>("Loop", "Forever").unwrap();
        match thunk.call(()) {
            Err(interop::InteropError::ManagedFault { exception, .. }) => {
                assert_eq!(exception.type_name, exceptions::STACK_OVERFLOW);
                assert_eq!(exception.trace.len(), 8);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_frees_unrooted_objects() {
        let domain = empty_domain(16);
        domain.provide(
            AssemblyBuilder::new("Heap")
                .class(ClassBuilder::new("", "Node"))
                .build()
                .unwrap(),
        );
        let assembly = domain.load_assembly("Heap").unwrap();
        let node = assembly.get_class("Node").unwrap();

        let kept = assembly.new_class_instance(&node).unwrap();
        drop(assembly.new_class_instance(&node).unwrap());
        assert_eq!(domain.object_count(), 2);

        assert_eq!(domain.collect(), 1);
        assert_eq!(domain.object_count(), 1);
        drop(kept);
        assert_eq!(domain.collect(), 1);
        assert_eq!(domain.object_count(), 0);
    }
}

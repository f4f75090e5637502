//! Routes managed calls on bound members to their native implementations.

use log::trace;
use std::sync::Arc;

use api::{BoundMember, MarshaledValue, NativeHandle, ObjectId};

use crate::fault::catch_native;
use crate::marshaling::check_tag;
use crate::native_call::CallFailure;
use crate::object_bridge::{LifecycleState, ObjectBridge};
use crate::registry::NativeCallRegistry;
use crate::InteropError;

/// Arguments of one call and the slot its result is written to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallFrame {
    /// Receiver of an instance call.
    pub this: Option<ObjectId>,
    pub args: Vec<MarshaledValue>,
    ret: Option<MarshaledValue>,
}

impl CallFrame {
    pub fn new(args: Vec<MarshaledValue>) -> Self {
        Self {
            this: None,
            args,
            ret: None,
        }
    }

    pub fn with_this(this: ObjectId, args: Vec<MarshaledValue>) -> Self {
        Self {
            this: Some(this),
            args,
            ret: None,
        }
    }

    // A completed frame yields its return slot; void when nothing was written.
    fn finish(self) -> MarshaledValue {
        self.ret.unwrap_or(MarshaledValue::Void)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<NativeCallRegistry>,
    objects: Arc<ObjectBridge>,
}

impl Dispatcher {
    pub fn new(registry: Arc<NativeCallRegistry>) -> Self {
        Self::with_objects(registry, Arc::new(ObjectBridge::new()))
    }

    pub fn with_objects(registry: Arc<NativeCallRegistry>, objects: Arc<ObjectBridge>) -> Self {
        Self { registry, objects }
    }

    pub fn registry(&self) -> &NativeCallRegistry {
        &self.registry
    }

    pub fn objects(&self) -> &Arc<ObjectBridge> {
        &self.objects
    }

    pub fn is_bridged(&self, type_name: &str) -> bool {
        self.registry.is_bridged(type_name)
    }

    /// Executes one managed call on a bound member.
    ///
    /// Nothing native runs unless the member is bound, the argument count and
    /// every argument tag match the declared signature and, for instance
    /// members, the receiver is live.
    pub fn invoke(
        &self,
        member: &BoundMember,
        mut frame: CallFrame,
    ) -> Result<MarshaledValue, InteropError> {
        let call = self.registry.resolve(member)?;
        let qualified = member.to_string();

        let params = &member.signature.params;
        if frame.args.len() != params.len() {
            return Err(InteropError::Arity {
                member: qualified,
                expected: params.len(),
                found: frame.args.len(),
            });
        }
        for (arg, tag) in frame.args.iter().zip(params) {
            check_tag(arg, *tag)?;
        }

        let guard = if member.is_instance() {
            let this = frame.this.ok_or_else(|| InteropError::InvalidLifecycleState {
                member: qualified.clone(),
                state: LifecycleState::Unconstructed,
            })?;
            let guard = self.objects.enter(this, member)?;
            frame.args.insert(0, MarshaledValue::Object(guard.handle()));
            Some(guard)
        } else {
            None
        };

        let result = catch_native(&qualified, || call.call(&frame.args));
        drop(guard);

        let value = result.map_err(|failure| match failure {
            CallFailure::Marshal(err) => InteropError::MarshalType(err),
            CallFailure::Arity { expected, found } => InteropError::Arity {
                member: qualified.clone(),
                expected,
                found,
            },
            CallFailure::Fault(fault) => InteropError::NativeFault {
                member: qualified.clone(),
                fault,
            },
        })?;
        check_tag(&value, member.signature.ret)?;

        trace!("{} returned {}", qualified, value);
        frame.ret = Some(value);
        Ok(frame.finish())
    }

    /// Runs the construction hook when `type_name` is bridged.
    ///
    /// Returns `None` for types without native state.
    pub fn construct(
        &self,
        type_name: &str,
        object: ObjectId,
    ) -> Result<Option<NativeHandle>, InteropError> {
        match self.registry.hooks(type_name) {
            Some(hooks) => self.objects.construct(object, type_name, hooks).map(Some),
            None => Ok(None),
        }
    }

    /// Destruction notification from the managed runtime's collector.
    pub fn finalize(&self, object: ObjectId) -> bool {
        self.objects.destroy(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LifecycleHooks, RegistryBuilder};
    use api::{NativeFault, Signature, ValueTag};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn add_leet() -> BoundMember {
        BoundMember::static_member(
            "Aeon.NativeMath",
            "AddLeet",
            Signature::new([ValueTag::Int32], ValueTag::Int32),
        )
    }

    fn fail() -> BoundMember {
        BoundMember::instance_member(
            "Aeon.MyObject",
            "Fail",
            Signature::new([ValueTag::String], ValueTag::Void),
        )
    }

    fn dispatcher(calls: Arc<AtomicUsize>) -> Dispatcher {
        let mut builder = RegistryBuilder::new();
        let counter = calls.clone();
        builder
            .register(add_leet(), move |a: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                a + 1337
            })
            .unwrap();
        builder
            .register(fail(), |_this: NativeHandle, msg: String| -> Result<(), NativeFault> {
                Err(NativeFault::new(msg))
            })
            .unwrap();
        builder
            .bridge_type(
                "Aeon.MyObject",
                LifecycleHooks::new(|_h| Ok(()), |_h, _r: ()| {}),
            )
            .unwrap();
        Dispatcher::new(Arc::new(builder.freeze()))
    }

    #[test]
    fn test_static_call() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let ret = d
            .invoke(&add_leet(), CallFrame::new(vec![MarshaledValue::Int32(5)]))
            .unwrap();
        assert_eq!(ret, MarshaledValue::Int32(1342));
    }

    #[test]
    fn test_bad_arguments_never_reach_native_code() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls.clone());

        let err = d.invoke(&add_leet(), CallFrame::new(vec![])).unwrap_err();
        assert!(matches!(
            err,
            InteropError::Arity {
                expected: 1,
                found: 0,
                ..
            }
        ));

        let err = d
            .invoke(&add_leet(), CallFrame::new(vec![MarshaledValue::Int64(5)]))
            .unwrap_err();
        assert!(matches!(err, InteropError::MarshalType(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unbound_member() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let missing = BoundMember::static_member("Aeon.NativeMath", "Missing", Signature::void());
        assert!(matches!(
            d.invoke(&missing, CallFrame::default()),
            Err(InteropError::UnboundMember(_))
        ));
    }

    #[test]
    fn test_instance_call_needs_live_receiver() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        let args = vec![MarshaledValue::String("Hello!".into())];

        let err = d.invoke(&fail(), CallFrame::new(args.clone())).unwrap_err();
        assert!(matches!(err, InteropError::InvalidLifecycleState { .. }));

        let object = ObjectId(3);
        assert!(d.construct("Aeon.MyObject", object).unwrap().is_some());
        let err = d
            .invoke(&fail(), CallFrame::with_this(object, args.clone()))
            .unwrap_err();
        match err {
            InteropError::NativeFault { fault, .. } => assert_eq!(fault.message, "Hello!"),
            other => panic!("unexpected {:?}", other),
        }

        assert!(d.finalize(object));
        let err = d
            .invoke(&fail(), CallFrame::with_this(object, args))
            .unwrap_err();
        assert!(matches!(
            err,
            InteropError::InvalidLifecycleState {
                state: LifecycleState::Destroyed,
                ..
            }
        ));
    }

    #[test]
    fn test_unbridged_type_has_no_handle() {
        let d = dispatcher(Arc::new(AtomicUsize::new(0)));
        assert_eq!(d.construct("Aeon.Plain", ObjectId(1)).unwrap(), None);
        assert!(!d.finalize(ObjectId(1)));
    }
}

//! Binding table from managed members to native implementations.
//!
//! Bindings are collected on a [`RegistryBuilder`] during startup and frozen
//! into a read-only [`NativeCallRegistry`] before the first managed call.

use log::{debug, info};
use std::collections::HashMap;
use std::fmt;

use api::{BoundMember, MemberKey, ValueTag};

use crate::native_call::{IntoNativeCall, NativeCall};
use crate::object_bridge::LifecycleHooks;
use crate::InteropError;

struct Binding {
    member: BoundMember,
    call: NativeCall,
}

/// Registration phase of the binding table.
#[derive(Default)]
pub struct RegistryBuilder {
    calls: HashMap<MemberKey, Binding>,
    types: HashMap<String, LifecycleHooks>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `member` to a Rust function.
    ///
    /// Static members take the declared parameters. Instance members take the
    /// receiver handle first, then the declared parameters.
    pub fn register<Args>(
        &mut self,
        member: BoundMember,
        implementation: impl IntoNativeCall<Args>,
    ) -> Result<(), InteropError> {
        self.register_call(member, implementation.into_native_call())
    }

    /// Binds `member` to an already erased implementation.
    ///
    /// A member that is already bound keeps its first implementation.
    pub fn register_call(
        &mut self,
        member: BoundMember,
        call: NativeCall,
    ) -> Result<(), InteropError> {
        let mut expected = Vec::with_capacity(member.signature.arity() + 1);
        if member.is_instance() {
            expected.push(ValueTag::Object);
        }
        expected.extend_from_slice(&member.signature.params);

        if call.params() != expected.as_slice() || call.ret() != member.signature.ret {
            return Err(InteropError::SignatureMismatch {
                member: member.to_string(),
                found: describe(call.params(), call.ret()),
            });
        }

        let key = member.key();
        if let Some(existing) = self.calls.get(&key) {
            return Err(InteropError::DuplicateBinding(format!(
                "{} (already bound as {})",
                member, existing.member
            )));
        }

        debug!("Bound {}", member);
        self.calls.insert(key, Binding { member, call });
        Ok(())
    }

    /// Declares a managed type whose instances own a native resource.
    pub fn bridge_type(
        &mut self,
        type_name: impl Into<String>,
        hooks: LifecycleHooks,
    ) -> Result<(), InteropError> {
        let type_name = type_name.into();
        if self.types.contains_key(&type_name) {
            return Err(InteropError::DuplicateBinding(format!(
                "{} lifecycle hooks",
                type_name
            )));
        }
        debug!("Bridged type {}", type_name);
        self.types.insert(type_name, hooks);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Ends the registration phase.
    pub fn freeze(self) -> NativeCallRegistry {
        info!(
            "Native call registry frozen with {} bindings and {} bridged types",
            self.calls.len(),
            self.types.len()
        );
        NativeCallRegistry {
            calls: self.calls,
            types: self.types,
        }
    }
}

/// Read-only binding table. Safe to share between threads.
pub struct NativeCallRegistry {
    calls: HashMap<MemberKey, Binding>,
    types: HashMap<String, LifecycleHooks>,
}

impl NativeCallRegistry {
    /// The implementation bound to `member`.
    ///
    /// The lookup is by name, parameter list and kind; the declared return
    /// type must then match the bound one.
    pub fn resolve(&self, member: &BoundMember) -> Result<&NativeCall, InteropError> {
        match self.calls.get(&member.key()) {
            Some(binding) if binding.member.signature.ret == member.signature.ret => {
                Ok(&binding.call)
            }
            _ => Err(InteropError::UnboundMember(member.to_string())),
        }
    }

    pub fn hooks(&self, type_name: &str) -> Option<&LifecycleHooks> {
        self.types.get(type_name)
    }

    pub fn is_bridged(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// All bound members, in no particular order.
    pub fn members(&self) -> impl Iterator<Item = &BoundMember> {
        self.calls.values().map(|binding| &binding.member)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl fmt::Debug for NativeCallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCallRegistry")
            .field("calls", &self.calls.len())
            .field("types", &self.types.len())
            .finish_non_exhaustive()
    }
}

fn describe(params: &[ValueTag], ret: ValueTag) -> String {
    let params: Vec<String> = params.iter().map(ToString::to_string).collect();
    format!("({}) -> {}", params.join(", "), ret)
}

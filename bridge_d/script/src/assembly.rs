//! Assembly images, the builders that declare them, and the loaded views
//! native code works with.

use std::collections::HashSet;
use std::sync::Arc;

use api::{BoundMember, ManagedException, MemberKind, ObjectId, Signature, ValueTag};
use interop::{FromManaged, MethodRef, MethodThunk, ThunkArgs};

use crate::context::ManagedContext;
use crate::domain::Domain;
use crate::value::Value;
use crate::ScriptError;

/// Body of a managed method.
pub type MethodBody =
    Arc<dyn Fn(&mut ManagedContext<'_>) -> Result<Value, ManagedException> + Send + Sync>;

pub(crate) struct MethodDef {
    pub(crate) name: String,
    pub(crate) signature: Signature,
    pub(crate) kind: MemberKind,
    pub(crate) body: MethodBody,
}

pub(crate) struct ClassDef {
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) methods: Vec<MethodDef>,
    pub(crate) externs: Vec<BoundMember>,
    pub(crate) constructor: Option<MethodBody>,
    pub(crate) finalizer: Option<MethodBody>,
}

impl ClassDef {
    pub(crate) fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub(crate) fn find_method(&self, name: &str, arity: usize) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.signature.arity() == arity)
    }

    /// Extern declaration matching a call site by name, kind and argument values.
    pub(crate) fn find_extern(
        &self,
        name: &str,
        kind: MemberKind,
        args: &[Value],
    ) -> Option<&BoundMember> {
        self.externs.iter().find(|member| {
            member.member == name
                && member.kind == kind
                && member.signature.arity() == args.len()
                && args
                    .iter()
                    .zip(&member.signature.params)
                    .all(|(arg, tag)| arg.fits(*tag))
        })
    }
}

/// A compiled assembly image, ready to be provided to a domain.
pub struct AssemblyDef {
    pub(crate) name: String,
    pub(crate) classes: Vec<Arc<ClassDef>>,
}

impl AssemblyDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every extern declaration in the image.
    pub fn externs(&self) -> impl Iterator<Item = &BoundMember> {
        self.classes.iter().flat_map(|class| class.externs.iter())
    }
}

pub struct AssemblyBuilder {
    name: String,
    classes: Vec<ClassBuilder>,
}

impl AssemblyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn class(mut self, class: ClassBuilder) -> Self {
        self.classes.push(class);
        self
    }

    /// Fails with [`ScriptError::AmbiguousExtern`] when a class declares two
    /// externs with the same name and parameter list.
    pub fn build(self) -> Result<AssemblyDef, ScriptError> {
        let mut classes = Vec::with_capacity(self.classes.len());
        for class in self.classes {
            let mut seen = HashSet::new();
            for member in &class.def.externs {
                if !seen.insert(member.key()) {
                    return Err(ScriptError::AmbiguousExtern(member.to_string()));
                }
            }
            classes.push(Arc::new(class.def));
        }
        Ok(AssemblyDef {
            name: self.name,
            classes,
        })
    }
}

pub struct ClassBuilder {
    def: ClassDef,
}

impl ClassBuilder {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            def: ClassDef {
                namespace: namespace.into(),
                name: name.into(),
                methods: Vec::new(),
                externs: Vec::new(),
                constructor: None,
                finalizer: None,
            },
        }
    }

    fn push_method<F>(
        mut self,
        name: &str,
        signature: Signature,
        kind: MemberKind,
        body: F,
    ) -> Self
    where
        F: Fn(&mut ManagedContext<'_>) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.def.methods.push(MethodDef {
            name: name.to_string(),
            signature,
            kind,
            body: Arc::new(body),
        });
        self
    }

    /// Instance method implemented in managed code.
    pub fn method<F>(
        self,
        name: &str,
        params: impl Into<Vec<ValueTag>>,
        ret: ValueTag,
        body: F,
    ) -> Self
    where
        F: Fn(&mut ManagedContext<'_>) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.push_method(name, Signature::new(params, ret), MemberKind::Instance, body)
    }

    pub fn static_method<F>(
        self,
        name: &str,
        params: impl Into<Vec<ValueTag>>,
        ret: ValueTag,
        body: F,
    ) -> Self
    where
        F: Fn(&mut ManagedContext<'_>) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.push_method(name, Signature::new(params, ret), MemberKind::Static, body)
    }

    fn push_extern(mut self, name: &str, signature: Signature, kind: MemberKind) -> Self {
        let member = BoundMember::new(self.full_name(), name, signature, kind);
        self.def.externs.push(member);
        self
    }

    /// Declares a static member implemented by the host.
    pub fn extern_static(self, name: &str, params: impl Into<Vec<ValueTag>>, ret: ValueTag) -> Self {
        self.push_extern(name, Signature::new(params, ret), MemberKind::Static)
    }

    /// Declares an instance member implemented by the host.
    pub fn extern_instance(
        self,
        name: &str,
        params: impl Into<Vec<ValueTag>>,
        ret: ValueTag,
    ) -> Self {
        self.push_extern(name, Signature::new(params, ret), MemberKind::Instance)
    }

    pub fn constructor<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut ManagedContext<'_>) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.def.constructor = Some(Arc::new(body));
        self
    }

    pub fn finalizer<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut ManagedContext<'_>) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.def.finalizer = Some(Arc::new(body));
        self
    }

    fn full_name(&self) -> String {
        self.def.full_name()
    }
}

/// A class of a loaded assembly.
#[derive(Clone)]
pub struct Class {
    pub(crate) def: Arc<ClassDef>,
}

impl Class {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn full_name(&self) -> String {
        self.def.full_name()
    }
}

/// An assembly loaded into a domain.
#[derive(Clone)]
pub struct Assembly {
    pub(crate) name: String,
    pub(crate) domain: Domain,
    pub(crate) classes: Vec<Class>,
}

impl Assembly {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks a class up by simple or namespace-qualified name.
    pub fn get_class(&self, name: &str) -> Result<Class, ScriptError> {
        self.classes
            .iter()
            .find(|class| class.def.name == name || class.full_name() == name)
            .cloned()
            .ok_or_else(|| ScriptError::ClassNotFound(format!("{} in {}", name, self.name)))
    }

    /// Allocates and constructs an instance that stays alive until the
    /// returned handle is dropped.
    pub fn new_class_instance(&self, class: &Class) -> Result<ClassInstance, ScriptError> {
        let object = self.domain.new_object(&class.def, 0)?;
        Ok(ClassInstance {
            domain: self.domain.clone(),
            class: class.clone(),
            object,
        })
    }
}

/// A managed method selected by name and parameter count.
#[derive(Debug, Clone)]
pub struct Method {
    pub method: MethodRef,
    pub signature: Signature,
    pub this: Option<ObjectId>,
}

/// A rooted managed object. The collector leaves it alone until this is
/// dropped.
pub struct ClassInstance {
    domain: Domain,
    class: Class,
    object: ObjectId,
}

impl ClassInstance {
    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn get_method(&self, name: &str, arity: usize) -> Result<Method, ScriptError> {
        let method = self.class.def.find_method(name, arity).ok_or_else(|| {
            ScriptError::MethodNotFound(format!("{}::{}/{}", self.class.full_name(), name, arity))
        })?;
        Ok(Method {
            method: MethodRef::new(self.class.full_name(), name, arity),
            signature: method.signature.clone(),
            this: (method.kind == MemberKind::Instance).then_some(self.object),
        })
    }

    /// Typed entry point into one of this object's methods.
    pub fn thunk<Args: ThunkArgs, Ret: FromManaged>(
        &self,
        name: &str,
    ) -> Result<MethodThunk<'_, Args, Ret>, ScriptError> {
        let method = self.get_method(name, Args::tags().len())?;
        Ok(MethodThunk::bind(&self.domain, method.method, method.this)?)
    }

    /// Runs the native destruction hook now instead of at collection.
    pub fn dispose(&self) -> bool {
        self.domain.dispose(self.object)
    }
}

impl Drop for ClassInstance {
    fn drop(&mut self) {
        self.domain.unroot(self.object);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ValueTag;

/// Parameter and return types of a member, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<ValueTag>,
    pub ret: ValueTag,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ValueTag>>, ret: ValueTag) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    /// `() -> void`
    pub fn void() -> Self {
        Self::new(Vec::new(), ValueTag::Void)
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, tag) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", tag)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Whether a member is called with a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MemberKind {
    #[default]
    Static,
    Instance,
}

/// An externally implemented member of a managed type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundMember {
    pub type_name: String,
    pub member: String,
    pub signature: Signature,
    #[serde(default)]
    pub kind: MemberKind,
}

impl BoundMember {
    pub fn new(
        type_name: impl Into<String>,
        member: impl Into<String>,
        signature: Signature,
        kind: MemberKind,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            member: member.into(),
            signature,
            kind,
        }
    }

    pub fn static_member(
        type_name: impl Into<String>,
        member: impl Into<String>,
        signature: Signature,
    ) -> Self {
        Self::new(type_name, member, signature, MemberKind::Static)
    }

    pub fn instance_member(
        type_name: impl Into<String>,
        member: impl Into<String>,
        signature: Signature,
    ) -> Self {
        Self::new(type_name, member, signature, MemberKind::Instance)
    }

    /// `Namespace.Type::Member`, the name managed code uses for an internal call.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.type_name, self.member)
    }

    pub fn is_instance(&self) -> bool {
        self.kind == MemberKind::Instance
    }

    /// Registry identity. The return type is not part of it.
    pub fn key(&self) -> MemberKey {
        MemberKey {
            type_name: self.type_name.clone(),
            member: self.member.clone(),
            params: self.signature.params.clone(),
            kind: self.kind,
        }
    }
}

impl fmt::Display for BoundMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}{}", self.type_name, self.member, self.signature)
    }
}

/// Identity of a binding: owning type, member name, parameter list and kind.
///
/// Two members that differ only in their return type share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub type_name: String,
    pub member: String,
    pub params: Vec<ValueTag>,
    pub kind: MemberKind,
}

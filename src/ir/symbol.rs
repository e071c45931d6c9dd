use super::TypeRef;

/// Whether a type has value-copy or reference semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Assignment copies nested state (struct-like).
    Value,
    /// Assignment aliases storage.
    Reference,
}

#[derive(Clone, Debug)]
pub struct TypeData {
    pub name: String,
    pub kind: TypeKind,
}

/// What kind of method a resolved invocation target is. Lambdas, local
/// functions and delegate invocations are opaque to the engine and force a
/// pessimistic state reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Ordinary,
    Lambda,
    LocalFunction,
    DelegateInvoke,
}

/// Property classification used when deciding whether a property access
/// denotes trackable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyShape {
    pub indexer: bool,
    pub readonly: bool,
    /// Auto-implemented with a compiler-generated backing field.
    pub auto: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Local,
    Parameter,
    Field,
    Property(PropertyShape),
    Event,
    Method(MethodKind),
}

#[derive(Clone, Debug)]
pub struct SymbolData {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: TypeRef,
    pub is_static: bool,
}

impl SymbolData {
    pub fn local(name: &str, ty: TypeRef) -> SymbolData {
        SymbolData {
            name: name.to_owned(),
            kind: SymbolKind::Local,
            ty,
            is_static: false,
        }
    }

    pub fn param(name: &str, ty: TypeRef) -> SymbolData {
        SymbolData {
            name: name.to_owned(),
            kind: SymbolKind::Parameter,
            ty,
            is_static: false,
        }
    }

    pub fn field(name: &str, ty: TypeRef) -> SymbolData {
        SymbolData {
            name: name.to_owned(),
            kind: SymbolKind::Field,
            ty,
            is_static: false,
        }
    }

    pub fn method(name: &str, kind: MethodKind, ty: TypeRef) -> SymbolData {
        SymbolData {
            name: name.to_owned(),
            kind: SymbolKind::Method(kind),
            ty,
            is_static: false,
        }
    }

    /// True for symbols reached through an instance rather than by name in
    /// the local frame.
    pub fn is_member(&self) -> bool {
        matches!(
            self.kind,
            SymbolKind::Field | SymbolKind::Property(_) | SymbolKind::Event
        )
    }
}

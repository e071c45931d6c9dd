use super::{Node, Symbol, TypeRef};
use smallvec::SmallVec;

/// A compile-time constant attached to a node by the host.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstVal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

/// How an argument is passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefKind {
    Value,
    Ref,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Operators eligible for predicate classification.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// One operation node in an expression tree.
///
/// A single tagged union covers every node kind the engine interprets; each
/// arm holds exactly the subfields relevant to that kind, so dispatch is an
/// exhaustive `match` rather than a visitor hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A literal. The value, if known, is in [`NodeData::constant`].
    Literal,
    /// Read of a local variable.
    LocalRef(Symbol),
    /// Read of a formal parameter.
    ParamRef(Symbol),
    /// Field access. `instance` is `None` for static fields.
    FieldRef {
        instance: Option<Node>,
        field: Symbol,
    },
    /// Property access; `indices` are indexer arguments (empty otherwise).
    PropertyRef {
        instance: Option<Node>,
        property: Symbol,
        indices: SmallVec<[Node; 2]>,
    },
    /// Array element access.
    ArrayRef {
        array: Node,
        indices: SmallVec<[Node; 2]>,
    },
    /// Dynamically-bound indexer access.
    DynamicIndex {
        instance: Node,
        indices: SmallVec<[Node; 2]>,
    },
    /// The implicit receiver (`this`).
    InstanceRef,
    /// Simple assignment.
    Assign { target: Node, value: Node },
    /// Deconstruction assignment: `(a, b) = value`.
    Deconstruct {
        targets: SmallVec<[Node; 2]>,
        value: Node,
    },
    /// Null-coalescing: `value ?? when_null`.
    Coalesce { value: Node, when_null: Node },
    /// Conditional access: `instance?.access`.
    ConditionalAccess { instance: Node, access: Node },
    /// Ternary conditional expression.
    Conditional {
        cond: Node,
        when_true: Node,
        when_false: Node,
    },
    Unary {
        op: UnaryOp,
        operand: Node,
    },
    Binary {
        op: BinaryOp,
        lhs: Node,
        rhs: Node,
    },
    /// One argument of an invocation.
    Argument { value: Node, ref_kind: RefKind },
    /// Invocation of a resolved method. Arguments are `Argument` nodes.
    Invoke {
        method: Symbol,
        instance: Option<Node>,
        args: SmallVec<[Node; 2]>,
    },
    /// Object or array creation; this node is an allocation site.
    Creation { args: SmallVec<[Node; 2]> },
    /// Conversion. User-defined conversion operators are opaque.
    Convert { operand: Node, user_defined: bool },
    /// Parenthesized expression.
    Paren { operand: Node },
    Throw { operand: Option<Node> },
    Return { value: Option<Node> },
}

/// Node payload: kind, static type, optional compile-time constant.
#[derive(Clone, Debug)]
pub struct NodeData {
    pub kind: NodeKind,
    pub ty: TypeRef,
    pub constant: Option<ConstVal>,
}

impl NodeKind {
    /// Visit the direct child nodes, in evaluation order.
    pub fn visit_children<F: FnMut(Node)>(&self, mut f: F) {
        match self {
            NodeKind::Literal
            | NodeKind::LocalRef(_)
            | NodeKind::ParamRef(_)
            | NodeKind::InstanceRef => {}
            NodeKind::FieldRef { instance, .. } => {
                if let Some(i) = instance {
                    f(*i);
                }
            }
            NodeKind::PropertyRef {
                instance, indices, ..
            } => {
                if let Some(i) = instance {
                    f(*i);
                }
                for &ix in indices {
                    f(ix);
                }
            }
            NodeKind::ArrayRef { array, indices } => {
                f(*array);
                for &ix in indices {
                    f(ix);
                }
            }
            NodeKind::DynamicIndex { instance, indices } => {
                f(*instance);
                for &ix in indices {
                    f(ix);
                }
            }
            NodeKind::Assign { target, value } => {
                f(*target);
                f(*value);
            }
            NodeKind::Deconstruct { targets, value } => {
                for &t in targets {
                    f(t);
                }
                f(*value);
            }
            NodeKind::Coalesce { value, when_null } => {
                f(*value);
                f(*when_null);
            }
            NodeKind::ConditionalAccess { instance, access } => {
                f(*instance);
                f(*access);
            }
            NodeKind::Conditional {
                cond,
                when_true,
                when_false,
            } => {
                f(*cond);
                f(*when_true);
                f(*when_false);
            }
            NodeKind::Unary { operand, .. } => f(*operand),
            NodeKind::Binary { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            NodeKind::Argument { value, .. } => f(*value),
            NodeKind::Invoke { instance, args, .. } => {
                if let Some(i) = instance {
                    f(*i);
                }
                for &a in args {
                    f(a);
                }
            }
            NodeKind::Creation { args } => {
                for &a in args {
                    f(a);
                }
            }
            NodeKind::Convert { operand, .. } => f(*operand),
            NodeKind::Paren { operand } => f(*operand),
            NodeKind::Throw { operand } => {
                if let Some(o) = operand {
                    f(*o);
                }
            }
            NodeKind::Return { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
        }
    }
}

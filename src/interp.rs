//! Statement-scoped abstract interpreter.
//!
//! One [`Interpreter`] walks a statement's expression tree, producing an
//! abstract value for every sub-expression and mutating the threaded
//! analysis state through the hooks of a [`Semantics`] implementation. The
//! walker owns the generic dispatch rules (assignment routing, coalescing,
//! conditional access, ref/out escapes, conversions, the pessimistic reset
//! on lambda/local-function/delegate invocation); where values are actually
//! stored is entirely the semantics' business.
//!
//! Every visited node's value is memoized so clients can query it after the
//! run without recomputation. Recursion is bounded by an explicit depth
//! guard that fails fast instead of overflowing the stack.

use crate::errors::AnalysisError;
use crate::ir::{
    BinaryOp, ConstVal, MethodKind, Node, NodeKind, ProcBody, SymbolKind, TypeRef, UnaryOp,
};
use crate::solver::{Artifacts, PredicateOutcome};
use fxhash::FxHashMap;
use log::trace;
use std::fmt::Debug;
use std::hash::Hash;

/// Maximum expression nesting the interpreter will walk before aborting the
/// analysis.
pub const MAX_EVAL_DEPTH: usize = 512;

/// Analysis-specific semantics plugged into the generic walker.
pub trait Semantics {
    type Value: Clone + Debug + Eq;
    type Data: Clone + Debug;

    /// The "unknown / may-be" top value.
    fn unknown(&self) -> Self::Value;

    /// Value assumed for an expression of `ty` with no better information;
    /// also the definitely-null arm of a conditional access.
    fn default_for_type(&mut self, body: &ProcBody, ty: TypeRef) -> Self::Value;

    fn merge_values(&mut self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Read the value stored for the storage denoted by `node` (default
    /// value if never set, unknown if the node denotes no storage).
    fn read(&mut self, data: &Self::Data, body: &ProcBody, node: Node) -> Self::Value;

    /// Route `value` into the storage denoted by `target`. `source` is the
    /// assigned expression when one exists; value-copy semantics use it to
    /// carry descendant state across a struct assignment.
    fn assign(
        &mut self,
        data: &mut Self::Data,
        body: &ProcBody,
        target: Node,
        source: Option<Node>,
        value: Self::Value,
    );

    /// A `ref`/`out` argument escaped: the callee may have mutated the
    /// referenced storage unpredictably.
    fn escape(&mut self, data: &mut Self::Data, body: &ProcBody, node: Node) {
        let unknown = self.unknown();
        self.assign(data, body, node, None, unknown);
    }

    /// Widen all current state to unknown, keeping every tracked key. Used
    /// when a lambda, local function or delegate is invoked: their effects
    /// on captured state are not modeled.
    fn reset_all(&mut self, data: &mut Self::Data);

    /// Value of a literal node.
    fn literal(&mut self, body: &ProcBody, node: Node) -> Self::Value {
        let ty = body.ty_of(node);
        self.default_for_type(body, ty)
    }

    /// Value of an allocation. Hooks may record the allocation in `data`.
    fn creation(&mut self, _data: &mut Self::Data, _body: &ProcBody, _node: Node) -> Self::Value {
        self.unknown()
    }

    /// Result of an ordinary (analyzable-kind) invocation. Hooks may also
    /// reset receiver aliases in `data`.
    fn invoke(
        &mut self,
        _data: &mut Self::Data,
        _body: &ProcBody,
        _node: Node,
        _instance_value: Option<&Self::Value>,
        _arg_values: &[Self::Value],
    ) -> Self::Value {
        self.unknown()
    }

    fn unary(&mut self, _op: UnaryOp, _operand: &Self::Value) -> Self::Value {
        self.unknown()
    }

    fn binary(&mut self, _op: BinaryOp, _lhs: &Self::Value, _rhs: &Self::Value) -> Self::Value {
        self.unknown()
    }

    /// Nullability oracle: `Some(true)` if `node` is definitely null,
    /// `Some(false)` if definitely non-null, `None` otherwise. The default
    /// consults only compile-time constants.
    fn nullability(
        &mut self,
        _data: &Self::Data,
        body: &ProcBody,
        node: Node,
        _value: &Self::Value,
    ) -> Option<bool> {
        match body.const_of(node) {
            Some(ConstVal::Null) => Some(true),
            Some(_) => Some(false),
            None => None,
        }
    }
}

/// The generic statement walker. See the module docs.
pub struct Interpreter<S: Semantics> {
    pub semantics: S,
    values: FxHashMap<Node, S::Value>,
    predicates: FxHashMap<Node, PredicateOutcome>,
    throw_states: FxHashMap<Node, S::Data>,
    depth: usize,
}

impl<S: Semantics> Interpreter<S> {
    pub fn new(semantics: S) -> Interpreter<S> {
        Interpreter {
            semantics,
            values: FxHashMap::default(),
            predicates: FxHashMap::default(),
            throw_states: FxHashMap::default(),
            depth: 0,
        }
    }

    /// Interpret one statement: thread `data` through the statement's tree
    /// and return the updated state.
    pub fn flow(
        &mut self,
        body: &ProcBody,
        stmt: Node,
        mut data: S::Data,
    ) -> Result<S::Data, AnalysisError> {
        self.depth = 0;
        self.visit(body, stmt, &mut data)?;
        debug_assert!(
            self.subtree_fully_evaluated(body, stmt),
            "a sub-expression of {} received no abstract value",
            stmt
        );
        Ok(data)
    }

    /// The memoized abstract value of a visited node.
    pub fn value_of(&self, node: Node) -> Option<&S::Value> {
        self.values.get(&node)
    }

    /// Drain accumulated per-node artifacts.
    pub fn take_artifacts(&mut self) -> Artifacts<S::Data, S::Value> {
        Artifacts {
            node_values: std::mem::take(&mut self.values),
            predicates: std::mem::take(&mut self.predicates),
            throw_states: std::mem::take(&mut self.throw_states),
        }
    }

    fn subtree_fully_evaluated(&self, body: &ProcBody, root: Node) -> bool {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !self.values.contains_key(&node) {
                return false;
            }
            body.nodes[node].kind.visit_children(|c| stack.push(c));
        }
        true
    }

    fn visit(
        &mut self,
        body: &ProcBody,
        node: Node,
        data: &mut S::Data,
    ) -> Result<S::Value, AnalysisError> {
        self.depth += 1;
        if self.depth > MAX_EVAL_DEPTH {
            return Err(AnalysisError::EvalDepthExceeded {
                depth: MAX_EVAL_DEPTH,
            });
        }
        let value = self.visit_kind(body, node, data)?;
        trace!("visit: {} -> {:?}", node, value);
        self.values.insert(node, value.clone());
        self.depth -= 1;
        Ok(value)
    }

    fn visit_kind(
        &mut self,
        body: &ProcBody,
        node: Node,
        data: &mut S::Data,
    ) -> Result<S::Value, AnalysisError> {
        let kind = body.nodes[node].kind.clone();
        Ok(match kind {
            NodeKind::Literal => self.semantics.literal(body, node),
            NodeKind::LocalRef(_) | NodeKind::ParamRef(_) | NodeKind::InstanceRef => {
                self.semantics.read(data, body, node)
            }
            NodeKind::FieldRef { instance, .. } => {
                if let Some(i) = instance {
                    self.visit(body, i, data)?;
                }
                self.semantics.read(data, body, node)
            }
            NodeKind::PropertyRef {
                instance, indices, ..
            } => {
                if let Some(i) = instance {
                    self.visit(body, i, data)?;
                }
                for &ix in &indices {
                    self.visit(body, ix, data)?;
                }
                self.semantics.read(data, body, node)
            }
            NodeKind::ArrayRef { array, indices } => {
                self.visit(body, array, data)?;
                for &ix in &indices {
                    self.visit(body, ix, data)?;
                }
                self.semantics.read(data, body, node)
            }
            NodeKind::DynamicIndex { instance, indices } => {
                self.visit(body, instance, data)?;
                for &ix in &indices {
                    self.visit(body, ix, data)?;
                }
                self.semantics.read(data, body, node)
            }
            NodeKind::Assign { target, value } => {
                self.visit(body, target, data)?;
                let v = self.visit(body, value, data)?;
                self.semantics.assign(data, body, target, Some(value), v.clone());
                v
            }
            NodeKind::Deconstruct { targets, value } => {
                for &t in &targets {
                    self.visit(body, t, data)?;
                }
                let v = self.visit(body, value, data)?;
                // Element-wise splitting of the tuple value is not modeled;
                // each target conservatively receives unknown.
                for &t in &targets {
                    let unknown = self.semantics.unknown();
                    self.semantics.assign(data, body, t, None, unknown);
                }
                v
            }
            NodeKind::Coalesce { value, when_null } => {
                let v = self.visit(body, value, data)?;
                let w = self.visit(body, when_null, data)?;
                match self.semantics.nullability(data, body, value, &v) {
                    Some(true) => w,
                    Some(false) => v,
                    None => self.semantics.merge_values(&v, &w),
                }
            }
            NodeKind::ConditionalAccess { instance, access } => {
                let iv = self.visit(body, instance, data)?;
                let av = self.visit(body, access, data)?;
                let ty = body.ty_of(node);
                match self.semantics.nullability(data, body, instance, &iv) {
                    Some(true) => self.semantics.default_for_type(body, ty),
                    Some(false) => av,
                    None => {
                        let d = self.semantics.default_for_type(body, ty);
                        self.semantics.merge_values(&av, &d)
                    }
                }
            }
            NodeKind::Conditional {
                cond,
                when_true,
                when_false,
            } => {
                self.visit(body, cond, data)?;
                let tv = self.visit(body, when_true, data)?;
                let fv = self.visit(body, when_false, data)?;
                match body.const_of(cond) {
                    Some(ConstVal::Bool(true)) => tv,
                    Some(ConstVal::Bool(false)) => fv,
                    _ => self.semantics.merge_values(&tv, &fv),
                }
            }
            NodeKind::Unary { op, operand } => {
                let v = self.visit(body, operand, data)?;
                self.semantics.unary(op, &v)
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let lv = self.visit(body, lhs, data)?;
                let rv = self.visit(body, rhs, data)?;
                if op.is_comparison() {
                    let outcome = self.classify(body, op, lhs, rhs, &lv, &rv, data);
                    self.predicates.insert(node, outcome);
                }
                self.semantics.binary(op, &lv, &rv)
            }
            NodeKind::Argument { value, ref_kind } => {
                let v = self.visit(body, value, data)?;
                match ref_kind {
                    crate::ir::RefKind::Value => v,
                    crate::ir::RefKind::Ref | crate::ir::RefKind::Out => {
                        // Escape: the callee may write through the reference.
                        self.semantics.escape(data, body, value);
                        self.semantics.unknown()
                    }
                }
            }
            NodeKind::Invoke {
                method,
                instance,
                args,
            } => {
                let instance_value = match instance {
                    Some(i) => Some(self.visit(body, i, data)?),
                    None => None,
                };
                let mut arg_values = Vec::with_capacity(args.len());
                for &a in &args {
                    arg_values.push(self.visit(body, a, data)?);
                }
                match body.symbols[method].kind {
                    SymbolKind::Method(MethodKind::Lambda)
                    | SymbolKind::Method(MethodKind::LocalFunction)
                    | SymbolKind::Method(MethodKind::DelegateInvoke) => {
                        // The body of the target is never analyzed; soundness
                        // over precision.
                        trace!("visit: opaque invocation at {}, resetting state", node);
                        self.semantics.reset_all(data);
                        self.semantics.unknown()
                    }
                    _ => self
                        .semantics
                        .invoke(data, body, node, instance_value.as_ref(), &arg_values),
                }
            }
            NodeKind::Creation { args } => {
                for &a in &args {
                    self.visit(body, a, data)?;
                }
                self.semantics.creation(data, body, node)
            }
            NodeKind::Convert {
                operand,
                user_defined,
            } => {
                let v = self.visit(body, operand, data)?;
                if user_defined {
                    // A user-defined conversion operator can compute
                    // anything.
                    self.semantics.unknown()
                } else {
                    v
                }
            }
            NodeKind::Paren { operand } => self.visit(body, operand, data)?,
            NodeKind::Throw { operand } => {
                if let Some(o) = operand {
                    self.visit(body, o, data)?;
                }
                self.throw_states.insert(node, data.clone());
                self.semantics.unknown()
            }
            NodeKind::Return { value } => {
                if let Some(v) = value {
                    self.visit(body, v, data)?
                } else {
                    self.semantics.unknown()
                }
            }
        })
    }

    fn classify(
        &mut self,
        body: &ProcBody,
        op: BinaryOp,
        lhs: Node,
        rhs: Node,
        lhs_value: &S::Value,
        rhs_value: &S::Value,
        data: &S::Data,
    ) -> PredicateOutcome {
        // Both sides constant: decide outright.
        if let (Some(lc), Some(rc)) = (body.const_of(lhs), body.const_of(rhs)) {
            if let Some(result) = eval_const_comparison(op, lc, rc) {
                return if result {
                    PredicateOutcome::AlwaysTrue
                } else {
                    PredicateOutcome::AlwaysFalse
                };
            }
            return PredicateOutcome::Unknown;
        }
        // Null tests: consult the nullability oracle for the tested side.
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let tested = if matches!(body.const_of(rhs), Some(ConstVal::Null)) {
                Some((lhs, lhs_value))
            } else if matches!(body.const_of(lhs), Some(ConstVal::Null)) {
                Some((rhs, rhs_value))
            } else {
                None
            };
            if let Some((tested, tested_value)) = tested {
                let is_null = self.semantics.nullability(data, body, tested, tested_value);
                return match (op, is_null) {
                    (BinaryOp::Eq, Some(true)) | (BinaryOp::Ne, Some(false)) => {
                        PredicateOutcome::AlwaysTrue
                    }
                    (BinaryOp::Eq, Some(false)) | (BinaryOp::Ne, Some(true)) => {
                        PredicateOutcome::AlwaysFalse
                    }
                    _ => PredicateOutcome::Unknown,
                };
            }
        }
        PredicateOutcome::Unknown
    }
}

fn eval_const_comparison(op: BinaryOp, lhs: &ConstVal, rhs: &ConstVal) -> Option<bool> {
    match (lhs, rhs) {
        (ConstVal::Int(a), ConstVal::Int(b)) => Some(match op {
            BinaryOp::Eq => a == b,
            BinaryOp::Ne => a != b,
            BinaryOp::Lt => a < b,
            BinaryOp::Le => a <= b,
            BinaryOp::Gt => a > b,
            BinaryOp::Ge => a >= b,
            _ => return None,
        }),
        (ConstVal::Bool(a), ConstVal::Bool(b)) => match op {
            BinaryOp::Eq => Some(a == b),
            BinaryOp::Ne => Some(a != b),
            _ => None,
        },
        (ConstVal::Null, ConstVal::Null) => match op {
            BinaryOp::Eq => Some(true),
            BinaryOp::Ne => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Refresh `data` from a possibly-absent replacement map without losing
/// keys: a key present only in the old map is widened to `unknown` rather
/// than dropped, so a key's value can only grow across analysis steps.
pub fn reset_map_data<K, V>(
    data: &mut FxHashMap<K, V>,
    replacement: Option<FxHashMap<K, V>>,
    unknown: &V,
) where
    K: Clone + Eq + Hash,
    V: Clone,
{
    match replacement {
        None => {
            for value in data.values_mut() {
                *value = unknown.clone();
            }
        }
        Some(mut replacement) => {
            for (key, value) in data.iter_mut() {
                if let Some(new_value) = replacement.remove(key) {
                    *value = new_value;
                } else {
                    *value = unknown.clone();
                }
            }
            for (key, value) in replacement {
                data.insert(key, value);
            }
        }
    }
}

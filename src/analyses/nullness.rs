//! Tri-state nullability analysis.
//!
//! Forward analysis keyed by analysis entities. Reference-typed storage is
//! tracked as definitely-null, definitely-non-null, or maybe-null; branch
//! edges guarded by `x == null` / `x != null` comparisons refine the tested
//! entity along each outgoing edge.

use crate::domains::{EntityMapDomain, EntityValueDomain};
use crate::errors::AnalysisError;
use crate::factory::{syntactic_points_to, EntityFactory};
use crate::flow::entity::{assign as entity_assign, read as entity_read, EntityMap};
use crate::interp::{reset_map_data, Interpreter, Semantics};
use crate::ir::{BinaryOp, ConstVal, Node, NodeKind, ProcBody, TypeKind, TypeRef, UnaryOp};
use crate::lattice::{merge_checked, AbstractDomain};
use crate::loc::SharedEntityStore;
use crate::solver::{Analysis, Artifacts, Direction};
use crate::ir::Block;
use log::trace;
use std::cmp::Ordering;

/// Nullability of one storage location or expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Nullness {
    /// Not yet observed (bottom).
    Undefined,
    Null,
    NotNull,
    /// May or may not be null (top).
    Maybe,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullnessDomain;

impl AbstractDomain for NullnessDomain {
    type Value = Nullness;

    fn bottom(&self) -> Nullness {
        Nullness::Undefined
    }

    fn merge(&self, a: &Nullness, b: &Nullness) -> Nullness {
        match (a, b) {
            (Nullness::Undefined, x) | (x, Nullness::Undefined) => *x,
            (x, y) if x == y => *x,
            _ => Nullness::Maybe,
        }
    }

    fn compare(&self, old: &Nullness, new: &Nullness) -> Ordering {
        let rank = |v: &Nullness| match v {
            Nullness::Undefined => 0,
            Nullness::Null | Nullness::NotNull => 1,
            Nullness::Maybe => 2,
        };
        match rank(old).cmp(&rank(new)) {
            Ordering::Equal if old == new => Ordering::Equal,
            Ordering::Equal => Ordering::Greater,
            ord => ord,
        }
    }

    fn is_unknown(&self, v: &Nullness) -> bool {
        matches!(v, Nullness::Maybe)
    }
}

impl EntityValueDomain for NullnessDomain {
    fn unknown(&self) -> Nullness {
        Nullness::Maybe
    }
}

pub struct NullnessSemantics<'a> {
    factory: EntityFactory<'a>,
}

impl<'a> NullnessSemantics<'a> {
    fn default_nullness(&self, body: &ProcBody, ty: TypeRef) -> Nullness {
        // Value types have no null state.
        match body.types[ty].kind {
            TypeKind::Value => Nullness::NotNull,
            TypeKind::Reference => Nullness::Maybe,
        }
    }
}

impl<'a> Semantics for NullnessSemantics<'a> {
    type Value = Nullness;
    type Data = EntityMap<Nullness>;

    fn unknown(&self) -> Nullness {
        Nullness::Maybe
    }

    fn default_for_type(&mut self, body: &ProcBody, ty: TypeRef) -> Nullness {
        self.default_nullness(body, ty)
    }

    fn merge_values(&mut self, a: &Nullness, b: &Nullness) -> Nullness {
        NullnessDomain.merge(a, b)
    }

    fn read(&mut self, data: &Self::Data, body: &ProcBody, node: Node) -> Nullness {
        let default = self.default_nullness(body, body.ty_of(node));
        entity_read(data, &mut self.factory, node, default)
    }

    fn assign(
        &mut self,
        data: &mut Self::Data,
        _body: &ProcBody,
        target: Node,
        source: Option<Node>,
        value: Nullness,
    ) {
        entity_assign(
            data,
            &mut self.factory,
            target,
            source,
            value,
            &Nullness::Maybe,
        );
    }

    fn reset_all(&mut self, data: &mut Self::Data) {
        reset_map_data(data, None, &Nullness::Maybe);
    }

    fn literal(&mut self, body: &ProcBody, node: Node) -> Nullness {
        match body.const_of(node) {
            Some(ConstVal::Null) => Nullness::Null,
            Some(_) => Nullness::NotNull,
            None => self.default_nullness(body, body.ty_of(node)),
        }
    }

    fn creation(&mut self, _data: &mut Self::Data, _body: &ProcBody, _node: Node) -> Nullness {
        Nullness::NotNull
    }

    fn unary(&mut self, _op: UnaryOp, _operand: &Nullness) -> Nullness {
        Nullness::NotNull
    }

    fn binary(&mut self, _op: BinaryOp, _lhs: &Nullness, _rhs: &Nullness) -> Nullness {
        Nullness::NotNull
    }

    fn nullability(
        &mut self,
        _data: &Self::Data,
        body: &ProcBody,
        node: Node,
        value: &Nullness,
    ) -> Option<bool> {
        match body.const_of(node) {
            Some(ConstVal::Null) => return Some(true),
            Some(_) => return Some(false),
            None => {}
        }
        match value {
            Nullness::Null => Some(true),
            Nullness::NotNull => Some(false),
            Nullness::Undefined | Nullness::Maybe => None,
        }
    }
}

/// The analysis: interpreter-driven forward flow over an entity-keyed map,
/// with branch-edge refinement of null tests.
pub struct NullnessAnalysis<'a> {
    interp: Interpreter<NullnessSemantics<'a>>,
    domain: EntityMapDomain<NullnessDomain>,
}

impl<'a> NullnessAnalysis<'a> {
    pub fn new(body: &'a ProcBody, store: SharedEntityStore) -> NullnessAnalysis<'a> {
        let factory =
            EntityFactory::with_points_to(body, store.clone(), Box::new(syntactic_points_to));
        NullnessAnalysis {
            interp: Interpreter::new(NullnessSemantics { factory }),
            domain: EntityMapDomain::new(NullnessDomain, store),
        }
    }

    /// Assume `cond` evaluates to `truth` and refine `data` accordingly.
    fn assume(&mut self, body: &ProcBody, cond: Node, truth: bool, data: &mut EntityMap<Nullness>) {
        match body.nodes[cond].kind.clone() {
            NodeKind::Binary { op, lhs, rhs } if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {
                let tested = if matches!(body.const_of(rhs), Some(ConstVal::Null)) {
                    Some(lhs)
                } else if matches!(body.const_of(lhs), Some(ConstVal::Null)) {
                    Some(rhs)
                } else {
                    None
                };
                if let Some(tested) = tested {
                    let is_null = (op == BinaryOp::Eq) == truth;
                    if let Some(entity) = self.interp.semantics.factory.try_create(tested) {
                        trace!(
                            "assume: {:?} is {}",
                            entity,
                            if is_null { "null" } else { "not null" }
                        );
                        data.insert(
                            entity,
                            if is_null {
                                Nullness::Null
                            } else {
                                Nullness::NotNull
                            },
                        );
                    }
                }
            }
            NodeKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.assume(body, operand, !truth, data),
            NodeKind::Paren { operand } => self.assume(body, operand, truth, data),
            NodeKind::Convert {
                operand,
                user_defined: false,
            } => self.assume(body, operand, truth, data),
            _ => {}
        }
    }
}

impl<'a> Analysis for NullnessAnalysis<'a> {
    type Data = EntityMap<Nullness>;
    type Value = Nullness;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn bottom(&self) -> Self::Data {
        self.domain.bottom()
    }

    fn merge(&mut self, a: &Self::Data, b: &Self::Data) -> Self::Data {
        merge_checked(&self.domain, a, b)
    }

    fn compare(&self, old: &Self::Data, new: &Self::Data) -> Ordering {
        self.domain.compare(old, new)
    }

    fn flow(
        &mut self,
        body: &ProcBody,
        _block: Block,
        stmt: Node,
        data: Self::Data,
    ) -> Result<Self::Data, AnalysisError> {
        self.interp.flow(body, stmt, data)
    }

    fn flow_edge(
        &mut self,
        body: &ProcBody,
        from: Block,
        succ_index: usize,
        _to: Block,
        data: &mut Self::Data,
    ) {
        if let Some(cond) = body.blocks[from].branch {
            // succs[0] is the edge taken when the condition holds.
            self.assume(body, cond, succ_index == 0, data);
        }
    }

    fn artifacts(&mut self) -> Artifacts<Self::Data, Self::Value> {
        self.interp.take_artifacts()
    }
}

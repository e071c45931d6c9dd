//! Live-variable analysis.
//!
//! The classic backward dataflow problem over symbol sets: a symbol is live
//! at a program point if some path to the exit reads it before writing it.
//! Exercises the backward direction of the solver; no tree interpretation
//! is needed, the transfer function is plain kill/gen over each statement.

use crate::domains::SetDomain;
use crate::errors::AnalysisError;
use crate::ir::{Block, Node, NodeKind, ProcBody, Symbol};
use crate::lattice::AbstractDomain;
use crate::solver::{Analysis, Direction};
use fxhash::FxHashSet;
use std::cmp::Ordering;

#[derive(Default)]
pub struct LivenessAnalysis {
    domain: SetDomain<Symbol>,
}

impl LivenessAnalysis {
    pub fn new() -> LivenessAnalysis {
        LivenessAnalysis::default()
    }

    fn gen_reads(body: &ProcBody, node: Node, live: &mut FxHashSet<Symbol>) {
        match body.nodes[node].kind.clone() {
            NodeKind::LocalRef(s) | NodeKind::ParamRef(s) => {
                live.insert(s);
            }
            NodeKind::Assign { target, value } => {
                Self::gen_reads(body, value, live);
                // A write to a plain symbol generates no read; writes
                // through members or indices still read their receivers.
                match body.nodes[target].kind {
                    NodeKind::LocalRef(_) | NodeKind::ParamRef(_) => {}
                    _ => Self::gen_reads(body, target, live),
                }
            }
            kind => {
                kind.visit_children(|child| Self::gen_reads(body, child, live));
            }
        }
    }
}

impl Analysis for LivenessAnalysis {
    type Data = FxHashSet<Symbol>;
    type Value = ();

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn bottom(&self) -> Self::Data {
        self.domain.bottom()
    }

    fn merge(&mut self, a: &Self::Data, b: &Self::Data) -> Self::Data {
        self.domain.merge(a, b)
    }

    fn compare(&self, old: &Self::Data, new: &Self::Data) -> Ordering {
        self.domain.compare(old, new)
    }

    fn flow(
        &mut self,
        body: &ProcBody,
        _block: Block,
        stmt: Node,
        mut live: Self::Data,
    ) -> Result<Self::Data, AnalysisError> {
        // Kill writes first: the statement's own reads happen before the
        // (backward-earlier) write takes effect.
        if let NodeKind::Assign { target, .. } = body.nodes[stmt].kind {
            match body.nodes[target].kind {
                NodeKind::LocalRef(s) | NodeKind::ParamRef(s) => {
                    live.remove(&s);
                }
                _ => {}
            }
        }
        Self::gen_reads(body, stmt, &mut live);
        Ok(live)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{SymbolData, TypeKind, TypeRef};
    use crate::solver::solve;

    fn assign(body: &mut ProcBody, block: Block, target: Symbol, from: Symbol, ty: TypeRef) {
        let t = body.add_node(NodeKind::LocalRef(target), ty);
        let v = body.add_node(NodeKind::LocalRef(from), ty);
        let node = body.add_node(NodeKind::Assign { target: t, value: v }, ty);
        body.append_stmt(block, node);
    }

    #[test]
    fn straight_line_kill_and_gen() {
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let y = body.add_symbol(SymbolData::local("y", int));
        let b0 = body.add_block();
        body.add_edge(body.entry, b0);
        body.add_edge(b0, body.exit);

        // x = y
        assign(&mut body, b0, x, y, int);

        let results = solve(LivenessAnalysis::new(), &body).unwrap();
        // Backward: liveness flowing out of b0 (into the entry side) has y
        // live and x dead.
        let live_in = results.output_of(b0).unwrap();
        assert!(live_in.contains(&y));
        assert!(!live_in.contains(&x));
    }

    #[test]
    fn loop_carried_liveness() {
        // while (...) { x = x; } keeps x live around the back edge.
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let b_head = body.add_block();
        let b_body = body.add_block();
        body.add_edge(body.entry, b_head);
        body.add_edge(b_head, b_body);
        body.add_edge(b_head, body.exit);
        body.add_edge(b_body, b_head);

        assign(&mut body, b_body, x, x, int);

        let results = solve(LivenessAnalysis::new(), &body).unwrap();
        assert!(results.output_of(b_body).unwrap().contains(&x));
        assert!(results.output_of(b_head).unwrap().contains(&x));
    }

    #[test]
    fn branch_use_keeps_symbol_live() {
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let y = body.add_symbol(SymbolData::local("y", int));
        let b0 = body.add_block();
        let b_then = body.add_block();
        let b_join = body.add_block();
        body.add_edge(body.entry, b0);
        body.add_edge(b0, b_then);
        body.add_edge(b0, b_join);
        body.add_edge(b_then, b_join);
        body.add_edge(b_join, body.exit);

        // then-branch reads y; join reads x.
        let read_y = body.add_node(NodeKind::LocalRef(y), int);
        body.append_stmt(b_then, read_y);
        let read_x = body.add_node(NodeKind::LocalRef(x), int);
        body.append_stmt(b_join, read_x);

        let results = solve(LivenessAnalysis::new(), &body).unwrap();
        // Flowing backward out of b0: both x (via join) and y (via the
        // then-branch) are live.
        let live = results.output_of(b0).unwrap();
        assert!(live.contains(&x));
        assert!(live.contains(&y));
    }
}

//! Worklist fixpoint engine over a procedure's CFG.
//!
//! The engine drives a per-statement transfer function over basic blocks
//! until no block's abstract state changes. Forward and backward analyses
//! share all logic; they differ only in which block seeds the worklist,
//! which neighbors count as predecessors/successors, and the order
//! statements are folded within a block.

use crate::errors::AnalysisError;
use crate::ir::{Block, Node, ProcBody};
use fxhash::{FxHashMap, FxHashSet};
use log::trace;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt::Debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Tri-state outcome attached to a comparison operation by predicate-aware
/// analyses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateOutcome {
    AlwaysTrue,
    AlwaysFalse,
    Unknown,
}

/// Per-node artifacts drained from an analysis after convergence.
#[derive(Clone, Debug)]
pub struct Artifacts<D, V> {
    pub node_values: FxHashMap<Node, V>,
    pub predicates: FxHashMap<Node, PredicateOutcome>,
    /// State observed at each throw site, keyed by the throw node.
    pub throw_states: FxHashMap<Node, D>,
}

impl<D, V> Default for Artifacts<D, V> {
    fn default() -> Self {
        Artifacts {
            node_values: FxHashMap::default(),
            predicates: FxHashMap::default(),
            throw_states: FxHashMap::default(),
        }
    }
}

/// One concrete dataflow analysis: a data lattice plus a per-statement
/// transfer function.
pub trait Analysis {
    /// Per-procedure analysis state threaded through statements.
    type Data: Clone + Debug;
    /// Per-node abstract value recorded for client queries.
    type Value: Clone + Debug;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn bottom(&self) -> Self::Data;

    fn merge(&mut self, a: &Self::Data, b: &Self::Data) -> Self::Data;

    /// `Less` when `old < new`; `Greater` (including incomparable) is a
    /// monotonicity violation the engine turns into a fatal error.
    fn compare(&self, old: &Self::Data, new: &Self::Data) -> Ordering;

    /// Transfer one statement.
    fn flow(
        &mut self,
        body: &ProcBody,
        block: Block,
        stmt: Node,
        data: Self::Data,
    ) -> Result<Self::Data, AnalysisError>;

    /// Refine state flowing along one CFG edge, e.g. by assuming a branch
    /// condition. For forward analyses `succ_index` is the edge's position
    /// in `from`'s successor list; for backward analyses it is `from`'s
    /// position in `to`'s successor list. Default: no refinement.
    fn flow_edge(
        &mut self,
        _body: &ProcBody,
        _from: Block,
        _succ_index: usize,
        _to: Block,
        _data: &mut Self::Data,
    ) {
    }

    /// Drain per-node artifacts accumulated during interpretation.
    fn artifacts(&mut self) -> Artifacts<Self::Data, Self::Value> {
        Artifacts::default()
    }
}

/// Converged per-block and per-node results of one analysis run.
#[derive(Clone, Debug)]
pub struct DataFlowResults<D, V> {
    pub direction: Direction,
    block_in: FxHashMap<Block, D>,
    block_out: FxHashMap<Block, D>,
    node_values: FxHashMap<Node, V>,
    predicates: FxHashMap<Node, PredicateOutcome>,
    /// Merged state over every throw site, if any was reached.
    pub throw_state: Option<D>,
}

impl<D, V> DataFlowResults<D, V> {
    /// State flowing into a block. `None` for blocks never reached.
    pub fn input_of(&self, block: Block) -> Option<&D> {
        self.block_in.get(&block)
    }

    /// State flowing out of a block. `None` for blocks never reached.
    pub fn output_of(&self, block: Block) -> Option<&D> {
        self.block_out.get(&block)
    }

    /// Computed abstract value of a node. `None` if the node was not part of
    /// this analysis's state -- a caller error, surfaced as lookup failure.
    pub fn value_of(&self, node: Node) -> Option<&V> {
        self.node_values.get(&node)
    }

    pub fn predicate_of(&self, node: Node) -> Option<PredicateOutcome> {
        self.predicates.get(&node).copied()
    }
}

fn directional_entry(body: &ProcBody, dir: Direction) -> Block {
    match dir {
        Direction::Forward => body.entry,
        Direction::Backward => body.exit,
    }
}

fn directional_succs(body: &ProcBody, dir: Direction, block: Block) -> SmallVec<[Block; 2]> {
    match dir {
        Direction::Forward => body.blocks[block].succs.clone(),
        Direction::Backward => body.blocks[block].preds.clone(),
    }
}

/// Directional predecessors of `block`, paired with the forward successor
/// index of the connecting edge (for edge refinement).
fn directional_preds(
    body: &ProcBody,
    dir: Direction,
    block: Block,
) -> SmallVec<[(Block, usize); 2]> {
    let mut out = SmallVec::new();
    match dir {
        Direction::Forward => {
            for &pred in &body.blocks[block].preds {
                for (i, &succ) in body.blocks[pred].succs.iter().enumerate() {
                    if succ == block {
                        out.push((pred, i));
                    }
                }
            }
        }
        Direction::Backward => {
            for (i, &succ) in body.blocks[block].succs.iter().enumerate() {
                out.push((succ, i));
            }
        }
    }
    out
}

/// Run `analysis` to fixpoint over `body`.
///
/// Every block's output starts at bottom; the directional entry block's
/// output stays bottom (entry and exit blocks hold no statements) and its
/// successors seed the worklist. The worklist is a queue with
/// de-duplication: re-enqueueing a queued block is a no-op, but a block may
/// be processed many times across enqueue events, which is what lets loops
/// converge.
pub fn solve<A: Analysis>(
    mut analysis: A,
    body: &ProcBody,
) -> Result<DataFlowResults<A::Data, A::Value>, AnalysisError> {
    let dir = analysis.direction();
    let entry = directional_entry(body, dir);

    let mut block_out: FxHashMap<Block, A::Data> = FxHashMap::default();
    let mut block_in: FxHashMap<Block, A::Data> = FxHashMap::default();
    for block in body.blocks.iter() {
        block_out.insert(block, analysis.bottom());
    }
    block_in.insert(entry, analysis.bottom());

    let mut queue: VecDeque<Block> = VecDeque::new();
    let mut queued: FxHashSet<Block> = FxHashSet::default();
    for succ in directional_succs(body, dir, entry) {
        if queued.insert(succ) {
            queue.push_back(succ);
        }
    }

    // Blocks that have been processed at least once. A block's first
    // processing must propagate even when its output equals bottom, since
    // its successors have not observed any output from it yet.
    let mut visited: FxHashSet<Block> = FxHashSet::default();

    let mut iterations = 0usize;
    while let Some(block) = queue.pop_front() {
        queued.remove(&block);
        let first_visit = visited.insert(block);
        iterations += 1;
        trace!("solve: iteration {} visits {}", iterations, block);

        // Input: merge of directional predecessors' outputs, each refined
        // along its edge.
        let mut input: Option<A::Data> = None;
        for (pred, edge) in directional_preds(body, dir, block) {
            let mut state = block_out[&pred].clone();
            analysis.flow_edge(body, pred, edge, block, &mut state);
            input = Some(match input {
                None => state,
                Some(acc) => analysis.merge(&acc, &state),
            });
        }
        let input = input.unwrap_or_else(|| analysis.bottom());

        // Fold the block's statements, in directional order.
        let mut state = input.clone();
        let stmts = &body.blocks[block].stmts;
        match dir {
            Direction::Forward => {
                for &stmt in stmts.iter() {
                    state = analysis.flow(body, block, stmt, state)?;
                }
            }
            Direction::Backward => {
                for &stmt in stmts.iter().rev() {
                    state = analysis.flow(body, block, stmt, state)?;
                }
            }
        }

        let old = &block_out[&block];
        let change = analysis.compare(old, &state);
        if change == Ordering::Greater {
            return Err(AnalysisError::NonMonotone(format!(
                "output of {} shrank during iteration {}",
                block, iterations
            )));
        }
        block_in.insert(block, input);
        if change == Ordering::Less {
            block_out.insert(block, state);
        }
        if change == Ordering::Less || first_visit {
            trace!("solve: {} changed, enqueueing successors", block);
            for succ in directional_succs(body, dir, block) {
                if queued.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
    }
    trace!(
        "solve: converged for {} after {} block visits",
        body.name,
        iterations
    );

    let arts = analysis.artifacts();
    let mut throw_state: Option<A::Data> = None;
    for state in arts.throw_states.values() {
        throw_state = Some(match throw_state {
            None => state.clone(),
            Some(acc) => analysis.merge(&acc, state),
        });
    }

    Ok(DataFlowResults {
        direction: dir,
        block_in,
        block_out,
        node_values: arts.node_values,
        predicates: arts.predicates,
        throw_state,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::domains::MapDomain;
    use crate::ir::{NodeKind, SymbolData, Symbol, TypeKind};
    use crate::lattice::{merge_checked, AbstractDomain, Flat, FlatDomain};

    /// A miniature constant-propagation analysis over symbol-keyed flat
    /// values, driven directly (no tree interpretation): each statement is
    /// `Assign { target: LocalRef, value }` with a constant or a read.
    struct Consts {
        domain: MapDomain<Symbol, FlatDomain<i64>>,
    }

    impl Consts {
        fn new() -> Consts {
            Consts {
                domain: MapDomain::new(FlatDomain::default()),
            }
        }
    }

    impl Analysis for Consts {
        type Data = FxHashMap<Symbol, Flat<i64>>;
        type Value = Flat<i64>;

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
            mut data: Self::Data,
        ) -> Result<Self::Data, AnalysisError> {
            if let NodeKind::Assign { target, value } = body.nodes[stmt].kind.clone() {
                let target_sym = match body.nodes[target].kind {
                    NodeKind::LocalRef(s) => s,
                    _ => return Ok(data),
                };
                let v = match (&body.nodes[value].kind, body.const_of(value)) {
                    (_, Some(crate::ir::ConstVal::Int(i))) => Flat::Known(*i),
                    (NodeKind::LocalRef(s), _) => {
                        data.get(s).cloned().unwrap_or(Flat::Bottom)
                    }
                    _ => Flat::Top,
                };
                data.insert(target_sym, v);
            }
            Ok(data)
        }
    }

    fn assign_const(body: &mut ProcBody, block: Block, sym: Symbol, ty: crate::ir::TypeRef, k: i64) {
        let target = body.add_node(NodeKind::LocalRef(sym), ty);
        let value = body.add_const_node(NodeKind::Literal, ty, crate::ir::ConstVal::Int(k));
        let assign = body.add_node(NodeKind::Assign { target, value }, ty);
        body.append_stmt(block, assign);
    }

    fn assign_self(body: &mut ProcBody, block: Block, sym: Symbol, ty: crate::ir::TypeRef) {
        let target = body.add_node(NodeKind::LocalRef(sym), ty);
        let value = body.add_node(NodeKind::LocalRef(sym), ty);
        let assign = body.add_node(NodeKind::Assign { target, value }, ty);
        body.append_stmt(block, assign);
    }

    #[test]
    fn branch_join_merges_exactly() {
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let b_cond = body.add_block();
        let b_then = body.add_block();
        let b_else = body.add_block();
        let b_join = body.add_block();
        body.add_edge(body.entry, b_cond);
        body.add_edge(b_cond, b_then);
        body.add_edge(b_cond, b_else);
        body.add_edge(b_then, b_join);
        body.add_edge(b_else, b_join);
        body.add_edge(b_join, body.exit);

        assign_const(&mut body, b_then, x, int, 1);
        assign_const(&mut body, b_else, x, int, 2);

        let results = solve(Consts::new(), &body).unwrap();
        // The merged value at the join is exactly the lattice merge of the
        // two branch values.
        let join_in = results.input_of(b_join).unwrap();
        assert_eq!(join_in[&x], Flat::Top);
        let then_out = results.output_of(b_then).unwrap();
        assert_eq!(then_out[&x], Flat::Known(1));
    }

    #[test]
    fn same_constant_survives_join() {
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let b_then = body.add_block();
        let b_else = body.add_block();
        let b_join = body.add_block();
        body.add_edge(body.entry, b_then);
        body.add_edge(body.entry, b_else);
        body.add_edge(b_then, b_join);
        body.add_edge(b_else, b_join);
        body.add_edge(b_join, body.exit);

        assign_const(&mut body, b_then, x, int, 7);
        assign_const(&mut body, b_else, x, int, 7);

        let results = solve(Consts::new(), &body).unwrap();
        assert_eq!(results.input_of(b_join).unwrap()[&x], Flat::Known(7));
    }

    #[test]
    fn loop_converges() {
        // while (cond) { x = x; } over a finite-height lattice must reach a
        // fixpoint without tripping the monotonicity check.
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let b_init = body.add_block();
        let b_head = body.add_block();
        let b_body = body.add_block();
        body.add_edge(body.entry, b_init);
        body.add_edge(b_init, b_head);
        body.add_edge(b_head, b_body);
        body.add_edge(b_head, body.exit);
        body.add_edge(b_body, b_head);

        assign_const(&mut body, b_init, x, int, 3);
        assign_self(&mut body, b_body, x, int);

        let results = solve(Consts::new(), &body).unwrap();
        assert_eq!(results.output_of(b_head).unwrap()[&x], Flat::Known(3));
        assert_eq!(results.output_of(b_body).unwrap()[&x], Flat::Known(3));
    }

    #[test]
    fn fixpoint_is_stable() {
        // Re-running a block's transfer on its converged input reproduces
        // its converged output.
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let b0 = body.add_block();
        body.add_edge(body.entry, b0);
        body.add_edge(b0, body.exit);
        assign_const(&mut body, b0, x, int, 5);

        let results = solve(Consts::new(), &body).unwrap();
        let mut again = Consts::new();
        let mut state = results.input_of(b0).unwrap().clone();
        for &stmt in &body.blocks[b0].stmts {
            state = again.flow(&body, b0, stmt, state).unwrap();
        }
        assert_eq!(&state, results.output_of(b0).unwrap());
    }

    /// A deliberately broken lattice whose transfer shrinks state.
    struct Shrinking;

    impl Analysis for Shrinking {
        type Data = u32;
        type Value = ();

        fn bottom(&self) -> u32 {
            10
        }
        fn merge(&mut self, a: &u32, b: &u32) -> u32 {
            *a.max(b)
        }
        fn compare(&self, old: &u32, new: &u32) -> Ordering {
            old.cmp(new)
        }
        fn flow(
            &mut self,
            _body: &ProcBody,
            _block: Block,
            _stmt: Node,
            data: u32,
        ) -> Result<u32, AnalysisError> {
            Ok(data.saturating_sub(1))
        }
    }

    #[test]
    fn non_monotone_transfer_is_fatal() {
        let mut body = ProcBody::new("t");
        let int = body.add_type("int", TypeKind::Value);
        let b0 = body.add_block();
        body.add_edge(body.entry, b0);
        body.add_edge(b0, body.exit);
        let stmt = body.add_node(NodeKind::Literal, int);
        body.append_stmt(b0, stmt);

        match solve(Shrinking, &body) {
            Err(AnalysisError::NonMonotone(_)) => {}
            other => panic!("expected NonMonotone, got {:?}", other.map(|_| ())),
        }
    }
}

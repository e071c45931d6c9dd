//! Procedure representation consumed by the analysis engine.
//!
//! The engine does not parse or bind source; it consumes an already-built
//! control-flow graph of basic blocks whose statements are trees of operation
//! nodes with resolved symbols and types. This module defines that contract:
//! a [`ProcBody`] owns arenas of blocks, nodes, symbols and types, and blocks
//! carry explicit predecessor/successor edge lists.

use crate::entity;
use crate::entity::EntityVec;
use log::trace;
use smallvec::SmallVec;

mod display;
mod node;
mod symbol;

pub use display::ProcBodyDisplay;
pub use node::{BinaryOp, ConstVal, NodeData, NodeKind, RefKind, UnaryOp};
pub use symbol::{MethodKind, PropertyShape, SymbolData, SymbolKind, TypeData, TypeKind};

entity!(Block, "block");
entity!(Node, "node");
entity!(Symbol, "sym");
entity!(TypeRef, "ty");

/// One procedure's control-flow graph and operation trees.
#[derive(Clone, Debug, Default)]
pub struct ProcBody {
    pub name: String,
    /// Types referenced by symbols and nodes.
    pub types: EntityVec<TypeRef, TypeData>,
    /// Symbols: locals, parameters, members, methods.
    pub symbols: EntityVec<Symbol, SymbolData>,
    /// Operation nodes. Statements are roots of trees over these.
    pub nodes: EntityVec<Node, NodeData>,
    /// Basic blocks.
    pub blocks: EntityVec<Block, BlockDef>,
    /// Entry block. Holds no statements; analysis state flows out of it.
    pub entry: Block,
    /// Exit block. Holds no statements; all returns lead here.
    pub exit: Block,
    /// Formal parameters, in declaration order.
    pub params: Vec<Symbol>,
    /// The implicit receiver symbol, for instance procedures.
    pub this_symbol: Option<Symbol>,
}

/// One basic block: an ordered statement list plus explicit edges.
#[derive(Clone, Debug, Default)]
pub struct BlockDef {
    /// Statement roots, in execution order.
    pub stmts: Vec<Node>,
    /// Branch condition. When set, `succs[0]` is the edge taken when the
    /// condition holds and `succs[1]` the edge taken when it does not.
    pub branch: Option<Node>,
    /// Successor blocks.
    pub succs: SmallVec<[Block; 2]>,
    /// Predecessor blocks.
    pub preds: SmallVec<[Block; 2]>,
}

impl ProcBody {
    pub fn new(name: &str) -> ProcBody {
        let mut body = ProcBody {
            name: name.to_owned(),
            ..ProcBody::default()
        };
        body.entry = body.add_block();
        body.exit = body.add_block();
        body
    }

    pub fn add_block(&mut self) -> Block {
        let block = self.blocks.push(BlockDef::default());
        trace!("add_block: {} in {}", block, self.name);
        block
    }

    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
        trace!("add_edge: {} -> {}", from, to);
    }

    pub fn add_type(&mut self, name: &str, kind: TypeKind) -> TypeRef {
        self.types.push(TypeData {
            name: name.to_owned(),
            kind,
        })
    }

    pub fn add_symbol(&mut self, data: SymbolData) -> Symbol {
        self.symbols.push(data)
    }

    pub fn add_node(&mut self, kind: NodeKind, ty: TypeRef) -> Node {
        let node = self.nodes.push(NodeData {
            kind,
            ty,
            constant: None,
        });
        trace!("add_node: {} {:?}", node, self.nodes[node].kind);
        node
    }

    pub fn add_const_node(&mut self, kind: NodeKind, ty: TypeRef, constant: ConstVal) -> Node {
        let node = self.add_node(kind, ty);
        self.nodes[node].constant = Some(constant);
        node
    }

    pub fn append_stmt(&mut self, block: Block, stmt: Node) {
        self.blocks[block].stmts.push(stmt);
    }

    pub fn set_branch(&mut self, block: Block, cond: Node) {
        debug_assert!(self.blocks[block].branch.is_none());
        self.blocks[block].branch = Some(cond);
    }

    /// Static type of a node.
    pub fn ty_of(&self, node: Node) -> TypeRef {
        self.nodes[node].ty
    }

    /// Compile-time constant of a node, if the host resolved one.
    pub fn const_of(&self, node: Node) -> Option<&ConstVal> {
        self.nodes[node].constant.as_ref()
    }

    /// Whether a type has value-copy semantics.
    pub fn is_value_type(&self, ty: TypeRef) -> bool {
        self.types[ty].kind == TypeKind::Value
    }

    pub fn display<'a>(&'a self) -> ProcBodyDisplay<'a> {
        ProcBodyDisplay(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_diamond() {
        let mut body = ProcBody::new("f");
        let int = body.add_type("int", TypeKind::Value);
        let x = body.add_symbol(SymbolData::local("x", int));
        let b0 = body.add_block();
        let b1 = body.add_block();
        let b2 = body.add_block();
        let b3 = body.add_block();
        body.add_edge(body.entry, b0);
        body.add_edge(b0, b1);
        body.add_edge(b0, b2);
        body.add_edge(b1, b3);
        body.add_edge(b2, b3);
        body.add_edge(b3, body.exit);

        let read = body.add_node(NodeKind::LocalRef(x), int);
        body.append_stmt(b1, read);

        assert_eq!(body.blocks[b0].succs.as_slice(), &[b1, b2]);
        assert_eq!(body.blocks[b3].preds.as_slice(), &[b1, b2]);
        assert_eq!(body.blocks[b1].stmts, vec![read]);
        assert!(body.is_value_type(int));
    }
}

//! Displaying procedures.

use super::{ConstVal, Node, NodeKind, ProcBody};

use std::fmt::{Display, Formatter, Result as FmtResult};

pub struct ProcBodyDisplay<'a>(pub(crate) &'a ProcBody);

impl<'a> ProcBodyDisplay<'a> {
    fn expr(&self, node: Node, f: &mut Formatter) -> FmtResult {
        let body = self.0;
        if let Some(c) = body.const_of(node) {
            return match c {
                ConstVal::Null => write!(f, "null"),
                ConstVal::Bool(b) => write!(f, "{}", b),
                ConstVal::Int(i) => write!(f, "{}", i),
                ConstVal::Str(s) => write!(f, "{:?}", s),
            };
        }
        match &body.nodes[node].kind {
            NodeKind::Literal => write!(f, "<literal>"),
            NodeKind::LocalRef(s) | NodeKind::ParamRef(s) => {
                write!(f, "{}", body.symbols[*s].name)
            }
            NodeKind::InstanceRef => write!(f, "this"),
            NodeKind::FieldRef { instance, field } => {
                if let Some(i) = instance {
                    self.expr(*i, f)?;
                } else {
                    write!(f, "{}", body.types[body.symbols[*field].ty].name)?;
                }
                write!(f, ".{}", body.symbols[*field].name)
            }
            NodeKind::PropertyRef {
                instance, property, ..
            } => {
                if let Some(i) = instance {
                    self.expr(*i, f)?;
                    write!(f, ".")?;
                }
                write!(f, "{}", body.symbols[*property].name)
            }
            kind => {
                // Generic s-expression rendering for the remaining kinds.
                write!(f, "({}", kind_name(kind))?;
                let mut children = vec![];
                kind.visit_children(|c| children.push(c));
                for c in children {
                    write!(f, " ")?;
                    self.expr(c, f)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Literal => "lit",
        NodeKind::LocalRef(_) => "local",
        NodeKind::ParamRef(_) => "param",
        NodeKind::FieldRef { .. } => "field",
        NodeKind::PropertyRef { .. } => "prop",
        NodeKind::ArrayRef { .. } => "index",
        NodeKind::DynamicIndex { .. } => "dynindex",
        NodeKind::InstanceRef => "this",
        NodeKind::Assign { .. } => "assign",
        NodeKind::Deconstruct { .. } => "decon",
        NodeKind::Coalesce { .. } => "coalesce",
        NodeKind::ConditionalAccess { .. } => "condaccess",
        NodeKind::Conditional { .. } => "select",
        NodeKind::Unary { .. } => "unary",
        NodeKind::Binary { .. } => "binop",
        NodeKind::Argument { .. } => "arg",
        NodeKind::Invoke { .. } => "call",
        NodeKind::Creation { .. } => "new",
        NodeKind::Convert { .. } => "conv",
        NodeKind::Paren { .. } => "paren",
        NodeKind::Throw { .. } => "throw",
        NodeKind::Return { .. } => "ret",
    }
}

impl<'a> Display for ProcBodyDisplay<'a> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let body = self.0;
        let params = body
            .params
            .iter()
            .map(|&p| {
                format!(
                    "{}: {}",
                    body.symbols[p].name, body.types[body.symbols[p].ty].name
                )
            })
            .collect::<Vec<_>>();
        writeln!(f, "proc {}({}) {{", body.name, params.join(", "))?;
        for (block, def) in body.blocks.entries() {
            write!(f, "  {}", block)?;
            if block == body.entry {
                write!(f, " (entry)")?;
            }
            if block == body.exit {
                write!(f, " (exit)")?;
            }
            writeln!(f, ":")?;
            for &pred in &def.preds {
                writeln!(f, "    # pred: {}", pred)?;
            }
            for &stmt in &def.stmts {
                write!(f, "    ")?;
                self.expr(stmt, f)?;
                writeln!(f)?;
            }
            if let Some(cond) = def.branch {
                write!(f, "    branch ")?;
                self.expr(cond, f)?;
                writeln!(
                    f,
                    " ? {} : {}",
                    def.succs.get(0).copied().unwrap_or_default(),
                    def.succs.get(1).copied().unwrap_or_default()
                )?;
            } else {
                for &succ in &def.succs {
                    writeln!(f, "    jump {}", succ)?;
                }
            }
        }
        writeln!(f, "}}")
    }
}

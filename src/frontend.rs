//! Frontend: convert textual procedure descriptions to IR.
//!
//! A `.flow` file declares types and members at the top level and then one
//! or more procedures, each a set of labelled blocks holding one
//! s-expression statement per line:
//!
//! ```text
//! type Widget ref
//! fn use ordinary unit
//!
//! proc check(p: Widget) {
//!   block b0 {
//!     branch (== (param p) null) b1 b2
//!   }
//!   block b1 {
//!     jump exit
//!   }
//!   block b2 {
//!     (call use (arg (param p)))
//!     jump b1
//!   }
//! }
//! ```
//!
//! The first declared block receives the edge from the implicit entry
//! block; `exit` names the implicit exit block. `#` starts a comment.

use crate::errors::FrontendError;
use crate::ir::{
    BinaryOp, Block, ConstVal, MethodKind, Node, NodeKind, ProcBody, PropertyShape, RefKind,
    Symbol, SymbolData, SymbolKind, TypeKind, TypeRef, UnaryOp,
};
use fxhash::FxHashMap;
use log::trace;
use smallvec::SmallVec;

type Result<T> = std::result::Result<T, FrontendError>;

#[derive(Clone, Debug)]
enum Sexpr {
    Atom(String),
    List(Vec<Sexpr>),
}

/// File-level declarations shared by every procedure in the file.
#[derive(Clone, Debug, Default)]
struct Decls {
    types: Vec<(String, TypeKind)>,
    fields: Vec<(String, String)>,
    props: Vec<(String, String, PropertyShape)>,
    fns: Vec<(String, MethodKind, String)>,
}

/// Parse a whole `.flow` file.
pub fn parse_module(text: &str) -> Result<Vec<ProcBody>> {
    let mut decls = Decls::default();
    let mut procs = vec![];
    let mut lines = text.lines().enumerate().peekable();

    while let Some((idx, raw)) = lines.next() {
        let line = strip_comment(raw);
        if line.is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words[0] {
            "type" => {
                let (name, kind) = parse_type_decl(lineno, &words)?;
                decls.types.push((name, kind));
            }
            "field" => {
                expect_arity(lineno, &words, 3)?;
                decls
                    .fields
                    .push((words[1].to_owned(), words[2].to_owned()));
            }
            "prop" => {
                if words.len() < 3 {
                    return Err(FrontendError::Syntax(lineno, "prop NAME TYPE [flags]".into()));
                }
                let mut shape = PropertyShape::default();
                for flag in &words[3..] {
                    match *flag {
                        "indexer" => shape.indexer = true,
                        "readonly" => shape.readonly = true,
                        "auto" => shape.auto = true,
                        other => {
                            return Err(FrontendError::Syntax(
                                lineno,
                                format!("unknown prop flag `{}`", other),
                            ))
                        }
                    }
                }
                decls
                    .props
                    .push((words[1].to_owned(), words[2].to_owned(), shape));
            }
            "fn" => {
                expect_arity(lineno, &words, 4)?;
                let kind = match words[2] {
                    "ordinary" => MethodKind::Ordinary,
                    "lambda" => MethodKind::Lambda,
                    "localfn" => MethodKind::LocalFunction,
                    "delegate" => MethodKind::DelegateInvoke,
                    other => {
                        return Err(FrontendError::Syntax(
                            lineno,
                            format!("unknown method kind `{}`", other),
                        ))
                    }
                };
                decls
                    .fns
                    .push((words[1].to_owned(), kind, words[3].to_owned()));
            }
            "proc" => {
                let mut proc_lines = vec![(lineno, line.to_owned())];
                let mut depth = brace_delta(line);
                while depth > 0 {
                    let (idx, raw) = lines.next().ok_or_else(|| {
                        FrontendError::Syntax(lineno, "unterminated proc".into())
                    })?;
                    let line = strip_comment(raw);
                    depth += brace_delta(line);
                    proc_lines.push((idx + 1, line.to_owned()));
                }
                procs.push(parse_proc(&decls, &proc_lines)?);
            }
            other => {
                return Err(FrontendError::Syntax(
                    lineno,
                    format!("unknown declaration `{}`", other),
                ))
            }
        }
    }
    Ok(procs)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => line[..pos].trim(),
        None => line.trim(),
    }
}

fn brace_delta(line: &str) -> i32 {
    line.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

fn parse_type_decl(lineno: usize, words: &[&str]) -> Result<(String, TypeKind)> {
    expect_arity(lineno, words, 3)?;
    let kind = match words[2] {
        "ref" => TypeKind::Reference,
        "val" => TypeKind::Value,
        other => {
            return Err(FrontendError::Syntax(
                lineno,
                format!("type kind must be `ref` or `val`, got `{}`", other),
            ))
        }
    };
    Ok((words[1].to_owned(), kind))
}

fn expect_arity(lineno: usize, words: &[&str], n: usize) -> Result<()> {
    if words.len() != n {
        return Err(FrontendError::Syntax(
            lineno,
            format!("expected {} tokens, got {}", n, words.len()),
        ));
    }
    Ok(())
}

/// Per-procedure lowering state.
struct Lowering {
    body: ProcBody,
    types: FxHashMap<String, TypeRef>,
    symbols: FxHashMap<String, Symbol>,
    blocks: FxHashMap<String, Block>,
}

impl Lowering {
    fn ty(&mut self, lineno: usize, name: &str) -> Result<TypeRef> {
        match self.types.get(name) {
            Some(&ty) => Ok(ty),
            None => Err(FrontendError::Undefined(lineno, name.to_owned())),
        }
    }

    fn builtin(&mut self, name: &str, kind: TypeKind) -> TypeRef {
        if let Some(&ty) = self.types.get(name) {
            return ty;
        }
        let ty = self.body.add_type(name, kind);
        self.types.insert(name.to_owned(), ty);
        ty
    }

    fn symbol(&self, lineno: usize, name: &str) -> Result<Symbol> {
        match self.symbols.get(name) {
            Some(&s) => Ok(s),
            None => Err(FrontendError::Undefined(lineno, name.to_owned())),
        }
    }

    fn block(&self, lineno: usize, name: &str) -> Result<Block> {
        if name == "exit" {
            return Ok(self.body.exit);
        }
        match self.blocks.get(name) {
            Some(&b) => Ok(b),
            None => Err(FrontendError::Undefined(lineno, name.to_owned())),
        }
    }

    fn lower(&mut self, lineno: usize, sexpr: &Sexpr) -> Result<Node> {
        match sexpr {
            Sexpr::Atom(atom) => self.lower_atom(lineno, atom),
            Sexpr::List(items) => {
                let head = match items.first() {
                    Some(Sexpr::Atom(head)) => head.clone(),
                    _ => return Err(FrontendError::Syntax(lineno, "empty form".into())),
                };
                self.lower_form(lineno, &head, &items[1..])
            }
        }
    }

    fn lower_atom(&mut self, lineno: usize, atom: &str) -> Result<Node> {
        if atom == "null" {
            let object = self.builtin("object", TypeKind::Reference);
            return Ok(self
                .body
                .add_const_node(NodeKind::Literal, object, ConstVal::Null));
        }
        if atom == "true" || atom == "false" {
            let boolean = self.builtin("bool", TypeKind::Value);
            return Ok(self.body.add_const_node(
                NodeKind::Literal,
                boolean,
                ConstVal::Bool(atom == "true"),
            ));
        }
        if atom == "this" {
            match self.body.this_symbol {
                Some(this) => {
                    let ty = self.body.symbols[this].ty;
                    return Ok(self.body.add_node(NodeKind::InstanceRef, ty));
                }
                None => {
                    return Err(FrontendError::Syntax(
                        lineno,
                        "no `this` declared for this proc".into(),
                    ))
                }
            }
        }
        if let Ok(value) = atom.parse::<i64>() {
            let int = self.builtin("int", TypeKind::Value);
            return Ok(self
                .body
                .add_const_node(NodeKind::Literal, int, ConstVal::Int(value)));
        }
        if atom.starts_with('"') && atom.ends_with('"') && atom.len() >= 2 {
            let string = self.builtin("string", TypeKind::Reference);
            return Ok(self.body.add_const_node(
                NodeKind::Literal,
                string,
                ConstVal::Str(atom[1..atom.len() - 1].to_owned()),
            ));
        }
        Err(FrontendError::Syntax(
            lineno,
            format!("unexpected atom `{}`", atom),
        ))
    }

    fn lower_form(&mut self, lineno: usize, head: &str, args: &[Sexpr]) -> Result<Node> {
        let body_ty = |l: &Lowering, n: Node| l.body.ty_of(n);
        match head {
            "local" | "param" => {
                let name = self.atom_arg(lineno, args, 0)?;
                let symbol = self.symbol(lineno, &name)?;
                let ty = self.body.symbols[symbol].ty;
                let kind = match self.body.symbols[symbol].kind {
                    SymbolKind::Parameter => NodeKind::ParamRef(symbol),
                    _ => NodeKind::LocalRef(symbol),
                };
                Ok(self.body.add_node(kind, ty))
            }
            "field" => {
                let name = self.atom_arg(lineno, args, 0)?;
                let field = self.symbol(lineno, &name)?;
                let ty = self.body.symbols[field].ty;
                let instance = match args.get(1) {
                    Some(expr) => Some(self.lower(lineno, expr)?),
                    None => None,
                };
                Ok(self
                    .body
                    .add_node(NodeKind::FieldRef { instance, field }, ty))
            }
            "prop" => {
                let name = self.atom_arg(lineno, args, 0)?;
                let property = self.symbol(lineno, &name)?;
                let ty = self.body.symbols[property].ty;
                let instance = match args.get(1) {
                    Some(expr) => Some(self.lower(lineno, expr)?),
                    None => None,
                };
                let mut indices = SmallVec::new();
                for expr in args.iter().skip(2) {
                    indices.push(self.lower(lineno, expr)?);
                }
                Ok(self.body.add_node(
                    NodeKind::PropertyRef {
                        instance,
                        property,
                        indices,
                    },
                    ty,
                ))
            }
            "index" => {
                let array = self.lower_arg(lineno, args, 0)?;
                let mut indices = SmallVec::new();
                for expr in args.iter().skip(1) {
                    indices.push(self.lower(lineno, expr)?);
                }
                let object = self.builtin("object", TypeKind::Reference);
                Ok(self.body.add_node(NodeKind::ArrayRef { array, indices }, object))
            }
            "dynindex" => {
                let instance = self.lower_arg(lineno, args, 0)?;
                let mut indices = SmallVec::new();
                for expr in args.iter().skip(1) {
                    indices.push(self.lower(lineno, expr)?);
                }
                let object = self.builtin("object", TypeKind::Reference);
                Ok(self
                    .body
                    .add_node(NodeKind::DynamicIndex { instance, indices }, object))
            }
            "=" => {
                let target = self.lower_arg(lineno, args, 0)?;
                let value = self.lower_arg(lineno, args, 1)?;
                let ty = body_ty(self, target);
                Ok(self.body.add_node(NodeKind::Assign { target, value }, ty))
            }
            "decon" => {
                let targets_expr = match args.first() {
                    Some(Sexpr::List(items)) => items,
                    _ => {
                        return Err(FrontendError::Syntax(
                            lineno,
                            "decon needs a target list".into(),
                        ))
                    }
                };
                let mut targets = SmallVec::new();
                for expr in targets_expr {
                    targets.push(self.lower(lineno, expr)?);
                }
                let value = self.lower_arg(lineno, args, 1)?;
                let ty = body_ty(self, value);
                Ok(self
                    .body
                    .add_node(NodeKind::Deconstruct { targets, value }, ty))
            }
            "??" => {
                let value = self.lower_arg(lineno, args, 0)?;
                let when_null = self.lower_arg(lineno, args, 1)?;
                let ty = body_ty(self, value);
                Ok(self
                    .body
                    .add_node(NodeKind::Coalesce { value, when_null }, ty))
            }
            "?." => {
                let instance = self.lower_arg(lineno, args, 0)?;
                let access = self.lower_arg(lineno, args, 1)?;
                let ty = body_ty(self, access);
                Ok(self
                    .body
                    .add_node(NodeKind::ConditionalAccess { instance, access }, ty))
            }
            "select" => {
                let cond = self.lower_arg(lineno, args, 0)?;
                let when_true = self.lower_arg(lineno, args, 1)?;
                let when_false = self.lower_arg(lineno, args, 2)?;
                let ty = body_ty(self, when_true);
                Ok(self.body.add_node(
                    NodeKind::Conditional {
                        cond,
                        when_true,
                        when_false,
                    },
                    ty,
                ))
            }
            "not" | "neg" => {
                let operand = self.lower_arg(lineno, args, 0)?;
                let op = if head == "not" {
                    UnaryOp::Not
                } else {
                    UnaryOp::Neg
                };
                let ty = body_ty(self, operand);
                Ok(self.body.add_node(NodeKind::Unary { op, operand }, ty))
            }
            "==" | "!=" | "<" | "<=" | ">" | ">=" | "+" | "-" | "*" | "and" | "or" => {
                let op = match head {
                    "==" => BinaryOp::Eq,
                    "!=" => BinaryOp::Ne,
                    "<" => BinaryOp::Lt,
                    "<=" => BinaryOp::Le,
                    ">" => BinaryOp::Gt,
                    ">=" => BinaryOp::Ge,
                    "+" => BinaryOp::Add,
                    "-" => BinaryOp::Sub,
                    "*" => BinaryOp::Mul,
                    "and" => BinaryOp::And,
                    _ => BinaryOp::Or,
                };
                let lhs = self.lower_arg(lineno, args, 0)?;
                let rhs = self.lower_arg(lineno, args, 1)?;
                let ty = if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
                    self.builtin("bool", TypeKind::Value)
                } else {
                    body_ty(self, lhs)
                };
                Ok(self.body.add_node(NodeKind::Binary { op, lhs, rhs }, ty))
            }
            "arg" | "refarg" | "outarg" => {
                let value = self.lower_arg(lineno, args, 0)?;
                let ref_kind = match head {
                    "arg" => RefKind::Value,
                    "refarg" => RefKind::Ref,
                    _ => RefKind::Out,
                };
                let ty = body_ty(self, value);
                Ok(self.body.add_node(NodeKind::Argument { value, ref_kind }, ty))
            }
            "call" => {
                let name = self.atom_arg(lineno, args, 0)?;
                let method = self.symbol(lineno, &name)?;
                let ty = self.body.symbols[method].ty;
                let mut arg_nodes = SmallVec::new();
                for expr in args.iter().skip(1) {
                    arg_nodes.push(self.lower(lineno, expr)?);
                }
                Ok(self.body.add_node(
                    NodeKind::Invoke {
                        method,
                        instance: None,
                        args: arg_nodes,
                    },
                    ty,
                ))
            }
            "new" => {
                let name = self.atom_arg(lineno, args, 0)?;
                let ty = self.ty(lineno, &name)?;
                let mut arg_nodes = SmallVec::new();
                for expr in args.iter().skip(1) {
                    arg_nodes.push(self.lower(lineno, expr)?);
                }
                Ok(self.body.add_node(NodeKind::Creation { args: arg_nodes }, ty))
            }
            "conv" | "convop" => {
                let operand = self.lower_arg(lineno, args, 0)?;
                let ty = body_ty(self, operand);
                Ok(self.body.add_node(
                    NodeKind::Convert {
                        operand,
                        user_defined: head == "convop",
                    },
                    ty,
                ))
            }
            "paren" => {
                let operand = self.lower_arg(lineno, args, 0)?;
                let ty = body_ty(self, operand);
                Ok(self.body.add_node(NodeKind::Paren { operand }, ty))
            }
            "throw" => {
                let operand = match args.first() {
                    Some(expr) => Some(self.lower(lineno, expr)?),
                    None => None,
                };
                let unit = self.builtin("unit", TypeKind::Value);
                Ok(self.body.add_node(NodeKind::Throw { operand }, unit))
            }
            "ret" => {
                let value = match args.first() {
                    Some(expr) => Some(self.lower(lineno, expr)?),
                    None => None,
                };
                let unit = self.builtin("unit", TypeKind::Value);
                Ok(self.body.add_node(NodeKind::Return { value }, unit))
            }
            other => Err(FrontendError::Syntax(
                lineno,
                format!("unknown form `{}`", other),
            )),
        }
    }

    fn atom_arg(&self, lineno: usize, args: &[Sexpr], index: usize) -> Result<String> {
        match args.get(index) {
            Some(Sexpr::Atom(atom)) => Ok(atom.clone()),
            _ => Err(FrontendError::Syntax(
                lineno,
                format!("expected a name at position {}", index),
            )),
        }
    }

    fn lower_arg(&mut self, lineno: usize, args: &[Sexpr], index: usize) -> Result<Node> {
        match args.get(index) {
            Some(expr) => self.lower(lineno, expr),
            None => Err(FrontendError::Syntax(
                lineno,
                format!("missing operand at position {}", index),
            )),
        }
    }
}

fn parse_proc(decls: &Decls, lines: &[(usize, String)]) -> Result<ProcBody> {
    let (header_line, header) = &lines[0];
    let (name, params) = parse_proc_header(*header_line, header)?;
    let mut lowering = Lowering {
        body: ProcBody::new(&name),
        types: FxHashMap::default(),
        symbols: FxHashMap::default(),
        blocks: FxHashMap::default(),
    };

    // Materialize file-level declarations into this procedure's tables.
    for (ty_name, kind) in &decls.types {
        let ty = lowering.body.add_type(ty_name, *kind);
        lowering.types.insert(ty_name.clone(), ty);
    }
    for (field_name, ty_name) in &decls.fields {
        let ty = lowering.ty(*header_line, ty_name)?;
        let symbol = lowering.body.add_symbol(SymbolData::field(field_name, ty));
        lowering.symbols.insert(field_name.clone(), symbol);
    }
    for (prop_name, ty_name, shape) in &decls.props {
        let ty = lowering.ty(*header_line, ty_name)?;
        let symbol = lowering.body.add_symbol(SymbolData {
            name: prop_name.clone(),
            kind: SymbolKind::Property(*shape),
            ty,
            is_static: false,
        });
        lowering.symbols.insert(prop_name.clone(), symbol);
    }
    for (fn_name, kind, ty_name) in &decls.fns {
        let ty = lowering.ty(*header_line, ty_name)?;
        let symbol = lowering
            .body
            .add_symbol(SymbolData::method(fn_name, *kind, ty));
        lowering.symbols.insert(fn_name.clone(), symbol);
    }
    for (param_name, ty_name) in &params {
        let ty = lowering.ty(*header_line, ty_name)?;
        let symbol = lowering.body.add_symbol(SymbolData::param(param_name, ty));
        lowering.symbols.insert(param_name.clone(), symbol);
        lowering.body.params.push(symbol);
    }

    // First pass: declare blocks so edges can reference later blocks.
    for (lineno, line) in &lines[1..] {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.first() == Some(&"block") {
            if words.len() != 3 || words[2] != "{" {
                return Err(FrontendError::Syntax(*lineno, "block NAME {".into()));
            }
            let block = lowering.body.add_block();
            if lowering.blocks.insert(words[1].to_owned(), block).is_some() {
                return Err(FrontendError::Syntax(
                    *lineno,
                    format!("duplicate block `{}`", words[1]),
                ));
            }
            if lowering.blocks.len() == 1 {
                let entry = lowering.body.entry;
                lowering.body.add_edge(entry, block);
            }
        }
    }

    // Second pass: vars, `this`, and block contents.
    let mut current: Option<Block> = None;
    for (lineno, line) in &lines[1..] {
        let lineno = *lineno;
        if line.is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words[0] {
            "}" => {
                current = None;
            }
            "block" => {
                current = Some(lowering.block(lineno, words[1])?);
            }
            "var" if current.is_none() => {
                // `var x: T`
                let rest = line["var".len()..].trim();
                let (sym_name, ty_name) = split_typed_name(lineno, rest, false)?;
                let ty = lowering.ty(lineno, &ty_name)?;
                let symbol = lowering.body.add_symbol(SymbolData::local(&sym_name, ty));
                lowering.symbols.insert(sym_name, symbol);
            }
            word if word.starts_with("this") && current.is_none() => {
                // `this: T`
                let rest = line["this".len()..].trim();
                let (_, ty_name) = split_typed_name(lineno, rest, true)?;
                let ty = lowering.ty(lineno, &ty_name)?;
                let symbol = lowering.body.add_symbol(SymbolData::param("this", ty));
                lowering.body.this_symbol = Some(symbol);
            }
            "jump" => {
                let block = current
                    .ok_or_else(|| FrontendError::Syntax(lineno, "jump outside block".into()))?;
                expect_arity(lineno, &words, 2)?;
                let target = lowering.block(lineno, words[1])?;
                lowering.body.add_edge(block, target);
            }
            "branch" => {
                let block = current
                    .ok_or_else(|| FrontendError::Syntax(lineno, "branch outside block".into()))?;
                let rest = line["branch".len()..].trim();
                let (sexpr, rest) = parse_sexpr(lineno, rest)?;
                let targets: Vec<&str> = rest.split_whitespace().collect();
                expect_arity(lineno, &targets, 2).map_err(|_| {
                    FrontendError::Syntax(lineno, "branch COND TRUE_BLOCK FALSE_BLOCK".into())
                })?;
                let cond = lowering.lower(lineno, &sexpr)?;
                lowering.body.append_stmt(block, cond);
                lowering.body.set_branch(block, cond);
                let t = lowering.block(lineno, targets[0])?;
                let f = lowering.block(lineno, targets[1])?;
                lowering.body.add_edge(block, t);
                lowering.body.add_edge(block, f);
            }
            _ => {
                let block = current.ok_or_else(|| {
                    FrontendError::Syntax(lineno, "statement outside block".into())
                })?;
                let (sexpr, rest) = parse_sexpr(lineno, line)?;
                if !rest.is_empty() {
                    return Err(FrontendError::Syntax(
                        lineno,
                        format!("trailing input `{}`", rest),
                    ));
                }
                let stmt = lowering.lower(lineno, &sexpr)?;
                lowering.body.append_stmt(block, stmt);
            }
        }
    }

    trace!(
        "parse_proc: {} with {} blocks, {} nodes",
        lowering.body.name,
        lowering.body.blocks.len(),
        lowering.body.nodes.len()
    );
    Ok(lowering.body)
}

fn parse_proc_header(lineno: usize, line: &str) -> Result<(String, Vec<(String, String)>)> {
    // proc name(p: T, q: U) {
    let rest = line
        .strip_prefix("proc")
        .ok_or_else(|| FrontendError::Syntax(lineno, "expected `proc`".into()))?
        .trim()
        .strip_suffix('{')
        .ok_or_else(|| FrontendError::Syntax(lineno, "proc header must end with `{`".into()))?
        .trim();
    let open = rest
        .find('(')
        .ok_or_else(|| FrontendError::Syntax(lineno, "missing parameter list".into()))?;
    let close = rest
        .rfind(')')
        .ok_or_else(|| FrontendError::Syntax(lineno, "missing `)`".into()))?;
    let name = rest[..open].trim().to_owned();
    if name.is_empty() {
        return Err(FrontendError::Syntax(lineno, "missing proc name".into()));
    }
    let mut params = vec![];
    let param_text = rest[open + 1..close].trim();
    if !param_text.is_empty() {
        for part in param_text.split(',') {
            let (pname, ptype) = split_typed_name(lineno, part.trim(), false)?;
            params.push((pname, ptype));
        }
    }
    Ok((name, params))
}

/// `name: Type`, or just `: Type` when `bare` (for `this`).
fn split_typed_name(lineno: usize, text: &str, bare: bool) -> Result<(String, String)> {
    let colon = text
        .find(':')
        .ok_or_else(|| FrontendError::Syntax(lineno, format!("expected `name: Type` in `{}`", text)))?;
    let name = text[..colon].trim().to_owned();
    let ty = text[colon + 1..].trim().to_owned();
    if (name.is_empty() && !bare) || ty.is_empty() {
        return Err(FrontendError::Syntax(
            lineno,
            format!("expected `name: Type` in `{}`", text),
        ));
    }
    Ok((name, ty))
}

/// Parse one s-expression from the front of `text`; return it and the rest.
fn parse_sexpr<'a>(lineno: usize, text: &'a str) -> Result<(Sexpr, &'a str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return Err(FrontendError::Syntax(lineno, "expected expression".into()));
    }
    if let Some(rest) = text.strip_prefix('(') {
        let mut items = vec![];
        let mut rest = rest.trim_start();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                return Ok((Sexpr::List(items), after.trim_start()));
            }
            if rest.is_empty() {
                return Err(FrontendError::Syntax(lineno, "unbalanced `(`".into()));
            }
            let (item, next) = parse_sexpr(lineno, rest)?;
            items.push(item);
            rest = next;
        }
    }
    if text.starts_with('"') {
        match text[1..].find('"') {
            Some(end) => {
                let (atom, rest) = text.split_at(end + 2);
                return Ok((Sexpr::Atom(atom.to_owned()), rest.trim_start()));
            }
            None => return Err(FrontendError::Syntax(lineno, "unterminated string".into())),
        }
    }
    let end = text
        .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .unwrap_or(text.len());
    let (atom, rest) = text.split_at(end);
    Ok((Sexpr::Atom(atom.to_owned()), rest.trim_start()))
}

#[cfg(test)]
mod test {
    use super::*;

    const GUARD: &str = r#"
type Widget ref
type unit val
fn use ordinary unit

proc check(p: Widget) {
  block b0 {
    branch (== (param p) null) b1 b2
  }
  block b1 {
    jump exit
  }
  block b2 {
    (call use (arg (param p)))
    jump b1
  }
}
"#;

    #[test]
    fn parses_guarded_use() {
        let procs = parse_module(GUARD).unwrap();
        assert_eq!(procs.len(), 1);
        let body = &procs[0];
        assert_eq!(body.name, "check");
        assert_eq!(body.params.len(), 1);
        // entry + exit + three declared blocks
        assert_eq!(body.blocks.len(), 5);
        // The guard block branches on the comparison.
        let guard = body
            .blocks
            .iter()
            .find(|&b| body.blocks[b].branch.is_some())
            .unwrap();
        assert_eq!(body.blocks[guard].succs.len(), 2);
    }

    #[test]
    fn reports_undefined_names() {
        let text = "proc p() {\n  block b {\n    (local nope)\n  }\n}\n";
        match parse_module(text) {
            Err(FrontendError::Undefined(3, name)) => assert_eq!(name, "nope"),
            other => panic!("expected undefined-name error, got {:?}", other),
        }
    }

    #[test]
    fn reports_unbalanced_input() {
        let text = "proc p() {\n  block b {\n    (paren (local x)\n  }\n}\n";
        assert!(parse_module(text).is_err());
    }

    #[test]
    fn vars_and_constants_lower() {
        let text = r#"
type Widget ref

proc p(w: Widget) {
  var x: Widget
  block b {
    (= (local x) (?? (param w) (new Widget)))
    jump exit
  }
}
"#;
        let procs = parse_module(text).unwrap();
        let body = &procs[0];
        let assigns = body
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Assign { .. }))
            .count();
        assert_eq!(assigns, 1);
        let creations = body
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Creation { .. }))
            .count();
        assert_eq!(creations, 1);
    }
}

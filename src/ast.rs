//! Syntax tree
//!
//! There is a single tree definition for every stage of the pipeline. Each node carries a
//! metadata slot `M`: the parser fills it with [Span]s, stages that do not care about
//! positions use `()`. Which expression variants may appear depends on the stage:
//! [ExpressionKind::Apply] only exists before name resolution, [ExpressionKind::Typed] only
//! after type resolution.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::{fmt, io};

use num_bigint::BigInt;
use ptree::{print_tree, write_tree, Style, TreeItem};

use crate::{IdentPath, Span, Type};

/// Name of the synthetic trailing parameter carrying a function's return type
///
/// Source identifiers can never contain `#`, so no parameter written by the user collides.
pub const RETURN_SLOT: &str = "#return";

/// Per-node metadata
pub trait Annotation: Clone + fmt::Debug + PartialEq {
    /// Source position used to label diagnostics, if the tree carries any
    fn span(&self) -> Option<Span>;
}

impl Annotation for () {
    fn span(&self) -> Option<Span> {
        None
    }
}

impl Annotation for Span {
    fn span(&self) -> Option<Span> {
        Some(*self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program<M = ()> {
    pub module: IdentPath,
    pub declarations: Vec<Declaration<M>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration<M = ()> {
    pub kind: DeclarationKind<M>,
    pub meta: M,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationKind<M = ()> {
    Function(Function<M>),
    Import(IdentPath),
    Type(TypeDecl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    /// No body, linked against an implementation supplied from outside
    External,
}

pub type Attributes = BTreeSet<Attribute>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub typ: Type,
    pub name: String,
}

impl Param {
    pub fn new(typ: Type, name: impl Into<String>) -> Self {
        Self {
            typ,
            name: name.into(),
        }
    }

    pub fn is_return_slot(&self) -> bool {
        self.name == RETURN_SLOT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function<M = ()> {
    pub attributes: Attributes,
    pub name: String,
    /// Formal parameters followed by the [RETURN_SLOT] entry
    pub params: Vec<Param>,
    pub body: Vec<Statement<M>>,
}

impl<M> Function<M> {
    pub fn new(
        attributes: Attributes,
        name: impl Into<String>,
        mut params: Vec<Param>,
        return_type: Type,
        body: Vec<Statement<M>>,
    ) -> Self {
        params.push(Param::new(return_type, RETURN_SLOT));
        Self {
            attributes,
            name: name.into(),
            params,
            body,
        }
    }

    pub fn is_external(&self) -> bool {
        self.attributes.contains(&Attribute::External)
    }

    /// The formal parameters, without the return slot
    pub fn parameters(&self) -> &[Param] {
        match self.params.split_last() {
            Some((last, rest)) if last.is_return_slot() => rest,
            _ => self.params.as_slice(),
        }
    }

    pub fn return_type(&self) -> Type {
        self.params
            .last()
            .filter(|p| p.is_return_slot())
            .map_or(Type::Void, |p| p.typ)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub attributes: Attributes,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement<M = ()> {
    pub kind: StatementKind<M>,
    pub meta: M,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind<M = ()> {
    If {
        condition: Expression<M>,
        then_block: Vec<Statement<M>>,
        else_block: Vec<Statement<M>>,
    },
    Expression(Expression<M>),
    Return(Option<Expression<M>>),
    While {
        condition: Expression<M>,
        body: Vec<Statement<M>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression<M = ()> {
    pub kind: ExpressionKind<M>,
    pub meta: M,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind<M = ()> {
    /// A call to a bare name, as written in the source
    Apply {
        name: String,
        args: Vec<Expression<M>>,
    },
    Binary {
        op: BinaryOperator,
        lhs: Box<Expression<M>>,
        rhs: Box<Expression<M>>,
    },
    /// A call to a fully qualified function
    Call {
        path: IdentPath,
        args: Vec<Expression<M>>,
    },
    Typed {
        typ: Type,
        inner: Box<Expression<M>>,
    },
    Unary {
        op: UnaryOperator,
        inner: Box<Expression<M>>,
    },
    Literal(Value),
    Variable(String),
}

impl<M: Clone> Expression<M> {
    pub fn new(kind: ExpressionKind<M>, meta: M) -> Self {
        Self { kind, meta }
    }

    /// Wrap the expression with its resolved type
    pub fn typed(self, typ: Type) -> Self {
        let meta = self.meta.clone();
        Self {
            kind: ExpressionKind::Typed {
                typ,
                inner: Box::new(self),
            },
            meta,
        }
    }
}

impl<M> Expression<M> {
    /// The resolved type, if this is a typed wrapper
    pub fn resolved_type(&self) -> Option<Type> {
        match &self.kind {
            ExpressionKind::Typed { typ, .. } => Some(*typ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Neg,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Bool(bool),
    Int(BigInt),
    Str(String),
}

impl Value {
    pub fn typ(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Str(_) => Type::Str,
        }
    }
}

impl Program<Span> {
    /// Drop all source positions
    pub fn strip_annotations(self) -> Program {
        self.map_annotations(&mut |_| ())
    }
}

impl<M> Program<M> {
    pub fn map_annotations<N>(self, f: &mut impl FnMut(M) -> N) -> Program<N> {
        Program {
            module: self.module,
            declarations: self
                .declarations
                .into_iter()
                .map(|d| d.map_annotations(f))
                .collect(),
        }
    }

    /// Iterate over the functions declared in this program
    pub fn functions(&self) -> impl Iterator<Item = &Function<M>> {
        self.declarations.iter().filter_map(|d| match &d.kind {
            DeclarationKind::Function(func) => Some(func),
            _ => None,
        })
    }

    /// Iterate over the imported module paths
    pub fn imports(&self) -> impl Iterator<Item = (&IdentPath, &M)> {
        self.declarations.iter().filter_map(|d| match &d.kind {
            DeclarationKind::Import(module) => Some((module, &d.meta)),
            _ => None,
        })
    }
}

impl<M> Declaration<M> {
    pub fn map_annotations<N>(self, f: &mut impl FnMut(M) -> N) -> Declaration<N> {
        let kind = match self.kind {
            DeclarationKind::Function(func) => DeclarationKind::Function(Function {
                attributes: func.attributes,
                name: func.name,
                params: func.params,
                body: map_block(func.body, f),
            }),
            DeclarationKind::Import(module) => DeclarationKind::Import(module),
            DeclarationKind::Type(decl) => DeclarationKind::Type(decl),
        };
        Declaration {
            kind,
            meta: f(self.meta),
        }
    }

    /// The name this declaration introduces, imports introduce none
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            DeclarationKind::Function(func) => Some(&func.name),
            DeclarationKind::Type(decl) => Some(&decl.name),
            DeclarationKind::Import(_) => None,
        }
    }
}

fn map_block<M, N>(block: Vec<Statement<M>>, f: &mut impl FnMut(M) -> N) -> Vec<Statement<N>> {
    block.into_iter().map(|s| s.map_annotations(f)).collect()
}

fn map_exprs<M, N>(exprs: Vec<Expression<M>>, f: &mut impl FnMut(M) -> N) -> Vec<Expression<N>> {
    exprs.into_iter().map(|e| e.map_annotations(f)).collect()
}

impl<M> Statement<M> {
    pub fn map_annotations<N>(self, f: &mut impl FnMut(M) -> N) -> Statement<N> {
        let kind = match self.kind {
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => StatementKind::If {
                condition: condition.map_annotations(f),
                then_block: map_block(then_block, f),
                else_block: map_block(else_block, f),
            },
            StatementKind::Expression(expr) => StatementKind::Expression(expr.map_annotations(f)),
            StatementKind::Return(expr) => {
                StatementKind::Return(expr.map(|e| e.map_annotations(f)))
            }
            StatementKind::While { condition, body } => StatementKind::While {
                condition: condition.map_annotations(f),
                body: map_block(body, f),
            },
        };
        Statement {
            kind,
            meta: f(self.meta),
        }
    }
}

impl<M> Expression<M> {
    pub fn map_annotations<N>(self, f: &mut impl FnMut(M) -> N) -> Expression<N> {
        let kind = match self.kind {
            ExpressionKind::Apply { name, args } => ExpressionKind::Apply {
                name,
                args: map_exprs(args, f),
            },
            ExpressionKind::Binary { op, lhs, rhs } => ExpressionKind::Binary {
                op,
                lhs: Box::new(lhs.map_annotations(f)),
                rhs: Box::new(rhs.map_annotations(f)),
            },
            ExpressionKind::Call { path, args } => ExpressionKind::Call {
                path,
                args: map_exprs(args, f),
            },
            ExpressionKind::Typed { typ, inner } => ExpressionKind::Typed {
                typ,
                inner: Box::new(inner.map_annotations(f)),
            },
            ExpressionKind::Unary { op, inner } => ExpressionKind::Unary {
                op,
                inner: Box::new(inner.map_annotations(f)),
            },
            ExpressionKind::Literal(value) => ExpressionKind::Literal(value),
            ExpressionKind::Variable(name) => ExpressionKind::Variable(name),
        };
        Expression {
            kind,
            meta: f(self.meta),
        }
    }
}

/// Constructors for position-free trees
pub mod build {
    use super::*;

    pub fn program(module: &str, declarations: Vec<Declaration>) -> Program {
        Program {
            module: IdentPath::from_dotted(module).unwrap_or_else(|| IdentPath::single(module)),
            declarations,
        }
    }

    pub fn function(
        name: &str,
        params: &[(Type, &str)],
        return_type: Type,
        body: Vec<Statement>,
    ) -> Declaration {
        let params = params.iter().map(|(t, n)| Param::new(*t, *n)).collect();
        Declaration {
            kind: DeclarationKind::Function(Function::new(
                Attributes::new(),
                name,
                params,
                return_type,
                body,
            )),
            meta: (),
        }
    }

    pub fn external_function(name: &str, params: &[(Type, &str)], return_type: Type) -> Declaration {
        let mut decl = function(name, params, return_type, Vec::new());
        if let DeclarationKind::Function(func) = &mut decl.kind {
            func.attributes.insert(Attribute::External);
        }
        decl
    }

    pub fn import(module: &str) -> Declaration {
        Declaration {
            kind: DeclarationKind::Import(
                IdentPath::from_dotted(module).unwrap_or_else(|| IdentPath::single(module)),
            ),
            meta: (),
        }
    }

    pub fn type_decl(name: &str, external: bool) -> Declaration {
        let mut attributes = Attributes::new();
        if external {
            attributes.insert(Attribute::External);
        }
        Declaration {
            kind: DeclarationKind::Type(TypeDecl {
                attributes,
                name: name.to_string(),
            }),
            meta: (),
        }
    }

    fn stmt(kind: StatementKind) -> Statement {
        Statement { kind, meta: () }
    }

    pub fn if_(condition: Expression, then_block: Vec<Statement>, else_block: Vec<Statement>) -> Statement {
        stmt(StatementKind::If {
            condition,
            then_block,
            else_block,
        })
    }

    pub fn while_(condition: Expression, body: Vec<Statement>) -> Statement {
        stmt(StatementKind::While { condition, body })
    }

    pub fn ret(value: Option<Expression>) -> Statement {
        stmt(StatementKind::Return(value))
    }

    pub fn effect(expr: Expression) -> Statement {
        stmt(StatementKind::Expression(expr))
    }

    fn expr(kind: ExpressionKind) -> Expression {
        Expression { kind, meta: () }
    }

    pub fn int(value: i64) -> Expression {
        expr(ExpressionKind::Literal(Value::Int(BigInt::from(value))))
    }

    pub fn big_int(value: BigInt) -> Expression {
        expr(ExpressionKind::Literal(Value::Int(value)))
    }

    pub fn boolean(value: bool) -> Expression {
        expr(ExpressionKind::Literal(Value::Bool(value)))
    }

    pub fn string(value: &str) -> Expression {
        expr(ExpressionKind::Literal(Value::Str(value.to_string())))
    }

    pub fn var(name: &str) -> Expression {
        expr(ExpressionKind::Variable(name.to_string()))
    }

    pub fn apply(name: &str, args: Vec<Expression>) -> Expression {
        expr(ExpressionKind::Apply {
            name: name.to_string(),
            args,
        })
    }

    pub fn call(path: &str, args: Vec<Expression>) -> Expression {
        expr(ExpressionKind::Call {
            path: IdentPath::from_dotted(path).unwrap_or_else(|| IdentPath::single(path)),
            args,
        })
    }

    pub fn binary(op: BinaryOperator, lhs: Expression, rhs: Expression) -> Expression {
        expr(ExpressionKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn neg(inner: Expression) -> Expression {
        expr(ExpressionKind::Unary {
            op: UnaryOperator::Neg,
            inner: Box::new(inner),
        })
    }
}

// canonical rendering

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::External => write!(f, "External"),
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Rem => "%",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEq => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEq => ">=",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
        };
        f.write_str(op)
    }
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOperator::Neg => write!(f, "-"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

fn write_attributes(f: &mut fmt::Formatter<'_>, attributes: &Attributes) -> fmt::Result {
    for attribute in attributes {
        write!(f, "@{attribute} ")?;
    }
    Ok(())
}

fn write_args<M>(f: &mut fmt::Formatter<'_>, args: &[Expression<M>]) -> fmt::Result {
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

fn write_operand<M>(f: &mut fmt::Formatter<'_>, operand: &Expression<M>) -> fmt::Result {
    match operand.kind {
        ExpressionKind::Binary { .. } => write!(f, "({operand})"),
        _ => write!(f, "{operand}"),
    }
}

fn write_block<M>(f: &mut fmt::Formatter<'_>, block: &[Statement<M>], depth: usize) -> fmt::Result {
    for stmt in block {
        write_statement(f, stmt, depth)?;
    }
    Ok(())
}

fn write_statement<M>(f: &mut fmt::Formatter<'_>, stmt: &Statement<M>, depth: usize) -> fmt::Result {
    let indent = "    ".repeat(depth);
    match &stmt.kind {
        StatementKind::If {
            condition,
            then_block,
            else_block,
        } => {
            writeln!(f, "{indent}if {condition}:")?;
            write_block(f, then_block, depth + 1)?;
            if !else_block.is_empty() {
                writeln!(f, "{indent}else:")?;
                write_block(f, else_block, depth + 1)?;
            }
            Ok(())
        }
        StatementKind::Expression(expr) => writeln!(f, "{indent}{expr}"),
        StatementKind::Return(Some(expr)) => writeln!(f, "{indent}return {expr}"),
        StatementKind::Return(None) => writeln!(f, "{indent}return"),
        StatementKind::While { condition, body } => {
            writeln!(f, "{indent}while {condition}:")?;
            write_block(f, body, depth + 1)
        }
    }
}

impl<M> fmt::Display for Program<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.module)?;
        for decl in &self.declarations {
            write!(f, "\n{decl}")?;
        }
        Ok(())
    }
}

impl<M> fmt::Display for Function<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_attributes(f, &self.attributes)?;
        write!(f, "{} :: ", self.name)?;
        for param in self.parameters() {
            write!(f, "{} -> {} -> ", param.typ, param.name)?;
        }
        write!(f, "{}", self.return_type())?;
        if self.body.is_empty() {
            return writeln!(f);
        }
        writeln!(f, ":")?;
        write_block(f, &self.body, 1)
    }
}

impl<M> fmt::Display for Declaration<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DeclarationKind::Function(func) => write!(f, "{func}"),
            DeclarationKind::Import(module) => writeln!(f, "import {module}"),
            DeclarationKind::Type(decl) => {
                write_attributes(f, &decl.attributes)?;
                writeln!(f, "type {}", decl.name)
            }
        }
    }
}

impl<M> fmt::Display for Statement<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_statement(f, self, 0)
    }
}

impl<M> fmt::Display for Expression<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExpressionKind::Apply { name, args } => {
                f.write_str(name)?;
                write_args(f, args)
            }
            ExpressionKind::Binary { op, lhs, rhs } => {
                write_operand(f, lhs)?;
                write!(f, " {op} ")?;
                write_operand(f, rhs)
            }
            ExpressionKind::Call { path, args } => {
                write!(f, "{path}")?;
                write_args(f, args)
            }
            ExpressionKind::Typed { typ, inner } => write!(f, "({inner} :: {typ})"),
            ExpressionKind::Unary { op, inner } => {
                write!(f, "{op}")?;
                write_operand(f, inner)
            }
            ExpressionKind::Literal(value) => write!(f, "{value}"),
            ExpressionKind::Variable(name) => f.write_str(name),
        }
    }
}

// tree view

/// A borrowed view of any tree node, so a whole program can be walked by [ptree]
#[derive(Debug)]
pub enum TreeNode<'a, M> {
    Declaration(&'a Declaration<M>),
    Block(&'static str, &'a [Statement<M>]),
    Statement(&'a Statement<M>),
    Expression(&'a Expression<M>),
}

impl<M> Clone for TreeNode<'_, M> {
    fn clone(&self) -> Self {
        match *self {
            TreeNode::Declaration(d) => TreeNode::Declaration(d),
            TreeNode::Block(label, b) => TreeNode::Block(label, b),
            TreeNode::Statement(s) => TreeNode::Statement(s),
            TreeNode::Expression(e) => TreeNode::Expression(e),
        }
    }
}

impl<M> Program<M> {
    pub fn pretty_print(&self) -> io::Result<()> {
        for decl in &self.declarations {
            print_tree(&TreeNode::Declaration(decl))?;
        }
        Ok(())
    }

    pub fn write_tree(&self, mut out: impl io::Write) -> io::Result<()> {
        for decl in &self.declarations {
            write_tree(&TreeNode::Declaration(decl), &mut out)?;
        }
        Ok(())
    }
}

impl<M> TreeItem for TreeNode<'_, M> {
    type Child = Self;

    fn write_self<W: io::Write>(&self, f: &mut W, style: &Style) -> io::Result<()> {
        let label = match self {
            TreeNode::Declaration(decl) => match &decl.kind {
                DeclarationKind::Function(func) => {
                    let signature = func.to_string();
                    let signature = signature.lines().next().unwrap_or_default();
                    signature.trim_end_matches(':').to_string()
                }
                DeclarationKind::Import(_) | DeclarationKind::Type(_) => {
                    decl.to_string().trim_end().to_string()
                }
            },
            TreeNode::Block(label, _) => label.to_string(),
            TreeNode::Statement(stmt) => match &stmt.kind {
                StatementKind::If { .. } => String::from("IF"),
                StatementKind::Expression(_) => String::from("EFFECT"),
                StatementKind::Return(_) => String::from("RETURN"),
                StatementKind::While { .. } => String::from("WHILE"),
            },
            TreeNode::Expression(expr) => match &expr.kind {
                ExpressionKind::Apply { name, .. } => format!("APPLY {name}"),
                ExpressionKind::Binary { op, .. } => op.to_string(),
                ExpressionKind::Call { path, .. } => format!("CALL {path}"),
                ExpressionKind::Typed { typ, .. } => format!(":: {typ}"),
                ExpressionKind::Unary { op, .. } => op.to_string(),
                ExpressionKind::Literal(value) => value.to_string(),
                ExpressionKind::Variable(name) => name.clone(),
            },
        };
        write!(f, "{}", style.paint(label))
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        let children = match self {
            TreeNode::Declaration(decl) => match &decl.kind {
                DeclarationKind::Function(func) => {
                    func.body.iter().map(TreeNode::Statement).collect()
                }
                DeclarationKind::Import(_) | DeclarationKind::Type(_) => vec![],
            },
            TreeNode::Block(_, block) => block.iter().map(TreeNode::Statement).collect(),
            TreeNode::Statement(stmt) => match &stmt.kind {
                StatementKind::If {
                    condition,
                    then_block,
                    else_block,
                } => vec![
                    TreeNode::Expression(condition),
                    TreeNode::Block("THEN", then_block),
                    TreeNode::Block("ELSE", else_block),
                ],
                StatementKind::Expression(expr) => vec![TreeNode::Expression(expr)],
                StatementKind::Return(expr) => expr.iter().map(TreeNode::Expression).collect(),
                StatementKind::While { condition, body } => vec![
                    TreeNode::Expression(condition),
                    TreeNode::Block("DO", body),
                ],
            },
            TreeNode::Expression(expr) => match &expr.kind {
                ExpressionKind::Apply { args, .. } | ExpressionKind::Call { args, .. } => {
                    args.iter().map(TreeNode::Expression).collect()
                }
                ExpressionKind::Binary { lhs, rhs, .. } => {
                    vec![TreeNode::Expression(lhs), TreeNode::Expression(rhs)]
                }
                ExpressionKind::Typed { inner, .. } | ExpressionKind::Unary { inner, .. } => {
                    vec![TreeNode::Expression(inner)]
                }
                ExpressionKind::Literal(_) | ExpressionKind::Variable(_) => vec![],
            },
        };
        Cow::from(children)
    }
}

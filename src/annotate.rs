//! Type resolution
//!
//! Rebuilds a type checked program so that every expression is wrapped in an
//! [ExpressionKind::Typed] node carrying its type. Code generation relies on these wrappers.
//! The input must have passed [crate::type_check]: any rule violation found here is reported
//! as an [InternalError].

use std::collections::HashMap;

use tracing::instrument;

use crate::ast::*;
use crate::environment::Environment;
use crate::error::InternalError;
use crate::type_checking::{binary_result, unary_result};
use crate::Type;

type Result<T> = std::result::Result<T, InternalError>;

/// Wrap every expression of a checked program with its type
#[instrument(skip_all, fields(module = %program.module))]
pub fn annotate<M: Annotation>(program: Program<M>, env: &Environment) -> Result<Program<M>> {
    let declarations = program
        .declarations
        .into_iter()
        .map(|decl| {
            let kind = match decl.kind {
                DeclarationKind::Function(func) => {
                    let annotator = Annotator {
                        env,
                        vars: func
                            .parameters()
                            .iter()
                            .map(|p| (p.name.clone(), p.typ))
                            .collect(),
                    };
                    let body = annotator.annotate_block(func.body)?;
                    DeclarationKind::Function(Function { body, ..func })
                }
                kind => kind,
            };
            Ok(Declaration {
                kind,
                meta: decl.meta,
            })
        })
        .collect::<Result<_>>()?;

    Ok(Program {
        module: program.module,
        declarations,
    })
}

struct Annotator<'env> {
    env: &'env Environment,
    vars: HashMap<String, Type>,
}

impl Annotator<'_> {
    fn annotate_block<M: Annotation>(&self, block: Vec<Statement<M>>) -> Result<Vec<Statement<M>>> {
        block
            .into_iter()
            .map(|stmt| self.annotate_statement(stmt))
            .collect()
    }

    fn annotate_statement<M: Annotation>(&self, stmt: Statement<M>) -> Result<Statement<M>> {
        let kind = match stmt.kind {
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => StatementKind::If {
                condition: self.annotate_expression(condition)?,
                then_block: self.annotate_block(then_block)?,
                else_block: self.annotate_block(else_block)?,
            },
            StatementKind::Expression(expr) => {
                StatementKind::Expression(self.annotate_expression(expr)?)
            }
            StatementKind::Return(expr) => {
                StatementKind::Return(expr.map(|e| self.annotate_expression(e)).transpose()?)
            }
            StatementKind::While { condition, body } => StatementKind::While {
                condition: self.annotate_expression(condition)?,
                body: self.annotate_block(body)?,
            },
        };
        Ok(Statement {
            kind,
            meta: stmt.meta,
        })
    }

    fn annotate_expression<M: Annotation>(&self, expr: Expression<M>) -> Result<Expression<M>> {
        let meta = expr.meta;
        let (kind, typ) = match expr.kind {
            ExpressionKind::Apply { name, .. } => {
                return Err(InternalError::new(format!(
                    "call to unresolved name `{name}` reached type resolution"
                )))
            }
            // already annotated, e.g. by an earlier run
            ExpressionKind::Typed { inner, .. } => return self.annotate_expression(*inner),
            ExpressionKind::Binary { op, lhs, rhs } => {
                let lhs = self.annotate_expression(*lhs)?;
                let rhs = self.annotate_expression(*rhs)?;
                let typ = binary_result(op, type_of(&lhs)?, type_of(&rhs)?).map_err(|m| {
                    InternalError::new(format!(
                        "operand of `{op}` has type {}, expected {}",
                        m.actual, m.expected
                    ))
                })?;
                let kind = ExpressionKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
                (kind, typ)
            }
            ExpressionKind::Call { path, args } => {
                let symbol = self.env.function(&path).ok_or_else(|| {
                    InternalError::new(format!("call to `{path}` is missing from the environment"))
                })?;
                let params = symbol.signature.parameters();
                if params.len() != args.len() {
                    return Err(InternalError::new(format!(
                        "`{path}` called with {} arguments instead of {}",
                        args.len(),
                        params.len()
                    )));
                }
                let args = args
                    .into_iter()
                    .zip(params)
                    .map(|(arg, param)| {
                        let arg = self.annotate_expression(arg)?;
                        let actual = type_of(&arg)?;
                        if !actual.is_compatible(param.typ) {
                            return Err(InternalError::new(format!(
                                "argument `{}` of `{path}` has type {actual}, expected {}",
                                param.name, param.typ
                            )));
                        }
                        Ok(arg)
                    })
                    .collect::<Result<_>>()?;
                let typ = symbol.signature.return_type();
                (ExpressionKind::Call { path, args }, typ)
            }
            ExpressionKind::Unary { op, inner } => {
                let inner = self.annotate_expression(*inner)?;
                let typ = unary_result(op, type_of(&inner)?).map_err(|m| {
                    InternalError::new(format!(
                        "operand of unary `{op}` has type {}, expected {}",
                        m.actual, m.expected
                    ))
                })?;
                let kind = ExpressionKind::Unary {
                    op,
                    inner: Box::new(inner),
                };
                (kind, typ)
            }
            ExpressionKind::Literal(value) => {
                let typ = value.typ();
                (ExpressionKind::Literal(value), typ)
            }
            ExpressionKind::Variable(name) => {
                let typ = *self.vars.get(&name).ok_or_else(|| {
                    InternalError::new(format!("variable `{name}` reached type resolution unbound"))
                })?;
                (ExpressionKind::Variable(name), typ)
            }
        };
        Ok(Expression { kind, meta }.typed(typ))
    }
}

fn type_of<M>(expr: &Expression<M>) -> Result<Type> {
    expr.resolved_type()
        .ok_or_else(|| InternalError::new(format!("`{expr}` is missing its type")))
}

//! Name resolution
//!
//! Rewrites every call to a bare name into a call to a fully qualified function and checks
//! that variables refer to parameters of the enclosing function. The main interface is the
//! [resolve] function.

use std::collections::HashSet;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{instrument, trace};

use crate::ast::*;
use crate::environment::{Environment, Origin};
use crate::{IdentPath, Span};

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("`{name}` is not declared")]
    UndeclaredReference {
        name: String,

        #[label("not found in this scope")]
        span: Option<Span>,
    },

    #[error("`{name}` is ambiguous")]
    #[diagnostic(help("It is exported by each of: {candidates:?}"))]
    AmbiguousReference {
        name: String,
        candidates: Vec<String>,

        #[label("ambiguous name")]
        span: Option<Span>,
    },

    #[error("The module `{module}` is imported, but missing from the environment")]
    UnresolvedImport {
        module: IdentPath,

        #[label("this import")]
        span: Option<Span>,
    },
}

type Result<T> = std::result::Result<T, ResolveError>;

/// Qualify all calls of the program
#[instrument(skip_all, fields(module = %program.module))]
pub fn resolve<M: Annotation>(program: Program<M>, env: &Environment) -> Result<Program<M>> {
    for (module, meta) in program.imports() {
        if !env.is_imported(module) {
            return Err(ResolveError::UnresolvedImport {
                module: module.clone(),
                span: meta.span(),
            });
        }
    }

    let declarations = program
        .declarations
        .into_iter()
        .map(|decl| resolve_declaration(decl, env))
        .collect::<Result<_>>()?;

    Ok(Program {
        module: program.module,
        declarations,
    })
}

fn resolve_declaration<M: Annotation>(
    decl: Declaration<M>,
    env: &Environment,
) -> Result<Declaration<M>> {
    let kind = match decl.kind {
        DeclarationKind::Function(func) => {
            let scope = Scope {
                env,
                params: func
                    .parameters()
                    .iter()
                    .map(|p| p.name.clone())
                    .collect(),
            };
            let body = scope.resolve_block(func.body)?;
            DeclarationKind::Function(Function { body, ..func })
        }
        kind @ (DeclarationKind::Import(_) | DeclarationKind::Type(_)) => kind,
    };
    Ok(Declaration {
        kind,
        meta: decl.meta,
    })
}

/// The names visible inside one function body
struct Scope<'env> {
    env: &'env Environment,
    params: HashSet<String>,
}

impl Scope<'_> {
    fn resolve_block<M: Annotation>(&self, block: Vec<Statement<M>>) -> Result<Vec<Statement<M>>> {
        block
            .into_iter()
            .map(|stmt| self.resolve_statement(stmt))
            .collect()
    }

    fn resolve_statement<M: Annotation>(&self, stmt: Statement<M>) -> Result<Statement<M>> {
        let kind = match stmt.kind {
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => StatementKind::If {
                condition: self.resolve_expression(condition)?,
                then_block: self.resolve_block(then_block)?,
                else_block: self.resolve_block(else_block)?,
            },
            StatementKind::Expression(expr) => {
                StatementKind::Expression(self.resolve_expression(expr)?)
            }
            StatementKind::Return(expr) => {
                StatementKind::Return(expr.map(|e| self.resolve_expression(e)).transpose()?)
            }
            StatementKind::While { condition, body } => StatementKind::While {
                condition: self.resolve_expression(condition)?,
                body: self.resolve_block(body)?,
            },
        };
        Ok(Statement {
            kind,
            meta: stmt.meta,
        })
    }

    fn resolve_expressions<M: Annotation>(
        &self,
        exprs: Vec<Expression<M>>,
    ) -> Result<Vec<Expression<M>>> {
        exprs
            .into_iter()
            .map(|e| self.resolve_expression(e))
            .collect()
    }

    fn resolve_expression<M: Annotation>(&self, expr: Expression<M>) -> Result<Expression<M>> {
        let kind = match expr.kind {
            ExpressionKind::Apply { name, args } => {
                let path = self.lookup_function(&name, &expr.meta)?;
                trace!(%name, %path, "resolved call");
                ExpressionKind::Call {
                    path,
                    args: self.resolve_expressions(args)?,
                }
            }
            ExpressionKind::Call { path, args } => {
                if self.env.function(&path).is_none() {
                    return Err(ResolveError::UndeclaredReference {
                        name: path.dotted(),
                        span: expr.meta.span(),
                    });
                }
                ExpressionKind::Call {
                    path,
                    args: self.resolve_expressions(args)?,
                }
            }
            ExpressionKind::Binary { op, lhs, rhs } => ExpressionKind::Binary {
                op,
                lhs: Box::new(self.resolve_expression(*lhs)?),
                rhs: Box::new(self.resolve_expression(*rhs)?),
            },
            ExpressionKind::Typed { typ, inner } => ExpressionKind::Typed {
                typ,
                inner: Box::new(self.resolve_expression(*inner)?),
            },
            ExpressionKind::Unary { op, inner } => ExpressionKind::Unary {
                op,
                inner: Box::new(self.resolve_expression(*inner)?),
            },
            ExpressionKind::Literal(value) => ExpressionKind::Literal(value),
            ExpressionKind::Variable(name) => {
                if !self.params.contains(&name) {
                    return Err(ResolveError::UndeclaredReference {
                        name,
                        span: expr.meta.span(),
                    });
                }
                ExpressionKind::Variable(name)
            }
        };
        Ok(Expression {
            kind,
            meta: expr.meta,
        })
    }

    /// Own functions shadow imported ones; an imported name must come from a single module
    fn lookup_function<M: Annotation>(&self, name: &str, meta: &M) -> Result<IdentPath> {
        let own = self.env.module().child(name);
        if self
            .env
            .function(&own)
            .is_some_and(|symbol| symbol.origin == Origin::Own)
        {
            return Ok(own);
        }

        let mut candidates: Vec<&IdentPath> = self
            .env
            .imported_functions()
            .filter(|(path, _)| path.name() == name)
            .map(|(path, _)| path)
            .collect();

        match candidates.len() {
            0 => Err(ResolveError::UndeclaredReference {
                name: name.to_string(),
                span: meta.span(),
            }),
            1 => Ok(candidates.remove(0).clone()),
            _ => Err(ResolveError::AmbiguousReference {
                name: name.to_string(),
                candidates: candidates.iter().map(|p| p.dotted()).collect(),
                span: meta.span(),
            }),
        }
    }
}

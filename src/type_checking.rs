//! Type checking
//!
//! Verifies every statement and expression of a resolved program. The main interface is the
//! [type_check] function. The operator rules live in [binary_result] and [unary_result] so
//! that the annotation pass computes exactly the same types.

use std::collections::HashMap;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ast::*;
use crate::environment::Environment;
use crate::error::InternalError;
use crate::{IdentPath, Span, Type};

#[derive(Debug, Error, Diagnostic)]
pub enum TypeCheckError {
    #[error("Mismatched types in {construct}: expected {expected}, found {actual}")]
    TypeMismatch {
        construct: String,
        expected: Type,
        actual: Type,

        #[label("here")]
        span: Option<Span>,
    },

    #[error("`{callee}` takes {expected} argument(s), but {actual} were supplied")]
    ArityMismatch {
        callee: IdentPath,
        expected: usize,
        actual: usize,

        #[label("in this call")]
        span: Option<Span>,
    },

    #[error("Parameter `{name}` of `{function}` has type Void")]
    #[diagnostic(help("Parameters must carry a value"))]
    VoidParameter {
        function: String,
        name: String,

        #[label("in this declaration")]
        span: Option<Span>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Internal(#[from] InternalError),
}

type Result<T> = std::result::Result<T, TypeCheckError>;

/// The operand of an operator expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Lhs,
    Rhs,
}

/// An operand whose type violates the operator's rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OperandMismatch {
    pub side: Side,
    pub expected: Type,
    pub actual: Type,
}

fn expect(side: Side, expected: Type, actual: Type) -> std::result::Result<(), OperandMismatch> {
    if actual.is_compatible(expected) {
        Ok(())
    } else {
        Err(OperandMismatch {
            side,
            expected,
            actual,
        })
    }
}

/// Operators compute on the value itself, so the top type does not satisfy them
fn expect_exact(
    side: Side,
    expected: Type,
    actual: Type,
) -> std::result::Result<(), OperandMismatch> {
    if actual == expected {
        Ok(())
    } else {
        Err(OperandMismatch {
            side,
            expected,
            actual,
        })
    }
}

/// Anything but the result of a void call
fn expect_value(side: Side, actual: Type) -> std::result::Result<(), OperandMismatch> {
    if actual == Type::Void {
        Err(OperandMismatch {
            side,
            expected: Type::Any,
            actual,
        })
    } else {
        Ok(())
    }
}

/// The type of `lhs op rhs`
pub(crate) fn binary_result(
    op: BinaryOperator,
    lhs: Type,
    rhs: Type,
) -> std::result::Result<Type, OperandMismatch> {
    match op {
        BinaryOperator::Mul
        | BinaryOperator::Div
        | BinaryOperator::Rem
        | BinaryOperator::Add
        | BinaryOperator::Sub => {
            expect_exact(Side::Lhs, Type::Int, lhs)?;
            expect_exact(Side::Rhs, Type::Int, rhs)?;
            Ok(Type::Int)
        }
        BinaryOperator::Less
        | BinaryOperator::LessEq
        | BinaryOperator::Greater
        | BinaryOperator::GreaterEq => {
            expect_exact(Side::Lhs, Type::Int, lhs)?;
            expect_exact(Side::Rhs, Type::Int, rhs)?;
            Ok(Type::Bool)
        }
        BinaryOperator::Equal | BinaryOperator::NotEqual => {
            expect_value(Side::Lhs, lhs)?;
            expect_value(Side::Rhs, rhs)?;
            expect(Side::Rhs, lhs, rhs)?;
            Ok(Type::Bool)
        }
    }
}

/// The type of `op inner`
pub(crate) fn unary_result(
    op: UnaryOperator,
    inner: Type,
) -> std::result::Result<Type, OperandMismatch> {
    match op {
        UnaryOperator::Neg => {
            expect_exact(Side::Rhs, Type::Int, inner)?;
            Ok(Type::Int)
        }
    }
}

/// Check all function bodies of a resolved program
#[instrument(skip_all, fields(module = %program.module))]
pub fn type_check<M: Annotation>(program: &Program<M>, env: &Environment) -> Result<()> {
    for decl in &program.declarations {
        let DeclarationKind::Function(func) = &decl.kind else {
            continue;
        };
        if let Some(param) = func.parameters().iter().find(|p| p.typ == Type::Void) {
            return Err(TypeCheckError::VoidParameter {
                function: func.name.clone(),
                name: param.name.clone(),
                span: decl.meta.span(),
            });
        }
        let checker = FunctionChecker::new(env, func);
        checker.check_block(&func.body)?;
        debug!(function = %func.name, "type checked");
    }
    Ok(())
}

/// The typing context of one function: its parameters and declared return type
pub(crate) struct FunctionChecker<'a> {
    env: &'a Environment,
    vars: HashMap<&'a str, Type>,
    return_type: Type,
}

impl<'a> FunctionChecker<'a> {
    pub(crate) fn new<M>(env: &'a Environment, func: &'a Function<M>) -> Self {
        Self {
            env,
            vars: func
                .parameters()
                .iter()
                .map(|p| (p.name.as_str(), p.typ))
                .collect(),
            return_type: func.return_type(),
        }
    }

    fn check_block<M: Annotation>(&self, block: &[Statement<M>]) -> Result<()> {
        block.iter().try_for_each(|stmt| self.check_statement(stmt))
    }

    fn check_condition<M: Annotation>(&self, condition: &Expression<M>, keyword: &str) -> Result<()> {
        let actual = self.infer(condition)?;
        if actual != Type::Bool {
            return Err(TypeCheckError::TypeMismatch {
                construct: format!("condition of `{keyword}`"),
                expected: Type::Bool,
                actual,
                span: condition.meta.span(),
            });
        }
        Ok(())
    }

    fn check_statement<M: Annotation>(&self, stmt: &Statement<M>) -> Result<()> {
        match &stmt.kind {
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => {
                self.check_condition(condition, "if")?;
                self.check_block(then_block)?;
                self.check_block(else_block)
            }
            StatementKind::Expression(expr) => self.infer(expr).map(|_| ()),
            StatementKind::Return(Some(expr)) => {
                let actual = self.infer(expr)?;
                let void_as_value = actual == Type::Void && self.return_type != Type::Void;
                if void_as_value || !actual.is_compatible(self.return_type) {
                    return Err(TypeCheckError::TypeMismatch {
                        construct: String::from("return value"),
                        expected: self.return_type,
                        actual,
                        span: expr.meta.span(),
                    });
                }
                Ok(())
            }
            StatementKind::Return(None) => {
                if !Type::Void.is_compatible(self.return_type) {
                    return Err(TypeCheckError::TypeMismatch {
                        construct: String::from("`return` without a value"),
                        expected: self.return_type,
                        actual: Type::Void,
                        span: stmt.meta.span(),
                    });
                }
                Ok(())
            }
            StatementKind::While { condition, body } => {
                self.check_condition(condition, "while")?;
                self.check_block(body)
            }
        }
    }

    /// Compute the type of an expression, verifying all of its subexpressions
    pub(crate) fn infer<M: Annotation>(&self, expr: &Expression<M>) -> Result<Type> {
        match &expr.kind {
            ExpressionKind::Apply { name, .. } => Err(InternalError::new(format!(
                "call to unresolved name `{name}` reached type checking"
            ))
            .into()),
            ExpressionKind::Binary { op, lhs, rhs } => {
                let lhs_type = self.infer(lhs)?;
                let rhs_type = self.infer(rhs)?;
                binary_result(*op, lhs_type, rhs_type).map_err(|mismatch| {
                    let operand = match mismatch.side {
                        Side::Lhs => lhs,
                        Side::Rhs => rhs,
                    };
                    TypeCheckError::TypeMismatch {
                        construct: format!("operand of `{op}`"),
                        expected: mismatch.expected,
                        actual: mismatch.actual,
                        span: operand.meta.span(),
                    }
                })
            }
            ExpressionKind::Call { path, args } => {
                let symbol = self.env.function(path).ok_or_else(|| {
                    InternalError::new(format!("call to `{path}` is missing from the environment"))
                })?;
                let params = symbol.signature.parameters();
                if params.len() != args.len() {
                    return Err(TypeCheckError::ArityMismatch {
                        callee: path.clone(),
                        expected: params.len(),
                        actual: args.len(),
                        span: expr.meta.span(),
                    });
                }
                for (i, (arg, param)) in args.iter().zip(params).enumerate() {
                    let actual = self.infer(arg)?;
                    if actual == Type::Void || !actual.is_compatible(param.typ) {
                        return Err(TypeCheckError::TypeMismatch {
                            construct: format!("argument {} of `{path}`", i + 1),
                            expected: param.typ,
                            actual,
                            span: arg.meta.span(),
                        });
                    }
                }
                Ok(symbol.signature.return_type())
            }
            ExpressionKind::Typed { typ, inner } => {
                let actual = self.infer(inner)?;
                if actual != *typ {
                    return Err(InternalError::new(format!(
                        "`{inner}` is annotated with {typ}, but has type {actual}"
                    ))
                    .into());
                }
                Ok(*typ)
            }
            ExpressionKind::Unary { op, inner } => {
                let actual = self.infer(inner)?;
                unary_result(*op, actual).map_err(|mismatch| TypeCheckError::TypeMismatch {
                    construct: format!("operand of unary `{op}`"),
                    expected: mismatch.expected,
                    actual: mismatch.actual,
                    span: inner.meta.span(),
                })
            }
            ExpressionKind::Literal(value) => Ok(value.typ()),
            ExpressionKind::Variable(name) => {
                self.vars.get(name.as_str()).copied().ok_or_else(|| {
                    InternalError::new(format!("variable `{name}` was not checked by resolution"))
                        .into()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::environment::NoImports;

    fn check(decls: Vec<Declaration>) -> Result<()> {
        let p = program("m", decls);
        let env = Environment::build(&p, &NoImports).unwrap();
        type_check(&p, &env)
    }

    fn check_body(return_type: Type, body: Vec<Statement>) -> Result<()> {
        check(vec![function(
            "f",
            &[(Type::Int, "x"), (Type::Any, "h")],
            return_type,
            body,
        )])
    }

    fn assert_mismatch(result: Result<()>, want_expected: Type, want_actual: Type) {
        match result {
            Err(TypeCheckError::TypeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!((expected, actual), (want_expected, want_actual));
            }
            other => panic!("expected a type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn non_boolean_condition() {
        assert_mismatch(
            check_body(Type::Void, vec![if_(int(5), vec![], vec![])]),
            Type::Bool,
            Type::Int,
        );
        assert_mismatch(
            check_body(Type::Void, vec![while_(string("yes"), vec![])]),
            Type::Bool,
            Type::Str,
        );
    }

    #[test]
    fn bare_return_in_int_function() {
        assert_mismatch(check_body(Type::Int, vec![ret(None)]), Type::Int, Type::Void);
    }

    #[test]
    fn wrong_return_value() {
        assert_mismatch(
            check_body(Type::Int, vec![ret(Some(boolean(true)))]),
            Type::Int,
            Type::Bool,
        );
    }

    #[test]
    fn int_plus_string() {
        let body = vec![effect(binary(BinaryOperator::Add, int(1), string("a")))];
        assert_mismatch(check_body(Type::Void, body), Type::Int, Type::Str);
    }

    #[test]
    fn equality_requires_same_type() {
        let body = vec![ret(Some(binary(BinaryOperator::Equal, var("x"), boolean(false))))];
        assert_mismatch(check_body(Type::Bool, body), Type::Int, Type::Bool);

        let body = vec![ret(Some(binary(BinaryOperator::NotEqual, var("h"), string("s"))))];
        check_body(Type::Bool, body).unwrap();
    }

    #[test]
    fn negation_requires_int() {
        let body = vec![ret(Some(neg(boolean(true))))];
        assert_mismatch(check_body(Type::Int, body), Type::Int, Type::Bool);
    }

    #[test]
    fn top_type_is_compatible_at_boundaries() {
        let body = vec![
            effect(call("m.f", vec![var("h"), boolean(true)])),
            if_(
                binary(BinaryOperator::Equal, var("h"), var("x")),
                vec![ret(Some(var("h")))],
                vec![],
            ),
            ret(Some(var("x"))),
        ];
        check_body(Type::Int, body).unwrap();
    }

    #[test]
    fn operators_need_concrete_operands() {
        let body = vec![ret(Some(binary(BinaryOperator::Mul, var("h"), var("x"))))];
        assert_mismatch(check_body(Type::Int, body), Type::Int, Type::Any);

        let body = vec![ret(Some(binary(BinaryOperator::Less, var("x"), var("h"))))];
        assert_mismatch(check_body(Type::Bool, body), Type::Int, Type::Any);

        let body = vec![ret(Some(neg(var("h"))))];
        assert_mismatch(check_body(Type::Int, body), Type::Int, Type::Any);
    }

    #[test]
    fn untyped_condition() {
        assert_mismatch(
            check_body(Type::Void, vec![if_(var("h"), vec![], vec![])]),
            Type::Bool,
            Type::Any,
        );
        assert_mismatch(
            check_body(Type::Void, vec![while_(var("h"), vec![])]),
            Type::Bool,
            Type::Any,
        );
    }

    #[test]
    fn void_parameter() {
        let result = check(vec![external_function("g", &[(Type::Void, "v")], Type::Int)]);
        assert!(matches!(
            result,
            Err(TypeCheckError::VoidParameter { ref name, .. }) if name == "v"
        ));
    }

    #[test]
    fn well_typed_function() {
        let body = vec![
            while_(
                binary(BinaryOperator::Greater, var("x"), int(0)),
                vec![effect(call("m.f", vec![int(1), string("any")]))],
            ),
            if_(
                binary(BinaryOperator::LessEq, neg(var("x")), int(3)),
                vec![ret(Some(binary(BinaryOperator::Rem, var("x"), int(2))))],
                vec![],
            ),
            ret(Some(int(0))),
        ];
        check_body(Type::Int, body).unwrap();
    }

    #[test]
    fn arity_mismatch() {
        let result = check(vec![
            external_function("g", &[(Type::Int, "a")], Type::Int),
            function(
                "f",
                &[],
                Type::Int,
                vec![ret(Some(call("m.g", vec![int(1), int(2)])))],
            ),
        ]);
        assert!(matches!(
            result,
            Err(TypeCheckError::ArityMismatch {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn argument_type_mismatch() {
        let result = check(vec![
            external_function("g", &[(Type::Int, "a")], Type::Void),
            function("f", &[], Type::Void, vec![effect(call("m.g", vec![boolean(true)]))]),
        ]);
        assert_mismatch(result, Type::Int, Type::Bool);
    }

    #[test]
    fn void_call_may_be_returned_from_void_function() {
        let result = check(vec![
            external_function("g", &[], Type::Void),
            function("f", &[], Type::Void, vec![ret(Some(call("m.g", vec![])))]),
        ]);
        result.unwrap();
    }

    #[test]
    fn unresolved_application_is_internal() {
        let result = check_body(Type::Void, vec![effect(apply("g", vec![]))]);
        assert!(matches!(result, Err(TypeCheckError::Internal(_))));
    }

    #[test]
    fn mismatch_carries_position() {
        let condition = Expression::new(
            ExpressionKind::Literal(Value::Int(5.into())),
            Span::new(7, 8),
        );
        let p = Program {
            module: IdentPath::single("m"),
            declarations: vec![Declaration {
                kind: DeclarationKind::Function(Function::new(
                    Attributes::new(),
                    "f",
                    vec![],
                    Type::Void,
                    vec![Statement {
                        kind: StatementKind::If {
                            condition,
                            then_block: vec![],
                            else_block: vec![],
                        },
                        meta: Span::new(4, 12),
                    }],
                )),
                meta: Span::new(0, 12),
            }],
        };
        let env = Environment::build(&p, &NoImports).unwrap();
        let err = type_check(&p, &env).unwrap_err();
        assert!(matches!(
            err,
            TypeCheckError::TypeMismatch { span: Some(span), .. } if span == Span::new(7, 8)
        ));
        assert_eq!(
            err.to_string(),
            "Mismatched types in condition of `if`: expected Bool, found Int"
        );
    }
}

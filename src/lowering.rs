//! Lowering
//!
//! This module is responsible for lowering the fully typed AST down to our intermediate
//! representation ([ir]). The main interface is the [lower] function. Every expression must
//! carry its type (see [crate::annotate]); anything the earlier stages should have ruled out
//! is reported as an [InternalError].

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument, trace, warn};

use crate::ast::*;
use crate::environment::{Environment, Signature};
use crate::error::InternalError;
use crate::ir::{self, IntegerWidth, IrType, Operand, Register, Terminator};
use crate::{IdentPath, Type};

mod builder;

pub use builder::BlockBuilder;

type Result<T> = std::result::Result<T, InternalError>;

/// Target settings for lowering
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Integer literals are wrapped to this width
    pub integer_width: IntegerWidth,
}

/// Turn a typed program into an IR module
///
/// The module declares every imported function and every external function of the program,
/// defines all remaining functions, and declares the visible types as opaque.
#[instrument(skip_all, fields(module = %program.module))]
pub fn lower<M: Annotation>(
    program: Program<M>,
    env: &Environment,
    config: &Config,
) -> Result<ir::Module> {
    let types = env
        .types()
        .map(|(path, _)| ir::TypeDeclaration {
            name: path.mangled(),
        })
        .collect();

    let mut functions: Vec<ir::Function> = env
        .imported_functions()
        .map(|(path, symbol)| declare(path, &symbol.signature, config))
        .collect();

    for func in program.functions().filter(|f| f.is_external()) {
        let path = program.module.child(&func.name);
        functions.push(declare(&path, &Signature(func.params.clone()), config));
    }

    for decl in program.declarations {
        match decl.kind {
            DeclarationKind::Function(func) if !func.is_external() => {
                let path = program.module.child(&func.name);
                functions.push(FunctionLowerer::new(env, config).lower_function(&path, func)?);
            }
            DeclarationKind::Function(_) | DeclarationKind::Import(_) | DeclarationKind::Type(_) => {}
        }
    }

    let module = ir::Module {
        name: program.module.mangled(),
        int_width: config.integer_width,
        types,
        functions,
    };
    report_collisions(&module);
    debug!(functions = module.functions.len(), "lowered module");
    Ok(module)
}

/// Mangled names are not injective, flag symbols that would clash at link time
fn report_collisions(module: &ir::Module) {
    let mut functions = HashSet::new();
    for function in &module.functions {
        if !functions.insert(function.name.as_str()) {
            warn!(symbol = %function.name, "two functions share a mangled name");
        }
    }
    let mut types = HashSet::new();
    for typ in &module.types {
        if !types.insert(typ.name.as_str()) {
            warn!(symbol = %typ.name, "two types share a mangled name");
        }
    }
}

fn lower_type(typ: Type, config: &Config) -> IrType {
    match typ {
        Type::Any | Type::Str => IrType::Ptr,
        Type::Bool => IrType::Bool,
        Type::Int => IrType::Int(config.integer_width),
        Type::Void => IrType::Void,
    }
}

fn declare(path: &IdentPath, signature: &Signature, config: &Config) -> ir::Function {
    ir::Function {
        name: path.mangled(),
        params: signature
            .parameters()
            .iter()
            .map(|p| lower_type(p.typ, config))
            .collect(),
        return_type: lower_type(signature.return_type(), config),
        body: None,
    }
}

/// Lowers a single function body
struct FunctionLowerer<'a> {
    env: &'a Environment,
    config: &'a Config,
    builder: BlockBuilder,
    vars: HashMap<String, Register>,
    return_type: Type,
}

impl<'a> FunctionLowerer<'a> {
    fn new(env: &'a Environment, config: &'a Config) -> Self {
        Self {
            env,
            config,
            builder: BlockBuilder::new(),
            vars: HashMap::new(),
            return_type: Type::Void,
        }
    }

    fn lower_function<M: Annotation>(
        mut self,
        path: &IdentPath,
        func: Function<M>,
    ) -> Result<ir::Function> {
        let return_type = func.return_type();
        self.return_type = return_type;
        let mut params = Vec::new();
        let mut arguments = Vec::new();
        for param in func.parameters() {
            let register = self.builder.fresh_register();
            self.vars.insert(param.name.clone(), register);
            params.push(lower_type(param.typ, self.config));
            arguments.push(register);
        }

        let entry = self.builder.create_block("entry");
        self.builder.position_at(entry);
        self.lower_block(func.body)?;

        // falling off the end
        if self.builder.is_open() {
            let terminator = match return_type {
                Type::Void => Terminator::Return(None),
                _ => Terminator::Unreachable,
            };
            self.builder.terminate(terminator)?;
        }

        let blocks = self.builder.finish()?;
        trace!(function = %path, blocks = blocks.len(), "lowered function");
        Ok(ir::Function {
            name: path.mangled(),
            params,
            return_type: lower_type(return_type, self.config),
            body: Some(ir::Body { arguments, blocks }),
        })
    }

    fn lower_block<M: Annotation>(&mut self, block: Vec<Statement<M>>) -> Result<()> {
        for stmt in block {
            if !self.builder.is_open() {
                trace!("skipping statements after a terminator");
                break;
            }
            self.lower_statement(stmt)?;
        }
        Ok(())
    }

    fn lower_statement<M: Annotation>(&mut self, stmt: Statement<M>) -> Result<()> {
        match stmt.kind {
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => {
                let condition = self.lower_value(&condition)?;
                let then_bb = self.builder.create_block("then");
                let else_bb = self.builder.create_block("else");
                self.builder.terminate(Terminator::CondBranch {
                    condition,
                    then_block: then_bb,
                    else_block: else_bb,
                })?;

                // only created if one of the arms falls through
                let mut merge_bb = None;
                for (arm, statements) in [(then_bb, then_block), (else_bb, else_block)] {
                    self.builder.position_at(arm);
                    self.lower_block(statements)?;
                    if self.builder.is_open() {
                        let merge =
                            *merge_bb.get_or_insert_with(|| self.builder.create_block("merge"));
                        self.builder.terminate(Terminator::Branch(merge))?;
                    }
                }

                if let Some(merge) = merge_bb {
                    self.builder.position_at(merge);
                }
                Ok(())
            }
            StatementKind::Expression(expr) => self.lower_effect(&expr),
            StatementKind::Return(None) => self.builder.terminate(Terminator::Return(None)),
            StatementKind::Return(Some(expr)) => {
                if expr.resolved_type() == Some(Type::Void) {
                    self.lower_effect(&expr)?;
                    return self.builder.terminate(Terminator::Return(None));
                }
                let (typ, _) = typed_parts(&expr)?;
                let value = self.lower_value(&expr)?;
                let value = self.coerce(value, typ, self.return_type)?;
                self.builder.terminate(Terminator::Return(Some(value)))
            }
            StatementKind::While { condition, body } => {
                let header = self.builder.create_block("loop.header");
                self.builder.terminate(Terminator::Branch(header))?;

                self.builder.position_at(header);
                let condition = self.lower_value(&condition)?;
                let body_bb = self.builder.create_block("loop.body");
                let exit = self.builder.create_block("loop.exit");
                self.builder.terminate(Terminator::CondBranch {
                    condition,
                    then_block: body_bb,
                    else_block: exit,
                })?;

                self.builder.position_at(body_bb);
                self.lower_block(body)?;
                if self.builder.is_open() {
                    self.builder.terminate(Terminator::Branch(header))?;
                }

                self.builder.position_at(exit);
                Ok(())
            }
        }
    }

    /// Lower an expression whose result is discarded
    fn lower_effect<M: Annotation>(&mut self, expr: &Expression<M>) -> Result<()> {
        let (_, inner) = typed_parts(expr)?;
        if let ExpressionKind::Call { path, args } = &inner.kind {
            self.lower_call(path, args)?;
            return Ok(());
        }
        self.lower_value(expr).map(|_| ())
    }

    fn lower_value<M: Annotation>(&mut self, expr: &Expression<M>) -> Result<Operand> {
        let (typ, inner) = typed_parts(expr)?;
        match &inner.kind {
            ExpressionKind::Literal(Value::Bool(b)) => Ok(Operand::Bool(*b)),
            ExpressionKind::Literal(Value::Int(i)) => {
                Ok(Operand::Int(self.config.integer_width.truncate(i)))
            }
            ExpressionKind::Literal(Value::Str(s)) => self.materialize_string(s),
            ExpressionKind::Variable(name) => self
                .vars
                .get(name)
                .map(|r| Operand::Register(*r))
                .ok_or_else(|| InternalError::new(format!("variable `{name}` has no register"))),
            ExpressionKind::Binary { op, lhs, rhs } => {
                let (lhs_type, _) = typed_parts(lhs)?;
                let (rhs_type, _) = typed_parts(rhs)?;
                let lhs = self.lower_value(lhs)?;
                let rhs = self.lower_value(rhs)?;
                // only equality admits the top type, compare untyped
                let (lhs, rhs) = if lhs_type == Type::Any || rhs_type == Type::Any {
                    (
                        self.coerce(lhs, lhs_type, Type::Any)?,
                        self.coerce(rhs, rhs_type, Type::Any)?,
                    )
                } else {
                    (lhs, rhs)
                };
                let dest = self.builder.fresh_register();
                self.builder.push(binary_instruction(*op, dest, lhs, rhs))?;
                Ok(Operand::Register(dest))
            }
            ExpressionKind::Unary {
                op: UnaryOperator::Neg,
                inner: operand,
            } => {
                let operand_type = operand.resolved_type();
                if operand_type != Some(Type::Int) {
                    return Err(InternalError::new(format!(
                        "negation of non-integer `{operand}`"
                    )));
                }
                let operand = self.lower_value(operand)?;
                let dest = self.builder.fresh_register();
                self.builder.push(ir::Instruction::Neg { dest, operand })?;
                Ok(Operand::Register(dest))
            }
            ExpressionKind::Call { path, args } => self
                .lower_call(path, args)?
                .map(Operand::Register)
                .ok_or_else(|| {
                    InternalError::new(format!("result of `{path}` used as a value, but it is {typ}"))
                }),
            ExpressionKind::Apply { name, .. } => Err(InternalError::new(format!(
                "call to unresolved name `{name}` reached lowering"
            ))),
            ExpressionKind::Typed { .. } => Err(InternalError::new(format!(
                "doubly wrapped expression `{expr}`"
            ))),
        }
    }

    /// Arguments are evaluated left to right; void functions yield no register
    fn lower_call<M: Annotation>(
        &mut self,
        path: &IdentPath,
        args: &[Expression<M>],
    ) -> Result<Option<Register>> {
        let env = self.env;
        let symbol = env
            .function(path)
            .ok_or_else(|| InternalError::new(format!("`{path}` is missing from the environment")))?;
        let args = args
            .iter()
            .zip(symbol.signature.parameters())
            .map(|(arg, param)| {
                let (typ, _) = typed_parts(arg)?;
                let value = self.lower_value(arg)?;
                self.coerce(value, typ, param.typ)
            })
            .collect::<Result<Vec<_>>>()?;
        let dest = match symbol.signature.return_type() {
            Type::Void => None,
            _ => Some(self.builder.fresh_register()),
        };
        self.builder.push(ir::Instruction::Call {
            dest,
            callee: path.mangled(),
            args,
        })?;
        Ok(dest)
    }

    /// Convert a value between a concrete type and the top type
    fn coerce(&mut self, value: Operand, from: Type, to: Type) -> Result<Operand> {
        let (from_ir, to_ir) = (lower_type(from, self.config), lower_type(to, self.config));
        if from_ir == to_ir {
            return Ok(value);
        }
        let dest = self.builder.fresh_register();
        let instruction = match (from_ir, to_ir) {
            (IrType::Int(_) | IrType::Bool, IrType::Ptr) => ir::Instruction::IntToPtr { dest, value },
            (IrType::Ptr, IrType::Int(_) | IrType::Bool) => ir::Instruction::PtrToInt {
                dest,
                value,
                to: to_ir,
            },
            _ => {
                return Err(InternalError::new(format!(
                    "no conversion from {from} to {to} for `{value}`"
                )))
            }
        };
        self.builder.push(instruction)?;
        Ok(Operand::Register(dest))
    }

    /// Copy a string constant into a stack array and hand out a pointer to it
    ///
    /// The array is allocated in the entry block, so a literal inside a loop reuses one slot.
    fn materialize_string(&mut self, s: &str) -> Result<Operand> {
        let mut data = s.as_bytes().to_vec();
        data.push(0);

        let array = self.builder.fresh_register();
        self.builder.hoist(ir::Instruction::Alloca {
            dest: array,
            len: data.len(),
        })?;
        self.builder.push(ir::Instruction::Store { ptr: array, data })?;
        let pointer = self.builder.fresh_register();
        self.builder.push(ir::Instruction::BitCast {
            dest: pointer,
            value: array,
        })?;
        Ok(Operand::Register(pointer))
    }
}

fn typed_parts<M>(expr: &Expression<M>) -> Result<(Type, &Expression<M>)> {
    match &expr.kind {
        ExpressionKind::Typed { typ, inner } => Ok((*typ, inner)),
        _ => Err(InternalError::new(format!(
            "expression `{expr}` reached lowering without a type"
        ))),
    }
}

fn binary_instruction(
    op: BinaryOperator,
    dest: Register,
    lhs: Operand,
    rhs: Operand,
) -> ir::Instruction {
    let arithmetic = |op| ir::Instruction::Binary {
        dest,
        op,
        lhs: lhs.clone(),
        rhs: rhs.clone(),
    };
    let compare = |predicate| ir::Instruction::Compare {
        dest,
        predicate,
        lhs: lhs.clone(),
        rhs: rhs.clone(),
    };
    match op {
        BinaryOperator::Mul => arithmetic(ir::BinaryOp::Mul),
        BinaryOperator::Div => arithmetic(ir::BinaryOp::SDiv),
        BinaryOperator::Rem => arithmetic(ir::BinaryOp::SRem),
        BinaryOperator::Add => arithmetic(ir::BinaryOp::Add),
        BinaryOperator::Sub => arithmetic(ir::BinaryOp::Sub),
        BinaryOperator::Less => compare(ir::Predicate::Slt),
        BinaryOperator::LessEq => compare(ir::Predicate::Sle),
        BinaryOperator::Greater => compare(ir::Predicate::Sgt),
        BinaryOperator::GreaterEq => compare(ir::Predicate::Sge),
        BinaryOperator::Equal => compare(ir::Predicate::Eq),
        BinaryOperator::NotEqual => compare(ir::Predicate::Ne),
    }
}

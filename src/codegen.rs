//! Code generation
//!
//! Translates an [ir::Module] into an LLVM module using [inkwell]. Only available with the
//! `llvm` feature.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::{
    BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType, IntType, PointerType,
};
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue, IntValue};
use inkwell::{AddressSpace, IntPredicate};
use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ir::{self, IrType, Operand};

#[derive(Debug, Error, Diagnostic)]
pub enum CodegenError {
    #[error("LLVM could not build an instruction")]
    Builder(#[from] BuilderError),

    #[error("Call to unknown function `{0}`")]
    UnknownFunction(String),

    #[error("Register {0} is used before it is defined")]
    UndefinedRegister(ir::Register),

    #[error("Operand `{0}` has the wrong kind for this instruction")]
    OperandKind(String),

    #[error("The generated module is invalid: {0}")]
    Verification(String),
}

type Result<T> = std::result::Result<T, CodegenError>;

/// Build an LLVM module from the IR
#[instrument(skip_all, fields(module = %module.name))]
pub fn compile<'ctx>(context: &'ctx Context, module: &ir::Module) -> Result<Module<'ctx>> {
    let codegen = Codegen {
        context,
        builder: context.create_builder(),
        module: context.create_module(&module.name),
        int_width: module.int_width,
    };
    codegen.compile_module(module)
}

struct Codegen<'ctx> {
    context: &'ctx Context,
    builder: Builder<'ctx>,
    module: Module<'ctx>,
    int_width: ir::IntegerWidth,
}

type Registers<'ctx> = HashMap<ir::Register, BasicValueEnum<'ctx>>;

impl<'ctx> Codegen<'ctx> {
    fn int_type(&self) -> IntType<'ctx> {
        self.context.custom_width_int_type(self.int_width.bits())
    }

    #[allow(deprecated)]
    fn ptr_type(&self) -> PointerType<'ctx> {
        self.context.i8_type().ptr_type(AddressSpace::default())
    }

    fn basic_type(&self, typ: IrType) -> Option<BasicTypeEnum<'ctx>> {
        match typ {
            IrType::Bool => Some(self.context.bool_type().into()),
            IrType::Int(width) => Some(self.context.custom_width_int_type(width.bits()).into()),
            IrType::Ptr => Some(self.ptr_type().into()),
            IrType::Void => None,
        }
    }

    fn function_type(&self, function: &ir::Function) -> FunctionType<'ctx> {
        let params: Vec<BasicMetadataTypeEnum> = function
            .params
            .iter()
            .filter_map(|typ| self.basic_type(*typ))
            .map(Into::into)
            .collect();
        match self.basic_type(function.return_type) {
            Some(ret) => ret.fn_type(&params, false),
            None => self.context.void_type().fn_type(&params, false),
        }
    }

    fn compile_module(self, module: &ir::Module) -> Result<Module<'ctx>> {
        for typ in &module.types {
            self.context.opaque_struct_type(&typ.name);
        }

        let mut functions = HashMap::new();
        for function in &module.functions {
            let linkage = function.is_declaration().then_some(Linkage::External);
            let value = self
                .module
                .add_function(&function.name, self.function_type(function), linkage);
            functions.insert(function.name.as_str(), value);
        }

        for function in &module.functions {
            let (Some(body), Some(value)) = (&function.body, functions.get(function.name.as_str()))
            else {
                continue;
            };
            self.compile_body(*value, function, body, &functions)?;
        }

        self.module
            .verify()
            .map_err(|e| CodegenError::Verification(e.to_string()))?;
        debug!("LLVM module verified");
        Ok(self.module)
    }

    fn compile_body(
        &self,
        function: FunctionValue<'ctx>,
        signature: &ir::Function,
        body: &ir::Body,
        functions: &HashMap<&str, FunctionValue<'ctx>>,
    ) -> Result<()> {
        let blocks: Vec<BasicBlock<'ctx>> = body
            .blocks
            .iter()
            .map(|block| self.context.append_basic_block(function, block.label))
            .collect();

        // void parameters have no LLVM counterpart
        let mut params = function.get_param_iter();
        let mut registers = Registers::new();
        for (register, typ) in body.arguments.iter().zip(&signature.params) {
            if *typ == IrType::Void {
                continue;
            }
            if let Some(param) = params.next() {
                registers.insert(*register, param);
            }
        }

        for (block, bb) in body.blocks.iter().zip(&blocks) {
            self.builder.position_at_end(*bb);
            for instruction in &block.instructions {
                self.compile_instruction(instruction, &mut registers, functions)?;
            }
            self.compile_terminator(&block.terminator, &registers, &blocks)?;
        }
        Ok(())
    }

    fn operand(&self, operand: &Operand, registers: &Registers<'ctx>) -> Result<BasicValueEnum<'ctx>> {
        match operand {
            Operand::Register(r) => registers
                .get(r)
                .copied()
                .ok_or(CodegenError::UndefinedRegister(*r)),
            Operand::Int(i) => Ok(self.int_type().const_int(*i as u64, true).into()),
            Operand::Bool(b) => Ok(self.context.bool_type().const_int(u64::from(*b), false).into()),
        }
    }

    fn int_operand(&self, operand: &Operand, registers: &Registers<'ctx>) -> Result<IntValue<'ctx>> {
        match self.operand(operand, registers)? {
            BasicValueEnum::IntValue(value) => Ok(value),
            _ => Err(CodegenError::OperandKind(operand.to_string())),
        }
    }

    fn compile_instruction(
        &self,
        instruction: &ir::Instruction,
        registers: &mut Registers<'ctx>,
        functions: &HashMap<&str, FunctionValue<'ctx>>,
    ) -> Result<()> {
        match instruction {
            ir::Instruction::Binary { dest, op, lhs, rhs } => {
                let lhs = self.int_operand(lhs, registers)?;
                let rhs = self.int_operand(rhs, registers)?;
                let value = match op {
                    ir::BinaryOp::Add => self.builder.build_int_add(lhs, rhs, "add")?,
                    ir::BinaryOp::Sub => self.builder.build_int_sub(lhs, rhs, "sub")?,
                    ir::BinaryOp::Mul => self.builder.build_int_mul(lhs, rhs, "mul")?,
                    ir::BinaryOp::SDiv => self.builder.build_int_signed_div(lhs, rhs, "div")?,
                    ir::BinaryOp::SRem => self.builder.build_int_signed_rem(lhs, rhs, "rem")?,
                };
                registers.insert(*dest, value.into());
            }
            ir::Instruction::Compare {
                dest,
                predicate,
                lhs,
                rhs,
            } => {
                let predicate = match predicate {
                    ir::Predicate::Eq => IntPredicate::EQ,
                    ir::Predicate::Ne => IntPredicate::NE,
                    ir::Predicate::Slt => IntPredicate::SLT,
                    ir::Predicate::Sle => IntPredicate::SLE,
                    ir::Predicate::Sgt => IntPredicate::SGT,
                    ir::Predicate::Sge => IntPredicate::SGE,
                };
                let value = match (self.operand(lhs, registers)?, self.operand(rhs, registers)?) {
                    (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) => {
                        self.builder.build_int_compare(predicate, l, r, "cmp")?
                    }
                    // string equality is identity
                    (BasicValueEnum::PointerValue(l), BasicValueEnum::PointerValue(r)) => {
                        let l = self.builder.build_ptr_to_int(l, self.int_type(), "lhs")?;
                        let r = self.builder.build_ptr_to_int(r, self.int_type(), "rhs")?;
                        self.builder.build_int_compare(predicate, l, r, "cmp")?
                    }
                    _ => return Err(CodegenError::OperandKind(lhs.to_string())),
                };
                registers.insert(*dest, value.into());
            }
            ir::Instruction::Neg { dest, operand } => {
                let operand = self.int_operand(operand, registers)?;
                let value = self.builder.build_int_neg(operand, "neg")?;
                registers.insert(*dest, value.into());
            }
            ir::Instruction::Call { dest, callee, args } => {
                let function = functions
                    .get(callee.as_str())
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;
                let args = args
                    .iter()
                    .map(|arg| self.operand(arg, registers).map(BasicMetadataValueEnum::from))
                    .collect::<Result<Vec<_>>>()?;
                let call = self.builder.build_call(*function, &args, "call")?;
                if let Some(dest) = dest {
                    let value = call
                        .try_as_basic_value()
                        .left()
                        .ok_or_else(|| CodegenError::OperandKind(callee.clone()))?;
                    registers.insert(*dest, value);
                }
            }
            ir::Instruction::Alloca { dest, len } => {
                let array = self.context.i8_type().array_type(*len as u32);
                let pointer = self.builder.build_alloca(array, "str")?;
                registers.insert(*dest, pointer.into());
            }
            ir::Instruction::Store { ptr, data } => {
                let BasicValueEnum::PointerValue(pointer) = self.operand(&Operand::Register(*ptr), registers)?
                else {
                    return Err(CodegenError::OperandKind(ptr.to_string()));
                };
                let constant = self.context.const_string(data, false);
                self.builder.build_store(pointer, constant)?;
            }
            ir::Instruction::BitCast { dest, value } => {
                let value = self.operand(&Operand::Register(*value), registers)?;
                let cast = self.builder.build_bit_cast(value, self.ptr_type(), "cast")?;
                registers.insert(*dest, cast);
            }
            ir::Instruction::IntToPtr { dest, value } => {
                let value = self.int_operand(value, registers)?;
                let pointer = self.builder.build_int_to_ptr(value, self.ptr_type(), "box")?;
                registers.insert(*dest, pointer.into());
            }
            ir::Instruction::PtrToInt { dest, value, to } => {
                let BasicValueEnum::PointerValue(pointer) = self.operand(value, registers)? else {
                    return Err(CodegenError::OperandKind(value.to_string()));
                };
                let Some(BasicTypeEnum::IntType(int_type)) = self.basic_type(*to) else {
                    return Err(CodegenError::OperandKind(dest.to_string()));
                };
                let int = self.builder.build_ptr_to_int(pointer, int_type, "unbox")?;
                registers.insert(*dest, int.into());
            }
        }
        Ok(())
    }

    fn compile_terminator(
        &self,
        terminator: &ir::Terminator,
        registers: &Registers<'ctx>,
        blocks: &[BasicBlock<'ctx>],
    ) -> Result<()> {
        match terminator {
            ir::Terminator::Branch(target) => {
                self.builder
                    .build_unconditional_branch(blocks[target.0 as usize])?;
            }
            ir::Terminator::CondBranch {
                condition,
                then_block,
                else_block,
            } => {
                let condition = self.int_operand(condition, registers)?;
                self.builder.build_conditional_branch(
                    condition,
                    blocks[then_block.0 as usize],
                    blocks[else_block.0 as usize],
                )?;
            }
            ir::Terminator::Return(Some(value)) => {
                let value = self.operand(value, registers)?;
                self.builder.build_return(Some(&value))?;
            }
            ir::Terminator::Return(None) => {
                self.builder.build_return(None)?;
            }
            ir::Terminator::Unreachable => {
                self.builder.build_unreachable()?;
            }
        }
        Ok(())
    }
}

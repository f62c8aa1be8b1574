//! Intermediate representation
//!
//! A module of functions made of basic blocks. Every block holds a straight-line list of
//! instructions followed by exactly one [Terminator]. Values live in virtual [Register]s that
//! are assigned once, numbered per function.

use std::fmt;

use num_bigint::{BigInt, Sign};

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub int_width: IntegerWidth,
    pub types: Vec<TypeDeclaration>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// An opaque named type without fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDeclaration {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// The mangled, linker-visible name
    pub name: String,
    pub params: Vec<IrType>,
    pub return_type: IrType,
    /// `None` for functions implemented elsewhere
    pub body: Option<Body>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn blocks(&self) -> &[Block] {
        self.body
            .as_ref()
            .map(|b| b.blocks.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Registers holding the parameters on entry
    pub arguments: Vec<Register>,
    /// The first block is the entry block
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub label: &'static str,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    Bool,
    Int(IntegerWidth),
    Ptr,
    Void,
}

/// The width of native integer arithmetic
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegerWidth {
    W32,
    #[default]
    W64,
}

impl IntegerWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntegerWidth::W32 => 32,
            IntegerWidth::W64 => 64,
        }
    }

    /// Wrap an unbounded integer to this width (two's complement)
    pub fn truncate(self, value: &BigInt) -> i64 {
        let (sign, digits) = value.to_u64_digits();
        let low = digits.first().copied().unwrap_or(0);
        let low = match sign {
            Sign::Minus => low.wrapping_neg(),
            Sign::NoSign | Sign::Plus => low,
        };
        match self {
            IntegerWidth::W32 => low as u32 as i32 as i64,
            IntegerWidth::W64 => low as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Binary {
        dest: Register,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    Compare {
        dest: Register,
        predicate: Predicate,
        lhs: Operand,
        rhs: Operand,
    },
    Neg {
        dest: Register,
        operand: Operand,
    },
    Call {
        dest: Option<Register>,
        callee: String,
        args: Vec<Operand>,
    },
    /// Reserve a byte array of `len` elements on the stack
    Alloca {
        dest: Register,
        len: usize,
    },
    /// Write constant bytes to the array behind `ptr`
    Store {
        ptr: Register,
        data: Vec<u8>,
    },
    /// Reinterpret an array as an opaque pointer
    BitCast {
        dest: Register,
        value: Register,
    },
    /// Pass an integer or boolean where an untyped value is expected
    IntToPtr {
        dest: Register,
        value: Operand,
    },
    /// Recover an integer or boolean from an untyped value
    PtrToInt {
        dest: Register,
        value: Operand,
        to: IrType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Branch(BlockId),
    CondBranch {
        condition: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Option<Operand>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch(target) => vec![*target],
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) | Terminator::Unreachable => vec![],
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Bool => write!(f, "i1"),
            IrType::Int(width) => write!(f, "i{}", width.bits()),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Void => write!(f, "void"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "{r}"),
            Operand::Int(i) => write!(f, "{i}"),
            Operand::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::SRem => "srem",
        };
        f.write_str(op)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let predicate = match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Slt => "slt",
            Predicate::Sle => "sle",
            Predicate::Sgt => "sgt",
            Predicate::Sge => "sge",
        };
        f.write_str(predicate)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Binary { dest, op, lhs, rhs } => write!(f, "{dest} = {op} {lhs}, {rhs}"),
            Instruction::Compare {
                dest,
                predicate,
                lhs,
                rhs,
            } => write!(f, "{dest} = icmp {predicate} {lhs}, {rhs}"),
            Instruction::Neg { dest, operand } => write!(f, "{dest} = neg {operand}"),
            Instruction::Call { dest, callee, args } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "call @{callee}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Instruction::Alloca { dest, len } => write!(f, "{dest} = alloca [{len} x i8]"),
            Instruction::Store { ptr, data } => {
                write!(f, "store c\"{}\", {ptr}", data.escape_ascii())
            }
            Instruction::BitCast { dest, value } => write!(f, "{dest} = bitcast {value} to ptr"),
            Instruction::IntToPtr { dest, value } => write!(f, "{dest} = inttoptr {value} to ptr"),
            Instruction::PtrToInt { dest, value, to } => {
                write!(f, "{dest} = ptrtoint {value} to {to}")
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Branch(target) => write!(f, "br {target}"),
            Terminator::CondBranch {
                condition,
                then_block,
                else_block,
            } => write!(f, "br {condition}, {then_block}, {else_block}"),
            Terminator::Return(Some(value)) => write!(f, "ret {value}"),
            Terminator::Return(None) => write!(f, "ret void"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: ; {}", self.id, self.label)?;
        for instruction in &self.instructions {
            writeln!(f, "  {instruction}")?;
        }
        writeln!(f, "  {}", self.terminator)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(body) = &self.body else {
            write!(f, "declare {} @{}(", self.return_type, self.name)?;
            write_list(f, &self.params)?;
            return writeln!(f, ")");
        };

        write!(f, "define {} @{}(", self.return_type, self.name)?;
        for (i, (typ, register)) in self.params.iter().zip(&body.arguments).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{typ} {register}")?;
        }
        writeln!(f, ") {{")?;
        for block in &body.blocks {
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for typ in &self.types {
            writeln!(f, "%{} = type opaque", typ.name)?;
        }
        for function in &self.functions {
            write!(f, "\n{function}")?;
        }
        Ok(())
    }
}

mod common;

use std::collections::HashMap;

use cinder::ast::build::*;
use cinder::ast::{BinaryOperator, Declaration};
use cinder::ir::{
    self, BlockId, Instruction, IntegerWidth, IrType, Operand, Register, Terminator,
};
use cinder::{Config, Environment, NoImports, Type};
use common::{run_pipeline, run_pipeline_with};
use num_bigint::BigInt;

fn lower_module(declarations: Vec<Declaration>) -> ir::Module {
    run_pipeline(program("m", declarations)).unwrap().module
}

fn log() -> Declaration {
    external_function("log", &[(Type::Int, "x")], Type::Void)
}

fn labels(function: &ir::Function) -> Vec<&'static str> {
    function.blocks().iter().map(|b| b.label).collect()
}

fn terminators(function: &ir::Function) -> Vec<&Terminator> {
    function.blocks().iter().map(|b| &b.terminator).collect()
}

#[test]
fn both_arms_return() {
    let module = lower_module(vec![function(
        "pick",
        &[(Type::Bool, "b")],
        Type::Int,
        vec![if_(
            var("b"),
            vec![ret(Some(int(1)))],
            vec![ret(Some(int(2)))],
        )],
    )]);
    let pick = module.function("m_pick").unwrap();

    assert_eq!(labels(pick), ["entry", "then", "else"]);
    assert_eq!(
        terminators(pick),
        [
            &Terminator::CondBranch {
                condition: Operand::Register(Register(0)),
                then_block: BlockId(1),
                else_block: BlockId(2),
            },
            &Terminator::Return(Some(Operand::Int(1))),
            &Terminator::Return(Some(Operand::Int(2))),
        ]
    );
}

#[test]
fn falling_through_joins_at_merge() {
    let module = lower_module(vec![
        log(),
        function(
            "g",
            &[(Type::Bool, "b")],
            Type::Void,
            vec![if_(
                var("b"),
                vec![effect(apply("log", vec![int(1)]))],
                vec![effect(apply("log", vec![int(2)]))],
            )],
        ),
    ]);
    let g = module.function("m_g").unwrap();

    assert_eq!(labels(g), ["entry", "then", "else", "merge"]);
    let merge = BlockId(3);
    assert_eq!(g.blocks()[1].terminator, Terminator::Branch(merge));
    assert_eq!(g.blocks()[2].terminator, Terminator::Branch(merge));
    assert_eq!(g.blocks()[3].terminator, Terminator::Return(None));
    assert_eq!(
        g.blocks()[1].instructions,
        [Instruction::Call {
            dest: None,
            callee: String::from("m_log"),
            args: vec![Operand::Int(1)],
        }]
    );
}

#[test]
fn one_arm_falling_through() {
    let module = lower_module(vec![function(
        "abs",
        &[(Type::Int, "x")],
        Type::Int,
        vec![
            if_(
                binary(BinaryOperator::Less, var("x"), int(0)),
                vec![ret(Some(neg(var("x"))))],
                vec![],
            ),
            ret(Some(var("x"))),
        ],
    )]);
    let abs = module.function("m_abs").unwrap();

    assert_eq!(labels(abs), ["entry", "then", "else", "merge"]);
    assert_eq!(
        abs.blocks()[1].terminator,
        Terminator::Return(Some(Operand::Register(Register(2))))
    );
    assert_eq!(abs.blocks()[2].terminator, Terminator::Branch(BlockId(3)));
    assert_eq!(
        abs.blocks()[3].terminator,
        Terminator::Return(Some(Operand::Register(Register(0))))
    );
}

#[test]
fn loop_shape() {
    let module = lower_module(vec![
        log(),
        function(
            "count",
            &[(Type::Int, "n")],
            Type::Int,
            vec![
                while_(
                    binary(BinaryOperator::Greater, var("n"), int(0)),
                    vec![effect(apply("log", vec![var("n")]))],
                ),
                ret(Some(var("n"))),
            ],
        ),
    ]);
    let count = module.function("m_count").unwrap();

    assert_eq!(labels(count), ["entry", "loop.header", "loop.body", "loop.exit"]);
    let header = BlockId(1);
    assert_eq!(count.blocks()[0].terminator, Terminator::Branch(header));
    assert_eq!(
        count.blocks()[1].instructions,
        [Instruction::Compare {
            dest: Register(1),
            predicate: ir::Predicate::Sgt,
            lhs: Operand::Register(Register(0)),
            rhs: Operand::Int(0),
        }]
    );
    assert_eq!(
        count.blocks()[1].terminator,
        Terminator::CondBranch {
            condition: Operand::Register(Register(1)),
            then_block: BlockId(2),
            else_block: BlockId(3),
        }
    );
    assert_eq!(count.blocks()[2].terminator, Terminator::Branch(header));
    assert_eq!(
        count.blocks()[3].terminator,
        Terminator::Return(Some(Operand::Register(Register(0))))
    );
}

#[test]
fn returning_loop_body_does_not_branch_back() {
    let module = lower_module(vec![function(
        "first",
        &[(Type::Bool, "b")],
        Type::Int,
        vec![while_(var("b"), vec![ret(Some(int(1)))]), ret(Some(int(0)))],
    )]);
    let first = module.function("m_first").unwrap();

    assert_eq!(first.blocks()[2].terminator, Terminator::Return(Some(Operand::Int(1))));
    assert!(!first
        .blocks()
        .iter()
        .skip(2)
        .any(|b| b.terminator.successors().contains(&BlockId(1))));
}

#[test]
fn string_literals_are_materialized() {
    let module = run_pipeline(program(
        "m",
        vec![
            import("std.io"),
            function(
                "hello",
                &[],
                Type::Void,
                vec![effect(apply("puts", vec![string("hi")]))],
            ),
        ],
    ))
    .unwrap()
    .module;
    let hello = module.function("m_hello").unwrap();

    assert_eq!(
        hello.blocks()[0].instructions,
        [
            Instruction::Alloca {
                dest: Register(0),
                len: 3,
            },
            Instruction::Store {
                ptr: Register(0),
                data: b"hi\0".to_vec(),
            },
            Instruction::BitCast {
                dest: Register(1),
                value: Register(0),
            },
            Instruction::Call {
                dest: None,
                callee: String::from("std_io_puts"),
                args: vec![Operand::Register(Register(1))],
            },
        ]
    );
    assert_eq!(hello.blocks()[0].terminator, Terminator::Return(None));
}

#[test]
fn falling_off_the_end() {
    let module = lower_module(vec![
        log(),
        function("v", &[], Type::Void, vec![effect(apply("log", vec![int(1)]))]),
        function(
            "u",
            &[(Type::Bool, "b")],
            Type::Int,
            vec![while_(var("b"), vec![])],
        ),
    ]);

    let v = module.function("m_v").unwrap();
    assert_eq!(terminators(v), [&Terminator::Return(None)]);

    let u = module.function("m_u").unwrap();
    assert_eq!(u.blocks()[3].label, "loop.exit");
    assert_eq!(u.blocks()[3].terminator, Terminator::Unreachable);
}

#[test]
fn statements_after_return_are_dropped() {
    let module = lower_module(vec![
        log(),
        function(
            "early",
            &[],
            Type::Void,
            vec![ret(None), effect(apply("log", vec![int(1)]))],
        ),
    ]);
    let early = module.function("m_early").unwrap();

    assert_eq!(early.blocks().len(), 1);
    assert!(early.blocks()[0].instructions.is_empty());
    assert_eq!(early.blocks()[0].terminator, Terminator::Return(None));
}

#[test]
fn registers_are_unique_per_function() {
    let module = lower_module(vec![function(
        "poly",
        &[(Type::Int, "x"), (Type::Int, "y")],
        Type::Int,
        vec![
            if_(
                binary(BinaryOperator::Equal, var("x"), var("y")),
                vec![ret(Some(binary(
                    BinaryOperator::Mul,
                    binary(BinaryOperator::Add, var("x"), int(1)),
                    var("y"),
                )))],
                vec![],
            ),
            ret(Some(binary(
                BinaryOperator::Rem,
                binary(BinaryOperator::Sub, var("x"), var("y")),
                neg(int(2)),
            ))),
        ],
    )]);
    let poly = module.function("m_poly").unwrap();

    let mut defined: Vec<u32> = poly
        .body
        .as_ref()
        .unwrap()
        .arguments
        .iter()
        .map(|r| r.0)
        .collect();
    for block in poly.blocks() {
        for instruction in &block.instructions {
            let dest = match instruction {
                Instruction::Binary { dest, .. }
                | Instruction::Compare { dest, .. }
                | Instruction::Neg { dest, .. }
                | Instruction::Alloca { dest, .. }
                | Instruction::BitCast { dest, .. }
                | Instruction::IntToPtr { dest, .. }
                | Instruction::PtrToInt { dest, .. } => Some(*dest),
                Instruction::Call { dest, .. } => *dest,
                Instruction::Store { .. } => None,
            };
            defined.extend(dest.map(|r| r.0));
        }
    }
    let expected: Vec<u32> = (0..defined.len() as u32).collect();
    assert_eq!(defined, expected);
}

#[test]
fn integer_literals_wrap_to_configured_width() {
    let config = Config {
        integer_width: IntegerWidth::W32,
    };
    let big = BigInt::from(i32::MAX) + 1;
    let module = run_pipeline_with(
        program(
            "m",
            vec![function("wrap", &[], Type::Int, vec![ret(Some(big_int(big)))])],
        ),
        &config,
    )
    .unwrap()
    .module;
    let wrap = module.function("m_wrap").unwrap();

    assert_eq!(module.int_width, IntegerWidth::W32);
    assert_eq!(wrap.return_type, IrType::Int(IntegerWidth::W32));
    assert_eq!(
        wrap.blocks()[0].terminator,
        Terminator::Return(Some(Operand::Int(i64::from(i32::MIN))))
    );
}

#[test]
fn module_layout() {
    let module = run_pipeline(program(
        "m",
        vec![
            import("std.io"),
            log(),
            function(
                "main",
                &[],
                Type::Int,
                vec![
                    effect(apply("puts", vec![string("hi")])),
                    ret(Some(binary(
                        BinaryOperator::Add,
                        apply("read_int", vec![]),
                        int(1),
                    ))),
                ],
            ),
        ],
    ))
    .unwrap()
    .module;

    let names: Vec<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["std_io_puts", "std_io_read_int", "m_log", "m_main"]);
    assert!(module.functions[..3].iter().all(|f| f.is_declaration()));

    let expected = "\
; module m
%std_io_File = type opaque

declare void @std_io_puts(ptr)

declare i64 @std_io_read_int()

declare void @m_log(i64)

define i64 @m_main() {
bb0: ; entry
  %0 = alloca [3 x i8]
  store c\"hi\\x00\", %0
  %1 = bitcast %0 to ptr
  call @std_io_puts(%1)
  %2 = call @std_io_read_int()
  %3 = add %2, 1
  ret %3
}
";
    assert_eq!(module.to_string(), expected);
}

#[test]
fn mangled_names_may_collide() {
    common::init_tracing();
    let a = program("a", vec![external_function("b_c", &[], Type::Void)]);
    let a = Environment::build(&a, &NoImports).unwrap();
    let imports = HashMap::from([(a.module().clone(), a)]);

    let a_b = program(
        "a_b",
        vec![import("a"), function("c", &[], Type::Void, vec![])],
    );
    let module = cinder::compile(a_b, &imports, &Config::default())
        .unwrap()
        .module;

    let colliding = module.functions.iter().filter(|f| f.name == "a_b_c").count();
    assert_eq!(colliding, 2);
}

#[test]
fn string_slots_live_in_the_entry_block() {
    let module = run_pipeline(program(
        "m",
        vec![
            import("std.io"),
            function(
                "chatty",
                &[(Type::Bool, "b")],
                Type::Void,
                vec![while_(var("b"), vec![effect(apply("puts", vec![string("x")]))])],
            ),
        ],
    ))
    .unwrap()
    .module;
    let chatty = module.function("m_chatty").unwrap();

    assert_eq!(
        chatty.blocks()[0].instructions,
        [Instruction::Alloca {
            dest: Register(1),
            len: 2,
        }]
    );
    assert_eq!(chatty.blocks()[0].terminator, Terminator::Branch(BlockId(1)));
    assert_eq!(chatty.blocks()[2].label, "loop.body");
    assert_eq!(
        chatty.blocks()[2].instructions[0],
        Instruction::Store {
            ptr: Register(1),
            data: b"x\0".to_vec(),
        }
    );
    assert!(!chatty.blocks()[2]
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::Alloca { .. })));
}

#[test]
fn top_type_is_converted_at_boundaries() {
    let module = lower_module(vec![
        external_function("show", &[(Type::Any, "v")], Type::Void),
        function(
            "f",
            &[(Type::Any, "h"), (Type::Int, "x")],
            Type::Any,
            vec![
                effect(apply("show", vec![var("x")])),
                if_(
                    binary(BinaryOperator::Equal, var("h"), var("x")),
                    vec![ret(Some(boolean(true)))],
                    vec![],
                ),
                ret(Some(var("x"))),
            ],
        ),
        function("g", &[(Type::Any, "h")], Type::Int, vec![ret(Some(var("h")))]),
    ]);

    let expected = "\
define ptr @m_f(ptr %0, i64 %1) {
bb0: ; entry
  %2 = inttoptr %1 to ptr
  call @m_show(%2)
  %3 = inttoptr %1 to ptr
  %4 = icmp eq %0, %3
  br %4, bb1, bb2
bb1: ; then
  %5 = inttoptr true to ptr
  ret %5
bb2: ; else
  br bb3
bb3: ; merge
  %6 = inttoptr %1 to ptr
  ret %6
}
";
    assert_eq!(module.function("m_f").unwrap().to_string(), expected);

    let g = module.function("m_g").unwrap();
    assert_eq!(
        g.blocks()[0].instructions,
        [Instruction::PtrToInt {
            dest: Register(1),
            value: Operand::Register(Register(0)),
            to: IrType::Int(IntegerWidth::W64),
        }]
    );
    assert_eq!(
        g.blocks()[0].terminator,
        Terminator::Return(Some(Operand::Register(Register(1))))
    );
}

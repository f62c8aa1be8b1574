#![allow(dead_code)]

use std::collections::HashMap;

use cinder::ast::build::*;
use cinder::ast::Program;
use cinder::{Compilation, Config, Environment, Error, IdentPath, NoImports, Type};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The environment of a small library module `std.io`
pub fn io_library() -> Environment {
    let io = program(
        "std.io",
        vec![
            type_decl("File", true),
            external_function("puts", &[(Type::Str, "s")], Type::Void),
            function(
                "read_int",
                &[],
                Type::Int,
                vec![ret(Some(int(0)))],
            ),
        ],
    );
    Environment::build(&io, &NoImports).unwrap()
}

pub fn libraries() -> HashMap<IdentPath, Environment> {
    let io = io_library();
    HashMap::from([(io.module().clone(), io)])
}

pub fn run_pipeline(program: Program) -> Result<Compilation, Error> {
    run_pipeline_with(program, &Config::default())
}

pub fn run_pipeline_with(program: Program, config: &Config) -> Result<Compilation, Error> {
    init_tracing();
    cinder::compile(program, &libraries(), config)
}

pub mod annotate;
pub mod ast;
#[cfg(feature = "llvm")]
pub mod codegen;
pub mod environment;
pub mod error;
pub mod ir;
pub mod lowering;
pub mod resolve;
pub mod type_checking;
mod util;

use tracing::info;

pub use annotate::annotate;
pub use environment::{Environment, EnvironmentError, ImportSource, NoImports};
pub use error::{Error, InternalError};
pub use lowering::{lower, Config};
pub use resolve::{resolve, ResolveError};
pub use type_checking::{type_check, TypeCheckError};
pub use util::{IdentPath, Span, Type};

/// The result of compiling one module
#[derive(Debug)]
pub struct Compilation {
    /// Handed to modules importing this one
    pub environment: Environment,
    pub module: ir::Module,
}

/// Run the whole pipeline on a parsed program
///
/// The environments of all imported modules must be available from `imports`, so modules
/// have to be compiled in dependency order. Stops at the first error.
pub fn compile<M: ast::Annotation>(
    program: ast::Program<M>,
    imports: &impl ImportSource,
    config: &Config,
) -> Result<Compilation, Error> {
    let environment = Environment::build(&program, imports)?;
    let program = resolve(program, &environment)?;
    type_check(&program, &environment)?;
    let program = annotate(program, &environment)?;
    let module = lower(program, &environment, config)?;
    info!(module = %environment.module(), "compilation successful");

    Ok(Compilation {
        environment,
        module,
    })
}

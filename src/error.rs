//! Errors
//!
//! Each stage reports its own error type. [Error] gathers them for callers driving the whole
//! pipeline through [crate::compile].

use miette::Diagnostic;
use thiserror::Error;

use crate::environment::EnvironmentError;
use crate::resolve::ResolveError;
use crate::type_checking::TypeCheckError;

/// A violated invariant of the pipeline itself
///
/// Internal errors never describe a problem with the user's program: they are raised when a
/// stage receives input that an earlier stage should have rejected or rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("Internal compiler error: {message}")]
#[diagnostic(
    code(cinder::internal),
    help("This is a bug in the compiler, not in the compiled program")
)]
pub struct InternalError {
    message: String,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    TypeCheck(#[from] TypeCheckError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Internal(#[from] InternalError),
}

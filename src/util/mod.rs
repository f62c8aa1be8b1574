//! Utilities
//!
//! Small types used throughout the crate.

mod ident;
mod span;
mod typ;

pub use ident::IdentPath;
pub use span::Span;
pub use typ::Type;

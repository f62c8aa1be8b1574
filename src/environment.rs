//! Symbol environment
//!
//! The environment holds the signatures of every function and type a compilation unit can
//! refer to: its own declarations plus everything exported by the modules it imports. It is
//! built once by [Environment::build] and read-only afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ast::{Annotation, Attribute, Attributes, DeclarationKind, Param, Program};
use crate::{IdentPath, Span, Type};

#[derive(Debug, Error, Diagnostic)]
pub enum EnvironmentError {
    #[error("`{name}` is declared more than once")]
    DuplicateDeclaration {
        name: String,

        #[label("redeclared here")]
        span: Option<Span>,

        #[label("first declared here")]
        previous: Option<Span>,
    },

    #[error("The module `{module}` is imported, but its environment was not provided")]
    #[diagnostic(help("Modules must be compiled in dependency order"))]
    UnresolvedImport {
        module: IdentPath,

        #[label("this import")]
        span: Option<Span>,
    },
}

type Result<T> = std::result::Result<T, EnvironmentError>;

/// Where a symbol was declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Declared in the program this environment was built for
    Own,
    /// Exported by the given imported module
    Imported(IdentPath),
}

/// The parameter list of a function, the last entry holding the return type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<Param>);

impl Signature {
    pub fn parameters(&self) -> &[Param] {
        match self.0.split_last() {
            Some((last, rest)) if last.is_return_slot() => rest,
            _ => self.0.as_slice(),
        }
    }

    pub fn return_type(&self) -> Type {
        self.0
            .last()
            .filter(|p| p.is_return_slot())
            .map_or(Type::Void, |p| p.typ)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    pub signature: Signature,
    pub attributes: Attributes,
    pub origin: Origin,
}

impl FunctionSymbol {
    /// Whether calls to this function are resolved by the linker
    pub fn is_externally_linked(&self) -> bool {
        self.origin != Origin::Own || self.attributes.contains(&Attribute::External)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSymbol {
    pub attributes: Attributes,
    pub origin: Origin,
}

/// Provides the environments of already compiled modules
pub trait ImportSource {
    fn environment(&self, module: &IdentPath) -> Option<&Environment>;
}

impl ImportSource for HashMap<IdentPath, Environment> {
    fn environment(&self, module: &IdentPath) -> Option<&Environment> {
        self.get(module)
    }
}

impl ImportSource for BTreeMap<IdentPath, Environment> {
    fn environment(&self, module: &IdentPath) -> Option<&Environment> {
        self.get(module)
    }
}

/// A source for programs without imports
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImports;

impl ImportSource for NoImports {
    fn environment(&self, _module: &IdentPath) -> Option<&Environment> {
        None
    }
}

/// All symbols visible from one compilation unit, keyed by qualified path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    module: IdentPath,
    imports: BTreeSet<IdentPath>,
    functions: BTreeMap<IdentPath, FunctionSymbol>,
    types: BTreeMap<IdentPath, TypeSymbol>,
}

impl Environment {
    /// Collect the program's own declarations and the exports of its imports
    #[instrument(skip_all, fields(module = %program.module))]
    pub fn build<M: Annotation>(program: &Program<M>, imports: &impl ImportSource) -> Result<Self> {
        let mut env = Environment {
            module: program.module.clone(),
            imports: BTreeSet::new(),
            functions: BTreeMap::new(),
            types: BTreeMap::new(),
        };

        let mut seen: HashMap<&str, Option<Span>> = HashMap::new();
        for decl in &program.declarations {
            if let Some(name) = decl.name() {
                if let Some(previous) = seen.insert(name, decl.meta.span()) {
                    return Err(EnvironmentError::DuplicateDeclaration {
                        name: name.to_string(),
                        span: decl.meta.span(),
                        previous,
                    });
                }
            }

            match &decl.kind {
                DeclarationKind::Function(func) => {
                    env.functions.insert(
                        env.module.child(&func.name),
                        FunctionSymbol {
                            signature: Signature(func.params.clone()),
                            attributes: func.attributes.clone(),
                            origin: Origin::Own,
                        },
                    );
                }
                DeclarationKind::Type(decl) => {
                    env.types.insert(
                        env.module.child(&decl.name),
                        TypeSymbol {
                            attributes: decl.attributes.clone(),
                            origin: Origin::Own,
                        },
                    );
                }
                DeclarationKind::Import(module) => {
                    let Some(imported) = imports.environment(module) else {
                        return Err(EnvironmentError::UnresolvedImport {
                            module: module.clone(),
                            span: decl.meta.span(),
                        });
                    };
                    env.imports.insert(module.clone());
                    env.add_exports(imported);
                }
            }
        }

        debug!(
            functions = env.functions.len(),
            types = env.types.len(),
            imports = env.imports.len(),
            "built environment"
        );
        Ok(env)
    }

    /// Make the own declarations of `imported` visible here
    fn add_exports(&mut self, imported: &Environment) {
        let origin = Origin::Imported(imported.module.clone());
        for (path, symbol) in imported.own_functions() {
            self.functions
                .entry(path.clone())
                .or_insert_with(|| FunctionSymbol {
                    origin: origin.clone(),
                    ..symbol.clone()
                });
        }
        for (path, symbol) in imported.types.iter().filter(|(_, s)| s.origin == Origin::Own) {
            self.types.entry(path.clone()).or_insert_with(|| TypeSymbol {
                origin: origin.clone(),
                ..symbol.clone()
            });
        }
    }

    pub fn module(&self) -> &IdentPath {
        &self.module
    }

    pub fn is_imported(&self, module: &IdentPath) -> bool {
        self.imports.contains(module)
    }

    pub fn function(&self, path: &IdentPath) -> Option<&FunctionSymbol> {
        self.functions.get(path)
    }

    pub fn type_symbol(&self, path: &IdentPath) -> Option<&TypeSymbol> {
        self.types.get(path)
    }

    pub fn functions(&self) -> impl Iterator<Item = (&IdentPath, &FunctionSymbol)> {
        self.functions.iter()
    }

    pub fn types(&self) -> impl Iterator<Item = (&IdentPath, &TypeSymbol)> {
        self.types.iter()
    }

    /// Functions declared in this compilation unit
    pub fn own_functions(&self) -> impl Iterator<Item = (&IdentPath, &FunctionSymbol)> {
        self.functions.iter().filter(|(_, s)| s.origin == Origin::Own)
    }

    /// Functions made visible by import declarations
    pub fn imported_functions(&self) -> impl Iterator<Item = (&IdentPath, &FunctionSymbol)> {
        self.functions.iter().filter(|(_, s)| s.origin != Origin::Own)
    }

    /// Own functions without a body, implemented outside of this program
    pub fn external_functions(&self) -> impl Iterator<Item = (&IdentPath, &FunctionSymbol)> {
        self.own_functions()
            .filter(|(_, s)| s.attributes.contains(&Attribute::External))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    fn io_env() -> Environment {
        let io = program(
            "std.io",
            vec![
                type_decl("File", true),
                external_function("puts", &[(Type::Str, "s")], Type::Void),
            ],
        );
        Environment::build(&io, &NoImports).unwrap()
    }

    #[test]
    fn own_declarations_are_qualified() {
        let env = io_env();
        let puts = env.function(&IdentPath::from_dotted("std.io.puts").unwrap()).unwrap();
        assert_eq!(puts.origin, Origin::Own);
        assert_eq!(puts.signature.return_type(), Type::Void);
        assert_eq!(puts.signature.parameters().len(), 1);
        assert!(puts.is_externally_linked());
        assert!(env.type_symbol(&IdentPath::from_dotted("std.io.File").unwrap()).is_some());
        assert_eq!(env.external_functions().count(), 1);
    }

    #[test]
    fn imports_expose_exports_only() {
        let mut deps = HashMap::new();
        deps.insert(IdentPath::from_dotted("std.io").unwrap(), io_env());

        let app = program(
            "app",
            vec![
                import("std.io"),
                function("main", &[], Type::Void, vec![]),
            ],
        );
        let env = Environment::build(&app, &deps).unwrap();
        deps.insert(IdentPath::single("app"), env.clone());

        let imported: Vec<_> = env.imported_functions().map(|(p, _)| p.dotted()).collect();
        assert_eq!(imported, vec!["std.io.puts"]);
        assert_eq!(env.own_functions().count(), 1);
        assert!(env.is_imported(&IdentPath::from_dotted("std.io").unwrap()));

        // the functions `app` imported are not re-exported
        let client = program("client", vec![import("app")]);
        let client_env = Environment::build(&client, &deps).unwrap();
        let visible: Vec<_> = client_env.functions().map(|(p, _)| p.dotted()).collect();
        assert_eq!(visible, vec!["app.main"]);
        assert_eq!(client_env.types().count(), 0);
    }

    #[test]
    fn duplicate_declaration() {
        let p = program(
            "m",
            vec![
                function("f", &[], Type::Void, vec![]),
                type_decl("f", true),
            ],
        );
        let err = Environment::build(&p, &NoImports).unwrap_err();
        assert!(matches!(err, EnvironmentError::DuplicateDeclaration { name, .. } if name == "f"));
    }

    #[test]
    fn missing_import() {
        let p = program("m", vec![import("nowhere")]);
        let err = Environment::build(&p, &NoImports).unwrap_err();
        assert!(matches!(err, EnvironmentError::UnresolvedImport { module, .. } if module.dotted() == "nowhere"));
    }
}

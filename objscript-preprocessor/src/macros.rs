use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use objscript_foundation::errors::{Diagnostic, DiagnosticSink, Label};
use objscript_lexer::{sources::LexedSources, token::AnyToken};

/// One formal parameter of a function-like macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: Rc<str>,
    /// True for `name...` and for the anonymous `...` (whose name is `__VA_ARGS__`).
    pub is_variadic: bool,
}

/// A preprocessor macro, created by `#define`, a predefined registration, or a command-line
/// definition.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: Rc<str>,
    /// The identifier token the macro was declared with; diagnostics about redefinitions point
    /// here.
    pub declaration: AnyToken,
    /// `None` for object-like macros. Note that `Some` with an empty list is different: that is
    /// a function-like macro taking no arguments.
    pub parameters: Option<Rc<[Parameter]>>,
    pub body: Rc<[AnyToken]>,
}

impl Macro {
    pub fn is_function(&self) -> bool {
        self.parameters.is_some()
    }

    pub fn is_variadic(&self) -> bool {
        self.parameters
            .as_ref()
            .and_then(|parameters| parameters.last())
            .map(|parameter| parameter.is_variadic)
            .unwrap_or(false)
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters
            .as_ref()
            .map(|parameters| parameters.len())
            .unwrap_or(0)
    }

    /// How many arguments a call must supply at minimum.
    pub fn required_argument_count(&self) -> usize {
        self.parameter_count() - usize::from(self.is_variadic())
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters
            .as_ref()?
            .iter()
            .position(|parameter| &*parameter.name == name)
    }

    /// The canonical declaration form, e.g. `JOIN(a, b)` or `LOG(fmt, args...)`.
    pub fn canonical_declaration(&self) -> String {
        match &self.parameters {
            None => self.name.to_string(),
            Some(parameters) => {
                let mut declaration = format!("{}(", self.name);
                for (i, parameter) in parameters.iter().enumerate() {
                    if i > 0 {
                        declaration.push_str(", ");
                    }
                    if parameter.is_variadic && &*parameter.name == "__VA_ARGS__" {
                        declaration.push_str("...");
                    } else if parameter.is_variadic {
                        declaration.push_str(&parameter.name);
                        declaration.push_str("...");
                    } else {
                        declaration.push_str(&parameter.name);
                    }
                }
                declaration.push(')');
                declaration
            }
        }
    }

    /// Two macros are equivalent iff they have the same shape (function-ness, variadic-ness,
    /// parameter names in order) and token-for-token identical bodies (kind and text).
    /// Redefining a macro with an equivalent one is silent.
    pub fn is_equivalent_to(&self, other: &Macro, sources: &LexedSources<'_>) -> bool {
        if self.is_function() != other.is_function() || self.is_variadic() != other.is_variadic() {
            return false;
        }
        match (&self.parameters, &other.parameters) {
            (Some(mine), Some(theirs)) => {
                if mine.len() != theirs.len()
                    || mine
                        .iter()
                        .zip(theirs.iter())
                        .any(|(a, b)| a.name != b.name || a.is_variadic != b.is_variadic)
                {
                    return false;
                }
            }
            (None, None) => (),
            _ => return false,
        }
        self.body.len() == other.body.len()
            && self
                .body
                .iter()
                .zip(other.body.iter())
                .all(|(a, b)| a.kind == b.kind && sources.source(a) == sources.source(b))
    }
}

/// A surviving macro reported back to the caller at the end of preprocessing, for tooling that
/// wants to know which macros were in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroSummary {
    pub name: String,
    pub declaration: String,
    pub body: String,
}

/// Owns every currently visible macro, keyed by name.
#[derive(Default)]
pub struct MacroTable {
    macros: HashMap<Rc<str>, Rc<Macro>>,
    /// Names registered before any user definition ran. Defining one of these is always fatal,
    /// even if it has been `#undef`ed in the meantime.
    predefined: HashSet<Rc<str>>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Macro>> {
        self.macros.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn is_predefined(&self, name: &str) -> bool {
        self.predefined.contains(name)
    }

    /// Marks every currently defined macro as predefined.
    pub fn seal_predefined(&mut self) {
        self.predefined.extend(self.macros.keys().cloned());
    }

    /// Registers a macro, emitting a redefinition warning when it replaces a non-equivalent
    /// definition. The caller is responsible for rejecting predefined names first (that error
    /// needs a source position the table does not have).
    pub fn define(
        &mut self,
        new: Macro,
        sources: &LexedSources<'_>,
        diagnostics: &mut dyn DiagnosticSink,
    ) {
        if let Some(previous) = self.macros.get(&new.name) {
            if !previous.is_equivalent_to(&new, sources) {
                let mut warning = Diagnostic::warning(
                    sources
                        .file_id(&new.declaration)
                        .expect("macro declarations always have a source file"),
                    format!("macro `{}` redefined", new.name),
                )
                .with_label(Label::primary(
                    sources
                        .source_range(&new.declaration)
                        .expect("macro declarations always have a source range"),
                    "this definition replaces the previous one",
                ));
                if let (Some(file), Some(range)) = (
                    sources.file_id(&previous.declaration),
                    sources.source_range(&previous.declaration),
                ) {
                    warning = warning.with_label(
                        Label::secondary(range, "previous definition is here").in_file(file),
                    );
                }
                diagnostics.emit(warning);
            }
        }
        self.macros.insert(Rc::clone(&new.name), Rc::new(new));
    }

    /// Removes a macro. Removing a name that is not defined is not an error.
    pub fn undef(&mut self, name: &str) {
        self.macros.remove(name);
    }

    /// Every non-predefined macro still defined, sorted by name for deterministic output.
    pub fn summaries(&self, sources: &LexedSources<'_>) -> Vec<MacroSummary> {
        let mut summaries: Vec<MacroSummary> = self
            .macros
            .values()
            .filter(|def| !self.predefined.contains(&def.name))
            .map(|def| MacroSummary {
                name: def.name.to_string(),
                declaration: def.canonical_declaration(),
                body: def
                    .body
                    .iter()
                    .map(|token| sources.source(token))
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}

//! The ObjScript preprocessor.
//!
//! Sits between the lexer and the grammar and rewrites the token stream: consumes directive
//! lines (`#define`, `#if`, ...), expands macro references, and hands the grammar a flat
//! [`ExpandedTokens`] buffer. Directive recognition and macro expansion are interleaved with
//! token production through the [source multiplexer](multiplex), so a macro call may begin
//! inside one token source and complete in another.

mod directive;
mod expand;
mod expanded;
mod if_eval;
mod macros;
mod multiplex;

use std::{ops::Range, rc::Rc};

use objscript_foundation::{
    errors::{Diagnostic, DiagnosticSink, Label},
    source::SourceFileId,
};
use objscript_lexer::{
    sources::OwnedSources,
    token::{AnyToken, TokenKind, TokenSpan},
    Lexer, LexerErrors,
};
use thiserror::Error;
use tracing::{info_span, warn};

use crate::multiplex::SourceStack;
pub use crate::{
    expanded::{ExpandedTokenStream, ExpandedTokens},
    macros::{Macro, MacroSummary, MacroTable, Parameter},
};
use crate::directive::ConditionalFrame;

/// Macros registered before any user definition, as `name body` lines. Attempting to `#define`
/// any of these names later is a fatal error.
const PREDEFINED_MACROS: &[&str] = &[
    "__OBJSCRIPT__ 1",
    "__OBJSCRIPT_VERSION__ 2",
    "__PLATFORM__ \"browser\"",
];

/// Preprocessing could not continue. The corresponding [`Diagnostic`] has already been emitted
/// into the sink; this only carries the offending span.
#[derive(Debug, Clone, Error)]
#[error("preprocessing failed")]
pub struct PreprocessError {
    pub span: TokenSpan,
}

/// Everything the caller gets back from a successful preprocessing run.
pub struct Preprocessed {
    /// The fully expanded token stream, ready for the grammar.
    pub tokens: ExpandedTokens,
    /// Macros still defined at end of input. Useful for answering "is this identifier a macro"
    /// and for tooling that reports which macros were in effect.
    pub macros: MacroTable,
}

/// Synthesized single tokens the expansion engine reuses (the comma joining variadic arguments,
/// and the `0`/`1` that `defined` resolves to). Created lazily, at most once per parse.
#[derive(Default)]
struct GeneratedTokens {
    comma: Option<AnyToken>,
    one: Option<AnyToken>,
    zero: Option<AnyToken>,
}

pub struct Preprocessor<'a, 's> {
    pub(crate) sources: &'a mut OwnedSources<'s>,
    pub(crate) diagnostics: &'a mut dyn DiagnosticSink,
    pub(crate) macros: MacroTable,
    pub(crate) lexer_errors: LexerErrors,
    pub(crate) stack: SourceStack,
    pub(crate) conditionals: Vec<ConditionalFrame>,
    out: ExpandedTokens,
    /// The file being preprocessed; fallback position for diagnostics that have no better one.
    pub(crate) file: SourceFileId,
    /// True iff the current or any enclosing conditional frame evaluated false.
    pub(crate) skipping: bool,
    /// Whether the most recent token of the program text was a line break. `#` introduces a
    /// directive only when this is set.
    at_line_start: bool,
    /// While set, end-of-line is significant and function-like macro calls must be completed on
    /// the current logical line.
    pub(crate) in_directive: bool,
    expansion_region_start: Option<usize>,
    expansion_last_token: Option<AnyToken>,
    generated: GeneratedTokens,
}

impl<'a, 's> Preprocessor<'a, 's> {
    pub fn new(
        sources: &'a mut OwnedSources<'s>,
        file: SourceFileId,
        program: TokenSpan,
        lexer_errors: LexerErrors,
        diagnostics: &'a mut dyn DiagnosticSink,
    ) -> Self {
        Self {
            sources,
            diagnostics,
            macros: MacroTable::new(),
            lexer_errors,
            stack: SourceStack::new(program),
            conditionals: vec![],
            out: ExpandedTokens::new(),
            file,
            skipping: false,
            at_line_start: true,
            in_directive: false,
            expansion_region_start: None,
            expansion_last_token: None,
            generated: GeneratedTokens::default(),
        }
    }

    /// Registers the predefined macros. Must run before any user definition so that
    /// [`MacroTable::seal_predefined`] can protect exactly these names.
    pub fn register_predefined_macros(&mut self) -> Result<(), PreprocessError> {
        for definition in PREDEFINED_MACROS {
            self.define_from_text("<predefined>", &format!("{definition}\n"))?;
        }
        self.macros.seal_predefined();
        Ok(())
    }

    /// Applies one command-line-style definition: `NAME`, `NAME=body`, or
    /// `NAME(params)=body`. A bare `NAME` defines it to `1`.
    pub fn apply_definition(&mut self, definition: &str) -> Result<(), PreprocessError> {
        let text = match definition.split_once('=') {
            Some((head, body)) => format!("{head} {body}\n"),
            None => format!("{definition} 1\n"),
        };
        self.define_from_text("<command line>", &text)
    }

    /// Runs `#define` parsing over a synthesized `name[(params)] body` line.
    fn define_from_text(&mut self, filename: &str, text: &str) -> Result<(), PreprocessError> {
        let synthetic = self.sources.lex_synthetic(filename, text);
        self.lexer_errors.extend(synthetic.errors);
        let floor = self.stack.push_replay(synthetic.tokens.into());
        self.in_directive = true;
        let result = self.parse_define();
        self.in_directive = false;
        // Drain whatever a malformed definition left behind so it cannot leak into the program.
        while self
            .stack
            .next_bounded(&self.sources.token_arena, floor)
            .is_some()
        {}
        result
    }

    /// Runs the preprocessor over the whole program and returns the expanded token stream.
    pub fn preprocess(mut self) -> Result<Preprocessed, PreprocessError> {
        loop {
            let (token, from_queue) = self.stack.next(&self.sources.token_arena);
            if !self.stack.in_expansion() {
                self.close_expansion_region();
            }
            match token.kind {
                TokenKind::EndOfFile => {
                    if let Some(frame) = self.conditionals.first() {
                        // Report the outermost unterminated frame; inner ones are implied.
                        let opening = frame.opening;
                        let diagnostic = Diagnostic::error(
                            self.token_file(&opening),
                            "unterminated conditional directive",
                        )
                        .with_label(Label::primary(
                            self.token_range(&opening),
                            "this conditional block is never closed with `#endif`",
                        ));
                        return self.bail(TokenSpan::single(opening.id), diagnostic);
                    }
                    self.emit(token);
                    break;
                }
                TokenKind::NewLine => {
                    self.at_line_start = true;
                }
                TokenKind::Hash if self.at_line_start && !from_queue => {
                    self.handle_directive()?;
                    self.at_line_start = true;
                }
                _ if self.skipping => {
                    self.at_line_start = false;
                }
                TokenKind::Comment => {
                    self.at_line_start = false;
                    self.emit(token);
                }
                TokenKind::Error => {
                    self.at_line_start = false;
                    self.report_error_token(token);
                }
                TokenKind::Hash | TokenKind::HashHash if !from_queue => {
                    self.at_line_start = false;
                    let diagnostic = Diagnostic::error(
                        self.token_file(&token),
                        format!("stray {} outside of a directive", token.kind.name()),
                    )
                    .with_label(Label::primary(
                        self.token_range(&token),
                        "`#` may only introduce a directive at the start of a line",
                    ));
                    return self.bail(TokenSpan::single(token.id), diagnostic);
                }
                TokenKind::Ident => {
                    self.at_line_start = false;
                    if !self.maybe_begin_expansion(token, 0)? {
                        self.emit(token);
                    }
                }
                _ => {
                    self.at_line_start = false;
                    self.emit(token);
                }
            }
        }
        Ok(Preprocessed {
            tokens: self.out,
            macros: self.macros,
        })
    }

    fn emit(&mut self, token: AnyToken) {
        if self.stack.in_expansion() {
            if self.expansion_region_start.is_none() {
                self.expansion_region_start = Some(self.out.len());
            }
            self.expansion_last_token = Some(token);
        }
        self.out.push(token);
    }

    fn close_expansion_region(&mut self) {
        if let (Some(start), Some(last)) = (
            self.expansion_region_start.take(),
            self.expansion_last_token.take(),
        ) {
            self.out.push_region(start, self.out.len(), last);
        }
    }

    /// Surfaces the lexer diagnostic behind a [`TokenKind::Error`] token. The token itself is
    /// dropped from the output.
    pub(crate) fn report_error_token(&mut self, token: AnyToken) {
        match self.lexer_errors.remove(&token.id) {
            Some(diagnostic) => self.diagnostics.emit(diagnostic),
            None => warn!(?token, "error token without corresponding diagnostic"),
        }
    }

    pub(crate) fn token_file(&self, token: &AnyToken) -> SourceFileId {
        self.sources.file_id(token).unwrap_or(self.file)
    }

    pub(crate) fn token_range(&self, token: &AnyToken) -> Range<usize> {
        self.sources.source_range(token).unwrap_or_default()
    }

    /// Emits a fatal diagnostic and aborts preprocessing.
    pub(crate) fn bail<T>(
        &mut self,
        span: TokenSpan,
        diagnostic: Diagnostic,
    ) -> Result<T, PreprocessError> {
        self.diagnostics.emit(diagnostic);
        Err(PreprocessError { span })
    }

    pub(crate) fn generated_comma(&mut self) -> AnyToken {
        if let Some(token) = self.generated.comma {
            return token;
        }
        let token = self.sources.lex_synthetic("<generated>", ",").tokens[0];
        self.generated.comma = Some(token);
        token
    }

    pub(crate) fn generated_one(&mut self) -> AnyToken {
        if let Some(token) = self.generated.one {
            return token;
        }
        let token = self.sources.lex_synthetic("<generated>", "1").tokens[0];
        self.generated.one = Some(token);
        token
    }

    pub(crate) fn generated_zero(&mut self) -> AnyToken {
        if let Some(token) = self.generated.zero {
            return token;
        }
        let token = self.sources.lex_synthetic("<generated>", "0").tokens[0];
        self.generated.zero = Some(token);
        token
    }
}

/// Lexes and preprocesses one source file. `definitions` are command-line-style macro
/// definitions applied before the first source token is read.
pub fn preprocess_source(
    sources: &mut OwnedSources<'_>,
    file: SourceFileId,
    definitions: &[String],
    diagnostics: &mut dyn DiagnosticSink,
) -> Result<Preprocessed, PreprocessError> {
    let source = Rc::clone(&sources.source_file_set.get(file).source);

    let (program, lexer_errors) = {
        let _span = info_span!("lex").entered();
        let lexer = Lexer::new(sources.token_arena.build_source_file(file), file, source);
        lexer.lex()
    };

    let _span = info_span!("preprocess").entered();
    let mut preprocessor = Preprocessor::new(sources, file, program, lexer_errors, diagnostics);
    preprocessor.register_predefined_macros()?;
    for definition in definitions {
        preprocessor.apply_definition(definition)?;
    }
    preprocessor.preprocess()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use indoc::indoc;
    use objscript_foundation::{
        errors::{Diagnostic, Severity},
        source::{SourceFile, SourceFileSet},
    };
    use objscript_lexer::{
        sources::OwnedSources,
        token::TokenKind,
        token_stream::{Channel, TokenStream},
    };

    use super::*;

    struct Run {
        /// `(kind, text)` of every CODE-channel output token, end-of-file excluded. `None` when
        /// preprocessing aborted.
        tokens: Option<Vec<(TokenKind, String)>>,
        summaries: Vec<MacroSummary>,
        diagnostics: Vec<Diagnostic>,
        error: Option<PreprocessError>,
    }

    impl Run {
        fn texts(&self) -> Vec<&str> {
            self.tokens
                .as_ref()
                .expect("preprocessing should have succeeded")
                .iter()
                .map(|(_, text)| text.as_str())
                .collect()
        }

        fn messages_with(&self, severity: Severity) -> Vec<&str> {
            self.diagnostics
                .iter()
                .filter(|diagnostic| diagnostic.severity == severity)
                .map(|diagnostic| diagnostic.message.as_str())
                .collect()
        }
    }

    fn preprocess_with(source: &str, definitions: &[&str]) -> Run {
        let mut source_file_set = SourceFileSet::new();
        let file = source_file_set.add(SourceFile::new("Test.j", Rc::from(source)));
        let mut sources = OwnedSources::new(&mut source_file_set);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let definitions: Vec<String> =
            definitions.iter().map(|definition| definition.to_string()).collect();

        match preprocess_source(&mut sources, file, &definitions, &mut diagnostics) {
            Ok(preprocessed) => {
                let lexed = sources.as_borrowed();
                let mut stream = preprocessed.tokens.stream();
                let mut tokens = vec![];
                loop {
                    let token = stream.next_from(Channel::CODE);
                    if token.kind == TokenKind::EndOfFile {
                        break;
                    }
                    tokens.push((token.kind, lexed.source(&token).to_owned()));
                }
                let summaries = preprocessed.macros.summaries(&lexed);
                Run {
                    tokens: Some(tokens),
                    summaries,
                    diagnostics,
                    error: None,
                }
            }
            Err(error) => Run {
                tokens: None,
                summaries: vec![],
                diagnostics,
                error: Some(error),
            },
        }
    }

    fn preprocess(source: &str) -> Run {
        preprocess_with(source, &[])
    }

    #[test]
    fn object_like_macro_expands_verbatim() {
        let run = preprocess(indoc! {"
            #define LIMIT 3
            var x = LIMIT;
        "});
        assert_eq!(run.texts(), ["var", "x", "=", "3", ";"]);
    }

    #[test]
    fn object_like_expansion_is_context_independent() {
        let run = preprocess(indoc! {"
            #define B 1 + 2
            B * B
        "});
        assert_eq!(run.texts(), ["1", "+", "2", "*", "1", "+", "2"]);
    }

    #[test]
    fn direct_self_reference_stays_unexpanded() {
        let run = preprocess(indoc! {"
            #define A A
            A
        "});
        assert_eq!(run.texts(), ["A"]);
    }

    #[test]
    fn mutual_recursion_terminates() {
        let run = preprocess(indoc! {"
            #define X Y
            #define Y X
            X
        "});
        assert_eq!(run.texts(), ["X"]);
    }

    #[test]
    fn twice_expands_end_to_end() {
        let run = preprocess(indoc! {"
            #define TWICE(x) ((x)+(x))
            TWICE(3+1)
        "});
        assert_eq!(
            run.texts(),
            ["(", "(", "3", "+", "1", ")", "+", "(", "3", "+", "1", ")", ")"],
        );
    }

    #[test]
    fn function_macro_without_call_is_a_plain_identifier() {
        let run = preprocess(indoc! {"
            #define F(x) x
            F;
        "});
        assert_eq!(run.texts(), ["F", ";"]);
    }

    #[test]
    fn nested_calls_in_arguments_expand_fully() {
        let run = preprocess(indoc! {"
            #define ID(x) x
            ID(ID(1))
        "});
        assert_eq!(run.texts(), ["1"]);
    }

    #[test]
    fn call_completed_from_source_after_expansion() {
        // The macro name and `(` come out of LP's expansion; the argument and `)` come from
        // the program text.
        let run = preprocess(indoc! {"
            #define ID(x) x
            #define LP ID(
            LP 1)
        "});
        assert_eq!(run.texts(), ["1"]);
    }

    #[test]
    fn argument_count_mismatch_is_fatal() {
        let run = preprocess(indoc! {"
            #define foo(a,b) a+b
            foo(1)
        "});
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("expects 2 arguments"));
        assert!(run.messages_with(Severity::Error)[0].contains("1 was given"));
    }

    #[test]
    fn exact_argument_count_expands() {
        let run = preprocess(indoc! {"
            #define foo(a,b) a+b
            foo(1,2)
        "});
        assert_eq!(run.texts(), ["1", "+", "2"]);
    }

    #[test]
    fn variadic_portion_defaults_to_empty() {
        let run = preprocess(indoc! {"
            #define var(a,...) a
            var(1)
        "});
        assert_eq!(run.texts(), ["1"]);
    }

    #[test]
    fn variadic_arguments_join_with_commas() {
        let run = preprocess(indoc! {"
            #define TAIL(a, ...) __VA_ARGS__
            TAIL(1, 2, 3)
        "});
        assert_eq!(run.texts(), ["2", ",", "3"]);
    }

    #[test]
    fn named_variadic_parameter() {
        let run = preprocess(indoc! {"
            #define CALL(f, args...) f(args)
            CALL(g, 1, 2)
        "});
        assert_eq!(run.texts(), ["g", "(", "1", ",", "2", ")"]);
    }

    #[test]
    fn comma_deletion_before_empty_variadic() {
        let run = preprocess(indoc! {"
            #define LOG(fmt, ...) log(fmt, ##__VA_ARGS__)
            LOG(\"x\")
            LOG(\"y\", 1)
        "});
        assert_eq!(
            run.texts(),
            ["log", "(", "\"x\"", ")", "log", "(", "\"y\"", ",", "1", ")"],
        );
    }

    #[test]
    fn too_few_arguments_for_variadic_is_fatal() {
        let run = preprocess(indoc! {"
            #define LOG(fmt, tag, ...) log(tag, fmt)
            LOG(1)
        "});
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("at least 2"));
    }

    #[test]
    fn stringify_collapses_interior_whitespace() {
        let run = preprocess(indoc! {"
            #define S(x) #x
            S( a   b )
        "});
        assert_eq!(run.texts(), ["\"a b\""]);
    }

    #[test]
    fn stringify_escapes_quotes_and_backslashes() {
        let run = preprocess(indoc! {r#"
            #define S(x) #x
            S("x")
        "#});
        assert_eq!(run.texts(), [r#""\"x\"""#]);
    }

    #[test]
    fn stringify_uses_raw_argument_tokens() {
        // The argument is stringified as written, not after expansion.
        let run = preprocess(indoc! {"
            #define ONE 1
            #define S(x) #x
            S(ONE + 1)
        "});
        assert_eq!(run.texts(), ["\"ONE + 1\""]);
    }

    #[test]
    fn paste_forms_a_single_token() {
        let run = preprocess(indoc! {"
            #define JOIN(a,b) a##b
            JOIN(foo, bar)
        "});
        let tokens = run.tokens.as_ref().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0], (TokenKind::Ident, String::from("foobar")));
    }

    #[test]
    fn paste_uses_raw_arguments() {
        let run = preprocess(indoc! {"
            #define ONE 1
            #define GLUE(a,b) a##b
            GLUE(ONE, 2)
        "});
        let tokens = run.tokens.as_ref().unwrap();
        assert_eq!(tokens[0], (TokenKind::Ident, String::from("ONE2")));
    }

    #[test]
    fn paste_is_left_associative_across_a_run() {
        let run = preprocess(indoc! {"
            #define T(a,b,c) a##b##c
            T(x,y,z)
        "});
        let tokens = run.tokens.as_ref().unwrap();
        assert_eq!(tokens[0], (TokenKind::Ident, String::from("xyz")));
    }

    #[test]
    fn invalid_paste_leaves_tokens_adjacent() {
        let run = preprocess(indoc! {"
            #define JOIN(a,b) a##b
            JOIN(foo, +)
        "});
        assert_eq!(run.texts(), ["foo", "+"]);
        assert!(run.error.is_none());
    }

    #[test]
    fn object_like_body_can_paste() {
        let run = preprocess(indoc! {"
            #define AB a##b
            AB
        "});
        assert_eq!(run.texts(), ["ab"]);
    }

    #[test]
    fn pasted_number_tokens_relex() {
        let run = preprocess(indoc! {"
            #define NUM(a,b) a##b
            NUM(1, 2)
        "});
        let tokens = run.tokens.as_ref().unwrap();
        assert_eq!(tokens[0], (TokenKind::IntLit, String::from("12")));
    }

    #[test]
    fn if_1_always_includes_the_body() {
        let run = preprocess(indoc! {"
            #if 1
            A
            #endif
        "});
        assert_eq!(run.texts(), ["A"]);
    }

    #[test]
    fn if_0_takes_the_else_branch() {
        let run = preprocess(indoc! {"
            #if 0
            A
            #else
            B
            #endif
        "});
        assert_eq!(run.texts(), ["B"]);
    }

    #[test]
    fn nested_conditionals_stay_balanced_in_dead_branches() {
        let run = preprocess(indoc! {"
            #if 0
            #if 1
            A
            #endif
            B
            #else
            C
            #endif
        "});
        assert_eq!(run.texts(), ["C"]);
    }

    #[test]
    fn elif_chains_take_the_first_true_branch() {
        let run = preprocess(indoc! {"
            #define TWO 2
            #if TWO == 1
            A
            #elif TWO == 2
            B
            #elif TWO == 2 + 0
            C
            #else
            D
            #endif
        "});
        assert_eq!(run.texts(), ["B"]);
    }

    #[test]
    fn define_inside_dead_branch_never_takes_effect() {
        let run = preprocess(indoc! {"
            #if 0
            #define X 1
            #endif
            #ifdef X
            A
            #else
            B
            #endif
        "});
        assert_eq!(run.texts(), ["B"]);
    }

    #[test]
    fn ifndef_and_undef() {
        let run = preprocess(indoc! {"
            #define A 1
            #undef A
            #ifndef A
            yes
            #endif
            #undef NEVER_DEFINED
        "});
        assert_eq!(run.texts(), ["yes"]);
        assert!(run.error.is_none());
    }

    #[test]
    fn command_line_definitions_apply_before_source() {
        let run = preprocess_with(
            indoc! {"
                #ifdef DEBUG
                log(DEBUG, DOUBLE(4));
                #endif
            "},
            &["DEBUG", "DOUBLE(x)=((x)*2)"],
        );
        assert_eq!(
            run.texts(),
            ["log", "(", "1", ",", "(", "(", "4", ")", "*", "2", ")", ")", ";"],
        );
    }

    #[test]
    fn redefining_a_command_line_macro_warns() {
        let run = preprocess_with("#define DEBUG 2\n", &["DEBUG"]);
        assert!(run.error.is_none());
        assert_eq!(run.messages_with(Severity::Warning).len(), 1);
        assert!(run.messages_with(Severity::Warning)[0].contains("DEBUG"));
    }

    #[test]
    fn equivalent_redefinition_is_silent() {
        let run = preprocess(indoc! {"
            #define SUM(a, b) a + b
            #define SUM(a, b) a + b
        "});
        assert!(run.error.is_none());
        assert!(run.messages_with(Severity::Warning).is_empty());
    }

    #[test]
    fn changed_redefinition_warns_once() {
        let run = preprocess(indoc! {"
            #define SUM(a, b) a + b
            #define SUM(a, b) a - b
        "});
        assert!(run.error.is_none());
        let warnings = run.messages_with(Severity::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("SUM"));
    }

    #[test]
    fn predefined_macros_are_visible() {
        let run = preprocess(indoc! {"
            #if __OBJSCRIPT__ && __OBJSCRIPT_VERSION__ >= 2
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn redefining_a_predefined_macro_is_fatal() {
        let run = preprocess("#define __OBJSCRIPT__ 2\n");
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("predefined"));
    }

    #[test]
    fn error_directive_reports_but_does_not_abort() {
        let run = preprocess(indoc! {r#"
            #error "unsupported configuration"
            #warning "here be dragons"
            x
        "#});
        assert!(run.error.is_none());
        assert_eq!(run.texts(), ["x"]);
        assert_eq!(
            run.messages_with(Severity::Error),
            ["unsupported configuration"],
        );
        assert_eq!(run.messages_with(Severity::Warning), ["here be dragons"]);
    }

    #[test]
    fn error_directive_requires_a_string_literal() {
        let run = preprocess("#error unsupported\n");
        assert!(run.error.is_some());
    }

    #[test]
    fn pragma_is_discarded() {
        let run = preprocess(indoc! {"
            #pragma whatever ( this , is ) ignored
            x
        "});
        assert_eq!(run.texts(), ["x"]);
    }

    #[test]
    fn null_directive_is_allowed() {
        let run = preprocess("#\nx\n");
        assert_eq!(run.texts(), ["x"]);
    }

    #[test]
    fn unknown_directive_is_fatal() {
        let run = preprocess("#frobnicate\n");
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("frobnicate"));
    }

    #[test]
    fn stray_hash_is_fatal() {
        let run = preprocess("x # y\n");
        assert!(run.error.is_some());
    }

    #[test]
    fn directives_must_start_the_line() {
        let run = preprocess("x; #define A 1\n");
        assert!(run.error.is_some());
    }

    #[test]
    fn elif_after_else_aborts_and_points_at_the_opening() {
        let run = preprocess(indoc! {"
            #if 0
            #else
            #elif 1
            #endif
        "});
        assert!(run.error.is_some());
        let diagnostic = run
            .diagnostics
            .iter()
            .find(|diagnostic| diagnostic.severity == Severity::Error)
            .unwrap();
        assert!(diagnostic.message.contains("expected `#endif`"));
        // One label on the offending branch, one pointing back at the opening `#if`.
        assert_eq!(diagnostic.labels.len(), 2);
    }

    #[test]
    fn unterminated_conditional_is_reported_at_the_outermost_frame() {
        let run = preprocess(indoc! {"
            #if 1
            #if 1
            A
            #endif
        "});
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("unterminated conditional"));
    }

    #[test]
    fn extra_tokens_after_endif_are_fatal() {
        let run = preprocess(indoc! {"
            #if 1
            #endif junk
        "});
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("extra tokens"));
    }

    #[test]
    fn unterminated_macro_call_is_fatal() {
        let run = preprocess(indoc! {"
            #define F(x) x
            F(1
        "});
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("unterminated call"));
    }

    #[test]
    fn line_continuation_joins_directive_lines() {
        let run = preprocess("#define SUM 1 + \\\n2\nSUM\n");
        assert_eq!(run.texts(), ["1", "+", "2"]);
    }

    #[test]
    fn macro_calls_may_span_lines_outside_directives() {
        let run = preprocess(indoc! {"
            #define ADD(a, b) a + b
            ADD(1,
                2)
        "});
        assert_eq!(run.texts(), ["1", "+", "2"]);
    }

    #[test]
    fn reserved_macro_names_are_rejected() {
        assert!(preprocess("#define defined 1\n").error.is_some());
        assert!(preprocess("#define __VA_ARGS__ 1\n").error.is_some());
    }

    #[test]
    fn invalid_parameter_lists_are_rejected() {
        assert!(preprocess("#define F(a, a) a\n").error.is_some());
        assert!(preprocess("#define F(__VA_ARGS__) x\n").error.is_some());
        assert!(preprocess("#define F(..., a) x\n").error.is_some());
    }

    #[test]
    fn invalid_stringify_and_paste_placement_is_rejected() {
        assert!(preprocess("#define F(a) #b\n").error.is_some());
        assert!(preprocess("#define F(a) ## a\n").error.is_some());
        assert!(preprocess("#define F(a) a ##\n").error.is_some());
        assert!(preprocess("#define F(a) __VA_ARGS__\n").error.is_some());
    }

    #[test]
    fn space_before_paren_makes_an_object_like_macro() {
        let run = preprocess(indoc! {"
            #define PAIR (1, 2)
            PAIR
        "});
        assert_eq!(run.texts(), ["(", "1", ",", "2", ")"]);
    }

    #[test]
    fn empty_expansion_disappears_from_output() {
        let run = preprocess(indoc! {"
            #define NOTHING
            a NOTHING b
        "});
        assert_eq!(run.texts(), ["a", "b"]);
    }

    #[test]
    fn surviving_macros_are_summarized() {
        let run = preprocess(indoc! {"
            #define LIMIT 3
            #define TWICE(x) ((x)+(x))
            #define GONE 1
            #undef GONE
        "});
        assert_eq!(
            run.summaries,
            vec![
                MacroSummary {
                    name: String::from("LIMIT"),
                    declaration: String::from("LIMIT"),
                    body: String::from("3"),
                },
                MacroSummary {
                    name: String::from("TWICE"),
                    declaration: String::from("TWICE(x)"),
                    body: String::from("( ( x ) + ( x ) )"),
                },
            ],
        );
    }

    #[test]
    fn defined_operator_with_and_without_parens() {
        let run = preprocess(indoc! {"
            #define A 1
            #if defined(A) && defined A && !defined(NOPE)
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn defined_bypasses_expansion_of_the_name() {
        // `A` expands to `B`; `defined(A)` must still ask about `A` itself.
        let run = preprocess(indoc! {"
            #define A B
            #if defined(A) && !defined(B)
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn undefined_identifiers_evaluate_to_zero() {
        let run = preprocess(indoc! {"
            #if MYSTERY
            A
            #else
            B
            #endif
        "});
        assert_eq!(run.texts(), ["B"]);
    }

    #[test]
    fn macros_expand_inside_conditions() {
        let run = preprocess(indoc! {"
            #define FOUR 4
            #define IS(n) (FOUR == n)
            #if IS(4)
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn condition_arithmetic_follows_c_precedence() {
        let run = preprocess(indoc! {"
            #if 1 + 2 * 3 == 7 && (1 + 2) * 3 == 9
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn condition_division_truncates_toward_zero() {
        let run = preprocess(indoc! {"
            #if 7 / 2 == 3 && -7 / 2 == -3 && 7 % 2 == 1
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn condition_shifts_use_32_bit_semantics() {
        let run = preprocess(indoc! {"
            #if (1 << 4) == 16 && (16 >> 2) == 4 && (-1 >>> 28) == 15
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn condition_bitwise_and_unary_operators() {
        let run = preprocess(indoc! {"
            #if (~0 == -1) && ((5 & 3) == 1) && ((5 | 2) == 7) && ((5 ^ 1) == 4) && !0
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn strict_and_loose_equality_coincide() {
        let run = preprocess(indoc! {"
            #if 1 === 1 && 2 !== 3 && 1 == 1 && 2 != 3
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn strings_coerce_to_their_numeric_value() {
        let run = preprocess(indoc! {r#"
            #if "42" == 42 && "junk" == 0
            yes
            #endif
        "#});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn boolean_literals_evaluate_to_one_and_zero() {
        let run = preprocess(indoc! {"
            #if true && !false
            yes
            #endif
        "});
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn division_by_zero_in_condition_is_fatal() {
        let run = preprocess("#if 1 / 0\n#endif\n");
        assert!(run.error.is_some());
        assert!(run.messages_with(Severity::Error)[0].contains("division by zero"));
    }

    #[test]
    fn non_decimal_literals_in_conditions_are_fatal() {
        assert!(preprocess("#if 0x10\n#endif\n").error.is_some());
        assert!(preprocess("#if 1.5\n#endif\n").error.is_some());
    }

    #[test]
    fn unexpected_tokens_in_conditions_are_fatal() {
        assert!(preprocess("#if 1 2\n#endif\n").error.is_some());
        assert!(preprocess("#if (1\n#endif\n").error.is_some());
        assert!(preprocess("#if\n#endif\n").error.is_some());
    }

    #[test]
    fn condition_lines_may_be_continued() {
        let run = preprocess("#if 1 && \\\n1\nyes\n#endif\n");
        assert_eq!(run.texts(), ["yes"]);
    }

    #[test]
    fn function_macro_call_in_condition_must_close_on_the_line() {
        // Without a call, a function-like macro name is just an identifier, which is 0.
        let run = preprocess(indoc! {"
            #define F(x) 1
            #if F
            A
            #else
            B
            #endif
        "});
        assert_eq!(run.texts(), ["B"]);
    }

    #[test]
    fn last_expansion_end_is_exposed_through_the_stream() {
        let mut source_file_set = SourceFileSet::new();
        let file = source_file_set.add(SourceFile::new(
            "Test.j",
            Rc::from("#define M 1 + 2\nM;\n"),
        ));
        let mut sources = OwnedSources::new(&mut source_file_set);
        let mut diagnostics: Vec<Diagnostic> = vec![];
        let preprocessed =
            preprocess_source(&mut sources, file, &[], &mut diagnostics).expect("must succeed");

        let lexed = sources.as_borrowed();
        let mut stream = preprocessed.tokens.stream();
        assert_eq!(lexed.source(&stream.next_from(Channel::CODE)), "1");
        assert_eq!(lexed.source(&stream.next_from(Channel::CODE)), "+");
        // While `+` is the lookahead, the expansion's true end must already be known.
        let end = stream.last_expansion_end().expect("expansion end recorded");
        assert_eq!(lexed.source(&end), "2");
        assert_eq!(lexed.source(&stream.next_from(Channel::CODE)), "2");
        assert_eq!(lexed.source(&stream.next_from(Channel::CODE)), ";");
        assert_eq!(lexed.source(&stream.last_expansion_end().unwrap()), "2");
    }
}

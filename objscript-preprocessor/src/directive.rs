use std::rc::Rc;

use indoc::indoc;
use objscript_foundation::errors::{Diagnostic, Label, Severity};
use objscript_lexer::token::{AnyToken, TokenKind, TokenSpan};

use crate::{
    macros::{Macro, Parameter},
    PreprocessError, Preprocessor,
};

/// How far an open conditional block has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConditionalPhase {
    /// Between `#if`/`#ifdef`/`#ifndef` (or an `#elif`) and the next branch directive.
    AfterIf,
    /// Past `#else`; only `#endif` may follow.
    AfterElse,
}

/// One entry of the `#if` stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConditionalFrame {
    /// The directive keyword token that opened the block; unterminated-block and
    /// misplaced-branch diagnostics point here.
    pub opening: AnyToken,
    pub phase: ConditionalPhase,
    /// Whether any branch of this block has been entered yet. Once true, later `#elif`/`#else`
    /// branches are skipped without evaluating their conditions.
    pub taken: bool,
    /// Whether this frame's currently selected branch is being skipped.
    pub skipping: bool,
    /// Whether the block as a whole sits inside a skipped outer branch. Such frames exist only
    /// to keep the conditional nesting balanced.
    pub outer_skipping: bool,
}

/// # Directive-line primitives
impl<'a, 's> Preprocessor<'a, 's> {
    /// Pulls the next meaningful token of the current directive line. Comments are skipped, and
    /// a backslash followed by a line break joins the next physical line onto this logical one.
    /// The returned token may be [`TokenKind::NewLine`] or [`TokenKind::EndOfFile`], both of
    /// which mean the directive line ended.
    pub(crate) fn next_directive_token(&mut self) -> Result<AnyToken, PreprocessError> {
        loop {
            let (token, _) = self.stack.next(&self.sources.token_arena);
            match token.kind {
                TokenKind::Comment => (),
                TokenKind::Error => self.report_error_token(token),
                TokenKind::Backslash => {
                    let (next, _) = self.stack.next(&self.sources.token_arena);
                    if next.kind != TokenKind::NewLine {
                        let diagnostic = Diagnostic::error(
                            self.token_file(&next),
                            "newline expected after backslash `\\`",
                        )
                        .with_label(Label::secondary(
                            self.token_range(&token),
                            "this backslash continues the directive on the next line",
                        ))
                        .with_label(Label::primary(
                            self.token_range(&next),
                            "this is where a newline was expected",
                        ));
                        return self.bail(TokenSpan::single(next.id), diagnostic);
                    }
                }
                _ => return Ok(token),
            }
        }
    }

    /// Discards the rest of the directive line without validating it, honoring line
    /// continuations. Used for `#pragma` and for directives inside skipped branches.
    pub(crate) fn skip_rest_of_directive_line(&mut self) {
        loop {
            let (token, _) = self.stack.next(&self.sources.token_arena);
            match token.kind {
                TokenKind::NewLine | TokenKind::EndOfFile => break,
                TokenKind::Backslash => {
                    let snapshot = self.stack.snapshot();
                    let (next, _) = self.stack.next(&self.sources.token_arena);
                    if next.kind != TokenKind::NewLine {
                        self.stack.restore(snapshot);
                    }
                }
                _ => (),
            }
        }
    }

    /// Requires that the directive line ends here; anything else is fatal.
    pub(crate) fn expect_end_of_directive_line(
        &mut self,
        directive: &AnyToken,
    ) -> Result<(), PreprocessError> {
        let token = self.next_directive_token()?;
        match token.kind {
            TokenKind::NewLine | TokenKind::EndOfFile => Ok(()),
            _ => {
                let diagnostic = Diagnostic::error(
                    self.token_file(&token),
                    format!(
                        "extra tokens after `#{}` directive",
                        self.sources.source(directive)
                    ),
                )
                .with_label(Label::primary(
                    self.token_range(&token),
                    "the directive ends at the previous token; this one is not allowed",
                ));
                self.bail(TokenSpan::single(token.id), diagnostic)
            }
        }
    }
}

/// # The directive state machine
impl<'a, 's> Preprocessor<'a, 's> {
    /// Handles one `#`-introduced line. The leading `#` has already been consumed.
    pub(crate) fn handle_directive(&mut self) -> Result<(), PreprocessError> {
        self.in_directive = true;
        let result = self.dispatch_directive();
        self.in_directive = false;
        result
    }

    fn dispatch_directive(&mut self) -> Result<(), PreprocessError> {
        let keyword = self.next_directive_token()?;
        match keyword.kind {
            // A `#` alone on its line does nothing.
            TokenKind::NewLine | TokenKind::EndOfFile => return Ok(()),
            TokenKind::Ident => (),
            _ if self.skipping => {
                self.skip_rest_of_directive_line();
                return Ok(());
            }
            _ => {
                let diagnostic = Diagnostic::error(
                    self.token_file(&keyword),
                    "expected directive name after `#`",
                )
                .with_label(Label::primary(
                    self.token_range(&keyword),
                    format!("directive name expected, but got {}", keyword.kind.name()),
                ));
                return self.bail(TokenSpan::single(keyword.id), diagnostic);
            }
        }

        let name = self.sources.source(&keyword).to_owned();
        match name.as_str() {
            "define" if !self.skipping => self.parse_define(),
            "undef" if !self.skipping => self.parse_undef(),
            "if" => self.parse_if(keyword),
            "ifdef" => self.parse_ifdef(keyword, false),
            "ifndef" => self.parse_ifdef(keyword, true),
            "elif" => self.parse_elif(keyword),
            "else" => self.parse_else(keyword),
            "endif" => self.parse_endif(keyword),
            "pragma" if !self.skipping => {
                self.skip_rest_of_directive_line();
                Ok(())
            }
            "error" if !self.skipping => self.parse_error_warning(keyword, Severity::Error),
            "warning" if !self.skipping => self.parse_error_warning(keyword, Severity::Warning),
            _ if self.skipping => {
                // Inside a dead branch only the conditional directives above matter; everything
                // else is discarded without further scrutiny.
                self.skip_rest_of_directive_line();
                Ok(())
            }
            _ => {
                let diagnostic =
                    Diagnostic::error(self.token_file(&keyword), format!("unknown directive `#{name}`"))
                        .with_label(Label::primary(self.token_range(&keyword), ""));
                self.bail(TokenSpan::single(keyword.id), diagnostic)
            }
        }
    }

    pub(crate) fn update_skipping(&mut self) {
        self.skipping = self.conditionals.iter().any(|frame| frame.skipping);
    }
}

/// # `#define` and `#undef`
impl<'a, 's> Preprocessor<'a, 's> {
    pub(crate) fn parse_define(&mut self) -> Result<(), PreprocessError> {
        let name_token = self.next_directive_token()?;
        if name_token.kind != TokenKind::Ident {
            let diagnostic =
                Diagnostic::error(self.token_file(&name_token), "macro name expected")
                    .with_label(Label::primary(
                        self.token_range(&name_token),
                        format!("identifier expected, but got {}", name_token.kind.name()),
                    ));
            return self.bail(TokenSpan::single(name_token.id), diagnostic);
        }

        let name = self.sources.source(&name_token).to_owned();
        if name == "defined" || name == "__VA_ARGS__" {
            let diagnostic = Diagnostic::error(
                self.token_file(&name_token),
                format!("`{name}` cannot be used as a macro name"),
            )
            .with_label(Label::primary(
                self.token_range(&name_token),
                "this name is reserved by the preprocessor",
            ));
            return self.bail(TokenSpan::single(name_token.id), diagnostic);
        }
        if self.macros.is_predefined(&name) {
            let diagnostic = Diagnostic::error(
                self.token_file(&name_token),
                format!("`{name}` is predefined and cannot be redefined"),
            )
            .with_label(Label::primary(self.token_range(&name_token), ""));
            return self.bail(TokenSpan::single(name_token.id), diagnostic);
        }

        // A parameter list exists only when `(` directly follows the name, with no space in
        // between; otherwise the `(` already belongs to the body.
        let parameters = {
            let snapshot = self.stack.snapshot();
            let (token, _) = self.stack.next(&self.sources.token_arena);
            if token.kind == TokenKind::LeftParen
                && self
                    .sources
                    .tokens_are_hugging_each_other(name_token.id, token.id)
            {
                Some(self.parse_macro_parameters(&token)?)
            } else {
                self.stack.restore(snapshot);
                None
            }
        };

        let mut body = vec![];
        loop {
            let token = self.next_directive_token()?;
            match token.kind {
                TokenKind::NewLine | TokenKind::EndOfFile => break,
                _ => body.push(token),
            }
        }

        for (edge, description) in [(body.first(), "start"), (body.last(), "end")] {
            if let Some(&token) = edge {
                if token.kind == TokenKind::HashHash {
                    let diagnostic = Diagnostic::error(
                        self.token_file(&token),
                        format!("`##` cannot appear at the {description} of a macro body"),
                    )
                    .with_label(Label::primary(
                        self.token_range(&token),
                        "`##` needs a token on both sides to paste together",
                    ));
                    return self.bail(TokenSpan::single(token.id), diagnostic);
                }
            }
        }

        let definition = Macro {
            name: Rc::from(name),
            declaration: name_token,
            parameters: parameters.map(Rc::from),
            body: Rc::from(body),
        };
        self.validate_macro_body(&definition)?;

        let sources = self.sources.as_borrowed();
        self.macros.define(definition, &sources, self.diagnostics);
        Ok(())
    }

    fn parse_macro_parameters(
        &mut self,
        open: &AnyToken,
    ) -> Result<Vec<Parameter>, PreprocessError> {
        let mut parameters: Vec<Parameter> = vec![];
        loop {
            let token = self.next_directive_token()?;
            match token.kind {
                TokenKind::RightParen if parameters.is_empty() => break,
                TokenKind::Ellipsis => {
                    parameters.push(Parameter {
                        name: Rc::from("__VA_ARGS__"),
                        is_variadic: true,
                    });
                    let close = self.next_directive_token()?;
                    if close.kind != TokenKind::RightParen {
                        let diagnostic = Diagnostic::error(
                            self.token_file(&close),
                            "`...` must be the last macro parameter",
                        )
                        .with_label(Label::primary(
                            self.token_range(&close),
                            "`)` expected here",
                        ));
                        return self.bail(TokenSpan::single(close.id), diagnostic);
                    }
                    break;
                }
                TokenKind::Ident => {
                    let parameter_name = self.sources.source(&token).to_owned();
                    if parameter_name == "__VA_ARGS__" {
                        let diagnostic = Diagnostic::error(
                            self.token_file(&token),
                            "`__VA_ARGS__` cannot be declared as a macro parameter",
                        )
                        .with_label(Label::primary(
                            self.token_range(&token),
                            "use a trailing `...` to make the macro variadic instead",
                        ));
                        return self.bail(TokenSpan::single(token.id), diagnostic);
                    }
                    if parameters
                        .iter()
                        .any(|parameter| &*parameter.name == parameter_name)
                    {
                        let diagnostic = Diagnostic::error(
                            self.token_file(&token),
                            format!("duplicate macro parameter `{parameter_name}`"),
                        )
                        .with_label(Label::primary(self.token_range(&token), ""));
                        return self.bail(TokenSpan::single(token.id), diagnostic);
                    }

                    let separator = self.next_directive_token()?;
                    match separator.kind {
                        TokenKind::Ellipsis => {
                            parameters.push(Parameter {
                                name: Rc::from(parameter_name),
                                is_variadic: true,
                            });
                            let close = self.next_directive_token()?;
                            if close.kind != TokenKind::RightParen {
                                let diagnostic = Diagnostic::error(
                                    self.token_file(&close),
                                    "a variadic parameter must be the last macro parameter",
                                )
                                .with_label(Label::primary(
                                    self.token_range(&close),
                                    "`)` expected here",
                                ));
                                return self.bail(TokenSpan::single(close.id), diagnostic);
                            }
                            break;
                        }
                        TokenKind::Comma => parameters.push(Parameter {
                            name: Rc::from(parameter_name),
                            is_variadic: false,
                        }),
                        TokenKind::RightParen => {
                            parameters.push(Parameter {
                                name: Rc::from(parameter_name),
                                is_variadic: false,
                            });
                            break;
                        }
                        _ => {
                            let diagnostic = Diagnostic::error(
                                self.token_file(&separator),
                                "`,` or `)` expected in macro parameter list",
                            )
                            .with_label(Label::primary(self.token_range(&separator), ""));
                            return self.bail(TokenSpan::single(separator.id), diagnostic);
                        }
                    }
                }
                TokenKind::NewLine | TokenKind::EndOfFile => {
                    let diagnostic = Diagnostic::error(
                        self.token_file(open),
                        "unterminated macro parameter list",
                    )
                    .with_label(Label::primary(
                        self.token_range(open),
                        "this `(` does not have a matching `)`",
                    ));
                    return self.bail(TokenSpan::single(open.id), diagnostic);
                }
                _ => {
                    let diagnostic = Diagnostic::error(
                        self.token_file(&token),
                        "macro parameter name expected",
                    )
                    .with_label(Label::primary(
                        self.token_range(&token),
                        format!("identifier expected, but got {}", token.kind.name()),
                    ));
                    return self.bail(TokenSpan::single(token.id), diagnostic);
                }
            }
        }
        Ok(parameters)
    }

    fn validate_macro_body(&mut self, definition: &Macro) -> Result<(), PreprocessError> {
        for (i, token) in definition.body.iter().enumerate() {
            match token.kind {
                TokenKind::Hash if definition.is_function() => {
                    let stringifies_parameter =
                        definition.body.get(i + 1).map_or(false, |next| {
                            next.kind == TokenKind::Ident
                                && definition
                                    .parameter_index(self.sources.source(next))
                                    .is_some()
                        });
                    if !stringifies_parameter {
                        let diagnostic = Diagnostic::error(
                            self.token_file(token),
                            "`#` must be followed by a macro parameter name",
                        )
                        .with_label(Label::primary(
                            self.token_range(token),
                            "only macro parameters can be stringified",
                        ));
                        return self.bail(TokenSpan::single(token.id), diagnostic);
                    }
                }
                TokenKind::Ident
                    if !definition.is_variadic()
                        && self.sources.source(token) == "__VA_ARGS__" =>
                {
                    let diagnostic = Diagnostic::error(
                        self.token_file(token),
                        "`__VA_ARGS__` may only appear in the body of a variadic macro",
                    )
                    .with_label(Label::primary(self.token_range(token), ""));
                    return self.bail(TokenSpan::single(token.id), diagnostic);
                }
                _ => (),
            }
        }
        Ok(())
    }

    fn parse_undef(&mut self) -> Result<(), PreprocessError> {
        let name_token = self.next_directive_token()?;
        if name_token.kind != TokenKind::Ident {
            let diagnostic = Diagnostic::error(
                self.token_file(&name_token),
                "expected name of macro to undefine",
            )
            .with_label(Label::primary(
                self.token_range(&name_token),
                format!("identifier expected, but got {}", name_token.kind.name()),
            ));
            return self.bail(TokenSpan::single(name_token.id), diagnostic);
        }
        let name = self.sources.source(&name_token).to_owned();
        self.expect_end_of_directive_line(&name_token)?;
        // Undefining a macro that does not exist is fine.
        self.macros.undef(&name);
        Ok(())
    }
}

/// # Conditional directives
impl<'a, 's> Preprocessor<'a, 's> {
    fn parse_if(&mut self, keyword: AnyToken) -> Result<(), PreprocessError> {
        if self.skipping {
            // The whole block is dead; push an inert frame just to keep nesting balanced.
            self.skip_rest_of_directive_line();
            self.conditionals.push(ConditionalFrame {
                opening: keyword,
                phase: ConditionalPhase::AfterIf,
                taken: true,
                skipping: true,
                outer_skipping: true,
            });
            return Ok(());
        }

        let value = self.evaluate_condition(&keyword)?;
        self.conditionals.push(ConditionalFrame {
            opening: keyword,
            phase: ConditionalPhase::AfterIf,
            taken: value,
            skipping: !value,
            outer_skipping: false,
        });
        self.update_skipping();
        Ok(())
    }

    fn parse_ifdef(&mut self, keyword: AnyToken, negate: bool) -> Result<(), PreprocessError> {
        if self.skipping {
            self.skip_rest_of_directive_line();
            self.conditionals.push(ConditionalFrame {
                opening: keyword,
                phase: ConditionalPhase::AfterIf,
                taken: true,
                skipping: true,
                outer_skipping: true,
            });
            return Ok(());
        }

        let name_token = self.next_directive_token()?;
        if name_token.kind != TokenKind::Ident {
            let diagnostic = Diagnostic::error(
                self.token_file(&name_token),
                format!(
                    "expected macro name after `#{}`",
                    self.sources.source(&keyword)
                ),
            )
            .with_label(Label::primary(
                self.token_range(&name_token),
                format!("identifier expected, but got {}", name_token.kind.name()),
            ));
            return self.bail(TokenSpan::single(name_token.id), diagnostic);
        }
        let value = self.macros.is_defined(self.sources.source(&name_token)) != negate;
        self.expect_end_of_directive_line(&keyword)?;

        self.conditionals.push(ConditionalFrame {
            opening: keyword,
            phase: ConditionalPhase::AfterIf,
            taken: value,
            skipping: !value,
            outer_skipping: false,
        });
        self.update_skipping();
        Ok(())
    }

    fn parse_elif(&mut self, keyword: AnyToken) -> Result<(), PreprocessError> {
        let Some(top) = self.conditionals.last().copied() else {
            let diagnostic = Diagnostic::error(
                self.token_file(&keyword),
                "`#elif` without a matching `#if`",
            )
            .with_label(Label::primary(self.token_range(&keyword), ""));
            return self.bail(TokenSpan::single(keyword.id), diagnostic);
        };
        if top.phase == ConditionalPhase::AfterElse {
            return self.misplaced_branch(&keyword, &top);
        }

        if top.outer_skipping || top.taken {
            // Either the whole block is dead or a previous branch was already entered; the
            // condition is not even evaluated.
            self.skip_rest_of_directive_line();
            let top = self.conditionals.last_mut().expect("frame checked above");
            top.skipping = true;
        } else {
            let value = self.evaluate_condition(&keyword)?;
            let top = self.conditionals.last_mut().expect("frame checked above");
            top.taken = value;
            top.skipping = !value;
        }
        self.update_skipping();
        Ok(())
    }

    fn parse_else(&mut self, keyword: AnyToken) -> Result<(), PreprocessError> {
        let Some(top) = self.conditionals.last().copied() else {
            let diagnostic = Diagnostic::error(
                self.token_file(&keyword),
                "`#else` without a matching `#if`",
            )
            .with_label(Label::primary(self.token_range(&keyword), ""));
            return self.bail(TokenSpan::single(keyword.id), diagnostic);
        };
        if top.phase == ConditionalPhase::AfterElse {
            return self.misplaced_branch(&keyword, &top);
        }

        if top.outer_skipping {
            self.skip_rest_of_directive_line();
        } else {
            self.expect_end_of_directive_line(&keyword)?;
        }
        let top = self.conditionals.last_mut().expect("frame checked above");
        top.phase = ConditionalPhase::AfterElse;
        if !top.outer_skipping {
            // The else branch is live exactly when no earlier branch was.
            top.skipping = top.taken;
            top.taken = true;
        }
        self.update_skipping();
        Ok(())
    }

    fn parse_endif(&mut self, keyword: AnyToken) -> Result<(), PreprocessError> {
        let Some(frame) = self.conditionals.pop() else {
            let diagnostic = Diagnostic::error(
                self.token_file(&keyword),
                "`#endif` without a matching `#if`",
            )
            .with_label(Label::primary(self.token_range(&keyword), ""));
            return self.bail(TokenSpan::single(keyword.id), diagnostic);
        };
        if frame.outer_skipping {
            self.skip_rest_of_directive_line();
        } else {
            self.expect_end_of_directive_line(&keyword)?;
        }
        self.update_skipping();
        Ok(())
    }

    /// An `#elif` or `#else` showed up after the block already saw `#else`. This aborts, and
    /// the diagnostic must also point at the opening `#if` so the mismatch can be untangled.
    fn misplaced_branch<T>(
        &mut self,
        keyword: &AnyToken,
        frame: &ConditionalFrame,
    ) -> Result<T, PreprocessError> {
        let diagnostic = Diagnostic::error(
            self.token_file(keyword),
            format!(
                "`#{}` after `#else`; expected `#endif`",
                self.sources.source(keyword)
            ),
        )
        .with_label(Label::primary(
            self.token_range(keyword),
            "this branch cannot follow `#else`",
        ))
        .with_label(
            Label::secondary(
                self.token_range(&frame.opening),
                "the conditional block was opened here",
            )
            .in_file(self.token_file(&frame.opening)),
        );
        self.bail(TokenSpan::single(keyword.id), diagnostic)
    }
}

/// # `#error` and `#warning`
impl<'a, 's> Preprocessor<'a, 's> {
    fn parse_error_warning(
        &mut self,
        keyword: AnyToken,
        severity: Severity,
    ) -> Result<(), PreprocessError> {
        const NOTE: &str = indoc! {r#"
            note: the message must be a single string literal, like:
                      #error "this configuration is unsupported"
        "#};

        let message_token = self.next_directive_token()?;
        if message_token.kind != TokenKind::StringLit {
            let diagnostic = Diagnostic::error(
                self.token_file(&message_token),
                format!(
                    "`#{}` requires a string literal message",
                    self.sources.source(&keyword)
                ),
            )
            .with_label(Label::primary(
                self.token_range(&message_token),
                format!(
                    "string literal expected, but got {}",
                    message_token.kind.name()
                ),
            ))
            .with_note(NOTE);
            return self.bail(TokenSpan::single(message_token.id), diagnostic);
        }
        let text = self.sources.source(&message_token);
        let message = text[1..text.len() - 1].to_owned();
        self.expect_end_of_directive_line(&keyword)?;

        // `#error` does not abort preprocessing by itself; the caller decides what to make of
        // the collected diagnostics.
        let diagnostic = Diagnostic::new(severity, self.token_file(&keyword), message)
            .with_label(Label::primary(self.token_range(&message_token), ""));
        self.diagnostics.emit(diagnostic);
        Ok(())
    }
}

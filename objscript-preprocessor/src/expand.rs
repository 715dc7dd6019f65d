use std::rc::Rc;

use objscript_foundation::errors::{Diagnostic, Label};
use objscript_lexer::token::{AnyToken, TokenKind, TokenSpan};
use objscript_lexer::token_stream::Channel;

use crate::{macros::Macro, PreprocessError, Preprocessor};

/// One collected argument of a function-like macro call.
///
/// The same argument can be needed in up to three forms: raw (next to `##` or `#`), expanded
/// (ordinary substitution) and stringified (`#`). The latter two are computed at most once per
/// call and cached here.
pub(crate) struct MacroArgument {
    raw: Vec<AnyToken>,
    expanded: Option<Vec<AnyToken>>,
    stringified: Option<AnyToken>,
}

impl MacroArgument {
    fn new(raw: Vec<AnyToken>) -> Self {
        Self {
            raw,
            expanded: None,
            stringified: None,
        }
    }
}

/// # The macro expansion engine
impl<'a, 's> Preprocessor<'a, 's> {
    /// Decides whether `token` begins a macro expansion, and if so, substitutes the macro's body
    /// and pushes the replacement onto the source stack. Returns false when the token is to be
    /// passed through as a plain identifier: it does not name a visible macro, it names a macro
    /// that is currently expanding (the self-reference guard), or it names a function-like macro
    /// that is not being called.
    pub(crate) fn maybe_begin_expansion(
        &mut self,
        token: AnyToken,
        floor: usize,
    ) -> Result<bool, PreprocessError> {
        let definition = {
            let name = self.sources.source(&token);
            if self.stack.is_expanding(name) {
                None
            } else {
                self.macros.get(name).cloned()
            }
        };
        let Some(definition) = definition else {
            return Ok(false);
        };

        let replacement = if definition.is_function() {
            // A function-like macro only expands when the next significant token is `(`.
            if !self.consume_call_open_paren(floor) {
                return Ok(false);
            }
            let mut arguments = self.collect_arguments(&token, &definition, floor)?;
            self.substitute_body(&definition, &mut arguments)?
        } else {
            let mut no_arguments: [MacroArgument; 0] = [];
            self.substitute_body(&definition, &mut no_arguments)?
        };

        self.stack
            .push_expansion(Rc::clone(&definition.name), replacement.into());
        Ok(true)
    }

    /// Peeks past whitespace and comments for a `(`; consumes up to and including it when
    /// found, and rewinds everything otherwise. The lookahead deliberately crosses token source
    /// boundaries: the `(` completing a call may come from the program text even when the macro
    /// name came out of another expansion.
    fn consume_call_open_paren(&mut self, floor: usize) -> bool {
        let snapshot = self.stack.snapshot();
        loop {
            let Some((token, _)) = self.stack.next_bounded(&self.sources.token_arena, floor)
            else {
                break;
            };
            match token.kind {
                TokenKind::Comment => (),
                TokenKind::NewLine if !self.in_directive => (),
                TokenKind::LeftParen => return true,
                _ => break,
            }
        }
        self.stack.restore(snapshot);
        false
    }

    /// Collects the call's arguments. The opening `(` has been consumed; scanning tracks paren
    /// depth and splits on top-level commas. Brackets and braces are free to be unbalanced
    /// within an argument; only parentheses matter here.
    fn collect_arguments(
        &mut self,
        call: &AnyToken,
        definition: &Macro,
        floor: usize,
    ) -> Result<Vec<MacroArgument>, PreprocessError> {
        let mut arguments = vec![];
        let mut current = vec![];
        let mut depth = 1usize;
        loop {
            let pulled = self.stack.next_bounded(&self.sources.token_arena, floor);
            let Some((token, _)) = pulled else {
                return self.unterminated_call(call, definition);
            };
            match token.kind {
                TokenKind::EndOfFile => return self.unterminated_call(call, definition),
                TokenKind::NewLine if self.in_directive => {
                    return self.unterminated_call(call, definition)
                }
                TokenKind::NewLine | TokenKind::Comment => (),
                TokenKind::Error => self.report_error_token(token),
                TokenKind::LeftParen => {
                    depth += 1;
                    current.push(token);
                }
                TokenKind::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    current.push(token);
                }
                TokenKind::Comma if depth == 1 => {
                    arguments.push(MacroArgument::new(std::mem::take(&mut current)));
                }
                _ => current.push(token),
            }
        }
        arguments.push(MacroArgument::new(current));

        // `NAME()` is a zero-argument call when the macro declares no parameters; otherwise the
        // emptiness between the parens is one empty argument.
        if definition.parameter_count() == 0
            && arguments.len() == 1
            && arguments[0].raw.is_empty()
        {
            arguments.clear();
        }

        let required = definition.required_argument_count();
        let count_matches = if definition.is_variadic() {
            arguments.len() >= required
        } else {
            arguments.len() == definition.parameter_count()
        };
        if !count_matches {
            let diagnostic = Diagnostic::error(
                self.token_file(call),
                format!(
                    "macro `{}` expects {}{} argument{}, but {} {} given",
                    definition.name,
                    if definition.is_variadic() {
                        "at least "
                    } else {
                        ""
                    },
                    required,
                    if required == 1 { "" } else { "s" },
                    arguments.len(),
                    if arguments.len() == 1 { "was" } else { "were" },
                ),
            )
            .with_label(Label::primary(self.token_range(call), "in this macro call"));
            return self.bail(TokenSpan::single(call.id), diagnostic);
        }
        Ok(arguments)
    }

    fn unterminated_call<T>(
        &mut self,
        call: &AnyToken,
        definition: &Macro,
    ) -> Result<T, PreprocessError> {
        let diagnostic = Diagnostic::error(
            self.token_file(call),
            format!("unterminated call to macro `{}`", definition.name),
        )
        .with_label(Label::primary(
            self.token_range(call),
            "the call's `(` is never closed",
        ));
        self.bail(TokenSpan::single(call.id), diagnostic)
    }

    /// The substitution pass: walks the macro body left to right, replacing parameter
    /// references with argument tokens (raw next to `##`, stringified after `#`, expanded
    /// otherwise) and performing `##` pastes. The result is pushed as an expansion queue by the
    /// caller; the main pull loop then re-examines every produced token, which is the rescan
    /// pass that expands nested macro references.
    fn substitute_body(
        &mut self,
        definition: &Macro,
        arguments: &mut [MacroArgument],
    ) -> Result<Vec<AnyToken>, PreprocessError> {
        let body = Rc::clone(&definition.body);
        let named_count = definition.required_argument_count();
        let mut output: Vec<AnyToken> = vec![];
        // Set when the previous body item was a parameter that substituted to nothing; `##`
        // must not reach past it and grab whatever the item before that produced.
        let mut previous_was_empty = false;
        let mut i = 0;
        while i < body.len() {
            let token = body[i];
            let empty_before = std::mem::replace(&mut previous_was_empty, false);
            match token.kind {
                TokenKind::Hash if definition.is_function() => {
                    // Definition-time validation guarantees a parameter name follows.
                    let parameter = body[i + 1];
                    let index = definition
                        .parameter_index(self.sources.source(&parameter))
                        .expect("`#` is always followed by a parameter");
                    let stringified = self.stringified_argument(definition, arguments, index)?;
                    output.push(stringified);
                    i += 2;
                }
                TokenKind::HashHash => {
                    // `##` is never the last body token, so indexing is fine.
                    let right = body[i + 1];
                    let right_index = if right.kind == TokenKind::Ident {
                        definition.parameter_index(self.sources.source(&right))
                    } else {
                        None
                    };
                    let right_is_variadic = right_index.map_or(false, |index| {
                        definition.parameters.as_ref().expect("indexed above")[index].is_variadic
                    });
                    let right_tokens = match right_index {
                        Some(_) if right_is_variadic => {
                            self.variadic_raw_tokens(arguments, named_count)
                        }
                        Some(index) => arguments[index].raw.clone(),
                        None => vec![right],
                    };

                    if right_is_variadic
                        && right_tokens.is_empty()
                        && !empty_before
                        && output.last().map_or(false, |t| t.kind == TokenKind::Comma)
                    {
                        // GNU comma deletion: `, ## ARGS` with no variadic arguments drops the
                        // comma along with the paste.
                        output.pop();
                    } else {
                        let left = if empty_before { None } else { output.pop() };
                        self.paste_tokens_into(&mut output, left, right_tokens);
                    }
                    i += 2;
                }
                TokenKind::Ident => {
                    match definition.parameter_index(self.sources.source(&token)) {
                        Some(index) => {
                            let is_variadic = definition.parameters.as_ref()
                                .expect("indexed above")[index]
                                .is_variadic;
                            let followed_by_paste = body
                                .get(i + 1)
                                .map_or(false, |next| next.kind == TokenKind::HashHash);
                            // Concatenation must not expand first, so `##` neighbors get the
                            // raw argument; everything else gets the expanded form.
                            let substitution = if followed_by_paste {
                                if is_variadic {
                                    self.variadic_raw_tokens(arguments, named_count)
                                } else {
                                    arguments[index].raw.clone()
                                }
                            } else if is_variadic {
                                self.variadic_expanded_tokens(arguments, named_count)?
                            } else {
                                self.argument_expanded(&mut arguments[index])?
                            };
                            previous_was_empty = substitution.is_empty();
                            output.extend(substitution);
                        }
                        None => output.push(token),
                    }
                    i += 1;
                }
                _ => {
                    output.push(token);
                    i += 1;
                }
            }
        }
        Ok(output)
    }

    /// Fully macro-expands a detached token list (the argument prescan). The tokens are
    /// replayed through the source stack behind a barrier, so nested expansions work exactly
    /// like they do at the top level, but can never consume tokens beyond the list: a
    /// function-like macro name at the end of the list simply stays unexpanded.
    pub(crate) fn expand_token_list(
        &mut self,
        tokens: &[AnyToken],
    ) -> Result<Vec<AnyToken>, PreprocessError> {
        if tokens.is_empty() {
            return Ok(vec![]);
        }
        let floor = self.stack.push_replay(tokens.to_vec().into());
        let mut output = vec![];
        while let Some((token, _)) = self.stack.next_bounded(&self.sources.token_arena, floor) {
            match token.kind {
                TokenKind::Comment | TokenKind::NewLine => (),
                TokenKind::Error => self.report_error_token(token),
                TokenKind::Ident => {
                    if !self.maybe_begin_expansion(token, floor)? {
                        output.push(token);
                    }
                }
                _ => output.push(token),
            }
        }
        Ok(output)
    }

    fn argument_expanded(
        &mut self,
        argument: &mut MacroArgument,
    ) -> Result<Vec<AnyToken>, PreprocessError> {
        if argument.expanded.is_none() {
            let raw = argument.raw.clone();
            argument.expanded = Some(self.expand_token_list(&raw)?);
        }
        Ok(argument.expanded.clone().expect("computed just above"))
    }

    /// Raw tokens of all variadic arguments, joined by synthesized commas.
    fn variadic_raw_tokens(
        &mut self,
        arguments: &[MacroArgument],
        named_count: usize,
    ) -> Vec<AnyToken> {
        let mut tokens = vec![];
        let start = named_count.min(arguments.len());
        for (i, argument) in arguments[start..].iter().enumerate() {
            if i > 0 {
                tokens.push(self.generated_comma());
            }
            tokens.extend(argument.raw.iter().copied());
        }
        tokens
    }

    /// Expanded tokens of all variadic arguments, joined by synthesized commas.
    fn variadic_expanded_tokens(
        &mut self,
        arguments: &mut [MacroArgument],
        named_count: usize,
    ) -> Result<Vec<AnyToken>, PreprocessError> {
        let mut tokens = vec![];
        let start = named_count.min(arguments.len());
        for i in start..arguments.len() {
            if i > start {
                tokens.push(self.generated_comma());
            }
            let expanded = self.argument_expanded(&mut arguments[i])?;
            tokens.extend(expanded);
        }
        Ok(tokens)
    }

    /// Synthesizes the string literal token for `#parameter`.
    fn stringified_argument(
        &mut self,
        definition: &Macro,
        arguments: &mut [MacroArgument],
        index: usize,
    ) -> Result<AnyToken, PreprocessError> {
        let is_variadic =
            definition.parameters.as_ref().expect("validated at definition")[index].is_variadic;
        if is_variadic {
            let named_count = definition.required_argument_count();
            let start = named_count.min(arguments.len());
            let text = arguments[start..]
                .iter()
                .map(|argument| self.argument_source_text(argument))
                .collect::<Vec<_>>()
                .join(", ");
            return Ok(self.make_string_token(&text));
        }
        if let Some(token) = arguments[index].stringified {
            return Ok(token);
        }
        let text = self.argument_source_text(&arguments[index]);
        let token = self.make_string_token(&text);
        arguments[index].stringified = Some(token);
        Ok(token)
    }

    /// The argument's raw source text, trimmed, with interior whitespace runs collapsed to one
    /// space each.
    fn argument_source_text(&self, argument: &MacroArgument) -> String {
        let Some((first, last)) = argument.raw.first().zip(argument.raw.last()) else {
            return String::new();
        };
        let arena = &self.sources.token_arena;
        let same_file = argument
            .raw
            .iter()
            .all(|token| arena.source_file_id(token.id) == arena.source_file_id(first.id));
        let raw = if same_file {
            let start = arena.element(first.id).source_range.start;
            let end = arena.element(last.id).source_range.end;
            let file = arena.source_file_id(first.id);
            self.sources.source_file_set.get(file).source[start..end].to_owned()
        } else {
            // Tokens assembled from several sources (macro output mixed with program text) have
            // no contiguous spelling; fall back to single spaces between tokens.
            argument
                .raw
                .iter()
                .map(|token| self.sources.source(token))
                .collect::<Vec<_>>()
                .join(" ")
        };
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn make_string_token(&mut self, text: &str) -> AnyToken {
        let mut escaped = String::with_capacity(text.len() + 2);
        for c in text.chars() {
            match c {
                '"' => escaped.push_str("\\\""),
                '\\' => escaped.push_str("\\\\"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                c if c.is_control() => {
                    escaped.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => escaped.push(c),
            }
        }
        let synthetic = self
            .sources
            .lex_synthetic("<stringified>", &format!("\"{escaped}\""));
        debug_assert!(
            synthetic.tokens.len() == 1 && synthetic.tokens[0].kind == TokenKind::StringLit
        );
        synthetic.tokens[0]
    }

    /// Pastes `left` against the first of `right_tokens` and appends the result. When the
    /// concatenation does not re-lex into a single token, the two originals are left adjacent
    /// and unpasted; that is tolerated, not an error.
    fn paste_tokens_into(
        &mut self,
        output: &mut Vec<AnyToken>,
        left: Option<AnyToken>,
        right_tokens: Vec<AnyToken>,
    ) {
        let Some(left) = left else {
            output.extend(right_tokens);
            return;
        };
        let Some((&first, rest)) = right_tokens.split_first() else {
            output.push(left);
            return;
        };
        match self.paste_pair(left, first) {
            Some(pasted) => output.push(pasted),
            None => {
                output.push(left);
                output.push(first);
            }
        }
        output.extend_from_slice(rest);
    }

    fn paste_pair(&mut self, left: AnyToken, right: AnyToken) -> Option<AnyToken> {
        let text = format!(
            "{}{}",
            self.sources.source(&left),
            self.sources.source(&right)
        );
        let synthetic = self.sources.lex_synthetic("<pasted>", &text);
        if synthetic.errors.is_empty() && synthetic.tokens.len() == 1 {
            let token = synthetic.tokens[0];
            (token.kind.channel() == Channel::CODE && token.kind != TokenKind::EndOfFile)
                .then_some(token)
        } else {
            None
        }
    }
}

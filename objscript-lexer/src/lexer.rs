use std::{collections::HashMap, ops::Range, rc::Rc};

use objscript_foundation::{
    errors::{Diagnostic, Label, ReplacementSuggestion},
    source::SourceFileId,
    source_arena::SourceArenaBuilder,
    span::Span,
};

use crate::token::{SourceLocation, Token, TokenId, TokenKind, TokenSpan};

/// Diagnostics for [`TokenKind::Error`] tokens, looked up by token ID when a consumer actually
/// reaches the broken token.
pub type LexerErrors = HashMap<TokenId, Diagnostic>;

#[derive(Debug)]
pub struct Lexer<'a> {
    pub token_arena: SourceArenaBuilder<'a, Token>,

    pub file: SourceFileId,
    pub input: Rc<str>,
    pub position: SourceLocation,

    errors: LexerErrors,
    /// Kind of the last CODE-channel token, for the regex-vs-division decision.
    last_significant: Option<TokenKind>,
}

// Unnecessary casts are allowed because `SourceLocation` may not end up being a `usize` if we
// want to save some space.
#[allow(clippy::unnecessary_cast)]
impl<'a> Lexer<'a> {
    pub fn new(
        token_arena: SourceArenaBuilder<'a, Token>,
        file: SourceFileId,
        input: Rc<str>,
    ) -> Self {
        Self {
            token_arena,
            file,
            input,
            position: 0,
            errors: HashMap::new(),
            last_significant: None,
        }
    }

    fn current_char(&self) -> Option<char> {
        if let Some(input) = self.input.get(self.position as usize..) {
            input.chars().next()
        } else {
            None
        }
    }

    fn advance_char(&mut self) {
        if let Some(char) = self.current_char() {
            self.position += char.len_utf8() as SourceLocation;
        }
    }

    fn range(&self, start: SourceLocation) -> Range<SourceLocation> {
        start..self.position
    }

    fn create_token(&mut self, kind: TokenKind, range: Range<SourceLocation>) -> TokenId {
        self.token_arena.push(Token {
            kind,
            source_range: range,
        })
    }

    fn skip_whitespace(&mut self) {
        // '\n' is not whitespace to us; it becomes a NewLine token so that the preprocessor can
        // see where directive lines end.
        while let Some(' ' | '\t' | '\r' | '\u{b}' | '\u{c}') = self.current_char() {
            self.advance_char();
        }
    }

    fn comment_division_or_regex(&mut self, start: SourceLocation) -> TokenId {
        self.advance_char();
        match self.current_char() {
            Some('/') => {
                self.advance_char();
                // The trailing '\n' is left in the input; it must become its own token.
                while !matches!(self.current_char(), None | Some('\n')) {
                    self.advance_char();
                }
                self.create_token(TokenKind::Comment, self.range(start))
            }
            Some('*') => {
                self.advance_char();
                loop {
                    match self.current_char() {
                        Some('*') => {
                            self.advance_char();
                            if self.current_char() == Some('/') {
                                self.advance_char();
                                break self.create_token(TokenKind::Comment, self.range(start));
                            }
                        }
                        None => {
                            let comment_start =
                                self.create_token(TokenKind::Error, start..start + 2);
                            let _rest = self.create_token(TokenKind::Error, self.range(start + 2));
                            self.errors.insert(
                                comment_start,
                                Diagnostic::error(
                                    self.file,
                                    "block comment does not have a matching `*/` terminator",
                                )
                                .with_label(Label::primary(
                                    start..start + 2,
                                    "the comment starts here",
                                )),
                            );
                            break comment_start;
                        }
                        _ => self.advance_char(),
                    }
                }
            }
            _ if self
                .last_significant
                .map(|kind| kind.allows_regex_after())
                .unwrap_or(true) =>
            {
                self.regex(start)
            }
            Some('=') => {
                self.advance_char();
                self.create_token(TokenKind::DivAssign, self.range(start))
            }
            _ => self.create_token(TokenKind::Div, self.range(start)),
        }
    }

    fn regex(&mut self, start: SourceLocation) -> TokenId {
        // The leading '/' was already consumed by the caller.
        let mut in_class = false;
        loop {
            match self.current_char() {
                Some('\\') => {
                    self.advance_char();
                    self.advance_char();
                }
                Some('[') => {
                    in_class = true;
                    self.advance_char();
                }
                Some(']') => {
                    in_class = false;
                    self.advance_char();
                }
                Some('/') if !in_class => {
                    self.advance_char();
                    break;
                }
                None | Some('\n') => {
                    let unterminated = self.create_token(TokenKind::Error, self.range(start));
                    self.errors.insert(
                        unterminated,
                        Diagnostic::error(
                            self.file,
                            "regex literal does not have a closing slash `/`",
                        )
                        .with_label(Label::primary(start..start + 1, "the regex starts here")),
                    );
                    return unterminated;
                }
                _ => self.advance_char(),
            }
        }
        // Flags.
        while let Some('a'..='z' | 'A'..='Z') = self.current_char() {
            self.advance_char();
        }
        self.create_token(TokenKind::RegexLit, self.range(start))
    }

    fn identifier(&mut self) -> TokenId {
        let start = self.position;
        while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '$') = self.current_char() {
            self.advance_char();
        }
        self.create_token(TokenKind::Ident, self.range(start))
    }

    fn decimal_number(&mut self, start: SourceLocation) -> TokenId {
        let mut is_float = false;
        while let Some('0'..='9') = self.current_char() {
            self.advance_char();
        }
        if self.current_char() == Some('.') {
            is_float = true;
            self.advance_char();
            while let Some('0'..='9') = self.current_char() {
                self.advance_char();
            }
        }
        if let Some('e' | 'E') = self.current_char() {
            let exponent_start = self.position;
            self.advance_char();
            if let Some('+' | '-') = self.current_char() {
                self.advance_char();
            }
            if matches!(self.current_char(), Some('0'..='9')) {
                is_float = true;
                while let Some('0'..='9') = self.current_char() {
                    self.advance_char();
                }
            } else {
                // 'e' with no exponent digits; back out and let the identifier rule have it, so
                // that the number itself survives.
                self.position = exponent_start;
            }
        }
        self.create_token(
            if is_float {
                TokenKind::FloatLit
            } else {
                TokenKind::IntLit
            },
            self.range(start),
        )
    }

    fn number(&mut self, start: SourceLocation) -> TokenId {
        let literal = if self.current_char() == Some('0') {
            self.advance_char();
            if let Some('x' | 'X') = self.current_char() {
                self.advance_char();
                while let Some('0'..='9' | 'A'..='F' | 'a'..='f') = self.current_char() {
                    self.advance_char();
                }
                self.create_token(TokenKind::IntLit, self.range(start))
            } else {
                self.decimal_number(start)
            }
        } else {
            self.decimal_number(start)
        };

        if let Some('A'..='Z' | 'a'..='z' | '_' | '$') = self.current_char() {
            let ident_start = self.position;
            self.identifier();
            let ident_end = self.position;
            let ident_error = self.create_token(TokenKind::Error, self.range(ident_start));
            self.errors.insert(
                ident_error,
                Diagnostic::error(
                    self.file,
                    "number literal must not be immediately followed by an identifier",
                )
                .with_label(Label::secondary(
                    start..ident_start,
                    "number literal occurs here...",
                ))
                .with_label(Label::primary(
                    ident_start..ident_end,
                    "...and is immediately followed by an identifier",
                ))
                .with_note((
                    "help: add a space between the number and the identifier",
                    ReplacementSuggestion {
                        file: self.file,
                        span: (start..ident_end).into(),
                        replacement: format!(
                            "{} {}",
                            &self.input[start as usize..ident_start as usize],
                            &self.input[ident_start as usize..ident_end as usize]
                        ),
                    },
                )),
            );
        }

        literal
    }

    fn string(&mut self, start: SourceLocation, quote: char) -> TokenId {
        self.advance_char();
        loop {
            match self.current_char() {
                Some('\\') => {
                    self.advance_char();
                    // Advance over the escaped character; this also lets escaped newlines
                    // (line continuations within strings) through.
                    self.advance_char();
                }
                Some(c) if c == quote => {
                    self.advance_char();
                    break self.create_token(TokenKind::StringLit, self.range(start));
                }
                None | Some('\n') => {
                    let _opening = self.create_token(TokenKind::Error, start..start + 1);
                    let unterminated = self.create_token(TokenKind::Error, self.range(start + 1));
                    self.errors.insert(
                        unterminated,
                        Diagnostic::error(
                            self.file,
                            format!("string literal does not have a closing quote `{quote}`"),
                        )
                        .with_label(Label::primary(start..start + 1, "the string starts here")),
                    );
                    break unterminated;
                }
                _ => self.advance_char(),
            }
        }
    }

    fn single_char_token(&mut self, kind: TokenKind) -> TokenId {
        let start = self.position;
        self.advance_char();
        self.create_token(kind, self.range(start))
    }

    fn single_or_double_char_token(
        &mut self,
        kind: TokenKind,
        second: char,
        second_kind: TokenKind,
    ) -> TokenId {
        let start = self.position;
        self.advance_char();
        if self.current_char() == Some(second) {
            self.advance_char();
            self.create_token(second_kind, self.range(start))
        } else {
            self.create_token(kind, self.range(start))
        }
    }

    /// `+` family: `op`, `op op` and `op=`.
    fn plus_like_token(
        &mut self,
        kind: TokenKind,
        twice: char,
        twice_kind: TokenKind,
        assign_kind: TokenKind,
    ) -> TokenId {
        let start = self.position;
        self.advance_char();
        match self.current_char() {
            Some(c) if c == twice => {
                self.advance_char();
                self.create_token(twice_kind, self.range(start))
            }
            Some('=') => {
                self.advance_char();
                self.create_token(assign_kind, self.range(start))
            }
            _ => self.create_token(kind, self.range(start)),
        }
    }

    /// Operators of the shape `op`, `op=`.
    fn op_or_assign_token(&mut self, kind: TokenKind, assign_kind: TokenKind) -> TokenId {
        self.single_or_double_char_token(kind, '=', assign_kind)
    }

    fn next_token_id(&mut self) -> TokenId {
        self.skip_whitespace();

        let start = self.position;

        if let Some(char) = self.current_char() {
            match char {
                '\n' => {
                    self.advance_char();
                    self.create_token(TokenKind::NewLine, self.range(start))
                }
                '/' => self.comment_division_or_regex(start),
                'a'..='z' | 'A'..='Z' | '_' | '$' => self.identifier(),
                '0'..='9' => self.number(start),
                '"' | '\'' => self.string(start, char),
                '+' => self.plus_like_token(
                    TokenKind::Add,
                    '+',
                    TokenKind::Inc,
                    TokenKind::AddAssign,
                ),
                '-' => self.plus_like_token(
                    TokenKind::Sub,
                    '-',
                    TokenKind::Dec,
                    TokenKind::SubAssign,
                ),
                '*' => self.op_or_assign_token(TokenKind::Mul, TokenKind::MulAssign),
                '%' => self.op_or_assign_token(TokenKind::Rem, TokenKind::RemAssign),
                '<' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('<') => {
                            self.advance_char();
                            if self.current_char() == Some('=') {
                                self.advance_char();
                                self.create_token(TokenKind::ShiftLeftAssign, self.range(start))
                            } else {
                                self.create_token(TokenKind::ShiftLeft, self.range(start))
                            }
                        }
                        Some('=') => {
                            self.advance_char();
                            self.create_token(TokenKind::LessEqual, self.range(start))
                        }
                        _ => self.create_token(TokenKind::Less, self.range(start)),
                    }
                }
                '>' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('>') => {
                            self.advance_char();
                            match self.current_char() {
                                Some('>') => {
                                    self.advance_char();
                                    if self.current_char() == Some('=') {
                                        self.advance_char();
                                        self.create_token(
                                            TokenKind::UnsignedShiftRightAssign,
                                            self.range(start),
                                        )
                                    } else {
                                        self.create_token(
                                            TokenKind::UnsignedShiftRight,
                                            self.range(start),
                                        )
                                    }
                                }
                                Some('=') => {
                                    self.advance_char();
                                    self.create_token(
                                        TokenKind::ShiftRightAssign,
                                        self.range(start),
                                    )
                                }
                                _ => self.create_token(TokenKind::ShiftRight, self.range(start)),
                            }
                        }
                        Some('=') => {
                            self.advance_char();
                            self.create_token(TokenKind::GreaterEqual, self.range(start))
                        }
                        _ => self.create_token(TokenKind::Greater, self.range(start)),
                    }
                }
                '=' => {
                    self.advance_char();
                    if self.current_char() == Some('=') {
                        self.advance_char();
                        if self.current_char() == Some('=') {
                            self.advance_char();
                            self.create_token(TokenKind::StrictEqual, self.range(start))
                        } else {
                            self.create_token(TokenKind::Equal, self.range(start))
                        }
                    } else {
                        self.create_token(TokenKind::Assign, self.range(start))
                    }
                }
                '!' => {
                    self.advance_char();
                    if self.current_char() == Some('=') {
                        self.advance_char();
                        if self.current_char() == Some('=') {
                            self.advance_char();
                            self.create_token(TokenKind::StrictNotEqual, self.range(start))
                        } else {
                            self.create_token(TokenKind::NotEqual, self.range(start))
                        }
                    } else {
                        self.create_token(TokenKind::Not, self.range(start))
                    }
                }
                '&' => self.plus_like_token(
                    TokenKind::BitAnd,
                    '&',
                    TokenKind::And,
                    TokenKind::BitAndAssign,
                ),
                '|' => self.plus_like_token(
                    TokenKind::BitOr,
                    '|',
                    TokenKind::Or,
                    TokenKind::BitOrAssign,
                ),
                '^' => self.op_or_assign_token(TokenKind::BitXor, TokenKind::BitXorAssign),
                '~' => self.single_char_token(TokenKind::BitNot),
                '?' => self.single_char_token(TokenKind::Question),
                ':' => self.single_char_token(TokenKind::Colon),
                '(' => self.single_char_token(TokenKind::LeftParen),
                ')' => self.single_char_token(TokenKind::RightParen),
                '[' => self.single_char_token(TokenKind::LeftBracket),
                ']' => self.single_char_token(TokenKind::RightBracket),
                '{' => self.single_char_token(TokenKind::LeftBrace),
                '}' => self.single_char_token(TokenKind::RightBrace),
                '.' => {
                    self.advance_char();
                    if let Some('0'..='9') = self.current_char() {
                        // Need to back the position up to the `.` so that decimal_number picks
                        // the whole literal up and does not allow `.0.0`.
                        self.position -= 1;
                        self.decimal_number(start)
                    } else if self.input[self.position as usize..].starts_with("..") {
                        self.advance_char();
                        self.advance_char();
                        self.create_token(TokenKind::Ellipsis, self.range(start))
                    } else {
                        self.create_token(TokenKind::Dot, self.range(start))
                    }
                }
                ',' => self.single_char_token(TokenKind::Comma),
                ';' => self.single_char_token(TokenKind::Semi),
                '@' => self.single_char_token(TokenKind::At),
                '#' => self.single_or_double_char_token(TokenKind::Hash, '#', TokenKind::HashHash),
                '\\' => self.single_char_token(TokenKind::Backslash),
                unknown => {
                    self.advance_char();
                    let unrecognized_character =
                        self.create_token(TokenKind::Error, self.range(start));
                    self.errors.insert(
                        unrecognized_character,
                        Diagnostic::error(self.file, format!("unrecognized character: {unknown:?}"))
                            .with_label(Label::primary(
                                self.range(start),
                                "this character is not valid syntax",
                            )),
                    );
                    unrecognized_character
                }
            }
        } else {
            self.create_token(TokenKind::EndOfFile, self.range(start))
        }
    }

    /// Lexes the whole input, returning the span of all produced tokens (the last one always
    /// being [`TokenKind::EndOfFile`]) and diagnostics for any [`TokenKind::Error`] tokens.
    pub fn lex(mut self) -> (TokenSpan, LexerErrors) {
        loop {
            let id = self.next_token_id();
            let kind = self.token_arena.arena().element(id).kind;
            if kind.channel() == crate::token_stream::Channel::CODE
                && kind != TokenKind::EndOfFile
            {
                self.last_significant = Some(kind);
            }
            if kind == TokenKind::EndOfFile {
                break;
            }
        }
        let span = self.token_arena.finish();
        debug_assert!(!matches!(span, Span::Empty));
        (span, self.errors)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use objscript_foundation::{
        source::{SourceFile, SourceFileSet},
        source_arena::SourceArena,
    };

    use crate::{
        token::{Token, TokenKind},
        token_stream::{TokenSpanCursor, TokenStream},
    };

    use super::Lexer;

    fn lex(input: &str) -> Vec<(TokenKind, String)> {
        let mut source_file_set = SourceFileSet::new();
        let mut token_arena = SourceArena::<Token>::new();
        let source: Rc<str> = Rc::from(input);
        let file = source_file_set.add(SourceFile::new("Test.j", Rc::clone(&source)));
        let lexer = Lexer::new(token_arena.build_source_file(file), file, source);
        let (span, _errors) = lexer.lex();

        let mut cursor =
            TokenSpanCursor::new(&token_arena, span).expect("lexing always produces tokens");
        let mut tokens = vec![];
        loop {
            let token = cursor.next();
            if token.kind == TokenKind::EndOfFile {
                break;
            }
            let range = token_arena.element(token.id).source_range.clone();
            tokens.push((token.kind, input[range].to_owned()));
        }
        tokens
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).into_iter().map(|(kind, _)| kind).collect()
    }

    #[test]
    fn operators_use_maximal_munch() {
        assert_eq!(
            kinds("a >>>= b >>> c >> d > e"),
            vec![
                TokenKind::Ident,
                TokenKind::UnsignedShiftRightAssign,
                TokenKind::Ident,
                TokenKind::UnsignedShiftRight,
                TokenKind::Ident,
                TokenKind::ShiftRight,
                TokenKind::Ident,
                TokenKind::Greater,
                TokenKind::Ident,
            ],
        );
        assert_eq!(
            kinds("a === b == c = d !== e != f"),
            vec![
                TokenKind::Ident,
                TokenKind::StrictEqual,
                TokenKind::Ident,
                TokenKind::Equal,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Ident,
                TokenKind::StrictNotEqual,
                TokenKind::Ident,
                TokenKind::NotEqual,
                TokenKind::Ident,
            ],
        );
    }

    #[test]
    fn newlines_are_tokens() {
        assert_eq!(
            kinds("a\nb"),
            vec![TokenKind::Ident, TokenKind::NewLine, TokenKind::Ident],
        );
    }

    #[test]
    fn line_comment_does_not_swallow_the_newline() {
        assert_eq!(
            kinds("a // note\nb"),
            vec![
                TokenKind::Ident,
                TokenKind::Comment,
                TokenKind::NewLine,
                TokenKind::Ident,
            ],
        );
    }

    #[test]
    fn slash_after_value_is_division() {
        assert_eq!(
            kinds("a / b"),
            vec![TokenKind::Ident, TokenKind::Div, TokenKind::Ident],
        );
        assert_eq!(kinds("1 /= 2"), vec![
            TokenKind::IntLit,
            TokenKind::DivAssign,
            TokenKind::IntLit,
        ]);
    }

    #[test]
    fn slash_after_operator_is_a_regex() {
        let tokens = lex("x = /ab[/]c/g;");
        assert_eq!(
            tokens[2],
            (TokenKind::RegexLit, String::from("/ab[/]c/g")),
        );
    }

    #[test]
    fn hash_and_hash_hash() {
        assert_eq!(
            kinds("# ## #"),
            vec![TokenKind::Hash, TokenKind::HashHash, TokenKind::Hash],
        );
    }

    #[test]
    fn dots_ellipsis_and_leading_dot_numbers() {
        assert_eq!(
            kinds("... . .5 1.5e3 0x1F 12"),
            vec![
                TokenKind::Ellipsis,
                TokenKind::Dot,
                TokenKind::FloatLit,
                TokenKind::FloatLit,
                TokenKind::IntLit,
                TokenKind::IntLit,
            ],
        );
    }

    #[test]
    fn strings_with_both_quotes_and_escapes() {
        let tokens = lex(r#"'a"b' "c\"d""#);
        assert_eq!(
            tokens,
            vec![
                (TokenKind::StringLit, String::from(r#"'a"b'"#)),
                (TokenKind::StringLit, String::from(r#""c\"d""#)),
            ],
        );
    }

    #[test]
    fn unterminated_string_produces_error_tokens() {
        let mut source_file_set = SourceFileSet::new();
        let mut token_arena = SourceArena::<Token>::new();
        let source: Rc<str> = Rc::from("\"oops\nx");
        let file = source_file_set.add(SourceFile::new("Test.j", Rc::clone(&source)));
        let lexer = Lexer::new(token_arena.build_source_file(file), file, source);
        let (_span, errors) = lexer.lex();
        assert_eq!(errors.len(), 1);
        let diagnostic = errors.values().next().unwrap();
        assert!(diagnostic.message.contains("closing quote"));
    }
}

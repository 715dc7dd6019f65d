use std::{ops::Range, rc::Rc};

use objscript_foundation::{
    source::{SourceFile, SourceFileId, SourceFileSet},
    source_arena::SourceArena,
    span::{Span, Spanned},
};

use crate::{
    lexer::{Lexer, LexerErrors},
    token::{AnyToken, Token, TokenId, TokenKind},
    token_stream::{TokenSpanCursor, TokenStream},
};

/// Borrowed view over lexed sources: resolves token spans back to source text.
#[derive(Clone, Copy)]
pub struct LexedSources<'a> {
    pub source_file_set: &'a SourceFileSet,
    pub token_arena: &'a SourceArena<Token>,
}

impl<'a> LexedSources<'a> {
    pub fn file_id(&self, tokens: &impl Spanned<Token>) -> Option<SourceFileId> {
        tokens
            .span()
            .start()
            .map(|start| self.token_arena.source_file_id(start))
    }

    pub fn source_range(&self, tokens: &impl Spanned<Token>) -> Option<Range<usize>> {
        match tokens.span() {
            Span::Empty => None,
            Span::Spanning { start, end } => {
                let start = self.token_arena.element(start);
                let end = self.token_arena.element(end);
                Some(start.source_range.start..end.source_range.end)
            }
        }
    }

    pub fn source(&self, tokens: &impl Spanned<Token>) -> &'a str {
        match tokens.span() {
            Span::Empty => "",
            Span::Spanning { start, end } => {
                let source_file_id = self.token_arena.source_file_id(start);
                let start = self.token_arena.element(start);
                let end = self.token_arena.element(end);
                &self.source_file_set.get(source_file_id).source
                    [start.source_range.start..end.source_range.end]
            }
        }
    }

    /// Returns whether there is no space between the tokens. Used to tell a function-like macro
    /// definition `NAME(a)` apart from an object-like one whose body starts with `(`.
    pub fn tokens_are_hugging_each_other(&self, left: TokenId, right: TokenId) -> bool {
        let left_file = self.token_arena.source_file_id(left);
        let right_file = self.token_arena.source_file_id(right);
        let left = self.token_arena.element(left);
        let right = self.token_arena.element(right);
        left_file == right_file && left.source_range.end == right.source_range.start
    }
}

/// The result of lexing a synthesized piece of program text.
pub struct SyntheticTokens {
    pub file: SourceFileId,
    /// All produced tokens except the trailing end-of-file marker.
    pub tokens: Vec<AnyToken>,
    pub errors: LexerErrors,
}

/// Owned counterpart of [`LexedSources`], held for the duration of one parse.
///
/// Unlike the borrowed view this can grow: the preprocessor appends synthetic source files
/// (predefined macros, command-line definitions, stringified and pasted token text) and lexes
/// them into the same token arena, so every synthesized token gets a real position.
pub struct OwnedSources<'a> {
    pub source_file_set: &'a mut SourceFileSet,
    pub token_arena: SourceArena<Token>,
}

impl<'a> OwnedSources<'a> {
    pub fn new(source_file_set: &'a mut SourceFileSet) -> Self {
        Self {
            source_file_set,
            token_arena: SourceArena::new(),
        }
    }

    pub fn as_borrowed(&self) -> LexedSources<'_> {
        LexedSources {
            source_file_set: self.source_file_set,
            token_arena: &self.token_arena,
        }
    }

    pub fn source(&self, tokens: &impl Spanned<Token>) -> &str {
        self.as_borrowed().source(tokens)
    }

    pub fn source_range(&self, tokens: &impl Spanned<Token>) -> Option<Range<usize>> {
        self.as_borrowed().source_range(tokens)
    }

    pub fn file_id(&self, tokens: &impl Spanned<Token>) -> Option<SourceFileId> {
        self.as_borrowed().file_id(tokens)
    }

    pub fn tokens_are_hugging_each_other(&self, left: TokenId, right: TokenId) -> bool {
        self.as_borrowed().tokens_are_hugging_each_other(left, right)
    }

    /// Registers `text` as a synthetic source file and lexes it.
    pub fn lex_synthetic(&mut self, filename: &str, text: &str) -> SyntheticTokens {
        let source: Rc<str> = Rc::from(text);
        let file = self
            .source_file_set
            .add(SourceFile::new(filename, Rc::clone(&source)));
        let lexer = Lexer::new(self.token_arena.build_source_file(file), file, source);
        let (span, errors) = lexer.lex();

        let mut tokens = vec![];
        let mut cursor = TokenSpanCursor::new(&self.token_arena, span)
            .expect("synthetic lex always produces at least an end-of-file token");
        loop {
            let token = cursor.next();
            if token.kind == TokenKind::EndOfFile {
                break;
            }
            tokens.push(token);
        }

        SyntheticTokens {
            file,
            tokens,
            errors,
        }
    }
}

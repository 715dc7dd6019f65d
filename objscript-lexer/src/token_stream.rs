use bitflags::bitflags;
use objscript_foundation::{source_arena::SourceArena, span::Span};

use crate::token::{AnyToken, Token, TokenId, TokenKind, TokenSpan};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Channel: u8 {
        /// Main input (everything that is not comments, whitespace, or errors.)
        const CODE    = 0x1;
        /// Comments only. Not used by the grammar, but may be used by external tools.
        const COMMENT = 0x2;
        /// Newline tokens. The preprocessor listens on this channel to know where directive
        /// lines end; the grammar never sees it.
        const SPACE   = 0x4;
        /// Lexis errors. Skipped by downstream consumers entirely, though diagnostics from these
        /// tokens are replicated into the output sink.
        const ERROR   = 0x8;
    }
}

pub trait TokenStream {
    type Position;

    fn next(&mut self) -> AnyToken;

    fn next_from(&mut self, channel: Channel) -> AnyToken {
        loop {
            let token = self.next();
            if channel.contains(token.kind.channel()) || token.kind == TokenKind::EndOfFile {
                return token;
            }
        }
    }

    fn position(&self) -> Self::Position;

    fn set_position(&mut self, position: Self::Position);

    fn peek(&mut self) -> AnyToken {
        let position = self.position();
        let token = self.next();
        self.set_position(position);
        token
    }

    fn peek_from(&mut self, channel: Channel) -> AnyToken {
        let position = self.position();
        let token = self.next_from(channel);
        self.set_position(position);
        token
    }
}

impl<T> TokenStream for &mut T
where
    T: TokenStream,
{
    type Position = T::Position;

    fn next(&mut self) -> AnyToken {
        <T as TokenStream>::next(self)
    }

    fn position(&self) -> Self::Position {
        <T as TokenStream>::position(self)
    }

    fn set_position(&mut self, position: Self::Position) {
        <T as TokenStream>::set_position(self, position)
    }
}

/// [`std::io::Cursor`] but for [`TokenSpan`]s. Turns a [`TokenSpan`] into a [`TokenStream`].
///
/// The span's `end` is inclusive; once the cursor walks past it, the stream yields
/// [`TokenKind::EndOfFile`] forever.
pub struct TokenSpanCursor<'a> {
    token_arena: &'a SourceArena<Token>,
    cursor: Option<TokenId>,
    end: TokenId,
}

impl<'a> TokenSpanCursor<'a> {
    /// Returns a cursor for traversing the span, or [`None`] if the span is empty.
    pub fn new(token_arena: &'a SourceArena<Token>, span: TokenSpan) -> Option<Self> {
        match span {
            Span::Empty => None,
            Span::Spanning { start, end } => Some(Self {
                token_arena,
                cursor: Some(start),
                end,
            }),
        }
    }
}

impl<'a> TokenStream for TokenSpanCursor<'a> {
    type Position = Option<TokenId>;

    fn next(&mut self) -> AnyToken {
        match self.cursor {
            Some(id) => {
                let token = self.token_arena.element(id);
                self.cursor = (id < self.end).then(|| id.successor());
                AnyToken {
                    kind: token.kind,
                    id,
                }
            }
            None => AnyToken {
                kind: TokenKind::EndOfFile,
                id: self.end,
            },
        }
    }

    fn position(&self) -> Self::Position {
        self.cursor
    }

    fn set_position(&mut self, position: Self::Position) {
        self.cursor = position;
    }
}

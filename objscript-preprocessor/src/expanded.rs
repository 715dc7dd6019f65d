use objscript_lexer::{
    token::{AnyToken, TokenKind},
    token_stream::TokenStream,
};

/// A run of output tokens that came out of macro expansion rather than straight from the
/// program text.
#[derive(Debug, Clone, Copy)]
struct ExpansionRegion {
    /// Range of output token indices, end exclusive.
    start: usize,
    end: usize,
    /// The last token the expansion physically produced. Grammar consumers use its position to
    /// patch AST node end offsets; without this, node spans would point at the unexpanded call
    /// site.
    last_token: AnyToken,
}

/// The fully preprocessed token stream, plus records of which stretches of it were produced by
/// macro expansion. This is what the grammar layer consumes instead of raw lexer output.
#[derive(Debug, Clone, Default)]
pub struct ExpandedTokens {
    tokens: Vec<AnyToken>,
    regions: Vec<ExpansionRegion>,
}

impl ExpandedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: AnyToken) {
        self.tokens.push(token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnyToken> {
        self.tokens.iter()
    }

    pub(crate) fn push_region(&mut self, start: usize, end: usize, last_token: AnyToken) {
        debug_assert!(start < end && end <= self.tokens.len());
        self.regions.push(ExpansionRegion {
            start,
            end,
            last_token,
        });
    }

    pub fn stream(&self) -> ExpandedTokenStream<'_> {
        ExpandedTokenStream {
            expanded: self,
            cursor: 0,
            last_expansion_end: None,
        }
    }
}

/// Streams [`ExpandedTokens`] back out and keeps track of expansion end positions as tokens are
/// consumed.
pub struct ExpandedTokenStream<'a> {
    expanded: &'a ExpandedTokens,
    cursor: usize,
    last_expansion_end: Option<AnyToken>,
}

impl<'a> ExpandedTokenStream<'a> {
    /// The last token physically produced by the most recently consumed macro expansion.
    ///
    /// This is updated when the *next-to-last* token of an expansion run is handed out, because
    /// a grammar with one token of lookahead finishes a node while its final token is still the
    /// lookahead; updating any later would be too late for that node's end position.
    pub fn last_expansion_end(&self) -> Option<AnyToken> {
        self.last_expansion_end
    }
}

impl<'a> TokenStream for ExpandedTokenStream<'a> {
    type Position = (usize, Option<AnyToken>);

    fn next(&mut self) -> AnyToken {
        let index = self.cursor;
        let token = match self.expanded.tokens.get(index) {
            Some(token) => {
                self.cursor += 1;
                *token
            }
            None => match self.expanded.tokens.last() {
                // The output always ends with the program's end-of-file token; repeat it if the
                // consumer reads past the end.
                Some(last) => AnyToken {
                    kind: TokenKind::EndOfFile,
                    id: last.id,
                },
                None => unreachable!("preprocessed output always contains an end-of-file token"),
            },
        };
        for region in &self.expanded.regions {
            if index >= region.start && index < region.end && index + 2 >= region.end {
                self.last_expansion_end = Some(region.last_token);
            }
        }
        token
    }

    fn position(&self) -> Self::Position {
        (self.cursor, self.last_expansion_end)
    }

    fn set_position(&mut self, position: Self::Position) {
        (self.cursor, self.last_expansion_end) = position;
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use objscript_foundation::{
        source::{SourceFile, SourceFileSet},
        source_arena::SourceArena,
    };
    use objscript_lexer::{
        token::{AnyToken, Token, TokenKind},
        token_stream::TokenStream,
    };

    use super::ExpandedTokens;

    #[test]
    fn last_expansion_end_updates_at_the_next_to_last_token() {
        let mut source_file_set = SourceFileSet::new();
        let mut token_arena = SourceArena::<Token>::new();

        let file = source_file_set.add(SourceFile::new("Test.j", Rc::from("1 + 2 ;")));
        let mut builder = token_arena.build_source_file(file);
        let one = AnyToken {
            kind: TokenKind::IntLit,
            id: builder.push(Token {
                kind: TokenKind::IntLit,
                source_range: 0..1,
            }),
        };
        let plus = AnyToken {
            kind: TokenKind::Add,
            id: builder.push(Token {
                kind: TokenKind::Add,
                source_range: 2..3,
            }),
        };
        let two = AnyToken {
            kind: TokenKind::IntLit,
            id: builder.push(Token {
                kind: TokenKind::IntLit,
                source_range: 4..5,
            }),
        };
        let semi = AnyToken {
            kind: TokenKind::Semi,
            id: builder.push(Token {
                kind: TokenKind::Semi,
                source_range: 6..7,
            }),
        };
        let eof = AnyToken {
            kind: TokenKind::EndOfFile,
            id: builder.push(Token {
                kind: TokenKind::EndOfFile,
                source_range: 7..7,
            }),
        };
        builder.finish();

        // `1 + 2` came out of an expansion whose last physical token was `2`; `;` did not.
        let mut expanded = ExpandedTokens::new();
        expanded.push(one);
        expanded.push(plus);
        expanded.push(two);
        expanded.push_region(0, 3, two);
        expanded.push(semi);
        expanded.push(eof);

        let mut stream = expanded.stream();
        assert_eq!(stream.next(), one);
        assert_eq!(stream.last_expansion_end(), None);
        // `+` is the next-to-last token of the region; a parser with one token of lookahead is
        // about to finish the node, so the end position must be available now.
        assert_eq!(stream.next(), plus);
        assert_eq!(stream.last_expansion_end(), Some(two));
        assert_eq!(stream.next(), two);
        assert_eq!(stream.next(), semi);
        assert_eq!(stream.last_expansion_end(), Some(two));
        assert_eq!(stream.next().kind, TokenKind::EndOfFile);
    }
}

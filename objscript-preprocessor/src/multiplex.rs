use std::rc::Rc;

use objscript_foundation::source_arena::SourceArena;
use objscript_lexer::token::{AnyToken, Token, TokenId, TokenKind, TokenSpan};

/// Where a replayed token queue came from.
#[derive(Debug, Clone)]
pub(crate) enum QueueOrigin {
    /// Replacement tokens of a macro. While the queue is live, `name` is exempt from further
    /// expansion; this is what stops `#define A A` from recursing.
    Expansion { name: Rc<str> },
    /// Replay of collected tokens (macro arguments, directive lines). Carries no expansion
    /// suppression of its own.
    Replay,
}

/// One strategy for producing tokens: either the lexed program text itself, or a previously
/// materialized token list with a read cursor.
#[derive(Debug, Clone)]
enum TokenSource {
    Source {
        cursor: Option<TokenId>,
        end: TokenId,
    },
    Queue {
        tokens: Rc<[AnyToken]>,
        cursor: usize,
        origin: QueueOrigin,
    },
}

/// An immutable copy of the multiplexer's position across every active source. Restoring it
/// rewinds all cursors, including into queues that have been popped since the snapshot was
/// taken (their token lists are kept alive by `Rc`).
#[derive(Clone)]
pub(crate) struct SourceSnapshot {
    stack: Vec<TokenSource>,
}

/// The token source multiplexer: a stack of active [`TokenSource`]s.
///
/// The bottom of the stack is always the lexed program text. Macro expansion pushes queues on
/// top; when a queue runs dry it is popped and the next token is fetched from whatever lies
/// beneath, so a queue's exhaustion is never observable as an "empty" result. This fall-through
/// is also what lets a function-like macro call begin inside an expansion and finish with tokens
/// from the original source.
pub(crate) struct SourceStack {
    stack: Vec<TokenSource>,
}

impl SourceStack {
    pub fn new(program: TokenSpan) -> Self {
        let TokenSpan::Spanning { start, end } = program else {
            // The lexer always produces at least an end-of-file token.
            unreachable!("token span of a lexed file must not be empty");
        };
        Self {
            stack: vec![TokenSource::Source {
                cursor: Some(start),
                end,
            }],
        }
    }

    /// Pushes a macro's replacement tokens. Returns nothing; the main pull loop will drain the
    /// queue and rescan its contents.
    pub fn push_expansion(&mut self, name: Rc<str>, tokens: Rc<[AnyToken]>) {
        self.stack.push(TokenSource::Queue {
            tokens,
            cursor: 0,
            origin: QueueOrigin::Expansion { name },
        });
    }

    /// Pushes a plain replay queue and returns a floor for [`Self::next_bounded`]: pulling with
    /// that floor yields exactly the pushed tokens (plus anything nested expansions produce) and
    /// then `None`, without ever falling through to the sources beneath.
    pub fn push_replay(&mut self, tokens: Rc<[AnyToken]>) -> usize {
        self.stack.push(TokenSource::Queue {
            tokens,
            cursor: 0,
            origin: QueueOrigin::Replay,
        });
        self.stack.len()
    }

    /// Whether a macro of the given name is currently being drained somewhere on the stack.
    pub fn is_expanding(&self, name: &str) -> bool {
        self.stack.iter().any(|source| {
            matches!(
                source,
                TokenSource::Queue {
                    origin: QueueOrigin::Expansion { name: expanding },
                    ..
                } if &**expanding == name
            )
        })
    }

    /// Whether any macro-expansion queue is live.
    pub fn in_expansion(&self) -> bool {
        self.stack.iter().any(|source| {
            matches!(
                source,
                TokenSource::Queue {
                    origin: QueueOrigin::Expansion { .. },
                    ..
                }
            )
        })
    }

    /// Pulls the next token. The boolean is true when the token came out of a queue rather than
    /// the program text; directives are only ever recognized in the latter.
    pub fn next(&mut self, arena: &SourceArena<Token>) -> (AnyToken, bool) {
        self.next_bounded(arena, 0)
            .expect("the base token source is never popped")
    }

    /// Like [`Self::next`], but stops once the stack shrinks below `floor` (see
    /// [`Self::push_replay`]). A floor of 0 never stops; the base source then reports
    /// end-of-file forever instead.
    pub fn next_bounded(
        &mut self,
        arena: &SourceArena<Token>,
        floor: usize,
    ) -> Option<(AnyToken, bool)> {
        loop {
            match self.stack.last_mut() {
                None => return None,
                Some(TokenSource::Source { cursor, end }) => match *cursor {
                    Some(id) => {
                        let token = arena.element(id);
                        let any_token = AnyToken {
                            kind: token.kind,
                            id,
                        };
                        *cursor = (id < *end).then(|| id.successor());
                        return Some((any_token, false));
                    }
                    None => {
                        return Some((
                            AnyToken {
                                kind: TokenKind::EndOfFile,
                                id: *end,
                            },
                            false,
                        ))
                    }
                },
                Some(TokenSource::Queue { tokens, cursor, .. }) => {
                    if *cursor < tokens.len() {
                        let token = tokens[*cursor];
                        *cursor += 1;
                        return Some((token, true));
                    }
                    self.stack.pop();
                    if self.stack.len() < floor {
                        return None;
                    }
                }
            }
        }
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            stack: self.stack.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: SourceSnapshot) {
        self.stack = snapshot.stack;
    }
}

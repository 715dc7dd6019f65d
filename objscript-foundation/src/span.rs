use std::{fmt, ops::Deref};

use crate::source_arena::SourceId;

/// A contiguous run of elements (usually tokens) within a [`SourceArena`].
///
/// [`SourceArena`]: crate::source_arena::SourceArena
pub enum Span<T> {
    Empty,
    Spanning {
        start: SourceId<T>,
        end: SourceId<T>,
    },
}

impl<T> Span<T> {
    pub fn single(id: SourceId<T>) -> Self {
        Self::Spanning { start: id, end: id }
    }

    pub fn spanning(start: SourceId<T>, end: SourceId<T>) -> Self {
        Self::Spanning { start, end }
    }

    pub fn start(&self) -> Option<SourceId<T>> {
        match self {
            Span::Empty => None,
            Span::Spanning { start, .. } => Some(*start),
        }
    }

    pub fn end(&self) -> Option<SourceId<T>> {
        match self {
            Span::Empty => None,
            Span::Spanning { end, .. } => Some(*end),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Span::Empty)
    }

    /// Joins two spans into one that covers both.
    pub fn join(&self, other: &Self) -> Self {
        match (*self, *other) {
            (Span::Empty, Span::Empty) => Span::Empty,
            (Span::Empty, span) | (span, Span::Empty) => span,
            (
                Span::Spanning {
                    start: a_start,
                    end: a_end,
                },
                Span::Spanning {
                    start: b_start,
                    end: b_end,
                },
            ) => Span::Spanning {
                start: a_start.min(b_start),
                end: a_end.max(b_end),
            },
        }
    }
}

impl<T> Eq for Span<T> {}

impl<T> PartialEq for Span<T> {
    fn eq(&self, other: &Self) -> bool {
        self.start() == other.start() && self.end() == other.end()
    }
}

impl<T> Copy for Span<T> {}

impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> fmt::Debug for Span<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Spanning { start, end } => fmt::Debug::fmt(&(start..end), f),
        }
    }
}

/// Implemented by everything that has a source span attached.
pub trait Spanned<T> {
    fn span(&self) -> Span<T>;
}

impl<T> Spanned<T> for Span<T> {
    fn span(&self) -> Span<T> {
        *self
    }
}

impl<T, S> Spanned<T> for Option<S>
where
    S: Spanned<T>,
{
    fn span(&self) -> Span<T> {
        self.as_ref().map(|x| x.span()).unwrap_or(Span::Empty)
    }
}

impl<T, S> Spanned<T> for Box<S>
where
    S: Spanned<T>,
{
    fn span(&self) -> Span<T> {
        self.deref().span()
    }
}

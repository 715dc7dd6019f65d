//! Lexical analysis for ObjScript source text.
//!
//! The lexer turns a whole file into tokens inside a [`SourceArena`] up front; everything
//! downstream (the preprocessor, the grammar) works with [`AnyToken`]s streamed back out of the
//! arena. Newlines and comments are real tokens on their own [`Channel`]s, because the
//! preprocessor needs to observe line boundaries that the grammar never sees.
//!
//! [`SourceArena`]: objscript_foundation::source_arena::SourceArena
//! [`AnyToken`]: crate::token::AnyToken
//! [`Channel`]: crate::token_stream::Channel

mod lexer;
pub mod sources;
pub mod token;
pub mod token_stream;

pub use lexer::*;

//! Foundational types for the ObjScript front end.

pub mod errors;
pub mod source;
pub mod source_arena;
pub mod span;

//! Elimination of `jsr`/`ret` subroutines
//!
//! This happens in two steps: [`Subroutines::classify`] figures out which instructions belong to
//! which subroutine, then [`inline_subroutines`] emits one copy of each subroutine per calling
//! context.

mod classifier;
mod inliner;

pub use classifier::*;
pub use inliner::*;

//! Method bodies as a flat stream of instructions and labels

mod instructions;
mod label;
mod method_body;

pub use instructions::*;
pub use label::*;
pub use method_body::*;

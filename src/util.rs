//! Small containers shared by the rest of the crate

mod offset_vec;

pub use offset_vec::*;

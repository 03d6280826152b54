//! Stack map frame tracking
//!
//! For any specific instruction inside a method body, the stack and locals have the same
//! structure regardless of which control flow was used to reach that instruction. Although the
//! values on the stack and in the locals may obviously be different, the types and order of the
//! stack and local variables cannot. This information is referred to as the _stack map frame_
//! (represented using [`Frame`]).
//!
//! [`FrameTracker`] simulates the effect of each instruction on the frame in a single forward pass,
//! the way a class writer does when it needs frames for code it is emitting. It does not merge
//! frames at control flow joins (that would be a fix-point computation, and it would need a class
//! hierarchy). Instead, explicit frame declarations in the body take precedence, and jumps to labels
//! further down remember the frame at the jump.

mod frame;
mod tracker;
mod types;

pub use frame::*;
pub use tracker::*;
pub use types::*;

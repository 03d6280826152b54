//! Flatten legacy JVM subroutines and track stack map frames
//!
//! Class files older than version 50 may use `jsr`/`ret` to share a block of code (typically a
//! `finally` body) between several call sites. Modern verifiers (and most bytecode tooling) do not
//! accept these instructions, so this crate offers two passes over a single [`code::MethodBody`]:
//!
//!   - [`subroutines::inline_subroutines`] duplicates every subroutine body once per calling
//!     context and rewrites `jsr`/`ret` into plain jumps
//!
//!   - [`verifier::FrameTracker`] (and the [`verifier::analyze`] driver) simulates the types of
//!     the locals and operand stack instruction by instruction, which is what is needed to
//!     (re)derive stack map frames
//!
//! ### Example
//!
//! ```
//! use unjsr::code::*;
//! use unjsr::subroutines::inline_subroutines;
//! use unjsr::verifier::analyze;
//! use unjsr::{MethodAccessFlags, Settings};
//!
//! # fn main() -> Result<(), unjsr::Error> {
//! let mut labels = SequentialLabels::new(Label::START);
//! let (start, finally) = (labels.fresh_label(), labels.fresh_label());
//!
//! // static void f() { try { } finally { } }
//! let body = MethodBody {
//!     instructions: vec![
//!         Insn::Label(start),
//!         BranchInstruction::Jsr(finally).into(),
//!         BranchInstruction::Return.into(),
//!         Insn::Label(finally),
//!         Instruction::AStore(0).into(),
//!         BranchInstruction::Ret(0).into(),
//!     ],
//!     try_catch_blocks: vec![],
//!     local_variables: vec![],
//! };
//!
//! let settings = Settings::new();
//! let inlined = inline_subroutines(&body, &settings)?;
//! assert!(!inlined.has_subroutines());
//!
//! let method = MethodSignature::parse("Demo", "f", "()V", MethodAccessFlags::STATIC)?;
//! let analysis = analyze(&inlined, &method, &settings)?;
//! assert_eq!(analysis.max_stack, 1);
//! assert_eq!(analysis.max_locals, 1);
//! # Ok(())
//! # }
//! ```

mod access_flags;
pub mod code;
mod descriptors;
mod errors;
mod names;
mod settings;
pub mod subroutines;
pub mod util;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
pub use settings::*;

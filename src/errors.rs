use crate::code::{ConstantData, Label};
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A subroutine calls itself, directly or through other subroutines
    ///
    /// Inlining would never terminate, so this is rejected.
    RecursiveSubroutine(Label),

    /// A label is referred to but never placed in the method body
    UnresolvedLabel(Label),

    /// A label is placed at more than one position
    DuplicateLabel(Label),

    /// The target of a `jsr` does not name a known subroutine
    UnknownSubroutine(Label),

    /// A field or method descriptor could not be parsed
    BadDescriptor(String),

    /// A class or member name is not valid
    MalformedName(String),

    /// A `ret` at this position is not owned by any subroutine being inlined (indicates a bug)
    OrphanedReturn(usize),

    /// A label operand has no owner in the instantiation being emitted (indicates a bug)
    UnownedLabel(Label),

    /// Error trying to track the frame across an instruction
    TrackerError {
        instruction: String,
        kind: TrackerErrorKind,
    },
}

#[derive(Debug)]
pub enum TrackerErrorKind {
    /// `jsr` and `ret` must be inlined before frames can be tracked
    SubroutineInstruction,

    /// Constant has the wrong width for the `ldc` variant loading it
    NotLoadableConstant(ConstantData),

    /// Instruction pops more values than the stack holds
    EmptyStack,

    /// Frame declaration is compressed, but compressed frames are not being expanded
    CompressedFrame,

    /// `Chop` declaration removes more locals than the previous frame has
    ChopTooLarge(usize),

    /// `<init>` called on an uninitialized value whose `new` was never seen
    UnknownCreationSite(Label),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RecursiveSubroutine(entry) => {
                write!(f, "Recursive invocation of the subroutine at {}", entry)
            }
            Error::UnresolvedLabel(label) => write!(f, "Label {} is never placed", label),
            Error::DuplicateLabel(label) => write!(f, "Label {} is placed twice", label),
            Error::UnknownSubroutine(label) => write!(f, "No subroutine starts at {}", label),
            Error::BadDescriptor(desc) => write!(f, "Malformed descriptor {}", desc),
            Error::MalformedName(msg) => f.write_str(msg),
            Error::OrphanedReturn(idx) => {
                write!(f, "Instruction #{} is a RET not owned by any subroutine", idx)
            }
            Error::UnownedLabel(label) => {
                write!(f, "Label {} has no owner in the current instantiation", label)
            }
            Error::TrackerError { instruction, kind } => {
                write!(f, "Cannot track frame across {}: {:?}", instruction, kind)
            }
        }
    }
}

impl std::error::Error for Error {}

use super::*;
use crate::code::{Label, MethodSignature};
use crate::util::{OffsetVec, Width};
use crate::{RefType, TrackerErrorKind};

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Both vectors are slot-level: a `long` or `double` is followed by a [`VerificationType::Top`]
/// for its second half.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame {
    /// Local variables, indexed by slot
    pub locals: Vec<VType>,

    /// Types of values on the stack (top of the stack is last)
    pub stack: Vec<VType>,
}

/// Stack map frame as declared in a method body
///
/// Types are listed the way the `StackMapTable` attribute lists them: wide values appear once,
/// without the `Top` that follows them in a [`Frame`]. All but `Full` are relative to the
/// previously declared frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FrameDeclaration {
    Full {
        locals: OffsetVec<VType>,
        stack: OffsetVec<VType>,
    },

    /// Same locals as the previous frame, empty stack
    Same,

    /// Same locals as the previous frame, one value on the stack
    Same1(VType),

    /// Previous frame's locals with some more (between 1 and 3) appended, empty stack
    Append(OffsetVec<VType>),

    /// Previous frame's locals without the last few (between 1 and 3), empty stack
    Chop(usize),
}

impl Frame {
    /// Frame on entry to a method: the receiver (if any) followed by the parameters
    pub fn entry(method: &MethodSignature) -> Frame {
        let mut locals = vec![];
        if method.access_flags.has_receiver() {
            if method.is_constructor() {
                locals.push(VType::UninitializedThis);
            } else {
                locals.push(VType::Object(RefType::Object(method.class.clone())));
            }
        }
        for parameter in &method.descriptor.parameters {
            push_value(&mut locals, VType::from(parameter.clone()));
        }

        Frame {
            locals,
            stack: vec![],
        }
    }

    /// Build the frame described by a declaration
    ///
    /// `previous` is the frame of the previous declaration (or the entry frame, if there is no
    /// previous declaration).
    pub fn from_declaration(
        declaration: &FrameDeclaration,
        previous: &Frame,
    ) -> Result<Frame, TrackerErrorKind> {
        let frame = match declaration {
            FrameDeclaration::Full { locals, stack } => Frame {
                locals: expand(locals),
                stack: expand(stack),
            },
            FrameDeclaration::Same => Frame {
                locals: previous.locals.clone(),
                stack: vec![],
            },
            FrameDeclaration::Same1(typ) => {
                let mut stack = vec![];
                push_value(&mut stack, typ.clone());
                Frame {
                    locals: previous.locals.clone(),
                    stack,
                }
            }
            FrameDeclaration::Append(appended) => {
                let mut locals = expand(&compact(&previous.locals));
                locals.extend(expand(appended));
                Frame {
                    locals,
                    stack: vec![],
                }
            }
            FrameDeclaration::Chop(chopped) => {
                let mut locals = compact(&previous.locals);
                for _ in 0..*chopped {
                    if locals.pop().is_none() {
                        return Err(TrackerErrorKind::ChopTooLarge(*chopped));
                    }
                }
                Frame {
                    locals: expand(&locals),
                    stack: vec![],
                }
            }
        };
        Ok(frame)
    }

    /// Compute the declaration for this frame, given the previously declared frame
    ///
    /// This will fall back to `Full` only if none of the other declarations are enough to encode
    /// the transition.
    pub fn compress_against(&self, previous: &Frame) -> FrameDeclaration {
        let locals = compact(&self.locals);
        let prev_locals = compact(&previous.locals);
        let stack = compact(&self.stack);

        match stack.len() {
            0 => {
                let this_locals_len = locals.len();
                let prev_locals_len = prev_locals.len();

                if this_locals_len <= prev_locals_len {
                    let len_difference = prev_locals_len - this_locals_len;
                    let this_is_prefix_of_prev = locals
                        .iter()
                        .zip(prev_locals.iter())
                        .all(|((_, _, t1), (_, _, t2))| t1 == t2);

                    if len_difference < 4 && this_is_prefix_of_prev {
                        if len_difference == 0 {
                            return FrameDeclaration::Same;
                        } else {
                            return FrameDeclaration::Chop(len_difference);
                        }
                    }
                } else if this_locals_len - prev_locals_len < 4 {
                    let prev_is_prefix_of_this = prev_locals
                        .iter()
                        .zip(locals.iter())
                        .all(|((_, _, t1), (_, _, t2))| t1 == t2);

                    if prev_is_prefix_of_this {
                        return FrameDeclaration::Append(
                            locals
                                .iter()
                                .skip(prev_locals_len)
                                .map(|(_, _, t)| t.clone())
                                .collect(),
                        );
                    }
                }
            }
            1 if locals == prev_locals => {
                if let Some((_, typ)) = stack.get_index(0) {
                    return FrameDeclaration::Same1(typ.clone());
                }
            }
            _ => (),
        }

        FrameDeclaration::Full { locals, stack }
    }
}

impl FrameDeclaration {
    /// Rewrite the creation-site labels of uninitialized types
    pub fn map_labels<E>(
        &self,
        mut map_label: impl FnMut(Label) -> Result<Label, E>,
    ) -> Result<FrameDeclaration, E> {
        let mut map_type = |typ: &VType| -> Result<VType, E> {
            match typ {
                VerificationType::Uninitialized(site) => {
                    Ok(VerificationType::Uninitialized(map_label(*site)?))
                }
                other => Ok(other.clone()),
            }
        };

        Ok(match self {
            FrameDeclaration::Full { locals, stack } => FrameDeclaration::Full {
                locals: map_types(locals, &mut map_type)?,
                stack: map_types(stack, &mut map_type)?,
            },
            FrameDeclaration::Same => FrameDeclaration::Same,
            FrameDeclaration::Same1(typ) => FrameDeclaration::Same1(map_type(typ)?),
            FrameDeclaration::Append(locals) => {
                FrameDeclaration::Append(map_types(locals, &mut map_type)?)
            }
            FrameDeclaration::Chop(chopped) => FrameDeclaration::Chop(*chopped),
        })
    }

    /// Is this anything other than a `Full` declaration?
    pub fn is_compressed(&self) -> bool {
        !matches!(self, FrameDeclaration::Full { .. })
    }
}

fn map_types<E>(
    types: &OffsetVec<VType>,
    map_type: &mut impl FnMut(&VType) -> Result<VType, E>,
) -> Result<OffsetVec<VType>, E> {
    types.iter().map(|(_, _, typ)| map_type(typ)).collect()
}

/// Push a value, followed by `Top` if it is wide
pub(super) fn push_value(slots: &mut Vec<VType>, typ: VType) {
    let wide = typ.width() == 2;
    slots.push(typ);
    if wide {
        slots.push(VType::Top);
    }
}

/// Slot-level types to declaration-level types
fn compact(slots: &[VType]) -> OffsetVec<VType> {
    let mut compacted = OffsetVec::new();
    let mut slots = slots.iter();
    while let Some(typ) = slots.next() {
        if typ.width() == 2 {
            let _ = slots.next();
        }
        compacted.push(typ.clone());
    }
    compacted
}

/// Declaration-level types to slot-level types
fn expand(types: &OffsetVec<VType>) -> Vec<VType> {
    let mut slots = Vec::with_capacity(types.offset_len().0);
    for (_, _, typ) in types {
        push_value(&mut slots, typ.clone());
    }
    slots
}

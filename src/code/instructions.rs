//! Instructions of a method body
//!
//! The representation is close to the class file, but a little more convenient to match on:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the conditional branches) get abstracted into one instruction with
//!     a field. This helps with repetitive pattern matches.
//!
//!   - Instructions that can transfer control are kept separate ([`BranchInstruction`]) from
//!     those that always continue to the next instruction ([`Instruction`])
//!
//!   - Labels, line numbers, and frame declarations are pseudo-instructions ([`Insn`]) in the same
//!     stream as real instructions

use super::Label;
use crate::util::Width;
use crate::verifier::FrameDeclaration;
use crate::{BaseType, BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantData), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantData),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef),
    InvokeDynamic(InvokeDynamic),
    New(BinaryName),
    NewArray(BaseType),
    ANewArray(RefType<BinaryName>),
    ArrayLength,
    CheckCast(RefType<BinaryName>),
    InstanceOf(RefType<BinaryName>),
    MonitorEnter,
    MonitorExit,

    /// Array type being created and the number of dimensions popped off the stack
    MultiANewArray(RefType<BinaryName>, u8),
}

/// Branching JVM bytecode instruction
///
/// Conditional branches fall through to the next instruction when not taken. Unlike in the class
/// file format, `goto` and `goto_w` are not distinguished since labels are resolved to offsets only
/// much later (if ever).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BranchInstruction<Lbl> {
    If(OrdComparison, Lbl), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Lbl), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, Lbl), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, Lbl), // covers `ifnull`, `ifnonnull`
    Goto(Lbl),                 // covers `goto` and `goto_w`

    /// Jump to a subroutine, pushing a return address (covers `jsr` and `jsr_w`)
    Jsr(Lbl),

    /// Return from a subroutine to the address stored in this local (covers `wide ret`)
    Ret(u16),

    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: Lbl,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<Lbl>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: Lbl,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, Lbl)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl<Lbl: Copy> BranchInstruction<Lbl> {
    /// Can execution continue at the next instruction?
    ///
    /// A `jsr` counts as falling through: the subroutine it calls eventually comes back to the
    /// instruction after it.
    pub fn falls_through(&self) -> bool {
        match self {
            BranchInstruction::Goto(_)
            | BranchInstruction::Ret(_)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => false,

            BranchInstruction::If(_, _)
            | BranchInstruction::IfICmp(_, _)
            | BranchInstruction::IfACmp(_, _)
            | BranchInstruction::IfNull(_, _)
            | BranchInstruction::Jsr(_) => true,
        }
    }

    /// Labels this instruction can jump to within the current subroutine
    ///
    /// The target of a `jsr` is not included since control only reaches it by entering a
    /// different subroutine.
    pub fn jump_targets(&self) -> JumpTargets<Lbl> {
        match self {
            BranchInstruction::If(_, lbl) => JumpTargets::Regular(*lbl),
            BranchInstruction::IfICmp(_, lbl) => JumpTargets::Regular(*lbl),
            BranchInstruction::IfACmp(_, lbl) => JumpTargets::Regular(*lbl),
            BranchInstruction::IfNull(_, lbl) => JumpTargets::Regular(*lbl),
            BranchInstruction::Goto(lbl) => JumpTargets::Regular(*lbl),
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                JumpTargets::Many(ts)
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                JumpTargets::Many(ts)
            }
            BranchInstruction::Jsr(_)
            | BranchInstruction::Ret(_)
            | BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => JumpTargets::None,
        }
    }

    /// Is this one of the legacy subroutine instructions?
    pub fn is_subroutine_instruction(&self) -> bool {
        matches!(self, BranchInstruction::Jsr(_) | BranchInstruction::Ret(_))
    }

    pub fn map_labels<Lbl2, E>(
        &self,
        mut map_label: impl FnMut(&Lbl) -> Result<Lbl2, E>,
    ) -> Result<BranchInstruction<Lbl2>, E> {
        use BranchInstruction::*;

        Ok(match self {
            If(op, lbl) => If(*op, map_label(lbl)?),
            IfICmp(op, lbl) => IfICmp(*op, map_label(lbl)?),
            IfACmp(op, lbl) => IfACmp(*op, map_label(lbl)?),
            IfNull(op, lbl) => IfNull(*op, map_label(lbl)?),
            Goto(lbl) => Goto(map_label(lbl)?),
            Jsr(lbl) => Jsr(map_label(lbl)?),
            Ret(local) => Ret(*local),
            TableSwitch {
                default,
                low,
                targets,
            } => TableSwitch {
                default: map_label(default)?,
                low: *low,
                targets: targets.iter().map(&mut map_label).collect::<Result<_, _>>()?,
            },
            LookupSwitch { default, targets } => LookupSwitch {
                default: map_label(default)?,
                targets: targets
                    .iter()
                    .map(|(key, lbl)| map_label(lbl).map(|lbl2| (*key, lbl2)))
                    .collect::<Result<_, _>>()?,
            },
            IReturn => IReturn,
            LReturn => LReturn,
            FReturn => FReturn,
            DReturn => DReturn,
            AReturn => AReturn,
            Return => Return,
            AThrow => AThrow,
        })
    }
}

/// Non-fallthrough jump targets of a `BranchInstruction`
pub enum JumpTargets<Lbl> {
    None,
    Regular(Lbl),
    Many(Vec<Lbl>),
}

impl<A> JumpTargets<A> {
    pub fn targets(&self) -> &[A] {
        match self {
            JumpTargets::None => &[],
            JumpTargets::Regular(a) => std::slice::from_ref(a),
            JumpTargets::Many(a_many) => a_many,
        }
    }
}

/// Element of a method body
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Plain(Instruction),
    Branch(BranchInstruction<Label>),

    /// Place a label at this position
    Label(Label),

    /// Source line for the code starting at `start`
    LineNumber { line: u16, start: Label },

    /// Explicit stack map frame, describing the state at the next real instruction
    Frame(FrameDeclaration),
}

impl Insn {
    /// Rewrite every label this element refers to (but does not place)
    ///
    /// For [`Insn::Label`], the placed label is mapped too.
    pub fn map_labels<E>(
        &self,
        mut map_label: impl FnMut(Label) -> Result<Label, E>,
    ) -> Result<Insn, E> {
        Ok(match self {
            Insn::Plain(insn) => Insn::Plain(insn.clone()),
            Insn::Branch(branch) => Insn::Branch(branch.map_labels(|lbl| map_label(*lbl))?),
            Insn::Label(lbl) => Insn::Label(map_label(*lbl)?),
            Insn::LineNumber { line, start } => Insn::LineNumber {
                line: *line,
                start: map_label(*start)?,
            },
            Insn::Frame(frame) => Insn::Frame(frame.map_labels(map_label)?),
        })
    }
}

impl From<Instruction> for Insn {
    fn from(insn: Instruction) -> Insn {
        Insn::Plain(insn)
    }
}

impl From<BranchInstruction<Label>> for Insn {
    fn from(insn: BranchInstruction<Label>) -> Insn {
        Insn::Branch(insn)
    }
}

/// Loadable constant (argument of `ldc`, `ldc_w`, `ldc2_w`, or a bootstrap argument)
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantData {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType<BinaryName>),
    MethodType(MethodDescriptor<BinaryName>),
    MethodHandle(MethodHandle),
    Dynamic(Box<ConstantDynamic>),
}

/// Number of stack slots the constant occupies once loaded
impl Width for ConstantData {
    fn width(&self) -> usize {
        match self {
            ConstantData::Long(_) | ConstantData::Double(_) => 2,
            ConstantData::Dynamic(dynamic) => dynamic.descriptor.width(),
            ConstantData::Integer(_)
            | ConstantData::Float(_)
            | ConstantData::String(_)
            | ConstantData::Class(_)
            | ConstantData::MethodType(_)
            | ConstantData::MethodHandle(_) => 1,
        }
    }
}

/// Dynamically-computed constant (`CONSTANT_Dynamic`)
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantDynamic {
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
    pub bootstrap: MethodHandle,
    pub arguments: Vec<ConstantData>,
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct MethodHandle {
    pub kind: HandleKind,
    pub class: BinaryName,
    pub name: UnqualifiedName,

    /// Field or method descriptor, depending on `kind`
    pub descriptor: String,
    pub is_interface: bool,
}

/// Field referenced by `getfield`, `putfield`, `getstatic`, or `putstatic`
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

/// Method referenced by an invoke instruction
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct MethodRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub is_interface: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InvokeDynamic {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub bootstrap: MethodHandle,
    pub arguments: Vec<ConstantData>,
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because it does not refer to a method on a class.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total arguments, where `long`/`double` count for 2
}

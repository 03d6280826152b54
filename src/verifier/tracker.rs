use super::frame::push_value;
use super::*;
use crate::code::{
    BranchInstruction, ConstantData, Insn, Instruction, InvokeType, Label, LabelGenerator,
    LocalVariable, MethodBody, MethodSignature,
};
use crate::util::Width;
use crate::{
    BinaryName, Error, FieldType, ParseDescriptor, RefType, Settings, TrackerErrorKind,
    UnqualifiedName,
};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

/// Symbolic execution of a method body, one instruction at a time
///
/// The tracker is fed the elements of a method body in order (see [`FrameTracker::visit`]) and
/// keeps the types of the locals and operand stack up to date. After an unconditional transfer of
/// control (`goto`, returns, `athrow`, switches), the frame is unknown until a frame declaration
/// is seen or a label is placed which was the target of an earlier jump.
pub struct FrameTracker {
    /// Class declaring the method (the type `this` takes once initialized)
    this_class: BinaryName,

    /// Current frame, or `None` if the current position is unreachable
    frame: Option<Frame>,

    /// Frame of the last declaration (the reference for compressed declarations)
    last_declared: Frame,

    /// Labels placed since the last real instruction
    pending_labels: Vec<Label>,

    /// Class allocated by the `new` at each creation-site label
    uninitialized_types: HashMap<Label, BinaryName>,

    /// Every label placed so far
    placed_labels: HashSet<Label>,

    /// Frames at the sources of jumps to labels not yet placed
    jump_frames: HashMap<Label, Frame>,

    expand_compressed_frames: bool,
    recover_frames_at_labels: bool,

    max_stack: usize,
    max_locals: usize,
}

impl FrameTracker {
    pub fn new(method: &MethodSignature, settings: &Settings) -> FrameTracker {
        let entry = Frame::entry(method);
        FrameTracker {
            this_class: method.class.clone(),
            max_stack: 0,
            max_locals: entry.locals.len(),
            frame: Some(entry.clone()),
            last_declared: entry,
            pending_labels: vec![],
            uninitialized_types: HashMap::new(),
            placed_labels: HashSet::new(),
            jump_frames: HashMap::new(),
            expand_compressed_frames: settings.expand_compressed_frames,
            recover_frames_at_labels: settings.recover_frames_at_labels,
        }
    }

    /// Frame at the current position, if it is known
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Maximum stack depth seen so far (in slots)
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Number of local variable slots used so far
    pub fn max_locals(&self) -> usize {
        self.max_locals
    }

    /// Class which will be allocated by the `new` instruction at this creation site
    pub fn uninitialized_type(&self, site: Label) -> Option<&BinaryName> {
        self.uninitialized_types.get(&site)
    }

    /// Feed the next element of the method body
    ///
    /// If this returns a label, it must be placed immediately before `insn`: it is the creation
    /// site minted for a `new` which had no label of its own.
    pub fn visit(
        &mut self,
        insn: &Insn,
        labels: &mut impl LabelGenerator<Label>,
    ) -> Result<Option<Label>, Error> {
        match insn {
            Insn::Plain(plain) => self.visit_instruction(plain, labels),
            Insn::Branch(branch) => self.visit_branch(branch).map(|_| None),
            Insn::Label(label) => {
                self.visit_label(*label);
                Ok(None)
            }
            Insn::LineNumber { .. } => Ok(None),
            Insn::Frame(declaration) => self.visit_frame(declaration).map(|_| None),
        }
    }

    pub fn visit_label(&mut self, label: Label) {
        self.placed_labels.insert(label);
        self.pending_labels.push(label);

        if self.frame.is_none() && self.recover_frames_at_labels {
            if let Some(frame) = self.jump_frames.remove(&label) {
                log::trace!("Recovered frame at {:?}: {:?}", label, frame);
                self.frame = Some(frame);
            }
        }
    }

    /// Replace the current frame with a declared one
    pub fn visit_frame(&mut self, declaration: &FrameDeclaration) -> Result<(), Error> {
        if declaration.is_compressed() && !self.expand_compressed_frames {
            return Err(tracker_error(declaration, TrackerErrorKind::CompressedFrame));
        }

        let frame = Frame::from_declaration(declaration, &self.last_declared)
            .map_err(|kind| tracker_error(declaration, kind))?;
        self.update_maximums(&frame);
        self.last_declared = frame.clone();
        self.frame = Some(frame);
        Ok(())
    }

    /// Update the frame to reflect the effects of the given (non-branching) instruction
    pub fn visit_instruction(
        &mut self,
        insn: &Instruction,
        labels: &mut impl LabelGenerator<Label>,
    ) -> Result<Option<Label>, Error> {
        let frame = match self.frame.as_mut() {
            Some(frame) => frame,
            None => {
                self.pending_labels.clear();
                return Ok(None);
            }
        };

        let mut minted = None;
        if let Instruction::New(class) = insn {
            let site = match self.pending_labels.first() {
                Some(site) => *site,
                None => {
                    let site = labels.fresh_label();
                    self.placed_labels.insert(site);
                    self.pending_labels.push(site);
                    minted = Some(site);
                    site
                }
            };
            for label in &self.pending_labels {
                self.uninitialized_types.insert(*label, class.clone());
            }
            frame.stack.push(VType::Uninitialized(site));
        } else {
            execute(
                frame,
                insn,
                &self.this_class,
                &self.uninitialized_types,
                &mut self.max_locals,
            )
            .map_err(|kind| tracker_error(insn, kind))?;
        }

        self.max_locals = self.max_locals.max(frame.locals.len());
        self.max_stack = self.max_stack.max(frame.stack.len());
        self.pending_labels.clear();
        Ok(minted)
    }

    /// Update the frame to reflect the effects of the given branching instruction
    pub fn visit_branch(&mut self, insn: &BranchInstruction<Label>) -> Result<(), Error> {
        if insn.is_subroutine_instruction() {
            return Err(tracker_error(insn, TrackerErrorKind::SubroutineInstruction));
        }
        self.pending_labels.clear();

        let frame = match self.frame.as_mut() {
            Some(frame) => frame,
            None => return Ok(()),
        };
        execute_branch(frame, insn).map_err(|kind| tracker_error(insn, kind))?;

        if self.recover_frames_at_labels {
            for target in insn.jump_targets().targets() {
                if !self.placed_labels.contains(target) {
                    self.jump_frames
                        .entry(*target)
                        .or_insert_with(|| frame.clone());
                }
            }
        }

        if !insn.falls_through() {
            self.frame = None;
        }
        Ok(())
    }

    /// Account for the slots used by a local variable table entry
    pub fn visit_local_variable(&mut self, local: &LocalVariable) -> Result<(), Error> {
        let descriptor = FieldType::<BinaryName>::parse(&local.descriptor)
            .map_err(|err| Error::BadDescriptor(format!("{}: {}", local.descriptor, err)))?;
        self.max_locals = self
            .max_locals
            .max(local.index as usize + descriptor.width());
        Ok(())
    }

    fn update_maximums(&mut self, frame: &Frame) {
        self.max_locals = self.max_locals.max(frame.locals.len());
        self.max_stack = self.max_stack.max(frame.stack.len());
    }
}

/// Result of running a [`FrameTracker`] over a whole method body
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Instructions of the body, with creation-site labels inserted before `new` where needed
    pub instructions: Vec<Insn>,

    /// Frame in effect before each entry of `instructions` (`None` where unreachable)
    pub frames: Vec<Option<Frame>>,

    pub max_stack: usize,
    pub max_locals: usize,
}

/// Track frames across an entire method body
pub fn analyze(
    body: &MethodBody,
    method: &MethodSignature,
    settings: &Settings,
) -> Result<Analysis, Error> {
    let mut labels = body.label_generator();
    let mut tracker = FrameTracker::new(method, settings);
    let mut instructions = Vec::with_capacity(body.instructions.len());
    let mut frames = Vec::with_capacity(body.instructions.len());

    for insn in &body.instructions {
        let before = tracker.frame().cloned();
        if let Some(site) = tracker.visit(insn, &mut labels)? {
            instructions.push(Insn::Label(site));
            frames.push(before.clone());
        }
        instructions.push(insn.clone());
        frames.push(before);
    }

    for local in &body.local_variables {
        tracker.visit_local_variable(local)?;
    }

    log::debug!(
        "Analyzed {}.{}: max_stack = {}, max_locals = {}, {} creation sites inserted",
        method.class,
        method.name,
        tracker.max_stack(),
        tracker.max_locals(),
        instructions.len() - body.instructions.len(),
    );

    Ok(Analysis {
        instructions,
        frames,
        max_stack: tracker.max_stack(),
        max_locals: tracker.max_locals(),
    })
}

fn tracker_error(instruction: &impl Debug, kind: TrackerErrorKind) -> Error {
    Error::TrackerError {
        instruction: format!("{:?}", instruction),
        kind,
    }
}

fn execute(
    frame: &mut Frame,
    insn: &Instruction,
    this_class: &BinaryName,
    uninitialized_types: &HashMap<Label, BinaryName>,
    max_locals: &mut usize,
) -> Result<(), TrackerErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let Frame { stack, locals } = frame;

    match insn {
        Nop => (),
        AConstNull => stack.push(Null),
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            stack.push(Integer);
        }
        LConst0 | LConst1 => push_value(stack, Long),
        FConst0 | FConst1 | FConst2 => stack.push(Float),
        DConst0 | DConst1 => push_value(stack, Double),
        BiPush(_) | SiPush(_) => stack.push(Integer),
        Ldc(constant) => {
            if constant.width() != 1 {
                return Err(TrackerErrorKind::NotLoadableConstant(constant.clone()));
            }
            stack.push(constant_type(constant));
        }
        Ldc2(constant) => {
            if constant.width() != 2 {
                return Err(TrackerErrorKind::NotLoadableConstant(constant.clone()));
            }
            push_value(stack, constant_type(constant));
        }

        ILoad(index) | FLoad(index) | ALoad(index) => {
            let typ = get_local(locals, *index, 1, max_locals);
            stack.push(typ);
        }
        LLoad(index) | DLoad(index) => {
            let typ = get_local(locals, *index, 2, max_locals);
            stack.push(typ);
            stack.push(Top);
        }

        IALoad | BALoad | CALoad | SALoad => {
            pop_slots(stack, 2)?;
            stack.push(Integer);
        }
        FALoad => {
            pop_slots(stack, 2)?;
            stack.push(Float);
        }
        LALoad => {
            pop_slots(stack, 2)?;
            push_value(stack, Long);
        }
        DALoad => {
            pop_slots(stack, 2)?;
            push_value(stack, Double);
        }
        AALoad => {
            pop_slots(stack, 1)?;
            let element = match pop(stack)? {
                Object(array_type) => match array_type.array_element() {
                    Some(element_type) => VType::from(element_type),
                    None => Object(RefType::Object(BinaryName::OBJECT)),
                },
                Null => Null,
                _ => Object(RefType::Object(BinaryName::OBJECT)),
            };
            push_value(stack, element);
        }

        IStore(index) | FStore(index) | AStore(index) => {
            let value = pop(stack)?;
            store_local(locals, *index, value, false);
        }
        LStore(index) | DStore(index) => {
            pop_slots(stack, 1)?;
            let value = pop(stack)?;
            store_local(locals, *index, value, true);
        }

        IAStore | FAStore | AAStore | BAStore | CAStore | SAStore => pop_slots(stack, 3)?,
        LAStore | DAStore => pop_slots(stack, 4)?,

        Pop => pop_slots(stack, 1)?,
        Pop2 => pop_slots(stack, 2)?,
        Dup => {
            let [v1] = pop_many(stack)?;
            stack.extend([v1.clone(), v1]);
        }
        DupX1 => {
            let [v2, v1] = pop_many(stack)?;
            stack.extend([v1.clone(), v2, v1]);
        }
        DupX2 => {
            let [v3, v2, v1] = pop_many(stack)?;
            stack.extend([v1.clone(), v3, v2, v1]);
        }
        Dup2 => {
            let [v2, v1] = pop_many(stack)?;
            stack.extend([v2.clone(), v1.clone(), v2, v1]);
        }
        Dup2X1 => {
            let [v3, v2, v1] = pop_many(stack)?;
            stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
        }
        Dup2X2 => {
            let [v4, v3, v2, v1] = pop_many(stack)?;
            stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
        }
        Swap => {
            let [v2, v1] = pop_many(stack)?;
            stack.extend([v1, v2]);
        }

        IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | ISh(_) => {
            pop_slots(stack, 2)?;
            stack.push(Integer);
        }
        LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
            pop_slots(stack, 4)?;
            push_value(stack, Long);
        }
        FAdd | FSub | FMul | FDiv | FRem => {
            pop_slots(stack, 2)?;
            stack.push(Float);
        }
        DAdd | DSub | DMul | DDiv | DRem => {
            pop_slots(stack, 4)?;
            push_value(stack, Double);
        }
        LSh(_) => {
            pop_slots(stack, 3)?;
            push_value(stack, Long);
        }
        INeg | I2B | I2C | I2S => {
            pop_slots(stack, 1)?;
            stack.push(Integer);
        }
        LNeg => {
            pop_slots(stack, 2)?;
            push_value(stack, Long);
        }
        FNeg => {
            pop_slots(stack, 1)?;
            stack.push(Float);
        }
        DNeg => {
            pop_slots(stack, 2)?;
            push_value(stack, Double);
        }
        IInc(index, _) => {
            store_local(locals, *index, Integer, false);
        }

        I2L | F2L => {
            pop_slots(stack, 1)?;
            push_value(stack, Long);
        }
        I2F => {
            pop_slots(stack, 1)?;
            stack.push(Float);
        }
        I2D | F2D => {
            pop_slots(stack, 1)?;
            push_value(stack, Double);
        }
        L2I | D2I => {
            pop_slots(stack, 2)?;
            stack.push(Integer);
        }
        L2F | D2F => {
            pop_slots(stack, 2)?;
            stack.push(Float);
        }
        L2D => {
            pop_slots(stack, 2)?;
            push_value(stack, Double);
        }
        D2L => {
            pop_slots(stack, 2)?;
            push_value(stack, Long);
        }
        F2I => {
            pop_slots(stack, 1)?;
            stack.push(Integer);
        }

        LCmp | DCmp(_) => {
            pop_slots(stack, 4)?;
            stack.push(Integer);
        }
        FCmp(_) => {
            pop_slots(stack, 2)?;
            stack.push(Integer);
        }

        GetStatic(field) => push_value(stack, VType::from(field.descriptor.clone())),
        PutStatic(field) => pop_slots(stack, field.descriptor.width())?,
        GetField(field) => {
            pop_slots(stack, 1)?;
            push_value(stack, VType::from(field.descriptor.clone()));
        }
        PutField(field) => pop_slots(stack, field.descriptor.width() + 1)?,

        Invoke(invoke_type, method) => {
            pop_slots(stack, method.descriptor.parameter_length(false))?;

            if !matches!(invoke_type, InvokeType::Static) {
                let receiver = pop(stack)?;
                let is_init = method.name == UnqualifiedName::INIT;
                if let (InvokeType::Special, true) = (invoke_type, is_init) {
                    let initialized = match &receiver {
                        UninitializedThis => Some(this_class.clone()),
                        Uninitialized(site) => match uninitialized_types.get(site) {
                            Some(class) => Some(class.clone()),
                            None => return Err(TrackerErrorKind::UnknownCreationSite(*site)),
                        },
                        _ => None,
                    };
                    if let Some(class) = initialized {
                        let initialized = Object(RefType::Object(class));
                        replace_all(stack, &receiver, &initialized);
                        replace_all(locals, &receiver, &initialized);
                    }
                }
            }

            if let Some(return_type) = &method.descriptor.return_type {
                push_value(stack, VType::from(return_type.clone()));
            }
        }
        InvokeDynamic(invoke_dynamic) => {
            pop_slots(stack, invoke_dynamic.descriptor.parameter_length(false))?;
            if let Some(return_type) = &invoke_dynamic.descriptor.return_type {
                push_value(stack, VType::from(return_type.clone()));
            }
        }

        // Pushed by the caller, which knows the creation site
        New(_) => (),
        NewArray(base_type) => {
            pop_slots(stack, 1)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        ANewArray(ref_type) => {
            pop_slots(stack, 1)?;
            stack.push(Object(RefType::array(FieldType::Ref(ref_type.clone()))));
        }
        MultiANewArray(array_type, dimensions) => {
            pop_slots(stack, *dimensions as usize)?;
            stack.push(Object(array_type.clone()));
        }
        ArrayLength | InstanceOf(_) => {
            pop_slots(stack, 1)?;
            stack.push(Integer);
        }
        CheckCast(ref_type) => {
            pop_slots(stack, 1)?;
            stack.push(Object(ref_type.clone()));
        }
        MonitorEnter | MonitorExit => pop_slots(stack, 1)?,
    }

    Ok(())
}

fn execute_branch(
    frame: &mut Frame,
    insn: &BranchInstruction<Label>,
) -> Result<(), TrackerErrorKind> {
    use BranchInstruction::*;

    match insn {
        If(_, _)
        | IfNull(_, _)
        | TableSwitch { .. }
        | LookupSwitch { .. }
        | IReturn
        | FReturn
        | AReturn
        | AThrow => pop_slots(&mut frame.stack, 1),
        IfICmp(_, _) | IfACmp(_, _) | LReturn | DReturn => pop_slots(&mut frame.stack, 2),
        Goto(_) | Return => Ok(()),
        Jsr(_) | Ret(_) => Err(TrackerErrorKind::SubroutineInstruction),
    }
}

/// Type pushed by `ldc` or `ldc2_w`
fn constant_type(constant: &ConstantData) -> VType {
    match constant {
        ConstantData::Integer(_) => VType::Integer,
        ConstantData::Float(_) => VType::Float,
        ConstantData::Long(_) => VType::Long,
        ConstantData::Double(_) => VType::Double,
        ConstantData::String(_) => VType::Object(RefType::Object(BinaryName::STRING)),
        ConstantData::Class(_) => VType::Object(RefType::Object(BinaryName::CLASS)),
        ConstantData::MethodType(_) => VType::Object(RefType::Object(BinaryName::METHODTYPE)),
        ConstantData::MethodHandle(_) => VType::Object(RefType::Object(BinaryName::METHODHANDLE)),
        ConstantData::Dynamic(dynamic) => VType::from(dynamic.descriptor.clone()),
    }
}

fn pop(stack: &mut Vec<VType>) -> Result<VType, TrackerErrorKind> {
    stack.pop().ok_or(TrackerErrorKind::EmptyStack)
}

fn pop_slots(stack: &mut Vec<VType>, count: usize) -> Result<(), TrackerErrorKind> {
    if stack.len() < count {
        return Err(TrackerErrorKind::EmptyStack);
    }
    stack.truncate(stack.len() - count);
    Ok(())
}

/// Pop `N` slots, returned in stack order (the top of the stack is last)
fn pop_many<const N: usize>(stack: &mut Vec<VType>) -> Result<[VType; N], TrackerErrorKind> {
    if stack.len() < N {
        return Err(TrackerErrorKind::EmptyStack);
    }
    let popped = stack.split_off(stack.len() - N);
    <[VType; N]>::try_from(popped).map_err(|_| TrackerErrorKind::EmptyStack)
}

/// Read a local, counting `width` slots as used
///
/// Slots past the end of the known locals read as `Top`.
fn get_local(locals: &[VType], index: u16, width: usize, max_locals: &mut usize) -> VType {
    let index = index as usize;
    *max_locals = (*max_locals).max(index + width);
    locals.get(index).cloned().unwrap_or(VType::Top)
}

/// Write a local, invalidating any wide value whose second half gets overwritten
fn store_local(locals: &mut Vec<VType>, index: u16, value: VType, wide: bool) {
    let index = index as usize;
    set_local(locals, index, value);
    if wide {
        set_local(locals, index + 1, VType::Top);
    }
    if index > 0 && locals[index - 1].width() == 2 {
        locals[index - 1] = VType::Top;
    }
}

fn set_local(locals: &mut Vec<VType>, index: usize, value: VType) {
    if locals.len() <= index {
        locals.resize(index + 1, VType::Top);
    }
    locals[index] = value;
}

fn replace_all(slots: &mut [VType], original: &VType, updated: &VType) {
    for slot in slots.iter_mut() {
        if slot == original {
            *slot = updated.clone();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::code::{
        FieldRef, HandleKind, LocalVariable, MethodHandle, MethodRef, SequentialLabels,
    };
    use crate::{MethodAccessFlags, MethodDescriptor, Name};

    fn static_method(descriptor: &str) -> MethodSignature {
        MethodSignature::parse("pkg/Demo", "run", descriptor, MethodAccessFlags::STATIC).unwrap()
    }

    fn string() -> VType {
        VType::Object(RefType::Object(BinaryName::STRING))
    }

    fn init_of(class: &BinaryName) -> Instruction {
        Instruction::Invoke(
            InvokeType::Special,
            MethodRef {
                class: class.clone(),
                name: UnqualifiedName::INIT,
                descriptor: MethodDescriptor::parse("()V").unwrap(),
                is_interface: false,
            },
        )
    }

    fn run(tracker: &mut FrameTracker, labels: &mut SequentialLabels, insns: Vec<Insn>) {
        for insn in insns {
            tracker.visit(&insn, labels).unwrap();
        }
    }

    #[test]
    fn swap_exchanges_single_slots() {
        let mut labels = SequentialLabels::new(Label::START);
        let method = static_method("(ILjava/lang/String;)V");
        let mut tracker = FrameTracker::new(&method, &Settings::new());
        run(
            &mut tracker,
            &mut labels,
            vec![
                Instruction::ILoad(0).into(),
                Instruction::ALoad(1).into(),
                Instruction::Swap.into(),
            ],
        );

        assert_eq!(tracker.frame().unwrap().stack, vec![string(), VType::Integer]);
        assert_eq!(tracker.max_stack(), 2);
        assert_eq!(tracker.max_locals(), 2);
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut labels = SequentialLabels::new(Label::START);
        let method = static_method("()V");
        let mut tracker = FrameTracker::new(&method, &Settings::new());
        run(
            &mut tracker,
            &mut labels,
            vec![Instruction::Ldc2(ConstantData::Long(5)).into()],
        );
        assert_eq!(tracker.frame().unwrap().stack, vec![VType::Long, VType::Top]);

        let narrow_ldc2 = tracker.visit_instruction(
            &Instruction::Ldc2(ConstantData::Integer(1)),
            &mut labels,
        );
        assert!(matches!(
            narrow_ldc2,
            Err(Error::TrackerError {
                kind: TrackerErrorKind::NotLoadableConstant(ConstantData::Integer(1)),
                ..
            })
        ));

        let wide_ldc =
            tracker.visit_instruction(&Instruction::Ldc(ConstantData::Double(1.0)), &mut labels);
        assert!(matches!(
            wide_ldc,
            Err(Error::TrackerError {
                kind: TrackerErrorKind::NotLoadableConstant(_),
                ..
            })
        ));
    }

    #[test]
    fn popping_an_empty_stack_fails() {
        let mut labels = SequentialLabels::new(Label::START);
        let method = static_method("()V");
        let mut tracker = FrameTracker::new(&method, &Settings::new());
        let result = tracker.visit_instruction(&Instruction::Pop, &mut labels);
        assert!(matches!(
            result,
            Err(Error::TrackerError {
                kind: TrackerErrorKind::EmptyStack,
                ..
            })
        ));
    }

    #[test]
    fn store_invalidates_overlapped_wide_local() {
        let mut labels = SequentialLabels::new(Label::START);
        let method = static_method("(J)V");
        let mut tracker = FrameTracker::new(&method, &Settings::new());
        run(
            &mut tracker,
            &mut labels,
            vec![Instruction::IConst0.into(), Instruction::IStore(1).into()],
        );
        assert_eq!(tracker.frame().unwrap().locals, vec![VType::Top, VType::Integer]);

        run(
            &mut tracker,
            &mut labels,
            vec![Instruction::DConst1.into(), Instruction::DStore(3).into()],
        );
        assert_eq!(
            tracker.frame().unwrap().locals,
            vec![VType::Top, VType::Integer, VType::Top, VType::Double, VType::Top]
        );
        assert_eq!(tracker.max_locals(), 5);
    }

    #[test]
    fn new_without_label_gets_a_creation_site() {
        let mut labels = SequentialLabels::new(Label::START);
        let foo = BinaryName::from_str("pkg/Foo").unwrap();
        let method = static_method("()V");
        let mut tracker = FrameTracker::new(&method, &Settings::new());

        let site = tracker
            .visit_instruction(&Instruction::New(foo.clone()), &mut labels)
            .unwrap()
            .expect("a creation site should be minted");
        assert_eq!(tracker.uninitialized_type(site), Some(&foo));

        run(
            &mut tracker,
            &mut labels,
            vec![
                Instruction::Dup.into(),
                Instruction::Dup.into(),
                Instruction::AStore(1).into(),
            ],
        );
        let frame = tracker.frame().unwrap();
        assert_eq!(frame.locals, vec![VType::Top, VType::Uninitialized(site)]);
        assert_eq!(
            frame.stack,
            vec![VType::Uninitialized(site), VType::Uninitialized(site)]
        );

        run(&mut tracker, &mut labels, vec![init_of(&foo).into()]);
        let initialized = VType::Object(RefType::Object(foo));
        let frame = tracker.frame().unwrap();
        assert_eq!(frame.locals, vec![VType::Top, initialized.clone()]);
        assert_eq!(frame.stack, vec![initialized]);
        assert_eq!(tracker.max_stack(), 3);
    }

    #[test]
    fn new_uses_pending_labels_as_creation_site() {
        let mut labels = SequentialLabels::new(Label::START);
        let (first, second) = (labels.fresh_label(), labels.fresh_label());
        let foo = BinaryName::from_str("pkg/Foo").unwrap();
        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());

        tracker.visit_label(first);
        tracker.visit_label(second);
        let minted = tracker
            .visit_instruction(&Instruction::New(foo.clone()), &mut labels)
            .unwrap();
        assert_eq!(minted, None);
        assert_eq!(tracker.frame().unwrap().stack, vec![VType::Uninitialized(first)]);
        assert_eq!(tracker.uninitialized_type(second), Some(&foo));
    }

    #[test]
    fn super_constructor_initializes_this() {
        let mut labels = SequentialLabels::new(Label::START);
        let method =
            MethodSignature::parse("pkg/Foo", "<init>", "(I)V", MethodAccessFlags::PUBLIC).unwrap();
        let mut tracker = FrameTracker::new(&method, &Settings::new());
        assert_eq!(
            tracker.frame().unwrap().locals,
            vec![VType::UninitializedThis, VType::Integer]
        );

        run(
            &mut tracker,
            &mut labels,
            vec![Instruction::ALoad(0).into(), init_of(&BinaryName::OBJECT).into()],
        );
        assert_eq!(
            tracker.frame().unwrap().locals,
            vec![VType::Object(RefType::Object(method.class.clone())), VType::Integer]
        );
    }

    #[test]
    fn frame_recovered_at_forward_jump_target() {
        let mut labels = SequentialLabels::new(Label::START);
        let target = labels.fresh_label();
        let insns = vec![
            Instruction::IConst1.into(),
            BranchInstruction::Goto(target).into(),
            Instruction::IConst2.into(),
            Insn::Label(target),
        ];

        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());
        run(&mut tracker, &mut labels, insns.clone());
        assert_eq!(tracker.frame().unwrap().stack, vec![VType::Integer]);

        let settings = Settings {
            recover_frames_at_labels: false,
            ..Settings::new()
        };
        let mut tracker = FrameTracker::new(&static_method("()V"), &settings);
        run(&mut tracker, &mut labels, insns);
        assert_eq!(tracker.frame(), None);
    }

    #[test]
    fn subroutine_instructions_rejected_even_when_unreachable() {
        let mut labels = SequentialLabels::new(Label::START);
        let target = labels.fresh_label();
        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());
        tracker.visit_branch(&BranchInstruction::Return).unwrap();
        assert_eq!(tracker.frame(), None);

        let result = tracker.visit_branch(&BranchInstruction::Jsr(target));
        assert!(matches!(
            result,
            Err(Error::TrackerError {
                kind: TrackerErrorKind::SubroutineInstruction,
                ..
            })
        ));
    }

    #[test]
    fn compressed_frames_expand_against_entry_frame() {
        let method = static_method("(Ljava/lang/String;)V");
        let mut tracker = FrameTracker::new(&method, &Settings::new());
        tracker.visit_branch(&BranchInstruction::Return).unwrap();
        tracker
            .visit_frame(&FrameDeclaration::Same1(VType::Long))
            .unwrap();
        let frame = tracker.frame().unwrap();
        assert_eq!(frame.locals, vec![string()]);
        assert_eq!(frame.stack, vec![VType::Long, VType::Top]);

        let settings = Settings {
            expand_compressed_frames: false,
            ..Settings::new()
        };
        let mut tracker = FrameTracker::new(&method, &settings);
        assert!(matches!(
            tracker.visit_frame(&FrameDeclaration::Same),
            Err(Error::TrackerError {
                kind: TrackerErrorKind::CompressedFrame,
                ..
            })
        ));
    }

    #[test]
    fn analyze_inserts_creation_sites_and_counts_local_table() {
        let foo = BinaryName::from_str("pkg/Foo").unwrap();
        let mut body = MethodBody {
            instructions: vec![
                Instruction::New(foo.clone()).into(),
                Instruction::Dup.into(),
                init_of(&foo).into(),
                Instruction::Pop.into(),
                BranchInstruction::Return.into(),
            ],
            ..MethodBody::default()
        };
        let mut labels = body.label_generator();
        let (start, end) = (labels.fresh_label(), labels.fresh_label());
        body.local_variables.push(LocalVariable {
            name: UnqualifiedName::from_str("d").unwrap(),
            descriptor: "D".to_owned(),
            signature: None,
            start,
            end,
            index: 3,
        });

        let method = static_method("()V");
        let analysis = analyze(&body, &method, &Settings::new()).unwrap();
        assert_eq!(analysis.instructions.len(), 6);
        assert!(matches!(analysis.instructions[0], Insn::Label(_)));
        assert_eq!(analysis.instructions[1..], body.instructions[..]);
        assert_eq!(analysis.frames[0], analysis.frames[1]);
        assert_eq!(analysis.frames[5].as_ref().map(|f| f.stack.len()), Some(0));
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(analysis.max_locals, 5);

        body.local_variables[0].descriptor = "Q".to_owned();
        assert!(matches!(
            analyze(&body, &method, &Settings::new()),
            Err(Error::BadDescriptor(_))
        ));
    }

    fn stack_after(descriptor: &str, insns: Vec<Insn>) -> Vec<VType> {
        let mut labels = SequentialLabels::new(Label::START);
        let mut tracker = FrameTracker::new(&static_method(descriptor), &Settings::new());
        run(&mut tracker, &mut labels, insns);
        tracker.frame().unwrap().stack.clone()
    }

    fn field_type(descriptor: &str) -> VType {
        VType::from(FieldType::<BinaryName>::parse(descriptor).unwrap())
    }

    #[test]
    fn dup_forms_copy_slots_under_the_top() {
        use Instruction::*;
        use VerificationType::*;

        let dup_x1 = stack_after("()V", vec![IConst0.into(), FConst0.into(), DupX1.into()]);
        assert_eq!(dup_x1, vec![Float, Integer, Float]);

        let dup_x2 = stack_after(
            "()V",
            vec![IConst0.into(), FConst0.into(), AConstNull.into(), DupX2.into()],
        );
        assert_eq!(dup_x2, vec![Null, Integer, Float, Null]);

        let dup2 = stack_after("()V", vec![LConst0.into(), Dup2.into()]);
        assert_eq!(dup2, vec![Long, Top, Long, Top]);

        let dup2_x1 = stack_after("()V", vec![IConst0.into(), LConst0.into(), Dup2X1.into()]);
        assert_eq!(dup2_x1, vec![Long, Top, Integer, Long, Top]);

        let dup2_x2 = stack_after("()V", vec![LConst0.into(), DConst0.into(), Dup2X2.into()]);
        assert_eq!(dup2_x2, vec![Double, Top, Long, Top, Double, Top]);

        let mut labels = SequentialLabels::new(Label::START);
        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());
        run(&mut tracker, &mut labels, vec![IConst0.into(), FConst0.into()]);
        assert!(matches!(
            tracker.visit_instruction(&DupX2, &mut labels),
            Err(Error::TrackerError {
                kind: TrackerErrorKind::EmptyStack,
                ..
            })
        ));
    }

    #[test]
    fn aaload_pushes_the_element_type() {
        use Instruction::*;
        let descriptor = "([[JLjava/lang/String;)V";

        let nested = stack_after(descriptor, vec![ALoad(0).into(), IConst0.into(), AALoad.into()]);
        assert_eq!(nested, vec![field_type("[J")]);

        let null = stack_after(descriptor, vec![AConstNull.into(), IConst0.into(), AALoad.into()]);
        assert_eq!(null, vec![VType::Null]);

        let not_an_array =
            stack_after(descriptor, vec![ALoad(1).into(), IConst0.into(), AALoad.into()]);
        assert_eq!(not_an_array, vec![VType::Object(RefType::Object(BinaryName::OBJECT))]);
    }

    #[test]
    fn field_access_handles_wide_fields() {
        use Instruction::*;
        let class = BinaryName::from_str("pkg/Demo").unwrap();
        let field = |name: &str, descriptor: &str| FieldRef {
            class: class.clone(),
            name: UnqualifiedName::from_str(name).unwrap(),
            descriptor: FieldType::parse(descriptor).unwrap(),
        };
        let receiver = VType::Object(RefType::Object(class.clone()));

        let mut labels = SequentialLabels::new(Label::START);
        let mut tracker = FrameTracker::new(&static_method("(Lpkg/Demo;)V"), &Settings::new());
        run(
            &mut tracker,
            &mut labels,
            vec![
                ALoad(0).into(),
                ALoad(0).into(),
                GetField(field("total", "J")).into(),
            ],
        );
        assert_eq!(
            tracker.frame().unwrap().stack,
            vec![receiver, VType::Long, VType::Top]
        );
        assert_eq!(tracker.max_stack(), 3);

        run(
            &mut tracker,
            &mut labels,
            vec![
                PutField(field("total", "J")).into(),
                GetStatic(field("RATE", "D")).into(),
            ],
        );
        assert_eq!(tracker.frame().unwrap().stack, vec![VType::Double, VType::Top]);

        run(&mut tracker, &mut labels, vec![PutStatic(field("RATE", "D")).into()]);
        assert!(tracker.frame().unwrap().stack.is_empty());
    }

    #[test]
    fn invocations_pop_wide_arguments() {
        use Instruction::*;
        let invoke = |invoke_type: InvokeType, descriptor: &str| {
            Insn::from(Invoke(
                invoke_type,
                MethodRef {
                    class: BinaryName::from_str("pkg/Demo").unwrap(),
                    name: UnqualifiedName::from_str("mix").unwrap(),
                    descriptor: MethodDescriptor::parse(descriptor).unwrap(),
                    is_interface: false,
                },
            ))
        };

        let virtual_call = stack_after(
            "(Lpkg/Demo;)V",
            vec![
                IConst5.into(),
                ALoad(0).into(),
                LConst1.into(),
                DConst0.into(),
                IConst0.into(),
                invoke(InvokeType::Virtual, "(JDI)Ljava/lang/String;"),
            ],
        );
        assert_eq!(virtual_call, vec![VType::Integer, string()]);

        let static_call = stack_after(
            "()V",
            vec![
                LConst0.into(),
                DConst1.into(),
                invoke(InvokeType::Static, "(JD)J"),
            ],
        );
        assert_eq!(static_call, vec![VType::Long, VType::Top]);

        let mut labels = SequentialLabels::new(Label::START);
        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());
        run(&mut tracker, &mut labels, vec![LConst0.into()]);
        let missing_receiver = tracker.visit(&invoke(InvokeType::Virtual, "(J)V"), &mut labels);
        assert!(matches!(
            missing_receiver,
            Err(Error::TrackerError {
                kind: TrackerErrorKind::EmptyStack,
                ..
            })
        ));
    }

    #[test]
    fn iinc_casts_and_array_creation() {
        use Instruction::*;
        let mut labels = SequentialLabels::new(Label::START);
        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());

        run(&mut tracker, &mut labels, vec![IInc(2, 1).into()]);
        assert_eq!(
            tracker.frame().unwrap().locals,
            vec![VType::Top, VType::Top, VType::Integer]
        );
        assert_eq!(tracker.max_locals(), 3);

        let string_type = RefType::Object(BinaryName::STRING);
        run(
            &mut tracker,
            &mut labels,
            vec![AConstNull.into(), CheckCast(string_type).into()],
        );
        assert_eq!(tracker.frame().unwrap().stack, vec![string()]);

        let grid = RefType::<BinaryName>::parse("[[I").unwrap();
        run(
            &mut tracker,
            &mut labels,
            vec![
                Pop.into(),
                IConst2.into(),
                IConst3.into(),
                MultiANewArray(grid, 2).into(),
            ],
        );
        assert_eq!(tracker.frame().unwrap().stack, vec![field_type("[[I")]);

        let bootstrap = MethodHandle {
            kind: HandleKind::InvokeStatic,
            class: BinaryName::from_str("pkg/Bootstraps").unwrap(),
            name: UnqualifiedName::from_str("link").unwrap(),
            descriptor: "()Ljava/lang/invoke/CallSite;".to_owned(),
            is_interface: false,
        };
        let indy = crate::code::InvokeDynamic {
            name: UnqualifiedName::from_str("bind").unwrap(),
            descriptor: MethodDescriptor::parse("(Ljava/lang/Object;J)Ljava/lang/Runnable;")
                .unwrap(),
            bootstrap,
            arguments: vec![],
        };
        run(
            &mut tracker,
            &mut labels,
            vec![LConst1.into(), Instruction::InvokeDynamic(indy).into()],
        );
        assert_eq!(tracker.frame().unwrap().stack, vec![field_type("Ljava/lang/Runnable;")]);
        assert_eq!(tracker.max_stack(), 3);
    }

    #[test]
    fn branches_pop_their_operands() {
        use crate::code::{EqComparison, OrdComparison};

        // Each branch runs on a stack of three ints; the frame at its target shows what is left
        let mut labels = SequentialLabels::new(Label::START);
        let cases: [(fn(Label) -> BranchInstruction<Label>, usize); 7] = [
            (|l| BranchInstruction::If(OrdComparison::LT, l), 2),
            (|l| BranchInstruction::IfNull(EqComparison::NE, l), 2),
            (|l| BranchInstruction::IfICmp(OrdComparison::GE, l), 1),
            (|l| BranchInstruction::IfACmp(EqComparison::EQ, l), 1),
            (
                |l| BranchInstruction::TableSwitch {
                    default: l,
                    low: 0,
                    targets: vec![l, l],
                },
                2,
            ),
            (
                |l| BranchInstruction::LookupSwitch {
                    default: l,
                    targets: vec![(7, l)],
                },
                2,
            ),
            (BranchInstruction::Goto, 3),
        ];

        for (make_branch, remaining) in cases {
            let target = labels.fresh_label();
            let branch = make_branch(target);
            let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());
            run(
                &mut tracker,
                &mut labels,
                vec![
                    Instruction::IConst0.into(),
                    Instruction::IConst1.into(),
                    Instruction::IConst2.into(),
                    branch.clone().into(),
                    Insn::Label(target),
                ],
            );
            assert_eq!(
                tracker.frame().map(|frame| frame.stack.len()),
                Some(remaining),
                "{:?}",
                branch
            );
        }

        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());
        run(&mut tracker, &mut labels, vec![Instruction::IConst0.into()]);
        assert!(matches!(
            tracker.visit_branch(&BranchInstruction::LReturn),
            Err(Error::TrackerError {
                kind: TrackerErrorKind::EmptyStack,
                ..
            })
        ));
    }

    #[test]
    fn init_on_unknown_creation_site_fails() {
        let mut labels = SequentialLabels::new(Label::START);
        let site = labels.fresh_label();
        let foo = BinaryName::from_str("pkg/Foo").unwrap();
        let mut tracker = FrameTracker::new(&static_method("()V"), &Settings::new());

        tracker
            .visit_frame(&FrameDeclaration::Same1(VType::Uninitialized(site)))
            .unwrap();
        let result = tracker.visit_instruction(&init_of(&foo), &mut labels);
        assert!(matches!(
            result,
            Err(Error::TrackerError {
                kind: TrackerErrorKind::UnknownCreationSite(unknown),
                ..
            }) if unknown == site
        ));
    }
}

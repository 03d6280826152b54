use super::{BranchInstruction, Insn, Label, SequentialLabels};
use crate::{
    BinaryName, Error, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName,
};
use std::collections::HashMap;
use std::convert::Infallible;

/// Exception handler covering the instructions in `[start, end)`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TryCatchBlock {
    pub start: Label,
    pub end: Label,
    pub handler: Label,

    /// Class of exceptions caught (`None` catches everything, as for `finally`)
    pub catch_type: Option<BinaryName>,
}

/// Entry in the local variable table
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalVariable {
    pub name: UnqualifiedName,

    /// Field descriptor of the variable, kept unparsed until it is needed
    pub descriptor: String,

    /// Generic signature, if any
    pub signature: Option<String>,
    pub start: Label,
    pub end: Label,
    pub index: u16,
}

/// Code of a single method
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MethodBody {
    pub instructions: Vec<Insn>,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub local_variables: Vec<LocalVariable>,
}

impl MethodBody {
    /// Position of every label placed in the body
    pub fn label_positions(&self) -> Result<HashMap<Label, usize>, Error> {
        let mut positions = HashMap::new();
        for (idx, insn) in self.instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                if positions.insert(*label, idx).is_some() {
                    return Err(Error::DuplicateLabel(*label));
                }
            }
        }
        Ok(positions)
    }

    /// Does the body use `jsr` or `ret`?
    pub fn has_subroutines(&self) -> bool {
        self.instructions.iter().any(|insn| match insn {
            Insn::Branch(branch) => branch.is_subroutine_instruction(),
            _ => false,
        })
    }

    /// Generator for labels guaranteed not to clash with any label already in the body
    pub fn label_generator(&self) -> SequentialLabels {
        let mut max_label = Label::START;
        let mut note = |label: Label| {
            max_label = max_label.max(label);
            Ok::<Label, Infallible>(label)
        };

        for insn in &self.instructions {
            let _ = insn.map_labels(&mut note);
        }
        for block in &self.try_catch_blocks {
            let _ = note(block.start);
            let _ = note(block.end);
            let _ = note(block.handler);
        }
        for local in &self.local_variables {
            let _ = note(local.start);
            let _ = note(local.end);
        }

        SequentialLabels::new(max_label.next())
    }

    /// Subroutine entry labels, in order of first appearance
    pub fn jsr_targets(&self) -> Vec<Label> {
        let mut targets = vec![];
        for insn in &self.instructions {
            if let Insn::Branch(BranchInstruction::Jsr(target)) = insn {
                if !targets.contains(target) {
                    targets.push(*target);
                }
            }
        }
        targets
    }
}

/// What the frame tracker needs to know about the method owning a body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    /// Class declaring the method
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,
}

impl MethodSignature {
    /// Build a signature from unparsed names and descriptor
    pub fn parse(
        class: &str,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
    ) -> Result<MethodSignature, Error> {
        Ok(MethodSignature {
            class: BinaryName::from_str(class).map_err(Error::MalformedName)?,
            name: UnqualifiedName::from_str(name).map_err(Error::MalformedName)?,
            descriptor: MethodDescriptor::parse(descriptor)
                .map_err(|err| Error::BadDescriptor(format!("{}: {}", descriptor, err)))?,
            access_flags,
        })
    }

    /// Is this an instance initializer?
    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::code::{Instruction, LabelGenerator};

    fn labels(n: usize) -> Vec<Label> {
        let mut generator = SequentialLabels::new(Label::START);
        (0..n).map(|_| generator.fresh_label()).collect()
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let l = labels(1);
        let body = MethodBody {
            instructions: vec![
                Insn::Label(l[0]),
                Instruction::Nop.into(),
                Insn::Label(l[0]),
            ],
            ..MethodBody::default()
        };
        assert!(matches!(body.label_positions(), Err(Error::DuplicateLabel(d)) if d == l[0]));
    }

    #[test]
    fn fresh_labels_come_after_every_used_label() {
        let l = labels(6);
        let body = MethodBody {
            instructions: vec![
                Insn::Label(l[0]),
                BranchInstruction::Jsr(l[1]).into(),
                Insn::LineNumber {
                    line: 4,
                    start: l[2],
                },
                BranchInstruction::Return.into(),
                Insn::Label(l[1]),
                BranchInstruction::Ret(1).into(),
            ],
            try_catch_blocks: vec![TryCatchBlock {
                start: l[0],
                end: l[1],
                handler: l[5],
                catch_type: None,
            }],
            local_variables: vec![],
        };

        assert!(body.has_subroutines());
        assert_eq!(body.jsr_targets(), vec![l[1]]);
        assert_eq!(body.label_generator().fresh_label(), l[5].next());
    }

    #[test]
    fn signature_parsing() {
        let sig = MethodSignature::parse(
            "pkg/Foo",
            "<init>",
            "(JLjava/lang/String;)V",
            MethodAccessFlags::PUBLIC,
        )
        .unwrap();
        assert!(sig.is_constructor());
        assert_eq!(sig.descriptor.parameter_length(true), 4);

        let bad = MethodSignature::parse("pkg/Foo", "f", "(J", MethodAccessFlags::STATIC);
        assert!(matches!(bad, Err(Error::BadDescriptor(_))));
    }
}

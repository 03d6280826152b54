use super::{SubroutineId, Subroutines};
use crate::code::{
    BranchInstruction, Insn, Instruction, Label, LabelGenerator, LocalVariable, MethodBody,
    SequentialLabels, TryCatchBlock,
};
use crate::{Error, Settings};
use std::collections::{HashMap, VecDeque};

/// Rewrite a method body so that it no longer uses `jsr` or `ret`
///
/// Every call to a subroutine gets its own copy of the subroutine body. The `jsr` is replaced by
/// pushing `null` (standing in for the return address) and jumping to the copy, and the `ret` at
/// the end of the copy becomes a jump back to just after the call site. Nested calls get copies
/// of copies, so the output can be much larger than the input. A subroutine that ends up calling
/// itself is rejected.
///
/// Bodies without subroutine instructions are returned unchanged.
pub fn inline_subroutines(body: &MethodBody, settings: &Settings) -> Result<MethodBody, Error> {
    if !body.has_subroutines() {
        return Ok(body.clone());
    }

    let subroutines = Subroutines::classify(body)?;
    let mut inliner = Inliner {
        body,
        settings,
        subroutines: &subroutines,
        labels: body.label_generator(),
        instantiations: vec![],
        work_list: VecDeque::new(),
        output: MethodBody::default(),
    };

    let root = inliner.instantiate(SubroutineId::MAIN, None, None);
    inliner.work_list.push_back(root);
    while let Some(instantiation) = inliner.work_list.pop_front() {
        inliner.emit(instantiation)?;
    }

    log::debug!(
        "Inlined {} subroutine instantiations ({} instructions in, {} out)",
        inliner.instantiations.len() - 1,
        body.instructions.len(),
        inliner.output.instructions.len(),
    );
    Ok(inliner.output)
}

/// One copy of a subroutine, specific to the chain of calls leading to it
#[derive(Debug)]
struct Instantiation {
    subroutine: SubroutineId,

    /// Instantiation containing the `jsr` that led here (`None` for main)
    parent: Option<usize>,

    /// Label placed right after the `jsr` in the parent
    return_label: Option<Label>,

    /// Replacement for every label in the original body
    ///
    /// Labels which are only separated by instructions this instantiation doesn't own map to the
    /// same clone, which is what makes empty exception ranges detectable.
    cloned_labels: HashMap<Label, Label>,
}

struct Inliner<'a> {
    body: &'a MethodBody,
    settings: &'a Settings,
    subroutines: &'a Subroutines,
    labels: SequentialLabels,

    /// Every instantiation created so far, main first
    instantiations: Vec<Instantiation>,

    /// Instantiations whose code still needs to be emitted
    work_list: VecDeque<usize>,

    output: MethodBody,
}

impl<'a> Inliner<'a> {
    fn instantiate(
        &mut self,
        subroutine: SubroutineId,
        parent: Option<usize>,
        return_label: Option<Label>,
    ) -> usize {
        let id = self.instantiations.len();
        self.instantiations.push(Instantiation {
            subroutine,
            parent,
            return_label,
            cloned_labels: HashMap::new(),
        });

        let mut cloned_labels = HashMap::new();
        let mut current_clone: Option<Label> = None;
        let body = self.body;
        for (idx, insn) in body.instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                let labels = &mut self.labels;
                let clone = *current_clone.get_or_insert_with(|| labels.fresh_label());
                cloned_labels.insert(*label, clone);
            } else if self.owner(id, idx) == Some(id) {
                current_clone = None;
            }
        }
        self.instantiations[id].cloned_labels = cloned_labels;

        log::trace!(
            "Instantiation #{} of {:?} (parent {:?}, returning to {:?})",
            id,
            subroutine,
            parent,
            return_label
        );
        id
    }

    /// Instantiate the subroutine called by a `jsr` emitted in `caller`
    ///
    /// Returns the new instantiation and the label the caller places right after the call.
    fn call(&mut self, caller: usize, target: Label) -> Result<(usize, Label), Error> {
        let subroutine = self.subroutines.called_by(target)?;

        let mut ancestor = Some(caller);
        while let Some(idx) = ancestor {
            if self.instantiations[idx].subroutine == subroutine {
                return Err(Error::RecursiveSubroutine(target));
            }
            ancestor = self.instantiations[idx].parent;
        }

        let return_label = self.labels.fresh_label();
        let callee = self.instantiate(subroutine, Some(caller), Some(return_label));
        Ok((callee, return_label))
    }

    /// Which instantiation emits the instruction at `idx`, from the perspective of `instantiation`
    ///
    /// Instructions shared by several subroutines are emitted by the outermost instantiation in
    /// the call chain that contains them.
    fn owner(&self, instantiation: usize, idx: usize) -> Option<usize> {
        let subroutine = self.instantiations[instantiation].subroutine;
        if !self.subroutines.get(subroutine).contains(idx) {
            return None;
        }
        if !self.subroutines.is_dual_citizen(idx) {
            return Some(instantiation);
        }

        let mut owner = instantiation;
        let mut ancestor = self.instantiations[instantiation].parent;
        while let Some(parent) = ancestor {
            if self.subroutines.get(self.instantiations[parent].subroutine).contains(idx) {
                owner = parent;
            }
            ancestor = self.instantiations[parent].parent;
        }
        Some(owner)
    }

    /// Clone of a label in this instantiation, used for range boundaries
    fn range_label(&self, instantiation: usize, label: Label) -> Result<Label, Error> {
        self.instantiations[instantiation]
            .cloned_labels
            .get(&label)
            .copied()
            .ok_or(Error::UnresolvedLabel(label))
    }

    /// Clone of a label used as a jump target, which may live in an enclosing instantiation
    fn jump_target(&self, instantiation: usize, label: Label) -> Result<Label, Error> {
        let position = self.subroutines.position(label)?;
        let owner = self
            .owner(instantiation, position)
            .ok_or(Error::UnownedLabel(label))?;
        self.instantiations[owner]
            .cloned_labels
            .get(&label)
            .copied()
            .ok_or(Error::UnownedLabel(label))
    }

    /// Target of a `ret`: the return label of the outermost instantiation containing it
    fn return_target(&self, instantiation: usize, idx: usize) -> Result<Label, Error> {
        let mut target = None;
        let mut ancestor = Some(instantiation);
        while let Some(current) = ancestor {
            let Instantiation {
                subroutine,
                parent,
                return_label,
                ..
            } = &self.instantiations[current];
            if self.subroutines.get(*subroutine).contains(idx) {
                target = *return_label;
            }
            ancestor = *parent;
        }
        target.ok_or(Error::OrphanedReturn(idx))
    }

    fn emit(&mut self, instantiation: usize) -> Result<(), Error> {
        let body = self.body;
        let mut previous_label: Option<Label> = None;

        for (idx, insn) in body.instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                let clone = self.range_label(instantiation, *label)?;
                if previous_label != Some(clone) {
                    self.output.instructions.push(Insn::Label(clone));
                    previous_label = Some(clone);
                }
                continue;
            }
            if self.owner(instantiation, idx) != Some(instantiation) {
                continue;
            }

            match insn {
                Insn::Branch(BranchInstruction::Jsr(target)) => {
                    let (callee, return_label) = self.call(instantiation, *target)?;
                    let entry = self.jump_target(callee, *target)?;

                    self.output.instructions.extend([
                        Insn::Plain(Instruction::AConstNull),
                        Insn::Branch(BranchInstruction::Goto(entry)),
                        Insn::Label(return_label),
                    ]);
                    self.work_list.push_back(callee);
                }
                Insn::Branch(BranchInstruction::Ret(_)) => {
                    let target = self.return_target(instantiation, idx)?;
                    self.output
                        .instructions
                        .push(Insn::Branch(BranchInstruction::Goto(target)));
                }
                Insn::LineNumber { .. } if !self.settings.keep_line_numbers => (),
                other => {
                    let copied = other.map_labels(|lbl| self.jump_target(instantiation, lbl))?;
                    self.output.instructions.push(copied);
                }
            }
        }

        for block in &body.try_catch_blocks {
            let start = self.range_label(instantiation, block.start)?;
            let end = self.range_label(instantiation, block.end)?;
            if start == end {
                continue;
            }
            let handler = self.jump_target(instantiation, block.handler)?;
            self.output.try_catch_blocks.push(TryCatchBlock {
                start,
                end,
                handler,
                catch_type: block.catch_type.clone(),
            });
        }

        if self.settings.keep_local_variables {
            for local in &body.local_variables {
                let start = self.range_label(instantiation, local.start)?;
                let end = self.range_label(instantiation, local.end)?;
                if start == end {
                    continue;
                }
                self.output.local_variables.push(LocalVariable {
                    start,
                    end,
                    ..local.clone()
                });
            }
        }

        Ok(())
    }
}

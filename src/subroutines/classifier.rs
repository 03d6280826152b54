use crate::code::{BranchInstruction, Insn, Label, MethodBody};
use crate::Error;
use std::collections::HashMap;

/// Index of a subroutine in [`Subroutines`]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubroutineId(usize);

impl SubroutineId {
    /// Top-level code of the method, which is not reached through any `jsr`
    pub const MAIN: SubroutineId = SubroutineId(0);
}

/// Instructions making up one subroutine
#[derive(Debug, Clone)]
pub struct Subroutine {
    /// Position of the first instruction (the start of the run of labels containing the `jsr`
    /// target, or 0 for main)
    pub entry: usize,

    members: Vec<bool>,
}

impl Subroutine {
    fn new(entry: usize, body_len: usize) -> Subroutine {
        Subroutine {
            entry,
            members: vec![false; body_len],
        }
    }

    /// Is the instruction at this position part of the subroutine?
    pub fn contains(&self, index: usize) -> bool {
        self.members.get(index).copied().unwrap_or(false)
    }

    /// Number of instructions in the subroutine
    pub fn len(&self) -> usize {
        self.members.iter().filter(|member| **member).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.members.iter().any(|member| *member)
    }
}

/// Partition of a method body into its main code and its subroutines
///
/// Subroutine boundaries are not marked in bytecode, so they are discovered by walking forward
/// from each entry point: the start of the method and every `jsr` target. A walk follows
/// fall-through and local jumps, but not the target of a `jsr` (that is someone else's body). It
/// also pulls in exception handlers protecting any of its instructions.
///
/// An instruction reached by more than one walk is a _dual citizen_. That happens when
/// subroutines share code, or when a subroutine exits by jumping straight into its caller's code
/// instead of through `ret`.
#[derive(Debug)]
pub struct Subroutines {
    /// Subroutines, with main first
    subroutines: Vec<Subroutine>,

    /// Subroutine entered by each `jsr` target
    by_target: HashMap<Label, SubroutineId>,

    /// Instructions reached by more than one walk
    dual_citizens: Vec<bool>,

    /// Position of every placed label
    label_positions: HashMap<Label, usize>,
}

impl Subroutines {
    pub fn classify(body: &MethodBody) -> Result<Subroutines, Error> {
        let label_positions = body.label_positions()?;
        let len = body.instructions.len();

        let mut subroutines = vec![Subroutine::new(0, len)];
        let mut by_entry: HashMap<usize, SubroutineId> = HashMap::new();
        let mut by_target = HashMap::new();
        for target in body.jsr_targets() {
            let entry = entry_position(body, resolve(&label_positions, target)?);
            let id = *by_entry.entry(entry).or_insert_with(|| {
                subroutines.push(Subroutine::new(entry, len));
                SubroutineId(subroutines.len() - 1)
            });
            by_target.insert(target, id);
        }

        let mut classifier = Classifier {
            body,
            label_positions: &label_positions,
            visited: vec![false; len],
            dual_citizens: vec![false; len],
        };
        for subroutine in &mut subroutines {
            classifier.mark(subroutine)?;
        }
        let dual_citizens = classifier.dual_citizens;

        log::debug!(
            "Found {} subroutines ({} instructions shared between subroutines)",
            subroutines.len() - 1,
            dual_citizens.iter().filter(|dual| **dual).count(),
        );

        Ok(Subroutines {
            subroutines,
            by_target,
            dual_citizens,
            label_positions,
        })
    }

    /// Number of subroutines, counting main
    pub fn len(&self) -> usize {
        self.subroutines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subroutines.is_empty()
    }

    pub fn get(&self, id: SubroutineId) -> &Subroutine {
        &self.subroutines[id.0]
    }

    /// Subroutine called by `jsr target`
    pub fn called_by(&self, target: Label) -> Result<SubroutineId, Error> {
        self.position(target)?;
        self.by_target
            .get(&target)
            .copied()
            .ok_or(Error::UnknownSubroutine(target))
    }

    /// Is the instruction at this position reached from more than one entry point?
    pub fn is_dual_citizen(&self, index: usize) -> bool {
        self.dual_citizens.get(index).copied().unwrap_or(false)
    }

    /// Where is this label placed?
    pub fn position(&self, label: Label) -> Result<usize, Error> {
        resolve(&self.label_positions, label)
    }
}

/// Labels placed back to back mark the same position, so a subroutine starts at the first of them
fn entry_position(body: &MethodBody, mut position: usize) -> usize {
    while position > 0 && matches!(body.instructions[position - 1], Insn::Label(_)) {
        position -= 1;
    }
    position
}

fn resolve(label_positions: &HashMap<Label, usize>, label: Label) -> Result<usize, Error> {
    label_positions
        .get(&label)
        .copied()
        .ok_or(Error::UnresolvedLabel(label))
}

struct Classifier<'a> {
    body: &'a MethodBody,
    label_positions: &'a HashMap<Label, usize>,

    /// Instructions reached by any walk so far
    visited: Vec<bool>,
    dual_citizens: Vec<bool>,
}

impl<'a> Classifier<'a> {
    /// Find all of the instructions in a subroutine, including exception handlers
    fn mark(&mut self, subroutine: &mut Subroutine) -> Result<(), Error> {
        let entry = subroutine.entry;
        self.walk(subroutine, entry)?;

        // Handlers protecting part of the subroutine belong to it too, and walking them can bring
        // more protected instructions in
        let mut changed = true;
        while changed {
            changed = false;
            for block in &self.body.try_catch_blocks {
                let handler = resolve(self.label_positions, block.handler)?;
                if subroutine.contains(handler) {
                    continue;
                }

                let start = resolve(self.label_positions, block.start)?;
                let end = resolve(self.label_positions, block.end)?;
                if (start..end).any(|idx| subroutine.contains(idx)) {
                    self.walk(subroutine, handler)?;
                    changed = true;
                }
            }
        }
        Ok(())
    }

    /// Mark everything reachable from `start` without going through a `jsr`
    fn walk(&mut self, subroutine: &mut Subroutine, start: usize) -> Result<(), Error> {
        let mut to_visit = vec![start];

        while let Some(mut idx) = to_visit.pop() {
            while idx < self.body.instructions.len() && !subroutine.contains(idx) {
                subroutine.members[idx] = true;
                if self.visited[idx] {
                    self.dual_citizens[idx] = true;
                }
                self.visited[idx] = true;

                if let Insn::Branch(branch) = &self.body.instructions[idx] {
                    for target in branch.jump_targets().targets() {
                        to_visit.push(resolve(self.label_positions, *target)?);
                    }
                    if !branch.falls_through() {
                        break;
                    }
                    if let BranchInstruction::Jsr(target) = branch {
                        // Entry must still exist, even though it isn't followed
                        resolve(self.label_positions, *target)?;
                    }
                }
                idx += 1;
            }
        }
        Ok(())
    }
}

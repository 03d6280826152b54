use std::fmt;

/// Opaque label
///
/// Labels mark positions in a [`super::MethodBody`] by appearing as [`super::Insn::Label`]. More
/// than one label can be placed at the same position.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(usize);

impl Label {
    /// Lowest possible label
    pub const START: Label = Label(0);

    /// Get the next fresh label
    pub fn next(&self) -> Label {
        Label(self.0 + 1)
    }
}

/// Generates new labels
pub trait LabelGenerator<Lbl> {
    /// Generate a fresh label
    fn fresh_label(&mut self) -> Lbl;
}

/// Label generator for [`Label`]
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone)]
pub struct SequentialLabels(Label);

impl SequentialLabels {
    pub fn new(start: Label) -> SequentialLabels {
        SequentialLabels(start)
    }
}

impl LabelGenerator<Label> for SequentialLabels {
    fn fresh_label(&mut self) -> Label {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_labels_are_distinct_and_ordered() {
        let mut labels = SequentialLabels::new(Label::START.next());
        let l1 = labels.fresh_label();
        let l2 = labels.fresh_label();
        assert_ne!(l1, l2);
        assert!(Label::START < l1 && l1 < l2);
        assert_eq!(format!("{:?} {}", l1, l2), "l1 l2");
    }
}

/// Knobs for [`crate::subroutines::inline_subroutines`] and [`crate::verifier::analyze`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Carry the local variable table through inlining
    ///
    /// Every instantiation of a subroutine gets its own copy of the entries covering that
    /// subroutine. When this is `false`, the output has no local variable table at all.
    pub keep_local_variables: bool,

    /// Carry line number entries through inlining
    pub keep_line_numbers: bool,

    /// Expand `Same`, `Same1`, `Append` and `Chop` frame declarations against the previously
    /// declared frame
    ///
    /// When this is `false`, only `Full` declarations are accepted by the frame tracker.
    pub expand_compressed_frames: bool,

    /// Restore the frame at a label that follows unreachable code, if some earlier forward jump to
    /// that label was seen
    ///
    /// Without this, the frame after a `goto` (or return, `athrow`, switch) stays unknown until
    /// the next explicit frame declaration.
    pub recover_frames_at_labels: bool,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            keep_local_variables: true,
            keep_line_numbers: true,
            expand_compressed_frames: true,
            recover_frames_at_labels: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}

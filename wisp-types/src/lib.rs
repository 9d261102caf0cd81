//! Primitive vocabulary shared by the Wisp runtime crates.
//!
//! Everything here is deliberately tiny: machine-word aliases, word
//! alignment helpers and the `UNALLOCATED` sentinel that the heap and
//! assembler crates agree on.

#![warn(missing_docs)]

use derive_more::Display;

/// Unsigned machine word. Bytecode immediates, object sizes and raw
/// addresses are all expressed in words.
pub type Word = u64;

/// Signed machine word; branch offsets are encoded as these.
pub type SWord = i64;

/// A raw address into a heap zone or an assembled code region.
pub type Address = usize;

/// Width of a [`Word`] in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// The null address. Zone allocation failures and unset forwarding
/// slots are both reported as this.
pub const UNALLOCATED: Address = 0;

/// One binary kibibyte.
pub const KB: usize = 1024;

/// One binary mebibyte.
pub const MB: usize = KB * KB;

/// Round `size` up to the next word boundary.
#[inline]
pub const fn align_word(size: usize) -> usize {
    (size + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

/// Whether `value` sits on a word boundary.
#[inline]
pub const fn is_word_aligned(value: usize) -> bool {
    value % WORD_SIZE == 0
}

/// A part/whole ratio rendered as a percentage, used by heap
/// occupancy reporting.
#[derive(Debug, Clone, Copy, PartialEq, Display)]
#[display(fmt = "{:.2}%", "self.value()")]
pub struct Percent {
    part: usize,
    whole: usize,
}

impl Percent {
    /// Ratio of `part` to `whole`. A zero `whole` reads as 0%.
    pub const fn new(part: usize, whole: usize) -> Self {
        Self { part, whole }
    }

    /// The ratio scaled to 0..=100.
    pub fn value(&self) -> f64 {
        if self.whole == 0 {
            return 0.0;
        }
        (self.part as f64 / self.whole as f64) * 100.0
    }
}

//! Argument descriptors shared by lambdas, macros and natives.

use itertools::Itertools;

use core::fmt;

/// One formal parameter of a callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    index: u64,
    name: String,
    optional: bool,
    vararg: bool,
}

impl Argument {
    /// A descriptor with explicit flags.
    pub fn new(index: u64, name: impl Into<String>, optional: bool, vararg: bool) -> Self {
        Self {
            index,
            name: name.into(),
            optional,
            vararg,
        }
    }

    /// A required positional parameter.
    pub fn required(index: u64, name: impl Into<String>) -> Self {
        Self::new(index, name, false, false)
    }

    /// An optional positional parameter, null-padded when missing.
    pub fn optional(index: u64, name: impl Into<String>) -> Self {
        Self::new(index, name, true, false)
    }

    /// A rest parameter binding the remaining actuals as a list.
    pub fn vararg(index: u64, name: impl Into<String>) -> Self {
        Self::new(index, name, false, true)
    }

    /// Position in the formal list.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Parameter name; becomes the local's name in the callee frame.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the actual may be omitted.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether this parameter absorbs all remaining actuals.
    pub fn is_vararg(&self) -> bool {
        self.vararg
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Argument(index={}, name={}, optional={}, vararg={})",
            self.index, self.name, self.optional, self.vararg
        )
    }
}

/// Ordered set of [`Argument`]s, kept sorted by index; drives call
/// adaptation uniformly for every kind of procedure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentSet {
    args: Vec<Argument>,
}

impl ArgumentSet {
    /// An empty formal list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, keeping index order.
    pub fn insert(&mut self, argument: Argument) {
        let at = self
            .args
            .partition_point(|existing| existing.index() <= argument.index());
        self.args.insert(at, argument);
    }

    /// Number of formals.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the callable takes no arguments.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The descriptors in index order.
    pub fn iter(&self) -> core::slice::Iter<'_, Argument> {
        self.args.iter()
    }
}

impl FromIterator<Argument> for ArgumentSet {
    fn from_iter<I: IntoIterator<Item = Argument>>(iter: I) -> Self {
        let mut set = Self::new();
        for argument in iter {
            set.insert(argument);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ArgumentSet {
    type Item = &'a Argument;
    type IntoIter = core::slice::Iter<'a, Argument>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for ArgumentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.args.iter().map(Argument::name).join(", "))
    }
}

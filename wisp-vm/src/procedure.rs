//! Process-wide side tables backing procedures.
//!
//! Heap `Lambda`/`NativeProcedure`/`Macro`/`Script` payloads carry only
//! an index into these tables; the compiled code regions, argument
//! descriptor sets and host callbacks stored here are never collected.

use crate::argument::ArgumentSet;
use crate::object::Ref;
use crate::scope::ScopeId;
use crate::Runtime;

use wisp_asm::Region;

use std::rc::Rc;

/// Handle to a compiled code region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeId(pub(crate) usize);

/// Handle to a native-procedure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeId(pub(crate) usize);

/// An owned, immutable code region.
#[derive(Debug)]
pub struct CodeUnit {
    region: Region,
}

impl CodeUnit {
    pub(crate) fn new(region: Region) -> Self {
        Self { region }
    }

    /// The encoded instruction stream.
    pub fn region(&self) -> &Region {
        &self.region
    }
}

/// Host callback of a native procedure.
///
/// Receives the adapted argument list and reports success; the entry
/// pushes its result (or an in-band error) onto the runtime's operand
/// stack before returning. Argument refs are only stable until the
/// entry allocates; an entry that keeps a ref across an allocation
/// must re-root it on the operand stack first.
pub type NativeFn = dyn Fn(&mut Runtime, &[Ref]) -> bool;

/// Side-table record of a compiled user procedure.
#[derive(Debug)]
pub struct LambdaData {
    pub(crate) name: Ref,
    pub(crate) args: ArgumentSet,
    pub(crate) scope: ScopeId,
    pub(crate) code: Option<CodeId>,
    pub(crate) docstring: Ref,
}

impl LambdaData {
    /// The lambda's name symbol; null when anonymous.
    pub fn name(&self) -> Ref {
        self.name
    }

    /// The formal list.
    pub fn args(&self) -> &ArgumentSet {
        &self.args
    }

    /// The scope the lambda was compiled against; call frames clone
    /// its layout.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The compiled entry, absent until compilation.
    pub fn code(&self) -> Option<CodeId> {
        self.code
    }

    /// Whether the lambda can be invoked.
    pub fn is_compiled(&self) -> bool {
        self.code.is_some()
    }
}

/// Side-table record of a native procedure.
pub struct NativeData {
    pub(crate) symbol: Ref,
    pub(crate) args: ArgumentSet,
    pub(crate) entry: Option<Rc<NativeFn>>,
    pub(crate) docs: Ref,
    pub(crate) object: Ref,
}

impl NativeData {
    /// The fully-qualified symbol the native is registered under.
    pub fn symbol(&self) -> Ref {
        self.symbol
    }

    /// The heap object realising this entry.
    pub fn object(&self) -> Ref {
        self.object
    }

    /// The formal list.
    pub fn args(&self) -> &ArgumentSet {
        &self.args
    }

    /// Whether an entry has been linked.
    pub fn is_linked(&self) -> bool {
        self.entry.is_some()
    }

    /// Optional documentation string.
    pub fn docs(&self) -> Ref {
        self.docs
    }
}

impl core::fmt::Debug for NativeData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeData")
            .field("symbol", &self.symbol)
            .field("args", &self.args)
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Side-table record of a macro. Expansion happens in the front end;
/// the runtime only stores and reports the shape.
#[derive(Debug)]
pub struct MacroData {
    pub(crate) symbol: Ref,
    pub(crate) args: ArgumentSet,
}

impl MacroData {
    /// The macro's symbol.
    pub fn symbol(&self) -> Ref {
        self.symbol
    }

    /// The formal list.
    pub fn args(&self) -> &ArgumentSet {
        &self.args
    }
}

/// Side-table record of a compiled top-level unit.
#[derive(Debug)]
pub struct ScriptData {
    pub(crate) scope: ScopeId,
    pub(crate) code: Option<CodeId>,
}

impl ScriptData {
    /// The scope the script executes in.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The compiled entry, absent until compilation.
    pub fn code(&self) -> Option<CodeId> {
        self.code
    }

    /// Whether the script can be executed.
    pub fn is_compiled(&self) -> bool {
        self.code.is_some()
    }
}

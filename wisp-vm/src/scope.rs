//! Lexically-chained local scopes.
//!
//! A scope maps names to indexed slots. The compiler resolves
//! references against it; at run time a frame's scope *is* its locals,
//! addressed directly by index from bytecode. Scopes live in an arena
//! owned by the runtime and are identified by [`ScopeId`]; every
//! local's value cell is part of the collector's root set.

use crate::object::Ref;

/// Handle to a scope in the runtime's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) usize);

/// A named, indexed slot holding one value cell.
#[derive(Debug, Clone)]
pub struct LocalVariable {
    name: String,
    index: usize,
    owner: ScopeId,
    value: Ref,
}

impl LocalVariable {
    /// The local's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot index within the owning scope, assigned in declaration
    /// order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The scope the local was declared in.
    pub fn owner(&self) -> ScopeId {
        self.owner
    }

    /// Current value.
    pub fn value(&self) -> Ref {
        self.value
    }

    pub(crate) fn value_cell(&mut self) -> &mut Ref {
        &mut self.value
    }

    pub(crate) fn set_value(&mut self, value: Ref) {
        self.value = value;
    }
}

/// Ordered locals plus a parent link.
#[derive(Debug, Clone)]
pub struct LocalScope {
    id: ScopeId,
    parent: Option<ScopeId>,
    locals: Vec<LocalVariable>,
}

impl LocalScope {
    /// The scope's own id.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The enclosing scope, absent at the root.
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Number of locals declared here.
    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    /// Whether no locals are declared here.
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// The local at `index`.
    ///
    /// # Panics
    /// On an out-of-range index; bytecode must be compiled against
    /// this scope's layout.
    pub fn local_at(&self, index: usize) -> &LocalVariable {
        &self.locals[index]
    }

    /// Whether `name` is declared at this level.
    pub fn has(&self, name: &str) -> bool {
        self.locals.iter().any(|local| local.name() == name)
    }

    /// The locals in declaration order.
    pub fn locals(&self) -> &[LocalVariable] {
        &self.locals
    }

    pub(crate) fn local_at_mut(&mut self, index: usize) -> &mut LocalVariable {
        &mut self.locals[index]
    }
}

/// Arena of every scope the runtime has created.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<LocalScope>,
}

impl ScopeArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create a scope chained under `parent`.
    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(LocalScope {
            id,
            parent,
            locals: Vec::new(),
        });
        id
    }

    /// Create a scope with the same locals layout as `template` (names
    /// and indices, values null) under the template's parent. Used to
    /// build a fresh frame scope for each call into a lambda compiled
    /// against `template`.
    pub fn instantiate(&mut self, template: ScopeId) -> ScopeId {
        let parent = self.get(template).parent();
        let names: Vec<String> = self
            .get(template)
            .locals()
            .iter()
            .map(|local| local.name().to_string())
            .collect();
        let id = self.new_scope(parent);
        for name in names {
            self.add(id, &name, Ref::NULL)
                .expect("template scope has unique names");
        }
        id
    }

    /// The scope behind `id`.
    pub fn get(&self, id: ScopeId) -> &LocalScope {
        &self.scopes[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: ScopeId) -> &mut LocalScope {
        &mut self.scopes[id.0]
    }

    /// Declare `name` in `scope`. Refuses duplicates at the current
    /// level and returns the new local's index otherwise.
    pub fn add(&mut self, scope: ScopeId, name: &str, value: Ref) -> Option<usize> {
        let target = self.get_mut(scope);
        if target.has(name) {
            return None;
        }
        let index = target.locals.len();
        target.locals.push(LocalVariable {
            name: name.to_string(),
            index,
            owner: scope,
            value,
        });
        Some(index)
    }

    /// Find `name`, walking the parent chain when `recursive`.
    pub fn lookup(&self, scope: ScopeId, name: &str, recursive: bool) -> Option<(ScopeId, usize)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = self.get(id);
            if let Some(local) = scope.locals.iter().find(|local| local.name() == name) {
                return Some((id, local.index()));
            }
            if !recursive {
                return None;
            }
            current = scope.parent();
        }
        None
    }

    /// Value of the local at `scope[index]`.
    pub fn value_at(&self, scope: ScopeId, index: usize) -> Ref {
        self.get(scope).local_at(index).value()
    }

    /// Overwrite the local at `scope[index]`.
    pub fn set_value_at(&mut self, scope: ScopeId, index: usize, value: Ref) {
        self.get_mut(scope).local_at_mut(index).set_value(value);
    }

    /// Visit every local's value cell in every scope; the collector
    /// rewrites them in place.
    pub(crate) fn visit_value_cells(&mut self, vis: &mut dyn FnMut(&mut Ref)) {
        for scope in &mut self.scopes {
            for local in &mut scope.locals {
                vis(local.value_cell());
            }
        }
    }
}

//! The process-wide runtime context.
//!
//! Owns the heap, the class and module registries, the symbol intern
//! table, the scope arena, the shared operand stack, the frame stack
//! and the procedure side tables. Every operation that allocates or
//! resolves a name goes through a `Runtime`; tests create independent
//! runtimes.

use crate::argument::ArgumentSet;
use crate::compiler::FlowGraphCompiler;
use crate::error::VmError;
use crate::frame::{FrameTarget, Ip, StackFrame};
use crate::ir::FlowGraph;
use crate::object::{self, ObjectKind, ObjectTrace, Ref};
use crate::procedure::{
    CodeId, CodeUnit, LambdaData, MacroData, NativeData, ScriptData,
};
use crate::scope::{ScopeArena, ScopeId};

use hashbrown::HashMap;
use wisp_asm::{Disassembler, DisassemblerOptions, Region, Symbolize};
use wisp_heap::{Collector, Heap, HeapConfig, Roots, Trace};
use wisp_types::{Address, Word};

/// Construction-time knobs for a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeParams {
    /// Heap sizing.
    pub heap: HeapConfig,
}

/// Front-end seam: turns source text into a flow graph plus the scope
/// it resolves against. The parser lives outside this crate;
/// [`Runtime::eval`] fails without an installed front end.
pub trait FrontEnd {
    /// Parse and lower `source`.
    fn parse(&mut self, runtime: &mut Runtime, source: &str) -> Result<(FlowGraph, ScopeId), String>;
}

/// The interned process-wide value singletons.
#[derive(Debug)]
pub(crate) struct Singletons {
    pub(crate) true_ref: Ref,
    pub(crate) false_ref: Ref,
    pub(crate) empty_pair: Ref,
}

/// The built-in class hierarchy, bootstrapped at construction.
#[derive(Debug)]
pub(crate) struct CoreClasses {
    pub(crate) object: Ref,
    pub(crate) class: Ref,
    pub(crate) datum: Ref,
    pub(crate) bool_: Ref,
    pub(crate) number: Ref,
    pub(crate) long: Ref,
    pub(crate) double: Ref,
    pub(crate) pair: Ref,
    pub(crate) string: Ref,
    pub(crate) symbol: Ref,
    pub(crate) array: Ref,
    pub(crate) error: Ref,
    pub(crate) field: Ref,
    pub(crate) procedure: Ref,
    pub(crate) lambda: Ref,
    pub(crate) native_procedure: Ref,
    pub(crate) macro_: Ref,
    pub(crate) module: Ref,
    pub(crate) script: Ref,
}

impl CoreClasses {
    fn empty() -> Self {
        Self {
            object: Ref::NULL,
            class: Ref::NULL,
            datum: Ref::NULL,
            bool_: Ref::NULL,
            number: Ref::NULL,
            long: Ref::NULL,
            double: Ref::NULL,
            pair: Ref::NULL,
            string: Ref::NULL,
            symbol: Ref::NULL,
            array: Ref::NULL,
            error: Ref::NULL,
            field: Ref::NULL,
            procedure: Ref::NULL,
            lambda: Ref::NULL,
            native_procedure: Ref::NULL,
            macro_: Ref::NULL,
            module: Ref::NULL,
            script: Ref::NULL,
        }
    }

    fn visit(&mut self, vis: &mut dyn FnMut(&mut Ref)) {
        vis(&mut self.object);
        vis(&mut self.class);
        vis(&mut self.datum);
        vis(&mut self.bool_);
        vis(&mut self.number);
        vis(&mut self.long);
        vis(&mut self.double);
        vis(&mut self.pair);
        vis(&mut self.string);
        vis(&mut self.symbol);
        vis(&mut self.array);
        vis(&mut self.error);
        vis(&mut self.field);
        vis(&mut self.procedure);
        vis(&mut self.lambda);
        vis(&mut self.native_procedure);
        vis(&mut self.macro_);
        vis(&mut self.module);
        vis(&mut self.script);
    }
}

/// The root set handed to the collector: the class and module
/// registries, the symbol table, every local in every scope, the value
/// singletons, the operand stack, the temporary handle list and the
/// reference cells held by the procedure side tables. Old-zone objects
/// never move but their interior references do, so their edges are
/// walked here as well.
struct RuntimeRoots<'a> {
    classes: &'a mut Vec<Ref>,
    modules: &'a mut Vec<Ref>,
    symbols: &'a mut HashMap<String, Ref>,
    scopes: &'a mut ScopeArena,
    stack: &'a mut Vec<Ref>,
    temps: &'a mut Vec<Ref>,
    lambdas: &'a mut Vec<LambdaData>,
    natives: &'a mut Vec<NativeData>,
    macros: &'a mut Vec<MacroData>,
    core: &'a mut CoreClasses,
    singletons: &'a mut Singletons,
    old_objects: &'a mut Vec<Ref>,
}

fn forward_ref(cell: &mut Ref, vis: &mut dyn FnMut(&mut Address)) {
    let mut address = cell.address();
    vis(&mut address);
    *cell = Ref::from_address(address);
}

impl Roots for RuntimeRoots<'_> {
    fn visit_roots(&mut self, vis: &mut dyn FnMut(&mut Address)) {
        for cell in self.classes.iter_mut() {
            forward_ref(cell, vis);
        }
        for cell in self.modules.iter_mut() {
            forward_ref(cell, vis);
        }
        for cell in self.symbols.values_mut() {
            forward_ref(cell, vis);
        }
        self.scopes.visit_value_cells(&mut |cell| forward_ref(cell, vis));
        for cell in self.stack.iter_mut() {
            forward_ref(cell, vis);
        }
        for cell in self.temps.iter_mut() {
            forward_ref(cell, vis);
        }
        for lambda in self.lambdas.iter_mut() {
            forward_ref(&mut lambda.name, vis);
            forward_ref(&mut lambda.docstring, vis);
        }
        for native in self.natives.iter_mut() {
            forward_ref(&mut native.symbol, vis);
            forward_ref(&mut native.docs, vis);
            forward_ref(&mut native.object, vis);
        }
        for entry in self.macros.iter_mut() {
            forward_ref(&mut entry.symbol, vis);
        }
        self.core.visit(&mut |cell| forward_ref(cell, vis));
        forward_ref(&mut self.singletons.true_ref, vis);
        forward_ref(&mut self.singletons.false_ref, vis);
        forward_ref(&mut self.singletons.empty_pair, vis);
        for object in self.old_objects.iter() {
            // the object itself never moves; its reference slots do
            ObjectTrace.trace(object.address(), vis);
        }
    }
}

/// The runtime: heap, registries, execution stacks and side tables.
pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) classes: Vec<Ref>,
    pub(crate) modules: Vec<Ref>,
    pub(crate) symbols: HashMap<String, Ref>,
    pub(crate) scopes: ScopeArena,
    pub(crate) stack: Vec<Ref>,
    pub(crate) frames: Vec<StackFrame>,
    pub(crate) next_frame_id: u64,
    pub(crate) code: Vec<CodeUnit>,
    pub(crate) lambdas: Vec<LambdaData>,
    pub(crate) natives: Vec<NativeData>,
    pub(crate) native_index: HashMap<String, usize>,
    pub(crate) macros: Vec<MacroData>,
    pub(crate) scripts: Vec<ScriptData>,
    pub(crate) core: CoreClasses,
    pub(crate) singletons: Singletons,
    pub(crate) temps: Vec<Ref>,
    pub(crate) old_objects: Vec<Ref>,
    init_scope: ScopeId,
    front_end: Option<Box<dyn FrontEnd>>,
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("classes", &self.classes.len())
            .field("stack_depth", &self.stack.len())
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the default heap sizing.
    pub fn new() -> Self {
        Self::with_params(RuntimeParams::default())
    }

    /// A runtime with explicit parameters.
    pub fn with_params(params: RuntimeParams) -> Self {
        let mut runtime = Self {
            heap: Heap::new(params.heap),
            classes: Vec::new(),
            modules: Vec::new(),
            symbols: HashMap::new(),
            scopes: ScopeArena::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            next_frame_id: 1,
            code: Vec::new(),
            lambdas: Vec::new(),
            natives: Vec::new(),
            native_index: HashMap::new(),
            macros: Vec::new(),
            scripts: Vec::new(),
            core: CoreClasses::empty(),
            singletons: Singletons {
                true_ref: Ref::NULL,
                false_ref: Ref::NULL,
                empty_pair: Ref::NULL,
            },
            temps: Vec::new(),
            old_objects: Vec::new(),
            init_scope: ScopeId(0),
            front_end: None,
        };
        runtime.init_scope = runtime.scopes.new_scope(None);
        runtime.bootstrap_classes();
        runtime.bootstrap_singletons();
        runtime
    }

    fn bootstrap_classes(&mut self) {
        let object = self.new_class("Object", Ref::NULL);
        self.core.object = object;
        self.core.class = self.new_class("Class", object);
        let datum = self.new_class("Datum", object);
        self.core.datum = datum;
        self.core.bool_ = self.new_class("Bool", datum);
        let number = self.new_class("Number", datum);
        self.core.number = number;
        self.core.long = self.new_class("Long", number);
        self.core.double = self.new_class("Double", number);
        self.core.pair = self.new_class("Pair", datum);
        self.core.string = self.new_class("String", datum);
        self.core.symbol = self.new_class("Symbol", datum);
        let object = self.core.object;
        self.core.array = self.new_class("Array", object);
        self.core.error = self.new_class("Error", object);
        self.core.field = self.new_class("Field", object);
        let procedure = self.new_class("Procedure", object);
        self.core.procedure = procedure;
        self.core.lambda = self.new_class("Lambda", procedure);
        self.core.native_procedure = self.new_class("NativeProcedure", procedure);
        self.core.macro_ = self.new_class("Macro", object);
        self.core.module = self.new_class("Module", object);
        self.core.script = self.new_class("Script", object);
    }

    fn bootstrap_singletons(&mut self) {
        let true_ref = self.allocate_object(ObjectKind::Bool, object::fixed_payload_size(2));
        object::write_slot(true_ref, object::VALUE_SLOT, 1);
        self.singletons.true_ref = true_ref;

        let false_ref = self.allocate_object(ObjectKind::Bool, object::fixed_payload_size(2));
        object::write_slot(false_ref, object::VALUE_SLOT, 0);
        self.singletons.false_ref = false_ref;

        // car and cdr stay unallocated, which is what makes it empty
        self.singletons.empty_pair =
            self.allocate_object(ObjectKind::Pair, object::fixed_payload_size(3));
    }

    // ---- heap plumbing ----------------------------------------------

    fn split_roots(&mut self) -> (&mut Heap, RuntimeRoots<'_>) {
        let Runtime {
            heap,
            classes,
            modules,
            symbols,
            scopes,
            stack,
            temps,
            lambdas,
            natives,
            macros,
            core,
            singletons,
            old_objects,
            ..
        } = self;
        (
            heap,
            RuntimeRoots {
                classes,
                modules,
                symbols,
                scopes,
                stack,
                temps,
                lambdas,
                natives,
                macros,
                core,
                singletons,
                old_objects,
            },
        )
    }

    fn allocate_raw(&mut self, size: usize) -> Address {
        let (heap, mut roots) = self.split_roots();
        heap.allocate(&mut roots, &ObjectTrace, size)
    }

    pub(crate) fn allocate_object(&mut self, kind: ObjectKind, payload_size: usize) -> Ref {
        let object = Ref::from_address(self.allocate_raw(payload_size));
        object::write_kind(object, kind);
        if !self.heap.new_zone().contains(object.address()) {
            // large objects never move, but their interior references
            // must still be walked at every collection
            self.old_objects.push(object);
        }
        object
    }

    /// Force a minor collection.
    pub fn collect_now(&mut self) {
        let (heap, mut roots) = self.split_roots();
        Collector::collect(heap.new_zone_mut(), &mut roots, &ObjectTrace);
    }

    /// The heap, for occupancy inspection.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // ---- value constructors -----------------------------------------

    /// The interned boolean.
    pub fn bool_ref(&self, value: bool) -> Ref {
        if value {
            self.singletons.true_ref
        } else {
            self.singletons.false_ref
        }
    }

    /// The process-wide empty pair; the null value.
    pub fn empty_pair(&self) -> Ref {
        self.singletons.empty_pair
    }

    /// Box a Long.
    pub fn new_long(&mut self, value: i64) -> Ref {
        let object = self.allocate_object(ObjectKind::Long, object::fixed_payload_size(2));
        object::write_slot(object, object::VALUE_SLOT, value as Word);
        object
    }

    /// Box a Double.
    pub fn new_double(&mut self, value: f64) -> Ref {
        let object = self.allocate_object(ObjectKind::Double, object::fixed_payload_size(2));
        object::write_slot(object, object::VALUE_SLOT, value.to_bits());
        object
    }

    /// A fresh immutable string.
    pub fn new_string(&mut self, value: &str) -> Ref {
        let object =
            self.allocate_object(ObjectKind::String, object::string_payload_size(value.len()));
        object::write_string(object, value);
        object
    }

    /// The interned symbol for `name` (fully qualified).
    pub fn intern_symbol(&mut self, name: &str) -> Ref {
        if let Some(existing) = self.symbols.get(name) {
            return *existing;
        }
        let object =
            self.allocate_object(ObjectKind::Symbol, object::string_payload_size(name.len()));
        object::write_string(object, name);
        self.symbols.insert(name.to_string(), object);
        object
    }

    /// A fresh cons cell.
    pub fn new_pair(&mut self, car: Ref, cdr: Ref) -> Ref {
        self.temps.push(car);
        self.temps.push(cdr);
        let object = self.allocate_object(ObjectKind::Pair, object::fixed_payload_size(3));
        let cdr = self.temps.pop().expect("protected cdr");
        let car = self.temps.pop().expect("protected car");
        object::set_pair_car(object, car);
        object::set_pair_cdr(object, cdr);
        object
    }

    /// A proper list built from `values`, left to right.
    pub fn new_list(&mut self, values: &[Ref]) -> Ref {
        let base = self.temps.len();
        self.temps.extend_from_slice(values);
        let mut list = self.empty_pair();
        for index in (0..values.len()).rev() {
            list = self.new_pair(self.temps[base + index], list);
        }
        self.temps.truncate(base);
        list
    }

    /// A fresh array of `length` null slots.
    pub fn new_array(&mut self, length: usize) -> Ref {
        let object = self.allocate_object(ObjectKind::Array, object::array_payload_size(length));
        object::write_slot(object, object::ARRAY_CAPACITY_SLOT, length as Word);
        object::write_slot(object, object::ARRAY_LENGTH_SLOT, length as Word);
        object
    }

    /// An in-band error with `message`.
    pub fn new_error(&mut self, message: &str) -> Ref {
        let text = self.new_string(message);
        self.temps.push(text);
        let object = self.allocate_object(ObjectKind::Error, object::fixed_payload_size(2));
        let text = self.temps.pop().expect("protected message");
        object::write_ref(object, object::ERROR_MESSAGE_SLOT, text);
        object
    }

    /// Wrap an arbitrary value as an in-band error; strings become the
    /// message directly.
    pub fn new_error_from(&mut self, value: Ref) -> Ref {
        if object::is_kind(value, ObjectKind::String) {
            self.temps.push(value);
            let object = self.allocate_object(ObjectKind::Error, object::fixed_payload_size(2));
            let text = self.temps.pop().expect("protected message");
            object::write_ref(object, object::ERROR_MESSAGE_SLOT, text);
            return object;
        }
        let message = self.display(value);
        self.new_error(&message)
    }

    // ---- classes ----------------------------------------------------

    /// Create and register a class. Identity is by fully-qualified
    /// name; the registry iterates in insertion order.
    pub fn new_class(&mut self, name: &str, parent: Ref) -> Ref {
        let name_ref = self.new_string(name);
        self.temps.push(name_ref);
        self.temps.push(parent);
        let object = self.allocate_object(ObjectKind::Class, object::fixed_payload_size(4));
        let parent = self.temps.pop().expect("protected parent");
        let name_ref = self.temps.pop().expect("protected name");
        object::write_ref(object, object::CLASS_NAME_SLOT, name_ref);
        object::write_ref(object, object::CLASS_PARENT_SLOT, parent);
        self.classes.push(object);
        object
    }

    /// Search the registry in insertion order.
    pub fn find_class(&self, name: &str) -> Option<Ref> {
        self.classes
            .iter()
            .copied()
            .find(|class| object::string_value(object::class_name(*class)) == name)
    }

    /// Append a field to `class`; its index spans the parent chain so
    /// instance slots line up.
    pub fn add_field(&mut self, class: Ref, name: &str) -> Ref {
        let base = self.temps.len();
        self.temps.push(class);
        let name_ref = self.new_string(name);
        self.temps.push(name_ref);

        let index = self.num_fields_in_chain(self.temps[base]);
        let field = self.allocate_object(ObjectKind::Field, object::fixed_payload_size(4));
        object::write_ref(field, object::FIELD_NAME_SLOT, self.temps[base + 1]);
        object::write_ref(field, object::FIELD_OWNER_SLOT, self.temps[base]);
        object::write_slot(field, object::FIELD_INDEX_SLOT, index as Word);
        self.temps.push(field);

        let old = object::class_fields(self.temps[base]);
        let old_len = if old.is_unallocated() {
            0
        } else {
            object::array_length(old)
        };
        self.temps.push(old);
        let array = self.new_array(old_len + 1);
        let old = self.temps[base + 3];
        for slot in 0..old_len {
            object::array_set(array, slot, object::array_get(old, slot));
        }
        object::array_set(array, old_len, self.temps[base + 2]);
        object::set_class_fields(self.temps[base], array);

        let field = self.temps[base + 2];
        self.temps.truncate(base);
        field
    }

    /// Number of fields contributed by `class` and its ancestors.
    pub fn num_fields_in_chain(&self, class: Ref) -> usize {
        let mut total = 0;
        let mut current = class;
        while !current.is_unallocated() {
            let fields = object::class_fields(current);
            if !fields.is_unallocated() {
                total += object::array_length(fields);
            }
            current = object::class_parent(current);
        }
        total
    }

    /// Find `name` among the fields of `class` and its ancestors.
    pub fn find_field(&self, class: Ref, name: &str) -> Option<Ref> {
        let mut current = class;
        while !current.is_unallocated() {
            let fields = object::class_fields(current);
            if !fields.is_unallocated() {
                for slot in 0..object::array_length(fields) {
                    let field = object::array_get(fields, slot);
                    if object::string_value(object::field_name(field)) == name {
                        return Some(field);
                    }
                }
            }
            current = object::class_parent(current);
        }
        None
    }

    /// Instantiate a user class: one slot per field in the chain,
    /// constructor arguments filling the leading slots.
    pub fn new_instance(&mut self, class: Ref, args: &[Ref]) -> Ref {
        let base = self.temps.len();
        self.temps.push(class);
        self.temps.extend_from_slice(args);

        let len = self.num_fields_in_chain(self.temps[base]);
        let object =
            self.allocate_object(ObjectKind::Instance, object::instance_payload_size(len));
        object::write_ref(object, object::INSTANCE_CLASS_SLOT, self.temps[base]);
        object::write_slot(object, object::INSTANCE_LEN_SLOT, len as Word);
        for (slot, _) in args.iter().enumerate().take(len) {
            object::instance_set(object, slot, self.temps[base + 1 + slot]);
        }

        self.temps.truncate(base);
        object
    }

    /// The class describing `value`; null reads as the Pair class.
    pub fn class_of(&self, value: Ref) -> Ref {
        if value.is_unallocated() {
            return self.core.pair;
        }
        match object::kind_of(value) {
            ObjectKind::Bool => self.core.bool_,
            ObjectKind::Long => self.core.long,
            ObjectKind::Double => self.core.double,
            ObjectKind::Pair => self.core.pair,
            ObjectKind::String => self.core.string,
            ObjectKind::Symbol => self.core.symbol,
            ObjectKind::Array => self.core.array,
            ObjectKind::Error => self.core.error,
            ObjectKind::Class => self.core.class,
            ObjectKind::Field => self.core.field,
            ObjectKind::Instance => object::instance_class(value),
            ObjectKind::Lambda => self.core.lambda,
            ObjectKind::NativeProcedure => self.core.native_procedure,
            ObjectKind::Macro => self.core.macro_,
            ObjectKind::Module => self.core.module,
            ObjectKind::Script => self.core.script,
        }
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn is_subclass_of(&self, class: Ref, ancestor: Ref) -> bool {
        let mut current = class;
        while !current.is_unallocated() {
            if object::equals(current, ancestor) {
                return true;
            }
            current = object::class_parent(current);
        }
        false
    }

    /// Whether `value` is an instance of `class`.
    pub fn is_instance_of(&self, value: Ref, class: Ref) -> bool {
        self.is_subclass_of(self.class_of(value), class)
    }

    // ---- modules ----------------------------------------------------

    /// Create and register a module.
    pub fn new_module(&mut self, name: &str, scope: ScopeId) -> Ref {
        let name_ref = self.new_string(name);
        self.temps.push(name_ref);
        let object = self.allocate_object(ObjectKind::Module, object::fixed_payload_size(3));
        let name_ref = self.temps.pop().expect("protected name");
        object::write_ref(object, object::MODULE_NAME_SLOT, name_ref);
        object::write_slot(object, object::MODULE_SCOPE_SLOT, scope.0 as Word);
        self.modules.push(object);
        object
    }

    /// Search registered modules by name.
    pub fn find_module(&self, name: &str) -> Option<Ref> {
        self.modules
            .iter()
            .copied()
            .find(|module| object::string_value(object::module_name(*module)) == name)
    }

    // ---- procedures -------------------------------------------------

    pub(crate) fn add_code(&mut self, region: Region) -> CodeId {
        let id = CodeId(self.code.len());
        self.code.push(CodeUnit::new(region));
        id
    }

    /// Compile `graph` against `scope` and wrap it as a lambda. The
    /// formals are declared as the scope's leading locals when absent.
    pub fn new_lambda(
        &mut self,
        name: Option<&str>,
        args: ArgumentSet,
        scope: ScopeId,
        graph: &FlowGraph,
    ) -> Ref {
        let region = FlowGraphCompiler::new(scope).compile(graph);
        self.new_lambda_with_region(name, args, scope, region)
    }

    /// Wrap an already-assembled region as a lambda.
    pub fn new_lambda_with_region(
        &mut self,
        name: Option<&str>,
        args: ArgumentSet,
        scope: ScopeId,
        region: Region,
    ) -> Ref {
        for arg in &args {
            if self.scopes.lookup(scope, arg.name(), false).is_none() {
                self.scopes.add(scope, arg.name(), Ref::NULL);
            }
        }
        let name_ref = match name {
            Some(name) => self.intern_symbol(name),
            None => Ref::NULL,
        };
        let code = self.add_code(region);
        let index = self.lambdas.len();
        self.lambdas.push(LambdaData {
            name: name_ref,
            args,
            scope,
            code: Some(code),
            docstring: Ref::NULL,
        });
        let object = self.allocate_object(ObjectKind::Lambda, object::fixed_payload_size(2));
        object::write_slot(object, object::INDEX_SLOT, index as Word);
        object
    }

    /// Compile `graph` against `scope` and wrap it as a script.
    pub fn new_script(&mut self, graph: &FlowGraph, scope: ScopeId) -> Ref {
        let region = FlowGraphCompiler::new(scope).compile(graph);
        self.new_script_with_region(region, scope)
    }

    /// Wrap an already-assembled region as a script executing in
    /// `scope`.
    pub fn new_script_with_region(&mut self, region: Region, scope: ScopeId) -> Ref {
        let code = self.add_code(region);
        let index = self.scripts.len();
        self.scripts.push(ScriptData {
            scope,
            code: Some(code),
        });
        let object = self.allocate_object(ObjectKind::Script, object::fixed_payload_size(2));
        object::write_slot(object, object::INDEX_SLOT, index as Word);
        object
    }

    /// Register a macro shape; expansion belongs to the front end.
    pub fn new_macro(&mut self, name: &str, args: ArgumentSet) -> Ref {
        let symbol = self.intern_symbol(name);
        let index = self.macros.len();
        self.macros.push(MacroData { symbol, args });
        let object = self.allocate_object(ObjectKind::Macro, object::fixed_payload_size(2));
        object::write_slot(object, object::INDEX_SLOT, index as Word);
        object
    }

    /// Side-table record behind a lambda object.
    pub fn lambda_data(&self, lambda: Ref) -> &LambdaData {
        debug_assert!(object::is_kind(lambda, ObjectKind::Lambda));
        &self.lambdas[object::table_index(lambda)]
    }

    /// Side-table record behind a script object.
    pub fn script_data(&self, script: Ref) -> &ScriptData {
        debug_assert!(object::is_kind(script, ObjectKind::Script));
        &self.scripts[object::table_index(script)]
    }

    // ---- execution entry points -------------------------------------

    /// Install the front end used by [`Runtime::eval`].
    pub fn set_front_end(&mut self, front_end: Box<dyn FrontEnd>) {
        self.front_end = Some(front_end);
    }

    /// Execute a compiled script and hand back the final value, which
    /// may be an in-band error object.
    pub fn exec(&mut self, script: Ref) -> Result<Ref, VmError> {
        if !object::is_kind(script, ObjectKind::Script) {
            return Err(VmError::NotAScript(self.display(script)));
        }
        let data = &self.scripts[object::table_index(script)];
        let code = data.code.ok_or(VmError::NotCompiled)?;
        let scope = data.scope;
        self.push_frame(FrameTarget::Code(code), scope, None);
        self.run(Ip::entry(code));
        Ok(self.pop().unwrap_or(self.singletons.empty_pair))
    }

    /// Parse `source` through the installed front end and execute it.
    pub fn eval(&mut self, source: &str) -> Result<Ref, VmError> {
        let mut front_end = self.front_end.take().ok_or(VmError::NoFrontEnd)?;
        let parsed = front_end.parse(self, source);
        self.front_end = Some(front_end);
        let (graph, scope) = parsed.map_err(VmError::FrontEnd)?;
        let script = self.new_script(&graph, scope);
        self.exec(script)
    }

    /// Call a procedure with `args`, leaving the result on the operand
    /// stack for the caller to pop.
    pub fn call(&mut self, procedure: Ref, args: &[Ref]) -> Result<(), VmError> {
        if procedure.is_unallocated() {
            return Err(VmError::NotAProcedure("()".to_string()));
        }
        match object::kind_of(procedure) {
            ObjectKind::Lambda => {
                for arg in args {
                    self.push(*arg);
                }
                if let Some(entry) = self.enter_lambda(procedure, args.len(), None) {
                    self.run(entry);
                }
                Ok(())
            }
            ObjectKind::NativeProcedure => {
                for arg in args {
                    self.push(*arg);
                }
                self.call_native(procedure, args.len());
                Ok(())
            }
            _ => Err(VmError::NotAProcedure(self.display(procedure))),
        }
    }

    /// [`Runtime::call`], popping the result.
    pub fn call_pop(&mut self, procedure: Ref, args: &[Ref]) -> Result<Ref, VmError> {
        self.call(procedure, args)?;
        Ok(self.pop().unwrap_or(self.singletons.empty_pair))
    }

    /// Render a compiled lambda or script as assembly text.
    pub fn disassemble(&self, target: Ref) -> Option<String> {
        let (code, _) = self.compiled_unit(target)?;
        Disassembler::new()
            .disassemble(self.code[code.0].region().as_bytes())
            .ok()
    }

    /// Render a compiled lambda or script with operand comments:
    /// local indices named through the unit's compile scope, embedded
    /// addresses through the live object graph.
    pub fn disassemble_annotated(&self, target: Ref) -> Option<String> {
        struct RuntimeSymbols<'a> {
            runtime: &'a Runtime,
            scope: ScopeId,
        }

        impl Symbolize for RuntimeSymbols<'_> {
            fn local(&self, index: usize) -> Option<String> {
                let scope = self.runtime.scopes.get(self.scope);
                (index < scope.num_locals()).then(|| scope.local_at(index).name().to_string())
            }

            fn object(&self, address: Word) -> Option<String> {
                let object = Ref::from_address(address as usize);
                self.runtime
                    .heap
                    .contains(object.address())
                    .then(|| self.runtime.display(object))
            }
        }

        let (code, scope) = self.compiled_unit(target)?;
        let symbols = RuntimeSymbols {
            runtime: self,
            scope,
        };
        Disassembler::with_options(DisassemblerOptions::SHOW_COMMENTS)
            .disassemble_with(self.code[code.0].region().as_bytes(), &symbols)
            .ok()
    }

    fn compiled_unit(&self, target: Ref) -> Option<(CodeId, ScopeId)> {
        match object::kind_of(target) {
            ObjectKind::Lambda => {
                let data = self.lambda_data(target);
                Some((data.code()?, data.scope()))
            }
            ObjectKind::Script => {
                let data = self.script_data(target);
                Some((data.code()?, data.scope()))
            }
            _ => None,
        }
    }

    // ---- operand and frame stacks -----------------------------------

    /// Push onto the shared operand stack.
    pub fn push(&mut self, value: Ref) {
        self.stack.push(value);
    }

    /// Pop the operand stack.
    pub fn pop(&mut self) -> Option<Ref> {
        self.stack.pop()
    }

    /// The operand stack depth.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether the stack top is an in-band error.
    pub fn has_error(&self) -> bool {
        self.stack
            .last()
            .is_some_and(|top| object::is_kind(*top, ObjectKind::Error))
    }

    pub(crate) fn pop_value(&mut self) -> Ref {
        self.stack.pop().expect("operand stack underflow")
    }

    pub(crate) fn peek_value(&self) -> Option<Ref> {
        self.stack.last().copied()
    }

    pub(crate) fn push_frame(
        &mut self,
        target: FrameTarget,
        locals: ScopeId,
        return_address: Option<Ip>,
    ) {
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        self.frames
            .push(StackFrame::new(id, target, locals, return_address));
    }

    pub(crate) fn pop_frame(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    /// The live call frames, innermost last.
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// The scope bytecode local accesses resolve against: the top
    /// frame's locals, or the init scope outside any call.
    pub fn current_scope(&self) -> ScopeId {
        self.frames
            .last()
            .map(StackFrame::locals)
            .unwrap_or(self.init_scope)
    }

    /// The scope top-level definitions land in.
    pub fn init_scope(&self) -> ScopeId {
        self.init_scope
    }

    /// The scope arena.
    pub fn scopes(&self) -> &ScopeArena {
        &self.scopes
    }

    /// Mutable access to the scope arena, for populating compile
    /// scopes.
    pub fn scopes_mut(&mut self) -> &mut ScopeArena {
        &mut self.scopes
    }

    // ---- inspection -------------------------------------------------

    /// The kind of `value`; `None` for null references.
    pub fn kind(&self, value: Ref) -> Option<ObjectKind> {
        if value.is_unallocated() {
            return None;
        }
        Some(object::kind_of(value))
    }

    /// Whether `value` reads as null.
    pub fn is_null(&self, value: Ref) -> bool {
        object::is_null(value)
    }

    /// The truth test used by conditional branches.
    pub fn is_truthy(&self, value: Ref) -> bool {
        object::truth(value)
    }

    /// Structural equality.
    pub fn equals(&self, left: Ref, right: Ref) -> bool {
        object::equals(left, right)
    }

    /// Whether `value` is an in-band error.
    pub fn is_error(&self, value: Ref) -> bool {
        object::is_kind(value, ObjectKind::Error)
    }

    /// Unbox a Long.
    pub fn long(&self, value: Ref) -> Option<i64> {
        object::is_kind(value, ObjectKind::Long).then(|| object::long_value(value))
    }

    /// Unbox a Double.
    pub fn double(&self, value: Ref) -> Option<f64> {
        object::is_kind(value, ObjectKind::Double).then(|| object::double_value(value))
    }

    /// Unbox a Bool.
    pub fn boolean(&self, value: Ref) -> Option<bool> {
        object::is_kind(value, ObjectKind::Bool).then(|| object::bool_value(value))
    }

    /// Borrow a string or symbol's text.
    pub fn string(&self, value: Ref) -> Option<&str> {
        (object::is_kind(value, ObjectKind::String) || object::is_kind(value, ObjectKind::Symbol))
            .then(|| object::string_value(value))
    }

    /// An error's message text.
    pub fn error_message(&self, value: Ref) -> Option<&str> {
        object::is_kind(value, ObjectKind::Error)
            .then(|| object::string_value(object::error_message(value)))
    }

    /// A pair's first element.
    pub fn car(&self, value: Ref) -> Option<Ref> {
        object::is_kind(value, ObjectKind::Pair).then(|| object::pair_car(value))
    }

    /// A pair's second element.
    pub fn cdr(&self, value: Ref) -> Option<Ref> {
        object::is_kind(value, ObjectKind::Pair).then(|| object::pair_cdr(value))
    }

    /// An array's length.
    pub fn array_length(&self, value: Ref) -> Option<usize> {
        object::is_kind(value, ObjectKind::Array).then(|| object::array_length(value))
    }

    /// An array slot.
    pub fn array_at(&self, value: Ref, index: usize) -> Option<Ref> {
        (object::is_kind(value, ObjectKind::Array) && index < object::array_length(value))
            .then(|| object::array_get(value, index))
    }

    /// Write an array slot.
    pub fn array_set(&mut self, value: Ref, index: usize, item: Ref) {
        debug_assert!(object::is_kind(value, ObjectKind::Array));
        object::array_set(value, index, item);
    }

    /// An instance's field slot, resolved by field metadata.
    pub fn field_value(&self, instance: Ref, field: Ref) -> Option<Ref> {
        (object::is_kind(instance, ObjectKind::Instance)
            && object::is_kind(field, ObjectKind::Field)
            && object::field_index(field) < object::instance_len(instance))
        .then(|| object::instance_get(instance, object::field_index(field)))
    }

    /// A class's name text.
    pub fn class_name_text(&self, class: Ref) -> String {
        if object::is_kind(class, ObjectKind::Class) {
            object::string_value(object::class_name(class)).to_string()
        } else {
            self.display(class)
        }
    }

    /// The components of a symbol's fully-qualified
    /// `namespace/type:name` form.
    pub fn symbol_components(&self, symbol: Ref) -> Option<(String, String, String)> {
        let full = self.string(symbol)?;
        if !object::is_kind(symbol, ObjectKind::Symbol) {
            return None;
        }
        let (namespace, rest) = match full.rfind('/') {
            Some(slash) => (&full[..slash], &full[slash + 1..]),
            None => ("", full),
        };
        let (kind, name) = match rest.rfind(':') {
            Some(colon) => (&rest[..colon], &rest[colon + 1..]),
            None => ("", rest),
        };
        Some((namespace.to_string(), kind.to_string(), name.to_string()))
    }

    /// Render `value` for messages and the REPL, naming procedures
    /// through their side tables.
    pub fn display(&self, value: Ref) -> String {
        if value.is_unallocated() {
            return "()".to_string();
        }
        match object::kind_of(value) {
            ObjectKind::Lambda => {
                let data = &self.lambdas[object::table_index(value)];
                if data.name.is_unallocated() {
                    "#<lambda>".to_string()
                } else {
                    format!("#<lambda {}>", object::string_value(data.name))
                }
            }
            ObjectKind::NativeProcedure => {
                let data = &self.natives[object::table_index(value)];
                format!("#<native {}>", object::string_value(data.symbol))
            }
            ObjectKind::Macro => {
                let data = &self.macros[object::table_index(value)];
                format!("#<macro {}>", object::string_value(data.symbol))
            }
            _ => object::display(value),
        }
    }
}

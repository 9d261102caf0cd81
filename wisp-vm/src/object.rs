//! The value model: payload layouts, typed accessors and the pointer
//! visitor the collector traces objects with.
//!
//! Every payload begins with a kind word; the remaining words depend on
//! the kind. Reference slots hold payload addresses ([`Ref`]), data
//! slots hold raw words. Variable-size payloads (strings, symbols,
//! arrays, instances) carry their elements inline so the collector can
//! move an object with one verbatim copy:
//!
//! ```text
//! Bool      [kind, value]
//! Long      [kind, i64]
//! Double    [kind, f64 bits]
//! Pair      [kind, car*, cdr*]
//! String    [kind, len, bytes...]
//! Symbol    [kind, len, bytes...]            (fully-qualified name)
//! Array     [kind, capacity, length, slot*...]
//! Error     [kind, message*]
//! Class     [kind, name*, parent*, fields*]
//! Field     [kind, name*, owner*, index]
//! Instance  [kind, class*, len, slot*...]
//! Lambda    [kind, table index]
//! Native    [kind, table index]
//! Macro     [kind, table index]
//! Module    [kind, name*, scope id]
//! Script    [kind, table index]
//! ```
//!
//! Starred slots are traced; table indices point into the runtime's
//! process-wide side tables, which are never collected.

use wisp_heap::Trace;
use wisp_types::{Address, Word, UNALLOCATED, WORD_SIZE};

/// A reference to a heap object: its payload address, or
/// [`Ref::NULL`] for the absent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref(Address);

impl Ref {
    /// The absent reference; reads as null.
    pub const NULL: Ref = Ref(UNALLOCATED);

    /// Wrap a payload address.
    pub const fn from_address(address: Address) -> Self {
        Self(address)
    }

    /// The payload address.
    pub const fn address(self) -> Address {
        self.0
    }

    /// Whether this is the absent reference.
    pub const fn is_unallocated(self) -> bool {
        self.0 == UNALLOCATED
    }
}

/// Discriminant stored in the first payload word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ObjectKind {
    /// Interned true/false singleton.
    Bool = 1,
    /// Immutable 64-bit signed integer.
    Long,
    /// Immutable IEEE-754 double.
    Double,
    /// Mutable cons cell; the empty pair doubles as null.
    Pair,
    /// Immutable UTF-8 string.
    String,
    /// Interned, structured name.
    Symbol,
    /// Fixed-capacity reference array.
    Array,
    /// In-band error value.
    Error,
    /// Class metadata.
    Class,
    /// Field metadata of a class.
    Field,
    /// User-class instance with one slot per field.
    Instance,
    /// Compiled user procedure.
    Lambda,
    /// Host-implemented procedure.
    NativeProcedure,
    /// Front-end macro.
    Macro,
    /// Registered module.
    Module,
    /// Compiled top-level unit.
    Script,
}

impl ObjectKind {
    pub(crate) fn from_word(word: Word) -> Option<Self> {
        Some(match word {
            1 => Self::Bool,
            2 => Self::Long,
            3 => Self::Double,
            4 => Self::Pair,
            5 => Self::String,
            6 => Self::Symbol,
            7 => Self::Array,
            8 => Self::Error,
            9 => Self::Class,
            10 => Self::Field,
            11 => Self::Instance,
            12 => Self::Lambda,
            13 => Self::NativeProcedure,
            14 => Self::Macro,
            15 => Self::Module,
            16 => Self::Script,
            _ => return None,
        })
    }

    /// Name of the built-in class describing this kind.
    pub(crate) fn class_name(self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::Long => "Long",
            Self::Double => "Double",
            Self::Pair => "Pair",
            Self::String => "String",
            Self::Symbol => "Symbol",
            Self::Array => "Array",
            Self::Error => "Error",
            Self::Class => "Class",
            Self::Field => "Field",
            Self::Instance => "Instance",
            Self::Lambda => "Lambda",
            Self::NativeProcedure => "NativeProcedure",
            Self::Macro => "Macro",
            Self::Module => "Module",
            Self::Script => "Script",
        }
    }
}

// slot indices, in words past the payload base
const KIND_SLOT: usize = 0;
pub(crate) const VALUE_SLOT: usize = 1;
pub(crate) const PAIR_CAR_SLOT: usize = 1;
pub(crate) const PAIR_CDR_SLOT: usize = 2;
pub(crate) const STRING_LEN_SLOT: usize = 1;
pub(crate) const STRING_BYTES_SLOT: usize = 2;
pub(crate) const ARRAY_CAPACITY_SLOT: usize = 1;
pub(crate) const ARRAY_LENGTH_SLOT: usize = 2;
pub(crate) const ARRAY_SLOTS_BASE: usize = 3;
pub(crate) const ERROR_MESSAGE_SLOT: usize = 1;
pub(crate) const CLASS_NAME_SLOT: usize = 1;
pub(crate) const CLASS_PARENT_SLOT: usize = 2;
pub(crate) const CLASS_FIELDS_SLOT: usize = 3;
pub(crate) const FIELD_NAME_SLOT: usize = 1;
pub(crate) const FIELD_OWNER_SLOT: usize = 2;
pub(crate) const FIELD_INDEX_SLOT: usize = 3;
pub(crate) const INSTANCE_CLASS_SLOT: usize = 1;
pub(crate) const INSTANCE_LEN_SLOT: usize = 2;
pub(crate) const INSTANCE_SLOTS_BASE: usize = 3;
pub(crate) const INDEX_SLOT: usize = 1;
pub(crate) const MODULE_NAME_SLOT: usize = 1;
pub(crate) const MODULE_SCOPE_SLOT: usize = 2;

/// Payload size in bytes for a fixed-shape kind.
pub(crate) const fn fixed_payload_size(words: usize) -> usize {
    words * WORD_SIZE
}

/// Payload size of a string or symbol of `len` bytes.
pub(crate) const fn string_payload_size(len: usize) -> usize {
    STRING_BYTES_SLOT * WORD_SIZE + len
}

/// Payload size of an array of `capacity` slots.
pub(crate) const fn array_payload_size(capacity: usize) -> usize {
    (ARRAY_SLOTS_BASE + capacity) * WORD_SIZE
}

/// Payload size of an instance with `len` field slots.
pub(crate) const fn instance_payload_size(len: usize) -> usize {
    (INSTANCE_SLOTS_BASE + len) * WORD_SIZE
}

#[inline]
pub(crate) fn read_slot(object: Ref, slot: usize) -> Word {
    debug_assert!(!object.is_unallocated());
    // Safety: payloads are at least `slot + 1` words by the kind
    // invariant checked by every caller.
    unsafe { ((object.address() + slot * WORD_SIZE) as *const Word).read() }
}

#[inline]
pub(crate) fn write_slot(object: Ref, slot: usize, value: Word) {
    debug_assert!(!object.is_unallocated());
    // Safety: as in `read_slot`.
    unsafe { ((object.address() + slot * WORD_SIZE) as *mut Word).write(value) }
}

#[inline]
pub(crate) fn read_ref(object: Ref, slot: usize) -> Ref {
    Ref::from_address(read_slot(object, slot) as Address)
}

#[inline]
pub(crate) fn write_ref(object: Ref, slot: usize, value: Ref) {
    write_slot(object, slot, value.address() as Word);
}

/// The kind of a live object.
///
/// # Panics
/// On a clobbered kind word; that is a heap invariant violation.
pub(crate) fn kind_of(object: Ref) -> ObjectKind {
    let word = read_slot(object, KIND_SLOT);
    ObjectKind::from_word(word)
        .unwrap_or_else(|| panic!("corrupt object header: kind {word} at {:#x}", object.address()))
}

pub(crate) fn is_kind(object: Ref, kind: ObjectKind) -> bool {
    !object.is_unallocated() && kind_of(object) == kind
}

pub(crate) fn write_kind(object: Ref, kind: ObjectKind) {
    write_slot(object, KIND_SLOT, kind as Word);
}

pub(crate) fn bool_value(object: Ref) -> bool {
    debug_assert!(is_kind(object, ObjectKind::Bool));
    read_slot(object, VALUE_SLOT) != 0
}

pub(crate) fn long_value(object: Ref) -> i64 {
    debug_assert!(is_kind(object, ObjectKind::Long));
    read_slot(object, VALUE_SLOT) as i64
}

pub(crate) fn double_value(object: Ref) -> f64 {
    debug_assert!(is_kind(object, ObjectKind::Double));
    f64::from_bits(read_slot(object, VALUE_SLOT))
}

pub(crate) fn pair_car(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Pair));
    read_ref(object, PAIR_CAR_SLOT)
}

pub(crate) fn pair_cdr(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Pair));
    read_ref(object, PAIR_CDR_SLOT)
}

pub(crate) fn set_pair_car(object: Ref, value: Ref) {
    debug_assert!(is_kind(object, ObjectKind::Pair));
    write_ref(object, PAIR_CAR_SLOT, value);
}

pub(crate) fn set_pair_cdr(object: Ref, value: Ref) {
    debug_assert!(is_kind(object, ObjectKind::Pair));
    write_ref(object, PAIR_CDR_SLOT, value);
}

/// Fill a freshly allocated string or symbol payload.
pub(crate) fn write_string(object: Ref, value: &str) {
    write_slot(object, STRING_LEN_SLOT, value.len() as Word);
    // Safety: the payload was sized by `string_payload_size(value.len())`.
    unsafe {
        core::ptr::copy_nonoverlapping(
            value.as_ptr(),
            (object.address() + STRING_BYTES_SLOT * WORD_SIZE) as *mut u8,
            value.len(),
        );
    }
}

/// Borrow the inline bytes of a string or symbol.
pub(crate) fn string_bytes<'a>(object: Ref) -> &'a [u8] {
    debug_assert!(
        is_kind(object, ObjectKind::String) || is_kind(object, ObjectKind::Symbol)
    );
    let len = read_slot(object, STRING_LEN_SLOT) as usize;
    // Safety: `len` bytes follow the length slot by construction.
    unsafe {
        core::slice::from_raw_parts(
            (object.address() + STRING_BYTES_SLOT * WORD_SIZE) as *const u8,
            len,
        )
    }
}

/// Borrow a string or symbol's contents as UTF-8 text.
pub(crate) fn string_value<'a>(object: Ref) -> &'a str {
    // Safety: payloads are only ever written from `&str`.
    unsafe { core::str::from_utf8_unchecked(string_bytes(object)) }
}

pub(crate) fn array_capacity(object: Ref) -> usize {
    debug_assert!(is_kind(object, ObjectKind::Array));
    read_slot(object, ARRAY_CAPACITY_SLOT) as usize
}

pub(crate) fn array_length(object: Ref) -> usize {
    debug_assert!(is_kind(object, ObjectKind::Array));
    read_slot(object, ARRAY_LENGTH_SLOT) as usize
}

pub(crate) fn array_get(object: Ref, index: usize) -> Ref {
    debug_assert!(index < array_length(object));
    read_ref(object, ARRAY_SLOTS_BASE + index)
}

pub(crate) fn array_set(object: Ref, index: usize, value: Ref) {
    debug_assert!(index < array_capacity(object));
    write_ref(object, ARRAY_SLOTS_BASE + index, value);
}

pub(crate) fn error_message(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Error));
    read_ref(object, ERROR_MESSAGE_SLOT)
}

pub(crate) fn class_name(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Class));
    read_ref(object, CLASS_NAME_SLOT)
}

pub(crate) fn class_parent(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Class));
    read_ref(object, CLASS_PARENT_SLOT)
}

pub(crate) fn class_fields(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Class));
    read_ref(object, CLASS_FIELDS_SLOT)
}

pub(crate) fn set_class_fields(object: Ref, fields: Ref) {
    debug_assert!(is_kind(object, ObjectKind::Class));
    write_ref(object, CLASS_FIELDS_SLOT, fields);
}

pub(crate) fn field_name(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Field));
    read_ref(object, FIELD_NAME_SLOT)
}

pub(crate) fn field_owner(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Field));
    read_ref(object, FIELD_OWNER_SLOT)
}

pub(crate) fn field_index(object: Ref) -> usize {
    debug_assert!(is_kind(object, ObjectKind::Field));
    read_slot(object, FIELD_INDEX_SLOT) as usize
}

pub(crate) fn instance_class(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Instance));
    read_ref(object, INSTANCE_CLASS_SLOT)
}

pub(crate) fn instance_len(object: Ref) -> usize {
    debug_assert!(is_kind(object, ObjectKind::Instance));
    read_slot(object, INSTANCE_LEN_SLOT) as usize
}

pub(crate) fn instance_get(object: Ref, index: usize) -> Ref {
    debug_assert!(index < instance_len(object));
    read_ref(object, INSTANCE_SLOTS_BASE + index)
}

pub(crate) fn instance_set(object: Ref, index: usize, value: Ref) {
    debug_assert!(index < instance_len(object));
    write_ref(object, INSTANCE_SLOTS_BASE + index, value);
}

/// Side-table index of a lambda, native, macro or script.
pub(crate) fn table_index(object: Ref) -> usize {
    debug_assert!(matches!(
        kind_of(object),
        ObjectKind::Lambda | ObjectKind::NativeProcedure | ObjectKind::Macro | ObjectKind::Script
    ));
    read_slot(object, INDEX_SLOT) as usize
}

pub(crate) fn module_name(object: Ref) -> Ref {
    debug_assert!(is_kind(object, ObjectKind::Module));
    read_ref(object, MODULE_NAME_SLOT)
}

pub(crate) fn module_scope(object: Ref) -> usize {
    debug_assert!(is_kind(object, ObjectKind::Module));
    read_slot(object, MODULE_SCOPE_SLOT) as usize
}

/// Whether `object` reads as null: the absent reference or an empty
/// pair.
pub(crate) fn is_null(object: Ref) -> bool {
    if object.is_unallocated() {
        return true;
    }
    kind_of(object) == ObjectKind::Pair
        && pair_car(object).is_unallocated()
        && pair_cdr(object).is_unallocated()
}

/// The truth test: `Bool` by value, everything else by non-nullness.
pub(crate) fn truth(object: Ref) -> bool {
    if object.is_unallocated() {
        return false;
    }
    if kind_of(object) == ObjectKind::Bool {
        return bool_value(object);
    }
    !is_null(object)
}

/// Numeric view of a value, promoting per the Scheme-like rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Long(i64),
    Double(f64),
}

pub(crate) fn as_number(object: Ref) -> Option<Number> {
    if object.is_unallocated() {
        return None;
    }
    match kind_of(object) {
        ObjectKind::Long => Some(Number::Long(long_value(object))),
        ObjectKind::Double => Some(Number::Double(double_value(object))),
        _ => None,
    }
}

/// Structural equality.
///
/// Numbers compare by promoted value, strings and symbols by bytes,
/// pairs recursively, classes by name; everything else by identity.
pub(crate) fn equals(left: Ref, right: Ref) -> bool {
    if left == right {
        return true;
    }
    if is_null(left) || is_null(right) {
        return is_null(left) && is_null(right);
    }
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return match (l, r) {
            (Number::Long(a), Number::Long(b)) => a == b,
            (Number::Long(a), Number::Double(b)) | (Number::Double(b), Number::Long(a)) => {
                a as f64 == b
            }
            (Number::Double(a), Number::Double(b)) => a == b,
        };
    }
    let (lk, rk) = (kind_of(left), kind_of(right));
    if lk != rk {
        return false;
    }
    match lk {
        ObjectKind::Bool => bool_value(left) == bool_value(right),
        ObjectKind::String | ObjectKind::Symbol => string_bytes(left) == string_bytes(right),
        ObjectKind::Pair => {
            equals(pair_car(left), pair_car(right)) && equals(pair_cdr(left), pair_cdr(right))
        }
        ObjectKind::Class => equals(class_name(left), class_name(right)),
        _ => false,
    }
}

/// Render a value for messages and the REPL.
pub(crate) fn display(object: Ref) -> String {
    if is_null(object) {
        return "()".to_string();
    }
    match kind_of(object) {
        ObjectKind::Bool => {
            let text = if bool_value(object) { "#t" } else { "#f" };
            text.to_string()
        }
        ObjectKind::Long => long_value(object).to_string(),
        ObjectKind::Double => double_value(object).to_string(),
        ObjectKind::String => format!("\"{}\"", string_value(object)),
        ObjectKind::Symbol => string_value(object).to_string(),
        ObjectKind::Pair => display_pair(object),
        ObjectKind::Array => {
            let items = (0..array_length(object))
                .map(|index| display(array_get(object, index)))
                .collect::<Vec<_>>()
                .join(" ");
            format!("#({items})")
        }
        ObjectKind::Error => {
            let message = error_message(object);
            if is_kind(message, ObjectKind::String) {
                format!("Error({})", string_value(message))
            } else {
                "Error".to_string()
            }
        }
        ObjectKind::Class => string_value(class_name(object)).to_string(),
        ObjectKind::Field => string_value(field_name(object)).to_string(),
        ObjectKind::Instance => {
            format!("#<{}>", string_value(class_name(instance_class(object))))
        }
        ObjectKind::Lambda => "#<lambda>".to_string(),
        ObjectKind::NativeProcedure => "#<native>".to_string(),
        ObjectKind::Macro => "#<macro>".to_string(),
        ObjectKind::Module => format!("#<module {}>", string_value(module_name(object))),
        ObjectKind::Script => "#<script>".to_string(),
    }
}

fn display_pair(object: Ref) -> String {
    let mut out = String::from("(");
    out.push_str(&display(pair_car(object)));
    let mut next = pair_cdr(object);
    loop {
        if is_null(next) {
            out.push(')');
            return out;
        }
        if !is_kind(next, ObjectKind::Pair) {
            out.push_str(" . ");
            out.push_str(&display(next));
            out.push(')');
            return out;
        }
        out.push(' ');
        out.push_str(&display(pair_car(next)));
        next = pair_cdr(next);
    }
}

/// The collector's view of object layout: hands every traced slot of a
/// payload to the evacuation callback.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ObjectTrace;

impl Trace for ObjectTrace {
    fn trace(&self, object: Address, vis: &mut dyn FnMut(&mut Address)) {
        let object = Ref::from_address(object);
        let visit_slot = |slot: usize, vis: &mut dyn FnMut(&mut Address)| {
            // Safety: the slot is inside the payload per the kind
            // layouts at the top of this module.
            unsafe { vis(&mut *((object.address() + slot * WORD_SIZE) as *mut Address)) }
        };
        match kind_of(object) {
            ObjectKind::Pair => {
                visit_slot(PAIR_CAR_SLOT, vis);
                visit_slot(PAIR_CDR_SLOT, vis);
            }
            ObjectKind::Error => visit_slot(ERROR_MESSAGE_SLOT, vis),
            ObjectKind::Class => {
                visit_slot(CLASS_NAME_SLOT, vis);
                visit_slot(CLASS_PARENT_SLOT, vis);
                visit_slot(CLASS_FIELDS_SLOT, vis);
            }
            ObjectKind::Field => {
                visit_slot(FIELD_NAME_SLOT, vis);
                visit_slot(FIELD_OWNER_SLOT, vis);
            }
            ObjectKind::Instance => {
                visit_slot(INSTANCE_CLASS_SLOT, vis);
                for index in 0..instance_len(object) {
                    visit_slot(INSTANCE_SLOTS_BASE + index, vis);
                }
            }
            ObjectKind::Array => {
                for index in 0..array_length(object) {
                    visit_slot(ARRAY_SLOTS_BASE + index, vis);
                }
            }
            ObjectKind::Module => visit_slot(MODULE_NAME_SLOT, vis),
            ObjectKind::Bool
            | ObjectKind::Long
            | ObjectKind::Double
            | ObjectKind::String
            | ObjectKind::Symbol
            | ObjectKind::Lambda
            | ObjectKind::NativeProcedure
            | ObjectKind::Macro
            | ObjectKind::Script => {}
        }
    }
}

//! The native-procedure bridge.
//!
//! Host functions register under a fully-qualified symbol and are
//! invoked through the same call protocol as user lambdas: arguments
//! are adapted against the entry's descriptor set, a frame is pushed
//! for the duration of the host call, and the entry reports its result
//! by pushing onto the operand stack: a value on success, an in-band
//! `Error` otherwise. Argument type coercion is the host's
//! responsibility.
//!
//! ```
//! use wisp_vm::{Argument, ArgumentSet, Runtime};
//!
//! let mut runtime = Runtime::new();
//! let double = runtime
//!     .link_native(
//!         "double",
//!         [Argument::required(0, "x")].into_iter().collect(),
//!         |runtime, args| {
//!             match runtime.long(args[0]) {
//!                 Some(value) => {
//!                     let result = runtime.new_long(2 * value);
//!                     runtime.push(result);
//!                     true
//!                 }
//!                 None => {
//!                     let message = format!("expected a Long, got `{}`", runtime.display(args[0]));
//!                     runtime.push_error(&message);
//!                     false
//!                 }
//!             }
//!         },
//!     )
//!     .unwrap();
//! let twenty_one = runtime.new_long(21);
//! let result = runtime.call_pop(double, &[twenty_one]).unwrap();
//! assert_eq!(runtime.long(result), Some(42));
//! ```

use crate::argument::ArgumentSet;
use crate::error::VmError;
use crate::object::{self, ObjectKind, Ref};
use crate::procedure::NativeData;
use crate::Runtime;

use std::rc::Rc;

impl Runtime {
    /// Register `entry` under `name`, creating the procedure object.
    /// Relinking an already-linked symbol is refused.
    pub fn link_native(
        &mut self,
        name: &str,
        args: ArgumentSet,
        entry: impl Fn(&mut Runtime, &[Ref]) -> bool + 'static,
    ) -> Result<Ref, VmError> {
        if let Some(&index) = self.native_index.get(name) {
            if self.natives[index].is_linked() {
                return Err(VmError::AlreadyLinked(name.to_string()));
            }
            self.natives[index].args = args;
            self.natives[index].entry = Some(Rc::new(entry));
            return Ok(self.natives[index].object);
        }

        let symbol = self.intern_symbol(name);
        let index = self.natives.len();
        self.natives.push(NativeData {
            symbol,
            args,
            entry: Some(Rc::new(entry)),
            docs: Ref::NULL,
            object: Ref::NULL,
        });
        let object = self.allocate_object(ObjectKind::NativeProcedure, object::fixed_payload_size(2));
        object::write_slot(object, object::INDEX_SLOT, index as u64);
        self.natives[index].object = object;
        self.native_index.insert(name.to_string(), index);
        Ok(object)
    }

    /// Declare a native's shape without an entry; calls fail in-band
    /// until [`Runtime::link_native`] supplies one.
    pub fn declare_native(&mut self, name: &str, args: ArgumentSet) -> Ref {
        if let Some(&index) = self.native_index.get(name) {
            return self.natives[index].object;
        }
        let symbol = self.intern_symbol(name);
        let index = self.natives.len();
        self.natives.push(NativeData {
            symbol,
            args,
            entry: None,
            docs: Ref::NULL,
            object: Ref::NULL,
        });
        let object = self.allocate_object(ObjectKind::NativeProcedure, object::fixed_payload_size(2));
        object::write_slot(object, object::INDEX_SLOT, index as u64);
        self.natives[index].object = object;
        self.native_index.insert(name.to_string(), index);
        object
    }

    /// Attach a documentation string to a registered native.
    pub fn set_native_docs(&mut self, native: Ref, docs: &str) {
        debug_assert!(object::is_kind(native, ObjectKind::NativeProcedure));
        let text = self.new_string(docs);
        self.natives[object::table_index(native)].docs = text;
    }

    /// Look a native up by its fully-qualified name.
    pub fn find_native(&self, name: &str) -> Option<Ref> {
        self.native_index
            .get(name)
            .map(|&index| self.natives[index].object)
    }

    /// Side-table record behind a native-procedure object.
    pub fn native_data(&self, native: Ref) -> &NativeData {
        debug_assert!(object::is_kind(native, ObjectKind::NativeProcedure));
        &self.natives[object::table_index(native)]
    }

    /// Convenience for entries: build and push an in-band error.
    pub fn push_error(&mut self, message: &str) {
        self.push_error_message(message);
    }
}

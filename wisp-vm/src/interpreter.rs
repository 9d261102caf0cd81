//! The tracing bytecode interpreter.
//!
//! Single-threaded: one instruction pointer per frame, one operand
//! stack shared across frames. Each step fetches the opcode, decodes
//! its fixed-width immediates, executes and advances past the decoded
//! region unless the opcode set the instruction pointer itself (jumps,
//! calls, returns).
//!
//! Guest-visible failures push in-band `Error` objects and execution
//! continues; there is no unwinding. Malformed bytecode (an unknown
//! opcode, an out-of-range local) is a compiler bug and panics.

use crate::argument::ArgumentSet;
use crate::frame::{FrameTarget, Ip};
use crate::object::{self, Number, ObjectKind, Ref};
use crate::procedure::NativeId;
use crate::Runtime;

use wisp_asm::Opcode;
use wisp_types::{Address, SWord, Word, WORD_SIZE};

impl Runtime {
    /// Run from `entry` until the frame that was current when
    /// execution began returns.
    pub(crate) fn run(&mut self, entry: Ip) {
        let mut ip = Some(entry);
        while let Some(current) = ip {
            ip = self.step(current);
        }
    }

    fn code_len(&self, ip: Ip) -> usize {
        self.code[ip.code.0].region().size()
    }

    fn fetch_op(&self, ip: Ip) -> Opcode {
        let byte = self.code[ip.code.0].region().as_bytes()[ip.pc];
        Opcode::from_raw(byte)
            .unwrap_or_else(|| panic!("invalid opcode 0x{byte:02x} at pc {}", ip.pc))
    }

    fn fetch_word(&self, ip: Ip, which: usize) -> Word {
        let at = ip.pc + 1 + which * WORD_SIZE;
        let bytes = &self.code[ip.code.0].region().as_bytes()[at..at + WORD_SIZE];
        Word::from_le_bytes(bytes.try_into().expect("word-sized immediate"))
    }

    fn fetch_sword(&self, ip: Ip, which: usize) -> SWord {
        self.fetch_word(ip, which) as SWord
    }

    /// Execute the instruction at `ip`; the returned position is the
    /// next fetch, or `None` when the outermost frame returned.
    fn step(&mut self, ip: Ip) -> Option<Ip> {
        if ip.pc >= self.code_len(ip) {
            // running off the end of a region behaves like `ret`
            return self.do_return();
        }
        let op = self.fetch_op(ip);
        tracing::trace!(pc = ip.pc, op = %op, depth = self.stack_depth(), "step");
        let after = Ip {
            code: ip.code,
            pc: ip.pc + 1 + op.immediates().width(),
        };

        match op {
            Opcode::Nop => Some(after),
            Opcode::Pop => {
                self.pop_value();
                Some(after)
            }
            Opcode::Dup => {
                let top = self.peek_value().expect("operand stack underflow");
                self.push(top);
                Some(after)
            }

            Opcode::PushN => {
                let null = self.empty_pair();
                self.push(null);
                Some(after)
            }
            Opcode::PushT => {
                let value = self.bool_ref(true);
                self.push(value);
                Some(after)
            }
            Opcode::PushF => {
                let value = self.bool_ref(false);
                self.push(value);
                Some(after)
            }
            Opcode::PushI => {
                let value = self.fetch_word(ip, 0) as i64;
                let boxed = self.new_long(value);
                self.push(boxed);
                Some(after)
            }
            Opcode::PushQ => {
                let address = self.fetch_word(ip, 0) as Address;
                self.push(Ref::from_address(address));
                Some(after)
            }

            Opcode::LoadLocal => {
                let index = self.fetch_word(ip, 0) as usize;
                self.do_load_local(index);
                Some(after)
            }
            Opcode::LoadLocal0 | Opcode::LoadLocal1 | Opcode::LoadLocal2 | Opcode::LoadLocal3 => {
                self.do_load_local((op.raw() - Opcode::LoadLocal0.raw()) as usize);
                Some(after)
            }
            Opcode::StoreLocal => {
                let index = self.fetch_word(ip, 0) as usize;
                self.do_store_local(index);
                Some(after)
            }
            Opcode::StoreLocal0
            | Opcode::StoreLocal1
            | Opcode::StoreLocal2
            | Opcode::StoreLocal3 => {
                self.do_store_local((op.raw() - Opcode::StoreLocal0.raw()) as usize);
                Some(after)
            }

            Opcode::Invoke => {
                let target = Ref::from_address(self.fetch_word(ip, 0) as Address);
                let num_args = self.fetch_word(ip, 1) as usize;
                if !object::is_kind(target, ObjectKind::Lambda) {
                    let message = format!("expected `{}` to be a Lambda", self.display(target));
                    self.push_error_message(&message);
                    return Some(after);
                }
                self.enter_lambda(target, num_args, Some(after))
            }
            Opcode::InvokeNative => {
                let target = Ref::from_address(self.fetch_word(ip, 0) as Address);
                let num_args = self.fetch_word(ip, 1) as usize;
                if !object::is_kind(target, ObjectKind::NativeProcedure) {
                    let message =
                        format!("expected `{}` to be a NativeProcedure", self.display(target));
                    self.push_error_message(&message);
                    return Some(after);
                }
                self.call_native(target, num_args);
                Some(after)
            }
            Opcode::InvokeDynamic => {
                let num_args = self.fetch_word(ip, 0) as usize;
                let target = self.pop_value();
                match self.kind(target) {
                    Some(ObjectKind::Lambda) => self.enter_lambda(target, num_args, Some(after)),
                    Some(ObjectKind::NativeProcedure) => {
                        self.call_native(target, num_args);
                        Some(after)
                    }
                    _ => {
                        let message =
                            format!("expected `{}` to be a Procedure", self.display(target));
                        self.push_error_message(&message);
                        Some(after)
                    }
                }
            }
            Opcode::Ret => self.do_return(),

            Opcode::Jump => {
                let offset = self.fetch_sword(ip, 0);
                Some(Self::branch_target(ip, offset))
            }
            Opcode::Jz => {
                let offset = self.fetch_sword(ip, 0);
                let test = self.pop_value();
                if !object::truth(test) {
                    Some(Self::branch_target(ip, offset))
                } else {
                    Some(after)
                }
            }
            Opcode::Jnz => {
                let offset = self.fetch_sword(ip, 0);
                let test = self.pop_value();
                if object::truth(test) {
                    Some(Self::branch_target(ip, offset))
                } else {
                    Some(after)
                }
            }
            Opcode::Jeq => {
                let offset = self.fetch_sword(ip, 0);
                let test = self.pop_value();
                if Self::is_numeric_zero(test) {
                    Some(Self::branch_target(ip, offset))
                } else {
                    Some(after)
                }
            }
            Opcode::Jne => {
                let offset = self.fetch_sword(ip, 0);
                let test = self.pop_value();
                if !Self::is_numeric_zero(test) {
                    Some(Self::branch_target(ip, offset))
                } else {
                    Some(after)
                }
            }

            Opcode::Throw => {
                let value = self.pop_value();
                let error = self.new_error_from(value);
                self.push(error);
                Some(after)
            }
            Opcode::Lookup => {
                self.do_lookup();
                Some(after)
            }
            Opcode::Cast => {
                let class = Ref::from_address(self.fetch_word(ip, 0) as Address);
                self.do_cast(class);
                Some(after)
            }
            Opcode::CheckInstance => {
                let class = Ref::from_address(self.fetch_word(ip, 0) as Address);
                self.do_check_instance(class);
                Some(after)
            }
            Opcode::New => {
                let class = Ref::from_address(self.fetch_word(ip, 0) as Address);
                let num_args = self.fetch_word(ip, 1) as usize;
                self.do_new(class, num_args);
                Some(after)
            }
            Opcode::LoadField => {
                let field = Ref::from_address(self.fetch_word(ip, 0) as Address);
                self.do_load_field(field);
                Some(after)
            }
            Opcode::StoreField => {
                let field = Ref::from_address(self.fetch_word(ip, 0) as Address);
                self.do_store_field(field);
                Some(after)
            }

            Opcode::Not | Opcode::Car | Opcode::Cdr | Opcode::IsNull | Opcode::IsNonNull => {
                self.do_unary(op);
                Some(after)
            }

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Eq
            | Opcode::BAnd
            | Opcode::BOr
            | Opcode::Gt
            | Opcode::Gte
            | Opcode::Lt
            | Opcode::Lte
            | Opcode::Cons
            | Opcode::InstanceOf => {
                self.do_binary(op);
                Some(after)
            }
        }
    }

    /// Branch offsets are relative to the immediate slot itself.
    fn branch_target(ip: Ip, offset: SWord) -> Ip {
        let slot = (ip.pc + 1) as SWord;
        Ip {
            code: ip.code,
            pc: (slot + offset) as usize,
        }
    }

    fn is_numeric_zero(value: Ref) -> bool {
        match object::as_number(value) {
            Some(Number::Long(v)) => v == 0,
            Some(Number::Double(v)) => v == 0.0,
            None => false,
        }
    }

    fn do_return(&mut self) -> Option<Ip> {
        let frame = self.pop_frame()?;
        frame.return_address()
    }

    fn do_load_local(&mut self, index: usize) {
        let scope = self.current_scope();
        let value = self.scopes.value_at(scope, index);
        let value = if value.is_unallocated() {
            self.empty_pair()
        } else {
            value
        };
        self.push(value);
    }

    fn do_store_local(&mut self, index: usize) {
        let value = self.pop_value();
        let scope = self.current_scope();
        self.scopes.set_value_at(scope, index, value);
    }

    fn do_lookup(&mut self) {
        let symbol = self.pop_value();
        if !object::is_kind(symbol, ObjectKind::Symbol) {
            let message = format!("expected `{}` to be a Symbol", self.display(symbol));
            self.push_error_message(&message);
            return;
        }
        let name = object::string_value(symbol).to_string();
        match self.scopes.lookup(self.current_scope(), &name, true) {
            Some((scope, index)) => {
                let value = self.scopes.value_at(scope, index);
                let value = if value.is_unallocated() {
                    self.empty_pair()
                } else {
                    value
                };
                self.push(value);
            }
            None => {
                let message = format!("failed to resolve `{name}`");
                self.push_error_message(&message);
            }
        }
    }

    fn do_cast(&mut self, class: Ref) {
        let Some(top) = self.peek_value() else {
            self.push_error_message("stack is empty, nothing to cast");
            return;
        };
        if self.is_instance_of(top, class) {
            return;
        }
        let value = self.pop_value();
        if class == self.core.string {
            let text = self.display(value);
            let converted = self.new_string(&text);
            self.push(converted);
            return;
        }
        let message = format!(
            "cannot cast `{}` to {}",
            self.display(value),
            self.class_name_text(class)
        );
        self.push_error_message(&message);
    }

    fn do_check_instance(&mut self, class: Ref) {
        let expected = self.class_name_text(class);
        let Some(top) = self.peek_value() else {
            let message = format!("stack is empty, expected an instance of `{expected}`");
            self.push_error_message(&message);
            return;
        };
        if self.is_instance_of(top, class) {
            return;
        }
        self.pop_value();
        let actual = self.class_name_text(self.class_of(top));
        let message = format!(
            "unexpected `{}` of type `{actual}` on the stack, expected an instance of `{expected}`",
            self.display(top)
        );
        self.push_error_message(&message);
    }

    fn do_new(&mut self, class: Ref, num_args: usize) {
        if !object::is_kind(class, ObjectKind::Class) {
            let message = format!("expected `{}` to be a Class", self.display(class));
            self.push_error_message(&message);
            return;
        }
        let mut args = vec![Ref::NULL; num_args];
        for slot in (0..num_args).rev() {
            args[slot] = self.pop_value();
        }

        let result = if class == self.core.pair {
            let car = args.first().copied().unwrap_or(Ref::NULL);
            let cdr = args.get(1).copied().unwrap_or(Ref::NULL);
            self.new_pair(car, cdr)
        } else if class == self.core.string {
            match args.first() {
                Some(&value) if object::is_kind(value, ObjectKind::String) => {
                    let text = object::string_value(value).to_string();
                    self.new_string(&text)
                }
                Some(&value) => {
                    let text = self.display(value);
                    self.new_string(&text)
                }
                None => self.new_string(""),
            }
        } else if class == self.core.array {
            match args.first().map(|length| (*length, self.long(*length))) {
                Some((_, Some(length))) if length >= 0 => self.new_array(length as usize),
                Some((value, _)) => {
                    let message =
                        format!("expected `{}` to be a Long length", self.display(value));
                    self.new_error(&message)
                }
                None => self.new_array(0),
            }
        } else if class == self.core.error {
            match args.first() {
                Some(&value) => self.new_error_from(value),
                None => self.new_error("unknown error"),
            }
        } else if self.classes.contains(&class) && !self.is_core_class(class) {
            self.new_instance(class, &args)
        } else {
            let message = format!("cannot instantiate `{}`", self.class_name_text(class));
            self.new_error(&message)
        };
        self.push(result);
    }

    fn is_core_class(&self, class: Ref) -> bool {
        [
            self.core.object,
            self.core.class,
            self.core.datum,
            self.core.bool_,
            self.core.number,
            self.core.long,
            self.core.double,
            self.core.pair,
            self.core.string,
            self.core.symbol,
            self.core.array,
            self.core.error,
            self.core.field,
            self.core.procedure,
            self.core.lambda,
            self.core.native_procedure,
            self.core.macro_,
            self.core.module,
            self.core.script,
        ]
        .contains(&class)
    }

    fn do_load_field(&mut self, field: Ref) {
        let instance = self.pop_value();
        match self.field_value(instance, field) {
            Some(value) => {
                let value = if value.is_unallocated() {
                    self.empty_pair()
                } else {
                    value
                };
                self.push(value);
            }
            None => {
                let message = format!(
                    "cannot read field `{}` of `{}`",
                    self.display(field),
                    self.display(instance)
                );
                self.push_error_message(&message);
            }
        }
    }

    fn do_store_field(&mut self, field: Ref) {
        let value = self.pop_value();
        let instance = self.pop_value();
        if object::is_kind(instance, ObjectKind::Instance)
            && object::is_kind(field, ObjectKind::Field)
            && object::field_index(field) < object::instance_len(instance)
        {
            object::instance_set(instance, object::field_index(field), value);
            return;
        }
        let message = format!(
            "cannot write field `{}` of `{}`",
            self.display(field),
            self.display(instance)
        );
        self.push_error_message(&message);
    }

    fn do_unary(&mut self, op: Opcode) {
        let value = self.pop_value();
        let result = match op {
            Opcode::Not => self.bool_ref(!object::truth(value)),
            Opcode::Car | Opcode::Cdr => {
                if object::is_kind(value, ObjectKind::Pair) {
                    let slot = if op == Opcode::Car {
                        object::pair_car(value)
                    } else {
                        object::pair_cdr(value)
                    };
                    if slot.is_unallocated() {
                        self.empty_pair()
                    } else {
                        slot
                    }
                } else {
                    let message = format!("expected `{}` to be a Pair", self.display(value));
                    self.new_error(&message)
                }
            }
            Opcode::IsNull => self.bool_ref(object::is_null(value)),
            Opcode::IsNonNull => self.bool_ref(!object::is_null(value)),
            _ => unreachable!("not a unary opcode: {op}"),
        };
        self.push(result);
    }

    fn do_binary(&mut self, op: Opcode) {
        let right = self.pop_value();
        let left = self.pop_value();
        let result = match op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                self.arithmetic(op, left, right)
            }
            Opcode::Eq => self.bool_ref(object::equals(left, right)),
            Opcode::BAnd | Opcode::BOr => self.boolean_op(op, left, right),
            Opcode::Gt | Opcode::Gte | Opcode::Lt | Opcode::Lte => self.comparison(op, left, right),
            Opcode::Cons => self.new_pair(left, right),
            Opcode::InstanceOf => self.instance_of_op(left, right),
            _ => unreachable!("not a binary opcode: {op}"),
        };
        self.push(result);
    }

    /// Scheme-like promotion: Long op Long stays Long, any Double
    /// operand promotes to Double. `mod` is Long-only.
    fn arithmetic(&mut self, op: Opcode, left: Ref, right: Ref) -> Ref {
        let (Some(l), Some(r)) = (object::as_number(left), object::as_number(right)) else {
            return self.number_type_error(left, right);
        };
        if let (Number::Long(a), Number::Long(b)) = (l, r) {
            return match op {
                Opcode::Add => self.new_long(a.wrapping_add(b)),
                Opcode::Sub => self.new_long(a.wrapping_sub(b)),
                Opcode::Mul => self.new_long(a.wrapping_mul(b)),
                Opcode::Div if b == 0 => self.new_error("division by zero"),
                Opcode::Div => self.new_long(a.wrapping_div(b)),
                Opcode::Mod if b == 0 => self.new_error("division by zero"),
                Opcode::Mod => self.new_long(a.wrapping_rem(b)),
                _ => unreachable!(),
            };
        }
        let a = Self::to_double(l);
        let b = Self::to_double(r);
        match op {
            Opcode::Add => self.new_double(a + b),
            Opcode::Sub => self.new_double(a - b),
            Opcode::Mul => self.new_double(a * b),
            Opcode::Div => self.new_double(a / b),
            Opcode::Mod => self.new_error("`mod` expects Long operands"),
            _ => unreachable!(),
        }
    }

    fn to_double(value: Number) -> f64 {
        match value {
            Number::Long(v) => v as f64,
            Number::Double(v) => v,
        }
    }

    fn comparison(&mut self, op: Opcode, left: Ref, right: Ref) -> Ref {
        let (Some(l), Some(r)) = (object::as_number(left), object::as_number(right)) else {
            return self.number_type_error(left, right);
        };
        let ordering = if let (Number::Long(a), Number::Long(b)) = (l, r) {
            a.cmp(&b)
        } else {
            let a = Self::to_double(l);
            let b = Self::to_double(r);
            match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                None => return self.new_error("cannot order NaN"),
            }
        };
        let result = match op {
            Opcode::Gt => ordering.is_gt(),
            Opcode::Gte => ordering.is_ge(),
            Opcode::Lt => ordering.is_lt(),
            Opcode::Lte => ordering.is_le(),
            _ => unreachable!(),
        };
        self.bool_ref(result)
    }

    fn number_type_error(&mut self, left: Ref, right: Ref) -> Ref {
        let message = format!(
            "expected Numbers, got `{}` and `{}`",
            self.display(left),
            self.display(right)
        );
        self.new_error(&message)
    }

    fn boolean_op(&mut self, op: Opcode, left: Ref, right: Ref) -> Ref {
        let (Some(a), Some(b)) = (self.boolean(left), self.boolean(right)) else {
            let message = format!(
                "expected Bools, got `{}` and `{}`",
                self.display(left),
                self.display(right)
            );
            return self.new_error(&message);
        };
        let result = match op {
            Opcode::BAnd => a && b,
            Opcode::BOr => a || b,
            _ => unreachable!(),
        };
        self.bool_ref(result)
    }

    /// `instanceof` with stack operands: the expected side may be a
    /// class or a symbol naming one; anything else is judged by its
    /// own class.
    fn instance_of_op(&mut self, value: Ref, expected: Ref) -> Ref {
        let class = match self.kind(expected) {
            Some(ObjectKind::Class) => expected,
            Some(ObjectKind::Symbol) => {
                let name = object::string_value(expected).to_string();
                match self.find_class(&name) {
                    Some(class) => class,
                    None => {
                        let message = format!("failed to find class named `{name}`");
                        return self.new_error(&message);
                    }
                }
            }
            _ => self.class_of(expected),
        };
        let result = self.is_instance_of(value, class);
        self.bool_ref(result)
    }

    pub(crate) fn push_error_message(&mut self, message: &str) {
        let error = self.new_error(message);
        self.push(error);
    }

    // ---- calls ------------------------------------------------------

    /// Pop `num_args` actuals and fit them to `descs`: positionals in
    /// order, a vararg absorbing the rest as a list, missing optionals
    /// null-padded. Arity violations produce an in-band error.
    pub(crate) fn adapt_args(
        &mut self,
        descs: &ArgumentSet,
        num_args: usize,
    ) -> Result<Vec<Ref>, Ref> {
        let base = self.temps.len();
        for _ in 0..num_args {
            let value = self.pop_value();
            self.temps.insert(base, value);
        }
        let out_base = self.temps.len();

        let mut next_actual = 0usize;
        let mut failure: Option<String> = None;
        for desc in descs {
            if desc.is_vararg() {
                let mut rest = self.empty_pair();
                for index in (next_actual..num_args).rev() {
                    rest = self.new_pair(self.temps[base + index], rest);
                }
                next_actual = num_args;
                self.temps.push(rest);
                break;
            } else if next_actual < num_args {
                let value = self.temps[base + next_actual];
                next_actual += 1;
                self.temps.push(value);
            } else if desc.is_optional() {
                self.temps.push(Ref::NULL);
            } else {
                failure = Some(format!("missing required argument `{}`", desc.name()));
                break;
            }
        }
        if failure.is_none() && next_actual < num_args {
            failure = Some(format!(
                "too many arguments: expected {}, got {num_args}",
                descs.len()
            ));
        }

        match failure {
            Some(message) => {
                self.temps.truncate(base);
                Err(self.new_error(&message))
            }
            None => {
                let bindings = self.temps[out_base..].to_vec();
                self.temps.truncate(base);
                Ok(bindings)
            }
        }
    }

    /// Adapt the stacked arguments and push a frame for `lambda`;
    /// the result is the callee entry, or the caller's resume point
    /// when adaptation failed in-band.
    pub(crate) fn enter_lambda(
        &mut self,
        lambda: Ref,
        num_args: usize,
        return_address: Option<Ip>,
    ) -> Option<Ip> {
        let index = object::table_index(lambda);
        let (descs, template, code) = {
            let data = &self.lambdas[index];
            (data.args.clone(), data.scope, data.code)
        };
        let Some(code) = code else {
            let message = format!("`{}` is not compiled", self.display(lambda));
            self.push_error_message(&message);
            return return_address;
        };
        match self.adapt_args(&descs, num_args) {
            Err(error) => {
                self.push(error);
                return_address
            }
            Ok(bindings) => {
                let locals = self.scopes.instantiate(template);
                for (desc, value) in descs.iter().zip(bindings) {
                    match self.scopes.lookup(locals, desc.name(), false) {
                        Some((_, slot)) => self.scopes.set_value_at(locals, slot, value),
                        None => {
                            self.scopes.add(locals, desc.name(), value);
                        }
                    }
                }
                self.push_frame(FrameTarget::Code(code), locals, return_address);
                Some(Ip::entry(code))
            }
        }
    }

    /// Adapt the stacked arguments and run a native entry through the
    /// shared call protocol: a frame is pushed for the duration of the
    /// host call and the entry leaves its result on the operand stack.
    pub(crate) fn call_native(&mut self, native: Ref, num_args: usize) {
        let index = object::table_index(native);
        let name = object::string_value(self.natives[index].symbol).to_string();
        let descs = self.natives[index].args.clone();
        match self.adapt_args(&descs, num_args) {
            Err(error) => self.push(error),
            Ok(args) => {
                let Some(entry) = self.natives[index].entry.clone() else {
                    let message = format!("native `{name}` has no linked entry");
                    self.push_error_message(&message);
                    return;
                };
                let locals = self.scopes.new_scope(Some(self.current_scope()));
                self.push_frame(FrameTarget::Native(NativeId(index)), locals, None);
                let depth = self.stack_depth();
                let ok = (*entry)(self, &args);
                self.pop_frame();
                if !ok && self.stack_depth() == depth {
                    let message = format!("native `{name}` failed");
                    self.push_error_message(&message);
                }
            }
        }
    }
}

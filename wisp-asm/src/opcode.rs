//! The one-byte instruction set.

use strum::EnumIter;

/// Raw byte representation of an [`Opcode`].
pub type RawOpcode = u8;

/// Shape of the immediates following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmediateLayout {
    /// No immediates.
    None,
    /// One unsigned machine word (value, index or object address).
    Word,
    /// One signed machine word holding a branch offset relative to the
    /// immediate slot.
    Branch,
    /// An object address followed by an argument count.
    AddressAndCount,
}

impl ImmediateLayout {
    /// Encoded width of the immediates in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::Word | Self::Branch => wisp_types::WORD_SIZE,
            Self::AddressAndCount => wisp_types::WORD_SIZE * 2,
        }
    }
}

/// Instruction set of the Wisp virtual machine.
///
/// `0x00` is reserved as an invalid encoding so that a zeroed buffer
/// never reads as executable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(u8)]
pub enum Opcode {
    /// Do nothing.
    Nop = 0x01,
    /// Discard the top of the operand stack.
    Pop,
    /// Duplicate the top of the operand stack.
    Dup,
    /// Pop a symbol and resolve it against the current scope chain.
    Lookup,
    /// Pop into the local slot named by the word immediate.
    StoreLocal,
    /// Pop into local slot 0.
    StoreLocal0,
    /// Pop into local slot 1.
    StoreLocal1,
    /// Pop into local slot 2.
    StoreLocal2,
    /// Pop into local slot 3.
    StoreLocal3,
    /// Push the local slot named by the word immediate.
    LoadLocal,
    /// Push local slot 0.
    LoadLocal0,
    /// Push local slot 1.
    LoadLocal1,
    /// Push local slot 2.
    LoadLocal2,
    /// Push local slot 3.
    LoadLocal3,
    /// Call the lambda at the address immediate with `n` stacked args.
    Invoke,
    /// Call the procedure currently on top of the stack.
    InvokeDynamic,
    /// Call the native procedure at the address immediate.
    InvokeNative,
    /// Verify the stack top is an instance of the class immediate.
    CheckInstance,
    /// Return to the calling frame.
    Ret,
    /// Push the boxed object at the address immediate.
    PushQ,
    /// Push the word immediate as a Long.
    PushI,
    /// Push null (the empty pair).
    PushN,
    /// Push true.
    PushT,
    /// Push false.
    PushF,
    /// Unconditional branch.
    Jump,
    /// Branch when the popped value fails the truth test.
    Jz,
    /// Branch when the popped value passes the truth test.
    Jnz,
    /// Branch when the popped value is numeric zero.
    Jeq,
    /// Branch when the popped value is numeric non-zero.
    Jne,
    /// Convert the stack top to the class immediate.
    Cast,
    /// Instantiate the class immediate with `n` stacked args.
    New,
    /// Pop a value and push it wrapped as an Error.
    Throw,
    /// Push the field immediate's slot of the popped instance.
    LoadField,
    /// Store the popped value into the field immediate of the popped
    /// instance.
    StoreField,

    // unary operations: pop one, push one
    /// Logical negation of the truth test.
    Not,
    /// First element of a pair.
    Car,
    /// Second element of a pair.
    Cdr,
    /// Whether the popped value is null.
    IsNull,
    /// Whether the popped value is non-null.
    IsNonNull,

    // binary operations: pop two, push one
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulus.
    Mod,
    /// Structural equality.
    Eq,
    /// Boolean conjunction.
    BAnd,
    /// Boolean disjunction.
    BOr,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-than-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
    /// Numeric less-than-or-equal.
    Lte,
    /// Construct a pair from the two popped values.
    Cons,
    /// Whether the popped value is an instance of the popped class.
    InstanceOf,
}

impl Opcode {
    /// Decode a raw byte; `None` when the byte is not a valid opcode.
    pub const fn from_raw(raw: RawOpcode) -> Option<Self> {
        if raw >= Self::Nop as u8 && raw <= Self::InstanceOf as u8 {
            // Safety: contiguous discriminants, range checked above.
            Some(unsafe { core::mem::transmute::<u8, Self>(raw) })
        } else {
            None
        }
    }

    /// Raw byte encoding.
    pub const fn raw(self) -> RawOpcode {
        self as RawOpcode
    }

    /// Immediates following this opcode in the byte stream.
    pub const fn immediates(self) -> ImmediateLayout {
        match self {
            Self::PushI
            | Self::PushQ
            | Self::LoadLocal
            | Self::StoreLocal
            | Self::InvokeDynamic
            | Self::Cast
            | Self::CheckInstance
            | Self::LoadField
            | Self::StoreField => ImmediateLayout::Word,
            Self::Invoke | Self::InvokeNative | Self::New => ImmediateLayout::AddressAndCount,
            Self::Jump | Self::Jz | Self::Jnz | Self::Jeq | Self::Jne => ImmediateLayout::Branch,
            _ => ImmediateLayout::None,
        }
    }

    /// Whether this opcode pops two operands and pushes one.
    pub const fn is_binary(self) -> bool {
        self.raw() >= Self::Add.raw() && self.raw() <= Self::InstanceOf.raw()
    }

    /// Whether this opcode pops one operand and pushes one.
    pub const fn is_unary(self) -> bool {
        self.raw() >= Self::Not.raw() && self.raw() <= Self::IsNonNull.raw()
    }

    /// Whether this opcode carries a branch offset.
    pub const fn is_jump(self) -> bool {
        matches!(self.immediates(), ImmediateLayout::Branch)
    }

    /// Assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Lookup => "lookup",
            Self::StoreLocal => "store_local",
            Self::StoreLocal0 => "store_local0",
            Self::StoreLocal1 => "store_local1",
            Self::StoreLocal2 => "store_local2",
            Self::StoreLocal3 => "store_local3",
            Self::LoadLocal => "load_local",
            Self::LoadLocal0 => "load_local0",
            Self::LoadLocal1 => "load_local1",
            Self::LoadLocal2 => "load_local2",
            Self::LoadLocal3 => "load_local3",
            Self::Invoke => "invoke",
            Self::InvokeDynamic => "invoke_dynamic",
            Self::InvokeNative => "invoke_native",
            Self::CheckInstance => "checkinstance",
            Self::Ret => "ret",
            Self::PushQ => "pushq",
            Self::PushI => "pushi",
            Self::PushN => "pushn",
            Self::PushT => "pusht",
            Self::PushF => "pushf",
            Self::Jump => "jmp",
            Self::Jz => "jz",
            Self::Jnz => "jnz",
            Self::Jeq => "jeq",
            Self::Jne => "jne",
            Self::Cast => "cast",
            Self::New => "new",
            Self::Throw => "throw",
            Self::LoadField => "load_field",
            Self::StoreField => "store_field",
            Self::Not => "not",
            Self::Car => "car",
            Self::Cdr => "cdr",
            Self::IsNull => "isnull",
            Self::IsNonNull => "isnonnull",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Eq => "eq",
            Self::BAnd => "band",
            Self::BOr => "bor",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Cons => "cons",
            Self::InstanceOf => "instanceof",
        }
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use strum::IntoEnumIterator;

    #[test]
    fn raw_roundtrip_covers_every_opcode() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::from_raw(op.raw()), Some(op), "{op}");
        }
    }

    #[test]
    fn zero_and_out_of_range_bytes_are_invalid() {
        assert_eq!(Opcode::from_raw(0x00), None);
        assert_eq!(Opcode::from_raw(Opcode::InstanceOf.raw() + 1), None);
        assert_eq!(Opcode::from_raw(u8::MAX), None);
    }

    #[test]
    fn operand_classes_do_not_overlap() {
        for op in Opcode::iter() {
            assert!(!(op.is_binary() && op.is_unary()), "{op}");
        }
        assert!(Opcode::Add.is_binary());
        assert!(Opcode::Cons.is_binary());
        assert!(Opcode::Car.is_unary());
        assert!(!Opcode::Ret.is_binary());
    }

    #[test]
    fn jumps_carry_branch_immediates() {
        for op in [Opcode::Jump, Opcode::Jz, Opcode::Jnz, Opcode::Jeq, Opcode::Jne] {
            assert!(op.is_jump());
            assert_eq!(op.immediates().width(), wisp_types::WORD_SIZE);
        }
        assert_eq!(Opcode::Invoke.immediates().width(), wisp_types::WORD_SIZE * 2);
        assert_eq!(Opcode::Ret.immediates().width(), 0);
    }
}

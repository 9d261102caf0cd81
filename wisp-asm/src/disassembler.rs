//! Textual rendering of encoded instruction streams.

use crate::{BytecodeDecoder, DecodeError, ImmediateLayout, Opcode};

use bitflags::bitflags;
use wisp_types::Word;

use core::fmt::Write;

bitflags! {
    /// Presentation switches for the [`Disassembler`].
    ///
    /// With no flags set the output is the canonical whitespace-normal
    /// form: one instruction per line, mnemonic first, immediates
    /// separated by single spaces.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DisassemblerOptions: u8 {
        /// Prefix every line with the instruction's byte offset.
        const SHOW_OFFSETS = 1 << 0;
        /// Append resolved-target comments to branch instructions and
        /// symbolized names to operands.
        const SHOW_COMMENTS = 1 << 1;
    }
}

/// Names operands for comment rendering: local indices against the
/// scope a unit was compiled with, object addresses against the live
/// runtime.
pub trait Symbolize {
    /// A name for the local at `index`, if the scope knows one.
    fn local(&self, index: usize) -> Option<String> {
        let _ = index;
        None
    }

    /// A rendering of the object at `address`, if it is live.
    fn object(&self, address: Word) -> Option<String> {
        let _ = address;
        None
    }
}

/// A [`Symbolize`] that names nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSymbols;

impl Symbolize for NoSymbols {}

/// Renders a code region back into assembly mnemonics.
#[derive(Debug, Default)]
pub struct Disassembler {
    options: DisassemblerOptions,
}

impl Disassembler {
    /// A disassembler emitting the canonical form.
    pub fn new() -> Self {
        Self::with_options(DisassemblerOptions::empty())
    }

    /// A disassembler with explicit presentation switches.
    pub fn with_options(options: DisassemblerOptions) -> Self {
        Self { options }
    }

    /// Render `bytes`, one instruction per line.
    pub fn disassemble(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        self.render(bytes, None, &NoSymbols)
    }

    /// Render `bytes` under a leading `label:` header.
    pub fn disassemble_labeled(&self, bytes: &[u8], label: &str) -> Result<String, DecodeError> {
        self.render(bytes, Some(label), &NoSymbols)
    }

    /// Render `bytes` with operand comments supplied by `symbols`.
    /// Comments require [`DisassemblerOptions::SHOW_COMMENTS`].
    pub fn disassemble_with(
        &self,
        bytes: &[u8],
        symbols: &dyn Symbolize,
    ) -> Result<String, DecodeError> {
        self.render(bytes, None, symbols)
    }

    fn render(
        &self,
        bytes: &[u8],
        label: Option<&str>,
        symbols: &dyn Symbolize,
    ) -> Result<String, DecodeError> {
        let comments = self.options.contains(DisassemblerOptions::SHOW_COMMENTS);
        let mut out = String::new();
        if let Some(label) = label {
            let _ = writeln!(out, "{label}:");
        }
        let mut decoder = BytecodeDecoder::new(bytes);
        while decoder.has_next() {
            let pos = decoder.position();
            let op = decoder.next_op()?;
            if self.options.contains(DisassemblerOptions::SHOW_OFFSETS) {
                let _ = write!(out, "{pos:04}: ");
            }
            out.push_str(op.mnemonic());
            match op.immediates() {
                ImmediateLayout::None => {
                    if comments {
                        if let Some(index) = Self::short_local_index(op) {
                            Self::comment(&mut out, symbols.local(index));
                        }
                    }
                }
                ImmediateLayout::Word => {
                    let value = decoder.next_word()?;
                    match op {
                        // addresses render in hex, counts and indices
                        // in decimal
                        Opcode::PushQ
                        | Opcode::Cast
                        | Opcode::CheckInstance
                        | Opcode::LoadField
                        | Opcode::StoreField => {
                            let _ = write!(out, " {value:#x}");
                            if comments {
                                Self::comment(&mut out, symbols.object(value));
                            }
                        }
                        Opcode::LoadLocal | Opcode::StoreLocal => {
                            let _ = write!(out, " {value}");
                            if comments {
                                Self::comment(&mut out, symbols.local(value as usize));
                            }
                        }
                        _ => {
                            let _ = write!(out, " {value}");
                        }
                    }
                }
                ImmediateLayout::AddressAndCount => {
                    let address = decoder.next_word()?;
                    let count = decoder.next_word()?;
                    let _ = write!(out, " {address:#x} {count}");
                    if comments {
                        Self::comment(&mut out, symbols.object(address));
                    }
                }
                ImmediateLayout::Branch => {
                    let slot = decoder.position();
                    let offset = decoder.next_sword()?;
                    let _ = write!(out, " {offset}");
                    if comments {
                        let target = slot as i64 + offset;
                        let _ = write!(out, " ; -> {target}");
                    }
                }
            }
            out.push('\n');
        }
        Ok(out)
    }

    fn comment(out: &mut String, text: Option<String>) {
        if let Some(text) = text {
            let _ = write!(out, " ; {text}");
        }
    }

    const fn short_local_index(op: Opcode) -> Option<usize> {
        match op {
            Opcode::LoadLocal0 | Opcode::StoreLocal0 => Some(0),
            Opcode::LoadLocal1 | Opcode::StoreLocal1 => Some(1),
            Opcode::LoadLocal2 | Opcode::StoreLocal2 => Some(2),
            Opcode::LoadLocal3 | Opcode::StoreLocal3 => Some(3),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{Assembler, Label};

    #[test]
    fn canonical_form_matches_the_emitted_program() {
        let mut asm = Assembler::new();
        asm.pushi(10);
        asm.pushi(32);
        asm.add();
        asm.ret();
        let region = asm.assemble();

        let text = Disassembler::new().disassemble(region.as_bytes()).unwrap();
        assert_eq!(text, "pushi 10\npushi 32\nadd\nret\n");
    }

    #[test]
    fn short_local_forms_render_without_an_index() {
        let mut asm = Assembler::new();
        asm.load_local(2);
        asm.store_local(7);
        let region = asm.assemble();

        let text = Disassembler::new().disassemble(region.as_bytes()).unwrap();
        assert_eq!(text, "load_local2\nstore_local 7\n");
    }

    #[test]
    fn branch_comments_resolve_targets() {
        let mut asm = Assembler::new();
        let mut done = Label::new();
        asm.jeq(&mut done);
        asm.nop();
        asm.bind(&mut done);
        asm.ret();
        let region = asm.assemble();

        let text = Disassembler::with_options(DisassemblerOptions::SHOW_COMMENTS)
            .disassemble(region.as_bytes())
            .unwrap();
        assert_eq!(text, "jeq 9 ; -> 10\nnop\nret\n");
    }

    #[test]
    fn labeled_rendering_prefixes_the_header() {
        let mut asm = Assembler::new();
        asm.ret();
        let region = asm.assemble();

        let text = Disassembler::new()
            .disassemble_labeled(region.as_bytes(), "entry")
            .unwrap();
        assert_eq!(text, "entry:\nret\n");
    }

    #[test]
    fn symbolized_operands_carry_name_comments() {
        struct Names;

        impl Symbolize for Names {
            fn local(&self, index: usize) -> Option<String> {
                ["x", "y"].get(index).map(|name| name.to_string())
            }

            fn object(&self, address: Word) -> Option<String> {
                (address == 0x1000).then(|| "String".to_string())
            }
        }

        let mut asm = Assembler::new();
        asm.load_local(1);
        asm.store_local(4);
        asm.check_instance(0x1000);
        asm.pushq(0x2000);
        let region = asm.assemble();

        let text = Disassembler::with_options(DisassemblerOptions::SHOW_COMMENTS)
            .disassemble_with(region.as_bytes(), &Names)
            .unwrap();
        assert_eq!(
            text,
            "load_local1 ; y\nstore_local 4\ncheckinstance 0x1000 ; String\npushq 0x2000\n"
        );
    }
}

//! Wisp bytecode: the instruction set, the assembler that produces it
//! and the decoder/disassembler that read it back.
//!
//! The encoding is byte-oriented: every instruction starts with a
//! one-byte [`Opcode`], followed by zero or more machine-word
//! immediates in native little-endian order. Branch instructions carry
//! a signed word offset relative to the immediate slot itself; the
//! [`Assembler`] resolves forward references through a linked chain
//! threaded through the unpatched slots (see [`Label`]).

#![warn(missing_docs)]

mod assembler;
mod buffer;
mod decoder;
mod disassembler;
mod label;
mod opcode;
mod region;

pub use assembler::Assembler;
pub use buffer::AssemblerBuffer;
pub use decoder::{BytecodeDecoder, DecodeError};
pub use disassembler::{Disassembler, DisassemblerOptions, NoSymbols, Symbolize};
pub use label::Label;
pub use opcode::{ImmediateLayout, Opcode, RawOpcode};
pub use region::Region;

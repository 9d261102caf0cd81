//! Streaming reader over an encoded instruction stream.

use crate::{Opcode, RawOpcode};

use thiserror::Error;
use wisp_types::{SWord, Word, WORD_SIZE};

/// Malformed byte stream diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A byte that is not a valid opcode where one was expected.
    #[error("invalid opcode 0x{byte:02x} at offset {pos}")]
    InvalidOpcode {
        /// The offending byte.
        byte: RawOpcode,
        /// Offset of the byte in the stream.
        pos: usize,
    },
    /// The stream ends inside an immediate.
    #[error("truncated immediate at offset {pos}")]
    TruncatedImmediate {
        /// Offset at which the immediate was expected.
        pos: usize,
    },
}

/// Decodes opcodes and immediates out of an encoded region.
#[derive(Debug)]
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    /// Decode from the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current offset into the stream.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether any bytes remain.
    pub fn has_next(&self) -> bool {
        self.pos < self.bytes.len()
    }

    /// Decode the opcode at the current offset.
    pub fn next_op(&mut self) -> Result<Opcode, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::TruncatedImmediate { pos: self.pos })?;
        let op = Opcode::from_raw(byte).ok_or(DecodeError::InvalidOpcode {
            byte,
            pos: self.pos,
        })?;
        self.pos += 1;
        Ok(op)
    }

    /// Decode an unsigned word immediate.
    pub fn next_word(&mut self) -> Result<Word, DecodeError> {
        let end = self.pos + WORD_SIZE;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::TruncatedImmediate { pos: self.pos })?;
        self.pos = end;
        Ok(Word::from_le_bytes(slice.try_into().expect("word-sized slice")))
    }

    /// Decode a signed word immediate.
    pub fn next_sword(&mut self) -> Result<SWord, DecodeError> {
        self.next_word().map(|word| word as SWord)
    }
}

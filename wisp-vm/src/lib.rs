//! The Wisp execution engine: object model, class registry, local
//! scopes, flow-graph compiler, tracing interpreter and native bridge
//! over the moving heap of `wisp-heap` and the bytecode of `wisp-asm`.
//!
//! All state is carried by a [`Runtime`] value; tests and embedders
//! create as many independent runtimes as they like. Guest failures
//! are in-band `Error` objects on the operand stack; host misuse is a
//! [`VmError`]; broken invariants are fatal.

mod argument;
mod compiler;
mod error;
mod frame;
mod interpreter;
mod ir;
mod natives;
mod object;
mod procedure;
mod runtime;
mod scope;

pub use argument::{Argument, ArgumentSet};
pub use compiler::FlowGraphCompiler;
pub use error::VmError;
pub use frame::{FrameTarget, Ip, StackFrame};
pub use ir::{
    BinaryOp, Block, BlockId, BlockKind, Condition, Constant, FlowGraph, Instr, Terminator,
    UnaryOp,
};
pub use object::{ObjectKind, Ref};
pub use procedure::{CodeId, CodeUnit, LambdaData, MacroData, NativeData, NativeFn, NativeId, ScriptData};
pub use runtime::{FrontEnd, Runtime, RuntimeParams};
pub use scope::{LocalScope, LocalVariable, ScopeArena, ScopeId};

// the heap configuration travels with the runtime parameters
pub use wisp_heap::HeapConfig;

pub mod prelude {
    //! Everything an embedder typically needs.
    #[doc(no_inline)]
    pub use wisp_asm::{Assembler, Disassembler, Label, Opcode, Region};

    pub use crate::{
        Argument, ArgumentSet, BinaryOp, BlockKind, Condition, Constant, FlowGraph, FlowGraphCompiler,
        FrontEnd, HeapConfig, Instr, ObjectKind, Ref, Runtime, RuntimeParams, ScopeId, Terminator,
        UnaryOp, VmError,
    };
}

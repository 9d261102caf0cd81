//! Lowering of flow graphs to bytecode.
//!
//! Compilation is block-first: every block gets a label; each block
//! emits its straight-line instructions, then its terminator. A branch
//! emits the conditional jump toward its false/join label, inlines the
//! true block, then the false block when present, then the join block,
//! binding each label exactly once. Per-instruction lowering is a
//! direct one-op-per-node mapping onto the assembler.

use crate::ir::{BinaryOp, BlockId, Condition, Constant, FlowGraph, Instr, Terminator, UnaryOp};
use crate::object::{self, ObjectKind, Ref};
use crate::scope::ScopeId;

use wisp_asm::{Assembler, Label, Region};
use wisp_types::Word;

/// One-shot compiler from a [`FlowGraph`] to a [`Region`].
#[derive(Debug)]
pub struct FlowGraphCompiler {
    scope: ScopeId,
    assembler: Assembler,
    labels: Vec<Label>,
    compiled: Vec<bool>,
}

impl FlowGraphCompiler {
    /// A compiler resolving against `scope`. The scope has no runtime
    /// effect; it only lets the disassembler render local indices as
    /// names.
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            assembler: Assembler::new(),
            labels: Vec::new(),
            compiled: Vec::new(),
        }
    }

    /// The scope the unit was compiled against.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Lower `graph` to an executable region.
    ///
    /// # Panics
    /// When a block is reachable through two chain positions or two
    /// branch inlines; every label must be bound exactly once.
    pub fn compile(mut self, graph: &FlowGraph) -> Region {
        self.labels = vec![Label::new(); graph.num_blocks()];
        self.compiled = vec![false; graph.num_blocks()];

        for index in 0..graph.chain().len() {
            let block = graph.chain()[index];
            self.compile_block(graph, block);
        }
        self.assembler.assemble()
    }

    fn compile_block(&mut self, graph: &FlowGraph, id: BlockId) {
        assert!(!self.compiled[id.0], "block {id:?} emitted twice");
        self.compiled[id.0] = true;

        let mut label = self.labels[id.0];
        self.assembler.bind(&mut label);
        self.labels[id.0] = label;

        for instr in graph.block(id).instrs() {
            self.compile_instr(*instr);
        }
        self.compile_terminator(graph, graph.block(id).terminator());
    }

    fn compile_instr(&mut self, instr: Instr) {
        let asm = &mut self.assembler;
        match instr {
            Instr::Constant(constant) => Self::push_constant(asm, constant),
            Instr::LoadLocal(index) => asm.load_local(index as Word),
            Instr::StoreLocal(index) => asm.store_local(index as Word),
            Instr::Binary(op) => match op {
                BinaryOp::Add => asm.add(),
                BinaryOp::Sub => asm.sub(),
                BinaryOp::Mul => asm.mul(),
                BinaryOp::Div => asm.div(),
                BinaryOp::Mod => asm.modulus(),
                BinaryOp::Eq => asm.eq(),
                BinaryOp::And => asm.band(),
                BinaryOp::Or => asm.bor(),
                BinaryOp::Gt => asm.gt(),
                BinaryOp::Gte => asm.gte(),
                BinaryOp::Lt => asm.lt(),
                BinaryOp::Lte => asm.lte(),
                BinaryOp::Cons => asm.cons(),
                BinaryOp::InstanceOf => asm.instance_of(),
            },
            Instr::Unary(op) => match op {
                UnaryOp::Not => asm.not(),
                UnaryOp::Car => asm.car(),
                UnaryOp::Cdr => asm.cdr(),
                UnaryOp::IsNull => asm.is_null(),
                UnaryOp::IsNonNull => asm.is_non_null(),
            },
            Instr::Invoke { lambda, num_args } => {
                asm.invoke(lambda.address() as Word, num_args as Word);
            }
            Instr::InvokeNative { native, num_args } => {
                asm.invoke_native(native.address() as Word, num_args as Word);
            }
            Instr::InvokeDynamic { num_args } => asm.invoke_dynamic(num_args as Word),
            Instr::Lookup => asm.lookup(),
            Instr::Cast(class) => asm.cast_to(class.address() as Word),
            Instr::CheckInstance(class) => asm.check_instance(class.address() as Word),
            Instr::New { class, num_args } => {
                asm.new_instance(class.address() as Word, num_args as Word);
            }
            Instr::LoadField(field) => asm.load_field(field.address() as Word),
            Instr::StoreField(field) => asm.store_field(field.address() as Word),
            Instr::Throw => asm.throw(),
        }
    }

    /// Canonical constant lowering: null, the Bool singletons and
    /// Longs use the dedicated push opcodes, everything else is pushed
    /// by address.
    fn push_constant(asm: &mut Assembler, constant: Constant) {
        match constant {
            Constant::Null => asm.pushn(),
            Constant::True => asm.pusht(),
            Constant::False => asm.pushf(),
            Constant::Long(value) => asm.pushi(value as Word),
            Constant::Object(object) => {
                if object.is_unallocated() {
                    asm.pushn();
                    return;
                }
                match object::kind_of(object) {
                    ObjectKind::Long => asm.pushi(object::long_value(object) as Word),
                    ObjectKind::Bool if object::bool_value(object) => asm.pusht(),
                    ObjectKind::Bool => asm.pushf(),
                    ObjectKind::Pair if object::is_null(object) => asm.pushn(),
                    _ => asm.pushq(object.address() as Word),
                }
            }
        }
    }

    fn compile_terminator(&mut self, graph: &FlowGraph, terminator: Terminator) {
        match terminator {
            Terminator::Return => self.assembler.ret(),
            Terminator::Goto(target) => {
                let mut label = self.labels[target.0];
                self.assembler.jmp(&mut label);
                self.labels[target.0] = label;
            }
            Terminator::Branch {
                condition,
                true_target,
                false_target,
                join,
            } => {
                // the conditional jump leaves the inlined true path
                // toward the false block, or straight to the join when
                // there is none
                let out = false_target.unwrap_or(join);
                let mut label = self.labels[out.0];
                match condition {
                    Condition::Truthy => self.assembler.jnz(&mut label),
                    Condition::Equal => self.assembler.jne(&mut label),
                }
                self.labels[out.0] = label;

                self.compile_block(graph, true_target);
                if let Some(false_target) = false_target {
                    self.compile_block(graph, false_target);
                }
                self.compile_block(graph, join);
            }
        }
    }
}

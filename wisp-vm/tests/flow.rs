//! Flow-graph lowering and call adaptation.

use wisp_vm::{
    Argument, ArgumentSet, BinaryOp, BlockKind, Condition, Constant, FlowGraph, FrontEnd, Instr,
    Ref, Runtime, ScopeId, Terminator, UnaryOp, VmError,
};

/// A stand-in for the out-of-scope parser: understands `<a>+<b>` only.
struct AdditionFrontEnd;

impl FrontEnd for AdditionFrontEnd {
    fn parse(
        &mut self,
        runtime: &mut Runtime,
        source: &str,
    ) -> Result<(FlowGraph, ScopeId), String> {
        let (left, right) = source
            .split_once('+')
            .ok_or_else(|| format!("expected `a+b`, got `{source}`"))?;
        let left: i64 = left.trim().parse().map_err(|_| "bad left operand".to_string())?;
        let right: i64 = right
            .trim()
            .parse()
            .map_err(|_| "bad right operand".to_string())?;

        let mut graph = FlowGraph::new();
        let entry = graph.add_chain_block(BlockKind::Target);
        graph.push_instr(entry, Instr::Constant(Constant::Long(left)));
        graph.push_instr(entry, Instr::Constant(Constant::Long(right)));
        graph.push_instr(entry, Instr::Binary(BinaryOp::Add));
        graph.set_terminator(entry, Terminator::Return);

        let init_scope = runtime.init_scope();
        let scope = runtime.scopes_mut().new_scope(Some(init_scope));
        Ok((graph, scope))
    }
}

#[test]
fn eval_composes_with_an_installed_front_end() {
    let mut runtime = Runtime::new();
    assert_eq!(runtime.eval("1 + 2"), Err(VmError::NoFrontEnd));

    runtime.set_front_end(Box::new(AdditionFrontEnd));
    let result = runtime.eval("40 + 2").unwrap();
    assert_eq!(runtime.long(result), Some(42));

    let failure = runtime.eval("nonsense");
    assert!(matches!(failure, Err(VmError::FrontEnd(_))));
}

#[test]
fn straight_line_graph_lowers_to_the_canonical_ops() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    graph.push_instr(entry, Instr::Constant(Constant::Long(10)));
    graph.push_instr(entry, Instr::Constant(Constant::Long(32)));
    graph.push_instr(entry, Instr::Binary(BinaryOp::Add));
    graph.set_terminator(entry, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    assert_eq!(
        runtime.disassemble(script).unwrap(),
        "pushi 10\npushi 32\nadd\nret\n"
    );
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.long(result), Some(42));
}

#[test]
fn constant_lowering_picks_the_dedicated_pushes() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    graph.push_instr(entry, Instr::Constant(Constant::Null));
    graph.push_instr(entry, Instr::Constant(Constant::True));
    graph.push_instr(entry, Instr::Constant(Constant::False));
    graph.push_instr(entry, Instr::Constant(Constant::Long(5)));
    graph.set_terminator(entry, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    assert_eq!(
        runtime.disassemble(script).unwrap(),
        "pushn\npusht\npushf\npushi 5\nret\n"
    );
}

#[test]
fn boxed_constants_push_by_address() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));
    let text = runtime.new_string("hello");

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    graph.push_instr(entry, Instr::Constant(Constant::Object(text)));
    graph.set_terminator(entry, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    let expected = format!("pushq {:#x}\nret\n", text.address());
    assert_eq!(runtime.disassemble(script).unwrap(), expected);
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.string(result), Some("hello"));
}

#[test]
fn goto_jumps_forward_across_a_chain_block() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    let skipped = graph.add_chain_block(BlockKind::Target);
    let target = graph.add_chain_block(BlockKind::Join);

    graph.set_terminator(entry, Terminator::Goto(target));
    graph.push_instr(skipped, Instr::Constant(Constant::Long(99)));
    graph.set_terminator(skipped, Terminator::Return);
    graph.push_instr(target, Instr::Constant(Constant::Long(7)));
    graph.set_terminator(target, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.long(result), Some(7));
}

/// The branch layout of §4.6: the conditional jump targets the false
/// block, so a firing test selects the false path and a failing test
/// falls through into the inlined true path.
#[test]
fn branch_layout_inlines_true_false_then_join() {
    for (test, expected) in [(Constant::True, 3), (Constant::False, 2)] {
        let mut runtime = Runtime::new();
        let init_scope = runtime.init_scope();
        let scope = runtime.scopes_mut().new_scope(Some(init_scope));

        let mut graph = FlowGraph::new();
        let entry = graph.add_chain_block(BlockKind::Target);
        let true_target = graph.add_block(BlockKind::Target);
        let false_target = graph.add_block(BlockKind::Target);
        let join = graph.add_block(BlockKind::Join);

        graph.push_instr(entry, Instr::Constant(test));
        graph.set_terminator(
            entry,
            Terminator::Branch {
                condition: Condition::Truthy,
                true_target,
                false_target: Some(false_target),
                join,
            },
        );
        graph.push_instr(true_target, Instr::Constant(Constant::Long(2)));
        graph.set_terminator(true_target, Terminator::Goto(join));
        graph.push_instr(false_target, Instr::Constant(Constant::Long(3)));
        graph.set_terminator(false_target, Terminator::Goto(join));
        graph.set_terminator(join, Terminator::Return);

        let script = runtime.new_script(&graph, scope);
        let result = runtime.exec(script).unwrap();
        assert_eq!(runtime.long(result), Some(expected), "test={test:?}");
    }
}

#[test]
fn branch_without_a_false_block_jumps_to_the_join() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    let true_target = graph.add_block(BlockKind::Target);
    let join = graph.add_block(BlockKind::Join);

    graph.push_instr(entry, Instr::Constant(Constant::False));
    graph.set_terminator(
        entry,
        Terminator::Branch {
            condition: Condition::Truthy,
            true_target,
            false_target: None,
            join,
        },
    );
    graph.push_instr(true_target, Instr::Constant(Constant::Long(1)));
    graph.set_terminator(true_target, Terminator::Goto(join));
    graph.push_instr(join, Instr::Constant(Constant::Long(10)));
    graph.set_terminator(join, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    let result = runtime.exec(script).unwrap();
    // the failing test falls into the true path, then meets the join
    assert_eq!(runtime.long(result), Some(10));
    assert_eq!(runtime.stack_depth(), 0);

    let text = runtime.disassemble(script).unwrap();
    assert!(text.starts_with("pushf\njnz "), "unexpected prefix: {text}");
}

#[test]
fn equality_branches_lower_to_jne() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    let true_target = graph.add_block(BlockKind::Target);
    let join = graph.add_block(BlockKind::Join);

    graph.push_instr(entry, Instr::Constant(Constant::Long(4)));
    graph.push_instr(entry, Instr::Constant(Constant::Long(4)));
    graph.push_instr(entry, Instr::Binary(BinaryOp::Sub));
    graph.set_terminator(
        entry,
        Terminator::Branch {
            condition: Condition::Equal,
            true_target,
            false_target: None,
            join,
        },
    );
    graph.push_instr(true_target, Instr::Constant(Constant::Long(1)));
    graph.set_terminator(true_target, Terminator::Goto(join));
    graph.set_terminator(join, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    let text = runtime.disassemble(script).unwrap();
    assert!(text.contains("jne "), "expected a jne in: {text}");
    // 4 - 4 is zero: jne does not fire, the true path runs
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.long(result), Some(1));
}

#[test]
fn unary_ops_lower_one_to_one() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    graph.push_instr(entry, Instr::Constant(Constant::Long(1)));
    graph.push_instr(entry, Instr::Constant(Constant::Long(2)));
    graph.push_instr(entry, Instr::Binary(BinaryOp::Cons));
    graph.push_instr(entry, Instr::Unary(UnaryOp::Car));
    graph.set_terminator(entry, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    assert_eq!(
        runtime.disassemble(script).unwrap(),
        "pushi 1\npushi 2\ncons\ncar\nret\n"
    );
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.long(result), Some(1));
}

#[test]
fn annotated_disassembly_names_locals_and_classes() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));
    runtime.scopes_mut().add(scope, "counter", Ref::NULL);
    let string_class = runtime.find_class("String").unwrap();

    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    graph.push_instr(entry, Instr::Constant(Constant::Long(1)));
    graph.push_instr(entry, Instr::StoreLocal(0));
    graph.push_instr(entry, Instr::LoadLocal(0));
    graph.push_instr(entry, Instr::CheckInstance(string_class));
    graph.set_terminator(entry, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    let text = runtime.disassemble_annotated(script).unwrap();
    assert!(text.contains("store_local0 ; counter"), "{text}");
    assert!(text.contains("load_local0 ; counter"), "{text}");
    assert!(text.contains("; String"), "{text}");
}

#[test]
fn graph_invocation_adapts_arguments() {
    let mut runtime = Runtime::new();

    // inc = (lambda (x) (+ x 1))
    let init_scope = runtime.init_scope();
    let lambda_scope = runtime.scopes_mut().new_scope(Some(init_scope));
    let mut body = FlowGraph::new();
    let entry = body.add_chain_block(BlockKind::Target);
    body.push_instr(entry, Instr::LoadLocal(0));
    body.push_instr(entry, Instr::Constant(Constant::Long(1)));
    body.push_instr(entry, Instr::Binary(BinaryOp::Add));
    body.set_terminator(entry, Terminator::Return);
    let args: ArgumentSet = [Argument::required(0, "x")].into_iter().collect();
    let inc = runtime.new_lambda(Some("inc"), args, lambda_scope, &body);

    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));
    let mut graph = FlowGraph::new();
    let entry = graph.add_chain_block(BlockKind::Target);
    graph.push_instr(entry, Instr::Constant(Constant::Long(41)));
    graph.push_instr(
        entry,
        Instr::Invoke {
            lambda: inc,
            num_args: 1,
        },
    );
    graph.set_terminator(entry, Terminator::Return);

    let script = runtime.new_script(&graph, scope);
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.long(result), Some(42));
}

#[test]
fn vararg_and_optional_adaptation() {
    let mut runtime = Runtime::new();
    let shape = runtime
        .link_native(
            "shape",
            [
                Argument::required(0, "a"),
                Argument::optional(1, "b"),
                Argument::vararg(2, "rest"),
            ]
            .into_iter()
            .collect(),
            |runtime, args| {
                let list = runtime.new_list(args);
                runtime.push(list);
                true
            },
        )
        .unwrap();

    // one actual: optional is null-padded, the rest list is empty
    let one = runtime.new_long(1);
    let result = runtime.call_pop(shape, &[one]).unwrap();
    let a = runtime.car(result).unwrap();
    assert_eq!(runtime.long(a), Some(1));
    let b = runtime.car(runtime.cdr(result).unwrap()).unwrap();
    assert!(runtime.is_null(b));
    let rest = runtime
        .car(runtime.cdr(runtime.cdr(result).unwrap()).unwrap())
        .unwrap();
    assert!(runtime.is_null(rest));

    // four actuals: the tail lands in the rest list, in order
    let actuals: Vec<Ref> = (1..=4).map(|value| runtime.new_long(value)).collect();
    // re-box the actuals as arguments; call re-pushes them
    let result = runtime.call_pop(shape, &actuals).unwrap();
    let rest = runtime
        .car(runtime.cdr(runtime.cdr(result).unwrap()).unwrap())
        .unwrap();
    let third = runtime.car(rest).unwrap();
    let fourth = runtime.car(runtime.cdr(rest).unwrap()).unwrap();
    assert_eq!(runtime.long(third), Some(3));
    assert_eq!(runtime.long(fourth), Some(4));
    assert!(runtime.is_null(runtime.cdr(runtime.cdr(rest).unwrap()).unwrap()));
}

#[test]
fn missing_required_argument_is_an_arity_error() {
    let mut runtime = Runtime::new();
    let strict = runtime
        .link_native(
            "strict",
            [Argument::required(0, "value")].into_iter().collect(),
            |runtime, args| {
                runtime.push(args[0]);
                true
            },
        )
        .unwrap();

    let result = runtime.call_pop(strict, &[]).unwrap();
    assert!(runtime.is_error(result));
    assert!(runtime.error_message(result).unwrap().contains("value"));
}

#[test]
fn surplus_arguments_without_a_vararg_are_rejected() {
    let mut runtime = Runtime::new();
    let unary = runtime
        .link_native(
            "unary",
            [Argument::required(0, "x")].into_iter().collect(),
            |runtime, args| {
                runtime.push(args[0]);
                true
            },
        )
        .unwrap();

    let one = runtime.new_long(1);
    let two = runtime.new_long(2);
    let result = runtime.call_pop(unary, &[one, two]).unwrap();
    assert!(runtime.is_error(result));
    assert!(runtime
        .error_message(result)
        .unwrap()
        .contains("too many arguments"));
}

#[test]
fn instance_checks_follow_the_parent_chain() {
    let mut runtime = Runtime::new();
    let values = [
        runtime.new_long(1),
        runtime.new_double(1.5),
        runtime.new_string("s"),
        runtime.bool_ref(true),
    ];
    // reflexive on the value's own class
    for value in values {
        let class = runtime.class_of(value);
        assert!(runtime.is_instance_of(value, class));
        // and transitive through every ancestor
        let object = runtime.find_class("Object").unwrap();
        assert!(runtime.is_instance_of(value, object));
    }

    let long = runtime.new_long(1);
    let number = runtime.find_class("Number").unwrap();
    let string = runtime.find_class("String").unwrap();
    assert!(runtime.is_instance_of(long, number));
    assert!(!runtime.is_instance_of(long, string));
}

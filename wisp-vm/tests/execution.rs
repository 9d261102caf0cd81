//! End-to-end execution over hand-assembled regions.

use test_case::test_case;
use wisp_asm::{Assembler, Label, Opcode};
use wisp_vm::{Argument, ArgumentSet, Runtime};

fn exec(runtime: &mut Runtime, assemble: impl FnOnce(&mut Assembler)) -> wisp_vm::Ref {
    let mut asm = Assembler::new();
    assemble(&mut asm);
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));
    let script = runtime.new_script_with_region(asm.assemble(), scope);
    runtime.exec(script).expect("script executes")
}

#[test]
fn arithmetic_leaves_the_sum_on_top() {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        asm.pushi(10);
        asm.pushi(32);
        asm.add();
        asm.ret();
    });
    assert_eq!(runtime.long(result), Some(42));
    assert_eq!(runtime.stack_depth(), 0);
}

#[test_case(10, 32, Opcode::Add => 42 ; "addition")]
#[test_case(50, 8, Opcode::Sub => 42 ; "subtraction")]
#[test_case(6, 7, Opcode::Mul => 42 ; "multiplication")]
#[test_case(126, 3, Opcode::Div => 42 ; "division")]
#[test_case(142, 100, Opcode::Mod => 42 ; "modulus")]
#[test_case(7, 2, Opcode::Div => 3 ; "integer division truncates")]
fn binary_arithmetic(left: u64, right: u64, op: Opcode) -> i64 {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        asm.pushi(left);
        asm.pushi(right);
        asm.emit_op(op);
        asm.ret();
    });
    runtime.long(result).expect("a Long result")
}

#[test_case(3, 4, Opcode::Gt => false ; "greater than")]
#[test_case(4, 4, Opcode::Gte => true ; "greater or equal")]
#[test_case(3, 4, Opcode::Lt => true ; "less than")]
#[test_case(5, 4, Opcode::Lte => false ; "less or equal")]
fn comparisons_box_booleans(left: u64, right: u64, op: Opcode) -> bool {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        asm.pushi(left);
        asm.pushi(right);
        asm.emit_op(op);
        asm.ret();
    });
    runtime.boolean(result).expect("a Bool result")
}

#[test]
fn division_by_zero_is_an_in_band_error() {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        asm.pushi(1);
        asm.pushi(0);
        asm.div();
        asm.ret();
    });
    assert!(runtime.is_error(result));
    assert_eq!(runtime.error_message(result), Some("division by zero"));
}

#[test]
fn non_numeric_operands_error_in_band() {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        asm.pusht();
        asm.pushi(1);
        asm.add();
        asm.ret();
    });
    assert!(runtime.is_error(result));
    assert!(runtime.error_message(result).unwrap().contains("Number"));
}

#[test]
fn jeq_is_not_taken_on_a_nonzero_difference() {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        let mut done = Label::new();
        asm.pushi(10);
        asm.pushi(11);
        asm.sub();
        asm.jeq(&mut done);
        asm.pushi(1);
        asm.pushi(2);
        asm.add();
        asm.bind(&mut done);
        asm.ret();
    });
    assert_eq!(runtime.long(result), Some(3));
}

#[test]
fn jeq_is_taken_on_a_zero_difference() {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        let mut done = Label::new();
        asm.pushi(11);
        asm.pushi(11);
        asm.sub();
        asm.jeq(&mut done);
        asm.pushi(1);
        asm.pushi(2);
        asm.add();
        asm.bind(&mut done);
        asm.ret();
    });
    // the skipped path never runs, so the final value is whatever the
    // stack holds: nothing, which reads as null
    assert!(runtime.is_null(result));
}

#[test]
fn truth_test_branches_consume_the_operand() {
    let mut runtime = Runtime::new();
    // jz falls through on a truthy Long, even zero-adjacent ones
    let result = exec(&mut runtime, |asm| {
        let mut skip = Label::new();
        asm.pushi(0);
        asm.jz(&mut skip);
        asm.pushi(1);
        asm.bind(&mut skip);
        asm.ret();
    });
    // Long(0) is truthy: only Bool(false) and null fail the test
    assert_eq!(runtime.long(result), Some(1));

    let result = exec(&mut runtime, |asm| {
        let mut skip = Label::new();
        asm.pushf();
        asm.jz(&mut skip);
        asm.pushi(1);
        asm.ret();
        asm.bind(&mut skip);
        asm.pushi(2);
        asm.ret();
    });
    assert_eq!(runtime.long(result), Some(2));
}

#[test]
fn backward_jump_forms_a_countdown_loop() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));
    runtime.scopes_mut().add(scope, "n", wisp_vm::Ref::NULL);

    let mut asm = Assembler::new();
    let mut top = Label::new();
    let mut done = Label::new();
    // n = 5; while (n != 0) n = n - 1; return n
    asm.pushi(5);
    asm.store_local(0);
    asm.bind(&mut top);
    asm.load_local(0);
    asm.jeq(&mut done);
    asm.load_local(0);
    asm.pushi(1);
    asm.sub();
    asm.store_local(0);
    asm.jmp(&mut top);
    asm.bind(&mut done);
    asm.load_local(0);
    asm.ret();

    let script = runtime.new_script_with_region(asm.assemble(), scope);
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.long(result), Some(0));
}

#[test]
fn native_invocation_doubles_through_the_bridge() {
    let mut runtime = Runtime::new();
    let double = runtime
        .link_native(
            "double",
            [Argument::required(0, "x")].into_iter().collect(),
            |runtime, args| match runtime.long(args[0]) {
                Some(value) => {
                    let result = runtime.new_long(2 * value);
                    runtime.push(result);
                    true
                }
                None => {
                    let message = format!("expected a Long, got `{}`", runtime.display(args[0]));
                    runtime.push_error(&message);
                    false
                }
            },
        )
        .unwrap();

    let address = double.address() as u64;
    let result = exec(&mut runtime, |asm| {
        asm.pushi(21);
        asm.invoke_native(address, 1);
        asm.ret();
    });
    assert_eq!(runtime.long(result), Some(42));
}

#[test]
fn native_argument_check_reports_in_band() {
    let mut runtime = Runtime::new();
    let double = runtime
        .link_native(
            "strict/double",
            [Argument::required(0, "x")].into_iter().collect(),
            |runtime, args| match runtime.long(args[0]) {
                Some(value) => {
                    let result = runtime.new_long(2 * value);
                    runtime.push(result);
                    true
                }
                None => {
                    let message = format!("expected a Long, got `{}`", runtime.display(args[0]));
                    runtime.push_error(&message);
                    false
                }
            },
        )
        .unwrap();

    let address = double.address() as u64;
    let result = exec(&mut runtime, |asm| {
        asm.pusht();
        asm.invoke_native(address, 1);
        asm.ret();
    });
    assert!(runtime.is_error(result));
    assert!(runtime.error_message(result).unwrap().contains("Long"));
}

#[test]
fn checkinstance_failure_names_both_classes() {
    let mut runtime = Runtime::new();
    let string_class = runtime.find_class("String").unwrap().address() as u64;
    let result = exec(&mut runtime, |asm| {
        asm.pushi(7);
        asm.check_instance(string_class);
        asm.ret();
    });
    assert!(runtime.is_error(result));
    let message = runtime.error_message(result).unwrap();
    assert!(message.contains("String"), "expected class in: {message}");
    assert!(message.contains("Long"), "observed class in: {message}");
}

#[test]
fn checkinstance_accepts_subclasses() {
    let mut runtime = Runtime::new();
    let number_class = runtime.find_class("Number").unwrap().address() as u64;
    let result = exec(&mut runtime, |asm| {
        asm.pushi(7);
        asm.check_instance(number_class);
        asm.ret();
    });
    assert_eq!(runtime.long(result), Some(7));
}

#[test]
fn cons_car_cdr_roundtrip() {
    let mut runtime = Runtime::new();
    let pair = exec(&mut runtime, |asm| {
        asm.pushi(1);
        asm.pushi(2);
        asm.cons();
        asm.ret();
    });
    let car = runtime.car(pair).unwrap();
    let cdr = runtime.cdr(pair).unwrap();
    assert_eq!(runtime.long(car), Some(1));
    assert_eq!(runtime.long(cdr), Some(2));
}

#[test]
fn pair_equality_is_structural() {
    let mut runtime = Runtime::new();
    let self_eq = exec(&mut runtime, |asm| {
        asm.pushi(1);
        asm.pushi(2);
        asm.cons();
        asm.dup();
        asm.eq();
        asm.ret();
    });
    assert_eq!(runtime.boolean(self_eq), Some(true));

    let fresh_eq = exec(&mut runtime, |asm| {
        asm.pushi(1);
        asm.pushi(2);
        asm.cons();
        asm.pushi(1);
        asm.pushi(2);
        asm.cons();
        asm.eq();
        asm.ret();
    });
    assert_eq!(runtime.boolean(fresh_eq), Some(true));
}

#[test]
fn short_and_long_local_access_are_equivalent() {
    for force_long in [false, true] {
        let mut runtime = Runtime::new();
        let init_scope = runtime.init_scope();
        let scope = runtime.scopes_mut().new_scope(Some(init_scope));
        for name in ["a", "b", "c", "d", "e"] {
            runtime.scopes_mut().add(scope, name, wisp_vm::Ref::NULL);
        }

        let mut asm = Assembler::new();
        let mut store = |asm: &mut Assembler, index: u64| {
            if force_long {
                asm.emit_op(Opcode::StoreLocal);
                asm.emit_word(index);
            } else {
                asm.store_local(index);
            }
        };
        asm.pushi(7);
        store(&mut asm, 0);
        asm.pushi(9);
        store(&mut asm, 4);
        if force_long {
            asm.emit_op(Opcode::LoadLocal);
            asm.emit_word(0);
        } else {
            asm.load_local(0);
        }
        asm.load_local(4);
        asm.add();
        asm.ret();

        let script = runtime.new_script_with_region(asm.assemble(), scope);
        let result = runtime.exec(script).unwrap();
        assert_eq!(runtime.long(result), Some(16), "force_long={force_long}");
    }
}

#[test]
fn call_leaves_exactly_one_value_for_the_caller() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));
    let mut asm = Assembler::new();
    asm.load_local(0);
    asm.pushi(1);
    asm.add();
    asm.ret();
    let args: ArgumentSet = [Argument::required(0, "x")].into_iter().collect();
    let inc = runtime.new_lambda_with_region(Some("inc"), args, scope, asm.assemble());

    let depth_before = runtime.stack_depth();
    let value = runtime.new_long(41);
    runtime.call(inc, &[value]).unwrap();
    assert_eq!(runtime.stack_depth(), depth_before + 1);
    let result = runtime.pop().unwrap();
    assert_eq!(runtime.long(result), Some(42));
}

#[test]
fn nested_invocation_preserves_stack_discipline() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let scope = runtime.scopes_mut().new_scope(Some(init_scope));
    let mut asm = Assembler::new();
    asm.load_local(0);
    asm.pushi(1);
    asm.add();
    asm.ret();
    let args: ArgumentSet = [Argument::required(0, "x")].into_iter().collect();
    let inc = runtime.new_lambda_with_region(Some("inc"), args, scope, asm.assemble());
    let address = inc.address() as u64;

    // 1 + inc(41): operands below the call survive it
    let result = exec(&mut runtime, |asm| {
        asm.pushi(1);
        asm.pushi(41);
        asm.invoke(address, 1);
        asm.add();
        asm.ret();
    });
    assert_eq!(runtime.long(result), Some(43));
}

#[test]
fn invoking_a_non_procedure_is_an_in_band_error() {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        asm.pushi(3);
        asm.pushi(9);
        asm.invoke_dynamic(1);
        asm.ret();
    });
    assert!(runtime.is_error(result));
    assert!(runtime.error_message(result).unwrap().contains("Procedure"));
}

#[test]
fn throw_wraps_the_top_of_stack() {
    let mut runtime = Runtime::new();
    let result = exec(&mut runtime, |asm| {
        asm.pushi(3);
        asm.throw();
        asm.ret();
    });
    assert!(runtime.is_error(result));
    assert_eq!(runtime.error_message(result), Some("3"));
}

#[test]
fn cast_to_string_converts_the_value() {
    let mut runtime = Runtime::new();
    let string_class = runtime.find_class("String").unwrap().address() as u64;
    let result = exec(&mut runtime, |asm| {
        asm.pushi(7);
        asm.cast_to(string_class);
        asm.ret();
    });
    assert_eq!(runtime.string(result), Some("7"));
}

#[test]
fn cast_to_an_unrelated_class_errors_in_band() {
    let mut runtime = Runtime::new();
    let pair_class = runtime.find_class("Pair").unwrap().address() as u64;
    let result = exec(&mut runtime, |asm| {
        asm.pushi(7);
        asm.cast_to(pair_class);
        asm.ret();
    });
    assert!(runtime.is_error(result));
    assert!(runtime.error_message(result).unwrap().contains("Pair"));
}

#[test]
fn lookup_resolves_through_the_scope_chain() {
    let mut runtime = Runtime::new();
    let init_scope = runtime.init_scope();
    let outer = runtime.scopes_mut().new_scope(Some(init_scope));
    let answer = runtime.new_long(42);
    runtime.scopes_mut().add(outer, "answer", answer);
    let inner = runtime.scopes_mut().new_scope(Some(outer));

    let symbol = runtime.intern_symbol("answer");
    let address = symbol.address() as u64;
    let mut asm = Assembler::new();
    asm.pushq(address);
    asm.lookup();
    asm.ret();
    let script = runtime.new_script_with_region(asm.assemble(), inner);
    let result = runtime.exec(script).unwrap();
    assert_eq!(runtime.long(result), Some(42));
}

#[test]
fn lookup_of_an_unbound_symbol_errors_in_band() {
    let mut runtime = Runtime::new();
    let symbol = runtime.intern_symbol("no/such:name");
    let address = symbol.address() as u64;
    let result = exec(&mut runtime, |asm| {
        asm.pushq(address);
        asm.lookup();
        asm.ret();
    });
    assert!(runtime.is_error(result));
    assert!(runtime
        .error_message(result)
        .unwrap()
        .contains("no/such:name"));
}

use std::cell::RefCell;
use std::rc::Rc;

use cinder::bytecode::{Instruction, Opcode, Program, Role};
use cinder::lang::value::{StructValue, TypeTag, Value};
use cinder::runtime::{
    BuiltinRegistry, ErrorKind, Host, Phase, Severity, TimerHandle, VmBc, VmConfig,
};
use proptest::prelude::*;

type Log = Rc<RefCell<Vec<Value>>>;

/// Registry with a `log(Any)` builtin that records its argument.
fn logging_builtins() -> (BuiltinRegistry, Log) {
    let log: Log = Rc::default();
    let sink = log.clone();
    let mut builtins = BuiltinRegistry::new();
    builtins.register("log", vec![TypeTag::Any], false, move |args| {
        sink.borrow_mut().push(args[0].clone());
        Ok(None)
    });
    (builtins, log)
}

fn op(opcode: Opcode) -> Instruction {
    Instruction::new(opcode)
}

fn log_call() -> [Instruction; 2] {
    [Instruction::push("log"), Instruction::call_builtin(1)]
}

#[test]
fn simple_loop_logs_three_values_then_exits() {
    // i = 0; while i < 3 { log(i); i = i + 1 }
    let mut code = vec![
        Instruction::push(0).tagged("i"),
        Instruction::load(0),
        Instruction::push(3),
        op(Opcode::LogicLt),
        Instruction::with_offset(Opcode::JumpByIfFalse, 9),
        Instruction::load(0),
    ];
    code.extend(log_call());
    code.extend([
        Instruction::load(0),
        Instruction::push(1),
        op(Opcode::MathAdd),
        Instruction::store(0),
        Instruction::jump_by(-11),
        op(Opcode::Exit),
    ]);

    let (builtins, log) = logging_builtins();
    let mut vm = VmBc::new(Program::new(code), builtins, VmConfig::default()).unwrap();
    vm.run().unwrap();

    assert!(vm.exit_requested());
    assert_eq!(
        *log.borrow(),
        vec![Value::Int32(0), Value::Int32(1), Value::Int32(2)]
    );
    assert_eq!(vm.stack().values(), vec![Value::Int32(3)]);
}

#[test]
fn undefined_builtin_fails_after_popping_only_the_name() {
    let code = vec![
        Instruction::push(10),
        Instruction::push(20),
        Instruction::push("missing"),
        Instruction::call_builtin(2),
    ];
    let mut vm = VmBc::new(Program::new(code), BuiltinRegistry::new(), VmConfig::default()).unwrap();

    let err = vm.run().unwrap_err();
    assert_eq!(err.severity(), Severity::Runtime);
    assert!(err.to_string().contains("missing"));
    assert_eq!(err.position, Some(3));
    // the name is gone, both arguments are still there
    assert_eq!(vm.stack().values(), vec![Value::Int32(10), Value::Int32(20)]);
}

#[test]
fn list_index_at_length_is_a_runtime_error() {
    let list = Value::new_list(TypeTag::Int32, vec![Value::Int32(1), Value::Int32(2)]);
    let code = vec![
        Instruction::push(list),
        Instruction::push(2),
        op(Opcode::ListIndex),
    ];
    let mut vm = VmBc::new(Program::new(code), BuiltinRegistry::new(), VmConfig::default()).unwrap();

    let err = vm.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::IndexOutOfRange { index: 2, len: 2 });
    assert_eq!(err.severity(), Severity::Runtime);
    assert!(vm.stack().is_empty());
}

#[test]
fn bare_return_is_fatal() {
    let code = vec![op(Opcode::Return), Instruction::push(1)];
    let mut vm = VmBc::new(Program::new(code), BuiltinRegistry::new(), VmConfig::default()).unwrap();

    let err = vm.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReturnUnderflow);
    assert_eq!(err.severity(), Severity::Fatal);
    assert_eq!(vm.code_pointer(), 0);
    assert!(vm.stack().is_empty());
}

#[test]
fn call_and_return_restore_frame() {
    let code = vec![
        Instruction::push(1),
        Instruction::push(2),
        Instruction::call(5),
        Instruction::push(3),
        op(Opcode::Exit),
        // callee pushes and drops locals of its own
        Instruction::push(10),
        Instruction::push(11),
        op(Opcode::MathAdd),
        op(Opcode::PopValue),
        op(Opcode::Return),
    ];
    let mut vm = VmBc::new(Program::new(code), BuiltinRegistry::new(), VmConfig::default()).unwrap();

    vm.tick().unwrap();
    vm.tick().unwrap();
    let (bp, depth) = (vm.stack().base_pointer(), vm.call_stack().depth());

    vm.tick().unwrap();
    assert_eq!(vm.code_pointer(), 5);
    while vm.code_pointer() != 3 {
        vm.tick().unwrap();
    }

    assert_eq!(vm.stack().base_pointer(), bp);
    assert_eq!(vm.call_stack().depth(), depth);
    assert_eq!(vm.stack().values(), vec![Value::Int32(1), Value::Int32(2)]);
}

#[test]
fn program_image_runs_after_decoding() {
    let program = Program::new(vec![
        Instruction::push(Value::new_struct(
            StructValue::new("Pair")
                .with_field("a", Value::Int32(4))
                .with_field("b", Value::Float32(0.5)),
        )),
        Instruction::with_offset(Opcode::LoadFieldR, -1).field("a"),
        Instruction::with_offset(Opcode::LoadFieldR, -2).field("b"),
        op(Opcode::MathMult),
    ]);

    let decoded = Program::from_bytes(&program.to_bytes().unwrap()).unwrap();
    let mut vm = VmBc::new(decoded, BuiltinRegistry::new(), VmConfig::default()).unwrap();
    vm.run().unwrap();
    assert_eq!(vm.stack().values()[1], Value::Float32(2.0));
}

// Host lifecycle

/// globals: counter = 0
/// entry:   log("entry")
/// update:  counter += 1; log(counter); if counter >= 3 { exit } wait()
/// end:     log("end")
/// dispose: drop counter
fn lifecycle_program() -> Program {
    let mut code = vec![
        // 0: globals
        Instruction::push(0).tagged("counter"),
        op(Opcode::Exit),
        // 2: entry
        Instruction::with_value(Opcode::CsPush, "fn entry"),
        Instruction::push("entry"),
    ];
    code.extend(log_call());
    code.extend([
        op(Opcode::CsPop),
        op(Opcode::Return),
        // 8: update
        Instruction::load(0),
        Instruction::push(1),
        op(Opcode::MathAdd),
        Instruction::store(0),
        Instruction::load(0),
    ]);
    code.extend(log_call());
    code.extend([
        Instruction::load(0),
        Instruction::push(3),
        op(Opcode::LogicMteq),
        Instruction::with_offset(Opcode::JumpByIfFalse, 2),
        op(Opcode::Exit),
        Instruction::push("wait"),
        Instruction::call_builtin(0),
        op(Opcode::Return),
        // 23: end
        Instruction::push("end"),
    ]);
    code.extend(log_call());
    code.extend([
        op(Opcode::Return),
        // 27: dispose
        op(Opcode::PopValue),
        op(Opcode::Exit),
    ]);

    Program::new(code)
        .with_entry(Role::SetGlobals, 0)
        .with_entry(Role::Entry, 2)
        .with_entry(Role::Update, 8)
        .with_entry(Role::End, 23)
        .with_entry(Role::DisposeGlobals, 27)
}

fn lifecycle_host(wait_ticks: u32) -> (Host, Log) {
    let (mut builtins, log) = logging_builtins();
    let timers = TimerHandle::new();
    let handle = timers.clone();
    builtins.register("wait", vec![], false, move |_| {
        handle.schedule(wait_ticks, |_| Ok(()));
        Ok(None)
    });
    let vm = VmBc::new(lifecycle_program(), builtins, VmConfig::default()).unwrap();
    (Host::with_timers(vm, timers), log)
}

#[test]
fn host_walks_every_phase_in_order() {
    let (mut host, log) = lifecycle_host(2);

    let mut phases = Vec::new();
    while !host.phase().is_terminal() {
        let phase = host.tick().unwrap();
        if phases.last() != Some(&phase) {
            phases.push(phase);
        }
    }

    assert_eq!(
        phases,
        vec![
            Phase::SetGlobalVariables,
            Phase::CallCodeEntry,
            Phase::CallUpdate,
            Phase::CallCodeEnd,
            Phase::DisposeGlobalVariables,
            Phase::CodeExecuted,
        ]
    );
    assert_eq!(
        *log.borrow(),
        vec![
            Value::string("entry"),
            Value::Int32(1),
            Value::Int32(2),
            Value::Int32(3),
            Value::string("end"),
        ]
    );
    assert!(!host.vm().is_running());
}

#[test]
fn host_pauses_the_machine_while_a_timer_is_pending() {
    let (mut host, _log) = lifecycle_host(5);

    // run until the first wait() has been called
    while !host.timers().is_pending() {
        host.tick().unwrap();
    }
    let position = host.vm().code_pointer();
    let steps = host.vm().steps();

    for _ in 0..4 {
        host.tick().unwrap();
        assert!(host.timers().is_pending());
    }
    host.tick().unwrap();
    assert!(!host.timers().is_pending());

    assert_eq!(host.vm().code_pointer(), position);
    assert_eq!(host.vm().steps(), steps);

    host.run().unwrap();
    assert_eq!(host.phase(), Phase::CodeExecuted);
}

#[test]
fn host_without_entry_point_aborts() {
    let program = Program::new(vec![Instruction::push(0), op(Opcode::Exit)])
        .with_entry(Role::SetGlobals, 0);
    let vm = VmBc::new(program, BuiltinRegistry::new(), VmConfig::default()).unwrap();
    let mut host = Host::new(vm);

    let err = host.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingEntryPoint { role: "entry" });
    assert_eq!(err.severity(), Severity::Runtime);
    assert_eq!(err.call_stack, vec!["state: CallCodeEntry"]);
    assert_eq!(host.phase(), Phase::Aborted);

    // a terminal host stays put
    assert_eq!(host.tick(), Ok(Phase::Aborted));
}

#[test]
fn host_error_reports_state_and_function_labels() {
    let program = Program::new(vec![
        Instruction::with_value(Opcode::CsPush, "fn main"),
        Instruction::push(1),
        Instruction::push(0),
        op(Opcode::MathDiv),
        op(Opcode::Return),
    ])
    .with_entry(Role::Entry, 0);
    let vm = VmBc::new(program, BuiltinRegistry::new(), VmConfig::default()).unwrap();
    let mut host = Host::new(vm);

    let err = host.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    assert_eq!(err.call_stack, vec!["state: CallCodeEntry", "fn main"]);
    assert!(err.to_string().contains("0: fn main"));
    assert_eq!(host.phase(), Phase::Aborted);
}

#[test]
fn exit_in_entry_skips_update() {
    let (builtins, log) = logging_builtins();
    let mut code = vec![Instruction::push("entry")];
    code.extend(log_call());
    code.push(op(Opcode::Exit));
    code.push(Instruction::push("update"));
    code.extend(log_call());
    code.push(op(Opcode::Return));

    let program = Program::new(code)
        .with_entry(Role::Entry, 0)
        .with_entry(Role::Update, 4);
    let vm = VmBc::new(program, builtins, VmConfig::default()).unwrap();
    let mut host = Host::new(vm);
    host.run().unwrap();

    assert_eq!(*log.borrow(), vec![Value::string("entry")]);
}

proptest! {
    #[test]
    fn deep_copy_is_independent(items in proptest::collection::vec(any::<i32>(), 0..16), extra in any::<i32>()) {
        let inner = Value::new_list(TypeTag::Int32, items.iter().copied().map(Value::Int32).collect());
        let original = Value::new_struct(StructValue::new("Box").with_field("items", inner));
        let snapshot = original.copy_recursive();

        // mutate the copy through the machine
        let code = vec![
            Instruction::with_offset(Opcode::LoadFieldR, -1).field("items"),
            Instruction::push(extra),
            op(Opcode::ListPushItem),
        ];
        let mut vm = VmBc::new(Program::new(code), BuiltinRegistry::new(), VmConfig::default()).unwrap();
        vm.add_value_to_stack(original.copy_recursive()).unwrap();
        vm.run().unwrap();

        prop_assert_eq!(&original, &snapshot);
        let values = vm.stack().values();
        let Value::Struct(copy) = &values[0] else {
            panic!("expected a struct");
        };
        prop_assert_eq!(copy.borrow().field("items").and_then(Value::length), Some(items.len() + 1));
    }

    #[test]
    fn frame_is_restored_for_any_number_of_locals(locals in 0usize..8, below in 0usize..4) {
        let mut code = vec![Instruction::call(2), op(Opcode::Exit)];
        for n in 0..locals {
            code.push(Instruction::push(n as i32));
        }
        for _ in 0..locals {
            code.push(op(Opcode::PopValue));
        }
        code.push(op(Opcode::Return));

        let mut vm = VmBc::new(Program::new(code), BuiltinRegistry::new(), VmConfig::default()).unwrap();
        for n in 0..below {
            vm.add_value_to_stack(Value::Int32(n as i32)).unwrap();
        }
        let bp = vm.stack().base_pointer();
        vm.run().unwrap();

        prop_assert!(vm.exit_requested());
        prop_assert_eq!(vm.stack().base_pointer(), bp);
        prop_assert_eq!(vm.stack().len(), below);
        prop_assert_eq!(vm.call_stack().depth(), 0);
    }
}

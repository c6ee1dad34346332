use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::verify::check_program;
use crate::bytecode::{EntryPoints, Instruction, Opcode, Operand, Program};
use crate::lang::arith::{self, BinaryOp, Comparison};
use crate::lang::cast::cast_like;
use crate::lang::value::{HeapAddress, ListValue, Value};
use crate::runtime::builtins::BuiltinRegistry;
use crate::runtime::call_stack::CallStack;
use crate::runtime::config::VmConfig;
use crate::runtime::heap::Heap;
use crate::runtime::runtime_error::{ErrorKind, VmError, VmResult, expected_type};
use crate::runtime::stack::{Addressing, OperandStack};

/// Synthetic cycle count of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct InstructionCost(pub u32);

/// Stack and return-address depth at some point in time, used by hosts to
/// discard whatever a routine left behind when it ended with `EXIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSnapshot {
    stack_len: usize,
    base_pointer: usize,
    call_depth: usize,
}

/// The bytecode machine.
///
/// One [`tick`](VmBc::tick) executes exactly one instruction. The machine
/// is running while the code pointer is inside the code.
pub struct VmBc {
    code: Rc<[Instruction]>,
    entry_points: EntryPoints,
    code_pointer: usize,
    stack: OperandStack,
    heap: Heap,
    call_stack: CallStack,
    builtins: BuiltinRegistry,
    config: VmConfig,
    steps: u64,
    exit_requested: bool,
    destroyed: bool,
}

impl VmBc {
    pub fn new(program: Program, builtins: BuiltinRegistry, config: VmConfig) -> VmResult<Self> {
        check_program(&program)?;

        for import in &program.imports {
            match builtins.signature(&import.name) {
                None => tracing::warn!(
                    builtin = %import.name,
                    "program imports a builtin that is not registered"
                ),
                Some(registered) if registered != import => tracing::warn!(
                    builtin = %import.name,
                    "registered builtin signature differs from the program's import"
                ),
                Some(_) => {}
            }
        }

        tracing::debug!(
            instructions = program.len(),
            builtins = builtins.len(),
            heap_size = config.heap_size,
            "machine created"
        );

        Ok(Self {
            code: program.instructions.into(),
            entry_points: program.entry_points,
            code_pointer: 0,
            stack: OperandStack::new(config.max_stack_size),
            heap: Heap::new(config.heap_size),
            call_stack: CallStack::new(config.max_call_depth),
            builtins,
            config,
            steps: 0,
            exit_requested: false,
            destroyed: false,
        })
    }

    // Host embedding API

    pub fn is_running(&self) -> bool {
        !self.destroyed && self.code_pointer < self.code.len()
    }

    /// Whether the machine stopped because of an `EXIT` instruction.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn code_pointer(&self) -> usize {
        self.code_pointer
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn entry_points(&self) -> &EntryPoints {
        &self.entry_points
    }

    pub fn stack(&self) -> &OperandStack {
        &self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn builtins_mut(&mut self) -> &mut BuiltinRegistry {
        &mut self.builtins
    }

    /// Move the code pointer. `offset == code length` stops the machine.
    pub fn jump(&mut self, offset: usize) -> VmResult<()> {
        if offset > self.code.len() {
            return Err(VmError::new(ErrorKind::JumpOutOfRange {
                target: offset as i64,
                len: self.code.len(),
            }));
        }
        self.code_pointer = offset;
        self.exit_requested = false;
        Ok(())
    }

    /// Call a routine from the host. Returning from it stops the machine.
    pub fn call(&mut self, offset: usize) -> VmResult<()> {
        if offset >= self.code.len() {
            return Err(VmError::new(ErrorKind::JumpOutOfRange {
                target: offset as i64,
                len: self.code.len(),
            }));
        }
        self.exit_requested = false;
        self.enter(offset, self.code.len()).map_err(VmError::new)
    }

    pub fn call_stack_push(&mut self, label: impl Into<String>) {
        self.call_stack.push_label(label);
    }

    pub fn call_stack_pop(&mut self) -> Option<String> {
        self.call_stack.pop_label()
    }

    pub fn add_value_to_stack(&mut self, value: Value) -> VmResult<()> {
        self.stack.push(value).map_err(VmError::new)
    }

    pub fn snapshot_frame(&self) -> FrameSnapshot {
        FrameSnapshot {
            stack_len: self.stack.len(),
            base_pointer: self.stack.base_pointer(),
            call_depth: self.call_stack.depth(),
        }
    }

    pub fn unwind(&mut self, frame: FrameSnapshot) {
        self.stack.truncate(frame.stack_len, frame.base_pointer);
        self.call_stack.truncate(frame.call_depth);
    }

    /// Release stack, heap and call-stack. The machine never runs again.
    pub fn destroy(&mut self) {
        self.stack.clear();
        self.heap.clear();
        self.call_stack.clear();
        self.code_pointer = self.code.len();
        self.destroyed = true;
        tracing::debug!(steps = self.steps, "machine destroyed");
    }

    /// Tick until the machine stops. Returns the accumulated cost.
    pub fn run(&mut self) -> VmResult<u64> {
        let mut total = 0u64;
        while self.is_running() {
            total += self.tick()?.0 as u64;
        }
        Ok(total)
    }

    /// Execute the instruction at the code pointer.
    pub fn tick(&mut self) -> VmResult<InstructionCost> {
        if !self.is_running() {
            return Ok(InstructionCost(0));
        }

        let position = self.code_pointer;
        let code = Rc::clone(&self.code);
        let instruction = &code[position];
        let opcode = instruction.opcode;

        tracing::trace!(position, %opcode, "tick");

        self.execute(instruction).map_err(|kind| {
            VmError::new(kind)
                .at(position, opcode)
                .with_call_stack(self.call_stack.labels())
        })?;

        Ok(InstructionCost(opcode.cost()))
    }

    // Execution

    fn check_limits(&mut self, opcode: Opcode) -> Result<(), ErrorKind> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(ErrorKind::StepLimitExceeded { limit: max });
            }
        }

        if !self.config.profile.supports(opcode) {
            return Err(ErrorKind::UnimplementedOpcode(opcode));
        }

        Ok(())
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<(), ErrorKind> {
        let opcode = instruction.opcode;
        self.check_limits(opcode)?;

        match opcode {
            Opcode::Comment => {}

            // Stack
            Opcode::PushValue => match &instruction.operand {
                Operand::Value(v) => match &instruction.tag {
                    Some(tag) => self.stack.push_tagged(v.copy_recursive(), tag.as_str())?,
                    None => self.push(v.copy_recursive())?,
                },
                _ => {
                    return Err(ErrorKind::InvalidOperand {
                        opcode,
                        expected: "a literal value",
                    });
                }
            },
            Opcode::PopValue => self.stack.discard()?,
            Opcode::LoadValue | Opcode::LoadValueBr | Opcode::LoadValueR => {
                let index = self.slot_index(instruction)?;
                let value = self.read_slot(index)?;
                self.push(value)?;
            }
            Opcode::StoreValue | Opcode::StoreValueBr | Opcode::StoreValueR => {
                let index = self.slot_index(instruction)?;
                let value = self.stack.peek()?.clone();
                self.write_slot(index, value)?;
                self.stack.pop()?;
            }

            // Struct fields
            Opcode::LoadField | Opcode::LoadFieldBr | Opcode::LoadFieldR => {
                let name = field_name(instruction)?;
                let index = self.slot_index(instruction)?;
                let container = self.read_slot(index)?;
                let value = load_field(&container, name)?;
                self.push(value)?;
            }
            Opcode::StoreField | Opcode::StoreFieldBr | Opcode::StoreFieldR => {
                let name = field_name(instruction)?;
                let index = self.slot_index(instruction)?;
                let container = self.read_slot(index)?;
                let value = self.stack.peek()?.clone();
                store_field(&container, name, value)?;
                self.stack.pop()?;
            }

            // Calls
            Opcode::Call => {
                let target = self.operand_target(instruction)?;
                return self.enter(target, self.code_pointer + 1);
            }
            Opcode::Return => {
                let address = self.call_stack.pop_return()?;
                self.stack.pop_frame()?;
                tracing::debug!(address, "return");
                self.code_pointer = address;
                return Ok(());
            }
            Opcode::CallBuiltin => self.call_builtin(instruction)?,

            // Jumps
            Opcode::JumpBy => return self.jump_relative(instruction),
            Opcode::JumpByIfTrue | Opcode::JumpByIfFalse => {
                let condition = self.pop_bool()?;
                if condition == (opcode == Opcode::JumpByIfTrue) {
                    return self.jump_relative(instruction);
                }
            }

            // Arithmetic
            Opcode::MathAdd => self.binary(BinaryOp::Add)?,
            Opcode::MathSub => self.binary(BinaryOp::Sub)?,
            Opcode::MathMult => self.binary(BinaryOp::Mul)?,
            Opcode::MathDiv => self.binary(BinaryOp::Div)?,
            Opcode::MathMod => self.binary(BinaryOp::Mod)?,
            Opcode::MathNeg => {
                let a = self.pop()?;
                self.push(arith::negate(&a)?)?;
            }

            // Comparison & logic
            Opcode::LogicLt => self.compare(Comparison::Lt)?,
            Opcode::LogicMt => self.compare(Comparison::Gt)?,
            Opcode::LogicLteq => self.compare(Comparison::Le)?,
            Opcode::LogicMteq => self.compare(Comparison::Ge)?,
            Opcode::LogicEq => self.compare(Comparison::Eq)?,
            Opcode::LogicNeq => self.compare(Comparison::Ne)?,
            Opcode::LogicAnd => self.binary(BinaryOp::And)?,
            Opcode::LogicOr => self.binary(BinaryOp::Or)?,
            Opcode::LogicXor => self.binary(BinaryOp::Xor)?,
            Opcode::BitShl => self.binary(BinaryOp::Shl)?,
            Opcode::BitShr => self.binary(BinaryOp::Shr)?,
            Opcode::LogicNot => {
                let a = self.pop()?;
                self.push(arith::not(&a)?)?;
            }

            // Lists
            Opcode::ListIndex => {
                let index = self.pop_index()?;
                let container = self.pop_deref()?;
                let item = match &container {
                    Value::String(s) => {
                        let len = s.chars().count();
                        let i = checked_index(index, len)?;
                        s.chars()
                            .nth(i)
                            .map(|c| Value::String(c.to_string()))
                            .ok_or(ErrorKind::IndexOutOfRange { index, len })?
                    }
                    Value::List(list) => {
                        let list = list.borrow();
                        let i = checked_index(index, list.len())?;
                        list.items[i].clone()
                    }
                    other => return Err(expected_type("List or String", other.type_tag())),
                };
                self.push(item)?;
            }
            Opcode::ListPushItem => {
                let item = self.pop()?;
                let list = self.pop_list()?;
                check_item(&list, &item)?;
                list.borrow_mut().items.push(item);
            }
            Opcode::ListAddItem => {
                let item = self.pop()?;
                let index = self.pop_index()?;
                let list = self.pop_list()?;
                check_item(&list, &item)?;
                let mut list = list.borrow_mut();
                let len = list.len();
                if index < 0 || index as usize > len {
                    return Err(ErrorKind::IndexOutOfRange { index, len });
                }
                list.items.insert(index as usize, item);
            }
            Opcode::ListSetItem => {
                let item = self.pop()?;
                let index = self.pop_index()?;
                let list = self.pop_list()?;
                check_item(&list, &item)?;
                let mut list = list.borrow_mut();
                let i = checked_index(index, list.len())?;
                list.items[i] = item;
            }
            Opcode::ListPullItem => {
                let list = self.pop_list()?;
                let item = list.borrow_mut().items.pop().ok_or(ErrorKind::EmptyList)?;
                self.push(item)?;
            }
            Opcode::ListRemoveItem => {
                let index = self.pop_index()?;
                let list = self.pop_list()?;
                let mut list = list.borrow_mut();
                let i = checked_index(index, list.len())?;
                list.items.remove(i);
            }

            Opcode::TypeGet => {
                let value = self.pop()?;
                self.push(Value::String(value.describe_type()))?;
            }

            // Heap
            Opcode::HeapGet => {
                let address = self.heap_address(instruction)?;
                let value = self.heap.get(address)?.clone();
                self.push(value)?;
            }
            Opcode::HeapSet => {
                let address = self.heap_address(instruction)?;
                let value = self.pop()?;
                self.heap.set(address, value)?;
            }

            // Debugging
            Opcode::DebugSetTag => {
                let label = label(instruction)?;
                self.stack.tag_top(label)?;
            }
            Opcode::CsPush => {
                let label = label(instruction)?;
                self.call_stack.push_label(label);
            }
            Opcode::CsPop => {
                self.call_stack.pop_label();
            }

            Opcode::CopyValue => {
                let value = self.pop()?;
                self.push(value.copy())?;
            }
            Opcode::CopyValueRecursive => {
                let value = self.pop()?;
                self.push(value.copy_recursive())?;
            }

            Opcode::Exit => {
                tracing::debug!(position = self.code_pointer, "exit");
                self.code_pointer = self.code.len();
                self.exit_requested = true;
                return Ok(());
            }
        }

        self.code_pointer += 1;
        Ok(())
    }

    /// Push a frame and transfer control to `target`.
    fn enter(&mut self, target: usize, return_address: usize) -> Result<(), ErrorKind> {
        self.call_stack.push_return(return_address)?;
        self.stack.push_frame()?;
        tracing::debug!(target, return_address, "call");
        self.code_pointer = target;
        Ok(())
    }

    fn call_builtin(&mut self, instruction: &Instruction) -> Result<(), ErrorKind> {
        let argc = operand_offset(instruction)?;

        // Name first, then the lookup, then the arguments.
        let name = match self.pop()? {
            Value::String(name) => name,
            other => {
                return Err(ErrorKind::BuiltinNameNotString {
                    found: other.type_name(),
                });
            }
        };
        if !self.builtins.contains(&name) {
            return Err(ErrorKind::UndefinedBuiltin { name });
        }

        let argc = usize::try_from(argc).map_err(|_| ErrorKind::InvalidOperand {
            opcode: instruction.opcode,
            expected: "a non-negative argument count",
        })?;
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();

        if let Some(result) = self.builtins.invoke(&name, &args)? {
            self.push(result)?;
        }
        Ok(())
    }

    fn jump_relative(&mut self, instruction: &Instruction) -> Result<(), ErrorKind> {
        let offset = operand_offset(instruction)?;
        let len = self.code.len();
        let target = (self.code_pointer as i64)
            .checked_add(offset)
            .filter(|t| (0..=len as i64).contains(t))
            .ok_or(ErrorKind::JumpOutOfRange {
                target: offset,
                len,
            })?;
        self.code_pointer = target as usize;
        Ok(())
    }

    fn operand_target(&self, instruction: &Instruction) -> Result<usize, ErrorKind> {
        let target = operand_offset(instruction)?;
        if target < 0 || target >= self.code.len() as i64 {
            return Err(ErrorKind::JumpOutOfRange {
                target,
                len: self.code.len(),
            });
        }
        Ok(target as usize)
    }

    // Slots

    fn slot_index(&self, instruction: &Instruction) -> Result<usize, ErrorKind> {
        let mode = match instruction.opcode {
            Opcode::LoadValueBr | Opcode::StoreValueBr | Opcode::LoadFieldBr | Opcode::StoreFieldBr => {
                Addressing::FrameRelative
            }
            Opcode::LoadValueR | Opcode::StoreValueR | Opcode::LoadFieldR | Opcode::StoreFieldR => {
                Addressing::TopRelative
            }
            _ => Addressing::Absolute,
        };
        self.stack.resolve(mode, operand_offset(instruction)?)
    }

    /// Read a stack slot, following a heap reference if it holds one.
    fn read_slot(&self, index: usize) -> Result<Value, ErrorKind> {
        self.deref(self.stack.get(index)?.clone())
    }

    /// Write a stack slot, coercing to the slot's current variant.
    ///
    /// A slot holding a reference is written through to the heap unless
    /// the incoming value is itself a reference, which repoints the slot.
    fn write_slot(&mut self, index: usize, value: Value) -> Result<(), ErrorKind> {
        match self.stack.get(index)? {
            Value::Reference(address) if !matches!(value, Value::Reference(_)) => {
                let address = *address;
                let cast = cast_like(self.heap.get(address)?, &value)?;
                self.heap.set(address, cast)
            }
            current => {
                let cast = cast_like(current, &value)?;
                self.stack.set(index, cast, false)
            }
        }
    }

    fn deref(&self, value: Value) -> Result<Value, ErrorKind> {
        match value {
            Value::Reference(address) => Ok(self.heap.get(address)?.clone()),
            other => Ok(other),
        }
    }

    fn heap_address(&mut self, instruction: &Instruction) -> Result<HeapAddress, ErrorKind> {
        let raw = match &instruction.operand {
            Operand::Value(Value::Reference(address)) => return Ok(*address),
            Operand::None => match self.pop()? {
                Value::Reference(address) => return Ok(address),
                other => other
                    .as_integer()
                    .map(i64::from)
                    .ok_or_else(|| expected_type("heap address", other.type_tag()))?,
            },
            operand => operand.as_offset().ok_or(ErrorKind::InvalidOperand {
                opcode: instruction.opcode,
                expected: "a heap address",
            })?,
        };
        usize::try_from(raw)
            .map(HeapAddress)
            .map_err(|_| ErrorKind::IndexOutOfRange {
                index: raw,
                len: self.heap.size(),
            })
    }

    // Stack helpers

    fn push(&mut self, value: Value) -> Result<(), ErrorKind> {
        self.stack.push(value)
    }

    fn pop(&mut self) -> Result<Value, ErrorKind> {
        self.stack.pop()
    }

    fn pop_deref(&mut self) -> Result<Value, ErrorKind> {
        let value = self.pop()?;
        self.deref(value)
    }

    fn pop_bool(&mut self) -> Result<bool, ErrorKind> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(expected_type("Bool", other.type_tag())),
        }
    }

    fn pop_index(&mut self) -> Result<i64, ErrorKind> {
        match self.pop()? {
            Value::Byte(b) => Ok(b as i64),
            Value::Int32(n) => Ok(n as i64),
            other => Err(expected_type("integer index", other.type_tag())),
        }
    }

    fn pop_list(&mut self) -> Result<Rc<RefCell<ListValue>>, ErrorKind> {
        match self.pop_deref()? {
            Value::List(list) => Ok(list),
            other => Err(expected_type("List", other.type_tag())),
        }
    }

    fn binary(&mut self, op: BinaryOp) -> Result<(), ErrorKind> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(arith::binary(op, &a, &b)?)
    }

    fn compare(&mut self, cmp: Comparison) -> Result<(), ErrorKind> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(arith::compare(cmp, &a, &b)?)
    }
}

fn operand_offset(instruction: &Instruction) -> Result<i64, ErrorKind> {
    instruction
        .operand
        .as_offset()
        .ok_or(ErrorKind::InvalidOperand {
            opcode: instruction.opcode,
            expected: "an integer",
        })
}

fn field_name(instruction: &Instruction) -> Result<&str, ErrorKind> {
    instruction
        .field
        .as_deref()
        .ok_or(ErrorKind::MissingFieldOperand(instruction.opcode))
}

fn label(instruction: &Instruction) -> Result<String, ErrorKind> {
    instruction
        .operand
        .as_str()
        .or(instruction.tag.as_deref())
        .map(str::to_string)
        .ok_or(ErrorKind::InvalidOperand {
            opcode: instruction.opcode,
            expected: "a string label",
        })
}

fn checked_index(index: i64, len: usize) -> Result<usize, ErrorKind> {
    if index < 0 || index as usize >= len {
        return Err(ErrorKind::IndexOutOfRange { index, len });
    }
    Ok(index as usize)
}

fn check_item(list: &Rc<RefCell<ListValue>>, item: &Value) -> Result<(), ErrorKind> {
    if item.reaches(&Value::List(Rc::clone(list))) {
        return Err(ErrorKind::RecursiveValue { target: "List" });
    }
    let element = list.borrow().element;
    if !element.accepts(item) {
        return Err(ErrorKind::ElementTypeMismatch {
            expected: element,
            found: item.type_tag(),
        });
    }
    Ok(())
}

const LENGTH: &str = "Length";

fn load_field(container: &Value, name: &str) -> Result<Value, ErrorKind> {
    match container {
        Value::Struct(s) => {
            let s = s.borrow();
            s.field(name).cloned().ok_or_else(|| ErrorKind::MissingField {
                field: name.to_string(),
                target: s.name.clone(),
            })
        }
        Value::String(_) | Value::List(_) if name == LENGTH => {
            let len = container.length().unwrap_or_default();
            Ok(Value::Int32(i32::try_from(len).unwrap_or(i32::MAX)))
        }
        other => Err(ErrorKind::MissingField {
            field: name.to_string(),
            target: other.type_name().to_string(),
        }),
    }
}

fn store_field(container: &Value, name: &str, value: Value) -> Result<(), ErrorKind> {
    match container {
        Value::Struct(s) => {
            // checked before borrowing mutably, the walk borrows `container`
            if value.reaches(container) {
                return Err(ErrorKind::RecursiveValue { target: "Struct" });
            }
            let mut s = s.borrow_mut();
            let Some(current) = s.fields.get(name) else {
                return Err(ErrorKind::MissingField {
                    field: name.to_string(),
                    target: s.name.clone(),
                });
            };
            let cast = cast_like(current, &value)?;
            s.fields.insert(name.to_string(), cast);
            Ok(())
        }
        Value::String(_) | Value::List(_) if name == LENGTH => Err(ErrorKind::ReadOnlyField {
            field: name.to_string(),
            target: container.type_name().to_string(),
        }),
        other => Err(ErrorKind::MissingField {
            field: name.to_string(),
            target: other.type_name().to_string(),
        }),
    }
}

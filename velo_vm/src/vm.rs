//! VM dispatch, frames, inline caches, and exception unwinding
//!
//! Each call runs the dispatch loop for its own frame; a thrown value
//! propagates outward as an error until some frame's exception table covers
//! the throwing pc. The evaluation stack is shared across frames with
//! per-frame base pointers, and a GC step may fire between any two opcodes
//! but never inside one.

use crate::builtins::{BuiltinRegistry, NativeError};
use std::collections::HashMap;
use velo_bytecode::{
    ClassSpec, CompiledFunction, CompiledProgram, Constant, FunctionFlags, Instr, MethodSpec,
    Opcode, PropertySpec,
};
use velo_common::{intern, resolve, StringId, SyntaxMode, VeloError, VeloResult};
use velo_parser::Modifiers;
use velo_runtime::{CallableKind, Handle, Heap, Value};

/// VM tuning knobs.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum call depth before a fatal stack-overflow error.
    pub max_frames: usize,
    /// Instructions between garbage-collector polls.
    pub gc_interval: u32,
    /// Mode used when formatting uncaught-error messages.
    pub syntax: SyntaxMode,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self { max_frames: 256, gc_interval: 64, syntax: SyntaxMode::Php }
    }
}

/// What a member-site inline cache resolved to last time.
#[derive(Debug, Clone, Copy)]
enum CacheTarget {
    PropertySlot(usize),
    Method(u32),
}

/// One per-call-site cache slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheSlot {
    class: Option<Handle>,
    target: Option<CacheTarget>,
    generation: u64,
    pub hits: u64,
    pub misses: u64,
}

/// A call frame. Locals live here; the evaluation stack is shared.
struct Frame {
    function: u32,
    pc: usize,
    base: usize,
    locals: Vec<Value>,
    /// Class scope for visibility checks, set for method frames.
    scope: Option<Handle>,
}

/// Thrown values unwind through Rust results; fatal errors bypass catch.
pub(crate) enum VmError {
    Thrown(Value),
    Fatal(VeloError),
}

pub(crate) type VmResult<T> = Result<T, VmError>;

/// The bytecode interpreter.
pub struct Vm {
    program: CompiledProgram,
    pub heap: Heap,
    config: VmConfig,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: HashMap<StringId, Value>,
    builtins: BuiltinRegistry,
    functions_by_name: HashMap<StringId, u32>,
    caches: Vec<Vec<CacheSlot>>,
    feedback: Vec<Vec<u8>>,
    output: String,
    instructions_until_gc: u32,
}

impl Vm {
    pub fn new(program: CompiledProgram) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    pub fn with_config(mut program: CompiledProgram, config: VmConfig) -> Self {
        let mut heap = Heap::new();
        register_error_classes(&mut program, &mut heap);
        let classes = program.classes.clone();
        for class in &classes {
            if heap.class_by_name(class.name).is_none() {
                heap.register_class(class);
            }
        }

        let functions_by_name = program
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name, i as u32))
            .collect();
        let caches = program
            .functions
            .iter()
            .map(|f| vec![CacheSlot::default(); f.cache_sites.len()])
            .collect();
        let feedback = program
            .functions
            .iter()
            .map(|f| vec![0u8; f.feedback_count as usize])
            .collect();

        Self {
            program,
            heap,
            config,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            globals: HashMap::new(),
            builtins: BuiltinRegistry::new(),
            functions_by_name,
            caches,
            feedback,
            output: String::new(),
            instructions_until_gc: 64,
        }
    }

    /// Execute the program's entry function to completion.
    pub fn run(&mut self) -> VeloResult<Value> {
        let entry = self.program.entry;
        match self.invoke(entry, None, Vec::new()) {
            Ok(value) => Ok(value),
            Err(VmError::Thrown(exception)) => {
                let message = self.exception_message(exception);
                Err(VeloError::uncaught(velo_common::format_message(
                    &message,
                    self.config.syntax,
                )))
            }
            Err(VmError::Fatal(error)) => Err(error),
        }
    }

    /// Everything echoed so far.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Two-bit operand-shape histograms for a function's generic numeric
    /// sites; bit 0 records int operands, bit 1 float operands.
    pub fn feedback_for(&self, function: u32) -> &[u8] {
        &self.feedback[function as usize]
    }

    pub fn cache_slots_for(&self, function: u32) -> &[CacheSlot] {
        &self.caches[function as usize]
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    // ---- Frame execution ----------------------------------------------

    fn invoke(
        &mut self,
        function: u32,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        if self.frames.len() >= self.config.max_frames {
            return Err(VmError::Fatal(VeloError::stack_overflow(format!(
                "call depth exceeded {} frames",
                self.config.max_frames
            ))));
        }

        let func = &self.program.functions[function as usize];
        let is_method = func.flags.contains(FunctionFlags::METHOD)
            && !func.flags.contains(FunctionFlags::STATIC);
        let local_count = func.local_count.max(func.arg_count + is_method as u16) as usize;
        let mut locals = vec![Value::Null; local_count];

        let mut slot = 0usize;
        if is_method {
            locals[0] = receiver.unwrap_or(Value::Null);
            slot = 1;
        }
        self.bind_arguments(function, &mut locals, slot, args)?;

        let scope = receiver.and_then(|r| self.heap.class_of(r));
        let base = self.stack.len();
        self.frames.push(Frame { function, pc: 0, base, locals, scope });

        let result = self.dispatch();

        let frame = self.frames.pop().expect("frame pushed above");
        self.stack.truncate(frame.base);
        result
    }

    /// Arity check and binding per the calling convention: too few
    /// arguments after defaults is an error, extras feed the variadic
    /// parameter or drop.
    fn bind_arguments(
        &mut self,
        function: u32,
        locals: &mut [Value],
        first_slot: usize,
        mut args: Vec<Value>,
    ) -> VmResult<()> {
        let func = &self.program.functions[function as usize];
        let params = func.params.clone();
        let name = func.name;
        let variadic = func.flags.contains(FunctionFlags::VARIADIC);

        let fixed = if variadic { params.len() - 1 } else { params.len() };
        let required = params[..fixed].iter().filter(|p| p.default.is_none()).count();
        if args.len() < required {
            return Err(self.throw_error(
                "ArgumentCountError",
                format!(
                    "too few arguments to {}(): {} passed, {} expected",
                    resolve(name),
                    args.len(),
                    required
                ),
            ));
        }

        let rest = if args.len() > fixed { args.split_off(fixed) } else { Vec::new() };
        for (i, param) in params[..fixed].iter().enumerate() {
            let value = match args.get(i) {
                Some(&value) => value,
                None => {
                    let index = param.default.expect("required count checked above") as usize;
                    let constant = self.program.functions[function as usize].constants[index].clone();
                    self.heap.value_from_constant(&constant)
                }
            };
            locals[first_slot + i] = value;
        }
        if variadic {
            let array = self.heap.new_array();
            for value in rest {
                self.heap.array_push(array, value);
            }
            locals[first_slot + fixed] = array;
        }
        Ok(())
    }

    fn dispatch(&mut self) -> VmResult<Value> {
        loop {
            self.maybe_collect();

            let (function, pc) = {
                let frame = self.frames.last().expect("dispatch runs with a frame");
                (frame.function as usize, frame.pc)
            };
            let Some(&instr) = self.program.functions[function].bytecode.get(pc) else {
                return Ok(Value::Null);
            };
            self.frames.last_mut().expect("dispatch runs with a frame").pc += 1;

            match self.step(instr, function) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(error) => match self.unwind(error) {
                    Ok(()) => {}
                    Err(error) => return Err(error),
                },
            }
        }
    }

    /// Resolve a thrown value against the current frame's exception table;
    /// re-raise when no covered range matches.
    fn unwind(&mut self, error: VmError) -> Result<(), VmError> {
        let VmError::Thrown(exception) = error else { return Err(error) };
        let (function, throw_pc, base) = {
            let frame = self.frames.last().expect("unwind runs with a frame");
            (frame.function as usize, (frame.pc - 1) as u32, frame.base)
        };

        let table = self.program.functions[function].exception_table.clone();
        for entry in &table {
            if throw_pc < entry.start_pc || throw_pc >= entry.end_pc {
                continue;
            }
            let Constant::Class(caught_name) =
                self.program.functions[function].constants[entry.caught_type as usize]
            else {
                continue;
            };
            if !self.exception_matches(exception, caught_name) {
                continue;
            }
            self.frames.last_mut().expect("unwind runs with a frame").pc =
                entry.handler_pc as usize;
            self.stack.truncate(base);
            // The handler expects the exception in the well-known slot on
            // top of the stack.
            self.stack.push(exception);
            return Ok(());
        }
        Err(VmError::Thrown(exception))
    }

    fn exception_matches(&self, exception: Value, caught_name: StringId) -> bool {
        let Some(class) = self.heap.class_of(exception) else { return false };
        let Some(caught) = self.heap.class_by_name(caught_name) else { return false };
        self.heap.is_subclass_of(class, caught)
    }

    fn maybe_collect(&mut self) {
        if self.instructions_until_gc > 0 {
            self.instructions_until_gc -= 1;
            return;
        }
        self.instructions_until_gc = self.config.gc_interval;
        if self.heap.nursery_full() {
            let roots = self.roots();
            self.heap.collect_minor(&roots);
        }
        if self.heap.should_collect() {
            let budget = self.heap.gc_config().step_budget;
            let roots = self.roots();
            self.heap.gc_step(budget, &roots);
        }
    }

    /// Explicit GC roots: evaluation stack, every frame's locals, globals,
    /// and registered classes.
    fn roots(&self) -> Vec<Value> {
        let mut roots: Vec<Value> = self.stack.clone();
        for frame in &self.frames {
            roots.extend(frame.locals.iter().copied());
        }
        roots.extend(self.globals.values().copied());
        roots.extend(self.heap.class_handles().into_iter().map(Value::Object));
        roots
    }

    // ---- Single instruction -------------------------------------------

    fn step(&mut self, instr: Instr, function: usize) -> VmResult<Flow> {
        match instr.op {
            Opcode::PushNull => self.stack.push(Value::Null),
            Opcode::PushTrue => self.stack.push(Value::Bool(true)),
            Opcode::PushFalse => self.stack.push(Value::Bool(false)),
            Opcode::PushInt0 => self.stack.push(Value::Int(0)),
            Opcode::PushInt1 => self.stack.push(Value::Int(1)),
            Opcode::PushConst => {
                let constant = self.program.functions[function].constants[instr.b as usize].clone();
                let value = self.heap.value_from_constant(&constant);
                self.stack.push(value);
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = self.peek()?;
                self.stack.push(top);
            }
            Opcode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(self.corrupt_stack());
                }
                self.stack.swap(len - 1, len - 2);
            }

            Opcode::LoadLocal => {
                let frame = self.frames.last().expect("stepping requires a frame");
                let value =
                    frame.locals.get(instr.a as usize).copied().unwrap_or(Value::Null);
                self.stack.push(value);
            }
            Opcode::StoreLocal => {
                let value = self.pop()?;
                let frame = self.frames.last_mut().expect("stepping requires a frame");
                if let Some(slot) = frame.locals.get_mut(instr.a as usize) {
                    *slot = value;
                }
            }
            Opcode::LoadGlobal => {
                let name = self.constant_name(function, instr.b);
                let value = self.globals.get(&name).copied().unwrap_or(Value::Null);
                self.stack.push(value);
            }
            Opcode::StoreGlobal | Opcode::DefineGlobal => {
                let name = self.constant_name(function, instr.b);
                let value = self.pop()?;
                self.globals.insert(name, value);
            }

            Opcode::AddInt => self.int_binary(|a, b| a.wrapping_add(b))?,
            Opcode::SubInt => self.int_binary(|a, b| a.wrapping_sub(b))?,
            Opcode::MulInt => self.int_binary(|a, b| a.wrapping_mul(b))?,
            Opcode::DivInt => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let b = self.heap.to_int(rhs);
                if b == 0 {
                    return Err(self.throw_error("DivisionByZeroError", "division by zero".into()));
                }
                let a = self.heap.to_int(lhs);
                self.stack.push(Value::Float(a as f64 / b as f64));
            }
            Opcode::ModInt => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let b = self.heap.to_int(rhs);
                if b == 0 {
                    return Err(self.throw_error("DivisionByZeroError", "modulo by zero".into()));
                }
                let a = self.heap.to_int(lhs);
                self.stack.push(Value::Int(a.wrapping_rem(b)));
            }
            Opcode::NegInt => {
                let value = self.pop()?;
                self.stack.push(Value::Int(self.heap.to_int(value).wrapping_neg()));
            }
            Opcode::AddFloat => self.float_binary(|a, b| a + b)?,
            Opcode::SubFloat => self.float_binary(|a, b| a - b)?,
            Opcode::MulFloat => self.float_binary(|a, b| a * b)?,
            Opcode::DivFloat => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let b = self.heap.to_float(rhs);
                if b == 0.0 {
                    return Err(self.throw_error("DivisionByZeroError", "division by zero".into()));
                }
                self.stack.push(Value::Float(self.heap.to_float(lhs) / b));
            }
            Opcode::ModFloat => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let b = self.heap.to_float(rhs);
                if b == 0.0 {
                    return Err(self.throw_error("DivisionByZeroError", "modulo by zero".into()));
                }
                self.stack.push(Value::Float(self.heap.to_float(lhs) % b));
            }
            Opcode::NegFloat => {
                let value = self.pop()?;
                self.stack.push(Value::Float(-self.heap.to_float(value)));
            }

            Opcode::Add => self.generic_arith(function, instr.b, ArithOp::Add)?,
            Opcode::Sub => self.generic_arith(function, instr.b, ArithOp::Sub)?,
            Opcode::Mul => self.generic_arith(function, instr.b, ArithOp::Mul)?,
            Opcode::Div => self.generic_arith(function, instr.b, ArithOp::Div)?,
            Opcode::Mod => self.generic_arith(function, instr.b, ArithOp::Mod)?,
            Opcode::Neg => {
                let value = self.pop()?;
                self.record_feedback(function, instr.b, value, value);
                let negated = match value {
                    Value::Int(i) => Value::Int(i.wrapping_neg()),
                    Value::Float(f) => Value::Float(-f),
                    other => Value::Float(-self.heap.to_float(other)),
                };
                self.stack.push(negated);
            }

            Opcode::Eq => self.compare_binary(|heap, a, b| heap.loose_eq(a, b))?,
            Opcode::Ne => self.compare_binary(|heap, a, b| !heap.loose_eq(a, b))?,
            Opcode::Identical => self.compare_binary(|heap, a, b| heap.identical(a, b))?,
            Opcode::NotIdentical => self.compare_binary(|heap, a, b| !heap.identical(a, b))?,
            Opcode::Lt => self.compare_binary(|heap, a, b| heap.compare(a, b).is_lt())?,
            Opcode::Le => self.compare_binary(|heap, a, b| heap.compare(a, b).is_le())?,
            Opcode::Gt => self.compare_binary(|heap, a, b| heap.compare(a, b).is_gt())?,
            Opcode::Ge => self.compare_binary(|heap, a, b| heap.compare(a, b).is_ge())?,
            Opcode::Spaceship => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let ordering = self.heap.compare(lhs, rhs);
                self.stack.push(Value::Int(ordering as i64));
            }
            Opcode::LtInt => self.int_compare(|a, b| a < b)?,
            Opcode::LeInt => self.int_compare(|a, b| a <= b)?,
            Opcode::GtInt => self.int_compare(|a, b| a > b)?,
            Opcode::GeInt => self.int_compare(|a, b| a >= b)?,

            Opcode::LogicAnd => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.heap.to_bool(lhs) && self.heap.to_bool(rhs);
                self.stack.push(Value::Bool(result));
            }
            Opcode::LogicOr => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.heap.to_bool(lhs) || self.heap.to_bool(rhs);
                self.stack.push(Value::Bool(result));
            }
            Opcode::LogicNot => {
                let value = self.pop()?;
                let result = !self.heap.to_bool(value);
                self.stack.push(Value::Bool(result));
            }
            Opcode::BitAnd => self.int_binary(|a, b| a & b)?,
            Opcode::BitOr => self.int_binary(|a, b| a | b)?,
            Opcode::BitXor => self.int_binary(|a, b| a ^ b)?,
            Opcode::BitNot => {
                let value = self.pop()?;
                self.stack.push(Value::Int(!self.heap.to_int(value)));
            }
            Opcode::Shl => self.int_binary(|a, b| a.wrapping_shl(b as u32))?,
            Opcode::Shr => self.int_binary(|a, b| a.wrapping_shr(b as u32))?,

            Opcode::ToInt => {
                let value = self.pop()?;
                self.stack.push(Value::Int(self.heap.to_int(value)));
            }
            Opcode::ToFloat => {
                let value = self.pop()?;
                self.stack.push(Value::Float(self.heap.to_float(value)));
            }
            Opcode::ToBool => {
                let value = self.pop()?;
                let result = self.heap.to_bool(value);
                self.stack.push(Value::Bool(result));
            }
            Opcode::ToStr => {
                let value = self.pop()?;
                let text = self.heap.to_display_string(value);
                let string = self.heap.new_string(text);
                self.stack.push(string);
            }
            Opcode::IsNull => self.tag_check(|v| v.is_null())?,
            Opcode::IsInt => self.tag_check(|v| v.is_int())?,
            Opcode::IsFloat => self.tag_check(|v| v.is_float())?,
            Opcode::IsStr => self.tag_check(|v| v.is_string())?,
            Opcode::IsArray => self.tag_check(|v| v.is_array())?,
            Opcode::IsObject => self.tag_check(|v| v.is_object())?,
            Opcode::Instanceof => {
                let value = self.pop()?;
                let class_name = self.constant_name(function, instr.b);
                let result = match (self.heap.class_of(value), self.heap.class_by_name(class_name))
                {
                    (Some(class), Some(target)) => self.heap.is_subclass_of(class, target),
                    _ => false,
                };
                self.stack.push(Value::Bool(result));
            }
            Opcode::GetType => {
                let value = self.pop()?;
                self.stack.push(Value::InternedStr(intern(value.type_name())));
            }

            Opcode::Concat => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = self.heap.concat(lhs, rhs);
                self.stack.push(result);
            }
            Opcode::StrLen => {
                let value = self.pop()?;
                self.stack.push(Value::Int(self.heap.str_len(value)));
            }
            Opcode::ArrayNew => {
                let array = self.heap.new_array();
                self.stack.push(array);
            }
            Opcode::ArrayGet => {
                let key = self.pop()?;
                let array = self.pop()?;
                let value = self.heap.array_get(array, key).unwrap_or(Value::Null);
                self.stack.push(value);
            }
            Opcode::ArraySet => {
                let value = self.pop()?;
                let key = self.pop()?;
                let array = self.pop()?;
                self.heap.array_set(array, key, value);
            }
            Opcode::ArrayPush => {
                let value = self.pop()?;
                let array = self.pop()?;
                self.heap.array_push(array, value);
            }
            Opcode::ArrayHas => {
                let key = self.pop()?;
                let array = self.pop()?;
                let result = self.heap.array_has(array, key);
                self.stack.push(Value::Bool(result));
            }
            Opcode::ArrayUnset => {
                let key = self.pop()?;
                let array = self.pop()?;
                self.heap.array_unset(array, key);
            }
            Opcode::ArrayCount => {
                let array = self.pop()?;
                self.stack.push(Value::Int(self.heap.array_count(array)));
            }

            Opcode::NewObject => {
                let args = self.pop_n(instr.a as usize)?;
                let class_name = self.constant_name(function, instr.b);
                let Some(class) = self.heap.class_by_name(class_name) else {
                    return Err(self.throw_error(
                        "Error",
                        format!("undefined class '{}'", resolve(class_name)),
                    ));
                };
                let object = self.heap.instantiate(class);
                if let Some((ctor, _)) = self.heap.resolve_method(class, intern("__construct")) {
                    self.invoke(ctor.function, Some(object), args)?;
                }
                self.stack.push(object);
            }
            Opcode::PropertyGet => {
                let object = self.pop()?;
                let value = self.property_get(function, instr.b, object)?;
                self.stack.push(value);
            }
            Opcode::PropertySet => {
                let value = self.pop()?;
                let object = self.pop()?;
                self.property_set(function, instr.b, object, value)?;
            }
            Opcode::MethodCall => {
                let args = self.pop_n(instr.a as usize)?;
                let receiver = self.pop()?;
                let result = self.method_call(function, instr.b, receiver, args)?;
                self.stack.push(result);
            }

            Opcode::Jmp => {
                self.jump(instr.offset());
            }
            Opcode::Jz => {
                let value = self.pop()?;
                if !self.heap.to_bool(value) {
                    self.jump(instr.offset());
                }
            }
            Opcode::Jnz => {
                let value = self.pop()?;
                if self.heap.to_bool(value) {
                    self.jump(instr.offset());
                }
            }
            Opcode::Call | Opcode::Spawn => {
                let args = self.pop_n(instr.a as usize)?;
                let name = self.constant_name(function, instr.b);
                let result = self.call_named(name, args)?;
                self.stack.push(result);
            }
            Opcode::CallIndirect => {
                let args = self.pop_n(instr.a as usize)?;
                let callee = self.pop()?;
                let result = self.call_value(callee, args)?;
                self.stack.push(result);
            }
            Opcode::Ret => {
                let value = self.pop()?;
                return Ok(Flow::Return(value));
            }
            Opcode::RetNull => return Ok(Flow::Return(Value::Null)),

            Opcode::Throw => {
                let value = self.pop()?;
                return Err(VmError::Thrown(value));
            }
            Opcode::BeginTry | Opcode::EndTry => {
                // Range markers; the exception table drives unwinding.
            }
        }
        Ok(Flow::Continue)
    }

    // ---- Member sites with inline caches ------------------------------

    fn property_get(&mut self, function: usize, site: u16, object: Value) -> VmResult<Value> {
        let Some(class) = self.heap.class_of(object) else {
            return Err(self.throw_error(
                "TypeError",
                format!("attempt to read property on {}", object.type_name()),
            ));
        };
        let name = self.program.functions[function].cache_sites[site as usize];

        // Fast path: cache hit on the same class and schema generation.
        let generation = self.heap.schema_generation;
        let cache = &mut self.caches[function][site as usize];
        if cache.class == Some(class) && cache.generation == generation {
            if let Some(CacheTarget::PropertySlot(slot)) = cache.target {
                cache.hits += 1;
                return Ok(self.heap.property_get_slot(object, slot).unwrap_or(Value::Null));
            }
        }

        // Miss: resolve, honoring hooks, then repopulate the slot.
        let Some(property) = self.heap.resolve_property(class, name) else {
            // Dynamic properties fall back to the by-name map.
            if let Some(value) = self.heap.property_get_raw(object, name) {
                return Ok(value);
            }
            return Err(self.throw_error(
                "Error",
                format!("undefined property ${}", resolve(name)),
            ));
        };
        self.check_visibility(property.modifiers, class, &format!("${}", resolve(name)))?;
        if let Some(hook) = property.get_hook {
            return self.invoke(hook, Some(object), Vec::new());
        }
        let cache = &mut self.caches[function][site as usize];
        cache.class = Some(class);
        cache.generation = generation;
        cache.target = Some(CacheTarget::PropertySlot(property.slot));
        cache.misses += 1;
        Ok(self.heap.property_get_slot(object, property.slot).unwrap_or(Value::Null))
    }

    fn property_set(
        &mut self,
        function: usize,
        site: u16,
        object: Value,
        value: Value,
    ) -> VmResult<()> {
        let Some(class) = self.heap.class_of(object) else {
            return Err(self.throw_error(
                "TypeError",
                format!("attempt to write property on {}", object.type_name()),
            ));
        };
        let name = self.program.functions[function].cache_sites[site as usize];

        let generation = self.heap.schema_generation;
        let cache = &mut self.caches[function][site as usize];
        if cache.class == Some(class) && cache.generation == generation {
            if let Some(CacheTarget::PropertySlot(slot)) = cache.target {
                cache.hits += 1;
                self.heap.property_set_slot(object, slot, value);
                return Ok(());
            }
        }

        match self.heap.resolve_property(class, name) {
            Some(property) => {
                self.check_visibility(property.modifiers, class, &format!("${}", resolve(name)))?;
                if property.modifiers.contains(Modifiers::READONLY) {
                    return Err(self.throw_error(
                        "Error",
                        format!("cannot modify readonly property ${}", resolve(name)),
                    ));
                }
                if let Some(hook) = property.set_hook {
                    self.invoke(hook, Some(object), vec![value])?;
                    return Ok(());
                }
                let cache = &mut self.caches[function][site as usize];
                cache.class = Some(class);
                cache.generation = generation;
                cache.target = Some(CacheTarget::PropertySlot(property.slot));
                cache.misses += 1;
                self.heap.property_set_slot(object, property.slot, value);
            }
            None => {
                // New dynamic property.
                self.heap.property_set_raw(object, name, value);
            }
        }
        Ok(())
    }

    fn method_call(
        &mut self,
        function: usize,
        site: u16,
        receiver: Value,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        let Some(class) = self.heap.class_of(receiver) else {
            return Err(self.throw_error(
                "TypeError",
                format!("attempt to call method on {}", receiver.type_name()),
            ));
        };
        let name = self.program.functions[function].cache_sites[site as usize];

        let generation = self.heap.schema_generation;
        let cache = &mut self.caches[function][site as usize];
        if cache.class == Some(class) && cache.generation == generation {
            if let Some(CacheTarget::Method(target)) = cache.target {
                cache.hits += 1;
                return self.invoke(target, Some(receiver), args);
            }
        }

        let Some((method, _)) = self.heap.resolve_method(class, name) else {
            return Err(self.throw_error(
                "Error",
                format!("call to undefined method {}", resolve(name)),
            ));
        };
        self.check_visibility(method.modifiers, class, &resolve(name))?;
        let cache = &mut self.caches[function][site as usize];
        cache.class = Some(class);
        cache.generation = generation;
        cache.target = Some(CacheTarget::Method(method.function));
        cache.misses += 1;
        self.invoke(method.function, Some(receiver), args)
    }

    /// Visibility is enforced at resolution time against the calling
    /// frame's class scope.
    fn check_visibility(
        &mut self,
        modifiers: Modifiers,
        class: Handle,
        what: &str,
    ) -> VmResult<()> {
        let visibility = modifiers.visibility();
        if visibility == Modifiers::PUBLIC {
            return Ok(());
        }
        let scope = self.frames.last().and_then(|f| f.scope);
        let allowed = match scope {
            Some(scope) if visibility == Modifiers::PRIVATE => scope == class,
            Some(scope) => {
                self.heap.is_subclass_of(scope, class) || self.heap.is_subclass_of(class, scope)
            }
            None => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(self.throw_error("Error", format!("cannot access non-public member {}", what)))
        }
    }

    // ---- Calls --------------------------------------------------------

    pub(crate) fn call_named(&mut self, name: StringId, args: Vec<Value>) -> VmResult<Value> {
        if let Some(&index) = self.functions_by_name.get(&name) {
            return self.invoke(index, None, args);
        }
        let text = resolve(name);
        if let Some(native) = self.builtins.lookup(&text) {
            return match native(self, &args) {
                Ok(value) => Ok(value),
                Err(NativeError { class, message }) => Err(self.throw_error(class, message)),
            };
        }
        Err(self.throw_error("Error", format!("call to undefined function {}()", text)))
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>) -> VmResult<Value> {
        if callee.is_string() {
            let name = self.heap.string_content(callee).unwrap_or_default();
            return self.call_named(intern(&name), args);
        }
        match self.heap.callable_kind(callee) {
            Some(CallableKind::Function(index)) => self.invoke(index, None, args),
            Some(CallableKind::Bound { function, receiver }) => {
                self.invoke(function, Some(receiver), args)
            }
            Some(CallableKind::Native(index)) => {
                let native = self.builtins.by_index(index);
                match native(self, &args) {
                    Ok(value) => Ok(value),
                    Err(NativeError { class, message }) => Err(self.throw_error(class, message)),
                }
            }
            None => Err(self.throw_error(
                "TypeError",
                format!("value of type {} is not callable", callee.type_name()),
            )),
        }
    }

    // ---- Small helpers ------------------------------------------------

    fn jump(&mut self, offset: i16) {
        let frame = self.frames.last_mut().expect("stepping requires a frame");
        frame.pc = (frame.pc as i64 + offset as i64) as usize;
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| {
            VmError::Fatal(VeloError::runtime("evaluation stack underflow".to_string()))
        })
    }

    fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < count {
            return Err(self.corrupt_stack());
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn peek(&self) -> VmResult<Value> {
        self.stack.last().copied().ok_or_else(|| {
            VmError::Fatal(VeloError::runtime("evaluation stack underflow".to_string()))
        })
    }

    fn corrupt_stack(&self) -> VmError {
        VmError::Fatal(VeloError::runtime("evaluation stack underflow".to_string()))
    }

    fn constant_name(&self, function: usize, index: u16) -> StringId {
        match &self.program.functions[function].constants[index as usize] {
            Constant::Str(id) | Constant::Class(id) | Constant::Function(id) => *id,
            other => {
                log::warn!("name constant expected, found {:?}", other);
                intern("")
            }
        }
    }

    fn int_binary(&mut self, op: impl Fn(i64, i64) -> i64) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(self.heap.to_int(lhs), self.heap.to_int(rhs));
        self.stack.push(Value::Int(result));
        Ok(())
    }

    fn float_binary(&mut self, op: impl Fn(f64, f64) -> f64) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(self.heap.to_float(lhs), self.heap.to_float(rhs));
        self.stack.push(Value::Float(result));
        Ok(())
    }

    fn int_compare(&mut self, op: impl Fn(i64, i64) -> bool) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(self.heap.to_int(lhs), self.heap.to_int(rhs));
        self.stack.push(Value::Bool(result));
        Ok(())
    }

    fn compare_binary(&mut self, op: impl Fn(&Heap, Value, Value) -> bool) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(&self.heap, lhs, rhs);
        self.stack.push(Value::Bool(result));
        Ok(())
    }

    fn tag_check(&mut self, op: impl Fn(&Value) -> bool) -> VmResult<()> {
        let value = self.pop()?;
        self.stack.push(Value::Bool(op(&value)));
        Ok(())
    }

    fn record_feedback(&mut self, function: usize, slot: u16, lhs: Value, rhs: Value) {
        let Some(cell) = self.feedback[function].get_mut(slot as usize) else { return };
        for value in [lhs, rhs] {
            match value {
                Value::Int(_) => *cell |= 0b01,
                Value::Float(_) => *cell |= 0b10,
                _ => {}
            }
        }
    }

    /// Numeric coercion for generic arithmetic: bools and integral
    /// strings become ints, everything else numeric becomes a float.
    fn coerce_numeric(&self, value: Value) -> Value {
        match value {
            Value::Int(_) | Value::Float(_) => value,
            Value::Bool(b) => Value::Int(b as i64),
            Value::Null => Value::Int(0),
            _ if value.is_string() => {
                let text = self.heap.string_content(value).unwrap_or_default();
                match text.trim().parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::Float(self.heap.to_float(value)),
                }
            }
            other => other,
        }
    }

    fn generic_arith(&mut self, function: usize, feedback: u16, op: ArithOp) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.record_feedback(function, feedback, lhs, rhs);
        let lhs = self.coerce_numeric(lhs);
        let rhs = self.coerce_numeric(rhs);

        let result = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => match op {
                ArithOp::Add => Value::Int(a.wrapping_add(b)),
                ArithOp::Sub => Value::Int(a.wrapping_sub(b)),
                ArithOp::Mul => Value::Int(a.wrapping_mul(b)),
                ArithOp::Div => {
                    if b == 0 {
                        return Err(
                            self.throw_error("DivisionByZeroError", "division by zero".into())
                        );
                    }
                    Value::Float(a as f64 / b as f64)
                }
                ArithOp::Mod => {
                    if b == 0 {
                        return Err(
                            self.throw_error("DivisionByZeroError", "modulo by zero".into())
                        );
                    }
                    Value::Int(a.wrapping_rem(b))
                }
            },
            (a, b) if a.is_array() || b.is_array() || a.is_object() || b.is_object() => {
                return Err(self.throw_error(
                    "TypeError",
                    format!(
                        "unsupported operand types: {} and {}",
                        a.type_name(),
                        b.type_name()
                    ),
                ));
            }
            (a, b) => {
                let fa = self.heap.to_float(a);
                let fb = self.heap.to_float(b);
                match op {
                    ArithOp::Add => Value::Float(fa + fb),
                    ArithOp::Sub => Value::Float(fa - fb),
                    ArithOp::Mul => Value::Float(fa * fb),
                    ArithOp::Div => {
                        if fb == 0.0 {
                            return Err(self
                                .throw_error("DivisionByZeroError", "division by zero".into()));
                        }
                        Value::Float(fa / fb)
                    }
                    ArithOp::Mod => {
                        if fb == 0.0 {
                            return Err(
                                self.throw_error("DivisionByZeroError", "modulo by zero".into())
                            );
                        }
                        Value::Float(fa % fb)
                    }
                }
            }
        };
        self.stack.push(result);
        Ok(())
    }

    // ---- Exceptions ---------------------------------------------------

    /// Build and throw a runtime error of a pre-registered class.
    pub(crate) fn throw_error(&mut self, class: &str, message: String) -> VmError {
        let class_name = intern(class);
        let Some(class) = self.heap.class_by_name(class_name) else {
            return VmError::Fatal(VeloError::runtime(message));
        };
        let exception = self.heap.instantiate(class);
        let msg = self.heap.new_string(message);
        self.heap.property_set_raw(exception, intern("message"), msg);
        VmError::Thrown(exception)
    }

    fn exception_message(&self, exception: Value) -> String {
        let class_name = self
            .heap
            .class_of(exception)
            .and_then(|c| self.heap.class_def(c))
            .map(|d| resolve(d.name))
            .unwrap_or_else(|| "Exception".to_string());
        let message = self
            .heap
            .property_get_raw(exception, intern("message"))
            .map(|m| self.heap.to_display_string(m))
            .unwrap_or_default();
        format!("{}: {}", class_name, message)
    }
}

enum Flow {
    Continue,
    Return(Value),
}

#[derive(Debug, Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Pre-register the catchable error hierarchy: `Exception` with a
/// `message` property and `getMessage`, plus its standard subclasses.
fn register_error_classes(program: &mut CompiledProgram, heap: &mut Heap) {
    if heap.class_by_name(intern("Exception")).is_some() {
        return;
    }

    // getMessage body, hand-assembled: load $this, read message, return.
    let mut get_message = CompiledFunction::new(intern("Exception::getMessage"));
    get_message.flags = FunctionFlags::METHOD;
    get_message.local_count = 1;
    get_message.max_stack = 1;
    get_message.cache_sites.push(intern("message"));
    get_message.bytecode = vec![
        Instr::with_a(Opcode::LoadLocal, 0),
        Instr::with_b(Opcode::PropertyGet, 0),
        Instr::new(Opcode::Ret),
    ];
    let get_message_index = program.functions.len() as u32;
    program.functions.push(get_message);

    // __construct($message = "") storing into the property.
    let mut constructor = CompiledFunction::new(intern("Exception::__construct"));
    constructor.flags = FunctionFlags::METHOD;
    constructor.local_count = 2;
    constructor.arg_count = 1;
    constructor.max_stack = 2;
    constructor.constants.push(Constant::Str(intern("")));
    constructor.params.push(velo_bytecode::ParamSpec {
        name: intern("$message"),
        default: Some(0),
        variadic: false,
    });
    constructor.cache_sites.push(intern("message"));
    constructor.bytecode = vec![
        Instr::with_a(Opcode::LoadLocal, 0),
        Instr::with_a(Opcode::LoadLocal, 1),
        Instr::with_b(Opcode::PropertySet, 0),
        Instr::new(Opcode::RetNull),
    ];
    let constructor_index = program.functions.len() as u32;
    program.functions.push(constructor);

    let exception = ClassSpec {
        name: intern("Exception"),
        parent: None,
        interfaces: Vec::new(),
        properties: vec![PropertySpec {
            name: intern("message"),
            get_hook: None,
            set_hook: None,
            default: Some(Constant::Str(intern(""))),
            modifiers: Modifiers::PUBLIC,
            attributes: Vec::new(),
        }],
        methods: vec![
            MethodSpec {
                name: intern("getMessage"),
                function: get_message_index,
                modifiers: Modifiers::PUBLIC,
                attributes: Vec::new(),
            },
            MethodSpec {
                name: intern("__construct"),
                function: constructor_index,
                modifiers: Modifiers::PUBLIC,
                attributes: Vec::new(),
            },
        ],
        attributes: Vec::new(),
        is_final: false,
        is_abstract: false,
    };
    heap.register_class(&exception);

    for name in ["Error", "TypeError", "ArgumentCountError", "DivisionByZeroError"] {
        let subclass = ClassSpec {
            name: intern(name),
            parent: Some(intern("Exception")),
            interfaces: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            is_final: false,
            is_abstract: false,
        };
        heap.register_class(&subclass);
    }
}

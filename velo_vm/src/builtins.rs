//! Built-in native functions
//!
//! Registered once at VM construction into a name-to-native map. Natives
//! receive the VM so they can reach the heap and output buffer; a failed
//! coercion surfaces as a `TypeError`-class exception.

use crate::vm::Vm;
use std::collections::HashMap;
use velo_common::intern;
use velo_runtime::Value;

/// Error raised by a native function; the VM turns it into a thrown
/// exception of the named class.
pub struct NativeError {
    pub class: &'static str,
    pub message: String,
}

impl NativeError {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self { class: "TypeError", message: message.into() }
    }
}

/// Signature of a native function.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, NativeError>;

/// Registry of built-in callables.
pub struct BuiltinRegistry {
    by_name: HashMap<String, u32>,
    entries: Vec<NativeFn>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = Self { by_name: HashMap::new(), entries: Vec::new() };

        registry.register("echo", builtin_echo);
        registry.register("print", builtin_print);
        registry.register("strlen", builtin_strlen);
        registry.register("count", builtin_count);
        registry.register("isset", builtin_isset);
        registry.register("is_null", builtin_is_null);
        registry.register("is_int", builtin_is_int);
        registry.register("is_float", builtin_is_float);
        registry.register("is_string", builtin_is_string);
        registry.register("is_array", builtin_is_array);
        registry.register("is_object", builtin_is_object);
        registry.register("is_bool", builtin_is_bool);
        registry.register("gettype", builtin_gettype);
        registry.register("intval", builtin_intval);
        registry.register("floatval", builtin_floatval);
        registry.register("strval", builtin_strval);
        registry.register("boolval", builtin_boolval);
        registry.register("abs", builtin_abs);
        registry.register("min", builtin_min);
        registry.register("max", builtin_max);
        registry.register("array_keys", builtin_array_keys);
        registry.register("array_key_exists", builtin_array_key_exists);
        registry.register("get_class", builtin_get_class);
        registry.register("method_exists", builtin_method_exists);
        registry.register("method_attributes", builtin_method_attributes);
        registry.register("property_attributes", builtin_property_attributes);
        registry.register("__clone", builtin_clone);

        registry
    }

    fn register(&mut self, name: &str, native: NativeFn) {
        let index = self.entries.len() as u32;
        self.entries.push(native);
        self.by_name.insert(name.to_string(), index);
    }

    pub fn lookup(&self, name: &str) -> Option<NativeFn> {
        self.by_name.get(name).map(|&i| self.entries[i as usize])
    }

    pub fn by_index(&self, index: u32) -> NativeFn {
        self.entries[index as usize]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<(), NativeError> {
    if args.len() < count {
        return Err(NativeError {
            class: "ArgumentCountError",
            message: format!("{}() expects {} argument(s), {} given", name, count, args.len()),
        });
    }
    Ok(())
}

// ---- Output ------------------------------------------------------------

fn builtin_echo(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    for &arg in args {
        let text = vm.heap.to_display_string(arg);
        vm.write_output(&text);
    }
    Ok(Value::Null)
}

fn builtin_print(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("print", args, 1)?;
    let text = vm.heap.to_display_string(args[0]);
    vm.write_output(&text);
    Ok(Value::Int(1))
}

// ---- Strings and arrays -------------------------------------------------

fn builtin_strlen(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("strlen", args, 1)?;
    if !args[0].is_string() {
        return Err(NativeError::type_error(format!(
            "strlen() expects a string, {} given",
            args[0].type_name()
        )));
    }
    Ok(Value::Int(vm.heap.str_len(args[0])))
}

fn builtin_count(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("count", args, 1)?;
    if !args[0].is_array() {
        return Err(NativeError::type_error(format!(
            "count() expects an array, {} given",
            args[0].type_name()
        )));
    }
    Ok(Value::Int(vm.heap.array_count(args[0])))
}

fn builtin_array_keys(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("array_keys", args, 1)?;
    Ok(vm.heap.array_keys(args[0]))
}

fn builtin_array_key_exists(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("array_key_exists", args, 2)?;
    Ok(Value::Bool(vm.heap.array_has(args[1], args[0])))
}

// ---- Type predicates and conversions ------------------------------------

fn builtin_isset(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::Bool(args.iter().all(|v| !v.is_null())))
}

fn builtin_is_null(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("is_null", args, 1)?;
    Ok(Value::Bool(args[0].is_null()))
}

fn builtin_is_int(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("is_int", args, 1)?;
    Ok(Value::Bool(args[0].is_int()))
}

fn builtin_is_float(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("is_float", args, 1)?;
    Ok(Value::Bool(args[0].is_float()))
}

fn builtin_is_string(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("is_string", args, 1)?;
    Ok(Value::Bool(args[0].is_string()))
}

fn builtin_is_array(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("is_array", args, 1)?;
    Ok(Value::Bool(args[0].is_array()))
}

fn builtin_is_object(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("is_object", args, 1)?;
    Ok(Value::Bool(args[0].is_object()))
}

fn builtin_is_bool(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("is_bool", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
}

fn builtin_gettype(_vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("gettype", args, 1)?;
    Ok(Value::InternedStr(intern(args[0].type_name())))
}

fn builtin_intval(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("intval", args, 1)?;
    Ok(Value::Int(vm.heap.to_int(args[0])))
}

fn builtin_floatval(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("floatval", args, 1)?;
    Ok(Value::Float(vm.heap.to_float(args[0])))
}

fn builtin_strval(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("strval", args, 1)?;
    let text = vm.heap.to_display_string(args[0]);
    Ok(vm.heap.new_string(text))
}

fn builtin_boolval(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("boolval", args, 1)?;
    Ok(Value::Bool(vm.heap.to_bool(args[0])))
}

// ---- Math ---------------------------------------------------------------

fn builtin_abs(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("abs", args, 1)?;
    match args[0] {
        Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other if other.is_string() => Ok(Value::Float(vm.heap.to_float(other).abs())),
        other => Err(NativeError::type_error(format!(
            "abs() expects a number, {} given",
            other.type_name()
        ))),
    }
}

fn builtin_min(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("min", args, 1)?;
    let mut best = args[0];
    for &candidate in &args[1..] {
        if vm.heap.compare(candidate, best).is_lt() {
            best = candidate;
        }
    }
    Ok(best)
}

fn builtin_max(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("max", args, 1)?;
    let mut best = args[0];
    for &candidate in &args[1..] {
        if vm.heap.compare(candidate, best).is_gt() {
            best = candidate;
        }
    }
    Ok(best)
}

// ---- Objects and reflection ---------------------------------------------

fn builtin_get_class(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("get_class", args, 1)?;
    match vm.heap.class_of(args[0]).and_then(|c| vm.heap.class_def(c)) {
        Some(def) => Ok(Value::InternedStr(def.name)),
        None => Err(NativeError::type_error(format!(
            "get_class() expects an object, {} given",
            args[0].type_name()
        ))),
    }
}

fn builtin_method_exists(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("method_exists", args, 2)?;
    let class = match args[0] {
        object if object.is_object() => vm.heap.class_of(object),
        name => vm
            .heap
            .string_content(name)
            .and_then(|n| vm.heap.class_by_name(intern(&n))),
    };
    let Some(class) = class else {
        return Ok(Value::Bool(false));
    };
    let method = vm.heap.string_content(args[1]).unwrap_or_default();
    Ok(Value::Bool(vm.heap.resolve_method(class, intern(&method)).is_some()))
}

fn attribute_names_to_array(vm: &mut Vm, names: Vec<velo_common::StringId>) -> Value {
    let array = vm.heap.new_array();
    for name in names {
        vm.heap.array_push(array, Value::InternedStr(name));
    }
    array
}

fn builtin_method_attributes(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("method_attributes", args, 2)?;
    let class_name = vm.heap.string_content(args[0]).unwrap_or_default();
    let method_name = vm.heap.string_content(args[1]).unwrap_or_default();
    let names = vm
        .heap
        .class_by_name(intern(&class_name))
        .and_then(|c| vm.heap.resolve_method(c, intern(&method_name)))
        .map(|(m, _)| m.attributes)
        .unwrap_or_default();
    Ok(attribute_names_to_array(vm, names))
}

fn builtin_property_attributes(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("property_attributes", args, 2)?;
    let class_name = vm.heap.string_content(args[0]).unwrap_or_default();
    let prop_name = vm.heap.string_content(args[1]).unwrap_or_default();
    let names = vm
        .heap
        .class_by_name(intern(&class_name))
        .and_then(|c| vm.heap.resolve_property(c, intern(&prop_name)))
        .map(|p| p.attributes)
        .unwrap_or_default();
    Ok(attribute_names_to_array(vm, names))
}

fn builtin_clone(vm: &mut Vm, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("__clone", args, 1)?;
    match args[0] {
        object if object.is_object() => Ok(vm.heap.clone_object(object)),
        other => Ok(other),
    }
}

//! Heap objects: strings, arrays, classes, objects, callables
//!
//! The heap is a slab of refcounted objects addressed by [`Handle`]. All
//! mutation goes through heap methods so the refcount bookkeeping and the
//! collector's write barrier stay balanced. Loose equality, ordering, and
//! coercions live here because they need to read heap contents.

use crate::gc::GcState;
use crate::value::{Handle, Value};
use hashbrown::HashMap;
use std::cmp::Ordering;
use velo_bytecode::{ClassSpec, Constant};
use velo_common::{intern, resolve, StringId};
use velo_parser::Modifiers;

/// Array keys are integers or interned strings. Integer-looking string
/// keys normalize to integers at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(StringId),
}

/// Ordered map with PHP array semantics: insertion order preserved,
/// `[]=` appends with the next integer key.
#[derive(Debug, Clone, Default)]
pub struct VArray {
    entries: Vec<(ArrayKey, Value)>,
    index: HashMap<ArrayKey, usize>,
    next_index: i64,
}

impl VArray {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(ArrayKey, Value)] {
        &self.entries
    }

    fn get(&self, key: &ArrayKey) -> Option<Value> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    fn set(&mut self, key: ArrayKey, value: Value) -> Option<Value> {
        if let ArrayKey::Int(i) = key {
            if i >= self.next_index {
                self.next_index = i + 1;
            }
        }
        match self.index.get(&key) {
            Some(&i) => {
                let old = self.entries[i].1;
                self.entries[i].1 = value;
                Some(old)
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    fn push(&mut self, value: Value) -> ArrayKey {
        let key = ArrayKey::Int(self.next_index);
        self.set(key, value);
        key
    }

    fn unset(&mut self, key: &ArrayKey) -> Option<Value> {
        let position = self.index.remove(key)?;
        let (_, old) = self.entries.remove(position);
        for (_, i) in self.index.iter_mut() {
            if *i > position {
                *i -= 1;
            }
        }
        Some(old)
    }
}

/// Property metadata on a class.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: StringId,
    /// Slot in the object's storage array.
    pub slot: usize,
    pub default: Value,
    pub modifiers: Modifiers,
    pub attributes: Vec<StringId>,
    /// Program function indices of the hook bodies.
    pub get_hook: Option<u32>,
    pub set_hook: Option<u32>,
}

/// Method metadata on a class.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: StringId,
    /// Program function index.
    pub function: u32,
    pub modifiers: Modifiers,
    pub attributes: Vec<StringId>,
}

/// A runtime class. Slots cover inherited properties; the inheritance
/// chain is acyclic by construction (parents register first).
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: StringId,
    pub parent: Option<Handle>,
    pub interfaces: Vec<StringId>,
    pub slots: Vec<StringId>,
    pub properties: HashMap<StringId, PropertyDef>,
    pub methods: HashMap<StringId, MethodDef>,
    pub attributes: Vec<StringId>,
    pub is_final: bool,
    pub is_abstract: bool,
}

/// What a callable value points at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallableKind {
    /// Compiled function by program index.
    Function(u32),
    /// Native builtin by registry index.
    Native(u32),
    /// Compiled method with a bound receiver.
    Bound { function: u32, receiver: Value },
}

/// Object payload variants.
#[derive(Debug, Clone)]
pub enum HeapKind {
    Str(String),
    Array(VArray),
    Class(ClassDef),
    Object { class: Handle, slots: Vec<Value>, dynamic: HashMap<StringId, Value> },
    Callable(CallableKind),
    Resource(i64),
}

/// Slab entry: payload plus collector bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct GcObject {
    pub(crate) kind: HeapKind,
    pub(crate) refcount: u32,
    /// Tricolor mark: 0 white, 1 gray, 2 black.
    pub(crate) color: u8,
    /// Minor collections survived while young.
    pub(crate) age: u8,
    pub(crate) old: bool,
    pub(crate) size: usize,
}

/// The object heap plus collector state.
pub struct Heap {
    pub(crate) objects: Vec<Option<GcObject>>,
    pub(crate) free: Vec<Handle>,
    pub(crate) gc: GcState,
    /// Bumped whenever a class gains or loses a member; inline caches
    /// validate against it.
    pub schema_generation: u64,
    classes_by_name: HashMap<StringId, Handle>,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_config(crate::gc::GcConfig::default())
    }

    pub fn with_config(config: crate::gc::GcConfig) -> Self {
        Self {
            objects: Vec::new(),
            free: Vec::new(),
            gc: GcState::new(config),
            schema_generation: 0,
            classes_by_name: HashMap::new(),
        }
    }

    // ---- Allocation and refcounting -----------------------------------

    pub(crate) fn alloc(&mut self, kind: HeapKind) -> Handle {
        let size = approximate_size(&kind);
        let object = GcObject { kind, refcount: 1, color: 0, age: 0, old: false, size };
        let handle = match self.free.pop() {
            Some(handle) => {
                self.objects[handle as usize] = Some(object);
                handle
            }
            None => {
                self.objects.push(Some(object));
                (self.objects.len() - 1) as Handle
            }
        };
        self.gc.note_allocation(handle, size);
        handle
    }

    pub fn retain(&mut self, value: Value) {
        if let Some(handle) = value.handle() {
            if let Some(object) = self.objects.get_mut(handle as usize).and_then(|o| o.as_mut()) {
                object.refcount += 1;
            }
        }
    }

    /// Decrement and free at zero. The collector may already have freed a
    /// cycle member, so a missing object is tolerated.
    pub fn release(&mut self, value: Value) {
        let Some(handle) = value.handle() else { return };
        let Some(object) = self.objects.get_mut(handle as usize).and_then(|o| o.as_mut()) else {
            return;
        };
        object.refcount = object.refcount.saturating_sub(1);
        if object.refcount == 0 && !self.gc.defers_free() {
            self.free_object(handle);
        }
    }

    pub(crate) fn free_object(&mut self, handle: Handle) {
        let Some(object) = self.objects.get_mut(handle as usize).and_then(|o| o.take()) else {
            return;
        };
        self.gc.note_free(handle, object.size);
        self.free.push(handle);
        // Children lose one reference each.
        for child in children_of(&object.kind) {
            self.release(child);
        }
    }

    pub(crate) fn is_live(&self, handle: Handle) -> bool {
        self.objects.get(handle as usize).map_or(false, |o| o.is_some())
    }

    pub fn refcount(&self, handle: Handle) -> u32 {
        self.objects
            .get(handle as usize)
            .and_then(|o| o.as_ref())
            .map_or(0, |o| o.refcount)
    }

    pub(crate) fn kind(&self, handle: Handle) -> Option<&HeapKind> {
        self.objects.get(handle as usize).and_then(|o| o.as_ref()).map(|o| &o.kind)
    }

    // ---- Strings ------------------------------------------------------

    pub fn new_string(&mut self, content: String) -> Value {
        Value::Str(self.alloc(HeapKind::Str(content)))
    }

    /// String content of a value, when it is one.
    pub fn string_content(&self, value: Value) -> Option<String> {
        match value {
            Value::InternedStr(id) => Some(resolve(id)),
            Value::Str(handle) => match self.kind(handle)? {
                HeapKind::Str(s) => Some(s.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn concat(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut out = self.to_display_string(lhs);
        out.push_str(&self.to_display_string(rhs));
        self.new_string(out)
    }

    pub fn str_len(&self, value: Value) -> i64 {
        self.string_content(value).map_or(0, |s| s.len() as i64)
    }

    // ---- Arrays -------------------------------------------------------

    pub fn new_array(&mut self) -> Value {
        Value::Array(self.alloc(HeapKind::Array(VArray::default())))
    }

    /// Normalize a value to an array key: the string form of an
    /// integer-valued string becomes the integer.
    pub fn normalize_key(&self, key: Value) -> ArrayKey {
        match key {
            Value::Int(i) => ArrayKey::Int(i),
            Value::Bool(b) => ArrayKey::Int(b as i64),
            Value::Float(f) => ArrayKey::Int(f as i64),
            Value::Null => ArrayKey::Str(intern("")),
            other => {
                let text = self.string_content(other).unwrap_or_default();
                match text.parse::<i64>() {
                    Ok(i) if i.to_string() == text => ArrayKey::Int(i),
                    _ => ArrayKey::Str(intern(&text)),
                }
            }
        }
    }

    pub fn array_get(&self, array: Value, key: Value) -> Option<Value> {
        let handle = array.handle()?;
        let key = self.normalize_key(key);
        match self.kind(handle)? {
            HeapKind::Array(a) => a.get(&key),
            _ => None,
        }
    }

    pub fn array_set(&mut self, array: Value, key: Value, value: Value) {
        let Some(handle) = array.handle() else { return };
        let key = self.normalize_key(key);
        self.retain(value);
        self.write_barrier(handle, value);
        let old = match self.objects.get_mut(handle as usize).and_then(|o| o.as_mut()) {
            Some(GcObject { kind: HeapKind::Array(a), .. }) => a.set(key, value),
            _ => None,
        };
        if let Some(old) = old {
            self.release(old);
        }
    }

    pub fn array_push(&mut self, array: Value, value: Value) {
        let Some(handle) = array.handle() else { return };
        self.retain(value);
        self.write_barrier(handle, value);
        if let Some(GcObject { kind: HeapKind::Array(a), .. }) =
            self.objects.get_mut(handle as usize).and_then(|o| o.as_mut())
        {
            a.push(value);
        }
    }

    pub fn array_has(&self, array: Value, key: Value) -> bool {
        self.array_get(array, key).is_some()
    }

    pub fn array_unset(&mut self, array: Value, key: Value) {
        let Some(handle) = array.handle() else { return };
        let key = self.normalize_key(key);
        let old = match self.objects.get_mut(handle as usize).and_then(|o| o.as_mut()) {
            Some(GcObject { kind: HeapKind::Array(a), .. }) => a.unset(&key),
            _ => None,
        };
        if let Some(old) = old {
            self.release(old);
        }
    }

    pub fn array_count(&self, array: Value) -> i64 {
        match array.handle().and_then(|h| self.kind(h)) {
            Some(HeapKind::Array(a)) => a.len() as i64,
            _ => 0,
        }
    }

    /// The array's keys as a fresh array, in insertion order.
    pub fn array_keys(&mut self, array: Value) -> Value {
        let keys: Vec<ArrayKey> = match array.handle().and_then(|h| self.kind(h)) {
            Some(HeapKind::Array(a)) => a.entries().iter().map(|&(k, _)| k).collect(),
            _ => Vec::new(),
        };
        let out = self.new_array();
        for key in keys {
            let value = match key {
                ArrayKey::Int(i) => Value::Int(i),
                ArrayKey::Str(s) => Value::InternedStr(s),
            };
            self.array_push(out, value);
        }
        out
    }

    /// Instantiate an array-literal constant template.
    pub fn array_from_template(&mut self, template: &[(Option<Constant>, Constant)]) -> Value {
        let array = self.new_array();
        for (key, value) in template {
            let value = self.value_from_constant(value);
            match key {
                Some(key) => {
                    let key = self.value_from_constant(key);
                    self.array_set(array, key, value);
                }
                None => self.array_push(array, value),
            }
        }
        array
    }

    pub fn value_from_constant(&mut self, constant: &Constant) -> Value {
        match constant {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::Str(s) => Value::InternedStr(*s),
            Constant::Class(s) | Constant::Function(s) => Value::InternedStr(*s),
            Constant::ArrayTemplate(entries) => self.array_from_template(entries),
        }
    }

    // ---- Classes and objects ------------------------------------------

    /// Register a class shape. Parents must register first; a missing
    /// parent leaves the class parentless and is the caller's diagnostic.
    pub fn register_class(&mut self, spec: &ClassSpec) -> Handle {
        let parent = spec.parent.and_then(|name| self.classes_by_name.get(&name).copied());
        let mut slots = Vec::new();
        let mut properties: HashMap<StringId, PropertyDef> = HashMap::new();
        if let Some(parent_handle) = parent {
            if let Some(HeapKind::Class(parent_class)) = self.kind(parent_handle) {
                slots = parent_class.slots.clone();
                properties = parent_class.properties.clone();
            }
        }

        let mut methods: HashMap<StringId, MethodDef> = HashMap::new();
        if let Some(parent_handle) = parent {
            if let Some(HeapKind::Class(parent_class)) = self.kind(parent_handle) {
                methods = parent_class.methods.clone();
            }
        }

        let mut defaults = Vec::new();
        for prop in &spec.properties {
            let default = prop
                .default
                .as_ref()
                .map(|c| self.value_from_constant(c))
                .unwrap_or(Value::Null);
            defaults.push((prop, default));
        }
        for (prop, default) in defaults {
            let slot = match properties.get(&prop.name) {
                Some(existing) => existing.slot,
                None => {
                    slots.push(prop.name);
                    slots.len() - 1
                }
            };
            properties.insert(
                prop.name,
                PropertyDef {
                    name: prop.name,
                    slot,
                    default,
                    modifiers: prop.modifiers,
                    attributes: prop.attributes.clone(),
                    get_hook: prop.get_hook,
                    set_hook: prop.set_hook,
                },
            );
        }
        for method in &spec.methods {
            methods.insert(
                method.name,
                MethodDef {
                    name: method.name,
                    function: method.function,
                    modifiers: method.modifiers,
                    attributes: method.attributes.clone(),
                },
            );
        }

        let class = ClassDef {
            name: spec.name,
            parent,
            interfaces: spec.interfaces.clone(),
            slots,
            properties,
            methods,
            attributes: spec.attributes.clone(),
            is_final: spec.is_final,
            is_abstract: spec.is_abstract,
        };
        let handle = self.alloc(HeapKind::Class(class));
        self.classes_by_name.insert(spec.name, handle);
        self.schema_generation += 1;
        handle
    }

    pub fn class_by_name(&self, name: StringId) -> Option<Handle> {
        self.classes_by_name.get(&name).copied()
    }

    /// Every registered class handle; these are permanent GC roots.
    pub fn class_handles(&self) -> Vec<Handle> {
        self.classes_by_name.values().copied().collect()
    }

    pub fn class_def(&self, handle: Handle) -> Option<&ClassDef> {
        match self.kind(handle)? {
            HeapKind::Class(def) => Some(def),
            _ => None,
        }
    }

    pub fn class_of(&self, object: Value) -> Option<Handle> {
        match object.handle().and_then(|h| self.kind(h)) {
            Some(HeapKind::Object { class, .. }) => Some(*class),
            _ => None,
        }
    }

    /// Instantiate an object with the class's declared property defaults.
    pub fn instantiate(&mut self, class: Handle) -> Value {
        let defaults = match self.class_def(class) {
            Some(def) => {
                let mut defaults = vec![Value::Null; def.slots.len()];
                for prop in def.properties.values() {
                    defaults[prop.slot] = prop.default;
                }
                defaults
            }
            None => Vec::new(),
        };
        for &default in &defaults {
            self.retain(default);
        }
        let handle =
            self.alloc(HeapKind::Object { class, slots: defaults, dynamic: HashMap::new() });
        Value::Object(handle)
    }

    /// Walk the ancestor chain to the first class defining `method`.
    pub fn resolve_method(&self, class: Handle, method: StringId) -> Option<(MethodDef, Handle)> {
        let mut current = Some(class);
        while let Some(handle) = current {
            let def = self.class_def(handle)?;
            if let Some(found) = def.methods.get(&method) {
                return Some((found.clone(), handle));
            }
            current = def.parent;
        }
        None
    }

    /// Walk the ancestor chain to the first class defining `property`.
    pub fn resolve_property(&self, class: Handle, property: StringId) -> Option<PropertyDef> {
        let mut current = Some(class);
        while let Some(handle) = current {
            let def = self.class_def(handle)?;
            if let Some(found) = def.properties.get(&property) {
                return Some(found.clone());
            }
            current = def.parent;
        }
        None
    }

    /// Is `class` the same as or a descendant of `ancestor`?
    pub fn is_subclass_of(&self, class: Handle, ancestor: Handle) -> bool {
        let mut current = Some(class);
        while let Some(handle) = current {
            if handle == ancestor {
                return true;
            }
            current = self.class_def(handle).and_then(|d| d.parent);
        }
        false
    }

    pub fn property_get_raw(&self, object: Value, property: StringId) -> Option<Value> {
        let handle = object.handle()?;
        match self.kind(handle)? {
            HeapKind::Object { class, slots, dynamic } => {
                let slot_value = self
                    .class_def(*class)
                    .and_then(|d| d.properties.get(&property))
                    .map(|p| slots.get(p.slot).copied().unwrap_or(Value::Null));
                slot_value.or_else(|| dynamic.get(&property).copied())
            }
            _ => None,
        }
    }

    pub fn property_get_slot(&self, object: Value, slot: usize) -> Option<Value> {
        match object.handle().and_then(|h| self.kind(h)) {
            Some(HeapKind::Object { slots, .. }) => slots.get(slot).copied(),
            _ => None,
        }
    }

    pub fn property_set_raw(&mut self, object: Value, property: StringId, value: Value) {
        let Some(handle) = object.handle() else { return };
        let slot = self
            .class_of(object)
            .and_then(|c| self.class_def(c))
            .and_then(|d| d.properties.get(&property))
            .map(|p| p.slot);
        self.retain(value);
        self.write_barrier(handle, value);
        let old = match self.objects.get_mut(handle as usize).and_then(|o| o.as_mut()) {
            Some(GcObject { kind: HeapKind::Object { slots, dynamic, .. }, .. }) => match slot {
                Some(slot) if slot < slots.len() => {
                    let old = slots[slot];
                    slots[slot] = value;
                    Some(old)
                }
                _ => dynamic.insert(property, value),
            },
            _ => None,
        };
        if let Some(old) = old {
            self.release(old);
        }
    }

    pub fn property_set_slot(&mut self, object: Value, slot: usize, value: Value) {
        let Some(handle) = object.handle() else { return };
        self.retain(value);
        self.write_barrier(handle, value);
        let old = match self.objects.get_mut(handle as usize).and_then(|o| o.as_mut()) {
            Some(GcObject { kind: HeapKind::Object { slots, .. }, .. }) if slot < slots.len() => {
                let old = slots[slot];
                slots[slot] = value;
                Some(old)
            }
            _ => None,
        };
        if let Some(old) = old {
            self.release(old);
        }
    }

    /// Shallow copy of an object, per `clone` semantics.
    pub fn clone_object(&mut self, object: Value) -> Value {
        let Some(handle) = object.handle() else { return object };
        let cloned = match self.kind(handle) {
            Some(HeapKind::Object { class, slots, dynamic }) => {
                (*class, slots.clone(), dynamic.clone())
            }
            _ => return object,
        };
        for &v in cloned.1.iter() {
            self.retain(v);
        }
        for &v in cloned.2.values() {
            self.retain(v);
        }
        Value::Object(self.alloc(HeapKind::Object {
            class: cloned.0,
            slots: cloned.1,
            dynamic: cloned.2,
        }))
    }

    pub fn new_callable(&mut self, kind: CallableKind) -> Value {
        if let CallableKind::Bound { receiver, .. } = kind {
            self.retain(receiver);
        }
        Value::Callable(self.alloc(HeapKind::Callable(kind)))
    }

    pub fn callable_kind(&self, value: Value) -> Option<CallableKind> {
        match value.handle().and_then(|h| self.kind(h)) {
            Some(HeapKind::Callable(kind)) => Some(*kind),
            _ => None,
        }
    }

    // ---- Coercions ----------------------------------------------------

    pub fn to_bool(&self, value: Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            Value::InternedStr(_) | Value::Str(_) => {
                let s = self.string_content(value).unwrap_or_default();
                !s.is_empty() && s != "0"
            }
            Value::Array(_) => self.array_count(value) != 0,
            _ => true,
        }
    }

    pub fn to_int(&self, value: Value) -> i64 {
        match value {
            Value::Null => 0,
            Value::Bool(b) => b as i64,
            Value::Int(i) => i,
            Value::Float(f) => f as i64,
            Value::InternedStr(_) | Value::Str(_) => {
                numeric_prefix(&self.string_content(value).unwrap_or_default()) as i64
            }
            _ => 0,
        }
    }

    pub fn to_float(&self, value: Value) -> f64 {
        match value {
            Value::Null => 0.0,
            Value::Bool(b) => b as i64 as f64,
            Value::Int(i) => i as f64,
            Value::Float(f) => f,
            Value::InternedStr(_) | Value::Str(_) => {
                numeric_prefix(&self.string_content(value).unwrap_or_default())
            }
            _ => 0.0,
        }
    }

    /// The string the language would print for a value.
    pub fn to_display_string(&self, value: Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(f),
            Value::InternedStr(_) | Value::Str(_) => {
                self.string_content(value).unwrap_or_default()
            }
            Value::Array(_) => "Array".to_string(),
            Value::Object(_) => {
                let name = self
                    .class_of(value)
                    .and_then(|c| self.class_def(c))
                    .map(|d| resolve(d.name))
                    .unwrap_or_else(|| "object".to_string());
                format!("Object({})", name)
            }
            Value::Callable(_) => "Callable".to_string(),
            Value::Resource(_) => "Resource".to_string(),
        }
    }

    // ---- Comparison ---------------------------------------------------

    /// Loose `==` following the language's fixed table:
    /// `null == false == 0 == "" == []`; numeric strings compare
    /// numerically; arrays compare by size then per-key in the first
    /// array's order.
    pub fn loose_eq(&self, lhs: Value, rhs: Value) -> bool {
        use Value::*;
        match (lhs, rhs) {
            (Null, Null) => true,
            (Null, other) | (other, Null) => match other {
                Bool(b) => !b,
                Int(i) => i == 0,
                Float(f) => f == 0.0,
                _ if other.is_string() => {
                    self.string_content(other).map_or(true, |s| s.is_empty())
                }
                Array(_) => self.array_count(other) == 0,
                _ => false,
            },
            (Bool(a), other) | (other, Bool(a)) => a == self.to_bool(other),
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => (a as f64) == b,
            (a, b) if a.is_string() && b.is_string() => {
                let sa = self.string_content(a).unwrap_or_default();
                let sb = self.string_content(b).unwrap_or_default();
                match (parse_numeric(&sa), parse_numeric(&sb)) {
                    (Some(na), Some(nb)) => na == nb,
                    _ => sa == sb,
                }
            }
            (a, b) if a.is_string() && b.is_numeric() => {
                let sa = self.string_content(a).unwrap_or_default();
                match parse_numeric(&sa) {
                    Some(na) => na == self.to_float(b),
                    None => false,
                }
            }
            (a, b) if a.is_numeric() && b.is_string() => self.loose_eq(b, a),
            (Array(ha), Array(hb)) => self.arrays_loose_eq(ha, hb),
            (Object(ha), Object(hb)) => ha == hb,
            _ => false,
        }
    }

    fn arrays_loose_eq(&self, lhs: Handle, rhs: Handle) -> bool {
        let (Some(HeapKind::Array(a)), Some(HeapKind::Array(b))) =
            (self.kind(lhs), self.kind(rhs))
        else {
            return false;
        };
        if a.len() != b.len() {
            return false;
        }
        for (key, value) in a.entries() {
            match b.get(key) {
                Some(other) => {
                    if !self.loose_eq(*value, other) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// Strict `===`: equal tags first, then content for strings and
    /// order-sensitive equality for arrays.
    pub fn identical(&self, lhs: Value, rhs: Value) -> bool {
        use Value::*;
        match (lhs, rhs) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (a, b) if a.is_string() && b.is_string() => {
                self.string_content(a) == self.string_content(b)
            }
            (Array(ha), Array(hb)) => {
                if ha == hb {
                    return true;
                }
                let (Some(HeapKind::Array(a)), Some(HeapKind::Array(b))) =
                    (self.kind(ha), self.kind(hb))
                else {
                    return false;
                };
                a.len() == b.len()
                    && a.entries().iter().zip(b.entries().iter()).all(|((ka, va), (kb, vb))| {
                        ka == kb && self.identical(*va, *vb)
                    })
            }
            (Object(a), Object(b)) => a == b,
            (Callable(a), Callable(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for relational operators. Numeric when either side is
    /// numeric or both are numeric strings; lexicographic only when
    /// neither side is numeric.
    pub fn compare(&self, lhs: Value, rhs: Value) -> Ordering {
        if lhs.is_string() && rhs.is_string() {
            let sa = self.string_content(lhs).unwrap_or_default();
            let sb = self.string_content(rhs).unwrap_or_default();
            return match (parse_numeric(&sa), parse_numeric(&sb)) {
                (Some(na), Some(nb)) => na.partial_cmp(&nb).unwrap_or(Ordering::Equal),
                _ => sa.cmp(&sb),
            };
        }
        if lhs.is_array() && rhs.is_array() {
            let (la, lb) = (self.array_count(lhs), self.array_count(rhs));
            return la.cmp(&lb);
        }
        let fa = self.to_float(lhs);
        let fb = self.to_float(rhs);
        fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
    }

    // ---- GC plumbing shared with gc.rs --------------------------------

    pub(crate) fn write_barrier(&mut self, parent: Handle, child: Value) {
        if let Some(child_handle) = child.handle() {
            let parent_is_old = self.objects_old(parent);
            self.gc.record_store(parent, child_handle, parent_is_old);
        }
    }

    fn objects_old(&self, handle: Handle) -> bool {
        self.objects.get(handle as usize).and_then(|o| o.as_ref()).map_or(false, |o| o.old)
    }

    /// Heap values directly referenced by an object.
    pub(crate) fn children(&self, handle: Handle) -> Vec<Handle> {
        match self.kind(handle) {
            Some(kind) => children_of(kind).iter().filter_map(|v| v.handle()).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap values directly referenced by a payload.
pub(crate) fn children_of(kind: &HeapKind) -> Vec<Value> {
    match kind {
        HeapKind::Str(_) | HeapKind::Resource(_) => Vec::new(),
        HeapKind::Array(a) => a.entries().iter().map(|&(_, v)| v).collect(),
        HeapKind::Object { slots, dynamic, .. } => {
            let mut out: Vec<Value> = slots.clone();
            out.extend(dynamic.values().copied());
            out
        }
        HeapKind::Class(def) => def.properties.values().map(|p| p.default).collect(),
        HeapKind::Callable(CallableKind::Bound { receiver, .. }) => vec![*receiver],
        HeapKind::Callable(_) => Vec::new(),
    }
}

fn approximate_size(kind: &HeapKind) -> usize {
    match kind {
        HeapKind::Str(s) => 32 + s.len(),
        HeapKind::Array(a) => 64 + 32 * a.len(),
        HeapKind::Object { slots, .. } => 64 + 16 * slots.len(),
        HeapKind::Class(_) => 256,
        HeapKind::Callable(_) => 32,
        HeapKind::Resource(_) => 16,
    }
}

/// Leading numeric prefix of a string, PHP-style.
fn numeric_prefix(s: &str) -> f64 {
    let trimmed = s.trim_start();
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'+' | b'-' if i == 0 => end = i + 1,
            b'0'..=b'9' => {
                seen_digit = true;
                end = i + 1;
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                end = i + 1;
            }
            _ => break,
        }
    }
    if !seen_digit {
        return 0.0;
    }
    trimmed[..end].parse::<f64>().unwrap_or(0.0)
}

/// Full-string numeric parse; `None` for non-numeric strings.
fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

fn format_float(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_array_insertion_order_and_append() {
        let mut heap = Heap::new();
        let array = heap.new_array();
        heap.array_push(array, Value::Int(10));
        heap.array_set(array, Value::InternedStr(intern("name")), Value::Int(20));
        heap.array_push(array, Value::Int(30));
        assert_eq!(heap.array_count(array), 3);
        // Appended entries take the next integer key.
        assert_eq!(heap.array_get(array, Value::Int(1)), Some(Value::Int(30)));

        let keys = heap.array_keys(array);
        assert_eq!(heap.array_get(keys, Value::Int(0)), Some(Value::Int(0)));
        assert_eq!(
            heap.array_get(keys, Value::Int(1)),
            Some(Value::InternedStr(intern("name")))
        );
    }

    #[test]
    fn test_integer_string_keys_normalize() {
        let mut heap = Heap::new();
        let array = heap.new_array();
        let key = heap_str(&mut heap, "5");
        heap.array_set(array, key, Value::Int(1));
        assert_eq!(heap.array_get(array, Value::Int(5)), Some(Value::Int(1)));
        // And the next append continues past it.
        heap.array_push(array, Value::Int(2));
        assert_eq!(heap.array_get(array, Value::Int(6)), Some(Value::Int(2)));
    }

    fn heap_str(heap: &mut Heap, s: &str) -> Value {
        heap.new_string(s.to_string())
    }

    #[test]
    fn test_array_unset_preserves_order() {
        let mut heap = Heap::new();
        let array = heap.new_array();
        heap.array_push(array, Value::Int(1));
        heap.array_push(array, Value::Int(2));
        heap.array_push(array, Value::Int(3));
        heap.array_unset(array, Value::Int(1));
        assert_eq!(heap.array_count(array), 2);
        assert_eq!(heap.array_get(array, Value::Int(0)), Some(Value::Int(1)));
        assert_eq!(heap.array_get(array, Value::Int(2)), Some(Value::Int(3)));
        assert_eq!(heap.array_get(array, Value::Int(1)), None);
    }

    #[test_case(Value::Null, Value::Bool(false), true; "null eq false")]
    #[test_case(Value::Null, Value::Int(0), true; "null eq zero")]
    #[test_case(Value::Bool(false), Value::Int(0), true; "false eq zero")]
    #[test_case(Value::Int(0), Value::Int(0), true; "zero eq zero")]
    #[test_case(Value::Int(1), Value::Float(1.0), true; "int eq float")]
    #[test_case(Value::Int(1), Value::Int(2), false; "one ne two")]
    fn test_loose_equality_table(lhs: Value, rhs: Value, expected: bool) {
        let heap = Heap::new();
        assert_eq!(heap.loose_eq(lhs, rhs), expected);
    }

    #[test]
    fn test_null_equals_empty_string_and_array() {
        let mut heap = Heap::new();
        let empty = heap_str(&mut heap, "");
        assert!(heap.loose_eq(Value::Null, empty));
        let array = heap.new_array();
        assert!(heap.loose_eq(Value::Null, array));
    }

    #[test]
    fn test_numeric_strings_compare_numerically() {
        let mut heap = Heap::new();
        let ten = heap_str(&mut heap, "10");
        let ten_dot = heap_str(&mut heap, "10.0");
        assert!(heap.loose_eq(ten, ten_dot));
        assert!(!heap.identical(ten, ten_dot));

        let nine = heap_str(&mut heap, "9");
        // Numerically 9 < 10 even though "9" > "10" lexicographically.
        assert_eq!(heap.compare(nine, ten), Ordering::Less);

        let apple = heap_str(&mut heap, "apple");
        let banana = heap_str(&mut heap, "banana");
        assert_eq!(heap.compare(apple, banana), Ordering::Less);
    }

    #[test]
    fn test_identical_requires_same_tag() {
        let heap = Heap::new();
        assert!(!heap.identical(Value::Int(0), Value::Bool(false)));
        assert!(!heap.identical(Value::Int(1), Value::Float(1.0)));
        assert!(heap.identical(Value::Int(1), Value::Int(1)));
    }

    #[test]
    fn test_array_comparison_by_size_then_keys() {
        let mut heap = Heap::new();
        let a = heap.new_array();
        heap.array_push(a, Value::Int(1));
        let b = heap.new_array();
        heap.array_push(b, Value::Int(1));
        assert!(heap.loose_eq(a, b));
        heap.array_push(b, Value::Int(2));
        assert!(!heap.loose_eq(a, b));
    }

    #[test]
    fn test_class_registration_and_inheritance() {
        use velo_bytecode::{ClassSpec, MethodSpec};
        let mut heap = Heap::new();
        let base = ClassSpec {
            name: intern("Base"),
            parent: None,
            interfaces: vec![],
            properties: vec![],
            methods: vec![MethodSpec {
                name: intern("id"),
                function: 0,
                modifiers: Modifiers::PUBLIC,
                attributes: vec![],
            }],
            attributes: vec![],
            is_final: false,
            is_abstract: false,
        };
        let base_handle = heap.register_class(&base);

        let child = ClassSpec {
            name: intern("Child"),
            parent: Some(intern("Base")),
            interfaces: vec![],
            properties: vec![],
            methods: vec![],
            attributes: vec![],
            is_final: false,
            is_abstract: false,
        };
        let child_handle = heap.register_class(&child);

        assert!(heap.is_subclass_of(child_handle, base_handle));
        assert!(!heap.is_subclass_of(base_handle, child_handle));
        let (method, defined_in) = heap.resolve_method(child_handle, intern("id")).unwrap();
        assert_eq!(method.function, 0);
        assert_eq!(defined_in, child_handle); // methods copy down at registration
    }

    #[test]
    fn test_object_properties_with_defaults() {
        use velo_bytecode::{ClassSpec, PropertySpec};
        let mut heap = Heap::new();
        let spec = ClassSpec {
            name: intern("P"),
            parent: None,
            interfaces: vec![],
            properties: vec![PropertySpec {
                name: intern("n"),
                get_hook: None,
                set_hook: None,
                default: Some(velo_bytecode::Constant::Int(7)),
                modifiers: Modifiers::PUBLIC,
                attributes: vec![],
            }],
            methods: vec![],
            attributes: vec![],
            is_final: false,
            is_abstract: false,
        };
        let class = heap.register_class(&spec);
        let object = heap.instantiate(class);
        assert_eq!(heap.property_get_raw(object, intern("n")), Some(Value::Int(7)));
        heap.property_set_raw(object, intern("n"), Value::Int(9));
        assert_eq!(heap.property_get_raw(object, intern("n")), Some(Value::Int(9)));
        // Dynamic properties fall back to the by-name map.
        heap.property_set_raw(object, intern("extra"), Value::Int(1));
        assert_eq!(heap.property_get_raw(object, intern("extra")), Some(Value::Int(1)));
    }

    #[test]
    fn test_refcount_release_frees() {
        let mut heap = Heap::new();
        let s = heap.new_string("transient".to_string());
        let handle = s.handle().unwrap();
        assert_eq!(heap.refcount(handle), 1);
        heap.retain(s);
        assert_eq!(heap.refcount(handle), 2);
        heap.release(s);
        assert!(heap.is_live(handle));
        heap.release(s);
        assert!(!heap.is_live(handle));
    }

    #[test]
    fn test_release_cascades_to_children() {
        let mut heap = Heap::new();
        let inner = heap.new_string("x".to_string());
        let array = heap.new_array();
        heap.array_push(array, inner);
        // The array holds one reference; drop ours.
        heap.release(inner);
        assert!(heap.is_live(inner.handle().unwrap()));
        heap.release(array);
        assert!(!heap.is_live(inner.handle().unwrap()));
        assert!(!heap.is_live(array.handle().unwrap()));
    }

    #[test]
    fn test_display_strings() {
        let mut heap = Heap::new();
        assert_eq!(heap.to_display_string(Value::Int(42)), "42");
        assert_eq!(heap.to_display_string(Value::Bool(true)), "1");
        assert_eq!(heap.to_display_string(Value::Null), "");
        assert_eq!(heap.to_display_string(Value::Float(1.5)), "1.5");
        assert_eq!(heap.to_display_string(Value::Float(3.0)), "3");
        let s = heap.concat(Value::InternedStr(intern("a")), Value::Int(1));
        assert_eq!(heap.string_content(s), Some("a1".to_string()));
    }
}

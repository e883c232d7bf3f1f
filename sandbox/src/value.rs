//! Host value model.
//!
//! `HostValue` is what a handle points at. Primitives are stored inline;
//! everything with identity (objects, arrays, byte views, functions,
//! promises, sockets, wrapped sandbox objects) is reference-counted so that
//! equality by identity and shared mutation behave like the managed host the
//! sandbox was written against.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use lightbridge_hostapi::HeapValue;
use lightbridge_primitives::{Handle, MarshalError};

use crate::closures::SandboxClosure;
use crate::error::SandboxError;
use crate::event_loop::{self, Promise};
use crate::finalize::{Reclaim, Registration};
use crate::socket::WebSocketObject;
use crate::state::Cx;

#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(Rc<str>),
    Bytes(Rc<ByteArray>),
    Array(Rc<HostArray>),
    Object(Rc<HostObject>),
    Error(Rc<ErrorValue>),
    Function(Rc<HostFunction>),
    Promise(Rc<Promise>),
    Iterator(Rc<HostIterator>),
    WebSocket(Rc<WebSocketObject>),
    Wrapped(Rc<WrappedObject>),
}

impl HostValue {
    // ── Constructors ──

    pub fn string(s: impl AsRef<str>) -> Self {
        HostValue::String(Rc::from(s.as_ref()))
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        HostValue::Bytes(Rc::new(ByteArray::from_vec(data.into())))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::named_error("Error", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::named_error("TypeError", message)
    }

    pub fn named_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        HostValue::Error(Rc::new(ErrorValue {
            name: name.into(),
            message: message.into(),
        }))
    }

    pub fn array(items: impl IntoIterator<Item = HostValue>) -> Self {
        HostValue::Array(Rc::new(HostArray::from_vec(items.into_iter().collect())))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        let object = HostObject::default();
        for (key, value) in entries {
            object.set(key, value);
        }
        HostValue::Object(Rc::new(object))
    }

    /// A host-implemented function callable from the sandbox.
    pub fn native<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(&mut Cx<'_>, &[HostValue]) -> Result<HostValue, SandboxError> + 'static,
    {
        HostValue::Function(Rc::new(HostFunction::Native {
            name: name.into(),
            call: Box::new(call),
        }))
    }

    // ── Inspection ──

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::BigInt(_) => "bigint",
            HostValue::String(_) => "string",
            HostValue::Bytes(_) => "Uint8Array",
            HostValue::Array(_) => "Array",
            HostValue::Object(_) => "Object",
            HostValue::Error(_) => "Error",
            HostValue::Function(_) => "function",
            HostValue::Promise(_) => "Promise",
            HostValue::Iterator(_) => "Iterator",
            HostValue::WebSocket(_) => "WebSocket",
            HostValue::Wrapped(_) => "object",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, HostValue::Function(_))
    }

    /// `typeof v === 'object' && v !== null`
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            HostValue::Bytes(_)
                | HostValue::Array(_)
                | HostValue::Object(_)
                | HostValue::Error(_)
                | HostValue::Promise(_)
                | HostValue::Iterator(_)
                | HostValue::WebSocket(_)
                | HostValue::Wrapped(_)
        )
    }

    /// `Boolean(v)`
    pub fn truthy(&self) -> bool {
        match self {
            HostValue::Undefined | HostValue::Null => false,
            HostValue::Bool(b) => *b,
            HostValue::Number(n) => *n != 0.0 && !n.is_nan(),
            HostValue::BigInt(b) => *b != 0,
            HostValue::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Rc<ByteArray>> {
        match self {
            HostValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<HostFunction>> {
        match self {
            HostValue::Function(f) => Some(f),
            _ => None,
        }
    }

    // ── Equality ──

    /// `===`: value comparison for primitives, identity for everything else.
    pub fn strict_eq(&self, other: &HostValue) -> bool {
        use HostValue::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => Rc::ptr_eq(a, b),
            (Array(a), Array(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            (Error(a), Error(b)) => Rc::ptr_eq(a, b),
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (Promise(a), Promise(b)) => Rc::ptr_eq(a, b),
            (Iterator(a), Iterator(b)) => Rc::ptr_eq(a, b),
            (WebSocket(a), WebSocket(b)) => Rc::ptr_eq(a, b),
            (Wrapped(a), Wrapped(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`: the abstract equality comparison.
    pub fn loose_eq(&self, other: &HostValue) -> bool {
        use HostValue::*;
        if self.strict_eq(other) {
            return true;
        }
        match (self, other) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Number(n), String(s)) | (String(s), Number(n)) => string_to_number(s) == *n,
            (BigInt(b), Number(n)) | (Number(n), BigInt(b)) => {
                n.is_finite() && n.fract() == 0.0 && *n == *b as f64
            }
            (BigInt(b), String(s)) | (String(s), BigInt(b)) => {
                s.trim().parse::<i128>().map(|v| v == *b).unwrap_or(false)
            }
            (Bool(b), v) | (v, Bool(b)) => Number(if *b { 1.0 } else { 0.0 }).loose_eq(v),
            (Number(_) | String(_) | BigInt(_), v) | (v, Number(_) | String(_) | BigInt(_))
                if v.is_object() =>
            {
                let primitive = HostValue::string(v.to_display_string());
                let scalar = if self.is_object() { other } else { self };
                scalar.loose_eq(&primitive)
            }
            _ => false,
        }
    }

    // ── Rendering ──

    /// `String(v)`
    pub fn to_display_string(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".into(),
            HostValue::Null => "null".into(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) => format_number(*n),
            HostValue::BigInt(b) => b.to_string(),
            HostValue::String(s) => s.to_string(),
            HostValue::Bytes(b) => b
                .to_vec()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
            HostValue::Array(a) => a
                .to_vec()
                .iter()
                .map(|v| match v {
                    HostValue::Undefined | HostValue::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            HostValue::Object(_) => "[object Object]".into(),
            HostValue::Error(e) => {
                if e.message.is_empty() {
                    e.name.clone()
                } else {
                    format!("{}: {}", e.name, e.message)
                }
            }
            HostValue::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
            HostValue::Promise(_) => "[object Promise]".into(),
            HostValue::Iterator(_) => "[object Iterator]".into(),
            HostValue::WebSocket(_) => "[object WebSocket]".into(),
            HostValue::Wrapped(w) => format!("[object {}]", w.class()),
        }
    }

    /// Diagnostic rendering handed to the sandbox by the `debug_string` import.
    pub fn debug_string(&self) -> String {
        match self {
            HostValue::Undefined
            | HostValue::Null
            | HostValue::Bool(_)
            | HostValue::Number(_) => self.to_display_string(),
            HostValue::BigInt(b) => format!("{}n", b),
            HostValue::String(s) => format!("\"{}\"", s),
            HostValue::Function(f) => {
                let name = f.name();
                if name.is_empty() {
                    "Function".into()
                } else {
                    format!("Function({})", name)
                }
            }
            HostValue::Array(a) => {
                let items: Vec<String> = a.to_vec().iter().map(|v| v.debug_string()).collect();
                format!("[{}]", items.join(", "))
            }
            HostValue::Object(_) => match self.to_json() {
                Some(json) => format!("Object({})", json),
                None => "Object".into(),
            },
            HostValue::Error(e) => format!("{}: {}", e.name, e.message),
            HostValue::Wrapped(w) => w.class().to_string(),
            other => other.type_name().to_string(),
        }
    }

    // ── JSON ──

    /// `JSON.stringify` semantics: `None` where the value has no JSON form.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        match self {
            HostValue::Null => Some(Value::Null),
            HostValue::Bool(b) => Some(Value::Bool(*b)),
            HostValue::Number(n) => Some(
                serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            ),
            HostValue::String(s) => Some(Value::String(s.to_string())),
            HostValue::Array(a) => Some(Value::Array(
                a.to_vec()
                    .iter()
                    .map(|v| v.to_json().unwrap_or(Value::Null))
                    .collect(),
            )),
            HostValue::Object(o) => {
                let mut map = serde_json::Map::new();
                for (key, value) in o.entries() {
                    if let Some(json) = value.to_json() {
                        map.insert(key, json);
                    }
                }
                Some(Value::Object(map))
            }
            HostValue::Bytes(b) => {
                let mut map = serde_json::Map::new();
                for (i, byte) in b.to_vec().into_iter().enumerate() {
                    map.insert(i.to_string(), Value::from(byte));
                }
                Some(Value::Object(map))
            }
            HostValue::Error(_) => Some(Value::Object(serde_json::Map::new())),
            _ => None,
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value;
        match json {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => HostValue::string(s),
            Value::Array(items) => HostValue::array(items.iter().map(HostValue::from_json)),
            Value::Object(map) => {
                HostValue::object(map.iter().map(|(k, v)| (k.clone(), HostValue::from_json(v))))
            }
        }
    }

    /// Strict conversion for values that must be plain data.
    pub fn try_to_json(&self) -> Result<serde_json::Value, MarshalError> {
        self.to_json()
            .ok_or_else(|| MarshalError::unsupported("JSON", self.type_name()))
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::string(s)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(Rc::from(s))
    }
}

impl HeapValue for HostValue {
    fn constant(handle: Handle) -> Self {
        match handle {
            Handle::NULL => HostValue::Null,
            Handle::TRUE => HostValue::Bool(true),
            Handle::FALSE => HostValue::Bool(false),
            _ => HostValue::Undefined,
        }
    }

    fn as_constant(&self) -> Option<Handle> {
        match self {
            HostValue::Undefined => Some(Handle::UNDEFINED),
            HostValue::Null => Some(Handle::NULL),
            HostValue::Bool(b) => Some(Handle::from_bool(*b)),
            _ => None,
        }
    }
}

/// JavaScript `Number::toString` for the common cases.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == 0.0 {
        "0".into()
    } else {
        n.to_string()
    }
}

/// JavaScript `Number(string)`.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let radix = match trimmed.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&trimmed[2..], radix)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.contains("inf") || lower.contains("nan") {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

// ── Reference types ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
}

/// Insertion-ordered string-keyed properties.
#[derive(Default)]
pub struct HostObject {
    props: RefCell<Vec<(String, HostValue)>>,
}

impl HostObject {
    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: HostValue) {
        let key = key.into();
        let mut props = self.props.borrow_mut();
        match props.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => props.push((key, value)),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.props.borrow().iter().any(|(k, _)| k == key)
    }

    pub fn entries(&self) -> Vec<(String, HostValue)> {
        self.props.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.props.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct HostArray {
    items: RefCell<Vec<HostValue>>,
}

impl HostArray {
    pub fn from_vec(items: Vec<HostValue>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }

    pub fn get(&self, index: usize) -> HostValue {
        self.items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or(HostValue::Undefined)
    }

    /// Writes past the end extend the array with `undefined`.
    pub fn set(&self, index: usize, value: HostValue) {
        let mut items = self.items.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, HostValue::Undefined);
        }
        items[index] = value;
    }

    pub fn push(&self, value: HostValue) -> usize {
        let mut items = self.items.borrow_mut();
        items.push(value);
        items.len()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<HostValue> {
        self.items.borrow().clone()
    }
}

/// A `Uint8Array`: a window onto a shared buffer.
#[derive(Debug)]
pub struct ByteArray {
    buffer: Rc<RefCell<Vec<u8>>>,
    offset: usize,
    len: usize,
}

impl ByteArray {
    /// Zero-filled array of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            buffer: Rc::new(RefCell::new(data)),
            offset: 0,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.borrow()[self.offset..self.offset + self.len].to_vec()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        if index < self.len {
            Some(self.buffer.borrow()[self.offset + index])
        } else {
            None
        }
    }

    /// Out-of-range writes are ignored, as for typed arrays.
    pub fn set(&self, index: usize, value: u8) {
        if index < self.len {
            self.buffer.borrow_mut()[self.offset + index] = value;
        }
    }

    /// Copy `data` into the start of this view, truncating to fit.
    pub fn copy_from(&self, data: &[u8]) {
        let n = data.len().min(self.len);
        self.buffer.borrow_mut()[self.offset..self.offset + n].copy_from_slice(&data[..n]);
    }

    /// A new view sharing this buffer. Bounds are clamped like `subarray`.
    pub fn subarray(&self, start: usize, end: usize) -> ByteArray {
        let start = start.min(self.len);
        let end = end.clamp(start, self.len);
        ByteArray {
            buffer: Rc::clone(&self.buffer),
            offset: self.offset + start,
            len: end - start,
        }
    }
}

/// Snapshot iterator produced by the `iterator` import.
pub struct HostIterator {
    items: RefCell<VecDeque<HostValue>>,
}

impl HostIterator {
    pub fn new(items: impl IntoIterator<Item = HostValue>) -> Self {
        Self {
            items: RefCell::new(items.into_iter().collect()),
        }
    }

    /// The `{ done, value }` record of `Iterator.prototype.next`.
    pub fn next_result(&self) -> HostValue {
        match self.items.borrow_mut().pop_front() {
            Some(value) => HostValue::object([("done", HostValue::Bool(false)), ("value", value)]),
            None => HostValue::object([
                ("done", HostValue::Bool(true)),
                ("value", HostValue::Undefined),
            ]),
        }
    }
}

// ── Functions ──

pub type NativeFn = dyn Fn(&mut Cx<'_>, &[HostValue]) -> Result<HostValue, SandboxError>;

pub enum HostFunction {
    /// Implemented by the host.
    Native { name: String, call: Box<NativeFn> },
    /// A sandbox closure wrapped by `closure_new`.
    Closure(SandboxClosure),
    /// One half of a promise's resolve/reject pair.
    Resolver(Resolver),
}

impl HostFunction {
    pub fn name(&self) -> &str {
        match self {
            HostFunction::Native { name, .. } => name,
            HostFunction::Closure(_) => "",
            HostFunction::Resolver(r) => {
                if r.reject {
                    "reject"
                } else {
                    "resolve"
                }
            }
        }
    }

    pub fn call(&self, cx: &mut Cx<'_>, args: &[HostValue]) -> Result<HostValue, SandboxError> {
        match self {
            HostFunction::Native { call, .. } => call(cx, args),
            HostFunction::Closure(closure) => closure.invoke(cx, args),
            HostFunction::Resolver(resolver) => {
                resolver.settle(cx, args.first().cloned().unwrap_or(HostValue::Undefined));
                Ok(HostValue::Undefined)
            }
        }
    }

    pub fn as_closure(&self) -> Option<&SandboxClosure> {
        match self {
            HostFunction::Closure(closure) => Some(closure),
            _ => None,
        }
    }
}

/// Call `callee` with `args`. Non-functions throw a `TypeError`.
pub fn call_value(
    cx: &mut Cx<'_>,
    callee: &HostValue,
    args: &[HostValue],
) -> Result<HostValue, SandboxError> {
    match callee {
        HostValue::Function(function) => {
            // Hold a reference for the duration of the call so a handle
            // released mid-call cannot destroy the callee under us.
            let function = Rc::clone(function);
            function.call(cx, args)
        }
        other => Err(SandboxError::Thrown(HostValue::type_error(format!(
            "{} is not a function",
            other.debug_string()
        )))),
    }
}

/// Settles its promise at most once, shared between resolve and reject.
pub struct Resolver {
    promise: Rc<Promise>,
    reject: bool,
    done: Rc<Cell<bool>>,
}

impl Resolver {
    /// The `(resolve, reject)` pair for `promise`.
    pub fn pair(promise: &Rc<Promise>) -> (HostValue, HostValue) {
        let done = Rc::new(Cell::new(false));
        let make = |reject| {
            HostValue::Function(Rc::new(HostFunction::Resolver(Resolver {
                promise: Rc::clone(promise),
                reject,
                done: Rc::clone(&done),
            })))
        };
        (make(false), make(true))
    }

    fn settle(&self, cx: &mut Cx<'_>, value: HostValue) {
        if self.done.replace(true) {
            return;
        }
        let events = &mut cx.data_mut().events;
        if self.reject {
            event_loop::reject_promise(events, &self.promise, value);
        } else {
            event_loop::resolve_promise(events, &self.promise, value);
        }
    }
}

// ── Wrapped sandbox objects ──

/// A host value that owns a sandbox-side object, freed through the class's
/// `{class}_free` export.
pub struct WrappedObject {
    class: String,
    ptr: Cell<u32>,
    registration: RefCell<Registration>,
}

impl WrappedObject {
    pub fn new(class: impl Into<String>, ptr: u32, registration: Registration) -> Self {
        Self {
            class: class.into(),
            ptr: Cell::new(ptr),
            registration: RefCell::new(registration),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Sandbox pointer, or zero once freed.
    pub fn ptr(&self) -> u32 {
        self.ptr.get()
    }

    /// Detach from automatic cleanup and hand back the free token.
    pub fn release(&self) -> Option<Reclaim> {
        self.ptr.set(0);
        self.registration.borrow_mut().unregister()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_map_to_reserved_handles() {
        assert_eq!(HostValue::Undefined.as_constant(), Some(Handle::UNDEFINED));
        assert_eq!(HostValue::Null.as_constant(), Some(Handle::NULL));
        assert_eq!(HostValue::Bool(true).as_constant(), Some(Handle::TRUE));
        assert_eq!(HostValue::Bool(false).as_constant(), Some(Handle::FALSE));
        assert_eq!(HostValue::Number(0.0).as_constant(), None);
        assert!(HostValue::constant(Handle::TRUE).strict_eq(&HostValue::Bool(true)));
    }

    #[test]
    fn test_strict_eq() {
        assert!(HostValue::string("a").strict_eq(&HostValue::string("a")));
        assert!(!HostValue::Number(f64::NAN).strict_eq(&HostValue::Number(f64::NAN)));
        assert!(HostValue::Number(0.0).strict_eq(&HostValue::Number(-0.0)));
        let obj = HostValue::object([("a", HostValue::Number(1.0))]);
        assert!(obj.strict_eq(&obj.clone()));
        let other = HostValue::object([("a", HostValue::Number(1.0))]);
        assert!(!obj.strict_eq(&other));
        assert!(!HostValue::Number(1.0).strict_eq(&HostValue::string("1")));
    }

    #[test]
    fn test_loose_eq() {
        assert!(HostValue::Null.loose_eq(&HostValue::Undefined));
        assert!(!HostValue::Null.loose_eq(&HostValue::Number(0.0)));
        assert!(HostValue::Number(1.0).loose_eq(&HostValue::string("1")));
        assert!(HostValue::string(" 42 ").loose_eq(&HostValue::Number(42.0)));
        assert!(HostValue::Bool(true).loose_eq(&HostValue::Number(1.0)));
        assert!(HostValue::Bool(false).loose_eq(&HostValue::string("")));
        assert!(HostValue::BigInt(10).loose_eq(&HostValue::Number(10.0)));
        assert!(HostValue::BigInt(10).loose_eq(&HostValue::string("10")));
        assert!(HostValue::array([HostValue::Number(1.0)]).loose_eq(&HostValue::string("1")));
        assert!(!HostValue::Number(f64::NAN).loose_eq(&HostValue::Number(f64::NAN)));
    }

    #[test]
    fn test_display_string() {
        assert_eq!(HostValue::Number(1.0).to_display_string(), "1");
        assert_eq!(HostValue::Number(1.5).to_display_string(), "1.5");
        assert_eq!(HostValue::Number(-0.0).to_display_string(), "0");
        assert_eq!(HostValue::Number(f64::INFINITY).to_display_string(), "Infinity");
        assert_eq!(
            HostValue::array([HostValue::Number(1.0), HostValue::Null, HostValue::string("x")])
                .to_display_string(),
            "1,,x"
        );
        assert_eq!(HostValue::bytes(vec![1, 2]).to_display_string(), "1,2");
        assert_eq!(
            HostValue::type_error("bad").to_display_string(),
            "TypeError: bad"
        );
    }

    #[test]
    fn test_debug_string() {
        assert_eq!(HostValue::string("hi").debug_string(), "\"hi\"");
        assert_eq!(HostValue::BigInt(5).debug_string(), "5n");
        assert_eq!(
            HostValue::array([HostValue::Number(1.0), HostValue::string("a")]).debug_string(),
            "[1, \"a\"]"
        );
        assert_eq!(
            HostValue::object([("k", HostValue::Number(2.0))]).debug_string(),
            "Object({\"k\":2})"
        );
        let f = HostValue::native("fetchHead", |_cx, _args| Ok(HostValue::Undefined));
        assert_eq!(f.debug_string(), "Function(fetchHead)");
        assert_eq!(HostValue::error("boom").debug_string(), "Error: boom");
    }

    #[test]
    fn test_json_roundtrip_shape() {
        let json = serde_json::json!({"network": "test", "peers": [1, 2], "ok": true});
        let value = HostValue::from_json(&json);
        assert_eq!(value.to_json().unwrap(), json);
        assert!(HostValue::Undefined.try_to_json().is_err());
    }

    #[test]
    fn test_json_skips_undefined_properties() {
        let value = HostValue::object([
            ("a", HostValue::Undefined),
            ("b", HostValue::Number(f64::NAN)),
        ]);
        assert_eq!(value.to_json().unwrap(), serde_json::json!({"b": null}));
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("1e3"), 1000.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("abc").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn test_object_set_replaces_in_place() {
        let obj = HostObject::default();
        obj.set("a", HostValue::Number(1.0));
        obj.set("b", HostValue::Number(2.0));
        obj.set("a", HostValue::Number(3.0));
        let keys: Vec<String> = obj.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(obj.get("a").unwrap().strict_eq(&HostValue::Number(3.0)));
        assert!(obj.has("b"));
        assert!(obj.get("c").is_none());
    }

    #[test]
    fn test_array_set_extends() {
        let arr = HostArray::default();
        arr.set(2, HostValue::Number(7.0));
        assert_eq!(arr.len(), 3);
        assert!(arr.get(0).is_undefined());
        assert!(arr.get(10).is_undefined());
        assert_eq!(arr.push(HostValue::Null), 4);
    }

    #[test]
    fn test_subarray_shares_buffer() {
        let bytes = ByteArray::from_vec(vec![1, 2, 3, 4, 5]);
        let view = bytes.subarray(1, 4);
        assert_eq!(view.to_vec(), vec![2, 3, 4]);
        view.set(0, 20);
        assert_eq!(bytes.get(1), Some(20));
        let clamped = bytes.subarray(3, 100);
        assert_eq!(clamped.to_vec(), vec![4, 5]);
        assert!(bytes.subarray(4, 2).is_empty());
    }

    #[test]
    fn test_iterator_next_result() {
        let it = HostIterator::new([HostValue::Number(1.0)]);
        let first = it.next_result();
        let HostValue::Object(first) = first else { panic!("expected object") };
        assert!(first.get("done").unwrap().strict_eq(&HostValue::Bool(false)));
        let HostValue::Object(second) = it.next_result() else { panic!("expected object") };
        assert!(second.get("done").unwrap().strict_eq(&HostValue::Bool(true)));
    }
}

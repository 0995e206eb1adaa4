// CyberBasic Runtime Values
// Dynamically tagged values shared between bytecode, globals and foreign functions

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Shared, mutable array storage (row-major for multi-dimensional arrays)
pub type ArrayRef = Arc<Mutex<Vec<Value>>>;

/// Shared, mutable string-keyed record
pub type MapRef = Arc<Mutex<FxHashMap<String, Value>>>;

/// Runtime value types
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Array(ArrayRef),
    Map(MapRef),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn map(entries: FxHashMap<String, Value>) -> Self {
        Value::Map(Arc::new(Mutex::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Map(_) => "Map",
        }
    }

    /// nil, false, 0, 0.0 and "" are false; everything else is true
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Map(_) => true,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Lenient numeric view used by host-facing opcodes: strings parse,
    /// anything unparseable is 0.
    pub fn to_f64(&self) -> f64 {
        match self {
            Value::Int(n) => *n as f64,
            Value::Float(f) => *f,
            Value::Bool(true) => 1.0,
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Lenient integer view; floats truncate toward zero
    pub fn to_i64(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Float(f) => *f as i64,
            Value::Bool(true) => 1,
            Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Canonical text form: nil is empty, floats use the shortest
    /// decimal that round-trips.
    pub fn to_text(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        }
    }
}

/// Identity of a shared container, used to detect cycles
fn container_ptr(value: &Value) -> Option<*const ()> {
    match value {
        Value::Array(arr) => Some(Arc::as_ptr(arr) as *const ()),
        Value::Map(map) => Some(Arc::as_ptr(map) as *const ()),
        _ => None,
    }
}

/// Structural equality. Containers are snapshotted so no lock is held while
/// recursing; a pair already under comparison counts as equal.
fn values_eq(a: &Value, b: &Value, seen: &mut Vec<(*const (), *const ())>) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(x), Value::Array(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Arc::as_ptr(x) as *const (), Arc::as_ptr(y) as *const ());
            if seen.contains(&pair) {
                return true;
            }
            let lhs = x.lock().clone();
            let rhs = y.lock().clone();
            seen.push(pair);
            let equal = lhs.len() == rhs.len()
                && lhs.iter().zip(&rhs).all(|(l, r)| values_eq(l, r, seen));
            seen.pop();
            equal
        }
        (Value::Map(x), Value::Map(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Arc::as_ptr(x) as *const (), Arc::as_ptr(y) as *const ());
            if seen.contains(&pair) {
                return true;
            }
            let lhs = x.lock().clone();
            let rhs = y.lock().clone();
            seen.push(pair);
            let equal = lhs.len() == rhs.len()
                && lhs
                    .iter()
                    .all(|(k, l)| rhs.get(k).is_some_and(|r| values_eq(l, r, seen)));
            seen.pop();
            equal
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_eq(self, other, &mut Vec::new())
    }
}

/// Write `value`, printing a container that contains itself as `[...]`/`{...}`
fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, seen: &mut Vec<*const ()>) -> fmt::Result {
    if let Some(ptr) = container_ptr(value) {
        if seen.contains(&ptr) {
            return match value {
                Value::Map(_) => write!(f, "{{...}}"),
                _ => write!(f, "[...]"),
            };
        }
        seen.push(ptr);
    }
    let result = match value {
        Value::Nil => write!(f, "nil"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Int(n) => write!(f, "{}", n),
        Value::Float(x) => write!(f, "{}", x),
        Value::String(s) => write!(f, "{}", s),
        Value::Array(arr) => {
            let items = arr.lock().clone();
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_value(f, item, seen)?;
            }
            write!(f, "]")
        }
        Value::Map(map) => {
            let map = map.lock().clone();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            write!(f, "{{")?;
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", key)?;
                write_value(f, &map[key], seen)?;
            }
            write!(f, "}}")
        }
    };
    if container_ptr(value).is_some() {
        seen.pop();
    }
    result
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Float(x) => write!(f, "{:?}", x),
            other => write!(f, "{}", other),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("0").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(Value::Nil.to_text(), "");
        assert_eq!(Value::Float(2.5).to_text(), "2.5");
        assert_eq!(Value::Float(3.0).to_text(), "3");
        assert_eq!(Value::Int(-4).to_text(), "-4");
        assert_eq!(Value::Bool(true).to_text(), "true");
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(Value::string(" 12 ").to_i64(), 12);
        assert_eq!(Value::Float(-2.9).to_i64(), -2);
        assert_eq!(Value::string("abc").to_f64(), 0.0);
    }

    #[test]
    fn test_shared_arrays_compare_by_content() {
        let a = Value::array(vec![Value::Int(1), Value::string("x")]);
        let b = Value::array(vec![Value::Int(1), Value::string("x")]);
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_self_referential_array_formats_and_compares() {
        let a = Value::array(vec![Value::Int(1)]);
        if let Value::Array(arr) = &a {
            arr.lock().push(a.clone());
        }
        assert_eq!(a.to_text(), "[1, [...]]");
        assert_eq!(a, a.clone());

        let b = Value::array(vec![Value::Int(1)]);
        if let Value::Array(arr) = &b {
            arr.lock().push(b.clone());
        }
        assert_eq!(a, b);
        if let Value::Array(arr) = &a {
            arr.lock().clear();
        }
    }

    #[test]
    fn test_map_cycle_through_array() {
        let map = Value::map(FxHashMap::default());
        let list = Value::array(vec![map.clone()]);
        if let Value::Map(m) = &map {
            m.lock().insert("items".into(), list.clone());
        }
        assert_eq!(list.to_text(), "[{items: [...]}]");
        if let Value::Map(m) = &map {
            m.lock().clear();
        }
    }
}

// Foreign function bridge: case-insensitive name -> native closure

use super::value::Value;
use crate::error::{CyberError, ErrorKind};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a foreign function
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForeignError {
    #[error("{0}")]
    Message(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("{0}")]
    File(String),
}

impl From<String> for ForeignError {
    fn from(msg: String) -> Self {
        ForeignError::Message(msg)
    }
}

impl From<&str> for ForeignError {
    fn from(msg: &str) -> Self {
        ForeignError::Message(msg.to_string())
    }
}

impl ForeignError {
    /// Wrap into a VM error, prefixed with the function that raised it
    pub fn into_cyber_error(self, function: &str) -> CyberError {
        let kind = match &self {
            ForeignError::Assertion(_) => ErrorKind::AssertionFailed,
            ForeignError::File(_) => ErrorKind::FileError,
            ForeignError::Message(_) => ErrorKind::ForeignCall,
        };
        CyberError::new(kind, format!("{}: {}", function, self))
    }
}

pub type ForeignResult = Result<Value, ForeignError>;

/// A host function callable from bytecode. Returning `Value::Nil` pushes nothing.
pub type ForeignFn = Arc<dyn Fn(&[Value]) -> ForeignResult + Send + Sync>;

/// Name -> function table owned by one VM instance
#[derive(Clone, Default)]
pub struct ForeignRegistry {
    functions: FxHashMap<String, ForeignFn>,
}

impl ForeignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> ForeignResult + Send + Sync + 'static,
    {
        self.functions.insert(name.to_lowercase(), Arc::new(func));
    }

    pub fn register_fn(&mut self, name: &str, func: ForeignFn) {
        self.functions.insert(name.to_lowercase(), func);
    }

    /// Register a plain `fn` helper in the `Result<Value, String>` style
    pub fn register_native(&mut self, name: &str, func: fn(&[Value]) -> Result<Value, String>) {
        self.register_native_closure(name, func);
    }

    /// `register_native` for helpers that capture state
    pub fn register_native_closure<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name, move |args: &[Value]| func(args).map_err(ForeignError::from));
    }

    pub fn get(&self, name: &str) -> Option<ForeignFn> {
        if let Some(f) = self.functions.get(name) {
            return Some(f.clone());
        }
        self.functions.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.functions.remove(&name.to_lowercase()).is_some()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Merge another registry into this one; entries in `other` win
    pub fn extend(&mut self, other: &ForeignRegistry) {
        for (name, func) in &other.functions {
            self.functions.insert(name.clone(), func.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut reg = ForeignRegistry::new();
        reg.register("DrawText", |_| Ok(Value::Int(1)));
        assert!(reg.contains("drawtext"));
        assert!(reg.contains("DRAWTEXT"));
        let f = reg.get("drawText").unwrap();
        assert_eq!(f(&[]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_error_mapping() {
        let err = ForeignError::Assertion("hp > 0".into()).into_cyber_error("Assert");
        assert_eq!(err.kind, ErrorKind::AssertionFailed);
        assert_eq!(err.message, "Assert: assertion failed: hp > 0");

        let err = ForeignError::from("boom").into_cyber_error("Explode");
        assert_eq!(err.kind, ErrorKind::ForeignCall);
    }

    #[test]
    fn test_extend_overrides() {
        let mut a = ForeignRegistry::new();
        a.register("f", |_| Ok(Value::Int(1)));
        let mut b = ForeignRegistry::new();
        b.register("F", |_| Ok(Value::Int(2)));
        a.extend(&b);
        assert_eq!(a.len(), 1);
        assert_eq!(a.get("f").unwrap()(&[]).unwrap(), Value::Int(2));
    }
}

// Entity property hooks for `entity.property` access

use super::value::Value;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Reads `entity.prop`; `None` means "not handled here"
pub type EntityGetter = Arc<dyn Fn(&str, &str) -> Option<Value> + Send + Sync>;

/// Writes `entity.prop`; `false` means "not handled here"
pub type EntitySetter = Arc<dyn Fn(&str, &str, Value) -> bool + Send + Sync>;

/// Hooks are keyed either by a bare property name (any entity) or by a
/// specific `entity.prop` pair. Bare-property hooks are consulted first.
#[derive(Clone, Default)]
pub struct EntityHooks {
    getters: FxHashMap<String, EntityGetter>,
    setters: FxHashMap<String, EntitySetter>,
}

impl EntityHooks {
    pub fn register_getter<F>(&mut self, key: &str, getter: F)
    where
        F: Fn(&str, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.getters.insert(key.to_lowercase(), Arc::new(getter));
    }

    pub fn register_setter<F>(&mut self, key: &str, setter: F)
    where
        F: Fn(&str, &str, Value) -> bool + Send + Sync + 'static,
    {
        self.setters.insert(key.to_lowercase(), Arc::new(setter));
    }

    pub fn clear(&mut self) {
        self.getters.clear();
        self.setters.clear();
    }

    /// Both names must already be lowercase
    pub fn get(&self, entity: &str, prop: &str) -> Option<Value> {
        if let Some(getter) = self.getters.get(prop) {
            if let Some(v) = getter(entity, prop) {
                return Some(v);
            }
        }
        let pair = format!("{}.{}", entity, prop);
        self.getters.get(&pair).and_then(|getter| getter(entity, prop))
    }

    /// Both names must already be lowercase. Returns whether a hook took the write.
    pub fn set(&self, entity: &str, prop: &str, value: &Value) -> bool {
        if let Some(setter) = self.setters.get(prop) {
            if setter(entity, prop, value.clone()) {
                return true;
            }
        }
        let pair = format!("{}.{}", entity, prop);
        match self.setters.get(&pair) {
            Some(setter) => setter(entity, prop, value.clone()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_generic_hook_wins_over_pair_hook() {
        let mut hooks = EntityHooks::default();
        hooks.register_getter("x", |_, _| Some(Value::Int(1)));
        hooks.register_getter("player.x", |_, _| Some(Value::Int(2)));
        assert_eq!(hooks.get("player", "x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_declined_generic_hook_falls_through() {
        let mut hooks = EntityHooks::default();
        hooks.register_getter("x", |entity, _| {
            (entity == "body").then_some(Value::Float(4.0))
        });
        hooks.register_getter("player.x", |_, _| Some(Value::Int(2)));
        assert_eq!(hooks.get("body", "x"), Some(Value::Float(4.0)));
        assert_eq!(hooks.get("player", "x"), Some(Value::Int(2)));
        assert_eq!(hooks.get("enemy", "x"), None);
    }

    #[test]
    fn test_setters() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut hooks = EntityHooks::default();
        hooks.register_setter("Player.HP", move |e, p, v| {
            sink.lock().push(format!("{}.{}={}", e, p, v));
            true
        });
        assert!(hooks.set("player", "hp", &Value::Int(9)));
        assert!(!hooks.set("enemy", "hp", &Value::Int(1)));
        assert_eq!(*seen.lock(), vec!["player.hp=9".to_string()]);
    }
}

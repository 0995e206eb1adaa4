// JSON foreign functions backed by serde_json
// LoadJSONFromString, LoadJSON, SaveJSON, GetJSONKey

use super::{check_arity, check_arity_range, get_string_arg};
use crate::vm::{ForeignError, ForeignRegistry, ForeignResult, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub fn register(registry: &mut ForeignRegistry) {
    registry.register_native("LoadJSONFromString", json_parse);
    registry.register("LoadJSON", json_load);
    registry.register("SaveJSON", json_save);
    registry.register_native("GetJSONKey", json_get_key);
}

/// LoadJSONFromString(text) -> Map/Array/primitive
fn json_parse(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let text = get_string_arg(&args[0], "json")?;
    serde_json::from_str::<serde_json::Value>(&text)
        .map(|json| json_to_value(&json))
        .map_err(|e| format!("invalid JSON: {}", e))
}

fn json_load(args: &[Value]) -> ForeignResult {
    check_arity(1, args.len())?;
    let path = get_string_arg(&args[0], "path")?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ForeignError::File(format!("cannot read '{}': {}", path, e)))?;
    json_parse(&[Value::string(text)]).map_err(ForeignError::from)
}

/// SaveJSON(path, value, ?pretty)
fn json_save(args: &[Value]) -> ForeignResult {
    check_arity_range(2, 3, args.len())?;
    let path = get_string_arg(&args[0], "path")?;
    let json = value_to_json(&args[1])?;
    let pretty = args.get(2).is_some_and(Value::is_truthy);
    let text = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    }
    .map_err(|e| e.to_string())?;
    std::fs::write(&path, text)
        .map_err(|e| ForeignError::File(format!("cannot write '{}': {}", path, e)))?;
    Ok(Value::Bool(true))
}

/// GetJSONKey(map, key): value for a key (case-insensitive), nil when absent
fn json_get_key(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let key = args[1].to_text();
    match &args[0] {
        Value::Map(map) => {
            let map = map.lock();
            if let Some(v) = map.get(&key) {
                return Ok(v.clone());
            }
            Ok(map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&key))
                .map(|(_, v)| v.clone())
                .unwrap_or_default())
        }
        Value::Nil => Ok(Value::Nil),
        other => Err(format!("GetJSONKey expects a map, got {}", other.type_name())),
    }
}

/// Convert serde_json::Value to a runtime Value
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => Value::array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => {
            let map: FxHashMap<String, Value> = obj
                .iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect();
            Value::map(map)
        }
    }
}

/// Convert a runtime Value to serde_json::Value. Cyclic containers are an error.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, String> {
    to_json(value, &mut Vec::new())
}

fn to_json(value: &Value, open: &mut Vec<*const ()>) -> Result<serde_json::Value, String> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(n) => Ok(serde_json::Value::from(*n)),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| format!("Cannot convert {} to JSON", f)),
        Value::String(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::Array(arr) => {
            let ptr = Arc::as_ptr(arr) as *const ();
            if open.contains(&ptr) {
                return Err("Cannot convert a cyclic array to JSON".to_string());
            }
            let items = arr.lock().clone();
            open.push(ptr);
            let items: Result<Vec<_>, String> = items.iter().map(|v| to_json(v, open)).collect();
            open.pop();
            Ok(serde_json::Value::Array(items?))
        }
        Value::Map(map) => {
            let ptr = Arc::as_ptr(map) as *const ();
            if open.contains(&ptr) {
                return Err("Cannot convert a cyclic map to JSON".to_string());
            }
            let entries = map.lock().clone();
            open.push(ptr);
            let mut out = serde_json::Map::new();
            for (key, val) in entries.iter() {
                match to_json(val, open) {
                    Ok(json) => {
                        out.insert(key.clone(), json);
                    }
                    Err(e) => {
                        open.pop();
                        return Err(e);
                    }
                }
            }
            open.pop();
            Ok(serde_json::Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let parsed = json_parse(&[Value::string(r#"{"Name":"ship","hp":3,"pos":[1.5,2]}"#)]).unwrap();
        assert_eq!(
            json_get_key(&[parsed.clone(), Value::string("name")]),
            Ok(Value::string("ship"))
        );
        assert_eq!(json_get_key(&[parsed.clone(), Value::string("hp")]), Ok(Value::Int(3)));
        assert_eq!(json_get_key(&[parsed.clone(), Value::string("nope")]), Ok(Value::Nil));
        let pos = json_get_key(&[parsed, Value::string("pos")]).unwrap();
        assert_eq!(pos, Value::array(vec![Value::Float(1.5), Value::Int(2)]));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(json_parse(&[Value::string("{oops")]).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("cyber_json_{}.json", std::process::id()));
        let p = Value::string(path.to_string_lossy());
        let mut map = FxHashMap::default();
        map.insert("level".to_string(), Value::Int(4));
        json_save(&[p.clone(), Value::map(map)]).unwrap();
        let loaded = json_load(&[p]).unwrap();
        assert_eq!(json_get_key(&[loaded, Value::string("level")]), Ok(Value::Int(4)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_nan_cannot_be_saved() {
        assert!(value_to_json(&Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_cyclic_array_cannot_be_saved() {
        let list = Value::array(vec![Value::Int(1)]);
        if let Value::Array(arr) = &list {
            arr.lock().push(list.clone());
        }
        assert!(value_to_json(&list).is_err());
        // shared but acyclic is fine
        let shared = Value::array(vec![Value::Int(2)]);
        let pair = Value::array(vec![shared.clone(), shared]);
        assert_eq!(value_to_json(&pair), Ok(serde_json::json!([[2], [2]])));
        if let Value::Array(arr) = &list {
            arr.lock().clear();
        }
    }
}

// Enum.getValue / Enum.getName / Enum.hasValue over the loaded chunk's enum tables

use super::{check_arity, get_int_arg};
use crate::bytecode::{Chunk, EnumMembers};
use crate::vm::{ForeignRegistry, Value};
use std::sync::Arc;

/// Bind the enum lookups to `chunk`. Called on every chunk load.
pub fn install(registry: &mut ForeignRegistry, chunk: Arc<Chunk>) {
    let c = chunk.clone();
    registry.register_native_closure("Enum.getValue", move |args| get_value(&c, args));
    let c = chunk.clone();
    registry.register_native_closure("Enum.getName", move |args| get_name(&c, args));
    registry.register_native_closure("Enum.hasValue", move |args| has_value(&chunk, args));
}

fn members<'c>(chunk: &'c Chunk, args: &[Value]) -> Result<&'c EnumMembers, String> {
    let name = args[0].to_text();
    chunk
        .enums
        .get(&name.to_lowercase())
        .ok_or_else(|| format!("unknown enum: {}", name))
}

/// Enum.getValue(enum, member) -> Int
fn get_value(chunk: &Chunk, args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let table = members(chunk, args)?;
    let member = args[1].to_text();
    table
        .get(&member.to_lowercase())
        .map(|v| Value::Int(*v))
        .ok_or_else(|| format!("enum {} has no member {}", args[0].to_text(), member))
}

/// Enum.getName(enum, value) -> member name, "" when no member has the value
fn get_name(chunk: &Chunk, args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let table = members(chunk, args)?;
    let value = get_int_arg(&args[1], "value")?;
    // lowest name wins when several members share a value
    let name = table
        .iter()
        .filter(|(_, v)| **v == value)
        .map(|(k, _)| k.as_str())
        .min()
        .unwrap_or("");
    Ok(Value::string(name))
}

fn has_value(chunk: &Chunk, args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let table = members(chunk, args)?;
    let value = get_int_arg(&args[1], "value")?;
    Ok(Value::Bool(table.values().any(|v| *v == value)))
}

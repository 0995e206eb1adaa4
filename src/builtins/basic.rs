// Core helpers: Assert, IsNull, IIf, TypeName, Val

use super::{check_arity, check_arity_range};
use crate::vm::{ForeignError, ForeignRegistry, ForeignResult, Value};

pub fn register(registry: &mut ForeignRegistry) {
    registry.register("Assert", basic_assert);
    registry.register_native("IsNull", basic_is_null);
    registry.register_native("IIf", basic_iif);
    registry.register_native("TypeName", basic_type_name);
    registry.register_native("Val", basic_val);
}

/// Assert(condition, ?message)
fn basic_assert(args: &[Value]) -> ForeignResult {
    check_arity_range(1, 2, args.len())?;
    if args[0].is_truthy() {
        return Ok(Value::Nil);
    }
    let message = match args.get(1) {
        Some(m) => m.to_text(),
        None => "condition is false".to_string(),
    };
    Err(ForeignError::Assertion(message))
}

fn basic_is_null(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    Ok(Value::Bool(args[0].is_nil()))
}

/// IIf(condition, whenTrue, whenFalse)
fn basic_iif(args: &[Value]) -> Result<Value, String> {
    check_arity(3, args.len())?;
    Ok(if args[0].is_truthy() {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

fn basic_type_name(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    Ok(Value::string(args[0].type_name()))
}

/// Val(text): leading numeric value of a string, 0 when there is none
fn basic_val(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let text = match &args[0] {
        Value::Int(_) | Value::Float(_) => return Ok(args[0].clone()),
        other => other.to_text(),
    };
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    // longest numeric prefix, as BASIC's Val does; one decimal point at most
    let mut seen_dot = false;
    let end = text
        .char_indices()
        .take_while(|(i, c)| match *c {
            '0'..='9' => true,
            '.' if !seen_dot => {
                seen_dot = true;
                true
            }
            '-' | '+' => *i == 0,
            _ => false,
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    Ok(text[..end]
        .parse::<f64>()
        .map(Value::Float)
        .unwrap_or(Value::Int(0)))
}

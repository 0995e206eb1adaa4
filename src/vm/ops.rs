// CyberBasic operator semantics
// int op int -> int, any float operand -> float, `+` with a string concatenates

use super::value::Value;
use crate::error::{CyberError, CyberResult};
use std::cmp::Ordering;

/// Arithmetic operators reachable from bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Power,
    IntDiv,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "mod",
            ArithOp::Power => "^",
            ArithOp::IntDiv => "\\",
        }
    }
}

/// Ordering comparisons; equality is handled by `values_equal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
        }
    }
}

enum Numbers {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numbers(a: &Value, b: &Value) -> Option<Numbers> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(Numbers::Ints(*x, *y)),
        (Value::Int(x), Value::Float(y)) => Some(Numbers::Floats(*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Some(Numbers::Floats(*x, *y as f64)),
        (Value::Float(x), Value::Float(y)) => Some(Numbers::Floats(*x, *y)),
        _ => None,
    }
}

fn invalid(op: &str, a: &Value, b: &Value) -> CyberError {
    CyberError::type_error(format!(
        "invalid operands for {}: {} and {}",
        op,
        a.type_name(),
        b.type_name()
    ))
}

/// Apply a binary arithmetic operator following the coercion matrix
pub fn arithmetic(op: ArithOp, a: &Value, b: &Value) -> CyberResult<Value> {
    if op == ArithOp::Add && (matches!(a, Value::String(_)) || matches!(b, Value::String(_))) {
        let mut text = a.to_text();
        text.push_str(&b.to_text());
        return Ok(Value::from(text));
    }

    let nums = numbers(a, b).ok_or_else(|| invalid(op.symbol(), a, b))?;

    match op {
        ArithOp::Add => Ok(match nums {
            Numbers::Ints(x, y) => Value::Int(x.wrapping_add(y)),
            Numbers::Floats(x, y) => Value::Float(x + y),
        }),
        ArithOp::Sub => Ok(match nums {
            Numbers::Ints(x, y) => Value::Int(x.wrapping_sub(y)),
            Numbers::Floats(x, y) => Value::Float(x - y),
        }),
        ArithOp::Mul => Ok(match nums {
            Numbers::Ints(x, y) => Value::Int(x.wrapping_mul(y)),
            Numbers::Floats(x, y) => Value::Float(x * y),
        }),
        ArithOp::Div => match nums {
            Numbers::Ints(_, 0) => Err(CyberError::division_by_zero()),
            Numbers::Ints(x, y) => Ok(Value::Int(x.wrapping_div(y))),
            Numbers::Floats(_, y) if y == 0.0 => Err(CyberError::division_by_zero()),
            Numbers::Floats(x, y) => Ok(Value::Float(x / y)),
        },
        ArithOp::Mod => match nums {
            Numbers::Ints(_, 0) => Err(CyberError::division_by_zero()),
            Numbers::Ints(x, y) => Ok(Value::Int(x.wrapping_rem(y))),
            Numbers::Floats(_, y) if y == 0.0 => Err(CyberError::division_by_zero()),
            Numbers::Floats(x, y) => Ok(Value::Float(x % y)),
        },
        ArithOp::Power => Ok(match nums {
            Numbers::Ints(x, y) => Value::Float((x as f64).powf(y as f64)),
            Numbers::Floats(x, y) => Value::Float(x.powf(y)),
        }),
        ArithOp::IntDiv => {
            let (x, y) = match nums {
                Numbers::Ints(x, y) => (x as f64, y as f64),
                Numbers::Floats(x, y) => (x, y),
            };
            if y == 0.0 {
                return Err(CyberError::division_by_zero());
            }
            Ok(Value::Int((x / y).trunc() as i64))
        }
    }
}

pub fn negate(a: &Value) -> CyberResult<Value> {
    match a {
        Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(CyberError::type_error(format!(
            "invalid operand for unary -: {}",
            other.type_name()
        ))),
    }
}

/// Ordering comparison. Numbers compare across int/float, strings compare
/// lexicographically; any other pairing is a type error.
pub fn compare(op: CompareOp, a: &Value, b: &Value) -> CyberResult<bool> {
    let ordering = match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.as_ref().cmp(y.as_ref())),
        _ => match numbers(a, b) {
            Some(Numbers::Ints(x, y)) => Some(x.cmp(&y)),
            Some(Numbers::Floats(x, y)) => x.partial_cmp(&y),
            None => return Err(invalid(op.symbol(), a, b)),
        },
    };

    // NaN compares false for every ordering
    let Some(ordering) = ordering else {
        return Ok(false);
    };

    Ok(match op {
        CompareOp::Less => ordering == Ordering::Less,
        CompareOp::LessEqual => ordering != Ordering::Greater,
        CompareOp::Greater => ordering == Ordering::Greater,
        CompareOp::GreaterEqual => ordering != Ordering::Less,
    })
}

/// Equality: numeric across int/float, structural otherwise. Mismatched
/// types are simply unequal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match numbers(a, b) {
        Some(Numbers::Ints(x, y)) => x == y,
        Some(Numbers::Floats(x, y)) => x == y,
        None => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn arith(op: ArithOp, a: impl Into<Value>, b: impl Into<Value>) -> CyberResult<Value> {
        arithmetic(op, &a.into(), &b.into())
    }

    #[test]
    fn test_int_int_stays_int() {
        assert_eq!(arith(ArithOp::Add, 3, 5).unwrap(), Value::Int(8));
        assert_eq!(arith(ArithOp::Sub, 3, 5).unwrap(), Value::Int(-2));
        assert_eq!(arith(ArithOp::Mul, 4, 5).unwrap(), Value::Int(20));
        assert_eq!(arith(ArithOp::Div, 7, 2).unwrap(), Value::Int(3));
        assert_eq!(arith(ArithOp::Mod, 7, 3).unwrap(), Value::Int(1));
        assert_eq!(arith(ArithOp::IntDiv, -7, 2).unwrap(), Value::Int(-3));
    }

    #[test]
    fn test_power_promotes_to_float() {
        assert_eq!(arith(ArithOp::Power, 2, 10).unwrap(), Value::Float(1024.0));
        assert_eq!(arith(ArithOp::Power, 4.0, 0.5).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_mixed_operands_promote() {
        assert_eq!(arith(ArithOp::Add, 1, 0.5).unwrap(), Value::Float(1.5));
        assert_eq!(arith(ArithOp::Sub, 2.5, 1).unwrap(), Value::Float(1.5));
        assert_eq!(arith(ArithOp::Mul, 1.5, 1.5).unwrap(), Value::Float(2.25));
        assert_eq!(arith(ArithOp::Div, 1, 4.0).unwrap(), Value::Float(0.25));
        assert_eq!(arith(ArithOp::Mod, 7.5, 2).unwrap(), Value::Float(1.5));
        assert_eq!(arith(ArithOp::IntDiv, 7.5, 2).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        for op in [ArithOp::Div, ArithOp::Mod, ArithOp::IntDiv] {
            let err = arith(op, 1, 0).unwrap_err();
            assert_eq!(err.kind, ErrorKind::DivisionByZero);
            let err = arith(op, 1.0, 0.0).unwrap_err();
            assert_eq!(err.kind, ErrorKind::DivisionByZero);
        }
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(arith(ArithOp::Add, "hp: ", 10).unwrap(), Value::string("hp: 10"));
        assert_eq!(arith(ArithOp::Add, 2.5, "x").unwrap(), Value::string("2.5x"));
        assert_eq!(arith(ArithOp::Add, "a", Value::Nil).unwrap(), Value::string("a"));
        assert_eq!(
            arith(ArithOp::Sub, "a", 1).unwrap_err().kind,
            ErrorKind::TypeError
        );
    }

    #[test]
    fn test_comparisons() {
        let one = Value::Int(1);
        let half = Value::Float(0.5);
        assert!(compare(CompareOp::Greater, &one, &half).unwrap());
        assert!(compare(CompareOp::LessEqual, &one, &Value::Float(1.0)).unwrap());
        assert!(compare(CompareOp::Less, &Value::string("a"), &Value::string("b")).unwrap());
        let err = compare(CompareOp::Less, &Value::string("a"), &one).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_equality_is_numeric_aware() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Int(1), &Value::string("1")));
        assert!(values_equal(&Value::Nil, &Value::Nil));
    }

    #[test]
    fn test_negate() {
        assert_eq!(negate(&Value::Int(3)).unwrap(), Value::Int(-3));
        assert_eq!(negate(&Value::Float(1.5)).unwrap(), Value::Float(-1.5));
        assert!(negate(&Value::string("x")).is_err());
    }
}

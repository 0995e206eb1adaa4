// Math foreign functions
// Provides: PI, abs, floor, ceil, round, sqrt, pow, sin, cos, tan, atan,
// atan2, log, log10, exp, min, max, clamp, lerp, rnd

use super::{check_arity, get_number_arg};
use crate::vm::{ForeignRegistry, Value};

pub fn register(registry: &mut ForeignRegistry) {
    registry.register_native("PI", math_pi);
    registry.register_native("Abs", math_abs);
    registry.register_native("Floor", math_floor);
    registry.register_native("Ceil", math_ceil);
    registry.register_native("Round", math_round);
    registry.register_native("Sqrt", math_sqrt);
    registry.register_native("Pow", math_pow);
    registry.register_native("Sin", math_sin);
    registry.register_native("Cos", math_cos);
    registry.register_native("Tan", math_tan);
    registry.register_native("Atan", math_atan);
    registry.register_native("Atan2", math_atan2);
    registry.register_native("Log", math_log);
    registry.register_native("Log10", math_log10);
    registry.register_native("Exp", math_exp);
    registry.register_native("Min", math_min);
    registry.register_native("Max", math_max);
    registry.register_native("Clamp", math_clamp);
    registry.register_native("Lerp", math_lerp);
    registry.register_native("Rnd", math_rnd);
}

fn get_number(args: &[Value], idx: usize, name: &str) -> Result<f64, String> {
    match args.get(idx) {
        Some(value) => get_number_arg(value, name),
        None => Err(format!("Expected at least {} argument(s)", idx + 1)),
    }
}

fn unary(args: &[Value], f: fn(f64) -> f64) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let n = get_number(args, 0, "n")?;
    Ok(Value::Float(f(n)))
}

fn math_pi(args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    Ok(Value::Float(std::f64::consts::PI))
}

fn math_abs(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
        _ => Ok(Value::Float(get_number(args, 0, "n")?.abs())),
    }
}

fn math_floor(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::floor)
}

fn math_ceil(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::ceil)
}

fn math_round(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::round)
}

fn math_sqrt(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::sqrt)
}

fn math_sin(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::sin)
}

fn math_cos(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::cos)
}

fn math_tan(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::tan)
}

fn math_atan(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::atan)
}

fn math_log(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::ln)
}

fn math_log10(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::log10)
}

fn math_exp(args: &[Value]) -> Result<Value, String> {
    unary(args, f64::exp)
}

fn math_pow(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let base = get_number(args, 0, "base")?;
    let exp = get_number(args, 1, "exponent")?;
    Ok(Value::Float(base.powf(exp)))
}

/// Atan2(y, x)
fn math_atan2(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let y = get_number(args, 0, "y")?;
    let x = get_number(args, 1, "x")?;
    Ok(Value::Float(y.atan2(x)))
}

fn math_min(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let a = get_number(args, 0, "a")?;
    let b = get_number(args, 1, "b")?;
    Ok(Value::Float(a.min(b)))
}

fn math_max(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let a = get_number(args, 0, "a")?;
    let b = get_number(args, 1, "b")?;
    Ok(Value::Float(a.max(b)))
}

fn math_clamp(args: &[Value]) -> Result<Value, String> {
    check_arity(3, args.len())?;
    let x = get_number(args, 0, "x")?;
    let lo = get_number(args, 1, "min")?;
    let hi = get_number(args, 2, "max")?;
    Ok(Value::Float(x.max(lo).min(hi)))
}

fn math_lerp(args: &[Value]) -> Result<Value, String> {
    check_arity(3, args.len())?;
    let a = get_number(args, 0, "a")?;
    let b = get_number(args, 1, "b")?;
    let t = get_number(args, 2, "t")?;
    Ok(Value::Float(a + (b - a) * t))
}

/// Rnd() in [0, 1), Rnd(n) in [0, n)
fn math_rnd(args: &[Value]) -> Result<Value, String> {
    let r = rand::random::<f64>();
    match args.len() {
        0 => Ok(Value::Float(r)),
        1 => Ok(Value::Float(r * get_number(args, 0, "n")?)),
        n => Err(format!("Expected 0-1 argument(s) but got {}", n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_math_functions() {
        assert_eq!(math_abs(&[Value::Int(-3)]), Ok(Value::Int(3)));
        assert_eq!(math_abs(&[Value::Float(-1.5)]), Ok(Value::Float(1.5)));
        assert_eq!(math_pow(&[Value::Int(2), Value::Int(10)]), Ok(Value::Float(1024.0)));
        assert_eq!(
            math_clamp(&[Value::Int(-5), Value::Int(0), Value::Int(3)]),
            Ok(Value::Float(0.0))
        );
        assert!(math_sqrt(&[Value::string("4")]).is_err());
    }

    #[test]
    fn test_rnd_stays_in_range() {
        for _ in 0..100 {
            let Ok(Value::Float(r)) = math_rnd(&[Value::Int(10)]) else {
                panic!("Rnd should return a float");
            };
            assert!((0.0..10.0).contains(&r));
        }
    }
}

// String foreign functions (character based, 1-based positions)
// Provides: Left, Right, Mid, Len, Upper, Lower, Trim, InStr, Replace, Chr, Asc

use super::{check_arity, check_arity_range, get_int_arg, get_string_arg};
use crate::vm::{ForeignRegistry, Value};

pub fn register(registry: &mut ForeignRegistry) {
    registry.register_native("Left", string_left);
    registry.register_native("Right", string_right);
    registry.register_native("Mid", string_mid);
    registry.register_native("Len", string_len);
    registry.register_native("Upper", string_upper);
    registry.register_native("Lower", string_lower);
    registry.register_native("Trim", string_trim);
    registry.register_native("InStr", string_instr);
    registry.register_native("Replace", string_replace);
    registry.register_native("Chr", string_chr);
    registry.register_native("Asc", string_asc);
}

fn count_arg(value: &Value, name: &str) -> Result<usize, String> {
    Ok(get_int_arg(value, name)?.max(0) as usize)
}

fn string_left(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let s = args[0].to_text();
    let n = count_arg(&args[1], "count")?;
    Ok(Value::string(s.chars().take(n).collect::<String>()))
}

fn string_right(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let s = args[0].to_text();
    let total = s.chars().count();
    let n = count_arg(&args[1], "count")?.min(total);
    Ok(Value::string(s.chars().skip(total - n).collect::<String>()))
}

/// Mid(s, start, ?count)
fn string_mid(args: &[Value]) -> Result<Value, String> {
    check_arity_range(2, 3, args.len())?;
    let s = args[0].to_text();
    let start = get_int_arg(&args[1], "start")?.max(1) as usize - 1;
    let chars = s.chars().skip(start);
    let out: String = match args.get(2) {
        Some(count) => chars.take(count_arg(count, "count")?).collect(),
        None => chars.collect(),
    };
    Ok(Value::string(out))
}

fn string_len(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    Ok(Value::Int(args[0].to_text().chars().count() as i64))
}

fn string_upper(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    Ok(Value::string(args[0].to_text().to_uppercase()))
}

fn string_lower(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    Ok(Value::string(args[0].to_text().to_lowercase()))
}

fn string_trim(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    Ok(Value::string(args[0].to_text().trim()))
}

/// InStr(haystack, needle): 1-based character position, 0 when absent
fn string_instr(args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let haystack = args[0].to_text();
    let needle = args[1].to_text();
    let pos = haystack
        .find(&needle)
        .map(|byte| haystack[..byte].chars().count() as i64 + 1)
        .unwrap_or(0);
    Ok(Value::Int(pos))
}

fn string_replace(args: &[Value]) -> Result<Value, String> {
    check_arity(3, args.len())?;
    let s = args[0].to_text();
    let from = get_string_arg(&args[1], "from")?;
    let to = args[2].to_text();
    if from.is_empty() {
        return Ok(Value::string(s));
    }
    Ok(Value::string(s.replace(&from, &to)))
}

fn string_chr(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let code = get_int_arg(&args[0], "code")?;
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("Invalid character code: {}", code))?;
    Ok(Value::string(c.to_string()))
}

fn string_asc(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    Ok(Value::Int(
        args[0].to_text().chars().next().map(|c| c as i64).unwrap_or(0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::string(text)
    }

    #[test]
    fn test_substrings_are_char_based() {
        assert_eq!(string_left(&[s("héllo"), Value::Int(2)]), Ok(s("hé")));
        assert_eq!(string_right(&[s("héllo"), Value::Int(9)]), Ok(s("héllo")));
        assert_eq!(string_mid(&[s("héllo"), Value::Int(2), Value::Int(3)]), Ok(s("éll")));
        assert_eq!(string_mid(&[s("héllo"), Value::Int(3)]), Ok(s("llo")));
        assert_eq!(string_len(&[s("héllo")]), Ok(Value::Int(5)));
    }

    #[test]
    fn test_instr_positions() {
        assert_eq!(string_instr(&[s("éabc"), s("bc")]), Ok(Value::Int(3)));
        assert_eq!(string_instr(&[s("abc"), s("z")]), Ok(Value::Int(0)));
    }

    #[test]
    fn test_case_and_codes() {
        assert_eq!(string_upper(&[s("abc")]), Ok(s("ABC")));
        assert_eq!(string_trim(&[s("  x ")]), Ok(s("x")));
        assert_eq!(string_chr(&[Value::Int(65)]), Ok(s("A")));
        assert_eq!(string_asc(&[s("A")]), Ok(Value::Int(65)));
        assert_eq!(string_replace(&[s("a-b-c"), s("-"), s("+")]), Ok(s("a+b+c")));
    }
}

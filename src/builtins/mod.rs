// Standard foreign functions available to every CyberBasic program
// Each module registers plain `fn(&[Value])` natives into a ForeignRegistry

mod basic;
pub mod enums;
mod file;
mod json;
mod math;
mod string;

use crate::vm::render::{STANDARD_2D, STANDARD_3D, STANDARD_GUI};
use crate::vm::{ForeignRegistry, RenderCategory, Value, VM};

/// Register the standard library and the standard render classifications
pub fn install(vm: &mut VM) {
    register(vm.foreign_mut());
    for (names, category) in [
        (STANDARD_2D, RenderCategory::TwoD),
        (STANDARD_3D, RenderCategory::ThreeD),
        (STANDARD_GUI, RenderCategory::Gui),
    ] {
        for name in names {
            vm.register_render_type(name, category);
        }
    }
}

/// Register the standard foreign functions only
pub fn register(registry: &mut ForeignRegistry) {
    basic::register(registry);
    math::register(registry);
    string::register(registry);
    file::register(registry);
    json::register(registry);
}

// ==================== Argument helpers ====================

pub fn check_arity(expected: usize, got: usize) -> Result<(), String> {
    if expected != got {
        return Err(format!("Expected {} argument(s) but got {}", expected, got));
    }
    Ok(())
}

pub fn check_arity_range(min: usize, max: usize, got: usize) -> Result<(), String> {
    if got < min || got > max {
        return Err(format!(
            "Expected {}-{} argument(s) but got {}",
            min, max, got
        ));
    }
    Ok(())
}

pub fn get_string_arg(value: &Value, name: &str) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.to_string()),
        _ => Err(format!(
            "Argument '{}' must be a string, got {}",
            name,
            value.type_name()
        )),
    }
}

pub fn get_number_arg(value: &Value, name: &str) -> Result<f64, String> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        _ => Err(format!(
            "Argument '{}' must be a number, got {}",
            name,
            value.type_name()
        )),
    }
}

pub fn get_int_arg(value: &Value, name: &str) -> Result<i64, String> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        _ => Err(format!(
            "Argument '{}' must be an integer, got {}",
            name,
            value.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_registers_library_and_render_names() {
        let mut vm = VM::new();
        install(&mut vm);
        assert!(vm.foreign().contains("assert"));
        assert!(vm.foreign().contains("LoadJSONFromString"));
        assert!(vm.foreign().contains("pi"));

        let mut c = crate::bytecode::Chunk::new();
        c.write_op(crate::bytecode::OpCode::Halt);
        vm.load_chunk(c);
        assert!(vm.foreign().contains("Enum.getValue"));
    }

    #[test]
    fn test_argument_helpers() {
        assert!(check_arity(2, 2).is_ok());
        assert!(check_arity(2, 1).is_err());
        assert!(check_arity_range(1, 3, 0).is_err());
        assert_eq!(get_number_arg(&Value::Int(3), "n"), Ok(3.0));
        assert!(get_string_arg(&Value::Int(3), "s").is_err());
        assert_eq!(get_int_arg(&Value::Float(4.0), "i"), Ok(4));
        assert!(get_int_arg(&Value::Float(4.5), "i").is_err());
    }
}

// Whole-file foreign functions: ReadFile, WriteFile, AppendFile, DeleteFile, FileExists
// Line-oriented access goes through the OpenFile/ReadLine opcodes instead

use super::{check_arity, get_string_arg};
use crate::vm::{ForeignError, ForeignRegistry, ForeignResult, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

pub fn register(registry: &mut ForeignRegistry) {
    registry.register("ReadFile", file_read);
    registry.register("WriteFile", file_write);
    registry.register("AppendFile", file_append);
    registry.register("DeleteFile", file_delete);
    registry.register_native("FileExists", file_exists);
}

fn io_error(action: &str, path: &str, e: std::io::Error) -> ForeignError {
    ForeignError::File(format!("cannot {} '{}': {}", action, path, e))
}

/// ReadFile(path) -> String
fn file_read(args: &[Value]) -> ForeignResult {
    check_arity(1, args.len())?;
    let path = get_string_arg(&args[0], "path")?;
    let content = fs::read_to_string(&path).map_err(|e| io_error("read", &path, e))?;
    Ok(Value::string(content))
}

/// WriteFile(path, content) -> true
fn file_write(args: &[Value]) -> ForeignResult {
    check_arity(2, args.len())?;
    let path = get_string_arg(&args[0], "path")?;
    fs::write(&path, args[1].to_text()).map_err(|e| io_error("write", &path, e))?;
    Ok(Value::Bool(true))
}

fn file_append(args: &[Value]) -> ForeignResult {
    check_arity(2, args.len())?;
    let path = get_string_arg(&args[0], "path")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| io_error("open", &path, e))?;
    file.write_all(args[1].to_text().as_bytes())
        .map_err(|e| io_error("append to", &path, e))?;
    Ok(Value::Bool(true))
}

fn file_delete(args: &[Value]) -> ForeignResult {
    check_arity(1, args.len())?;
    let path = get_string_arg(&args[0], "path")?;
    fs::remove_file(&path).map_err(|e| io_error("delete", &path, e))?;
    Ok(Value::Bool(true))
}

fn file_exists(args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let path = get_string_arg(&args[0], "path")?;
    Ok(Value::Bool(Path::new(&path).exists()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_delete() {
        let path = std::env::temp_dir().join(format!("cyber_builtin_file_{}.txt", std::process::id()));
        let p = Value::string(path.to_string_lossy());

        file_write(&[p.clone(), Value::string("one")]).unwrap();
        file_append(&[p.clone(), Value::string("+two")]).unwrap();
        assert_eq!(file_read(&[p.clone()]), Ok(Value::string("one+two")));
        assert_eq!(file_exists(&[p.clone()]), Ok(Value::Bool(true)));
        file_delete(&[p.clone()]).unwrap();
        assert_eq!(file_exists(&[p.clone()]), Ok(Value::Bool(false)));

        let err = file_read(&[p]).unwrap_err();
        assert!(matches!(err, ForeignError::File(_)));
    }
}

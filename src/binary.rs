// CyberBasic compiled chunk format (.cbc)
// MAGIC, VERSION, then constants, code, lines and the name tables

use crate::bytecode::{Chunk, EnumMembers};
use crate::vm::value::Value;
use rustc_hash::FxHashMap;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"CYBC";
const VERSION: u8 = 1;

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_MAP: u8 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BinaryError {
    #[error("Invalid file: too short")]
    TooShort,
    #[error("Invalid file: not a .cbc file")]
    BadMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("Unexpected end of file")]
    UnexpectedEof,
    #[error("Invalid UTF-8 string")]
    InvalidUtf8,
    #[error("Unknown constant tag: {0}")]
    UnknownTag(u8),
    #[error("Line map has {lines} entries for {code} bytes of code")]
    LineMapMismatch { code: usize, lines: usize },
}

pub fn serialize(chunk: &Chunk) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(MAGIC);
    out.push(VERSION);

    write_u32(&mut out, chunk.constants.len() as u32);
    for constant in &chunk.constants {
        serialize_value(&mut out, constant);
    }

    write_u32(&mut out, chunk.code.len() as u32);
    out.extend_from_slice(&chunk.code);

    write_u32(&mut out, chunk.lines.len() as u32);
    for line in &chunk.lines {
        write_u32(&mut out, *line as u32);
    }

    write_table(&mut out, &chunk.variables, |out, slot| write_u32(out, *slot as u32));
    write_table(&mut out, &chunk.var_dims, |out, dims| {
        write_u32(out, dims.len() as u32);
        for d in dims {
            write_u32(out, *d as u32);
        }
    });
    write_table(&mut out, &chunk.functions, |out, offset| {
        write_u32(out, *offset as u32)
    });
    write_table(&mut out, &chunk.enums, |out, members| {
        write_table(out, members, |out, v| out.extend_from_slice(&v.to_le_bytes()));
    });

    out
}

pub fn deserialize(data: &[u8]) -> Result<Chunk, BinaryError> {
    let mut cursor = 0;

    if data.len() < 5 {
        return Err(BinaryError::TooShort);
    }
    if &data[0..4] != MAGIC {
        return Err(BinaryError::BadMagic);
    }
    cursor += 4;

    let version = data[cursor];
    if version != VERSION {
        return Err(BinaryError::UnsupportedVersion(version));
    }
    cursor += 1;

    let mut chunk = Chunk::new();

    let constant_count = read_u32(data, &mut cursor)? as usize;
    for _ in 0..constant_count {
        let value = deserialize_value(data, &mut cursor)?;
        chunk.constants.push(value);
    }

    let code_len = read_u32(data, &mut cursor)? as usize;
    chunk.code = take(data, &mut cursor, code_len)?.to_vec();

    let lines_len = read_u32(data, &mut cursor)? as usize;
    for _ in 0..lines_len {
        chunk.lines.push(read_u32(data, &mut cursor)? as usize);
    }
    if chunk.lines.len() != chunk.code.len() {
        return Err(BinaryError::LineMapMismatch {
            code: chunk.code.len(),
            lines: chunk.lines.len(),
        });
    }

    chunk.variables = read_table(data, &mut cursor, |d, c| Ok(read_u32(d, c)? as usize))?;
    chunk.var_dims = read_table(data, &mut cursor, |d, c| {
        let n = read_u32(d, c)? as usize;
        (0..n)
            .map(|_| Ok(read_u32(d, c)? as usize))
            .collect::<Result<Vec<usize>, BinaryError>>()
    })?;
    chunk.functions = read_table(data, &mut cursor, |d, c| Ok(read_u32(d, c)? as usize))?;
    chunk.enums = read_table(data, &mut cursor, |d, c| {
        let members: EnumMembers = read_table(d, c, |d, c| {
            let bytes = take(d, c, 8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Ok(i64::from_le_bytes(buf))
        })?;
        Ok(members)
    })?;

    Ok(chunk)
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], BinaryError> {
    let end = cursor.checked_add(len).ok_or(BinaryError::UnexpectedEof)?;
    let slice = data.get(*cursor..end).ok_or(BinaryError::UnexpectedEof)?;
    *cursor = end;
    Ok(slice)
}

fn read_u8(data: &[u8], cursor: &mut usize) -> Result<u8, BinaryError> {
    Ok(take(data, cursor, 1)?[0])
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32, BinaryError> {
    let bytes = take(data, cursor, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn read_string(data: &[u8], cursor: &mut usize) -> Result<String, BinaryError> {
    let len = read_u32(data, cursor)? as usize;
    let bytes = take(data, cursor, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| BinaryError::InvalidUtf8)
}

/// Tables are written in key order so identical chunks encode identically
fn write_table<T>(
    out: &mut Vec<u8>,
    table: &FxHashMap<String, T>,
    mut write_value: impl FnMut(&mut Vec<u8>, &T),
) {
    let mut keys: Vec<&String> = table.keys().collect();
    keys.sort();
    write_u32(out, keys.len() as u32);
    for key in keys {
        write_string(out, key);
        write_value(out, &table[key]);
    }
}

fn read_table<T>(
    data: &[u8],
    cursor: &mut usize,
    mut read_value: impl FnMut(&[u8], &mut usize) -> Result<T, BinaryError>,
) -> Result<FxHashMap<String, T>, BinaryError> {
    let count = read_u32(data, cursor)? as usize;
    let mut table = FxHashMap::default();
    for _ in 0..count {
        let key = read_string(data, cursor)?;
        let value = read_value(data, cursor)?;
        table.insert(key, value);
    }
    Ok(table)
}

fn serialize_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Nil => out.push(TAG_NIL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Value::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            write_string(out, s);
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            let items = items.lock();
            write_u32(out, items.len() as u32);
            for item in items.iter() {
                serialize_value(out, item);
            }
        }
        Value::Map(map) => {
            out.push(TAG_MAP);
            let map = map.lock();
            write_table(out, &*map, serialize_value);
        }
    }
}

fn deserialize_value(data: &[u8], cursor: &mut usize) -> Result<Value, BinaryError> {
    let tag = read_u8(data, cursor)?;
    match tag {
        TAG_NIL => Ok(Value::Nil),
        TAG_BOOL => Ok(Value::Bool(read_u8(data, cursor)? != 0)),
        TAG_INT | TAG_FLOAT => {
            let bytes = take(data, cursor, 8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            if tag == TAG_INT {
                Ok(Value::Int(i64::from_le_bytes(buf)))
            } else {
                Ok(Value::Float(f64::from_le_bytes(buf)))
            }
        }
        TAG_STRING => Ok(Value::from(read_string(data, cursor)?)),
        TAG_ARRAY => {
            let count = read_u32(data, cursor)? as usize;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(deserialize_value(data, cursor)?);
            }
            Ok(Value::array(items))
        }
        TAG_MAP => Ok(Value::map(read_table(data, cursor, deserialize_value)?)),
        other => Err(BinaryError::UnknownTag(other)),
    }
}

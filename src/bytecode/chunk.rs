// CyberBasic Bytecode Chunk
// Contains bytecode, constants, the per-byte line map and name tables

use super::opcode::OpCode;
use crate::error::{CyberError, CyberResult};
use crate::vm::value::Value;
use rustc_hash::FxHashMap;
use std::fmt::Write as _;

/// Enum members (lowercase name -> value)
pub type EnumMembers = FxHashMap<String, i64>;

/// A compiled program unit. All name tables are keyed by lowercase names.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Source line for each byte of `code` (0 = unknown)
    pub lines: Vec<usize>,
    /// Constant pool, append-only
    pub constants: Vec<Value>,
    /// Variable name -> operand-stack slot
    pub variables: FxHashMap<String, usize>,
    /// Array dimensions per variable; absent for scalars
    pub var_dims: FxHashMap<String, Vec<usize>>,
    /// Sub/Function name -> code offset
    pub functions: FxHashMap<String, usize>,
    /// Enum name -> members
    pub enums: FxHashMap<String, EnumMembers>,
    current_line: usize,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source line recorded for subsequently written bytes
    pub fn set_line(&mut self, line: usize) {
        self.current_line = line;
    }

    /// Write a single byte, recording the current line
    pub fn write(&mut self, byte: u8) {
        self.code.push(byte);
        self.lines.push(self.current_line);
    }

    pub fn write_op(&mut self, op: OpCode) {
        self.write(op as u8);
    }

    /// Write a u16 operand (little-endian)
    pub fn write_u16(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write(lo);
        self.write(hi);
    }

    /// Write an opcode followed by raw operand bytes
    pub fn emit(&mut self, op: OpCode, operands: &[u8]) {
        self.write_op(op);
        for byte in operands {
            self.write(*byte);
        }
    }

    /// Add a constant and return its index
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Constant index of a name, reusing an identical string already in the pool
    pub fn name_constant(&mut self, name: &str) -> CyberResult<u8> {
        let existing = self
            .constants
            .iter()
            .position(|c| matches!(c, Value::String(s) if s.as_ref() == name));
        let index = match existing {
            Some(i) => i,
            None => self.add_constant(Value::string(name)),
        };
        Self::operand_index(index)
    }

    /// Append a constant and emit `LoadConst` for it
    pub fn emit_constant(&mut self, value: Value) -> CyberResult<usize> {
        let index = self.add_constant(value);
        let operand = Self::operand_index(index)?;
        self.emit(OpCode::LoadConst, &[operand]);
        Ok(index)
    }

    fn operand_index(index: usize) -> CyberResult<u8> {
        u8::try_from(index)
            .map_err(|_| CyberError::invalid_bytecode("Too many constants in one chunk"))
    }

    /// Slot for a variable, assigning the next free slot on first use
    pub fn declare_variable(&mut self, name: &str) -> usize {
        let next = self.variables.len();
        *self.variables.entry(name.to_lowercase()).or_insert(next)
    }

    /// Declare an array variable with its dimensions
    pub fn declare_array(&mut self, name: &str, dims: &[usize]) -> usize {
        let slot = self.declare_variable(name);
        self.var_dims.insert(name.to_lowercase(), dims.to_vec());
        slot
    }

    /// Mark the current offset as the entry point of a Sub/Function
    pub fn define_function(&mut self, name: &str) -> usize {
        let offset = self.code.len();
        self.functions.insert(name.to_lowercase(), offset);
        offset
    }

    pub fn define_enum(&mut self, name: &str, members: &[(&str, i64)]) {
        let table = members
            .iter()
            .map(|(member, value)| (member.to_lowercase(), *value))
            .collect();
        self.enums.insert(name.to_lowercase(), table);
    }

    /// Get the current code offset
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a forward jump with a placeholder offset; returns the operand position
    pub fn emit_jump(&mut self, op: OpCode) -> usize {
        self.write_op(op);
        let at = self.code.len();
        self.write_u16(0xFFFF);
        at
    }

    /// Patch a forward jump so it lands on the current offset
    pub fn patch_jump(&mut self, operand: usize) -> CyberResult<()> {
        let distance = self.code.len() as i64 - (operand as i64 + 2);
        let rel = i16::try_from(distance)
            .map_err(|_| CyberError::invalid_bytecode("Jump too large"))?;
        let [lo, hi] = rel.to_le_bytes();
        self.code[operand] = lo;
        self.code[operand + 1] = hi;
        Ok(())
    }

    /// Emit a jump back to an earlier offset
    pub fn emit_loop(&mut self, op: OpCode, target: usize) -> CyberResult<()> {
        self.write_op(op);
        let distance = target as i64 - (self.code.len() as i64 + 2);
        let rel = i16::try_from(distance)
            .map_err(|_| CyberError::invalid_bytecode("Loop body too large"))?;
        self.write_u16(rel as u16);
        Ok(())
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    /// Read a little-endian u16 at the given offset
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let lo = *self.code.get(offset)?;
        let hi = *self.code.get(offset + 1)?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|v| v as i16)
    }

    /// Source line for the instruction at `offset`, if known
    pub fn get_line(&self, offset: usize) -> Option<usize> {
        match self.lines.get(offset) {
            Some(0) | None => None,
            Some(line) => Some(*line),
        }
    }

    /// Total encoded length of the instruction at `offset`
    pub fn instruction_len(&self, offset: usize) -> usize {
        match self.read_u8(offset).and_then(OpCode::from_byte) {
            Some(OpCode::CreateArray) => {
                let ndims = self.read_u8(offset + 1).unwrap_or(0) as usize;
                1 + 1 + ndims + 1
            }
            Some(op) => 1 + op.operand_count(),
            None => 1,
        }
    }

    fn format_constant(&self, idx: usize) -> String {
        match self.constants.get(idx) {
            Some(Value::String(s)) => {
                let char_count = s.chars().count();
                if char_count > 32 {
                    let truncated: String = s.chars().take(29).collect();
                    format!("\"{}...\"", truncated)
                } else {
                    format!("\"{}\"", s)
                }
            }
            Some(other) => other.to_string(),
            None => format!("???[{}]", idx),
        }
    }

    /// Disassemble the chunk into a listing
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "--- {} ---", name);
        let _ = writeln!(
            out,
            "{} bytes, {} constants\n",
            self.code.len(),
            self.constants.len()
        );

        let mut entries: Vec<(&String, &usize)> = self.functions.iter().collect();
        entries.sort_by_key(|(_, offset)| **offset);

        let mut offset = 0;
        while offset < self.code.len() {
            if let Some((fname, _)) = entries.iter().find(|(_, o)| **o == offset) {
                let _ = writeln!(out, "<sub {}>:", fname);
            }
            offset = self.disassemble_instruction(offset, &mut out);
        }
        out
    }

    /// Append one instruction to `out`; returns the next offset
    pub fn disassemble_instruction(&self, offset: usize, out: &mut String) -> usize {
        let line = self.lines.get(offset).copied().unwrap_or(0);
        if offset > 0 && self.lines.get(offset - 1).copied() == Some(line) {
            let _ = write!(out, "{:04}      ", offset);
        } else {
            let _ = write!(out, "{:04} {:4} ", offset, line);
        }

        let Some(op) = self.read_u8(offset).and_then(OpCode::from_byte) else {
            let _ = writeln!(out, "<bad opcode {}>", self.code[offset]);
            return offset + 1;
        };
        let byte = |i: usize| self.read_u8(offset + i).unwrap_or(0) as usize;
        let mnemonic = op.mnemonic();

        match op {
            OpCode::Push => {
                let _ = writeln!(out, "{:<16} {}", mnemonic, byte(1));
            }
            OpCode::LoadVar | OpCode::StoreVar | OpCode::LoadArray | OpCode::StoreArray => {
                let _ = writeln!(out, "{:<16} [{}]", mnemonic, byte(1));
            }
            OpCode::LoadGlobal | OpCode::StoreGlobal | OpCode::LoadConst | OpCode::LoadString => {
                let _ = writeln!(out, "{:<16} {}", mnemonic, self.format_constant(byte(1)));
            }
            OpCode::LoadEntityProp | OpCode::StoreEntityProp => {
                let entity = self.constants.get(byte(1)).map(Value::to_text).unwrap_or_default();
                let prop = self.constants.get(byte(2)).map(Value::to_text).unwrap_or_default();
                let _ = writeln!(out, "{:<16} {}.{}", mnemonic, entity, prop);
            }
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue => {
                let rel = self.read_i16(offset + 1).unwrap_or(0) as i64;
                let target = offset as i64 + 3 + rel;
                let _ = writeln!(out, "{:<16} @{}", mnemonic, target);
            }
            OpCode::CallUser | OpCode::CallForeign => {
                let _ = writeln!(
                    out,
                    "{:<16} {} ({})",
                    mnemonic,
                    self.format_constant(byte(1)),
                    byte(2)
                );
            }
            OpCode::StartCoroutine => {
                let target = self.read_u16(offset + 1).unwrap_or(0);
                let _ = writeln!(out, "{:<16} @{}", mnemonic, target);
            }
            OpCode::RegisterEvent => {
                let handler = self.read_u16(offset + 3).unwrap_or(0);
                let _ = writeln!(
                    out,
                    "{:<16} {} {} @{}",
                    mnemonic,
                    self.format_constant(byte(1)),
                    self.format_constant(byte(2)),
                    handler
                );
            }
            OpCode::CreateArray => {
                let ndims = byte(1);
                let dims: Vec<String> = (0..ndims)
                    .map(|d| self.format_constant(byte(2 + d)))
                    .collect();
                let _ = writeln!(
                    out,
                    "{:<16} [{}] ({})",
                    mnemonic,
                    byte(2 + ndims),
                    dims.join(", ")
                );
            }
            OpCode::MatMul => {
                let _ = writeln!(
                    out,
                    "{:<16} {} = {} * {}",
                    mnemonic,
                    self.format_constant(byte(1)),
                    self.format_constant(byte(2)),
                    self.format_constant(byte(3))
                );
            }
            _ => {
                let _ = writeln!(out, "{}", mnemonic);
            }
        }

        offset + self.instruction_len(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_track_every_byte() {
        let mut chunk = Chunk::new();
        chunk.set_line(3);
        chunk.emit(OpCode::Push, &[7]);
        chunk.set_line(4);
        chunk.emit(OpCode::Pop, &[]);
        assert_eq!(chunk.code.len(), chunk.lines.len());
        assert_eq!(chunk.get_line(1), Some(3));
        assert_eq!(chunk.get_line(2), Some(4));
        assert_eq!(chunk.get_line(99), None);
    }

    #[test]
    fn test_patch_forward_jump_is_relative_to_operand_end() {
        let mut chunk = Chunk::new();
        let at = chunk.emit_jump(OpCode::Jump);
        for _ in 0..300 {
            chunk.emit(OpCode::Push, &[1]);
        }
        chunk.patch_jump(at).unwrap();
        assert_eq!(chunk.read_i16(at), Some(600));
    }

    #[test]
    fn test_backward_loop_offset() {
        let mut chunk = Chunk::new();
        chunk.emit(OpCode::Push, &[1]);
        chunk.emit_loop(OpCode::Jump, 0).unwrap();
        assert_eq!(chunk.read_i16(3), Some(-5));
    }

    #[test]
    fn test_names_are_case_insensitive_and_stable() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.declare_variable("Score"), 0);
        assert_eq!(chunk.declare_variable("lives"), 1);
        assert_eq!(chunk.declare_variable("SCORE"), 0);
        chunk.define_function("Update");
        assert!(chunk.functions.contains_key("update"));
        assert_eq!(chunk.name_constant("x").unwrap(), chunk.name_constant("x").unwrap());
    }

    #[test]
    fn test_instruction_len_for_create_array() {
        let mut chunk = Chunk::new();
        chunk.emit(OpCode::CreateArray, &[2, 0, 1, 5]);
        assert_eq!(chunk.instruction_len(0), 5);
    }

    #[test]
    fn test_disassemble_lists_targets() {
        let mut chunk = Chunk::new();
        chunk.set_line(1);
        let g = chunk.name_constant("score").unwrap();
        chunk.emit(OpCode::Push, &[2]);
        chunk.emit(OpCode::StoreGlobal, &[g]);
        chunk.emit_loop(OpCode::Jump, 0).unwrap();
        let listing = chunk.disassemble("main");
        assert!(listing.contains("store_global"));
        assert!(listing.contains("\"score\""));
        assert!(listing.contains("@0"));
    }
}

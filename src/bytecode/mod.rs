// CyberBasic bytecode model

mod chunk;
mod opcode;

pub use chunk::{Chunk, EnumMembers};
pub use opcode::OpCode;

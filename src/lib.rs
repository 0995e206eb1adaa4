// CyberBasic runtime
// Stack bytecode VM with fibers, a foreign-function bridge and
// deferred render queues for the hybrid update/draw loop

pub mod binary;
pub mod builtins;
pub mod bytecode;
pub mod config;
pub mod driver;
pub mod error;
pub mod vm;

pub use bytecode::{Chunk, OpCode};
pub use config::VmConfig;
pub use error::{CyberError, CyberResult, ErrorKind};
pub use vm::{Value, VM};

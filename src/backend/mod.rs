//! x86-64 NASM code generation (§4): storage management, per-instruction
//! lowering, the abstract assembly model, and the final text writer.

pub mod asm;
pub mod lower;
pub mod registers;
pub mod storage;
pub mod writer;

use crate::error::Result;
use crate::ir::Module;

/// Lower an already-analyzed module (dead code eliminated, liveness marked)
/// to a complete NASM source string.
pub fn generate(module: &Module) -> Result<String> {
    let program = lower::lower_module(module)?;
    Ok(writer::write_program(&program))
}

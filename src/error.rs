//! Error types for every fatal failure mode in the pipeline (§7).
//!
//! Every kind here is fatal to the current compilation: there is no retry and
//! no partial recovery. The CLI driver (`src/bin/irc.rs`) is the only place
//! that turns one of these into a process exit code and a stderr message.

use crate::common::Id;
use thiserror::Error;

/// Everything that can go wrong while lexing, parsing, validating, lowering,
/// or shelling out to the external assembler/linker.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unexpected character {ch:?} at byte offset {pos}")]
    LexError { pos: usize, ch: char },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("undefined variable %{0}")]
    UndefinedVariable(Id),

    #[error("opcode {opcode} expects {expected} operand(s), found {found}")]
    OperandCountMismatch {
        opcode: String,
        expected: usize,
        found: usize,
    },

    #[error("phi node has {labels} label(s) but {operands} operand(s)")]
    PhiArityMismatch { labels: usize, operands: usize },

    #[error("return from void function must not carry a value")]
    ReturnFromVoidWithValue,

    #[error("return from non-void function `{0}` requires a value")]
    ReturnFromNonVoidWithoutValue(Id),

    #[error("call to `{0}` passes {1} scalar arguments, more than the 6 available argument registers")]
    TooManyArguments(Id, usize),

    #[error("reference to undefined block label `{0}`")]
    UndefinedLabel(Id),

    #[error("no free or non-frozen register available for a required temporary")]
    RegisterExhausted,

    #[error("`{tool}` exited with status {status}")]
    ToolFailure { tool: &'static str, status: i32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompileError>;

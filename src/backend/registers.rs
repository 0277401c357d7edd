//! General-purpose registers and their size-qualified names (§4.2).
//!
//! The source's register table carries a fifteenth entry, `r16`, which is
//! not a real x86-64 register (the ISA stops at `r15`). That entry is
//! dropped here; the allocator has fourteen real GPRs to work with.
//! `rsp`/`rbp` are frame registers and are never handed out by the
//! allocator.

use crate::ir::ValueSize;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rsp,
    Rbp,
}

/// The pool the allocator draws from, in allocation-preference order.
/// `Rax` is listed first because it is caller-saved and already the return
/// value register, so preferring it avoids needless callee-save pushes.
pub const ALLOCATABLE: [Register; 14] = [
    Register::Rax,
    Register::Rbx,
    Register::Rcx,
    Register::Rdx,
    Register::Rsi,
    Register::Rdi,
    Register::R8,
    Register::R9,
    Register::R10,
    Register::R11,
    Register::R12,
    Register::R13,
    Register::R14,
    Register::R15,
];

/// Callee-saved registers per the System V AMD64 ABI: if the allocator
/// tampers with one of these, the prologue/epilogue must save/restore it.
pub fn is_callee_saved(r: Register) -> bool {
    matches!(
        r,
        Register::Rbx | Register::R12 | Register::R13 | Register::R14 | Register::R15
    )
}

/// The six integer/pointer argument registers, in declaration order
/// (§9 decision 3: all six are used, not just the first three).
pub const ARGUMENT_REGISTERS: [Register; 6] = [
    Register::Rdi,
    Register::Rsi,
    Register::Rdx,
    Register::Rcx,
    Register::R8,
    Register::R9,
];

impl Register {
    pub fn name(self, size: ValueSize) -> &'static str {
        use Register::*;
        let bytes = if size.is_concrete() { size.bytes() } else { 8 };
        match (self, bytes) {
            (Rax, 1) => "al",
            (Rax, 2) => "ax",
            (Rax, 4) => "eax",
            (Rax, _) => "rax",
            (Rbx, 1) => "bl",
            (Rbx, 2) => "bx",
            (Rbx, 4) => "ebx",
            (Rbx, _) => "rbx",
            (Rcx, 1) => "cl",
            (Rcx, 2) => "cx",
            (Rcx, 4) => "ecx",
            (Rcx, _) => "rcx",
            (Rdx, 1) => "dl",
            (Rdx, 2) => "dx",
            (Rdx, 4) => "edx",
            (Rdx, _) => "rdx",
            (Rsi, 1) => "sil",
            (Rsi, 2) => "si",
            (Rsi, 4) => "esi",
            (Rsi, _) => "rsi",
            (Rdi, 1) => "dil",
            (Rdi, 2) => "di",
            (Rdi, 4) => "edi",
            (Rdi, _) => "rdi",
            (R8, 1) => "r8b",
            (R8, 2) => "r8w",
            (R8, 4) => "r8d",
            (R8, _) => "r8",
            (R9, 1) => "r9b",
            (R9, 2) => "r9w",
            (R9, 4) => "r9d",
            (R9, _) => "r9",
            (R10, 1) => "r10b",
            (R10, 2) => "r10w",
            (R10, 4) => "r10d",
            (R10, _) => "r10",
            (R11, 1) => "r11b",
            (R11, 2) => "r11w",
            (R11, 4) => "r11d",
            (R11, _) => "r11",
            (R12, 1) => "r12b",
            (R12, 2) => "r12w",
            (R12, 4) => "r12d",
            (R12, _) => "r12",
            (R13, 1) => "r13b",
            (R13, 2) => "r13w",
            (R13, 4) => "r13d",
            (R13, _) => "r13",
            (R14, 1) => "r14b",
            (R14, 2) => "r14w",
            (R14, 4) => "r14d",
            (R14, _) => "r14",
            (R15, 1) => "r15b",
            (R15, 2) => "r15w",
            (R15, 4) => "r15d",
            (R15, _) => "r15",
            (Rsp, _) => "rsp",
            (Rbp, _) => "rbp",
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name(ValueSize::I64))
    }
}

//! The abstract assembly model (§4.5): a typed instruction/operand tree that
//! prints itself to NASM syntax, with a couple of peephole rewrites applied
//! at construction time rather than as a separate optimization pass.
//!
//! The prologue and epilogue are represented as two special nodes
//! (`Prologue`/`Epilogue`) that are appended to a function's instruction
//! list only once lowering finishes, because they need the final tampered
//! register set and final stack size — both only known after every
//! instruction in the function has been lowered.

use crate::common::Id;
use crate::ir::{ArithKind, IcmpKind, ValueSize};

use super::registers::{is_callee_saved, Register};

/// What a memory operand is addressed relative to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemBase {
    Reg(Register),
    /// A global data or code label (`-no-pie`, so this is an absolute
    /// symbol reference rather than RIP-relative).
    Label(Id),
}

impl std::fmt::Display for MemBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemBase::Reg(r) => write!(f, "{r}"),
            MemBase::Label(l) => write!(f, "{l}"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Operand {
    Reg(Register, ValueSize),
    Imm(u64, ValueSize),
    Mem { base: MemBase, disp: i32, size: ValueSize },
    /// A base-less scaled-index address, `[index*scale + disp]` — the
    /// `select` arithmetic fast path's addressing mode (§4.4): `disp` is
    /// the lower literal, `scale` the `{1,2,4,8}` difference between the
    /// two arms, `index` a 0/1 byte widened to 64 bits. Only ever used as
    /// a `lea` source.
    ScaledIndex { index: Register, scale: i32, disp: i32 },
    /// The address of a global label (a string constant or a function),
    /// used bare (as a `call` target or a `lea` source label).
    Label(Id),
}

impl Operand {
    pub fn size(&self) -> ValueSize {
        match self {
            Operand::Reg(_, s) => *s,
            Operand::Imm(_, s) => *s,
            Operand::Mem { size, .. } => *size,
            Operand::ScaledIndex { .. } => ValueSize::Ptr,
            Operand::Label(_) => ValueSize::Ptr,
        }
    }

    fn bare(&self) -> String {
        match self {
            Operand::Reg(r, s) => r.name(*s).to_string(),
            Operand::Imm(v, _) => v.to_string(),
            Operand::Mem { base, disp, .. } => {
                if *disp == 0 {
                    format!("[{base}]")
                } else if *disp > 0 {
                    format!("[{base}+{disp}]")
                } else {
                    format!("[{base}{disp}]")
                }
            }
            Operand::ScaledIndex { index, scale, disp } => {
                let index = Register::name(*index, ValueSize::I64);
                if *disp == 0 {
                    format!("[{index}*{scale}]")
                } else if *disp > 0 {
                    format!("[{index}*{scale}+{disp}]")
                } else {
                    format!("[{index}*{scale}{disp}]")
                }
            }
            Operand::Label(l) => l.to_string(),
        }
    }

    /// Memory operands need an explicit size prefix (`qword`, `dword`, …)
    /// everywhere except as a `lea` destination, where the size is implied
    /// by the destination register.
    fn sized(&self) -> String {
        match self {
            Operand::Mem { size, .. } => format!("{} {}", size_prefix(*size), self.bare()),
            _ => self.bare(),
        }
    }
}

fn size_prefix(size: ValueSize) -> &'static str {
    match size.bytes() {
        1 => "byte",
        2 => "word",
        4 => "dword",
        _ => "qword",
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Cond {
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Below,
    Above,
    BelowEq,
    AboveEq,
}

impl Cond {
    /// Jump mnemonic for this condition (`jcc` suffix).
    ///
    /// The source's `jmp_inst` maps every unsigned predicate to a *signed*
    /// jump mnemonic (`ult`→`jl`, `ugt`→`jg`, …), which is an ISA-level bug:
    /// signed and unsigned comparisons set different flag combinations.
    /// This table uses the correct unsigned mnemonics (`jb`/`ja`/`jbe`/`jae`)
    /// instead of reproducing that bug.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Cond::Eq => "je",
            Cond::Neq => "jne",
            Cond::Lt => "jl",
            Cond::Gt => "jg",
            Cond::Le => "jle",
            Cond::Ge => "jge",
            Cond::Below => "jb",
            Cond::Above => "ja",
            Cond::BelowEq => "jbe",
            Cond::AboveEq => "jae",
        }
    }

    /// `setcc` mnemonic, used when an `icmp` result must be materialized
    /// into a real 0/1 byte instead of staying a pending flag.
    pub fn setcc(self) -> &'static str {
        match self {
            Cond::Eq => "sete",
            Cond::Neq => "setne",
            Cond::Lt => "setl",
            Cond::Gt => "setg",
            Cond::Le => "setle",
            Cond::Ge => "setge",
            Cond::Below => "setb",
            Cond::Above => "seta",
            Cond::BelowEq => "setbe",
            Cond::AboveEq => "setae",
        }
    }

    pub fn cmovcc(self) -> &'static str {
        match self {
            Cond::Eq => "cmove",
            Cond::Neq => "cmovne",
            Cond::Lt => "cmovl",
            Cond::Gt => "cmovg",
            Cond::Le => "cmovle",
            Cond::Ge => "cmovge",
            Cond::Below => "cmovb",
            Cond::Above => "cmova",
            Cond::BelowEq => "cmovbe",
            Cond::AboveEq => "cmovae",
        }
    }
}

impl From<IcmpKind> for Cond {
    fn from(k: IcmpKind) -> Self {
        match k {
            IcmpKind::Eq => Cond::Eq,
            IcmpKind::Neq => Cond::Neq,
            IcmpKind::Slt => Cond::Lt,
            IcmpKind::Sgt => Cond::Gt,
            IcmpKind::Sle => Cond::Le,
            IcmpKind::Sge => Cond::Ge,
            IcmpKind::Ult => Cond::Below,
            IcmpKind::Ugt => Cond::Above,
            IcmpKind::Ule => Cond::BelowEq,
            IcmpKind::Uge => Cond::AboveEq,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Instruction {
    Mov { dst: Operand, src: Operand },
    /// `xor dst, dst` — the peephole form of `mov dst, 0` (§4.5).
    XorSelf(Operand),
    Lea { dst: Operand, src: Operand },
    Arith { op: ArithKind, dst: Operand, src: Operand },
    /// `idiv`/`div`'s 128-bit-by-64-bit form: sign-extend `rax` into `rdx`
    /// first (`cqo`), then divide by `divisor`. `want_remainder` selects
    /// whether the live result afterwards is `rax` (quotient) or `rdx`
    /// (remainder) — the caller already knows which register to read.
    Div { divisor: Operand, signed: bool },
    Cqo,
    Cmp { a: Operand, b: Operand },
    Test { a: Operand, b: Operand },
    Jmp(Id),
    Jcc(Cond, Id),
    Setcc(Cond, Operand),
    Cmovcc(Cond, Operand, Operand),
    Movzx { dst: Operand, src: Operand },
    Movsx { dst: Operand, src: Operand },
    Call(Id),
    /// Appended once, after the whole function body is lowered.
    Prologue { tampered: Vec<Register>, stack_size: i32 },
    Epilogue { tampered: Vec<Register>, stack_size: i32 },
    Ret,
}

impl Instruction {
    /// `mov`, with the two peephole rewrites (§4.5):
    /// - `mov x, x` is suppressed entirely.
    /// - `mov x, 0` becomes `xor x, x` (shorter, and leaves flags in a
    ///   known state the way NASM programmers expect).
    pub fn mov(dst: Operand, src: Operand) -> Option<Instruction> {
        if operands_equal(&dst, &src) {
            return None;
        }
        if matches!(src, Operand::Imm(0, _)) && matches!(dst, Operand::Reg(..)) {
            return Some(Instruction::XorSelf(dst));
        }
        Some(Instruction::Mov { dst, src })
    }

    pub fn print(&self) -> String {
        match self {
            Instruction::Mov { dst, src } => mnemonic2("mov", dst, src),
            Instruction::XorSelf(dst) => mnemonic2("xor", dst, dst),
            Instruction::Lea { dst, src } => format!("    {:<8}{}, {}", "lea", dst.bare(), src.sized()),
            Instruction::Arith { op, dst, src } => mnemonic2(arith_mnemonic(*op), dst, src),
            Instruction::Div { divisor, signed } => {
                let mnem = if *signed { "idiv" } else { "div" };
                format!("    {:<8}{}", mnem, divisor.sized())
            }
            Instruction::Cqo => "    cqo".to_string(),
            Instruction::Cmp { a, b } => mnemonic2("cmp", a, b),
            Instruction::Test { a, b } => mnemonic2("test", a, b),
            Instruction::Jmp(l) => format!("    {:<8}{l}", "jmp"),
            Instruction::Jcc(cond, l) => format!("    {:<8}{l}", cond.mnemonic()),
            Instruction::Setcc(cond, dst) => format!("    {:<8}{}", cond.setcc(), dst.bare()),
            Instruction::Cmovcc(cond, dst, src) => mnemonic2(cond.cmovcc(), dst, src),
            Instruction::Movzx { dst, src } => mnemonic2("movzx", dst, src),
            Instruction::Movsx { dst, src } => mnemonic2("movsx", dst, src),
            Instruction::Call(name) => format!("    {:<8}{name}", "call"),
            Instruction::Ret => "    ret".to_string(),
            Instruction::Prologue { tampered, stack_size } => print_prologue(tampered, *stack_size),
            Instruction::Epilogue { tampered, stack_size } => print_epilogue(tampered, *stack_size),
        }
    }
}

fn operands_equal(a: &Operand, b: &Operand) -> bool {
    match (a, b) {
        (Operand::Reg(r1, _), Operand::Reg(r2, _)) => r1 == r2,
        (
            Operand::Mem { base: b1, disp: d1, .. },
            Operand::Mem { base: b2, disp: d2, .. },
        ) => b1 == b2 && d1 == d2,
        _ => false,
    }
}

fn arith_mnemonic(op: ArithKind) -> &'static str {
    match op {
        ArithKind::Add => "add",
        ArithKind::Sub => "sub",
        ArithKind::Mul => "imul",
        ArithKind::Div | ArithKind::Mod => unreachable!("div/mod lower through Instruction::Div"),
    }
}

fn mnemonic2(mnem: &str, dst: &Operand, src: &Operand) -> String {
    format!("    {:<8}{}, {}", mnem, dst.sized(), src.sized())
}

/// `push rbp; mov rbp, rsp; sub rsp, N`, skipped entirely for a frameless
/// leaf function (§4.5: gated on `current_stack_size` being nonzero, not
/// just the `sub`) — matching the source's `stack_save::printable`.
/// Callee-saved registers the allocator tampered with are pushed after the
/// frame is established.
fn print_prologue(tampered: &[Register], stack_size: i32) -> String {
    let mut lines = Vec::new();
    if stack_size != 0 {
        lines.push("    push    rbp".to_string());
        lines.push("    mov     rbp, rsp".to_string());
        lines.push(format!("    sub     rsp, {stack_size}"));
    }
    for r in tampered.iter().filter(|r| is_callee_saved(**r)) {
        lines.push(format!("    push    {r}"));
    }
    lines.join("\n")
}

/// Callee-saved registers are popped in reverse order, then the frame is
/// torn down with `leave` — skipped when no frame was ever established —
/// then `ret`.
fn print_epilogue(tampered: &[Register], stack_size: i32) -> String {
    let mut lines = Vec::new();
    for r in tampered.iter().filter(|r| is_callee_saved(**r)).rev() {
        lines.push(format!("    pop     {r}"));
    }
    if stack_size != 0 {
        lines.push("    leave".to_string());
    }
    lines.push("    ret".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_mov_is_suppressed() {
        let r = Operand::Reg(Register::Rax, ValueSize::I64);
        assert!(Instruction::mov(r, r).is_none());
    }

    #[test]
    fn mov_zero_becomes_xor() {
        let r = Operand::Reg(Register::Rax, ValueSize::I32);
        let inst = Instruction::mov(r, Operand::Imm(0, ValueSize::I32)).unwrap();
        assert!(matches!(inst, Instruction::XorSelf(_)));
        assert!(inst.print().contains("xor"));
    }

    #[test]
    fn mem_operand_gets_size_prefix_except_as_lea_dest() {
        let mem = Operand::Mem { base: MemBase::Reg(Register::Rbp), disp: -8, size: ValueSize::I32 };
        let reg = Operand::Reg(Register::Rax, ValueSize::I32);
        let lea = Instruction::Lea { dst: reg, src: mem }.print();
        assert!(!lea.contains("dword"));
        let mov = Instruction::Mov { dst: mem, src: reg }.print();
        assert!(mov.contains("dword"));
    }
}

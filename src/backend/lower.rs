//! Per-instruction lowering (§4.3–§4.4): walks an analyzed [`Module`] and
//! produces one [`AsmFunction`] per IR function, splicing phi moves into
//! predecessor blocks before their terminators once every block in the
//! function has been lowered once.

use crate::common::{Id, Map};
use crate::error::{CompileError, Result};
use crate::ir::{ArithKind, Function, IcmpKind, Instruction as IrInst, Module, Op, Value, ValueSize};

use super::asm::{Cond, Instruction, MemBase, Operand};
use super::registers::{Register, ARGUMENT_REGISTERS};
use super::storage::{Cell, StorageManager};

pub struct AsmBlock {
    /// `None` for a function's entry block — it shares the function's own
    /// global label, so it needs no label of its own.
    pub label: Option<Id>,
    pub instructions: Vec<Instruction>,
}

pub struct AsmFunction {
    pub name: Id,
    pub blocks: Vec<AsmBlock>,
}

pub struct Program {
    pub global_strings: Vec<crate::ir::GlobalString>,
    pub externs: Vec<Id>,
    pub functions: Vec<AsmFunction>,
}

pub fn lower_module(module: &Module) -> Result<Program> {
    let mut functions = Vec::with_capacity(module.functions.len());
    for f in &module.functions {
        functions.push(lower_function(module, f)?);
    }
    Ok(Program {
        global_strings: module.global_strings.clone(),
        externs: module.externs.iter().map(|e| e.name).collect(),
        functions,
    })
}

fn lower_function(module: &Module, f: &Function) -> Result<AsmFunction> {
    let mut sm = StorageManager::new();
    for g in &module.global_strings {
        sm.map_value(g.name, Cell::Global { label: g.name });
    }

    if f.params.len() > ARGUMENT_REGISTERS.len() {
        return Err(CompileError::TooManyArguments(f.name, f.params.len()));
    }
    // Nothing has been claimed yet at function entry, so this can never
    // actually evict anything; the buffer exists only to satisfy the
    // signature and is folded into the entry block below.
    let mut param_setup = Vec::new();
    for (param, reg) in f.params.iter().zip(ARGUMENT_REGISTERS) {
        sm.claim_specific_register(reg, param.size, &mut param_setup)?;
        sm.map_value(param.name, Cell::Register { reg, size: param.size });
    }

    let mut blocks = Vec::with_capacity(f.blocks.len());
    for (bi, block) in f.blocks.iter().enumerate() {
        let mut insts = if bi == 0 { std::mem::take(&mut param_setup) } else { Vec::new() };
        for inst in &block.instructions {
            lower_instruction(module, f, inst, &mut sm, &mut insts)?;
        }
        blocks.push(AsmBlock {
            label: if bi == 0 { None } else { Some(block.name) },
            instructions: insts,
        });
    }

    splice_phi_moves(f, &mut blocks, &mut sm)?;

    let tampered = sm.tampered_registers();
    let stack_size = sm.stack_size();
    if let Some(first) = blocks.first_mut() {
        first.instructions.insert(
            0,
            Instruction::Prologue { tampered: tampered.clone(), stack_size },
        );
    }
    for block in &mut blocks {
        if matches!(block.instructions.last(), Some(Instruction::Ret)) {
            block.instructions.pop();
            block.instructions.push(Instruction::Epilogue { tampered: tampered.clone(), stack_size });
        }
    }

    Ok(AsmFunction { name: f.name, blocks })
}

/// Read-only materialization: turns a [`Value`] into an operand, emitting
/// whatever load/lea is needed to do so (never mutates ownership).
fn to_operand(val: &Value, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<Operand> {
    match val {
        Value::Literal { size, bits } => Ok(Operand::Imm(*bits, *size)),
        Value::Variable { size, name } => {
            let cell = sm.get_or_err(*name)?.clone();
            Ok(match cell {
                Cell::Register { reg, .. } => Operand::Reg(reg, *size),
                Cell::Stack { offset, .. } => Operand::Mem { base: MemBase::Reg(Register::Rbp), disp: offset, size: *size },
                Cell::Global { label } => Operand::Label(label),
                Cell::Literal { bits, .. } => Operand::Imm(bits, *size),
                Cell::Flag { kind } => materialize_flag(kind, *size, sm, out)?,
            })
        }
    }
}

/// Like [`to_operand`], but guarantees the result is a real register —
/// loading from the stack or baking in a literal if necessary. Matches the
/// source's `ensure_in_register`, including its `lea`-for-pointers special
/// case (§9).
fn ensure_register(val: &Value, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<Register> {
    let size = val.size();
    if let Value::Variable { name, .. } = val {
        if let Some(Cell::Register { reg, .. }) = sm.get(*name) {
            return Ok(*reg);
        }
        if let Some(Cell::Global { label }) = sm.get(*name).cloned() {
            let reg = sm.claim_register(ValueSize::Ptr, out)?;
            out.push(Instruction::Lea {
                dst: Operand::Reg(reg, ValueSize::Ptr),
                src: Operand::Mem { base: MemBase::Label(label), disp: 0, size: ValueSize::Ptr },
            });
            return Ok(reg);
        }
    }
    let operand = to_operand(val, sm, out)?;
    let reg = sm.claim_register(size, out)?;
    if let Some(inst) = Instruction::mov(Operand::Reg(reg, size), operand) {
        out.push(inst);
    }
    Ok(reg)
}

fn materialize_flag(kind: IcmpKind, size: ValueSize, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<Operand> {
    let reg = sm.claim_register(ValueSize::I8, out)?;
    out.push(Instruction::Setcc(kind.into(), Operand::Reg(reg, ValueSize::I8)));
    if size.bytes() > 1 {
        out.push(Instruction::Movzx {
            dst: Operand::Reg(reg, size),
            src: Operand::Reg(reg, ValueSize::I8),
        });
    }
    Ok(Operand::Reg(reg, size))
}

/// Drop every dying operand that this opcode frees *before* emitting code,
/// so its register can be reused as the destination (§4.3's reassignable
/// -on-drop policy). `call`/`arithmetic`/`select` opt out because they need
/// every operand's current location for the whole of their lowering.
fn drop_dying_operands_eagerly(inst: &IrInst, sm: &mut StorageManager) {
    if matches!(inst.op, Op::Call { .. } | Op::Arithmetic { .. } | Op::Select) {
        return;
    }
    for (operand, &dying) in inst.operands.iter().zip(&inst.last_use) {
        if dying {
            if let Some(name) = operand.name() {
                sm.drop_ownership(name);
            }
        }
    }
}

fn defer_dying_operands(inst: &IrInst, sm: &mut StorageManager) {
    if !matches!(inst.op, Op::Call { .. } | Op::Arithmetic { .. } | Op::Select) {
        return;
    }
    for (operand, &dying) in inst.operands.iter().zip(&inst.last_use) {
        if dying {
            if let Some(name) = operand.name() {
                sm.defer_drop(name);
            }
        }
    }
}

fn lower_instruction(
    module: &Module,
    f: &Function,
    inst: &IrInst,
    sm: &mut StorageManager,
    out: &mut Vec<Instruction>,
) -> Result<()> {
    drop_dying_operands_eagerly(inst, sm);
    defer_dying_operands(inst, sm);

    match &inst.op {
        Op::Literal => {
            let Value::Literal { size, bits } = &inst.operands[0] else {
                return Err(CompileError::OperandCountMismatch {
                    opcode: "literal".into(),
                    expected: 1,
                    found: 0,
                });
            };
            sm.map_value(inst.assignee.unwrap(), Cell::Literal { size: *size, bits: *bits });
        }

        Op::Allocate { bytes } => {
            // The result is always a `ptr` (the parser never attaches a
            // scalar size to `allocate`); reserve the exact byte count
            // requested rather than snapping it to a register width.
            let cell = sm.allocate_stack_slot_bytes(*bytes);
            sm.map_value(inst.assignee.unwrap(), cell);
        }

        Op::Store { size } => {
            let addr = to_address(&inst.operands[0], sm, out)?;
            let src = to_operand(&inst.operands[1], sm, out)?;
            let src = coerce_size(src, *size, sm, out)?;
            out.push(Instruction::Mov { dst: addr, src });
        }

        Op::Load { size } => {
            let addr = to_address(&inst.operands[0], sm, out)?;
            let reg = sm.claim_register(*size, out)?;
            if let Some(i) = Instruction::mov(Operand::Reg(reg, *size), addr) {
                out.push(i);
            }
            sm.map_value(inst.assignee.unwrap(), Cell::Register { reg, size: *size });
        }

        Op::Icmp { kind } => {
            let a = to_operand(&inst.operands[0], sm, out)?;
            let b = to_operand(&inst.operands[1], sm, out)?;
            out.push(Instruction::Cmp { a, b });
            sm.map_value(inst.assignee.unwrap(), Cell::Flag { kind: *kind });
        }

        Op::Branch { if_true, if_false } => {
            match sm.get_or_err(inst.operands[0].name().expect("branch condition is always a variable"))?.clone() {
                Cell::Flag { kind } => {
                    out.push(Instruction::Jcc(kind.into(), *if_true));
                    out.push(Instruction::Jmp(*if_false));
                }
                _ => {
                    let cond = to_operand(&inst.operands[0], sm, out)?;
                    out.push(Instruction::Test { a: cond, b: cond });
                    out.push(Instruction::Jcc(Cond::Neq, *if_true));
                    out.push(Instruction::Jmp(*if_false));
                }
            }
        }

        Op::Jmp { target } => out.push(Instruction::Jmp(*target)),

        Op::Ret => {
            if let Some(val) = inst.operands.first() {
                if f.return_size == ValueSize::None {
                    return Err(CompileError::ReturnFromVoidWithValue);
                }
                let reg = ensure_register(val, sm, out)?;
                if reg != Register::Rax {
                    if let Some(i) = Instruction::mov(Operand::Reg(Register::Rax, f.return_size), Operand::Reg(reg, f.return_size)) {
                        out.push(i);
                    }
                }
            } else if f.return_size != ValueSize::None {
                return Err(CompileError::ReturnFromNonVoidWithoutValue(f.name));
            }
            out.push(Instruction::Ret);
        }

        Op::Arithmetic { kind } => {
            lower_arithmetic(*kind, inst, sm, out)?;
            sm.flush_deferred_drops();
        }

        Op::Call { target } => {
            lower_call(module, *target, inst, sm, out)?;
            sm.flush_deferred_drops();
        }

        Op::Phi { .. } => {
            // Resolved value arrives via a move spliced into each
            // predecessor block; here we just reserve the destination.
            // Marked as a phi destination so an ordinary liveness drop
            // (e.g. this phi's own last use, elsewhere in the block)
            // can't free the register before `splice_phi_moves` runs.
            let reg = sm.claim_register(inst.result_size, out)?;
            let name = inst.assignee.unwrap();
            sm.map_value(name, Cell::Register { reg, size: inst.result_size });
            sm.mark_phi_destination(name);
        }

        Op::Select => {
            lower_select(inst, sm, out)?;
            sm.flush_deferred_drops();
        }

        Op::Sext { target } => {
            let src = to_operand(&inst.operands[0], sm, out)?;
            let reg = sm.claim_register(*target, out)?;
            out.push(Instruction::Movsx { dst: Operand::Reg(reg, *target), src });
            sm.map_value(inst.assignee.unwrap(), Cell::Register { reg, size: *target });
        }

        Op::Zext { target } => {
            let src = to_operand(&inst.operands[0], sm, out)?;
            let reg = sm.claim_register(*target, out)?;
            out.push(Instruction::Movzx { dst: Operand::Reg(reg, *target), src });
            sm.map_value(inst.assignee.unwrap(), Cell::Register { reg, size: *target });
        }

        Op::GetArrayPtr { element_size } => {
            lower_get_array_ptr(*element_size, inst, sm, out)?;
        }
    }

    Ok(())
}

/// Resolve a `ptr`-valued operand to the memory location it denotes: a
/// local's stack slot addressed directly (no `lea` needed — see §9 decision
/// 2 on the sign convention), a computed address already sitting in a
/// register, or a global label.
fn to_address(val: &Value, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<Operand> {
    let elem_size = val.size();
    if let Value::Variable { name, .. } = val {
        match sm.get_or_err(*name)?.clone() {
            Cell::Stack { offset, .. } => {
                return Ok(Operand::Mem { base: MemBase::Reg(Register::Rbp), disp: offset, size: elem_size });
            }
            Cell::Global { label } => {
                return Ok(Operand::Mem { base: MemBase::Label(label), disp: 0, size: elem_size });
            }
            Cell::Register { reg, .. } => {
                return Ok(Operand::Mem { base: MemBase::Reg(reg), disp: 0, size: elem_size });
            }
            _ => {}
        }
    }
    let reg = ensure_register(val, sm, out)?;
    Ok(Operand::Mem { base: MemBase::Reg(reg), disp: 0, size: elem_size })
}

/// Widen/narrow an operand already in hand to exactly `size`, for stores
/// whose source doesn't already match the declared store size.
fn coerce_size(op: Operand, size: ValueSize, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<Operand> {
    if op.size() == size {
        return Ok(op);
    }
    match op {
        Operand::Imm(bits, _) => Ok(Operand::Imm(bits, size)),
        Operand::Reg(reg, _) => Ok(Operand::Reg(reg, size)),
        other => {
            let reg = sm.claim_register(size, out)?;
            if let Some(i) = Instruction::mov(Operand::Reg(reg, size), other) {
                out.push(i);
            }
            Ok(Operand::Reg(reg, size))
        }
    }
}

fn lower_arithmetic(kind: ArithKind, inst: &IrInst, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<()> {
    let size = inst.result_size;
    match kind {
        ArithKind::Div | ArithKind::Mod => {
            let dividend = ensure_register(&inst.operands[0], sm, out)?;
            if dividend != Register::Rax {
                sm.claim_specific_register(Register::Rax, size, out)?;
                if let Some(i) = Instruction::mov(Operand::Reg(Register::Rax, size), Operand::Reg(dividend, size)) {
                    out.push(i);
                }
            }
            sm.claim_specific_register(Register::Rdx, size, out)?;
            let divisor = to_operand(&inst.operands[1], sm, out)?;
            let divisor = match divisor {
                Operand::Imm(..) => {
                    let reg = sm.claim_register(size, out)?;
                    out.push(Instruction::mov(Operand::Reg(reg, size), divisor).unwrap());
                    Operand::Reg(reg, size)
                }
                other => other,
            };
            out.push(Instruction::Cqo);
            out.push(Instruction::Div { divisor, signed: true });
            let result_reg = if matches!(kind, ArithKind::Div) { Register::Rax } else { Register::Rdx };
            sm.map_value(inst.assignee.unwrap(), Cell::Register { reg: result_reg, size });
        }
        _ => {
            let lhs_reg = ensure_register(&inst.operands[0], sm, out)?;
            let lhs_dying = inst.last_use.first().copied().unwrap_or(false)
                && inst.operands[0].is_variable();
            let dst_reg = if lhs_dying {
                lhs_reg
            } else {
                let fresh = sm.claim_register(size, out)?;
                if let Some(i) = Instruction::mov(Operand::Reg(fresh, size), Operand::Reg(lhs_reg, size)) {
                    out.push(i);
                }
                fresh
            };
            let rhs = to_operand(&inst.operands[1], sm, out)?;
            out.push(Instruction::Arith { op: kind, dst: Operand::Reg(dst_reg, size), src: rhs });
            let assignee = inst.assignee.unwrap();
            if lhs_dying {
                // The destination register is the lhs operand's own
                // register, reused in place. Forget the old name before
                // mapping the new one onto the same register — the lhs
                // name is still queued in `pending_drop` and must find
                // nothing to drop once `flush_deferred_drops` runs, or it
                // would free a register the assignee now owns.
                sm.forget(inst.operands[0].name().unwrap());
            }
            sm.map_value(assignee, Cell::Register { reg: dst_reg, size });
        }
    }
    Ok(())
}

fn lower_call(module: &Module, target: Id, inst: &IrInst, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<()> {
    if inst.operands.len() > ARGUMENT_REGISTERS.len() {
        return Err(CompileError::TooManyArguments(target, inst.operands.len()));
    }

    for reg in ARGUMENT_REGISTERS.iter().take(inst.operands.len()) {
        sm.freeze(*reg);
    }
    for (arg, reg) in inst.operands.iter().zip(ARGUMENT_REGISTERS) {
        sm.unfreeze(reg);
        let size = arg.size();
        sm.claim_specific_register(reg, size, out)?;
        let operand = to_operand(arg, sm, out)?;
        if let Some(i) = Instruction::mov(Operand::Reg(reg, size), operand) {
            out.push(i);
        }
    }

    // §4.4: the callee clobbers `rax` unconditionally, regardless of
    // whether this call has an assignee, so it must always be evicted and
    // zeroed before the `call` itself.
    sm.evict_register(Register::Rax, out);
    out.push(Instruction::mov(Operand::Reg(Register::Rax, ValueSize::I64), Operand::Imm(0, ValueSize::I64)).unwrap());
    out.push(Instruction::Call(target));

    let return_size = module.return_size_of(target).unwrap_or(ValueSize::None);
    if let Some(name) = inst.assignee {
        sm.claim_specific_register(Register::Rax, return_size, out)?;
        sm.map_value(name, Cell::Register { reg: Register::Rax, size: return_size });
    }
    Ok(())
}

/// `select cond, true_val, false_val`: `dst` starts as `true_val`, then a
/// single `cmovcc` overwrites it with `false_val` when `cond` turns out to
/// be false — no branch is ever emitted (§4.4). When `cond` is a pending
/// `icmp` flag, its `cmp` is still live here (only register moves can run
/// between the `icmp` and the `select` without an intervening use, and
/// `mov`/`lea` don't touch flags), so it's reused instead of re-comparing.
///
/// When both arms are literals whose difference is a valid `lea` scale
/// factor, the arithmetic-select fast path below is tried first.
fn lower_select(inst: &IrInst, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<()> {
    let size = inst.result_size;
    let cond_cell = inst.operands[0].name().and_then(|n| sm.get(n).cloned());

    if let (Value::Literal { bits: a, .. }, Value::Literal { bits: b, .. }) = (&inst.operands[1], &inst.operands[2]) {
        if let Some(Cell::Flag { kind }) = cond_cell {
            if let Some(dst) = lower_select_fast_path(kind, *a, *b, size, sm, out)? {
                sm.map_value(inst.assignee.unwrap(), Cell::Register { reg: dst, size });
                return Ok(());
            }
        }
    }

    let true_val = to_operand(&inst.operands[1], sm, out)?;
    let dst = sm.claim_register(size, out)?;
    if let Some(i) = Instruction::mov(Operand::Reg(dst, size), true_val) {
        out.push(i);
    }

    let false_reg = ensure_register(&inst.operands[2], sm, out)?;

    let move_if_false: Cond = match cond_cell {
        Some(Cell::Flag { kind }) => kind.inverted().into(),
        _ => {
            let cond = to_operand(&inst.operands[0], sm, out)?;
            out.push(Instruction::Test { a: cond, b: cond });
            Cond::Eq
        }
    };

    out.push(Instruction::Cmovcc(move_if_false, Operand::Reg(dst, size), Operand::Reg(false_reg, size)));

    sm.map_value(inst.assignee.unwrap(), Cell::Register { reg: dst, size });
    Ok(())
}

/// §4.4's arithmetic-select fast path: if `|a - b|` is a valid `lea` scale
/// factor (`{1, 2, 4, 8}`), the whole select collapses to
/// `setcc r8; movzx r, r8; lea dst, [r*scale + lower]` — no `cmovcc`, no
/// second operand ever read into a register. Returns `None` (falling back
/// to the general path) for any other literal difference.
fn lower_select_fast_path(
    kind: IcmpKind,
    a: u64,
    b: u64,
    size: ValueSize,
    sm: &mut StorageManager,
    out: &mut Vec<Instruction>,
) -> Result<Option<Register>> {
    let (a, b) = (a as i64, b as i64);
    let scale = a.abs_diff(b);
    if !matches!(scale, 1 | 2 | 4 | 8) {
        return Ok(None);
    }
    let lower = a.min(b);
    // `a` is selected when `cond` is true. Make `lower` the false case:
    // invert the predicate whenever `a` is the smaller (upper-is-`b`) arm.
    let cc: Cond = if a >= b { kind.into() } else { kind.inverted().into() };

    let idx = sm.claim_register(ValueSize::I8, out)?;
    out.push(Instruction::Setcc(cc, Operand::Reg(idx, ValueSize::I8)));
    out.push(Instruction::Movzx {
        dst: Operand::Reg(idx, ValueSize::I64),
        src: Operand::Reg(idx, ValueSize::I8),
    });

    let dst = sm.claim_register(size, out)?;
    out.push(Instruction::Lea {
        dst: Operand::Reg(dst, ValueSize::Ptr),
        src: Operand::ScaledIndex { index: idx, scale: scale as i32, disp: lower as i32 },
    });
    Ok(Some(dst))
}

fn lower_get_array_ptr(element_size: ValueSize, inst: &IrInst, sm: &mut StorageManager, out: &mut Vec<Instruction>) -> Result<()> {
    let base_name = inst.operands[0].name();
    let index = &inst.operands[1];

    // §9 decision 2: a stack-local base's offset is already a negative
    // rbp-relative displacement, so the array element address is computed
    // directly from that same stored offset rather than re-deriving a sign.
    if let Some(name) = base_name {
        if let Some(Cell::Stack { offset, .. }) = sm.get(name).cloned() {
            if let Value::Literal { bits, .. } = index {
                let disp = offset - (*bits as i32) * element_size.bytes() as i32;
                let reg = sm.claim_register(ValueSize::Ptr, out)?;
                out.push(Instruction::Lea {
                    dst: Operand::Reg(reg, ValueSize::Ptr),
                    src: Operand::Mem { base: MemBase::Reg(Register::Rbp), disp, size: ValueSize::Ptr },
                });
                sm.map_value(inst.assignee.unwrap(), Cell::Register { reg, size: ValueSize::Ptr });
                return Ok(());
            }
        }
    }

    let base_reg = ensure_register(&inst.operands[0], sm, out)?;
    let idx_reg = ensure_register(index, sm, out)?;
    let dst = sm.claim_register(ValueSize::Ptr, out)?;
    out.push(Instruction::Mov { dst: Operand::Reg(dst, ValueSize::I64), src: Operand::Reg(idx_reg, ValueSize::I64) });
    out.push(Instruction::Arith {
        op: ArithKind::Mul,
        dst: Operand::Reg(dst, ValueSize::I64),
        src: Operand::Imm(element_size.bytes() as u64, ValueSize::I64),
    });
    out.push(Instruction::Arith {
        op: ArithKind::Add,
        dst: Operand::Reg(dst, ValueSize::I64),
        src: Operand::Reg(base_reg, ValueSize::I64),
    });
    sm.map_value(inst.assignee.unwrap(), Cell::Register { reg: dst, size: ValueSize::Ptr });
    Ok(())
}

/// Splice `mov dst, src` into each predecessor block, just before its
/// terminator, for every `phi` in the function (§4.4). This assumes a
/// predecessor's terminator only reaches one phi-bearing successor with a
/// value specific to that edge; a `branch` whose both targets read from
/// distinct phis fed by this same predecessor would need a critical-edge
/// split this pass doesn't perform.
fn splice_phi_moves(f: &Function, blocks: &mut Vec<AsmBlock>, sm: &mut StorageManager) -> Result<()> {
    let index_of: Map<Id, usize> = f.blocks.iter().enumerate().map(|(i, b)| (b.name, i)).collect();

    for block in &f.blocks {
        for inst in &block.instructions {
            let Op::Phi { labels } = &inst.op else { continue };
            let dst_reg = match sm.get_or_err(inst.assignee.unwrap())?.clone() {
                Cell::Register { reg, .. } => reg,
                _ => continue,
            };
            for (label, value) in labels.iter().zip(&inst.operands) {
                let Some(&pred_index) = index_of.get(label) else {
                    return Err(CompileError::UndefinedLabel(*label));
                };
                let mut spliced = Vec::new();
                let src = to_operand(value, sm, &mut spliced)?;
                if let Some(m) = Instruction::mov(Operand::Reg(dst_reg, inst.result_size), src) {
                    spliced.push(m);
                }

                let pred = &mut blocks[pred_index].instructions;
                let insert_at = pred
                    .iter()
                    .rposition(|i| matches!(i, Instruction::Jmp(_) | Instruction::Jcc(..) | Instruction::Ret))
                    .map(|p| find_terminator_start(pred, p))
                    .unwrap_or(pred.len());
                for (offset, extra) in spliced.into_iter().enumerate() {
                    pred.insert(insert_at + offset, extra);
                }
            }
        }
    }
    Ok(())
}

/// Find the start of the contiguous terminator sequence ending at `last`
/// (a `branch` lowers to `jcc`+`jmp`; we splice before both).
fn find_terminator_start(insts: &[Instruction], last: usize) -> usize {
    let mut start = last;
    while start > 0 && matches!(insts[start - 1], Instruction::Jcc(..) | Instruction::Jmp(_)) {
        start -= 1;
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::ir::parse;

    fn lower(src: &str) -> Program {
        let mut module = parse(src).unwrap();
        analyze(&mut module);
        lower_module(&module).unwrap()
    }

    #[test]
    fn lowers_trivial_return() {
        let program = lower("define fn i32 main()\n%x = literal i32 7\nret i32 %x\nend\n");
        assert_eq!(program.functions.len(), 1);
        assert!(!program.functions[0].blocks[0].instructions.is_empty());
    }

    #[test]
    fn rejects_too_many_call_arguments() {
        let mut module = parse(
            "extern fn i32 f(i32, i32, i32, i32, i32, i32, i32)\n\
             define fn i32 main()\n\
             %r = call i32 f(i32 1, i32 2, i32 3, i32 4, i32 5, i32 6, i32 7)\n\
             ret i32 %r\n\
             end\n",
        )
        .unwrap();
        analyze(&mut module);
        assert!(lower_module(&module).is_err());
    }
}

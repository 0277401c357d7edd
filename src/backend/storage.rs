//! The per-function storage manager (§4.2): maps SSA names to virtual
//! storage cells and arbitrates register allocation.
//!
//! Grounded on the source's `function_storage`/`virtual_memory` hierarchy,
//! but as a closed enum (`Cell`) instead of a `virtual_memory` base class
//! probed with `dynamic_cast` (§9 "Deep class hierarchies with runtime
//! downcasting"). Ownership between an IR variable name and a cell is
//! always 1:1.

use crate::common::{Id, Map, Set};
use crate::error::{CompileError, Result};
use crate::ir::{IcmpKind, ValueSize};

use super::asm::{Instruction, MemBase, Operand};
use super::registers::{Register, ALLOCATABLE};

/// One concrete place a value can live.
#[derive(Clone, Debug)]
pub enum Cell {
    /// A value currently held in a general-purpose register.
    Register { reg: Register, size: ValueSize },
    /// A value spilled to the stack, addressed relative to `rbp`.
    Stack { offset: i32, size: ValueSize },
    /// The address of a global string or extern symbol.
    Global { label: Id },
    /// A constant baked in at lowering time; never occupies a register
    /// until something forces it into one.
    Literal { size: ValueSize, bits: u64 },
    /// The result of the most recent `icmp`, represented as a condition
    /// code rather than a materialized 0/1 — consumed directly by
    /// `branch`/`select` without ever touching a register.
    Flag { kind: IcmpKind },
}

impl Cell {
    pub fn size(&self) -> ValueSize {
        match self {
            Cell::Register { size, .. } => *size,
            Cell::Stack { size, .. } => *size,
            Cell::Global { .. } => ValueSize::Ptr,
            Cell::Literal { size, .. } => *size,
            Cell::Flag { .. } => ValueSize::I1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RegisterSlot {
    used: bool,
    tampered: bool,
    frozen: bool,
}

pub struct StorageManager {
    values: Map<Id, Cell>,
    regs: Map<Register, RegisterSlot>,
    stack_size: i32,
    pending_drop: Vec<Id>,
    /// Names a `phi` has claimed as its destination. Protected from the
    /// ordinary liveness-driven drop so `splice_phi_moves` can still find
    /// the register after the phi's own last use has been lowered — phi
    /// destinations live for the rest of the function, not just until
    /// their next textual reference.
    phi_destinations: Set<Id>,
}

impl StorageManager {
    pub fn new() -> Self {
        let mut regs = Map::new();
        for r in ALLOCATABLE {
            regs.insert(
                r,
                RegisterSlot {
                    used: false,
                    tampered: false,
                    frozen: false,
                },
            );
        }
        StorageManager {
            values: Map::new(),
            regs,
            stack_size: 0,
            pending_drop: Vec::new(),
            phi_destinations: Set::new(),
        }
    }

    pub fn stack_size(&self) -> i32 {
        self.stack_size
    }

    /// Every register the allocator ever wrote to, for the epilogue's
    /// callee-save restore sequence.
    pub fn tampered_registers(&self) -> Vec<Register> {
        ALLOCATABLE
            .into_iter()
            .filter(|r| self.regs[r].tampered)
            .collect()
    }

    pub fn get(&self, name: Id) -> Option<&Cell> {
        self.values.get(&name)
    }

    pub fn get_or_err(&self, name: Id) -> Result<&Cell> {
        self.get(name).ok_or(CompileError::UndefinedVariable(name))
    }

    pub fn map_value(&mut self, name: Id, cell: Cell) {
        self.values.insert(name, cell);
    }

    /// Release whatever storage `name` currently owns back to the free
    /// pool, without forgetting the name (it simply has no cell until
    /// reassigned). A no-op for a `phi` destination — see
    /// `phi_destinations` — and for a name with no current cell.
    pub fn drop_ownership(&mut self, name: Id) {
        if self.phi_destinations.contains(&name) {
            return;
        }
        if let Some(Cell::Register { reg, .. }) = self.values.get(&name) {
            if let Some(slot) = self.regs.get_mut(reg) {
                slot.used = false;
            }
        }
        self.values.remove(&name);
    }

    /// Mark `name` (a `phi` assignee) as permanently owning its cell for
    /// the rest of the function, so the move spliced into each predecessor
    /// block at `splice_phi_moves` time can still resolve its register.
    pub fn mark_phi_destination(&mut self, name: Id) {
        self.phi_destinations.insert(name);
    }

    /// Remove `name`'s bookkeeping entry without touching its register's
    /// `used` flag — used when an instruction reuses a dying operand's
    /// register as its own result and immediately re-maps that register to
    /// the new assignee. The operand's drop is queued in `pending_drop`
    /// from before the reuse was decided; without this, `flush_deferred_
    /// drops` would later see the old name still pointing at the register
    /// and free it out from under the new assignee.
    pub fn forget(&mut self, name: Id) {
        self.values.remove(&name);
    }

    /// Queue `name` to be dropped once the current instruction finishes
    /// lowering (used by `call`/`arithmetic`/`select`, which must read an
    /// operand's current location before freeing it).
    pub fn defer_drop(&mut self, name: Id) {
        self.pending_drop.push(name);
    }

    pub fn flush_deferred_drops(&mut self) {
        let names = std::mem::take(&mut self.pending_drop);
        for name in names {
            self.drop_ownership(name);
        }
    }

    fn find_free_register(&self) -> Option<Register> {
        ALLOCATABLE
            .into_iter()
            .find(|r| !self.regs[r].used && !self.regs[r].frozen)
    }

    /// Allocate a fresh stack slot for a register spill (always grows,
    /// never reused once freed — matching the source, which has no
    /// spill-slot free list). `size` is always one of the four concrete
    /// register widths here, since only register-resident values spill.
    pub fn allocate_stack_slot(&mut self, size: ValueSize) -> Cell {
        self.stack_size += size.bytes().max(8) as i32;
        Cell::Stack {
            offset: -self.stack_size,
            size,
        }
    }

    /// Allocate a fresh stack slot of exactly `bytes` bytes, for an
    /// `allocate` instruction's buffer — unlike a register spill, this
    /// size is caller-chosen and need not be one of the four concrete
    /// `ValueSize`s.
    pub fn allocate_stack_slot_bytes(&mut self, bytes: u32) -> Cell {
        self.stack_size += bytes.max(1) as i32;
        Cell::Stack {
            offset: -self.stack_size,
            size: ValueSize::Ptr,
        }
    }

    /// Write `reg`'s current owner out to a fresh stack slot (§4.3: "Emit
    /// `mov S, R`. Re-map X to S.") and update its bookkeeping to match.
    fn spill(&mut self, owner: Id, reg: Register, out: &mut Vec<Instruction>) {
        let size = match self.values.get(&owner) {
            Some(Cell::Register { size, .. }) => *size,
            _ => return,
        };
        let stack = self.allocate_stack_slot(size);
        let Cell::Stack { offset, .. } = stack else {
            unreachable!("allocate_stack_slot always returns Cell::Stack")
        };
        out.push(Instruction::Mov {
            dst: Operand::Mem {
                base: MemBase::Reg(Register::Rbp),
                disp: offset,
                size,
            },
            src: Operand::Reg(reg, size),
        });
        self.values.insert(owner, stack);
    }

    /// Find a register for a new value of the given size, evicting the
    /// least-recently-needed resident to the stack if every register is
    /// busy or frozen.
    pub fn claim_register(&mut self, size: ValueSize, out: &mut Vec<Instruction>) -> Result<Register> {
        if let Some(r) = self.find_free_register() {
            let slot = self.regs.get_mut(&r).unwrap();
            slot.used = true;
            slot.tampered = true;
            return Ok(r);
        }
        self.evict_one_register(out)
    }

    /// Reserve a specific register (used for call argument marshaling and
    /// the `div`/`mod` fixed-register convention), spilling its current
    /// owner first if it's occupied.
    pub fn claim_specific_register(
        &mut self,
        want: Register,
        _size: ValueSize,
        out: &mut Vec<Instruction>,
    ) -> Result<Register> {
        if let Some(owner) = self.owner_of(want) {
            self.spill(owner, want, out);
        }
        let slot = self
            .regs
            .get_mut(&want)
            .ok_or(CompileError::RegisterExhausted)?;
        slot.used = true;
        slot.tampered = true;
        Ok(want)
    }

    /// Evict whatever currently owns `reg` to the stack, without claiming
    /// `reg` for a new owner — used when a register is clobbered by
    /// something outside the allocator's control (the call convention
    /// always clobbers `rax`) regardless of whether the caller goes on to
    /// claim it afterward.
    pub fn evict_register(&mut self, reg: Register, out: &mut Vec<Instruction>) {
        if let Some(owner) = self.owner_of(reg) {
            self.spill(owner, reg, out);
        }
    }

    fn owner_of(&self, reg: Register) -> Option<Id> {
        self.values.iter().find_map(|(name, cell)| match cell {
            Cell::Register { reg: r, .. } if *r == reg => Some(*name),
            _ => None,
        })
    }

    fn evict_one_register(&mut self, out: &mut Vec<Instruction>) -> Result<Register> {
        let victim = ALLOCATABLE
            .into_iter()
            .find(|r| !self.regs[r].frozen)
            .ok_or(CompileError::RegisterExhausted)?;
        if let Some(owner) = self.owner_of(victim) {
            self.spill(owner, victim, out);
        }
        let slot = self.regs.get_mut(&victim).unwrap();
        slot.used = true;
        slot.tampered = true;
        Ok(victim)
    }

    /// Temporarily prevent the allocator from handing out `reg` — used
    /// while marshaling call arguments into fixed registers one at a time.
    pub fn freeze(&mut self, reg: Register) {
        if let Some(slot) = self.regs.get_mut(&reg) {
            slot.frozen = true;
        }
    }

    pub fn unfreeze(&mut self, reg: Register) {
        if let Some(slot) = self.regs.get_mut(&reg) {
            slot.frozen = false;
        }
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_distinct_registers_until_exhausted() {
        let mut mgr = StorageManager::new();
        let mut out = Vec::new();
        let mut claimed = std::collections::HashSet::new();
        for _ in 0..14 {
            let r = mgr.claim_register(ValueSize::I64, &mut out).unwrap();
            assert!(claimed.insert(r), "register handed out twice before any drop");
        }
        assert!(out.is_empty(), "no eviction should occur before exhaustion");
    }

    #[test]
    fn dropping_a_register_frees_it_for_reuse() {
        let mut mgr = StorageManager::new();
        let mut out = Vec::new();
        let name = crate::common::id("x");
        let r = mgr.claim_register(ValueSize::I32, &mut out).unwrap();
        mgr.map_value(name, Cell::Register { reg: r, size: ValueSize::I32 });
        mgr.drop_ownership(name);
        let r2 = mgr.claim_register(ValueSize::I32, &mut out).unwrap();
        assert_eq!(r, r2);
    }

    #[test]
    fn exhausting_every_register_spills_one_to_the_stack() {
        let mut mgr = StorageManager::new();
        let mut out = Vec::new();
        for i in 0..14 {
            let r = mgr.claim_register(ValueSize::I64, &mut out).unwrap();
            mgr.map_value(crate::common::id(&format!("v{i}")), Cell::Register { reg: r, size: ValueSize::I64 });
        }
        assert!(out.is_empty());
        let extra = mgr.claim_register(ValueSize::I64, &mut out).unwrap();
        assert_eq!(out.len(), 1, "claiming past exhaustion must spill exactly one register");
        assert!(matches!(out[0], Instruction::Mov { .. }));
        let _ = extra;
    }

    #[test]
    fn phi_destination_survives_an_ordinary_drop() {
        let mut mgr = StorageManager::new();
        let mut out = Vec::new();
        let name = crate::common::id("phi_dst");
        let r = mgr.claim_register(ValueSize::I32, &mut out).unwrap();
        mgr.map_value(name, Cell::Register { reg: r, size: ValueSize::I32 });
        mgr.mark_phi_destination(name);
        mgr.drop_ownership(name);
        assert!(mgr.get(name).is_some(), "a phi destination must survive a normal drop");
    }

    #[test]
    fn forgetting_an_old_name_does_not_free_its_reused_register() {
        let mut mgr = StorageManager::new();
        let mut out = Vec::new();
        let old = crate::common::id("old");
        let new = crate::common::id("new");
        let r = mgr.claim_register(ValueSize::I32, &mut out).unwrap();
        mgr.map_value(old, Cell::Register { reg: r, size: ValueSize::I32 });
        mgr.forget(old);
        mgr.map_value(new, Cell::Register { reg: r, size: ValueSize::I32 });
        assert!(mgr.get(old).is_none());
        assert!(mgr.get(new).is_some());
        // the old name's drop (e.g. via a deferred-drop flush) must not
        // free the register the new name now owns.
        mgr.drop_ownership(old);
        let r2 = mgr.claim_register(ValueSize::I32, &mut out).unwrap();
        assert_ne!(r, r2, "register must still be considered in use");
    }
}

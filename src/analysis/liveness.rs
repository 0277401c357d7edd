//! Two-pass intra-procedural liveness (§4.1).
//!
//! This is deliberately not a full live-in/live-out dataflow analysis: it
//! only answers "is this the last textual reference to this variable inside
//! the function", which is all the storage manager needs to decide when a
//! register or stack slot can be reused. A variable produced in one block
//! and consumed only in a successor still gets a correct answer because the
//! scan walks blocks in source order and a name can only be assigned once
//! (SSA, §3.3).

use crate::common::{Id, Map};
use crate::ir::{Function, Instruction, Value};

/// First pass: for every variable name, the last instruction (identified by
/// `(block_index, instruction_index)`) that references it, counting both
/// operand uses and the instruction's own assignment.
fn last_references(f: &Function) -> Map<Id, (usize, usize)> {
    let mut last = Map::new();

    for (bi, block) in f.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            if let Some(name) = inst.assignee {
                last.insert(name, (bi, ii));
            }
            for operand in &inst.operands {
                if let Value::Variable { name, .. } = operand {
                    last.insert(*name, (bi, ii));
                }
            }
        }
    }

    last
}

/// Second pass: mark `Instruction::last_use[i]` for every operand whose
/// last reference is this exact instruction.
pub fn analyze(f: &mut Function) {
    let last = last_references(f);

    for (bi, block) in f.blocks.iter_mut().enumerate() {
        for (ii, inst) in block.instructions.iter_mut().enumerate() {
            mark_instruction(inst, bi, ii, &last);
        }
    }
}

fn mark_instruction(inst: &mut Instruction, bi: usize, ii: usize, last: &Map<Id, (usize, usize)>) {
    for (slot, operand) in inst.last_use.iter_mut().zip(&inst.operands) {
        *slot = match operand {
            Value::Variable { name, .. } => last.get(name) == Some(&(bi, ii)),
            Value::Literal { .. } => false,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse;

    #[test]
    fn marks_last_use_of_each_operand() {
        let mut module = parse(
            "define fn i32 main()\n\
             %a = literal i32 2\n\
             %b = literal i32 3\n\
             %c = arithmetic add i32 %a, i32 %b\n\
             %d = arithmetic add i32 %a, i32 %c\n\
             ret i32 %d\n\
             end\n",
        )
        .unwrap();
        let f = &mut module.functions[0];
        analyze(f);

        // %a is used in both adds; only the second (index 3) is its last use.
        assert_eq!(f.blocks[0].instructions[2].last_use, vec![false, true]);
        assert_eq!(f.blocks[0].instructions[3].last_use, vec![true, true]);
    }

    #[test]
    fn later_reference_overrides_an_earlier_self_use() {
        // `%a`'s own defining instruction also reads it, but `ret` reads it
        // again afterwards, so the add's read is *not* the last use.
        let mut module = parse(
            "define fn i32 main()\n\
             %a = literal i32 1\n\
             %a = arithmetic add i32 %a, i32 %a\n\
             ret i32 %a\n\
             end\n",
        )
        .unwrap();
        let f = &mut module.functions[0];
        analyze(f);
        assert_eq!(f.blocks[0].instructions[1].last_use, vec![false, false]);
        assert_eq!(f.blocks[0].instructions[2].last_use, vec![true]);
    }
}

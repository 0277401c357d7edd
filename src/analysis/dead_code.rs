//! Dead-block elimination (§4.7): drop blocks no instruction can reach.
//!
//! Reachability here is purely syntactic — the set of labels mentioned by
//! some `branch`/`jmp`/`phi` anywhere in the function, plus the entry block,
//! which is reachable by construction. No fixed-point iteration is needed
//! because block bodies can't remove edges by executing; a label is either
//! referenced somewhere in the text or it isn't.

use crate::common::Set;
use crate::ir::Function;

pub fn eliminate(f: &mut Function) {
    if f.blocks.is_empty() {
        return;
    }

    let mut unreachable: Set<_> = f.blocks.iter().map(|b| b.name).collect();
    unreachable.remove(&f.blocks[0].name);

    for block in &f.blocks {
        for inst in &block.instructions {
            for label in inst.labels_referenced() {
                unreachable.remove(&label);
            }
        }
    }

    f.blocks.retain(|b| !unreachable.contains(&b.name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse;

    #[test]
    fn entry_block_always_survives() {
        let mut module = parse("define fn void main()\nret\nend\n").unwrap();
        let f = &mut module.functions[0];
        eliminate(f);
        assert_eq!(f.blocks.len(), 1);
    }

    #[test]
    fn unreferenced_block_is_dropped() {
        let mut module = parse(
            "define fn i32 main()\n\
             jmp .live\n\
             .live:\n\
             ret i32 1\n\
             .dead:\n\
             ret i32 0\n\
             end\n",
        )
        .unwrap();
        let f = &mut module.functions[0];
        assert_eq!(f.blocks.len(), 3);
        eliminate(f);
        assert_eq!(f.blocks.len(), 2);
        assert!(f.block(crate::common::id(".dead")).is_none());
    }

    #[test]
    fn phi_reference_keeps_predecessor_reachable() {
        let mut module = parse(
            "define fn i32 main()\n\
             branch .a, .b i1 1\n\
             .a:\n\
             jmp .merge\n\
             .b:\n\
             jmp .merge\n\
             .merge:\n\
             %p = phi(.a, .b) i32 1, i32 2\n\
             ret i32 %p\n\
             end\n",
        )
        .unwrap();
        let f = &mut module.functions[0];
        eliminate(f);
        assert_eq!(f.blocks.len(), 4);
    }
}

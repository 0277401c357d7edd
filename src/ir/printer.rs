//! Writes a [`Module`] back to the textual IR syntax parsed by
//! [`crate::ir::parser`]. Used by `--out ir` and by the round-trip property
//! test (parse ∘ print ∘ parse is the identity on the data model).

use std::fmt::Write as _;

use crate::ir::nodes::*;

pub fn print_module(module: &Module) -> String {
    let mut out = String::new();

    for g in &module.global_strings {
        let text = String::from_utf8_lossy(&g.bytes);
        writeln!(out, "global_string %{} = \"{}\"", g.name, escape(&text)).unwrap();
    }
    if !module.global_strings.is_empty() {
        out.push('\n');
    }

    for e in &module.externs {
        let params = e
            .params
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "extern fn {} {}({})", e.return_size, e.name, params).unwrap();
    }
    if !module.externs.is_empty() {
        out.push('\n');
    }

    for (i, f) in module.functions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_function(&mut out, f);
    }

    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn print_function(out: &mut String, f: &Function) {
    let params = f
        .params
        .iter()
        .map(|p| format!("{} %{}", p.size, p.name))
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(out, "define fn {} {}({})", f.return_size, f.name, params).unwrap();

    for (bi, b) in f.blocks.iter().enumerate() {
        if bi > 0 || b.name.as_str() != "entry" {
            writeln!(out, "{}:", b.name).unwrap();
        }
        for inst in &b.instructions {
            print_instruction(out, inst);
        }
    }

    writeln!(out, "end").unwrap();
}

fn print_value(v: &Value) -> String {
    match v {
        Value::Literal { size, bits } => format!("{size} {bits}"),
        Value::Variable { size, name } => format!("{size} %{name}"),
    }
}

fn print_operands(vs: &[Value]) -> String {
    vs.iter().map(print_value).collect::<Vec<_>>().join(", ")
}

fn print_instruction(out: &mut String, inst: &Instruction) {
    let assignee = inst
        .assignee
        .map(|a| format!("%{a} = "))
        .unwrap_or_default();

    let body = match &inst.op {
        Op::Literal => print_operands(&inst.operands),
        Op::Allocate { bytes } => format!("allocate {bytes}"),
        Op::Store { size } => format!("store {size} {}", print_operands(&inst.operands)),
        Op::Load { size } => format!("load {size} {}", print_operands(&inst.operands)),
        Op::Icmp { kind } => format!("icmp {kind} {}", print_operands(&inst.operands)),
        Op::Branch { if_true, if_false } => {
            format!("branch {if_true}, {if_false} {}", print_operands(&inst.operands))
        }
        Op::Jmp { target } => format!("jmp {target}"),
        Op::Ret => {
            if inst.operands.is_empty() {
                "ret".to_string()
            } else {
                format!("ret {}", print_operands(&inst.operands))
            }
        }
        Op::Arithmetic { kind } => format!("arithmetic {kind} {}", print_operands(&inst.operands)),
        Op::Call { target } => format!("call {target}({})", print_operands(&inst.operands)),
        Op::Phi { labels } => {
            let labels = labels.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(", ");
            format!("phi({labels}) {}", print_operands(&inst.operands))
        }
        Op::Select => format!("select {}", print_operands(&inst.operands)),
        Op::Sext { target } => format!("sext {target} {}", print_operands(&inst.operands)),
        Op::Zext { target } => format!("zext {target} {}", print_operands(&inst.operands)),
        Op::GetArrayPtr { element_size } => {
            format!("get_array_ptr {element_size} {}", print_operands(&inst.operands))
        }
    };

    if matches!(inst.op, Op::Literal) {
        writeln!(out, "{assignee}literal {body}").unwrap();
    } else {
        writeln!(out, "{assignee}{body}").unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse;

    fn round_trip(src: &str) {
        let m1 = parse(src).unwrap();
        let printed = print_module(&m1);
        let m2 = parse(&printed).unwrap_or_else(|e| panic!("re-parse failed: {e}\n---\n{printed}"));
        assert_eq!(format!("{m1:?}"), format!("{m2:?}"));
    }

    #[test]
    fn round_trips_arithmetic_and_return() {
        round_trip(
            "define fn i32 main()\n\
             %a = literal i32 2\n\
             %b = literal i32 3\n\
             %c = arithmetic add i32 %a, i32 %b\n\
             ret i32 %c\n\
             end\n",
        );
    }

    #[test]
    fn round_trips_branch_and_labels() {
        round_trip(
            "define fn i32 main()\n\
             %c = icmp slt i32 1, i32 2\n\
             branch .t, .f i1 %c\n\
             .t:\n\
             ret i32 1\n\
             .f:\n\
             ret i32 0\n\
             end\n",
        );
    }

    #[test]
    fn round_trips_call_and_extern() {
        round_trip(
            "extern fn i32 helper(i32)\n\
             define fn i32 main()\n\
             %r = call i32 helper(i32 1)\n\
             ret i32 %r\n\
             end\n",
        );
    }
}

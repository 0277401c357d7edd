//! Assembles a [`Program`] into one NASM source string (§4.6): section
//! layout, global string data, extern declarations, and per-function labels.

use std::fmt::Write as _;

use super::lower::Program;

pub fn write_program(program: &Program) -> String {
    let mut out = String::new();
    writeln!(out, "[bits 64]").unwrap();
    out.push('\n');

    if !program.global_strings.is_empty() {
        writeln!(out, "section .global_strings").unwrap();
        for g in &program.global_strings {
            write!(out, "{}: db ", g.name).unwrap();
            let bytes = g
                .bytes
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if bytes.is_empty() {
                writeln!(out, "0").unwrap();
            } else {
                writeln!(out, "{bytes}, 0").unwrap();
            }
        }
        out.push('\n');
    }

    if !program.externs.is_empty() {
        writeln!(out, "section .external_functions").unwrap();
        for e in &program.externs {
            writeln!(out, "extern {e}").unwrap();
        }
        out.push('\n');
    }

    writeln!(out, "section .text").unwrap();
    for f in &program.functions {
        writeln!(out, "global {}", f.name).unwrap();
    }
    out.push('\n');

    for f in &program.functions {
        writeln!(out, "{}:", f.name).unwrap();
        for block in &f.blocks {
            if let Some(label) = block.label {
                writeln!(out, "{label}:").unwrap();
            }
            for inst in &block.instructions {
                writeln!(out, "{}", inst.print()).unwrap();
            }
        }
        out.push('\n');
    }

    out
}

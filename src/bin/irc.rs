//! `irc`: the command-line driver. Parses a textual IR file, analyzes it,
//! and either prints an intermediate stage or assembles, links, and runs
//! the result.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use irlower::{analysis, backend, driver, ir};

#[derive(Parser)]
#[command(author, version, about = "Lowers a textual IR module into x86-64 NASM assembly")]
struct Args {
    /// Path to a `.ir` source file.
    file: PathBuf,

    /// What to print (or do) with the input.
    #[arg(long, value_enum, default_value_t = Output::Asm)]
    out: Output,

    /// Where to write generated assembly when `--out asm` or `--out run`
    /// is used. Defaults to the input file with a `.asm` extension.
    #[arg(long)]
    asm_out: Option<PathBuf>,

    /// Increase log verbosity (`-v` = debug, `-vv` = trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Copy, Clone, ValueEnum)]
enum Output {
    /// Re-print the parsed module (round-trips through the textual syntax).
    Ir,
    /// NASM assembly text (the default).
    Asm,
    /// Assemble, link, and run the program, printing its exit code.
    Run,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;

    let mut module = ir::parse(&source)?;
    analysis::analyze(&mut module);

    match args.out {
        Output::Ir => {
            print!("{}", ir::print_module(&module));
        }
        Output::Asm => {
            let asm = backend::generate(&module)?;
            print!("{asm}");
        }
        Output::Run => {
            let asm = backend::generate(&module)?;
            let asm_path = args.asm_out.clone().unwrap_or_else(|| args.file.with_extension("asm"));
            std::fs::write(&asm_path, asm)
                .with_context(|| format!("writing {}", asm_path.display()))?;
            let exe_path = driver::assemble_and_link(&asm_path)?;
            let code = driver::run_once(&exe_path)?;
            println!("exit code: {code}");
        }
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

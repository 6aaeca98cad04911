use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use miette::IntoDiagnostic;

use crisp8::AsmParser;

/// Assemble CHIP-8 assembly source into a binary ROM.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Assembly source file
    infile: PathBuf,
    /// Destination for the assembled ROM
    outfile: PathBuf,
}

fn main() -> ExitCode {
    // Exit code 1 for usage errors as well as assembly failures.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> miette::Result<()> {
    println!(
        "{:>12} target {}",
        "Assembling".green().bold(),
        args.infile.display()
    );

    let mut text = fs::read_to_string(&args.infile).into_diagnostic()?;
    // Every statement wants its newline, including the last one.
    text.push('\n');
    // The source must outlive every borrowed lexeme and diagnostic.
    let src: &'static str = String::leak(text);

    let bincode = match AsmParser::new(src).assemble() {
        Ok(bincode) => bincode,
        Err(errors) => {
            let count = errors.len();
            for report in errors {
                eprintln!("{report:?}");
            }
            miette::bail!("assembly failed with {count} error(s)");
        }
    };

    let mut outfile = File::create(&args.outfile).into_diagnostic()?;
    outfile.write_all(&bincode).into_diagnostic()?;

    println!(
        "{:>12} {} bytes to {}",
        "Saved".green().bold(),
        bincode.len(),
        args.outfile.display()
    );
    Ok(())
}

//! Command-line front end for the transaction virtual machine.
//!
//! # Usage
//! ```text
//! txvm asm <input.asm> [-o <output>] [--hex]
//! txvm disasm <input> [--hex]
//! txvm validate <input> [--asm] [--hex] [--runlimit <n>] [--trace] [--profile]
//! ```
//!
//! # Examples
//! ```text
//! txvm asm transfer.asm -o transfer.bin
//! txvm disasm transfer.bin
//! txvm validate transfer.asm --asm --trace
//! RUST_LOG=debug txvm validate transfer.bin --profile
//! ```

use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use txvm::virtual_machine::assembler::{assemble, render_diagnostic};
use txvm::virtual_machine::disassembler::disassemble;
use txvm::virtual_machine::validator::{Options, validate};
use txvm::virtual_machine::vm::{DEFAULT_RUNLIMIT, RunlimitProfile};

#[derive(Parser)]
#[command(name = "txvm", version, about = "Transaction virtual machine tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble source text into bytecode
    Asm {
        input: PathBuf,
        /// Output file path (defaults to <input>.bin)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write hex text instead of raw bytes
        #[arg(long)]
        hex: bool,
    },
    /// Print bytecode as assembly
    Disasm {
        input: PathBuf,
        /// Input holds hex text instead of raw bytes
        #[arg(long)]
        hex: bool,
    },
    /// Run a program and decide whether it is a valid transaction
    Validate(ValidateArgs),
}

#[derive(Args)]
struct ValidateArgs {
    input: PathBuf,
    /// Input is assembly source
    #[arg(long, conflicts_with = "hex")]
    asm: bool,
    /// Input holds hex text instead of raw bytes
    #[arg(long)]
    hex: bool,
    #[arg(long, env = "TXVM_RUNLIMIT", default_value_t = DEFAULT_RUNLIMIT)]
    runlimit: u64,
    /// Print every step to stderr
    #[arg(long)]
    trace: bool,
    /// Print the runlimit profile
    #[arg(long)]
    profile: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Asm { input, output, hex } => run_asm(&input, output, hex),
        Command::Disasm { input, hex } => run_disasm(&input, hex),
        Command::Validate(args) => run_validate(&args),
    };
    match result {
        Ok(code) => code,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run_asm(input: &Path, output: Option<PathBuf>, hex: bool) -> Result<ExitCode, String> {
    let program = assemble_source(input)?;
    let output = output.unwrap_or_else(|| input.with_extension("bin"));
    let contents = if hex {
        hex::encode(&program).into_bytes()
    } else {
        program.clone()
    };
    fs::write(&output, contents)
        .map_err(|e| format!("failed to write {}: {e}", output.display()))?;
    info!(
        "Compiled {} -> {} ({} bytes)",
        input.display(),
        output.display(),
        program.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn run_disasm(input: &Path, hex: bool) -> Result<ExitCode, String> {
    let program = read_program(input, hex)?;
    let text = disassemble(&program).map_err(|e| format!("{}: {e}", input.display()))?;
    println!("{text}");
    Ok(ExitCode::SUCCESS)
}

fn run_validate(args: &ValidateArgs) -> Result<ExitCode, String> {
    let program = if args.asm {
        assemble_source(&args.input)?
    } else {
        read_program(&args.input, args.hex)?
    };

    let mut options = Options::new().with_runlimit(args.runlimit);
    if args.trace {
        options = options.with_tracer(|view| eprintln!("{view}"));
    }
    let result = validate(&program, options);

    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let (label, color) = if result.accepted {
        ("ACCEPTED", Color::Green)
    } else {
        ("REJECTED", Color::Red)
    };
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
    let _ = write!(stdout, "{label}");
    let _ = stdout.reset();
    match &result.rejection {
        Some(rejection) => {
            let _ = writeln!(stdout, " {rejection}");
        }
        None => {
            let _ = writeln!(stdout, " txid {}", result.txid);
        }
    }
    let _ = writeln!(
        stdout,
        "runlimit {} / {}",
        format_with_commas(result.runlimit_used),
        format_with_commas(args.runlimit)
    );
    if args.profile {
        print_profile(&result.profile);
    }

    Ok(if result.accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn assemble_source(input: &Path) -> Result<Vec<u8>, String> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("failed to read {}: {e}", input.display()))?;
    assemble(&source).map_err(|e| render_diagnostic(&input.display().to_string(), &source, &e))
}

fn read_program(input: &Path, hex: bool) -> Result<Vec<u8>, String> {
    let bytes = fs::read(input).map_err(|e| format!("failed to read {}: {e}", input.display()))?;
    if !hex {
        return Ok(bytes);
    }
    let text = String::from_utf8_lossy(&bytes);
    hex::decode(text.trim()).map_err(|e| format!("{}: invalid hex: {e}", input.display()))
}

fn print_profile(profile: &RunlimitProfile) {
    let total = profile.total();
    let cat_w = 2 + profile
        .iter()
        .map(|(c, _)| c.as_str().len())
        .max()
        .unwrap_or(0)
        .max("total".len());
    let amt_w = format_with_commas(total).len();
    let dash_w = cat_w + 1 + amt_w + 2 + "( 100.0%)".len();

    println!("Runlimit Profile:");
    println!("{}", "-".repeat(dash_w));
    for (category, amount) in profile.iter() {
        if amount == 0 {
            continue;
        }
        let percent = if total > 0 {
            (amount as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!(
            "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
            category.as_str(),
            format_with_commas(amount),
            percent,
        );
    }
    println!("{}", "-".repeat(dash_w));
    println!(
        "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
        "total",
        format_with_commas(total),
        100.0,
    );
}

fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

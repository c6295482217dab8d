use clap::{ArgAction, Parser};
use cpu_features::core::range::LeafRange;
use cpu_features::core::{hardware, probe};
use cpu_features::cpuid::snapshot::LeafSnapshot;
use cpu_features::{Leaf, Register};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

/// Probe one bit of one CPUID leaf. Exits 0 when the bit is set.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Leaf number: decimal, 0x-prefixed hex, or the signed form of an extended leaf
    #[arg(allow_hyphen_values = true)]
    leaf: Leaf,

    /// Register index (0-3) or name (eax, ebx, ecx, edx)
    register: String,

    /// Bit index (0-31)
    bit: u8,

    #[arg(short, long, default_value_t = 0)]
    subleaf: u32,

    /// Probe a captured snapshot instead of the live processor
    #[arg(long)]
    replay: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let register = probe::register_index(&args.register)?;
    let set = match &args.replay {
        Some(path) => {
            let snapshot = LeafSnapshot::load(path)?;
            let range = LeafRange::discover(&snapshot);
            probe::check_bit(&snapshot, &range, args.leaf, args.subleaf, register, args.bit)
        }
        None => hardware::check_bit(args.leaf, args.subleaf, register, args.bit),
    };

    let register_name = Register::try_from(register)
        .map(|r| r.name().to_string())
        .unwrap_or_else(|_| format!("R{}", register));
    println!(
        "{}.{} {}[{}] = {}",
        args.leaf,
        args.subleaf,
        register_name,
        args.bit,
        u8::from(set)
    );

    Ok(if set { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use cpu_features::core::cores;
use cpu_features::core::diagnostics::{Diagnostics, HealthStatus};
use cpu_features::cpuid::snapshot::LeafSnapshot;
use cpu_features::cpuid::{LeafSource, NativeSource};
use cpu_features::report::{self, Filter, Group, Selector};
use cpu_features::{CpuInfo, DecodeOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reports x86 instruction-set extensions", long_about = None)]
struct Args {
    /// Decode a captured snapshot instead of the live processor
    #[arg(long, global = true)]
    replay: Option<PathBuf>,

    /// Also require OS-enabled ZMM state before reporting AVX-512
    #[arg(long, global = true)]
    strict_avx512: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List features and whether they are supported
    List {
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,

        #[arg(short, long, value_enum, default_value_t = Show::All)]
        show: Show,

        /// Only AVX, AVX2 and AVX-512
        #[arg(long)]
        avx_only: bool,
    },
    /// Exit 0 if every named feature is supported, 1 otherwise
    Check {
        #[arg(required = true)]
        features: Vec<String>,
    },
    /// Capture all in-range leaves to a JSON file
    Snapshot { path: PathBuf },
    /// Look for contradictions between raw bits and decoded support
    Diagnose {
        /// Also compare feature leaves across every core
        #[arg(long)]
        cores: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Text,
    Xml,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Show {
    All,
    Supported,
    Unsupported,
}

impl From<Show> for Selector {
    fn from(show: Show) -> Self {
        match show {
            Show::All => Selector::All,
            Show::Supported => Selector::Supported,
            Show::Unsupported => Selector::Unsupported,
        }
    }
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

    let source: Box<dyn LeafSource> = match &args.replay {
        Some(path) => {
            info!(?path, "Replaying snapshot");
            Box::new(LeafSnapshot::load(path)?)
        }
        None => Box::new(NativeSource),
    };
    let options = DecodeOptions {
        verify_avx512_state: args.strict_avx512,
    };

    let command = args.command.unwrap_or(Command::List {
        format: Format::Text,
        show: Show::All,
        avx_only: false,
    });

    match command {
        Command::List {
            format,
            show,
            avx_only,
        } => {
            let info = CpuInfo::detect(source.as_ref(), options);
            let group = if avx_only { Group::Avx } else { Group::All };
            let filter = Filter::new(show.into(), group);
            let rendered = match format {
                Format::Text => report::render_text(&info, filter),
                Format::Xml => report::render_xml(&info, filter),
                Format::Json => report::render_json(&info, filter)?,
            };
            print!("{}", rendered);
            if matches!(format, Format::Json) {
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { features } => {
            let info = CpuInfo::detect(source.as_ref(), options);
            let missing = info.missing(&features)?;
            if missing.is_empty() {
                return Ok(ExitCode::SUCCESS);
            }
            for feature in &missing {
                eprintln!("{} not supported", feature);
            }
            Ok(ExitCode::FAILURE)
        }
        Command::Snapshot { path } => {
            let snapshot = LeafSnapshot::capture(source.as_ref());
            snapshot.save(&path)?;
            println!("Captured {} leaves to {:?}", snapshot.leaves.len(), path);
            Ok(ExitCode::SUCCESS)
        }
        Command::Diagnose { cores: survey_cores } => {
            let info = CpuInfo::detect(source.as_ref(), options);
            let findings = Diagnostics::check_health(source.as_ref(), &info);
            for finding in &findings {
                println!("{}", finding);
            }
            let mut status = Diagnostics::status(&findings);
            println!("Status: {:?}", status);

            if survey_cores {
                if args.replay.is_some() {
                    warn!("Core survey needs the live processor; skipped for replay");
                } else {
                    let samples = cores::survey();
                    let divergent = cores::divergent(&samples);
                    let unpinned = samples.iter().filter(|s| !s.pinned).count();
                    println!(
                        "Surveyed {} cores ({} unpinned), {} divergent {:?}",
                        samples.len(),
                        unpinned,
                        divergent.len(),
                        divergent
                    );
                    if !divergent.is_empty() {
                        status = HealthStatus::Inconsistent;
                    }
                }
            }

            Ok(match status {
                HealthStatus::Healthy => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
    }
}

//! loadguard CLI

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use loadguard::driver::{self, EmitFormat, PipelineConfig};
use loadguard::error::report_error;
use loadguard::interp::{Exit, InterpConfig};
use loadguard::pass::PassRegistry;
use loadguard::Error;

#[derive(Parser)]
#[command(name = "loadguard", version, about = "Run-time null load checks for LIR modules")]
struct Cli {
    /// Print pass and interpreter tracing to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Instrument a module and print or write the result
    Instrument {
        /// Module to transform (LIR text, or .json)
        file: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Comma-separated pass pipeline
        #[arg(long, default_value = "load-checker")]
        passes: String,
        /// Output format
        #[arg(long, value_enum, default_value_t = EmitFormat::Text)]
        emit: EmitFormat,
        /// Skip verification of the input and after each pass
        #[arg(long)]
        no_verify: bool,
    },
    /// Execute a module's `main` with the reference interpreter
    Run {
        /// Module to execute
        file: PathBuf,
        /// Instrument loads before running
        #[arg(long)]
        instrument: bool,
        /// Instruction budget
        #[arg(long)]
        max_steps: Option<u64>,
    },
    /// Check a module for structural errors
    Verify {
        /// Module to check
        file: PathBuf,
    },
    /// List the available passes
    Passes,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loadguard=trace")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let (file, result) = match cli.command {
        Command::Instrument {
            file,
            output,
            passes,
            emit,
            no_verify,
        } => {
            let mut config = PipelineConfig::new(file.clone())
                .passes(passes)
                .emit(emit)
                .verify(!no_verify)
                .verbose(cli.verbose);
            if let Some(output) = output {
                config = config.output(output);
            }
            (Some(file), instrument_file(&config))
        }
        Command::Run {
            file,
            instrument,
            max_steps,
        } => {
            let mut config = InterpConfig::new();
            if let Some(steps) = max_steps {
                config = config.max_steps(steps);
            }
            let result = run_file(&file, instrument, config);
            (Some(file), result)
        }
        Command::Verify { file } => {
            let result = verify_file(&file);
            (Some(file), result)
        }
        Command::Passes => (None, list_passes()),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            report(file.as_deref(), &e);
            std::process::exit(1);
        }
    }
}

fn report(path: Option<&Path>, error: &Error) {
    if let Some(path) = path
        && !matches!(error, Error::Io { .. })
        && let Ok(source) = std::fs::read_to_string(path)
    {
        report_error(&path.display().to_string(), &source, error);
    } else {
        eprintln!("Error: {error}");
    }
}

fn instrument_file(config: &PipelineConfig) -> loadguard::Result<i32> {
    let report = driver::run_pipeline(config)?;
    if config.output.is_none() {
        print!("{}", report.emitted);
    }
    if config.verbose {
        eprintln!("✓ {} load(s) guarded", report.loads_before);
    }
    Ok(0)
}

fn run_file(path: &Path, instrument: bool, config: InterpConfig) -> loadguard::Result<i32> {
    let outcome = driver::run_file(path, instrument, config)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&outcome.stdout)?;
    stdout.flush()?;
    if let Exit::Trap(trap) = &outcome.exit {
        eprintln!("{trap}");
    }
    Ok(outcome.exit_code())
}

fn verify_file(path: &Path) -> loadguard::Result<i32> {
    let source = std::fs::read_to_string(path)?;
    let module = driver::load_module(path, &source)?;
    loadguard::ir::verify_module(&module)?;
    println!("✓ {} verifies successfully", path.display());
    Ok(0)
}

fn list_passes() -> loadguard::Result<i32> {
    for (name, description) in PassRegistry::with_builtin_passes().list() {
        println!("{name:<16} {description}");
    }
    Ok(0)
}

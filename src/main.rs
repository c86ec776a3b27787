use clap::Parser;
use mgcints::error::Error;
use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "mgcints")]
#[command(version)]
#[command(about = "MML compiler framework for retro sound drivers", long_about = None)]
struct Args {
    /// Target engine name
    engine: Option<String>,

    /// Input MML file (reads from stdin if not specified)
    input: Option<PathBuf>,

    /// Output image to patch
    output: Option<PathBuf>,

    /// Engine-specific parameters
    params: Vec<String>,

    /// Target engine name (alternative to the positional)
    #[arg(short = 'e', long = "engine-name", value_name = "ENGINE", conflicts_with = "engine")]
    engine_opt: Option<String>,

    /// Input MML file (alternative to the positional)
    #[arg(short = 'i', long = "input-file", value_name = "INPUT", conflicts_with = "input")]
    input_opt: Option<PathBuf>,

    /// Output image (alternative to the positional)
    #[arg(short = 'o', long = "output-file", value_name = "OUTPUT", conflicts_with = "output")]
    output_opt: Option<PathBuf>,

    /// Track number to insert the song as
    #[arg(short = 't', long, default_value_t = 1)]
    track: u32,

    /// Treat warnings as errors
    #[arg(long)]
    strict: bool,

    /// List available engines
    #[arg(short = 'L', long)]
    list_engines: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> mgcints::Result<()> {
    if args.list_engines {
        for name in mgcints::engine::list_engines() {
            println!("{name}");
        }
        return Ok(());
    }

    let name = args
        .engine_opt
        .or(args.engine)
        .ok_or_else(|| Error::Argument("No engine specified".into()))?;
    let mut engine = mgcints::engine::create_engine(&name)?;
    engine.params = args.params;

    let mml = match args.input_opt.or(args.input) {
        Some(path) => fs::read_to_string(&path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open '{}': {}", path.display(), e),
            ))
        })?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    let out_path = args
        .output_opt
        .or(args.output)
        .ok_or_else(|| Error::Argument("No output file specified".into()))?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&out_path)?;
    if file.metadata()?.len() < engine.image_size() {
        file.set_len(engine.image_size())?;
    }

    let mut compiler = mgcints::Compiler::new();
    compiler.set_strict(args.strict);
    compiler.process_file(&mut engine, &[(mml, args.track)], &mut file)
}

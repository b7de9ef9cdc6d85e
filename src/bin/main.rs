//! FSL CLI
//!
//! Command-line front end of the shader transpiler.
//!
//! Author: Moroya Sakamoto

#![allow(clippy::uninlined_format_args)]

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use forge_fsl::prelude::*;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "fsl")]
#[command(author = "Moroya Sakamoto")]
#[command(version = forge_fsl::VERSION)]
#[command(about = "Forge Shading Language transpiler", long_about = None)]
struct Cli {
    /// Shader list file
    input: PathBuf,

    /// Root directory of generated sources
    #[arg(short, long, default_value = ".")]
    destination: PathBuf,

    /// Root directory of compiled containers (defaults to the destination)
    #[arg(short, long)]
    binary_destination: Option<PathBuf>,

    /// Target platforms, space or comma separated
    #[arg(short, long, required = true, num_args = 1..)]
    languages: Vec<String>,

    /// Additional include directories
    #[arg(short = 'I', long = "include")]
    includes: Vec<PathBuf>,

    /// Report every generated, skipped and compiled file
    #[arg(short, long)]
    verbose: bool,

    /// Compile generated sources with the native toolchains
    #[arg(long)]
    compile: bool,

    /// Debug build
    #[arg(long)]
    debug: bool,

    /// Skip shaders whose outputs are up to date
    #[arg(long)]
    incremental: bool,

    /// Root signature file for D3D12-class targets
    #[arg(long)]
    root_signature: Option<PathBuf>,

    /// Worker threads (0 = available parallelism)
    #[arg(short, long, default_value = "0")]
    jobs: usize,
}

#[cfg(feature = "cli")]
fn parse_languages(values: &[String]) -> Result<Vec<Platform>, String> {
    let mut platforms = Vec::new();
    for name in values.iter().flat_map(|v| v.split(|c: char| c == ',' || c.is_whitespace())) {
        if name.is_empty() {
            continue;
        }
        let platform: Platform = name.parse()?;
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }
    Ok(platforms)
}

#[cfg(feature = "cli")]
fn init_logger(verbose: bool) {
    use std::io::Write;
    let level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let languages = match parse_languages(&cli.languages) {
        Ok(languages) => languages,
        Err(e) => {
            let err = FslError::Config(e);
            eprintln!("{}", err);
            std::process::exit(err.exit_code());
        }
    };

    let options = Options {
        input: cli.input,
        destination: cli.destination,
        binary_destination: cli.binary_destination,
        languages,
        includes: cli.includes,
        verbose: cli.verbose,
        compile: cli.compile,
        debug: cli.debug,
        incremental: cli.incremental,
        root_signature: cli.root_signature,
        jobs: cli.jobs,
    };

    match run(&options) {
        // failures were already reported as they happened
        Ok(report) => std::process::exit(report.exit_code()),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI not enabled. Build with --features cli");
    std::process::exit(1);
}

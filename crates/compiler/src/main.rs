//! Strada Compiler CLI
//!
//! `stradac <input.strada> [output.c]` compiles one source file to one C
//! translation unit. Exit code 0 on success, 1 on the first diagnostic.

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;
use stradac::lint::WarnConfig;
use stradac::CompilerConfig;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "stradac")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Strada compiler - compile .strada sources to C", long_about = None)]
struct Cli {
    /// Input .strada source file
    input: PathBuf,

    /// Output C file (defaults to the input path with a .c extension)
    output: Option<PathBuf>,

    /// Library mode: emit no main, export a per-module init hook
    #[arg(long)]
    shared: bool,

    /// Emit #line directives for the C compiler
    #[arg(short = 'g', long = "line-info")]
    line_info: bool,

    /// Enable warnings (unused my-variables)
    #[arg(short = 'w', long = "warn")]
    warn: bool,

    /// Warning configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    warn_config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("c"));

    let warn_config = match &cli.warn_config {
        Some(path) => {
            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error reading warning config: {}", e);
                    process::exit(1);
                }
            };
            match WarnConfig::from_toml(&content) {
                Ok(user_config) => {
                    let mut merged = WarnConfig::default_config();
                    merged.merge(user_config);
                    merged
                }
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            }
        }
        None => WarnConfig::default_config(),
    };

    let config = CompilerConfig::new()
        .with_shared(cli.shared)
        .with_line_info(cli.line_info)
        .with_warnings(cli.warn)
        .with_warn_config(warn_config);

    match stradac::compile_file(&cli.input, &output, &config) {
        Ok(()) => {
            tracing::debug!(
                input = %cli.input.display(),
                output = %output.display(),
                "compilation finished"
            );
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

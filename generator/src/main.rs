use clap::Parser;
use std::path::PathBuf;

use emg::config::GenerationConfig;
use emg::pipeline::{run_generation, GenerationRequest};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitTarget {
    /// Model dump only
    Model,
    /// Generated C sources only
    Code,
    /// Everything
    All,
}

#[derive(Parser, Debug)]
#[command(
    name = "emg",
    version,
    about = "Environment Model Generator — synthesizes environment models for static verification of kernel-style modules"
)]
struct Cli {
    /// Interface categories specification (JSON)
    categories: PathBuf,

    /// Environment model specification (JSON)
    environment: PathBuf,

    /// Source analysis facts (JSON)
    facts: PathBuf,

    /// Generation configuration file (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for generated sources and the model dump
    #[arg(short, long, default_value = "emg-out")]
    output: PathBuf,

    /// Model dump file name within the output directory
    #[arg(long, default_value = "model.json")]
    dump: String,

    /// What to write
    #[arg(long, value_enum, default_value_t = EmitTarget::All)]
    emit: EmitTarget,

    /// Print phase summaries
    #[arg(long)]
    verbose: bool,
}

fn read(path: &PathBuf) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("emg: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match serde_json::from_str::<GenerationConfig>(&read(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("emg: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => GenerationConfig::default(),
    };

    let categories = read(&cli.categories);
    let environment = read(&cli.environment);
    let facts = read(&cli.facts);

    let request = GenerationRequest {
        categories: &categories,
        environment: &environment,
        facts: &facts,
        config,
    };

    let output = match run_generation(&request) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("emg: error: {}", e);
            std::process::exit(1);
        }
    };

    for diagnostic in &output.diagnostics {
        eprintln!("emg: {}", diagnostic);
    }

    if let Err(e) = std::fs::create_dir_all(&cli.output) {
        eprintln!("emg: error: {}: {}", cli.output.display(), e);
        std::process::exit(2);
    }
    if matches!(cli.emit, EmitTarget::Code | EmitTarget::All) {
        for (name, text) in &output.files {
            let path = cli.output.join(name);
            if cli.verbose {
                eprintln!("emg: writing {}", path.display());
            }
            if let Err(e) = std::fs::write(&path, text) {
                eprintln!("emg: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
    }

    if matches!(cli.emit, EmitTarget::Model | EmitTarget::All) {
        let dump_path = cli.output.join(&cli.dump);
        let dump = match serde_json::to_string_pretty(&output.model) {
            Ok(dump) => dump,
            Err(e) => {
                eprintln!("emg: error: serializing model dump: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = std::fs::write(&dump_path, dump) {
            eprintln!("emg: error: {}: {}", dump_path.display(), e);
            std::process::exit(2);
        }
    }

    if cli.verbose {
        eprintln!(
            "emg: {} source file(s), {} environment instance(s), {} model instance(s)",
            output.files.len(),
            output.model.environment.len(),
            output.model.models.len()
        );
    }
}

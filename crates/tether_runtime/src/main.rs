//! Tether Runtime
//!
//! Command-line host that evaluates a script with a `host` capability bound

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tether_script::engine::local_time_zone_offset;
use tether_script::{CapabilityType, EngineConfig, FnObject, Interpreter, TypeTag, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Evaluate JavaScript with host capabilities", long_about = None)]
struct Cli {
    /// Engine settings (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// File name reported in script errors
    #[arg(long)]
    file_name: Option<String>,
    /// Evaluate this source instead of a file
    #[arg(short = 'e', long = "eval", conflicts_with = "script")]
    source: Option<String>,
    /// Script file to evaluate
    script: Option<PathBuf>,
}

fn host_capability() -> CapabilityType {
    CapabilityType::interface("Host")
        .method("log", [TypeTag::String], TypeTag::Void)
        .method("version", [], TypeTag::String)
        .method("timeZoneOffset", [TypeTag::Double], TypeTag::Int32)
}

fn host_object() -> FnObject {
    FnObject::new("Host")
        .method("log", |args| {
            println!("{}", args[0].as_str().unwrap_or_default());
            Ok(Value::Void)
        })
        .method("version", |_| Ok(Value::from(tether_script::VERSION)))
        .method("timeZoneOffset", |args| {
            Ok(Value::Int32(local_time_zone_offset(
                args[0].as_f64().unwrap_or_default(),
            )))
        })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let (source, file_name) = match (cli.source, cli.script) {
        (Some(source), _) => {
            let file_name = cli
                .file_name
                .unwrap_or_else(|| config.default_file_name.clone());
            (source, file_name)
        }
        (None, Some(path)) => {
            let source = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = cli
                .file_name
                .unwrap_or_else(|| path.display().to_string());
            (source, file_name)
        }
        (None, None) => bail!("nothing to evaluate: pass a script path or -e <source>"),
    };

    tracing::info!("Tether v{}", tether_script::VERSION);
    let result = Interpreter::scoped_with(config, |js| {
        js.bind("host", &host_capability(), Arc::new(host_object()))?;
        js.evaluate_named(&source, &file_name)
    })??;

    println!("{result}");
    Ok(())
}

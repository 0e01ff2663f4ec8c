mod check;

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use cfg_chc::{EncodeOptions, SolverConfig, Z3_TIMEOUT_SECONDS};
use cfg_ir::{Function, Module};
use clap::Parser;
use tracing::{info, trace};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

fn main() -> anyhow::Result<()> {
    initialize_logging();

    let chc_check = ChcCheck::parse();

    match chc_check.subcmd {
        ChcCheckSubcommand::Encode(opts) => encode(opts)?,
        ChcCheckSubcommand::Check(opts) => {
            let module = load_module(&opts.input)?;
            let functions = select_functions(&module, opts.function.as_deref())?;
            let config = check::CheckConfig {
                solver: SolverConfig {
                    executable: opts.z3,
                    timeout_seconds: opts.timeout_seconds,
                },
                options: EncodeOptions::default(),
                target_dir: opts.target_dir,
            };
            check::run_check(&functions, &config, opts.json)?;
        }
    }

    Ok(())
}

fn encode(opts: EncodeOpts) -> anyhow::Result<()> {
    let module = load_module(&opts.input)?;
    let functions = select_functions(&module, opts.function.as_deref())?;
    let options = EncodeOptions {
        label_rules: !opts.no_labels,
    };

    let mut out = String::new();
    for function in functions {
        let smt = cfg_chc::function_to_smt(function, &options)
            .with_context(|| format!("Failed to encode function ${}", function.name))?;
        out.push_str(&format!("; function ${}\n", function.name));
        out.push_str(&smt);
        out.push('\n');
    }

    if let Some(output_path) = opts.output {
        std::fs::write(&output_path, out)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        info!(output_path = %output_path.display(), "HORN script written");
    } else {
        print!("{out}");
    }
    Ok(())
}

fn load_module(path: &Path) -> anyhow::Result<Module> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    trace!(source_len = source.len(), "Read input file");

    let module: Module = serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse CFG module {}", path.display()))?;
    info!(path = %path.display(), functions = module.functions.len(), "Loaded CFG module");
    Ok(module)
}

fn select_functions<'m>(
    module: &'m Module,
    name: Option<&str>,
) -> anyhow::Result<Vec<&'m Function>> {
    match name {
        Some(name) => module
            .function(name)
            .map(|function| vec![function])
            .ok_or_else(|| anyhow::anyhow!("no function named ${name} in module")),
        None if module.functions.is_empty() => Err(anyhow::anyhow!("module has no functions")),
        None => Ok(module.functions.iter().collect()),
    }
}

fn initialize_logging() {
    let env_filter = env::var("RUST_LOG").unwrap_or_default();

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(EnvFilter::from_str(&env_filter).unwrap_or_default()))
        .init();
}

/// Checks that assertions in SSA control-flow graphs can never fail.
#[derive(clap::Parser)]
#[clap(name = "chc-check")]
struct ChcCheck {
    #[clap(subcommand)]
    subcmd: ChcCheckSubcommand,
}

#[derive(clap::Subcommand)]
enum ChcCheckSubcommand {
    /// Print the HORN script of every function
    Encode(EncodeOpts),
    /// Solve every assertion-failure query with z3
    Check(CheckOpts),
}

#[derive(clap::Parser)]
struct EncodeOpts {
    /// CFG module in JSON form
    input: PathBuf,
    /// Only encode this function
    #[clap(long)]
    function: Option<String>,
    /// Write the script here instead of stdout
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Do not name rules
    #[clap(long)]
    no_labels: bool,
}

#[derive(clap::Parser)]
struct CheckOpts {
    /// CFG module in JSON form
    input: PathBuf,
    /// Only check this function
    #[clap(long)]
    function: Option<String>,
    /// z3 executable
    #[clap(long, default_value = "z3")]
    z3: PathBuf,
    #[clap(long, default_value_t = Z3_TIMEOUT_SECONDS)]
    timeout_seconds: u64,
    /// Scripts are written to `<target-dir>/chc-check/<function>/`
    #[clap(long, default_value = "target")]
    target_dir: PathBuf,
    /// Print a JSON report after the verdict lines
    #[clap(long)]
    json: bool,
}

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use linqsql::config::{DialectKind, ModelConfig};
use linqsql::expr::Expr;
use linqsql::model::ModelRegistry;
use linqsql::render;
use linqsql::Translator;

/// Compile a LINQ expression tree into SQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Model file (defaults to the user config directory's linqsql/model.toml)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Target dialect: sqlserver or postgres. Overrides the model file
    #[arg(long)]
    dialect: Option<DialectKind>,

    /// Skip the expression rewrites that run before conversion
    #[arg(long)]
    no_preprocess: bool,

    /// Log translation decisions to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Expression tree as JSON, or `-` to read stdin
    query: String,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    // RUST_LOG wins over --verbose
    let fallback = if verbose { "linqsql=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_query(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading expression tree from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).with_context(|| format!("reading expression tree {source}"))
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.model {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig::load_default()?,
    };
    let mut options = config.options;
    if let Some(dialect) = cli.dialect {
        options.dialect = dialect;
    }
    if cli.no_preprocess {
        options.preprocess = false;
    }

    let registry = ModelRegistry::from_config(&config).context("loading model")?;
    let source = read_query(&cli.query)?;
    let expr: Expr = serde_json::from_str(&source).context("parsing expression tree")?;

    let rendered = Translator::new(&registry)
        .with_options(options)
        .translate_to_sql(&expr)
        .context("translating query")?;

    println!("{}", rendered.sql);
    let dialect = render::dialect(options.dialect);
    for (i, parameter) in rendered.parameters.iter().enumerate() {
        println!(
            "-- {} = {}",
            dialect.parameter(&parameter.name, i + 1),
            serde_json::to_string(&parameter.value)?
        );
    }
    Ok(())
}

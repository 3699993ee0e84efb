mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sqlchain::{ChainConfig, CompileStyle, RenderMethod, Session, StaticWarehouse};
use sqlchain_export::{write_sql_file, DbtExporter};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::pipeline::Pipeline;

const USAGE: &str = "\
Usage:
  sqlchain compile <pipeline.yaml> [--schemas <catalog.yaml>] [--config <config.yaml>]
                   [--style cte|nested] [--views] [--out <file.sql>] [--dbt <dir>]
  sqlchain transforms [--config <config.yaml>]
  sqlchain define <transform> [--config <config.yaml>]";

#[derive(Debug, Default)]
struct CompileArgs {
    pipeline: Option<PathBuf>,
    schemas: Option<PathBuf>,
    style: Option<CompileStyle>,
    views: bool,
    out: Option<PathBuf>,
    dbt: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Logs go to stderr so compiled SQL on stdout stays pipeable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let mut config_path: Option<PathBuf> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut compile = CompileArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => config_path = Some(PathBuf::from(value_of(&arg, args.next())?)),
            "--schemas" | "-s" => compile.schemas = Some(PathBuf::from(value_of(&arg, args.next())?)),
            "--style" => compile.style = Some(value_of(&arg, args.next())?.parse()?),
            "--views" => compile.views = true,
            "--out" | "-o" => compile.out = Some(PathBuf::from(value_of(&arg, args.next())?)),
            "--dbt" => compile.dbt = Some(PathBuf::from(value_of(&arg, args.next())?)),
            "--help" | "-h" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other if other.starts_with('-') => bail!("Unknown option {}\n{}", other, USAGE),
            other => positional.push(other.to_string()),
        }
    }

    let config = load_config(config_path)?;

    match command.as_str() {
        "compile" => {
            compile.pipeline = positional.first().map(PathBuf::from);
            run_compile(config, compile)
        }
        "transforms" => {
            let session = Session::new(Arc::new(StaticWarehouse::new()), config)?;
            for signature in session.list_transforms() {
                println!("{}", signature);
            }
            Ok(())
        }
        "define" => {
            let Some(name) = positional.first() else {
                bail!("define needs a transform name\n{}", USAGE);
            };
            let session = Session::new(Arc::new(StaticWarehouse::new()), config)?;
            println!("{}", session.define_transform(name)?);
            Ok(())
        }
        "--help" | "-h" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command {}\n{}", other, USAGE),
    }
}

fn value_of(flag: &str, value: Option<String>) -> Result<String> {
    value.with_context(|| format!("{} needs a value", flag))
}

/// `--config`, then `SQLCHAIN_CONFIG`, then `~/.config/sqlchain/config.yaml`.
fn load_config(explicit: Option<PathBuf>) -> Result<ChainConfig> {
    let path = explicit
        .or_else(|| std::env::var_os("SQLCHAIN_CONFIG").map(PathBuf::from))
        .or_else(|| {
            let mut path = PathBuf::from(std::env::var_os("HOME")?);
            path.push(".config");
            path.push("sqlchain");
            path.push("config.yaml");
            path.exists().then_some(path)
        });

    match path {
        Some(path) => {
            info!("Using config {}", path.display());
            ChainConfig::load_from_file(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(ChainConfig::default()),
    }
}

fn load_warehouse(schemas: Option<&Path>) -> Result<StaticWarehouse> {
    match schemas {
        Some(path) => StaticWarehouse::load_from_file(path)
            .with_context(|| format!("Failed to load schema catalog {}", path.display())),
        None => Ok(StaticWarehouse::new()),
    }
}

fn run_compile(mut config: ChainConfig, args: CompileArgs) -> Result<()> {
    let Some(pipeline_path) = args.pipeline else {
        bail!("compile needs a pipeline file\n{}", USAGE);
    };
    if let Some(style) = args.style {
        config.compile_style = style;
    }

    let warehouse = Arc::new(load_warehouse(args.schemas.as_deref())?);
    let session = Session::new(warehouse, config)?;
    let pipeline = Pipeline::load_from_file(&pipeline_path)?;
    let chain = pipeline.build(&session)?;

    if let Some(dir) = &args.dbt {
        let export = DbtExporter::new()
            .materialized("view")
            .export_chain(session.composer(), &chain, dir)?;
        info!(
            "Wrote {} dbt models and {}",
            export.models.len(),
            export.schema_file.display()
        );
    }

    if args.views {
        println!("{}", session.sql(&chain, RenderMethod::Views)?);
        return Ok(());
    }

    let compiled = session.compile(&chain)?;
    match &args.out {
        Some(out) => write_sql_file(&compiled, out)?,
        None => println!("{}", compiled.sql),
    }
    Ok(())
}

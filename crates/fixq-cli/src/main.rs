//! fixq CLI
//!
//! - `fixq invert <file> <query>`: print the query with its recursive
//!   predicate replaced by a fixpoint generator, or why that is not possible
//! - `fixq run <file> <query>`: evaluate the query, inverting first unless
//!   `--no-invert` is given

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use fixq_dsl::digest::expr_digest;
use fixq_dsl::{parse_expr, parse_program, Expr, Program};
use fixq_eval::{EvalConfig, Evaluator};
use fixq_invert::{InvertConfig, PredicateInverter};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fixq")]
#[command(author, version, about = "fixq: fixpoint inversion of recursive query predicates")]
struct Cli {
    /// Raise log verbosity (`-v` debug, `-vv` trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a query's recursive predicate into a fixpoint generator.
    Invert {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Evaluate a query against a program.
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Evaluate the query as written (enumerate-and-filter).
        #[arg(long)]
        no_invert: bool,

        /// Inclusive integer range `lo..hi` scanned by unbounded scans.
        #[arg(long, value_name = "LO..HI")]
        extent: Option<String>,

        /// Supply a runtime-only `val`: `name=expr`. Repeatable.
        #[arg(long = "bind", value_name = "NAME=EXPR")]
        bindings: Vec<String>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Program file (`val` and `fun` declarations).
    file: PathBuf,

    /// Query expression, e.g. `from p where path p`.
    query: String,

    /// Inversion settings (JSON file).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print a JSON object instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Invert { common } => cmd_invert(&common),
        Commands::Run {
            common,
            no_invert,
            extent,
            bindings,
        } => cmd_run(&common, no_invert, extent.as_deref(), &bindings),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_invert(common: &CommonArgs) -> Result<()> {
    let (program, query, config) = load(common)?;
    let inverter = PredicateInverter::with_config(&program, config);

    match inverter.rewrite(&query) {
        Ok(rewritten) if common.json => {
            let out = json!({
                "invertible": true,
                "query": rewritten.to_string(),
                "plan_digest": expr_digest(&rewritten),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Ok(rewritten) => println!("{} {rewritten}", "inverted".green().bold()),
        Err(err) if common.json => {
            let out = json!({
                "invertible": false,
                "reason": err.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Err(err) => println!("{} {err}", "not invertible:".yellow().bold()),
    }
    Ok(())
}

fn cmd_run(common: &CommonArgs, no_invert: bool, extent: Option<&str>, bindings: &[String]) -> Result<()> {
    let (program, query, config) = load(common)?;

    let mut eval_config = EvalConfig::default();
    if let Some(text) = extent {
        let (lo, hi) = parse_extent(text)?;
        eval_config = eval_config.with_int_extent(lo, hi);
    }
    let mut evaluator = Evaluator::new(&program, eval_config).context("loading program")?;
    for binding in bindings {
        let (name, expr) = parse_binding(binding)?;
        let value = evaluator
            .eval(&expr)
            .with_context(|| format!("evaluating --bind {name}"))?;
        debug!(name = %name, value = %value, "bound");
        evaluator.bind(name, value);
    }

    let (plan, inverted) = if no_invert {
        (query, false)
    } else {
        match PredicateInverter::with_config(&program, config).rewrite(&query) {
            Ok(rewritten) => (rewritten, true),
            Err(err) => {
                warn!(reason = %err, "falling back to enumerate-and-filter");
                (query, false)
            }
        }
    };
    let value = evaluator
        .eval(&plan)
        .with_context(|| format!("evaluating `{plan}`"))?;

    if common.json {
        let out = json!({
            "inverted": inverted,
            "plan": plan.to_string(),
            "plan_digest": expr_digest(&plan),
            "result": value.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        if inverted {
            eprintln!("{} {plan}", "plan".cyan().bold());
        }
        println!("{value}");
    }
    Ok(())
}

// ============================================================================
// Input
// ============================================================================

fn load(common: &CommonArgs) -> Result<(Program, Expr, InvertConfig)> {
    let text = fs::read_to_string(&common.file)
        .with_context(|| format!("reading {}", common.file.display()))?;
    let program = parse_program(&text).with_context(|| format!("parsing {}", common.file.display()))?;
    let query = parse_expr(&common.query).context("parsing query")?;
    let config = match &common.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            InvertConfig::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => InvertConfig::default(),
    };
    Ok((program, query, config))
}

fn parse_extent(text: &str) -> Result<(i64, i64)> {
    let (lo, hi) = text
        .split_once("..")
        .ok_or_else(|| anyhow!("extent `{text}` is not of the form LO..HI"))?;
    let lo: i64 = lo.trim().parse().with_context(|| format!("extent lower bound `{lo}`"))?;
    let hi: i64 = hi.trim().parse().with_context(|| format!("extent upper bound `{hi}`"))?;
    if lo > hi {
        bail!("extent `{text}` is empty");
    }
    Ok((lo, hi))
}

fn parse_binding(text: &str) -> Result<(String, Expr)> {
    let (name, expr) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("binding `{text}` is not of the form NAME=EXPR"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("binding `{text}` has no name");
    }
    let expr = parse_expr(expr).with_context(|| format!("parsing value of `{name}`"))?;
    Ok((name.to_string(), expr))
}

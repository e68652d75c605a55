//! formcalc CLI - evaluate form formulas and resolve saved submissions

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formcalc::prelude::*;
use formcalc::{cell_ref_to_indexes, evaluate_formula_outcome, TableScope};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "formcalc")]
#[command(author, version, about = "Form formula evaluation tool")]
struct Cli {
    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single formula
    Eval {
        /// Formula text (`=` prefix; anything else is returned unchanged)
        formula: String,

        /// JSON object of field values
        #[arg(long)]
        values: Option<PathBuf>,

        /// Evaluate inside this table field, so bare cell references resolve
        #[arg(long)]
        table: Option<String>,
    },

    /// Resolve every table formula of a saved submission
    Resolve {
        /// JSON object of field values
        values: PathBuf,

        /// Use the legacy fixed number of passes instead of dependency order
        #[arg(long)]
        passes: Option<usize>,
    },

    /// Mount a form, apply edits and print the resulting values
    Session {
        /// JSON array of form elements
        form: PathBuf,

        /// JSON object of saved field values
        #[arg(long)]
        values: Option<PathBuf>,

        /// Field value to type in, in order (repeatable)
        #[arg(long = "set", value_name = "ID=VALUE")]
        set: Vec<String>,
    },

    /// Show the row and column of cell references
    Cell {
        /// References such as A1 or ab12
        #[arg(required = true)]
        references: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let output = match cli.command {
        Commands::Eval {
            formula,
            values,
            table,
        } => eval(&formula, values.as_deref(), table.as_deref())?,
        Commands::Resolve { values, passes } => resolve(&values, passes)?,
        Commands::Session { form, values, set } => session(&form, values.as_deref(), &set)?,
        Commands::Cell { references } => cells(&references),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to write output")?
    );
    Ok(())
}

/// Read a JSON object of field values; non-string values are stored as their JSON text
fn read_values(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let raw: BTreeMap<String, Value> = serde_json::from_str(&text)
        .with_context(|| format!("'{}' is not a JSON object of field values", path.display()))?;

    Ok(raw
        .into_iter()
        .map(|(id, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (id, value)
        })
        .collect())
}

fn eval(formula: &str, values: Option<&Path>, table: Option<&str>) -> Result<Value> {
    let values = match values {
        Some(path) => read_values(path)?,
        None => BTreeMap::new(),
    };

    let scope_table = match table {
        Some(id) => {
            let text = values
                .get(id)
                .with_context(|| format!("No value for table field '{}'", id))?;
            Some(
                Table::from_json(text)
                    .with_context(|| format!("Field '{}' is not a table", id))?,
            )
        }
        None => None,
    };

    let mut ctx = EvaluationContext::new(&values);
    if let (Some(id), Some(raw)) = (table, scope_table.as_ref()) {
        ctx = ctx.with_table(TableScope::for_field(id, raw));
    }

    let outcome = evaluate_formula_outcome(formula, &ctx);
    Ok(json!({
        "formula": formula,
        "result": outcome.to_string(),
        "error": outcome.error().map(|e| e.to_string()),
    }))
}

fn resolve(values: &Path, passes: Option<usize>) -> Result<Value> {
    let values = read_values(values)?;
    let options = match passes {
        Some(n) => CalculationOptions {
            strategy: ResolveStrategy::FixedPasses(n),
            ..Default::default()
        },
        None => CalculationOptions::default(),
    };

    let resolution = resolve_form_values(values, &options);
    let stats = &resolution.stats;
    eprintln!(
        "Resolved {} formulas ({} circular, {} errors)",
        stats.formula_count, stats.circular_references, stats.errors
    );

    Ok(json!(resolution.values))
}

fn session(form: &Path, values: Option<&Path>, edits: &[String]) -> Result<Value> {
    let text = std::fs::read_to_string(form)
        .with_context(|| format!("Failed to read '{}'", form.display()))?;
    let elements =
        parse_form(&text).with_context(|| format!("Failed to parse '{}'", form.display()))?;
    let defaults = match values {
        Some(path) => read_values(path)?,
        None => BTreeMap::new(),
    };

    let session = FormSession::new(&elements, &defaults).context("Failed to mount form")?;
    for edit in edits {
        let Some((id, value)) = edit.split_once('=') else {
            bail!("Expected ID=VALUE, got '{}'", edit);
        };
        log::info!("set {} = {:?}", id, value);
        session.set_value(id, value);
    }

    let live: BTreeMap<String, String> = session
        .store()
        .get_values()
        .iter()
        .map(|(id, value)| (id.clone(), value.clone()))
        .collect();
    let resolution = session.resolve_for_submission();

    Ok(json!({
        "values": live,
        "submitted": session.submitted(),
        "resolved": resolution.values,
    }))
}

fn cells(references: &[String]) -> Value {
    references
        .iter()
        .map(|reference| match cell_ref_to_indexes(reference) {
            Some(idx) => json!({
                "reference": reference,
                "row": idx.row,
                "col": idx.col,
                "canonical": idx.to_string(),
            }),
            None => json!({ "reference": reference, "error": "not a cell reference" }),
        })
        .collect()
}

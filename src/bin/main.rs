//! Unireport CLI - Run report recipes against a store snapshot
//!
//! Usage:
//!   unireport run <recipe> --data <snapshot.json> --org <id> [--param k=v]... [--format f]
//!   unireport list [--config unireport.toml]
//!   unireport validate <recipes.toml|recipes.json|dir>
//!
//! Examples:
//!   unireport run trial_balance --data demo.json --org acme --format csv
//!   unireport run account_balance_tree --data demo.json --org acme --param date_to=2024-12-31
//!   unireport validate ./recipes

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use unireport::config::Settings;
use unireport::format::PresentationFormatter;
use unireport::primitives::PrimitiveRegistry;
use unireport::recipe::{load_path, ParameterBag};
use unireport::store::InMemoryStore;
use unireport::{ExecuteOptions, ExecutionContext, FormattedOutput, ReportEngine};

#[derive(Parser)]
#[command(name = "unireport")]
#[command(about = "Unireport - A recipe-driven report engine over a generic entity store")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $UNIREPORT_CONFIG or ./unireport.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a recipe and print its output
    Run {
        /// Recipe name
        recipe: String,

        /// JSON store snapshot to read entities and transactions from
        #[arg(short, long)]
        data: PathBuf,

        /// Organization the report runs for
        #[arg(short, long)]
        org: String,

        /// Recipe parameter as key=value (value parsed as JSON when possible)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Output format: json, table, csv, excel, pdf
        #[arg(short, long)]
        format: Option<String>,

        #[arg(long)]
        locale: Option<String>,

        #[arg(long)]
        currency: Option<String>,
    },

    /// List available recipes
    List,

    /// Validate a recipe file or directory without running it
    Validate {
        /// Path to a .toml/.json recipe file or a directory of them
        path: PathBuf,
    },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, String> {
    let settings = match path {
        Some(path) => Settings::load(path),
        None => Settings::discover(),
    };
    settings.map_err(|e| e.to_string())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings);

    match cli.command {
        Commands::Run {
            recipe,
            data,
            org,
            params,
            format,
            locale,
            currency,
        } => {
            let options = ExecuteOptions {
                format,
                locale,
                currency,
                ..ExecuteOptions::default()
            };
            cmd_run(&settings, &recipe, data, org, params, options).await
        }
        Commands::List => cmd_list(&settings),
        Commands::Validate { path } => cmd_validate(path),
    }
}

async fn cmd_run(
    settings: &Settings,
    recipe: &str,
    data: PathBuf,
    org: String,
    params: Vec<(String, Value)>,
    options: ExecuteOptions,
) -> ExitCode {
    let store = match InMemoryStore::load(&data) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error reading snapshot '{}': {}", data.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match ReportEngine::from_settings(Arc::new(store), settings) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let parameters: ParameterBag = params.into_iter().collect();
    let ctx = ExecutionContext::new(org);

    match engine.execute_recipe(&ctx, recipe, &parameters, &options).await {
        Ok(output) => match print_output(&output) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error writing output: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error [{}]: {}", e.kind().as_str(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_output(output: &FormattedOutput) -> Result<(), serde_json::Error> {
    match output {
        FormattedOutput::Csv(text) => print!("{}", text),
        FormattedOutput::Pdf(doc) => {
            for line in &doc.lines {
                println!("{}", line);
            }
        }
        FormattedOutput::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
        FormattedOutput::Table(table) => println!("{}", serde_json::to_string_pretty(table)?),
        FormattedOutput::Excel(workbook) => {
            println!("{}", serde_json::to_string_pretty(workbook)?)
        }
    }
    Ok(())
}

fn cmd_list(settings: &Settings) -> ExitCode {
    let engine = match ReportEngine::from_settings(Arc::new(InMemoryStore::new()), settings) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let recipes = engine.available_recipes();
    if recipes.is_empty() {
        println!("No recipes registered.");
        return ExitCode::SUCCESS;
    }

    println!("Recipes:");
    for recipe in &recipes {
        match &recipe.description {
            Some(description) => println!("  - {} ({})", recipe.name, description),
            None => println!("  - {}", recipe.name),
        }
        for param in &recipe.parameters {
            let mut line = format!("      {}: {}", param.name, param.kind.as_str());
            if param.required {
                line.push_str(" (required)");
            }
            if let Some(default) = &param.default {
                line.push_str(&format!(" = {}", default));
            }
            println!("{}", line);
        }
    }

    ExitCode::SUCCESS
}

fn cmd_validate(path: PathBuf) -> ExitCode {
    let recipes = match load_path(&path) {
        Ok(recipes) => recipes,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let primitives = PrimitiveRegistry::with_defaults(PresentationFormatter::default());
    let mut failed = false;
    for recipe in &recipes {
        match recipe.validate(&primitives) {
            Ok(()) => {
                let implicit = recipe.implicit_parameters();
                if implicit.is_empty() {
                    println!("OK: {}", recipe.name);
                } else {
                    println!("OK: {} (undeclared parameters: {})", recipe.name, implicit.join(", "));
                }
            }
            Err(e) => {
                eprintln!("Invalid: {}", e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        println!("{} recipe(s) valid in {}", recipes.len(), path.display());
        ExitCode::SUCCESS
    }
}

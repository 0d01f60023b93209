//! restsql: run legacy SQL against a PostgREST backend
//!
//! # Usage
//!
//! ```bash
//! # Show how a statement translates (no network)
//! restsql explain "SELECT * FROM subscriptions WHERE user_id = ?" --bind 7
//!
//! # Execute through the driver contract
//! restsql all "SELECT name, amount FROM subscriptions WHERE user_id = $1" --bind 7
//! restsql run "UPDATE subscriptions SET active = ? WHERE id = ?" --bind false,3
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use restsql::binding::BindingMode;
use restsql::lexer::tokenize;
use restsql::prelude::*;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "restsql")]
#[command(version)]
#[command(about = "Run legacy SQL against a PostgREST backend", long_about = None)]
#[command(after_help = "EXAMPLES:
    restsql explain 'SELECT * FROM users WHERE id = ?' --bind 42
    restsql get 'SELECT email FROM users WHERE id = $1' --bind 42
    restsql run 'DELETE FROM sessions WHERE user_id = ?' --bind 7")]
struct Cli {
    /// Config file (default: <config dir>/restsql/config.toml)
    #[arg(short, long, env = "RESTSQL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SqlArgs {
    /// The SQL statement
    sql: String,

    /// Parameter bindings, in placeholder order
    #[arg(short, long, value_delimiter = ',')]
    bind: Vec<String>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a statement and show the request it becomes
    Explain(SqlArgs),
    /// Fetch the first matching row
    Get {
        #[command(flatten)]
        statement: SqlArgs,
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Fetch every matching row
    All {
        #[command(flatten)]
        statement: SqlArgs,
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Execute a write and show its result context
    Run(SqlArgs),
    /// List the aggregate recompute recipes
    Recipes,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .with_overrides(|key| std::env::var(key).ok()),
        None => BridgeConfig::discover()?,
    };
    init_logging(&config.logging.filter);

    match cli.command {
        Commands::Explain(stmt) => explain(&stmt.sql, &bindings(&stmt.bind)),
        Commands::Recipes => {
            show_recipes(&AggregateRegistry::new());
            Ok(())
        }
        Commands::Get { statement, format } => {
            let db = connect(&config)?;
            let mut outcome = Ok(Vec::new());
            db.get(&statement.sql, &bindings(&statement.bind), |err, row| {
                outcome = match err {
                    Some(e) => Err(e),
                    None => Ok(row.into_iter().collect()),
                };
            })
            .await;
            format_output(&outcome?, &format);
            Ok(())
        }
        Commands::All { statement, format } => {
            let db = connect(&config)?;
            let mut outcome = Ok(Vec::new());
            db.all(&statement.sql, &bindings(&statement.bind), |err, rows| {
                outcome = match err {
                    Some(e) => Err(e),
                    None => Ok(rows.unwrap_or_default()),
                };
            })
            .await;
            format_output(&outcome?, &format);
            Ok(())
        }
        Commands::Run(statement) => {
            let db = connect(&config)?;
            let mut outcome = Ok(ResultContext::default());
            db.run(&statement.sql, &bindings(&statement.bind), |ctx, err| {
                outcome = match err {
                    Some(e) => Err(e),
                    None => Ok(ctx.clone()),
                };
            })
            .await;
            let ctx = outcome?;
            println!(
                "{} {} row(s) changed, lastID = {}",
                "✓".green(),
                ctx.changes.to_string().cyan(),
                ctx.last_id.as_ref().map_or("NULL".to_string(), val_to_string)
            );
            Ok(())
        }
    }
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connect(config: &BridgeConfig) -> Result<Database<RestService>> {
    config.validate()?;
    let service = RestService::new(&config.rest)?;
    let bridge = Bridge::new(service).with_key_column(&config.rest.key_column);
    Ok(Database::from_bridge(bridge))
}

/// Integers, floats, booleans and `null` are typed; anything else is text.
fn bindings(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|b| {
            if let Ok(n) = b.parse::<i64>() {
                Value::from(n)
            } else if let Ok(f) = b.parse::<f64>() {
                Value::from(f)
            } else {
                match b.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => Value::String(b.clone()),
                }
            }
        })
        .collect()
}

fn format_output(rows: &[Row], format: &OutputFormat) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default());
        }
        OutputFormat::Table => {
            let columns: Vec<&String> = rows[0].keys().collect();
            let widths: Vec<usize> = columns
                .iter()
                .map(|c| {
                    rows.iter()
                        .filter_map(|r| r.get(*c))
                        .map(|v| val_to_string(v).len())
                        .fold(c.len(), usize::max)
                })
                .collect();

            let header: Vec<String> = columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:width$}", c, width = *w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in rows {
                let cells: Vec<String> = columns
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| {
                        let val = row.get(*c).map(val_to_string).unwrap_or_default();
                        format!("{:width$}", val, width = *w)
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
        }
    }
}

fn val_to_string(val: &Value) -> String {
    match val {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        _ => val.to_string(),
    }
}

fn explain(sql: &str, params: &[Value]) -> Result<()> {
    println!("{} {}", "Statement:".dimmed(), sql.yellow());
    let mode = match tokenize(sql) {
        Ok(lexemes) => BindingMode::detect(&lexemes),
        Err(_) => BindingMode::Sequential,
    };
    println!("{} {:?}", "Placeholders:".dimmed(), mode);
    println!("{} {}", "Kind:".dimmed(), restsql::parser::classify(sql).to_string().cyan());
    println!();

    let statement = match restsql::parse(sql, params) {
        Ok(statement) => statement,
        Err(e) => {
            eprintln!("{} {}", "Parse Error:".red().bold(), e);
            return Ok(());
        }
    };

    match statement {
        Statement::Select(descriptor) => {
            print_filters(&descriptor.filters);
            let query = TableQuery::for_descriptor(&descriptor);
            println!("{}", "Request:".green().bold());
            println!("  GET /{}?{}", descriptor.table, query.to_query_string());
        }
        Statement::Insert(assignment) => {
            print_values(&assignment.values);
            println!("{}", "Request:".green().bold());
            println!("  POST /{}", assignment.table);
        }
        Statement::Update(assignment) => {
            print_values(&assignment.values);
            print_filters(&assignment.filters);
            println!("{}", "Request:".green().bold());
            println!(
                "  PATCH /{}?{}",
                assignment.table,
                assignment.filters.to_query_string()
            );
        }
        Statement::Delete { table, filters } => {
            print_filters(&filters);
            println!("{}", "Request:".green().bold());
            println!("  DELETE /{}?{}", table, filters.to_query_string());
        }
        Statement::Aggregate(plan) => {
            println!("{}", "RPC SQL:".green().bold());
            println!("  {}", plan.remote_sql.white());
            let recipe = plan
                .shape
                .as_ref()
                .and_then(|shape| AggregateRegistry::new().find(shape).map(|r| r.id()));
            match recipe {
                Some(id) => println!("{} {}", "Recompute recipe:".dimmed(), id.cyan()),
                None => println!("{}", "No recompute recipe matches".yellow()),
            }
        }
        Statement::SchemaNoop(keyword) => {
            println!("{} {}", keyword.cyan(), "is accepted and ignored".dimmed());
        }
    }
    Ok(())
}

fn print_values(values: &Row) {
    println!("{}", "Values:".dimmed());
    for (column, value) in values {
        println!("  {} = {}", column.white(), val_to_string(value).yellow());
    }
}

fn print_filters(filters: &[Filter]) {
    if filters.is_empty() {
        return;
    }
    println!("{}", "Filters:".dimmed());
    for filter in filters {
        println!("  {}", filter.to_string().white());
    }
}

fn show_recipes(registry: &AggregateRegistry) {
    println!(
        "{:16} {:9} {}",
        "Recipe".white().bold(),
        "Priority".white().bold(),
        "Description".white().bold()
    );
    println!("{}", "─".repeat(72).dimmed());
    for recipe in registry.iter() {
        println!(
            "{:16} {:9} {}",
            recipe.id().cyan().bold(),
            recipe.priority(),
            recipe.description().dimmed()
        );
    }
}

use clap::{Args, Parser, Subcommand};
use querykit::memory::{EvalError, Table};
use querykit::prelude::*;
use querykit::query::combine_named;
use querykit::types::EntityRef;
use std::num::NonZeroU32;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "querykit")]
#[command(about = "Filter and page through a JSON array of rows", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rows where any of the given fields contains the value.
    Search {
        #[command(flatten)]
        rows: RowArgs,

        #[arg(short, long = "field", required = true, help = "Field path, e.g. lines.description")]
        fields: Vec<String>,

        #[arg(short, long, help = "Substring to look for; omitted matches everything")]
        value: Option<String>,
    },
    /// Rows passing every (or any) of the given conditions.
    Filter {
        #[command(flatten)]
        rows: RowArgs,

        #[arg(long = "in", help = "Membership condition: field=v1,v2")]
        members: Vec<String>,

        #[arg(long = "contains", help = "Substring condition: field=value")]
        contains: Vec<String>,

        #[arg(long, default_value = "and", help = "Combinator: and, or")]
        op: String,
    },
}

#[derive(Args)]
pub struct RowArgs {
    #[arg(short, long, help = "Path to a JSON file holding an array of objects")]
    input: PathBuf,

    #[arg(long, default_value = "rows", help = "Entity name used in diagnostics")]
    entity: String,

    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    page: i64,

    #[arg(long, env = "QUERYKIT_PAGE_SIZE", default_value = "20")]
    page_size: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("row {index} is not a JSON object")]
    InvalidRow { index: usize },

    #[error("expected field=value, got {arg:?}")]
    InvalidArgument { arg: String },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            rows,
            fields,
            value,
        } => {
            tracing::info!(fields = fields.len(), "running search");
            let (schema, table) = load(&rows).await?;

            let projections = fields
                .iter()
                .map(|path| FieldProjection::path(schema.clone(), path))
                .collect::<Result<Vec<_>, _>>()?;
            let filter = Filter::from(search_any(value.as_deref(), &projections)?);

            print_page(&table, &filter, &rows)?;
        }
        Commands::Filter {
            rows,
            members,
            contains,
            op,
        } => {
            tracing::info!(
                members = members.len(),
                contains = contains.len(),
                %op,
                "running filter"
            );
            let (schema, table) = load(&rows).await?;

            let mut conditions = Vec::new();
            for arg in &members {
                let (path, values) = split_pair(arg)?;
                let projection = FieldProjection::path(schema.clone(), path)?;
                let set = parse_set(&projection.result_type(), values);
                conditions.push(member_of(Some(&set), &projection)?);
            }
            for arg in &contains {
                let (path, value) = split_pair(arg)?;
                let projection = FieldProjection::path(schema.clone(), path)?;
                conditions.push(search_any(Some(value), &[projection])?);
            }

            let filter = combine_named(&op, conditions)?;

            print_page(&table, &filter, &rows)?;
        }
    }

    Ok(())
}

async fn load(args: &RowArgs) -> Result<(EntityRef, Table<Record>), CliError> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .map_err(|source| CliError::Io {
            path: args.input.clone(),
            source,
        })?;

    let documents: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
    let records = documents
        .into_iter()
        .enumerate()
        .map(|(index, document)| match Value::from(document) {
            Value::Record(record) => Ok(record),
            _ => Err(CliError::InvalidRow { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(rows = records.len(), path = %args.input.display(), "loaded rows");

    let schema = Record::infer_schema(&args.entity, &records).into_ref();
    Ok((schema, Table::new(records)))
}

fn print_page(table: &Table<Record>, filter: &Filter, args: &RowArgs) -> Result<(), CliError> {
    tracing::debug!(%filter, "applying filter");

    let matched = table.filter(filter)?;
    let Ok(page) = paginate(&matched, args.page, args.page_size);

    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

fn split_pair(arg: &str) -> Result<(&str, &str), CliError> {
    arg.split_once('=')
        .filter(|(field, _)| !field.is_empty())
        .ok_or_else(|| CliError::InvalidArgument {
            arg: arg.to_string(),
        })
}

/// Builds a set whose elements match the field's type. Values that do not
/// parse as that type are kept as text.
fn parse_set(ty: &ValueType, values: &str) -> ValueSet {
    let values = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| parse_value(ty, v))
        .collect::<Vec<_>>();
    ValueSet::in_memory(values)
}

fn parse_value(ty: &ValueType, raw: &str) -> Value {
    let parsed = match ty {
        ValueType::Int => raw.parse::<i64>().ok().map(Value::Int),
        ValueType::Float => raw.parse::<f64>().ok().map(Value::Float),
        ValueType::Bool => raw.parse::<bool>().ok().map(Value::Bool),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
}

//! CLI command implementations
//!
//! Each command opens the data file, waits for the load, runs one
//! operation and returns its JSON result. `run_command` prints it.

use serde_json::{json, Value};

use crate::cursor::parse_sort;
use crate::datastore::{Datastore, DatastoreOptions};

use super::args::{Command, Target};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Arguments of `find`
#[derive(Debug, Clone, Default)]
pub struct FindArgs {
    /// Query as JSON
    pub query: String,
    /// Sort list
    pub sort: Option<String>,
    /// Matches to skip
    pub skip: usize,
    /// Maximum number of documents; 0 means no limit
    pub limit: usize,
    /// Projection as JSON
    pub projection: Option<String>,
}

/// Main CLI entry point
///
/// Parses arguments and runs the command on a fresh Tokio runtime.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::io_error(format!("Failed to start runtime: {}", e)))?;
    runtime.block_on(run_command(cli.command))
}

/// Run the appropriate command and print its result
pub async fn run_command(cmd: Command) -> CliResult<()> {
    let result = match cmd {
        Command::Stats { target } => stats(&target).await,
        Command::Compact { target } => compact(&target).await,
        Command::Find {
            target,
            query,
            sort,
            skip,
            limit,
            projection,
        } => {
            let args = FindArgs {
                query,
                sort,
                skip,
                limit,
                projection,
            };
            find(&target, &args).await
        }
        Command::Count { target, query } => count(&target, &query).await,
    };

    match result {
        Ok(data) => write_response(data),
        Err(err) => {
            write_error(err.code_str(), err.message())?;
            Err(err)
        }
    }
}

fn options_for(target: &Target) -> CliResult<DatastoreOptions> {
    let mut options = match &target.config {
        Some(path) => DatastoreOptions::load(path)
            .map_err(|e| CliError::config_error(e.to_string()))?,
        None => DatastoreOptions::default(),
    };
    if let Some(file) = &target.file {
        options.filename = Some(file.clone());
    }
    // A one-shot command never keeps a timer or loads twice
    options.autoload = false;
    options.autocompaction_interval_ms = None;

    if options.is_in_memory() {
        return Err(CliError::config_error(
            "No data file given; pass --file or a --config naming one",
        ));
    }
    options
        .validate()
        .map_err(|e| CliError::config_error(e.to_string()))?;
    Ok(options)
}

fn parse_json(label: &str, raw: &str) -> CliResult<Value> {
    serde_json::from_str(raw)
        .map_err(|e| CliError::invalid_argument(format!("Invalid {} JSON: {}", label, e)))
}

/// Open and load the datastore named by `target`
///
/// Loading compacts the file as a side effect.
pub async fn open(target: &Target) -> CliResult<(Datastore, Value)> {
    let datastore = Datastore::new(options_for(target)?)?;
    let stats = datastore.load_database().await?;
    let summary = json!({
        "total_lines": stats.total_lines,
        "corrupt_lines": stats.corrupt_lines,
        "documents": stats.documents,
        "indexes": stats.indexes,
    });
    Ok((datastore, summary))
}

/// Report line and document counts
pub async fn stats(target: &Target) -> CliResult<Value> {
    let (datastore, mut summary) = open(target).await?;
    let indexes: Vec<String> = datastore
        .indexes()
        .await?
        .into_iter()
        .map(|options| options.field_name)
        .collect();
    summary["index_fields"] = json!(indexes);
    Ok(summary)
}

/// Rewrite the data file to one line per live document
pub async fn compact(target: &Target) -> CliResult<Value> {
    let (datastore, summary) = open(target).await?;
    datastore.compact_datafile().await?;
    let field = |name: &str| summary[name].as_u64().unwrap_or(0);
    let kept = field("documents") + field("indexes");
    Ok(json!({
        "compacted": true,
        "documents": field("documents"),
        "dropped_lines": field("total_lines").saturating_sub(kept),
    }))
}

/// Print documents matching a query
pub async fn find(target: &Target, args: &FindArgs) -> CliResult<Value> {
    let query = parse_json("query", &args.query)?;
    let mut cursor_sort = Vec::new();
    if let Some(list) = &args.sort {
        cursor_sort =
            parse_sort(list).map_err(|e| CliError::invalid_argument(e.message().to_string()))?;
    }
    let projection = match &args.projection {
        Some(raw) => Some(parse_json("projection", raw)?),
        None => None,
    };

    let (datastore, _) = open(target).await?;
    let mut cursor = datastore
        .find(query)
        .sort(cursor_sort)
        .skip(args.skip)
        .limit(args.limit);
    if let Some(projection) = projection {
        cursor = cursor.projection(projection);
    }
    Ok(Value::Array(cursor.exec().await?))
}

/// Print the number of documents matching a query
pub async fn count(target: &Target, query: &str) -> CliResult<Value> {
    let query = parse_json("query", query)?;
    let (datastore, _) = open(target).await?;
    let count = datastore.count(query).await?;
    Ok(json!({ "count": count }))
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_data(dir: &TempDir, lines: &[&str]) -> Target {
        let path = dir.path().join("people.db");
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&path, content).unwrap();
        Target {
            file: Some(path),
            config: None,
        }
    }

    fn line_count(path: &Path) -> usize {
        fs::read_to_string(path).unwrap().lines().count()
    }

    #[tokio::test]
    async fn test_stats_counts_lines() {
        let dir = TempDir::new().unwrap();
        let target = write_data(
            &dir,
            &[r#"{"_id":"a","n":1}"#, r#"{"_id":"a","n":2}"#, r#"{"_id":"b","n":3}"#],
        );
        let summary = stats(&target).await.unwrap();
        assert_eq!(summary["total_lines"], 3);
        assert_eq!(summary["documents"], 2);
        assert_eq!(summary["corrupt_lines"], 0);
    }

    #[tokio::test]
    async fn test_compact_drops_stale_lines() {
        let dir = TempDir::new().unwrap();
        let target = write_data(
            &dir,
            &[
                r#"{"_id":"a","n":1}"#,
                r#"{"_id":"a","n":2}"#,
                r#"{"$$deleted":true,"_id":"a"}"#,
                r#"{"_id":"b","n":3}"#,
            ],
        );
        let result = compact(&target).await.unwrap();
        assert_eq!(result["documents"], 1);
        assert_eq!(result["dropped_lines"], 3);
        assert_eq!(line_count(target.file.as_ref().unwrap()), 1);
    }

    #[tokio::test]
    async fn test_find_with_sort_and_limit() {
        let dir = TempDir::new().unwrap();
        let target = write_data(
            &dir,
            &[
                r#"{"_id":"a","n":1}"#,
                r#"{"_id":"b","n":5}"#,
                r#"{"_id":"c","n":3}"#,
            ],
        );
        let args = FindArgs {
            query: r#"{"n":{"$gt":1}}"#.to_string(),
            sort: Some("-n".to_string()),
            limit: 1,
            projection: Some(r#"{"n":1,"_id":0}"#.to_string()),
            ..Default::default()
        };
        let docs = find(&target, &args).await.unwrap();
        assert_eq!(docs, json!([{"n": 5}]));
    }

    #[tokio::test]
    async fn test_count() {
        let dir = TempDir::new().unwrap();
        let target = write_data(&dir, &[r#"{"_id":"a","n":1}"#, r#"{"_id":"b","n":2}"#]);
        assert_eq!(count(&target, r#"{"n":2}"#).await.unwrap(), json!({"count": 1}));
    }

    #[tokio::test]
    async fn test_bad_query_rejected() {
        let dir = TempDir::new().unwrap();
        let target = write_data(&dir, &[r#"{"_id":"a"}"#]);
        let err = count(&target, "{not json").await.unwrap_err();
        assert_eq!(err.code(), CliErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_missing_file_argument() {
        let err = stats(&Target::default()).await.unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
    }

    #[tokio::test]
    async fn test_config_file_names_data_file() {
        let dir = TempDir::new().unwrap();
        let target = write_data(&dir, &[r#"{"_id":"a"}"#]);
        let config_path = dir.path().join("options.json");
        let config = json!({ "filename": target.file.as_ref().unwrap() });
        fs::write(&config_path, config.to_string()).unwrap();

        let summary = stats(&Target {
            file: None,
            config: Some(config_path),
        })
        .await
        .unwrap();
        assert_eq!(summary["documents"], 1);
    }
}

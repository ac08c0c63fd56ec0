//! CLI command implementations
//!
//! `start` and `query` boot a federated repository whose sources (cache
//! included) are in-memory sources named after the descriptor's
//! projections. Requests arrive as JSON on stdin, tagged by `op`:
//!
//! ```text
//! {"op":"create_node","under":"/content","name":"doc1","properties":{"title":"x"}}
//! {"op":"read_node","at":"/content/doc1"}
//! ```

use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::connector::{InMemoryRepositorySource, SourceRegistry};
use crate::federation::{
    FederatedRepository, FederatedRepositoryConfig, FederatedRepositoryConnection, RepositoryDescriptor,
};
use crate::graph::{ExecutionContext, Path, Request};
use crate::observability::{Logger, Severity};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_request, read_requests, write_error, write_response};

/// How long `start` waits for the repository to drain on exit
const TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    if let Some(level) = &cli.log_level {
        let severity = Severity::parse(level)
            .ok_or_else(|| CliError::invalid_argument(format!("Unknown log level: '{}'", level)))?;
        Logger::set_min_severity(severity);
    }
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Check { config } => check(&config),
        Command::Resolve { config, path } => resolve(&config, &path),
        Command::Start { config } => start(&config),
        Command::Query { config } => query(&config),
    }
}

/// Load and validate a repository descriptor
pub fn load_config(config_path: &FsPath) -> CliResult<FederatedRepositoryConfig> {
    let descriptor = RepositoryDescriptor::load(config_path)?;
    Ok(FederatedRepositoryConfig::from_descriptor(&descriptor)?)
}

/// Validate the descriptor and print what was found
pub fn check(config_path: &FsPath) -> CliResult<()> {
    let config = load_config(config_path)?;
    write_response(check_report(&config))
}

pub fn check_report(config: &FederatedRepositoryConfig) -> Value {
    json!({
        "name": config.name(),
        "cache": config.cache_projection().to_string(),
        "sources": config
            .source_projections()
            .iter()
            .map(|projection| projection.to_string())
            .collect::<Vec<_>>(),
        "locking": config.lock_settings(),
        "problems": config.problems().snapshot(),
    })
}

/// Print the projections covering a federated path
pub fn resolve(config_path: &FsPath, path: &str) -> CliResult<()> {
    let config = load_config(config_path)?;
    write_response(resolve_report(&config, path)?)
}

pub fn resolve_report(config: &FederatedRepositoryConfig, path: &str) -> CliResult<Value> {
    let path = Path::parse(path).map_err(|e| CliError::invalid_argument(e.to_string()))?;
    let projections: Vec<Value> = config
        .resolve_projections(&path)
        .into_iter()
        .map(|projection| {
            json!({
                "source": projection.source_name(),
                "workspace": projection.workspace(),
                "read_only": projection.is_read_only(),
                "paths_in_source": projection.paths_in_source(&path),
            })
        })
        .collect();
    Ok(json!({
        "path": path,
        "cache": config.cache_projection().paths_in_source(&path),
        "projections": projections,
    }))
}

/// Boot, serve stdin until EOF, then shut down and drain
pub fn start(config_path: &FsPath) -> CliResult<()> {
    let repository = boot(load_config(config_path)?)?;
    let mut connection = repository.create_connection(repository.name(), None)?;

    for request_result in read_requests() {
        match request_result {
            Ok(value) => execute_one(&mut connection, value)?,
            Err(e) => {
                // I/O error reading - this is fatal
                write_error(e.code_str(), e.message())?;
                break;
            }
        }
    }

    connection.close();
    repository.shutdown();
    if !repository.await_termination(TERMINATION_TIMEOUT) {
        return Err(CliError::boot_failed("Repository did not terminate in time"));
    }
    Ok(())
}

/// Execute a single request from stdin and exit
pub fn query(config_path: &FsPath) -> CliResult<()> {
    let repository = boot(load_config(config_path)?)?;
    let mut connection = repository.create_connection(repository.name(), None)?;
    let value = read_request()?;
    execute_one(&mut connection, value)?;
    connection.close();
    repository.shutdown();
    Ok(())
}

/// Start a repository over fresh in-memory sources, one per projected source
pub fn boot(config: FederatedRepositoryConfig) -> CliResult<Arc<FederatedRepository>> {
    let registry = Arc::new(SourceRegistry::new());

    let mut names = vec![config.cache_projection().source_name().to_string()];
    names.extend(config.source_names().into_iter().map(String::from));
    for name in names {
        if registry.get(&name).is_some() {
            continue;
        }
        let mut source = InMemoryRepositorySource::new(name.as_str());
        if let Some(settings) = config.source_lock_settings(&name) {
            source = source.with_locking(settings.clone());
        }
        registry.register(Arc::new(source));
    }

    let repository = FederatedRepository::new(config, registry);
    repository.start()?;
    Ok(repository)
}

/// Parse, execute and answer one request; request-level failures are
/// answered on stdout and do not end the session
pub fn execute_one(connection: &mut FederatedRepositoryConnection, value: Value) -> CliResult<()> {
    let mut request: Request = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => return write_error("FED_CLI_INVALID_REQUEST", &e.to_string()),
    };

    let context = ExecutionContext::anonymous();
    match connection.execute(&context, &mut request) {
        Ok(()) => write_response(request_report(&request)),
        Err(err) => write_error(err.code(), &err.to_string()),
    }
}

/// The processed request with its recorded outcome
pub fn request_report(request: &Request) -> Value {
    json!({
        "request": request,
        "error": request.error().map(|error| json!({
            "code": error.code(),
            "message": error.to_string(),
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(temp_dir: &TempDir, descriptor: Value) -> std::path::PathBuf {
        let config_path = temp_dir.path().join("aerofed.json");
        fs::write(&config_path, descriptor.to_string()).unwrap();
        config_path
    }

    fn descriptor() -> Value {
        json!({
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [
                {"source": "docs", "rules": ["/content => /"]},
                {"source": "archive", "rules": ["/archive => /old"], "read_only": true}
            ]
        })
    }

    #[test]
    fn test_check_report_lists_projections() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(&write_config(&temp_dir, descriptor())).unwrap();

        let report = check_report(&config);
        assert_eq!(report["name"], json!("fed"));
        assert_eq!(report["sources"].as_array().unwrap().len(), 2);
        assert!(report["problems"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_missing_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_config(&temp_dir.path().join("absent.json"));
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_unusable_descriptor_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, json!({"name": "fed", "sources": []}));
        let result = load_config(&path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_resolve_report() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(&write_config(&temp_dir, descriptor())).unwrap();

        let report = resolve_report(&config, "/archive/2020").unwrap();
        assert_eq!(report["projections"][0]["source"], json!("archive"));
        assert_eq!(report["projections"][0]["read_only"], json!(true));
        assert_eq!(report["projections"][0]["paths_in_source"], json!(["/old/2020"]));

        let outside = resolve_report(&config, "/nowhere").unwrap();
        assert!(outside["projections"].as_array().unwrap().is_empty());

        let invalid = resolve_report(&config, "relative");
        assert_eq!(invalid.unwrap_err().code(), &CliErrorCode::InvalidArgument);
    }

    #[test]
    fn test_boot_and_execute() {
        let temp_dir = TempDir::new().unwrap();
        let repository = boot(load_config(&write_config(&temp_dir, descriptor())).unwrap()).unwrap();
        let mut connection = repository.create_connection("fed", None).unwrap();

        let mut create: Request = serde_json::from_value(json!({
            "op": "create_node",
            "under": "/content",
            "name": "doc1",
            "properties": {"title": "hello"}
        }))
        .unwrap();
        connection
            .execute(&ExecutionContext::anonymous(), &mut create)
            .unwrap();

        let mut read: Request = serde_json::from_value(json!({"op": "read_node", "at": "/content/doc1"})).unwrap();
        connection
            .execute(&ExecutionContext::anonymous(), &mut read)
            .unwrap();
        let report = request_report(&read);
        assert_eq!(report["request"]["properties"]["title"], json!("hello"));
        assert_eq!(report["error"], Value::Null);

        let mut missing: Request = serde_json::from_value(json!({"op": "read_node", "at": "/content/nope"})).unwrap();
        connection
            .execute(&ExecutionContext::anonymous(), &mut missing)
            .unwrap();
        assert_eq!(request_report(&missing)["error"]["code"], json!("GRAPH_PATH_NOT_FOUND"));

        connection.close();
        repository.shutdown();
        assert!(repository.is_terminated());
    }
}

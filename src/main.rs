use std::path::PathBuf;
use std::time::Duration;

use imgtasks_backend::api::server::serve;
use imgtasks_backend::config::AppConfig;
use imgtasks_backend::default_app_root;
use imgtasks_backend::pipeline::validation::validate_pipeline;
use imgtasks_backend::storage::LocalFileStore;
use serde_json::{json, Value};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("validate-pipeline")) {
        run_validate_pipeline_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }
    if matches!(cli_args.first().map(String::as_str), Some("cleanup-temp")) {
        run_cleanup_temp_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }

    let config = AppConfig::from_env(default_app_root().as_path())?;
    serve(config).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidatePipelineCliArgs {
    steps_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CleanupTempCliArgs {
    app_root: PathBuf,
    ttl_hours: Option<u64>,
}

fn parse_validate_pipeline_cli_args(
    args: &[String],
) -> Result<ValidatePipelineCliArgs, Box<dyn std::error::Error>> {
    let mut steps_path = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--steps" => {
                steps_path = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let steps_path = steps_path
        .filter(|v| !v.as_os_str().is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --steps"))?;
    Ok(ValidatePipelineCliArgs { steps_path })
}

fn parse_cleanup_temp_cli_args(
    args: &[String],
) -> Result<CleanupTempCliArgs, Box<dyn std::error::Error>> {
    let mut app_root = default_app_root();
    let mut ttl_hours = None::<u64>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--app-root" => {
                app_root = PathBuf::from(needs_value(i)?);
                i += 2;
            }
            "--ttl-hours" => {
                let raw = needs_value(i)?;
                let parsed = raw.trim().parse::<u64>().map_err(|_| {
                    std::io::Error::other(format!("--ttl-hours must be a whole number, got '{raw}'"))
                })?;
                ttl_hours = Some(parsed);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    Ok(CleanupTempCliArgs {
        app_root,
        ttl_hours,
    })
}

/// Accepts either a bare array of steps or an object with a `steps` array.
fn steps_from_document(document: Value) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    match document {
        Value::Array(steps) => Ok(steps),
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(steps)) => Ok(steps),
            _ => Err(std::io::Error::other("Steps must be an array").into()),
        },
        _ => Err(std::io::Error::other("Steps must be an array").into()),
    }
}

fn run_validate_pipeline_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_validate_pipeline_usage();
        return Ok(());
    }
    let parsed = parse_validate_pipeline_cli_args(args.as_slice())?;
    let raw = std::fs::read_to_string(parsed.steps_path.as_path())?;
    let steps = steps_from_document(serde_json::from_str(raw.as_str())?)?;
    let validated = validate_pipeline(steps.as_slice())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "steps": validated
        }))?
    );
    Ok(())
}

fn run_cleanup_temp_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_cleanup_temp_usage();
        return Ok(());
    }
    let parsed = parse_cleanup_temp_cli_args(args.as_slice())?;
    let config = AppConfig::from_env(parsed.app_root.as_path())?;
    let ttl = parsed
        .ttl_hours
        .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
        .unwrap_or_else(|| config.temp_files_ttl());
    let store = LocalFileStore::new(config.uploads_dir.as_path())?;
    let removed = store.cleanup_expired(ttl)?;
    info!(removed, uploads = %config.uploads_dir.display(), "temp cleanup finished");
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "uploads_dir": config.uploads_dir,
            "ttl_hours": ttl.as_secs() / 3600,
            "removed": removed
        }))?
    );
    Ok(())
}

const VALIDATE_PIPELINE_USAGE: &str = concat!(
    "Usage:\n",
    "  cargo run -- validate-pipeline --steps <steps.json>\n\n",
    "The file holds either a JSON array of steps or an object with a \"steps\" array.\n",
    "Each step is {\"type\": \"optimize\" | \"remove_background\", \"options\": {...}}.\n"
);

const CLEANUP_TEMP_USAGE: &str = concat!(
    "Usage:\n",
    "  cargo run -- cleanup-temp [--app-root PATH] [--ttl-hours N]\n\n",
    "Defaults:\n",
    "  --app-root defaults to IMGTASKS_APP_ROOT or the current directory\n",
    "  --ttl-hours defaults to TEMP_FILES_TTL_HOURS (24)\n"
);

fn print_validate_pipeline_usage() {
    eprintln!("{}", VALIDATE_PIPELINE_USAGE);
}

fn print_cleanup_temp_usage() {
    eprintln!("{}", CLEANUP_TEMP_USAGE);
}

use super::args::*;
use rflogs_core::artifacts::FsArtifactSource;
use rflogs_core::config::IngestConfig;
use rflogs_core::storage::{Store, StoreError};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

pub mod project;
pub mod purge;
pub mod run;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

/// Opened store and artifact root shared by the subcommands.
pub struct Env {
    pub config: IngestConfig,
    pub store: Store,
    pub source: Arc<FsArtifactSource>,
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let mut config = IngestConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(root) = cli.artifacts {
        config.artifact_root = root;
    }
    init_logging(&config.log_level);

    if let Command::Version = cli.cmd {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(exit_codes::OK);
    }

    let env = open_env(config)?;
    let result = match cli.cmd {
        Command::Project(args) => project::run(&env, args.cmd).await,
        Command::Run(args) => run::run(&env, args.cmd).await,
        Command::Tags(args) => cmd_tags(&env, args),
        Command::Purge(args) => purge::run(&env, args).await,
        Command::Version => Ok(exit_codes::OK),
    };

    match result {
        Err(e) => match e.downcast_ref::<StoreError>() {
            Some(store_err) if is_user_error(store_err) => {
                eprintln!("error: {store_err}");
                Ok(exit_codes::CONFIG_ERROR)
            }
            _ => Err(e),
        },
        ok => ok,
    }
}

fn open_env(config: IngestConfig) -> anyhow::Result<Env> {
    ensure_parent_dir(&config.db_path)?;
    let store = Store::open(&config.db_path)?;
    store.init_schema()?;
    let source = Arc::new(FsArtifactSource::new(config.artifact_root.clone()));
    Ok(Env {
        config,
        store,
        source,
    })
}

fn cmd_tags(env: &Env, args: TagsArgs) -> anyhow::Result<i32> {
    if env.store.get_project(&args.project_id)?.is_none() {
        return Err(StoreError::ProjectNotFound(args.project_id).into());
    }
    print_json(&env.store.project_tags(&args.project_id)?)?;
    Ok(exit_codes::OK)
}

/// Errors caused by the caller's input rather than the environment.
fn is_user_error(e: &StoreError) -> bool {
    matches!(
        e,
        StoreError::Tags(_)
            | StoreError::RunNotFound(_)
            | StoreError::ProjectNotFound(_)
            | StoreError::InvalidRetention { .. }
            | StoreError::DuplicateFile { .. }
    )
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ensure_parent_dir(path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries command output only
    let _ = fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr)
        .try_init();
}

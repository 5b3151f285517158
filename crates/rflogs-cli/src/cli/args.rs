use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rflogs",
    version,
    about = "Ingest test-run reports and query runs by tag"
)]
pub struct Cli {
    /// SQLite database (default: .rflogs/rflogs.db)
    #[arg(long, global = true, env = "RFLOGS_DB")]
    pub db: Option<PathBuf>,

    /// Directory holding uploaded run files
    #[arg(long, global = true, env = "RFLOGS_ARTIFACT_ROOT")]
    pub artifacts: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Project(ProjectArgs),
    Run(RunArgs),
    /// List tag keys and values used in a project
    Tags(TagsArgs),
    /// Delete runs older than their project's retention window
    Purge(PurgeArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub cmd: ProjectSub,
}

#[derive(Subcommand, Clone)]
pub enum ProjectSub {
    Create(ProjectCreateArgs),
    Show(ProjectIdArgs),
    /// Delete a project with all of its runs
    Delete(ProjectIdArgs),
}

#[derive(Parser, Clone)]
pub struct ProjectCreateArgs {
    pub name: String,

    /// Days to keep runs; 0 keeps them forever
    #[arg(long, default_value_t = 0)]
    pub retention_days: u32,
}

#[derive(Parser, Clone)]
pub struct ProjectIdArgs {
    pub project_id: String,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[command(subcommand)]
    pub cmd: RunSub,
}

#[derive(Subcommand, Clone)]
pub enum RunSub {
    Create(RunCreateArgs),
    /// Attach a file to a run; output.xml(.gz) is parsed in the background
    Upload(RunUploadArgs),
    /// Parse a local report and store its stats on the run
    Ingest(RunIngestArgs),
    List(RunListArgs),
    Show(RunIdArgs),
    Delete(RunIdArgs),
}

#[derive(Parser, Clone)]
pub struct RunCreateArgs {
    pub project_id: String,

    /// key:value, or a bare key (value "true"). Repeatable.
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Parser, Clone)]
pub struct RunUploadArgs {
    pub run_id: String,

    pub file: PathBuf,

    /// Path of the file inside the run (default: the local file name)
    #[arg(long)]
    pub name: Option<String>,

    /// Treat the file as the run's report regardless of its name
    #[arg(long, default_value = "false")]
    pub output: bool,
}

#[derive(Parser, Clone)]
pub struct RunIngestArgs {
    pub run_id: String,

    /// output.xml or output.xml.gz
    pub file: PathBuf,
}

#[derive(Parser, Clone)]
pub struct RunListArgs {
    pub project_id: String,

    /// key=value; `verdict=fail` filters on the run verdict. Repeatable.
    #[arg(long = "filter")]
    pub filters: Vec<String>,

    #[arg(long, default_value_t = 10)]
    pub limit: u32,

    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}

#[derive(Parser, Clone)]
pub struct RunIdArgs {
    pub run_id: String,
}

#[derive(Parser, Clone)]
pub struct TagsArgs {
    pub project_id: String,
}

#[derive(Parser, Clone)]
pub struct PurgeArgs {
    /// Only print what would be deleted
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}

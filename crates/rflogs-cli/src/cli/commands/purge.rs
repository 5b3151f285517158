use super::{exit_codes, print_json, Env};
use crate::cli::args::PurgeArgs;
use rflogs_core::artifacts::ArtifactSource;
use std::collections::BTreeSet;

pub async fn run(env: &Env, args: PurgeArgs) -> anyhow::Result<i32> {
    let candidates = env.store.runs_to_purge(chrono::Utc::now())?;
    let run_ids: BTreeSet<String> = candidates.iter().map(|c| c.run_id.clone()).collect();
    let paths: Vec<String> = candidates
        .iter()
        .filter_map(|c| c.file_path.clone())
        .collect();

    if args.dry_run {
        print_json(&serde_json::json!({
            "runs": run_ids,
            "files": paths,
        }))?;
        return Ok(exit_codes::OK);
    }

    let files_deleted = delete_objects(env, &paths).await;
    let ids: Vec<String> = run_ids.into_iter().collect();
    let purged = env.store.purge_runs(&ids)?;

    print_json(&serde_json::json!({
        "purged": purged,
        "files_deleted": files_deleted,
    }))?;
    Ok(exit_codes::OK)
}

/// Best effort; a file that cannot be removed is logged and skipped.
pub(crate) async fn delete_objects(env: &Env, paths: &[String]) -> usize {
    let mut deleted = 0;
    for path in paths {
        match env.source.delete(path).await {
            Ok(true) => deleted += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(event = "artifact_delete_failed", path = %path, error = %e),
        }
    }
    deleted
}

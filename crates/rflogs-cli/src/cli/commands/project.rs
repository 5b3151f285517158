use super::{exit_codes, print_json, Env};
use crate::cli::args::ProjectSub;
use rflogs_core::storage::listing::MAX_PAGE_SIZE;
use rflogs_core::storage::StoreError;

pub async fn run(env: &Env, cmd: ProjectSub) -> anyhow::Result<i32> {
    match cmd {
        ProjectSub::Create(args) => {
            let project = env.store.create_project(&args.name, args.retention_days)?;
            print_json(&project)?;
        }
        ProjectSub::Show(args) => {
            let Some(project) = env.store.get_project(&args.project_id)? else {
                return Err(StoreError::ProjectNotFound(args.project_id).into());
            };
            let storage_used = env.store.project_storage_used(&project.id)?;
            print_json(&serde_json::json!({
                "project": project,
                "storage_used": storage_used,
            }))?;
        }
        ProjectSub::Delete(args) => {
            let Some(project) = env.store.get_project(&args.project_id)? else {
                return Err(StoreError::ProjectNotFound(args.project_id).into());
            };
            // collect file paths before the rows cascade away
            let mut paths = Vec::new();
            let mut offset = 0;
            loop {
                let page = env
                    .store
                    .list_runs(&project.id, &Default::default(), MAX_PAGE_SIZE, offset)?;
                paths.extend(page.runs.iter().flat_map(|r| r.files.iter().map(|f| f.path.clone())));
                match page.next_offset(MAX_PAGE_SIZE, offset) {
                    Some(next) => offset = next,
                    None => break,
                }
            }
            env.store.delete_project(&project.id)?;
            let files_deleted = super::purge::delete_objects(env, &paths).await;
            print_json(&serde_json::json!({
                "deleted": project.id,
                "files_deleted": files_deleted,
            }))?;
        }
    }
    Ok(exit_codes::OK)
}

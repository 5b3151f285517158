use super::{exit_codes, print_json, Env};
use crate::cli::args::*;
use anyhow::Context;
use rflogs_core::artifacts::{is_output_file, normalize_file_path, object_name, ArtifactSource};
use rflogs_core::jobs::{ingest_reader, IngestJob, IngestWorker, JobState};
use rflogs_core::query::TagFilters;
use rflogs_core::storage::listing::MAX_PAGE_SIZE;
use rflogs_core::storage::StoreError;

pub async fn run(env: &Env, cmd: RunSub) -> anyhow::Result<i32> {
    match cmd {
        RunSub::Create(args) => {
            let run = env.store.create_run(&args.project_id, &args.tags)?;
            print_json(&run)?;
            Ok(exit_codes::OK)
        }
        RunSub::Upload(args) => cmd_upload(env, args).await,
        RunSub::Ingest(args) => cmd_ingest(env, args).await,
        RunSub::List(args) => cmd_list(env, args),
        RunSub::Show(args) => {
            let Some(run) = env.store.get_run(&args.run_id)? else {
                return Err(StoreError::RunNotFound(args.run_id).into());
            };
            print_json(&run)?;
            Ok(exit_codes::OK)
        }
        RunSub::Delete(args) => {
            let Some(run) = env.store.get_run(&args.run_id)? else {
                return Err(StoreError::RunNotFound(args.run_id).into());
            };
            env.store.delete_run(&run.id)?;
            let paths: Vec<String> = run.files.iter().map(|f| f.path.clone()).collect();
            let files_deleted = super::purge::delete_objects(env, &paths).await;
            print_json(&serde_json::json!({
                "deleted": run.id,
                "files_deleted": files_deleted,
            }))?;
            Ok(exit_codes::OK)
        }
    }
}

async fn cmd_upload(env: &Env, args: RunUploadArgs) -> anyhow::Result<i32> {
    let Some(run) = env.store.get_run(&args.run_id)? else {
        return Err(StoreError::RunNotFound(args.run_id).into());
    };

    let raw_name = match &args.name {
        Some(n) => n.clone(),
        None => args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let (name, object) = match normalize_file_path(&raw_name)
        .and_then(|name| object_name(&run.id, &name).map(|object| (name, object)))
    {
        Ok(v) => v,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if run.files.iter().any(|f| f.name == name) {
        return Err(StoreError::DuplicateFile { name }.into());
    }

    let body = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let size = env.source.store(&object, body).await?;
    let file = match env.store.add_file(&run.id, &name, &object, size) {
        Ok(f) => f,
        Err(e) => {
            let _ = env.source.delete(&object).await;
            return Err(e.into());
        }
    };

    if !(args.output || is_output_file(&name)) {
        print_json(&serde_json::json!({ "file": file }))?;
        return Ok(exit_codes::OK);
    }

    // the process exits afterwards, so wait for the queued job
    let worker = IngestWorker::start(env.store.clone(), env.source.clone(), &env.config);
    let handle = worker
        .submit(IngestJob {
            run_id: run.id.clone(),
            object,
        })
        .await?;
    let state = handle.wait().await;
    worker.shutdown().await?;

    print_json(&serde_json::json!({ "file": file, "job": &state }))?;
    match state {
        JobState::Failed { .. } => Ok(exit_codes::TEST_FAILED),
        _ => Ok(exit_codes::OK),
    }
}

async fn cmd_ingest(env: &Env, args: RunIngestArgs) -> anyhow::Result<i32> {
    if env.store.get_run(&args.run_id)?.is_none() {
        return Err(StoreError::RunNotFound(args.run_id).into());
    }
    let file = std::fs::File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let store = env.store.clone();
    let parser = env.config.parser_config();
    let run_id = args.run_id.clone();

    let summary =
        tokio::task::spawn_blocking(move || ingest_reader(&store, &run_id, file, &parser))
            .await??;

    print_json(&summary)?;
    if summary.complete {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::TEST_FAILED)
    }
}

fn cmd_list(env: &Env, args: RunListArgs) -> anyhow::Result<i32> {
    let mut pairs = Vec::with_capacity(args.filters.len());
    for f in &args.filters {
        let Some((k, v)) = f.split_once('=') else {
            eprintln!("config error: filter '{f}' must be key=value");
            return Ok(exit_codes::CONFIG_ERROR);
        };
        pairs.push((k.trim().to_string(), v.trim().to_string()));
    }
    let filters = TagFilters::from_query_pairs(pairs);

    let limit = args.limit.min(MAX_PAGE_SIZE);
    let page = env
        .store
        .list_runs(&args.project_id, &filters, limit, args.offset)?;
    let next_offset = page.next_offset(limit, args.offset);
    print_json(&serde_json::json!({
        "runs": page.runs,
        "total": page.total,
        "next_offset": next_offset,
    }))?;
    Ok(exit_codes::OK)
}

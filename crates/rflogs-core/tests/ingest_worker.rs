mod common;

use rflogs_core::artifacts::{object_name, ArtifactSource, FsArtifactSource};
use rflogs_core::config::IngestConfig;
use rflogs_core::jobs::{IngestJob, IngestWorker, JobState};
use rflogs_core::model::Verdict;
use rflogs_core::storage::Store;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_worker_ingests_uploaded_reports() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = Store::open(&dir.path().join("rflogs.db"))?;
    store.init_schema()?;
    let source = Arc::new(FsArtifactSource::new(dir.path().join("artifacts")));
    let project = store.create_project("web", 0)?;

    let cfg = IngestConfig {
        workers: 2,
        queue_depth: 4,
        ..IngestConfig::default()
    };
    let worker = IngestWorker::start(store.clone(), source.clone(), &cfg);

    let mut handles = Vec::new();
    for (i, gz) in [false, true, false].into_iter().enumerate() {
        let run = store.create_run(&project.id, &[format!("build:{i}")])?;
        let xml = common::report(2, i as u32);
        let (file, body) = if gz {
            ("output.xml.gz", common::gzip(xml.as_bytes()))
        } else {
            ("output.xml", xml.into_bytes())
        };
        let object = object_name(&run.id, file)?;
        source.store(&object, body).await?;

        let handle = worker
            .submit(IngestJob {
                run_id: run.id.clone(),
                object,
            })
            .await?;
        assert!(matches!(
            handle.state(),
            JobState::Submitted | JobState::Running | JobState::Done(_)
        ));
        handles.push(handle);
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let run_id = handle.run_id.clone();
        match handle.wait().await {
            JobState::Done(summary) => {
                assert!(summary.written);
                assert_eq!(summary.total_tests, 2 + i as u32);
            }
            other => panic!("job for {run_id} ended as {other:?}"),
        }
        let run = store.get_run(&run_id)?.expect("run exists");
        let expected = if i == 0 { Verdict::Pass } else { Verdict::Fail };
        assert_eq!(run.verdict, Some(expected));
    }

    worker.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_artifact_fails_job() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = Store::memory()?;
    store.init_schema()?;
    let project = store.create_project("web", 0)?;
    let run = store.create_run::<&str>(&project.id, &[])?;

    let source: Arc<dyn ArtifactSource> = Arc::new(FsArtifactSource::new(dir.path()));
    let worker = IngestWorker::start(store.clone(), source, &IngestConfig::default());

    let handle = worker
        .submit(IngestJob {
            run_id: run.id.clone(),
            object: format!("{}/output.xml", run.id),
        })
        .await?;
    match handle.wait().await {
        JobState::Failed { error } => assert!(error.contains("not found"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    worker.shutdown().await?;

    let run = store.get_run(&run.id)?.expect("run exists");
    assert_eq!(run.verdict, None);
    Ok(())
}

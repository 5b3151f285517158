mod common;

use rflogs_core::jobs::ingest_reader;
use rflogs_core::model::Verdict;
use rflogs_core::parser::ParserConfig;
use rflogs_core::query::TagFilters;
use rflogs_core::storage::{Store, StoreError};

struct Seeded {
    store: Store,
    project_id: String,
    /// creation order
    runs: Vec<String>,
}

fn seed() -> anyhow::Result<Seeded> {
    let store = Store::memory()?;
    store.init_schema()?;
    let project = store.create_project("web", 0)?;
    let other = store.create_project("other", 0)?;

    let specs: [(&[&str], u32); 5] = [
        (&["env:prod", "suite:api"], 1),
        (&["env:prod", "suite:ui"], 0),
        (&["env:dev", "suite:api"], 2),
        (&["env:prod", "suite:api"], 0),
        (&["env:prod"], 1),
    ];
    let cfg = ParserConfig::default();
    let mut runs = Vec::new();
    for (tags, failures) in specs {
        let run = store.create_run(&project.id, tags)?;
        ingest_reader(&store, &run.id, common::report(3, failures).as_bytes(), &cfg)?;
        runs.push(run.id);
    }

    // noise in another project
    let foreign = store.create_run(&other.id, &["env:prod"])?;
    ingest_reader(&store, &foreign.id, common::report(0, 1).as_bytes(), &cfg)?;

    Ok(Seeded {
        store,
        project_id: project.id,
        runs,
    })
}

#[test]
fn test_verdict_filter_is_case_insensitive_and_newest_first() -> anyhow::Result<()> {
    let s = seed()?;
    let page = s
        .store
        .list_runs(&s.project_id, &TagFilters::new().with("verdict", "FAIL"), 10, 0)?;

    assert_eq!(page.total, 3);
    let ids: Vec<&str> = page.runs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![&s.runs[4][..], &s.runs[2][..], &s.runs[0][..]]);
    assert!(page.runs.iter().all(|r| r.verdict == Some(Verdict::Fail)));
    Ok(())
}

#[test]
fn test_tag_filters_are_conjunctive() -> anyhow::Result<()> {
    let s = seed()?;
    let filters = TagFilters::new().with("ENV", "prod").with("suite", "api");
    let page = s.store.list_runs(&s.project_id, &filters, 10, 0)?;

    assert_eq!(page.total, 2);
    let ids: Vec<&str> = page.runs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![&s.runs[3][..], &s.runs[0][..]]);
    for run in &page.runs {
        assert_eq!(run.tags["env"], "prod");
        assert_eq!(run.tags["suite"], "api");
    }

    // values match exactly
    let none = s.store.list_runs(
        &s.project_id,
        &TagFilters::new().with("env", "PROD"),
        10,
        0,
    )?;
    assert_eq!(none.total, 0);
    assert!(none.runs.is_empty());
    Ok(())
}

#[test]
fn test_pagination_reports_full_total() -> anyhow::Result<()> {
    let s = seed()?;
    let all = TagFilters::new();

    let first = s.store.list_runs(&s.project_id, &all, 2, 0)?;
    assert_eq!(first.total, 5);
    assert_eq!(first.runs.len(), 2);
    assert_eq!(first.next_offset(2, 0), Some(2));

    let last = s.store.list_runs(&s.project_id, &all, 2, 4)?;
    assert_eq!(last.total, 5);
    assert_eq!(last.runs.len(), 1);
    assert_eq!(last.runs[0].id, s.runs[0]);
    assert_eq!(last.next_offset(2, 4), None);
    Ok(())
}

#[test]
fn test_filters_from_query_pairs() -> anyhow::Result<()> {
    let s = seed()?;
    let filters = TagFilters::from_query_pairs([
        ("limit", "1"),
        ("Suite", "ui"),
        ("env", ""),
    ]);
    let page = s.store.list_runs(&s.project_id, &filters, 10, 0)?;
    assert_eq!(page.total, 1);
    assert_eq!(page.runs[0].id, s.runs[1]);
    Ok(())
}

#[test]
fn test_project_tags_lists_verdicts() -> anyhow::Result<()> {
    let s = seed()?;
    let tags = s.store.project_tags(&s.project_id)?;
    assert_eq!(tags["verdict"], vec!["fail", "pass"]);
    assert_eq!(tags["env"], vec!["dev", "prod"]);
    assert_eq!(tags["suite"], vec!["api", "ui"]);
    Ok(())
}

#[test]
fn test_rejected_tags_leave_no_run() -> anyhow::Result<()> {
    let s = seed()?;
    let err = s
        .store
        .create_run(&s.project_id, &["Env:Prod", "env:staging"])
        .unwrap_err();
    assert!(matches!(err, StoreError::Tags(_)));
    assert_eq!(s.store.count_rows("runs")?, 6);
    Ok(())
}

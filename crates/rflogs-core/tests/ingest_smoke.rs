mod common;

use rflogs_core::jobs::ingest_reader;
use rflogs_core::model::{ElementKind, Verdict};
use rflogs_core::parser::{parse_report_bytes, ParserConfig};
use rflogs_core::storage::Store;
use tempfile::tempdir;

#[test]
fn test_gzip_and_raw_parse_identically() {
    let xml = common::report(3, 1);
    let raw = parse_report_bytes(xml.as_bytes());
    let packed = parse_report_bytes(&common::gzip(xml.as_bytes()));

    assert!(raw.is_complete());
    assert!(packed.is_complete());
    assert_eq!(raw.stats(), packed.stats());
    assert_eq!(raw.stats().total_tests, 4);
    assert_eq!(raw.stats().verdict, Verdict::Fail);
}

#[test]
fn test_ingest_lifecycle_on_disk() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("rflogs.db");

    let store = Store::open(&db_path)?;
    store.init_schema()?;
    let project = store.create_project("web", 30)?;
    let run = store.create_run(&project.id, &["env:prod"])?;

    let cfg = ParserConfig { buffer_size: 16 };
    let summary = ingest_reader(&store, &run.id, common::report(2, 0).as_bytes(), &cfg)?;
    assert!(summary.written);
    assert_eq!(summary.verdict, Verdict::Pass);

    // same report again: timing rows are replaced, not duplicated
    ingest_reader(&store, &run.id, common::report(2, 0).as_bytes(), &cfg)?;
    let conn = rusqlite::Connection::open(&db_path)?;
    let rows: i64 = conn.query_row(
        "SELECT COUNT(*) FROM execution_times WHERE run_id = ?1",
        [&run.id],
        |r| r.get(0),
    )?;
    assert_eq!(rows, summary.timing_rows as i64);

    let shown = store.get_run(&run.id)?.expect("run exists");
    assert_eq!(shown.total_tests, Some(2));
    assert_eq!(shown.verdict, Some(Verdict::Pass));
    assert!(shown.start_time.is_some());
    let kws = &shown.timing[&ElementKind::Keyword];
    assert_eq!(kws["BuiltIn.Log"].call_count, 2);
    Ok(())
}

#[test]
fn test_bad_reparse_keeps_previous_stats() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let project = store.create_project("web", 0)?;
    let run = store.create_run::<&str>(&project.id, &[])?;
    let cfg = ParserConfig::default();

    ingest_reader(&store, &run.id, common::report(3, 1).as_bytes(), &cfg)?;

    // empty suite
    let empty = common::report(0, 0);
    let summary = ingest_reader(&store, &run.id, empty.as_bytes(), &cfg)?;
    assert!(!summary.written);

    // truncated document
    let full = common::report(1, 0);
    let cut = &full.as_bytes()[..full.len() / 2];
    let summary = ingest_reader(&store, &run.id, cut, &cfg)?;
    assert!(!summary.complete);
    assert!(!summary.written);
    assert_eq!(summary.verdict, Verdict::Error);

    let shown = store.get_run(&run.id)?.expect("run exists");
    assert_eq!(shown.total_tests, Some(4));
    assert_eq!(shown.failed, Some(1));
    assert_eq!(shown.verdict, Some(Verdict::Fail));
    assert_eq!(shown.failed_test_names, vec!["Case 3".to_string()]);
    Ok(())
}

#[test]
fn test_bad_elapsed_values_are_not_written() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let project = store.create_project("web", 0)?;
    let run = store.create_run::<&str>(&project.id, &[])?;
    let cfg = ParserConfig::default();

    ingest_reader(&store, &run.id, common::report(2, 0).as_bytes(), &cfg)?;

    let good = common::report(1, 0);
    let variants = [
        good.replacen(r#"elapsed="0.100""#, r#"elapsed="NaN""#, 1),
        good.replacen(r#"elapsed="0.100""#, r#"elapsed="inf""#, 1),
        good.replacen(r#"elapsed="1.000""#, r#"elapsed="1e13""#, 1),
    ];
    for xml in &variants {
        let summary = ingest_reader(&store, &run.id, xml.as_bytes(), &cfg)?;
        assert!(!summary.complete);
        assert!(!summary.written);
        assert_eq!(summary.verdict, Verdict::Error);
    }

    let shown = store.get_run(&run.id)?.expect("run exists");
    assert_eq!(shown.total_tests, Some(2));
    assert_eq!(shown.verdict, Some(Verdict::Pass));
    Ok(())
}

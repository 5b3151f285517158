//! Read side of the run store: filtered listings, single-run detail and the
//! per-project tag catalogue.

use super::store::placeholders;
use super::{parse_ts, parse_ts_opt, Store, StoreError};
use crate::model::{ElementKind, FileInfo, RunInfo, RunPage, TimingBreakdown, TimingStats, Verdict};
use crate::query::{RunQuery, TagFilters, VERDICT_KEY};
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Largest page `list_runs` returns; bigger limits are clamped.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Columns of a run row before timestamps and JSON are decoded.
struct RawRun {
    id: String,
    project_id: String,
    project_name: String,
    created_at: String,
    total_tests: Option<u32>,
    passed: Option<u32>,
    failed: Option<u32>,
    skipped: Option<u32>,
    verdict: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    failed_tests_json: Option<String>,
}

impl RawRun {
    fn decode(self) -> Result<RunInfo, StoreError> {
        let failed_test_names = match self.failed_tests_json.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
                column: "runs.failed_tests_json",
                message: e.to_string(),
            })?,
        };
        Ok(RunInfo {
            id: self.id,
            project_id: self.project_id,
            project_name: self.project_name,
            created_at: parse_ts(&self.created_at, "runs.created_at")?,
            files: Vec::new(),
            total_tests: self.total_tests,
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            verdict: self.verdict.as_deref().map(Verdict::parse),
            tags: BTreeMap::new(),
            start_time: parse_ts_opt(self.start_time, "runs.start_time")?,
            end_time: parse_ts_opt(self.end_time, "runs.end_time")?,
            failed_test_names,
            timing: BTreeMap::new(),
        })
    }
}

impl Store {
    /// One page of a project's runs, newest first, narrowed by `filters`.
    ///
    /// `total` counts every matching run, not just the page. Each returned run
    /// carries its files and tags; timing is left empty. `limit` is clamped
    /// to [`MAX_PAGE_SIZE`].
    pub fn list_runs(
        &self,
        project_id: &str,
        filters: &TagFilters,
        limit: u32,
        offset: u32,
    ) -> Result<RunPage, StoreError> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let query = RunQuery::compile(project_id, &filters.predicates());
        let conn = self.lock()?;

        let total: i64 = conn.query_row(
            &query.count_sql(),
            params_from_iter(query.params().iter()),
            |r| r.get(0),
        )?;
        let total = u64::try_from(total).unwrap_or(0);
        if total == 0 || limit == 0 {
            return Ok(RunPage {
                runs: vec![],
                total,
            });
        }

        let ids = {
            let mut stmt = conn.prepare(&query.page_sql())?;
            let rows = stmt.query_map(
                params_from_iter(query.page_params(limit, offset).iter()),
                |r| r.get::<_, String>(0),
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let runs = load_runs(&conn, &ids)?;
        tracing::debug!(
            event = "runs_listed",
            project_id,
            filters = filters.len(),
            total,
            returned = runs.len()
        );
        Ok(RunPage { runs, total })
    }

    /// Full run detail including the timing breakdown.
    pub fn get_run(&self, run_id: &str) -> Result<Option<RunInfo>, StoreError> {
        let conn = self.lock()?;
        let mut runs = load_runs(&conn, &[run_id.to_string()])?;
        let Some(mut run) = runs.pop() else {
            return Ok(None);
        };
        run.timing = load_timing(&conn, run_id)?;
        Ok(Some(run))
    }

    /// Every tag key used in the project with its distinct values, sorted.
    /// The `verdict` key is always present and lists the lower-cased verdicts
    /// seen so far.
    pub fn project_tags(
        &self,
        project_id: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let conn = self.lock()?;
        let mut tags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        let mut stmt = conn.prepare(
            "SELECT DISTINCT verdict FROM runs WHERE project_id = ?1 AND verdict IS NOT NULL",
        )?;
        let verdicts = stmt
            .query_map(params![project_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        tags.insert(
            VERDICT_KEY.to_string(),
            verdicts
                .into_iter()
                .filter(|v| !v.is_empty())
                .map(|v| v.to_lowercase())
                .collect(),
        );

        let mut stmt = conn.prepare(
            "SELECT rt.key, rt.value FROM run_tags rt JOIN runs r ON rt.run_id = r.id
             WHERE r.project_id = ?1",
        )?;
        let rows = stmt.query_map(params![project_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            tags.entry(key).or_default().insert(value);
        }

        Ok(tags
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect())
    }
}

/// Loads runs with their files and tags, in the order of `ids`.
fn load_runs(conn: &Connection, ids: &[String]) -> Result<Vec<RunInfo>, StoreError> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let marks = placeholders(ids.len());

    let sql = format!(
        "SELECT r.id, r.project_id, p.name, r.created_at, r.total_tests, r.passed, r.failed,
                r.skipped, r.verdict, r.start_time, r.end_time, r.failed_tests_json
         FROM runs r JOIN projects p ON r.project_id = p.id
         WHERE r.id IN ({marks})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params_from_iter(ids.iter()), |r| {
            Ok(RawRun {
                id: r.get(0)?,
                project_id: r.get(1)?,
                project_name: r.get(2)?,
                created_at: r.get(3)?,
                total_tests: r.get(4)?,
                passed: r.get(5)?,
                failed: r.get(6)?,
                skipped: r.get(7)?,
                verdict: r.get(8)?,
                start_time: r.get(9)?,
                end_time: r.get(10)?,
                failed_tests_json: r.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_id: HashMap<String, RunInfo> = HashMap::with_capacity(raw.len());
    for r in raw {
        let run = r.decode()?;
        by_id.insert(run.id.clone(), run);
    }

    let sql = format!(
        "SELECT run_id, id, name, path, size, created_at FROM files
         WHERE run_id IN ({marks}) ORDER BY created_at, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map(params_from_iter(ids.iter()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (run_id, id, name, path, size, created_at) in files {
        if let Some(run) = by_id.get_mut(&run_id) {
            run.files.push(FileInfo {
                id,
                name,
                path,
                size: u64::try_from(size).unwrap_or(0),
                created_at: parse_ts(&created_at, "files.created_at")?,
            });
        }
    }

    let sql = format!("SELECT run_id, key, value FROM run_tags WHERE run_id IN ({marks})");
    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map(params_from_iter(ids.iter()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (run_id, key, value) in tags {
        if let Some(run) = by_id.get_mut(&run_id) {
            run.tags.insert(key, value);
        }
    }

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

fn load_timing(conn: &Connection, run_id: &str) -> Result<TimingBreakdown, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT e.type, e.name, t.total_time, t.call_count, t.average_time, t.median_time,
                t.std_deviation
         FROM execution_times t JOIN execution_elements e ON t.element_id = e.id
         WHERE t.run_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![run_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                TimingStats {
                    total_time: r.get(2)?,
                    call_count: r.get(3)?,
                    average_time: r.get(4)?,
                    median_time: r.get(5)?,
                    std_deviation: r.get(6)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = TimingBreakdown::new();
    for (kind, name, stats) in rows {
        let kind = ElementKind::parse(&kind).ok_or_else(|| StoreError::Corrupt {
            column: "execution_elements.type",
            message: kind.clone(),
        })?;
        out.entry(kind).or_default().insert(name, stats);
    }
    Ok(out)
}

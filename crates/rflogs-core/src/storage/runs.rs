use super::{fmt_ts, Store, StoreError};
use crate::model::{ParsedStats, Verdict};
use rusqlite::params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { timing_rows: usize },
    /// Nothing was written; the run keeps whatever it had before.
    Skipped,
}

impl Store {
    /// Persists parsed report statistics onto an existing run.
    ///
    /// Counts, verdict, timing window and failed test names are updated and
    /// the run's timing rows are replaced, all in one transaction. Results
    /// with no tests or an `error` verdict are not written so that a broken
    /// upload never clobbers good data.
    pub fn write_run_stats(
        &self,
        run_id: &str,
        stats: &ParsedStats,
    ) -> Result<WriteOutcome, StoreError> {
        if stats.total_tests == 0 || stats.verdict == Verdict::Error {
            tracing::info!(
                event = "run_stats_skipped",
                run_id,
                total_tests = stats.total_tests,
                verdict = %stats.verdict
            );
            return Ok(WriteOutcome::Skipped);
        }

        let failed_json = serde_json::to_string(&stats.failed_test_names).map_err(|e| {
            StoreError::Corrupt {
                column: "runs.failed_tests_json",
                message: e.to_string(),
            }
        })?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE runs SET total_tests = ?1, passed = ?2, failed = ?3, skipped = ?4,
                 verdict = ?5, start_time = ?6, end_time = ?7, failed_tests_json = ?8
             WHERE id = ?9",
            params![
                stats.total_tests,
                stats.passed,
                stats.failed,
                stats.skipped,
                stats.verdict.as_str(),
                stats.start_time.as_ref().map(fmt_ts),
                stats.end_time.as_ref().map(fmt_ts),
                failed_json,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }

        // re-ingesting replaces the previous breakdown
        tx.execute(
            "DELETE FROM execution_times WHERE run_id = ?1",
            params![run_id],
        )?;

        let mut timing_rows = 0usize;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO execution_elements(name, type) VALUES (?1, ?2)
                 ON CONFLICT(name, type) DO NOTHING",
            )?;
            let mut lookup =
                tx.prepare("SELECT id FROM execution_elements WHERE name = ?1 AND type = ?2")?;
            let mut insert = tx.prepare(
                "INSERT INTO execution_times(run_id, element_id, total_time, call_count,
                     average_time, median_time, std_deviation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for (kind, elements) in &stats.timing {
                for (name, t) in elements {
                    upsert.execute(params![name, kind.as_str()])?;
                    let element_id: i64 =
                        lookup.query_row(params![name, kind.as_str()], |r| r.get(0))?;
                    insert.execute(params![
                        run_id,
                        element_id,
                        t.total_time,
                        t.call_count,
                        t.average_time,
                        t.median_time,
                        t.std_deviation
                    ])?;
                    timing_rows += 1;
                }
            }
        }

        tx.commit()?;

        tracing::info!(
            event = "run_stats_written",
            run_id,
            verdict = %stats.verdict,
            total_tests = stats.total_tests,
            timing_rows
        );
        Ok(WriteOutcome::Written { timing_rows })
    }
}

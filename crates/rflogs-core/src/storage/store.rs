use super::schema::{DDL, SCHEMA_VERSION};
use super::{fmt_ts, new_id, parse_ts, StoreError};
use crate::model::{FileInfo, Project, PurgeCandidate, RunInfo};
use crate::tags::validate_and_normalize_tags;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub const MAX_RETENTION_DAYS: u32 = 180;

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> Result<Self, StoreError> {
        // SQLite in-memory DB
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(DDL)?;
        migrate(&conn)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn create_project(&self, name: &str, retention_days: u32) -> Result<Project, StoreError> {
        if retention_days > MAX_RETENTION_DAYS {
            return Err(StoreError::InvalidRetention {
                got: retention_days,
                max: MAX_RETENTION_DAYS,
            });
        }
        let project = Project {
            id: new_id(),
            name: name.to_string(),
            retention_days,
            created_at: now(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects(id, name, retention_days, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id,
                project.name,
                project.retention_days,
                fmt_ts(&project.created_at)
            ],
        )?;
        tracing::info!(event = "project_created", project_id = %project.id, name);
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, name, retention_days, created_at FROM projects WHERE id = ?1",
                params![project_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, u32>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, retention_days, created_at)| {
            Ok(Project {
                id,
                name,
                retention_days,
                created_at: parse_ts(&created_at, "projects.created_at")?,
            })
        })
        .transpose()
    }

    /// Creates an empty run with its tags. Tags are validated up front and
    /// the run and its tags are inserted in one transaction, so a rejected
    /// tag set never leaves a run behind.
    pub fn create_run<S: AsRef<str>>(
        &self,
        project_id: &str,
        raw_tags: &[S],
    ) -> Result<RunInfo, StoreError> {
        let tags = validate_and_normalize_tags(raw_tags)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let project_name: String = tx
            .query_row(
                "SELECT name FROM projects WHERE id = ?1",
                params![project_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;

        let run_id = new_id();
        let created_at = now();
        tx.execute(
            "INSERT INTO runs(id, project_id, created_at, failed_tests_json) VALUES (?1, ?2, ?3, '[]')",
            params![run_id, project_id, fmt_ts(&created_at)],
        )?;
        {
            let mut stmt = tx.prepare("INSERT INTO run_tags(run_id, key, value) VALUES (?1, ?2, ?3)")?;
            for (key, value) in tags.iter() {
                stmt.execute(params![run_id, key, value])?;
            }
        }
        tx.commit()?;

        tracing::info!(event = "run_created", run_id = %run_id, project_id, tags = tags.len());

        Ok(RunInfo {
            id: run_id,
            project_id: project_id.to_string(),
            project_name,
            created_at,
            files: vec![],
            total_tests: None,
            passed: None,
            failed: None,
            skipped: None,
            verdict: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            start_time: None,
            end_time: None,
            failed_test_names: vec![],
            timing: BTreeMap::new(),
        })
    }

    pub fn add_file(
        &self,
        run_id: &str,
        name: &str,
        path: &str,
        size: u64,
    ) -> Result<FileInfo, StoreError> {
        let conn = self.lock()?;
        let exists = conn
            .query_row("SELECT 1 FROM runs WHERE id = ?1", params![run_id], |_| Ok(()))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }

        let file = FileInfo {
            id: new_id(),
            name: name.to_string(),
            path: path.to_string(),
            size,
            created_at: now(),
        };
        let res = conn.execute(
            "INSERT INTO files(id, run_id, name, path, size, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.id,
                run_id,
                file.name,
                file.path,
                i64::try_from(file.size).unwrap_or(i64::MAX),
                fmt_ts(&file.created_at)
            ],
        );
        match res {
            Ok(_) => Ok(file),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateFile {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes of all files attached to the project's runs.
    pub fn project_storage_used(&self, project_id: &str) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(f.size), 0) FROM files f JOIN runs r ON f.run_id = r.id WHERE r.project_id = ?1",
            params![project_id],
            |r| r.get(0),
        )?;
        Ok(u64::try_from(used).unwrap_or(0))
    }

    /// Deletes a run; tags, files and timing rows go with it.
    pub fn delete_run(&self, run_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM runs WHERE id = ?1", params![run_id])?;
        if n > 0 {
            tracing::info!(event = "run_deleted", run_id);
        }
        Ok(n > 0)
    }

    pub fn delete_project(&self, project_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
        if n > 0 {
            tracing::info!(event = "project_deleted", project_id);
        }
        Ok(n > 0)
    }

    /// Runs older than their project's retention window. Projects with
    /// `retention_days = 0` keep runs forever. A run with several files is
    /// listed once per file.
    pub fn runs_to_purge(&self, now: DateTime<Utc>) -> Result<Vec<PurgeCandidate>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, f.path, r.created_at, p.retention_days
             FROM runs r
             LEFT JOIN files f ON r.id = f.run_id
             JOIN projects p ON r.project_id = p.id
             WHERE p.retention_days > 0",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, u32>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::new();
        for (run_id, file_path, created_at, days) in rows {
            let created_at = parse_ts(&created_at, "runs.created_at")?;
            if created_at < now - chrono::Duration::days(i64::from(days)) {
                out.push(PurgeCandidate { run_id, file_path });
            }
        }
        Ok(out)
    }

    pub fn purge_runs(&self, run_ids: &[String]) -> Result<usize, StoreError> {
        let unique: Vec<&String> = run_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let sql = format!(
            "DELETE FROM runs WHERE id IN ({})",
            placeholders(unique.len())
        );
        let n = tx.execute(&sql, params_from_iter(unique.iter()))?;
        tx.commit()?;
        tracing::info!(event = "runs_purged", count = n);
        Ok(n)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        // Validation to prevent SQL injection (simple allowlist)
        if ![
            "projects",
            "runs",
            "run_tags",
            "files",
            "execution_elements",
            "execution_times",
        ]
        .contains(&table)
        {
            return Err(StoreError::Corrupt {
                column: "table",
                message: format!("invalid table name for count_rows: {table}"),
            });
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}

/// `?, ?, ?` for an IN list of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn now() -> DateTime<Utc> {
    // stored with microsecond precision
    Utc::now().trunc_subsecs(6)
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    // v2: run timing window and failed test names
    let cols = get_columns(conn, "runs")?;
    add_column_if_missing(conn, &cols, "runs", "start_time", "TEXT")?;
    add_column_if_missing(conn, &cols, "runs", "end_time", "TEXT")?;
    add_column_if_missing(
        conn,
        &cols,
        "runs",
        "failed_tests_json",
        "TEXT NOT NULL DEFAULT '[]'",
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tracing::debug!(event = "schema_migrated", from = version, to = SCHEMA_VERSION);
    Ok(())
}

fn get_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn add_column_if_missing(
    conn: &Connection,
    cols: &HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> Result<(), StoreError> {
    if !cols.contains(col) {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty);
        conn.execute(&sql, [])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        let s = Store::memory().unwrap();
        s.init_schema().unwrap();
        s
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let s = store();
        s.init_schema().unwrap();
        let conn = s.lock().unwrap();
        let cols = get_columns(&conn, "runs").unwrap();
        assert!(cols.contains("failed_tests_json"));
        assert!(cols.contains("end_time"));
    }

    #[test]
    fn test_create_run_with_tags() {
        let s = store();
        let p = s.create_project("web", 0).unwrap();
        let run = s.create_run(&p.id, &["env:prod", "smoke"]).unwrap();
        assert_eq!(run.project_name, "web");
        assert_eq!(run.tags.get("smoke").map(String::as_str), Some("true"));
        assert_eq!(s.count_rows("run_tags").unwrap(), 2);
    }

    #[test]
    fn test_bad_tag_leaves_no_run() {
        let s = store();
        let p = s.create_project("web", 0).unwrap();
        let err = s.create_run(&p.id, &["env:prod", "offset:3"]).unwrap_err();
        assert!(matches!(err, StoreError::Tags(_)));
        assert_eq!(s.count_rows("runs").unwrap(), 0);
        assert_eq!(s.count_rows("run_tags").unwrap(), 0);
    }

    #[test]
    fn test_unknown_project() {
        let s = store();
        let err = s.create_run::<&str>("nope", &[]).unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));
        assert_eq!(s.count_rows("runs").unwrap(), 0);
    }

    #[test]
    fn test_retention_limit() {
        let s = store();
        assert!(matches!(
            s.create_project("p", 181),
            Err(StoreError::InvalidRetention { .. })
        ));
    }

    #[test]
    fn test_duplicate_file_name() {
        let s = store();
        let p = s.create_project("web", 0).unwrap();
        let run = s.create_run::<&str>(&p.id, &[]).unwrap();
        s.add_file(&run.id, "output.xml", "x/output.xml", 10).unwrap();
        let err = s
            .add_file(&run.id, "output.xml", "x/output.xml", 10)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFile { .. }));
        assert!(matches!(
            s.add_file("missing", "a", "b", 1),
            Err(StoreError::RunNotFound(_))
        ));
        assert_eq!(s.project_storage_used(&p.id).unwrap(), 10);
    }

    #[test]
    fn test_delete_project_cascades() {
        let s = store();
        let p = s.create_project("web", 0).unwrap();
        let run = s.create_run(&p.id, &["env:prod"]).unwrap();
        s.add_file(&run.id, "log.html", "x/log.html", 1).unwrap();
        assert!(s.delete_project(&p.id).unwrap());
        assert_eq!(s.count_rows("runs").unwrap(), 0);
        assert_eq!(s.count_rows("run_tags").unwrap(), 0);
        assert_eq!(s.count_rows("files").unwrap(), 0);
        assert!(!s.delete_project(&p.id).unwrap());
    }

    #[test]
    fn test_purge_respects_retention() {
        let s = store();
        let keep_forever = s.create_project("forever", 0).unwrap();
        let short = s.create_project("short", 7).unwrap();
        let a = s.create_run::<&str>(&keep_forever.id, &[]).unwrap();
        let b = s.create_run::<&str>(&short.id, &[]).unwrap();
        s.add_file(&b.id, "output.xml", "b/output.xml", 5).unwrap();

        assert!(s.runs_to_purge(Utc::now()).unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::days(8);
        let due = s.runs_to_purge(later).unwrap();
        assert_eq!(
            due,
            vec![PurgeCandidate {
                run_id: b.id.clone(),
                file_path: Some("b/output.xml".into())
            }]
        );

        let ids: Vec<String> = due.into_iter().map(|c| c.run_id).collect();
        assert_eq!(s.purge_runs(&ids).unwrap(), 1);
        assert_eq!(s.count_rows("runs").unwrap(), 1);
        assert!(s.delete_run(&a.id).unwrap());
    }
}

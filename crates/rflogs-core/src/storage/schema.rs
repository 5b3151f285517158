/// Bumped whenever `migrate` learns a new step.
pub const SCHEMA_VERSION: i64 = 2;

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  retention_days INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY,
  project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
  created_at TEXT NOT NULL,
  total_tests INTEGER,
  passed INTEGER,
  failed INTEGER,
  skipped INTEGER,
  verdict TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_project_created ON runs(project_id, created_at);

CREATE TABLE IF NOT EXISTS run_tags (
  run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  key TEXT NOT NULL,
  value TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_run_tags_key ON run_tags(run_id, key COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS files (
  id TEXT PRIMARY KEY,
  run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  path TEXT NOT NULL,
  size INTEGER NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE (run_id, name)
);

CREATE TABLE IF NOT EXISTS execution_elements (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  type TEXT NOT NULL,
  UNIQUE (name, type)
);

CREATE TABLE IF NOT EXISTS execution_times (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  element_id INTEGER NOT NULL REFERENCES execution_elements(id),
  total_time REAL NOT NULL,
  call_count INTEGER NOT NULL,
  average_time REAL NOT NULL,
  median_time REAL NOT NULL,
  std_deviation REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_execution_times_run ON execution_times(run_id);
"#;

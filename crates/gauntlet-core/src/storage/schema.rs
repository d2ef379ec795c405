pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id TEXT NOT NULL,
  dataset_id TEXT NOT NULL,
  target_agent_id TEXT,
  config_json TEXT NOT NULL,
  status TEXT NOT NULL,
  metrics_json TEXT,
  started_at INTEGER,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS test_cases (
  dataset_id TEXT NOT NULL,
  id TEXT NOT NULL,
  prompt TEXT NOT NULL,
  expected TEXT,
  sort_order INTEGER NOT NULL,
  PRIMARY KEY (dataset_id, id)
);

CREATE TABLE IF NOT EXISTS run_topics (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  test_case_id TEXT NOT NULL,
  status TEXT NOT NULL,
  score REAL,
  passed INTEGER,
  eval_json TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  UNIQUE (run_id, test_case_id)
);

CREATE TABLE IF NOT EXISTS jobs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  payload_json TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'queued',
  attempts INTEGER NOT NULL DEFAULT 0,
  run_after INTEGER NOT NULL DEFAULT 0,
  last_error TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cases_order ON test_cases(dataset_id, sort_order, id);
CREATE INDEX IF NOT EXISTS idx_topics_run ON run_topics(run_id, status);
CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, run_after, id);
"#;

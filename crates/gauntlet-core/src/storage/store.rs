use crate::model::{
    EvalResult, Run, RunConfig, RunMetrics, RunStatus, RunTopic, TestCase, ThreadResult,
    TopicStatus,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Single source of truth for runs, test cases and per-case execution
/// records. One connection behind a mutex; every write is a single
/// status-guarded statement, so no cross-row locking is needed.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    // runs

    pub fn create_run(
        &self,
        user_id: &str,
        dataset_id: &str,
        target_agent_id: Option<&str>,
        config: &RunConfig,
    ) -> anyhow::Result<i64> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs(user_id, dataset_id, target_agent_id, config_json, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                user_id,
                dataset_id,
                target_agent_id,
                serde_json::to_string(config)?,
                RunStatus::Idle.as_str(),
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_run(&self, user_id: &str, run_id: i64) -> anyhow::Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, dataset_id, target_agent_id, config_json, status,
                    metrics_json, started_at, created_at, updated_at
             FROM runs WHERE id=?1 AND user_id=?2",
        )?;
        stmt.query_row(params![run_id, user_id], map_run)
            .optional()
            .map_err(Into::into)
    }

    /// Unscoped lookup for internal orchestration steps (the user scope was
    /// enforced when the work was enqueued).
    pub fn find_run_by_id(&self, run_id: i64) -> anyhow::Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, dataset_id, target_agent_id, config_json, status,
                    metrics_json, started_at, created_at, updated_at
             FROM runs WHERE id=?1",
        )?;
        stmt.query_row(params![run_id], map_run)
            .optional()
            .map_err(Into::into)
    }

    pub fn run_status(&self, run_id: i64) -> anyhow::Result<Option<RunStatus>> {
        let conn = self.conn.lock().unwrap();
        let status: Option<String> = conn
            .query_row("SELECT status FROM runs WHERE id=?1", params![run_id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(status.map(|s| RunStatus::parse(&s)))
    }

    /// Moves an idle/pending run to `running` and stamps `started_at`.
    pub fn mark_run_started(&self, user_id: &str, run_id: i64) -> anyhow::Result<bool> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE runs SET status='running', started_at=?1, updated_at=?1
             WHERE id=?2 AND user_id=?3 AND status IN ('idle','pending')",
            params![now, run_id, user_id],
        )?;
        Ok(n > 0)
    }

    /// The single cancellation flag. Only non-terminal runs can be aborted.
    pub fn abort_run(&self, user_id: &str, run_id: i64) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE runs SET status='aborted', updated_at=?1
             WHERE id=?2 AND user_id=?3 AND status IN ('idle','pending','running')",
            params![now_ms(), run_id, user_id],
        )?;
        Ok(n > 0)
    }

    /// Puts a finished run back to `running` and clears its metrics, so a
    /// retry pass can re-resolve and re-finalize it. Aborted runs stay down.
    pub fn reopen_run(&self, run_id: i64) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE runs SET status='running', metrics_json=NULL, updated_at=?1
             WHERE id=?2 AND status IN ('running','completed','failed')",
            params![now_ms(), run_id],
        )?;
        Ok(n > 0)
    }

    /// Writes terminal status and metrics in one statement. Never touches an
    /// aborted run, so a stale finalize cannot resurrect it.
    pub fn finalize_run(
        &self,
        run_id: i64,
        status: RunStatus,
        metrics: &RunMetrics,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE runs SET status=?1, metrics_json=?2, updated_at=?3
             WHERE id=?4 AND status != 'aborted'",
            params![
                status.as_str(),
                serde_json::to_string(metrics)?,
                now_ms(),
                run_id
            ],
        )?;
        Ok(n > 0)
    }

    /// Ids of runs currently executing, oldest first. The worker's periodic
    /// reap sweep iterates these.
    pub fn running_runs(&self) -> anyhow::Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM runs WHERE status='running' ORDER BY id")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // test cases

    pub fn insert_test_case(&self, case: &TestCase) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO test_cases(dataset_id, id, prompt, expected, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(dataset_id, id) DO UPDATE SET
               prompt=excluded.prompt, expected=excluded.expected, sort_order=excluded.sort_order",
            params![
                case.dataset_id,
                case.id,
                case.prompt,
                case.expected,
                case.sort_order
            ],
        )?;
        Ok(())
    }

    pub fn count_cases(&self, dataset_id: &str) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM test_cases WHERE dataset_id=?1",
            params![dataset_id],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn find_test_case(&self, dataset_id: &str, id: &str) -> anyhow::Result<Option<TestCase>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT dataset_id, id, prompt, expected, sort_order
             FROM test_cases WHERE dataset_id=?1 AND id=?2",
        )?;
        stmt.query_row(params![dataset_id, id], map_case)
            .optional()
            .map_err(Into::into)
    }

    /// Next page of cases strictly after `cursor` (a test case id), ordered
    /// by `(sort_order, id)`. The stable order is what makes the cursor a
    /// durable resume point.
    pub fn cases_after(
        &self,
        dataset_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        match cursor {
            Some(cursor_id) => {
                let anchor: Option<i64> = conn
                    .query_row(
                        "SELECT sort_order FROM test_cases WHERE dataset_id=?1 AND id=?2",
                        params![dataset_id, cursor_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                let anchor =
                    anchor.ok_or_else(|| anyhow::anyhow!("unknown cursor case '{cursor_id}'"))?;
                let mut stmt = conn.prepare(
                    "SELECT dataset_id, id, prompt, expected, sort_order FROM test_cases
                     WHERE dataset_id=?1 AND (sort_order > ?2 OR (sort_order = ?2 AND id > ?3))
                     ORDER BY sort_order, id LIMIT ?4",
                )?;
                let rows = stmt.query_map(params![dataset_id, anchor, cursor_id, limit], map_case)?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT dataset_id, id, prompt, expected, sort_order FROM test_cases
                     WHERE dataset_id=?1 ORDER BY sort_order, id LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![dataset_id, limit], map_case)?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    }

    // run topics

    /// Creates the per-(run, case) record, returning its id, or None when a
    /// topic already exists for this pair (idempotent re-dispatch).
    pub fn create_topic(
        &self,
        run_id: i64,
        test_case_id: &str,
        status: TopicStatus,
        score: Option<f64>,
        passed: Option<bool>,
        eval: &EvalResult,
    ) -> anyhow::Result<Option<i64>> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO run_topics(run_id, test_case_id, status, score, passed, eval_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                run_id,
                test_case_id,
                status.as_str(),
                score,
                passed,
                serde_json::to_string(eval)?,
                now
            ],
        )?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    pub fn find_topic(&self, run_id: i64, test_case_id: &str) -> anyhow::Result<Option<RunTopic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_case_id, status, score, passed, eval_json, created_at, updated_at
             FROM run_topics WHERE run_id=?1 AND test_case_id=?2",
        )?;
        stmt.query_row(params![run_id, test_case_id], map_topic)
            .optional()
            .map_err(Into::into)
    }

    pub fn find_topic_by_id(&self, topic_id: i64) -> anyhow::Result<Option<RunTopic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_case_id, status, score, passed, eval_json, created_at, updated_at
             FROM run_topics WHERE id=?1",
        )?;
        stmt.query_row(params![topic_id], map_topic)
            .optional()
            .map_err(Into::into)
    }

    /// All topics of a run in creation order. Pagination filtering and
    /// k-attempt numbering depend on this order staying stable.
    pub fn topics_for_run(&self, run_id: i64) -> anyhow::Result<Vec<RunTopic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_case_id, status, score, passed, eval_json, created_at, updated_at
             FROM run_topics WHERE run_id=?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![run_id], map_topic)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Single forward transition into a terminal status. The status guard is
    /// what makes completion idempotent: a terminal row is never rewritten.
    pub fn complete_topic(
        &self,
        topic_id: i64,
        status: TopicStatus,
        score: Option<f64>,
        passed: Option<bool>,
        eval: &EvalResult,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE run_topics SET status=?1, score=?2, passed=?3, eval_json=?4, updated_at=?5
             WHERE id=?6 AND status IN ('pending','running')",
            params![
                status.as_str(),
                score,
                passed,
                serde_json::to_string(eval)?,
                now_ms(),
                topic_id
            ],
        )?;
        Ok(n > 0)
    }

    /// Upserts one thread's outcome into its slot inside the parent topic's
    /// eval result. Read-modify-write under the connection lock; terminal
    /// topics are left untouched. Returns the updated topic when applied.
    pub fn store_thread_result(
        &self,
        topic_id: i64,
        result: ThreadResult,
    ) -> anyhow::Result<Option<RunTopic>> {
        let conn = self.conn.lock().unwrap();
        let topic = conn
            .prepare(
                "SELECT id, run_id, test_case_id, status, score, passed, eval_json, created_at, updated_at
                 FROM run_topics WHERE id=?1",
            )?
            .query_row(params![topic_id], map_topic)
            .optional()?;
        let Some(mut topic) = topic else {
            return Ok(None);
        };
        if topic.status.is_terminal() {
            return Ok(None);
        }
        topic.eval_result.put_thread(result);
        let now = now_ms();
        conn.execute(
            "UPDATE run_topics SET eval_json=?1, updated_at=?2
             WHERE id=?3 AND status IN ('pending','running')",
            params![serde_json::to_string(&topic.eval_result)?, now, topic_id],
        )?;
        topic.updated_at = from_ms(now);
        Ok(Some(topic))
    }

    /// Removes error/timeout topics so a "retry failures" pass can re-dispatch
    /// them. Returns the deleted rows.
    pub fn delete_error_topics(&self, run_id: i64) -> anyhow::Result<Vec<RunTopic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_case_id, status, score, passed, eval_json, created_at, updated_at
             FROM run_topics WHERE run_id=?1 AND status IN ('error','timeout')",
        )?;
        let rows = stmt.query_map(params![run_id], map_topic)?;
        let mut doomed = Vec::new();
        for r in rows {
            doomed.push(r?);
        }
        drop(stmt);
        conn.execute(
            "DELETE FROM run_topics WHERE run_id=?1 AND status IN ('error','timeout')",
            params![run_id],
        )?;
        Ok(doomed)
    }

    /// Sweeps trials that have been `running` longer than the threshold into
    /// terminal `timeout`. Rows in any other status are untouched. Returns
    /// the swept rows so callers can recompute run resolution.
    pub fn batch_mark_timeout(
        &self,
        run_id: i64,
        threshold_ms: i64,
    ) -> anyhow::Result<Vec<RunTopic>> {
        let now = now_ms();
        let cutoff = now - threshold_ms;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_case_id, status, score, passed, eval_json, created_at, updated_at
             FROM run_topics WHERE run_id=?1 AND status='running' AND created_at < ?2",
        )?;
        let rows = stmt.query_map(params![run_id, cutoff], map_topic)?;
        let mut stale = Vec::new();
        for r in rows {
            stale.push(r?);
        }
        drop(stmt);

        let mut swept = Vec::new();
        for mut topic in stale {
            topic.eval_result.completion_reason = Some("timeout".into());
            let n = conn.execute(
                "UPDATE run_topics SET status='timeout', score=0, passed=0, eval_json=?1, updated_at=?2
                 WHERE id=?3 AND status='running'",
                params![serde_json::to_string(&topic.eval_result)?, now, topic.id],
            )?;
            if n > 0 {
                topic.status = TopicStatus::Timeout;
                topic.score = Some(0.0);
                topic.passed = Some(false);
                topic.updated_at = from_ms(now);
                swept.push(topic);
            }
        }
        Ok(swept)
    }

    /// `(terminal topics, dataset case count)` in one statement — the atomic
    /// read both completion paths use to decide "all done". Returns None for
    /// an unknown run.
    pub fn resolution_counts(&self, run_id: i64) -> anyhow::Result<Option<(u64, u64)>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT
               (SELECT COUNT(*) FROM run_topics
                 WHERE run_id = r.id
                   AND status IN ('passed','failed','error','timeout')),
               (SELECT COUNT(*) FROM test_cases WHERE dataset_id = r.dataset_id)
             FROM runs r WHERE r.id = ?1",
            params![run_id],
            |row| {
                let terminal: i64 = row.get(0)?;
                let total: i64 = row.get(1)?;
                Ok((terminal as u64, total as u64))
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let config_json: String = row.get(4)?;
    let metrics_json: Option<String> = row.get(6)?;
    let status: String = row.get(5)?;
    Ok(Run {
        id: row.get(0)?,
        user_id: row.get(1)?,
        dataset_id: row.get(2)?,
        target_agent_id: row.get(3)?,
        config: serde_json::from_str(&config_json).unwrap_or_default(),
        status: RunStatus::parse(&status),
        metrics: metrics_json.and_then(|m| serde_json::from_str(&m).ok()),
        started_at: row.get::<_, Option<i64>>(7)?.map(from_ms),
        created_at: from_ms(row.get(8)?),
        updated_at: from_ms(row.get(9)?),
    })
}

fn map_case(row: &Row<'_>) -> rusqlite::Result<TestCase> {
    Ok(TestCase {
        dataset_id: row.get(0)?,
        id: row.get(1)?,
        prompt: row.get(2)?,
        expected: row.get(3)?,
        sort_order: row.get(4)?,
    })
}

fn map_topic(row: &Row<'_>) -> rusqlite::Result<RunTopic> {
    let status: String = row.get(3)?;
    let eval_json: String = row.get(6)?;
    Ok(RunTopic {
        id: row.get(0)?,
        run_id: row.get(1)?,
        test_case_id: row.get(2)?,
        status: TopicStatus::parse(&status),
        score: row.get(4)?,
        passed: row
            .get::<_, Option<i64>>(5)?
            .map(|v| v != 0),
        eval_result: serde_json::from_str(&eval_json).unwrap_or_default(),
        created_at: from_ms(row.get(7)?),
        updated_at: from_ms(row.get(8)?),
    })
}

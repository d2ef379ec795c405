use crate::storage::store::{now_ms, Store};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

/// A durable orchestration step. Each variant is one of the engine's trigger
/// operations; the payload is everything a worker needs to re-run the step
/// from current DB state (handlers never assume first delivery).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Job {
    /// Walk one page of the test-case set, or dispatch an explicit fan-out
    /// chunk when `test_case_ids` is set.
    Paginate {
        run_id: i64,
        #[serde(default)]
        cursor: Option<String>,
        #[serde(default)]
        test_case_ids: Option<Vec<String>>,
    },
    /// Decide single-trial vs k-way execution for one test case.
    Execute { run_id: i64, test_case_id: String },
    /// Invoke the external runtime once for a k=1 case.
    Trajectory { run_id: i64, test_case_id: String },
    /// Invoke the external runtime for one thread of a k>1 topic.
    ThreadTrajectory {
        run_id: i64,
        test_case_id: String,
        thread_id: String,
        topic_id: i64,
    },
    /// Aggregate terminal topics into run metrics.
    Finalize { run_id: i64 },
    /// Sweep stale running trials into terminal `timeout`.
    Reap { run_id: i64, threshold_ms: i64 },
}

impl Job {
    pub fn op_name(&self) -> &'static str {
        match self {
            Job::Paginate { .. } => "paginate",
            Job::Execute { .. } => "execute",
            Job::Trajectory { .. } => "trajectory",
            Job::ThreadTrajectory { .. } => "thread_trajectory",
            Job::Finalize { .. } => "finalize",
            Job::Reap { .. } => "reap",
        }
    }
}

/// A claimed queue entry.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: i64,
    pub attempts: u32,
    pub job: Job,
}

impl Store {
    pub fn enqueue(&self, job: &Job) -> anyhow::Result<i64> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs(payload_json, status, attempts, run_after, created_at, updated_at)
             VALUES (?1, 'queued', 0, 0, ?2, ?2)",
            params![serde_json::to_string(job)?, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claims the oldest due job, flipping it queued -> running. Atomic
    /// because every queue access goes through the one connection mutex.
    pub fn claim_next(&self) -> anyhow::Result<Option<QueuedJob>> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, u32, String)> = conn
            .query_row(
                "SELECT id, attempts, payload_json FROM jobs
                 WHERE status='queued' AND run_after <= ?1
                 ORDER BY id LIMIT 1",
                params![now],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((id, attempts, payload)) = row else {
            return Ok(None);
        };
        conn.execute(
            "UPDATE jobs SET status='running', attempts=attempts+1, updated_at=?1 WHERE id=?2",
            params![now, id],
        )?;
        let job: Job = serde_json::from_str(&payload)?;
        Ok(Some(QueuedJob {
            id,
            attempts: attempts + 1,
            job,
        }))
    }

    pub fn ack_done(&self, job_id: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status='done', updated_at=?1 WHERE id=?2",
            params![now_ms(), job_id],
        )?;
        Ok(())
    }

    /// Requeues a failed job with backoff, or parks it as dead once the
    /// attempt budget is spent. At-least-once delivery either way.
    pub fn ack_retry(
        &self,
        job_id: i64,
        attempts: u32,
        max_attempts: u32,
        backoff_ms: i64,
        error: &str,
    ) -> anyhow::Result<()> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        if attempts >= max_attempts {
            conn.execute(
                "UPDATE jobs SET status='dead', last_error=?1, updated_at=?2 WHERE id=?3",
                params![error, now, job_id],
            )?;
        } else {
            conn.execute(
                "UPDATE jobs SET status='queued', run_after=?1, last_error=?2, updated_at=?3 WHERE id=?4",
                params![now + backoff_ms, error, now, job_id],
            )?;
        }
        Ok(())
    }

    /// Jobs still waiting or in flight. Zero means the queue has drained.
    pub fn queue_depth(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('queued','running')",
            [],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }
}

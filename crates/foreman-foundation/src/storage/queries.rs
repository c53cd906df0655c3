//! Query layer over the embedded database.
//!
//! Every function takes a `&mut SqliteConnection`, so callers decide the
//! transaction boundary; the engine wraps each operation in exactly one
//! transaction and commits or rolls back as a whole.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use foreman_kernel::model::{
    ApprovalSubject, Artifact, Event, Plan, PlanStepSpec, Run, RiskLevel, SafetyProfile, Session,
    SessionMode, Step, StepPayload, ToolDescriptor,
};
use foreman_kernel::status::WorkflowStatus;

use super::{StorageError, StorageResult};
use crate::tools::DEFAULT_TOOLS;

const EVENT_LIST_LIMIT: i64 = 100;

fn decode<T, E>(result: Result<T, E>) -> StorageResult<T>
where
    E: Into<String>,
{
    result.map_err(|e| StorageError::Decode(e.into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

fn session_from_row(row: &SqliteRow) -> StorageResult<Session> {
    let goal: String = row.try_get("goal")?;
    let mode: String = row.try_get("mode")?;
    let safety_profile: String = row.try_get("safety_profile")?;
    let status: String = row.try_get("status")?;
    Ok(Session {
        id: row.try_get("id")?,
        goal: if goal.is_empty() { None } else { Some(goal) },
        mode: decode(mode.parse::<SessionMode>())?,
        safety_profile: decode(safety_profile.parse::<SafetyProfile>())?,
        status: decode(status.parse::<WorkflowStatus>())?,
        plan_version: row.try_get("plan_version")?,
        needs_replan: row.try_get("needs_replan")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn insert_session(conn: &mut SqliteConnection, session: &Session) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO sessions (id, goal, mode, safety_profile, status, plan_version, needs_replan, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&session.id)
    .bind(session.goal.as_deref().unwrap_or(""))
    .bind(session.mode.as_str())
    .bind(session.safety_profile.as_str())
    .bind(session.status.as_str())
    .bind(session.plan_version)
    .bind(session.needs_replan)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_session(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> StorageResult<Option<Session>> {
    let row = sqlx::query(
        "SELECT id, goal, mode, safety_profile, status, plan_version, needs_replan, created_at, updated_at
         FROM sessions WHERE id = ?",
    )
    .bind(session_id)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(session_from_row).transpose()
}

pub async fn update_session_status(
    conn: &mut SqliteConnection,
    session_id: &str,
    status: WorkflowStatus,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    sqlx::query("UPDATE sessions SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(session_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Post-run roll-up: status plus the sticky `needs_replan` flag.
pub async fn update_session_rollup(
    conn: &mut SqliteConnection,
    session_id: &str,
    status: WorkflowStatus,
    needs_replan: bool,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    sqlx::query("UPDATE sessions SET status = ?, needs_replan = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(needs_replan)
        .bind(now)
        .bind(session_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Plan import resets the approval ladder and clears `needs_replan`; the
/// goal is only touched when the import carries a `session_goal` override.
pub async fn update_session_for_import(
    conn: &mut SqliteConnection,
    session_id: &str,
    goal: Option<&str>,
    plan_version: i64,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    sqlx::query(
        "UPDATE sessions
         SET goal = COALESCE(?, goal),
             status = ?,
             plan_version = ?,
             needs_replan = 0,
             updated_at = ?
         WHERE id = ?",
    )
    .bind(goal)
    .bind(WorkflowStatus::AwaitingPlanApproval.as_str())
    .bind(plan_version)
    .bind(now)
    .bind(session_id)
    .execute(conn)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Plans and steps
// ─────────────────────────────────────────────────────────────────────────────

fn plan_from_row(row: &SqliteRow) -> StorageResult<Plan> {
    Ok(Plan {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        version: row.try_get("version")?,
        title: row.try_get("title")?,
        raw_text: row.try_get("raw_text")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Upsert by `(session_id, version)` and return the plan's surrogate id.
pub async fn upsert_plan(
    conn: &mut SqliteConnection,
    session_id: &str,
    version: i64,
    title: &str,
    raw_text: &str,
    now: DateTime<Utc>,
) -> StorageResult<i64> {
    sqlx::query(
        "INSERT INTO plans (session_id, version, title, raw_text, created_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(session_id, version) DO UPDATE SET
             title = excluded.title,
             raw_text = excluded.raw_text",
    )
    .bind(session_id)
    .bind(version)
    .bind(title)
    .bind(raw_text)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM plans WHERE session_id = ? AND version = ?")
        .bind(session_id)
        .bind(version)
        .fetch_one(conn)
        .await?;
    Ok(id)
}

pub async fn fetch_plan(
    conn: &mut SqliteConnection,
    session_id: &str,
    version: i64,
) -> StorageResult<Option<Plan>> {
    let row = sqlx::query(
        "SELECT id, session_id, version, title, raw_text, created_at
         FROM plans WHERE session_id = ? AND version = ?",
    )
    .bind(session_id)
    .bind(version)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(plan_from_row).transpose()
}

fn step_from_row(row: &SqliteRow) -> StorageResult<Step> {
    let status: String = row.try_get("status")?;
    let risk: String = row.try_get("risk")?;
    let payload_json: String = row.try_get("payload_json")?;
    Ok(Step {
        id: row.try_get("id")?,
        plan_id: row.try_get("plan_id")?,
        step_key: row.try_get("step_key")?,
        title: row.try_get("title")?,
        tool_name: row.try_get("tool_name")?,
        status: decode(status.parse::<WorkflowStatus>())?,
        risk: decode(risk.parse::<RiskLevel>())?,
        payload: serde_json::from_str::<StepPayload>(&payload_json)?,
    })
}

/// Replace a plan's steps with the incoming list, order preserved.
/// `timeout_sec` is clamped here so the stored payload is already bounded.
pub async fn replace_plan_steps(
    conn: &mut SqliteConnection,
    plan_id: i64,
    steps: &[PlanStepSpec],
) -> StorageResult<()> {
    sqlx::query("DELETE FROM steps WHERE plan_id = ?")
        .bind(plan_id)
        .execute(&mut *conn)
        .await?;

    for spec in steps {
        let payload = StepPayload {
            inputs: spec.inputs.clone(),
            timeout_sec: spec.clamped_timeout_sec(),
        };
        sqlx::query(
            "INSERT INTO steps (plan_id, step_key, title, tool_name, status, risk, payload_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(plan_id)
        .bind(&spec.id)
        .bind(&spec.title)
        .bind(&spec.tool)
        .bind(WorkflowStatus::Pending.as_str())
        .bind(spec.risk.as_str())
        .bind(serde_json::to_string(&payload)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn fetch_plan_steps(
    conn: &mut SqliteConnection,
    plan_id: i64,
) -> StorageResult<Vec<Step>> {
    let rows = sqlx::query(
        "SELECT id, plan_id, step_key, title, tool_name, status, risk, payload_json
         FROM steps WHERE plan_id = ? ORDER BY id",
    )
    .bind(plan_id)
    .fetch_all(conn)
    .await?;
    rows.iter().map(step_from_row).collect()
}

/// A step joined with the version of the plan it belongs to.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: Step,
    pub plan_version: i64,
}

pub async fn fetch_step(
    conn: &mut SqliteConnection,
    session_id: &str,
    step_key: &str,
) -> StorageResult<Option<StepRecord>> {
    let row = sqlx::query(
        "SELECT
             s.id, s.plan_id, s.step_key, s.title, s.tool_name, s.status, s.risk, s.payload_json,
             p.version AS plan_version
         FROM steps AS s
         INNER JOIN plans AS p ON p.id = s.plan_id
         WHERE p.session_id = ? AND s.step_key = ?
         ORDER BY p.version DESC
         LIMIT 1",
    )
    .bind(session_id)
    .bind(step_key)
    .fetch_optional(conn)
    .await?;

    row.map(|row| {
        Ok(StepRecord {
            step: step_from_row(&row)?,
            plan_version: row.try_get("plan_version")?,
        })
    })
    .transpose()
}

pub async fn set_step_status(
    conn: &mut SqliteConnection,
    step_id: i64,
    status: WorkflowStatus,
) -> StorageResult<()> {
    sqlx::query("UPDATE steps SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(step_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn count_steps_not_succeeded(
    conn: &mut SqliteConnection,
    plan_id: i64,
) -> StorageResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM steps WHERE plan_id = ? AND status != ?")
            .bind(plan_id)
            .bind(WorkflowStatus::Succeeded.as_str())
            .fetch_one(conn)
            .await?,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Approvals
// ─────────────────────────────────────────────────────────────────────────────

pub async fn insert_approval(
    conn: &mut SqliteConnection,
    session_id: &str,
    subject: ApprovalSubject,
    plan_id: Option<i64>,
    step_id: Option<i64>,
    approved_by: &str,
    source: &str,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO approvals (session_id, plan_id, step_id, approval_type, approved, source, user_id, created_at)
         VALUES (?, ?, ?, ?, 1, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(plan_id)
    .bind(step_id)
    .bind(subject.as_str())
    .bind(source)
    .bind(approved_by)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn has_plan_approval(
    conn: &mut SqliteConnection,
    session_id: &str,
    plan_id: i64,
) -> StorageResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM approvals
         WHERE session_id = ? AND plan_id = ? AND approval_type = 'plan' AND approved = 1",
    )
    .bind(session_id)
    .bind(plan_id)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

pub async fn has_step_approval(
    conn: &mut SqliteConnection,
    session_id: &str,
    step_id: i64,
) -> StorageResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM approvals
         WHERE session_id = ? AND step_id = ? AND approval_type = 'step' AND approved = 1",
    )
    .bind(session_id)
    .bind(step_id)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Runs
// ─────────────────────────────────────────────────────────────────────────────

pub async fn insert_run(conn: &mut SqliteConnection, run: &Run) -> StorageResult<i64> {
    let output_json = run
        .output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let result = sqlx::query(
        "INSERT INTO runs (session_id, plan_id, step_id, tool_name, status, needs_replan, duration_ms, failure_reason, output_json, started_at, finished_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&run.session_id)
    .bind(run.plan_id)
    .bind(run.step_id)
    .bind(&run.tool_name)
    .bind(run.status.as_str())
    .bind(run.needs_replan)
    .bind(run.duration_ms())
    .bind(run.failure_reason.as_deref())
    .bind(output_json)
    .bind(run.started_at)
    .bind(run.finished_at)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Output of the most recent succeeded run of `step_key` in the session.
/// This is what `${steps.<id>.output}` references resolve against.
pub async fn latest_succeeded_output(
    conn: &mut SqliteConnection,
    session_id: &str,
    step_key: &str,
) -> StorageResult<Option<Value>> {
    let output_json: Option<Option<String>> = sqlx::query_scalar(
        "SELECT r.output_json
         FROM runs AS r
         INNER JOIN steps AS s ON s.id = r.step_id
         WHERE r.session_id = ? AND s.step_key = ? AND r.status = 'succeeded'
         ORDER BY r.id DESC
         LIMIT 1",
    )
    .bind(session_id)
    .bind(step_key)
    .fetch_optional(conn)
    .await?;

    match output_json.flatten() {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Draft of a journal row. `insert_event` is the only event-producing path.
#[derive(Debug, Clone)]
pub struct EventDraft<'a> {
    pub session_id: &'a str,
    pub run_id: Option<i64>,
    pub event_type: &'a str,
    pub summary: String,
    pub payload_text: String,
    pub source: &'a str,
    pub user_id: Option<&'a str>,
}

impl<'a> EventDraft<'a> {
    pub fn new(session_id: &'a str, event_type: &'a str, summary: impl Into<String>) -> Self {
        Self {
            session_id,
            run_id: None,
            event_type,
            summary: summary.into(),
            payload_text: String::new(),
            source: "daemon",
            user_id: None,
        }
    }

    pub fn run_id(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn payload_text(mut self, payload_text: impl Into<String>) -> Self {
        self.payload_text = payload_text.into();
        self
    }

    pub fn source(mut self, source: &'a str) -> Self {
        self.source = source;
        self
    }

    pub fn user_id(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

pub async fn insert_event(conn: &mut SqliteConnection, draft: EventDraft<'_>) -> StorageResult<i64> {
    let result = sqlx::query(
        "INSERT INTO events (session_id, run_id, event_type, summary, payload_text, source, user_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(draft.session_id)
    .bind(draft.run_id)
    .bind(draft.event_type)
    .bind(&draft.summary)
    .bind(&draft.payload_text)
    .bind(draft.source)
    .bind(draft.user_id)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

fn event_from_row(row: &SqliteRow) -> StorageResult<Event> {
    Ok(Event {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        run_id: row.try_get("run_id")?,
        event_type: row.try_get("event_type")?,
        summary: row.try_get("summary")?,
        payload_text: row.try_get("payload_text")?,
        source: row.try_get("source")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
    })
}

const EVENT_COLUMNS: &str =
    "id, session_id, run_id, event_type, summary, payload_text, source, user_id, created_at";

pub async fn list_recent_events(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> StorageResult<Vec<Event>> {
    let rows = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE session_id = ? ORDER BY id DESC LIMIT ?"
    ))
    .bind(session_id)
    .bind(EVENT_LIST_LIMIT)
    .fetch_all(conn)
    .await?;
    rows.iter().map(event_from_row).collect()
}

/// Full-text search. Errors out when the FTS object is missing or the query
/// trips the tokenizer; callers fall back to [`search_events_like`].
pub async fn search_events_fts(
    conn: &mut SqliteConnection,
    session_id: &str,
    query: &str,
) -> StorageResult<Vec<Event>> {
    let rows = sqlx::query(
        "SELECT e.id, e.session_id, e.run_id, e.event_type, e.summary, e.payload_text, e.source, e.user_id, e.created_at
         FROM events AS e
         INNER JOIN events_fts ON events_fts.rowid = e.id
         WHERE e.session_id = ? AND events_fts MATCH ?
         ORDER BY e.id DESC
         LIMIT ?",
    )
    .bind(session_id)
    .bind(query)
    .bind(EVENT_LIST_LIMIT)
    .fetch_all(conn)
    .await?;
    rows.iter().map(event_from_row).collect()
}

/// Case-insensitive substring scan over type, summary, and payload.
pub async fn search_events_like(
    conn: &mut SqliteConnection,
    session_id: &str,
    query: &str,
) -> StorageResult<Vec<Event>> {
    let pattern = format!("%{}%", query.to_lowercase());
    let rows = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE session_id = ?
           AND (LOWER(event_type) LIKE ? OR LOWER(summary) LIKE ? OR LOWER(payload_text) LIKE ?)
         ORDER BY id DESC
         LIMIT ?"
    ))
    .bind(session_id)
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(EVENT_LIST_LIMIT)
    .fetch_all(conn)
    .await?;
    rows.iter().map(event_from_row).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Artifacts
// ─────────────────────────────────────────────────────────────────────────────

pub async fn insert_artifact(
    conn: &mut SqliteConnection,
    session_id: &str,
    run_id: i64,
    step_id: i64,
    kind: &str,
    path: &str,
    sha256: &str,
    now: DateTime<Utc>,
) -> StorageResult<i64> {
    let result = sqlx::query(
        "INSERT INTO artifacts (session_id, run_id, step_id, kind, path, sha256, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(run_id)
    .bind(step_id)
    .bind(kind)
    .bind(path)
    .bind(sha256)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_artifacts(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> StorageResult<Vec<Artifact>> {
    let rows = sqlx::query(
        "SELECT id, session_id, run_id, step_id, kind, path, sha256, created_at
         FROM artifacts WHERE session_id = ? ORDER BY id DESC",
    )
    .bind(session_id)
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Artifact {
                id: row.try_get("id")?,
                session_id: row.try_get("session_id")?,
                run_id: row.try_get("run_id")?,
                step_id: row.try_get("step_id")?,
                kind: row.try_get("kind")?,
                path: row.try_get("path")?,
                sha256: row.try_get::<Option<String>, _>("sha256")?.unwrap_or_default(),
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool registry
// ─────────────────────────────────────────────────────────────────────────────

pub async fn ensure_default_tools(conn: &mut SqliteConnection) -> StorageResult<()> {
    for (tool_name, permission_profile, description) in DEFAULT_TOOLS.iter().copied() {
        sqlx::query(
            "INSERT INTO tool_registry (tool_name, permission_profile, description, enabled)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(tool_name) DO NOTHING",
        )
        .bind(tool_name)
        .bind(permission_profile)
        .bind(description)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn tool_from_row(row: &SqliteRow) -> StorageResult<ToolDescriptor> {
    Ok(ToolDescriptor {
        tool_name: row.try_get("tool_name")?,
        permission_profile: row.try_get("permission_profile")?,
        description: row.try_get("description")?,
        enabled: row.try_get("enabled")?,
    })
}

pub async fn list_tools(conn: &mut SqliteConnection) -> StorageResult<Vec<ToolDescriptor>> {
    let rows = sqlx::query(
        "SELECT tool_name, permission_profile, description, enabled
         FROM tool_registry ORDER BY tool_name",
    )
    .fetch_all(conn)
    .await?;
    rows.iter().map(tool_from_row).collect()
}

pub async fn fetch_tool(
    conn: &mut SqliteConnection,
    tool_name: &str,
) -> StorageResult<Option<ToolDescriptor>> {
    let row = sqlx::query(
        "SELECT tool_name, permission_profile, description, enabled
         FROM tool_registry WHERE tool_name = ?",
    )
    .bind(tool_name)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(tool_from_row).transpose()
}

use super::model::{NewRun, RunItem, RunSummary};
use crate::model::{Recipient, SendState, SendStatus};
use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let in_memory = database_url.starts_with("sqlite::memory");
    let normalized = prepare_sqlite_url(database_url);
    let mut options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }
    // Every connection to `:memory:` is a separate database.
    let max = if in_memory { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// For a file-backed SQLite URL, expand a leading `~/` and create the parent
/// directory. Other URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Persist a finished batch. `recipients` and `statuses` are parallel, in send order.
#[instrument(skip_all, fields(source = %run.source))]
pub async fn save_run(
    pool: &Pool,
    run: &NewRun,
    recipients: &[Recipient],
    statuses: &[SendStatus],
) -> Result<String> {
    if recipients.len() != statuses.len() {
        return Err(anyhow!(
            "run has {} recipients but {} statuses",
            recipients.len(),
            statuses.len()
        ));
    }
    let id = Uuid::new_v4().to_string();
    let sent = statuses
        .iter()
        .filter(|s| s.state == SendState::Success)
        .count() as i64;
    let failed = statuses
        .iter()
        .filter(|s| s.state == SendState::Error)
        .count() as i64;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO runs (id, source, total, sent, failed, started_at, finished_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&run.source)
    .bind(recipients.len() as i64)
    .bind(sent)
    .bind(failed)
    .bind(run.started_at)
    .bind(run.finished_at)
    .execute(&mut *tx)
    .await?;

    for (position, (recipient, status)) in recipients.iter().zip(statuses).enumerate() {
        let response = status
            .response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO run_items (run_id, position, recipient_email, recipient_name, subject_names, attachment_url, recipient_id, state, error, response) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(position as i64)
        .bind(&recipient.recipient_email)
        .bind(&recipient.recipient_name)
        .bind(&recipient.subject_names)
        .bind(&recipient.attachment_url)
        .bind(recipient.recipient_id.as_deref())
        .bind(status.state.as_str())
        .bind(status.error.as_deref())
        .bind(response)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(id)
}

fn summary_from_row(row: &SqliteRow) -> RunSummary {
    RunSummary {
        id: row.get("id"),
        source: row.get("source"),
        total: row.get("total"),
        sent: row.get("sent"),
        failed: row.get("failed"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    }
}

/// Most recent runs first.
#[instrument(skip_all)]
pub async fn list_runs(pool: &Pool, limit: i64) -> Result<Vec<RunSummary>> {
    let rows = sqlx::query(
        "SELECT id, source, total, sent, failed, started_at, finished_at FROM runs ORDER BY started_at DESC, id LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(summary_from_row).collect())
}

/// Look a run up by its full id or an unambiguous prefix of it.
#[instrument(skip_all)]
pub async fn find_run(pool: &Pool, id_or_prefix: &str) -> Result<Option<RunSummary>> {
    let pattern = format!("{}%", id_or_prefix.replace(['%', '_'], ""));
    let rows = sqlx::query(
        "SELECT id, source, total, sent, failed, started_at, finished_at FROM runs WHERE id LIKE ? LIMIT 2",
    )
    .bind(pattern)
    .fetch_all(pool)
    .await?;
    match rows.as_slice() {
        [] => Ok(None),
        [row] => Ok(Some(summary_from_row(row))),
        _ => Err(anyhow!("run id prefix '{id_or_prefix}' is ambiguous")),
    }
}

#[instrument(skip_all)]
pub async fn run_items(pool: &Pool, run_id: &str) -> Result<Vec<RunItem>> {
    let rows = sqlx::query(
        "SELECT position, recipient_email, recipient_name, subject_names, attachment_url, recipient_id, state, error, response FROM run_items WHERE run_id = ? ORDER BY position",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<RunItem> {
            let recipient = Recipient {
                recipient_email: row.get("recipient_email"),
                recipient_name: row.get("recipient_name"),
                subject_names: row.get("subject_names"),
                attachment_url: row.get("attachment_url"),
                recipient_id: row.get("recipient_id"),
            };
            let state_raw: String = row.get("state");
            let state = SendState::parse(&state_raw)
                .ok_or_else(|| anyhow!("unknown send state '{state_raw}' in run {run_id}"))?;
            let response: Option<String> = row.get("response");
            let response = response
                .map(|r| serde_json::from_str(&r))
                .transpose()
                .context("stored relay response is not JSON")?;
            let status = SendStatus {
                recipient_email: recipient.recipient_email.clone(),
                recipient_name: recipient.recipient_name.clone(),
                state,
                error: row.get("error"),
                response,
            };
            Ok(RunItem {
                position: row.get("position"),
                recipient,
                status,
            })
        })
        .collect()
}

/// Recipients whose send failed in the given run, in original order.
#[instrument(skip_all)]
pub async fn failed_recipients(pool: &Pool, run_id: &str) -> Result<Vec<Recipient>> {
    Ok(run_items(pool, run_id)
        .await?
        .into_iter()
        .filter(|item| item.status.state == SendState::Error)
        .map(|item| item.recipient)
        .collect())
}

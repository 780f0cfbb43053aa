use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use expense_core::{summarize, ExpenseRecord, TripSummary};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

/// A report being assembled: the append-only log of expense records owned by
/// the caller and handed to the engine by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSession {
    pub report_id: String,
    pub user_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub entries: Vec<ExpenseRecord>,
}

impl ReportSession {
    pub fn new(report_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            report_id: report_id.into(),
            user_id: None,
            expires_at,
            entries: Vec::new(),
        }
    }

    pub fn append(&mut self, record: ExpenseRecord) {
        self.entries.push(record);
    }

    pub fn summary(&self) -> TripSummary {
        summarize(&self.entries)
    }
}

pub trait ReportRepository: Send + Sync {
    async fn load_report(&self, report_id: &str) -> Result<Option<ReportSession>>;
    async fn upsert_report(&self, report: &ReportSession) -> Result<()>;
    /// Appends `record` to the report, creating it when missing, and returns
    /// the report as stored. Concurrent appends to one report all land.
    async fn append_record(
        &self,
        report_id: &str,
        user_id: Option<&str>,
        expires_at: DateTime<Utc>,
        record: &ExpenseRecord,
    ) -> Result<ReportSession>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    reports: Arc<RwLock<HashMap<String, ReportSession>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportRepository for MemoryStore {
    async fn load_report(&self, report_id: &str) -> Result<Option<ReportSession>> {
        Ok(self.reports.read().get(report_id).cloned())
    }

    async fn upsert_report(&self, report: &ReportSession) -> Result<()> {
        self.reports
            .write()
            .insert(report.report_id.clone(), report.clone());
        Ok(())
    }

    async fn append_record(
        &self,
        report_id: &str,
        user_id: Option<&str>,
        expires_at: DateTime<Utc>,
        record: &ExpenseRecord,
    ) -> Result<ReportSession> {
        let mut reports = self.reports.write();
        let report = reports
            .entry(report_id.to_string())
            .or_insert_with(|| ReportSession::new(report_id, expires_at));

        if let Some(user_id) = user_id {
            report.user_id = Some(user_id.to_string());
        }
        report.expires_at = expires_at;
        report.append(record.clone());

        Ok(report.clone())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0_u64;
        self.reports.write().retain(|_, value| {
            let keep = value.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS expense_reports (
              report_id TEXT PRIMARY KEY,
              user_id TEXT,
              expires_at TEXT NOT NULL,
              entries_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl ReportRepository for SqliteStore {
    async fn load_report(&self, report_id: &str) -> Result<Option<ReportSession>> {
        let row = sqlx::query(
            r#"
            SELECT report_id, user_id, expires_at, entries_json
            FROM expense_reports
            WHERE report_id = ?1
            "#,
        )
        .bind(report_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| session_from_row(&row)).transpose()
    }

    async fn upsert_report(&self, report: &ReportSession) -> Result<()> {
        let entries_json = serde_json::to_string(&report.entries)?;

        sqlx::query(
            r#"
            INSERT INTO expense_reports (report_id, user_id, expires_at, entries_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(report_id) DO UPDATE SET
              user_id=excluded.user_id,
              expires_at=excluded.expires_at,
              entries_json=excluded.entries_json
            "#,
        )
        .bind(&report.report_id)
        .bind(&report.user_id)
        .bind(timestamp(report.expires_at))
        .bind(entries_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_record(
        &self,
        report_id: &str,
        user_id: Option<&str>,
        expires_at: DateTime<Utc>,
        record: &ExpenseRecord,
    ) -> Result<ReportSession> {
        let record_json = serde_json::to_string(record)?;

        // One statement, so the read of the old log and the write of the new
        // one cannot interleave with another append.
        let row = sqlx::query(
            r#"
            INSERT INTO expense_reports (report_id, user_id, expires_at, entries_json)
            VALUES (?1, ?2, ?3, json_array(json(?4)))
            ON CONFLICT(report_id) DO UPDATE SET
              user_id=COALESCE(excluded.user_id, expense_reports.user_id),
              expires_at=excluded.expires_at,
              entries_json=json_insert(expense_reports.entries_json, '$[#]', json(?4))
            RETURNING report_id, user_id, expires_at, entries_json
            "#,
        )
        .bind(report_id)
        .bind(user_id)
        .bind(timestamp(expires_at))
        .bind(record_json)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed appending to report {}", report_id))?;

        session_from_row(&row)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM expense_reports WHERE expires_at <= ?1")
            .bind(timestamp(now))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Fixed-width UTC text so that string order in SQL matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn session_from_row(row: &SqliteRow) -> Result<ReportSession> {
    let report_id: String = row.get("report_id");
    let entries_json: String = row.get("entries_json");
    let entries = serde_json::from_str(&entries_json)
        .with_context(|| format!("corrupt entries for report {}", report_id))?;
    let expires_at = row
        .get::<String, _>("expires_at")
        .parse::<DateTime<Utc>>()
        .with_context(|| format!("corrupt expiry for report {}", report_id))?;

    Ok(ReportSession {
        report_id,
        user_id: row.get("user_id"),
        expires_at,
        entries,
    })
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }
}

impl ReportRepository for Store {
    async fn load_report(&self, report_id: &str) -> Result<Option<ReportSession>> {
        match self {
            Store::Memory(store) => store.load_report(report_id).await,
            Store::Sqlite(store) => store.load_report(report_id).await,
        }
    }

    async fn upsert_report(&self, report: &ReportSession) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_report(report).await,
            Store::Sqlite(store) => store.upsert_report(report).await,
        }
    }

    async fn append_record(
        &self,
        report_id: &str,
        user_id: Option<&str>,
        expires_at: DateTime<Utc>,
        record: &ExpenseRecord,
    ) -> Result<ReportSession> {
        match self {
            Store::Memory(store) => store.append_record(report_id, user_id, expires_at, record).await,
            Store::Sqlite(store) => store.append_record(report_id, user_id, expires_at, record).await,
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self {
            Store::Memory(store) => store.purge_expired(now).await,
            Store::Sqlite(store) => store.purge_expired(now).await,
        }
    }
}

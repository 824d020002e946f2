//! Persistence operations for emotion signals and reports.
//!
//! All functions take a `&Connection` and are called from async code via
//! `tokio::task::spawn_blocking`. Timestamps are stored as UTC
//! `YYYY-MM-DD HH:MM:SS` text, the same shape SQLite's `datetime('now')`
//! produces, so `date()` filters work on both.

use crate::error::EmotionError;
use chirp_types::{EmotionLabel, EmotionReport, EmotionSignal};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const SQLITE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn to_db_datetime(ts: DateTime<Utc>) -> String {
    ts.format(SQLITE_DATETIME_FORMAT).to_string()
}

fn from_db_datetime(text: &str) -> Result<DateTime<Utc>, EmotionError> {
    NaiveDateTime::parse_from_str(text, SQLITE_DATETIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| EmotionError::Timestamp(text.to_string()))
}

/// Parameters for recording one emotion signal.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub user_id: String,
    pub message_id: String,
    pub label: EmotionLabel,
    pub confidence: f64,
}

/// Records one emotion signal. Signals are append-only; nothing in this
/// crate updates or deletes them.
pub fn insert_signal(conn: &Connection, signal: &NewSignal) -> Result<EmotionSignal, EmotionError> {
    let created_at = Utc::now();
    let id = conn.query_row(
        "INSERT INTO emotion_signals (user_id, message_id, label, confidence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING id",
        params![
            signal.user_id,
            signal.message_id,
            signal.label.as_str(),
            signal.confidence,
            to_db_datetime(created_at),
        ],
        |row| row.get::<_, i64>(0),
    )?;

    Ok(EmotionSignal {
        id,
        user_id: signal.user_id.clone(),
        message_id: signal.message_id.clone(),
        label: signal.label,
        confidence: signal.confidence,
        created_at,
    })
}

/// Distinct user ids with at least one signal on `date`.
pub fn distinct_user_ids_on(conn: &Connection, date: NaiveDate) -> Result<Vec<String>, EmotionError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT user_id FROM emotion_signals
         WHERE date(created_at) = ?1
         ORDER BY user_id ASC",
    )?;
    let rows = stmt.query_map([date.to_string()], |row| row.get(0))?;

    let mut user_ids = Vec::new();
    for row in rows {
        user_ids.push(row?);
    }
    Ok(user_ids)
}

/// All of `user_id`'s signals on `date`, oldest first.
pub fn signals_for_user_on(
    conn: &Connection,
    user_id: &str,
    date: NaiveDate,
) -> Result<Vec<EmotionSignal>, EmotionError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, message_id, label, confidence, created_at
         FROM emotion_signals
         WHERE user_id = ?1 AND date(created_at) = ?2
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![user_id, date.to_string()], map_row_to_signal)?;

    let mut signals = Vec::new();
    for row in rows {
        signals.push(row??);
    }
    Ok(signals)
}

fn map_row_to_signal(row: &Row<'_>) -> rusqlite::Result<Result<EmotionSignal, EmotionError>> {
    let label_text: String = row.get(3)?;
    let created_text: String = row.get(5)?;
    Ok((|| {
        let label = label_text
            .parse::<EmotionLabel>()
            .map_err(|_| EmotionError::Label(label_text.clone()))?;
        Ok(EmotionSignal {
            id: row.get(0)?,
            user_id: row.get(1)?,
            message_id: row.get(2)?,
            label,
            confidence: row.get(4)?,
            created_at: from_db_datetime(&created_text)?,
        })
    })())
}

/// Parameters for persisting one daily report.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub user_id: String,
    pub report_date: NaiveDate,
    pub chat_count: u32,
    pub label_counts: BTreeMap<EmotionLabel, u32>,
    pub summary: String,
}

/// Persists one daily report with a null push timestamp.
///
/// The `(user_id, report_date)` unique constraint makes a duplicate
/// generate run fail loudly instead of producing two reports for one day.
pub fn insert_report(conn: &Connection, report: &NewReport) -> Result<EmotionReport, EmotionError> {
    let created_at = Utc::now();
    let label_counts_json = serde_json::to_string(&report.label_counts)?;
    let id = conn.query_row(
        "INSERT INTO emotion_reports
            (user_id, report_date, chat_count, label_counts_json, summary, created_at, pushed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
         RETURNING id",
        params![
            report.user_id,
            report.report_date.to_string(),
            report.chat_count,
            label_counts_json,
            report.summary,
            to_db_datetime(created_at),
        ],
        |row| row.get::<_, i64>(0),
    )?;

    Ok(EmotionReport {
        id,
        user_id: report.user_id.clone(),
        report_date: report.report_date,
        chat_count: report.chat_count,
        label_counts: report.label_counts.clone(),
        summary: report.summary.clone(),
        created_at,
        pushed_at: None,
    })
}

/// The report for `(user_id, date)`, if one has been generated.
pub fn get_report(
    conn: &Connection,
    user_id: &str,
    date: NaiveDate,
) -> Result<Option<EmotionReport>, EmotionError> {
    conn.query_row(
        "SELECT id, user_id, report_date, chat_count, label_counts_json, summary,
                created_at, pushed_at
         FROM emotion_reports
         WHERE user_id = ?1 AND report_date = ?2",
        params![user_id, date.to_string()],
        map_row_to_report,
    )
    .optional()?
    .transpose()
}

/// All reports for `date` that have not been pushed yet, oldest first.
pub fn unpushed_reports_on(
    conn: &Connection,
    date: NaiveDate,
) -> Result<Vec<EmotionReport>, EmotionError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, report_date, chat_count, label_counts_json, summary,
                created_at, pushed_at
         FROM emotion_reports
         WHERE report_date = ?1 AND pushed_at IS NULL
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([date.to_string()], map_row_to_report)?;

    let mut reports = Vec::new();
    for row in rows {
        reports.push(row??);
    }
    Ok(reports)
}

/// Stamps `pushed_at` on a report. The stamp is written at most once: a
/// report that already carries one is left untouched.
pub fn mark_pushed(
    conn: &Connection,
    report_id: i64,
    pushed_at: DateTime<Utc>,
) -> Result<(), EmotionError> {
    conn.execute(
        "UPDATE emotion_reports SET pushed_at = ?1 WHERE id = ?2 AND pushed_at IS NULL",
        params![to_db_datetime(pushed_at), report_id],
    )?;
    Ok(())
}

fn map_row_to_report(row: &Row<'_>) -> rusqlite::Result<Result<EmotionReport, EmotionError>> {
    let report_date_text: String = row.get(2)?;
    let label_counts_json: String = row.get(4)?;
    let created_text: String = row.get(6)?;
    let pushed_text: Option<String> = row.get(7)?;
    Ok((|| {
        let report_date = report_date_text
            .parse::<NaiveDate>()
            .map_err(|_| EmotionError::Timestamp(report_date_text.clone()))?;
        let pushed_at = pushed_text
            .as_deref()
            .map(from_db_datetime)
            .transpose()?;
        Ok(EmotionReport {
            id: row.get(0)?,
            user_id: row.get(1)?,
            report_date,
            chat_count: row.get(3)?,
            label_counts: serde_json::from_str(&label_counts_json)?,
            summary: row.get(5)?,
            created_at: from_db_datetime(&created_text)?,
            pushed_at,
        })
    })())
}

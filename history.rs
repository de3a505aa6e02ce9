//! Per-user ledger of recorded predictions.
//!
//! Rows are append-only. Listing joins the catalog on `short_name` ignoring
//! case; entries whose class never made it into the catalog are still
//! returned, with the enrichment columns left empty.

use crate::error::Result;
use crate::models::{
    millis_to_datetime, Confidence, HistoryEntry, HistoryId, RawLabel, ResolvedPrediction, UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

/// Outcome of [`record`]. Anonymous requests are `Skipped`, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Skipped,
    Stored(HistoryId),
}

/// Writes exactly one row for `user`, or nothing when there is no user.
/// Failures are returned as-is; the ledger never retries a write.
pub fn record(
    conn: &Connection,
    user: Option<UserId>,
    prediction: &ResolvedPrediction,
    image_reference: &str,
) -> Result<Recorded> {
    let Some(user) = user else {
        return Ok(Recorded::Skipped);
    };
    let id = insert_entry(conn, user, prediction, image_reference, Utc::now())?;
    log::debug!("Recorded history {} for user {user}", id.0);
    Ok(Recorded::Stored(id))
}

fn insert_entry(
    conn: &Connection,
    user: UserId,
    prediction: &ResolvedPrediction,
    image_reference: &str,
    created_at: DateTime<Utc>,
) -> Result<HistoryId> {
    let second = prediction.second_guess.as_ref();
    conn.execute(
        "INSERT INTO history (user_id, image_reference, predicted_class, raw_label, plant,
             condition, confidence, has_details, second_guess, second_confidence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            user.0,
            image_reference,
            prediction.canonical_class,
            prediction.raw_label.to_string(),
            prediction.plant,
            prediction.condition,
            prediction.confidence.score(),
            prediction.has_details,
            second.map(|s| s.canonical_class.as_str()),
            second.map(|s| s.confidence.score()),
            created_at.timestamp_millis(),
        ],
    )?;
    Ok(HistoryId(conn.last_insert_rowid()))
}

/// Newest first; rows sharing a timestamp fall back to id order.
pub fn list(conn: &Connection, user: UserId, limit: u32) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT h.id, h.user_id, h.image_reference, h.plant, h.condition, h.predicted_class,
                h.raw_label, h.confidence, h.has_details, h.second_guess, h.second_confidence,
                h.created_at, d.id, d.scientific_name, d.description_en, d.description_ar
         FROM history h
         LEFT JOIN diseases d ON d.short_name = h.predicted_class COLLATE NOCASE
         WHERE h.user_id = ?1
         ORDER BY h.created_at DESC, h.id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user.0, limit], entry_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let raw_label: String = row.get(6)?;
    let second_confidence: Option<f64> = row.get(10)?;
    Ok(HistoryEntry {
        id: HistoryId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        image_reference: row.get(2)?,
        plant: row.get(3)?,
        condition: row.get(4)?,
        predicted_class: row.get(5)?,
        raw_label: RawLabel::parse(&raw_label),
        confidence: Confidence::from_score(row.get(7)?),
        has_details: row.get(8)?,
        second_guess: row.get(9)?,
        second_confidence: second_confidence.map(Confidence::from_score),
        created_at: millis_to_datetime(row.get(11)?),
        disease_id: row.get(12)?,
        scientific_name: row.get(13)?,
        description_en: row.get(14)?,
        description_ar: row.get(15)?,
    })
}

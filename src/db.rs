use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::extract::{TargetConfig, Value};
use crate::sensor::Reading;
use crate::source::{Signal, Source};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            id                 INTEGER PRIMARY KEY,
            name               TEXT,
            kind               TEXT NOT NULL CHECK(kind IN ('http','file','upload')),
            locator            TEXT NOT NULL,
            scan_interval_secs INTEGER NOT NULL,
            status             TEXT NOT NULL DEFAULT 'pending'
                               CHECK(status IN ('pending','ok','error')),
            last_error         TEXT,
            created_at         TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(kind, locator)
        );

        -- Last parsed content, reused while checksum and modification time hold
        CREATE TABLE IF NOT EXISTS document_state (
            document_id     INTEGER PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
            checksum        TEXT NOT NULL,
            pdf_modified    TEXT,
            source_modified TEXT,
            etag            TEXT,
            pages           TEXT NOT NULL,
            page_count      INTEGER NOT NULL,
            fetched_at      TEXT NOT NULL,
            parsed_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS targets (
            id          INTEGER PRIMARY KEY,
            document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            config      TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(document_id, name)
        );
        CREATE INDEX IF NOT EXISTS idx_targets_document ON targets(document_id);

        CREATE TABLE IF NOT EXISTS readings (
            target_id     INTEGER PRIMARY KEY REFERENCES targets(id) ON DELETE CASCADE,
            state         TEXT,
            value         TEXT,
            last_modified TEXT,
            error         TEXT,
            updated_at    TEXT NOT NULL
        );

        -- target_id 0 marks a document-level issue
        CREATE TABLE IF NOT EXISTS issues (
            id                INTEGER PRIMARY KEY,
            document_id       INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            target_id         INTEGER NOT NULL DEFAULT 0,
            key               TEXT NOT NULL,
            message           TEXT NOT NULL,
            needs_reconfigure BOOLEAN NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at        TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(document_id, target_id, key)
        );
        CREATE INDEX IF NOT EXISTS idx_issues_document ON issues(document_id);
        ",
    )?;
    Ok(())
}

/// Connection shared by sequential callers, including async tasks that must
/// stay `Send` across awaits.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = connect(path)?;
        init_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }
}

// ── Documents ──

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub name: Option<String>,
    pub source: Source,
    pub scan_interval_secs: u64,
    pub status: String,
    pub last_error: Option<String>,
}

impl DocumentRow {
    pub fn title(&self) -> String {
        match self.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => format!("{} - {}", name, self.source),
            None => self.source.to_string(),
        }
    }
}

/// Returns `None` when the source is already configured.
pub fn insert_document(
    conn: &Connection,
    name: Option<&str>,
    source: &Source,
    scan_interval_secs: u64,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO documents (name, kind, locator, scan_interval_secs)
         VALUES (?1, ?2, ?3, ?4)",
        params![name, source.kind(), source.locator(), scan_interval_secs as i64],
    )?;
    Ok((inserted > 0).then(|| conn.last_insert_rowid()))
}

const DOCUMENT_COLUMNS: &str = "id, name, kind, locator, scan_interval_secs, status, last_error";

type RawDocument = (i64, Option<String>, String, String, i64, String, Option<String>);

fn raw_document(row: &rusqlite::Row) -> rusqlite::Result<RawDocument> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_document(raw: RawDocument) -> Result<DocumentRow> {
    let (id, name, kind, locator, interval, status, last_error) = raw;
    let source = Source::from_parts(&kind, &locator)
        .with_context(|| format!("Document {} has an unreadable source", id))?;
    Ok(DocumentRow {
        id,
        name,
        source,
        scan_interval_secs: interval.max(0) as u64,
        status,
        last_error,
    })
}

pub fn fetch_documents(conn: &Connection) -> Result<Vec<DocumentRow>> {
    let sql = format!("SELECT {} FROM documents ORDER BY id", DOCUMENT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], raw_document)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_document).collect()
}

pub fn fetch_document(conn: &Connection, id: i64) -> Result<Option<DocumentRow>> {
    let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
    let raw = conn.query_row(&sql, [id], raw_document).optional()?;
    raw.map(into_document).transpose()
}

pub fn delete_document(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn.execute("DELETE FROM documents WHERE id = ?1", [id])? > 0)
}

/// Point an existing document at a new name, source or interval.
///
/// Returns `None` when another document already uses the source.
pub fn update_document(
    conn: &Connection,
    id: i64,
    name: Option<&str>,
    source: &Source,
    scan_interval_secs: u64,
) -> Result<Option<bool>> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM documents WHERE kind = ?1 AND locator = ?2 AND id != ?3)",
        params![source.kind(), source.locator(), id],
        |row| row.get(0),
    )?;
    if taken {
        return Ok(None);
    }
    let updated = conn.execute(
        "UPDATE documents SET name = ?2, kind = ?3, locator = ?4, scan_interval_secs = ?5
         WHERE id = ?1",
        params![id, name, source.kind(), source.locator(), scan_interval_secs as i64],
    )?;
    Ok(Some(updated > 0))
}

pub fn set_document_status(conn: &Connection, id: i64, error: Option<&str>) -> Result<()> {
    let status = if error.is_some() { "error" } else { "ok" };
    conn.execute(
        "UPDATE documents SET status = ?2, last_error = ?3 WHERE id = ?1",
        params![id, status, error],
    )?;
    Ok(())
}

// ── Parsed state ──

#[derive(Debug, Clone)]
pub struct DocumentState {
    pub checksum: String,
    pub pdf_modified: Option<DateTime<FixedOffset>>,
    pub signal: Signal,
    pub pages: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub parsed_at: DateTime<Utc>,
}

impl DocumentState {
    /// Timestamp shown as `last_modified`: the PDF's own date, else the source's.
    pub fn last_modified(&self) -> Option<DateTime<FixedOffset>> {
        self.pdf_modified
            .or_else(|| self.signal.modified.map(|d| d.fixed_offset()))
    }
}

pub fn load_state(conn: &Connection, document_id: i64) -> Result<Option<DocumentState>> {
    let row = conn
        .query_row(
            "SELECT checksum, pdf_modified, source_modified, etag, pages, fetched_at, parsed_at
             FROM document_state WHERE document_id = ?1",
            [document_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<DateTime<FixedOffset>>>(1)?,
                    row.get::<_, Option<DateTime<Utc>>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, DateTime<Utc>>(5)?,
                    row.get::<_, DateTime<Utc>>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((checksum, pdf_modified, source_modified, etag, pages, fetched_at, parsed_at)) = row
    else {
        return Ok(None);
    };
    let pages: Vec<String> = serde_json::from_str(&pages)
        .with_context(|| format!("Corrupt page cache for document {}", document_id))?;
    Ok(Some(DocumentState {
        checksum,
        pdf_modified,
        signal: Signal {
            modified: source_modified,
            etag,
        },
        pages,
        fetched_at,
        parsed_at,
    }))
}

pub fn save_state(conn: &Connection, document_id: i64, state: &DocumentState) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO document_state
         (document_id, checksum, pdf_modified, source_modified, etag, pages, page_count, fetched_at, parsed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            document_id,
            state.checksum,
            state.pdf_modified,
            state.signal.modified,
            state.signal.etag,
            serde_json::to_string(&state.pages)?,
            state.pages.len() as i64,
            state.fetched_at,
            state.parsed_at,
        ],
    )?;
    Ok(())
}

/// Record a fetch that did not need a reparse.
pub fn touch_state(conn: &Connection, document_id: i64, signal: &Signal, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE document_state
         SET fetched_at = ?2,
             source_modified = COALESCE(?3, source_modified),
             etag = COALESCE(?4, etag)
         WHERE document_id = ?1",
        params![document_id, at, signal.modified, signal.etag],
    )?;
    Ok(())
}

// ── Targets ──

#[derive(Debug, Clone)]
pub struct TargetRow {
    pub id: i64,
    pub config: TargetConfig,
}

/// Returns `None` when the document already has a target with that name.
pub fn insert_target(conn: &Connection, document_id: i64, config: &TargetConfig) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO targets (document_id, name, config) VALUES (?1, ?2, ?3)",
        params![document_id, config.name, serde_json::to_string(config)?],
    )?;
    Ok((inserted > 0).then(|| conn.last_insert_rowid()))
}

/// A stored target whose config no longer deserializes.
#[derive(Debug, Clone)]
pub struct BrokenTarget {
    pub id: i64,
    pub name: String,
    pub error: String,
}

/// A document's targets, with unreadable rows split out instead of failing
/// the whole set.
pub fn fetch_targets_checked(
    conn: &Connection,
    document_id: i64,
) -> Result<(Vec<TargetRow>, Vec<BrokenTarget>)> {
    let mut stmt = conn.prepare(
        "SELECT id, name, config FROM targets WHERE document_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([document_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut targets = Vec::new();
    let mut broken = Vec::new();
    for (id, name, config) in rows {
        match serde_json::from_str(&config) {
            Ok(config) => targets.push(TargetRow { id, config }),
            Err(e) => {
                warn!("Target {} ({}) has an unreadable config: {}", id, name, e);
                broken.push(BrokenTarget { id, name, error: e.to_string() });
            }
        }
    }
    Ok((targets, broken))
}

/// Readable targets only.
pub fn fetch_targets(conn: &Connection, document_id: i64) -> Result<Vec<TargetRow>> {
    Ok(fetch_targets_checked(conn, document_id)?.0)
}

/// Owning document of a target, whether or not its config is readable.
pub fn target_document(conn: &Connection, id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT document_id FROM targets WHERE id = ?1", [id], |row| row.get(0))
        .optional()?)
}

/// Replace a target's config in place, keeping its id and reading.
///
/// Returns `None` when another target of the document already has the name.
pub fn update_target(conn: &Connection, id: i64, config: &TargetConfig) -> Result<Option<bool>> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM targets
                       WHERE name = ?2 AND id != ?1
                         AND document_id = (SELECT document_id FROM targets WHERE id = ?1))",
        params![id, config.name],
        |row| row.get(0),
    )?;
    if taken {
        return Ok(None);
    }
    let updated = conn.execute(
        "UPDATE targets SET name = ?2, config = ?3 WHERE id = ?1",
        params![id, config.name, serde_json::to_string(config)?],
    )?;
    Ok(Some(updated > 0))
}

pub fn delete_target(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn.execute("DELETE FROM targets WHERE id = ?1", [id])? > 0)
}

// ── Readings ──

pub fn save_reading(conn: &Connection, reading: &Reading) -> Result<()> {
    let value = reading.value.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT OR REPLACE INTO readings (target_id, state, value, last_modified, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            reading.target_id,
            reading.state,
            value,
            reading.last_modified,
            reading.error,
            reading.updated_at,
        ],
    )?;
    Ok(())
}

/// Readings joined with their target config, optionally for one document.
pub fn fetch_readings(conn: &Connection, document_id: Option<i64>) -> Result<Vec<Reading>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.config, r.state, r.value, r.last_modified, r.error, r.updated_at
         FROM readings r
         JOIN targets t ON t.id = r.target_id
         WHERE ?1 IS NULL OR t.document_id = ?1
         ORDER BY t.document_id, t.id",
    )?;
    let rows = stmt
        .query_map([document_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<DateTime<FixedOffset>>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, DateTime<Utc>>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(target_id, name, config, state, value, last_modified, error, updated_at)| -> Result<Reading> {
            // A broken config still has a reading; it just loses its attributes.
            let config: Option<TargetConfig> = serde_json::from_str(&config).ok();
            let value: Option<Value> = value.as_deref().map(serde_json::from_str).transpose()?;
            Ok(Reading {
                target_id,
                name,
                state,
                value,
                last_modified,
                unit_of_measurement: config.as_ref().and_then(|c| c.unit_of_measurement.clone()),
                device_class: config.as_ref().and_then(|c| c.device_class.clone()),
                state_class: config.as_ref().and_then(|c| c.state_class),
                updated_at,
                error,
            })
        })
        .collect()
}

// ── Issues ──

#[derive(Debug, Clone)]
pub struct IssueRow {
    pub id: i64,
    pub document_id: i64,
    pub target_id: Option<i64>,
    pub key: String,
    pub message: String,
    pub needs_reconfigure: bool,
    pub updated_at: DateTime<Utc>,
}

pub fn raise_issue(
    conn: &Connection,
    document_id: i64,
    target_id: Option<i64>,
    key: &str,
    message: &str,
    needs_reconfigure: bool,
) -> Result<()> {
    conn.execute(
        "INSERT INTO issues (document_id, target_id, key, message, needs_reconfigure)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(document_id, target_id, key)
         DO UPDATE SET message = excluded.message,
                       needs_reconfigure = excluded.needs_reconfigure,
                       updated_at = datetime('now')",
        params![document_id, target_id.unwrap_or(0), key, message, needs_reconfigure],
    )?;
    Ok(())
}

/// Clear every issue of a document (`None`) or of one of its targets.
pub fn clear_issues(conn: &Connection, document_id: i64, target_id: Option<i64>) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM issues WHERE document_id = ?1 AND target_id = ?2",
        params![document_id, target_id.unwrap_or(0)],
    )?)
}

pub fn fetch_issues(conn: &Connection) -> Result<Vec<IssueRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, target_id, key, message, needs_reconfigure, updated_at
         FROM issues ORDER BY document_id, target_id, key",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let target_id: i64 = row.get(2)?;
            Ok(IssueRow {
                id: row.get(0)?,
                document_id: row.get(1)?,
                target_id: (target_id != 0).then_some(target_id),
                key: row.get(3)?,
                message: row.get(4)?,
                needs_reconfigure: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::pages::PageRange;

    fn http(url: &str) -> Source {
        Source::parse_locator(url).unwrap()
    }

    #[test]
    fn documents_are_unique_per_source() {
        let store = Store::in_memory().unwrap();
        store
            .with(|c| {
                let src = http("https://example.com/a.pdf");
                let id = insert_document(c, Some("Menu"), &src, 60)?;
                assert!(id.is_some());
                assert!(insert_document(c, None, &src, 120)?.is_none());

                let docs = fetch_documents(c)?;
                assert_eq!(docs.len(), 1);
                assert_eq!(docs[0].title(), "Menu - https://example.com/a.pdf");
                assert_eq!(docs[0].status, "pending");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn state_round_trips() {
        let store = Store::in_memory().unwrap();
        store
            .with(|c| {
                let id = insert_document(c, None, &http("https://example.com/a.pdf"), 60)?.unwrap();
                assert!(load_state(c, id)?.is_none());

                let state = DocumentState {
                    checksum: "abc".into(),
                    pdf_modified: crate::pdf::parse_pdf_date("D:20240101000000+02'00'"),
                    signal: Signal { modified: None, etag: Some("\"e1\"".into()) },
                    pages: vec!["p1".into(), "p2".into()],
                    fetched_at: Utc::now(),
                    parsed_at: Utc::now(),
                };
                save_state(c, id, &state)?;
                let loaded = load_state(c, id)?.unwrap();
                assert_eq!(loaded.pages, state.pages);
                assert_eq!(loaded.pdf_modified, state.pdf_modified);
                assert_eq!(loaded.signal.etag.as_deref(), Some("\"e1\""));

                touch_state(c, id, &Signal::default(), Utc::now())?;
                assert_eq!(load_state(c, id)?.unwrap().signal.etag.as_deref(), Some("\"e1\""));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deleting_a_document_cascades() {
        let store = Store::in_memory().unwrap();
        store
            .with(|c| {
                let doc = insert_document(c, None, &http("https://example.com/a.pdf"), 60)?.unwrap();
                let target = TargetConfig::new("Level", PageRange::single(1));
                let tid = insert_target(c, doc, &target)?.unwrap();
                assert!(insert_target(c, doc, &target)?.is_none());
                raise_issue(c, doc, Some(tid), "no_matches", "none", false)?;

                assert!(delete_document(c, doc)?);
                assert!(fetch_targets(c, doc)?.is_empty());
                assert!(fetch_issues(c)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn issues_upsert_and_clear() {
        let store = Store::in_memory().unwrap();
        store
            .with(|c| {
                let doc = insert_document(c, None, &http("https://example.com/a.pdf"), 60)?.unwrap();
                raise_issue(c, doc, None, "http_error", "HTTP status 500", true)?;
                raise_issue(c, doc, None, "http_error", "HTTP status 502", true)?;

                let issues = fetch_issues(c)?;
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].message, "HTTP status 502");
                assert!(issues[0].target_id.is_none());
                assert!(issues[0].needs_reconfigure);

                assert_eq!(clear_issues(c, doc, None)?, 1);
                assert!(fetch_issues(c)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn readings_join_target_config() {
        let store = Store::in_memory().unwrap();
        store
            .with(|c| {
                let doc = insert_document(c, None, &http("https://example.com/a.pdf"), 60)?.unwrap();
                let mut target = TargetConfig::new("Level", PageRange::single(1));
                target.unit_of_measurement = Some("m".into());
                let tid = insert_target(c, doc, &target)?.unwrap();

                save_reading(
                    c,
                    &Reading {
                        target_id: tid,
                        name: target.name.clone(),
                        state: Some("3.2".into()),
                        value: Some(Value::Text("3.2".into())),
                        last_modified: None,
                        unit_of_measurement: None,
                        device_class: None,
                        state_class: None,
                        updated_at: Utc::now(),
                        error: None,
                    },
                )?;

                let readings = fetch_readings(c, Some(doc))?;
                assert_eq!(readings.len(), 1);
                assert_eq!(readings[0].name, "Level");
                assert_eq!(readings[0].unit_of_measurement.as_deref(), Some("m"));
                assert_eq!(readings[0].value, Some(Value::Text("3.2".into())));
                assert!(fetch_readings(c, Some(doc + 1))?.is_empty());
                assert_eq!(fetch_readings(c, None)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn unreadable_targets_are_split_out() {
        let store = Store::in_memory().unwrap();
        store
            .with(|c| {
                let doc = insert_document(c, None, &http("https://example.com/a.pdf"), 60)?.unwrap();
                let good = insert_target(c, doc, &TargetConfig::new("Good", PageRange::single(1)))?.unwrap();
                c.execute(
                    "INSERT INTO targets (document_id, name, config) VALUES (?1, 'Bad', ?2)",
                    params![doc, r#"{"name":"Bad","pages":"0"}"#],
                )?;
                let bad = c.last_insert_rowid();

                let (targets, broken) = fetch_targets_checked(c, doc)?;
                assert_eq!(targets.len(), 1);
                assert_eq!(targets[0].id, good);
                assert_eq!(broken.len(), 1);
                assert_eq!((broken[0].id, broken[0].name.as_str()), (bad, "Bad"));
                assert_eq!(target_document(c, bad)?, Some(doc));

                save_reading(
                    c,
                    &Reading {
                        target_id: bad,
                        name: "Bad".into(),
                        state: None,
                        value: None,
                        last_modified: None,
                        unit_of_measurement: None,
                        device_class: None,
                        state_class: None,
                        updated_at: Utc::now(),
                        error: Some("unreadable".into()),
                    },
                )?;
                let readings = fetch_readings(c, Some(doc))?;
                assert_eq!(readings.len(), 1);
                assert_eq!(readings[0].name, "Bad");
                assert!(!readings[0].is_available());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn updates_keep_ids_and_refuse_duplicates() {
        let store = Store::in_memory().unwrap();
        store
            .with(|c| {
                let a = insert_document(c, Some("A"), &http("https://example.com/a.pdf"), 60)?.unwrap();
                insert_document(c, None, &http("https://example.com/b.pdf"), 60)?.unwrap();

                assert_eq!(update_document(c, a, None, &http("https://example.com/b.pdf"), 60)?, None);
                assert_eq!(
                    update_document(c, a, Some("A2"), &http("https://example.com/c.pdf"), 90)?,
                    Some(true)
                );
                let doc = fetch_document(c, a)?.unwrap();
                assert_eq!(doc.title(), "A2 - https://example.com/c.pdf");
                assert_eq!(doc.scan_interval_secs, 90);

                let level = insert_target(c, a, &TargetConfig::new("Level", PageRange::single(1)))?.unwrap();
                insert_target(c, a, &TargetConfig::new("Flow", PageRange::single(1)))?.unwrap();
                assert_eq!(update_target(c, level, &TargetConfig::new("Flow", PageRange::All))?, None);
                assert_eq!(update_target(c, level, &TargetConfig::new("Depth", PageRange::All))?, Some(true));
                let row = fetch_targets(c, a)?.into_iter().find(|t| t.id == level).unwrap();
                assert_eq!(row.config.name, "Depth");
                assert_eq!(row.config.pages, PageRange::All);
                Ok(())
            })
            .unwrap();
    }
}

//! System-of-record access for knowledge-base records.

use crate::types::{KbRecord, RecordId};
use chrono::{DateTime, NaiveDateTime, Utc};
use kbvec_core::{AppError, AppResult};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};

/// Read access to the authoritative record store.
pub trait RecordSource: Send + Sync + std::fmt::Debug {
    /// Fetch one record; `Ok(None)` when it does not exist.
    fn get_record(&self, id: RecordId) -> AppResult<Option<KbRecord>>;

    /// Every record, ordered by identifier.
    fn load_all(&self) -> AppResult<Vec<KbRecord>>;

    /// Verify the source is reachable and usable.
    fn check_ready(&self) -> AppResult<()> {
        Ok(())
    }

    /// Number of records held by the source.
    fn record_count(&self) -> AppResult<usize> {
        Ok(self.load_all()?.len())
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, category, question, context, answer, create_time, update_time FROM knowledge_base";

const REQUIRED_COLUMNS: [&str; 5] = ["id", "category", "question", "context", "answer"];

/// Records stored in the `knowledge_base` table of a SQLite database.
///
/// A read-only connection is opened per call; the database is owned by
/// another process and may be replaced underneath us.
#[derive(Debug, Clone)]
pub struct SqliteRecordSource {
    db_path: PathBuf,
}

impl SqliteRecordSource {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        tracing::info!("Record source initialized with database: {:?}", db_path);
        Self { db_path }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> AppResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Connection::open_with_flags(&self.db_path, flags).map_err(|e| {
            AppError::Database(format!(
                "Failed to open database {:?}: {}",
                self.db_path, e
            ))
        })
    }

    /// Verify the table exists and carries the required columns.
    pub fn check_schema(&self) -> AppResult<()> {
        let conn = self.connect()?;

        let table: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='knowledge_base'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Database(format!("Failed to inspect schema: {}", e)))?;
        if table.is_none() {
            return Err(AppError::Database(
                "knowledge_base table not found in database".to_string(),
            ));
        }

        let mut stmt = conn
            .prepare("PRAGMA table_info(knowledge_base)")
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| AppError::Database(format!("Failed to read columns: {}", e)))?
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::Database(format!("Failed to read columns: {}", e)))?;

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|required| !columns.iter().any(|c| c.as_str() == *required))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Database(format!(
                "Missing required columns: {}",
                missing.join(", ")
            )));
        }

        tracing::debug!("Database schema validation passed");
        Ok(())
    }

    /// Number of rows in the table.
    pub fn count(&self) -> AppResult<usize> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM knowledge_base", [], |row| {
            row.get::<_, i64>(0).map(|v| v as usize)
        })
        .map_err(|e| AppError::Database(format!("Failed to count records: {}", e)))
    }

    /// Distinct non-null categories, sorted.
    pub fn categories(&self) -> AppResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT category FROM knowledge_base \
                 WHERE category IS NOT NULL ORDER BY category",
            )
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Database(format!("Failed to query categories: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to read categories: {}", e)))?;
        Ok(categories)
    }

    /// Open the database and run a trivial query.
    pub fn test_connection(&self) -> AppResult<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| AppError::Database(format!("Connection test failed: {}", e)))?;
        Ok(())
    }
}

impl RecordSource for SqliteRecordSource {
    fn get_record(&self, id: RecordId) -> AppResult<Option<KbRecord>> {
        // SQLite keys are signed; ids beyond i64::MAX cannot be stored.
        let Ok(key) = i64::try_from(id) else {
            tracing::debug!("Record {} is outside the SQLite key range", id);
            return Ok(None);
        };

        let conn = self.connect()?;
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);

        let record = conn
            .query_row(&sql, params![key], row_to_record)
            .optional()
            .map_err(|e| AppError::Database(format!("Failed to get record {}: {}", id, e)))?;

        match &record {
            Some(_) => tracing::debug!("Retrieved record {}", id),
            None => tracing::debug!("Record {} not found", id),
        }
        Ok(record)
    }

    fn load_all(&self) -> AppResult<Vec<KbRecord>> {
        let conn = self.connect()?;
        let sql = format!("{} ORDER BY id", SELECT_COLUMNS);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| AppError::Database(format!("Failed to load records: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            match row {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable record row: {}", e),
            }
        }

        tracing::info!("Loaded {} records from {:?}", records.len(), self.db_path);
        Ok(records)
    }

    fn check_ready(&self) -> AppResult<()> {
        self.test_connection()?;
        self.check_schema()
    }

    fn record_count(&self) -> AppResult<usize> {
        self.count()
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<KbRecord> {
    let id: i64 = row.get(0)?;
    if id <= 0 {
        return Err(rusqlite::Error::IntegralValueOutOfRange(0, id));
    }

    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };

    Ok(KbRecord {
        id: id as RecordId,
        category: text(1)?,
        question: text(2)?,
        context: text(3)?,
        answer: text(4)?,
        created_at: parse_timestamp(row.get::<_, Option<String>>(5)?.as_deref()),
        updated_at: parse_timestamp(row.get::<_, Option<String>>(6)?.as_deref()),
    })
}

/// Parse an RFC 3339 or `YYYY-MM-DD HH:MM:SS` timestamp, falling back to now.
fn parse_timestamp(value: Option<&str>) -> DateTime<Utc> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Utc::now();
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return naive.and_utc();
        }
    }

    tracing::debug!("Unparseable timestamp {:?}, using current time", value);
    Utc::now()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use tempfile::TempDir;

    /// Create a `knowledge_base` table and insert the given rows.
    pub(crate) fn seed_database(
        dir: &TempDir,
        rows: &[(i64, Option<&str>, Option<&str>, Option<&str>, Option<&str>)],
    ) -> PathBuf {
        let path = dir.path().join("support.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE knowledge_base (
                id INTEGER PRIMARY KEY,
                category TEXT,
                question TEXT,
                context TEXT,
                answer TEXT,
                create_time TEXT,
                update_time TEXT
            );
            "#,
        )
        .unwrap();

        for (id, category, question, context, answer) in rows {
            conn.execute(
                "INSERT INTO knowledge_base (id, category, question, context, answer, create_time, update_time) \
                 VALUES (?1, ?2, ?3, ?4, ?5, '2024-03-01 10:20:30', '2024-03-02T08:00:00Z')",
                params![id, category, question, context, answer],
            )
            .unwrap();
        }
        path
    }

    #[test]
    fn test_load_all_ordered_with_null_columns() {
        let dir = TempDir::new().unwrap();
        let path = seed_database(
            &dir,
            &[
                (2, Some("billing"), Some("How do I pay?"), None, Some("By card")),
                (1, None, Some("Reset password"), Some("[0.1,0.2]"), Some("Use the link")),
            ],
        );

        let source = SqliteRecordSource::new(&path);
        let records = source.load_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].category, "");
        assert_eq!(records[1].context, "");
        assert_eq!(records[0].created_at.year(), 2024);
        assert_eq!(records[0].created_at.second(), 30);
        assert_eq!(records[0].updated_at.hour(), 8);
    }

    #[test]
    fn test_get_record() {
        let dir = TempDir::new().unwrap();
        let path = seed_database(&dir, &[(5, Some("faq"), Some("q"), None, Some("a"))]);

        let source = SqliteRecordSource::new(&path);
        assert_eq!(source.get_record(5).unwrap().unwrap().answer, "a");
        assert!(source.get_record(6).unwrap().is_none());
    }

    #[test]
    fn test_get_record_beyond_key_range() {
        let dir = TempDir::new().unwrap();
        let path = seed_database(&dir, &[(-1, Some("faq"), Some("q"), None, Some("a"))]);

        let source = SqliteRecordSource::new(&path);
        assert!(source.get_record(u64::MAX).unwrap().is_none());
        assert!(source.get_record(i64::MAX as u64 + 1).unwrap().is_none());
    }

    #[test]
    fn test_helpers() {
        let dir = TempDir::new().unwrap();
        let path = seed_database(
            &dir,
            &[
                (1, Some("faq"), Some("q1"), None, Some("a1")),
                (2, Some("billing"), Some("q2"), None, Some("a2")),
                (3, Some("faq"), Some("q3"), None, Some("a3")),
            ],
        );

        let source = SqliteRecordSource::new(&path);
        assert!(source.test_connection().is_ok());
        assert!(source.check_schema().is_ok());
        assert_eq!(source.count().unwrap(), 3);
        assert_eq!(source.categories().unwrap(), vec!["billing", "faq"]);
    }

    #[test]
    fn test_missing_database_is_not_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.db");

        let source = SqliteRecordSource::new(&path);
        assert!(source.test_connection().is_err());
        assert!(source.check_ready().is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_check_schema_missing_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path).unwrap();

        let source = SqliteRecordSource::new(&path);
        assert!(matches!(
            source.check_schema(),
            Err(AppError::Database(_))
        ));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp(Some("2023-05-06T07:08:09+02:00"));
        assert_eq!(rfc.hour(), 5);

        let plain = parse_timestamp(Some("2023-05-06 07:08:09"));
        assert_eq!(plain.minute(), 8);

        let before = Utc::now();
        let fallback = parse_timestamp(Some("yesterday"));
        assert!(fallback >= before);
        assert!(parse_timestamp(None) >= before);
    }
}

//! SQLite-based storage implementation

use std::sync::Mutex;

use async_trait::async_trait;
use carelink_core::{
    GroupId, ItemId, NewPrescription, Prescription, PrescriptionId, PrescriptionItem,
    PrescriptionPatch, PrescriptionStatus, TimesOfDay,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::{KvStore, StoreResult};
use crate::error::CareError;
use crate::repository::PrescriptionRepository;

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

/// SQLite-based store implementing both KvStore and PrescriptionRepository
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path
    pub fn open(path: &str) -> Result<Self, CareError> {
        let conn = Connection::open(path)?;

        // Enable foreign keys
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Run migrations
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run database migrations
    fn migrate(conn: &Connection) -> Result<(), CareError> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }
            if current_version < 2 {
                Self::migrate_v2(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    fn get_schema_version(conn: &Connection) -> Result<i32, CareError> {
        let table_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
        })?)
    }

    /// Migration to version 1: key-value table
    fn migrate_v1(conn: &Connection) -> Result<(), CareError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Migration to version 2: prescription tables
    fn migrate_v2(conn: &Connection) -> Result<(), CareError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS prescriptions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                care_target_id TEXT NOT NULL,
                title TEXT,
                created_at INTEGER NOT NULL,
                source_image_ref TEXT,
                status TEXT NOT NULL,
                raw_recognized_text TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_prescriptions_care_target
                ON prescriptions(care_target_id, created_at);

            -- Items (owned by their prescription)
            CREATE TABLE IF NOT EXISTS prescription_items (
                prescription_id TEXT NOT NULL REFERENCES prescriptions(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                id TEXT NOT NULL,
                drug_name_local TEXT NOT NULL,
                drug_name_translated TEXT,
                dose TEXT NOT NULL,
                times_of_day TEXT NOT NULL,
                note_local TEXT,
                note_translated TEXT,
                PRIMARY KEY (prescription_id, id)
            );
            "#,
        )?;
        Ok(())
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Columns: id, care_target_id, title, created_at, source_image_ref, status, raw_recognized_text
const PRESCRIPTION_COLUMNS: &str =
    "id, care_target_id, title, created_at, source_image_ref, status, raw_recognized_text";

fn row_to_prescription(row: &Row<'_>) -> rusqlite::Result<Prescription> {
    let status: String = row.get(5)?;
    Ok(Prescription {
        id: PrescriptionId(row.get(0)?),
        care_target_id: GroupId(row.get(1)?),
        title: row.get(2)?,
        created_at: millis_to_datetime(row.get(3)?),
        source_image_ref: row.get(4)?,
        status: status.parse().unwrap_or(PrescriptionStatus::NeedsManualFix),
        raw_recognized_text: row.get(6)?,
        items: Vec::new(),
    })
}

fn load_items(conn: &Connection, prescription_id: &str) -> rusqlite::Result<Vec<PrescriptionItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, drug_name_local, drug_name_translated, dose, times_of_day, note_local, note_translated
         FROM prescription_items WHERE prescription_id = ?1 ORDER BY position",
    )?;
    let items = stmt
        .query_map(params![prescription_id], |row| {
            let times: String = row.get(4)?;
            Ok(PrescriptionItem {
                id: ItemId(row.get(0)?),
                drug_name_local: row.get(1)?,
                drug_name_translated: row.get(2)?,
                dose: row.get(3)?,
                times_of_day: serde_json::from_str::<TimesOfDay>(&times).unwrap_or_default(),
                note_local: row.get(5)?,
                note_translated: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

fn insert_items(
    tx: &Transaction<'_>,
    prescription_id: &PrescriptionId,
    items: &[PrescriptionItem],
) -> Result<(), CareError> {
    let mut stmt = tx.prepare(
        "INSERT INTO prescription_items
         (prescription_id, position, id, drug_name_local, drug_name_translated, dose, times_of_day, note_local, note_translated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for (position, item) in items.iter().enumerate() {
        stmt.execute(params![
            prescription_id.as_str(),
            position as i64,
            item.id.as_str(),
            item.drug_name_local,
            item.drug_name_translated,
            item.dose,
            serde_json::to_string(&item.times_of_day)?,
            item.note_local,
            item.note_translated,
        ])?;
    }
    Ok(())
}

fn get_prescription(conn: &Connection, id: &PrescriptionId) -> Result<Option<Prescription>, CareError> {
    let sql = format!("SELECT {} FROM prescriptions WHERE id = ?1", PRESCRIPTION_COLUMNS);
    let Some(mut rx) = conn
        .query_row(&sql, params![id.as_str()], row_to_prescription)
        .optional()?
    else {
        return Ok(None);
    };
    rx.items = load_items(conn, id.as_str())?;
    Ok(Some(rx))
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn();
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[async_trait]
impl PrescriptionRepository for SqliteStore {
    async fn create(&self, input: NewPrescription) -> StoreResult<PrescriptionId> {
        let id = PrescriptionId::generate();
        let rx = Prescription::from_new(id.clone(), input);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO prescriptions (id, care_target_id, title, created_at, source_image_ref, status, raw_recognized_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rx.id.as_str(),
                rx.care_target_id.as_str(),
                rx.title,
                rx.created_at.timestamp_millis(),
                rx.source_image_ref,
                rx.status.as_str(),
                rx.raw_recognized_text,
            ],
        )?;
        insert_items(&tx, &rx.id, &rx.items)?;
        tx.commit()?;

        tracing::info!(prescription_id = %id, care_target_id = %rx.care_target_id, "Prescription created");
        Ok(id)
    }

    async fn update(&self, id: &PrescriptionId, patch: PrescriptionPatch) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut rx = get_prescription(&tx, id)?
            .ok_or_else(|| CareError::NotFound(format!("prescription {}", id)))?;
        let replace_items = patch.items.is_some();
        rx.apply_patch(patch);

        tx.execute(
            "UPDATE prescriptions SET title = ?1, source_image_ref = ?2, status = ?3, raw_recognized_text = ?4
             WHERE id = ?5",
            params![
                rx.title,
                rx.source_image_ref,
                rx.status.as_str(),
                rx.raw_recognized_text,
                id.as_str(),
            ],
        )?;
        if replace_items {
            tx.execute(
                "DELETE FROM prescription_items WHERE prescription_id = ?1",
                params![id.as_str()],
            )?;
            insert_items(&tx, id, &rx.items)?;
        }
        tx.commit()?;

        tracing::info!(prescription_id = %id, "Prescription updated");
        Ok(())
    }

    async fn list_by_care_target(
        &self,
        care_target_id: &GroupId,
    ) -> StoreResult<Vec<Prescription>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM prescriptions WHERE care_target_id = ?1 ORDER BY created_at DESC, seq DESC",
            PRESCRIPTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut records = stmt
            .query_map(params![care_target_id.as_str()], row_to_prescription)?
            .collect::<Result<Vec<_>, _>>()?;
        for rx in records.iter_mut() {
            rx.items = load_items(&conn, rx.id.as_str())?;
        }
        Ok(records)
    }

    async fn get_by_id(&self, id: &PrescriptionId) -> StoreResult<Option<Prescription>> {
        let conn = self.conn();
        get_prescription(&conn, id)
    }

    async fn delete(&self, id: &PrescriptionId) -> StoreResult<()> {
        let conn = self.conn();
        // Items go with it through ON DELETE CASCADE
        let removed = conn.execute("DELETE FROM prescriptions WHERE id = ?1", params![id.as_str()])?;
        if removed > 0 {
            tracing::info!(prescription_id = %id, "Prescription deleted");
        }
        Ok(())
    }

    async fn purge(&self) -> StoreResult<usize> {
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM prescriptions", [])?)
    }
}

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use crate::types::{Place, Reminder, ReminderId};

/// Persisted collection of reminders.
///
/// Every targeted update returns the number of rows it touched; zero means the
/// reminder is gone and is never an error by itself.
pub trait ReminderStore: Send + Sync {
    /// Insert a reminder and return its id. A reminder that already carries a
    /// positive id replaces the row with that id.
    fn insert(&self, reminder: &Reminder) -> Result<ReminderId>;
    fn update(&self, reminder: &Reminder) -> Result<usize>;
    fn delete_by_id(&self, id: ReminderId) -> Result<usize>;
    fn get_by_id(&self, id: ReminderId) -> Result<Option<Reminder>>;
    /// All reminders, most recently edited first.
    fn get_all(&self) -> Result<Vec<Reminder>>;
    fn get_completed(&self) -> Result<Vec<Reminder>>;
    fn set_completed(&self, id: ReminderId, completed: bool) -> Result<usize>;
    /// Set the date-time trigger: armed flag and target timestamp together.
    fn set_date_time_armed(
        &self,
        id: ReminderId,
        armed: bool,
        notify_at_ms: Option<i64>,
    ) -> Result<usize>;
    /// Flip only the date-time armed flag, keeping the stored timestamp.
    fn set_date_time_armed_flag(&self, id: ReminderId, armed: bool) -> Result<usize>;
    /// Set the location trigger: armed flag and place together.
    fn set_location_armed(&self, id: ReminderId, armed: bool, place: Option<&Place>)
        -> Result<usize>;
    fn delete_completed(&self) -> Result<usize>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS reminders (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    title            TEXT    NOT NULL DEFAULT '',
    description      TEXT    NOT NULL DEFAULT '',
    is_completed     INTEGER NOT NULL DEFAULT 0,
    created_ms       INTEGER NOT NULL,
    edited_ms        INTEGER NOT NULL,
    notify_at_ms     INTEGER,
    date_time_armed  INTEGER NOT NULL DEFAULT 0,
    latitude         REAL,
    longitude        REAL,
    location_label   TEXT,
    location_armed   INTEGER NOT NULL DEFAULT 0,
    CHECK ((latitude IS NULL) = (longitude IS NULL)
       AND (latitude IS NULL) = (location_label IS NULL))
);
CREATE INDEX IF NOT EXISTS reminders_edited ON reminders (edited_ms DESC);
";

const COLUMNS: &str = "id, title, description, is_completed, created_ms, edited_ms,
    notify_at_ms, date_time_armed, latitude, longitude, location_label, location_armed";

/// SQLite-backed [`ReminderStore`]. A single connection behind a mutex; SQLite
/// serializes statements anyway.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    /// WAL so the CLI can read while the daemon writes.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening reminder store at {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {e}"))
    }

    fn query_reminders(&self, sql: &str) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let reminders = stmt
            .query_map([], reminder_from_row)?
            .filter_map(|r| {
                r.map_err(|e| tracing::warn!("Skipping malformed reminder row: {e}"))
                    .ok()
            })
            .collect();
        Ok(reminders)
    }
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let id: ReminderId = row.get(0)?;
    let latitude: Option<f64> = row.get(8)?;
    let longitude: Option<f64> = row.get(9)?;
    let label: Option<String> = row.get(10)?;
    let place = match (latitude, longitude, label) {
        (Some(latitude), Some(longitude), Some(label)) => Some(Place {
            latitude,
            longitude,
            label,
        }),
        (None, None, None) => None,
        _ => {
            tracing::warn!("Reminder {id} has a partial location, ignoring it");
            None
        }
    };
    Ok(Reminder {
        id,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: row.get(3)?,
        created_ms: row.get(4)?,
        edited_ms: row.get(5)?,
        notify_at_ms: row.get(6)?,
        date_time_armed: row.get(7)?,
        place,
        location_armed: row.get(11)?,
    })
}

fn place_columns(place: Option<&Place>) -> (Option<f64>, Option<f64>, Option<&str>) {
    match place {
        Some(p) => (Some(p.latitude), Some(p.longitude), Some(p.label.as_str())),
        None => (None, None, None),
    }
}

impl ReminderStore for SqliteStore {
    fn insert(&self, reminder: &Reminder) -> Result<ReminderId> {
        let conn = self.lock()?;
        let (lat, lon, label) = place_columns(reminder.place.as_ref());
        let id = if reminder.is_new() { None } else { Some(reminder.id) };
        conn.execute(
            "INSERT OR REPLACE INTO reminders
                 (id, title, description, is_completed, created_ms, edited_ms,
                  notify_at_ms, date_time_armed, latitude, longitude, location_label,
                  location_armed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                reminder.title,
                reminder.description,
                reminder.completed,
                reminder.created_ms,
                reminder.edited_ms,
                reminder.notify_at_ms,
                reminder.date_time_armed,
                lat,
                lon,
                label,
                reminder.location_armed,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, reminder: &Reminder) -> Result<usize> {
        let conn = self.lock()?;
        let (lat, lon, label) = place_columns(reminder.place.as_ref());
        let rows = conn.execute(
            "UPDATE reminders
             SET title = ?2, description = ?3, is_completed = ?4, created_ms = ?5,
                 edited_ms = ?6, notify_at_ms = ?7, date_time_armed = ?8,
                 latitude = ?9, longitude = ?10, location_label = ?11, location_armed = ?12
             WHERE id = ?1",
            params![
                reminder.id,
                reminder.title,
                reminder.description,
                reminder.completed,
                reminder.created_ms,
                reminder.edited_ms,
                reminder.notify_at_ms,
                reminder.date_time_armed,
                lat,
                lon,
                label,
                reminder.location_armed,
            ],
        )?;
        Ok(rows)
    }

    fn delete_by_id(&self, id: ReminderId) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM reminders WHERE id = ?1", [id])?)
    }

    fn get_by_id(&self, id: ReminderId) -> Result<Option<Reminder>> {
        let conn = self.lock()?;
        let reminder = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM reminders WHERE id = ?1"),
                [id],
                reminder_from_row,
            )
            .optional()?;
        Ok(reminder)
    }

    fn get_all(&self) -> Result<Vec<Reminder>> {
        self.query_reminders(&format!(
            "SELECT {COLUMNS} FROM reminders ORDER BY edited_ms DESC, id DESC"
        ))
    }

    fn get_completed(&self) -> Result<Vec<Reminder>> {
        self.query_reminders(&format!(
            "SELECT {COLUMNS} FROM reminders WHERE is_completed = 1 ORDER BY edited_ms DESC"
        ))
    }

    fn set_completed(&self, id: ReminderId, completed: bool) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "UPDATE reminders SET is_completed = ?2 WHERE id = ?1",
            params![id, completed],
        )?)
    }

    fn set_date_time_armed(
        &self,
        id: ReminderId,
        armed: bool,
        notify_at_ms: Option<i64>,
    ) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "UPDATE reminders SET date_time_armed = ?2, notify_at_ms = ?3 WHERE id = ?1",
            params![id, armed, notify_at_ms],
        )?)
    }

    fn set_date_time_armed_flag(&self, id: ReminderId, armed: bool) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "UPDATE reminders SET date_time_armed = ?2 WHERE id = ?1",
            params![id, armed],
        )?)
    }

    fn set_location_armed(
        &self,
        id: ReminderId,
        armed: bool,
        place: Option<&Place>,
    ) -> Result<usize> {
        let conn = self.lock()?;
        let (lat, lon, label) = place_columns(place);
        Ok(conn.execute(
            "UPDATE reminders
             SET location_armed = ?2, latitude = ?3, longitude = ?4, location_label = ?5
             WHERE id = ?1",
            params![id, armed, lat, lon, label],
        )?)
    }

    fn delete_completed(&self) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM reminders WHERE is_completed = 1", [])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Place {
        Place {
            latitude: 53.9,
            longitude: 27.56,
            label: "Home".to_string(),
        }
    }

    #[test]
    fn test_insert_assigns_id_and_reads_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&Reminder::new("Buy milk", "")).unwrap();
        assert!(id > 0);

        let r = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(r.id, id);
        assert_eq!(r.title, "Buy milk");
        assert!(!r.date_time_armed);
        assert!(!r.location_armed);
        assert!(r.place.is_none());
    }

    #[test]
    fn test_insert_with_id_replaces_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&Reminder::new("first", "")).unwrap();
        let mut again = Reminder::new("second", "");
        again.id = id;
        assert_eq!(store.insert(&again).unwrap(), id);
        assert_eq!(store.get_all().unwrap().len(), 1);
        assert_eq!(store.get_by_id(id).unwrap().unwrap().title, "second");
    }

    #[test]
    fn test_update_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&Reminder::new("draft", "")).unwrap();
        let mut r = store.get_by_id(id).unwrap().unwrap();
        r.description = "with details".to_string();
        r.place = Some(home());
        assert_eq!(store.update(&r).unwrap(), 1);
        assert_eq!(store.get_by_id(id).unwrap().unwrap(), r);

        assert_eq!(store.delete_by_id(id).unwrap(), 1);
        assert!(store.get_by_id(id).unwrap().is_none());
        assert_eq!(store.delete_by_id(id).unwrap(), 0);
    }

    #[test]
    fn test_targeted_updates_on_missing_row_touch_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.set_completed(99, true).unwrap(), 0);
        assert_eq!(store.set_date_time_armed(99, true, Some(1)).unwrap(), 0);
        assert_eq!(store.set_date_time_armed_flag(99, false).unwrap(), 0);
        assert_eq!(store.set_location_armed(99, false, None).unwrap(), 0);
    }

    #[test]
    fn test_date_time_flag_only_keeps_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&Reminder::new("alarm", "")).unwrap();
        store.set_date_time_armed(id, true, Some(1_000)).unwrap();
        store.set_date_time_armed_flag(id, false).unwrap();

        let r = store.get_by_id(id).unwrap().unwrap();
        assert!(!r.date_time_armed);
        assert_eq!(r.notify_at_ms, Some(1_000));
    }

    #[test]
    fn test_location_fields_move_together() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&Reminder::new("geo", "")).unwrap();
        store.set_location_armed(id, true, Some(&home())).unwrap();
        let r = store.get_by_id(id).unwrap().unwrap();
        assert!(r.location_armed);
        assert_eq!(r.place, Some(home()));

        store.set_location_armed(id, false, None).unwrap();
        let r = store.get_by_id(id).unwrap().unwrap();
        assert!(!r.location_armed);
        assert!(r.place.is_none());
    }

    #[test]
    fn test_partial_location_is_rejected_by_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert(&Reminder::new("geo", "")).unwrap();
        let conn = store.lock().unwrap();
        let res = conn.execute(
            "UPDATE reminders SET latitude = 1.0 WHERE id = ?1",
            [id],
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_delete_completed_only_removes_completed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let done = store.insert(&Reminder::new("done", "")).unwrap();
        let open = store.insert(&Reminder::new("open", "")).unwrap();
        store.set_completed(done, true).unwrap();

        let completed = store.get_completed().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done);

        assert_eq!(store.delete_completed().unwrap(), 1);
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, open);
    }

    #[test]
    fn test_get_all_orders_by_last_edit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut older = Reminder::new("older", "");
        older.edited_ms = 1_000;
        let mut newer = Reminder::new("newer", "");
        newer.edited_ms = 2_000;
        store.insert(&older).unwrap();
        store.insert(&newer).unwrap();

        let titles: Vec<String> = store.get_all().unwrap().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["newer", "older"]);
    }

    #[test]
    fn test_open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reminders.sqlite");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(&Reminder::new("persisted", "")).unwrap()
        };
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_by_id(id).unwrap().unwrap().title, "persisted");
    }
}

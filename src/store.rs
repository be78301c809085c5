//! Durable record store
//!
//! SQLite-backed persistence for everything that must survive restarts:
//! processed references, per-day reply counts, today's reply cache used for
//! duplicate avoidance, and generic settings.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One delivered record, as returned by history queries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryEntry {
    pub post_url: String,
    pub reply_text: Option<String>,
    pub timestamp: String,
}

/// SQLite store. Not `Sync`; share as [`SharedStore`].
pub struct Store {
    conn: Connection,
}

/// The store behind a mutex, the way the orchestrator and HTTP handlers hold it.
pub type SharedStore = Arc<parking_lot::Mutex<Store>>;

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;

        info!("Store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS processed_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_url TEXT UNIQUE NOT NULL,
                post_id TEXT NOT NULL,
                reply_text TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS daily_stats (
                date DATE PRIMARY KEY,
                reply_count INTEGER DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS todays_replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reply_text TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT
            );
            "#,
        )?;
        Ok(())
    }

    /// Whether this reference has already been replied to.
    pub fn has_record(&self, post_url: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_posts WHERE post_url = ?1",
                params![post_url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a delivered reply. Idempotent on the reference.
    pub fn save_record(&self, post_url: &str, post_id: &str, reply_text: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO processed_posts (post_url, post_id, reply_text) VALUES (?1, ?2, ?3)",
            params![post_url, post_id, reply_text],
        )?;
        Ok(())
    }

    /// Successful replies counted for `day`. Absent day means zero.
    pub fn reply_count(&self, day: NaiveDate) -> Result<u32> {
        let count: Option<u32> = self
            .conn
            .query_row(
                "SELECT reply_count FROM daily_stats WHERE date = ?1",
                params![day.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Bump the counter for `day`. The count never decreases.
    pub fn increment_count(&self, day: NaiveDate) -> Result<()> {
        self.conn.execute(
            "INSERT INTO daily_stats (date, reply_count) VALUES (?1, 1)
             ON CONFLICT(date) DO UPDATE SET reply_count = reply_count + 1",
            params![day.to_string()],
        )?;
        Ok(())
    }

    /// Cache a posted reply for duplicate-avoidance on later generations.
    pub fn save_output(&self, reply_text: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO todays_replies (reply_text) VALUES (?1)",
            params![reply_text],
        )?;
        Ok(())
    }

    /// All replies cached for `day`.
    pub fn recent_outputs(&self, day: NaiveDate) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT reply_text FROM todays_replies WHERE DATE(timestamp) = ?1")?;
        let rows = stmt.query_map(params![day.to_string()], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<String>, _>>()?)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Delivered records within the trailing `days` window, newest first.
    pub fn history(&self, days: i64) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT post_url, reply_text, timestamp FROM processed_posts
             WHERE timestamp >= datetime('now', ?1)
             ORDER BY timestamp DESC",
        )?;
        let window = format!("-{} days", days);
        let rows = stmt.query_map(params![window], |row| {
            Ok(HistoryEntry {
                post_url: row.get(0)?,
                reply_text: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Delete records and stats older than the trailing `days` window.
    pub fn cleanup_old(&self, days: i64) -> Result<()> {
        let window = format!("-{} days", days);
        self.conn.execute(
            "DELETE FROM processed_posts WHERE timestamp < datetime('now', ?1)",
            params![window],
        )?;
        self.conn.execute(
            "DELETE FROM daily_stats WHERE date < date('now', ?1)",
            params![window],
        )?;
        self.conn.execute(
            "DELETE FROM todays_replies WHERE timestamp < datetime('now', ?1)",
            params![window],
        )?;
        Ok(())
    }

    /// Drop cached replies from previous days. Run at startup.
    pub fn clear_stale_outputs(&self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM todays_replies WHERE DATE(timestamp) < DATE('now')",
            [],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    #[test]
    fn test_record_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.has_record("https://x.com/a/status/1").unwrap());

        store
            .save_record("https://x.com/a/status/1", "1", "nice point")
            .unwrap();
        assert!(store.has_record("https://x.com/a/status/1").unwrap());
    }

    #[test]
    fn test_save_record_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.save_record("u", "1", "first").unwrap();
        store.save_record("u", "1", "second").unwrap();

        let history = store.history(1).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reply_text.as_deref(), Some("first"));
    }

    #[test]
    fn test_daily_count_starts_at_zero_and_increments() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.reply_count(today()).unwrap(), 0);

        store.increment_count(today()).unwrap();
        store.increment_count(today()).unwrap();
        assert_eq!(store.reply_count(today()).unwrap(), 2);
    }

    #[test]
    fn test_counts_are_day_scoped() {
        let store = Store::open_in_memory().unwrap();
        store.increment_count(today()).unwrap();

        let other_day = today().pred_opt().unwrap();
        assert_eq!(store.reply_count(other_day).unwrap(), 0);
    }

    #[test]
    fn test_recent_outputs() {
        let store = Store::open_in_memory().unwrap();
        store.save_output("reply one").unwrap();
        store.save_output("reply two").unwrap();

        let outputs = store.recent_outputs(today()).unwrap();
        assert_eq!(outputs, vec!["reply one", "reply two"]);
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_setting("prompt").unwrap().is_none());

        store.set_setting("prompt", "v1").unwrap();
        store.set_setting("prompt", "v2").unwrap();
        assert_eq!(store.get_setting("prompt").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_history_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store.save_record("u1", "1", "a").unwrap();
        store.save_record("u2", "2", "b").unwrap();

        let history = store.history(3).unwrap();
        assert_eq!(history.len(), 2);
        // Same-second inserts keep insertion order within the DESC sort;
        // both must be present regardless.
        assert!(history.iter().any(|h| h.post_url == "u1"));
        assert!(history.iter().any(|h| h.post_url == "u2"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("automation.db");
        let store = Store::open(&path).unwrap();
        store.save_record("u", "1", "r").unwrap();
        assert!(path.exists());
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::feed::{FeedSnapshot, SortBy};
use crate::post::Post;

/// Persists the anonymous-session slice of feed state (local bookmarks and
/// personalization) across restarts.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// Replaces the persisted snapshot wholesale. Bookmark order is kept so
    /// the head of the list stays the most recently saved post.
    pub fn save_snapshot(&self, snapshot: &FeedSnapshot) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin snapshot save")?;

        tx.execute("DELETE FROM local_bookmarks", [])?;
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_secs() as i64;
        for (position, post) in snapshot.bookmarks.iter().enumerate() {
            let payload =
                serde_json::to_string(post).context("storage: encode bookmarked post")?;
            tx.execute(
                r#"
INSERT INTO local_bookmarks (post_id, post, position, saved_at)
VALUES (?1, ?2, ?3, ?4)
"#,
                params![post.id, payload, position as i64, saved_at],
            )?;
        }

        set_pref(
            &tx,
            "enabled_tags",
            &serde_json::to_string(&snapshot.enabled_tags)?,
        )?;
        set_pref(
            &tx,
            "disabled_publications",
            &serde_json::to_string(&snapshot.disabled_publications)?,
        )?;
        set_pref(&tx, "sort_by", snapshot.sort_by.as_str())?;
        set_pref(&tx, "time_period", &snapshot.time_period.to_string())?;

        tx.commit().context("storage: commit snapshot save")
    }

    pub fn load_snapshot(&self) -> Result<FeedSnapshot> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
SELECT post FROM local_bookmarks
ORDER BY position ASC
"#,
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut bookmarks = Vec::with_capacity(rows.len());
        for payload in rows {
            let post: Post =
                serde_json::from_str(&payload).context("storage: decode bookmarked post")?;
            bookmarks.push(post);
        }

        let enabled_tags = match get_pref(&conn, "enabled_tags")? {
            Some(raw) => serde_json::from_str(&raw).context("storage: decode enabled tags")?,
            None => Vec::new(),
        };
        let disabled_publications = match get_pref(&conn, "disabled_publications")? {
            Some(raw) => {
                serde_json::from_str(&raw).context("storage: decode disabled publications")?
            }
            None => Vec::new(),
        };
        let sort_by = get_pref(&conn, "sort_by")?
            .map(|raw| SortBy::from_key(&raw))
            .unwrap_or_default();
        let time_period = get_pref(&conn, "time_period")?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(7);

        Ok(FeedSnapshot {
            bookmarks,
            enabled_tags,
            disabled_publications,
            sort_by,
            time_period,
        })
    }
}

fn set_pref(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO feed_prefs (key, value) VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

fn get_pref(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM feed_prefs WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("storage: query pref {key}"))
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS local_bookmarks (
  post_id TEXT PRIMARY KEY,
  post TEXT NOT NULL,
  position INTEGER NOT NULL,
  saved_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS feed_prefs (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_local_bookmarks_position ON local_bookmarks(position);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("devfeed").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn post(id: &str) -> Post {
        Post {
            id: id.into(),
            title: format!("post {id}"),
            url: format!("https://example.com/{id}"),
            image: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            read_time: Some(4),
            publication: Default::default(),
            tags: vec!["rust".into()],
            num_upvotes: 1,
            num_comments: 0,
            read: false,
            upvoted: false,
            bookmarked: true,
            bookmark_list: None,
        }
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn snapshot_round_trip_preserves_order() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        let snapshot = FeedSnapshot {
            bookmarks: vec![post("p2"), post("p1")],
            enabled_tags: vec!["rust".into(), "webdev".into()],
            disabled_publications: vec!["pub1".into()],
            sort_by: SortBy::Upvotes,
            time_period: 30,
        };
        store.save_snapshot(&snapshot).unwrap();
        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        store
            .save_snapshot(&FeedSnapshot {
                bookmarks: vec![post("old")],
                ..FeedSnapshot::default()
            })
            .unwrap();
        store
            .save_snapshot(&FeedSnapshot {
                bookmarks: vec![post("new")],
                ..FeedSnapshot::default()
            })
            .unwrap();

        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded.bookmarks.len(), 1);
        assert_eq!(loaded.bookmarks[0].id, "new");
    }

    #[test]
    fn empty_database_loads_default_snapshot() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        let loaded = store.load_snapshot().unwrap();
        assert!(loaded.bookmarks.is_empty());
        assert_eq!(loaded.sort_by, SortBy::Popularity);
        assert_eq!(loaded.time_period, 7);
    }
}

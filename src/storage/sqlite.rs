//! SQLite-backed article and source store
//!
//! Unique indexes on `canonical_url` and `content_hash` back up the
//! deduplicator: two concurrent admits of the same story cannot both land.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{apply_check_result, ArticleStore, SourceStore, StorageError, StoredArticle};
use crate::models::{CandidateArticle, Source, SourceConfig};

const ARTICLE_COLUMNS: &str = "id, source_id, canonical_url, title, content_hash, simhash, \
                               simhash_bucket, published_at, created_at";

/// SQLite store, one connection guarded by a mutex
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// In-memory database
    pub fn in_memory() -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS articles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source_id TEXT NOT NULL,
                    canonical_url TEXT NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    summary TEXT,
                    authors TEXT NOT NULL DEFAULT '[]',
                    tags TEXT NOT NULL DEFAULT '[]',
                    metadata TEXT NOT NULL DEFAULT '{}',
                    content_hash TEXT NOT NULL,
                    simhash INTEGER,
                    simhash_bucket INTEGER,
                    published_at TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_canonical_url
                    ON articles(canonical_url);

                CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_content_hash
                    ON articles(content_hash);

                CREATE INDEX IF NOT EXISTS idx_articles_bucket
                    ON articles(simhash_bucket);

                CREATE TABLE IF NOT EXISTS sources (
                    identifier TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    url TEXT NOT NULL,
                    feed_url TEXT,
                    active INTEGER NOT NULL DEFAULT 1,
                    config TEXT NOT NULL DEFAULT '{}',
                    check_frequency_secs INTEGER NOT NULL,
                    last_checked TEXT,
                    last_success TEXT,
                    consecutive_failures INTEGER NOT NULL DEFAULT 0
                );
                "#,
        )?;
        Ok(())
    }

    /// Insert or replace a source definition, keeping its health fields
    ///
    /// An existing row stays disabled once health tracking has turned it off;
    /// the definition can disable a source but not revive it.
    pub fn upsert_source(&self, source: &Source) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let config = serde_json::to_string(&source.config)?;
        conn.execute(
            r#"
                INSERT INTO sources (identifier, name, url, feed_url, active, config, check_frequency_secs,
                                     last_checked, last_success, consecutive_failures)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(identifier) DO UPDATE SET
                    name = excluded.name,
                    url = excluded.url,
                    feed_url = excluded.feed_url,
                    active = sources.active AND excluded.active,
                    config = excluded.config,
                    check_frequency_secs = excluded.check_frequency_secs
                "#,
            params![
                source.identifier,
                source.name,
                source.url,
                source.feed_url,
                source.active,
                config,
                source.check_frequency_secs as i64,
                source.last_checked.map(|t| t.to_rfc3339()),
                source.last_success.map(|t| t.to_rfc3339()),
                source.consecutive_failures,
            ],
        )?;
        Ok(())
    }

    /// Load one source by identifier
    pub fn get_source(&self, source_id: &str) -> Result<Option<Source>, StorageError> {
        let conn = self.conn()?;
        load_source(&conn, source_id)
    }

    /// Total stored articles
    pub fn article_count(&self) -> Result<usize, StorageError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<StoredArticle> {
    Ok(StoredArticle {
        id: row.get(0)?,
        source_id: row.get(1)?,
        canonical_url: row.get(2)?,
        title: row.get(3)?,
        content_hash: row.get(4)?,
        simhash: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        simhash_bucket: row.get::<_, Option<i64>>(6)?.map(|v| v as u8),
        published_at: parse_time(row.get(7)?),
        created_at: parse_time(row.get(8)?).unwrap_or_else(Utc::now),
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<(Source, String)> {
    let source = Source {
        identifier: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        feed_url: row.get(3)?,
        active: row.get(4)?,
        config: SourceConfig::default(),
        check_frequency_secs: row.get::<_, i64>(6)? as u64,
        last_checked: parse_time(row.get(7)?),
        last_success: parse_time(row.get(8)?),
        consecutive_failures: row.get(9)?,
    };
    Ok((source, row.get(5)?))
}

const SOURCE_COLUMNS: &str = "identifier, name, url, feed_url, active, config, \
                              check_frequency_secs, last_checked, last_success, consecutive_failures";

fn load_source(conn: &Connection, source_id: &str) -> Result<Option<Source>, StorageError> {
    let row = conn
        .query_row(
            &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE identifier = ?1"),
            params![source_id],
            source_from_row,
        )
        .optional()?;

    match row {
        Some((mut source, config)) => {
            source.config = serde_json::from_str(&config)?;
            Ok(Some(source))
        }
        None => Ok(None),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn find_by_canonical_url(&self, url: &str) -> Result<Option<StoredArticle>, StorageError> {
        let conn = self.conn()?;
        let article = conn
            .query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE canonical_url = ?1"),
                params![url],
                article_from_row,
            )
            .optional()?;
        Ok(article)
    }

    async fn find_by_content_hash(
        &self,
        hash: &str,
    ) -> Result<Option<StoredArticle>, StorageError> {
        let conn = self.conn()?;
        let article = conn
            .query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE content_hash = ?1"),
                params![hash],
                article_from_row,
            )
            .optional()?;
        Ok(article)
    }

    async fn find_by_bucket(&self, bucket: u8) -> Result<Vec<StoredArticle>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE simhash_bucket = ?1 AND simhash IS NOT NULL ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![bucket as i64], article_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn create(&self, candidate: &CandidateArticle) -> Result<StoredArticle, StorageError> {
        let conn = self.conn()?;
        let now = Utc::now();

        let inserted = conn.execute(
            r#"
                INSERT INTO articles (source_id, canonical_url, title, content, summary, authors, tags,
                                      metadata, content_hash, simhash, simhash_bucket, published_at, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            params![
                candidate.source_id,
                candidate.canonical_url,
                candidate.title,
                candidate.content,
                candidate.summary,
                serde_json::to_string(&candidate.authors)?,
                serde_json::to_string(&candidate.tags)?,
                serde_json::to_string(&candidate.metadata)?,
                candidate.content_hash,
                candidate.simhash as i64,
                candidate.simhash_bucket as i64,
                candidate.published_at.map(|t| t.to_rfc3339()),
                now.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StorageError::Duplicate(candidate.canonical_url.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(StoredArticle {
            id: conn.last_insert_rowid(),
            source_id: candidate.source_id.clone(),
            canonical_url: candidate.canonical_url.clone(),
            title: candidate.title.clone(),
            content_hash: candidate.content_hash.clone(),
            simhash: Some(candidate.simhash),
            simhash_bucket: Some(candidate.simhash_bucket),
            published_at: candidate.published_at,
            created_at: now,
        })
    }
}

#[async_trait]
impl SourceStore for SqliteStore {
    async fn list_active(&self) -> Result<Vec<Source>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE active = 1 ORDER BY identifier"
        ))?;
        let rows = stmt
            .query_map([], source_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut sources = Vec::with_capacity(rows.len());
        for (mut source, config) in rows {
            match serde_json::from_str(&config) {
                Ok(config) => {
                    source.config = config;
                    sources.push(source);
                }
                Err(e) => {
                    tracing::warn!(source = %source.identifier, error = %e, "Skipping source with unreadable config");
                }
            }
        }
        Ok(sources)
    }

    async fn mark_check_result(
        &self,
        source_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let conn = self.conn()?;
        let mut source = load_source(&conn, source_id)?
            .ok_or_else(|| StorageError::NotFound(source_id.to_string()))?;
        apply_check_result(&mut source, success, at);

        conn.execute(
            "UPDATE sources SET last_checked = ?2, last_success = ?3, consecutive_failures = ?4 \
             WHERE identifier = ?1",
            params![
                source_id,
                source.last_checked.map(|t| t.to_rfc3339()),
                source.last_success.map(|t| t.to_rfc3339()),
                source.consecutive_failures,
            ],
        )?;

        Ok(source.consecutive_failures)
    }

    async fn disable(&self, source_id: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sources SET active = 0 WHERE identifier = ?1",
            params![source_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(source_id.to_string()));
        }
        tracing::warn!(source = %source_id, "Source disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_article() {
        let store = SqliteStore::in_memory().unwrap();
        let candidate = CandidateArticle::new("s", "https://a.example/1", "Title", "Body words");

        let stored = store.create(&candidate).await.unwrap();
        assert_eq!(stored.simhash, Some(candidate.simhash));

        let found = store
            .find_by_canonical_url("https://a.example/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, stored.id);
        assert_eq!(found.simhash, Some(candidate.simhash));

        let bucket = store.find_by_bucket(candidate.simhash_bucket).await.unwrap();
        assert_eq!(bucket.len(), 1);
    }

    #[tokio::test]
    async fn test_unique_constraint_is_duplicate() {
        let store = SqliteStore::in_memory().unwrap();
        let candidate = CandidateArticle::new("s", "https://a.example/1", "Title", "Body");
        store.create(&candidate).await.unwrap();

        let again = store.create(&candidate).await;
        assert!(matches!(again, Err(StorageError::Duplicate(_))));
        assert_eq!(store.article_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sources_persist_across_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join("feedhound.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let source = Source::new("a", "A", "https://a.example").with_feed("https://a.example/feed");
            store.upsert_source(&source).unwrap();
            assert_eq!(
                store.mark_check_result("a", false, Utc::now()).await.unwrap(),
                1
            );
        }

        let store = SqliteStore::open(&path).unwrap();
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].consecutive_failures, 1);
        assert!(active[0].has_feed());

        store.disable("a").await.unwrap();
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_does_not_revive_disabled_source() {
        let store = SqliteStore::in_memory().unwrap();
        let source = Source::new("a", "A", "https://a.example");
        store.upsert_source(&source).unwrap();
        store.disable("a").await.unwrap();

        store.upsert_source(&source).unwrap();
        let reloaded = store.get_source("a").unwrap().unwrap();
        assert!(!reloaded.active);
        assert!(store.list_active().await.unwrap().is_empty());

        let mut other = Source::new("b", "B", "https://b.example");
        store.upsert_source(&other).unwrap();
        other.active = false;
        store.upsert_source(&other).unwrap();
        assert!(!store.get_source("b").unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_unreadable_config_row_skipped() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_source(&Source::new("a", "A", "https://a.example")).unwrap();
        store.upsert_source(&Source::new("b", "B", "https://b.example")).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE sources SET config = 'not json' WHERE identifier = 'b'", [])
            .unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].identifier, "a");
    }
}

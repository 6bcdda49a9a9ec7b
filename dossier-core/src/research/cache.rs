//! Content cache keyed by URL.
//!
//! The fetcher consults the cache before any network I/O and writes every
//! successful fetch back. Two implementations: [`SqliteContentCache`] for the
//! CLI and [`MemoryContentCache`] for tests and `cache.in_memory = true`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheError;
use crate::research::model::Article;

/// Key-value store of fetched articles.
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// The cached article for `url` if it was fetched within `max_age`.
    async fn get_fresh(
        &self,
        url: &str,
        max_age: chrono::Duration,
    ) -> Result<Option<Article>, CacheError>;

    /// Insert or replace the entry for `article.url`.
    async fn upsert(&self, article: &Article) -> Result<(), CacheError>;

    /// Delete entries older than `max_age`. Returns how many were removed.
    async fn prune_older_than(&self, max_age: chrono::Duration) -> Result<usize, CacheError>;
}

fn is_fresh(fetched_at: DateTime<Utc>, max_age: chrono::Duration) -> bool {
    Utc::now().signed_duration_since(fetched_at) <= max_age
}

/// In-process cache backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryContentCache {
    entries: RwLock<HashMap<String, Article>>,
}

impl MemoryContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ContentCache for MemoryContentCache {
    async fn get_fresh(
        &self,
        url: &str,
        max_age: chrono::Duration,
    ) -> Result<Option<Article>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(url)
            .filter(|a| is_fresh(a.fetched_at, max_age))
            .cloned())
    }

    async fn upsert(&self, article: &Article) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(article.url.clone(), article.clone());
        Ok(())
    }

    async fn prune_older_than(&self, max_age: chrono::Duration) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, a| is_fresh(a.fetched_at, max_age));
        Ok(before - entries.len())
    }
}

/// SQLite-backed cache. One connection, serialized behind a mutex, used
/// only from blocking threads.
#[derive(Clone)]
pub struct SqliteContentCache {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS articles (
    url        TEXT PRIMARY KEY,
    title      TEXT NOT NULL,
    domain     TEXT NOT NULL,
    content    TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_articles_fetched_at ON articles(fetched_at);
";

/// Fixed-width RFC 3339 so timestamps compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteContentCache {
    /// Open (creating if needed) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Storage {
                message: format!("Failed to create cache directory: {}", e),
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the connection on a blocking thread.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| CacheError::Storage {
                message: "cache connection mutex poisoned".into(),
            })?;
            f(&guard)
        })
        .await
        .map_err(|e| CacheError::Storage {
            message: format!("cache task failed: {}", e),
        })?
    }
}

#[async_trait]
impl ContentCache for SqliteContentCache {
    async fn get_fresh(
        &self,
        url: &str,
        max_age: chrono::Duration,
    ) -> Result<Option<Article>, CacheError> {
        let url = url.to_string();
        let row = self
            .with_conn({
                let url = url.clone();
                move |conn| {
                    let row = conn
                        .query_row(
                            "SELECT url, title, domain, content, fetched_at FROM articles WHERE url = ?1",
                            params![url],
                            |row| {
                                Ok((
                                    row.get::<_, String>(0)?,
                                    row.get::<_, String>(1)?,
                                    row.get::<_, String>(2)?,
                                    row.get::<_, String>(3)?,
                                    row.get::<_, String>(4)?,
                                ))
                            },
                        )
                        .optional()?;
                    Ok(row)
                }
            })
            .await?;

        let Some((url_col, title, domain, content, fetched_at)) = row else {
            return Ok(None);
        };
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(|e| CacheError::Corrupt {
                url: url.clone(),
                message: format!("bad fetched_at '{}': {}", fetched_at, e),
            })?
            .with_timezone(&Utc);

        if !is_fresh(fetched_at, max_age) {
            debug!(url = %url, %fetched_at, "Cached article is stale");
            return Ok(None);
        }
        Ok(Some(Article {
            url: url_col,
            title,
            domain,
            content,
            fetched_at,
        }))
    }

    async fn upsert(&self, article: &Article) -> Result<(), CacheError> {
        let article = article.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO articles (url, title, domain, content, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title,
                    domain = excluded.domain,
                    content = excluded.content,
                    fetched_at = excluded.fetched_at",
                params![
                    article.url,
                    article.title,
                    article.domain,
                    article.content,
                    timestamp(article.fetched_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn prune_older_than(&self, max_age: chrono::Duration) -> Result<usize, CacheError> {
        let cutoff = timestamp(Utc::now() - max_age);
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM articles WHERE fetched_at < ?1", params![cutoff])?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn article(url: &str, age_hours: i64) -> Article {
        Article {
            url: url.into(),
            title: "Title".into(),
            domain: "example.com".into(),
            content: "Body text".into(),
            fetched_at: Utc::now() - chrono::Duration::hours(age_hours),
        }
    }

    async fn exercise(cache: &dyn ContentCache) {
        let day = chrono::Duration::hours(24);
        assert!(cache.get_fresh("https://example.com/a", day).await.unwrap().is_none());

        cache.upsert(&article("https://example.com/a", 1)).await.unwrap();
        cache.upsert(&article("https://example.com/old", 48)).await.unwrap();

        let hit = cache.get_fresh("https://example.com/a", day).await.unwrap();
        assert_eq!(hit.map(|a| a.title), Some("Title".to_string()));
        assert!(cache.get_fresh("https://example.com/old", day).await.unwrap().is_none());

        // Upsert replaces the stale entry.
        let mut refreshed = article("https://example.com/old", 0);
        refreshed.title = "Refreshed".into();
        cache.upsert(&refreshed).await.unwrap();
        let hit = cache.get_fresh("https://example.com/old", day).await.unwrap().unwrap();
        assert_eq!(hit.title, "Refreshed");

        cache.upsert(&article("https://example.com/ancient", 100)).await.unwrap();
        assert_eq!(cache.prune_older_than(day).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryContentCache::new();
        exercise(&cache).await;
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_sqlite_cache_in_memory() {
        let cache = SqliteContentCache::open_in_memory().unwrap();
        exercise(&cache).await;
    }

    #[tokio::test]
    async fn test_sqlite_cache_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite3");
        {
            let cache = SqliteContentCache::open(&path).unwrap();
            cache.upsert(&article("https://example.com/p", 2)).await.unwrap();
        }
        let cache = SqliteContentCache::open(&path).unwrap();
        let hit = cache
            .get_fresh("https://example.com/p", chrono::Duration::hours(24))
            .await
            .unwrap();
        assert!(hit.is_some());
    }
}

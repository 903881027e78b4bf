//! Process-wide cache of page collections and site data.
//!
//! Readers get immutable snapshots; the refresh pipeline replaces a snapshot
//! wholesale. Every snapshot is also written to SQLite as JSON so that a
//! restarted process can serve collections before its first refresh.
//! Uses WAL mode so that several processes can share the same file.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::schemas::CacheStats;
use crate::models::wiki::{InterwikiEntry, PageCollection, SiteMatrixLanguage};

const PAGE_COLLECTIONS_KEY: &str = "page_collections";
const SITE_MATRIX_KEY: &str = "site_matrix";
const INTERWIKI_MAP_KEY: &str = "interwiki_map";
const APPENDIX_TITLES_PREFIX: &str = "appendix_titles:";

/// Page collections, site matrix, interwiki map and appendix titles
pub struct RecommendationCache {
    pool: Option<SqlitePool>,
    page_collections: ArcSwapOption<Vec<PageCollection>>,
    collections_updated_at: ArcSwapOption<DateTime<Utc>>,
    site_matrix: ArcSwapOption<Vec<SiteMatrixLanguage>>,
    interwiki_map: ArcSwapOption<Vec<InterwikiEntry>>,
    appendix_titles: RwLock<HashMap<String, Arc<Vec<String>>>>,
}

impl RecommendationCache {
    /// Open (or create) the SQLite file backing the cache
    pub async fn connect(db_path: &str) -> AppResult<Self> {
        let pool = if db_path == ":memory:" {
            // Every connection to an in-memory database is a separate database
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Internal(format!("Failed to create cache directory: {}", e))
                })?;
            }

            SqlitePoolOptions::new()
                .max_connections(4)
                .connect(&format!("sqlite:{}?mode=rwc", db_path))
                .await?
        };

        Self::from_pool(pool).await
    }

    /// Cache persisted in an existing pool
    pub async fn from_pool(pool: SqlitePool) -> AppResult<Self> {
        Self::enable_wal_mode(&pool).await?;
        Self::init_schema(&pool).await?;

        let mut cache = Self::in_memory();
        cache.pool = Some(pool);
        Ok(cache)
    }

    /// Cache without persistence
    pub fn in_memory() -> Self {
        Self {
            pool: None,
            page_collections: ArcSwapOption::empty(),
            collections_updated_at: ArcSwapOption::empty(),
            site_matrix: ArcSwapOption::empty(),
            interwiki_map: ArcSwapOption::empty(),
            appendix_titles: RwLock::new(HashMap::new()),
        }
    }

    async fn enable_wal_mode(pool: &SqlitePool) -> AppResult<()> {
        sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(pool).await?;
        sqlx::query("PRAGMA wal_autocheckpoint=100").execute(pool).await?;
        Ok(())
    }

    async fn init_schema(pool: &SqlitePool) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leases (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Restore the snapshots persisted by a previous process
    pub async fn load(&self) -> AppResult<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let rows = sqlx::query("SELECT key, value, updated_at FROM snapshots")
            .fetch_all(pool)
            .await?;

        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");

            match key.as_str() {
                PAGE_COLLECTIONS_KEY => {
                    if let Some(collections) = decode::<Vec<PageCollection>>(&key, &value) {
                        let updated_at = parse_timestamp(row.get("updated_at"));
                        self.page_collections.store(Some(Arc::new(collections)));
                        self.collections_updated_at.store(updated_at.map(Arc::new));
                    }
                }
                SITE_MATRIX_KEY => {
                    if let Some(languages) = decode(&key, &value) {
                        self.site_matrix.store(Some(Arc::new(languages)));
                    }
                }
                INTERWIKI_MAP_KEY => {
                    if let Some(entries) = decode(&key, &value) {
                        self.interwiki_map.store(Some(Arc::new(entries)));
                    }
                }
                other => {
                    if let Some(language) = other.strip_prefix(APPENDIX_TITLES_PREFIX) {
                        if let Some(titles) = decode(&key, &value) {
                            self.appendix_titles
                                .write()
                                .await
                                .insert(language.to_string(), Arc::new(titles));
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Loaded {} page collections from cache",
            self.page_collections().map(|c| c.len()).unwrap_or(0)
        );
        Ok(())
    }

    /// Pick up a collection snapshot written by another process sharing the store.
    ///
    /// Returns whether the in-memory snapshot was replaced.
    pub async fn reload_if_newer(&self) -> AppResult<bool> {
        let Some(pool) = &self.pool else {
            return Ok(false);
        };

        let row = sqlx::query("SELECT value, updated_at FROM snapshots WHERE key = ?")
            .bind(PAGE_COLLECTIONS_KEY)
            .fetch_optional(pool)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        let Some(updated_at) = parse_timestamp(row.get("updated_at")) else {
            return Ok(false);
        };
        if self
            .collections_updated_at
            .load_full()
            .is_some_and(|current| *current >= updated_at)
        {
            return Ok(false);
        }

        let value: String = row.get("value");
        let Some(collections) = decode::<Vec<PageCollection>>(PAGE_COLLECTIONS_KEY, &value) else {
            return Ok(false);
        };

        tracing::info!("Reloaded {} page collections from the shared cache", collections.len());
        self.page_collections.store(Some(Arc::new(collections)));
        self.collections_updated_at.store(Some(Arc::new(updated_at)));
        Ok(true)
    }

    async fn persist<T: Serialize>(&self, key: &str, value: &T, updated_at: DateTime<Utc>) -> AppResult<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let json = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(format!("Failed to serialize {}: {}", key, e)))?;

        sqlx::query("INSERT OR REPLACE INTO snapshots (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(&json)
            .bind(updated_at.to_rfc3339())
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn page_collections(&self) -> Option<Arc<Vec<PageCollection>>> {
        self.page_collections.load_full()
    }

    /// Atomically replace the collection set
    pub async fn set_page_collections(&self, collections: Vec<PageCollection>) -> AppResult<()> {
        let now = Utc::now();
        let collections = Arc::new(collections);
        self.page_collections.store(Some(collections.clone()));
        self.collections_updated_at.store(Some(Arc::new(now)));
        self.persist(PAGE_COLLECTIONS_KEY, collections.as_ref(), now).await
    }

    pub fn site_matrix(&self) -> Option<Arc<Vec<SiteMatrixLanguage>>> {
        self.site_matrix.load_full()
    }

    pub async fn set_site_matrix(&self, languages: Vec<SiteMatrixLanguage>) -> AppResult<()> {
        let languages = Arc::new(languages);
        self.site_matrix.store(Some(languages.clone()));
        self.persist(SITE_MATRIX_KEY, languages.as_ref(), Utc::now()).await
    }

    pub fn interwiki_map(&self) -> Option<Arc<Vec<InterwikiEntry>>> {
        self.interwiki_map.load_full()
    }

    pub async fn set_interwiki_map(&self, entries: Vec<InterwikiEntry>) -> AppResult<()> {
        let entries = Arc::new(entries);
        self.interwiki_map.store(Some(entries.clone()));
        self.persist(INTERWIKI_MAP_KEY, entries.as_ref(), Utc::now()).await
    }

    pub async fn appendix_titles(&self, language: &str) -> Option<Arc<Vec<String>>> {
        self.appendix_titles.read().await.get(language).cloned()
    }

    pub async fn set_appendix_titles(&self, language: &str, titles: Vec<String>) -> AppResult<()> {
        let titles = Arc::new(titles);
        self.appendix_titles
            .write()
            .await
            .insert(language.to_string(), titles.clone());
        self.persist(&format!("{}{}", APPENDIX_TITLES_PREFIX, language), titles.as_ref(), Utc::now())
            .await
    }

    /// Take (or extend) a named lease for `ttl`.
    ///
    /// Succeeds when the lease is free, expired, or already held by `holder`.
    /// Without persistence the process is alone and always wins.
    pub async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> AppResult<bool> {
        self.try_acquire_lease_at(name, holder, ttl, Utc::now()).await
    }

    async fn try_acquire_lease_at(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let Some(pool) = &self.pool else {
            return Ok(true);
        };

        let now_ms = now.timestamp_millis();
        let expires_at = now_ms + ttl.as_millis() as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO leases (name, holder, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
            WHERE leases.holder = excluded.holder OR leases.expires_at <= ?
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(expires_at)
        .bind(now_ms)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let collections = self.page_collections();

        CacheStats {
            page_collections: collections.as_ref().map(|c| c.len()).unwrap_or(0),
            collection_articles: collections
                .as_ref()
                .map(|c| c.iter().map(|collection| collection.articles.len()).sum())
                .unwrap_or(0),
            site_matrix_languages: self.site_matrix().map(|s| s.len()).unwrap_or(0),
            interwiki_prefixes: self.interwiki_map().map(|m| m.len()).unwrap_or(0),
            appendix_languages: self.appendix_titles.read().await.len(),
            persistent: self.pool.is_some(),
            collections_updated_at: self.collections_updated_at.load_full().map(|dt| *dt),
        }
    }

    /// Checkpoint the WAL file and close the pool
    pub async fn close(&self) -> AppResult<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        tracing::info!("Closing cache connection...");
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await?;
        pool.close().await;
        tracing::info!("Cache closed successfully");
        Ok(())
    }
}

fn parse_timestamp(value: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Option<T> {
    match serde_json::from_str(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!("Ignoring unreadable cache snapshot {}: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::wiki::{PageCollectionMetadata, WikiDataArticle, WikiPage};
    use std::collections::BTreeMap;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn collection(name: &str) -> PageCollection {
        let mut collection = PageCollection::new(
            PageCollectionMetadata::named(name),
            vec![WikiPage {
                wiki: "meta".to_string(),
                id: 1,
                revision_id: 2,
                title: format!("Collections/{}", name),
                language: "en".to_string(),
                namespace: 0,
            }],
        );
        collection.articles.push(WikiDataArticle::new(
            "Q1",
            BTreeMap::from([("en".to_string(), "Universe".to_string())]),
        ));
        collection
    }

    #[tokio::test]
    async fn test_snapshots_survive_restart() {
        let pool = memory_pool().await;

        let cache = RecommendationCache::from_pool(pool.clone()).await.unwrap();
        cache.set_page_collections(vec![collection("Space")]).await.unwrap();
        cache.set_appendix_titles("es", vec!["Referencias".to_string()]).await.unwrap();
        cache
            .set_interwiki_map(vec![InterwikiEntry {
                prefix: "fr".to_string(),
                url: "https://fr.wikipedia.org/wiki/$1".to_string(),
            }])
            .await
            .unwrap();

        let restarted = RecommendationCache::from_pool(pool).await.unwrap();
        assert!(restarted.page_collections().is_none());
        restarted.load().await.unwrap();

        let collections = restarted.page_collections().unwrap();
        assert_eq!(collections.as_ref(), &vec![collection("Space")]);
        assert_eq!(
            restarted.appendix_titles("es").await.unwrap().as_ref(),
            &vec!["Referencias".to_string()]
        );

        let stats = restarted.stats().await;
        assert_eq!(stats.page_collections, 1);
        assert_eq!(stats.collection_articles, 1);
        assert_eq!(stats.interwiki_prefixes, 1);
        assert!(stats.persistent);
        assert!(stats.collections_updated_at.is_some());
    }

    #[tokio::test]
    async fn test_replacement_does_not_affect_readers() {
        let cache = RecommendationCache::in_memory();
        cache.set_page_collections(vec![collection("A")]).await.unwrap();

        let snapshot = cache.page_collections().unwrap();
        cache.set_page_collections(vec![collection("B"), collection("C")]).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(cache.page_collections().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lease_has_a_single_holder() {
        let cache = RecommendationCache::from_pool(memory_pool().await).await.unwrap();
        let ttl = Duration::from_secs(60);
        let now = Utc::now();

        assert!(cache.try_acquire_lease_at("refresh", "a", ttl, now).await.unwrap());
        assert!(!cache.try_acquire_lease_at("refresh", "b", ttl, now).await.unwrap());
        assert!(cache.try_acquire_lease_at("refresh", "a", ttl, now).await.unwrap());

        let later = now + chrono::Duration::seconds(61);
        assert!(cache.try_acquire_lease_at("refresh", "b", ttl, later).await.unwrap());
        assert!(!cache.try_acquire_lease_at("refresh", "a", ttl, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_follower_picks_up_leader_snapshot() {
        let path = std::env::temp_dir()
            .join(format!("recommendation-cache-{:08x}.db", rand::random::<u32>()))
            .to_string_lossy()
            .to_string();
        let ttl = Duration::from_secs(60);

        let leader = RecommendationCache::connect(&path).await.unwrap();
        let follower = RecommendationCache::connect(&path).await.unwrap();
        follower.load().await.unwrap();
        assert!(!follower.reload_if_newer().await.unwrap());

        assert!(leader.try_acquire_lease("refresh", "leader", ttl).await.unwrap());
        assert!(!follower.try_acquire_lease("refresh", "follower", ttl).await.unwrap());

        leader.set_page_collections(vec![collection("Space")]).await.unwrap();
        assert!(follower.page_collections().is_none());

        assert!(follower.reload_if_newer().await.unwrap());
        assert_eq!(follower.page_collections().unwrap().as_ref(), &vec![collection("Space")]);
        assert!(!follower.reload_if_newer().await.unwrap());

        leader.set_page_collections(vec![collection("A"), collection("B")]).await.unwrap();
        assert!(follower.reload_if_newer().await.unwrap());
        assert_eq!(follower.page_collections().unwrap().len(), 2);

        leader.close().await.unwrap();
        follower.close().await.unwrap();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path, suffix));
        }
    }

    #[tokio::test]
    async fn test_reload_without_persistence() {
        let cache = RecommendationCache::in_memory();
        assert!(!cache.reload_if_newer().await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_without_persistence() {
        let cache = RecommendationCache::in_memory();
        assert!(cache
            .try_acquire_lease("refresh", "anyone", Duration::from_secs(1))
            .await
            .unwrap());
    }
}

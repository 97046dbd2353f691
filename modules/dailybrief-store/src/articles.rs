// SQLite persistence for articles. The url column carries a unique index; all
// dedup in the pipeline ultimately rests on it.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use dailybrief_common::{Article, SourceType};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Insert hit the unique url index. Callers treat this as "already have it".
    #[error("Duplicate url: {0}")]
    DuplicateUrl(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct ArticleStore {
    pool: SqlitePool,
}

/// A row from the articles table.
#[derive(Debug, sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    title: String,
    url: String,
    source: String,
    source_type: String,
    published_date: String,
    fetched_at: String,
    content: String,
    summary: String,
    zh_summary: String,
    category: String,
    is_pushed: bool,
    extras: String,
}

impl ArticleRow {
    fn into_article(self) -> Article {
        let extras = serde_json::from_str(&self.extras).unwrap_or_default();
        Article {
            id: Some(self.id),
            title: self.title,
            url: self.url,
            source: self.source,
            source_type: SourceType::parse(&self.source_type).unwrap_or(SourceType::Rss),
            published_date: self.published_date,
            fetched_at: self.fetched_at,
            content: self.content,
            summary: self.summary,
            zh_summary: self.zh_summary,
            category: self.category,
            is_pushed: self.is_pushed,
            extras,
        }
    }
}

/// Per-source aggregate used by the `evaluate` command.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SourceStat {
    pub source_type: String,
    pub total: i64,
    pub enriched: i64,
    pub pushed: i64,
}

impl ArticleStore {
    /// Open (and migrate) the store. `:memory:` gives an ephemeral database
    /// for tests.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = if path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                source_type TEXT NOT NULL,
                published_date TEXT NOT NULL DEFAULT '',
                fetched_at TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                zh_summary TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                is_pushed INTEGER NOT NULL DEFAULT 0,
                extras TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_is_pushed ON articles(is_pushed)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn exists_by_url(&self, url: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Bulk prefetch of every known url, used by the scheduler for fast dedup.
    pub async fn existing_urls(&self) -> Result<HashSet<String>, StoreError> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT url FROM articles")
            .fetch_all(&self.pool)
            .await?;
        Ok(urls.into_iter().collect())
    }

    /// Insert a new article, stamping `fetched_at` if the caller didn't.
    /// A duplicate url maps to [`StoreError::DuplicateUrl`].
    pub async fn save(&self, article: &Article) -> Result<i64, StoreError> {
        let fetched_at = if article.fetched_at.is_empty() {
            Utc::now().to_rfc3339()
        } else {
            article.fetched_at.clone()
        };
        let extras = serde_json::to_string(&article.extras).unwrap_or_else(|_| "{}".to_string());

        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO articles
                (title, url, source, source_type, published_date, fetched_at,
                 content, summary, zh_summary, category, is_pushed, extras)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.source)
        .bind(article.source_type.as_str())
        .bind(&article.published_date)
        .bind(&fetched_at)
        .bind(&article.content)
        .bind(&article.summary)
        .bind(&article.zh_summary)
        .bind(&article.category)
        .bind(article.is_pushed)
        .bind(&extras)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(id) => Ok(id),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateUrl(article.url.clone())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn unpushed(&self) -> Result<Vec<Article>, StoreError> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            "SELECT * FROM articles WHERE is_pushed = 0 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ArticleRow::into_article).collect())
    }

    /// Flip `is_pushed` for the given ids in a single transaction.
    pub async fn mark_pushed(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE articles SET is_pushed = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(count = ids.len(), "Marked articles as pushed");
        Ok(())
    }

    pub async fn all_articles(&self) -> Result<Vec<Article>, StoreError> {
        let rows = sqlx::query_as::<_, ArticleRow>("SELECT * FROM articles ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ArticleRow::into_article).collect())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Per-source totals / enrichment coverage / push rate.
    pub async fn source_stats(&self) -> Result<Vec<SourceStat>, StoreError> {
        let rows = sqlx::query_as::<_, SourceStat>(
            r#"
            SELECT source_type,
                   COUNT(*) AS total,
                   SUM(CASE WHEN summary != '' THEN 1 ELSE 0 END) AS enriched,
                   SUM(CASE WHEN is_pushed = 1 THEN 1 ELSE 0 END) AS pushed
            FROM articles
            GROUP BY source_type
            ORDER BY total DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str) -> Article {
        Article::new("Title", url, "Test", SourceType::Rss)
    }

    #[tokio::test]
    async fn save_assigns_ids_and_rejects_duplicates() {
        let store = ArticleStore::open(":memory:").await.unwrap();

        let id = store.save(&article("https://a/1")).await.unwrap();
        assert!(id > 0);

        let err = store.save(&article("https://a/1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUrl(u) if u == "https://a/1"));

        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn existing_urls_prefetch() {
        let store = ArticleStore::open(":memory:").await.unwrap();
        store.save(&article("https://a/1")).await.unwrap();
        store.save(&article("https://a/2")).await.unwrap();

        let urls = store.existing_urls().await.unwrap();
        assert!(urls.contains("https://a/1"));
        assert!(urls.contains("https://a/2"));
        assert!(!urls.contains("https://a/3"));
        assert!(store.exists_by_url("https://a/1").await.unwrap());
    }

    #[tokio::test]
    async fn mark_pushed_flips_flag_once() {
        let store = ArticleStore::open(":memory:").await.unwrap();
        let id1 = store.save(&article("https://a/1")).await.unwrap();
        store.save(&article("https://a/2")).await.unwrap();

        assert_eq!(store.unpushed().await.unwrap().len(), 2);
        store.mark_pushed(&[id1]).await.unwrap();

        let unpushed = store.unpushed().await.unwrap();
        assert_eq!(unpushed.len(), 1);
        assert_eq!(unpushed[0].url, "https://a/2");
    }

    #[tokio::test]
    async fn extras_round_trip() {
        let store = ArticleStore::open(":memory:").await.unwrap();
        let mut a = article("https://a/1");
        a.extras
            .insert("cve_id".into(), serde_json::json!("CVE-2024-1"));
        store.save(&a).await.unwrap();

        let all = store.all_articles().await.unwrap();
        assert_eq!(all[0].extra_str("cve_id"), Some("CVE-2024-1"));
        assert!(!all[0].fetched_at.is_empty());
    }

    #[tokio::test]
    async fn concurrent_saves_keep_url_unique() {
        let store = ArticleStore::open(":memory:").await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save(&article("https://race/1")).await
            }));
        }
        let mut ok = 0;
        let mut dup = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::DuplicateUrl(_)) => dup += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(dup, 7);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn source_stats_aggregate() {
        let store = ArticleStore::open(":memory:").await.unwrap();
        let mut a = article("https://a/1");
        a.summary = "s".into();
        store.save(&a).await.unwrap();
        store.save(&article("https://a/2")).await.unwrap();

        let stats = store.source_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].enriched, 1);
        assert_eq!(stats[0].pushed, 0);
    }
}

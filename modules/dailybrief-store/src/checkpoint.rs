// Resumable progress snapshots for the fetch and process stages. Two JSON
// files under the checkpoint dir, rewritten whole on save. A crashed run
// resumes by reloading them: feeds/articles already recorded are not redone.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use dailybrief_common::Article;

const FETCH_FILE: &str = "fetch_checkpoint.json";
const PROCESS_FILE: &str = "process_checkpoint.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetching,
    Processing,
    Pushing,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchCheckpoint {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub phase: Phase,
    pub total_feeds: usize,
    pub completed_feeds: BTreeSet<String>,
    pub failed_feeds: BTreeSet<String>,
    /// Articles grouped by feed name, restored on resume.
    pub fetched_articles: BTreeMap<String, Vec<Article>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCheckpoint {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub phase: Phase,
    pub total_articles: usize,
    pub processed_urls: BTreeSet<String>,
    pub failed_urls: BTreeSet<String>,
    pub processed_articles: Vec<Article>,
}

/// One-line progress summary for the `checkpoint-status` command.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointStatus {
    pub fetch: Option<String>,
    pub process: Option<String>,
}

#[derive(Default)]
struct Inner {
    fetch: Option<FetchCheckpoint>,
    process: Option<ProcessCheckpoint>,
    feed_counter: usize,
    article_counter: usize,
}

pub struct CheckpointManager {
    dir: PathBuf,
    max_age: Duration,
    save_interval: usize,
    inner: Mutex<Inner>,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, max_age_hours: i64, save_interval: usize) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!(dir = %dir.display(), error = %e, "Failed to create checkpoint dir");
        }
        Self {
            dir,
            max_age: Duration::hours(max_age_hours),
            save_interval: save_interval.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn fetch_path(&self) -> PathBuf {
        self.dir.join(FETCH_FILE)
    }

    fn process_path(&self) -> PathBuf {
        self.dir.join(PROCESS_FILE)
    }

    // =========================================================================
    // Fetch stage
    // =========================================================================

    /// Resume a non-expired fetch checkpoint still in phase `fetching`, or
    /// start a fresh one. Returns the number of feeds already completed.
    pub fn start_fetch(&self, all_urls: &[String]) -> usize {
        self.start_fetch_at(all_urls, Utc::now())
    }

    pub fn start_fetch_at(&self, all_urls: &[String], now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().expect("checkpoint lock");

        if let Some(existing) = load_json::<FetchCheckpoint>(&self.fetch_path()) {
            if existing.phase == Phase::Fetching && !self.is_expired(&existing.created_at, now) {
                info!(
                    completed = existing.completed_feeds.len(),
                    total = existing.total_feeds,
                    "Resuming fetch checkpoint"
                );
                let completed = existing.completed_feeds.len();
                inner.fetch = Some(existing);
                return completed;
            }
        }

        let checkpoint = FetchCheckpoint {
            id: format!("fetch_{}", now.format("%Y%m%d_%H%M%S")),
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
            phase: Phase::Fetching,
            total_feeds: all_urls.len(),
            completed_feeds: BTreeSet::new(),
            failed_feeds: BTreeSet::new(),
            fetched_articles: BTreeMap::new(),
        };
        info!(id = %checkpoint.id, total = all_urls.len(), "Created fetch checkpoint");
        save_json(&self.fetch_path(), &checkpoint);
        inner.fetch = Some(checkpoint);
        0
    }

    pub fn mark_feed_done(&self, url: &str, name: &str, articles: &[Article]) {
        let mut inner = self.inner.lock().expect("checkpoint lock");
        let save_interval = self.save_interval;
        let path = self.fetch_path();
        let Some(cp) = inner.fetch.as_mut() else {
            return;
        };
        cp.completed_feeds.insert(url.to_string());
        let key = if name.is_empty() { url } else { name };
        cp.fetched_articles
            .insert(key.to_string(), articles.to_vec());
        cp.updated_at = Utc::now().to_rfc3339();

        inner.feed_counter += 1;
        if inner.feed_counter >= save_interval {
            inner.feed_counter = 0;
            if let Some(cp) = inner.fetch.as_ref() {
                save_json(&path, cp);
                debug!(completed = cp.completed_feeds.len(), "Auto-saved fetch checkpoint");
            }
        }
    }

    pub fn mark_feed_failed(&self, url: &str, error: &str) {
        let mut inner = self.inner.lock().expect("checkpoint lock");
        let Some(cp) = inner.fetch.as_mut() else {
            return;
        };
        cp.failed_feeds.insert(url.to_string());
        cp.updated_at = Utc::now().to_rfc3339();
        debug!(url, error, "Feed marked failed in checkpoint");
    }

    /// Feeds not yet completed or failed.
    pub fn pending_feeds(&self, all_urls: &[String]) -> Vec<String> {
        let inner = self.inner.lock().expect("checkpoint lock");
        match inner.fetch.as_ref() {
            Some(cp) => all_urls
                .iter()
                .filter(|u| !cp.completed_feeds.contains(*u) && !cp.failed_feeds.contains(*u))
                .cloned()
                .collect(),
            None => all_urls.to_vec(),
        }
    }

    /// Everything fetched so far, across feeds (restored + current run).
    pub fn fetched_articles(&self) -> Vec<Article> {
        let inner = self.inner.lock().expect("checkpoint lock");
        inner
            .fetch
            .as_ref()
            .map(|cp| cp.fetched_articles.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn complete_fetch(&self) {
        let mut inner = self.inner.lock().expect("checkpoint lock");
        if let Some(cp) = inner.fetch.as_mut() {
            cp.phase = Phase::Processing;
            cp.updated_at = Utc::now().to_rfc3339();
            save_json(&self.fetch_path(), cp);
            info!("Fetch stage complete");
        }
    }

    pub fn save_fetch(&self) {
        let inner = self.inner.lock().expect("checkpoint lock");
        if let Some(cp) = inner.fetch.as_ref() {
            save_json(&self.fetch_path(), cp);
        }
    }

    // =========================================================================
    // Process stage
    // =========================================================================

    pub fn start_process(&self, articles: &[Article]) -> usize {
        self.start_process_at(articles, Utc::now())
    }

    pub fn start_process_at(&self, articles: &[Article], now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().expect("checkpoint lock");

        if let Some(existing) = load_json::<ProcessCheckpoint>(&self.process_path()) {
            if existing.phase == Phase::Processing && !self.is_expired(&existing.created_at, now) {
                info!(
                    processed = existing.processed_urls.len(),
                    total = existing.total_articles,
                    "Resuming process checkpoint"
                );
                let processed = existing.processed_urls.len();
                inner.process = Some(existing);
                return processed;
            }
        }

        let checkpoint = ProcessCheckpoint {
            id: format!("process_{}", now.format("%Y%m%d_%H%M%S")),
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
            phase: Phase::Processing,
            total_articles: articles.len(),
            processed_urls: BTreeSet::new(),
            failed_urls: BTreeSet::new(),
            processed_articles: Vec::new(),
        };
        info!(id = %checkpoint.id, total = articles.len(), "Created process checkpoint");
        save_json(&self.process_path(), &checkpoint);
        inner.process = Some(checkpoint);
        0
    }

    pub fn mark_article_done(&self, article: &Article) {
        let mut inner = self.inner.lock().expect("checkpoint lock");
        let save_interval = self.save_interval;
        let path = self.process_path();
        let Some(cp) = inner.process.as_mut() else {
            return;
        };
        if !article.url.is_empty() && cp.processed_urls.insert(article.url.clone()) {
            cp.processed_articles.push(article.clone());
        }
        cp.updated_at = Utc::now().to_rfc3339();

        inner.article_counter += 1;
        if inner.article_counter >= save_interval {
            inner.article_counter = 0;
            if let Some(cp) = inner.process.as_ref() {
                save_json(&path, cp);
                debug!(processed = cp.processed_urls.len(), "Auto-saved process checkpoint");
            }
        }
    }

    pub fn mark_article_failed(&self, url: &str, error: &str) {
        let mut inner = self.inner.lock().expect("checkpoint lock");
        let Some(cp) = inner.process.as_mut() else {
            return;
        };
        cp.failed_urls.insert(url.to_string());
        cp.updated_at = Utc::now().to_rfc3339();
        debug!(url, error, "Article marked failed in checkpoint");
    }

    pub fn is_article_processed(&self, url: &str) -> bool {
        let inner = self.inner.lock().expect("checkpoint lock");
        inner
            .process
            .as_ref()
            .map(|cp| cp.processed_urls.contains(url))
            .unwrap_or(false)
    }

    /// Articles not yet processed or failed.
    pub fn pending_articles(&self, articles: &[Article]) -> Vec<Article> {
        let inner = self.inner.lock().expect("checkpoint lock");
        match inner.process.as_ref() {
            Some(cp) => articles
                .iter()
                .filter(|a| !cp.processed_urls.contains(&a.url) && !cp.failed_urls.contains(&a.url))
                .cloned()
                .collect(),
            None => articles.to_vec(),
        }
    }

    pub fn complete_process(&self) {
        let mut inner = self.inner.lock().expect("checkpoint lock");
        if let Some(cp) = inner.process.as_mut() {
            cp.phase = Phase::Pushing;
            cp.updated_at = Utc::now().to_rfc3339();
            save_json(&self.process_path(), cp);
            info!("Process stage complete");
        }
    }

    pub fn save_process(&self) {
        let inner = self.inner.lock().expect("checkpoint lock");
        if let Some(cp) = inner.process.as_ref() {
            save_json(&self.process_path(), cp);
        }
    }

    // =========================================================================
    // Shared
    // =========================================================================

    /// Remove both checkpoint files. Only called on a fully-successful run.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("checkpoint lock");
        for path in [self.fetch_path(), self.process_path()] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    error!(path = %path.display(), error = %e, "Failed to remove checkpoint");
                }
            }
        }
        inner.fetch = None;
        inner.process = None;
        info!("Checkpoints cleared");
    }

    /// Drop checkpoint files older than `max_age`.
    pub fn cleanup_expired(&self) {
        self.cleanup_expired_at(Utc::now());
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) {
        for path in [self.fetch_path(), self.process_path()] {
            let created = load_json::<serde_json::Value>(&path)
                .and_then(|v| v.get("created_at").and_then(|c| c.as_str().map(String::from)));
            if let Some(created) = created {
                if self.is_expired(&created, now) {
                    if std::fs::remove_file(&path).is_ok() {
                        info!(path = %path.display(), "Removed expired checkpoint");
                    }
                }
            }
        }
    }

    /// Summary read from disk, for inspection outside a run.
    pub fn status(&self) -> CheckpointStatus {
        let fetch = load_json::<FetchCheckpoint>(&self.fetch_path()).map(|cp| {
            format!(
                "{} phase={:?} feeds={}/{} articles={}",
                cp.id,
                cp.phase,
                cp.completed_feeds.len(),
                cp.total_feeds,
                cp.fetched_articles.values().map(Vec::len).sum::<usize>()
            )
        });
        let process = load_json::<ProcessCheckpoint>(&self.process_path()).map(|cp| {
            format!(
                "{} phase={:?} articles={}/{} failed={}",
                cp.id,
                cp.phase,
                cp.processed_urls.len(),
                cp.total_articles,
                cp.failed_urls.len()
            )
        });
        CheckpointStatus { fetch, process }
    }

    fn is_expired(&self, created_at: &str, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(created_at) {
            Ok(created) => now - created.with_timezone(&Utc) >= self.max_age,
            Err(_) => true,
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to parse checkpoint");
                None
            }
        },
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read checkpoint");
            None
        }
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(raw) => {
            if let Err(e) = std::fs::write(path, raw) {
                error!(path = %path.display(), error = %e, "Failed to write checkpoint");
            }
        }
        Err(e) => error!(path = %path.display(), error = %e, "Failed to serialize checkpoint"),
    }
}

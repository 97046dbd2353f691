// End-to-end pipeline runs against stubbed sources, model and messenger.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use ai_client::ChatAgent;
use dailybrief_common::{Article, FetchResult, SourceType};
use dailybrief_fetch::{Fetcher, FetcherManager};
use dailybrief_pipeline::{
    Enricher, IdentitySelector, Messenger, PipelineDeps, Scheduler, TieredPusher,
};
use dailybrief_store::{ArticleStore, CheckpointManager};

struct StubFetcher {
    articles: Vec<Article>,
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self) -> FetchResult {
        FetchResult::ok("Stub", SourceType::Blog, self.articles.clone())
    }

    fn enabled(&self) -> bool {
        true
    }

    fn source_name(&self) -> &str {
        "Stub"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Blog
    }
}

struct CountingAgent {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatAgent for CountingAgent {
    async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("SUMMARY: summary\nCATEGORY: AI安全\nZH_SUMMARY: 中文摘要".to_string())
    }
}

struct StubMessenger {
    fail: bool,
    sends: Arc<AtomicUsize>,
}

#[async_trait]
impl Messenger for StubMessenger {
    async fn send_text(&self, _r: &str, _t: &str) -> Result<()> {
        Ok(())
    }

    async fn send_rich_text(&self, _r: &str, _title: &str, _content: Value) -> Result<()> {
        if self.fail {
            anyhow::bail!("platform down");
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_card(&self, _r: &str, _c: Value) -> Result<()> {
        Ok(())
    }

    async fn reply_message(&self, _m: &str, _t: &str) -> Result<()> {
        Ok(())
    }
}

fn article(url: &str) -> Article {
    Article::new(format!("Article {url}"), url, "Stub", SourceType::Blog)
        .with_content("Body content worth enriching.")
}

struct Harness {
    store: ArticleStore,
    enrich_calls: Arc<AtomicUsize>,
    sends: Arc<AtomicUsize>,
}

async fn scheduler_with(
    checkpoint_dir: &Path,
    fetched: Vec<Article>,
    store: Option<ArticleStore>,
    messenger_fails: bool,
) -> (Scheduler, Harness) {
    let store = match store {
        Some(store) => store,
        None => ArticleStore::open(":memory:").await.unwrap(),
    };
    let enrich_calls = Arc::new(AtomicUsize::new(0));
    let sends = Arc::new(AtomicUsize::new(0));

    let mut manager = FetcherManager::new(5);
    if !fetched.is_empty() {
        manager.register(Arc::new(StubFetcher { articles: fetched }));
    }

    let deps = PipelineDeps {
        store: store.clone(),
        checkpoints: Some(Arc::new(CheckpointManager::new(checkpoint_dir, 24, 1))),
        rss: None,
        manager,
        content: None,
        enricher: Some(Arc::new(Enricher::new(Arc::new(CountingAgent {
            calls: Arc::clone(&enrich_calls),
        })))),
        scorer: None,
        selector: Arc::new(IdentitySelector),
        pusher: TieredPusher::new(10, 80, 50),
        messenger: Some(Arc::new(StubMessenger {
            fail: messenger_fails,
            sends: Arc::clone(&sends),
        })),
        chat_id: "chat-1".to_string(),
        process_workers: 10,
    };

    (
        Scheduler::new(deps, "08:00", "UTC"),
        Harness {
            store,
            enrich_calls,
            sends,
        },
    )
}

fn checkpoint_files_exist(dir: &Path) -> bool {
    dir.join("fetch_checkpoint.json").exists() || dir.join("process_checkpoint.json").exists()
}

#[tokio::test]
async fn empty_pipeline_completes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, harness) = scheduler_with(dir.path(), vec![], None, false).await;

    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.new_articles, 0);
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.pushed, 0);
    assert_eq!(harness.store.count().await.unwrap(), 0);
    assert!(
        !checkpoint_files_exist(dir.path()),
        "no checkpoints may remain after a clean run"
    );
}

#[tokio::test]
async fn url_dedup_skips_known_articles() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArticleStore::open(":memory:").await.unwrap();
    store.save(&article("https://a/1")).await.unwrap();

    let fetched = vec![article("https://a/1"), article("https://a/2")];
    let (scheduler, harness) =
        scheduler_with(dir.path(), fetched, Some(store), false).await;

    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.new_articles, 1);

    let urls = harness.store.existing_urls().await.unwrap();
    assert_eq!(urls.len(), 2);
    assert!(urls.contains("https://a/2"));
    // The enricher ran only for the new article.
    assert_eq!(harness.enrich_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resume_processes_only_the_remainder() {
    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (1..=5).map(|i| format!("https://a/{i}")).collect();
    let all: Vec<Article> = urls.iter().map(|u| article(u)).collect();

    // Simulate a run killed after 3 of 5 articles: those three are in the
    // store and recorded in the process checkpoint.
    let store = ArticleStore::open(":memory:").await.unwrap();
    {
        let cp = CheckpointManager::new(dir.path(), 24, 1);
        cp.start_process(&all);
        for a in &all[..3] {
            store.save(a).await.unwrap();
            cp.mark_article_done(a);
        }
        cp.save_process();
    }
    assert!(checkpoint_files_exist(dir.path()));

    let (scheduler, harness) =
        scheduler_with(dir.path(), all.clone(), Some(store), false).await;
    let stats = scheduler.run_once().await.unwrap();

    // Exactly the two remaining articles were enriched and saved.
    assert_eq!(harness.enrich_calls.load(Ordering::SeqCst), 2);
    assert_eq!(stats.processed, 2);
    assert_eq!(harness.store.count().await.unwrap(), 5);

    // Push succeeded, so every article is marked and checkpoints are gone.
    assert!(harness.store.unpushed().await.unwrap().is_empty());
    assert!(!checkpoint_files_exist(dir.path()));
    assert!(harness.sends.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn push_failure_preserves_checkpoint_and_unpushed_state() {
    let dir = tempfile::tempdir().unwrap();
    let fetched = vec![article("https://a/1"), article("https://a/2")];
    let (scheduler, harness) =
        scheduler_with(dir.path(), fetched.clone(), Some(ArticleStore::open(":memory:").await.unwrap()), true)
            .await;

    let result = scheduler.run_once().await;
    assert!(result.is_err(), "push failure must fail the run");

    // Nothing marked pushed; checkpoints survive for the retry.
    let store = harness.store;
    assert_eq!(store.unpushed().await.unwrap().len(), 2);
    assert!(checkpoint_files_exist(dir.path()));

    // A second run with a working messenger delivers and cleans up, without
    // re-enriching the already persisted articles.
    let (scheduler, harness2) =
        scheduler_with(dir.path(), fetched, Some(store), false).await;
    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(harness2.enrich_calls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.pushed, 2);
    assert!(harness2.store.unpushed().await.unwrap().is_empty());
    assert!(!checkpoint_files_exist(dir.path()));
}

#[tokio::test]
async fn pushed_flag_survives_later_runs() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, harness) = scheduler_with(
        dir.path(),
        vec![article("https://a/1")],
        Some(ArticleStore::open(":memory:").await.unwrap()),
        false,
    )
    .await;
    scheduler.run_once().await.unwrap();
    assert!(harness.store.unpushed().await.unwrap().is_empty());

    // Re-running with the same source fetches nothing new and pushes nothing.
    let (scheduler, harness2) = scheduler_with(
        dir.path(),
        vec![article("https://a/1")],
        Some(harness.store),
        false,
    )
    .await;
    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.new_articles, 0);
    assert_eq!(stats.pushed, 0);
    assert_eq!(harness2.sends.load(Ordering::SeqCst), 0);
}

// The orchestrated daily run: fetch -> dedup -> process pool -> push, with
// checkpointed resume around the fetch and process stages.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use dailybrief_common::config::FeedSpec;
use dailybrief_common::{Article, SourceType};
use dailybrief_fetch::sources::rss::{FeedDoneFn, FeedFailedFn, RssFetcher};
use dailybrief_fetch::traits::Fetcher;
use dailybrief_fetch::{ContentProcessor, FetcherManager};
use dailybrief_store::{ArticleStore, CheckpointManager, StoreError};

use crate::enricher::Enricher;
use crate::messenger::Messenger;
use crate::pusher::TieredPusher;
use crate::scorer::{PriorityScorer, ScoredArticle};
use crate::selector::SmartSelector;

/// Everything a run needs, injected so tests can stub the edges.
pub struct PipelineDeps {
    pub store: ArticleStore,
    pub checkpoints: Option<Arc<CheckpointManager>>,
    /// The subscription-feed adapter runs outside the manager so the fetch
    /// checkpoint can track per-feed progress.
    pub rss: Option<Arc<RssFetcher>>,
    pub manager: FetcherManager,
    pub content: Option<Arc<ContentProcessor>>,
    pub enricher: Option<Arc<Enricher>>,
    pub scorer: Option<Arc<PriorityScorer>>,
    pub selector: Arc<dyn SmartSelector>,
    pub pusher: TieredPusher,
    pub messenger: Option<Arc<dyn Messenger>>,
    pub chat_id: String,
    pub process_workers: usize,
}

#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub fetched: usize,
    pub new_articles: usize,
    pub processed: usize,
    pub failed: usize,
    pub pushed: usize,
    pub fetch_errors: usize,
}

pub struct Scheduler {
    deps: PipelineDeps,
    schedule_time: String,
    timezone: String,
}

impl Scheduler {
    pub fn new(deps: PipelineDeps, schedule_time: &str, timezone: &str) -> Self {
        Self {
            deps,
            schedule_time: schedule_time.to_string(),
            timezone: timezone.to_string(),
        }
    }

    /// One complete fetch-process-push run.
    pub async fn run_once(&self) -> Result<RunStats> {
        let started = Utc::now();
        info!(at = %started.to_rfc3339(), "Pipeline run started");

        let deps = &self.deps;
        let mut stats = RunStats::default();
        let mut fetch_errors: Vec<(String, String)> = Vec::new();

        let existing = deps
            .store
            .existing_urls()
            .await
            .context("Failed to prefetch existing urls")?;
        info!(known_urls = existing.len(), "Loaded existing url set");

        let mut seen = HashSet::new();
        let mut new_articles: Vec<Article> = Vec::new();

        // --- Fetch: RSS through the checkpoint, everything else via the manager ---

        if let Some(rss) = &deps.rss {
            self.fetch_rss(rss, &existing, &mut seen, &mut new_articles, &mut stats, &mut fetch_errors)
                .await;
        }

        for result in deps.manager.fetch_all().await {
            stats.fetched += result.items.len();
            if let Some(err) = result.error {
                fetch_errors.push((result.source_name.clone(), err));
            }
            for article in result.items {
                add_if_new(article, &existing, &mut seen, &mut new_articles);
            }
        }

        stats.new_articles = new_articles.len();
        stats.fetch_errors = fetch_errors.len();
        info!(
            fetched = stats.fetched,
            new = stats.new_articles,
            errors = fetch_errors.len(),
            "Fetch stage complete"
        );

        // --- Process: content -> enrich -> persist on a bounded pool ---

        let pending = match &deps.checkpoints {
            Some(cp) => {
                cp.start_process(&new_articles);
                cp.pending_articles(&new_articles)
            }
            None => new_articles,
        };

        if pending.is_empty() {
            info!("No pending articles to process");
        } else {
            let workers = deps.process_workers.min(pending.len()).max(1);
            info!(pending = pending.len(), workers, "Processing articles");

            let semaphore = Arc::new(Semaphore::new(workers));
            let mut tasks = JoinSet::new();
            for article in pending {
                let semaphore = Arc::clone(&semaphore);
                let content = deps.content.clone();
                let enricher = deps.enricher.clone();
                let store = deps.store.clone();
                let checkpoints = deps.checkpoints.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    process_article(article, content, enricher, store, checkpoints).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(true) => stats.processed += 1,
                    Ok(false) => stats.failed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        error!(error = %e, "Processing task aborted");
                    }
                }
            }

            if let Some(cp) = &deps.checkpoints {
                cp.complete_process();
                cp.save_process();
            }
            info!(processed = stats.processed, failed = stats.failed, "Process stage complete");
        }

        // --- Push: select -> score -> tier -> dispatch -> mark ---

        stats.pushed = self.push_stage().await?;

        // --- Wrap up ---

        if !fetch_errors.is_empty() {
            self.report_fetch_errors(&fetch_errors).await;
        }

        if let Some(cp) = &deps.checkpoints {
            cp.clear();
        }

        let duration = (Utc::now() - started).num_seconds();
        info!(?stats, duration_secs = duration, "Pipeline run complete");
        Ok(stats)
    }

    async fn fetch_rss(
        &self,
        rss: &Arc<RssFetcher>,
        existing: &HashSet<String>,
        seen: &mut HashSet<String>,
        new_articles: &mut Vec<Article>,
        stats: &mut RunStats,
        fetch_errors: &mut Vec<(String, String)>,
    ) {
        let specs: Vec<FeedSpec> = rss.feeds().to_vec();
        let urls: Vec<String> = specs.iter().map(|s| s.url.clone()).collect();

        match &self.deps.checkpoints {
            Some(cp) => {
                cp.cleanup_expired();
                let resumed = cp.start_fetch(&urls);
                if resumed > 0 {
                    // Re-admit whatever a previous attempt already fetched.
                    let restored = cp.fetched_articles();
                    info!(restored = restored.len(), "Restored articles from fetch checkpoint");
                    stats.fetched += restored.len();
                    for article in restored {
                        add_if_new(article, existing, seen, new_articles);
                    }
                }

                let pending_urls: HashSet<String> = cp.pending_feeds(&urls).into_iter().collect();
                let pending_specs: Vec<FeedSpec> = specs
                    .iter()
                    .filter(|s| pending_urls.contains(&s.url))
                    .cloned()
                    .collect();

                if pending_specs.is_empty() {
                    info!("All feeds already fetched in a previous attempt");
                } else {
                    let done_cp = Arc::clone(cp);
                    let failed_cp = Arc::clone(cp);
                    let on_done: Arc<FeedDoneFn> =
                        Arc::new(move |url, name, articles| done_cp.mark_feed_done(url, name, articles));
                    let on_failed: Arc<FeedFailedFn> =
                        Arc::new(move |url, err| failed_cp.mark_feed_failed(url, err));

                    let fetched = rss.fetch_with_progress(&pending_specs, on_done, on_failed).await;
                    stats.fetched += fetched.len();
                    for article in fetched {
                        add_if_new(article, existing, seen, new_articles);
                    }
                    cp.save_fetch();
                }
                cp.complete_fetch();
            }
            None => {
                let result = Fetcher::fetch(rss.as_ref()).await;
                stats.fetched += result.items.len();
                if let Some(err) = result.error {
                    fetch_errors.push((result.source_name.clone(), err));
                }
                for article in result.items {
                    add_if_new(article, existing, seen, new_articles);
                }
            }
        }
    }

    async fn push_stage(&self) -> Result<usize> {
        let deps = &self.deps;
        let Some(messenger) = &deps.messenger else {
            info!("No messenger configured, skipping push");
            return Ok(0);
        };

        let unpushed = deps.store.unpushed().await?;
        if unpushed.is_empty() {
            info!("No unpushed articles");
            return Ok(0);
        }
        info!(count = unpushed.len(), "Pushing unpushed articles");

        let selected = deps.selector.select(unpushed).await;
        let scored: Vec<ScoredArticle> = match &deps.scorer {
            Some(scorer) => {
                PriorityScorer::sort_by_priority(scorer.score_articles(selected).await)
            }
            None => selected
                .into_iter()
                .map(|article| ScoredArticle {
                    article,
                    score: 50,
                    reasons: Vec::new(),
                })
                .collect(),
        };

        let tiers = deps.pusher.categorize(scored);
        // A failed dispatch fails the run; the checkpoint survives and the
        // articles stay unpushed for the next attempt.
        deps.pusher
            .push_tiered(messenger.as_ref(), &deps.chat_id, &tiers)
            .await?;

        let ids: Vec<i64> = tiers
            .high
            .iter()
            .chain(tiers.mid.iter())
            .chain(tiers.low.iter())
            .filter_map(|s| s.article.id)
            .collect();
        deps.store.mark_pushed(&ids).await?;
        Ok(ids.len())
    }

    async fn report_fetch_errors(&self, errors: &[(String, String)]) {
        let Some(messenger) = &self.deps.messenger else {
            return;
        };
        let mut report = format!("⚠️ 抓取错误汇总 ({} 个数据源失败):\n", errors.len());
        for (source, err) in errors {
            report.push_str(&format!("- {source}: {err}\n"));
        }
        if let Err(e) = messenger.send_text(&self.deps.chat_id, &report).await {
            warn!(error = %e, "Failed to push the fetch-error report");
        }
    }

    /// Daily loop: sleep to the configured wall-clock time in the configured
    /// timezone, run, repeat. Ctrl-C stops after the current iteration.
    pub async fn run_daily(&self) -> Result<()> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| anyhow!("Invalid timezone: {}", self.timezone))?;

        loop {
            let wait = next_run_delay(&self.schedule_time, tz, Utc::now())?;
            info!(
                wait_secs = wait.as_secs(),
                schedule = %self.schedule_time,
                timezone = %self.timezone,
                "Waiting for next scheduled run"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = ?e, "Scheduled run failed, checkpoint preserved");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, stopping scheduler");
                    return Ok(());
                }
            }
        }
    }
}

/// Admit an article only when its url is non-empty, not already stored and
/// not yet seen in this run.
fn add_if_new(
    article: Article,
    existing: &HashSet<String>,
    seen: &mut HashSet<String>,
    out: &mut Vec<Article>,
) {
    if article.url.is_empty() || existing.contains(&article.url) {
        return;
    }
    if seen.insert(article.url.clone()) {
        out.push(article);
    }
}

/// One article through the processing pool: fill the body (subscription-feed
/// articles only carry a link), enrich, persist, record in the checkpoint.
async fn process_article(
    mut article: Article,
    content: Option<Arc<ContentProcessor>>,
    enricher: Option<Arc<Enricher>>,
    store: ArticleStore,
    checkpoints: Option<Arc<CheckpointManager>>,
) -> bool {
    let url = article.url.clone();

    if article.source_type == SourceType::Rss && article.content.is_empty() {
        if let Some(processor) = &content {
            article.content = processor.process(&url).await;
        }
    }

    let mut enrich_failed = false;
    if let Some(enricher) = &enricher {
        if !article.content.is_empty() {
            match enricher.enrich(&article.title, &article.content).await {
                Ok(enrichment) => {
                    article.summary = enrichment.summary;
                    article.category = enrichment.category;
                    article.zh_summary = enrichment.zh_summary;
                }
                Err(e) => {
                    // The article still persists, with empty summary fields.
                    warn!(url = %url, error = %e, "Enrichment failed");
                    enrich_failed = true;
                }
            }
        }
    }

    article.fetched_at = Utc::now().to_rfc3339();
    article.is_pushed = false;

    match store.save(&article).await {
        Ok(id) => {
            article.id = Some(id);
            if let Some(cp) = &checkpoints {
                if enrich_failed {
                    cp.mark_article_failed(&url, "enrichment failed");
                } else {
                    cp.mark_article_done(&article);
                }
            }
            !enrich_failed
        }
        Err(StoreError::DuplicateUrl(_)) => {
            // Someone else inserted it first; nothing to redo.
            if let Some(cp) = &checkpoints {
                cp.mark_article_done(&article);
            }
            true
        }
        Err(e) => {
            error!(url = %url, error = %e, "Failed to persist article");
            if let Some(cp) = &checkpoints {
                cp.mark_article_failed(&url, &e.to_string());
            }
            false
        }
    }
}

/// Time until the next occurrence of `HH:MM` local to `tz`.
fn next_run_delay(schedule_time: &str, tz: Tz, now: DateTime<Utc>) -> Result<StdDuration> {
    let (hour, minute) = schedule_time
        .split_once(':')
        .and_then(|(h, m)| Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)))
        .ok_or_else(|| anyhow!("Invalid schedule time: {schedule_time}"))?;
    if hour > 23 || minute > 59 {
        return Err(anyhow!("Invalid schedule time: {schedule_time}"));
    }

    let now_local = now.with_timezone(&tz);
    let mut target_date = now_local.date_naive();
    if now_local.time()
        >= chrono::NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(chrono::NaiveTime::MIN)
    {
        target_date = target_date.succ_opt().unwrap_or(target_date);
    }

    let target_naive = target_date
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| anyhow!("Invalid schedule time: {schedule_time}"))?;
    let target = tz
        .from_local_datetime(&target_naive)
        .earliest()
        .ok_or_else(|| anyhow!("Schedule time does not exist in {tz} on {target_date}"))?;

    let delta = target.with_timezone(&Utc) - now;
    Ok(delta.to_std().unwrap_or(StdDuration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn add_if_new_filters_known_and_duplicate_urls() {
        let existing: HashSet<String> = ["https://a/1".to_string()].into();
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for url in ["https://a/1", "https://a/2", "https://a/2", ""] {
            add_if_new(
                Article::new("t", url, "s", SourceType::Rss),
                &existing,
                &mut seen,
                &mut out,
            );
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://a/2");
    }

    #[test]
    fn next_run_delay_later_today() {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        // 06:00 Shanghai == 22:00 UTC previous day.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap();
        let wait = next_run_delay("08:00", tz, now).unwrap();
        assert_eq!(wait.as_secs(), 2 * 3600);
    }

    #[test]
    fn next_run_delay_rolls_to_tomorrow() {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        // 09:00 Shanghai, schedule 08:00 -> 23h away.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        let wait = next_run_delay("08:00", tz, now).unwrap();
        assert_eq!(wait.as_secs(), 23 * 3600);
    }

    #[test]
    fn next_run_delay_rejects_garbage() {
        let tz: Tz = "UTC".parse().unwrap();
        assert!(next_run_delay("25:00", tz, Utc::now()).is_err());
        assert!(next_run_delay("nope", tz, Utc::now()).is_err());
    }
}

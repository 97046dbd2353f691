use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use dailybrief_common::FetchResult;

use crate::traits::Fetcher;

/// Runs every enabled fetcher concurrently with per-source error isolation.
/// One source failing (or even panicking) never aborts the others; the result
/// list always has one entry per enabled fetcher.
pub struct FetcherManager {
    fetchers: Vec<Arc<dyn Fetcher>>,
    max_workers: usize,
}

impl FetcherManager {
    pub fn new(max_workers: usize) -> Self {
        Self {
            fetchers: Vec::new(),
            max_workers: max_workers.max(1),
        }
    }

    pub fn register(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.push(fetcher);
    }

    pub fn register_all(&mut self, fetchers: Vec<Arc<dyn Fetcher>>) {
        self.fetchers.extend(fetchers);
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    /// Fetch from all enabled sources. Returns once every fetcher completes.
    pub async fn fetch_all(&self) -> Vec<FetchResult> {
        let enabled: Vec<Arc<dyn Fetcher>> = self
            .fetchers
            .iter()
            .filter(|f| f.enabled())
            .cloned()
            .collect();

        if enabled.is_empty() {
            warn!("No enabled fetchers to run");
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for fetcher in enabled {
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                fetcher.fetch().await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if result.is_success() {
                        info!(
                            source = %result.source_name,
                            items = result.items.len(),
                            "Fetcher completed"
                        );
                    } else {
                        warn!(
                            source = %result.source_name,
                            error = result.error.as_deref().unwrap_or(""),
                            "Fetcher failed"
                        );
                    }
                    results.push(result);
                }
                Err(e) => {
                    // A panicking fetcher still contributes an error entry.
                    error!(error = %e, "Fetcher task aborted");
                    results.push(FetchResult::failed(
                        "unknown",
                        dailybrief_common::SourceType::Rss,
                        format!("fetcher task aborted: {e}"),
                    ));
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dailybrief_common::{Article, SourceType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        name: &'static str,
        enabled: bool,
        fail: bool,
        concurrent: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self) -> FetchResult {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                FetchResult::failed(self.name, SourceType::Rss, "boom")
            } else {
                FetchResult::ok(
                    self.name,
                    SourceType::Rss,
                    vec![Article::new("t", format!("https://{}/1", self.name), self.name, SourceType::Rss)],
                )
            }
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        fn source_name(&self) -> &str {
            self.name
        }

        fn source_type(&self) -> SourceType {
            SourceType::Rss
        }
    }

    fn stub(
        name: &'static str,
        enabled: bool,
        fail: bool,
        concurrent: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
    ) -> Arc<dyn Fetcher> {
        Arc::new(StubFetcher {
            name,
            enabled,
            fail,
            concurrent: Arc::clone(concurrent),
            peak: Arc::clone(peak),
        })
    }

    #[tokio::test]
    async fn failure_does_not_short_circuit_other_sources() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut mgr = FetcherManager::new(5);
        mgr.register(stub("good", true, false, &concurrent, &peak));
        mgr.register(stub("bad", true, true, &concurrent, &peak));
        mgr.register(stub("also-good", true, false, &concurrent, &peak));

        let results = mgr.fetch_all().await;
        assert_eq!(results.len(), 3);
        let failures: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source_name, "bad");
        let total_items: usize = results.iter().map(|r| r.items.len()).sum();
        assert_eq!(total_items, 2);
    }

    #[tokio::test]
    async fn disabled_fetchers_are_skipped() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut mgr = FetcherManager::new(5);
        mgr.register(stub("off", false, false, &concurrent, &peak));
        let results = mgr.fetch_all().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn worker_pool_is_bounded() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut mgr = FetcherManager::new(2);
        for name in ["a", "b", "c", "d", "e", "f"] {
            mgr.register(stub(name, true, false, &concurrent, &peak));
        }
        let results = mgr.fetch_all().await;
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2, "pool exceeded max_workers");
    }
}

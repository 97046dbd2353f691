use async_trait::async_trait;

use dailybrief_common::{FetchResult, SourceType};

/// One external source turned into a batch of normalized articles.
///
/// `fetch` must not fail: any network or parse error is folded into
/// `FetchResult::error` so a broken source never takes down a run.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> FetchResult;

    fn enabled(&self) -> bool;

    fn source_name(&self) -> &str;

    fn source_type(&self) -> SourceType;
}

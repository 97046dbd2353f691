use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use dailybrief_common::config::GithubConfig;
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::state::{GithubStateStore, RepoState};
use crate::traits::Fetcher;

const API_BASE: &str = "https://api.github.com";

/// Minimum relative star growth that re-qualifies an already-seen repo.
const STAR_GROWTH_FACTOR: f64 = 1.2;

/// GitHub trending adapter. Stateful by design: a repo is emitted only on
/// first sight, on a release-tag change, or on >=20% star growth since the
/// last emission. The state map persists across runs via [`GithubStateStore`].
pub struct GithubFetcher {
    config: GithubConfig,
    client: reqwest::Client,
    store: GithubStateStore,
    state: Mutex<HashMap<String, RepoState>>,
}

struct RepoCandidate {
    full_name: String,
    article: Article,
    stars: u64,
    release: String,
}

impl GithubFetcher {
    pub fn new(config: GithubConfig, store: GithubStateStore) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        let state = Mutex::new(store.load());
        Self {
            config,
            client,
            store,
            state,
        }
    }

    async fn api_get(&self, url: &str, query: &[(&str, String)]) -> anyhow::Result<Value> {
        let mut request = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "dailybrief/0.1");
        if !self.config.token.is_empty() {
            request = request.header("Authorization", format!("token {}", self.config.token));
        }
        Ok(request.send().await?.error_for_status()?.json().await?)
    }

    async fn search_by_topic(&self, topic: &str) -> anyhow::Result<Vec<RepoCandidate>> {
        let cutoff = (Utc::now() - chrono::Duration::days(self.config.days_back))
            .format("%Y-%m-%d")
            .to_string();
        let query = format!(
            "topic:{topic} stars:>={} pushed:>={cutoff}",
            self.config.min_stars
        );
        self.search(&query, topic, 30.min(self.config.max_results)).await
    }

    async fn search_new_trending(&self) -> anyhow::Result<Vec<RepoCandidate>> {
        let cutoff = (Utc::now() - chrono::Duration::days(self.config.days_back))
            .format("%Y-%m-%d")
            .to_string();
        let query = format!("created:>={cutoff} stars:>={}", self.config.min_stars / 2);
        self.search(&query, "new_trending", 20.min(self.config.max_results)).await
    }

    async fn search(
        &self,
        query: &str,
        topic: &str,
        per_page: usize,
    ) -> anyhow::Result<Vec<RepoCandidate>> {
        let data = self
            .api_get(
                &format!("{API_BASE}/search/repositories"),
                &[
                    ("q", query.to_string()),
                    ("sort", "stars".to_string()),
                    ("order", "desc".to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;

        let mut candidates = Vec::new();
        for item in data["items"].as_array().cloned().unwrap_or_default() {
            let Some(full_name) = item["full_name"].as_str().map(String::from) else {
                continue;
            };
            let release = self.latest_release(&full_name).await;
            candidates.push(build_candidate(&item, full_name, topic, release));
        }
        Ok(candidates)
    }

    /// Latest release tag, or empty when the repo has no releases. Failure is
    /// not an error: most repos simply don't cut releases.
    async fn latest_release(&self, full_name: &str) -> String {
        match self
            .api_get(&format!("{API_BASE}/repos/{full_name}/releases/latest"), &[])
            .await
        {
            Ok(data) => data["tag_name"].as_str().unwrap_or_default().to_string(),
            Err(_) => String::new(),
        }
    }

    /// Apply the first-seen / new-release / star-growth gate against the
    /// persisted state, updating it for emitted repos.
    fn filter_and_update_state(&self, candidates: Vec<RepoCandidate>) -> Vec<Article> {
        let mut state = self.state.lock().expect("github state lock");
        let now = Utc::now().to_rfc3339();
        let mut out = Vec::new();
        let mut changed = false;

        for mut candidate in candidates {
            match state.get_mut(&candidate.full_name) {
                None => {
                    state.insert(
                        candidate.full_name.clone(),
                        RepoState {
                            stars: candidate.stars,
                            release: candidate.release.clone(),
                            pushed_at: now.clone(),
                        },
                    );
                    changed = true;
                    out.push(candidate.article);
                }
                Some(prev) => {
                    if !candidate.release.is_empty() && candidate.release != prev.release {
                        candidate.article.extras.insert(
                            "update_reason".into(),
                            Value::String(format!("new release: {}", candidate.release)),
                        );
                        prev.release = candidate.release.clone();
                        prev.pushed_at = now.clone();
                        changed = true;
                        out.push(candidate.article);
                    } else if prev.stars > 0
                        && candidate.stars as f64 > prev.stars as f64 * STAR_GROWTH_FACTOR
                    {
                        candidate.article.extras.insert(
                            "update_reason".into(),
                            Value::String(format!(
                                "star growth: {} -> {}",
                                prev.stars, candidate.stars
                            )),
                        );
                        prev.stars = candidate.stars;
                        prev.pushed_at = now.clone();
                        changed = true;
                        out.push(candidate.article);
                    }
                }
            }
        }

        if changed {
            self.store.save(&state);
        }
        out
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let mut candidates: Vec<RepoCandidate> = Vec::new();

        for topic in &self.config.topics {
            match self.search_by_topic(topic).await {
                Ok(found) => candidates.extend(found),
                Err(e) => warn!(topic, error = %e, "GitHub topic search failed"),
            }
        }
        match self.search_new_trending().await {
            Ok(found) => candidates.extend(found),
            Err(e) => warn!(error = %e, "GitHub new-trending search failed"),
        }

        // Dedup by repo before the state gate.
        let mut seen = std::collections::HashSet::new();
        candidates.retain(|c| seen.insert(c.full_name.clone()));

        let articles = self.filter_and_update_state(candidates);
        info!(count = articles.len(), "GitHub fetch complete");
        Ok(articles)
    }
}

fn build_candidate(
    item: &Value,
    full_name: String,
    topic: &str,
    release: String,
) -> RepoCandidate {
    let stars = item["stargazers_count"].as_u64().unwrap_or(0);
    let description = item["description"].as_str().unwrap_or_default();
    let language = item["language"].as_str().unwrap_or_default();
    let url = item["html_url"].as_str().unwrap_or_default();
    let pushed_at = item["pushed_at"]
        .as_str()
        .or_else(|| item["created_at"].as_str())
        .unwrap_or_default();

    let mut content = format!("**{full_name}**\n\n{description}\n\nStars: {stars}");
    if !language.is_empty() {
        content.push_str(&format!("\nLanguage: {language}"));
    }
    if !release.is_empty() {
        content.push_str(&format!("\nLatest Release: {release}"));
    }

    let mut article = Article::new(
        format!("[GitHub] {full_name}"),
        url,
        "GitHub",
        SourceType::Github,
    )
    .with_published_date(pushed_at.chars().take(10).collect::<String>())
    .with_content(content);
    article
        .extras
        .insert("repo_full_name".into(), Value::String(full_name.clone()));
    article
        .extras
        .insert("github_stars".into(), serde_json::json!(stars));
    article
        .extras
        .insert("search_topic".into(), Value::String(topic.to_string()));
    if !release.is_empty() {
        article
            .extras
            .insert("latest_release".into(), Value::String(release.clone()));
    }

    RepoCandidate {
        full_name,
        article,
        stars,
        release,
    }
}

#[async_trait]
impl Fetcher for GithubFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("GitHub", SourceType::Github, items),
            Err(e) => FetchResult::failed("GitHub", SourceType::Github, e.to_string()),
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "GitHub"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Github
    }
}

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use dailybrief_common::config::NvdConfig;
use dailybrief_common::text::ellipsize;
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::traits::Fetcher;

const API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
const DETAIL_URL: &str = "https://nvd.nist.gov/vuln/detail";

/// NVD CVE listing over the last `days_back` days, with the severity floor
/// applied at the adapter boundary.
pub struct NvdFetcher {
    config: NvdConfig,
    client: reqwest::Client,
}

impl NvdFetcher {
    pub fn new(config: NvdConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(self.config.days_back);
        let url = format!(
            "{API_URL}?pubStartDate={}&pubEndDate={}&resultsPerPage={}",
            start.format("%Y-%m-%dT%H:%M:%S%.3f"),
            end.format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.config.max_results
        );

        let mut request = self.client.get(&url).header("User-Agent", "dailybrief/0.1");
        if !self.config.api_key.is_empty() {
            request = request.header("apiKey", &self.config.api_key);
        }

        let data: Value = request.send().await?.error_for_status()?.json().await?;
        let vulnerabilities = data["vulnerabilities"].as_array().cloned().unwrap_or_default();

        let mut filtered_low = 0usize;
        let mut articles = Vec::new();
        for item in &vulnerabilities {
            let Some(parsed) = parse_cve(&item["cve"]) else {
                continue;
            };
            if self.config.min_cvss_score > 0.0
                && parsed.cvss_score.map_or(true, |s| s < self.config.min_cvss_score)
            {
                filtered_low += 1;
                continue;
            }
            articles.push(parsed.into_article());
        }

        info!(
            total = vulnerabilities.len(),
            kept = articles.len(),
            filtered_low,
            min_cvss = self.config.min_cvss_score,
            "NVD fetch complete"
        );
        Ok(articles)
    }
}

struct ParsedCve {
    cve_id: String,
    description: String,
    published: String,
    cvss_score: Option<f64>,
    cvss_vector: Option<String>,
    severity: Option<String>,
}

impl ParsedCve {
    fn into_article(self) -> Article {
        let title = format!("{}: {}", self.cve_id, ellipsize(&self.description, 80));
        let url = format!("{DETAIL_URL}/{}", self.cve_id);

        let mut content = self.description.clone();
        if let Some(vector) = &self.cvss_vector {
            content.push_str(&format!("\n\nCVSS Vector: {vector}"));
        }

        let mut article = Article::new(title, url, "NVD", SourceType::Nvd)
            .with_published_date(self.published)
            .with_content(content)
            .with_extra("cve_id", Value::String(self.cve_id));
        if let Some(score) = self.cvss_score {
            article.extras.insert("cvss_score".into(), serde_json::json!(score));
        }
        if let Some(severity) = self.severity {
            article.extras.insert("severity".into(), Value::String(severity));
        }
        article
    }
}

/// Pull the fields out of one NVD 2.0 `cve` object. CVSS v3.1 metrics take
/// precedence over v3.0, then v2.
fn parse_cve(cve: &Value) -> Option<ParsedCve> {
    let cve_id = cve["id"].as_str()?.to_string();

    let description = cve["descriptions"]
        .as_array()
        .and_then(|descs| {
            descs
                .iter()
                .find(|d| d["lang"].as_str() == Some("en"))
                .or_else(|| descs.first())
        })
        .and_then(|d| d["value"].as_str())
        .unwrap_or_default()
        .to_string();

    let published = cve["published"]
        .as_str()
        .map(|p| p.chars().take(10).collect())
        .unwrap_or_default();

    let metrics = &cve["metrics"];
    let cvss_data = ["cvssMetricV31", "cvssMetricV30", "cvssMetricV2"]
        .iter()
        .find_map(|key| metrics[*key].as_array().and_then(|m| m.first()))
        .map(|m| m["cvssData"].clone());

    let (cvss_score, cvss_vector, severity) = match &cvss_data {
        Some(data) => (
            data["baseScore"].as_f64(),
            data["vectorString"].as_str().map(String::from),
            data["baseSeverity"].as_str().map(String::from),
        ),
        None => (None, None, None),
    };

    Some(ParsedCve {
        cve_id,
        description,
        published,
        cvss_score,
        cvss_vector,
        severity,
    })
}

#[async_trait]
impl Fetcher for NvdFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("NVD", SourceType::Nvd, items),
            Err(e) => FetchResult::failed("NVD", SourceType::Nvd, e.to_string()),
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "NVD"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Nvd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cve(score: f64) -> Value {
        serde_json::json!({
            "id": "CVE-2024-12345",
            "published": "2024-05-01T10:00:00.000",
            "descriptions": [
                {"lang": "es", "value": "otro"},
                {"lang": "en", "value": "A heap overflow in libexample allows remote code execution."}
            ],
            "metrics": {
                "cvssMetricV31": [{
                    "cvssData": {
                        "baseScore": score,
                        "baseSeverity": "CRITICAL",
                        "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H"
                    }
                }]
            }
        })
    }

    #[test]
    fn parse_cve_prefers_english_description_and_v31_metrics() {
        let parsed = parse_cve(&sample_cve(9.8)).unwrap();
        assert_eq!(parsed.cve_id, "CVE-2024-12345");
        assert!(parsed.description.starts_with("A heap overflow"));
        assert_eq!(parsed.cvss_score, Some(9.8));
        assert_eq!(parsed.severity.as_deref(), Some("CRITICAL"));
        assert_eq!(parsed.published, "2024-05-01");
    }

    #[test]
    fn into_article_builds_detail_url_and_extras() {
        let article = parse_cve(&sample_cve(7.5)).unwrap().into_article();
        assert_eq!(article.url, "https://nvd.nist.gov/vuln/detail/CVE-2024-12345");
        assert_eq!(article.extra_str("cve_id"), Some("CVE-2024-12345"));
        assert_eq!(article.extra_f64("cvss_score"), Some(7.5));
        assert!(article.content.contains("CVSS Vector"));
    }

    #[test]
    fn parse_cve_without_metrics_has_no_score() {
        let raw = serde_json::json!({
            "id": "CVE-2024-1",
            "descriptions": [{"lang": "en", "value": "desc"}],
            "metrics": {}
        });
        let parsed = parse_cve(&raw).unwrap();
        assert_eq!(parsed.cvss_score, None);
    }
}

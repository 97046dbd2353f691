use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::info;

use dailybrief_common::config::KevConfig;
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::traits::Fetcher;

const CATALOG_URL: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";
const DETAIL_URL: &str = "https://nvd.nist.gov/vuln/detail";

/// CISA Known Exploited Vulnerabilities catalog, filtered to entries added in
/// the last `days_back` days.
pub struct KevFetcher {
    config: KevConfig,
    client: reqwest::Client,
}

impl KevFetcher {
    pub fn new(config: KevConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let data: Value = self
            .client
            .get(CATALOG_URL)
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let cutoff = (Utc::now() - chrono::Duration::days(self.config.days_back)).date_naive();
        let entries = data["vulnerabilities"].as_array().cloned().unwrap_or_default();

        let articles: Vec<Article> = entries
            .iter()
            .filter_map(|entry| self.parse_entry(entry, cutoff))
            .collect();

        info!(
            catalog = entries.len(),
            kept = articles.len(),
            days_back = self.config.days_back,
            "KEV fetch complete"
        );
        Ok(articles)
    }

    fn parse_entry(&self, entry: &Value, cutoff: NaiveDate) -> Option<Article> {
        let cve_id = entry["cveID"].as_str()?.to_string();
        let date_added = entry["dateAdded"].as_str().unwrap_or_default();
        let added = NaiveDate::parse_from_str(date_added, "%Y-%m-%d").ok()?;
        if added < cutoff {
            return None;
        }

        // The catalog itself carries no CVSS; a score may be present when the
        // entry was cross-enriched. Apply the floor only when one exists.
        if self.config.min_cvss_score > 0.0 {
            if let Some(score) = entry["cvssScore"].as_f64() {
                if score < self.config.min_cvss_score {
                    return None;
                }
            }
        }

        let name = entry["vulnerabilityName"].as_str().unwrap_or(&cve_id);
        let vendor = entry["vendorProject"].as_str().unwrap_or_default();
        let product = entry["product"].as_str().unwrap_or_default();
        let description = entry["shortDescription"].as_str().unwrap_or_default();
        let action = entry["requiredAction"].as_str().unwrap_or_default();
        let ransomware = entry["knownRansomwareCampaignUse"].as_str().unwrap_or("Unknown");

        let mut content = format!("{description}\n\nVendor: {vendor} / Product: {product}");
        if !action.is_empty() {
            content.push_str(&format!("\n\nRequired Action: {action}"));
        }

        let mut article = Article::new(
            format!("[KEV] {name}"),
            format!("{DETAIL_URL}/{cve_id}"),
            "CISA KEV",
            SourceType::Kev,
        )
        .with_published_date(date_added.to_string())
        .with_content(content)
        .with_extra("cve_id", Value::String(cve_id));
        article
            .extras
            .insert("vendor".into(), Value::String(vendor.to_string()));
        article
            .extras
            .insert("product".into(), Value::String(product.to_string()));
        article
            .extras
            .insert("ransomware_use".into(), Value::String(ransomware.to_string()));
        Some(article)
    }
}

#[async_trait]
impl Fetcher for KevFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("CISA KEV", SourceType::Kev, items),
            Err(e) => FetchResult::failed("CISA KEV", SourceType::Kev, e.to_string()),
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "CISA KEV"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Kev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(date_added: &str) -> Value {
        serde_json::json!({
            "cveID": "CVE-2024-9999",
            "vendorProject": "ExampleCorp",
            "product": "Widget",
            "vulnerabilityName": "ExampleCorp Widget RCE",
            "dateAdded": date_added,
            "shortDescription": "Remote code execution in Widget.",
            "requiredAction": "Apply vendor patch.",
            "knownRansomwareCampaignUse": "Known"
        })
    }

    #[test]
    fn recent_entries_become_articles() {
        let fetcher = KevFetcher::new(KevConfig::default());
        let today = Utc::now().date_naive();
        let cutoff = today - chrono::Duration::days(7);
        let article = fetcher
            .parse_entry(&entry(&today.format("%Y-%m-%d").to_string()), cutoff)
            .unwrap();
        assert_eq!(article.title, "[KEV] ExampleCorp Widget RCE");
        assert_eq!(article.extra_str("cve_id"), Some("CVE-2024-9999"));
        assert!(article.content.contains("Required Action"));
        assert_eq!(article.extra_str("ransomware_use"), Some("Known"));
    }

    #[test]
    fn old_entries_are_dropped() {
        let fetcher = KevFetcher::new(KevConfig::default());
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(7);
        assert!(fetcher.parse_entry(&entry("2020-01-01"), cutoff).is_none());
    }
}

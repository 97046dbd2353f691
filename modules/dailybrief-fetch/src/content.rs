// Article-body retrieval for sources whose listing carries only a link.
// HTML is reduced to markdown via Readability extraction; any failure yields
// an empty string so a dead page never poisons the processing pool.

use std::time::Duration;

use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::{info, warn};

/// Marker appended when a body hits the configured length ceiling.
const TRUNCATION_MARKER: &str = "\n\n[内容已截断]";

pub struct ContentProcessor {
    client: reqwest::Client,
    max_content_length: usize,
}

impl ContentProcessor {
    /// `proxy` is honored for all outbound requests when non-empty.
    pub fn new(proxy: &str, timeout_secs: u64, max_content_length: usize) -> Self {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs));
        if !proxy.is_empty() {
            match reqwest::Proxy::all(proxy) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => warn!(proxy, error = %e, "Invalid proxy, ignoring"),
            }
        }
        Self {
            client: builder.build().unwrap_or_default(),
            max_content_length,
        }
    }

    /// Fetch `url` and return its readable body as markdown. Empty string on
    /// any failure.
    pub async fn process(&self, url: &str) -> String {
        let html = match self.fetch_html(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url, error = %e, "Content fetch failed");
                return String::new();
            }
        };
        if html.trim().is_empty() {
            warn!(url, "Empty HTML response");
            return String::new();
        }

        let markdown = html_to_markdown(html.as_bytes(), Some(url));
        let body = self.enforce_limit(markdown);
        info!(url, chars = body.chars().count(), "Content processed");
        body
    }

    async fn fetch_html(&self, url: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.text().await?)
    }

    fn enforce_limit(&self, text: String) -> String {
        if self.max_content_length == 0 || text.chars().count() <= self.max_content_length {
            return text;
        }
        let mut out: String = text.chars().take(self.max_content_length).collect();
        out.push_str(TRUNCATION_MARKER);
        out
    }
}

/// Convert raw HTML bytes into clean markdown using Readability extraction.
pub(crate) fn html_to_markdown(html: &[u8], url: Option<&str>) -> String {
    let parsed_url = url.and_then(|u| url::Url::parse(u).ok());
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    transform_content_input(input, &config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforce_limit_truncates_with_marker() {
        let processor = ContentProcessor::new("", 30, 10);
        let long: String = "安全研究内容".repeat(10);
        let cut = processor.enforce_limit(long);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            cut.chars().count(),
            10 + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn enforce_limit_passes_short_text_through() {
        let processor = ContentProcessor::new("", 30, 100);
        assert_eq!(processor.enforce_limit("short".into()), "short");
    }

    #[test]
    fn enforce_limit_zero_disables_ceiling() {
        let processor = ContentProcessor::new("", 30, 0);
        let long = "x".repeat(100_000);
        assert_eq!(processor.enforce_limit(long.clone()), long);
    }
}

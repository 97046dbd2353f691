use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use dailybrief_common::config::LarkConfig;

const API_BASE: &str = "https://open.feishu.cn/open-apis";

/// Refresh the tenant token this long before its reported expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Outbound chat-platform surface. The pipeline pushes digests and the event
/// server replies to questions through this seam.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, receive_id: &str, text: &str) -> Result<()>;
    async fn send_rich_text(&self, receive_id: &str, title: &str, content: Value) -> Result<()>;
    async fn send_card(&self, receive_id: &str, card: Value) -> Result<()>;
    async fn reply_message(&self, message_id: &str, text: &str) -> Result<()>;
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Lark open-api client with tenant-token caching.
pub struct LarkClient {
    app_id: String,
    app_secret: String,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl LarkClient {
    pub fn new(config: &LarkConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            http,
            token: Mutex::new(None),
        }
    }

    async fn tenant_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let response: Value = self
            .http
            .post(format!("{API_BASE}/auth/v3/tenant_access_token/internal"))
            .json(&json!({"app_id": self.app_id, "app_secret": self.app_secret}))
            .send()
            .await
            .context("Tenant token request failed")?
            .json()
            .await
            .context("Tenant token response unreadable")?;

        if response["code"].as_i64() != Some(0) {
            bail!("Tenant token error: {}", response["msg"].as_str().unwrap_or("unknown"));
        }

        let token = response["tenant_access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("Tenant token missing in response"))?
            .to_string();
        let expire = response["expire"].as_i64().unwrap_or(3600);

        debug!(expire, "Tenant token refreshed");
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Utc::now()
                + chrono::Duration::seconds((expire - TOKEN_REFRESH_MARGIN_SECS).max(60)),
        });
        Ok(token)
    }

    async fn post_message(&self, url: &str, body: Value) -> Result<()> {
        let token = self.tenant_token().await?;
        let response: Value = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("Message send failed")?
            .json()
            .await
            .context("Message response unreadable")?;

        if response["code"].as_i64() != Some(0) {
            bail!(
                "Messenger rejected the message: {}",
                response["msg"].as_str().unwrap_or("unknown")
            );
        }
        Ok(())
    }

    async fn send(&self, receive_id: &str, msg_type: &str, content: String) -> Result<()> {
        let url = format!("{API_BASE}/im/v1/messages?receive_id_type=chat_id");
        self.post_message(
            &url,
            json!({
                "receive_id": receive_id,
                "msg_type": msg_type,
                "content": content,
            }),
        )
        .await
    }
}

#[async_trait]
impl Messenger for LarkClient {
    async fn send_text(&self, receive_id: &str, text: &str) -> Result<()> {
        let content = serde_json::to_string(&json!({"text": text}))?;
        self.send(receive_id, "text", content).await?;
        info!(receive_id, chars = text.chars().count(), "Text message sent");
        Ok(())
    }

    async fn send_rich_text(&self, receive_id: &str, title: &str, content: Value) -> Result<()> {
        let post = serde_json::to_string(&json!({
            "zh_cn": {"title": title, "content": content}
        }))?;
        self.send(receive_id, "post", post).await?;
        info!(receive_id, title, "Rich-text message sent");
        Ok(())
    }

    async fn send_card(&self, receive_id: &str, card: Value) -> Result<()> {
        let content = serde_json::to_string(&card)?;
        self.send(receive_id, "interactive", content).await?;
        info!(receive_id, "Card message sent");
        Ok(())
    }

    async fn reply_message(&self, message_id: &str, text: &str) -> Result<()> {
        let content = serde_json::to_string(&json!({"text": text}))?;
        let url = format!("{API_BASE}/im/v1/messages/{message_id}/reply");
        self.post_message(
            &url,
            json!({"msg_type": "text", "content": content}),
        )
        .await?;
        info!(message_id, "Reply sent");
        Ok(())
    }
}
